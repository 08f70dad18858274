// This file is part of Ember.
//
// Ember is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Ember is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Ember.  If not, see <http://www.gnu.org/licenses/>.

//! Lowering from the checked AST to the SSA module.
//!
//! Every program gets one opaque global structure with a field per
//! declared global; every function takes a pointer to it as an implicit
//! first parameter. Exported functions keep their source names and get
//! external linkage plus a trampoline per function type for host calls.

use crate::{
    ast::{Node, Tag},
    ir::{BinOp, BlockId, CmpOp, FnTy, FuncId, Function, Instr, Linkage, Module, NativeFn, Op,
         Term, Ty, ValueId},
    table::SymbolTable,
    types::{Type, TypeBase},
};
use anyhow::{anyhow, bail, Result};
use ordered_float::OrderedFloat;
use std::collections::HashMap;

pub struct IrOutput {
    pub module: Module,
    /// Exported function name to its IR function.
    pub function_map: HashMap<String, FuncId>,
    /// Exported function name to the trampoline for its type.
    pub trampoline_map: HashMap<String, FuncId>,
}

/// Lower a checked program. `globals` must be in declaration order; it
/// fixes the global structure layout.
pub fn generate(
    module_name: &str,
    program: &Node,
    globals: &[(String, Type, bool)],
) -> Result<IrOutput> {
    let mut module = Module::new(module_name);
    let mut numbering = HashMap::new();
    for (index, (name, ty, _)) in globals.iter().enumerate() {
        module.global_fields.push((name.clone(), lower_checked_type(ty)));
        numbering.insert(name.clone(), index);
    }

    let mut generator = IrGen {
        module,
        global_numbering: numbering,
        global_inits: Vec::new(),
        trampolines: HashMap::new(),
        trampoline_map: HashMap::new(),
        function_map: HashMap::new(),
        symbol_table: SymbolTable::new(),
        stack: Vec::new(),
        immediate_left_assign: None,
    };

    for child in &program.children {
        match child.tag {
            Tag::Global => generator.emit_global_block(child)?,
            Tag::GlobalAssign => generator.emit_global_assign(child)?,
            _ => bail!("unexpected top-level construct"),
        }
    }
    generator.emit_global_functions()?;

    Ok(IrOutput {
        module: generator.module,
        function_map: generator.function_map,
        trampoline_map: generator.trampoline_map,
    })
}

/// The IR type of a checked Yang type. Function types gain the implicit
/// global pointer as their first argument.
pub fn lower_checked_type(t: &Type) -> Ty {
    match t.base() {
        TypeBase::Int => Ty::Int.with_count(t.count()),
        TypeBase::World => Ty::World.with_count(t.count()),
        TypeBase::Function => {
            let mut args = vec![Ty::Ptr];
            for i in 1..t.element_size() {
                args.push(lower_checked_type(t.elements(i)));
            }
            Ty::function(lower_checked_type(t.elements(0)), args)
        }
        _ => Ty::Void,
    }
}

#[derive(Clone, Debug)]
enum Slot {
    /// A stack cell holding the value.
    Local(ValueId),
    /// A top-level function constant.
    Func(FuncId),
}

struct FuncState {
    id: FuncId,
    function: Function,
    block: BlockId,
    global_ptr: ValueId,
    /// Break and continue targets of enclosing loops in this function.
    loops: Vec<(BlockId, BlockId)>,
    in_global_init: bool,
}

struct IrGen {
    module: Module,
    global_numbering: HashMap<String, usize>,
    global_inits: Vec<FuncId>,
    trampolines: HashMap<FnTy, FuncId>,
    trampoline_map: HashMap<String, FuncId>,
    function_map: HashMap<String, FuncId>,
    symbol_table: SymbolTable<String, Slot>,
    stack: Vec<FuncState>,
    immediate_left_assign: Option<String>,
}

impl IrGen {
    // Function plumbing.

    fn begin_function(
        &mut self,
        name: &str,
        linkage: Linkage,
        ty: FnTy,
        in_global_init: bool,
    ) -> FuncId {
        let function = Function::new(name, linkage, ty.clone());
        // Reserve the slot now so the body can refer to its own id.
        self.module.functions.push(Function::new(name, linkage, ty));
        let id = self.module.functions.len() - 1;
        self.stack.push(FuncState {
            id,
            function,
            block: 0,
            global_ptr: 0,
            loops: Vec::new(),
            in_global_init,
        });
        id
    }

    fn end_function(&mut self) {
        let state = self.stack.pop().expect("no function in progress");
        self.module.functions[state.id] = state.function;
    }

    fn st(&mut self) -> &mut FuncState {
        self.stack.last_mut().expect("no function in progress")
    }

    fn emit(&mut self, op: Op, ty: Ty) -> ValueId {
        let state = self.st();
        let id = state.function.instrs.len();
        state.function.instrs.push(Instr { op, ty });
        let block = state.block;
        state.function.blocks[block].instrs.push(id);
        id
    }

    /// Emit a pure instruction into a specific block (it may already be
    /// terminated; instructions run before the terminator).
    fn emit_into(&mut self, block: BlockId, op: Op, ty: Ty) -> ValueId {
        let state = self.st();
        let id = state.function.instrs.len();
        state.function.instrs.push(Instr { op, ty });
        state.function.blocks[block].instrs.push(id);
        id
    }

    /// Allocas live in the entry block so they execute exactly once and
    /// promotion passes can find them.
    fn emit_alloca(&mut self, pointee: Ty) -> ValueId {
        self.emit_into(0, Op::Alloca(pointee), Ty::Ptr)
    }

    fn create_block(&mut self, name: &str) -> BlockId {
        let state = self.st();
        state.function.blocks.push(crate::ir::Block {
            name: name.to_owned(),
            instrs: Vec::new(),
            term: None,
        });
        state.function.blocks.len() - 1
    }

    fn set_block(&mut self, block: BlockId) {
        self.st().block = block;
    }

    fn current_block(&mut self) -> BlockId {
        self.st().block
    }

    fn terminate(&mut self, term: Term) {
        let state = self.st();
        let block = state.block;
        if state.function.blocks[block].term.is_none() {
            state.function.blocks[block].term = Some(term);
        }
    }

    fn ty_of(&mut self, v: ValueId) -> Ty {
        self.st().function.instrs[v].ty.clone()
    }

    // Constants and conversions.

    fn const_int(&mut self, value: i32) -> ValueId {
        self.emit(Op::ConstInt(value), Ty::Int)
    }

    fn const_world(&mut self, value: f64) -> ValueId {
        self.emit(Op::ConstWorld(OrderedFloat(value)), Ty::World)
    }

    /// An int or world constant splatted to the shape of `like`.
    fn const_like(&mut self, like: ValueId, value: i32) -> ValueId {
        let ty = self.ty_of(like);
        let scalar = if ty.scalar() == Ty::World {
            self.const_world(value as f64)
        } else {
            self.const_int(value)
        };
        match ty.vector_size() {
            Some(n) => self.emit(Op::Splat(scalar, n), ty),
            None => scalar,
        }
    }

    fn i2b(&mut self, v: ValueId) -> ValueId {
        let ty = self.ty_of(v);
        if ty.is_bool_or_vector() {
            return v;
        }
        let zero = self.const_like(v, 0);
        let result_ty = Ty::Bool.with_count(ty.vector_size().unwrap_or(1));
        let op = if ty.is_world_or_vector() {
            CmpOp::FOne
        } else {
            CmpOp::Ne
        };
        self.emit(Op::Cmp(op, v, zero), result_ty)
    }

    fn b2i(&mut self, v: ValueId) -> ValueId {
        let ty = self.ty_of(v);
        let result_ty = Ty::Int.with_count(ty.vector_size().unwrap_or(1));
        self.emit(Op::ZExt(v), result_ty)
    }

    fn i2w(&mut self, v: ValueId) -> ValueId {
        let ty = self.ty_of(v);
        let result_ty = Ty::World.with_count(ty.vector_size().unwrap_or(1));
        self.emit(Op::SiToFp(v), result_ty)
    }

    /// Mathematical floor: `int(v) - (v < 0 && v != world(int(v)))`.
    fn w2i(&mut self, v: ValueId) -> ValueId {
        let ty = self.ty_of(v);
        let n = ty.vector_size().unwrap_or(1);
        let int_ty = Ty::Int.with_count(n);
        let world_ty = Ty::World.with_count(n);
        let bool_ty = Ty::Bool.with_count(n);

        let cast = self.emit(Op::FpToSi(v), int_ty.clone());
        let back = self.emit(Op::SiToFp(cast), world_ty);
        let zero = self.const_like(v, 0);
        let a_check = self.emit(Op::Cmp(CmpOp::FOlt, v, zero), bool_ty.clone());
        let b_check = self.emit(Op::Cmp(CmpOp::FOne, v, back), bool_ty.clone());
        let both = self.emit(Op::Binary(BinOp::And, a_check, b_check), bool_ty);
        let adjust = self.b2i(both);
        self.emit(Op::Binary(BinOp::Sub, cast, adjust), int_ty)
    }

    /// Splat whichever side is scalar so a primitive op applies.
    fn broadcast(&mut self, left: ValueId, right: ValueId) -> (ValueId, ValueId) {
        let lt = self.ty_of(left);
        let rt = self.ty_of(right);
        match (lt.vector_size(), rt.vector_size()) {
            (Some(n), None) => {
                let splat = self.emit(Op::Splat(right, n), rt.with_count(n));
                (left, splat)
            }
            (None, Some(n)) => {
                let splat = self.emit(Op::Splat(left, n), lt.with_count(n));
                (splat, right)
            }
            _ => (left, right),
        }
    }

    // Arithmetic helpers.

    /// Integer `**` calls out to the native `pow(double, double)`,
    /// element-wise for vectors, converting on both sides.
    fn pow(&mut self, v: ValueId, u: ValueId) -> ValueId {
        let ty = self.ty_of(v);
        let was_int = ty.is_int_or_vector();
        let (v, u) = if was_int {
            (self.i2w(v), self.i2w(u))
        } else {
            (v, u)
        };

        match self.ty_of(v).vector_size() {
            None => {
                let call = self.emit(Op::CallNative(NativeFn::Pow, vec![v, u]), Ty::World);
                if was_int {
                    self.w2i(call)
                } else {
                    call
                }
            }
            Some(n) => {
                let zero = self.const_world(0.);
                let mut result = self.emit(Op::Splat(zero, n), Ty::WorldVec(n));
                for i in 0..n {
                    let index = self.const_int(i as i32);
                    let x = self.emit(Op::Extract(v, index), Ty::World);
                    let y = self.emit(Op::Extract(u, index), Ty::World);
                    let call = self.emit(Op::CallNative(NativeFn::Pow, vec![x, y]), Ty::World);
                    result = self.emit(Op::Insert(result, call, index), Ty::WorldVec(n));
                }
                if was_int {
                    self.w2i(result)
                } else {
                    result
                }
            }
        }
    }

    /// Euclidean remainder:
    /// `(v >= 0 ? v : v + (bool(|v| % |u|) + |v| / |u|) * |u|) % |u|`.
    /// The roundabout form avoids overflow for extreme operands.
    fn euclidean_mod(&mut self, v: ValueId, u: ValueId) -> ValueId {
        let ty = self.ty_of(v);
        if !ty.is_int_or_vector() {
            return self.emit(Op::Binary(BinOp::FRem, v, u), ty);
        }
        let n = ty.vector_size().unwrap_or(1);
        let bool_ty = Ty::Bool.with_count(n);

        let zero = self.const_like(v, 0);
        let v_check = self.emit(Op::Cmp(CmpOp::Sge, v, zero), bool_ty.clone());
        let u_check = self.emit(Op::Cmp(CmpOp::Sge, u, zero), bool_ty);
        let v_neg = self.emit(Op::Binary(BinOp::Sub, zero, v), ty.clone());
        let u_neg = self.emit(Op::Binary(BinOp::Sub, zero, u), ty.clone());
        let v_abs = self.emit(Op::Select(v_check, v, v_neg), ty.clone());
        let u_abs = self.emit(Op::Select(u_check, u, u_neg), ty.clone());

        let rem = self.emit(Op::Binary(BinOp::SRem, v_abs, u_abs), ty.clone());
        let rem_bool = self.i2b(rem);
        let rem_int = self.b2i(rem_bool);
        let div = self.emit(Op::Binary(BinOp::SDiv, v_abs, u_abs), ty.clone());
        let k = self.emit(Op::Binary(BinOp::Add, rem_int, div), ty.clone());
        let ku = self.emit(Op::Binary(BinOp::Mul, k, u_abs), ty.clone());
        let shifted = self.emit(Op::Binary(BinOp::Add, v, ku), ty.clone());
        let lhs = self.emit(Op::Select(v_check, v, shifted), ty.clone());
        self.emit(Op::Binary(BinOp::SRem, lhs, u_abs), ty)
    }

    /// Euclidean division, rounding toward negative infinity:
    /// `sign = (v < 0) == (u < 0); t = (v < 0 ? -(1 + v) : v) / |u|;`
    /// `(sign ? t : -(1 + t)) + (u < 0)`.
    fn euclidean_div(&mut self, v: ValueId, u: ValueId) -> ValueId {
        let ty = self.ty_of(v);
        if !ty.is_int_or_vector() {
            return self.emit(Op::Binary(BinOp::FDiv, v, u), ty);
        }
        let n = ty.vector_size().unwrap_or(1);
        let bool_ty = Ty::Bool.with_count(n);

        let zero = self.const_like(v, 0);
        let minus_one = self.const_like(v, -1);
        let v_check = self.emit(Op::Cmp(CmpOp::Slt, v, zero), bool_ty.clone());
        let u_check = self.emit(Op::Cmp(CmpOp::Slt, u, zero), bool_ty.clone());
        let sign = self.emit(Op::Cmp(CmpOp::Eq, v_check, u_check), bool_ty);

        let u_neg = self.emit(Op::Binary(BinOp::Sub, zero, u), ty.clone());
        let u_abs = self.emit(Op::Select(u_check, u_neg, u), ty.clone());

        let v_flip = self.emit(Op::Binary(BinOp::Sub, minus_one, v), ty.clone());
        let t = self.emit(Op::Select(v_check, v_flip, v), ty.clone());
        let t = self.emit(Op::Binary(BinOp::SDiv, t, u_abs), ty.clone());
        let t_flip = self.emit(Op::Binary(BinOp::Sub, minus_one, t), ty.clone());
        let picked = self.emit(Op::Select(sign, t, t_flip), ty.clone());
        let carry = self.b2i(u_check);
        self.emit(Op::Binary(BinOp::Add, picked, carry), ty)
    }

    /// A (broadcast) binary operation on already-shaped operands.
    fn binary_op(&mut self, tag: Tag, left: ValueId, right: ValueId) -> Result<ValueId> {
        let (left, right) = self.broadcast(left, right);
        let ty = self.ty_of(left);
        let is_int = ty.is_int_or_vector() || ty.is_bool_or_vector();
        let n = ty.vector_size().unwrap_or(1);
        let bool_ty = Ty::Bool.with_count(n);

        let simple = |op: BinOp| Op::Binary(op, left, right);
        Ok(match tag {
            // In fold position the logical operators are plain bitwise
            // ops over already-booleanised elements.
            Tag::LogicalOr | Tag::BitwiseOr => self.emit(simple(BinOp::Or), ty),
            Tag::LogicalAnd | Tag::BitwiseAnd => self.emit(simple(BinOp::And), ty),
            Tag::BitwiseXor => self.emit(simple(BinOp::Xor), ty),
            Tag::BitwiseLshift => self.emit(simple(BinOp::Shl), ty),
            Tag::BitwiseRshift => self.emit(simple(BinOp::AShr), ty),
            Tag::Pow => self.pow(left, right),
            Tag::Mod => self.euclidean_mod(left, right),
            Tag::Add => {
                let op = if is_int { BinOp::Add } else { BinOp::FAdd };
                self.emit(Op::Binary(op, left, right), ty)
            }
            Tag::Sub => {
                let op = if is_int { BinOp::Sub } else { BinOp::FSub };
                self.emit(Op::Binary(op, left, right), ty)
            }
            Tag::Mul => {
                let op = if is_int { BinOp::Mul } else { BinOp::FMul };
                self.emit(Op::Binary(op, left, right), ty)
            }
            Tag::Div => self.euclidean_div(left, right),
            Tag::Eq => {
                let op = if is_int { CmpOp::Eq } else { CmpOp::FOeq };
                self.emit(Op::Cmp(op, left, right), bool_ty)
            }
            Tag::Ne => {
                let op = if is_int { CmpOp::Ne } else { CmpOp::FOne };
                self.emit(Op::Cmp(op, left, right), bool_ty)
            }
            Tag::Ge => {
                let op = if is_int { CmpOp::Sge } else { CmpOp::FOge };
                self.emit(Op::Cmp(op, left, right), bool_ty)
            }
            Tag::Le => {
                let op = if is_int { CmpOp::Sle } else { CmpOp::FOle };
                self.emit(Op::Cmp(op, left, right), bool_ty)
            }
            Tag::Gt => {
                let op = if is_int { CmpOp::Sgt } else { CmpOp::FOgt };
                self.emit(Op::Cmp(op, left, right), bool_ty)
            }
            Tag::Lt => {
                let op = if is_int { CmpOp::Slt } else { CmpOp::FOlt };
                self.emit(Op::Cmp(op, left, right), bool_ty)
            }
            _ => bail!("not a binary operation: {:?}", tag),
        })
    }

    // Type lowering from AST type nodes.

    fn lower_type(&self, node: &Node) -> Ty {
        match node.tag {
            Tag::TypeVoid => Ty::Void,
            Tag::TypeInt => Ty::Int.with_count(node.int_value as usize),
            Tag::TypeWorld => Ty::World.with_count(node.int_value as usize),
            Tag::TypeFunction => {
                let mut args = vec![Ty::Ptr];
                for child in &node.children[1..] {
                    args.push(self.lower_type(child));
                }
                Ty::function(self.lower_type(&node.children[0]), args)
            }
            _ => Ty::Void,
        }
    }

    fn function_signature(&self, signature: &Node) -> FnTy {
        let Ty::Fn(sig) = self.lower_type(signature) else {
            unreachable!("function node without function signature");
        };
        *sig
    }

    // Top-level constructs.

    fn emit_global_block(&mut self, node: &Node) -> Result<()> {
        let name = format!("!global_init_{}", self.global_inits.len());
        let ty = FnTy {
            ret: Ty::Void,
            args: vec![Ty::Ptr],
        };
        let id = self.begin_function(&name, Linkage::Internal, ty, true);
        self.st().global_ptr = 0;
        self.emit_stmt(&node.children[0])?;
        self.terminate(Term::Ret(None));
        self.end_function();
        self.global_inits.push(id);
        Ok(())
    }

    fn emit_global_assign(&mut self, node: &Node) -> Result<()> {
        let name = node.string_value.clone();
        let function = &node.children[0];
        if function.tag != Tag::Function {
            bail!("top-level binding of non-function");
        }
        self.immediate_left_assign = Some(name.clone());
        let id = self.emit_function(function, &name)?;
        if node.int_value != 0 {
            self.module.functions[id].linkage = Linkage::External;
            let sig = self.module.functions[id].ty.clone();
            let trampoline = self.trampoline_for(&sig)?;
            self.trampoline_map.insert(name.clone(), trampoline);
            self.function_map.insert(name.clone(), id);
        }
        self.symbol_table.add_at(name, 0, Slot::Func(id));
        Ok(())
    }

    /// Emit a function expression; returns its id. The caller materialises
    /// a `ConstFn` if the value is needed.
    fn emit_function(&mut self, node: &Node, name: &str) -> Result<FuncId> {
        let signature = &node.children[0];
        let sig = self.function_signature(signature);
        let fn_value_ty = Ty::Fn(Box::new(sig.clone()));

        let id = self.begin_function(name, Linkage::Internal, sig.clone(), false);
        self.st().global_ptr = 0;

        self.symbol_table.push();
        // Bind the function under its target name before emitting the
        // body, so immediate assignments can recurse.
        if let Some(bind) = self.immediate_left_assign.take() {
            let cell = self.emit_alloca(fn_value_ty.clone());
            let value = self.emit(Op::ConstFn(id), fn_value_ty);
            self.emit(Op::Store(cell, value), Ty::Void);
            self.symbol_table.add(bind, Slot::Local(cell));
        }
        self.symbol_table.push();

        // Arguments are stored into entry-block cells rather than being
        // referenced directly; locals and arguments then emit the same
        // code, and promotion cleans it up.
        for (i, param) in signature.children[1..].iter().enumerate() {
            let ty = sig.args[1 + i].clone();
            let cell = self.emit_alloca(ty);
            self.emit(Op::Store(cell, 1 + i), Ty::Void);
            self.symbol_table
                .add(param.string_value.clone(), Slot::Local(cell));
        }

        self.emit_stmt(&node.children[1])?;

        // A function passing the static check never reaches the end of a
        // non-void body, but every block needs a terminator.
        if sig.ret == Ty::Void {
            self.terminate(Term::Ret(None));
        } else {
            let here = self.current_block();
            self.terminate(Term::Br(here));
        }

        self.symbol_table.pop();
        self.symbol_table.pop();
        self.end_function();
        Ok(id)
    }

    // Statements.

    fn emit_stmt(&mut self, node: &Node) -> Result<()> {
        match node.tag {
            Tag::Block => {
                self.symbol_table.push();
                for child in &node.children {
                    self.emit_stmt(child)?;
                }
                self.symbol_table.pop();
            }
            Tag::EmptyStmt => {}
            Tag::ExprStmt => {
                self.emit_expr(&node.children[0])?;
            }
            Tag::ReturnStmt => {
                let value = match node.children.first() {
                    Some(child) => Some(self.emit_expr(child)?),
                    None => None,
                };
                self.terminate(Term::Ret(value));
                let dead = self.create_block("dead");
                self.set_block(dead);
            }
            Tag::IfStmt => {
                self.symbol_table.push();
                let condition = self.emit_expr(&node.children[0])?;
                let condition = self.i2b(condition);
                let has_else = node.children.len() > 2;
                let then_block = self.create_block("then");
                let merge_block = self.create_block("merge");
                let else_block = if has_else {
                    self.create_block("else")
                } else {
                    merge_block
                };
                self.terminate(Term::CondBr(condition, then_block, else_block));

                self.set_block(then_block);
                self.emit_stmt(&node.children[1])?;
                self.terminate(Term::Br(merge_block));

                if has_else {
                    self.set_block(else_block);
                    self.emit_stmt(&node.children[2])?;
                    self.terminate(Term::Br(merge_block));
                }
                self.set_block(merge_block);
                self.symbol_table.pop();
            }
            Tag::ForStmt => {
                self.symbol_table.push();
                self.emit_expr(&node.children[0])?;
                let cond_block = self.create_block("cond");
                let body_block = self.create_block("loop");
                let after_block = self.create_block("after");
                let merge_block = self.create_block("merge");
                self.st().loops.push((merge_block, after_block));

                self.terminate(Term::Br(cond_block));
                self.set_block(cond_block);
                let condition = self.emit_expr(&node.children[1])?;
                let condition = self.i2b(condition);
                self.terminate(Term::CondBr(condition, body_block, merge_block));

                self.set_block(after_block);
                self.emit_expr(&node.children[2])?;
                self.terminate(Term::Br(cond_block));

                self.set_block(body_block);
                self.emit_stmt(&node.children[3])?;
                self.terminate(Term::Br(after_block));

                self.set_block(merge_block);
                self.st().loops.pop();
                self.symbol_table.pop();
            }
            Tag::DoWhileStmt => {
                self.symbol_table.push();
                let body_block = self.create_block("loop");
                let cond_block = self.create_block("cond");
                let merge_block = self.create_block("merge");
                self.st().loops.push((merge_block, cond_block));

                self.terminate(Term::Br(body_block));
                self.set_block(body_block);
                self.emit_stmt(&node.children[0])?;
                self.terminate(Term::Br(cond_block));

                self.set_block(cond_block);
                let condition = self.emit_expr(&node.children[1])?;
                let condition = self.i2b(condition);
                self.terminate(Term::CondBr(condition, body_block, merge_block));

                self.set_block(merge_block);
                self.st().loops.pop();
                self.symbol_table.pop();
            }
            Tag::BreakStmt | Tag::ContinueStmt => {
                let (break_label, continue_label) = *self
                    .st()
                    .loops
                    .last()
                    .ok_or_else(|| anyhow!("loop jump outside loop"))?;
                let target = if node.tag == Tag::BreakStmt {
                    break_label
                } else {
                    continue_label
                };
                self.terminate(Term::Br(target));
                let dead = self.create_block("dead");
                self.set_block(dead);
            }
            _ => {
                self.emit_expr(node)?;
            }
        }
        Ok(())
    }

    // Expressions.

    fn global_field_ptr(&mut self, name: &str) -> Result<ValueId> {
        let index = *self
            .global_numbering
            .get(name)
            .ok_or_else(|| anyhow!("unknown global `{}`", name))?;
        let global_ptr = self.st().global_ptr;
        Ok(self.emit(Op::GlobalField(global_ptr, index), Ty::Ptr))
    }

    fn emit_expr(&mut self, node: &Node) -> Result<ValueId> {
        match node.tag {
            Tag::Identifier => {
                let name = &node.string_value;
                match self.symbol_table.get(name).cloned() {
                    Some(Slot::Local(cell)) => {
                        let pointee = match &self.st().function.instrs[cell].op {
                            Op::Alloca(ty) => ty.clone(),
                            _ => bail!("local slot is not a stack cell"),
                        };
                        Ok(self.emit(Op::Load(cell), pointee))
                    }
                    Some(Slot::Func(id)) => {
                        let ty = Ty::Fn(Box::new(self.module.functions[id].ty.clone()));
                        Ok(self.emit(Op::ConstFn(id), ty))
                    }
                    None => {
                        let index = *self
                            .global_numbering
                            .get(name)
                            .ok_or_else(|| anyhow!("unknown identifier `{}`", name))?;
                        let ty = self.module.global_fields[index].1.clone();
                        let ptr = self.global_field_ptr(name)?;
                        Ok(self.emit(Op::Load(ptr), ty))
                    }
                }
            }

            Tag::IntLiteral => Ok(self.const_int(node.int_value)),
            Tag::WorldLiteral => Ok(self.const_world(node.world_value)),

            Tag::Function => {
                let id = self.emit_function(node, "!anonymous")?;
                let ty = Ty::Fn(Box::new(self.module.functions[id].ty.clone()));
                Ok(self.emit(Op::ConstFn(id), ty))
            }

            Tag::Ternary => {
                let condition = self.emit_expr(&node.children[0])?;
                if self.ty_of(condition).is_vector() {
                    // Vectorised ternary cannot short-circuit.
                    let cond = self.i2b(condition);
                    let left = self.emit_expr(&node.children[1])?;
                    let right = self.emit_expr(&node.children[2])?;
                    let ty = self.ty_of(left);
                    return Ok(self.emit(Op::Select(cond, left, right), ty));
                }
                // Branching, rather than a select, short-circuits the
                // untaken arm.
                let cond = self.i2b(condition);
                let then_block = self.create_block("then");
                let else_block = self.create_block("else");
                let merge_block = self.create_block("merge");
                self.terminate(Term::CondBr(cond, then_block, else_block));

                self.set_block(then_block);
                let left = self.emit_expr(&node.children[1])?;
                let then_exit = self.current_block();
                self.terminate(Term::Br(merge_block));

                self.set_block(else_block);
                let right = self.emit_expr(&node.children[2])?;
                let else_exit = self.current_block();
                self.terminate(Term::Br(merge_block));

                self.set_block(merge_block);
                let ty = self.ty_of(left);
                Ok(self.emit(
                    Op::Phi(vec![(then_exit, left), (else_exit, right)]),
                    ty,
                ))
            }

            Tag::Call => {
                let callee = self.emit_expr(&node.children[0])?;
                let Ty::Fn(sig) = self.ty_of(callee) else {
                    bail!("call through non-function value");
                };
                let mut args = vec![self.st().global_ptr];
                for child in &node.children[1..] {
                    args.push(self.emit_expr(child)?);
                }
                Ok(self.emit(Op::CallIndirect(callee, args), sig.ret.clone()))
            }

            Tag::LogicalOr | Tag::LogicalAnd => {
                let left = self.emit_expr(&node.children[0])?;
                if self.ty_of(left).is_vector() {
                    // Short-circuiting isn't possible element-wise.
                    let right = self.emit_expr(&node.children[1])?;
                    let lb = self.i2b(left);
                    let rb = self.i2b(right);
                    let combined = self.binary_op(node.tag, lb, rb)?;
                    return Ok(self.b2i(combined));
                }

                let cond = self.i2b(left);
                let source_block = self.current_block();
                let rhs_block = self.create_block("rhs");
                let merge_block = self.create_block("merge");
                if node.tag == Tag::LogicalOr {
                    self.terminate(Term::CondBr(cond, merge_block, rhs_block));
                } else {
                    self.terminate(Term::CondBr(cond, rhs_block, merge_block));
                }

                self.set_block(rhs_block);
                let right = self.emit_expr(&node.children[1])?;
                let rb = self.i2b(right);
                let rhs_value = self.b2i(rb);
                let rhs_exit = self.current_block();
                self.terminate(Term::Br(merge_block));

                // The short-circuit constant lives in the source block so
                // the merge block starts with its phi.
                let result_ty = self.ty_of(rhs_value);
                let constant = self.emit_into(
                    source_block,
                    Op::ConstInt(if node.tag == Tag::LogicalOr { 1 } else { 0 }),
                    Ty::Int,
                );
                let constant = match result_ty.vector_size() {
                    Some(n) => self.emit_into(source_block, Op::Splat(constant, n), result_ty.clone()),
                    None => constant,
                };

                self.set_block(merge_block);
                Ok(self.emit(
                    Op::Phi(vec![(source_block, constant), (rhs_exit, rhs_value)]),
                    result_ty,
                ))
            }

            Tag::BitwiseOr
            | Tag::BitwiseAnd
            | Tag::BitwiseXor
            | Tag::BitwiseLshift
            | Tag::BitwiseRshift
            | Tag::Pow
            | Tag::Mod
            | Tag::Add
            | Tag::Sub
            | Tag::Mul
            | Tag::Div => {
                let left = self.emit_expr(&node.children[0])?;
                let right = self.emit_expr(&node.children[1])?;
                self.binary_op(node.tag, left, right)
            }

            Tag::Eq | Tag::Ne | Tag::Ge | Tag::Le | Tag::Gt | Tag::Lt => {
                let left = self.emit_expr(&node.children[0])?;
                let right = self.emit_expr(&node.children[1])?;
                let compared = self.binary_op(node.tag, left, right)?;
                Ok(self.b2i(compared))
            }

            tag if tag.is_fold() => self.emit_fold(node),

            Tag::LogicalNegation => {
                let operand = self.emit_expr(&node.children[0])?;
                let zero = self.const_like(operand, 0);
                let n = self.ty_of(operand).vector_size().unwrap_or(1);
                let cmp = self.emit(
                    Op::Cmp(CmpOp::Eq, operand, zero),
                    Ty::Bool.with_count(n),
                );
                Ok(self.b2i(cmp))
            }

            Tag::BitwiseNegation => {
                let operand = self.emit_expr(&node.children[0])?;
                let ones = self.const_like(operand, -1);
                let ty = self.ty_of(operand);
                Ok(self.emit(Op::Binary(BinOp::Xor, operand, ones), ty))
            }

            Tag::ArithmeticNegation => {
                let operand = self.emit_expr(&node.children[0])?;
                let zero = self.const_like(operand, 0);
                let ty = self.ty_of(operand);
                let op = if ty.is_int_or_vector() {
                    BinOp::Sub
                } else {
                    BinOp::FSub
                };
                Ok(self.emit(Op::Binary(op, zero, operand), ty))
            }

            Tag::Assign => {
                let value = self.emit_expr(&node.children[0])?;
                match self.symbol_table.get(&node.string_value).cloned() {
                    Some(Slot::Local(cell)) => {
                        self.emit(Op::Store(cell, value), Ty::Void);
                    }
                    Some(Slot::Func(_)) => bail!("assignment to function binding"),
                    None => {
                        // Globals aren't in the symbol table; the lookup
                        // depends on the current function's global
                        // pointer argument.
                        let ptr = self.global_field_ptr(&node.string_value)?;
                        self.emit(Op::Store(ptr, value), Ty::Void);
                    }
                }
                Ok(value)
            }

            Tag::AssignVar | Tag::AssignConst => {
                let child = &node.children[0];
                if child.tag == Tag::Function {
                    self.immediate_left_assign = Some(node.string_value.clone());
                }
                let value = self.emit_expr(child)?;
                self.immediate_left_assign = None;

                if self.st().in_global_init {
                    // Declarations in a global block write the prepared
                    // global structure fields.
                    let ptr = self.global_field_ptr(&node.string_value)?;
                    self.emit(Op::Store(ptr, value), Ty::Void);
                    return Ok(value);
                }

                let ty = self.ty_of(value);
                let cell = self.emit_alloca(ty);
                self.emit(Op::Store(cell, value), Ty::Void);
                self.symbol_table
                    .add(node.string_value.clone(), Slot::Local(cell));
                Ok(value)
            }

            Tag::IntCast => {
                let operand = self.emit_expr(&node.children[0])?;
                Ok(self.w2i(operand))
            }

            Tag::WorldCast => {
                let operand = self.emit_expr(&node.children[0])?;
                Ok(self.i2w(operand))
            }

            Tag::VectorConstruct => {
                let mut elements = Vec::new();
                for child in &node.children {
                    elements.push(self.emit_expr(child)?);
                }
                let n = elements.len();
                let scalar_ty = self.ty_of(elements[0]);
                let vec_ty = scalar_ty.with_count(n);
                let zero = if scalar_ty == Ty::World {
                    self.const_world(0.)
                } else {
                    self.const_int(0)
                };
                let mut vector = self.emit(Op::Splat(zero, n), vec_ty.clone());
                for (i, element) in elements.into_iter().enumerate() {
                    let index = self.const_int(i as i32);
                    vector = self.emit(Op::Insert(vector, element, index), vec_ty.clone());
                }
                Ok(vector)
            }

            Tag::VectorIndex => {
                let vector = self.emit_expr(&node.children[0])?;
                let index = self.emit_expr(&node.children[1])?;
                let vec_ty = self.ty_of(vector);
                let n = vec_ty.vector_size().unwrap_or(1);
                let scalar_ty = vec_ty.scalar();

                // Indexing out of bounds produces the base zero.
                let zero_int = self.const_int(0);
                let limit = self.const_int(n as i32);
                let ge = self.emit(Op::Cmp(CmpOp::Sge, index, zero_int), Ty::Bool);
                let lt = self.emit(Op::Cmp(CmpOp::Slt, index, limit), Ty::Bool);
                let in_range = self.emit(Op::Binary(BinOp::And, ge, lt), Ty::Bool);
                let element = self.emit(Op::Extract(vector, index), scalar_ty.clone());
                let zero = if scalar_ty == Ty::World {
                    self.const_world(0.)
                } else {
                    self.const_int(0)
                };
                Ok(self.emit(Op::Select(in_range, element, zero), scalar_ty))
            }

            _ => bail!("unexpected expression construct {:?}", node.tag),
        }
    }

    fn emit_fold(&mut self, node: &Node) -> Result<ValueId> {
        let base = node.tag.fold_base();
        let operand = self.emit_expr(&node.children[0])?;
        let ty = self.ty_of(operand);
        let n = ty
            .vector_size()
            .ok_or_else(|| anyhow!("fold of non-vector value"))?;
        let to_bool = matches!(node.tag, Tag::FoldLogicalOr | Tag::FoldLogicalAnd);
        let with_ands = matches!(
            node.tag,
            Tag::FoldEq | Tag::FoldNe | Tag::FoldGe | Tag::FoldLe | Tag::FoldGt | Tag::FoldLt
        );
        // POW is the only right-associative fold operator.
        let right_assoc = node.tag == Tag::FoldPow;

        let mut elements = Vec::with_capacity(n);
        for i in 0..n {
            let index = self.const_int(i as i32);
            let element = self.emit(Op::Extract(operand, index), ty.scalar());
            elements.push(if to_bool { self.i2b(element) } else { element });
        }

        if !with_ands {
            // The chain (((e0 op e1) op e2) ...), or its reverse.
            let result = if right_assoc {
                let mut iter = elements.into_iter().rev();
                let mut value = iter.next().expect("vector has elements");
                for element in iter {
                    value = self.binary_op(base, element, value)?;
                }
                value
            } else {
                let mut iter = elements.into_iter();
                let mut value = iter.next().expect("vector has elements");
                for element in iter {
                    value = self.binary_op(base, element, value)?;
                }
                value
            };
            return Ok(if to_bool { self.b2i(result) } else { result });
        }

        // Comparison folds chain pairwise: (e0 op e1) && (e1 op e2) && ...
        let mut comparisons = Vec::with_capacity(n - 1);
        for i in 1..n {
            comparisons.push(self.binary_op(base, elements[i - 1], elements[i])?);
        }
        let mut result = comparisons[0];
        for &comparison in &comparisons[1..] {
            let ty = self.ty_of(result);
            result = self.emit(Op::Binary(BinOp::And, result, comparison), ty);
        }
        Ok(self.b2i(result))
    }

    // Module-level generated functions.

    fn trampoline_for(&mut self, sig: &FnTy) -> Result<FuncId> {
        if let Some(&id) = self.trampolines.get(sig) {
            return Ok(id);
        }
        let name = format!("!trampoline_{}", self.trampolines.len());
        let mut args = vec![Ty::Fn(Box::new(sig.clone()))];
        args.extend(sig.args.iter().cloned());
        let tramp_sig = FnTy {
            ret: sig.ret.clone(),
            args,
        };

        let id = self.begin_function(&name, Linkage::External, tramp_sig.clone(), false);
        let target = 0;
        let forwarded: Vec<ValueId> = (1..tramp_sig.args.len()).collect();
        let result = self.emit(Op::CallIndirect(target, forwarded), sig.ret.clone());
        if sig.ret == Ty::Void {
            self.terminate(Term::Ret(None));
        } else {
            self.terminate(Term::Ret(Some(result)));
        }
        self.end_function();

        self.trampolines.insert(sig.clone(), id);
        Ok(id)
    }

    /// Emit `!global_alloc`, `!global_free` and the per-field accessors.
    /// Called after the tree has been walked.
    fn emit_global_functions(&mut self) -> Result<()> {
        // Allocator: malloc, run each initialiser in declaration order,
        // return the pointer.
        let alloc_sig = FnTy {
            ret: Ty::Ptr,
            args: Vec::new(),
        };
        self.begin_function("!global_alloc", Linkage::External, alloc_sig, false);
        let block = self.emit(Op::CallNative(NativeFn::Malloc, Vec::new()), Ty::Ptr);
        for init in self.global_inits.clone() {
            self.emit(Op::Call(init, vec![block]), Ty::Void);
        }
        self.terminate(Term::Ret(Some(block)));
        self.end_function();

        // Free.
        let free_sig = FnTy {
            ret: Ty::Void,
            args: vec![Ty::Ptr],
        };
        self.begin_function("!global_free", Linkage::External, free_sig, false);
        self.emit(Op::CallNative(NativeFn::Free, vec![0]), Ty::Void);
        self.terminate(Term::Ret(None));
        self.end_function();

        // Accessors for each field of the global structure.
        for (index, (name, ty)) in self.module.global_fields.clone().into_iter().enumerate() {
            let getter_sig = FnTy {
                ret: ty.clone(),
                args: vec![Ty::Ptr],
            };
            self.begin_function(
                &format!("!global_get_{}", name),
                Linkage::External,
                getter_sig,
                false,
            );
            let ptr = self.emit(Op::GlobalField(0, index), Ty::Ptr);
            let value = self.emit(Op::Load(ptr), ty.clone());
            self.terminate(Term::Ret(Some(value)));
            self.end_function();

            let setter_sig = FnTy {
                ret: Ty::Void,
                args: vec![Ty::Ptr, ty.clone()],
            };
            self.begin_function(
                &format!("!global_set_{}", name),
                Linkage::External,
                setter_sig,
                false,
            );
            let ptr = self.emit(Op::GlobalField(0, index), Ty::Ptr);
            self.emit(Op::Store(ptr, 1), Ty::Void);
            self.terminate(Term::Ret(None));
            self.end_function();
        }
        Ok(())
    }
}
