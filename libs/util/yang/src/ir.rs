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

//! The SSA intermediate representation: typed instructions in basic
//! blocks, phi nodes, and functions with internal or external linkage.
//! Values are instruction indices within their function; parameters are
//! leading `Param` instructions that belong to no block.

use anyhow::{bail, ensure, Result};
use ordered_float::OrderedFloat;
use std::fmt;

pub type ValueId = usize;
pub type BlockId = usize;
pub type FuncId = usize;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Ty {
    Void,
    Bool,
    Int,
    World,
    BoolVec(usize),
    IntVec(usize),
    WorldVec(usize),
    /// Pointer to the per-instance global structure, or to a stack cell.
    Ptr,
    Fn(Box<FnTy>),
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct FnTy {
    pub ret: Ty,
    pub args: Vec<Ty>,
}

impl Ty {
    pub fn function(ret: Ty, args: Vec<Ty>) -> Ty {
        Ty::Fn(Box::new(FnTy { ret, args }))
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Ty::BoolVec(_) | Ty::IntVec(_) | Ty::WorldVec(_))
    }

    pub fn vector_size(&self) -> Option<usize> {
        match self {
            Ty::BoolVec(n) | Ty::IntVec(n) | Ty::WorldVec(n) => Some(*n),
            _ => None,
        }
    }

    /// The element type of a vector, or the type itself.
    pub fn scalar(&self) -> Ty {
        match self {
            Ty::BoolVec(_) => Ty::Bool,
            Ty::IntVec(_) => Ty::Int,
            Ty::WorldVec(_) => Ty::World,
            other => other.clone(),
        }
    }

    /// This type widened to `n` lanes; scalars of `n == 1` stay scalar.
    pub fn with_count(&self, n: usize) -> Ty {
        if n == 1 {
            return self.scalar();
        }
        match self.scalar() {
            Ty::Bool => Ty::BoolVec(n),
            Ty::Int => Ty::IntVec(n),
            Ty::World => Ty::WorldVec(n),
            other => other,
        }
    }

    pub fn is_int_or_vector(&self) -> bool {
        matches!(self, Ty::Int | Ty::IntVec(_))
    }

    pub fn is_world_or_vector(&self) -> bool {
        matches!(self, Ty::World | Ty::WorldVec(_))
    }

    pub fn is_bool_or_vector(&self) -> bool {
        matches!(self, Ty::Bool | Ty::BoolVec(_))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
    And,
    Or,
    Xor,
    Shl,
    AShr,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Sge,
    Sle,
    Sgt,
    Slt,
    FOeq,
    FOne,
    FOge,
    FOle,
    FOgt,
    FOlt,
}

impl CmpOp {
    pub fn is_float(self) -> bool {
        matches!(
            self,
            CmpOp::FOeq | CmpOp::FOne | CmpOp::FOge | CmpOp::FOle | CmpOp::FOgt | CmpOp::FOlt
        )
    }
}

/// Native symbols the runtime provides to generated code.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum NativeFn {
    Malloc,
    Free,
    Pow,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    Param(usize),
    ConstInt(i32),
    ConstWorld(OrderedFloat<f64>),
    ConstFn(FuncId),
    /// Stack cell of the given pointee type; emitted in entry blocks.
    Alloca(Ty),
    Load(ValueId),
    Store(ValueId, ValueId),
    /// Address of a field of the global structure.
    GlobalField(ValueId, usize),
    Binary(BinOp, ValueId, ValueId),
    Cmp(CmpOp, ValueId, ValueId),
    Select(ValueId, ValueId, ValueId),
    /// Broadcast a scalar to a vector.
    Splat(ValueId, usize),
    /// Extract element at a dynamic index.
    Extract(ValueId, ValueId),
    /// Insert element at a dynamic index.
    Insert(ValueId, ValueId, ValueId),
    SiToFp(ValueId),
    FpToSi(ValueId),
    /// Bool (vector) to int (vector).
    ZExt(ValueId),
    Call(FuncId, Vec<ValueId>),
    CallIndirect(ValueId, Vec<ValueId>),
    CallNative(NativeFn, Vec<ValueId>),
    Phi(Vec<(BlockId, ValueId)>),
}

impl Op {
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            Op::Store(..) | Op::Call(..) | Op::CallIndirect(..) | Op::CallNative(..)
        )
    }

    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Op::Param(_) | Op::ConstInt(_) | Op::ConstWorld(_) | Op::ConstFn(_) | Op::Alloca(_) => {
                Vec::new()
            }
            Op::Load(p) => vec![*p],
            Op::Store(p, v) => vec![*p, *v],
            Op::GlobalField(p, _) => vec![*p],
            Op::Binary(_, a, b) | Op::Cmp(_, a, b) => vec![*a, *b],
            Op::Select(c, a, b) | Op::Insert(c, a, b) => vec![*c, *a, *b],
            Op::Splat(v, _) | Op::SiToFp(v) | Op::FpToSi(v) | Op::ZExt(v) => vec![*v],
            Op::Extract(v, i) => vec![*v, *i],
            Op::Call(_, args) => args.clone(),
            Op::CallIndirect(f, args) => {
                let mut out = vec![*f];
                out.extend(args.iter().copied());
                out
            }
            Op::CallNative(_, args) => args.clone(),
            Op::Phi(incoming) => incoming.iter().map(|(_, v)| *v).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Instr {
    pub op: Op,
    pub ty: Ty,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Term {
    Ret(Option<ValueId>),
    Br(BlockId),
    CondBr(ValueId, BlockId, BlockId),
}

impl Term {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Term::Ret(_) => Vec::new(),
            Term::Br(b) => vec![*b],
            Term::CondBr(_, t, e) => vec![*t, *e],
        }
    }
}

#[derive(Clone, Debug)]
pub struct Block {
    pub name: String,
    pub instrs: Vec<ValueId>,
    pub term: Option<Term>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Linkage {
    Internal,
    External,
}

#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub linkage: Linkage,
    pub ty: FnTy,
    pub instrs: Vec<Instr>,
    pub blocks: Vec<Block>,
}

impl Function {
    pub fn new(name: impl Into<String>, linkage: Linkage, ty: FnTy) -> Self {
        let mut instrs = Vec::new();
        for (i, arg) in ty.args.iter().enumerate() {
            instrs.push(Instr {
                op: Op::Param(i),
                ty: arg.clone(),
            });
        }
        Self {
            name: name.into(),
            linkage,
            ty,
            instrs,
            blocks: vec![Block {
                name: "entry".to_owned(),
                instrs: Vec::new(),
                term: None,
            }],
        }
    }

    pub fn entry(&self) -> BlockId {
        0
    }

    pub fn param(&self, index: usize) -> ValueId {
        index
    }

    /// Predecessors of each block.
    pub fn predecessors(&self) -> Vec<Vec<BlockId>> {
        let mut preds = vec![Vec::new(); self.blocks.len()];
        for (id, block) in self.blocks.iter().enumerate() {
            if let Some(term) = &block.term {
                for succ in term.successors() {
                    preds[succ].push(id);
                }
            }
        }
        preds
    }
}

#[derive(Clone, Debug)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
    pub global_fields: Vec<(String, Ty)>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            global_fields: Vec::new(),
        }
    }

    pub fn function_named(&self, name: &str) -> Option<FuncId> {
        self.functions.iter().position(|f| f.name == name)
    }

    /// Structural sanity checks; a failure here is a compiler bug, not a
    /// user error.
    pub fn verify(&self) -> Result<()> {
        for function in &self.functions {
            self.verify_function(function)
                .map_err(|e| e.context(format!("in function `{}`", function.name)))?;
        }
        Ok(())
    }

    fn verify_function(&self, function: &Function) -> Result<()> {
        let instrs = &function.instrs;
        for (id, block) in function.blocks.iter().enumerate() {
            ensure!(
                block.term.is_some(),
                "block {} `{}` has no terminator",
                id,
                block.name
            );
            for &v in &block.instrs {
                ensure!(v < instrs.len(), "block `{}` references bad value", block.name);
            }
        }

        let preds = function.predecessors();
        let block_of: Vec<Option<BlockId>> = {
            let mut map = vec![None; instrs.len()];
            for (id, block) in function.blocks.iter().enumerate() {
                for &v in &block.instrs {
                    map[v] = Some(id);
                }
            }
            map
        };

        for (v, instr) in instrs.iter().enumerate() {
            for operand in instr.op.operands() {
                ensure!(operand < instrs.len(), "value %{} has bad operand", v);
                ensure!(
                    instrs[operand].ty != Ty::Void,
                    "value %{} uses void operand %{}",
                    v,
                    operand
                );
            }
            match &instr.op {
                Op::Binary(_, a, b) => {
                    ensure!(
                        instrs[*a].ty == instrs[*b].ty,
                        "binary operand types differ on %{}",
                        v
                    );
                    ensure!(instr.ty == instrs[*a].ty, "binary result type on %{}", v);
                }
                Op::Cmp(op, a, b) => {
                    ensure!(
                        instrs[*a].ty == instrs[*b].ty,
                        "cmp operand types differ on %{}",
                        v
                    );
                    let expect_float = op.is_float();
                    ensure!(
                        instrs[*a].ty.is_world_or_vector() == expect_float,
                        "cmp operand family mismatch on %{}",
                        v
                    );
                    ensure!(instr.ty.is_bool_or_vector(), "cmp result on %{}", v);
                }
                Op::Select(c, a, b) => {
                    ensure!(
                        instrs[*a].ty == instrs[*b].ty,
                        "select arm types differ on %{}",
                        v
                    );
                    ensure!(
                        instrs[*c].ty.is_bool_or_vector(),
                        "select condition on %{}",
                        v
                    );
                }
                Op::Phi(incoming) => {
                    let Some(home) = block_of[v] else {
                        bail!("phi %{} not placed in a block", v);
                    };
                    for (block, value) in incoming {
                        ensure!(*block < function.blocks.len(), "phi %{} bad block", v);
                        ensure!(
                            preds[home].contains(block),
                            "phi %{} incoming from non-predecessor",
                            v
                        );
                        ensure!(
                            instrs[*value].ty == instr.ty,
                            "phi %{} incoming type mismatch",
                            v
                        );
                    }
                    ensure!(
                        incoming.len() == preds[home].len(),
                        "phi %{} does not cover all predecessors",
                        v
                    );
                }
                Op::Call(callee, args) => {
                    ensure!(*callee < self.functions.len(), "call to bad function");
                    let sig = &self.functions[*callee].ty;
                    ensure!(args.len() == sig.args.len(), "call arity on %{}", v);
                    for (arg, expect) in args.iter().zip(&sig.args) {
                        ensure!(instrs[*arg].ty == *expect, "call arg type on %{}", v);
                    }
                    ensure!(instr.ty == sig.ret, "call result type on %{}", v);
                }
                Op::CallIndirect(f, args) => {
                    let Ty::Fn(sig) = &instrs[*f].ty else {
                        bail!("indirect call through non-function on %{}", v);
                    };
                    ensure!(args.len() == sig.args.len(), "call arity on %{}", v);
                    for (arg, expect) in args.iter().zip(&sig.args) {
                        ensure!(instrs[*arg].ty == *expect, "call arg type on %{}", v);
                    }
                    ensure!(instr.ty == sig.ret, "call result type on %{}", v);
                }
                _ => {}
            }
        }

        for block in &function.blocks {
            match block.term.as_ref().expect("checked above") {
                Term::Ret(None) => {
                    ensure!(
                        function.ty.ret == Ty::Void,
                        "void return from non-void function"
                    );
                }
                Term::Ret(Some(v)) => {
                    ensure!(
                        instrs[*v].ty == function.ty.ret,
                        "return type mismatch in `{}`",
                        block.name
                    );
                }
                Term::Br(b) => {
                    ensure!(*b < function.blocks.len(), "branch to bad block");
                }
                Term::CondBr(c, t, e) => {
                    ensure!(instrs[*c].ty == Ty::Bool, "condbr condition type");
                    ensure!(
                        *t < function.blocks.len() && *e < function.blocks.len(),
                        "condbr to bad block"
                    );
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Void => write!(f, "void"),
            Ty::Bool => write!(f, "i1"),
            Ty::Int => write!(f, "i32"),
            Ty::World => write!(f, "double"),
            Ty::BoolVec(n) => write!(f, "<{} x i1>", n),
            Ty::IntVec(n) => write!(f, "<{} x i32>", n),
            Ty::WorldVec(n) => write!(f, "<{} x double>", n),
            Ty::Ptr => write!(f, "ptr"),
            Ty::Fn(sig) => {
                write!(f, "{} (", sig.ret)?;
                for (i, arg) in sig.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")*")
            }
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; module {}", self.name)?;
        write!(f, "%global_data = type {{")?;
        for (i, (name, ty)) in self.global_fields.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {} ; {}", ty, name)?;
        }
        writeln!(f, " }}")?;

        for function in &self.functions {
            writeln!(f)?;
            let linkage = match function.linkage {
                Linkage::Internal => "internal",
                Linkage::External => "external",
            };
            write!(f, "define {} {} @\"{}\"(", linkage, function.ty.ret, function.name)?;
            for (i, arg) in function.ty.args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} %{}", arg, i)?;
            }
            writeln!(f, ") {{")?;
            for block in &function.blocks {
                writeln!(f, "{}:", block.name)?;
                for &v in &block.instrs {
                    let instr = &function.instrs[v];
                    write!(f, "  %{} = ", v)?;
                    write_op(f, &instr.op, &instr.ty)?;
                    writeln!(f)?;
                }
                match &block.term {
                    Some(Term::Ret(None)) => writeln!(f, "  ret void")?,
                    Some(Term::Ret(Some(v))) => writeln!(f, "  ret %{}", v)?,
                    Some(Term::Br(b)) => writeln!(f, "  br label {}", self_name(function, *b))?,
                    Some(Term::CondBr(c, t, e)) => writeln!(
                        f,
                        "  br %{}, label {}, label {}",
                        c,
                        self_name(function, *t),
                        self_name(function, *e)
                    )?,
                    None => writeln!(f, "  <no terminator>")?,
                }
            }
            writeln!(f, "}}")?;
        }
        Ok(())
    }
}

fn self_name(function: &Function, block: BlockId) -> String {
    format!("%{}.{}", block, function.blocks[block].name)
}

fn write_op(f: &mut fmt::Formatter<'_>, op: &Op, ty: &Ty) -> fmt::Result {
    match op {
        Op::Param(i) => write!(f, "param {} {}", ty, i),
        Op::ConstInt(v) => write!(f, "const {} {}", ty, v),
        Op::ConstWorld(v) => write!(f, "const {} {:?}", ty, v.0),
        Op::ConstFn(id) => write!(f, "function {} #{}", ty, id),
        Op::Alloca(pointee) => write!(f, "alloca {}", pointee),
        Op::Load(p) => write!(f, "load {}, %{}", ty, p),
        Op::Store(p, v) => write!(f, "store %{}, %{}", v, p),
        Op::GlobalField(p, i) => write!(f, "getelementptr %global_data %{}, {}", p, i),
        Op::Binary(op, a, b) => write!(f, "{:?} {} %{}, %{}", op, ty, a, b),
        Op::Cmp(op, a, b) => write!(f, "cmp {:?} %{}, %{}", op, a, b),
        Op::Select(c, a, b) => write!(f, "select %{}, %{}, %{}", c, a, b),
        Op::Splat(v, n) => write!(f, "splat {} %{}", n, v),
        Op::Extract(v, i) => write!(f, "extractelement %{}, %{}", v, i),
        Op::Insert(v, e, i) => write!(f, "insertelement %{}, %{}, %{}", v, e, i),
        Op::SiToFp(v) => write!(f, "sitofp %{}", v),
        Op::FpToSi(v) => write!(f, "fptosi %{}", v),
        Op::ZExt(v) => write!(f, "zext %{}", v),
        Op::Call(callee, args) => {
            write!(f, "call #{}(", callee)?;
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "%{}", a)?;
            }
            write!(f, ")")
        }
        Op::CallIndirect(callee, args) => {
            write!(f, "call %{}(", callee)?;
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "%{}", a)?;
            }
            write!(f, ")")
        }
        Op::CallNative(native, args) => {
            write!(f, "call @{:?}(", native)?;
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "%{}", a)?;
            }
            write!(f, ")")
        }
        Op::Phi(incoming) => {
            write!(f, "phi {} ", ty)?;
            for (i, (block, value)) in incoming.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "[%{}, block {}]", value, block)?;
            }
            Ok(())
        }
    }
}
