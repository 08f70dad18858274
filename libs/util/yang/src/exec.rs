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

//! Deterministic interpreter for verified SSA modules: the executable
//! form of a compiled program. Runs to completion on the calling thread.

use crate::ir::{BinOp, BlockId, CmpOp, FuncId, Instr, Module, NativeFn, Op, Term, ValueId};
use crate::value::{Ptr, Value};
use anyhow::{anyhow, bail, Result};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::rc::Rc;

pub struct Executor<'m> {
    module: &'m Module,
}

impl<'m> Executor<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self { module }
    }

    /// Allocate a zeroed global block sized for this module. The
    /// structure always has at least one field so the allocation is
    /// never empty.
    fn malloc(&self) -> Value {
        let mut fields: Vec<Value> = self
            .module
            .global_fields
            .iter()
            .map(|(_, ty)| Value::zero(ty))
            .collect();
        if fields.is_empty() {
            fields.push(Value::Int(0));
        }
        Value::Ptr(Ptr::Block(Rc::new(RefCell::new(fields))))
    }

    pub fn call(&self, function: FuncId, args: Vec<Value>) -> Result<Value> {
        if function >= self.module.functions.len() {
            bail!("call to unknown function #{}", function);
        }
        let f = &self.module.functions[function];
        if args.len() != f.ty.args.len() {
            bail!(
                "calling `{}` with {} arguments, expected {}",
                f.name,
                args.len(),
                f.ty.args.len()
            );
        }

        let mut regs: Vec<Option<Value>> = vec![None; f.instrs.len()];
        for (i, arg) in args.into_iter().enumerate() {
            regs[i] = Some(arg);
        }

        let mut block: BlockId = f.entry();
        let mut prev_block: Option<BlockId> = None;
        loop {
            // Phis at the head of the block read their incoming values
            // before anything else runs.
            let current = &f.blocks[block];
            let mut phi_values: SmallVec<[(ValueId, Value); 2]> = SmallVec::new();
            for &v in &current.instrs {
                if let Op::Phi(incoming) = &f.instrs[v].op {
                    let from = prev_block
                        .ok_or_else(|| anyhow!("phi in entry block of `{}`", f.name))?;
                    let (_, source) = incoming
                        .iter()
                        .find(|(b, _)| *b == from)
                        .ok_or_else(|| anyhow!("phi has no incoming for block {}", from))?;
                    let value = regs[*source]
                        .clone()
                        .ok_or_else(|| anyhow!("phi reads undefined value"))?;
                    phi_values.push((v, value));
                } else {
                    break;
                }
            }
            for (v, value) in phi_values {
                regs[v] = Some(value);
            }

            for &v in &current.instrs {
                if matches!(f.instrs[v].op, Op::Phi(_)) {
                    continue;
                }
                let value = self.eval(&f.instrs[v], &regs)?;
                regs[v] = Some(value);
            }

            match current
                .term
                .as_ref()
                .ok_or_else(|| anyhow!("block without terminator in `{}`", f.name))?
            {
                Term::Ret(None) => return Ok(Value::Void),
                Term::Ret(Some(v)) => {
                    return regs[*v]
                        .clone()
                        .ok_or_else(|| anyhow!("returning undefined value"));
                }
                Term::Br(next) => {
                    prev_block = Some(block);
                    block = *next;
                }
                Term::CondBr(c, then_block, else_block) => {
                    let cond = regs[*c]
                        .clone()
                        .ok_or_else(|| anyhow!("branching on undefined value"))?
                        .to_bool()?;
                    prev_block = Some(block);
                    block = if cond { *then_block } else { *else_block };
                }
            }
        }
    }

    fn get(regs: &[Option<Value>], v: ValueId) -> Result<Value> {
        regs[v]
            .clone()
            .ok_or_else(|| anyhow!("use of undefined value %{}", v))
    }

    fn eval(&self, instr: &Instr, regs: &[Option<Value>]) -> Result<Value> {
        Ok(match &instr.op {
            Op::Param(_) => bail!("parameter not initialised"),
            Op::ConstInt(v) => Value::Int(*v),
            Op::ConstWorld(v) => Value::World(v.0),
            Op::ConstFn(id) => Value::Func(*id),
            Op::Alloca(pointee) => {
                Value::Ptr(Ptr::Cell(Rc::new(RefCell::new(Value::zero(pointee)))))
            }
            Op::Load(p) => Self::get(regs, *p)?.to_ptr()?.load()?,
            Op::Store(p, v) => {
                let value = Self::get(regs, *v)?;
                Self::get(regs, *p)?.to_ptr()?.store(value)?;
                Value::Void
            }
            Op::GlobalField(p, index) => match Self::get(regs, *p)?.to_ptr()? {
                Ptr::Block(block) => Value::Ptr(Ptr::Field(block.clone(), *index)),
                _ => bail!("global field of non-block pointer"),
            },
            Op::Binary(op, a, b) => binary(*op, &Self::get(regs, *a)?, &Self::get(regs, *b)?)?,
            Op::Cmp(op, a, b) => compare(*op, &Self::get(regs, *a)?, &Self::get(regs, *b)?)?,
            Op::Select(c, a, b) => {
                let cond = Self::get(regs, *c)?;
                match cond {
                    Value::Bool(flag) => {
                        if flag {
                            Self::get(regs, *a)?
                        } else {
                            Self::get(regs, *b)?
                        }
                    }
                    Value::BoolVec(flags) => {
                        let left = Self::get(regs, *a)?;
                        let right = Self::get(regs, *b)?;
                        select_vector(&flags, &left, &right)?
                    }
                    other => bail!("select on non-boolean {}", other),
                }
            }
            Op::Splat(v, n) => match Self::get(regs, *v)? {
                Value::Bool(b) => Value::BoolVec(SmallVec::from_elem(b, *n)),
                Value::Int(i) => Value::IntVec(SmallVec::from_elem(i, *n)),
                Value::World(w) => Value::WorldVec(SmallVec::from_elem(w, *n)),
                other => bail!("splat of non-scalar {}", other),
            },
            Op::Extract(v, i) => {
                let index = Self::get(regs, *i)?.to_int()?;
                // Out-of-range extraction yields the element zero; the
                // bounds check and select around it discard the value
                // anyway.
                match Self::get(regs, *v)? {
                    Value::BoolVec(e) => {
                        Value::Bool(e.get(index as usize).copied().unwrap_or(false))
                    }
                    Value::IntVec(e) => Value::Int(e.get(index as usize).copied().unwrap_or(0)),
                    Value::WorldVec(e) => {
                        Value::World(e.get(index as usize).copied().unwrap_or(0.))
                    }
                    other => bail!("extract from non-vector {}", other),
                }
            }
            Op::Insert(v, e, i) => {
                let index = Self::get(regs, *i)?.to_int()? as usize;
                let element = Self::get(regs, *e)?;
                match Self::get(regs, *v)? {
                    Value::BoolVec(mut vec) => {
                        if index < vec.len() {
                            vec[index] = element.to_bool()?;
                        }
                        Value::BoolVec(vec)
                    }
                    Value::IntVec(mut vec) => {
                        if index < vec.len() {
                            vec[index] = element.to_int()?;
                        }
                        Value::IntVec(vec)
                    }
                    Value::WorldVec(mut vec) => {
                        if index < vec.len() {
                            vec[index] = element.to_world()?;
                        }
                        Value::WorldVec(vec)
                    }
                    other => bail!("insert into non-vector {}", other),
                }
            }
            Op::SiToFp(v) => match Self::get(regs, *v)? {
                Value::Int(i) => Value::World(i as f64),
                Value::IntVec(e) => {
                    Value::WorldVec(e.into_iter().map(|i| i as f64).collect())
                }
                other => bail!("sitofp of {}", other),
            },
            Op::FpToSi(v) => match Self::get(regs, *v)? {
                Value::World(w) => Value::Int(w as i32),
                Value::WorldVec(e) => Value::IntVec(e.into_iter().map(|w| w as i32).collect()),
                other => bail!("fptosi of {}", other),
            },
            Op::ZExt(v) => match Self::get(regs, *v)? {
                Value::Bool(b) => Value::Int(b as i32),
                Value::BoolVec(e) => Value::IntVec(e.into_iter().map(|b| b as i32).collect()),
                other => bail!("zext of {}", other),
            },
            Op::Call(callee, args) => {
                let values = args
                    .iter()
                    .map(|&a| Self::get(regs, a))
                    .collect::<Result<Vec<_>>>()?;
                self.call(*callee, values)?
            }
            Op::CallIndirect(f, args) => {
                let callee = Self::get(regs, *f)?.to_func()?;
                let values = args
                    .iter()
                    .map(|&a| Self::get(regs, a))
                    .collect::<Result<Vec<_>>>()?;
                self.call(callee, values)?
            }
            Op::CallNative(native, args) => match native {
                NativeFn::Malloc => self.malloc(),
                NativeFn::Free => Value::Void,
                NativeFn::Pow => {
                    let base = Self::get(regs, args[0])?.to_world()?;
                    let exponent = Self::get(regs, args[1])?.to_world()?;
                    Value::World(base.powf(exponent))
                }
            },
            Op::Phi(_) => bail!("phi evaluated out of order"),
            })
    }
}

fn select_vector(flags: &[bool], left: &Value, right: &Value) -> Result<Value> {
    Ok(match (left, right) {
        (Value::IntVec(a), Value::IntVec(b)) => Value::IntVec(
            flags
                .iter()
                .zip(a.iter().zip(b.iter()))
                .map(|(&f, (&x, &y))| if f { x } else { y })
                .collect(),
        ),
        (Value::WorldVec(a), Value::WorldVec(b)) => Value::WorldVec(
            flags
                .iter()
                .zip(a.iter().zip(b.iter()))
                .map(|(&f, (&x, &y))| if f { x } else { y })
                .collect(),
        ),
        (Value::BoolVec(a), Value::BoolVec(b)) => Value::BoolVec(
            flags
                .iter()
                .zip(a.iter().zip(b.iter()))
                .map(|(&f, (&x, &y))| if f { x } else { y })
                .collect(),
        ),
        _ => bail!("vector select arms mismatch"),
    })
}

fn int_binary(op: BinOp, a: i32, b: i32) -> Result<i32> {
    Ok(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::SDiv => {
            if b == 0 {
                bail!("division by zero");
            }
            a.wrapping_div(b)
        }
        BinOp::SRem => {
            if b == 0 {
                bail!("remainder by zero");
            }
            a.wrapping_rem(b)
        }
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Shl => a.wrapping_shl(b as u32),
        BinOp::AShr => a.wrapping_shr(b as u32),
        _ => bail!("float op on int operands"),
    })
}

fn world_binary(op: BinOp, a: f64, b: f64) -> Result<f64> {
    Ok(match op {
        BinOp::FAdd => a + b,
        BinOp::FSub => a - b,
        BinOp::FMul => a * b,
        BinOp::FDiv => a / b,
        BinOp::FRem => a % b,
        _ => bail!("int op on world operands"),
    })
}

fn binary(op: BinOp, a: &Value, b: &Value) -> Result<Value> {
    Ok(match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(int_binary(op, *x, *y)?),
        (Value::World(x), Value::World(y)) => Value::World(world_binary(op, *x, *y)?),
        (Value::IntVec(x), Value::IntVec(y)) => {
            let mut out = SmallVec::with_capacity(x.len());
            for (&x, &y) in x.iter().zip(y.iter()) {
                out.push(int_binary(op, x, y)?);
            }
            Value::IntVec(out)
        }
        (Value::WorldVec(x), Value::WorldVec(y)) => {
            let mut out = SmallVec::with_capacity(x.len());
            for (&x, &y) in x.iter().zip(y.iter()) {
                out.push(world_binary(op, x, y)?);
            }
            Value::WorldVec(out)
        }
        // Bitwise on booleans arises from the float-floor lowering.
        (Value::Bool(x), Value::Bool(y)) => Value::Bool(match op {
            BinOp::And => *x && *y,
            BinOp::Or => *x || *y,
            BinOp::Xor => *x != *y,
            _ => bail!("arithmetic on booleans"),
        }),
        (Value::BoolVec(x), Value::BoolVec(y)) => {
            let mut out = SmallVec::with_capacity(x.len());
            for (&x, &y) in x.iter().zip(y.iter()) {
                out.push(match op {
                    BinOp::And => x && y,
                    BinOp::Or => x || y,
                    BinOp::Xor => x != y,
                    _ => bail!("arithmetic on booleans"),
                });
            }
            Value::BoolVec(out)
        }
        _ => bail!("binary operand mismatch: {} and {}", a, b),
    })
}

fn int_compare(op: CmpOp, a: i32, b: i32) -> Result<bool> {
    Ok(match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Sge => a >= b,
        CmpOp::Sle => a <= b,
        CmpOp::Sgt => a > b,
        CmpOp::Slt => a < b,
        _ => bail!("float compare on int operands"),
    })
}

fn world_compare(op: CmpOp, a: f64, b: f64) -> Result<bool> {
    // Ordered comparisons: false on NaN.
    Ok(match op {
        CmpOp::FOeq => a == b,
        CmpOp::FOne => a != b && !a.is_nan() && !b.is_nan(),
        CmpOp::FOge => a >= b,
        CmpOp::FOle => a <= b,
        CmpOp::FOgt => a > b,
        CmpOp::FOlt => a < b,
        _ => bail!("int compare on world operands"),
    })
}

fn compare(op: CmpOp, a: &Value, b: &Value) -> Result<Value> {
    Ok(match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Bool(int_compare(op, *x, *y)?),
        (Value::World(x), Value::World(y)) => Value::Bool(world_compare(op, *x, *y)?),
        (Value::Bool(x), Value::Bool(y)) => Value::Bool(match op {
            CmpOp::Eq => x == y,
            CmpOp::Ne => x != y,
            _ => bail!("ordered compare on booleans"),
        }),
        (Value::IntVec(x), Value::IntVec(y)) => {
            let mut out = SmallVec::with_capacity(x.len());
            for (&x, &y) in x.iter().zip(y.iter()) {
                out.push(int_compare(op, x, y)?);
            }
            Value::BoolVec(out)
        }
        (Value::WorldVec(x), Value::WorldVec(y)) => {
            let mut out = SmallVec::with_capacity(x.len());
            for (&x, &y) in x.iter().zip(y.iter()) {
                out.push(world_compare(op, x, y)?);
            }
            Value::BoolVec(out)
        }
        (Value::BoolVec(x), Value::BoolVec(y)) => {
            let mut out = SmallVec::with_capacity(x.len());
            for (&x, &y) in x.iter().zip(y.iter()) {
                out.push(match op {
                    CmpOp::Eq => x == y,
                    CmpOp::Ne => x != y,
                    _ => bail!("ordered compare on booleans"),
                });
            }
            Value::BoolVec(out)
        }
        _ => bail!("compare operand mismatch: {} and {}", a, b),
    })
}
