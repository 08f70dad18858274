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

//! Runtime values of executing modules. Pointers are either stack cells
//! (allocas) or fields of a heap block (the per-instance global data).
//! Everything is single-threaded; `Rc` is deliberate.

use crate::ir::{FuncId, Ty};
use anyhow::{bail, Result};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub type HeapBlock = Rc<RefCell<Vec<Value>>>;

#[derive(Clone, Debug)]
pub enum Ptr {
    Cell(Rc<RefCell<Value>>),
    Field(HeapBlock, usize),
    Block(HeapBlock),
}

impl Ptr {
    pub fn load(&self) -> Result<Value> {
        Ok(match self {
            Ptr::Cell(cell) => cell.borrow().clone(),
            Ptr::Field(block, index) => block.borrow()[*index].clone(),
            Ptr::Block(_) => bail!("loading whole heap block"),
        })
    }

    pub fn store(&self, value: Value) -> Result<()> {
        match self {
            Ptr::Cell(cell) => *cell.borrow_mut() = value,
            Ptr::Field(block, index) => block.borrow_mut()[*index] = value,
            Ptr::Block(_) => bail!("storing whole heap block"),
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    Void,
    Bool(bool),
    Int(i32),
    World(f64),
    BoolVec(SmallVec<[bool; 4]>),
    IntVec(SmallVec<[i32; 4]>),
    WorldVec(SmallVec<[f64; 4]>),
    Func(FuncId),
    Ptr(Ptr),
}

impl Value {
    /// The zero value of an IR type.
    pub fn zero(ty: &Ty) -> Value {
        match ty {
            Ty::Void => Value::Void,
            Ty::Bool => Value::Bool(false),
            Ty::Int => Value::Int(0),
            Ty::World => Value::World(0.),
            Ty::BoolVec(n) => Value::BoolVec(SmallVec::from_elem(false, *n)),
            Ty::IntVec(n) => Value::IntVec(SmallVec::from_elem(0, *n)),
            Ty::WorldVec(n) => Value::WorldVec(SmallVec::from_elem(0., *n)),
            Ty::Ptr => Value::Ptr(Ptr::Cell(Rc::new(RefCell::new(Value::Void)))),
            // A null function; calling it is a runtime error.
            Ty::Fn(_) => Value::Func(usize::MAX),
        }
    }

    pub fn to_bool(&self) -> Result<bool> {
        if let Value::Bool(b) = self {
            return Ok(*b);
        }
        bail!("not a boolean value: {}", self)
    }

    pub fn to_int(&self) -> Result<i32> {
        if let Value::Int(i) = self {
            return Ok(*i);
        }
        bail!("not an int value: {}", self)
    }

    pub fn to_world(&self) -> Result<f64> {
        if let Value::World(w) = self {
            return Ok(*w);
        }
        bail!("not a world value: {}", self)
    }

    pub fn to_func(&self) -> Result<FuncId> {
        if let Value::Func(id) = self {
            return Ok(*id);
        }
        bail!("not a function value: {}", self)
    }

    pub fn to_ptr(&self) -> Result<&Ptr> {
        if let Value::Ptr(p) = self {
            return Ok(p);
        }
        bail!("not a pointer value: {}", self)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "void"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::World(v) => write!(f, "{:?}", v),
            Value::BoolVec(v) => write!(f, "{:?}", v),
            Value::IntVec(v) => write!(f, "{:?}", v),
            Value::WorldVec(v) => write!(f, "{:?}", v),
            Value::Func(id) => write!(f, "function #{}", id),
            Value::Ptr(_) => write!(f, "ptr"),
        }
    }
}

// Equality for tests and cache purposes: pointers compare by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Void, Value::Void) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::World(a), Value::World(b)) => a == b,
            (Value::BoolVec(a), Value::BoolVec(b)) => a == b,
            (Value::IntVec(a), Value::IntVec(b)) => a == b,
            (Value::WorldVec(a), Value::WorldVec(b)) => a == b,
            (Value::Func(a), Value::Func(b)) => a == b,
            (Value::Ptr(Ptr::Cell(a)), Value::Ptr(Ptr::Cell(b))) => Rc::ptr_eq(a, b),
            (Value::Ptr(Ptr::Block(a)), Value::Ptr(Ptr::Block(b))) => Rc::ptr_eq(a, b),
            (Value::Ptr(Ptr::Field(a, i)), Value::Ptr(Ptr::Field(b, j))) => {
                Rc::ptr_eq(a, b) && i == j
            }
            _ => false,
        }
    }
}
