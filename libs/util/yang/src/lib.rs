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

//! Yang: the engine's statically-typed scripting language. Source text is
//! lexed and parsed into a tagged tree, type-checked against scoped
//! symbol frames, lowered to an SSA module with a per-program global
//! structure, optimised, and executed deterministically. `Program` and
//! `Instance` are the embedding surface.

mod ast;
mod checker;
mod exec;
pub mod ir;
mod irgen;
mod lexer;
mod opt;
mod parser;
mod print;
mod program;
mod session;
mod table;
mod types;
mod value;

pub use crate::{
    ast::{Node, Tag},
    checker::{check, CheckResult},
    parser::parse,
    print::print_ast,
    program::{Args, Instance, Program, YangType},
    table::SymbolTable,
    types::{Type, TypeBase},
    value::Value,
};
