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

//! Compile a Yang source file and show what came out: exported symbols,
//! the reconstructed source and the IR listing.

use anyhow::{bail, Result};
use std::fs;
use std::path::PathBuf;
use structopt::StructOpt;
use yang::Program;

#[derive(Debug, StructOpt)]
#[structopt(name = "yangc", about = "Compile and inspect Yang programs.")]
struct Opt {
    /// Yang source file.
    #[structopt(parse(from_os_str))]
    input: PathBuf,

    /// Skip the optimisation pipeline.
    #[structopt(long)]
    no_opt: bool,

    /// Print the reconstructed source.
    #[structopt(long)]
    ast: bool,

    /// Print the IR listing.
    #[structopt(long)]
    ir: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let contents = fs::read_to_string(&opt.input)?;
    let name = opt.input.display().to_string();
    let program = Program::compile(name, &contents, !opt.no_opt);
    if !program.success() {
        for error in program.errors() {
            eprintln!("{}", error);
        }
        bail!("compilation failed");
    }

    for (name, ty, exported) in program.globals_in_order() {
        let marker = if *exported { "export " } else { "" };
        println!("global [{}{}] {}", marker, ty, name);
    }
    let mut functions: Vec<_> = program.functions().iter().collect();
    functions.sort_by(|a, b| a.0.cmp(b.0));
    for (name, ty) in functions {
        println!("function [{}] {}", ty, name);
    }

    if opt.ast {
        println!("\n{}", program.print_ast());
    }
    if opt.ir {
        println!("\n{}", program.print_ir());
    }
    Ok(())
}
