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

//! Compiled programs and their instances. A `Program` is immutable after
//! construction; each `Instance` owns one heap-allocated block of global
//! data, allocated by the module's `!global_alloc` and released by
//! `!global_free`. Instances of the same program are fully independent.

use crate::{
    ast::Node,
    checker,
    exec::Executor,
    ir::{FuncId, Module},
    irgen, opt,
    parser::parse,
    print::print_ast,
    types::Type,
    value::Value,
};
use anyhow::{anyhow, bail, Result};
use log::{error, warn};
use std::collections::HashMap;

pub struct Program {
    name: String,
    errors: Vec<String>,
    ast: Option<Node>,
    module: Option<Module>,
    functions: HashMap<String, Type>,
    globals: HashMap<String, Type>,
    globals_in_order: Vec<(String, Type, bool)>,
    function_ids: HashMap<String, FuncId>,
    trampoline_ids: HashMap<String, FuncId>,
}

impl Program {
    /// Parse, check, lower and (optionally) optimise `source`. Errors
    /// never panic or abort: `success()` reports the outcome and
    /// `errors()` holds the diagnostics.
    pub fn compile(name: impl Into<String>, source: &str, optimise: bool) -> Self {
        let name = name.into();
        let mut program = Self {
            name,
            errors: Vec::new(),
            ast: None,
            module: None,
            functions: HashMap::new(),
            globals: HashMap::new(),
            globals_in_order: Vec::new(),
            function_ids: HashMap::new(),
            trampoline_ids: HashMap::new(),
        };

        let ast = match parse(source) {
            Ok(ast) => ast,
            Err(errors) => {
                program.errors = errors;
                return program;
            }
        };

        let check = checker::check(&ast);
        if !check.success() {
            program.errors = check.errors;
            return program;
        }

        let output = match irgen::generate(&program.name, &ast, &check.globals) {
            Ok(output) => output,
            Err(e) => {
                // Lowering a checked tree cannot fail unless the compiler
                // itself is wrong.
                let message = format!("{}: internal error: {:#}", program.name, e);
                error!("{}", message);
                program.errors.push(message);
                return program;
            }
        };

        let mut module = output.module;
        // Optimisation may renumber functions, so remember the generated
        // names now and re-resolve afterwards.
        let trampoline_names: HashMap<String, String> = output
            .trampoline_map
            .iter()
            .map(|(symbol, &id)| (symbol.clone(), module.functions[id].name.clone()))
            .collect();
        if let Err(e) = module.verify() {
            let message = format!("{}: IR verification failed: {:#}", program.name, e);
            error!("{}", message);
            program.errors.push(message);
            return program;
        }

        if optimise {
            opt::optimise(&mut module);
            if let Err(e) = module.verify() {
                let message =
                    format!("{}: IR verification failed after optimisation: {:#}", program.name, e);
                error!("{}", message);
                program.errors.push(message);
                return program;
            }
        }

        // Exported functions carry their source names and trampolines
        // their generated names; both survive optimisation.
        for (symbol, _) in output.function_map {
            if let Some(id) = module.function_named(&symbol) {
                program.function_ids.insert(symbol, id);
            }
        }
        for (symbol, generated) in trampoline_names {
            if let Some(id) = module.function_named(&generated) {
                program.trampoline_ids.insert(symbol, id);
            }
        }

        program.functions = check.export_functions;
        program.globals = check
            .globals
            .iter()
            .map(|(name, ty, _)| (name.clone(), ty.clone()))
            .collect();
        program.globals_in_order = check.globals;
        program.ast = Some(ast);
        program.module = Some(module);
        program
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if the source parsed, checked and lowered successfully.
    pub fn success(&self) -> bool {
        self.ast.is_some() && self.module.is_some()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Reconstructed source text.
    pub fn print_ast(&self) -> String {
        match (&self.ast, self.success()) {
            (Some(ast), true) => print_ast(ast),
            _ => "<error>".to_owned(),
        }
    }

    /// A listing of the compiled module.
    pub fn print_ir(&self) -> String {
        match &self.module {
            Some(module) => module.to_string(),
            None => "<error>".to_owned(),
        }
    }

    /// Exported functions by name.
    pub fn functions(&self) -> &HashMap<String, Type> {
        &self.functions
    }

    /// All program globals by name.
    pub fn globals(&self) -> &HashMap<String, Type> {
        &self.globals
    }

    /// Globals in declaration order, with their export flag.
    pub fn globals_in_order(&self) -> &[(String, Type, bool)] {
        &self.globals_in_order
    }

    fn module(&self) -> Result<&Module> {
        self.module
            .as_ref()
            .ok_or_else(|| anyhow!("{}: program did not compile", self.name))
    }

    fn run_named(&self, function: &str, args: Vec<Value>) -> Result<Value> {
        let module = self.module()?;
        let id = module
            .function_named(function)
            .ok_or_else(|| anyhow!("{}: missing generated function `{}`", self.name, function))?;
        Executor::new(module).call(id, args)
    }
}

/// Conversion between host types and Yang's type system, for the typed
/// accessors on `Instance`.
pub trait YangType: Sized {
    fn representation() -> Type;
    fn into_value(self) -> Value;
    fn from_value(value: Value) -> Option<Self>;
}

impl YangType for () {
    fn representation() -> Type {
        Type::void()
    }
    fn into_value(self) -> Value {
        Value::Void
    }
    fn from_value(value: Value) -> Option<Self> {
        matches!(value, Value::Void).then_some(())
    }
}

impl YangType for i32 {
    fn representation() -> Type {
        Type::int()
    }
    fn into_value(self) -> Value {
        Value::Int(self)
    }
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }
}

impl YangType for f64 {
    fn representation() -> Type {
        Type::world()
    }
    fn into_value(self) -> Value {
        Value::World(self)
    }
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::World(v) => Some(v),
            _ => None,
        }
    }
}

impl<const N: usize> YangType for [i32; N] {
    fn representation() -> Type {
        Type::int_vector(N)
    }
    fn into_value(self) -> Value {
        Value::IntVec(self.as_slice().into())
    }
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::IntVec(v) => v.as_slice().try_into().ok(),
            _ => None,
        }
    }
}

impl<const N: usize> YangType for [f64; N] {
    fn representation() -> Type {
        Type::world_vector(N)
    }
    fn into_value(self) -> Value {
        Value::WorldVec(self.as_slice().into())
    }
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::WorldVec(v) => v.as_slice().try_into().ok(),
            _ => None,
        }
    }
}

/// Argument packs for `Instance::call`.
pub trait Args {
    fn representations() -> Vec<Type>;
    fn into_values(self) -> Vec<Value>;
}

impl Args for () {
    fn representations() -> Vec<Type> {
        Vec::new()
    }
    fn into_values(self) -> Vec<Value> {
        Vec::new()
    }
}

macro_rules! impl_args {
    ($($name:ident),+) => {
        impl<$($name: YangType),+> Args for ($($name,)+) {
            fn representations() -> Vec<Type> {
                vec![$($name::representation()),+]
            }
            #[allow(non_snake_case)]
            fn into_values(self) -> Vec<Value> {
                let ($($name,)+) = self;
                vec![$($name.into_value()),+]
            }
        }
    };
}

impl_args!(A);
impl_args!(A, B);
impl_args!(A, B, C);
impl_args!(A, B, C, D);

pub struct Instance<'p> {
    program: &'p Program,
    global_data: Value,
}

impl<'p> Instance<'p> {
    pub fn new(program: &'p Program) -> Result<Self> {
        if !program.success() {
            bail!("{}: instancing a failed program", program.name);
        }
        let global_data = program.run_named("!global_alloc", Vec::new())?;
        Ok(Self {
            program,
            global_data,
        })
    }

    fn check_global(&self, name: &str, requested: &Type, setting: bool) -> Result<&Type> {
        let declared = match self.program.globals.get(name) {
            Some(declared) => declared,
            None => bail!(
                "{}: requested global `{}` does not exist",
                self.program.name,
                name
            ),
        };
        if declared != requested {
            bail!(
                "{}: requested global `{} {}` via incorrect type `{}`",
                self.program.name,
                declared,
                name,
                requested
            );
        }
        if setting && declared.is_const() {
            bail!(
                "{}: requested global `{} {}` is constant",
                self.program.name,
                declared,
                name
            );
        }
        Ok(declared)
    }

    pub fn get_global<T: YangType>(&self, name: &str) -> Result<T> {
        self.check_global(name, &T::representation(), false)?;
        let value = self
            .program
            .run_named(&format!("!global_get_{}", name), vec![self.global_data.clone()])?;
        T::from_value(value)
            .ok_or_else(|| anyhow!("{}: global `{}` value conversion failed", self.program.name, name))
    }

    pub fn set_global<T: YangType>(&mut self, name: &str, value: T) -> Result<()> {
        self.check_global(name, &T::representation(), true)?;
        self.program.run_named(
            &format!("!global_set_{}", name),
            vec![self.global_data.clone(), value.into_value()],
        )?;
        Ok(())
    }

    /// Call an exported function through its trampoline, type-checking
    /// the requested signature against the declared one.
    pub fn call<A: Args, R: YangType>(&mut self, name: &str, args: A) -> Result<R> {
        let declared = match self.program.functions.get(name) {
            Some(declared) => declared,
            None => bail!(
                "{}: requested function `{}` does not exist",
                self.program.name,
                name
            ),
        };
        let requested = Type::function(R::representation(), A::representations());
        if *declared != requested {
            bail!(
                "{}: requested function `{} {}` via incorrect type `{}`",
                self.program.name,
                declared,
                name,
                requested
            );
        }

        let module = self.program.module()?;
        let target = *self
            .program
            .function_ids
            .get(name)
            .ok_or_else(|| anyhow!("{}: missing function body for `{}`", self.program.name, name))?;
        let trampoline = *self
            .program
            .trampoline_ids
            .get(name)
            .ok_or_else(|| anyhow!("{}: missing trampoline for `{}`", self.program.name, name))?;

        let mut values = vec![Value::Func(target), self.global_data.clone()];
        values.extend(args.into_values());
        let result = Executor::new(module).call(trampoline, values)?;
        R::from_value(result).ok_or_else(|| {
            anyhow!(
                "{}: function `{}` result conversion failed",
                self.program.name,
                name
            )
        })
    }
}

impl Drop for Instance<'_> {
    fn drop(&mut self) {
        if let Err(e) = self
            .program
            .run_named("!global_free", vec![self.global_data.clone()])
        {
            warn!("{}: global free failed: {:#}", self.program.name, e);
        }
    }
}
