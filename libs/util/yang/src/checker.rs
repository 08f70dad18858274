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

//! The static checker: a post-order walk assigning a type to every
//! expression, with scoped symbol frames. All detected errors are
//! collected; success gates IR generation. The walk takes the tree by
//! shared reference, so checking is idempotent.

use crate::{
    ast::{Node, Tag},
    session::format_error,
    table::SymbolTable,
    types::{Type, TypeBase},
};
use log::error;
use std::collections::HashMap;

/// Checker output: collected diagnostics plus the program's symbol
/// frames. `globals` is in declaration order, which fixes the layout of
/// the per-instance global structure.
#[derive(Debug, Default)]
pub struct CheckResult {
    pub errors: Vec<String>,
    pub export_functions: HashMap<String, Type>,
    pub globals: Vec<(String, Type, bool)>,
}

impl CheckResult {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn check(program: &Node) -> CheckResult {
    let mut checker = StaticChecker {
        errors: Vec::new(),
        export_functions: HashMap::new(),
        globals: Vec::new(),
        symbol_table: SymbolTable::new(),
        function_frames: Vec::new(),
        return_types: Vec::new(),
        loop_counts: Vec::new(),
        function_names: Vec::new(),
        in_global: false,
        global_export: false,
    };
    checker.visit(program);
    CheckResult {
        errors: checker.errors,
        export_functions: checker.export_functions,
        globals: checker.globals,
    }
}

struct StaticChecker {
    errors: Vec<String>,
    export_functions: HashMap<String, Type>,
    globals: Vec<(String, Type, bool)>,

    symbol_table: SymbolTable<String, Type>,
    // Symbol-frame index where the innermost function's scope begins;
    // bindings between frame 0 and that index belong to enclosing
    // functions and are inaccessible.
    function_frames: Vec<usize>,
    return_types: Vec<Type>,
    // Loop nesting depth per function, so `break` cannot escape through a
    // nested function boundary.
    loop_counts: Vec<usize>,
    function_names: Vec<String>,

    in_global: bool,
    global_export: bool,
}

impl StaticChecker {
    fn error(&mut self, node: &Node, message: impl Into<String>) {
        let mut message = message.into();
        if let Some(name) = self.function_names.last() {
            message = format!("in function `{}`: {}", name, message);
        }
        let formatted = format_error(node.line, &node.text, &message);
        error!("{}", formatted);
        self.errors.push(formatted);
    }

    /// Whether declarations currently target the global structure.
    fn declaring_globals(&self) -> bool {
        self.in_global && self.function_frames.is_empty()
    }

    fn type_from_node(&mut self, node: &Node) -> Type {
        match node.tag {
            Tag::TypeVoid => Type::void(),
            Tag::TypeInt => Type::new(TypeBase::Int, node.int_value as usize),
            Tag::TypeWorld => Type::new(TypeBase::World, node.int_value as usize),
            Tag::TypeFunction => {
                let return_type = self.type_from_node(&node.children[0]);
                let mut args = Vec::new();
                for child in &node.children[1..] {
                    let arg = self.type_from_node(child);
                    if !arg.not_void() {
                        self.error(node, "function parameter of type `void`");
                        args.push(Type::error());
                    } else {
                        args.push(arg);
                    }
                }
                Type::function(return_type, args)
            }
            _ => Type::error(),
        }
    }

    fn visit_function(&mut self, node: &Node, immediate_name: Option<&str>) -> Type {
        let signature = &node.children[0];
        let function_type = self.type_from_node(signature);

        self.return_types.push(function_type.elements(0).clone());
        self.function_frames.push(self.symbol_table.size());
        self.loop_counts.push(0);
        self.function_names
            .push(immediate_name.unwrap_or("<anonymous>").to_owned());

        // One frame for the recursive self-binding, one for parameters;
        // a parameter may shadow the function's own name.
        self.symbol_table.push();
        if let Some(name) = immediate_name {
            self.symbol_table
                .add(name.to_owned(), function_type.clone().with_const(true));
        }
        self.symbol_table.push();
        for (i, param) in signature.children[1..].iter().enumerate() {
            let name = param.string_value.clone();
            if name.is_empty() {
                continue;
            }
            if self.symbol_table.has_top(&name) {
                self.error(node, format!("duplicate parameter `{}`", name));
            }
            self.symbol_table
                .add(name, function_type.elements(1 + i).clone());
        }

        let body_result = self.visit(&node.children[1]);
        if function_type.elements(0).not_void() && !body_result.not_void() {
            self.error(node, "not all code paths return a value");
        }

        self.symbol_table.pop();
        self.symbol_table.pop();
        self.function_names.pop();
        self.loop_counts.pop();
        self.function_frames.pop();
        self.return_types.pop();
        function_type
    }

    fn lookup(&mut self, node: &Node, name: &str) -> Option<Type> {
        let index = self.symbol_table.index(&name.to_owned())?;
        let base = self.function_frames.last().copied().unwrap_or(0);
        if index != 0 && index < base {
            self.error(
                node,
                format!("cannot access `{}` in enclosing function", name),
            );
            return Some(Type::enclosing_function());
        }
        self.symbol_table.get(&name.to_owned()).cloned()
    }

    fn declare_local(&mut self, node: &Node, name: &str, declared: Type) {
        if self.symbol_table.has_top(&name.to_owned()) {
            let existing_error = self
                .symbol_table
                .get(&name.to_owned())
                .map(|t| t.is_error())
                .unwrap_or(false);
            if !existing_error {
                self.error(node, format!("`{}` redefined", name));
            }
            self.symbol_table.remove(&name.to_owned());
        }
        self.symbol_table.add(name.to_owned(), declared);
    }

    fn declare_global(&mut self, node: &Node, name: &str, declared: Type) {
        if self.symbol_table.has_at(&name.to_owned(), 0) {
            self.error(node, format!("`{}` redefined", name));
            return;
        }
        self.symbol_table
            .add_at(name.to_owned(), 0, declared.clone());
        self.globals
            .push((name.to_owned(), declared, self.global_export));
    }

    fn visit(&mut self, node: &Node) -> Type {
        let s = format!("`{}`", node.tag.op_string());
        match node.tag {
            Tag::Program => {
                for child in &node.children {
                    self.visit(child);
                }
                Type::void()
            }

            Tag::Global => {
                self.in_global = true;
                self.global_export = node.int_value != 0;
                self.visit(&node.children[0]);
                self.in_global = false;
                self.global_export = false;
                Type::void()
            }

            Tag::GlobalAssign => {
                let name = node.string_value.clone();
                let value = &node.children[0];
                let value_type = if value.tag == Tag::Function {
                    self.visit_function(value, Some(&name))
                } else {
                    self.visit(value)
                };

                if !value_type.function_type() {
                    self.error(
                        node,
                        format!(
                            "binding non-function {} to top-level `{}`",
                            value_type.string(),
                            name
                        ),
                    );
                }
                if self.symbol_table.has_at(&name, 0) {
                    self.error(node, format!("`{}` redefined", name));
                } else {
                    self.symbol_table
                        .add_at(name.clone(), 0, value_type.clone().with_const(true));
                }
                if node.int_value != 0 && value_type.function_type() && !value_type.is_error() {
                    self.export_functions.insert(name, value_type);
                }
                Type::void()
            }

            Tag::Function => self.visit_function(node, None),

            Tag::Block => {
                self.symbol_table.push();
                // Return statements are checked against the function's
                // return type where they occur; the first non-void result
                // just marks that this block definitely returns.
                let mut result = Type::void();
                for child in &node.children {
                    let child_type = self.visit(child);
                    if !result.not_void() && child_type.not_void() {
                        result = child_type;
                    }
                }
                self.symbol_table.pop();
                result
            }

            Tag::EmptyStmt => Type::void(),
            Tag::ExprStmt => {
                self.visit(&node.children[0]);
                Type::void()
            }

            Tag::ReturnStmt => {
                let value_type = match node.children.first() {
                    Some(child) => self.visit(child),
                    None => Type::void(),
                };
                let expected = self
                    .return_types
                    .last()
                    .cloned()
                    .unwrap_or_else(Type::error);
                if !value_type.is(&expected) {
                    self.error(
                        node,
                        format!(
                            "returning {} from {} function",
                            value_type.string(),
                            expected.string()
                        ),
                    );
                }
                value_type
            }

            Tag::IfStmt => {
                self.symbol_table.push();
                let condition = self.visit(&node.children[0]);
                if !condition.is(&Type::int()) {
                    self.error(node, format!("branching on {}", condition.string()));
                }
                let then_type = self.visit(&node.children[1]);
                let else_type = match node.children.get(2) {
                    Some(child) => self.visit(child),
                    None => Type::void(),
                };
                self.symbol_table.pop();
                if then_type.not_void() && else_type.not_void() {
                    then_type
                } else {
                    Type::void()
                }
            }

            Tag::ForStmt => {
                self.symbol_table.push();
                self.visit(&node.children[0]);
                let condition = self.visit(&node.children[1]);
                if !condition.is(&Type::int()) {
                    self.error(node, format!("branching on {}", condition.string()));
                }
                self.visit(&node.children[2]);
                if let Some(count) = self.loop_counts.last_mut() {
                    *count += 1;
                }
                self.visit(&node.children[3]);
                if let Some(count) = self.loop_counts.last_mut() {
                    *count -= 1;
                }
                self.symbol_table.pop();
                Type::void()
            }

            Tag::DoWhileStmt => {
                self.symbol_table.push();
                if let Some(count) = self.loop_counts.last_mut() {
                    *count += 1;
                }
                self.visit(&node.children[0]);
                if let Some(count) = self.loop_counts.last_mut() {
                    *count -= 1;
                }
                let condition = self.visit(&node.children[1]);
                if !condition.is(&Type::int()) {
                    self.error(node, format!("branching on {}", condition.string()));
                }
                self.symbol_table.pop();
                Type::void()
            }

            Tag::BreakStmt | Tag::ContinueStmt => {
                if self.loop_counts.last().copied().unwrap_or(0) == 0 {
                    let what = if node.tag == Tag::BreakStmt {
                        "break"
                    } else {
                        "continue"
                    };
                    self.error(node, format!("`{}` outside of loop body", what));
                }
                Type::void()
            }

            Tag::Identifier => {
                let name = node.string_value.clone();
                match self.lookup(node, &name) {
                    Some(t) if t.base() == TypeBase::EnclosingFunction => Type::error(),
                    Some(t) => t,
                    None => {
                        self.error(node, format!("undeclared identifier `{}`", name));
                        self.symbol_table.add(name, Type::error());
                        Type::error()
                    }
                }
            }

            Tag::IntLiteral => Type::int(),
            Tag::WorldLiteral => Type::world(),

            Tag::Ternary => {
                let condition = self.visit(&node.children[0]);
                let left = self.visit(&node.children[1]);
                let right = self.visit(&node.children[2]);
                if !left.is(&right) {
                    self.error(
                        node,
                        format!("{} applied to {} and {}", s, left.string(), right.string()),
                    );
                }
                let result = left.unify(&right);
                if !condition.is_int() {
                    self.error(node, format!("{} branching on {}", s, condition.string()));
                } else if condition.count() > 1 && condition.count() != result.count() {
                    // A vector condition selects element-wise, so the
                    // counts must line up.
                    self.error(
                        node,
                        format!(
                            "{} branching on {} for {}",
                            s,
                            condition.string(),
                            result.string()
                        ),
                    );
                }
                result
            }

            Tag::Call => {
                let callee = self.visit(&node.children[0]);
                let mut args = Vec::new();
                for child in &node.children[1..] {
                    args.push(self.visit(child));
                }
                if !callee.function_type() {
                    self.error(node, format!("{} applied to {}", s, callee.string()));
                    return Type::error();
                }
                if callee.is_error() {
                    return Type::error();
                }
                if args.len() != callee.element_size() - 1 {
                    self.error(
                        node,
                        format!(
                            "passing {} arguments to {} function",
                            args.len(),
                            callee.string()
                        ),
                    );
                    return callee.elements(0).clone();
                }
                for (i, arg) in args.iter().enumerate() {
                    if !arg.is(callee.elements(1 + i)) {
                        self.error(
                            node,
                            format!(
                                "passing {} as argument {} of {} function",
                                arg.string(),
                                1 + i,
                                callee.string()
                            ),
                        );
                    }
                }
                callee.elements(0).clone()
            }

            Tag::LogicalOr
            | Tag::LogicalAnd
            | Tag::BitwiseOr
            | Tag::BitwiseAnd
            | Tag::BitwiseXor
            | Tag::BitwiseLshift
            | Tag::BitwiseRshift => {
                let left = self.visit(&node.children[0]);
                let right = self.visit(&node.children[1]);
                // Takes two integers, produces an integer, vectorised.
                if !left.count_binary_match(&right) {
                    self.error(
                        node,
                        format!("{} applied to {} and {}", s, left.string(), right.string()),
                    );
                    return Type::error();
                } else if !left.is_int() || !right.is_int() {
                    self.error(
                        node,
                        format!("{} applied to {} and {}", s, left.string(), right.string()),
                    );
                }
                Type::int_vector(left.count().max(right.count()))
            }

            Tag::Pow | Tag::Mod | Tag::Add | Tag::Sub | Tag::Mul | Tag::Div => {
                let left = self.visit(&node.children[0]);
                let right = self.visit(&node.children[1]);
                // Takes two ints or two worlds, produces the same,
                // vectorised.
                if !left.count_binary_match(&right)
                    || (!(left.is_int() && right.is_int())
                        && !(left.is_world() && right.is_world()))
                {
                    self.error(
                        node,
                        format!("{} applied to {} and {}", s, left.string(), right.string()),
                    );
                    return Type::error();
                }
                Type::new(left.base(), left.count().max(right.count()))
            }

            Tag::Eq | Tag::Ne | Tag::Ge | Tag::Le | Tag::Gt | Tag::Lt => {
                let left = self.visit(&node.children[0]);
                let right = self.visit(&node.children[1]);
                if !left.count_binary_match(&right) {
                    self.error(
                        node,
                        format!("{} applied to {} and {}", s, left.string(), right.string()),
                    );
                    return Type::error();
                } else if !(left.is_int() && right.is_int())
                    && !(left.is_world() && right.is_world())
                {
                    self.error(
                        node,
                        format!("{} applied to {} and {}", s, left.string(), right.string()),
                    );
                }
                Type::int_vector(left.count().max(right.count()))
            }

            Tag::FoldLogicalOr
            | Tag::FoldLogicalAnd
            | Tag::FoldBitwiseOr
            | Tag::FoldBitwiseAnd
            | Tag::FoldBitwiseXor
            | Tag::FoldBitwiseLshift
            | Tag::FoldBitwiseRshift => {
                let operand = self.visit(&node.children[0]);
                if !operand.is_vector() || !operand.is_int() {
                    self.error(node, format!("{} applied to {}", s, operand.string()));
                }
                Type::int()
            }

            Tag::FoldPow | Tag::FoldMod | Tag::FoldAdd | Tag::FoldSub | Tag::FoldMul
            | Tag::FoldDiv => {
                let operand = self.visit(&node.children[0]);
                if !operand.is_vector() || !(operand.is_int() || operand.is_world()) {
                    self.error(node, format!("{} applied to {}", s, operand.string()));
                    return Type::error();
                }
                Type::new(operand.base(), 1)
            }

            Tag::FoldEq | Tag::FoldNe | Tag::FoldGe | Tag::FoldLe | Tag::FoldGt | Tag::FoldLt => {
                let operand = self.visit(&node.children[0]);
                if !operand.is_vector() || !(operand.is_int() || operand.is_world()) {
                    self.error(node, format!("{} applied to {}", s, operand.string()));
                }
                Type::int()
            }

            Tag::LogicalNegation | Tag::BitwiseNegation => {
                let operand = self.visit(&node.children[0]);
                if !operand.is_int() {
                    self.error(node, format!("{} applied to {}", s, operand.string()));
                }
                Type::int_vector(operand.count())
            }

            Tag::ArithmeticNegation => {
                let operand = self.visit(&node.children[0]);
                if !(operand.is_int() || operand.is_world()) {
                    self.error(node, format!("{} applied to {}", s, operand.string()));
                    return Type::error();
                }
                operand
            }

            Tag::Assign => {
                let name = node.string_value.clone();
                let value_type = self.visit(&node.children[0]);
                let declared = match self.lookup(node, &name) {
                    None => {
                        self.error(node, format!("undeclared identifier `{}`", name));
                        return Type::error();
                    }
                    Some(t) if t.base() == TypeBase::EnclosingFunction => return Type::error(),
                    Some(t) => t,
                };
                if declared.is_const() {
                    self.error(node, format!("assignment to constant `{}`", name));
                } else if !declared.is(&value_type) {
                    self.error(
                        node,
                        format!(
                            "{} assigned to `{}` of type {}",
                            value_type.string(),
                            name,
                            declared.string()
                        ),
                    );
                }
                value_type
            }

            Tag::AssignVar | Tag::AssignConst => {
                let name = node.string_value.clone();
                let value = &node.children[0];
                let value_type = if value.tag == Tag::Function {
                    self.visit_function(value, Some(&name))
                } else {
                    self.visit(value)
                };
                if !value_type.not_void() {
                    self.error(node, format!("assigning void value to `{}`", name));
                    return Type::error();
                }
                let is_const = node.tag == Tag::AssignConst;
                let declared = value_type.clone().with_const(is_const);
                if self.declaring_globals() {
                    self.declare_global(node, &name, declared);
                } else {
                    self.declare_local(node, &name, declared);
                }
                value_type
            }

            Tag::IntCast => {
                let operand = self.visit(&node.children[0]);
                if !operand.is_world() {
                    self.error(node, format!("{} applied to {}", s, operand.string()));
                }
                Type::int_vector(operand.count())
            }

            Tag::WorldCast => {
                let operand = self.visit(&node.children[0]);
                if !operand.is_int() {
                    self.error(node, format!("{} applied to {}", s, operand.string()));
                }
                Type::world_vector(operand.count())
            }

            Tag::VectorConstruct => {
                let mut result = self.visit(&node.children[0]);
                let mut all = result.string();
                let mut unify_error = false;
                if !result.primitive() {
                    self.error(
                        node,
                        format!("{} element with non-primitive type {}", s, result.string()),
                    );
                    result = Type::error();
                }
                for child in &node.children[1..] {
                    let element = self.visit(child);
                    if !element.primitive() {
                        self.error(
                            node,
                            format!("{} element with non-primitive type {}", s, element.string()),
                        );
                        result = Type::error();
                    }
                    let already_error = result.is_error();
                    result = result.unify(&element);
                    if !already_error && result.is_error() {
                        unify_error = true;
                    }
                    all = format!("{}, {}", all, element.string());
                }
                if unify_error {
                    self.error(node, format!("{} applied to different types {}", s, all));
                }
                Type::new(result.base(), node.children.len())
            }

            Tag::VectorIndex => {
                let vector = self.visit(&node.children[0]);
                let index = self.visit(&node.children[1]);
                if !vector.is_vector() || !index.is(&Type::int()) {
                    self.error(
                        node,
                        format!(
                            "{} applied to {} and {}",
                            s,
                            vector.string(),
                            index.string()
                        ),
                    );
                    return if vector.is_vector() {
                        Type::new(vector.base(), 1)
                    } else {
                        Type::error()
                    };
                }
                Type::new(vector.base(), 1)
            }

            Tag::TypeVoid | Tag::TypeInt | Tag::TypeWorld | Tag::TypeFunction => {
                self.type_from_node(node)
            }

            Tag::Error => Type::error(),
        }
    }
}
