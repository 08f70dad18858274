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

//! Reconstructs compilable source from a syntax tree. Expressions come
//! out fully parenthesised, so printing a parse of the printed output
//! reproduces it exactly.

use crate::ast::{Node, Tag};
use std::fmt::Write;

pub fn print_ast(program: &Node) -> String {
    let mut output = String::new();
    for child in &program.children {
        print_top_level(&mut output, child);
    }
    output
}

fn indent(output: &mut String, depth: usize) {
    for _ in 0..depth {
        output.push_str("  ");
    }
}

fn print_top_level(output: &mut String, node: &Node) {
    match node.tag {
        Tag::Global => {
            if node.int_value != 0 {
                output.push_str("export ");
            }
            output.push_str("global ");
            print_statement(output, &node.children[0], 0);
            output.push('\n');
        }
        Tag::GlobalAssign => {
            if node.int_value != 0 {
                output.push_str("export ");
            }
            let value = &node.children[0];
            if value.tag == Tag::Function {
                print_function(output, value, Some(&node.string_value), 0);
                output.push('\n');
            } else {
                let _ = write!(output, "var {} = ", node.string_value);
                print_expression(output, value);
                output.push_str(";\n");
            }
        }
        _ => {}
    }
}

fn print_type(output: &mut String, node: &Node) {
    match node.tag {
        Tag::TypeVoid => output.push_str("void"),
        Tag::TypeInt => {
            output.push_str("int");
            if node.int_value > 1 {
                let _ = write!(output, "{}", node.int_value);
            }
        }
        Tag::TypeWorld => {
            output.push_str("world");
            if node.int_value > 1 {
                let _ = write!(output, "{}", node.int_value);
            }
        }
        Tag::TypeFunction => {
            print_type(output, &node.children[0]);
            output.push('(');
            for (i, arg) in node.children[1..].iter().enumerate() {
                if i > 0 {
                    output.push_str(", ");
                }
                print_type(output, arg);
            }
            output.push(')');
        }
        _ => {}
    }
}

/// A function expression; with a name it prints in definition form.
fn print_function(output: &mut String, node: &Node, name: Option<&str>, depth: usize) {
    let signature = &node.children[0];
    print_type(output, &signature.children[0]);
    match name {
        Some(name) => {
            let _ = write!(output, " {}(", name);
        }
        None => output.push('('),
    }
    for (i, param) in signature.children[1..].iter().enumerate() {
        if i > 0 {
            output.push_str(", ");
        }
        print_type(output, param);
        let _ = write!(output, " {}", param.string_value);
    }
    output.push_str(") ");
    print_statement(output, &node.children[1], depth);
}

fn print_statement(output: &mut String, node: &Node, depth: usize) {
    match node.tag {
        Tag::Block => {
            output.push_str("{\n");
            for child in &node.children {
                indent(output, depth + 1);
                print_statement(output, child, depth + 1);
                output.push('\n');
            }
            indent(output, depth);
            output.push('}');
        }
        Tag::EmptyStmt => output.push(';'),
        Tag::ExprStmt => {
            print_expression(output, &node.children[0]);
            output.push(';');
        }
        Tag::ReturnStmt => {
            output.push_str("return");
            if let Some(child) = node.children.first() {
                output.push(' ');
                print_expression(output, child);
            }
            output.push(';');
        }
        Tag::IfStmt => {
            output.push_str("if (");
            print_expression(output, &node.children[0]);
            output.push_str(") ");
            print_statement(output, &node.children[1], depth);
            if let Some(else_branch) = node.children.get(2) {
                output.push_str("\n");
                indent(output, depth);
                output.push_str("else ");
                print_statement(output, else_branch, depth);
            }
        }
        Tag::ForStmt => {
            output.push_str("for (");
            print_expression(output, &node.children[0]);
            output.push_str("; ");
            print_expression(output, &node.children[1]);
            output.push_str("; ");
            print_expression(output, &node.children[2]);
            output.push_str(") ");
            print_statement(output, &node.children[3], depth);
        }
        Tag::DoWhileStmt => {
            output.push_str("do ");
            print_statement(output, &node.children[0], depth);
            output.push_str("\n");
            indent(output, depth);
            output.push_str("while (");
            print_expression(output, &node.children[1]);
            output.push_str(");");
        }
        Tag::BreakStmt => output.push_str("break;"),
        Tag::ContinueStmt => output.push_str("continue;"),
        _ => {
            print_expression(output, node);
            output.push(';');
        }
    }
}

fn print_expression(output: &mut String, node: &Node) {
    let op = node.tag.op_string();
    match node.tag {
        Tag::Identifier => output.push_str(&node.string_value),
        Tag::IntLiteral => {
            let _ = write!(output, "{}", node.int_value);
        }
        Tag::WorldLiteral => {
            // `{:?}` always keeps a decimal point, so the literal reads
            // back as a world.
            let _ = write!(output, "{:?}", node.world_value);
        }

        Tag::Function => print_function(output, node, None, 0),

        Tag::Ternary => {
            output.push('(');
            print_expression(output, &node.children[0]);
            output.push_str(" ? ");
            print_expression(output, &node.children[1]);
            output.push_str(" : ");
            print_expression(output, &node.children[2]);
            output.push(')');
        }

        Tag::Call => {
            print_expression(output, &node.children[0]);
            output.push('(');
            for (i, argument) in node.children[1..].iter().enumerate() {
                if i > 0 {
                    output.push_str(", ");
                }
                print_expression(output, argument);
            }
            output.push(')');
        }

        Tag::LogicalOr
        | Tag::LogicalAnd
        | Tag::BitwiseOr
        | Tag::BitwiseAnd
        | Tag::BitwiseXor
        | Tag::BitwiseLshift
        | Tag::BitwiseRshift
        | Tag::Pow
        | Tag::Mod
        | Tag::Add
        | Tag::Sub
        | Tag::Mul
        | Tag::Div
        | Tag::Eq
        | Tag::Ne
        | Tag::Ge
        | Tag::Le
        | Tag::Gt
        | Tag::Lt => {
            output.push('(');
            print_expression(output, &node.children[0]);
            let _ = write!(output, " {} ", op);
            print_expression(output, &node.children[1]);
            output.push(')');
        }

        tag if tag.is_fold() => {
            let _ = write!(output, "{}/", op);
            print_expression(output, &node.children[0]);
        }

        Tag::LogicalNegation | Tag::BitwiseNegation | Tag::ArithmeticNegation => {
            output.push_str(op);
            print_expression(output, &node.children[0]);
        }

        Tag::Assign => {
            let _ = write!(output, "({} = ", node.string_value);
            print_expression(output, &node.children[0]);
            output.push(')');
        }
        Tag::AssignVar => {
            let _ = write!(output, "(var {} = ", node.string_value);
            print_expression(output, &node.children[0]);
            output.push(')');
        }
        Tag::AssignConst => {
            let _ = write!(output, "(const {} = ", node.string_value);
            print_expression(output, &node.children[0]);
            output.push(')');
        }

        Tag::IntCast => {
            output.push('[');
            print_expression(output, &node.children[0]);
            output.push(']');
        }
        Tag::WorldCast => {
            print_expression(output, &node.children[0]);
            output.push('.');
        }

        Tag::VectorConstruct => {
            output.push('(');
            for (i, element) in node.children.iter().enumerate() {
                if i > 0 {
                    output.push_str(", ");
                }
                print_expression(output, element);
            }
            output.push(')');
        }
        Tag::VectorIndex => {
            print_expression(output, &node.children[0]);
            output.push('[');
            print_expression(output, &node.children[1]);
            output.push(']');
        }

        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn round_trip(source: &str) {
        let first = print_ast(&parse(source).expect("parse"));
        let second = print_ast(&parse(&first).expect("reparse"));
        assert_eq!(first, second, "print/parse/print not a fixpoint");
    }

    #[test]
    fn test_round_trip_function() {
        round_trip("export int square(int x) { return x * x; }");
    }

    #[test]
    fn test_round_trip_globals() {
        round_trip("global { var foo = 5; var baz = (14, 15); }");
    }

    #[test]
    fn test_round_trip_control_flow() {
        round_trip(
            "int f(int n) { var t = 0; for (var i = 0; i < n; i = i + 1) { \
             if (i % 2) { t = t + i; } else { continue; } } \
             do { t = t - 1; } while (t > 100); return t; }",
        );
    }

    #[test]
    fn test_round_trip_operators() {
        round_trip(
            "int f(int3 v, world w) { return +/v + **/v * (v[0] ** 2) - [w] \
             + (!v[1] || ~v[2]) + (1 < 2 ? 3 : 4); }",
        );
    }

    #[test]
    fn test_round_trip_world_literals() {
        round_trip("world f() { return 1.5 + 2.0 + 0.25; }");
    }

    #[test]
    fn test_round_trip_nested_function() {
        round_trip("int f() { var g = int(int y) { return y + 1; }; return g(41); }");
    }

    #[test]
    fn test_world_cast_of_literal_prints_as_literal() {
        // `1.` lexes as a world literal; printing keeps it one.
        let printed = print_ast(&parse("world f() { return 1.; }").expect("parse"));
        assert!(printed.contains("1.0"), "got: {}", printed);
        round_trip("world f() { return 1.; }");
    }
}
