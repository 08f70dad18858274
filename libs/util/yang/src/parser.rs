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

//! Recursive-descent parser. Aborts on the first syntax error; the
//! half-built tree unwinds and drops with the call stack.

use crate::{
    ast::{Node, Tag},
    lexer::{lex, FoldOp, Tok, Token},
    session::{format_error, ParseSession},
};
use anyhow::{bail, Result};

/// Parse a whole program. On failure the collected diagnostics are
/// returned instead.
pub fn parse(source: &str) -> std::result::Result<Node, Vec<String>> {
    let mut session = ParseSession::new();
    let tokens = match lex(&mut session, source) {
        Ok(tokens) => tokens,
        Err(_) => return Err(session.into_errors()),
    };
    let mut parser = Parser {
        tokens,
        pos: 0,
        session,
    };
    match parser.parse_program() {
        Ok(node) => Ok(node),
        Err(_) => Err(parser.session.into_errors()),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    session: ParseSession,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_tok(&self) -> &Tok {
        &self.peek().tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].tok
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek_tok() == tok {
            self.advance();
            return true;
        }
        false
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<Token> {
        if self.peek_tok() == tok {
            return Ok(self.advance());
        }
        self.error(&format!("expected {}", what))
    }

    fn error<T>(&mut self, message: &str) -> Result<T> {
        let token = self.peek().clone();
        let text = if token.tok == Tok::Eof {
            "end of input"
        } else {
            token.text.as_str()
        };
        let formatted = format_error(token.line, text, message);
        self.session.add_error(formatted.clone());
        bail!(formatted)
    }

    /// A node stamped with the current token's position.
    fn node(&self, tag: Tag) -> Node {
        let token = self.peek();
        Node::new(tag, token.line, token.text.clone())
    }

    fn node_at(&self, tag: Tag, token: &Token) -> Node {
        Node::new(tag, token.line, token.text.clone())
    }

    fn is_type_start(&self) -> bool {
        matches!(self.peek_tok(), Tok::Void | Tok::Int(_) | Tok::World(_))
    }

    // Program structure.

    fn parse_program(&mut self) -> Result<Node> {
        let mut program = self.node(Tag::Program);
        while *self.peek_tok() != Tok::Eof {
            let element = self.top_level()?;
            program.add(element);
        }
        Ok(program)
    }

    fn top_level(&mut self) -> Result<Node> {
        let export = self.peek_tok() == &Tok::Export;
        let export_token = if export { Some(self.advance()) } else { None };

        if self.peek_tok() == &Tok::Global {
            let token = self.advance();
            let block = self.block()?;
            let mut global = self.node_at(Tag::Global, &token);
            global.int_value = export as i32;
            global.add(block);
            return Ok(global);
        }

        if self.is_type_start() {
            return self.function_definition(export, export_token);
        }

        if matches!(self.peek_tok(), Tok::Var | Tok::Const) {
            let token = self.advance();
            let name = self.identifier("name")?;
            self.expect(&Tok::Assign, "`=`")?;
            let value = self.expression()?;
            self.expect(&Tok::Semicolon, "`;`")?;
            let mut assign = self.node_at(Tag::GlobalAssign, &token);
            assign.string_value = name;
            assign.int_value = export as i32;
            assign.add(value);
            return Ok(assign);
        }

        self.error("expected declaration")
    }

    /// `export? T name(T a, ...) { ... }`, sugar for binding a function
    /// expression to a top-level name.
    fn function_definition(&mut self, export: bool, export_token: Option<Token>) -> Result<Node> {
        let start = export_token.unwrap_or_else(|| self.peek().clone());
        let return_type = self.parse_type()?;
        let name = self.identifier("function name")?;
        let function = self.function_body(return_type)?;

        let mut assign = self.node_at(Tag::GlobalAssign, &start);
        assign.string_value = name;
        assign.int_value = export as i32;
        assign.add(function);
        Ok(assign)
    }

    fn identifier(&mut self, what: &str) -> Result<String> {
        if let Tok::Identifier(name) = self.peek_tok() {
            let name = name.clone();
            self.advance();
            return Ok(name);
        }
        self.error(&format!("expected {}", what))
    }

    // Types.

    /// True if the parenthesised group starting at the current token
    /// contains only type syntax (so it is a function-type suffix, not a
    /// parameter list), and is not immediately followed by a block.
    fn peek_pure_type_group(&self) -> bool {
        if *self.peek_tok() != Tok::LParen {
            return false;
        }
        let mut depth = 0usize;
        let mut offset = 0usize;
        loop {
            match self.peek_at(offset) {
                Tok::LParen => depth += 1,
                Tok::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return *self.peek_at(offset + 1) != Tok::LBrace;
                    }
                }
                Tok::Void | Tok::Int(_) | Tok::World(_) | Tok::Comma => {}
                _ => return false,
            }
            offset += 1;
        }
    }

    fn parse_type(&mut self) -> Result<Node> {
        let token = self.peek().clone();
        let mut node = match token.tok {
            Tok::Void => self.node(Tag::TypeVoid),
            Tok::Int(n) => self.node(Tag::TypeInt).with_int(n as i32),
            Tok::World(n) => self.node(Tag::TypeWorld).with_int(n as i32),
            _ => return self.error("expected type"),
        };
        self.advance();

        // `T(T1, ...)` function-type suffixes.
        while self.peek_pure_type_group() {
            self.advance();
            let mut function = self.node_at(Tag::TypeFunction, &token);
            function.add(node);
            if *self.peek_tok() != Tok::RParen {
                loop {
                    let arg = self.parse_type()?;
                    function.add(arg);
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
            }
            self.expect(&Tok::RParen, "`)`")?;
            node = function;
        }
        Ok(node)
    }

    /// Parameter list and body of a function expression, given its
    /// already-parsed return type.
    fn function_body(&mut self, return_type: Node) -> Result<Node> {
        let start = self.peek().clone();
        self.expect(&Tok::LParen, "`(`")?;
        let mut signature = self.node_at(Tag::TypeFunction, &start);
        signature.add(return_type);
        if *self.peek_tok() != Tok::RParen {
            loop {
                let mut param_type = self.parse_type()?;
                let param_name = self.identifier("parameter name")?;
                param_type.string_value = param_name;
                signature.add(param_type);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
        }
        self.expect(&Tok::RParen, "`)`")?;
        let body = self.block()?;

        let mut function = self.node_at(Tag::Function, &start);
        function.add(signature);
        function.add(body);
        Ok(function)
    }

    // Statements.

    fn block(&mut self) -> Result<Node> {
        let start = self.expect(&Tok::LBrace, "`{`")?;
        let mut block = self.node_at(Tag::Block, &start);
        while *self.peek_tok() != Tok::RBrace {
            if *self.peek_tok() == Tok::Eof {
                return self.error("expected `}`");
            }
            let statement = self.statement()?;
            block.add(statement);
        }
        self.advance();
        Ok(block)
    }

    fn statement(&mut self) -> Result<Node> {
        match self.peek_tok() {
            Tok::LBrace => self.block(),
            Tok::Semicolon => {
                let token = self.advance();
                Ok(self.node_at(Tag::EmptyStmt, &token))
            }
            Tok::Return => {
                let token = self.advance();
                let mut node = self.node_at(Tag::ReturnStmt, &token);
                if !self.eat(&Tok::Semicolon) {
                    let value = self.expression()?;
                    self.expect(&Tok::Semicolon, "`;`")?;
                    node.add(value);
                }
                Ok(node)
            }
            Tok::If => {
                let token = self.advance();
                self.expect(&Tok::LParen, "`(`")?;
                let condition = self.expression()?;
                self.expect(&Tok::RParen, "`)`")?;
                let then_branch = self.statement()?;
                let mut node = self.node_at(Tag::IfStmt, &token);
                node.add(condition);
                node.add(then_branch);
                if self.eat(&Tok::Else) {
                    let else_branch = self.statement()?;
                    node.add(else_branch);
                }
                Ok(node)
            }
            Tok::For => {
                let token = self.advance();
                self.expect(&Tok::LParen, "`(`")?;
                let init = self.expression()?;
                self.expect(&Tok::Semicolon, "`;`")?;
                let condition = self.expression()?;
                self.expect(&Tok::Semicolon, "`;`")?;
                let step = self.expression()?;
                self.expect(&Tok::RParen, "`)`")?;
                let body = self.statement()?;
                let mut node = self.node_at(Tag::ForStmt, &token);
                node.add(init);
                node.add(condition);
                node.add(step);
                node.add(body);
                Ok(node)
            }
            Tok::Do => {
                let token = self.advance();
                let body = self.statement()?;
                self.expect(&Tok::While, "`while`")?;
                self.expect(&Tok::LParen, "`(`")?;
                let condition = self.expression()?;
                self.expect(&Tok::RParen, "`)`")?;
                self.expect(&Tok::Semicolon, "`;`")?;
                let mut node = self.node_at(Tag::DoWhileStmt, &token);
                node.add(body);
                node.add(condition);
                Ok(node)
            }
            Tok::Break => {
                let token = self.advance();
                self.expect(&Tok::Semicolon, "`;`")?;
                Ok(self.node_at(Tag::BreakStmt, &token))
            }
            Tok::Continue => {
                let token = self.advance();
                self.expect(&Tok::Semicolon, "`;`")?;
                Ok(self.node_at(Tag::ContinueStmt, &token))
            }
            _ => {
                let expression = self.expression()?;
                self.expect(&Tok::Semicolon, "`;`")?;
                let mut node = Node::new(Tag::ExprStmt, expression.line, expression.text.clone());
                node.add(expression);
                Ok(node)
            }
        }
    }

    // Expressions, loosest binding first.

    fn expression(&mut self) -> Result<Node> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Node> {
        if matches!(self.peek_tok(), Tok::Var | Tok::Const) {
            let token = self.advance();
            let tag = if token.tok == Tok::Var {
                Tag::AssignVar
            } else {
                Tag::AssignConst
            };
            let name = self.identifier("name")?;
            self.expect(&Tok::Assign, "`=`")?;
            let value = self.assignment()?;
            let mut node = self.node_at(tag, &token);
            node.string_value = name;
            node.add(value);
            return Ok(node);
        }

        let expression = self.ternary()?;
        if *self.peek_tok() == Tok::Assign {
            if expression.tag != Tag::Identifier {
                return self.error("invalid assignment target");
            }
            self.advance();
            let value = self.assignment()?;
            let mut node = Node::new(Tag::Assign, expression.line, expression.text.clone());
            node.string_value = expression.string_value;
            node.add(value);
            return Ok(node);
        }
        Ok(expression)
    }

    fn ternary(&mut self) -> Result<Node> {
        let condition = self.logical_or()?;
        if *self.peek_tok() != Tok::Question {
            return Ok(condition);
        }
        let token = self.advance();
        let then_value = self.expression()?;
        self.expect(&Tok::Colon, "`:`")?;
        let else_value = self.ternary()?;
        let mut node = self.node_at(Tag::Ternary, &token);
        node.add(condition);
        node.add(then_value);
        node.add(else_value);
        Ok(node)
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Node>,
        table: &[(Tok, Tag)],
    ) -> Result<Node> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (tok, tag) in table {
                if self.peek_tok() == tok {
                    let token = self.advance();
                    let rhs = next(self)?;
                    let mut node = self.node_at(*tag, &token);
                    node.add(lhs);
                    node.add(rhs);
                    lhs = node;
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn logical_or(&mut self) -> Result<Node> {
        self.binary_level(Self::logical_and, &[(Tok::LogicalOr, Tag::LogicalOr)])
    }

    fn logical_and(&mut self) -> Result<Node> {
        self.binary_level(Self::bitwise_or, &[(Tok::LogicalAnd, Tag::LogicalAnd)])
    }

    fn bitwise_or(&mut self) -> Result<Node> {
        self.binary_level(Self::bitwise_xor, &[(Tok::BitwiseOr, Tag::BitwiseOr)])
    }

    fn bitwise_xor(&mut self) -> Result<Node> {
        self.binary_level(Self::bitwise_and, &[(Tok::BitwiseXor, Tag::BitwiseXor)])
    }

    fn bitwise_and(&mut self) -> Result<Node> {
        self.binary_level(Self::equality, &[(Tok::BitwiseAnd, Tag::BitwiseAnd)])
    }

    fn equality(&mut self) -> Result<Node> {
        self.binary_level(
            Self::relational,
            &[(Tok::Eq, Tag::Eq), (Tok::Ne, Tag::Ne)],
        )
    }

    fn relational(&mut self) -> Result<Node> {
        self.binary_level(
            Self::shift,
            &[
                (Tok::Ge, Tag::Ge),
                (Tok::Le, Tag::Le),
                (Tok::Gt, Tag::Gt),
                (Tok::Lt, Tag::Lt),
            ],
        )
    }

    fn shift(&mut self) -> Result<Node> {
        self.binary_level(
            Self::additive,
            &[
                (Tok::Lshift, Tag::BitwiseLshift),
                (Tok::Rshift, Tag::BitwiseRshift),
            ],
        )
    }

    fn additive(&mut self) -> Result<Node> {
        self.binary_level(
            Self::multiplicative,
            &[(Tok::Add, Tag::Add), (Tok::Sub, Tag::Sub)],
        )
    }

    fn multiplicative(&mut self) -> Result<Node> {
        self.binary_level(
            Self::power,
            &[
                (Tok::Mul, Tag::Mul),
                (Tok::Div, Tag::Div),
                (Tok::Mod, Tag::Mod),
            ],
        )
    }

    fn power(&mut self) -> Result<Node> {
        let lhs = self.unary()?;
        if *self.peek_tok() != Tok::Pow {
            return Ok(lhs);
        }
        let token = self.advance();
        // Right-associative.
        let rhs = self.power()?;
        let mut node = self.node_at(Tag::Pow, &token);
        node.add(lhs);
        node.add(rhs);
        Ok(node)
    }

    fn unary(&mut self) -> Result<Node> {
        let tag = match self.peek_tok() {
            Tok::LogicalNot => Some(Tag::LogicalNegation),
            Tok::BitwiseNot => Some(Tag::BitwiseNegation),
            Tok::Sub => Some(Tag::ArithmeticNegation),
            Tok::Fold(op) => Some(fold_tag(*op)),
            _ => None,
        };
        if let Some(tag) = tag {
            let token = self.advance();
            let operand = self.unary()?;
            let mut node = self.node_at(tag, &token);
            node.add(operand);
            return Ok(node);
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Node> {
        let mut expression = self.primary()?;
        loop {
            match self.peek_tok() {
                Tok::LParen => {
                    let token = self.advance();
                    let mut call = self.node_at(Tag::Call, &token);
                    call.add(expression);
                    if *self.peek_tok() != Tok::RParen {
                        loop {
                            let argument = self.expression()?;
                            call.add(argument);
                            if !self.eat(&Tok::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(&Tok::RParen, "`)`")?;
                    expression = call;
                }
                Tok::LBracket => {
                    let token = self.advance();
                    let index = self.expression()?;
                    self.expect(&Tok::RBracket, "`]`")?;
                    let mut node = self.node_at(Tag::VectorIndex, &token);
                    node.add(expression);
                    node.add(index);
                    expression = node;
                }
                Tok::Dot => {
                    let token = self.advance();
                    let mut node = self.node_at(Tag::WorldCast, &token);
                    node.add(expression);
                    expression = node;
                }
                _ => return Ok(expression),
            }
        }
    }

    fn primary(&mut self) -> Result<Node> {
        match self.peek_tok().clone() {
            Tok::IntLiteral(value) => {
                let token = self.advance();
                Ok(self.node_at(Tag::IntLiteral, &token).with_int(value))
            }
            Tok::WorldLiteral(value) => {
                let token = self.advance();
                Ok(self.node_at(Tag::WorldLiteral, &token).with_world(value))
            }
            Tok::Identifier(name) => {
                let token = self.advance();
                Ok(self.node_at(Tag::Identifier, &token).with_string(name))
            }
            Tok::LParen => {
                let token = self.advance();
                let first = self.expression()?;
                if *self.peek_tok() == Tok::Comma {
                    // `(a, b, ...)` constructs a vector.
                    let mut vector = self.node_at(Tag::VectorConstruct, &token);
                    vector.add(first);
                    while self.eat(&Tok::Comma) {
                        let element = self.expression()?;
                        vector.add(element);
                    }
                    self.expect(&Tok::RParen, "`)`")?;
                    Ok(vector)
                } else {
                    self.expect(&Tok::RParen, "`)`")?;
                    Ok(first)
                }
            }
            Tok::LBracket => {
                let token = self.advance();
                let operand = self.expression()?;
                self.expect(&Tok::RBracket, "`]`")?;
                let mut node = self.node_at(Tag::IntCast, &token);
                node.add(operand);
                Ok(node)
            }
            Tok::Void | Tok::Int(_) | Tok::World(_) => {
                let return_type = self.parse_type()?;
                self.function_body(return_type)
            }
            _ => self.error("expected expression"),
        }
    }
}

fn fold_tag(op: FoldOp) -> Tag {
    match op {
        FoldOp::LogicalOr => Tag::FoldLogicalOr,
        FoldOp::LogicalAnd => Tag::FoldLogicalAnd,
        FoldOp::BitwiseOr => Tag::FoldBitwiseOr,
        FoldOp::BitwiseAnd => Tag::FoldBitwiseAnd,
        FoldOp::BitwiseXor => Tag::FoldBitwiseXor,
        FoldOp::Lshift => Tag::FoldBitwiseLshift,
        FoldOp::Rshift => Tag::FoldBitwiseRshift,
        FoldOp::Pow => Tag::FoldPow,
        FoldOp::Mod => Tag::FoldMod,
        FoldOp::Add => Tag::FoldAdd,
        FoldOp::Sub => Tag::FoldSub,
        FoldOp::Mul => Tag::FoldMul,
        FoldOp::Div => Tag::FoldDiv,
        FoldOp::Eq => Tag::FoldEq,
        FoldOp::Ne => Tag::FoldNe,
        FoldOp::Ge => Tag::FoldGe,
        FoldOp::Le => Tag::FoldLe,
        FoldOp::Gt => Tag::FoldGt,
        FoldOp::Lt => Tag::FoldLt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Node {
        parse(source).expect("parse failed")
    }

    #[test]
    fn test_empty_program() {
        let program = parse_ok("");
        assert_eq!(program.tag, Tag::Program);
        assert!(program.children.is_empty());
    }

    #[test]
    fn test_exported_function() {
        let program = parse_ok("export int square(int x) { return x * x; }");
        assert_eq!(program.children.len(), 1);
        let assign = &program.children[0];
        assert_eq!(assign.tag, Tag::GlobalAssign);
        assert_eq!(assign.string_value, "square");
        assert_eq!(assign.int_value, 1);
        let function = &assign.children[0];
        assert_eq!(function.tag, Tag::Function);
        let signature = &function.children[0];
        assert_eq!(signature.tag, Tag::TypeFunction);
        assert_eq!(signature.children.len(), 2);
        assert_eq!(signature.children[1].string_value, "x");
    }

    #[test]
    fn test_global_block() {
        let program = parse_ok("global { var foo = 5; }");
        let global = &program.children[0];
        assert_eq!(global.tag, Tag::Global);
        assert_eq!(global.int_value, 0);
        let block = &global.children[0];
        assert_eq!(block.tag, Tag::Block);
        let stmt = &block.children[0];
        assert_eq!(stmt.tag, Tag::ExprStmt);
        assert_eq!(stmt.children[0].tag, Tag::AssignVar);
    }

    #[test]
    fn test_precedence() {
        let program = parse_ok("int f() { return 1 + 2 * 3; }");
        let body = &program.children[0].children[0].children[1];
        let ret = &body.children[0];
        let add = &ret.children[0];
        assert_eq!(add.tag, Tag::Add);
        assert_eq!(add.children[0].tag, Tag::IntLiteral);
        assert_eq!(add.children[1].tag, Tag::Mul);
    }

    #[test]
    fn test_pow_right_associative() {
        let program = parse_ok("int f() { return 2 ** 3 ** 2; }");
        let ret = &program.children[0].children[0].children[1].children[0];
        let pow = &ret.children[0];
        assert_eq!(pow.tag, Tag::Pow);
        assert_eq!(pow.children[0].tag, Tag::IntLiteral);
        assert_eq!(pow.children[1].tag, Tag::Pow);
    }

    #[test]
    fn test_function_type_return() {
        // A function returning a function type.
        let program = parse_ok("int(int) adder(int a) { return adder; }");
        let signature = &program.children[0].children[0].children[0];
        assert_eq!(signature.children[0].tag, Tag::TypeFunction);
    }

    #[test]
    fn test_vector_construct_and_index() {
        let program = parse_ok("int f() { var v = (1, 2, 3); return v[1]; }");
        let block = &program.children[0].children[0].children[1];
        let var = &block.children[0].children[0];
        assert_eq!(var.tag, Tag::AssignVar);
        assert_eq!(var.children[0].tag, Tag::VectorConstruct);
        assert_eq!(var.children[0].children.len(), 3);
        let ret = &block.children[1];
        assert_eq!(ret.children[0].tag, Tag::VectorIndex);
    }

    #[test]
    fn test_fold_prefix() {
        let program = parse_ok("int f(int3 v) { return +/v; }");
        let ret = &program.children[0].children[0].children[1].children[0];
        assert_eq!(ret.children[0].tag, Tag::FoldAdd);
    }

    #[test]
    fn test_casts() {
        let program = parse_ok("int f(world w) { return [w] + [2.5]; }");
        let ret = &program.children[0].children[0].children[1].children[0];
        assert_eq!(ret.children[0].children[0].tag, Tag::IntCast);
    }

    #[test]
    fn test_syntax_error_reports_line_and_token() {
        let errors = parse("int f() {\n  return @;\n}").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("line 2"), "got: {}", errors[0]);
    }

    #[test]
    fn test_nested_function_expression() {
        let program = parse_ok("int f() { var g = int(int y) { return y; }; return g(1); }");
        let block = &program.children[0].children[0].children[1];
        let var = &block.children[0].children[0];
        assert_eq!(var.tag, Tag::AssignVar);
        assert_eq!(var.children[0].tag, Tag::Function);
    }

    #[test]
    fn test_do_while_and_for() {
        let program = parse_ok(
            "int f() { var i = 0; for (i = 0; i < 4; i = i + 1) { } do { break; } while (1); return i; }",
        );
        let block = &program.children[0].children[0].children[1];
        assert_eq!(block.children[1].tag, Tag::ForStmt);
        assert_eq!(block.children[1].children.len(), 4);
        assert_eq!(block.children[2].tag, Tag::DoWhileStmt);
    }
}
