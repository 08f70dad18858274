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

//! Hand-written lexer. Tokens carry their line and source text so parse
//! and check errors can point at them. Comments are `#` to end of line
//! and `/* ... */`; `//` is the fold form of division, not a comment.

use crate::session::{format_error, ParseSession};
use anyhow::{bail, Result};

/// The binary operator a fold token reduces with.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FoldOp {
    LogicalOr,
    LogicalAnd,
    BitwiseOr,
    BitwiseAnd,
    BitwiseXor,
    Lshift,
    Rshift,
    Pow,
    Mod,
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Tok {
    IntLiteral(i32),
    WorldLiteral(f64),
    Identifier(String),

    // Type keywords; `intN` and `worldN` carry their count.
    Void,
    Int(usize),
    World(usize),

    If,
    Else,
    For,
    Do,
    While,
    Break,
    Continue,
    Return,
    Var,
    Const,
    Export,
    Global,

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Question,
    Colon,
    Assign,
    Dot,

    LogicalOr,
    LogicalAnd,
    BitwiseOr,
    BitwiseAnd,
    BitwiseXor,
    Lshift,
    Rshift,
    Pow,
    Mod,
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
    LogicalNot,
    BitwiseNot,

    Fold(FoldOp),

    Eof,
}

#[derive(Clone, Debug)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
    pub text: String,
}

// Longest match first: three-character fold forms, two-character
// operators and folds, then single characters.
const OPERATORS3: &[(&str, Tok)] = &[
    ("||/", Tok::Fold(FoldOp::LogicalOr)),
    ("&&/", Tok::Fold(FoldOp::LogicalAnd)),
    ("<</", Tok::Fold(FoldOp::Lshift)),
    (">>/", Tok::Fold(FoldOp::Rshift)),
    ("**/", Tok::Fold(FoldOp::Pow)),
    ("==/", Tok::Fold(FoldOp::Eq)),
    ("!=/", Tok::Fold(FoldOp::Ne)),
    (">=/", Tok::Fold(FoldOp::Ge)),
    ("<=/", Tok::Fold(FoldOp::Le)),
];

const OPERATORS2: &[(&str, Tok)] = &[
    ("||", Tok::LogicalOr),
    ("&&", Tok::LogicalAnd),
    ("<<", Tok::Lshift),
    (">>", Tok::Rshift),
    ("**", Tok::Pow),
    ("==", Tok::Eq),
    ("!=", Tok::Ne),
    (">=", Tok::Ge),
    ("<=", Tok::Le),
    ("|/", Tok::Fold(FoldOp::BitwiseOr)),
    ("&/", Tok::Fold(FoldOp::BitwiseAnd)),
    ("^/", Tok::Fold(FoldOp::BitwiseXor)),
    ("%/", Tok::Fold(FoldOp::Mod)),
    ("+/", Tok::Fold(FoldOp::Add)),
    ("-/", Tok::Fold(FoldOp::Sub)),
    ("*/", Tok::Fold(FoldOp::Mul)),
    ("//", Tok::Fold(FoldOp::Div)),
    (">/", Tok::Fold(FoldOp::Gt)),
    ("</", Tok::Fold(FoldOp::Lt)),
];

const OPERATORS1: &[(char, Tok)] = &[
    ('(', Tok::LParen),
    (')', Tok::RParen),
    ('{', Tok::LBrace),
    ('}', Tok::RBrace),
    ('[', Tok::LBracket),
    (']', Tok::RBracket),
    (',', Tok::Comma),
    (';', Tok::Semicolon),
    ('?', Tok::Question),
    (':', Tok::Colon),
    ('=', Tok::Assign),
    ('.', Tok::Dot),
    ('|', Tok::BitwiseOr),
    ('&', Tok::BitwiseAnd),
    ('^', Tok::BitwiseXor),
    ('%', Tok::Mod),
    ('+', Tok::Add),
    ('-', Tok::Sub),
    ('*', Tok::Mul),
    ('/', Tok::Div),
    ('>', Tok::Gt),
    ('<', Tok::Lt),
    ('!', Tok::LogicalNot),
    ('~', Tok::BitwiseNot),
];

fn keyword(word: &str) -> Option<Tok> {
    Some(match word {
        "void" => Tok::Void,
        "int" => Tok::Int(1),
        "world" => Tok::World(1),
        "if" => Tok::If,
        "else" => Tok::Else,
        "for" => Tok::For,
        "do" => Tok::Do,
        "while" => Tok::While,
        "break" => Tok::Break,
        "continue" => Tok::Continue,
        "return" => Tok::Return,
        "var" => Tok::Var,
        "const" => Tok::Const,
        "export" => Tok::Export,
        "global" => Tok::Global,
        _ => return None,
    })
}

/// `intN` / `worldN` vector type keywords, N >= 2.
fn vector_keyword(word: &str) -> Option<Result<Tok>> {
    for (prefix, make) in [
        ("int", Tok::Int as fn(usize) -> Tok),
        ("world", Tok::World as fn(usize) -> Tok),
    ] {
        if let Some(digits) = word.strip_prefix(prefix) {
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                return Some(match digits.parse::<usize>() {
                    Ok(n) if n >= 2 => Ok(make(n)),
                    _ => Err(anyhow::anyhow!("invalid vector size in type `{}`", word)),
                });
            }
        }
    }
    None
}

pub fn lex(session: &mut ParseSession, source: &str) -> Result<Vec<Token>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 1;

    'outer: while i < bytes.len() {
        let c = bytes[i] as char;

        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        // Line comments.
        if c == '#' {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        // Block comments.
        if source[i..].starts_with("/*") {
            let mut j = i + 2;
            while j + 1 < bytes.len() {
                if bytes[j] == b'\n' {
                    line += 1;
                }
                if bytes[j] == b'*' && bytes[j + 1] == b'/' {
                    i = j + 2;
                    continue 'outer;
                }
                j += 1;
            }
            let message = format_error(line, "/*", "unterminated comment");
            session.add_error(message.clone());
            bail!(message);
        }

        // Numeric literals; a trailing `.` makes a world literal.
        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i < bytes.len() && bytes[i] == b'.' {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let text = &source[start..i];
                match text.parse::<f64>() {
                    Ok(value) => tokens.push(Token {
                        tok: Tok::WorldLiteral(value),
                        line,
                        text: text.to_owned(),
                    }),
                    Err(_) => {
                        let message = format_error(line, text, "invalid world literal");
                        session.add_error(message.clone());
                        bail!(message);
                    }
                }
            } else {
                let text = &source[start..i];
                match text.parse::<i32>() {
                    Ok(value) => tokens.push(Token {
                        tok: Tok::IntLiteral(value),
                        line,
                        text: text.to_owned(),
                    }),
                    Err(_) => {
                        let message = format_error(line, text, "int literal out of range");
                        session.add_error(message.clone());
                        bail!(message);
                    }
                }
            }
            continue;
        }

        // Identifiers, keywords and vector type keywords.
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len()
                && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
            {
                i += 1;
            }
            let word = &source[start..i];
            let tok = if let Some(tok) = keyword(word) {
                tok
            } else if let Some(result) = vector_keyword(word) {
                match result {
                    Ok(tok) => tok,
                    Err(e) => {
                        let message = format_error(line, word, &e.to_string());
                        session.add_error(message.clone());
                        bail!(message);
                    }
                }
            } else {
                Tok::Identifier(word.to_owned())
            };
            tokens.push(Token {
                tok,
                line,
                text: word.to_owned(),
            });
            continue;
        }

        // Operators, longest match first.
        for (text, tok) in OPERATORS3 {
            if source[i..].starts_with(text) {
                tokens.push(Token {
                    tok: tok.clone(),
                    line,
                    text: (*text).to_owned(),
                });
                i += text.len();
                continue 'outer;
            }
        }
        for (text, tok) in OPERATORS2 {
            if source[i..].starts_with(text) {
                tokens.push(Token {
                    tok: tok.clone(),
                    line,
                    text: (*text).to_owned(),
                });
                i += text.len();
                continue 'outer;
            }
        }
        for (ch, tok) in OPERATORS1 {
            if c == *ch {
                tokens.push(Token {
                    tok: tok.clone(),
                    line,
                    text: c.to_string(),
                });
                i += 1;
                continue 'outer;
            }
        }

        let message = format_error(line, &c.to_string(), "unexpected character");
        session.add_error(message.clone());
        bail!(message);
    }

    tokens.push(Token {
        tok: Tok::Eof,
        line,
        text: String::new(),
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(source: &str) -> Vec<Tok> {
        let mut session = ParseSession::new();
        lex(&mut session, source)
            .unwrap()
            .into_iter()
            .map(|t| t.tok)
            .collect()
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            toks("42 1. 2.5"),
            vec![
                Tok::IntLiteral(42),
                Tok::WorldLiteral(1.),
                Tok::WorldLiteral(2.5),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn test_vector_types() {
        assert_eq!(
            toks("int int2 world3 int_x"),
            vec![
                Tok::Int(1),
                Tok::Int(2),
                Tok::World(3),
                Tok::Identifier("int_x".to_owned()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn test_fold_operators_munch_longest() {
        assert_eq!(
            toks("+/ **/ // <</ < </"),
            vec![
                Tok::Fold(FoldOp::Add),
                Tok::Fold(FoldOp::Pow),
                Tok::Fold(FoldOp::Div),
                Tok::Fold(FoldOp::Lshift),
                Tok::Lt,
                Tok::Fold(FoldOp::Lt),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn test_world_cast_dot_after_identifier() {
        assert_eq!(
            toks("x."),
            vec![Tok::Identifier("x".to_owned()), Tok::Dot, Tok::Eof]
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            toks("1 # comment\n/* block\nstill */ 2"),
            vec![Tok::IntLiteral(1), Tok::IntLiteral(2), Tok::Eof]
        );
    }

    #[test]
    fn test_line_numbers() {
        let mut session = ParseSession::new();
        let tokens = lex(&mut session, "a\nb\n\nc").unwrap();
        let lines: Vec<usize> = tokens.iter().map(|t| t.line).collect();
        assert_eq!(lines, vec![1, 2, 4, 4]);
    }
}
