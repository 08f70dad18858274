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

//! The Yang syntax tree. Nodes carry their source line and token text for
//! diagnostics; children are owned exclusively by their parent.

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Tag {
    Error,

    // Types.
    TypeVoid,
    TypeInt,
    TypeWorld,
    TypeFunction,

    // Top-level elements.
    Program,
    Global,
    GlobalAssign,
    Function,

    // Statements.
    Block,
    EmptyStmt,
    ExprStmt,
    ReturnStmt,
    IfStmt,
    ForStmt,
    DoWhileStmt,
    BreakStmt,
    ContinueStmt,

    // Expressions.
    Identifier,
    IntLiteral,
    WorldLiteral,
    Ternary,
    Call,
    LogicalOr,
    LogicalAnd,
    BitwiseOr,
    BitwiseAnd,
    BitwiseXor,
    BitwiseLshift,
    BitwiseRshift,
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
    FoldLogicalOr,
    FoldLogicalAnd,
    FoldBitwiseOr,
    FoldBitwiseAnd,
    FoldBitwiseXor,
    FoldBitwiseLshift,
    FoldBitwiseRshift,
    FoldPow,
    FoldMod,
    FoldAdd,
    FoldSub,
    FoldMul,
    FoldDiv,
    FoldEq,
    FoldNe,
    FoldGe,
    FoldLe,
    FoldGt,
    FoldLt,
    LogicalNegation,
    BitwiseNegation,
    ArithmeticNegation,
    Assign,
    AssignVar,
    AssignConst,
    IntCast,
    WorldCast,
    VectorConstruct,
    VectorIndex,
}

impl Tag {
    /// Human-readable operator text, for diagnostics and printing.
    pub fn op_string(self) -> &'static str {
        match self {
            Tag::Ternary => "?:",
            Tag::Call => "()",
            Tag::LogicalOr | Tag::FoldLogicalOr => "||",
            Tag::LogicalAnd | Tag::FoldLogicalAnd => "&&",
            Tag::BitwiseOr | Tag::FoldBitwiseOr => "|",
            Tag::BitwiseAnd | Tag::FoldBitwiseAnd => "&",
            Tag::BitwiseXor | Tag::FoldBitwiseXor => "^",
            Tag::BitwiseLshift | Tag::FoldBitwiseLshift => "<<",
            Tag::BitwiseRshift | Tag::FoldBitwiseRshift => ">>",
            Tag::Pow | Tag::FoldPow => "**",
            Tag::Mod | Tag::FoldMod => "%",
            Tag::Add | Tag::FoldAdd => "+",
            Tag::Sub | Tag::FoldSub => "-",
            Tag::Mul | Tag::FoldMul => "*",
            Tag::Div | Tag::FoldDiv => "/",
            Tag::Eq | Tag::FoldEq => "==",
            Tag::Ne | Tag::FoldNe => "!=",
            Tag::Ge | Tag::FoldGe => ">=",
            Tag::Le | Tag::FoldLe => "<=",
            Tag::Gt | Tag::FoldGt => ">",
            Tag::Lt | Tag::FoldLt => "<",
            Tag::LogicalNegation => "!",
            Tag::BitwiseNegation => "~",
            Tag::ArithmeticNegation => "-",
            Tag::IntCast | Tag::VectorIndex => "[]",
            Tag::WorldCast => ".",
            Tag::VectorConstruct => "()",
            _ => "unknown operator",
        }
    }

    pub fn is_fold(self) -> bool {
        matches!(
            self,
            Tag::FoldLogicalOr
                | Tag::FoldLogicalAnd
                | Tag::FoldBitwiseOr
                | Tag::FoldBitwiseAnd
                | Tag::FoldBitwiseXor
                | Tag::FoldBitwiseLshift
                | Tag::FoldBitwiseRshift
                | Tag::FoldPow
                | Tag::FoldMod
                | Tag::FoldAdd
                | Tag::FoldSub
                | Tag::FoldMul
                | Tag::FoldDiv
                | Tag::FoldEq
                | Tag::FoldNe
                | Tag::FoldGe
                | Tag::FoldLe
                | Tag::FoldGt
                | Tag::FoldLt
        )
    }

    /// The binary operation a fold reduces with.
    pub fn fold_base(self) -> Tag {
        match self {
            Tag::FoldLogicalOr => Tag::LogicalOr,
            Tag::FoldLogicalAnd => Tag::LogicalAnd,
            Tag::FoldBitwiseOr => Tag::BitwiseOr,
            Tag::FoldBitwiseAnd => Tag::BitwiseAnd,
            Tag::FoldBitwiseXor => Tag::BitwiseXor,
            Tag::FoldBitwiseLshift => Tag::BitwiseLshift,
            Tag::FoldBitwiseRshift => Tag::BitwiseRshift,
            Tag::FoldPow => Tag::Pow,
            Tag::FoldMod => Tag::Mod,
            Tag::FoldAdd => Tag::Add,
            Tag::FoldSub => Tag::Sub,
            Tag::FoldMul => Tag::Mul,
            Tag::FoldDiv => Tag::Div,
            Tag::FoldEq => Tag::Eq,
            Tag::FoldNe => Tag::Ne,
            Tag::FoldGe => Tag::Ge,
            Tag::FoldLe => Tag::Le,
            Tag::FoldGt => Tag::Gt,
            Tag::FoldLt => Tag::Lt,
            other => other,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Node {
    pub tag: Tag,

    // Location of this node in the source text, for diagnostics.
    pub line: usize,
    pub text: String,

    // Literal values. `int_value` doubles as the vector count on type
    // nodes and the export flag on top-level assignments.
    pub int_value: i32,
    pub world_value: f64,
    pub string_value: String,

    pub children: Vec<Node>,
}

impl Node {
    pub fn new(tag: Tag, line: usize, text: impl Into<String>) -> Self {
        Self {
            tag,
            line,
            text: text.into(),
            int_value: 0,
            world_value: 0.,
            string_value: String::new(),
            children: Vec::new(),
        }
    }

    pub fn with_int(mut self, value: i32) -> Self {
        self.int_value = value;
        self
    }

    pub fn with_world(mut self, value: f64) -> Self {
        self.world_value = value;
        self
    }

    pub fn with_string(mut self, value: impl Into<String>) -> Self {
        self.string_value = value.into();
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn add(&mut self, child: Node) {
        self.children.push(child);
    }

    pub fn add_front(&mut self, child: Node) {
        self.children.insert(0, child);
    }
}
