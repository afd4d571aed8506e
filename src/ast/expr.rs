//! Expression AST nodes.

use crate::ast::stmt::{Parameter, Stmt};
use crate::span::Span;

/// An expression in the AST.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Numeric literal value, used by constant folding.
    pub fn as_number_literal(&self) -> Option<NumberLiteral> {
        match self.kind {
            ExprKind::IntLiteral(n) => Some(NumberLiteral::Int(n)),
            ExprKind::FloatLiteral(n) => Some(NumberLiteral::Float(n)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberLiteral {
    Int(i64),
    Float(f64),
}

/// All expression variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Integer literal: 42, 0xFF, 0b101, DEAD, RISEN
    IntLiteral(i64),
    /// Float literal: 3.14
    FloatLiteral(f64),
    /// String literal: "hello", r"raw"
    StringLiteral(String),
    /// Interpolated string: "sum #{a + b}"
    InterpolatedString(Vec<InterpolatedPart>),
    /// void
    Void,

    /// Variable reference: foo
    Variable(String),

    /// this
    This,

    /// Binary operation: a + b, a wither b
    Binary {
        left: Box<Expr>,
        operator: BinaryOp,
        right: Box<Expr>,
    },

    /// Short-circuit logical operation: a corrupt b, a infest b
    Logical {
        left: Box<Expr>,
        operator: LogicalOp,
        right: Box<Expr>,
    },

    /// Unary operation: -x, banish x, invert x
    Unary {
        operator: UnaryOp,
        operand: Box<Expr>,
    },

    /// Call: foo(a, b) or (expr)(a)
    Call {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },

    /// Method call: obj.name(args)
    MethodCall {
        object: Box<Expr>,
        method: String,
        arguments: Vec<Expr>,
    },

    /// Property access: obj.field
    Member { object: Box<Expr>, name: String },

    /// Index: arr[index]
    Index { object: Box<Expr>, index: Box<Expr> },

    /// Slice: arr[start:end:step]
    Slice {
        object: Box<Expr>,
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },

    /// Assignment: x = 5, x += 1, obj.f = v, arr[i] = v
    Assign {
        target: Box<Expr>,
        operator: AssignOp,
        value: Box<Expr>,
    },

    /// Array literal: [1, 2, 3]
    Array(Vec<Expr>),

    /// Mapping literal: {k: v}
    Dict(Vec<(Expr, Expr)>),

    /// List comprehension: [expr for x in iter if cond]
    ListComprehension {
        element: Box<Expr>,
        variable: String,
        iterable: Box<Expr>,
        condition: Option<Box<Expr>>,
    },

    /// Lambda: infect (a, b) => a + b. An expression body is one `reap`.
    Lambda {
        params: Vec<Parameter>,
        body: Vec<Stmt>,
    },

    /// Instantiation: spawn Name(args)
    Spawn {
        class_name: String,
        arguments: Vec<Expr>,
    },

    /// Async block: breach { ... }
    Breach(Vec<Stmt>),

    /// await expr
    Await(Box<Expr>),
}

/// Part of an interpolated string.
#[derive(Debug, Clone, PartialEq)]
pub enum InterpolatedPart {
    Literal(String),
    Expression(Expr),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    BitAnd,
    BitOr,
    BitXor,
    RotateLeft,
}

impl BinaryOp {
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Subtract
                | BinaryOp::Multiply
                | BinaryOp::Divide
                | BinaryOp::Modulo
        )
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryOp::Add => write!(f, "+"),
            BinaryOp::Subtract => write!(f, "-"),
            BinaryOp::Multiply => write!(f, "*"),
            BinaryOp::Divide => write!(f, "/"),
            BinaryOp::Modulo => write!(f, "%"),
            BinaryOp::Equal => write!(f, "=="),
            BinaryOp::NotEqual => write!(f, "!="),
            BinaryOp::Less => write!(f, "<"),
            BinaryOp::LessEqual => write!(f, "<="),
            BinaryOp::Greater => write!(f, ">"),
            BinaryOp::GreaterEqual => write!(f, ">="),
            BinaryOp::BitAnd => write!(f, "wither"),
            BinaryOp::BitOr => write!(f, "spread"),
            BinaryOp::BitXor => write!(f, "mutate"),
            BinaryOp::RotateLeft => write!(f, "rot"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

impl std::fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogicalOp::And => write!(f, "corrupt"),
            LogicalOp::Or => write!(f, "infest"),
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
    BitNot,
}

impl std::fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOp::Negate => write!(f, "-"),
            UnaryOp::Not => write!(f, "banish"),
            UnaryOp::BitNot => write!(f, "invert"),
        }
    }
}

/// Assignment operators; compound forms apply the binary op first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl AssignOp {
    pub fn binary_op(&self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Subtract => Some(BinaryOp::Subtract),
            AssignOp::Multiply => Some(BinaryOp::Multiply),
            AssignOp::Divide => Some(BinaryOp::Divide),
            AssignOp::Modulo => Some(BinaryOp::Modulo),
        }
    }
}
