//! Abstract Syntax Tree for REAPER.

pub mod expr;
pub mod stmt;
pub mod types;

pub use expr::{
    AssignOp, BinaryOp, Expr, ExprKind, InterpolatedPart, LogicalOp, NumberLiteral, UnaryOp,
};
pub use stmt::{
    CatchClause, ClassDecl, FieldDecl, FunctionDecl, ImportDecl, JudgeCase, Parameter, Program,
    Stmt, StmtKind,
};
pub use types::TypeTag;
