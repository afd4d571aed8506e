//! Statement AST nodes.

use crate::ast::expr::Expr;
use crate::ast::types::TypeTag;
use crate::span::Span;

/// A statement in the AST.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// Statement variants.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Expression statement: expr; raise f(x);
    Expression(Expr),

    /// Declaration: corpse x = 5; eternal soul name = "x";
    VarDecl {
        name: String,
        type_tag: TypeTag,
        initializer: Option<Expr>,
        is_constant: bool,
    },

    /// Block: { statements }
    Block(Vec<Stmt>),

    /// if (cond) { ... } otherwise if (cond) { ... } otherwise { ... }
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },

    /// Bounded counting loop: shamble i from 1 to 10 { ... } (inclusive)
    Shamble {
        variable: String,
        start: Expr,
        end: Expr,
        body: Box<Stmt>,
    },

    /// Foreach loop: decay x in iterable { ... }
    Decay {
        variable: String,
        iterable: Expr,
        body: Box<Stmt>,
    },

    /// Unconditional loop: soulless { ... }
    Soulless(Box<Stmt>),

    /// judge (subject) { case v { ... } default { ... } }
    Judge {
        subject: Expr,
        cases: Vec<JudgeCase>,
        default: Option<Vec<Stmt>>,
    },

    /// flee;
    Flee,

    /// persist;
    Persist,

    /// reap expr;
    Reap(Option<Expr>),

    /// harvest a, b;
    Harvest(Vec<Expr>),

    /// rest(ms);
    Rest(Expr),

    /// Function declaration
    Function(FunctionDecl),

    /// Class declaration
    Class(ClassDecl),

    /// risk { } catch (Type e) { } finally { }
    Risk {
        body: Vec<Stmt>,
        catches: Vec<CatchClause>,
        finally: Option<Vec<Stmt>>,
    },

    /// throw [Type] [message];
    Throw {
        error_type: Option<String>,
        message: Option<Expr>,
    },

    /// infiltrate module [as alias] [(a, b)];
    Infiltrate(ImportDecl),

    /// cloak feature;
    Cloak(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JudgeCase {
    pub value: Expr,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// A `catch` clause. No type means catch-all.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub error_type: Option<String>,
    pub binding: Option<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// Import declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    pub module: String,
    pub alias: Option<String>,
    /// Selected symbols; empty imports the module as a mapping.
    pub items: Vec<String>,
    pub span: Span,
}

/// Function declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Parameter>,
    pub return_type: Option<TypeTag>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// Function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub type_tag: Option<TypeTag>,
    pub default_value: Option<Expr>,
    pub span: Span,
}

/// Class declaration. The method named like the class is its constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<FunctionDecl>,
    pub span: Span,
}

/// Field declaration in a class.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub type_tag: TypeTag,
    pub initializer: Option<Expr>,
    pub span: Span,
}

/// A complete program.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self { statements }
    }
}
