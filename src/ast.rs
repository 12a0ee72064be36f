//! Syntax tree produced by the [`Parser`](crate::parser::Parser).
//!
//! Expressions that name a binding (`Variable`, `Assign`, `This`, `Super`)
//! carry an [`ExprId`].  The resolver keys its side table by that id, so two
//! structurally identical expressions still resolve independently.
//!
//! Function bodies sit behind `Rc` so runtime closures can share them
//! without copying the tree, and so functions defined on one REPL line stay
//! callable after that line's tree is dropped.

use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::token::Token;

/// Stable identity of a binding‑referencing expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(usize);

static NEXT_EXPR_ID: AtomicUsize = AtomicUsize::new(0);

impl ExprId {
    /// Allocate a process‑unique id.  Ids never repeat across parses, so
    /// resolution tables from successive REPL lines can be merged.
    pub fn fresh() -> Self {
        ExprId(NEXT_EXPR_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// A **literal constant** that appears directly in the source code.
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    /// Numeric literal ‑ stored as IEEE‑754 `f64`.
    Number(f64),

    /// String literal without surrounding quotes.
    Str(String),

    True,

    False,

    Nil,
}

/// Every kind of *expression* in Lox.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(LiteralValue),

    /// Prefix unary operator expression: `!isReady` or `-42`
    Unary {
        operator: Token,
        right: Box<Expr>,
    },

    /// Infix binary operator expression: `a + b`, `x <= y`, `a, b`
    Binary {
        left: Box<Expr>,
        operator: Token,
        right: Box<Expr>,
    },

    /// Short‑circuiting `and` / `or`.
    Logical {
        left: Box<Expr>,
        operator: Token,
        right: Box<Expr>,
    },

    /// `condition ? then_branch : else_branch`
    Conditional {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },

    Grouping(Box<Expr>),

    Variable {
        id: ExprId,
        name: Token,
    },

    Assign {
        id: ExprId,
        name: Token,
        value: Box<Expr>,
    },

    Call {
        callee: Box<Expr>,
        /// The closing `)` token ‑ retained for error reporting.
        paren: Token,
        arguments: Vec<Expr>,
    },

    /// object.property
    Get {
        object: Box<Expr>,
        name: Token,
    },

    /// object.property = value
    Set {
        object: Box<Expr>,
        name: Token,
        value: Box<Expr>,
    },

    This {
        id: ExprId,
        keyword: Token,
    },

    /// super.method
    Super {
        id: ExprId,
        keyword: Token,
        method: Token,
    },

    /// Anonymous `fun (params) { body }`.
    Lambda(Rc<FunctionDecl>),
}

/// A function or method: parameters plus body.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    /// `None` for anonymous functions.
    pub name: Option<Token>,

    /// The `fun` keyword or the method name; used for diagnostics.
    pub keyword: Token,

    pub params: Vec<Token>,

    pub body: Vec<Stmt>,
}

impl FunctionDecl {
    /// Printable name used by `<fn …>`.
    pub fn display_name(&self) -> &str {
        self.name
            .as_ref()
            .map(|t| t.lexeme.as_str())
            .unwrap_or("anonymous")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: Token,

    /// Always an `Expr::Variable` when present.
    pub superclass: Option<Expr>,

    /// Traits listed after `with`, each an `Expr::Variable`.
    pub traits: Vec<Expr>,

    pub methods: Vec<Rc<FunctionDecl>>,

    /// Methods declared with a leading `class`, living on the metaclass.
    pub class_methods: Vec<Rc<FunctionDecl>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraitDecl {
    pub name: Token,
    pub traits: Vec<Expr>,
    pub methods: Vec<Rc<FunctionDecl>>,
}

/// Complete executable constructs.  A program is a sequence of these.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expression(Expr),

    Print(Expr),

    Var {
        name: Token,
        initializer: Option<Expr>,
    },

    Block(Vec<Stmt>),

    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },

    /// Also the target of `for` desugaring.
    While {
        condition: Expr,
        body: Box<Stmt>,
    },

    Break(Token),

    Function(Rc<FunctionDecl>),

    Return {
        keyword: Token,
        value: Option<Expr>,
    },

    Class(ClassDecl),

    Trait(TraitDecl),
}
