use serde::{Serialize, Serializer};

pub mod source_map;
pub use source_map::SourceMap;

// ---- Span infrastructure ----

/// Byte range within the generated source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const UNKNOWN: Span = Span { start: 0, end: 0 };

    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Wraps a node with its source span. Serializes as the inner node only.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Spanned { node, span }
    }
}

impl<T> std::ops::Deref for Spanned<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.node
    }
}

impl<T: Serialize> Serialize for Spanned<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.node.serialize(serializer)
    }
}

// ---- Generated-code AST ----

pub type Expr = Spanned<ExprKind>;

/// A complete generated program: a flat list of top-level statements.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarDecl {
    pub name: String,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    #[serde(skip)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Stmt {
    /// `var a = 1, b;` (also `let`/`const`, all function-scoped)
    Var {
        declarations: Vec<VarDecl>,
        #[serde(skip)]
        span: Span,
    },

    Function(FunctionDecl),

    Return {
        value: Option<Expr>,
        #[serde(skip)]
        span: Span,
    },

    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },

    While {
        condition: Expr,
        body: Box<Stmt>,
    },

    DoWhile {
        body: Box<Stmt>,
        condition: Expr,
    },

    /// `for (init; test; update) body`
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },

    Break {
        #[serde(skip)]
        span: Span,
    },

    Continue {
        #[serde(skip)]
        span: Span,
    },

    Throw {
        value: Expr,
        #[serde(skip)]
        span: Span,
    },

    Block(Vec<Stmt>),

    Expr(Expr),

    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExprKind {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,

    Ident(String),

    Array(Vec<Expr>),

    /// `{ key: value, ... }`
    Object(Vec<(String, Expr)>),

    /// `object.property`
    Member { object: Box<Expr>, property: String },

    /// `object[index]`
    Index { object: Box<Expr>, index: Box<Expr> },

    Call { callee: Box<Expr>, args: Vec<Expr> },

    /// `new Callee(args)`; evaluated like a call
    New { callee: Box<Expr>, args: Vec<Expr> },

    Unary { op: UnaryOp, operand: Box<Expr> },

    /// `++x`, `x--`, ...
    Update {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
    },

    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },

    /// `target = value`, or `target op= value` when `op` is set
    Assign {
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
}

impl ExprKind {
    /// Whether this expression may appear on the left of `=` or under `++`/`--`.
    pub fn is_assignable(&self) -> bool {
        matches!(self, ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::Index { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Equals,
    NotEquals,
    StrictEquals,
    StrictNotEquals,
    LessThan,
    GreaterThan,
    LessOrEqual,
    GreaterOrEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Not,
    Negate,
    /// `+x`: numeric conversion
    Plus,
    Typeof,
}
