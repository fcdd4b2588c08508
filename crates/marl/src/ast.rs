use serde::{Deserialize, Serialize};

use crate::{
    error::CodeLoc,
    func::FuncId,
    lex::Token,
    scope::ScopeId,
    types::TypeId,
};

/// A possibly-dotted name (`a`, `a.b.c`); `::` separators parse into the
/// same shape. A path of length 1 behaves identically to a bare
/// identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NamePath {
    pub segments: Vec<String>,
    pub loc: CodeLoc,
}

impl NamePath {
    #[must_use]
    pub fn dotted(&self) -> String {
        self.segments.join(".")
    }
}

/// An expression node. Binary nodes keep their operator token so
/// diagnostics can point at the source position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Expr {
    /// An integer or decimal literal.
    Literal(Token),
    /// A possibly-dotted name read.
    Name(NamePath),
    Binary {
        lhs: Box<Expr>,
        op: Token,
        rhs: Box<Expr>,
    },
    Call(CallExpr),
}

impl Expr {
    #[must_use]
    pub fn loc(&self) -> CodeLoc {
        match self {
            Self::Literal(tok) => tok.loc(),
            Self::Name(path) => path.loc,
            Self::Binary { op, .. } => op.loc(),
            Self::Call(call) => call.loc,
        }
    }
}

/// A call, usable both as an expression and as a statement followed by a
/// semicolon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CallExpr {
    pub callee: NamePath,
    pub args: Vec<Expr>,
    pub loc: CodeLoc,
}

/// A statement list executing inside the scope created for it at parse
/// time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Block {
    pub scope: ScopeId,
    pub stmts: Vec<Stmt>,
}

/// A statement node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Stmt {
    VarDecl(VarDeclStmt),
    Assign(AssignStmt),
    If(IfStmt),
    While(WhileStmt),
    For(Box<ForStmt>),
    Return(ReturnStmt),
    /// Legality (inside a loop) is checked at parse time; execution just
    /// propagates.
    Break,
    /// Marks where a function was declared. The callable itself lives in
    /// the function registry; executing the marker is a no-op, except that
    /// the module runner treats the definition of `main` as its entry
    /// point.
    FuncDef { func: FuncId, loc: CodeLoc },
    /// Marks where a class was declared; the type itself lives in the
    /// registry, so executing the marker is a no-op.
    ClassDecl,
    Call(CallExpr),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct VarDeclStmt {
    pub type_id: TypeId,
    pub name: String,
    pub is_const: bool,
    pub init: Option<Expr>,
    pub loc: CodeLoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AssignStmt {
    pub target: NamePath,
    pub value: Expr,
    pub loc: CodeLoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct IfStmt {
    pub cond: Expr,
    pub then_block: Block,
    pub else_block: Option<Block>,
    pub loc: CodeLoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WhileStmt {
    pub cond: Expr,
    pub body: Block,
    pub loc: CodeLoc,
}

/// `for (init; cond; step) body`. The init, condition, step, and body all
/// share one LOOP scope so the induction variable declared in the init is
/// visible throughout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ForStmt {
    pub scope: ScopeId,
    pub init: Stmt,
    pub cond: Expr,
    pub step: Stmt,
    pub body: Vec<Stmt>,
    pub loc: CodeLoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ReturnStmt {
    pub value: Option<Expr>,
    pub loc: CodeLoc,
}
