//! Syntax tree of the toy language.
//!
//! The engine treats the tree as read-only. Threads hold an `Arc<Block>` to
//! the statement sequence they execute and a program counter into it; blocks
//! are identified by a [`BlockId`] assigned at parse time, which is how
//! threads are matched when two global contexts are compared.

use std::fmt;
use std::sync::Arc;

/// Integer value of registers and globals.
pub type Value = i64;

/// Stable identity of a block within one parsed program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub usize);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block#{}", self.0)
    }
}

/// A parsed program: the top-level block executed by the main thread.
#[derive(Clone, Debug)]
pub struct Program {
    pub body: Arc<Block>,
}

impl Program {
    pub fn new(body: Block) -> Self {
        Self { body: Arc::new(body) }
    }
}

/// A non-empty sequence of statements with an identity.
#[derive(Debug)]
pub struct Block {
    pub id: BlockId,
    pub stmts: Vec<Stmt>,
}

impl Block {
    pub fn new(id: BlockId, stmts: Vec<Stmt>) -> Self {
        Self { id, stmts }
    }

    pub fn len(&self) -> usize {
        self.stmts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    pub fn get(&self, pc: usize) -> Option<&Stmt> {
        self.stmts.get(pc)
    }
}

/// A statement together with the source text it was parsed from.
#[derive(Clone, Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub source: String,
}

impl Stmt {
    pub fn new(kind: StmtKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Nop,
    Assign { target: LValue, value: Expr },
    Join(Expr),
    Lock(String),
    Unlock(String),
    Assert(Expr),
    /// Forward jump by `offset` statements when `condition` is false.
    Cond { condition: Expr, offset: usize },
    /// Unconditional forward jump by `offset` statements.
    Jump(usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LValue {
    Register(String),
    Global(String),
}

#[derive(Clone, Debug)]
pub enum Expr {
    Register(String),
    Global(String),
    Const(Value),
    Add(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Neq(Box<Expr>, Box<Expr>),
    /// Starts a new thread running the block; evaluates to its thread id.
    Spawn(Arc<Block>),
}

impl Expr {
    pub fn is_comparison(&self) -> bool {
        matches!(self, Expr::Eq(..) | Expr::Neq(..))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Register(name) => write!(f, "${}", name),
            Expr::Global(name) => f.write_str(name),
            Expr::Const(value) => write!(f, "{}", value),
            Expr::Add(lhs, rhs) => write!(f, "{} + {}", lhs, rhs),
            Expr::Eq(lhs, rhs) => write!(f, "{} == {}", lhs, rhs),
            Expr::Neq(lhs, rhs) => write!(f, "{} != {}", lhs, rhs),
            Expr::Spawn(block) => write!(f, "spawn {{ {} }}", block.id),
        }
    }
}
