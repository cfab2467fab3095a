// src/lang/ast.rs

//! Operator tree produced by the parser.

use crate::lang::lexer::Pos;

/// Which pipe operator connects two expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeKind {
    /// `->`: sequential dependency.
    Seq,
    /// `|->`: broadcast dependency; the left result is delivered unchanged
    /// to every entry task of the right side.
    Broadcast,
}

impl PipeKind {
    pub fn token(self) -> &'static str {
        match self {
            PipeKind::Seq => "->",
            PipeKind::Broadcast => "|->",
        }
    }
}

/// Parsed pointy expression.
///
/// Binary operators are left-associative, so trees coming out of the parser
/// lean left; canonical rendering relies on that to emit flat source
/// without grouping parentheses (the grammar has none).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// A bare task reference.
    Task { name: String, pos: Pos },
    /// Conditional fan-out `callee(branch, branch, …)`; exactly one branch
    /// is activated at run time by the callee's branch selection.
    Call {
        callee: Box<Expr>,
        branches: Vec<Expr>,
    },
    /// Retry budget attached to a single task: `task * n` or `n * task`.
    Retry { task: Box<Expr>, budget: u32 },
    /// Descriptor replication: `n -> child` / `n |-> child` builds `n`
    /// independent replicas of `child`.
    Replicate {
        count: u32,
        pipe: PipeKind,
        child: Box<Expr>,
    },
    /// Concurrent siblings: no dataflow between the two sides.
    Parallel { left: Box<Expr>, right: Box<Expr> },
    /// Sequential or broadcast dependency between two subexpressions.
    Pipe {
        kind: PipeKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    /// Position of the leftmost task of this expression, for diagnostics.
    pub fn pos(&self) -> Pos {
        match self {
            Expr::Task { pos, .. } => *pos,
            Expr::Call { callee, .. } => callee.pos(),
            Expr::Retry { task, .. } => task.pos(),
            Expr::Replicate { child, .. } => child.pos(),
            Expr::Parallel { left, .. } => left.pos(),
            Expr::Pipe { left, .. } => left.pos(),
        }
    }
}
