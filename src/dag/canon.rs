// src/dag/canon.rs

//! Canonical pointy rendering of a plan.
//!
//! The parser only ever produces left-leaning trees within each binding
//! level and the grammar has no grouping parentheses, so a plan can always
//! be rendered flat: re-parsing the rendered text reproduces the same tree
//! and therefore the same plan. Retry is always rendered on the
//! `task * n` side.

use std::fmt::Write;

use crate::lang::Expr;

/// Render an operator tree as canonical pointy source.
pub fn render(expr: &Expr) -> String {
    let mut out = String::new();
    write_expr(&mut out, expr);
    out
}

fn write_expr(out: &mut String, expr: &Expr) {
    match expr {
        Expr::Task { name, .. } => out.push_str(name),
        Expr::Call { callee, branches } => {
            write_expr(out, callee);
            out.push('(');
            for (i, branch) in branches.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(out, branch);
            }
            out.push(')');
        }
        Expr::Retry { task, budget } => {
            write_expr(out, task);
            let _ = write!(out, " * {budget}");
        }
        Expr::Replicate { count, pipe, child } => {
            let _ = write!(out, "{count} {} ", pipe.token());
            write_expr(out, child);
        }
        Expr::Parallel { left, right } => {
            write_expr(out, left);
            out.push_str(" || ");
            write_expr(out, right);
        }
        Expr::Pipe { kind, left, right } => {
            write_expr(out, left);
            let _ = write!(out, " {} ", kind.token());
            write_expr(out, right);
        }
    }
}
