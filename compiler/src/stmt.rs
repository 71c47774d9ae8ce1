// stmt.rs — Statement IR for partially-lowered pipeline programs
//
// Nested sum-type program tree: loop nests, produce/consume markers, value
// bindings, stores, and conditionals. The bounds pass consumes a program
// whose loop mins/extents reference symbolic bound placeholders and emits
// the same tree with `Let` definitions injected.
//
// Preconditions: none (types only).
// Postconditions: `Display` output is deterministic for structurally equal
//   trees; `fingerprint` hashes exactly the `Display` form.
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::expr::Expr;

// ── Statement tree ───────────────────────────────────────────────────────

/// Execution strategy of a loop, decided by the scheduler upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoopKind {
    Serial,
    Parallel,
    Vectorized,
}

/// A statement in a pipeline program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stmt {
    /// `for (var, min, extent) { body }` — iterates `var` over
    /// `[min, min + extent - 1]`.
    For {
        var: String,
        min: Expr,
        extent: Expr,
        kind: LoopKind,
        body: Box<Stmt>,
    },
    /// Marks the loop nest that computes `stage`.
    Produce { stage: String, body: Box<Stmt> },
    /// Marks a region where `stage` is read but no longer written.
    Consume { stage: String, body: Box<Stmt> },
    /// `let name = value` scoped over `body`.
    Let {
        name: String,
        value: Expr,
        body: Box<Stmt>,
    },
    /// Sequential composition.
    Block(Vec<Stmt>),
    IfThenElse {
        cond: Expr,
        then_case: Box<Stmt>,
        else_case: Option<Box<Stmt>>,
    },
    /// `stage(indices…) = value`.
    Store {
        stage: String,
        indices: Vec<Expr>,
        value: Expr,
    },
    /// Evaluate an expression for effect.
    Evaluate(Expr),
}

// ── Constructors ─────────────────────────────────────────────────────────

impl Stmt {
    pub fn for_(
        kind: LoopKind,
        var: impl Into<String>,
        min: Expr,
        extent: Expr,
        body: Stmt,
    ) -> Stmt {
        Stmt::For {
            var: var.into(),
            min,
            extent,
            kind,
            body: Box::new(body),
        }
    }

    pub fn serial_for(var: impl Into<String>, min: Expr, extent: Expr, body: Stmt) -> Stmt {
        Stmt::for_(LoopKind::Serial, var, min, extent, body)
    }

    pub fn produce(stage: impl Into<String>, body: Stmt) -> Stmt {
        Stmt::Produce {
            stage: stage.into(),
            body: Box::new(body),
        }
    }

    pub fn consume(stage: impl Into<String>, body: Stmt) -> Stmt {
        Stmt::Consume {
            stage: stage.into(),
            body: Box::new(body),
        }
    }

    pub fn let_(name: impl Into<String>, value: Expr, body: Stmt) -> Stmt {
        Stmt::Let {
            name: name.into(),
            value,
            body: Box::new(body),
        }
    }

    pub fn seq(stmts: Vec<Stmt>) -> Stmt {
        Stmt::Block(stmts)
    }

    pub fn store(stage: impl Into<String>, indices: Vec<Expr>, value: Expr) -> Stmt {
        Stmt::Store {
            stage: stage.into(),
            indices,
            value,
        }
    }
}

// ── Pretty-printer ───────────────────────────────────────────────────────

fn indent(f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        write!(f, "  ")?;
    }
    Ok(())
}

fn print_stmt(s: &Stmt, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    match s {
        Stmt::For {
            var,
            min,
            extent,
            kind,
            body,
        } => {
            indent(f, depth)?;
            let tag = match kind {
                LoopKind::Serial => "",
                LoopKind::Parallel => "<parallel>",
                LoopKind::Vectorized => "<vectorized>",
            };
            writeln!(f, "for{} ({}, {}, {}) {{", tag, var, min, extent)?;
            print_stmt(body, f, depth + 1)?;
            indent(f, depth)?;
            writeln!(f, "}}")
        }
        Stmt::Produce { stage, body } => {
            indent(f, depth)?;
            writeln!(f, "produce {} {{", stage)?;
            print_stmt(body, f, depth + 1)?;
            indent(f, depth)?;
            writeln!(f, "}}")
        }
        Stmt::Consume { stage, body } => {
            indent(f, depth)?;
            writeln!(f, "consume {} {{", stage)?;
            print_stmt(body, f, depth + 1)?;
            indent(f, depth)?;
            writeln!(f, "}}")
        }
        Stmt::Let { name, value, body } => {
            indent(f, depth)?;
            writeln!(f, "let {} = {}", name, value)?;
            print_stmt(body, f, depth)
        }
        Stmt::Block(stmts) => {
            for s in stmts {
                print_stmt(s, f, depth)?;
            }
            Ok(())
        }
        Stmt::IfThenElse {
            cond,
            then_case,
            else_case,
        } => {
            indent(f, depth)?;
            writeln!(f, "if ({}) {{", cond)?;
            print_stmt(then_case, f, depth + 1)?;
            indent(f, depth)?;
            if let Some(else_case) = else_case {
                writeln!(f, "}} else {{")?;
                print_stmt(else_case, f, depth + 1)?;
                indent(f, depth)?;
            }
            writeln!(f, "}}")
        }
        Stmt::Store {
            stage,
            indices,
            value,
        } => {
            indent(f, depth)?;
            write!(f, "{}(", stage)?;
            for (i, idx) in indices.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", idx)?;
            }
            writeln!(f, ") = {}", value)
        }
        Stmt::Evaluate(e) => {
            indent(f, depth)?;
            writeln!(f, "{}", e)
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        print_stmt(self, f, 0)
    }
}

// ── Fingerprint ──────────────────────────────────────────────────────────

/// SHA-256 of the printed program. Identical inputs yield byte-identical
/// lowered programs, so this hash is a valid pipeline-level cache key.
pub fn fingerprint(s: &Stmt) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(s.to_string().as_bytes());
    hasher.finalize().into()
}

/// Hex string of a program fingerprint (64 characters).
pub fn fingerprint_hex(s: &Stmt) -> String {
    let bytes = fingerprint(s);
    let mut out = String::with_capacity(64);
    for b in bytes {
        use fmt::Write;
        write!(out, "{:02x}", b).expect("write to String cannot fail");
    }
    out
}

// ── Tests ────────────────────────────────────────────────────────────────
