// expr.rs — Expression IR for pipeline programs
//
// Tagged-variant expression tree over integer-valued index arithmetic.
// Smart constructors constant-fold and apply identities so that statically
// decidable bounds resolve to immediates; undecidable comparisons stay as
// residual min/max expressions for the runtime to settle.
//
// Preconditions: none (types only).
// Postconditions: constructors never panic; division by a zero immediate
//   is left unfolded.
// Failure modes: none.
// Side effects: none.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

// ── Expression tree ──────────────────────────────────────────────────────

/// Comparison operator for `Cmp` nodes. Comparisons evaluate to 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

/// An integer-valued expression in a pipeline program.
///
/// `Call` reads one element of a named stage; everything else is ordinary
/// index arithmetic. Division is Euclidean.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    IntImm(i64),
    Var(String),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Min(Box<Expr>, Box<Expr>),
    Max(Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    Select(Box<Expr>, Box<Expr>, Box<Expr>),
    Call { stage: String, args: Vec<Expr> },
}

// ── Smart constructors ───────────────────────────────────────────────────

impl Expr {
    pub fn int(v: i64) -> Expr {
        Expr::IntImm(v)
    }

    pub fn var(name: impl Into<String>) -> Expr {
        Expr::Var(name.into())
    }

    pub fn call(stage: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Call {
            stage: stage.into(),
            args,
        }
    }

    /// The immediate value, if this expression is a constant.
    pub fn as_const(&self) -> Option<i64> {
        match self {
            Expr::IntImm(v) => Some(*v),
            _ => None,
        }
    }

    pub fn add(a: Expr, b: Expr) -> Expr {
        match (a.as_const(), b.as_const()) {
            (Some(x), Some(y)) => Expr::IntImm(x.wrapping_add(y)),
            (Some(0), _) => b,
            (_, Some(0)) => a,
            (None, Some(k)) => {
                // Normalize ((base ± c) + k) to (base + c').
                let (base, off) = split_offset(&a);
                if off != 0 {
                    let base = base.clone();
                    match off.wrapping_add(k) {
                        0 => base,
                        total => Expr::Add(Box::new(base), Box::new(Expr::IntImm(total))),
                    }
                } else {
                    Expr::Add(Box::new(a), Box::new(b))
                }
            }
            _ => Expr::Add(Box::new(a), Box::new(b)),
        }
    }

    pub fn sub(a: Expr, b: Expr) -> Expr {
        if a == b {
            return Expr::IntImm(0);
        }
        match (a.as_const(), b.as_const()) {
            (Some(x), Some(y)) => Expr::IntImm(x.wrapping_sub(y)),
            (_, Some(0)) => a,
            _ => match constant_offset(&b, &a) {
                // a == b + k, so the difference is the immediate.
                Some(k) => Expr::IntImm(k),
                None => Expr::Sub(Box::new(a), Box::new(b)),
            },
        }
    }

    pub fn mul(a: Expr, b: Expr) -> Expr {
        match (a.as_const(), b.as_const()) {
            (Some(x), Some(y)) => Expr::IntImm(x.wrapping_mul(y)),
            (Some(0), _) | (_, Some(0)) => Expr::IntImm(0),
            (Some(1), _) => b,
            (_, Some(1)) => a,
            _ => Expr::Mul(Box::new(a), Box::new(b)),
        }
    }

    /// Euclidean division. A zero immediate divisor is left unfolded.
    pub fn div(a: Expr, b: Expr) -> Expr {
        match (a.as_const(), b.as_const()) {
            (Some(x), Some(y)) if y != 0 => Expr::IntImm(x.div_euclid(y)),
            (_, Some(1)) => a,
            _ => Expr::Div(Box::new(a), Box::new(b)),
        }
    }

    pub fn min(a: Expr, b: Expr) -> Expr {
        if a == b {
            return a;
        }
        match (a.as_const(), b.as_const()) {
            (Some(x), Some(y)) => Expr::IntImm(x.min(y)),
            _ => match constant_offset(&a, &b) {
                Some(k) if k >= 0 => a,
                Some(_) => b,
                None => Expr::Min(Box::new(a), Box::new(b)),
            },
        }
    }

    pub fn max(a: Expr, b: Expr) -> Expr {
        if a == b {
            return a;
        }
        match (a.as_const(), b.as_const()) {
            (Some(x), Some(y)) => Expr::IntImm(x.max(y)),
            _ => match constant_offset(&a, &b) {
                Some(k) if k >= 0 => b,
                Some(_) => a,
                None => Expr::Max(Box::new(a), Box::new(b)),
            },
        }
    }

    pub fn cmp(op: CmpOp, a: Expr, b: Expr) -> Expr {
        if let (Some(x), Some(y)) = (a.as_const(), b.as_const()) {
            let v = match op {
                CmpOp::Eq => x == y,
                CmpOp::Lt => x < y,
                CmpOp::Le => x <= y,
                CmpOp::Gt => x > y,
                CmpOp::Ge => x >= y,
            };
            return Expr::IntImm(v as i64);
        }
        Expr::Cmp(op, Box::new(a), Box::new(b))
    }

    pub fn select(cond: Expr, then_val: Expr, else_val: Expr) -> Expr {
        if then_val == else_val {
            return then_val;
        }
        match cond.as_const() {
            Some(0) => else_val,
            Some(_) => then_val,
            None => Expr::Select(Box::new(cond), Box::new(then_val), Box::new(else_val)),
        }
    }
}

/// View `base + c` / `base - c` as a (base, offset) pair; anything else is
/// its own base with offset zero.
fn split_offset(e: &Expr) -> (&Expr, i64) {
    match e {
        Expr::Add(x, k) => match &**k {
            Expr::IntImm(k) => (x, *k),
            _ => (e, 0),
        },
        Expr::Sub(x, k) => match &**k {
            Expr::IntImm(k) => (x, -*k),
            _ => (e, 0),
        },
        _ => (e, 0),
    }
}

/// `Some(k)` when `b == a + k` for an immediate `k`. Lets stencil unions
/// like `min(y, y + 2)` and differences like `(y + 2) - y` settle
/// statically.
fn constant_offset(a: &Expr, b: &Expr) -> Option<i64> {
    let (base_a, off_a) = split_offset(a);
    let (base_b, off_b) = split_offset(b);
    (base_a == base_b).then(|| off_b.wrapping_sub(off_a))
}

// ── Traversal helpers ────────────────────────────────────────────────────

impl Expr {
    /// Collect every variable name referenced in this expression.
    pub fn collect_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::IntImm(_) => {}
            Expr::Var(name) => {
                out.insert(name.clone());
            }
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::Div(a, b)
            | Expr::Min(a, b)
            | Expr::Max(a, b)
            | Expr::Cmp(_, a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
            Expr::Select(c, t, e) => {
                c.collect_vars(out);
                t.collect_vars(out);
                e.collect_vars(out);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_vars(out);
                }
            }
        }
    }

    /// Replace every occurrence of `var` with `replacement`, re-folding
    /// through the smart constructors.
    pub fn substitute(&self, var: &str, replacement: &Expr) -> Expr {
        match self {
            Expr::IntImm(_) => self.clone(),
            Expr::Var(name) => {
                if name == var {
                    replacement.clone()
                } else {
                    self.clone()
                }
            }
            Expr::Add(a, b) => Expr::add(a.substitute(var, replacement), b.substitute(var, replacement)),
            Expr::Sub(a, b) => Expr::sub(a.substitute(var, replacement), b.substitute(var, replacement)),
            Expr::Mul(a, b) => Expr::mul(a.substitute(var, replacement), b.substitute(var, replacement)),
            Expr::Div(a, b) => Expr::div(a.substitute(var, replacement), b.substitute(var, replacement)),
            Expr::Min(a, b) => Expr::min(a.substitute(var, replacement), b.substitute(var, replacement)),
            Expr::Max(a, b) => Expr::max(a.substitute(var, replacement), b.substitute(var, replacement)),
            Expr::Cmp(op, a, b) => Expr::cmp(
                *op,
                a.substitute(var, replacement),
                b.substitute(var, replacement),
            ),
            Expr::Select(c, t, e) => Expr::select(
                c.substitute(var, replacement),
                t.substitute(var, replacement),
                e.substitute(var, replacement),
            ),
            Expr::Call { stage, args } => Expr::Call {
                stage: stage.clone(),
                args: args.iter().map(|a| a.substitute(var, replacement)).collect(),
            },
        }
    }
}

// ── Display ──────────────────────────────────────────────────────────────

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::IntImm(v) => write!(f, "{}", v),
            Expr::Var(name) => write!(f, "{}", name),
            Expr::Add(a, b) => write!(f, "({} + {})", a, b),
            Expr::Sub(a, b) => write!(f, "({} - {})", a, b),
            Expr::Mul(a, b) => write!(f, "({}*{})", a, b),
            Expr::Div(a, b) => write!(f, "({}/{})", a, b),
            Expr::Min(a, b) => write!(f, "min({}, {})", a, b),
            Expr::Max(a, b) => write!(f, "max({}, {})", a, b),
            Expr::Cmp(op, a, b) => {
                let sym = match op {
                    CmpOp::Eq => "==",
                    CmpOp::Lt => "<",
                    CmpOp::Le => "<=",
                    CmpOp::Gt => ">",
                    CmpOp::Ge => ">=",
                };
                write!(f, "({} {} {})", a, sym, b)
            }
            Expr::Select(c, t, e) => write!(f, "select({}, {}, {})", c, t, e),
            Expr::Call { stage, args } => {
                write!(f, "{}(", stage)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
