// interval.rs — Symbolic interval algebra
//
// [min, max] pairs over the expression domain, with `None` standing for an
// unbounded endpoint. Static comparisons fold through the expression smart
// constructors; when a comparison is undecidable the result degrades to a
// residual runtime min/max expression rather than failing.
//
// Preconditions: none.
// Postconditions: every operation is conservative — the result interval
//   contains every value the true image can take.
// Failure modes: none (unbounded endpoints, never panics).
// Side effects: none.

use serde::{Deserialize, Serialize};

use crate::expr::Expr;

// ── Interval ─────────────────────────────────────────────────────────────

/// A symbolic closed interval. `None` endpoints are unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub min: Option<Expr>,
    pub max: Option<Expr>,
}

impl Interval {
    pub fn new(min: Expr, max: Expr) -> Interval {
        Interval {
            min: Some(min),
            max: Some(max),
        }
    }

    /// The single-point interval [e, e].
    pub fn point(e: Expr) -> Interval {
        Interval {
            min: Some(e.clone()),
            max: Some(e),
        }
    }

    /// The constant interval [lo, hi].
    pub fn constant(lo: i64, hi: i64) -> Interval {
        Interval::new(Expr::int(lo), Expr::int(hi))
    }

    /// The unbounded interval.
    pub fn everything() -> Interval {
        Interval {
            min: None,
            max: None,
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.min.is_some() && self.max.is_some()
    }

    pub fn is_single_point(&self) -> bool {
        match (&self.min, &self.max) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Smallest enclosing interval of `self` and `other`. Statically
    /// undecidable endpoint comparisons become runtime min/max expressions.
    pub fn union(&self, other: &Interval) -> Interval {
        Interval {
            min: match (&self.min, &other.min) {
                (Some(a), Some(b)) => Some(Expr::min(a.clone(), b.clone())),
                _ => None,
            },
            max: match (&self.max, &other.max) {
                (Some(a), Some(b)) => Some(Expr::max(a.clone(), b.clone())),
                _ => None,
            },
        }
    }

    /// Largest interval contained in both. An unbounded endpoint defers to
    /// the other side's bound.
    pub fn intersect(&self, other: &Interval) -> Interval {
        Interval {
            min: match (&self.min, &other.min) {
                (Some(a), Some(b)) => Some(Expr::max(a.clone(), b.clone())),
                (Some(a), None) => Some(a.clone()),
                (None, b) => b.clone(),
            },
            max: match (&self.max, &other.max) {
                (Some(a), Some(b)) => Some(Expr::min(a.clone(), b.clone())),
                (Some(a), None) => Some(a.clone()),
                (None, b) => b.clone(),
            },
        }
    }

    /// True only when it is statically provable that `self` fails to
    /// contain `other`: a constant endpoint comparison that is violated,
    /// or a bounded side of `self` against an unbounded side of `other`.
    /// Symbolic comparisons are undecidable and return false.
    pub fn provably_fails_to_contain(&self, other: &Interval) -> bool {
        let min_violated = match (&self.min, &other.min) {
            (Some(a), Some(b)) => match (a.as_const(), b.as_const()) {
                (Some(a), Some(b)) => a > b,
                _ => false,
            },
            (Some(_), None) => true,
            (None, _) => false,
        };
        let max_violated = match (&self.max, &other.max) {
            (Some(a), Some(b)) => match (a.as_const(), b.as_const()) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            },
            (Some(_), None) => true,
            (None, _) => false,
        };
        min_violated || max_violated
    }

    /// Translate both endpoints by `offset`.
    pub fn shift(&self, offset: &Expr) -> Interval {
        Interval {
            min: self.min.as_ref().map(|m| Expr::add(m.clone(), offset.clone())),
            max: self.max.as_ref().map(|m| Expr::add(m.clone(), offset.clone())),
        }
    }

    /// Image of `a*x + b` for `x` in `self`; the sign of `a` decides
    /// endpoint orientation.
    pub fn affine_image(&self, a: i64, b: i64) -> Interval {
        let scaled = self.scale(a);
        scaled.shift(&Expr::int(b))
    }

    fn scale(&self, factor: i64) -> Interval {
        let mul = |e: &Expr| Expr::mul(e.clone(), Expr::int(factor));
        if factor >= 0 {
            Interval {
                min: self.min.as_ref().map(mul),
                max: self.max.as_ref().map(mul),
            }
        } else {
            Interval {
                min: self.max.as_ref().map(mul),
                max: self.min.as_ref().map(mul),
            }
        }
    }
}

// ── Scope ────────────────────────────────────────────────────────────────

/// Lexical stack of variable → interval bindings with shadowing.
#[derive(Debug, Default)]
pub struct Scope {
    frames: Vec<(String, Interval)>,
}

impl Scope {
    pub fn new() -> Scope {
        Scope::default()
    }

    pub fn push(&mut self, name: impl Into<String>, interval: Interval) {
        self.frames.push((name.into(), interval));
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    pub fn get(&self, name: &str) -> Option<&Interval> {
        self.frames
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, i)| i)
    }
}

// ── Expression bounds ────────────────────────────────────────────────────

/// Conservative interval of `e` given `scope`. Free variables not in scope
/// are treated as opaque point values (their interval is themselves), which
/// is how bound placeholders of enclosing loops stay symbolic.
pub fn bounds_of_expr_in_scope(e: &Expr, scope: &Scope) -> Interval {
    match e {
        Expr::IntImm(_) => Interval::point(e.clone()),
        Expr::Var(name) => match scope.get(name) {
            Some(interval) => interval.clone(),
            None => Interval::point(e.clone()),
        },
        Expr::Add(a, b) => {
            let ia = bounds_of_expr_in_scope(a, scope);
            let ib = bounds_of_expr_in_scope(b, scope);
            Interval {
                min: lift2(&ia.min, &ib.min, Expr::add),
                max: lift2(&ia.max, &ib.max, Expr::add),
            }
        }
        Expr::Sub(a, b) => {
            let ia = bounds_of_expr_in_scope(a, scope);
            let ib = bounds_of_expr_in_scope(b, scope);
            Interval {
                min: lift2(&ia.min, &ib.max, Expr::sub),
                max: lift2(&ia.max, &ib.min, Expr::sub),
            }
        }
        Expr::Mul(a, b) => {
            let ia = bounds_of_expr_in_scope(a, scope);
            let ib = bounds_of_expr_in_scope(b, scope);
            if let Some(c) = constant_point(&ib) {
                ia.scale(c)
            } else if let Some(c) = constant_point(&ia) {
                ib.scale(c)
            } else if let (Some(pa), Some(pb)) = (single_point(&ia), single_point(&ib)) {
                Interval::point(Expr::mul(pa, pb))
            } else {
                // General symbolic product: no usable static bound.
                Interval::everything()
            }
        }
        Expr::Div(a, b) => {
            let ia = bounds_of_expr_in_scope(a, scope);
            let ib = bounds_of_expr_in_scope(b, scope);
            match constant_point(&ib) {
                Some(c) if c != 0 => {
                    let div = |x: &Expr| Expr::div(x.clone(), Expr::int(c));
                    if c > 0 {
                        Interval {
                            min: ia.min.as_ref().map(div),
                            max: ia.max.as_ref().map(div),
                        }
                    } else {
                        Interval {
                            min: ia.max.as_ref().map(div),
                            max: ia.min.as_ref().map(div),
                        }
                    }
                }
                _ => match (single_point(&ia), single_point(&ib)) {
                    (Some(pa), Some(pb)) => Interval::point(Expr::div(pa, pb)),
                    _ => Interval::everything(),
                },
            }
        }
        Expr::Min(a, b) => {
            let ia = bounds_of_expr_in_scope(a, scope);
            let ib = bounds_of_expr_in_scope(b, scope);
            Interval {
                min: lift2(&ia.min, &ib.min, Expr::min),
                max: smaller_of(&ia.max, &ib.max),
            }
        }
        Expr::Max(a, b) => {
            let ia = bounds_of_expr_in_scope(a, scope);
            let ib = bounds_of_expr_in_scope(b, scope);
            Interval {
                min: larger_of(&ia.min, &ib.min),
                max: lift2(&ia.max, &ib.max, Expr::max),
            }
        }
        Expr::Cmp(..) => Interval::constant(0, 1),
        Expr::Select(_, t, f) => {
            // Allocated region, not executed region: both arms contribute.
            let it = bounds_of_expr_in_scope(t, scope);
            let ie = bounds_of_expr_in_scope(f, scope);
            it.union(&ie)
        }
        Expr::Call { .. } => Interval::everything(),
    }
}

fn lift2(
    a: &Option<Expr>,
    b: &Option<Expr>,
    op: fn(Expr, Expr) -> Expr,
) -> Option<Expr> {
    match (a, b) {
        (Some(x), Some(y)) => Some(op(x.clone(), y.clone())),
        _ => None,
    }
}

/// min over endpoints where `None` means +infinity.
fn smaller_of(a: &Option<Expr>, b: &Option<Expr>) -> Option<Expr> {
    match (a, b) {
        (Some(x), Some(y)) => Some(Expr::min(x.clone(), y.clone())),
        (Some(x), None) => Some(x.clone()),
        (None, y) => y.clone(),
    }
}

/// max over endpoints where `None` means -infinity.
fn larger_of(a: &Option<Expr>, b: &Option<Expr>) -> Option<Expr> {
    match (a, b) {
        (Some(x), Some(y)) => Some(Expr::max(x.clone(), y.clone())),
        (Some(x), None) => Some(x.clone()),
        (None, y) => y.clone(),
    }
}

fn single_point(i: &Interval) -> Option<Expr> {
    match (&i.min, &i.max) {
        (Some(a), Some(b)) if a == b => Some(a.clone()),
        _ => None,
    }
}

fn constant_point(i: &Interval) -> Option<i64> {
    match (&i.min, &i.max) {
        (Some(a), Some(b)) if a == b => a.as_const(),
        _ => None,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
