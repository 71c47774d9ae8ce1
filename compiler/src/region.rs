// region.rs — Region (box) type and the region-required analyzer
//
// `required_region` answers: what box of a producer stage does a given
// program subtree actually touch? Every call site contributes the interval
// image of its index expressions; the result is the per-dimension union
// across all call sites. Calls under conditionals contribute
// unconditionally — this computes the allocated region, not the executed
// region.
//
// Preconditions: loop variables of the subtree are either bound in the
//   scope or deliberately left symbolic via `free_vars`.
// Postconditions: the returned region is a conservative superset of every
//   element read; `None` means no call to the stage exists in the subtree.
// Failure modes: a call whose arity disagrees with the stage's
//   dimensionality (malformed input program).
// Side effects: none.

use std::collections::HashSet;

use crate::diag::{codes, Diagnostic};
use crate::expr::Expr;
use crate::interval::{bounds_of_expr_in_scope, Interval, Scope};
use crate::stage::Stage;
use crate::stmt::Stmt;

// ── Region ───────────────────────────────────────────────────────────────

/// Per-dimension interval box describing a stage's realized region.
/// Dimensionality always equals the stage's — checked at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    intervals: Vec<Interval>,
}

impl Region {
    /// Build a region for `stage`, asserting the arity invariant.
    pub fn for_stage(stage: &Stage, intervals: Vec<Interval>) -> Region {
        assert_eq!(
            intervals.len(),
            stage.dims.len(),
            "region arity must match stage '{}' dimensionality",
            stage.name
        );
        Region { intervals }
    }

    pub fn dims(&self) -> usize {
        self.intervals.len()
    }

    pub fn get(&self, dim: usize) -> &Interval {
        &self.intervals[dim]
    }

    pub fn set(&mut self, dim: usize, interval: Interval) {
        self.intervals[dim] = interval;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interval> {
        self.intervals.iter()
    }

    /// Per-dimension union with another region of the same arity.
    pub fn union_with(&mut self, other: &Region) {
        debug_assert_eq!(self.intervals.len(), other.intervals.len());
        for (mine, theirs) in self.intervals.iter_mut().zip(&other.intervals) {
            *mine = mine.union(theirs);
        }
    }
}

// ── Region-required analyzer ─────────────────────────────────────────────

/// Union, across every call to `stage` in `subtree`, of the per-dimension
/// intervals implied by the call's index expressions. Enclosing loop
/// variables are resolved through `scope`, except those listed in
/// `free_vars`, which stay symbolic so that a producer realized inside a
/// consumer loop gets bounds expressed in terms of that loop variable.
///
/// Returns `Ok(None)` when no call to `stage` exists in the subtree.
pub fn required_region(
    subtree: &Stmt,
    stage: &Stage,
    scope: &mut Scope,
    free_vars: &HashSet<String>,
) -> Result<Option<Region>, Diagnostic> {
    let mut scanner = RegionScanner {
        stage,
        free_vars,
        demand: None,
    };
    scanner.scan_stmt(subtree, scope)?;
    Ok(scanner.demand)
}

struct RegionScanner<'a> {
    stage: &'a Stage,
    free_vars: &'a HashSet<String>,
    demand: Option<Region>,
}

impl<'a> RegionScanner<'a> {
    fn scan_stmt(&mut self, s: &Stmt, scope: &mut Scope) -> Result<(), Diagnostic> {
        match s {
            Stmt::For {
                var,
                min,
                extent,
                body,
                ..
            } => {
                self.scan_expr(min, scope)?;
                self.scan_expr(extent, scope)?;
                let domain = if self.free_vars.contains(var) {
                    Interval::point(Expr::var(var.clone()))
                } else {
                    loop_domain(min, extent, scope)
                };
                scope.push(var.clone(), domain);
                self.scan_stmt(body, scope)?;
                scope.pop();
                Ok(())
            }
            // Statements under a nested produce belong to that stage, not
            // to the subtree being scanned; that stage's own reads are
            // accounted for when it is processed as a consumer itself.
            Stmt::Produce { .. } => Ok(()),
            Stmt::Consume { body, .. } => self.scan_stmt(body, scope),
            Stmt::Let { name, value, body } => {
                self.scan_expr(value, scope)?;
                let bound = bounds_of_expr_in_scope(value, scope);
                scope.push(name.clone(), bound);
                self.scan_stmt(body, scope)?;
                scope.pop();
                Ok(())
            }
            Stmt::Block(stmts) => {
                for s in stmts {
                    self.scan_stmt(s, scope)?;
                }
                Ok(())
            }
            Stmt::IfThenElse {
                cond,
                then_case,
                else_case,
            } => {
                // Both branches contribute unconditionally.
                self.scan_expr(cond, scope)?;
                self.scan_stmt(then_case, scope)?;
                if let Some(else_case) = else_case {
                    self.scan_stmt(else_case, scope)?;
                }
                Ok(())
            }
            Stmt::Store { indices, value, .. } => {
                for idx in indices {
                    self.scan_expr(idx, scope)?;
                }
                self.scan_expr(value, scope)
            }
            Stmt::Evaluate(e) => self.scan_expr(e, scope),
        }
    }

    fn scan_expr(&mut self, e: &Expr, scope: &mut Scope) -> Result<(), Diagnostic> {
        match e {
            Expr::IntImm(_) | Expr::Var(_) => Ok(()),
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::Div(a, b)
            | Expr::Min(a, b)
            | Expr::Max(a, b)
            | Expr::Cmp(_, a, b) => {
                self.scan_expr(a, scope)?;
                self.scan_expr(b, scope)
            }
            Expr::Select(c, t, f) => {
                self.scan_expr(c, scope)?;
                self.scan_expr(t, scope)?;
                self.scan_expr(f, scope)
            }
            Expr::Call { stage, args } => {
                for arg in args {
                    self.scan_expr(arg, scope)?;
                }
                if stage == &self.stage.name {
                    self.record_call(args, scope)?;
                }
                Ok(())
            }
        }
    }

    fn record_call(&mut self, args: &[Expr], scope: &Scope) -> Result<(), Diagnostic> {
        if args.len() != self.stage.dims.len() {
            return Err(Diagnostic::error(format!(
                "call to '{}' has {} index arguments but the stage has {} dimensions",
                self.stage.name,
                args.len(),
                self.stage.dims.len()
            ))
            .with_code(codes::UNRESOLVED_REFERENCE)
            .with_stage(self.stage.name.clone()));
        }
        let intervals: Vec<Interval> = args
            .iter()
            .map(|arg| bounds_of_expr_in_scope(arg, scope))
            .collect();
        let call_region = Region::for_stage(self.stage, intervals);
        match &mut self.demand {
            Some(demand) => demand.union_with(&call_region),
            None => self.demand = Some(call_region),
        }
        Ok(())
    }
}

/// Realized domain of a loop: `[min, min + extent - 1]` under `scope`.
pub fn loop_domain(min: &Expr, extent: &Expr, scope: &Scope) -> Interval {
    let min_bounds = bounds_of_expr_in_scope(min, scope);
    let last = Expr::add(
        min.clone(),
        Expr::sub(extent.clone(), Expr::int(1)),
    );
    let max_bounds = bounds_of_expr_in_scope(&last, scope);
    Interval {
        min: min_bounds.min,
        max: max_bounds.max,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
