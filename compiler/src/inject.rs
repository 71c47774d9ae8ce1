// inject.rs — Bound placeholder definition injection
//
// Rewrites a program so that every referenced
// `<stage>.<dim>.{min,max,extent}` placeholder is dominated by a `let`
// definition carrying its concrete value. Definitions land at the
// innermost point that dominates all uses of the stage's placeholders
// while staying outside that stage's own produce scope; when several
// stages bind at one point, realization order decides nesting. A program
// without placeholders comes back unchanged.
//
// Preconditions: `regions` holds a fully bounded region for every stage in
//   the realization order.
// Postconditions: exactly one definition per referenced placeholder
//   dimension; no placeholder use escapes its definition's scope.
// Failure modes: a placeholder whose stage has no region (stage missing
//   from the realization order).
// Side effects: none.

use std::collections::{BTreeSet, HashMap};

use crate::diag::{codes, Diagnostic};
use crate::expr::{CmpOp, Expr};
use crate::region::Region;
use crate::stage::{placeholder, Environment, Sliding, Stage};
use crate::stmt::Stmt;
use crate::target::Target;

/// Inject placeholder definitions into `program`. See the module header.
pub fn inject_bounds(
    program: &Stmt,
    realization_order: &[String],
    env: &Environment,
    regions: &HashMap<String, Region>,
    target: &Target,
) -> Result<Stmt, Diagnostic> {
    let used = referenced_placeholders(program, env, regions)?;
    let mut plans = Vec::new();
    for name in realization_order {
        let stage = env.get(name).ok_or_else(|| {
            Diagnostic::error(format!("unknown stage '{}'", name))
                .with_code(codes::UNRESOLVED_REFERENCE)
                .with_stage(name.clone())
        })?;
        let Some(region) = regions.get(name.as_str()) else {
            continue;
        };
        if let Some(plan) = build_plan(name, stage, region, &used, target)? {
            plans.push(plan);
        }
    }
    Ok(place(program, plans, env))
}

// ── Use collection ───────────────────────────────────────────────────────

/// Every (stage, dim) whose placeholder is referenced without an enclosing
/// definition. Uses already dominated by a `let` of the same name need no
/// injection, which makes the pass idempotent. A placeholder naming a
/// stage without a region is fatal: no definition could ever be injected
/// for it.
fn referenced_placeholders(
    program: &Stmt,
    env: &Environment,
    regions: &HashMap<String, Region>,
) -> Result<BTreeSet<(String, usize)>, Diagnostic> {
    let mut vars = BTreeSet::new();
    let mut bound = Vec::new();
    collect_unbound_vars(program, &mut bound, &mut vars);
    let mut used = BTreeSet::new();
    for var in &vars {
        if let Some((stage, dim, _)) = placeholder::parse(var, env) {
            if !regions.contains_key(stage) {
                let dim_name = env
                    .get(stage)
                    .map(|s| s.dims[dim].clone())
                    .unwrap_or_default();
                return Err(Diagnostic::error(format!(
                    "placeholder '{}' names a stage missing from the realization order",
                    var
                ))
                .with_code(codes::MISSING_REGION)
                .with_stage(stage.to_string())
                .with_dim(dim_name));
            }
            used.insert((stage.to_string(), dim));
        }
    }
    Ok(used)
}

fn expr_vars(e: &Expr, bound: &[String], out: &mut BTreeSet<String>) {
    let mut vars = BTreeSet::new();
    e.collect_vars(&mut vars);
    for var in vars {
        if !bound.contains(&var) {
            out.insert(var);
        }
    }
}

fn collect_unbound_vars(s: &Stmt, bound: &mut Vec<String>, out: &mut BTreeSet<String>) {
    match s {
        Stmt::For {
            min, extent, body, ..
        } => {
            expr_vars(min, bound, out);
            expr_vars(extent, bound, out);
            collect_unbound_vars(body, bound, out);
        }
        Stmt::Produce { body, .. } | Stmt::Consume { body, .. } => {
            collect_unbound_vars(body, bound, out)
        }
        Stmt::Let { name, value, body } => {
            expr_vars(value, bound, out);
            bound.push(name.clone());
            collect_unbound_vars(body, bound, out);
            bound.pop();
        }
        Stmt::Block(stmts) => {
            for s in stmts {
                collect_unbound_vars(s, bound, out);
            }
        }
        Stmt::IfThenElse {
            cond,
            then_case,
            else_case,
        } => {
            expr_vars(cond, bound, out);
            collect_unbound_vars(then_case, bound, out);
            if let Some(else_case) = else_case {
                collect_unbound_vars(else_case, bound, out);
            }
        }
        Stmt::Store { indices, value, .. } => {
            for idx in indices {
                expr_vars(idx, bound, out);
            }
            expr_vars(value, bound, out);
        }
        Stmt::Evaluate(e) => expr_vars(e, bound, out),
    }
}

fn collect_stmt_vars(s: &Stmt, out: &mut BTreeSet<String>) {
    match s {
        Stmt::For {
            min, extent, body, ..
        } => {
            min.collect_vars(out);
            extent.collect_vars(out);
            collect_stmt_vars(body, out);
        }
        Stmt::Produce { body, .. } | Stmt::Consume { body, .. } => collect_stmt_vars(body, out),
        Stmt::Let { value, body, .. } => {
            value.collect_vars(out);
            collect_stmt_vars(body, out);
        }
        Stmt::Block(stmts) => {
            for s in stmts {
                collect_stmt_vars(s, out);
            }
        }
        Stmt::IfThenElse {
            cond,
            then_case,
            else_case,
        } => {
            cond.collect_vars(out);
            collect_stmt_vars(then_case, out);
            if let Some(else_case) = else_case {
                collect_stmt_vars(else_case, out);
            }
        }
        Stmt::Store { indices, value, .. } => {
            for idx in indices {
                idx.collect_vars(out);
            }
            value.collect_vars(out);
        }
        Stmt::Evaluate(e) => e.collect_vars(out),
    }
}

// ── Binding plans ────────────────────────────────────────────────────────

/// The definitions one stage contributes, in nesting order: for each used
/// dimension, min then max then extent. Extent is defined in terms of the
/// min/max names so the three stay consistent under sliding and padding.
struct Plan {
    stage: String,
    bindings: Vec<(String, Expr)>,
}

fn build_plan(
    name: &str,
    stage: &Stage,
    region: &Region,
    used: &BTreeSet<(String, usize)>,
    target: &Target,
) -> Result<Option<Plan>, Diagnostic> {
    let mut bindings = Vec::new();
    for (i, dim) in stage.dims.iter().enumerate() {
        if !used.contains(&(name.to_string(), i)) {
            continue;
        }
        let interval = region.get(i);
        let (Some(min), Some(max)) = (&interval.min, &interval.max) else {
            return Err(Diagnostic::error(format!(
                "region of '{}' is unbounded in dimension '{}'",
                name, dim
            ))
            .with_code(codes::UNBOUNDED_REGION)
            .with_stage(name.to_string())
            .with_dim(dim.clone()));
        };

        let min_name = placeholder::min_name(name, dim);
        let max_name = placeholder::max_name(name, dim);
        let min_expr = match &stage.schedule.sliding {
            Some(sliding) if sliding.dim == i => sliding_min(sliding, min, max),
            _ => min.clone(),
        };
        let mut extent = Expr::add(
            Expr::sub(Expr::var(max_name.clone()), Expr::var(min_name.clone())),
            Expr::int(1),
        );
        if stage.schedule.vectorized_dims.contains(&i) {
            extent = target.pad_extent(extent);
        }

        bindings.push((min_name, min_expr));
        bindings.push((max_name, max.clone()));
        bindings.push((placeholder::extent_name(name, dim), extent));
    }
    Ok((!bindings.is_empty()).then(|| Plan {
        stage: name.to_string(),
        bindings,
    }))
}

/// Incremental window start: on the warm-up iteration the full lower bound
/// is used; afterwards only the rows past the previous iteration's maximum
/// are new.
fn sliding_min(sliding: &Sliding, min: &Expr, max: &Expr) -> Expr {
    let prev_iter = Expr::sub(Expr::var(sliding.loop_var.clone()), Expr::int(1));
    let prev_max = max.substitute(&sliding.loop_var, &prev_iter);
    Expr::select(
        Expr::cmp(
            CmpOp::Gt,
            Expr::var(sliding.loop_var.clone()),
            sliding.loop_min.clone(),
        ),
        Expr::add(prev_max, Expr::int(1)),
        min.clone(),
    )
}

// ── Placement ────────────────────────────────────────────────────────────

/// Push each plan down to the innermost node that still contains all uses
/// of its stage's placeholders, binding there. A plan never descends into
/// its own stage's produce node, and never past an expression that uses it.
fn place(s: &Stmt, plans: Vec<Plan>, env: &Environment) -> Stmt {
    if plans.is_empty() {
        return s.clone();
    }
    let mut here = Vec::new();
    let rebuilt = match s {
        Stmt::For {
            var,
            min,
            extent,
            kind,
            body,
        } => {
            let mut descend = Vec::new();
            for plan in plans {
                if expr_mentions(min, &plan.stage, env) || expr_mentions(extent, &plan.stage, env)
                {
                    here.push(plan);
                } else {
                    descend.push(plan);
                }
            }
            Stmt::For {
                var: var.clone(),
                min: min.clone(),
                extent: extent.clone(),
                kind: *kind,
                body: Box::new(place(body, descend, env)),
            }
        }
        Stmt::Produce { stage, body } => {
            let mut descend = Vec::new();
            for plan in plans {
                if plan.stage == *stage {
                    here.push(plan);
                } else {
                    descend.push(plan);
                }
            }
            Stmt::Produce {
                stage: stage.clone(),
                body: Box::new(place(body, descend, env)),
            }
        }
        Stmt::Consume { stage, body } => Stmt::Consume {
            stage: stage.clone(),
            body: Box::new(place(body, plans, env)),
        },
        Stmt::Let { name, value, body } => {
            let mut descend = Vec::new();
            for plan in plans {
                if expr_mentions(value, &plan.stage, env) {
                    here.push(plan);
                } else {
                    descend.push(plan);
                }
            }
            Stmt::Let {
                name: name.clone(),
                value: value.clone(),
                body: Box::new(place(body, descend, env)),
            }
        }
        Stmt::Block(stmts) => {
            let mut per_child: Vec<Vec<Plan>> = stmts.iter().map(|_| Vec::new()).collect();
            for plan in plans {
                let hits: Vec<usize> = stmts
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| stmt_mentions(c, &plan.stage, env))
                    .map(|(i, _)| i)
                    .collect();
                match hits.as_slice() {
                    [only] => per_child[*only].push(plan),
                    _ => here.push(plan),
                }
            }
            Stmt::Block(
                stmts
                    .iter()
                    .zip(per_child)
                    .map(|(c, ps)| place(c, ps, env))
                    .collect(),
            )
        }
        Stmt::IfThenElse {
            cond,
            then_case,
            else_case,
        } => {
            let mut then_plans = Vec::new();
            let mut else_plans = Vec::new();
            for plan in plans {
                let in_cond = expr_mentions(cond, &plan.stage, env);
                let in_then = stmt_mentions(then_case, &plan.stage, env);
                let in_else = else_case
                    .as_deref()
                    .is_some_and(|e| stmt_mentions(e, &plan.stage, env));
                match (in_cond, in_then, in_else) {
                    (false, true, false) => then_plans.push(plan),
                    (false, false, true) => else_plans.push(plan),
                    _ => here.push(plan),
                }
            }
            Stmt::IfThenElse {
                cond: cond.clone(),
                then_case: Box::new(place(then_case, then_plans, env)),
                else_case: else_case
                    .as_deref()
                    .map(|e| Box::new(place(e, else_plans, env))),
            }
        }
        Stmt::Store { .. } | Stmt::Evaluate(_) => {
            here = plans;
            s.clone()
        }
    };
    wrap(rebuilt, here)
}

/// Wrap `s` in the plans' definitions; the first plan ends up outermost
/// and each stage's bindings keep their min/max/extent order.
fn wrap(mut s: Stmt, plans: Vec<Plan>) -> Stmt {
    for plan in plans.into_iter().rev() {
        for (name, value) in plan.bindings.into_iter().rev() {
            s = Stmt::let_(name, value, s);
        }
    }
    s
}

fn expr_mentions(e: &Expr, stage: &str, env: &Environment) -> bool {
    let mut vars = BTreeSet::new();
    e.collect_vars(&mut vars);
    vars.iter()
        .any(|v| matches!(placeholder::parse(v, env), Some((s, _, _)) if s == stage))
}

fn stmt_mentions(s: &Stmt, stage: &str, env: &Environment) -> bool {
    let mut vars = BTreeSet::new();
    collect_stmt_vars(s, &mut vars);
    vars.iter()
        .any(|v| matches!(placeholder::parse(v, env), Some((s, _, _)) if s == stage))
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::Interval;
    use crate::stage::{Schedule, Stage};

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn stencil_env() -> Environment {
        [Stage::external("in", &["x"]), Stage::new("blur", &["x"])]
            .into_iter()
            .collect()
    }

    fn stencil_regions() -> HashMap<String, Region> {
        let env = stencil_env();
        let mut regions = HashMap::new();
        regions.insert(
            "blur".to_string(),
            Region::for_stage(env.get("blur").unwrap(), vec![Interval::constant(0, 99)]),
        );
        regions.insert(
            "in".to_string(),
            Region::for_stage(env.get("in").unwrap(), vec![Interval::constant(-1, 100)]),
        );
        regions
    }

    fn stencil_program() -> Stmt {
        Stmt::produce(
            "blur",
            Stmt::serial_for(
                "blur.x",
                Expr::var("blur.x.min"),
                Expr::var("blur.x.extent"),
                Stmt::store(
                    "blur",
                    vec![Expr::var("blur.x")],
                    Expr::call("in", vec![Expr::var("blur.x")]),
                ),
            ),
        )
    }

    #[test]
    fn definitions_wrap_the_produce_node() {
        let lowered = inject_bounds(
            &stencil_program(),
            &names(&["in", "blur"]),
            &stencil_env(),
            &stencil_regions(),
            &Target::host(),
        )
        .unwrap();
        let expected = "\
let blur.x.min = 0
let blur.x.max = 99
let blur.x.extent = ((blur.x.max - blur.x.min) + 1)
produce blur {
  for (blur.x, blur.x.min, blur.x.extent) {
    blur(blur.x) = in(blur.x)
  }
}
";
        assert_eq!(lowered.to_string(), expected);
    }

    #[test]
    fn unbounded_region_cannot_be_injected() {
        let env = stencil_env();
        let mut regions = stencil_regions();
        regions.insert(
            "blur".to_string(),
            Region::for_stage(
                env.get("blur").unwrap(),
                vec![Interval {
                    min: Some(Expr::int(0)),
                    max: None,
                }],
            ),
        );
        let err = inject_bounds(
            &stencil_program(),
            &names(&["in", "blur"]),
            &env,
            &regions,
            &Target::host(),
        )
        .unwrap_err();
        assert_eq!(err.code, Some(codes::UNBOUNDED_REGION));
        assert_eq!(err.stage.as_deref(), Some("blur"));
    }

    #[test]
    fn unreferenced_stages_get_no_definitions() {
        let lowered = inject_bounds(
            &stencil_program(),
            &names(&["in", "blur"]),
            &stencil_env(),
            &stencil_regions(),
            &Target::host(),
        )
        .unwrap();
        // "in" placeholders are never referenced, so no lets for them.
        assert!(!lowered.to_string().contains("in.x.min"));
    }

    #[test]
    fn program_without_placeholders_is_unchanged() {
        let program = Stmt::produce(
            "blur",
            Stmt::serial_for(
                "blur.x",
                Expr::int(0),
                Expr::int(100),
                Stmt::store(
                    "blur",
                    vec![Expr::var("blur.x")],
                    Expr::call("in", vec![Expr::var("blur.x")]),
                ),
            ),
        );
        let lowered = inject_bounds(
            &program,
            &names(&["in", "blur"]),
            &stencil_env(),
            &stencil_regions(),
            &Target::host(),
        )
        .unwrap();
        assert_eq!(lowered, program);
    }

    #[test]
    fn injection_is_idempotent() {
        let once = inject_bounds(
            &stencil_program(),
            &names(&["in", "blur"]),
            &stencil_env(),
            &stencil_regions(),
            &Target::host(),
        )
        .unwrap();
        let twice = inject_bounds(
            &once,
            &names(&["in", "blur"]),
            &stencil_env(),
            &stencil_regions(),
            &Target::host(),
        )
        .unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn placeholder_for_unlisted_stage_is_fatal() {
        let mut regions = stencil_regions();
        regions.remove("blur");
        let err = inject_bounds(
            &stencil_program(),
            &names(&["in"]),
            &stencil_env(),
            &regions,
            &Target::host(),
        )
        .unwrap_err();
        assert_eq!(err.code, Some(codes::MISSING_REGION));
        assert_eq!(err.stage.as_deref(), Some("blur"));
    }

    #[test]
    fn nested_producer_definitions_stay_inside_the_consumer_loop() {
        // f's placeholders are used only inside c's loop, so its lets must
        // land there, wrapping produce f, not at the root.
        let program = Stmt::produce(
            "c",
            Stmt::serial_for(
                "c.y",
                Expr::var("c.y.min"),
                Expr::var("c.y.extent"),
                Stmt::seq(vec![
                    Stmt::produce(
                        "f",
                        Stmt::serial_for(
                            "f.x",
                            Expr::var("f.x.min"),
                            Expr::var("f.x.extent"),
                            Stmt::store("f", vec![Expr::var("f.x")], Expr::int(0)),
                        ),
                    ),
                    Stmt::store("c", vec![Expr::var("c.y")], Expr::call("f", vec![Expr::var("c.y")])),
                ]),
            ),
        );
        let env: Environment = [Stage::new("f", &["x"]), Stage::new("c", &["y"])]
            .into_iter()
            .collect();
        let mut regions = HashMap::new();
        regions.insert(
            "f".to_string(),
            Region::for_stage(
                env.get("f").unwrap(),
                vec![Interval::point(Expr::var("c.y"))],
            ),
        );
        regions.insert(
            "c".to_string(),
            Region::for_stage(env.get("c").unwrap(), vec![Interval::constant(0, 9)]),
        );
        let lowered = inject_bounds(
            &program,
            &names(&["f", "c"]),
            &env,
            &regions,
            &Target::host(),
        )
        .unwrap();
        let text = lowered.to_string();
        // c's definitions are outermost; f's sit inside c's loop.
        assert!(text.starts_with("let c.y.min = 0\n"));
        let loop_pos = text.find("for (c.y").unwrap();
        let f_def_pos = text.find("let f.x.min = c.y").unwrap();
        assert!(f_def_pos > loop_pos);
    }

    #[test]
    fn vectorized_extent_is_padded() {
        let env: Environment = [
            Stage::external("in", &["x"]),
            Stage::new("blur", &["x"]).with_schedule(Schedule {
                vectorized_dims: vec![0],
                sliding: None,
            }),
        ]
        .into_iter()
        .collect();
        let lowered = inject_bounds(
            &stencil_program(),
            &names(&["in", "blur"]),
            &env,
            &stencil_regions(),
            &Target::with_vector_width(8),
        )
        .unwrap();
        assert!(lowered
            .to_string()
            .contains("let blur.x.extent = (((((blur.x.max - blur.x.min) + 1) + 7)/8)*8)"));
    }

    #[test]
    fn sliding_min_is_incremental_past_the_warmup_iteration() {
        let env: Environment = [
            Stage::external("in", &["x"]),
            Stage::new("blur", &["x"]).with_schedule(Schedule {
                vectorized_dims: vec![],
                sliding: Some(Sliding {
                    dim: 0,
                    loop_var: "c.y".to_string(),
                    loop_min: Expr::int(0),
                }),
            }),
        ]
        .into_iter()
        .collect();
        let env_regions = {
            let mut regions = HashMap::new();
            regions.insert(
                "blur".to_string(),
                Region::for_stage(
                    env.get("blur").unwrap(),
                    vec![Interval::new(
                        Expr::var("c.y"),
                        Expr::add(Expr::var("c.y"), Expr::int(2)),
                    )],
                ),
            );
            regions.insert(
                "in".to_string(),
                Region::for_stage(env.get("in").unwrap(), vec![Interval::constant(0, 99)]),
            );
            regions
        };
        let lowered = inject_bounds(
            &stencil_program(),
            &names(&["in", "blur"]),
            &env,
            &env_regions,
            &Target::host(),
        )
        .unwrap();
        // Warm-up iteration realizes [c.y, c.y + 2]; later iterations only
        // the single new row past the previous maximum.
        assert!(lowered
            .to_string()
            .contains("let blur.x.min = select((c.y > 0), (c.y + 2), c.y)"));
    }
}
