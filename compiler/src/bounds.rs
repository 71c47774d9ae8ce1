// bounds.rs — Bounds propagation driver
//
// Walks the realization order in reverse (consumers first) and computes
// each stage's realized region from the demand of its already-resolved
// consumers, the declared bounds, and — for reductions — its own reads.
// Fused-group members are deferred and reconciled together once the whole
// group has been visited. The finalized regions are handed to the injector,
// which binds every symbolic `<stage>.<dim>.{min,max,extent}` placeholder
// to a concrete value definition.
//
// Preconditions: the program's loop structure is already scheduled; the
//   environment, realization order, fused groups and bound overrides all
//   describe the same pipeline.
// Postconditions: the returned program is the input with placeholder
//   definitions injected; reruns on equal inputs are byte-identical.
// Failure modes: unresolved names, a realization order that is not a valid
//   topological order of the stage graph, declared bounds narrower than the
//   inferred requirement, inconsistent fused groups, unbounded regions.
// Side effects: none.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::diag::{codes, Diagnostic};
use crate::expr::Expr;
use crate::fuse;
use crate::inject;
use crate::interval::{Interval, Scope};
use crate::region::{required_region, Region};
use crate::stage::{placeholder, BoundsMap, Environment, FusedGroup, Stage};
use crate::stmt::Stmt;
use crate::target::Target;

// ── Entry points ─────────────────────────────────────────────────────────

/// Run the full pass: infer every stage's realized region, then inject a
/// definition for each bound placeholder the program references.
#[allow(clippy::too_many_arguments)]
pub fn bounds_inference(
    program: &Stmt,
    outputs: &[String],
    realization_order: &[String],
    fused_groups: &[FusedGroup],
    env: &Environment,
    func_bounds: &BoundsMap,
    target: &Target,
) -> Result<Stmt, Diagnostic> {
    let regions = infer_regions(
        program,
        outputs,
        realization_order,
        fused_groups,
        env,
        func_bounds,
    )?;
    inject::inject_bounds(program, realization_order, env, &regions, target)
}

/// Inference only: the finalized per-stage regions, without rewriting the
/// program. Every stage in the realization order gets an entry.
pub fn infer_regions(
    program: &Stmt,
    outputs: &[String],
    realization_order: &[String],
    fused_groups: &[FusedGroup],
    env: &Environment,
    func_bounds: &BoundsMap,
) -> Result<HashMap<String, Region>, Diagnostic> {
    let (sites, calls) = collect_sites(program)?;
    let mut engine = InferenceEngine {
        outputs,
        order: realization_order,
        groups: fused_groups,
        env,
        bounds: func_bounds,
        sites,
        finalized: HashMap::new(),
        pending: HashMap::new(),
        resolved: Vec::new(),
    };
    engine.validate(&calls)?;
    engine.run()?;
    Ok(engine.finalized)
}

// ── Program shape ────────────────────────────────────────────────────────

/// One `produce` node: its body, the loop variables enclosing it (kept
/// symbolic during region analysis so the stage's region can be a function
/// of them), and the stages its body directly calls.
struct ProduceSite {
    body: Stmt,
    enclosing_loops: HashSet<String>,
    callees: BTreeSet<String>,
}

fn collect_sites(
    program: &Stmt,
) -> Result<(HashMap<String, ProduceSite>, BTreeSet<String>), Diagnostic> {
    let mut sites = HashMap::new();
    let mut calls = BTreeSet::new();
    let mut loops = Vec::new();
    walk_program(program, &mut loops, &mut sites, &mut calls)?;
    Ok((sites, calls))
}

fn walk_program(
    s: &Stmt,
    loops: &mut Vec<String>,
    sites: &mut HashMap<String, ProduceSite>,
    calls: &mut BTreeSet<String>,
) -> Result<(), Diagnostic> {
    match s {
        Stmt::For {
            var,
            min,
            extent,
            body,
            ..
        } => {
            calls_in_expr(min, calls);
            calls_in_expr(extent, calls);
            loops.push(var.clone());
            walk_program(body, loops, sites, calls)?;
            loops.pop();
            Ok(())
        }
        Stmt::Produce { stage, body } => {
            if sites.contains_key(stage) {
                return Err(Diagnostic::error(format!(
                    "stage '{}' is produced at more than one site",
                    stage
                ))
                .with_code(codes::UNRESOLVED_REFERENCE)
                .with_stage(stage.clone()));
            }
            let site = ProduceSite {
                body: (**body).clone(),
                enclosing_loops: loops.iter().cloned().collect(),
                callees: direct_calls(body),
            };
            sites.insert(stage.clone(), site);
            walk_program(body, loops, sites, calls)
        }
        Stmt::Consume { body, .. } => walk_program(body, loops, sites, calls),
        Stmt::Let { value, body, .. } => {
            calls_in_expr(value, calls);
            walk_program(body, loops, sites, calls)
        }
        Stmt::Block(stmts) => {
            for s in stmts {
                walk_program(s, loops, sites, calls)?;
            }
            Ok(())
        }
        Stmt::IfThenElse {
            cond,
            then_case,
            else_case,
        } => {
            calls_in_expr(cond, calls);
            walk_program(then_case, loops, sites, calls)?;
            if let Some(else_case) = else_case {
                walk_program(else_case, loops, sites, calls)?;
            }
            Ok(())
        }
        Stmt::Store { indices, value, .. } => {
            for idx in indices {
                calls_in_expr(idx, calls);
            }
            calls_in_expr(value, calls);
            Ok(())
        }
        Stmt::Evaluate(e) => {
            calls_in_expr(e, calls);
            Ok(())
        }
    }
}

/// Call targets of a produce body, excluding anything under a nested
/// produce — those reads belong to the nested stage.
fn direct_calls(s: &Stmt) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_direct_calls(s, &mut out);
    out
}

fn collect_direct_calls(s: &Stmt, out: &mut BTreeSet<String>) {
    match s {
        Stmt::For {
            min, extent, body, ..
        } => {
            calls_in_expr(min, out);
            calls_in_expr(extent, out);
            collect_direct_calls(body, out);
        }
        Stmt::Produce { .. } => {}
        Stmt::Consume { body, .. } => collect_direct_calls(body, out),
        Stmt::Let { value, body, .. } => {
            calls_in_expr(value, out);
            collect_direct_calls(body, out);
        }
        Stmt::Block(stmts) => {
            for s in stmts {
                collect_direct_calls(s, out);
            }
        }
        Stmt::IfThenElse {
            cond,
            then_case,
            else_case,
        } => {
            calls_in_expr(cond, out);
            collect_direct_calls(then_case, out);
            if let Some(else_case) = else_case {
                collect_direct_calls(else_case, out);
            }
        }
        Stmt::Store { indices, value, .. } => {
            for idx in indices {
                calls_in_expr(idx, out);
            }
            calls_in_expr(value, out);
        }
        Stmt::Evaluate(e) => calls_in_expr(e, out),
    }
}

fn calls_in_expr(e: &Expr, out: &mut BTreeSet<String>) {
    match e {
        Expr::IntImm(_) | Expr::Var(_) => {}
        Expr::Add(a, b)
        | Expr::Sub(a, b)
        | Expr::Mul(a, b)
        | Expr::Div(a, b)
        | Expr::Min(a, b)
        | Expr::Max(a, b)
        | Expr::Cmp(_, a, b) => {
            calls_in_expr(a, out);
            calls_in_expr(b, out);
        }
        Expr::Select(c, t, f) => {
            calls_in_expr(c, out);
            calls_in_expr(t, out);
            calls_in_expr(f, out);
        }
        Expr::Call { stage, args } => {
            out.insert(stage.clone());
            for arg in args {
                calls_in_expr(arg, out);
            }
        }
    }
}

// ── Engine ───────────────────────────────────────────────────────────────

struct InferenceEngine<'a> {
    outputs: &'a [String],
    order: &'a [String],
    groups: &'a [FusedGroup],
    env: &'a Environment,
    bounds: &'a BoundsMap,
    sites: HashMap<String, ProduceSite>,
    /// Stages whose region is settled; drives the placeholder scope.
    finalized: HashMap<String, Region>,
    /// Fused-group members awaiting reconciliation.
    pending: HashMap<String, Region>,
    /// Names in processing order (reverse realization order); consumers of
    /// the current stage are found here, which keeps demand-union order
    /// deterministic.
    resolved: Vec<String>,
}

impl<'a> InferenceEngine<'a> {
    fn stage(&self, name: &str) -> Result<&'a Stage, Diagnostic> {
        self.env.get(name).ok_or_else(|| {
            Diagnostic::error(format!("unknown stage '{}'", name))
                .with_code(codes::UNRESOLVED_REFERENCE)
                .with_stage(name.to_string())
        })
    }

    fn validate(&self, calls: &BTreeSet<String>) -> Result<(), Diagnostic> {
        for target in calls {
            if !self.env.contains(target) {
                return Err(Diagnostic::error(format!(
                    "call targets unknown stage '{}'",
                    target
                ))
                .with_code(codes::UNRESOLVED_REFERENCE)
                .with_stage(target.clone()));
            }
        }

        let mut seen = HashSet::new();
        for name in self.order {
            let stage = self.stage(name)?;
            if !seen.insert(name.as_str()) {
                return Err(Diagnostic::error(format!(
                    "realization order lists '{}' more than once",
                    name
                ))
                .with_code(codes::INVALID_REALIZATION_ORDER)
                .with_stage(name.clone()));
            }
            if !stage.is_external && !self.sites.contains_key(name.as_str()) {
                return Err(Diagnostic::error(format!(
                    "stage '{}' has no produce site in the program",
                    name
                ))
                .with_code(codes::UNRESOLVED_REFERENCE)
                .with_stage(name.clone()));
            }
            if stage.is_external && self.sites.contains_key(name.as_str()) {
                return Err(Diagnostic::error(format!(
                    "external stage '{}' has a produce site",
                    name
                ))
                .with_code(codes::UNRESOLVED_REFERENCE)
                .with_stage(name.clone()));
            }
        }

        let mut produced: Vec<&str> = self.sites.keys().map(|s| s.as_str()).collect();
        produced.sort_unstable();
        for name in produced {
            if !self.env.contains(name) {
                return Err(Diagnostic::error(format!(
                    "produce marker references unknown stage '{}'",
                    name
                ))
                .with_code(codes::UNRESOLVED_REFERENCE)
                .with_stage(name.to_string()));
            }
            if !self.order.iter().any(|n| n == name) {
                return Err(Diagnostic::error(format!(
                    "realization order omits produced stage '{}'",
                    name
                ))
                .with_code(codes::INVALID_REALIZATION_ORDER)
                .with_stage(name.to_string()));
            }
        }

        for out in self.outputs {
            let stage = self.stage(out)?;
            if stage.is_external {
                return Err(Diagnostic::error(format!(
                    "pipeline output '{}' is an external stage",
                    out
                ))
                .with_code(codes::UNRESOLVED_REFERENCE)
                .with_stage(out.clone()));
            }
            if !self.order.contains(out) {
                return Err(Diagnostic::error(format!(
                    "realization order omits pipeline output '{}'",
                    out
                ))
                .with_code(codes::INVALID_REALIZATION_ORDER)
                .with_stage(out.clone()));
            }
        }

        // Producers must precede their consumers.
        let pos: HashMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();
        for name in self.order {
            let Some(site) = self.sites.get(name.as_str()) else {
                continue;
            };
            for callee in &site.callees {
                if callee == name {
                    continue;
                }
                match pos.get(callee.as_str()) {
                    None => {
                        return Err(Diagnostic::error(format!(
                            "realization order omits stage '{}', required by '{}'",
                            callee, name
                        ))
                        .with_code(codes::INVALID_REALIZATION_ORDER)
                        .with_stage(callee.clone()));
                    }
                    Some(p) if *p >= pos[name.as_str()] => {
                        return Err(Diagnostic::error(format!(
                            "'{}' must be realized before its consumer '{}'",
                            callee, name
                        ))
                        .with_code(codes::INVALID_REALIZATION_ORDER)
                        .with_stage(callee.clone()));
                    }
                    _ => {}
                }
            }
        }

        // The order is restricted to stages the outputs actually use.
        let mut reachable: HashSet<&str> = self.outputs.iter().map(|s| s.as_str()).collect();
        let mut work: Vec<&str> = reachable.iter().copied().collect();
        while let Some(s) = work.pop() {
            if let Some(site) = self.sites.get(s) {
                for callee in &site.callees {
                    if reachable.insert(callee.as_str()) {
                        work.push(callee.as_str());
                    }
                }
            }
        }
        for name in self.order {
            if !reachable.contains(name.as_str()) {
                return Err(Diagnostic::error(format!(
                    "stage '{}' is not used by any pipeline output",
                    name
                ))
                .with_code(codes::INVALID_REALIZATION_ORDER)
                .with_stage(name.clone()));
            }
        }

        fuse::validate_groups(self.groups, self.order)?;
        let mut members = HashSet::new();
        for group in self.groups {
            for member in &group.members {
                if !members.insert(member.as_str()) {
                    return Err(Diagnostic::error(format!(
                        "stage '{}' belongs to more than one fused group",
                        member
                    ))
                    .with_code(codes::INCONSISTENT_FUSED_GROUP)
                    .with_group(group.name.clone())
                    .with_stage(member.clone()));
                }
            }
        }
        Ok(())
    }

    fn run(&mut self) -> Result<(), Diagnostic> {
        let order = self.order;
        for name in order.iter().rev() {
            let region = self.infer_stage(name)?;
            if self.groups.iter().any(|g| g.members.contains(name)) {
                self.pending.insert(name.clone(), region);
                self.reconcile_if_complete(name)?;
            } else {
                let region = self.check_bounded(name, region)?;
                self.finalized.insert(name.clone(), region);
            }
            self.resolved.push(name.clone());
        }
        debug_assert!(self.pending.is_empty(), "all groups reconciled");
        Ok(())
    }

    /// Realized region of one stage: union of consumer demand, with
    /// declared bounds replacing the inferred requirement per dimension,
    /// then one self-read expansion step for reductions.
    fn infer_stage(&self, name: &str) -> Result<Region, Diagnostic> {
        let stage = self.stage(name)?;
        let free: HashSet<String> = self
            .sites
            .get(name)
            .map(|s| s.enclosing_loops.clone())
            .unwrap_or_default();

        let mut demand: Option<Region> = None;
        let mut scope = self.placeholder_scope();
        for consumer in &self.resolved {
            if consumer == name {
                continue;
            }
            let Some(site) = self.sites.get(consumer.as_str()) else {
                continue;
            };
            if !site.callees.contains(name) {
                continue;
            }
            if let Some(req) = required_region(&site.body, stage, &mut scope, &free)? {
                match &mut demand {
                    Some(d) => d.union_with(&req),
                    None => demand = Some(req),
                }
            }
        }

        // Declared bounds are authoritative: after the static containment
        // check they replace the inferred requirement outright.
        let mut intervals = Vec::with_capacity(stage.dims.len());
        for (i, dim) in stage.dims.iter().enumerate() {
            let declared = self.bounds.get(name, i).or_else(|| stage.hint(i));
            let inferred = demand.as_ref().map(|d| d.get(i));
            let chosen = match (declared, inferred) {
                (Some(declared), Some(inferred)) => {
                    if declared.provably_fails_to_contain(inferred) {
                        return Err(Diagnostic::error(format!(
                            "declared bound on '{}.{}' does not cover the inferred requirement",
                            name, dim
                        ))
                        .with_code(codes::BOUNDS_VIOLATION)
                        .with_stage(name.to_string())
                        .with_dim(dim.clone()));
                    }
                    declared.clone()
                }
                (Some(declared), None) => declared.clone(),
                (None, Some(inferred)) => inferred.clone(),
                (None, None) => {
                    return Err(Diagnostic::error(format!(
                        "no consumer constrains '{}.{}' and no bound is declared",
                        name, dim
                    ))
                    .with_code(codes::UNSATISFIABLE_BOUND)
                    .with_stage(name.to_string())
                    .with_dim(dim.clone()));
                }
            };
            intervals.push(chosen);
        }
        let mut region = Region::for_stage(stage, intervals);

        // A stage that reads itself is a recurrence. Its reads happen
        // inside the loop nest driven by these same placeholders, so
        // widening the region here would move the loop start and re-create
        // the out-of-domain read one step further out; the requirement has
        // no bounded fixed point. Self-reads must stay inside the
        // iteration domain.
        if let Some(site) = self.sites.get(name) {
            if site.callees.contains(name) {
                let mut scope = self.placeholder_scope();
                push_placeholders(&mut scope, name, stage, &region);
                if let Some(self_reads) = required_region(&site.body, stage, &mut scope, &free)? {
                    for (i, dim) in stage.dims.iter().enumerate() {
                        if &region.get(i).union(self_reads.get(i)) != region.get(i) {
                            return Err(Diagnostic::error(format!(
                                "stage '{}' reads itself outside its own iteration domain",
                                name
                            ))
                            .with_code(codes::UNBOUNDED_REGION)
                            .with_stage(name.to_string())
                            .with_dim(dim.clone())
                            .with_hint(
                                "clamp the self-read index to the stage's realized bounds",
                            ));
                        }
                    }
                }
            }
        }
        Ok(region)
    }

    fn reconcile_if_complete(&mut self, name: &str) -> Result<(), Diagnostic> {
        let Some(group) = self.groups.iter().find(|g| g.members.iter().any(|m| m == name))
        else {
            return Ok(());
        };
        if !group.members.iter().all(|m| self.pending.contains_key(m)) {
            return Ok(());
        }
        fuse::reconcile_group(group, self.env, self.bounds, &mut self.pending)?;
        for member in &group.members {
            let region = self.pending.remove(member).ok_or_else(|| {
                Diagnostic::error(format!(
                    "fused group member '{}' lost its region during reconciliation",
                    member
                ))
                .with_code(codes::MISSING_REGION)
                .with_group(group.name.clone())
                .with_stage(member.clone())
            })?;
            let region = self.check_bounded(member, region)?;
            self.finalized.insert(member.clone(), region);
        }
        Ok(())
    }

    /// Finalized regions must have both endpoints on every dimension; a
    /// region with an unbounded side cannot be injected.
    fn check_bounded(&self, name: &str, region: Region) -> Result<Region, Diagnostic> {
        let stage = self.stage(name)?;
        for (i, interval) in region.iter().enumerate() {
            if !interval.is_bounded() {
                let dim = &stage.dims[i];
                let diag = if stage.is_external {
                    Diagnostic::error(format!(
                        "required region of external stage '{}' is unbounded in dimension '{}'",
                        name, dim
                    ))
                    .with_code(codes::UNSATISFIABLE_BOUND)
                    .with_hint("declare explicit bounds for the external stage")
                } else {
                    Diagnostic::error(format!(
                        "inferred requirement for '{}' is unbounded in dimension '{}'",
                        name, dim
                    ))
                    .with_code(codes::UNBOUNDED_REGION)
                    .with_hint("clamp the index expression or declare an explicit bound")
                };
                return Err(diag.with_stage(name.to_string()).with_dim(dim.clone()));
            }
        }
        Ok(region)
    }

    /// Scope binding every settled stage's placeholders to point intervals,
    /// built in realization order.
    fn placeholder_scope(&self) -> Scope {
        let mut scope = Scope::new();
        for name in self.order {
            let Some(region) = self
                .finalized
                .get(name.as_str())
                .or_else(|| self.pending.get(name.as_str()))
            else {
                continue;
            };
            let Some(stage) = self.env.get(name) else {
                continue;
            };
            push_placeholders(&mut scope, name, stage, region);
        }
        scope
    }
}

/// Bind `<name>.<dim>.{min,max,extent}` for every bounded dimension of
/// `region`. Unbounded dimensions stay symbolic; they are rejected later by
/// the bounded-region check.
fn push_placeholders(scope: &mut Scope, name: &str, stage: &Stage, region: &Region) {
    for (i, interval) in region.iter().enumerate() {
        let (Some(min), Some(max)) = (&interval.min, &interval.max) else {
            continue;
        };
        let dim = &stage.dims[i];
        scope.push(placeholder::min_name(name, dim), Interval::point(min.clone()));
        scope.push(placeholder::max_name(name, dim), Interval::point(max.clone()));
        let extent = Expr::add(Expr::sub(max.clone(), min.clone()), Expr::int(1));
        scope.push(placeholder::extent_name(name, dim), Interval::point(extent));
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Stage;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn stencil_body(stage: &str, input: &str) -> Stmt {
        let x = format!("{}.x", stage);
        Stmt::serial_for(
            x.clone(),
            Expr::var(format!("{}.x.min", stage)),
            Expr::var(format!("{}.x.extent", stage)),
            Stmt::store(
                stage,
                vec![Expr::var(x.clone())],
                Expr::add(
                    Expr::call(input, vec![Expr::sub(Expr::var(x.clone()), Expr::int(1))]),
                    Expr::call(input, vec![Expr::add(Expr::var(x), Expr::int(1))]),
                ),
            ),
        )
    }

    fn chain_program() -> Stmt {
        Stmt::produce("blur", stencil_body("blur", "in"))
    }

    fn chain_env() -> Environment {
        [Stage::external("in", &["x"]), Stage::new("blur", &["x"])]
            .into_iter()
            .collect()
    }

    fn output_bounds(stage: &str, lo: i64, hi: i64) -> BoundsMap {
        let mut bounds = BoundsMap::new();
        bounds.insert(stage, 0, Interval::constant(lo, hi));
        bounds
    }

    #[test]
    fn stencil_chain_regions() {
        let regions = infer_regions(
            &chain_program(),
            &names(&["blur"]),
            &names(&["in", "blur"]),
            &[],
            &chain_env(),
            &output_bounds("blur", 0, 99),
        )
        .unwrap();
        assert_eq!(regions["blur"].get(0), &Interval::constant(0, 99));
        assert_eq!(regions["in"].get(0), &Interval::constant(-1, 100));
    }

    #[test]
    fn consumer_before_producer_is_rejected() {
        let err = infer_regions(
            &chain_program(),
            &names(&["blur"]),
            &names(&["blur", "in"]),
            &[],
            &chain_env(),
            &output_bounds("blur", 0, 99),
        )
        .unwrap_err();
        assert_eq!(err.code, Some(codes::INVALID_REALIZATION_ORDER));
        assert_eq!(err.stage.as_deref(), Some("in"));
    }

    #[test]
    fn narrow_declared_bound_is_a_violation() {
        // g reads f over [0, 99] but f declares [0, 50].
        let program = Stmt::seq(vec![
            Stmt::produce(
                "f",
                Stmt::serial_for(
                    "f.x",
                    Expr::var("f.x.min"),
                    Expr::var("f.x.extent"),
                    Stmt::store(
                        "f",
                        vec![Expr::var("f.x")],
                        Expr::call("in", vec![Expr::var("f.x")]),
                    ),
                ),
            ),
            Stmt::produce(
                "g",
                Stmt::serial_for(
                    "g.x",
                    Expr::var("g.x.min"),
                    Expr::var("g.x.extent"),
                    Stmt::store(
                        "g",
                        vec![Expr::var("g.x")],
                        Expr::call("f", vec![Expr::var("g.x")]),
                    ),
                ),
            ),
        ]);
        let env: Environment = [
            Stage::external("in", &["x"]),
            Stage::new("f", &["x"]),
            Stage::new("g", &["x"]),
        ]
        .into_iter()
        .collect();
        let mut bounds = output_bounds("g", 0, 99);
        bounds.insert("f", 0, Interval::constant(0, 50));
        let err = infer_regions(
            &program,
            &names(&["g"]),
            &names(&["in", "f", "g"]),
            &[],
            &env,
            &bounds,
        )
        .unwrap_err();
        assert_eq!(err.code, Some(codes::BOUNDS_VIOLATION));
        assert_eq!(err.stage.as_deref(), Some("f"));
        assert_eq!(err.dim.as_deref(), Some("x"));
    }

    #[test]
    fn output_without_declared_bounds_is_rejected() {
        let err = infer_regions(
            &chain_program(),
            &names(&["blur"]),
            &names(&["in", "blur"]),
            &[],
            &chain_env(),
            &BoundsMap::new(),
        )
        .unwrap_err();
        assert_eq!(err.code, Some(codes::UNSATISFIABLE_BOUND));
        assert_eq!(err.stage.as_deref(), Some("blur"));
    }

    #[test]
    fn unknown_call_target_is_rejected() {
        let program = Stmt::produce("blur", stencil_body("blur", "mystery"));
        let err = infer_regions(
            &program,
            &names(&["blur"]),
            &names(&["blur"]),
            &[],
            &chain_env(),
            &output_bounds("blur", 0, 99),
        )
        .unwrap_err();
        assert_eq!(err.code, Some(codes::UNRESOLVED_REFERENCE));
        assert_eq!(err.stage.as_deref(), Some("mystery"));
    }

    #[test]
    fn stage_hint_fills_in_for_missing_override() {
        let env: Environment = [
            Stage::external("in", &["x"]).with_hint(0, Interval::constant(-8, 207)),
            Stage::new("blur", &["x"]),
        ]
        .into_iter()
        .collect();
        let regions = infer_regions(
            &chain_program(),
            &names(&["blur"]),
            &names(&["in", "blur"]),
            &[],
            &env,
            &output_bounds("blur", 0, 99),
        )
        .unwrap();
        // The declared hint replaces the inferred [-1, 100].
        assert_eq!(regions["in"].get(0), &Interval::constant(-8, 207));
    }

    #[test]
    fn unbounded_external_requirement_is_rejected() {
        // in(x * y) over two loop ranges has no affine image.
        let program = Stmt::produce(
            "out",
            Stmt::serial_for(
                "out.x",
                Expr::int(0),
                Expr::int(10),
                Stmt::serial_for(
                    "out.y",
                    Expr::int(0),
                    Expr::int(10),
                    Stmt::store(
                        "out",
                        vec![Expr::var("out.x"), Expr::var("out.y")],
                        Expr::call(
                            "in",
                            vec![Expr::mul(Expr::var("out.x"), Expr::var("out.y"))],
                        ),
                    ),
                ),
            ),
        );
        let env: Environment = [
            Stage::external("in", &["x"]),
            Stage::new("out", &["x", "y"]),
        ]
        .into_iter()
        .collect();
        let mut bounds = BoundsMap::new();
        bounds.insert("out", 0, Interval::constant(0, 9));
        bounds.insert("out", 1, Interval::constant(0, 9));
        let err = infer_regions(
            &program,
            &names(&["out"]),
            &names(&["in", "out"]),
            &[],
            &env,
            &bounds,
        )
        .unwrap_err();
        assert_eq!(err.code, Some(codes::UNSATISFIABLE_BOUND));
        assert_eq!(err.stage.as_deref(), Some("in"));
    }

    fn recurrence_program(self_index: Expr) -> Stmt {
        Stmt::produce(
            "f",
            Stmt::serial_for(
                "f.x",
                Expr::var("f.x.min"),
                Expr::var("f.x.extent"),
                Stmt::store("f", vec![Expr::var("f.x")], Expr::call("f", vec![self_index])),
            ),
        )
    }

    #[test]
    fn out_of_domain_self_read_is_rejected() {
        // f(x) = f(x - 1) over [0, 9]: iteration x = 0 reads f(-1), below
        // the realized min; widening the min only moves the read with it.
        let program = recurrence_program(Expr::sub(Expr::var("f.x"), Expr::int(1)));
        let env: Environment = [Stage::new("f", &["x"])].into_iter().collect();
        let err = infer_regions(
            &program,
            &names(&["f"]),
            &names(&["f"]),
            &[],
            &env,
            &output_bounds("f", 0, 9),
        )
        .unwrap_err();
        assert_eq!(err.code, Some(codes::UNBOUNDED_REGION));
        assert_eq!(err.stage.as_deref(), Some("f"));
        assert_eq!(err.dim.as_deref(), Some("x"));
    }

    #[test]
    fn in_domain_self_read_is_allowed() {
        // f(x) = f(x) never leaves the iteration domain.
        let program = recurrence_program(Expr::var("f.x"));
        let env: Environment = [Stage::new("f", &["x"])].into_iter().collect();
        let regions = infer_regions(
            &program,
            &names(&["f"]),
            &names(&["f"]),
            &[],
            &env,
            &output_bounds("f", 0, 9),
        )
        .unwrap();
        assert_eq!(regions["f"].get(0), &Interval::constant(0, 9));
    }

    #[test]
    fn fused_members_agree_on_shared_dims() {
        // c reads a(x) and b(x + 5); a and b are fused on x.
        let program = Stmt::seq(vec![
            Stmt::produce(
                "a",
                Stmt::serial_for(
                    "a.x",
                    Expr::var("a.x.min"),
                    Expr::var("a.x.extent"),
                    Stmt::store("a", vec![Expr::var("a.x")], Expr::int(1)),
                ),
            ),
            Stmt::produce(
                "b",
                Stmt::serial_for(
                    "b.x",
                    Expr::var("b.x.min"),
                    Expr::var("b.x.extent"),
                    Stmt::store("b", vec![Expr::var("b.x")], Expr::int(2)),
                ),
            ),
            Stmt::produce(
                "c",
                Stmt::serial_for(
                    "c.x",
                    Expr::var("c.x.min"),
                    Expr::var("c.x.extent"),
                    Stmt::store(
                        "c",
                        vec![Expr::var("c.x")],
                        Expr::add(
                            Expr::call("a", vec![Expr::var("c.x")]),
                            Expr::call("b", vec![Expr::add(Expr::var("c.x"), Expr::int(5))]),
                        ),
                    ),
                ),
            ),
        ]);
        let env: Environment = [
            Stage::new("a", &["x"]),
            Stage::new("b", &["x"]),
            Stage::new("c", &["x"]),
        ]
        .into_iter()
        .collect();
        let groups = [FusedGroup {
            name: "ab".to_string(),
            members: names(&["a", "b"]),
            shared_dims: names(&["x"]),
        }];
        let regions = infer_regions(
            &program,
            &names(&["c"]),
            &names(&["a", "b", "c"]),
            &groups,
            &env,
            &output_bounds("c", 0, 99),
        )
        .unwrap();
        assert_eq!(regions["a"].get(0), &Interval::constant(0, 104));
        assert_eq!(regions["b"].get(0), &Interval::constant(0, 104));
        assert_eq!(regions["c"].get(0), &Interval::constant(0, 99));
    }

    #[test]
    fn stage_unused_by_outputs_is_rejected() {
        let program = Stmt::seq(vec![
            chain_program(),
            Stmt::produce(
                "d",
                Stmt::serial_for(
                    "d.x",
                    Expr::var("d.x.min"),
                    Expr::var("d.x.extent"),
                    Stmt::store(
                        "d",
                        vec![Expr::var("d.x")],
                        Expr::call("in", vec![Expr::var("d.x")]),
                    ),
                ),
            ),
        ]);
        let env: Environment = [
            Stage::external("in", &["x"]),
            Stage::new("blur", &["x"]),
            Stage::new("d", &["x"]),
        ]
        .into_iter()
        .collect();
        let err = infer_regions(
            &program,
            &names(&["blur"]),
            &names(&["in", "d", "blur"]),
            &[],
            &env,
            &output_bounds("blur", 0, 99),
        )
        .unwrap_err();
        assert_eq!(err.code, Some(codes::INVALID_REALIZATION_ORDER));
        assert_eq!(err.stage.as_deref(), Some("d"));
    }

    #[test]
    fn producer_inside_consumer_loop_gets_loop_relative_bounds() {
        // f is realized per iteration of c.y; its region must be a function
        // of c.y, not the whole column range.
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
                            Stmt::store(
                                "f",
                                vec![Expr::var("f.x")],
                                Expr::call("in", vec![Expr::var("f.x")]),
                            ),
                        ),
                    ),
                    Stmt::store(
                        "c",
                        vec![Expr::var("c.y")],
                        Expr::add(
                            Expr::call("f", vec![Expr::var("c.y")]),
                            Expr::call("f", vec![Expr::add(Expr::var("c.y"), Expr::int(2))]),
                        ),
                    ),
                ]),
            ),
        );
        let env: Environment = [
            Stage::external("in", &["x"]),
            Stage::new("f", &["x"]),
            Stage::new("c", &["y"]),
        ]
        .into_iter()
        .collect();
        let regions = infer_regions(
            &program,
            &names(&["c"]),
            &names(&["in", "f", "c"]),
            &[],
            &env,
            &output_bounds("c", 0, 9),
        )
        .unwrap();
        assert_eq!(regions["f"].get(0).min, Some(Expr::var("c.y")));
        assert_eq!(
            regions["f"].get(0).max,
            Some(Expr::add(Expr::var("c.y"), Expr::int(2)))
        );
    }
}
