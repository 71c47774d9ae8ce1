// stage.rs — Pipeline stage metadata and the bound placeholder convention
//
// Read-only inputs to the bounds pass: the environment (name → Stage), the
// fused-group declarations, and the known-bounds override map. All of these
// are built by earlier phases and never mutated here.
//
// Preconditions: none (types only).
// Postconditions: none.
// Failure modes: none.
// Side effects: none.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::expr::Expr;
use crate::interval::Interval;

// ── Schedule annotations ─────────────────────────────────────────────────

/// Sliding-window annotation: the named dimension is strip-mined along a
/// serial consumer loop and its realized window grows incrementally across
/// that loop's iterations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sliding {
    /// Index of the sliding dimension in the stage's dim list.
    pub dim: usize,
    /// The serial loop variable the window slides along.
    pub loop_var: String,
    /// That loop's minimum, for the warm-up iteration test.
    pub loop_min: Expr,
}

/// Scheduling decisions this pass consumes but never makes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Dimensions whose extents are padded to the target vector width.
    #[serde(default)]
    pub vectorized_dims: Vec<usize>,
    #[serde(default)]
    pub sliding: Option<Sliding>,
}

// ── Stage ────────────────────────────────────────────────────────────────

/// One named computation unit with fixed dimensionality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    /// Ordered dimension names; the stage's dimensionality is `dims.len()`.
    pub dims: Vec<String>,
    /// External stages have no visible definition; their bounds must be
    /// supplied by callers or declared hints.
    #[serde(default)]
    pub is_external: bool,
    /// Optional per-dimension declared bounds, aligned with `dims` when
    /// non-empty.
    #[serde(default)]
    pub bound_hints: Vec<Option<Interval>>,
    #[serde(default)]
    pub schedule: Schedule,
}

impl Stage {
    pub fn new(name: impl Into<String>, dims: &[&str]) -> Stage {
        Stage {
            name: name.into(),
            dims: dims.iter().map(|d| d.to_string()).collect(),
            is_external: false,
            bound_hints: Vec::new(),
            schedule: Schedule::default(),
        }
    }

    pub fn external(name: impl Into<String>, dims: &[&str]) -> Stage {
        Stage {
            is_external: true,
            ..Stage::new(name, dims)
        }
    }

    pub fn with_hint(mut self, dim: usize, interval: Interval) -> Stage {
        if self.bound_hints.is_empty() {
            self.bound_hints = vec![None; self.dims.len()];
        }
        self.bound_hints[dim] = Some(interval);
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Stage {
        self.schedule = schedule;
        self
    }

    pub fn hint(&self, dim: usize) -> Option<&Interval> {
        self.bound_hints.get(dim).and_then(|h| h.as_ref())
    }

    /// Position of a dimension name in this stage, if present.
    pub fn dim_index(&self, dim_name: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim_name)
    }
}

// ── Environment ──────────────────────────────────────────────────────────

/// Read-only stage-name → Stage lookup table. Never iterated for output,
/// so map ordering cannot leak into the lowered program.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    stages: HashMap<String, Stage>,
}

impl Environment {
    pub fn new() -> Environment {
        Environment::default()
    }

    pub fn insert(&mut self, stage: Stage) {
        self.stages.insert(stage.name.clone(), stage);
    }

    pub fn get(&self, name: &str) -> Option<&Stage> {
        self.stages.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl FromIterator<Stage> for Environment {
    fn from_iter<T: IntoIterator<Item = Stage>>(iter: T) -> Environment {
        let mut env = Environment::new();
        for stage in iter {
            env.insert(stage);
        }
        env
    }
}

// ── Fused groups ─────────────────────────────────────────────────────────

/// Stages sharing one physical loop nest. Members must form a contiguous
/// run of the realization order; dimensions named in `shared_dims` must end
/// up with identical bounds across all members that have them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusedGroup {
    pub name: String,
    pub members: Vec<String>,
    pub shared_dims: Vec<String>,
}

// ── Known-bounds overrides ───────────────────────────────────────────────

/// Externally authoritative bounds, keyed by (stage, dim index). Holds the
/// caller-declared output sizes and any explicit bound declarations; when
/// present, an entry replaces the inferred requirement for that dimension.
#[derive(Debug, Clone, Default)]
pub struct BoundsMap {
    entries: HashMap<(String, usize), Interval>,
}

impl BoundsMap {
    pub fn new() -> BoundsMap {
        BoundsMap::default()
    }

    pub fn insert(&mut self, stage: impl Into<String>, dim: usize, interval: Interval) {
        self.entries.insert((stage.into(), dim), interval);
    }

    pub fn get(&self, stage: &str, dim: usize) -> Option<&Interval> {
        self.entries.get(&(stage.to_string(), dim))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Placeholder naming ───────────────────────────────────────────────────

/// The fixed `"<stage>.<dimension>.{min,max,extent}"` naming convention.
/// Downstream passes depend on these exact names, so they are produced and
/// parsed only here.
pub mod placeholder {
    use super::Environment;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Field {
        Min,
        Max,
        Extent,
    }

    pub fn min_name(stage: &str, dim: &str) -> String {
        format!("{}.{}.min", stage, dim)
    }

    pub fn max_name(stage: &str, dim: &str) -> String {
        format!("{}.{}.max", stage, dim)
    }

    pub fn extent_name(stage: &str, dim: &str) -> String {
        format!("{}.{}.extent", stage, dim)
    }

    /// Parse a variable name as a bound placeholder against the
    /// environment. Only names whose stage and dimension both resolve are
    /// placeholders; anything else is an ordinary variable.
    pub fn parse<'a>(name: &'a str, env: &Environment) -> Option<(&'a str, usize, Field)> {
        let (rest, field_str) = name.rsplit_once('.')?;
        let field = match field_str {
            "min" => Field::Min,
            "max" => Field::Max,
            "extent" => Field::Extent,
            _ => return None,
        };
        let (stage_name, dim_name) = rest.rsplit_once('.')?;
        let stage = env.get(stage_name)?;
        let dim = stage.dim_index(dim_name)?;
        Some((&name[..stage_name.len()], dim, field))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
