// bundle.rs — On-disk pipeline bundle
//
// The pass's whole input as one JSON document: the scheduled program, the
// stage table, outputs, realization order, fused groups, declared bounds
// and the target. Produced by the scheduling front end; this module only
// deserializes it and adapts it to the pass's in-memory types.
//
// Preconditions: none.
// Postconditions: `lower` is deterministic for equal bundles.
// Failure modes: malformed JSON (serde error), any bounds diagnostic.
// Side effects: none.

use serde::{Deserialize, Serialize};

use crate::bounds;
use crate::diag::Diagnostic;
use crate::expr::Expr;
use crate::interval::Interval;
use crate::stage::{BoundsMap, Environment, FusedGroup, Stage};
use crate::stmt::Stmt;
use crate::target::Target;

/// One declared bound: `[min, max]` on a stage's dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundEntry {
    pub stage: String,
    pub dim: usize,
    pub min: Expr,
    pub max: Expr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub program: Stmt,
    pub stages: Vec<Stage>,
    pub outputs: Vec<String>,
    pub realization_order: Vec<String>,
    #[serde(default)]
    pub fused_groups: Vec<FusedGroup>,
    #[serde(default)]
    pub bounds: Vec<BoundEntry>,
    #[serde(default)]
    pub target: Target,
}

impl Bundle {
    pub fn from_json(text: &str) -> Result<Bundle, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn environment(&self) -> Environment {
        self.stages.iter().cloned().collect()
    }

    pub fn bounds_map(&self) -> BoundsMap {
        let mut map = BoundsMap::new();
        for entry in &self.bounds {
            map.insert(
                entry.stage.clone(),
                entry.dim,
                Interval::new(entry.min.clone(), entry.max.clone()),
            );
        }
        map
    }

    /// Run the bounds pass over this bundle.
    pub fn lower(&self) -> Result<Stmt, Diagnostic> {
        bounds::bounds_inference(
            &self.program,
            &self.outputs,
            &self.realization_order,
            &self.fused_groups,
            &self.environment(),
            &self.bounds_map(),
            &self.target,
        )
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn stencil_bundle() -> Bundle {
        Bundle {
            program: Stmt::produce(
                "blur",
                Stmt::serial_for(
                    "blur.x",
                    Expr::var("blur.x.min"),
                    Expr::var("blur.x.extent"),
                    Stmt::store(
                        "blur",
                        vec![Expr::var("blur.x")],
                        Expr::add(
                            Expr::call("in", vec![Expr::sub(Expr::var("blur.x"), Expr::int(1))]),
                            Expr::call("in", vec![Expr::add(Expr::var("blur.x"), Expr::int(1))]),
                        ),
                    ),
                ),
            ),
            stages: vec![Stage::external("in", &["x"]), Stage::new("blur", &["x"])],
            outputs: vec!["blur".to_string()],
            realization_order: vec!["in".to_string(), "blur".to_string()],
            fused_groups: Vec::new(),
            bounds: vec![BoundEntry {
                stage: "blur".to_string(),
                dim: 0,
                min: Expr::int(0),
                max: Expr::int(99),
            }],
            target: Target::host(),
        }
    }

    #[test]
    fn json_round_trip_preserves_lowering() {
        let bundle = stencil_bundle();
        let json = bundle.to_json().unwrap();
        let back = Bundle::from_json(&json).unwrap();
        assert_eq!(bundle.lower().unwrap(), back.lower().unwrap());
    }

    #[test]
    fn lower_injects_output_bounds() {
        let lowered = stencil_bundle().lower().unwrap();
        let text = lowered.to_string();
        assert!(text.contains("let blur.x.min = 0"));
        assert!(text.contains("let blur.x.max = 99"));
    }

    #[test]
    fn bounds_map_adapts_entries() {
        let map = stencil_bundle().bounds_map();
        assert_eq!(map.get("blur", 0), Some(&Interval::constant(0, 99)));
        assert_eq!(map.get("in", 0), None);
    }

    #[test]
    fn missing_optional_fields_default() {
        let json = r#"{
            "program": {"Evaluate": {"IntImm": 0}},
            "stages": [],
            "outputs": [],
            "realization_order": []
        }"#;
        let bundle = Bundle::from_json(json).unwrap();
        assert!(bundle.fused_groups.is_empty());
        assert!(bundle.bounds.is_empty());
        assert_eq!(bundle.target, Target::host());
    }
}
