// fuse.rs — Fused-group reconciliation
//
// Stages that share one physical loop nest must agree on their shared
// dimensions' bounds. After every member's individual region is known, the
// shared bound is the union across members — or the declared override when
// one exists — assigned back to all members. Running this before all
// members are computed would silently under-approximate the shared bound,
// so the driver defers group members and calls in here exactly once per
// group.
//
// Preconditions: every member's individual Region is present in `regions`.
// Postconditions: for each shared dimension, every member holding that
//   dimension carries a structurally identical Interval.
// Failure modes: non-contiguous groups, statically incompatible overrides,
//   an override provably narrower than the group union.
// Side effects: none beyond the `regions` updates.

use std::collections::HashMap;

use crate::diag::{codes, Diagnostic};
use crate::interval::Interval;
use crate::region::Region;
use crate::stage::{BoundsMap, Environment, FusedGroup};

// ── Validation ───────────────────────────────────────────────────────────

/// Check that every group's members form a contiguous sub-run of the
/// realization order. Done once at pass entry.
pub fn validate_groups(
    groups: &[FusedGroup],
    realization_order: &[String],
) -> Result<(), Diagnostic> {
    for group in groups {
        let mut positions = Vec::with_capacity(group.members.len());
        for member in &group.members {
            match realization_order.iter().position(|n| n == member) {
                Some(p) => positions.push(p),
                None => {
                    return Err(Diagnostic::error(format!(
                        "fused group member '{}' is not in the realization order",
                        member
                    ))
                    .with_code(codes::INCONSISTENT_FUSED_GROUP)
                    .with_group(group.name.clone())
                    .with_stage(member.clone()));
                }
            }
        }
        positions.sort_unstable();
        let contiguous = positions
            .windows(2)
            .all(|w| w[1] == w[0] + 1);
        if !contiguous {
            return Err(Diagnostic::error(
                "fused group members must be contiguous in the realization order",
            )
            .with_code(codes::INCONSISTENT_FUSED_GROUP)
            .with_group(group.name.clone()));
        }
    }
    Ok(())
}

// ── Reconciliation ───────────────────────────────────────────────────────

/// Force shared-dimension agreement across one group. For each shared
/// dimension: union the members' individually-computed intervals; if any
/// member declares an override for it, the override is authoritative (all
/// such overrides must statically agree and must contain the union); the
/// agreed interval is written back to every member that has the dimension.
pub fn reconcile_group(
    group: &FusedGroup,
    env: &Environment,
    bounds: &BoundsMap,
    regions: &mut HashMap<String, Region>,
) -> Result<(), Diagnostic> {
    for dim_name in &group.shared_dims {
        // (member, dim index) pairs for members that carry this dimension.
        let mut holders: Vec<(&str, usize)> = Vec::new();
        for member in &group.members {
            let stage = env.get(member).ok_or_else(|| {
                Diagnostic::error(format!("fused group member '{}' is not a known stage", member))
                    .with_code(codes::UNRESOLVED_REFERENCE)
                    .with_group(group.name.clone())
                    .with_stage(member.clone())
            })?;
            if let Some(idx) = stage.dim_index(dim_name) {
                holders.push((member.as_str(), idx));
            }
        }
        if holders.is_empty() {
            return Err(Diagnostic::error(format!(
                "no member of the fused group has a dimension named '{}'",
                dim_name
            ))
            .with_code(codes::INCONSISTENT_FUSED_GROUP)
            .with_group(group.name.clone())
            .with_dim(dim_name.clone()));
        }

        let mut agreed: Option<Interval> = None;
        for (member, idx) in &holders {
            let region = regions.get(*member).ok_or_else(|| {
                Diagnostic::error(format!(
                    "region for fused group member '{}' was not computed before reconciliation",
                    member
                ))
                .with_code(codes::MISSING_REGION)
                .with_group(group.name.clone())
                .with_stage(member.to_string())
            })?;
            let interval = region.get(*idx).clone();
            agreed = Some(match agreed {
                Some(acc) => acc.union(&interval),
                None => interval,
            });
        }
        let union = agreed.expect("at least one holder");

        // Overrides are authoritative; distinct overrides on one shared
        // dimension must statically agree and cover the union.
        let mut declared: Option<Interval> = None;
        for (member, idx) in &holders {
            if let Some(ov) = bounds.get(member, *idx) {
                if let Some(prev) = &declared {
                    if prev != ov {
                        return Err(Diagnostic::error(format!(
                            "conflicting bound declarations on shared dimension '{}'",
                            dim_name
                        ))
                        .with_code(codes::INCONSISTENT_FUSED_GROUP)
                        .with_group(group.name.clone())
                        .with_dim(dim_name.clone()));
                    }
                } else {
                    declared = Some(ov.clone());
                }
            }
        }
        let agreed = match declared {
            Some(ov) => {
                if ov.provably_fails_to_contain(&union) {
                    return Err(Diagnostic::error(format!(
                        "declared bound on shared dimension '{}' is narrower than the group's requirement",
                        dim_name
                    ))
                    .with_code(codes::INCONSISTENT_FUSED_GROUP)
                    .with_group(group.name.clone())
                    .with_dim(dim_name.clone()));
                }
                ov
            }
            None => union,
        };

        for (member, idx) in &holders {
            if let Some(region) = regions.get_mut(*member) {
                region.set(*idx, agreed.clone());
            }
        }
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────────
