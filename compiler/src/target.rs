// target.rs — Target descriptor consumed by the injector
//
// A parameter object only: it decides the extent-rounding policy for
// vectorized dimensions and nothing else. It never switches control flow.

use serde::{Deserialize, Serialize};

use crate::expr::Expr;

/// Platform description relevant to bound injection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Natural vector width in elements. When set, extents of vectorized
    /// dimensions are padded up to the next multiple.
    #[serde(default)]
    pub vector_width: Option<u32>,
}

impl Target {
    pub fn host() -> Target {
        Target::default()
    }

    pub fn with_vector_width(width: u32) -> Target {
        Target {
            vector_width: Some(width),
        }
    }

    /// Round `extent` up to a vector-width multiple:
    /// `((extent + w - 1) / w) * w`. Identity when no width is configured
    /// or the width is degenerate.
    pub fn pad_extent(&self, extent: Expr) -> Expr {
        match self.vector_width {
            Some(w) if w > 1 => {
                let w = Expr::int(w as i64);
                Expr::mul(
                    Expr::div(
                        Expr::add(extent, Expr::sub(w.clone(), Expr::int(1))),
                        w.clone(),
                    ),
                    w,
                )
            }
            _ => extent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_extent_rounds_up_constants() {
        let t = Target::with_vector_width(8);
        assert_eq!(t.pad_extent(Expr::int(5)), Expr::int(8));
        assert_eq!(t.pad_extent(Expr::int(16)), Expr::int(16));
        assert_eq!(t.pad_extent(Expr::int(17)), Expr::int(24));
    }

    #[test]
    fn pad_extent_keeps_symbolic_form() {
        let t = Target::with_vector_width(4);
        let padded = t.pad_extent(Expr::var("n"));
        assert_eq!(padded.to_string(), "(((n + 3)/4)*4)");
    }

    #[test]
    fn host_target_is_identity() {
        assert_eq!(Target::host().pad_extent(Expr::int(5)), Expr::int(5));
        let t = Target::with_vector_width(1);
        assert_eq!(t.pad_extent(Expr::var("n")), Expr::var("n"));
    }
}
