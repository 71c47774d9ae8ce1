// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used by the bounds-lowering pass.
// Every diagnostic this crate emits is fatal: the pass is all-or-nothing,
// so there is no warning recovery path and no partial output.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0701`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different semantic
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable codes for the bounds-lowering pass.
pub mod codes {
    use super::DiagCode;

    /// A call targets a stage name absent from the environment.
    pub const UNRESOLVED_REFERENCE: DiagCode = DiagCode("E0701");
    /// The realization order is not a valid topological order, or omits
    /// or duplicates a required stage.
    pub const INVALID_REALIZATION_ORDER: DiagCode = DiagCode("E0702");
    /// A fused group is non-contiguous or a shared dimension cannot be
    /// reconciled across its members.
    pub const INCONSISTENT_FUSED_GROUP: DiagCode = DiagCode("E0703");
    /// A declared bound is narrower than what consumers actually read.
    pub const BOUNDS_VIOLATION: DiagCode = DiagCode("E0704");
    /// An external stage (or an output) has no usable bound source.
    pub const UNSATISFIABLE_BOUND: DiagCode = DiagCode("E0705");
    /// A bound placeholder has no finalized region — internal inconsistency.
    pub const MISSING_REGION: DiagCode = DiagCode("E0706");
    /// A finalized dimension is unbounded and cannot be injected.
    pub const UNBOUNDED_REGION: DiagCode = DiagCode("E0707");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by the bounds-lowering pass.
///
/// This pass has no source text to point into, so diagnostics carry the
/// offending stage / dimension / group names instead of spans.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub message: String,
    pub stage: Option<String>,
    pub dim: Option<String>,
    pub group: Option<String>,
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new error diagnostic with no code, context, or hint.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: None,
            level: DiagLevel::Error,
            message: message.into(),
            stage: None,
            dim: None,
            group: None,
            hint: None,
        }
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach the offending stage name.
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Attach the offending dimension name.
    pub fn with_dim(mut self, dim: impl Into<String>) -> Self {
        self.dim = Some(dim.into());
        self
    }

    /// Attach the offending fused-group name.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        match (&self.stage, &self.dim) {
            (Some(s), Some(d)) => write!(f, "\n  at: {}.{}", s, d)?,
            (Some(s), None) => write!(f, "\n  at: {}", s)?,
            _ => {}
        }
        if let Some(g) = &self.group {
            write!(f, "\n  group: {}", g)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}
