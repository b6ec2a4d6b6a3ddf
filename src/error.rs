//! Braid error types with error codes
//!
//! Error code ranges:
//! - BRAID-001-009: Builder errors (raised at construction, abort workflow creation)
//! - BRAID-010-019: Split/axis errors
//! - BRAID-020-029: Scheduler/unit errors (recorded per work unit)
//! - BRAID-030-039: Cache errors
//! - BRAID-040-049: Backend errors
//! - BRAID-090-099: IO/JSON passthrough

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BraidError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum BraidError {
    // ═══════════════════════════════════════════
    // BUILDER ERRORS (001-009)
    // ═══════════════════════════════════════════
    #[error(
        "[BRAID-001] Type mismatch: output '{src_node}.{src_field}' ({src_ty}) is not assignable \
         to input '{dst_node}.{dst_field}' ({dst_ty})"
    )]
    TypeMismatch {
        src_node: String,
        src_field: String,
        src_ty: String,
        dst_node: String,
        dst_field: String,
        dst_ty: String,
    },

    #[error("[BRAID-002] Duplicate node name '{name}'")]
    DuplicateNodeName { name: String },

    #[error("[BRAID-003] Task '{task}' has no input field '{field}' (node '{node}')")]
    UnknownInput {
        node: String,
        field: String,
        task: String,
    },

    #[error("[BRAID-004] Missing required input '{field}' on node '{node}'")]
    MissingRequiredInput { node: String, field: String },

    #[error(
        "[BRAID-005] Lazy field '{node}.{field}' used where a concrete value is required \
         (branch predicates must be static)"
    )]
    LazyInCondition { node: String, field: String },

    #[error("[BRAID-006] Workflow output '{name}' declared twice")]
    DuplicateOutput { name: String },

    #[error("[BRAID-007] Unknown workflow input '{name}'")]
    UnknownWorkflowInput { name: String },

    #[error("[BRAID-008] Node '{node}' has no output field '{field}'")]
    UnknownOutputField { node: String, field: String },

    #[error(
        "[BRAID-009] Concrete value for input '{node}.{field}' does not conform to {expected}: \
         {actual}"
    )]
    ValueMismatch {
        node: String,
        field: String,
        expected: String,
        actual: String,
    },

    // ═══════════════════════════════════════════
    // SPLIT/AXIS ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[BRAID-010] Axis '{axis}' cardinality disagreement: {expected} vs {actual}")]
    AxisMismatch {
        axis: String,
        expected: usize,
        actual: usize,
    },

    #[error("[BRAID-011] Node '{node}' has no axis '{axis}' to combine")]
    UnknownAxis { node: String, axis: String },

    #[error("[BRAID-012] Split field '{field}' on node '{node}' must be bound to a concrete sequence")]
    SplitNotSequence { node: String, field: String },

    #[error(
        "[BRAID-013] Linked split on node '{node}': field '{field}' has length {actual}, \
         expected {expected}"
    )]
    LinkedLengthMismatch {
        node: String,
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("[BRAID-014] Split names unknown input field '{field}' on node '{node}'")]
    SplitUnknownField { node: String, field: String },

    #[error("[BRAID-015] Invalid command template: {reason}")]
    TemplateParse { reason: String },

    #[error("[BRAID-016] Field '{field}' on node '{node}' appears in more than one split")]
    DuplicateSplit { node: String, field: String },

    // ═══════════════════════════════════════════
    // SCHEDULER/UNIT ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[BRAID-020] Worker failure in unit '{unit}': {message}")]
    WorkerFailure { unit: String, message: String },

    #[error("[BRAID-021] Unit '{unit}' timed out after {timeout_ms}ms")]
    UnitTimeout { unit: String, timeout_ms: u64 },

    #[error("[BRAID-022] Unit '{unit}' cancelled")]
    Cancelled { unit: String },

    #[error("[BRAID-023] Unit '{unit}' unreachable: upstream unit '{upstream}' did not produce outputs")]
    Unreachable { unit: String, upstream: String },

    #[error("[BRAID-024] Unit '{unit}' unreachable: axis '{axis}' has no states (empty split)")]
    EmptySplit { unit: String, axis: String },

    #[error("[BRAID-025] Retries exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    #[error(
        "[BRAID-026] Runtime type mismatch in unit '{unit}': input '{field}' expected {expected}, \
         got {actual}"
    )]
    RuntimeTypeMismatch {
        unit: String,
        field: String,
        expected: String,
        actual: String,
    },

    #[error("[BRAID-027] Invalid workflow input '{name}': {reason}")]
    InvalidInput { name: String, reason: String },

    // ═══════════════════════════════════════════
    // CACHE ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[BRAID-030] Cache entry '{key}' is corrupt: {reason}")]
    CacheCorruption { key: String, reason: String },

    #[error("[BRAID-031] Cannot digest file input '{path}': {reason}")]
    FileDigest { path: String, reason: String },

    // ═══════════════════════════════════════════
    // BACKEND ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[BRAID-040] Environment unavailable on backend '{backend}': {reason}")]
    EnvUnavailable { backend: String, reason: String },

    #[error("[BRAID-041] Unknown worker backend '{name}'. Available: local, mock")]
    UnknownBackend { name: String },

    // ═══════════════════════════════════════════
    // IO/JSON PASSTHROUGH (090-099)
    // ═══════════════════════════════════════════
    #[error("[BRAID-090] IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[BRAID-091] JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BraidError {
    /// Get the error code (e.g., "BRAID-001")
    pub fn code(&self) -> &'static str {
        match self {
            Self::TypeMismatch { .. } => "BRAID-001",
            Self::DuplicateNodeName { .. } => "BRAID-002",
            Self::UnknownInput { .. } => "BRAID-003",
            Self::MissingRequiredInput { .. } => "BRAID-004",
            Self::LazyInCondition { .. } => "BRAID-005",
            Self::DuplicateOutput { .. } => "BRAID-006",
            Self::UnknownWorkflowInput { .. } => "BRAID-007",
            Self::UnknownOutputField { .. } => "BRAID-008",
            Self::ValueMismatch { .. } => "BRAID-009",
            Self::AxisMismatch { .. } => "BRAID-010",
            Self::UnknownAxis { .. } => "BRAID-011",
            Self::SplitNotSequence { .. } => "BRAID-012",
            Self::LinkedLengthMismatch { .. } => "BRAID-013",
            Self::SplitUnknownField { .. } => "BRAID-014",
            Self::TemplateParse { .. } => "BRAID-015",
            Self::DuplicateSplit { .. } => "BRAID-016",
            Self::WorkerFailure { .. } => "BRAID-020",
            Self::UnitTimeout { .. } => "BRAID-021",
            Self::Cancelled { .. } => "BRAID-022",
            Self::Unreachable { .. } => "BRAID-023",
            Self::EmptySplit { .. } => "BRAID-024",
            Self::RetryExhausted { .. } => "BRAID-025",
            Self::RuntimeTypeMismatch { .. } => "BRAID-026",
            Self::InvalidInput { .. } => "BRAID-027",
            Self::CacheCorruption { .. } => "BRAID-030",
            Self::FileDigest { .. } => "BRAID-031",
            Self::EnvUnavailable { .. } => "BRAID-040",
            Self::UnknownBackend { .. } => "BRAID-041",
            Self::Io(_) => "BRAID-090",
            Self::Json(_) => "BRAID-091",
        }
    }

    /// Check if error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::WorkerFailure { .. }
                | Self::UnitTimeout { .. }
                | Self::EnvUnavailable { .. }
                | Self::Io(_)
        )
    }

    /// True for errors raised during workflow construction
    pub fn is_builder_error(&self) -> bool {
        matches!(
            self,
            Self::TypeMismatch { .. }
                | Self::DuplicateNodeName { .. }
                | Self::UnknownInput { .. }
                | Self::MissingRequiredInput { .. }
                | Self::LazyInCondition { .. }
                | Self::DuplicateOutput { .. }
                | Self::UnknownWorkflowInput { .. }
                | Self::UnknownOutputField { .. }
                | Self::ValueMismatch { .. }
                | Self::SplitNotSequence { .. }
                | Self::LinkedLengthMismatch { .. }
                | Self::SplitUnknownField { .. }
                | Self::TemplateParse { .. }
                | Self::DuplicateSplit { .. }
        )
    }
}

impl FixSuggestion for BraidError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            Self::TypeMismatch { .. } => {
                Some("Wire an output whose type is assignable, or declare the input as Any")
            }
            Self::DuplicateNodeName { .. } => {
                Some("Pass an explicit name via .named(...) to disambiguate")
            }
            Self::UnknownInput { .. } => Some("Check the task definition's input field names"),
            Self::MissingRequiredInput { .. } => {
                Some("Bind the input with .with(...) or give the field a default")
            }
            Self::LazyInCondition { .. } => {
                Some("Branch predicates must derive from workflow inputs available at construction")
            }
            Self::DuplicateOutput { .. } => Some("Use unique workflow output names"),
            Self::UnknownWorkflowInput { .. } => {
                Some("Declare the input with declare_input() before referencing it")
            }
            Self::UnknownOutputField { .. } => {
                Some("Check the task definition's output field names")
            }
            Self::ValueMismatch { .. } => Some("Bind a value conforming to the declared type"),
            Self::AxisMismatch { .. } => {
                Some("Producers sharing an axis must split over sequences of equal length")
            }
            Self::UnknownAxis { .. } => {
                Some("Combine must name a local split field or an upstream 'node.field' axis")
            }
            Self::SplitNotSequence { .. } => {
                Some("Split fields must be bound to concrete JSON arrays")
            }
            Self::LinkedLengthMismatch { .. } => {
                Some("Linked split fields advance in lockstep and need equal lengths")
            }
            Self::SplitUnknownField { .. } => Some("Split fields must be declared task inputs"),
            Self::TemplateParse { .. } => {
                Some("Use <name[:type][?][=default]> for inputs, <out|name[:type][$path]> for outputs")
            }
            Self::DuplicateSplit { .. } => {
                Some("Each field can drive at most one axis; use split_linked for lockstep fields")
            }
            Self::WorkerFailure { .. } => Some("Inspect the unit's captured stdout/stderr"),
            Self::UnitTimeout { .. } => Some("Raise the task timeout or split the work"),
            Self::RetryExhausted { .. } => Some("Raise max_retries or fix the underlying failure"),
            Self::RuntimeTypeMismatch { .. } => {
                Some("An Any-typed wire carried a non-conforming value at dispatch")
            }
            Self::InvalidInput { .. } => {
                Some("Check submitted workflow inputs against declarations")
            }
            Self::CacheCorruption { .. } => Some("Purge the cache entry and re-run"),
            Self::FileDigest { .. } => Some("File-typed inputs must point at readable files"),
            Self::EnvUnavailable { .. } => Some("Check the backend's environment configuration"),
            Self::UnknownBackend { .. } => Some("Use create_backend(\"local\") or \"mock\""),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_code() {
        let err = BraidError::DuplicateNodeName {
            name: "add".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("[BRAID-002]"));
        assert!(msg.contains("add"));
    }

    #[test]
    fn error_code_extraction() {
        assert_eq!(
            BraidError::AxisMismatch {
                axis: "mul.a".into(),
                expected: 3,
                actual: 2
            }
            .code(),
            "BRAID-010"
        );
        assert_eq!(
            BraidError::Cancelled { unit: "x".into() }.code(),
            "BRAID-022"
        );
    }

    #[test]
    fn recoverable_classification() {
        assert!(BraidError::UnitTimeout {
            unit: "a".into(),
            timeout_ms: 100
        }
        .is_recoverable());
        assert!(BraidError::WorkerFailure {
            unit: "a".into(),
            message: "boom".into()
        }
        .is_recoverable());
        assert!(!BraidError::TypeMismatch {
            src_node: "a".into(),
            src_field: "out".into(),
            src_ty: "Int".into(),
            dst_node: "b".into(),
            dst_field: "x".into(),
            dst_ty: "Str".into(),
        }
        .is_recoverable());
    }

    #[test]
    fn builder_errors_classified() {
        assert!(BraidError::LazyInCondition {
            node: "a".into(),
            field: "out".into()
        }
        .is_builder_error());
        assert!(!BraidError::Cancelled { unit: "a".into() }.is_builder_error());
    }

    #[test]
    fn builder_errors_have_suggestions() {
        let errors = vec![
            BraidError::MissingRequiredInput {
                node: "n".into(),
                field: "f".into(),
            },
            BraidError::SplitNotSequence {
                node: "n".into(),
                field: "f".into(),
            },
            BraidError::UnknownAxis {
                node: "n".into(),
                axis: "n.a".into(),
            },
        ];
        for err in errors {
            assert!(err.fix_suggestion().is_some(), "missing suggestion: {err}");
        }
    }
}
