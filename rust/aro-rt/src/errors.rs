//! Runtime errors.
//!
//! Every error carries a stable kind identifier. The identifiers are part
//! of the language surface: match-arm patterns compare against them, and
//! error payloads expose them under the `kind` key.

use std::collections::BTreeMap;

use thiserror::Error;

use aro_core::value::Value;

/// An error raised while executing a feature set.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("no action is registered for verb '{verb}'")]
    UnknownAction { verb: String },

    #[error("undefined variable '{name}'")]
    UndefinedVariable { name: String },

    #[error("property '{property}' not found on '{base}'")]
    PropertyNotFound { base: String, property: String },

    #[error("service '{service}' is not available")]
    MissingService { service: String },

    #[error("type mismatch: expected {expected}, found {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("{thrown_type}: {reason}")]
    ExplicitThrow { thrown_type: String, reason: String },

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("comparison failed: {0}")]
    ComparisonFailed(String),

    #[error("invalid preposition '{preposition}' for action '{action}'")]
    InvalidPreposition { action: String, preposition: String },

    #[error("i/o error: {0}")]
    Io(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("feature set '{0}' not found")]
    FeatureSetNotFound(String),

    #[error("entry point '{0}' not found")]
    EntryPointNotFound(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Runtime(String),
}

impl RuntimeError {
    /// The stable user-facing kind identifier.
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::UnknownAction { .. } => "unknown-action",
            RuntimeError::UndefinedVariable { .. } => "undefined-variable",
            RuntimeError::PropertyNotFound { .. } => "property-not-found",
            RuntimeError::MissingService { .. } => "missing-service",
            RuntimeError::TypeMismatch { .. } => "type-mismatch",
            RuntimeError::ExplicitThrow { .. } => "explicit-throw",
            RuntimeError::ValidationFailed(_) => "validation-failed",
            RuntimeError::ComparisonFailed(_) => "comparison-failed",
            RuntimeError::InvalidPreposition { .. } => "invalid-preposition",
            RuntimeError::Io(_) => "io",
            RuntimeError::Network(_) => "network",
            RuntimeError::Timeout(_) => "timeout",
            RuntimeError::FeatureSetNotFound(_) => "feature-set-not-found",
            RuntimeError::EntryPointNotFound(_) => "entry-point-not-found",
            RuntimeError::Cancelled => "cancelled",
            RuntimeError::Runtime(_) => "runtime-error",
        }
    }

    /// The payload form a `match` statement sees: `kind` and `message`,
    /// plus `type` and `reason` for explicit throws.
    pub fn to_value(&self) -> Value {
        let mut entries = BTreeMap::from([
            ("kind".to_string(), Value::Str(self.kind().to_string())),
            ("message".to_string(), Value::Str(self.to_string())),
        ]);
        if let RuntimeError::ExplicitThrow { thrown_type, reason } = self {
            entries.insert("type".to_string(), Value::Str(thrown_type.clone()));
            entries.insert("reason".to_string(), Value::Str(reason.clone()));
        }
        Value::Object(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_identifiers() {
        assert_eq!(
            RuntimeError::UnknownAction { verb: "x".into() }.kind(),
            "unknown-action"
        );
        assert_eq!(RuntimeError::Cancelled.kind(), "cancelled");
        assert_eq!(RuntimeError::Runtime("boom".into()).kind(), "runtime-error");
    }

    #[test]
    fn explicit_throw_preserves_type_and_reason() {
        let err = RuntimeError::ExplicitThrow {
            thrown_type: "quota-exceeded".into(),
            reason: "too many requests".into(),
        };
        let Value::Object(entries) = err.to_value() else {
            panic!("expected object payload");
        };
        assert_eq!(entries["kind"], Value::Str("explicit-throw".into()));
        assert_eq!(entries["type"], Value::Str("quota-exceeded".into()));
        assert_eq!(entries["reason"], Value::Str("too many requests".into()));
    }
}
