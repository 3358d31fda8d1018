//! Compiler error types.
//!
//! Every structural failure is a [`CompileError`] value carrying the
//! identifiers of the offending key, entity or source. Unrecognized keys are
//! the one non-fatal kind: the compiler records them as [`Problem`]s instead
//! of aborting.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while compiling one connector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// An indexed path segment is missing its index, or the index is not a
    /// positive integer.
    #[error("malformed key '{key}': {reason}")]
    MalformedKey { key: String, reason: String },

    /// The value failed the rule's value-shape predicate.
    #[error("invalid value '{value}' for key '{key}': expected {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: String,
    },

    /// A type-gated property reached an entity of another variant.
    #[error("type mismatch for key '{key}': {entity} is {actual}, expected {expected}")]
    TypeMismatch {
        key: String,
        entity: String,
        expected: String,
        actual: String,
    },

    /// A `type` assignment tried to re-type an already typed entity.
    #[error("conflicting type for key '{key}': {entity} is already {existing}, cannot become {requested}")]
    ConflictingType {
        key: String,
        entity: String,
        existing: String,
        requested: String,
    },

    /// No rule matches the key shape.
    #[error("unrecognized key '{key}'")]
    UnrecognizedKey { key: String, value: String },

    /// A key, index or reference addresses an entity that was never typed.
    #[error("missing referenced entity {entity} (referenced by {referrer})")]
    MissingReferencedEntity { entity: String, referrer: String },

    /// The source reference graph of a task contains a cycle.
    #[error("cyclic source dependency in {scope}: {}", sources.join(" -> "))]
    CyclicSourceDependency { scope: String, sources: Vec<String> },

    /// The execution order does not name exactly the sources of its task.
    #[error(
        "execution order of {scope} does not match its sources (missing: [{}], extra: [{}])",
        missing.join(", "),
        extra.join(", ")
    )]
    IncompleteOrDivergentOrder {
        scope: String,
        missing: Vec<String>,
        extra: Vec<String>,
    },

    /// A compute references a translation table the connector never defines.
    #[error("missing translation table '{table}' (referenced by {referrer})")]
    MissingTranslationTable { table: String, referrer: String },

    /// A field references an embedded file the connector never defines.
    #[error("missing embedded file {file} (referenced by {referrer})")]
    MissingEmbeddedFile { file: String, referrer: String },
}

/// Plain discriminant of [`CompileError`], convenient for matching in callers
/// and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    MalformedKey,
    InvalidValue,
    TypeMismatch,
    ConflictingType,
    UnrecognizedKey,
    MissingReferencedEntity,
    CyclicSourceDependency,
    IncompleteOrDivergentOrder,
    MissingTranslationTable,
    MissingEmbeddedFile,
}

impl CompileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::MalformedKey { .. } => ErrorKind::MalformedKey,
            CompileError::InvalidValue { .. } => ErrorKind::InvalidValue,
            CompileError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            CompileError::ConflictingType { .. } => ErrorKind::ConflictingType,
            CompileError::UnrecognizedKey { .. } => ErrorKind::UnrecognizedKey,
            CompileError::MissingReferencedEntity { .. } => ErrorKind::MissingReferencedEntity,
            CompileError::CyclicSourceDependency { .. } => ErrorKind::CyclicSourceDependency,
            CompileError::IncompleteOrDivergentOrder { .. } => {
                ErrorKind::IncompleteOrDivergentOrder
            }
            CompileError::MissingTranslationTable { .. } => ErrorKind::MissingTranslationTable,
            CompileError::MissingEmbeddedFile { .. } => ErrorKind::MissingEmbeddedFile,
        }
    }

    /// Whether this error aborts compilation of the connector.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CompileError::UnrecognizedKey { .. })
    }

    /// Attach the task scope to ordering and cycle errors raised by the pure
    /// graph functions, which do not know where their input came from.
    pub(crate) fn in_scope(self, scope: &str) -> Self {
        match self {
            CompileError::CyclicSourceDependency { sources, .. } => {
                CompileError::CyclicSourceDependency {
                    scope: scope.to_string(),
                    sources,
                }
            }
            CompileError::IncompleteOrDivergentOrder { missing, extra, .. } => {
                CompileError::IncompleteOrDivergentOrder {
                    scope: scope.to_string(),
                    missing,
                    extra,
                }
            }
            other => other,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A compile error tagged with the connector it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("connector {connector}: {error}")]
pub struct ConnectorError {
    pub connector: String,
    #[source]
    pub error: CompileError,
}

impl ConnectorError {
    pub fn new(connector: impl Into<String>, error: CompileError) -> Self {
        Self {
            connector: connector.into(),
            error,
        }
    }
}

/// A non-fatal issue recorded during compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub key: String,
    pub value: String,
    pub message: String,
}

impl Problem {
    pub(crate) fn from_error(error: &CompileError) -> Option<Self> {
        match error {
            CompileError::UnrecognizedKey { key, value } => Some(Self {
                key: key.clone(),
                value: value.clone(),
                message: error.to_string(),
            }),
            _ => None,
        }
    }

    /// Promote back to the error it was recorded from.
    pub fn into_error(self) -> CompileError {
        CompileError::UnrecognizedKey {
            key: self.key,
            value: self.value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_carries_context() {
        let err = CompileError::CyclicSourceDependency {
            scope: "monitors.cpu.discovery".into(),
            sources: vec!["a".into(), "b".into(), "a".into()],
        };
        let text = err.to_string();
        assert!(text.contains("monitors.cpu.discovery"));
        assert!(text.contains("a -> b -> a"));

        let err = CompileError::IncompleteOrDivergentOrder {
            scope: "pre".into(),
            missing: vec!["s2".into()],
            extra: vec!["s9".into()],
        };
        assert!(err.to_string().contains("missing: [s2]"));
        assert!(err.to_string().contains("extra: [s9]"));
    }

    #[test]
    fn only_unrecognized_keys_are_non_fatal() {
        let unrecognized = CompileError::UnrecognizedKey {
            key: "foo.bar".into(),
            value: "1".into(),
        };
        assert!(!unrecognized.is_fatal());
        assert_eq!(unrecognized.kind(), ErrorKind::UnrecognizedKey);

        let malformed = CompileError::MalformedKey {
            key: "cpu.discovery.source(0).type".into(),
            reason: "index must be positive".into(),
        };
        assert!(malformed.is_fatal());
    }

    #[test]
    fn scope_is_attached_to_graph_errors_only() {
        let err = CompileError::CyclicSourceDependency {
            scope: String::new(),
            sources: vec!["a".into()],
        }
        .in_scope("pre");
        assert!(
            matches!(err, CompileError::CyclicSourceDependency { ref scope, .. } if scope == "pre")
        );

        let err = CompileError::MissingEmbeddedFile {
            file: "EmbeddedFile(1)".into(),
            referrer: "x".into(),
        };
        assert_eq!(err.clone().in_scope("pre"), err);
    }

    #[test]
    fn problem_round_trips_to_error() {
        let err = CompileError::UnrecognizedKey {
            key: "hdf.unknown".into(),
            value: "v".into(),
        };
        let problem = Problem::from_error(&err).unwrap();
        assert_eq!(problem.key, "hdf.unknown");
        assert_eq!(problem.into_error(), err);
    }
}
