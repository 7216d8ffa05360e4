//! Error types for the recovery framework
//!
//! Two layers of errors live here:
//!
//! - [`OperationError`] is what caller-supplied execute/prepare closures return.
//!   It carries the raw failure text and, when the origin knows it, an explicit
//!   [`FailureType`] so classification does not have to guess from the text.
//! - [`RecoveryError`] is the framework's own error type returned by every
//!   public operation.

use crate::classifier::FailureType;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Framework error type
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Operation was built without an execute closure
    #[error("operation {operation} has no execute function configured")]
    MissingExecuteFn { operation: String },

    /// All attempts failed, or a non-retryable failure stopped the loop
    #[error("operation {operation} failed after {attempts} attempts: {source}")]
    OperationFailed {
        operation: String,
        attempts: u32,
        #[source]
        source: OperationError,
    },

    /// Parent call context was cancelled
    #[error("operation {operation} cancelled")]
    Cancelled { operation: String },

    /// Prepare hook failed
    #[error("prepare for retry failed for {operation}: {source}")]
    PrepareFailed {
        operation: String,
        #[source]
        source: OperationError,
    },

    /// A recovery strategy could not repair the failure
    #[error("recovery strategy {strategy} failed: {reason}")]
    StrategyFailed { strategy: String, reason: String },

    /// No strategy succeeded and no analyzer is available
    #[error("unable to recover from error: {source}")]
    RecoveryExhausted {
        #[source]
        source: OperationError,
    },

    /// AI analyzer call failed
    #[error("AI analysis failed: {0}")]
    Analyzer(String),

    /// Shared context lookup found nothing
    #[error("no shared context {context_type} for session {session_id}")]
    ContextNotFound {
        session_id: String,
        context_type: String,
    },

    /// Shared context existed but its TTL had elapsed
    #[error("shared context {context_type} for session {session_id} expired at {expired_at}")]
    ContextExpired {
        session_id: String,
        context_type: String,
        expired_at: DateTime<Utc>,
    },

    /// Payload or key rejected at the store boundary
    #[error("invalid shared context: {0}")]
    InvalidContext(String),

    /// Store was used after close
    #[error("context store is closed")]
    StoreClosed,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RecoveryError {
    /// NotFound and Expired context lookups are expected conditions, not failures.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RecoveryError::ContextNotFound { .. } | RecoveryError::ContextExpired { .. }
        )
    }

    /// True when the caller cancelled the operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RecoveryError::Cancelled { .. })
    }

    /// The underlying operation failure, when there is one.
    pub fn operation_error(&self) -> Option<&OperationError> {
        match self {
            RecoveryError::OperationFailed { source, .. }
            | RecoveryError::PrepareFailed { source, .. }
            | RecoveryError::RecoveryExhausted { source } => Some(source),
            _ => None,
        }
    }
}

/// Result type for recovery operations
pub type Result<T> = std::result::Result<T, RecoveryError>;

/// Failure returned by an external action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationError {
    message: String,
    kind: Option<FailureType>,
}

impl OperationError {
    /// Error with no explicit kind; classification falls back to the text.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
        }
    }

    /// Error tagged with its failure type at the origin.
    pub fn with_kind(message: impl Into<String>, kind: FailureType) -> Self {
        Self {
            message: message.into(),
            kind: Some(kind),
        }
    }

    /// Shorthand for a network-class failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::with_kind(message, FailureType::Network)
    }

    pub(crate) fn timeout(limit: Duration) -> Self {
        Self::new(format!("operation timeout after {:?}", limit))
    }

    pub(crate) fn cancelled() -> Self {
        Self::new("operation cancelled by caller")
    }

    /// Raw failure text
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Failure type set at the origin, if any
    pub fn kind(&self) -> Option<FailureType> {
        self.kind
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for OperationError {}

impl From<String> for OperationError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for OperationError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<std::io::Error> for OperationError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => Some(FailureType::FileMissing),
            std::io::ErrorKind::PermissionDenied => Some(FailureType::Permission),
            std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset => Some(FailureType::Network),
            _ => None,
        };
        Self {
            message: err.to_string(),
            kind,
        }
    }
}

/// Render an error and its sources, one per line
pub fn format_error_chain(error: &dyn std::error::Error) -> String {
    let mut out = error.to_string();
    let mut current = error.source();
    while let Some(source) = current {
        out.push_str("\n  caused by: ");
        out.push_str(&source.to_string());
        current = source.source();
    }
    out
}

/// Innermost error message in a source chain
pub fn root_cause(error: &dyn std::error::Error) -> String {
    let mut current = error;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_failed_mentions_attempts_and_cause() {
        let err = RecoveryError::OperationFailed {
            operation: "pull nginx".to_string(),
            attempts: 3,
            source: OperationError::new("connection refused"),
        };
        let text = err.to_string();
        assert!(text.contains("3 attempts"));
        assert!(text.contains("connection refused"));
    }

    #[test]
    fn test_recovery_exhausted_wording() {
        let err = RecoveryError::RecoveryExhausted {
            source: OperationError::new("boom"),
        };
        assert_eq!(err.to_string(), "unable to recover from error: boom");
    }

    #[test]
    fn test_recoverable_kinds() {
        let not_found = RecoveryError::ContextNotFound {
            session_id: "s".into(),
            context_type: "t".into(),
        };
        assert!(not_found.is_recoverable());
        assert!(!RecoveryError::StoreClosed.is_recoverable());
    }

    #[test]
    fn test_io_error_kind_mapping() {
        let err: OperationError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope").into();
        assert_eq!(err.kind(), Some(FailureType::Permission));

        let err: OperationError = std::io::Error::new(std::io::ErrorKind::Other, "odd").into();
        assert_eq!(err.kind(), None);
    }

    #[test]
    fn test_error_chain_formatting() {
        let err = RecoveryError::OperationFailed {
            operation: "tag".to_string(),
            attempts: 1,
            source: OperationError::new("invalid reference format"),
        };
        let chain = format_error_chain(&err);
        assert!(chain.contains("caused by: invalid reference format"));
        assert_eq!(root_cause(&err), "invalid reference format");
    }
}
