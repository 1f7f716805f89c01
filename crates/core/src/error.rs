//! Error taxonomy for share reconciliation.
//!
//! Every fallible operation returns one of these variants explicitly. The
//! variant decides the [`ErrorClass`]; only the orchestrator turns a class
//! into a retry or terminal decision.

use std::path::PathBuf;

use thiserror::Error;

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Network, timeout, busy backend or an unresolved name collision.
    Retryable,
    /// Retrying without an external change cannot help.
    Terminal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retryable => write!(f, "retryable"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

/// Core error type for shareform operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// The desired spec, its scope, or the addressed share vanished.
    #[error("{what} not found")]
    NotFound { what: String },

    /// Network failure, timeout or busy backend.
    #[error("transient failure during {operation}: {reason}")]
    Transient { operation: String, reason: String },

    /// Backend rejected a create because the name is already taken.
    #[error("share name '{name}' conflicts: {reason}")]
    Conflict { name: String, reason: String },

    /// Desired spec or backend response is malformed.
    #[error("invalid {subject}: {reason}")]
    Invalid { subject: String, reason: String },

    /// Reconciler configuration rejected at load time.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The pass was cancelled between two actions.
    #[error("reconciliation pass cancelled")]
    Cancelled,

    #[error("failed to write status file '{path}': {reason}")]
    StatusWriteFailed { path: PathBuf, reason: String },

    #[error("serialization error: {reason}")]
    Serialization { reason: String },
}

impl Error {
    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a transient error.
    pub fn transient(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a name conflict error.
    pub fn conflict(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a status write error.
    pub fn status_write_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::StatusWriteFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Classify this error for retry decisions.
    ///
    /// A failed status write is retryable: the previous status is still in
    /// place and the next pass rewrites it from a fresh read.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Transient { .. }
            | Self::Conflict { .. }
            | Self::Cancelled
            | Self::StatusWriteFailed { .. } => ErrorClass::Retryable,
            Self::NotFound { .. }
            | Self::Invalid { .. }
            | Self::InvalidConfig { .. }
            | Self::Serialization { .. } => ErrorClass::Terminal,
        }
    }

    /// Shorthand for `class() == ErrorClass::Retryable`.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Retryable)
    }

    /// Whether this is a `NotFound` error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
