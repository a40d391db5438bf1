//! Error types for bibrec-rr
//!
//! Only configuration errors abort a run. Parse failures, lookup failures and
//! index inconsistencies are reported per entry and the entry degrades to
//! "kept unchanged".

use thiserror::Error;

/// Reconciliation error
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Entry could not be read (skipped, non-fatal)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Lookup service transport or status failure (soft, never escapes a service)
    #[error("Lookup error ({service}): {message}")]
    Lookup { service: String, message: String },

    /// Malformed canonical record (record skipped, non-fatal)
    #[error("Index inconsistency: {0}")]
    IndexInconsistency(String),

    /// Missing or invalid configuration (fatal)
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<bibrec_common::Error> for ReconcileError {
    fn from(err: bibrec_common::Error) -> Self {
        match err {
            bibrec_common::Error::Io(e) => ReconcileError::Io(e),
            bibrec_common::Error::Json(e) => ReconcileError::Json(e),
            bibrec_common::Error::Toml(e) => ReconcileError::Config(e.to_string()),
            bibrec_common::Error::Config(msg) => ReconcileError::Config(msg),
            bibrec_common::Error::InvalidInput(msg) => ReconcileError::Parse(msg),
            bibrec_common::Error::Internal(msg) => ReconcileError::Internal(msg),
        }
    }
}

impl ReconcileError {
    /// Whether this error must stop the run before processing
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReconcileError::Config(_))
    }
}

/// Result type for reconciliation operations
pub type Result<T> = std::result::Result<T, ReconcileError>;
