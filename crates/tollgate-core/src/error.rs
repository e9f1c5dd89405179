//! Domain-level error types.

use thiserror::Error;

/// Configuration-time policy errors.
///
/// These are fatal at startup: an invalid policy never reaches the
/// token-bucket algorithm.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Invalid rate limit policy '{name}': {reason}")]
    InvalidPolicy { name: String, reason: String },

    #[error("Duplicate rate limit policy: {0}")]
    Duplicate(String),
}

impl PolicyError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
