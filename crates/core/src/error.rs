//! Core error model.

use thiserror::Error;

/// Result type used across the messaging core.
pub type CoreResult<T> = Result<T, CoreError>;

/// Deterministic failures at the messaging-core boundary.
///
/// Keep this focused on malformed values (identifiers, references). Storage
/// and transport concerns belong to the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl CoreError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
