//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including validation failures and invalid state transitions.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid file name (empty, too long, or contains a separator)
    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    /// Invalid content hash format (expected 32 lowercase hex characters)
    #[error("Invalid content hash: {0}")]
    InvalidHash(String),

    /// Invalid store or peer name
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Invalid store-relative path
    #[error("Invalid store path: {0}")]
    InvalidStorePath(String),

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Unsupported manifest version
    #[error("Unsupported manifest version {0}")]
    UnsupportedManifestVersion(u32),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidFileName("a/b".to_string());
        assert_eq!(err.to_string(), "Invalid file name: a/b");

        let err = DomainError::InvalidState {
            from: "completed".to_string(),
            to: "initiated".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid state transition from completed to initiated"
        );
    }

    #[test]
    fn test_error_equality() {
        let err1 = DomainError::InvalidHash("xyz".to_string());
        let err2 = DomainError::InvalidHash("xyz".to_string());
        assert_eq!(err1, err2);
    }
}
