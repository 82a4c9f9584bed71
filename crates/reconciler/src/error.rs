//! Error types for the reconciler crate.

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// A lifecycle operation ran before the model was built.
    #[error("model '{key}' used before it was built")]
    NotInitialized { key: String },

    /// A linkage reference found while building is malformed or dangling.
    #[error("invalid reference on '{key}': {reason}")]
    InvalidReference { key: String, reason: String },

    /// The controller rejected or could not complete a create/update.
    #[error("{operation} of {object} failed: {reason}")]
    OperationFailed {
        operation: String,
        object: String,
        reason: String,
    },

    /// A controller API call failed at the transport level.
    #[error("controller api '{operation}' failed: {reason}")]
    Api { operation: String, reason: String },

    /// A model or record the operation depends on does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: String, id: String },

    /// Compare was asked to diff two nodes of different identity.
    #[error("identity mismatch: expected '{expected}', got '{actual}'")]
    IdentityMismatch { expected: String, actual: String },

    /// Primary store or configuration failure.
    #[error(transparent)]
    Core(#[from] vnc_core::Error),
}

impl Error {
    /// Create a not initialized error.
    pub fn not_initialized(key: impl ToString) -> Self {
        Self::NotInitialized {
            key: key.to_string(),
        }
    }

    /// Create an invalid reference error.
    pub fn invalid_reference(key: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an operation failed error.
    pub fn operation_failed(
        operation: impl Into<String>,
        object: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            object: object.into(),
            reason: reason.into(),
        }
    }

    /// Create an API error.
    pub fn api(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Api {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(kind: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.to_string(),
        }
    }

    /// Create an identity mismatch error.
    pub fn identity_mismatch(expected: impl ToString, actual: impl ToString) -> Self {
        Self::IdentityMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::not_initialized("virtual-network:net-1");
        assert!(err.to_string().contains("virtual-network:net-1"));
    }

    #[test]
    fn test_operation_failed() {
        let err = Error::operation_failed("create", "virtual-network net-1", "timeout");
        assert!(err.to_string().contains("create"));
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_core_error_is_transparent() {
        let err: Error = vnc_core::Error::record_not_found("nic", 9).into();
        assert_eq!(err.to_string(), "nic record '9' not found");
    }
}
