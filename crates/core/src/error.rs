//! Errors raised below the model graph: configuration and the primary store.

use std::path::PathBuf;

use thiserror::Error;

/// Failures of configuration loading and primary-store lookups.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("cannot read config '{path}': {reason}")]
    FileReadFailed { path: PathBuf, reason: String },

    #[error("malformed config: {reason}")]
    TomlParseFailed { reason: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// A record the orchestrator referenced is absent from the primary store.
    #[error("{kind} record '{id}' not found")]
    RecordNotFound { kind: String, id: String },

    /// A record is present but cannot be mapped (bad CIDR, bad netmask).
    #[error("invalid record: {reason}")]
    InvalidRecord { reason: String },

    #[error("primary store lookup '{operation}' failed: {reason}")]
    StoreFailed { operation: String, reason: String },
}

impl Error {
    pub fn file_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn toml_parse_failed(reason: impl Into<String>) -> Self {
        Self::TomlParseFailed {
            reason: reason.into(),
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub fn record_not_found(kind: impl Into<String>, id: impl ToString) -> Self {
        Self::RecordNotFound {
            kind: kind.into(),
            id: id.to_string(),
        }
    }

    pub fn invalid_record(reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }

    pub fn store_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_not_found_display() {
        let err = Error::record_not_found("network", 42);
        assert_eq!(err.to_string(), "network record '42' not found");
    }

    #[test]
    fn test_store_failure_names_the_lookup() {
        let err = Error::store_failed("nics_for_vm", "connection refused");
        assert_eq!(
            err.to_string(),
            "primary store lookup 'nics_for_vm' failed: connection refused"
        );
    }
}
