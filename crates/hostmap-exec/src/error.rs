//! Error types for hostmap-exec

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while fanning an operation out to hosts
///
/// Per-host variants end up inside an [`OutcomeRecord`](crate::OutcomeRecord);
/// credential-level variants abort the whole fan-out call.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ExecError {
    /// Username or key location could not be resolved
    #[error("credential error: {0}")]
    Credential(String),

    /// Private key file unreadable or unparsable
    #[error("failed to load key {path}: {reason}")]
    KeyLoad {
        /// Path that was read
        path: String,
        /// Underlying failure
        reason: String,
    },

    /// DNS, TCP or authentication failure for one host
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// File subsystem could not be negotiated on an open connection
    #[error("file subsystem error: {0}")]
    FileSubsystem(String),

    /// Local read or remote write failed mid-transfer
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Per-host task panicked or was cancelled before producing a result
    #[error("host task aborted: {0}")]
    Aborted(String),
}

impl ExecError {
    /// Check if error blocks the whole fan-out call rather than one host
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecError::Credential(_) | ExecError::KeyLoad { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ExecError::Credential("no home".into()).is_fatal());
        assert!(
            ExecError::KeyLoad {
                path: "/nope".into(),
                reason: "missing".into()
            }
            .is_fatal()
        );
        assert!(!ExecError::ConnectionFailed("refused".into()).is_fatal());
        assert!(!ExecError::Transfer("short write".into()).is_fatal());
        assert!(!ExecError::FileSubsystem("denied".into()).is_fatal());
        assert!(!ExecError::Aborted("task 7 panicked".into()).is_fatal());
    }

    #[test]
    fn test_serialize_tagged() {
        let json = serde_json::to_value(ExecError::FileSubsystem("denied".into())).unwrap();
        assert_eq!(json["kind"], "file_subsystem");
        assert_eq!(json["message"], "denied");
    }
}
