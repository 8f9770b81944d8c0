use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure categories shared by every layer of the sync engine.
///
/// The category, not the message, decides what happens next: transient
/// failures are retried through the outbox, permanent ones are surfaced to
/// the user and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Network failure or timeout. Safe to retry later.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Membership or permission violation. Retrying will not help.
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// Unknown join code, link, group or record.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Blocked by a policy switch (e.g. single-group beta mode).
    #[error("Feature disabled: {0}")]
    FeatureDisabled(String),

    /// Two mutations of the same resource raced. Resolved by merging.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed identifiers or input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The local durable store failed.
    #[error("Local storage error: {0}")]
    Storage(String),
}

/// Convenience alias used throughout the workspace.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Wire-level tag for a [`SyncError`], carried in backend error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent,
    NotFound,
    FeatureDisabled,
    Conflict,
    InvalidInput,
    Storage,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Transient(_) => ErrorKind::Transient,
            SyncError::Permanent(_) => ErrorKind::Permanent,
            SyncError::NotFound(_) => ErrorKind::NotFound,
            SyncError::FeatureDisabled(_) => ErrorKind::FeatureDisabled,
            SyncError::Conflict(_) => ErrorKind::Conflict,
            SyncError::InvalidInput(_) => ErrorKind::InvalidInput,
            SyncError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Rebuild an error from its wire tag and message.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Transient => SyncError::Transient(message),
            ErrorKind::Permanent => SyncError::Permanent(message),
            ErrorKind::NotFound => SyncError::NotFound(message),
            ErrorKind::FeatureDisabled => SyncError::FeatureDisabled(message),
            ErrorKind::Conflict => SyncError::Conflict(message),
            ErrorKind::InvalidInput => SyncError::InvalidInput(message),
            ErrorKind::Storage => SyncError::Storage(message),
        }
    }

    /// Whether the operation may succeed if simply tried again later.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_wire_tag() {
        let err = SyncError::FeatureDisabled("single group mode".into());
        let rebuilt = SyncError::from_kind(err.kind(), "single group mode");
        assert_eq!(err, rebuilt);
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(SyncError::Transient("timeout".into()).is_transient());
        assert!(!SyncError::Permanent("left group".into()).is_transient());
        assert!(!SyncError::Conflict("race".into()).is_transient());
    }
}
