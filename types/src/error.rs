use std::time::Duration;

use crate::{block::BlockNumber, hash::Hash32};

/// Every error kind the engine can raise, each with a stable code. The code
/// is what gets logged and surfaced over the status endpoint; the `Display`
/// impl is for operators, the code is for machines.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("target node unreachable: {0}")]
    TargetDown(String),

    #[error("block {block} hash mismatch: source {source_hash} target {target_hash}")]
    HashMismatch {
        block: BlockNumber,
        source_hash: Hash32,
        target_hash: Hash32,
    },

    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("sync already in progress")]
    SyncInProgress,

    #[error("target did not recover within {0:?}")]
    RecoveryTimeout(Duration),

    #[error("receipts for block {0} did not converge in time")]
    ReceiptTimeout(BlockNumber),

    #[error("transaction {hash} injection failed: {reason}")]
    InjectFailed { hash: Hash32, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    /// A transient, retryable transport fault (anything that isn't one of
    /// the fatal classes above). The retry executor resolves these itself;
    /// they should only ever reach the engine after a policy is exhausted.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ReplayError {
    /// The stable machine-readable code, as used in logs and the status API.
    pub fn code(&self) -> &'static str {
        match self {
            ReplayError::TargetDown(_) => "target-down",
            ReplayError::HashMismatch { .. } => "hash-mismatch",
            ReplayError::InvalidBlock(_) => "invalid-block",
            ReplayError::SyncInProgress => "sync-in-progress",
            ReplayError::RecoveryTimeout(_) => "recovery-timeout",
            ReplayError::ReceiptTimeout(_) => "receipt-timeout",
            ReplayError::InjectFailed { .. } => "inject-failed",
            ReplayError::Config(_) => "config-error",
            ReplayError::Transport(_) => "transport-error",
        }
    }

    pub fn is_target_down(&self) -> bool {
        matches!(self, ReplayError::TargetDown(_))
    }

    /// The default `isRetryable` predicate (§4.1): everything is retryable
    /// except the two classes that must surface immediately.
    pub fn default_is_retryable(&self) -> bool {
        !matches!(self, ReplayError::TargetDown(_) | ReplayError::HashMismatch { .. })
    }
}

pub type Result<T> = std::result::Result<T, ReplayError>;

/// Classifies a raw transport failure (a connection-level error from the RPC
/// client) into `target-down` vs. a retryable transport error, per §4.3:
/// "connection refused / DNS / reset / fetch-failed -> target-down;
/// everything else is transport-transient."
pub fn classify_transport_error(message: &str) -> ReplayError {
    let lower = message.to_ascii_lowercase();
    let is_target_down = ["connection refused", "dns", "reset", "fetch failed", "fetch-failed"]
        .iter()
        .any(|needle| lower.contains(needle));
    if is_target_down {
        ReplayError::TargetDown(message.to_string())
    } else {
        ReplayError::Transport(message.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classifies_connection_refused_as_target_down() {
        let err = classify_transport_error("Connection refused (os error 111)");
        assert!(err.is_target_down());
        assert_eq!(err.code(), "target-down");
    }

    #[test]
    fn classifies_timeout_as_transport() {
        let err = classify_transport_error("operation timed out");
        assert!(!err.is_target_down());
        assert_eq!(err.code(), "transport-error");
    }

    #[test]
    fn fatal_classes_are_not_retryable_by_default() {
        assert!(!ReplayError::TargetDown("x".into()).default_is_retryable());
        assert!(!ReplayError::HashMismatch {
            block: 1,
            source_hash: Hash32::default(),
            target_hash: Hash32::default()
        }
        .default_is_retryable());
        assert!(ReplayError::Transport("x".into()).default_is_retryable());
    }
}
