use std::time::Duration;

use crate::{block::BlockNumber, hash::Hash32};

/// The recovery coordinator's verdict on how the engine should proceed,
/// derived purely from the target's own state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Re-stamp the header and re-inject from scratch at `block`.
    RestartBlock(BlockNumber),
    /// `block` is already pre-confirmed with `already_injected` transaction
    /// hashes in place; resume injecting from the next source transaction.
    ContinueBlock(BlockNumber, Vec<Hash32>),
    /// The target is already ahead (or further behind than one block);
    /// resume at `block` with no assumptions about in-flight state.
    SkipToBlock(BlockNumber),
    /// Recovery could not reconcile target state with engine intent.
    Failed(RecoveryFailure),
}

/// Why the recovery coordinator gave up, kept distinct from a generic
/// target-down so the engine can surface the right stable error code
/// (§7: "recovery-timeout" is its own class, separate from "target-down").
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoveryFailure {
    /// The target never answered healthy within the wait budget.
    Timeout(Duration),
    /// The target reported healthy but a follow-up state query still failed.
    QueryFailed(String),
}
