//! Domain model shared by `replay-engine` and `replay-node`.
//!
//! Nothing in this crate talks to a network or a filesystem; it is the
//! vocabulary the rest of the workspace is written in.

pub mod block;
pub mod engine_state;
pub mod error;
pub mod hash;
pub mod intent;
pub mod recovery;
pub mod retry;
pub mod transaction;

pub use block::{BlockDescriptor, BlockHash, BlockHeader, BlockNumber, BlockTag, GasPrice, GasPrices};
pub use engine_state::{EngineState, EngineStatus};
pub use error::{ReplayError, Result};
pub use hash::Hash32;
pub use intent::{SyncIntent, SyncStatus, SyncTarget};
pub use recovery::{RecoveryAction, RecoveryFailure};
pub use retry::{BackoffKind, HealthWaitPolicy, PhasedPollPolicy, RetryPolicy};
pub use transaction::{Transaction, TransactionHash, TransactionTag, TransactionType, TransactionVersion};
