//! The transaction-adapter seam.
//!
//! The engine, and the RPC facade it drives, only ever see this trait: "hand
//! me a transaction, get back a hash or an error." What happens on the wire
//! for each `(type, version)` pair is out of this crate's scope -- concrete
//! adapters live in the binary crate, keyed by [`replay_types::TransactionTag`].

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use replay_types::{ReplayError, Transaction, TransactionHash, TransactionTag};

/// Routes one `(type, version)` transaction to the target node's admin RPC
/// and returns the hash the target assigned it.
///
/// Errors are classified exactly like every other facade call: a connection
/// failure to the target is `target-down`; a rejection by the target (e.g.
/// an invalid signature) is some other, non-retryable error that fails the
/// block per §4.5 step 3.
#[async_trait]
pub trait TransactionAdapter: Send + Sync {
    async fn inject(&self, tx: &Transaction) -> Result<TransactionHash, ReplayError>;
}

/// Indexes adapters by `(type, version)`, per the Design Notes' "dynamic
/// variants" guidance: one dispatch-table entry per concrete shape rather
/// than a branching match spread across the facade.
#[derive(Default)]
pub struct AdapterDispatchTable {
    adapters: HashMap<TransactionTag, Arc<dyn TransactionAdapter>>,
}

impl AdapterDispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tag: TransactionTag, adapter: Arc<dyn TransactionAdapter>) -> &mut Self {
        self.adapters.insert(tag, adapter);
        self
    }

    pub async fn inject(&self, tx: &Transaction) -> Result<TransactionHash, ReplayError> {
        let tag = tx.tag();
        match self.adapters.get(&tag) {
            Some(adapter) => adapter.inject(tx).await,
            None => Err(ReplayError::InjectFailed {
                hash: tx.hash,
                reason: format!("no adapter registered for {tag:?}"),
            }),
        }
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    /// Accepts every transaction and assigns it a deterministic hash derived
    /// from an injection counter, so tests can assert on injection order.
    #[derive(Default)]
    pub struct AcceptingAdapter {
        injected: AtomicU64,
    }

    #[async_trait]
    impl TransactionAdapter for AcceptingAdapter {
        async fn inject(&self, tx: &Transaction) -> Result<TransactionHash, ReplayError> {
            self.injected.fetch_add(1, Ordering::SeqCst);
            Ok(tx.hash)
        }
    }

    /// Always fails with a non-retryable error, for testing `inject-failed`.
    pub struct RejectingAdapter;

    #[async_trait]
    impl TransactionAdapter for RejectingAdapter {
        async fn inject(&self, tx: &Transaction) -> Result<TransactionHash, ReplayError> {
            Err(ReplayError::InjectFailed { hash: tx.hash, reason: "rejected by target".into() })
        }
    }

    pub fn accepting_dispatch_table() -> AdapterDispatchTable {
        use replay_types::TransactionType::*;
        let mut table = AdapterDispatchTable::new();
        for kind in [Invoke, Declare, DeployAccount, L1Handler] {
            for version in 0..=3u8 {
                table.register(TransactionTag { kind, version }, Arc::new(AcceptingAdapter::default()));
            }
        }
        table
    }
}
