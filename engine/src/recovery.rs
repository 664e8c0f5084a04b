//! Recovery coordinator: reconciles a stateless target with the engine's
//! intent after an outage.
//!
//! Never trusts what the engine remembers doing; re-derives the action
//! entirely from `target.latestAccepted` and `target.preConfirmed` rather
//! than from any local ledger of "what was already done."

use std::sync::Arc;

use replay_types::{BlockNumber, BlockTag, HealthWaitPolicy, RecoveryAction, RecoveryFailure};

use crate::{
    health::TargetHealthMonitor,
    rpc::{Node, NodeAccess},
};

pub struct RecoveryCoordinator {
    facade: Arc<dyn NodeAccess>,
    health: TargetHealthMonitor<Arc<dyn NodeAccess>>,
}

impl RecoveryCoordinator {
    pub fn new(facade: Arc<dyn NodeAccess>) -> Self {
        let health = TargetHealthMonitor::new(facade.clone());
        Self { facade, health }
    }

    /// Runs the full recovery sequence for a target-down observed while the
    /// engine intended to be working on `intended_block`. Never returns an
    /// `Err` -- a coordinator failure is itself a [`RecoveryAction::Failed`].
    pub async fn recover(&self, intended_block: BlockNumber) -> RecoveryAction {
        if !self.health.wait_for_recovery().await {
            let budget = HealthWaitPolicy::recovery_wait().total_budget;
            tracing::error!(?budget, intended_block, "recovery-timeout: target never came back");
            return RecoveryAction::Failed(RecoveryFailure::Timeout(budget));
        }

        let latest = match self.facade.get_latest_accepted(Node::Target).await {
            Ok(l) => l,
            Err(err) => {
                tracing::error!(%err, "failed to query target state right after it reported healthy");
                return RecoveryAction::Failed(RecoveryFailure::QueryFailed(format!(
                    "could not query recovered target: {err}"
                )));
            }
        };

        // L >= intendedBlock, or L < intendedBlock - 1: the target is ahead
        // or further behind than one in-flight block either way -- resume
        // fresh at its actual tip rather than assume anything about
        // in-flight state.
        if latest >= intended_block || latest + 1 < intended_block {
            return RecoveryAction::SkipToBlock(latest + 1);
        }

        // latest == intended_block - 1: the target's last finalized block is
        // exactly the one before what the engine intended, so its
        // pre-confirmed block (if any) may be the in-flight one.
        let pre_confirmed = self.facade.get_block_by_tag(Node::Target, BlockTag::PreConfirmed).await.ok();
        match pre_confirmed {
            Some(pre) if pre.number() == intended_block => {
                let hashes = pre.transaction_hashes();
                if hashes.is_empty() {
                    RecoveryAction::RestartBlock(intended_block)
                } else {
                    RecoveryAction::ContinueBlock(intended_block, hashes)
                }
            }
            _ => RecoveryAction::RestartBlock(latest + 1),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use replay_types::{BlockDescriptor, BlockHeader, GasPrices, Hash32};

    use super::*;
    use crate::rpc::testing::FakeRpcFacade;

    fn block(n: BlockNumber, tx_hashes: &[Hash32]) -> BlockDescriptor {
        BlockDescriptor {
            header: BlockHeader { number: n, parent_hash: Hash32::default(), timestamp: 0, gas_prices: GasPrices::default() },
            block_hash: None,
            transactions: tx_hashes
                .iter()
                .map(|h| replay_types::Transaction {
                    hash: *h,
                    kind: replay_types::TransactionType::Invoke,
                    version: 1,
                    payload: serde_json::Value::Null,
                })
                .collect(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ahead_target_skips_to_its_own_tip_plus_one() {
        let fake = Arc::new(FakeRpcFacade::new());
        fake.target.lock().unwrap().blocks.push(block(50, &[]));
        let coordinator = RecoveryCoordinator::new(fake);
        let action = coordinator.recover(10).await;
        assert_eq!(action, RecoveryAction::SkipToBlock(51));
    }

    #[tokio::test(start_paused = true)]
    async fn far_behind_target_skips_to_its_own_tip_plus_one() {
        let fake = Arc::new(FakeRpcFacade::new());
        fake.target.lock().unwrap().blocks.push(block(5, &[]));
        let coordinator = RecoveryCoordinator::new(fake);
        let action = coordinator.recover(10).await;
        assert_eq!(action, RecoveryAction::SkipToBlock(6));
    }

    #[tokio::test(start_paused = true)]
    async fn no_pre_confirmed_block_restarts_at_intended() {
        let fake = Arc::new(FakeRpcFacade::new());
        fake.target.lock().unwrap().blocks.push(block(9, &[]));
        let coordinator = RecoveryCoordinator::new(fake);
        let action = coordinator.recover(10).await;
        assert_eq!(action, RecoveryAction::RestartBlock(10));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_pre_confirmed_restarts_at_intended() {
        let fake = Arc::new(FakeRpcFacade::new());
        fake.target.lock().unwrap().blocks.push(block(9, &[]));
        fake.target.lock().unwrap().pre_confirmed = Some(block(10, &[]));
        let coordinator = RecoveryCoordinator::new(fake);
        let action = coordinator.recover(10).await;
        assert_eq!(action, RecoveryAction::RestartBlock(10));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_pre_confirmed_continues_with_injected_hashes() {
        let fake = Arc::new(FakeRpcFacade::new());
        let h0 = Hash32([1; 32]);
        let h1 = Hash32([2; 32]);
        fake.target.lock().unwrap().blocks.push(block(9, &[]));
        fake.target.lock().unwrap().pre_confirmed = Some(block(10, &[h0, h1]));
        let coordinator = RecoveryCoordinator::new(fake);
        let action = coordinator.recover(10).await;
        assert_eq!(action, RecoveryAction::ContinueBlock(10, vec![h0, h1]));
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_timeout_when_target_never_returns() {
        let fake = Arc::new(FakeRpcFacade::new());
        fake.set_target_down(true);
        let mut coordinator = RecoveryCoordinator::new(fake);
        coordinator.health.policy = replay_types::HealthWaitPolicy {
            base: std::time::Duration::from_millis(1),
            cap: std::time::Duration::from_millis(5),
            total_budget: std::time::Duration::from_millis(50),
        };
        let action = coordinator.recover(10).await;
        assert!(matches!(action, RecoveryAction::Failed(_)));
    }
}
