//! The tip-follower: in continuous mode, extends the engine's `sync_to`
//! ceiling as the source chain advances.
//!
//! A fixed-interval polling task: retry with back-off, log and wait out
//! exhaustion rather than crash.

use std::{sync::Arc, time::Duration};

use replay_types::{BlockNumber, RetryPolicy};
use tokio::sync::watch;

use crate::{engine::EngineHandle, resume::ResumeRecordStore, retry_executor, rpc::{Node, RpcFacade}};

const TICK_INTERVAL: Duration = Duration::from_secs(60);

pub struct TipFollower<F> {
    facade: Arc<F>,
    engine: EngineHandle,
    resume: Arc<ResumeRecordStore>,
}

impl<F: RpcFacade + 'static> TipFollower<F> {
    pub fn new(facade: Arc<F>, engine: EngineHandle, resume: Arc<ResumeRecordStore>) -> Self {
        Self { facade, engine, resume }
    }

    /// Runs until `shutdown` fires. Only active while the engine is in
    /// continuous mode; the caller is responsible for only spawning this
    /// when that's true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("tip-follower stopping");
                        return;
                    }
                }
            }
        }
    }

    async fn tick(&self) {
        let result = retry_executor::execute(
            "tip_follower_poll",
            RetryPolicy::tip_follower_poll(),
            retry_executor::default_is_retryable,
            |_attempt| self.facade.get_latest_accepted(Node::Source),
        )
        .await;

        let latest: BlockNumber = match result {
            Ok(latest) => latest,
            Err(err) => {
                tracing::warn!(%err, "tip-follower tick exhausted its retries, waiting for next tick");
                return;
            }
        };

        if self.engine.raise_sync_to(latest) {
            let state = self.engine.snapshot();
            let intent = replay_types::SyncIntent::running(state.sync_to, state.is_continuous, chrono::Utc::now());
            if let Err(err) = self.resume.write(&intent).await {
                tracing::warn!(%err, "failed to persist resume record after raising sync target");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use replay_types::{EngineState, SyncTarget};

    use super::*;
    use crate::{engine::BlockReplayEngine, rpc::testing::FakeRpcFacade};

    #[tokio::test(start_paused = true)]
    async fn raises_sync_to_when_source_advances() {
        let fake = Arc::new(FakeRpcFacade::new());
        fake.seed_source_block(crate::rpc::testing::gas_prices_fixture_block(5));

        let dir = tempfile::tempdir().unwrap();
        let resume = Arc::new(ResumeRecordStore::new(dir.path().join("resume.json")));
        let state = Arc::new(Mutex::new(EngineState::new("test".into(), 1, SyncTarget::Block(1), true)));
        let engine = BlockReplayEngine::new(fake.clone(), resume.clone(), state);
        let handle = engine.handle();

        let follower = TipFollower::new(fake, handle.clone(), resume);
        follower.tick().await;

        assert_eq!(handle.snapshot().sync_to, SyncTarget::Block(5));
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_lower_sync_to() {
        let fake = Arc::new(FakeRpcFacade::new());
        fake.seed_source_block(crate::rpc::testing::gas_prices_fixture_block(1));

        let dir = tempfile::tempdir().unwrap();
        let resume = Arc::new(ResumeRecordStore::new(dir.path().join("resume.json")));
        let state = Arc::new(Mutex::new(EngineState::new("test".into(), 1, SyncTarget::Block(10), true)));
        let engine = BlockReplayEngine::new(fake.clone(), resume.clone(), state);
        let handle = engine.handle();

        let follower = TipFollower::new(fake, handle.clone(), resume);
        follower.tick().await;

        assert_eq!(handle.snapshot().sync_to, SyncTarget::Block(10));
    }
}
