//! Command surface: admits `start`/`cancel`/`status` requests and enforces
//! the single-sync invariant -- at most one engine runs per process.
//!
//! The handle to the running engine lives behind a lock that is held across
//! the async setup work in `start`, so two concurrent callers can't both
//! observe "nothing running" and race each other into starting a second
//! engine.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex as SyncMutex;
use replay_types::{BlockNumber, EngineState, ReplayError, SyncIntent, SyncTarget};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};

use crate::{
    engine::{BlockReplayEngine, EngineHandle},
    resume::ResumeRecordStore,
    rpc::{Node, NodeAccess},
    tip_follower::TipFollower,
};

struct RunningSync {
    handle: EngineHandle,
    engine_task: JoinHandle<()>,
    tip_shutdown: watch::Sender<bool>,
    tip_task: Option<JoinHandle<()>>,
}

/// One per process. Owns the (at most one) running engine and the
/// tip-follower paired with it.
pub struct CommandSurface {
    facade: Arc<dyn NodeAccess>,
    resume: Arc<ResumeRecordStore>,
    running: Mutex<Option<RunningSync>>,
    next_id: SyncMutex<u64>,
}

impl CommandSurface {
    pub fn new(facade: Arc<dyn NodeAccess>, resume: Arc<ResumeRecordStore>) -> Self {
        Self { facade, resume, running: Mutex::new(None), next_id: SyncMutex::new(0) }
    }

    fn fresh_id(&self) -> String {
        let mut next = self.next_id.lock();
        *next += 1;
        format!("sync-{next}")
    }

    /// §4.8 `start(endBlock)`. Holds the lock across every `await` in this
    /// function: a second caller blocks on the same lock rather than racing
    /// a "nothing running yet" read, which is what makes the single-sync
    /// invariant hold under real concurrency rather than just in the
    /// average case.
    pub async fn start(&self, end_block: SyncTarget) -> Result<EngineState, ReplayError> {
        let mut slot = self.running.lock().await;
        if let Some(running) = slot.as_ref() {
            if !running.handle.snapshot().status.is_terminal() {
                return Err(ReplayError::SyncInProgress);
            }
        }

        let source_latest = self.facade.get_latest_accepted(Node::Source).await?;
        let sync_to = match end_block {
            SyncTarget::Latest => SyncTarget::Block(source_latest),
            SyncTarget::Block(n) => {
                if n == 0 || n > source_latest {
                    return Err(ReplayError::InvalidBlock(format!(
                        "block {n} is not yet final at source (latest is {source_latest})"
                    )));
                }
                SyncTarget::Block(n)
            }
        };
        let is_continuous = matches!(end_block, SyncTarget::Latest);
        let sync_from = self.facade.get_latest_accepted(Node::Target).await.map(|l| l + 1).unwrap_or(0);

        let state = self.spawn(self.fresh_id(), sync_from, sync_to, is_continuous).await;
        let snapshot = state.handle.snapshot();
        *slot = Some(state);
        Ok(snapshot)
    }

    /// Re-enters the engine on process start; bypasses the single-sync check
    /// since nothing can be running yet this early.
    pub async fn resume_from_startup(&self, sync_from: BlockNumber, sync_to: SyncTarget, is_continuous: bool) {
        let mut slot = self.running.lock().await;
        let state = self.spawn("sync-resumed".to_string(), sync_from, sync_to, is_continuous).await;
        *slot = Some(state);
    }

    async fn spawn(&self, id: String, sync_from: BlockNumber, sync_to: SyncTarget, is_continuous: bool) -> RunningSync {
        let state = Arc::new(parking_lot::Mutex::new(EngineState::new(id, sync_from, sync_to, is_continuous)));
        let engine = BlockReplayEngine::new(self.facade.clone(), self.resume.clone(), state);
        let handle = engine.handle();

        let engine_task = tokio::spawn(async move { engine.run().await });

        let (tip_shutdown, tip_shutdown_rx) = watch::channel(false);
        let tip_task = if is_continuous {
            let follower = TipFollower::new(self.facade.clone(), handle.clone(), self.resume.clone());
            Some(tokio::spawn(async move { follower.run(tip_shutdown_rx).await }))
        } else {
            None
        };

        RunningSync { handle, engine_task, tip_shutdown, tip_task }
    }

    /// §4.8 `cancel(mode)`. Returns the engine's position at the moment of
    /// the request, or `None` if nothing is running.
    pub async fn cancel(&self, complete_current_block: bool) -> Option<EngineState> {
        let slot = self.running.lock().await;
        let running = slot.as_ref()?;
        running.handle.request_cancel(complete_current_block);
        Some(running.handle.snapshot())
    }

    /// §4.8 `status()`.
    pub async fn status(&self) -> Option<EngineState> {
        let slot = self.running.lock().await;
        Some(slot.as_ref()?.handle.snapshot())
    }

    pub async fn is_running(&self) -> bool {
        let slot = self.running.lock().await;
        slot.as_ref().is_some_and(|r| !r.handle.snapshot().status.is_terminal())
    }

    /// Stops the tip-follower and waits for the engine task to finish its
    /// current checkpoint, for graceful shutdown. Leaves the resume record
    /// as the engine itself last wrote it (§4.4: written at "shutdown").
    pub async fn shutdown(&self) {
        let mut slot = self.running.lock().await;
        if let Some(mut running) = slot.take() {
            running.handle.request_cancel(false);
            let _ = running.tip_shutdown.send(true);
            if let Some(tip_task) = running.tip_task.take() {
                let _ = tip_task.await;
            }
            let _ = running.engine_task.await;
            if running.handle.snapshot().status == replay_types::EngineStatus::Running {
                let _ = self.resume.write(&SyncIntent::running(
                    running.handle.snapshot().sync_to,
                    running.handle.snapshot().is_continuous,
                    Utc::now(),
                )).await;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::rpc::testing::{gas_prices_fixture_block, FakeRpcFacade};

    fn surface() -> (CommandSurface, tempfile::TempDir, Arc<FakeRpcFacade>) {
        let fake = Arc::new(FakeRpcFacade::new());
        let dir = tempfile::tempdir().unwrap();
        let resume = Arc::new(ResumeRecordStore::new(dir.path().join("resume.json")));
        (CommandSurface::new(fake.clone(), resume), dir, fake)
    }

    #[tokio::test(start_paused = true)]
    async fn start_then_status_reports_running() {
        let (surface, _dir, fake) = surface();
        fake.seed_source_block(gas_prices_fixture_block(1));
        let started = surface.start(SyncTarget::Block(1)).await.unwrap();
        assert_eq!(started.sync_to, SyncTarget::Block(1));
        assert!(surface.status().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn second_concurrent_start_is_rejected() {
        let (surface, _dir, fake) = surface();
        for n in 1..=5 {
            fake.seed_source_block(gas_prices_fixture_block(n));
        }
        let first = surface.start(SyncTarget::Block(5)).await;
        assert!(first.is_ok());
        let second = surface.start(SyncTarget::Block(5)).await;
        assert!(matches!(second, Err(ReplayError::SyncInProgress)));
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_a_block_past_source_tip() {
        let (surface, _dir, fake) = surface();
        fake.seed_source_block(gas_prices_fixture_block(1));
        let result = surface.start(SyncTarget::Block(99)).await;
        assert!(matches!(result, Err(ReplayError::InvalidBlock(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_with_nothing_running_returns_none() {
        let (surface, _dir, _fake) = surface();
        assert!(surface.cancel(false).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_flags_the_running_engine() {
        let (surface, _dir, fake) = surface();
        fake.seed_source_block(gas_prices_fixture_block(1));
        surface.start(SyncTarget::Latest).await.unwrap();
        let snapshot = surface.cancel(true).await.unwrap();
        assert!(snapshot.cancel_requested);
        assert!(snapshot.complete_current_block);
    }

    #[tokio::test(start_paused = true)]
    async fn latest_resolves_to_a_concrete_block_immediately() {
        let (surface, _dir, fake) = surface();
        fake.seed_source_block(gas_prices_fixture_block(7));
        let started = surface.start(SyncTarget::Latest).await.unwrap();
        assert_eq!(started.sync_to, SyncTarget::Block(7));
        assert!(started.is_continuous);
    }
}
