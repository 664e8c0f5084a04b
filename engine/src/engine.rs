//! The block-replay engine: the single long-running task that drives the
//! target node block-by-block to match the source.
//!
//! Owns a cursor over the block range, runs the six-step pipeline per block
//! (align, stamp header, inject transactions, close, verify hash, advance),
//! and reacts to a shared, mutex-guarded state object for external commands.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use replay_types::{
    BlockDescriptor, BlockNumber, BlockTag, EngineState, EngineStatus, Hash32, PhasedPollPolicy, RecoveryFailure,
    ReplayError, RetryPolicy, SyncTarget, TransactionHash,
};

use crate::{
    health::TargetHealthMonitor,
    recovery::RecoveryCoordinator,
    resume::ResumeRecordStore,
    retry_executor,
    rpc::{Node, NodeAccess},
};

/// A shared, cloneable reference to the running engine's state, handed to
/// the command surface and the tip-follower. Neither owns the engine task;
/// both only ever touch the state behind the single critical section
/// (§5: "All mutations use a single critical section guarding the engine
/// state").
#[derive(Clone)]
pub struct EngineHandle {
    state: Arc<Mutex<EngineState>>,
}

impl EngineHandle {
    pub fn snapshot(&self) -> EngineState {
        self.state.lock().clone()
    }

    /// §4.8: the command surface only ever touches `cancel_requested` and
    /// `complete_current_block`.
    pub fn request_cancel(&self, complete_current_block: bool) {
        let mut state = self.state.lock();
        state.cancel_requested = true;
        state.complete_current_block = complete_current_block;
        tracing::info!(complete_current_block, "cancel requested");
    }

    /// §4.7: the tip-follower only ever touches `sync_to` and the processed
    /// count it reports alongside it.
    pub fn raise_sync_to(&self, sync_to: BlockNumber) -> bool {
        let mut state = self.state.lock();
        let current = state.sync_to.as_block().unwrap_or(0);
        if sync_to > current {
            state.sync_to = SyncTarget::Block(sync_to);
            tracing::info!(sync_to, "tip-follower raised sync target");
            true
        } else {
            false
        }
    }
}

/// Where block N's per-block pipeline landed.
enum BlockOutcome {
    Completed,
    NeedsRecovery,
    CancelledImmediate,
    Fatal(ReplayError),
}

/// Where a single transaction's injection landed (§4.5 step 3 / §4.1's
/// "on transport fault, probe health once and escalate").
enum InjectOutcome {
    Injected(TransactionHash),
    NeedsRecovery,
    Fatal(ReplayError),
}

/// The outcome of pre-sync alignment (§4.5 "Pre-sync alignment"): where
/// exactly within the requested range the loop should actually begin.
enum InitialPlan {
    AlreadyComplete,
    /// Begin fresh (or resuming mid-block) at `block`, with `already_injected`
    /// transaction hashes already present in the target's pre-confirmed block.
    Begin { block: BlockNumber, already_injected: Vec<Hash32> },
    /// The pre-confirmed block already has every source transaction; close
    /// it and begin the loop proper at `block + 1`.
    CloseThenAdvance { block: BlockNumber },
}

pub struct BlockReplayEngine {
    facade: Arc<dyn NodeAccess>,
    health: TargetHealthMonitor<Arc<dyn NodeAccess>>,
    recovery: RecoveryCoordinator,
    resume: Arc<ResumeRecordStore>,
    state: Arc<Mutex<EngineState>>,
}

impl BlockReplayEngine {
    pub fn new(facade: Arc<dyn NodeAccess>, resume: Arc<ResumeRecordStore>, state: Arc<Mutex<EngineState>>) -> Self {
        let health = TargetHealthMonitor::new(facade.clone());
        let recovery = RecoveryCoordinator::new(facade.clone());
        Self { facade, health, recovery, resume, state }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle { state: self.state.clone() }
    }

    fn snapshot(&self) -> EngineState {
        self.state.lock().clone()
    }

    /// Drives the engine to completion, cancellation, or fatal failure. This
    /// owns every resume-record write except the tip-follower's (§4.4:
    /// "written at ... start-of-run ... clean stop/completion, shutdown").
    pub async fn run(&self) {
        let initial = self.snapshot();
        tracing::info!(id = %initial.id, sync_from = initial.sync_from, sync_to = ?initial.sync_to, "engine starting");
        self.persist_running().await;

        let plan = match self.plan_initial_block(initial.sync_from, initial.sync_to).await {
            Ok(plan) => plan,
            Err(err) => {
                self.fail(err).await;
                return;
            }
        };

        let mut already_injected = match plan {
            InitialPlan::AlreadyComplete => {
                self.complete().await;
                return;
            }
            InitialPlan::Begin { block, already_injected } => {
                self.state.lock().current_block = block;
                Some(already_injected)
            }
            InitialPlan::CloseThenAdvance { block } => match self.facade.admin_close_block().await {
                Ok(()) => {
                    self.state.lock().current_block = block + 1;
                    None
                }
                Err(err) if err.is_target_down() => match self.recover_into_plan(block).await {
                    Ok(InitialPlan::Begin { block, already_injected }) => {
                        self.state.lock().current_block = block;
                        Some(already_injected)
                    }
                    Ok(_) => unreachable!("recover_into_plan only ever returns InitialPlan::Begin"),
                    Err(err) => {
                        self.fail(err).await;
                        return;
                    }
                },
                Err(err) => {
                    self.fail(err).await;
                    return;
                }
            },
        };

        loop {
            let (current, sync_to, is_continuous, should_stop) = {
                let state = self.state.lock();
                (state.current_block, state.sync_to, state.is_continuous, state.cancel_requested && state.complete_current_block)
            };

            if let Some(ceiling) = sync_to.as_block() {
                if current > ceiling {
                    if is_continuous {
                        if should_stop {
                            self.cancel_idle().await;
                            return;
                        }
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                    self.complete().await;
                    return;
                }
            }

            match self.run_block(current, already_injected.take()).await {
                BlockOutcome::Completed => {
                    let finish_now = {
                        let mut state = self.state.lock();
                        state.processed_blocks += 1;
                        state.current_block += 1;
                        tracing::info!(block = current, "block completed");
                        state.cancel_requested && state.complete_current_block
                    };
                    if finish_now {
                        self.cancel_idle().await;
                        return;
                    }
                }
                BlockOutcome::CancelledImmediate => {
                    self.cancel_idle().await;
                    return;
                }
                BlockOutcome::NeedsRecovery => match self.recovery.recover(current).await {
                    replay_types::RecoveryAction::Failed(failure) => {
                        self.fail(recovery_failure_to_error(failure)).await;
                        return;
                    }
                    action => self.apply_recovery_action(action, &mut already_injected),
                },
                BlockOutcome::Fatal(err) => {
                    self.fail(err).await;
                    return;
                }
            }
        }
    }

    fn apply_recovery_action(&self, action: replay_types::RecoveryAction, already_injected: &mut Option<Vec<Hash32>>) {
        use replay_types::RecoveryAction::*;
        let mut state = self.state.lock();
        match action {
            RestartBlock(block) => {
                state.current_block = block;
                *already_injected = Some(Vec::new());
            }
            ContinueBlock(block, hashes) => {
                state.current_block = block;
                *already_injected = Some(hashes);
            }
            SkipToBlock(block) => {
                state.current_block = block;
                *already_injected = Some(Vec::new());
            }
            Failed(_) => unreachable!("Failed is handled by the caller before reaching here"),
        }
        tracing::info!(current_block = state.current_block, "recovery resolved, resuming");
    }

    /// §4.5 "Pre-sync alignment (first iteration only)". A target-down fault
    /// at any step here is handed to the same recovery coordinator the main
    /// loop uses (§4.6): its state query already derives exactly the start
    /// point this method would otherwise compute by hand.
    async fn plan_initial_block(&self, sync_from: BlockNumber, sync_to: SyncTarget) -> Result<InitialPlan, ReplayError> {
        let pre_confirmed = self.facade.get_block_by_tag(Node::Target, BlockTag::PreConfirmed).await;
        let (n, already) = match pre_confirmed {
            Ok(block) => (block.number(), block.transaction_hashes()),
            Err(err) if err.is_target_down() => return self.recover_into_plan(sync_from).await,
            Err(_) => {
                let latest = self.facade.get_latest_accepted(Node::Target).await?;
                (latest + 1, Vec::new())
            }
        };
        let n = n.max(sync_from);

        if let Some(ceiling) = sync_to.as_block() {
            if n > ceiling {
                return Ok(InitialPlan::AlreadyComplete);
            }
        }

        if already.is_empty() {
            return Ok(InitialPlan::Begin { block: n, already_injected: Vec::new() });
        }

        let source_block = match self.fetch_source_block(n).await {
            Ok(block) => block,
            Err(err) if err.is_target_down() => return self.recover_into_plan(n).await,
            Err(err) => return Err(err),
        };
        let y = already.len();
        let x = source_block.transactions.len();
        if y < x {
            Ok(InitialPlan::Begin { block: n, already_injected: already })
        } else if y == x {
            Ok(InitialPlan::CloseThenAdvance { block: n })
        } else {
            Err(ReplayError::InvalidBlock(format!(
                "target pre-confirmed block {n} has {y} transactions but source has only {x}"
            )))
        }
    }

    async fn recover_into_plan(&self, intended_block: BlockNumber) -> Result<InitialPlan, ReplayError> {
        use replay_types::RecoveryAction::*;
        match self.recovery.recover(intended_block).await {
            Failed(failure) => Err(recovery_failure_to_error(failure)),
            RestartBlock(block) | SkipToBlock(block) => Ok(InitialPlan::Begin { block, already_injected: Vec::new() }),
            ContinueBlock(block, hashes) => Ok(InitialPlan::Begin { block, already_injected: hashes }),
        }
    }

    /// The per-block pipeline, §4.5 steps 1-6 (step 7, advance, is the
    /// caller's job since it also owns the cancellation checkpoint).
    async fn run_block(&self, n: BlockNumber, already_injected: Option<Vec<Hash32>>) -> BlockOutcome {
        if let Err(outcome) = self.align(n).await {
            return outcome;
        }

        let source_block = match self.fetch_source_block(n).await {
            Ok(block) => block,
            Err(err) if err.is_target_down() => return BlockOutcome::NeedsRecovery,
            Err(err) => return BlockOutcome::Fatal(err),
        };

        let already_injected = already_injected.unwrap_or_default();
        if already_injected.is_empty() {
            let expected_hash = source_block.block_hash.unwrap_or_default();
            if let Err(err) = self.facade.admin_set_custom_header(&source_block.header, expected_hash).await {
                return if err.is_target_down() { BlockOutcome::NeedsRecovery } else { BlockOutcome::Fatal(err) };
            }
        }

        match self.inject_all(n, &source_block, already_injected).await {
            InjectAllOutcome::Completed => {}
            InjectAllOutcome::Cancelled => return BlockOutcome::CancelledImmediate,
            InjectAllOutcome::NeedsRecovery => return BlockOutcome::NeedsRecovery,
            InjectAllOutcome::Fatal(err) => return BlockOutcome::Fatal(err),
        }

        if let Err(err) = self.facade.admin_close_block().await {
            return if err.is_target_down() { BlockOutcome::NeedsRecovery } else { BlockOutcome::Fatal(err) };
        }

        let injected_hashes: Vec<Hash32> = source_block.transactions.iter().map(|tx| tx.hash).collect();
        if let Err(err) = self.validate_receipts(n, &injected_hashes).await {
            return if err.is_target_down() { BlockOutcome::NeedsRecovery } else { BlockOutcome::Fatal(err) };
        }

        match self.verify_hash(n, source_block.block_hash).await {
            Ok(()) => BlockOutcome::Completed,
            Err(err) if err.is_target_down() => BlockOutcome::NeedsRecovery,
            Err(err) => BlockOutcome::Fatal(err),
        }
    }

    /// §4.5 step 1.
    async fn align(&self, n: BlockNumber) -> Result<(), BlockOutcome> {
        let result = retry_executor::execute("align", RetryPolicy::align_precondition(), retry_executor::default_is_retryable, |_attempt| async move {
            let latest = self.facade.get_latest_accepted(Node::Target).await?;
            if latest + 1 == n {
                Ok(())
            } else {
                Err(ReplayError::InvalidBlock(format!("target latest-accepted {latest} is not one behind {n}")))
            }
        })
        .await;
        match result {
            Ok(()) => Ok(()),
            Err(_) => Err(BlockOutcome::NeedsRecovery),
        }
    }

    async fn fetch_source_block(&self, n: BlockNumber) -> Result<BlockDescriptor, ReplayError> {
        retry_executor::execute("source_block_fetch", RetryPolicy::source_block_fetch(), retry_executor::default_is_retryable, |_attempt| {
            self.facade.get_block(Node::Source, n)
        })
        .await
    }

    async fn inject_all(&self, n: BlockNumber, source_block: &BlockDescriptor, already_injected: Vec<Hash32>) -> InjectAllOutcome {
        let skip = already_injected.len();
        for tx in source_block.transactions.iter().skip(skip) {
            let cancel_immediate = {
                let state = self.state.lock();
                state.cancel_requested && !state.complete_current_block
            };
            if cancel_immediate {
                tracing::info!(block = n, "immediate cancel observed between transactions");
                return InjectAllOutcome::Cancelled;
            }

            match self.inject_one(tx).await {
                InjectOutcome::Injected(_) => {}
                InjectOutcome::NeedsRecovery => return InjectAllOutcome::NeedsRecovery,
                InjectOutcome::Fatal(err) => return InjectAllOutcome::Fatal(err),
            }
        }
        InjectAllOutcome::Completed
    }

    /// §4.1's transaction-inject policy: fixed 30s, 3 attempts, fail-fast on
    /// target-down, and on any other transport fault, probe health once
    /// before retrying -- an unhealthy target escalates straight to
    /// recovery instead of burning the remaining attempts.
    async fn inject_one(&self, tx: &replay_types::Transaction) -> InjectOutcome {
        let policy = RetryPolicy::transaction_inject();
        let mut attempt = 1u32;
        loop {
            match self.facade.admin_inject(tx).await {
                Ok(hash) => return InjectOutcome::Injected(hash),
                Err(err) if err.is_target_down() => return InjectOutcome::NeedsRecovery,
                Err(err) if !matches!(err, ReplayError::Transport(_)) => return InjectOutcome::Fatal(err),
                Err(err) => {
                    if !self.health.is_healthy().await {
                        tracing::warn!(hash = %tx.hash, "target unhealthy after transport fault, escalating to recovery");
                        return InjectOutcome::NeedsRecovery;
                    }
                    match policy.delay(attempt) {
                        Some(delay) => {
                            tracing::warn!(hash = %tx.hash, attempt, "retrying injection after transport fault");
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        None => return InjectOutcome::Fatal(err),
                    }
                }
            }
        }
    }

    /// §4.5 step 5: phased-poll batch receipt validation.
    async fn validate_receipts(&self, n: BlockNumber, injected_hashes: &[Hash32]) -> Result<(), ReplayError> {
        let policy = PhasedPollPolicy::receipt_batch();
        let start = std::time::Instant::now();
        tokio::time::sleep(policy.initial_delay).await;
        loop {
            let elapsed = start.elapsed();
            if elapsed >= policy.budget {
                tracing::error!(block = n, "receipts did not converge within budget");
                return Err(ReplayError::ReceiptTimeout(n));
            }

            match self.facade.get_block_with_receipts(n).await {
                Ok(receipts) => {
                    let by_hash: std::collections::HashMap<_, _> =
                        receipts.receipts.iter().map(|r| (r.transaction_hash, r)).collect();
                    let mut missing = false;
                    for hash in injected_hashes {
                        match by_hash.get(hash) {
                            Some(receipt) if receipt.has_recognized_status() => {}
                            Some(receipt) => {
                                tracing::error!(block = n, hash = %hash, status = %receipt.execution_status, "unrecognized receipt status");
                                return Err(ReplayError::InjectFailed {
                                    hash: *hash,
                                    reason: format!("unrecognized execution status {}", receipt.execution_status),
                                });
                            }
                            None => missing = true,
                        }
                    }
                    if !missing {
                        return Ok(());
                    }
                }
                Err(err) if err.is_target_down() => return Err(err),
                Err(_) => {}
            }

            if elapsed > Duration::from_secs(5) {
                tracing::warn!(block = n, ?elapsed, "receipts still converging past phase 1");
            }
            tokio::time::sleep(policy.interval_at(elapsed)).await;
        }
    }

    /// §4.5 step 6.
    async fn verify_hash(&self, n: BlockNumber, expected: Option<Hash32>) -> Result<(), ReplayError> {
        let expected = expected.unwrap_or_default();
        retry_executor::execute("verify_hash", RetryPolicy::hash_match(), retry_executor::default_is_retryable, |_attempt| async move {
            let target_block = self.facade.get_block(Node::Target, n).await?;
            match target_block.block_hash {
                None => Err(ReplayError::Transport(format!("block {n} not finalized yet"))),
                Some(actual) if actual == expected => Ok(()),
                Some(actual) => Err(ReplayError::HashMismatch { block: n, source_hash: expected, target_hash: actual }),
            }
        })
        .await
    }

    async fn persist_running(&self) {
        let state = self.snapshot();
        let intent = replay_types::SyncIntent::running(state.sync_to, state.is_continuous, chrono::Utc::now());
        if let Err(err) = self.resume.write(&intent).await {
            tracing::warn!(%err, "failed to persist start-of-run resume record");
        }
    }

    async fn complete(&self) {
        tracing::info!("engine completed its sync range");
        self.state.lock().status = EngineStatus::Completed;
        if let Err(err) = self.resume.write_idle().await {
            tracing::warn!(%err, "failed to persist idle resume record on completion");
        }
    }

    async fn cancel_idle(&self) {
        tracing::info!("engine stopped on cancellation");
        self.state.lock().status = EngineStatus::Cancelled;
        if let Err(err) = self.resume.write_idle().await {
            tracing::warn!(%err, "failed to persist idle resume record on cancel");
        }
    }

    async fn fail(&self, err: ReplayError) {
        tracing::error!(code = err.code(), %err, "engine failed");
        {
            let mut state = self.state.lock();
            state.status = EngineStatus::Failed;
            state.critical_error = Some(err.to_string());
        }
        if let Err(write_err) = self.resume.write_idle().await {
            tracing::warn!(%write_err, "failed to persist idle resume record on failure");
        }
    }
}

enum InjectAllOutcome {
    Completed,
    Cancelled,
    NeedsRecovery,
    Fatal(ReplayError),
}

/// §7's "recovery-timeout" is its own stable error code, distinct from
/// "target-down", for the one failure mode that's actually a wait-budget
/// expiry rather than an unreachable endpoint.
fn recovery_failure_to_error(failure: RecoveryFailure) -> ReplayError {
    match failure {
        RecoveryFailure::Timeout(budget) => ReplayError::RecoveryTimeout(budget),
        RecoveryFailure::QueryFailed(reason) => ReplayError::TargetDown(reason),
    }
}

#[cfg(test)]
mod test {
    use replay_types::{BlockHeader, GasPrices, Transaction, TransactionType};

    use super::*;
    use crate::rpc::testing::FakeRpcFacade;

    fn source_block(n: BlockNumber, hashes: &[Hash32]) -> BlockDescriptor {
        BlockDescriptor {
            header: BlockHeader { number: n, parent_hash: Hash32::default(), timestamp: 1000 + n, gas_prices: GasPrices::default() },
            block_hash: Some(Hash32([n as u8; 32])),
            transactions: hashes
                .iter()
                .map(|h| Transaction { hash: *h, kind: TransactionType::Invoke, version: 1, payload: serde_json::Value::Null })
                .collect(),
        }
    }

    fn new_engine(fake: Arc<FakeRpcFacade>, sync_from: BlockNumber, sync_to: SyncTarget) -> (BlockReplayEngine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let resume = Arc::new(ResumeRecordStore::new(dir.path().join("resume.json")));
        let state = Arc::new(Mutex::new(EngineState::new("test".into(), sync_from, sync_to, false)));
        (BlockReplayEngine::new(fake, resume, state), dir)
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_replays_a_single_empty_block() {
        let fake = Arc::new(FakeRpcFacade::new());
        fake.seed_source_block(source_block(1, &[]));
        // target already at height 0, nothing pre-confirmed
        let (engine, _dir) = new_engine(fake.clone(), 1, SyncTarget::Block(1));
        engine.run().await;
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.status, EngineStatus::Completed);
        assert_eq!(snapshot.processed_blocks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn replays_a_block_with_transactions_in_order() {
        let fake = Arc::new(FakeRpcFacade::new());
        let h0 = Hash32([1; 32]);
        let h1 = Hash32([2; 32]);
        fake.seed_source_block(source_block(1, &[h0, h1]));
        let (engine, _dir) = new_engine(fake.clone(), 1, SyncTarget::Block(1));
        engine.run().await;
        assert_eq!(engine.snapshot().status, EngineStatus::Completed);
        assert_eq!(*fake.inject_log.lock().unwrap(), vec![h0, h1]);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_inject_failure_fails_the_engine() {
        let fake = Arc::new(FakeRpcFacade::new());
        let h0 = Hash32([9; 32]);
        fake.seed_source_block(source_block(1, &[h0]));
        *fake.fail_next_inject.lock().unwrap() = Some(ReplayError::InjectFailed { hash: h0, reason: "rejected by target".into() });
        let (engine, _dir) = new_engine(fake.clone(), 1, SyncTarget::Block(1));
        engine.run().await;
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.status, EngineStatus::Failed);
        assert!(snapshot.critical_error.unwrap().contains("rejected by target"));
    }

    #[tokio::test(start_paused = true)]
    async fn multi_block_range_completes_in_order() {
        let fake = Arc::new(FakeRpcFacade::new());
        for n in 1..=3 {
            fake.seed_source_block(source_block(n, &[]));
        }
        let (engine, _dir) = new_engine(fake.clone(), 1, SyncTarget::Block(3));
        engine.run().await;
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.status, EngineStatus::Completed);
        assert_eq!(snapshot.processed_blocks, 3);
        assert_eq!(snapshot.current_block, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn target_down_during_pre_sync_enters_recovery_then_completes() {
        let fake = Arc::new(FakeRpcFacade::new());
        fake.seed_source_block(source_block(1, &[]));
        fake.set_target_down(true);
        let (engine, _dir) = new_engine(fake.clone(), 1, SyncTarget::Block(1));

        let fake_for_flip = fake.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            fake_for_flip.set_target_down(false);
        });

        engine.run().await;
        assert_eq!(engine.snapshot().status, EngineStatus::Completed);
    }
}
