//! Target-health monitor: a single health check, and a bounded wait loop
//! for a down endpoint to come back.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use replay_types::HealthWaitPolicy;

/// Whatever can answer "is the target up", abstracted so the monitor is
/// testable without a real HTTP target. The production impl lives in
/// [`crate::rpc::HttpRpcFacade`], which owns the actual `/health` GET.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// A single probe. Must never return an `Err`/panic for a down target --
    /// connection failure, timeout, and non-200/non-"OK" responses are all
    /// simply "not healthy" (§4.2: "Never throws").
    async fn probe(&self) -> bool;
}

#[async_trait]
impl<T: HealthProbe + ?Sized> HealthProbe for std::sync::Arc<T> {
    async fn probe(&self) -> bool {
        (**self).probe().await
    }
}

pub struct TargetHealthMonitor<P> {
    probe: P,
    pub(crate) policy: HealthWaitPolicy,
}

impl<P: HealthProbe> TargetHealthMonitor<P> {
    pub fn new(probe: P) -> Self {
        Self { probe, policy: HealthWaitPolicy::recovery_wait() }
    }

    pub async fn is_healthy(&self) -> bool {
        self.probe.probe().await
    }

    /// Blocks until the target is healthy again or `policy.total_budget`
    /// elapses, whichever comes first. Returns `true` on recovery, `false`
    /// on timeout -- never an error (§4.2).
    pub async fn wait_for_recovery(&self) -> bool {
        let start = Instant::now();
        let mut probe_count = 0u32;
        loop {
            if self.probe.probe().await {
                tracing::info!(elapsed = ?start.elapsed(), "target recovered");
                return true;
            }
            if start.elapsed() >= self.policy.total_budget {
                tracing::error!(budget = ?self.policy.total_budget, "target did not recover in time");
                return false;
            }
            let delay = self.policy.interval_at(probe_count);
            let remaining = self.policy.total_budget.saturating_sub(start.elapsed());
            tokio::time::sleep(delay.min(remaining)).await;
            probe_count += 1;
        }
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use super::*;

    /// A probe that is unhealthy for the first `unhealthy_for` calls, then
    /// healthy forever after. Used to test `wait_for_recovery` without a
    /// real 24h clock (paired with `tokio::time::pause`).
    pub struct FlakyProbe {
        calls: AtomicU32,
        unhealthy_for: u32,
        always_down: AtomicBool,
    }

    impl FlakyProbe {
        pub fn recovers_after(unhealthy_for: u32) -> Self {
            Self { calls: AtomicU32::new(0), unhealthy_for, always_down: AtomicBool::new(false) }
        }

        pub fn always_down() -> Self {
            Self { calls: AtomicU32::new(0), unhealthy_for: u32::MAX, always_down: AtomicBool::new(true) }
        }
    }

    #[async_trait]
    impl HealthProbe for FlakyProbe {
        async fn probe(&self) -> bool {
            if self.always_down.load(Ordering::SeqCst) {
                return false;
            }
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            n >= self.unhealthy_for
        }
    }
}

#[cfg(test)]
mod test {
    use super::{testing::FlakyProbe, *};

    #[tokio::test(start_paused = true)]
    async fn recovers_after_a_few_probes() {
        let monitor = TargetHealthMonitor::new(FlakyProbe::recovers_after(3));
        assert!(monitor.wait_for_recovery().await);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_if_never_healthy() {
        let mut monitor = TargetHealthMonitor::new(FlakyProbe::always_down());
        monitor.policy = HealthWaitPolicy { base: Duration::from_millis(1), cap: Duration::from_millis(5), total_budget: Duration::from_millis(50) };
        assert!(!monitor.wait_for_recovery().await);
    }
}
