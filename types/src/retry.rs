use std::time::Duration;

/// The shape of a back-off curve. Policies are data: the executor
/// interprets them, it never owns one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackoffKind {
    Exponential,
    Fixed,
    Linear,
}

/// `{kind, base, cap, maxAttempts}` -- a complete, inspectable retry policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub kind: BackoffKind,
    pub base: Duration,
    pub cap: Option<Duration>,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub const fn exponential(base: Duration, max_attempts: u32) -> Self {
        Self { kind: BackoffKind::Exponential, base, cap: None, max_attempts }
    }

    pub const fn exponential_capped(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self { kind: BackoffKind::Exponential, base, cap: Some(cap), max_attempts }
    }

    pub const fn fixed(base: Duration, max_attempts: u32) -> Self {
        Self { kind: BackoffKind::Fixed, base, cap: None, max_attempts }
    }

    pub const fn linear(base: Duration, max_attempts: u32) -> Self {
        Self { kind: BackoffKind::Linear, base, cap: None, max_attempts }
    }

    /// The delay before the `attempt`-th retry (1-based: `attempt == 1` is
    /// the first retry, after the initial try already failed once), or
    /// `None` once the policy is exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt > self.max_attempts {
            return None;
        }
        let raw = match self.kind {
            BackoffKind::Fixed => self.base,
            BackoffKind::Linear => self.base.saturating_mul(attempt),
            BackoffKind::Exponential => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                self.base.checked_mul(factor).unwrap_or(Duration::MAX)
            }
        };
        Some(match self.cap {
            Some(cap) => raw.min(cap),
            None => raw,
        })
    }

    // Operation-specific policies.

    pub fn source_block_fetch() -> Self {
        Self::exponential(Duration::from_secs(1), 8)
    }

    pub fn target_hash_poll() -> Self {
        Self::exponential_capped(Duration::from_millis(100), Duration::from_secs(30), 100)
    }

    /// Used to poll for the target's finalized block-hash during verify-hash
    /// (§4.5 step 6). A mismatch found along the way is non-retryable --
    /// that is a property of the error, not of this policy.
    pub fn hash_match() -> Self {
        Self::exponential(Duration::from_millis(100), 400)
    }

    pub fn receipt_poll_serial() -> Self {
        Self::fixed(Duration::from_millis(100), 20)
    }

    pub fn transaction_inject() -> Self {
        Self::fixed(Duration::from_secs(30), 3)
    }

    pub fn align_precondition() -> Self {
        Self::fixed(Duration::from_millis(200), 5)
    }

    pub fn tip_follower_poll() -> Self {
        Self::exponential(Duration::from_secs(1), 5)
    }
}

/// The receipt batch poll (§4.5 step 5) is driven by elapsed wall-clock time
/// against a fixed budget, not an attempt count -- a distinct shape from
/// [`RetryPolicy`], so it gets its own type rather than overloading `cap`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhasedPollPolicy {
    pub initial_delay: Duration,
    /// `(elapsed-since-start upper bound, poll interval while under it)`,
    /// evaluated in order; the last entry's interval applies for all
    /// remaining elapsed time up to `budget`.
    pub phases: [(Duration, Duration); 3],
    pub budget: Duration,
}

impl PhasedPollPolicy {
    pub fn receipt_batch() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            phases: [
                (Duration::from_secs(5), Duration::from_millis(100)),
                (Duration::from_secs(60), Duration::from_millis(500)),
                (Duration::MAX, Duration::from_secs(2)),
            ],
            budget: Duration::from_secs(15 * 60),
        }
    }

    pub fn interval_at(&self, elapsed: Duration) -> Duration {
        for (threshold, interval) in self.phases {
            if elapsed < threshold {
                return interval;
            }
        }
        self.phases[self.phases.len() - 1].1
    }
}

/// The target-health monitor's recovery-wait back-off (§4.2): exponential,
/// capped at 5 minutes between probes, for up to 24 hours wall-clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthWaitPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub total_budget: Duration,
}

impl HealthWaitPolicy {
    pub fn recovery_wait() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(5 * 60),
            total_budget: Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn interval_at(&self, probe: u32) -> Duration {
        let factor = 1u32.checked_shl(probe.min(20)).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).unwrap_or(Duration::MAX).min(self.cap)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exponential_doubles_and_caps() {
        let p = RetryPolicy::target_hash_poll();
        assert_eq!(p.delay(1), Some(Duration::from_millis(100)));
        assert_eq!(p.delay(2), Some(Duration::from_millis(200)));
        assert_eq!(p.delay(20), Some(Duration::from_secs(30)));
        assert_eq!(p.delay(101), None);
    }

    #[test]
    fn fixed_never_changes_until_exhausted() {
        let p = RetryPolicy::receipt_poll_serial();
        for attempt in 1..=20 {
            assert_eq!(p.delay(attempt), Some(Duration::from_millis(100)));
        }
        assert_eq!(p.delay(21), None);
    }

    #[test]
    fn phased_poll_transitions() {
        let p = PhasedPollPolicy::receipt_batch();
        assert_eq!(p.interval_at(Duration::from_secs(1)), Duration::from_millis(100));
        assert_eq!(p.interval_at(Duration::from_secs(10)), Duration::from_millis(500));
        assert_eq!(p.interval_at(Duration::from_secs(90)), Duration::from_secs(2));
    }
}
