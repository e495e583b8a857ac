use std::num::NonZeroU32;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

use crate::cancel::CancelToken;
use crate::error::FetchError;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Quota-window dimensions for the optional windowed gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaWindow {
    pub window: Duration,
    pub limit: u32,
}

impl QuotaWindow {
    pub const fn new(window: Duration, limit: u32) -> Self {
        Self { window, limit }
    }
}

/// Global pacing gate for outbound remote calls.
///
/// One instance protects the whole process: the upstream provider meters its
/// quota per account, not per endpoint, so every live call anywhere must pass
/// through the same gate. Construct it once at service start and hand the
/// same handle to every orchestrator.
///
/// Two layers:
/// - a minimum wall-clock interval between any two calls, enforced by
///   reserving the next free slot under a mutex and sleeping up to it;
/// - an optional windowed quota (e.g. 500 calls per minute) checked before
///   slot reservation. An exhausted window surfaces as `RateLimited` so the
///   degradation ladder can fall back instead of stalling the worker.
pub struct CallThrottle {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
    window_gate: Option<DirectRateLimiter>,
}

impl std::fmt::Debug for CallThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallThrottle")
            .field("min_interval", &self.min_interval)
            .field("windowed", &self.window_gate.is_some())
            .finish()
    }
}

impl CallThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
            window_gate: None,
        }
    }

    pub fn with_quota(min_interval: Duration, quota: QuotaWindow) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
            window_gate: Some(RateLimiter::direct(quota_for_window(quota))),
        }
    }

    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Block until this caller's reserved call slot arrives.
    ///
    /// Slots are handed out in arrival order: each acquire bumps the shared
    /// slot cursor by `min_interval`, so N concurrent callers spread out over
    /// N intervals rather than racing the same timestamp.
    ///
    /// # Errors
    ///
    /// `RateLimited` when the windowed quota is exhausted, `TimedOut` when
    /// the cancellation token trips before the slot arrives.
    pub fn acquire(&self, cancel: &CancelToken) -> Result<(), FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::timed_out(
                "cancelled before acquiring a call slot",
            ));
        }

        if let Some(gate) = &self.window_gate {
            if gate.check().is_err() {
                return Err(FetchError::rate_limited(
                    "call quota window is exhausted",
                ));
            }
        }

        let slot = {
            let mut next_slot = self
                .next_slot
                .lock()
                .expect("throttle slot lock is not poisoned");
            let now = Instant::now();
            let slot = match *next_slot {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next_slot = Some(slot + self.min_interval);
            slot
        };

        let wait = slot.saturating_duration_since(Instant::now());
        if !wait.is_zero() && !cancel.sleep(wait) {
            return Err(FetchError::timed_out(
                "cancelled while waiting for a call slot",
            ));
        }
        Ok(())
    }
}

fn quota_for_window(quota: QuotaWindow) -> Quota {
    let safe_limit = quota.limit.max(1);
    let burst = NonZeroU32::new(safe_limit).expect("safe limit must be non-zero");

    let seconds_per_cell = (quota.window.as_secs_f64() / f64::from(safe_limit)).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .expect("period is always greater than zero")
        .allow_burst(burst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Arc;

    #[test]
    fn consecutive_acquires_are_spaced_by_the_interval() {
        let throttle = CallThrottle::new(Duration::from_millis(40));
        let cancel = CancelToken::unbounded();

        let started = Instant::now();
        throttle.acquire(&cancel).expect("first slot");
        throttle.acquire(&cancel).expect("second slot");
        throttle.acquire(&cancel).expect("third slot");

        assert!(
            started.elapsed() >= Duration::from_millis(80),
            "three calls need at least two full intervals"
        );
    }

    #[test]
    fn zero_interval_does_not_block() {
        let throttle = CallThrottle::new(Duration::ZERO);
        let cancel = CancelToken::unbounded();

        let started = Instant::now();
        for _ in 0..20 {
            throttle.acquire(&cancel).expect("slot");
        }
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn concurrent_acquires_reserve_distinct_slots() {
        let throttle = Arc::new(CallThrottle::new(Duration::from_millis(30)));
        let cancel = CancelToken::unbounded();
        let started = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                let cancel = cancel.clone();
                std::thread::spawn(move || throttle.acquire(&cancel))
            })
            .collect();
        for handle in handles {
            handle.join().expect("no panic").expect("slot acquired");
        }

        assert!(
            started.elapsed() >= Duration::from_millis(90),
            "four callers must spread over three intervals"
        );
    }

    #[test]
    fn exhausted_quota_window_reports_rate_limited() {
        let throttle = CallThrottle::with_quota(
            Duration::ZERO,
            QuotaWindow::new(Duration::from_secs(60), 2),
        );
        let cancel = CancelToken::unbounded();

        assert!(throttle.acquire(&cancel).is_ok());
        assert!(throttle.acquire(&cancel).is_ok());

        let err = throttle
            .acquire(&cancel)
            .expect_err("third call exceeds the window");
        assert_eq!(err.kind(), ErrorKind::RateLimited);
    }

    #[test]
    fn cancelled_token_aborts_the_wait() {
        let throttle = CallThrottle::new(Duration::from_secs(10));
        let cancel = CancelToken::unbounded();
        throttle.acquire(&cancel).expect("first slot is immediate");

        cancel.cancel();
        let err = throttle
            .acquire(&cancel)
            .expect_err("second slot is ten seconds out");
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }
}
