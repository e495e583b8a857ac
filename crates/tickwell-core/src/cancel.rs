use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Granularity of cancellation polling inside blocking waits.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug)]
struct CancelInner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

/// Cooperative cancellation handle shared by one orchestrator run.
///
/// Carries both an explicit cancel flag and an optional absolute deadline.
/// Every blocking operation in the acquisition pipeline (throttle waits,
/// retry sleeps, fetch implementations that can poll) receives a reference
/// and is expected to bail out once `is_cancelled` turns true.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    /// Token with no deadline; cancels only via [`CancelToken::cancel`].
    pub fn unbounded() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                deadline: None,
            }),
        }
    }

    /// Token that trips automatically once `budget` has elapsed.
    pub fn with_budget(budget: Duration) -> Self {
        Self::with_deadline(Instant::now() + budget)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                deadline: Some(deadline),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::Acquire) {
            return true;
        }
        match self.inner.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// Time left before the deadline trips, if one is set. `None` means the
    /// token never expires on its own; `Some(ZERO)` means it already has.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Sleep for `wait`, waking early if the token is cancelled.
    ///
    /// Returns `true` when the full wait completed, `false` when cancellation
    /// cut it short.
    pub fn sleep(&self, wait: Duration) -> bool {
        let wake_at = Instant::now() + wait;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let left = wake_at.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return true;
            }
            std::thread::sleep(left.min(POLL_INTERVAL));
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::unbounded()
    }
}
