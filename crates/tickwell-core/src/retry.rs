//! Retry middleware with exponential backoff and jitter.
//!
//! Composition is explicit at the call site: wrap a [`Fetch`] in
//! [`Retrying`] and hand the wrapper to the ladder, instead of hiding the
//! retry behavior inside the fetch implementation.

use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::FetchError;
use crate::fetch::{Fetch, Params, Payload};

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Fixed delay between retries.
    Fixed { delay: Duration },
    /// `base * (factor ^ attempt)`, capped at `max`, with optional
    /// +/- 50% random jitter.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(200),
            factor: 2.0,
            max: Duration::from_secs(3),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let scale = factor.powi(attempt as i32);
                let seconds = base.as_secs_f64() * scale;
                let capped_seconds = seconds.min(max.as_secs_f64());

                let mut delay = Duration::from_secs_f64(capped_seconds);

                if jitter {
                    let jitter_ms = (delay.as_millis() as f64 * 0.5) as u64;
                    let random_offset = fastrand::u64(0..=(jitter_ms * 2));
                    let total_ms =
                        delay.as_millis() as i64 + (random_offset as i64 - jitter_ms as i64);
                    delay = Duration::from_millis(total_ms.max(0) as u64);
                }

                delay
            }
        }
    }
}

/// How many times, and how patiently, to retry a failing fetch.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed { delay },
        }
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Backoff::default(),
        }
    }
}

/// Fetch wrapper that retries transient failures.
///
/// Only `Transient` and `TimedOut` failures are retried. A rate-limited or
/// access-denied rejection repeats deterministically within the window, and
/// a configuration failure never heals on its own, so those pass straight
/// through to the ladder.
pub struct Retrying<F> {
    inner: F,
    policy: RetryPolicy,
}

impl<F: Fetch> Retrying<F> {
    pub fn new(inner: F, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<F: Fetch> Fetch for Retrying<F> {
    fn invoke(
        &self,
        entity_id: &str,
        params: &Params,
        cancel: &CancelToken,
    ) -> Result<Payload, FetchError> {
        let mut attempt = 0;
        loop {
            match self.inner.invoke(entity_id, params, cancel) {
                Ok(payload) => return Ok(payload),
                Err(error) => {
                    if !error.retryable() || attempt >= self.policy.max_retries {
                        return Err(error);
                    }
                    let delay = self.policy.backoff.delay(attempt);
                    tracing::debug!(
                        entity_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying transient fetch failure"
                    );
                    if !cancel.sleep(delay) {
                        return Err(FetchError::timed_out(
                            "cancelled while backing off between retries",
                        ));
                    }
                    attempt += 1;
                }
            }
        }
    }
}
