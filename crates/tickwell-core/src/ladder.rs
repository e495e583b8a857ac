//! Graceful-degradation ladder for one named fetch operation.
//!
//! Rungs, in order: fresh cache → live call → stale cache (any age) →
//! synthetic fallback → explicit absence. The ladder consults the global
//! throttle before every live call and writes successes back into the
//! tiered cache. One failing upstream is never allowed to sink a whole
//! report: everything short of a configuration failure degrades.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::TieredCache;
use crate::cancel::CancelToken;
use crate::error::FetchError;
use crate::fetch::{
    canonical_params, FetchSpec, Freshness, LadderNote, Payload, Rung,
};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::throttle::CallThrottle;
use crate::ttl::TtlTable;

/// Successful ladder run: the payload, how fresh it is, and the diagnostic
/// note for the caller's observability surface.
#[derive(Debug, Clone)]
pub struct Acquired {
    pub payload: Payload,
    pub freshness: Freshness,
    pub note: LadderNote,
}

/// Ladder run that exhausted every rung (or hit a non-degradable failure).
#[derive(Debug, Clone)]
pub struct LadderError {
    pub error: FetchError,
    pub note: LadderNote,
}

pub type LadderResult = Result<Acquired, LadderError>;

/// One invocation per [`FetchSpec`]; the struct itself is cheap to share
/// across the orchestrator's worker threads.
#[derive(Debug, Clone)]
pub struct DegradationLadder {
    cache: Arc<TieredCache>,
    throttle: Arc<CallThrottle>,
    ttl: TtlTable,
    /// Strict mode skips the stale rung entirely: absence beats stale data.
    strict: bool,
}

impl DegradationLadder {
    pub fn new(cache: Arc<TieredCache>, throttle: Arc<CallThrottle>, ttl: TtlTable) -> Self {
        Self {
            cache,
            throttle,
            ttl,
            strict: false,
        }
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Run the ladder for one spec.
    ///
    /// `force` skips the fresh-cache rung (explicit refresh request). All
    /// degradable failure kinds are recovered locally; only `Configuration`
    /// short-circuits past the remaining rungs.
    pub fn run(
        &self,
        entity_id: &str,
        spec: &FetchSpec,
        force: bool,
        cancel: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> LadderResult {
        let namespace = spec.category.as_str();
        let key = cache_key(entity_id, spec);
        let max_age = self.ttl.max_age(namespace);

        if !force {
            if let Some(hit) = self.cache.get(namespace, &key, max_age) {
                return self.succeed(
                    spec,
                    sink,
                    hit.payload,
                    Freshness::Fresh,
                    Rung::FreshCache,
                    "cache entry within max age",
                    Some(hit.age),
                );
            }
        }

        let live_error = match self.call_live(entity_id, spec, cancel) {
            Ok(payload) => {
                if let Err(error) = self.cache.set(namespace, &key, &payload) {
                    tracing::warn!(category = namespace, %error, "cache write-back failed");
                }
                let reason = if force {
                    "forced live refresh"
                } else {
                    "live call after cache miss"
                };
                return self.succeed(
                    spec,
                    sink,
                    payload,
                    Freshness::Fresh,
                    Rung::LiveCall,
                    reason,
                    Some(Duration::ZERO),
                );
            }
            Err(error) => error,
        };

        if !live_error.degradable() {
            // A broken credential poisons the whole pipeline; stale data is
            // no substitute and retrying is pointless.
            return self.fail(spec, sink, live_error);
        }

        if !self.strict {
            if let Some(hit) = self.cache.get_any_age(namespace, &key) {
                return self.succeed(
                    spec,
                    sink,
                    hit.payload,
                    Freshness::Stale,
                    Rung::StaleCache,
                    format!("stale fallback after: {live_error}"),
                    Some(hit.age),
                );
            }
        }

        if let Some(synthetic) = &spec.synthetic {
            if let Some(payload) = synthetic.synthesize(entity_id) {
                return self.succeed(
                    spec,
                    sink,
                    payload,
                    Freshness::Synthetic,
                    Rung::Synthetic,
                    format!("synthetic fallback after: {live_error}"),
                    None,
                );
            }
        }

        self.fail(spec, sink, live_error)
    }

    fn call_live(
        &self,
        entity_id: &str,
        spec: &FetchSpec,
        cancel: &CancelToken,
    ) -> Result<Payload, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::timed_out("cancelled before live call"));
        }
        self.throttle.acquire(cancel)?;

        let payload = spec.fetch.invoke(entity_id, &spec.params, cancel)?;
        if payload.is_empty() {
            // Never cached: an empty result today should not mask a real
            // result tomorrow.
            return Err(FetchError::empty_result(format!(
                "live call for '{}' returned no usable data",
                spec.category
            )));
        }
        Ok(payload)
    }

    #[allow(clippy::too_many_arguments)]
    fn succeed(
        &self,
        spec: &FetchSpec,
        sink: &dyn ProgressSink,
        payload: Payload,
        freshness: Freshness,
        rung: Rung,
        reason: impl Into<String>,
        age: Option<Duration>,
    ) -> LadderResult {
        let mut note = LadderNote::new(&spec.category, rung, reason);
        if let Some(age) = age {
            note = note.with_age(age);
        }
        tracing::debug!(
            category = %spec.category,
            rung = %rung,
            age_ms = note.age_ms,
            "ladder settled"
        );
        sink.on_event(&ProgressEvent::LadderDecision(note.clone()));
        Ok(Acquired {
            payload,
            freshness,
            note,
        })
    }

    fn fail(&self, spec: &FetchSpec, sink: &dyn ProgressSink, error: FetchError) -> LadderResult {
        let note = LadderNote::new(&spec.category, Rung::Absent, error.to_string());
        if spec.required {
            tracing::warn!(category = %spec.category, %error, "ladder exhausted");
        } else {
            tracing::debug!(category = %spec.category, %error, "optional ladder exhausted");
        }
        sink.on_event(&ProgressEvent::LadderDecision(note.clone()));
        Err(LadderError { error, note })
    }
}

/// Cache key for `(entity, params)` within a category namespace.
fn cache_key(entity_id: &str, spec: &FetchSpec) -> String {
    if spec.params.is_empty() {
        entity_id.to_string()
    } else {
        format!("{entity_id}?{}", canonical_params(&spec.params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fetch::{Fetch, Params};
    use crate::progress::NullSink;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ladder(strict: bool) -> (tempfile::TempDir, DegradationLadder) {
        let dir = tempfile::tempdir().expect("scratch dir");
        let cache = Arc::new(TieredCache::open(dir.path(), 32).expect("cache opens"));
        let throttle = Arc::new(CallThrottle::new(Duration::ZERO));
        let ladder = DegradationLadder::new(cache, throttle, TtlTable::market_defaults())
            .with_strict(strict);
        (dir, ladder)
    }

    fn counting_fetch(
        calls: Arc<AtomicU32>,
        result: impl Fn() -> Result<Payload, FetchError> + Send + Sync + 'static,
    ) -> Arc<dyn Fetch> {
        Arc::new(move |_: &str, _: &Params, _: &CancelToken| {
            calls.fetch_add(1, Ordering::SeqCst);
            result()
        })
    }

    #[test]
    fn fresh_cache_hit_skips_the_live_call() {
        let (_dir, ladder) = ladder(false);
        let calls = Arc::new(AtomicU32::new(0));
        let spec = FetchSpec::new(
            "quote",
            counting_fetch(Arc::clone(&calls), || Ok(b"live".to_vec())),
        );

        let cancel = CancelToken::unbounded();
        let first = ladder
            .run("600519.SH", &spec, false, &cancel, &NullSink)
            .expect("live call succeeds");
        assert_eq!(first.note.rung_used, Rung::LiveCall);

        let second = ladder
            .run("600519.SH", &spec, false, &cancel, &NullSink)
            .expect("served from cache");
        assert_eq!(second.note.rung_used, Rung::FreshCache);
        assert_eq!(second.freshness, Freshness::Fresh);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn force_bypasses_a_fresh_cache_entry() {
        let (_dir, ladder) = ladder(false);
        let calls = Arc::new(AtomicU32::new(0));
        let spec = FetchSpec::new(
            "quote",
            counting_fetch(Arc::clone(&calls), || Ok(b"live".to_vec())),
        );

        let cancel = CancelToken::unbounded();
        ladder
            .run("600519.SH", &spec, false, &cancel, &NullSink)
            .expect("seed the cache");
        let refreshed = ladder
            .run("600519.SH", &spec, true, &cancel, &NullSink)
            .expect("forced refresh");

        assert_eq!(refreshed.note.rung_used, Rung::LiveCall);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rate_limit_degrades_to_stale_cache() {
        let (_dir, ladder) = ladder(false);
        let flaky_calls = Arc::new(AtomicU32::new(0));
        let calls = Arc::clone(&flaky_calls);
        let fetch: Arc<dyn Fetch> = Arc::new(move |_: &str, _: &Params, _: &CancelToken| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(b"seed".to_vec())
            } else {
                Err(FetchError::rate_limited("quota exceeded"))
            }
        });
        let spec = FetchSpec::new("news", fetch);

        let cancel = CancelToken::unbounded();
        ladder
            .run("600519.SH", &spec, false, &cancel, &NullSink)
            .expect("seed the cache");

        // Forced refresh fails upstream; the stale rung serves the seed.
        let degraded = ladder
            .run("600519.SH", &spec, true, &cancel, &NullSink)
            .expect("stale fallback");
        assert_eq!(degraded.freshness, Freshness::Stale);
        assert_eq!(degraded.note.rung_used, Rung::StaleCache);
        assert_eq!(degraded.payload, b"seed");
        assert!(degraded.note.reason.contains("quota exceeded"));
    }

    #[test]
    fn strict_mode_prefers_absence_over_stale_data() {
        let (_dir, ladder) = ladder(true);
        let seeded = Arc::new(AtomicU32::new(0));
        let calls = Arc::clone(&seeded);
        let fetch: Arc<dyn Fetch> = Arc::new(move |_: &str, _: &Params, _: &CancelToken| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(b"seed".to_vec())
            } else {
                Err(FetchError::rate_limited("quota exceeded"))
            }
        });
        let spec = FetchSpec::new("news", fetch);

        let cancel = CancelToken::unbounded();
        ladder
            .run("600519.SH", &spec, false, &cancel, &NullSink)
            .expect("seed the cache");

        let failure = ladder
            .run("600519.SH", &spec, true, &cancel, &NullSink)
            .expect_err("strict mode refuses stale data");
        assert_eq!(failure.error.kind(), ErrorKind::RateLimited);
        assert_eq!(failure.note.rung_used, Rung::Absent);
    }

    #[test]
    fn configuration_failure_does_not_degrade() {
        let (_dir, ladder) = ladder(false);
        let seeded = Arc::new(AtomicU32::new(0));
        let calls = Arc::clone(&seeded);
        let fetch: Arc<dyn Fetch> = Arc::new(move |_: &str, _: &Params, _: &CancelToken| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(b"seed".to_vec())
            } else {
                Err(FetchError::configuration("missing api token"))
            }
        });
        let spec = FetchSpec::new("premium", fetch).with_synthetic(Arc::new(
            |_: &str| Some(b"synthetic".to_vec()),
        ));

        let cancel = CancelToken::unbounded();
        ladder
            .run("600519.SH", &spec, false, &cancel, &NullSink)
            .expect("seed the cache");

        // Neither the stale entry nor the synthetic source is consulted.
        let failure = ladder
            .run("600519.SH", &spec, true, &cancel, &NullSink)
            .expect_err("configuration propagates");
        assert_eq!(failure.error.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn synthetic_rung_serves_when_nothing_is_cached() {
        let (_dir, ladder) = ladder(false);
        let fetch: Arc<dyn Fetch> = Arc::new(|_: &str, _: &Params, _: &CancelToken| {
            Err(FetchError::transient("upstream down"))
        });
        let spec = FetchSpec::new("market", fetch).with_synthetic(Arc::new(
            |_: &str| Some(b"placeholder".to_vec()),
        ));

        let result = ladder
            .run("600519.SH", &spec, false, &CancelToken::unbounded(), &NullSink)
            .expect("synthetic fallback");
        assert_eq!(result.freshness, Freshness::Synthetic);
        assert_eq!(result.note.rung_used, Rung::Synthetic);
        assert_eq!(result.note.age_ms, None);
    }

    #[test]
    fn empty_payload_is_a_miss_and_never_cached() {
        let (_dir, ladder) = ladder(false);
        let calls = Arc::new(AtomicU32::new(0));
        let spec = FetchSpec::new(
            "news",
            counting_fetch(Arc::clone(&calls), || Ok(Vec::new())),
        );

        let cancel = CancelToken::unbounded();
        let failure = ladder
            .run("600519.SH", &spec, false, &cancel, &NullSink)
            .expect_err("empty result exhausts the ladder");
        assert_eq!(failure.error.kind(), ErrorKind::EmptyResult);

        // Second run misses the cache again: the empty result was not stored.
        let _ = ladder.run("600519.SH", &spec, false, &cancel, &NullSink);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn params_partition_the_cache_key() {
        let (_dir, ladder) = ladder(false);
        let calls = Arc::new(AtomicU32::new(0));
        let fetch = counting_fetch(Arc::clone(&calls), || Ok(b"x".to_vec()));

        let cancel = CancelToken::unbounded();
        let thirty = FetchSpec::new("daily", Arc::clone(&fetch)).with_param("window", 30i64);
        let ninety = FetchSpec::new("daily", fetch).with_param("window", 90i64);

        ladder
            .run("600519.SH", &thirty, false, &cancel, &NullSink)
            .expect("first window");
        ladder
            .run("600519.SH", &ninety, false, &cancel, &NullSink)
            .expect("second window is a distinct entry");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
