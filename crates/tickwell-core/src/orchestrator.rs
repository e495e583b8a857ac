//! Concurrent fan-out across a menu of named fetch operations.
//!
//! Each spec runs inside its own degradation-ladder invocation on a bounded
//! pool of OS worker threads. Completions fan in over a channel in
//! whichever-finishes-first order; one overall deadline governs the whole
//! run. The invariant everything here serves: the returned map holds
//! exactly one outcome per requested category, whatever mix of success,
//! failure and timeout the upstreams produced.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::cache::TieredCache;
use crate::cancel::CancelToken;
use crate::config::{AcquisitionConfig, RunOptions};
use crate::error::ErrorKind;
use crate::fetch::{AggregateResult, FetchSpec, LadderNote, Outcome, Rung};
use crate::ladder::{DegradationLadder, LadderError};
use crate::progress::{NullSink, ProgressEvent, ProgressSink};
use crate::throttle::CallThrottle;

/// Fan-out engine over shared cache/throttle handles.
pub struct Orchestrator {
    ladder: DegradationLadder,
    config: AcquisitionConfig,
    sink: Arc<dyn ProgressSink>,
}

impl Orchestrator {
    pub fn new(
        cache: Arc<TieredCache>,
        throttle: Arc<CallThrottle>,
        config: AcquisitionConfig,
    ) -> Self {
        let ladder =
            DegradationLadder::new(cache, throttle, config.ttl.clone()).with_strict(config.strict);
        Self {
            ladder,
            config,
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Fan out every spec and merge the outcomes under one deadline.
    ///
    /// The deadline is cooperative: once the budget is exhausted the run
    /// stops waiting, cancels the shared token, and marks the outstanding
    /// categories `TimedOut`. Workers observe the token at their next
    /// suspension point and wind down on their own; a straggler's late
    /// result lands in a dropped channel and is discarded.
    pub fn run(
        &self,
        entity_id: &str,
        specs: Vec<FetchSpec>,
        options: RunOptions,
    ) -> AggregateResult {
        let started = Instant::now();
        let budget = options.budget.unwrap_or(self.config.default_budget);
        let deadline = started + budget;
        let cancel = CancelToken::with_deadline(deadline);

        let specs = dedupe_categories(specs);
        let categories: Vec<String> = specs.iter().map(|s| s.category.clone()).collect();
        let total = specs.len();

        self.sink.on_event(&ProgressEvent::RunStarted {
            entity_id: entity_id.to_string(),
            categories: categories.clone(),
        });
        tracing::info!(entity_id, categories = total, budget_ms = budget.as_millis() as u64, "fan-out started");

        let pool_size = options
            .pool_size
            .unwrap_or(self.config.default_pool_size)
            .clamp(1, total.max(1));

        let (tx, rx) = mpsc::channel::<(String, Outcome, LadderNote)>();
        let queue = Arc::new(Mutex::new(VecDeque::from(specs)));

        for worker in 0..pool_size {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let ladder = self.ladder.clone();
            let sink = Arc::clone(&self.sink);
            let cancel = cancel.clone();
            let entity_id = entity_id.to_string();
            let force = options.force;

            std::thread::Builder::new()
                .name(format!("tickwell-fetch-{worker}"))
                .spawn(move || loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let Some(spec) = queue
                        .lock()
                        .expect("work queue lock is not poisoned")
                        .pop_front()
                    else {
                        break;
                    };
                    let category = spec.category.clone();
                    let (outcome, note) =
                        run_one(&ladder, &entity_id, spec, force, &cancel, sink.as_ref());
                    // Receiver may be gone after a budget timeout; late
                    // results are deliberately discarded.
                    let _ = tx.send((category, outcome, note));
                })
                .expect("acquisition worker thread spawns");
        }
        drop(tx);

        let mut outcomes: BTreeMap<String, Outcome> = BTreeMap::new();
        let mut notes: Vec<LadderNote> = Vec::with_capacity(total);

        while outcomes.len() < total {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match rx.recv_timeout(remaining) {
                Ok((category, outcome, note)) => {
                    self.sink.on_event(&ProgressEvent::CategoryComplete {
                        category: category.clone(),
                        disposition: disposition(&outcome),
                    });
                    notes.push(note);
                    outcomes.insert(category, outcome);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let mut timed_out = 0;
        if outcomes.len() < total {
            cancel.cancel();
            for category in &categories {
                if outcomes.contains_key(category) {
                    continue;
                }
                timed_out += 1;
                let note = LadderNote::new(
                    category,
                    Rung::Absent,
                    "request budget exhausted before completion",
                );
                self.sink
                    .on_event(&ProgressEvent::LadderDecision(note.clone()));
                self.sink.on_event(&ProgressEvent::CategoryComplete {
                    category: category.clone(),
                    disposition: "timed_out",
                });
                tracing::warn!(entity_id, %category, "category timed out");
                notes.push(note);
                outcomes.insert(category.clone(), Outcome::TimedOut);
            }
        }

        let elapsed = started.elapsed();
        self.sink.on_event(&ProgressEvent::RunComplete {
            entity_id: entity_id.to_string(),
            elapsed_ms: elapsed.as_millis() as u64,
            timed_out,
        });
        tracing::info!(
            entity_id,
            elapsed_ms = elapsed.as_millis() as u64,
            timed_out,
            "fan-out complete"
        );

        AggregateResult {
            entity_id: entity_id.to_string(),
            outcomes,
            notes,
            elapsed,
        }
    }
}

/// One ladder invocation with a panic boundary.
///
/// A panicking fetch must cost exactly one category, never the run: the
/// unwind is caught here and converted into a `Failed` outcome.
fn run_one(
    ladder: &DegradationLadder,
    entity_id: &str,
    spec: FetchSpec,
    force: bool,
    cancel: &CancelToken,
    sink: &dyn ProgressSink,
) -> (Outcome, LadderNote) {
    let category = spec.category.clone();
    let attempt =
        catch_unwind(AssertUnwindSafe(|| {
            ladder.run(entity_id, &spec, force, cancel, sink)
        }));

    match attempt {
        Ok(Ok(acquired)) => (
            Outcome::Success {
                payload: acquired.payload,
                freshness: acquired.freshness,
            },
            acquired.note,
        ),
        Ok(Err(LadderError { error, note })) => (
            Outcome::Failed {
                kind: error.kind(),
                message: error.message().to_string(),
            },
            note,
        ),
        Err(panic) => {
            let message = format!("fetch task panicked: {}", panic_message(panic.as_ref()));
            let note = LadderNote::new(&category, Rung::Absent, &message);
            sink.on_event(&ProgressEvent::LadderDecision(note.clone()));
            tracing::error!(%category, %message, "fetch task panicked");
            (
                Outcome::Failed {
                    kind: ErrorKind::Transient,
                    message,
                },
                note,
            )
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

fn disposition(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Success { .. } => "success",
        Outcome::TimedOut => "timed_out",
        Outcome::Failed { .. } => "failed",
    }
}

/// First spec wins on duplicate category names; the map invariant (one
/// outcome per category) cannot survive duplicates.
fn dedupe_categories(specs: Vec<FetchSpec>) -> Vec<FetchSpec> {
    let mut seen = HashSet::new();
    let mut output = Vec::with_capacity(specs.len());
    for spec in specs {
        if seen.insert(spec.category.clone()) {
            output.push(spec);
        } else {
            tracing::warn!(category = %spec.category, "duplicate fetch category dropped");
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::fetch::{Fetch, Params, Payload};
    use std::time::Duration;

    fn orchestrator() -> (tempfile::TempDir, Orchestrator) {
        let dir = tempfile::tempdir().expect("scratch dir");
        let cache = Arc::new(TieredCache::open(dir.path(), 32).expect("cache opens"));
        let throttle = Arc::new(CallThrottle::new(Duration::ZERO));
        let orchestrator = Orchestrator::new(cache, throttle, AcquisitionConfig::default());
        (dir, orchestrator)
    }

    fn ok_fetch(payload: &'static [u8]) -> Arc<dyn Fetch> {
        Arc::new(move |_: &str, _: &Params, _: &CancelToken| Ok::<Payload, FetchError>(payload.to_vec()))
    }

    #[test]
    fn every_requested_category_gets_exactly_one_outcome() {
        let (_dir, orchestrator) = orchestrator();
        let specs = vec![
            FetchSpec::new("technical", ok_fetch(b"t")),
            FetchSpec::new(
                "news",
                Arc::new(|_: &str, _: &Params, _: &CancelToken| -> Result<Payload, FetchError> {
                    Err(FetchError::transient("feed unreachable"))
                }) as Arc<dyn Fetch>,
            ),
            FetchSpec::new("fundamental", ok_fetch(b"f")),
        ];

        let result = orchestrator.run("600519.SH", specs, RunOptions::default());

        assert_eq!(result.outcomes.len(), 3);
        assert!(result.outcome("technical").expect("present").is_success());
        assert!(result.outcome("fundamental").expect("present").is_success());
        assert!(matches!(
            result.outcome("news"),
            Some(Outcome::Failed { kind: ErrorKind::Transient, .. })
        ));
        assert_eq!(result.notes.len(), 3);
    }

    #[test]
    fn duplicate_categories_are_collapsed_first_wins() {
        let (_dir, orchestrator) = orchestrator();
        let specs = vec![
            FetchSpec::new("quote", ok_fetch(b"first")),
            FetchSpec::new("quote", ok_fetch(b"second")),
        ];

        let result = orchestrator.run("600519.SH", specs, RunOptions::default());

        assert_eq!(result.outcomes.len(), 1);
        match result.outcome("quote").expect("present") {
            Outcome::Success { payload, .. } => assert_eq!(payload, b"first"),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn a_panicking_fetch_costs_one_category_not_the_run() {
        let (_dir, orchestrator) = orchestrator();
        let specs = vec![
            FetchSpec::new(
                "market",
                Arc::new(|_: &str, _: &Params, _: &CancelToken| -> Result<Payload, FetchError> {
                    panic!("upstream parser blew up")
                }) as Arc<dyn Fetch>,
            ),
            FetchSpec::new("quote", ok_fetch(b"q")),
        ];

        let result = orchestrator.run("600519.SH", specs, RunOptions::default());

        assert_eq!(result.outcomes.len(), 2);
        assert!(result.outcome("quote").expect("present").is_success());
        match result.outcome("market").expect("present") {
            Outcome::Failed { kind, message } => {
                assert_eq!(*kind, ErrorKind::Transient);
                assert!(message.contains("upstream parser blew up"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn pool_size_is_clamped_to_the_spec_count() {
        let (_dir, orchestrator) = orchestrator();
        let specs = vec![FetchSpec::new("quote", ok_fetch(b"q"))];

        // A huge pool request must not spawn 64 idle workers or panic.
        let result = orchestrator.run(
            "600519.SH",
            specs,
            RunOptions::default().with_pool_size(64),
        );
        assert_eq!(result.outcomes.len(), 1);
    }

    #[test]
    fn empty_spec_list_completes_immediately() {
        let (_dir, orchestrator) = orchestrator();
        let result = orchestrator.run("600519.SH", Vec::new(), RunOptions::default());
        assert!(result.outcomes.is_empty());
        assert!(result.notes.is_empty());
    }
}
