//! Observability hook consumed by the transport layer.
//!
//! The acquisition core never renders anything itself; it reports progress
//! through this sink and the note list on the final aggregate.

use serde::Serialize;

use crate::fetch::LadderNote;

/// Events emitted over the lifetime of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted {
        entity_id: String,
        categories: Vec<String>,
    },
    /// One per terminal ladder decision, including failures.
    LadderDecision(LadderNote),
    CategoryComplete {
        category: String,
        disposition: &'static str,
    },
    RunComplete {
        entity_id: String,
        elapsed_ms: u64,
        timed_out: usize,
    },
}

/// Receiver for [`ProgressEvent`]s. Implementations must be cheap and
/// non-blocking; they run on the acquisition worker threads.
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_event(&self, _event: &ProgressEvent) {}
}
