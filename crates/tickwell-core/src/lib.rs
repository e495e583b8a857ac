//! # Tickwell Core
//!
//! Data-acquisition core for the Tickwell market-data toolkit.
//!
//! ## Overview
//!
//! This crate provides the components that sit between callers and
//! rate-limited upstream data providers:
//!
//! - **Tiered cache** with an in-memory hot tier and a durable disk tier
//! - **Call throttle** enforcing a minimum spacing between upstream calls
//! - **Error taxonomy** classified at the point of failure
//! - **Degradation ladder** that trades freshness for availability
//! - **Concurrent orchestrator** fanning out category fetches under a
//!   shared deadline
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Two-tier cache (memory + disk) with TTL-checked reads |
//! | [`cancel`] | Cooperative cancellation tokens with optional deadlines |
//! | [`config`] | Acquisition configuration and per-run options |
//! | [`error`] | Error kinds, classification, and cache errors |
//! | [`fetch`] | Fetch traits, request specs, and result types |
//! | [`ladder`] | Degradation ladder (fresh cache, live, stale, synthetic) |
//! | [`orchestrator`] | Bounded-pool concurrent fan-out with a run budget |
//! | [`progress`] | Progress events and sink trait |
//! | [`retry`] | Retry middleware with jittered backoff |
//! | [`throttle`] | Global call spacing and windowed quota gate |
//! | [`ttl`] | Volatility classes and per-category max-age table |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tickwell_core::{
//!     AcquisitionConfig, CallThrottle, FetchSpec, Orchestrator, RunOptions,
//!     TieredCache,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = Arc::new(TieredCache::open("/var/cache/tickwell", 100)?);
//!     let throttle = Arc::new(CallThrottle::new(Duration::from_millis(350)));
//!     let orchestrator = Orchestrator::new(cache, throttle, AcquisitionConfig::default());
//!
//!     let specs = vec![
//!         FetchSpec::new("quote", Arc::new(|entity: &str, _params: &_, _cancel: &_| {
//!             fetch_quote_bytes(entity)
//!         })),
//!     ];
//!
//!     let result = orchestrator.run("600519.SH", specs, RunOptions::default());
//!     println!("{} categories in {:?}", result.outcomes.len(), result.elapsed);
//!     Ok(())
//! }
//! ```
//!
//! ## Degradation
//!
//! Every category fetch walks the same ladder: fresh cache, then a live
//! upstream call, then stale cache, then a synthetic fallback if the spec
//! provides one. Each step down is recorded as a [`LadderNote`] so callers
//! can audit exactly which rung served the data.
//!
//! ## Error Handling
//!
//! Upstream failures carry an [`ErrorKind`] assigned where the failure is
//! observed:
//!
//! ```rust
//! use tickwell_core::{ErrorKind, FetchError};
//!
//! fn handle_error(error: &FetchError) {
//!     match error.kind() {
//!         ErrorKind::RateLimited => {
//!             // Back off before the next call
//!         }
//!         ErrorKind::Configuration => {
//!             // Not degradable; fix credentials and retry
//!         }
//!         _ => {}
//!     }
//! }
//! ```

pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod fetch;
pub mod ladder;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod throttle;
pub mod ttl;

// Re-export commonly used types at crate root for convenience

// Cache
pub use cache::{CacheStats, Hit, TieredCache};

// Cancellation
pub use cancel::CancelToken;

// Configuration
pub use config::{AcquisitionConfig, RunOptions};

// Error types
pub use error::{CacheError, ErrorKind, FetchError};

// Fetch traits and result types
pub use fetch::{
    AggregateResult, Fetch, FetchSpec, Freshness, LadderNote, Outcome, ParamValue, Params,
    Payload, Rung, SyntheticSource,
};

// Degradation ladder
pub use ladder::{Acquired, DegradationLadder, LadderError};

// Orchestration
pub use orchestrator::Orchestrator;

// Progress reporting
pub use progress::{NullSink, ProgressEvent, ProgressSink};

// Retry middleware
pub use retry::{Backoff, RetryPolicy, Retrying};

// Throttling
pub use throttle::{CallThrottle, QuotaWindow};

// TTL policy
pub use ttl::{TtlTable, VolatilityClass};
