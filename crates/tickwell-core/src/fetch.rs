//! Fetch contracts and result types for the acquisition pipeline.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::{ErrorKind, FetchError};

/// Opaque payload bytes. The cache and orchestrator never look inside.
pub type Payload = Vec<u8>;

/// Scalar request parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Ordered parameter map; ordering makes the canonical form deterministic.
pub type Params = BTreeMap<String, ParamValue>;

/// Canonical JSON rendering of a parameter map, used for cache-key
/// derivation. Identical parameter sets always produce identical keys.
pub fn canonical_params(params: &Params) -> String {
    serde_json::to_string(params).unwrap_or_default()
}

/// One unit of remote work.
///
/// Implementations perform the blocking network call and classify failures
/// at the point they occur. Long-running implementations should poll the
/// cancellation token and bail out once it trips.
pub trait Fetch: Send + Sync {
    fn invoke(
        &self,
        entity_id: &str,
        params: &Params,
        cancel: &CancelToken,
    ) -> Result<Payload, FetchError>;
}

impl<F> Fetch for F
where
    F: Fn(&str, &Params, &CancelToken) -> Result<Payload, FetchError> + Send + Sync,
{
    fn invoke(
        &self,
        entity_id: &str,
        params: &Params,
        cancel: &CancelToken,
    ) -> Result<Payload, FetchError> {
        self(entity_id, params, cancel)
    }
}

/// Last-resort data source for the synthetic rung of the ladder.
pub trait SyntheticSource: Send + Sync {
    /// Produce a placeholder payload for the entity, or `None` when no
    /// synthetic stand-in makes sense for this category.
    fn synthesize(&self, entity_id: &str) -> Option<Payload>;
}

impl<F> SyntheticSource for F
where
    F: Fn(&str) -> Option<Payload> + Send + Sync,
{
    fn synthesize(&self, entity_id: &str) -> Option<Payload> {
        self(entity_id)
    }
}

/// A named fetch operation within one orchestrator run.
#[derive(Clone)]
pub struct FetchSpec {
    pub category: String,
    pub params: Params,
    pub fetch: Arc<dyn Fetch>,
    pub synthetic: Option<Arc<dyn SyntheticSource>>,
    /// Optional specs are allowed to end up absent without loud surfacing.
    pub required: bool,
}

impl std::fmt::Debug for FetchSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchSpec")
            .field("category", &self.category)
            .field("params", &self.params)
            .field("required", &self.required)
            .field("has_synthetic", &self.synthetic.is_some())
            .finish()
    }
}

impl FetchSpec {
    pub fn new(category: impl Into<String>, fetch: Arc<dyn Fetch>) -> Self {
        Self {
            category: category.into(),
            params: Params::new(),
            fetch,
            synthetic: None,
            required: true,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_synthetic(mut self, synthetic: Arc<dyn SyntheticSource>) -> Self {
        self.synthetic = Some(synthetic);
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Where a returned value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    Stale,
    Synthetic,
}

/// Which ladder rung produced the terminal decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rung {
    FreshCache,
    LiveCall,
    StaleCache,
    Synthetic,
    Absent,
}

impl Rung {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FreshCache => "fresh_cache",
            Self::LiveCall => "live_call",
            Self::StaleCache => "stale_cache",
            Self::Synthetic => "synthetic",
            Self::Absent => "absent",
        }
    }
}

impl Display for Rung {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic record for one terminal ladder decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderNote {
    pub category: String,
    pub rung_used: Rung,
    pub reason: String,
    /// Age of the returned data in milliseconds; `None` when nothing was
    /// returned or the value came from a live call or synthetic source.
    pub age_ms: Option<u64>,
    /// RFC3339 timestamp of the decision.
    pub recorded_at: String,
}

impl LadderNote {
    pub fn new(category: impl Into<String>, rung_used: Rung, reason: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            rung_used,
            reason: reason.into(),
            age_ms: None,
            recorded_at: now_rfc3339(),
        }
    }

    pub fn with_age(mut self, age: Duration) -> Self {
        self.age_ms = Some(age.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

/// Per-category result inside an [`AggregateResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        #[serde(skip)]
        payload: Payload,
        freshness: Freshness,
    },
    TimedOut,
    Failed {
        kind: ErrorKind,
        message: String,
    },
}

impl Outcome {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn freshness(&self) -> Option<Freshness> {
        match self {
            Self::Success { freshness, .. } => Some(*freshness),
            _ => None,
        }
    }
}

/// Merged outcome of one orchestrator run.
///
/// Invariant: `outcomes` holds exactly one entry per requested category; a
/// category is never silently dropped, whatever mix of success, failure and
/// timeout the run produced.
#[derive(Debug, Clone)]
pub struct AggregateResult {
    pub entity_id: String,
    pub outcomes: BTreeMap<String, Outcome>,
    pub notes: Vec<LadderNote>,
    pub elapsed: Duration,
}

impl AggregateResult {
    pub fn outcome(&self, category: &str) -> Option<&Outcome> {
        self.outcomes.get(category)
    }

    pub fn successes(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_params_are_order_independent() {
        let mut a = Params::new();
        a.insert("start".into(), "20240101".into());
        a.insert("limit".into(), 30i64.into());

        let mut b = Params::new();
        b.insert("limit".into(), 30i64.into());
        b.insert("start".into(), "20240101".into());

        assert_eq!(canonical_params(&a), canonical_params(&b));
        assert_eq!(canonical_params(&a), r#"{"limit":30,"start":"20240101"}"#);
    }

    #[test]
    fn spec_builder_sets_defaults() {
        let fetch: Arc<dyn Fetch> =
            Arc::new(|_: &str, _: &Params, _: &CancelToken| Ok(Vec::new()));
        let spec = FetchSpec::new("news", fetch)
            .with_param("limit", 10i64)
            .optional();

        assert_eq!(spec.category, "news");
        assert!(!spec.required);
        assert!(spec.synthetic.is_none());
        assert_eq!(spec.params.len(), 1);
    }

    #[test]
    fn note_serializes_for_the_transport_layer() {
        let note = LadderNote::new("quote", Rung::StaleCache, "rate limited upstream")
            .with_age(Duration::from_secs(90));
        let json = serde_json::to_value(&note).expect("serializes");

        assert_eq!(json["rung_used"], "stale_cache");
        assert_eq!(json["age_ms"], 90_000);
        assert_eq!(json["category"], "quote");
    }

    #[test]
    fn outcome_freshness_is_only_present_on_success() {
        let ok = Outcome::Success {
            payload: b"x".to_vec(),
            freshness: Freshness::Stale,
        };
        assert_eq!(ok.freshness(), Some(Freshness::Stale));
        assert_eq!(Outcome::TimedOut.freshness(), None);
    }
}
