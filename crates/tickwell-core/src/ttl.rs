use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Freshness class for a data category.
///
/// Each class carries the maximum age at which a cached value is still
/// usable without a live re-fetch. The spread runs from per-minute quote
/// data down to reference data that barely moves within a trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityClass {
    /// Live quotes and market mood; stale within a minute.
    Realtime,
    /// Intraday flows, limit lists, hot lists.
    Intraday,
    /// News and announcements.
    News,
    /// Daily bars, per-session indicators.
    Session,
    /// Financial statements and derived indicators.
    Financials,
    /// Instrument listings, holder registers, dividends.
    Reference,
}

impl VolatilityClass {
    pub const fn max_age(self) -> Duration {
        match self {
            Self::Realtime => Duration::from_secs(60),
            Self::Intraday => Duration::from_secs(10 * 60),
            Self::News => Duration::from_secs(30 * 60),
            Self::Session => Duration::from_secs(3 * 3600),
            Self::Financials => Duration::from_secs(6 * 3600),
            Self::Reference => Duration::from_secs(24 * 3600),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::Intraday => "intraday",
            Self::News => "news",
            Self::Session => "session",
            Self::Financials => "financials",
            Self::Reference => "reference",
        }
    }
}

impl Display for VolatilityClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category name → maximum cache age.
///
/// Immutable configuration read by every degradation-ladder run to decide
/// fresh versus stale. Unknown categories fall back to one hour.
#[derive(Debug, Clone)]
pub struct TtlTable {
    classes: HashMap<String, VolatilityClass>,
    overrides: HashMap<String, Duration>,
    fallback: Duration,
}

impl TtlTable {
    pub const DEFAULT_FALLBACK: Duration = Duration::from_secs(3600);

    pub fn new() -> Self {
        Self {
            classes: HashMap::new(),
            overrides: HashMap::new(),
            fallback: Self::DEFAULT_FALLBACK,
        }
    }

    /// Table pre-populated with the standard report category menu.
    pub fn market_defaults() -> Self {
        let mut table = Self::new();
        for (category, class) in [
            ("quote", VolatilityClass::Realtime),
            ("market", VolatilityClass::Intraday),
            ("technical", VolatilityClass::Intraday),
            ("news", VolatilityClass::News),
            ("daily", VolatilityClass::Session),
            ("fundamental", VolatilityClass::Financials),
            ("financials", VolatilityClass::Financials),
            ("premium", VolatilityClass::Financials),
            ("holders", VolatilityClass::Reference),
            ("reference", VolatilityClass::Reference),
        ] {
            table.classes.insert(category.to_string(), class);
        }
        table
    }

    pub fn with_class(mut self, category: impl Into<String>, class: VolatilityClass) -> Self {
        self.classes.insert(category.into(), class);
        self
    }

    /// Pin an exact duration for one category, taking precedence over its
    /// volatility class.
    pub fn with_override(mut self, category: impl Into<String>, max_age: Duration) -> Self {
        self.overrides.insert(category.into(), max_age);
        self
    }

    pub fn with_fallback(mut self, fallback: Duration) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn class_of(&self, category: &str) -> Option<VolatilityClass> {
        self.classes.get(category).copied()
    }

    /// Maximum usable age for a category.
    pub fn max_age(&self, category: &str) -> Duration {
        if let Some(max_age) = self.overrides.get(category) {
            return *max_age;
        }
        self.classes
            .get(category)
            .map(|class| class.max_age())
            .unwrap_or(self.fallback)
    }
}

impl Default for TtlTable {
    fn default() -> Self {
        Self::market_defaults()
    }
}
