use std::time::Duration;

use crate::ttl::TtlTable;

/// Caller-supplied knobs for the acquisition core.
///
/// No environment coupling: the service wires this up once at start and
/// hands it to the orchestrator. The cache capacity and throttle interval
/// live on their own constructors, since those structs are shared handles
/// built before any orchestrator exists.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// Per-category freshness table.
    pub ttl: TtlTable,
    /// When true the stale rung is skipped entirely: absence beats stale.
    pub strict: bool,
    /// Worker-pool size used when a run does not override it.
    pub default_pool_size: usize,
    /// Total fan-out budget used when a run does not override it.
    pub default_budget: Duration,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            ttl: TtlTable::market_defaults(),
            strict: false,
            default_pool_size: 4,
            default_budget: Duration::from_secs(30),
        }
    }
}

impl AcquisitionConfig {
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: TtlTable) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.default_pool_size = pool_size.max(1);
        self
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.default_budget = budget;
        self
    }
}

/// Per-run overrides for one orchestrator call.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub pool_size: Option<usize>,
    pub budget: Option<Duration>,
    /// Skip the fresh-cache rung for every spec (explicit refresh).
    pub force: bool,
}

impl RunOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = Some(pool_size.max(1));
        self
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }
}
