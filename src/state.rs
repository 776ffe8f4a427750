use crate::config::EngineConfig;
use portable_atomic::AtomicU64;
use std::sync::Arc;

/// Performance counters (lock-free). Exposed on /api/counters.
pub struct PerfCounters {
    pub optimize_requests: AtomicU64,
    pub candidates_evaluated: AtomicU64,
    pub simulations_run: AtomicU64,
    pub greeks_requests: AtomicU64,
    pub stress_requests: AtomicU64,
    pub request_errors: AtomicU64,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self {
            optimize_requests: AtomicU64::new(0),
            candidates_evaluated: AtomicU64::new(0),
            simulations_run: AtomicU64::new(0),
            greeks_requests: AtomicU64::new(0),
            stress_requests: AtomicU64::new(0),
            request_errors: AtomicU64::new(0),
        }
    }
}

impl Default for PerfCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Application shared state. The engine itself is stateless; this only
/// carries the per-process configuration and counters.
pub struct AppState {
    pub config: EngineConfig,
    pub counters: PerfCounters,
}

impl AppState {
    pub fn new(config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            counters: PerfCounters::new(),
        })
    }
}
