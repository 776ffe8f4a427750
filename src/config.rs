use crate::errors::{EngineError, EngineResult};

/// Engine configuration. Loaded once at startup and threaded by reference
/// into every engine call -- the engine keeps no process-wide mutable state.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Annualized risk-free rate used for pricing and drift.
    pub risk_free_rate: f64,
    /// Default Monte Carlo path count when a request does not specify one.
    pub mc_default_paths: usize,
    /// Default Monte Carlo seed (requests may override).
    pub mc_default_seed: u64,
    /// Sample count for display payoff curves.
    pub payoff_grid_points: usize,
    /// Wall-clock budget for one optimizer run, in milliseconds.
    pub optimizer_deadline_ms: u64,
    /// Serve synthetic chain snapshots instead of requiring a live feed.
    pub use_mock_data: bool,
    /// Underlying symbol served by default.
    pub default_symbol: String,
    pub server_port: u16,
}

impl EngineConfig {
    pub fn from_env() -> EngineResult<Self> {
        dotenvy::dotenv().ok();

        let risk_free_rate = env_var_or("RISK_FREE_RATE", "0.065")
            .parse::<f64>()
            .map_err(|e| EngineError::Config(format!("RISK_FREE_RATE: {e}")))?;

        let mc_default_paths = env_var_or("MC_DEFAULT_PATHS", "10000")
            .parse::<usize>()
            .map_err(|e| EngineError::Config(format!("MC_DEFAULT_PATHS: {e}")))?;

        let mc_default_seed = env_var_or("MC_DEFAULT_SEED", "42")
            .parse::<u64>()
            .map_err(|e| EngineError::Config(format!("MC_DEFAULT_SEED: {e}")))?;

        let payoff_grid_points = env_var_or("PAYOFF_GRID_POINTS", "200")
            .parse::<usize>()
            .map_err(|e| EngineError::Config(format!("PAYOFF_GRID_POINTS: {e}")))?;

        let optimizer_deadline_ms = env_var_or("OPTIMIZER_DEADLINE_MS", "2000")
            .parse::<u64>()
            .map_err(|e| EngineError::Config(format!("OPTIMIZER_DEADLINE_MS: {e}")))?;

        let use_mock_data = env_var_or("USE_MOCK_DATA", "true")
            .parse::<bool>()
            .map_err(|e| EngineError::Config(format!("USE_MOCK_DATA: {e}")))?;

        let server_port = env_var_or("SERVER_PORT", "3001")
            .parse::<u16>()
            .map_err(|e| EngineError::Config(format!("SERVER_PORT: {e}")))?;

        if payoff_grid_points < 16 {
            return Err(EngineError::Config(
                "PAYOFF_GRID_POINTS must be at least 16".into(),
            ));
        }

        Ok(Self {
            risk_free_rate,
            mc_default_paths,
            mc_default_seed,
            payoff_grid_points,
            optimizer_deadline_ms,
            use_mock_data,
            default_symbol: env_var_or("DEFAULT_SYMBOL", "BANKNIFTY"),
            server_port,
        })
    }
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_parse() {
        let cfg = EngineConfig::from_env().expect("defaults must be valid");
        assert!(cfg.risk_free_rate > 0.0);
        assert!(cfg.mc_default_paths >= 1000);
        assert!(cfg.payoff_grid_points >= 16);
    }
}
