pub mod ev;
pub mod monte_carlo;
pub mod payoff;
pub mod pricing;
pub mod probability;
pub mod stress;

use crate::errors::{EngineError, EngineResult};

/// Which way an option pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    Call,
    Put,
}

/// Long pays premium, short collects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Long,
    Short,
}

impl Position {
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Position::Long => 1.0,
            Position::Short => -1.0,
        }
    }
}

/// Immutable market snapshot passed by value into every computation.
/// Validated once at construction; the engine never mutates it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MarketState {
    pub symbol: String,
    /// Spot price, > 0.
    pub spot: f64,
    /// Annualized risk-free rate.
    pub rate: f64,
    /// Annualized implied volatility, > 0.
    pub sigma: f64,
    /// Time to expiry in years, > 0.
    pub ttl_years: f64,
}

impl MarketState {
    pub fn new(
        symbol: impl Into<String>,
        spot: f64,
        rate: f64,
        sigma: f64,
        ttl_years: f64,
    ) -> EngineResult<Self> {
        if !(spot > 0.0) || !spot.is_finite() {
            return Err(EngineError::invalid("spot", spot, "positive and finite"));
        }
        if !(sigma > 0.0) || !sigma.is_finite() {
            return Err(EngineError::invalid("sigma", sigma, "positive and finite"));
        }
        if !(ttl_years > 0.0) || !ttl_years.is_finite() {
            return Err(EngineError::invalid(
                "ttl_years",
                ttl_years,
                "positive and finite",
            ));
        }
        if !rate.is_finite() {
            return Err(EngineError::invalid("rate", rate, "finite"));
        }
        Ok(Self {
            symbol: symbol.into(),
            spot,
            rate,
            sigma,
            ttl_years,
        })
    }

    /// Same market with spot, vol, and remaining time shifted (stress scenarios).
    pub fn shifted(&self, new_spot: f64, new_sigma: f64, new_ttl: f64) -> EngineResult<Self> {
        MarketState::new(self.symbol.clone(), new_spot, self.rate, new_sigma, new_ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_nonpositive_inputs() {
        assert!(MarketState::new("X", 0.0, 0.05, 0.2, 0.1).is_err());
        assert!(MarketState::new("X", 100.0, 0.05, 0.0, 0.1).is_err());
        assert!(MarketState::new("X", 100.0, 0.05, 0.2, 0.0).is_err());
        assert!(MarketState::new("X", 100.0, 0.05, -0.2, 0.1).is_err());
        assert!(MarketState::new("X", f64::NAN, 0.05, 0.2, 0.1).is_err());
    }

    #[test]
    fn test_accepts_valid_market() {
        let m = MarketState::new("BANKNIFTY", 51204.0, 0.065, 0.1432, 7.0 / 365.0);
        assert!(m.is_ok());
    }
}
