pub mod mock;

use crate::errors::{EngineError, EngineResult};

/// One strike row with two-sided quotes for both option kinds.
/// IVs are annualized decimals.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChainRow {
    pub strike: f64,
    pub call_bid: f64,
    pub call_ask: f64,
    pub call_iv: f64,
    pub call_oi: u64,
    pub call_volume: u64,
    pub put_bid: f64,
    pub put_ask: f64,
    pub put_iv: f64,
    pub put_oi: u64,
    pub put_volume: u64,
}

/// Option chain snapshot handed to the engine by the ingestion collaborator
/// (or the synthetic generator). The engine never fetches one itself.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChainSnapshot {
    pub symbol: String,
    pub spot: f64,
    /// Expiry date label, DD-MMM-YYYY.
    pub expiry: String,
    pub ttl_years: f64,
    /// ATM implied volatility, annualized decimal.
    pub implied_vol: f64,
    /// Rows ordered by strike, ascending.
    pub rows: Vec<ChainRow>,
    /// True when this snapshot is a synthetic fallback, not live data.
    pub is_mock: bool,
}

impl ChainSnapshot {
    /// Structural checks before the optimizer touches the snapshot.
    pub fn validate(&self) -> EngineResult<()> {
        if !(self.spot > 0.0) || !self.spot.is_finite() {
            return Err(EngineError::invalid("spot", self.spot, "positive and finite"));
        }
        if !(self.implied_vol > 0.0) || !self.implied_vol.is_finite() {
            return Err(EngineError::invalid(
                "implied_vol",
                self.implied_vol,
                "positive and finite",
            ));
        }
        if !(self.ttl_years > 0.0) {
            return Err(EngineError::invalid(
                "ttl_years",
                self.ttl_years,
                "positive",
            ));
        }
        if self.rows.is_empty() {
            return Err(EngineError::Validation(format!(
                "chain for {} has no strikes",
                self.symbol
            )));
        }
        for w in self.rows.windows(2) {
            if !(w[1].strike > w[0].strike) {
                return Err(EngineError::Validation(format!(
                    "chain strikes not strictly ascending near {}",
                    w[0].strike
                )));
            }
        }
        for row in &self.rows {
            if !(row.strike > 0.0) || !row.strike.is_finite() {
                return Err(EngineError::invalid(
                    "chain strike",
                    row.strike,
                    "positive and finite",
                ));
            }
        }
        Ok(())
    }

    /// Index of the strike closest to spot.
    pub fn atm_index(&self) -> usize {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for (i, row) in self.rows.iter().enumerate() {
            let d = (row.strike - self.spot).abs();
            if d < best_dist {
                best_dist = d;
                best = i;
            }
        }
        best
    }
}
