use crate::engine::payoff::Strategy;
use crate::engine::probability::TerminalDistribution;
use crate::errors::{EngineError, EngineResult};

/// Composite-Simpson interval count for the EV integral. Fixed so repeated
/// invocations with identical inputs return the identical value bit-for-bit.
pub const INTEGRATION_STEPS: usize = 1_000;

/// Deterministic expected-value statistics for one strategy.
/// This is an integral against the terminal density, not a sampled estimate.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct EvReport {
    /// EV = integral of payoff(S_T) f(S_T) dS_T over the truncated domain.
    pub ev: f64,
    pub std_dev: f64,
    /// Root of the semi-variance below zero.
    pub downside_deviation: f64,
    pub max_profit: f64,
    pub max_loss: f64,
    /// EV / |max loss|; infinite when the domain shows no losing price.
    pub ev_per_max_loss: f64,
    /// EV / std-dev.
    pub sharpe: f64,
}

/// Integrate payoff against the lognormal density with composite Simpson
/// over the distribution's +/- 6 sigma domain.
///
/// Degenerate markets (sigma -> 0, T -> 0) never reach this point: the
/// TerminalDistribution constructor already rejects them, so a collapsed
/// domain surfaces as a validation error rather than EV = 0.
pub fn expected_value(
    strategy: &Strategy,
    dist: &TerminalDistribution,
) -> EngineResult<EvReport> {
    let (lo, hi) = dist.domain();
    let n = INTEGRATION_STEPS;
    let h = (hi - lo) / n as f64;

    let mut ev_acc = 0.0;
    let mut sq_acc = 0.0;
    let mut down_acc = 0.0;
    let mut max_profit = f64::NEG_INFINITY;
    let mut max_loss = f64::INFINITY;

    for i in 0..=n {
        let x = lo + h * i as f64;
        let payoff = strategy.payoff_at(x);
        let f = dist.density(x);
        let weighted = payoff * f;
        if !weighted.is_finite() {
            return Err(EngineError::Numerical(format!(
                "payoff*density non-finite at S_T={x}"
            )));
        }

        let w = if i == 0 || i == n {
            1.0
        } else if i % 2 == 1 {
            4.0
        } else {
            2.0
        };

        ev_acc += w * weighted;
        sq_acc += w * payoff * payoff * f;
        let downside = payoff.min(0.0);
        down_acc += w * downside * downside * f;

        if payoff > max_profit {
            max_profit = payoff;
        }
        if payoff < max_loss {
            max_loss = payoff;
        }
    }

    let scale = h / 3.0;
    let ev = ev_acc * scale;
    let second_moment = sq_acc * scale;
    let variance = (second_moment - ev * ev).max(0.0);
    let std_dev = variance.sqrt();
    let downside_deviation = (down_acc * scale).max(0.0).sqrt();

    if !ev.is_finite() || !std_dev.is_finite() {
        return Err(EngineError::Numerical(
            "EV integration produced a non-finite moment".into(),
        ));
    }

    let ev_per_max_loss = if max_loss < 0.0 {
        ev / max_loss.abs()
    } else {
        f64::INFINITY
    };
    let sharpe = if std_dev > 0.0 { ev / std_dev } else { 0.0 };

    Ok(EvReport {
        ev,
        std_dev,
        downside_deviation,
        max_profit,
        max_loss,
        ev_per_max_loss,
        sharpe,
    })
}
