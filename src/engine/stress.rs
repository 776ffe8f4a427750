use crate::engine::payoff::Strategy;
use crate::engine::pricing::{BlackScholes, BsParams, Greeks};
use crate::engine::MarketState;
use crate::errors::EngineResult;

/// Floor for remaining time after rolling the clock forward; keeps the
/// re-pricing inputs valid on expiry day itself.
const MIN_TTL_YEARS: f64 = 1e-6;

/// Vol floor after a downward IV shock.
const MIN_SIGMA: f64 = 0.01;

/// What-if shifts applied on top of the current market.
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub struct StressScenario {
    /// Spot move in percent (e.g. -3.0 = down 3%).
    pub spot_shift_pct: f64,
    /// IV move in volatility points (e.g. 5.0 = +5 vol points).
    pub iv_shift_pts: f64,
    /// Calendar days rolled forward.
    pub days_forward: f64,
}

/// Re-valuation of a position under a scenario. No new algorithm: the
/// Pricing Model runs twice, once per market.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StressReport {
    pub current_pnl: f64,
    pub stressed_pnl: f64,
    pub pnl_change: f64,
    pub new_spot: f64,
    /// Shifted market-level IV, decimal.
    pub new_iv: f64,
    /// Aggregate Greeks of the position under the stressed market.
    pub greeks: Greeks,
    /// Theta bleed over the rolled-forward days, at current market.
    pub time_decay: f64,
    pub scenario_description: String,
}

/// Mark a position to model under the current market and again under the
/// shifted one. P&L is versus each leg's entry premium.
pub fn stress_test(
    strategy: &Strategy,
    market: &MarketState,
    scenario: &StressScenario,
    bs: &BlackScholes,
) -> EngineResult<StressReport> {
    let new_spot = market.spot * (1.0 + scenario.spot_shift_pct / 100.0);
    let new_ttl = (market.ttl_years - scenario.days_forward / 365.0).max(MIN_TTL_YEARS);
    let iv_shift = scenario.iv_shift_pts / 100.0;
    let new_market_sigma = (market.sigma + iv_shift).max(MIN_SIGMA);
    let stressed = market.shifted(new_spot, new_market_sigma, new_ttl)?;

    let mut current_pnl = 0.0;
    let mut stressed_pnl = 0.0;
    let mut time_decay = 0.0;
    let mut greeks = Greeks::default();

    for leg in &strategy.legs {
        let signed_qty = leg.position.sign() * leg.quantity as f64;
        let leg_sigma_stressed = (leg.sigma + iv_shift).max(MIN_SIGMA);

        let now = BsParams::from_market(market, leg.strike, leg.sigma)?;
        let then = BsParams::from_market(&stressed, leg.strike, leg_sigma_stressed)?;

        current_pnl += signed_qty * (bs.price(&now, leg.kind) - leg.premium);
        stressed_pnl += signed_qty * (bs.price(&then, leg.kind) - leg.premium);

        let g_now = bs.greeks(&now, leg.kind);
        time_decay += signed_qty * g_now.theta * scenario.days_forward;

        greeks = greeks.add(&bs.greeks(&then, leg.kind).scale(signed_qty));
    }

    let scenario_description = format!(
        "Spot {:+.1}%, IV {:+.1} pts, {:.0}d forward",
        scenario.spot_shift_pct, scenario.iv_shift_pts, scenario.days_forward
    );

    Ok(StressReport {
        current_pnl,
        stressed_pnl,
        pnl_change: stressed_pnl - current_pnl,
        new_spot,
        new_iv: new_market_sigma,
        greeks,
        time_decay,
        scenario_description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::payoff::{OptionLeg, StrategyKind};
    use crate::engine::{OptionKind, Position};
    use smallvec::smallvec;

    fn market() -> MarketState {
        MarketState::new("TEST", 100.0, 0.065, 0.20, 30.0 / 365.0).unwrap()
    }

    fn long_call(premium: f64) -> Strategy {
        Strategy::new(
            "Long Call",
            StrategyKind::LongCall,
            smallvec![OptionLeg {
                strike: 100.0,
                kind: OptionKind::Call,
                position: Position::Long,
                quantity: 1,
                premium,
                sigma: 0.20,
            }],
        )
        .unwrap()
    }

    #[test]
    fn test_null_scenario_changes_nothing() {
        let m = market();
        let strat = long_call(2.5);
        let bs = BlackScholes::new();
        let r = stress_test(
            &strat,
            &m,
            &StressScenario {
                spot_shift_pct: 0.0,
                iv_shift_pts: 0.0,
                days_forward: 0.0,
            },
            &bs,
        )
        .unwrap();
        assert!(r.pnl_change.abs() < 1e-12);
        assert!((r.new_spot - 100.0).abs() < 1e-12);
        assert!(r.time_decay.abs() < 1e-12);
    }

    #[test]
    fn test_spot_up_helps_long_call() {
        let m = market();
        let strat = long_call(2.5);
        let bs = BlackScholes::new();
        let r = stress_test(
            &strat,
            &m,
            &StressScenario {
                spot_shift_pct: 3.0,
                iv_shift_pts: 0.0,
                days_forward: 0.0,
            },
            &bs,
        )
        .unwrap();
        assert!(r.pnl_change > 0.0, "call gains on a rally: {}", r.pnl_change);
        assert!(r.greeks.delta > 0.0);
    }

    #[test]
    fn test_iv_crush_hurts_long_options() {
        let m = market();
        let strat = long_call(2.5);
        let bs = BlackScholes::new();
        let r = stress_test(
            &strat,
            &m,
            &StressScenario {
                spot_shift_pct: 0.0,
                iv_shift_pts: -8.0,
                days_forward: 0.0,
            },
            &bs,
        )
        .unwrap();
        assert!(r.pnl_change < 0.0, "vega loss expected: {}", r.pnl_change);
        assert!((r.new_iv - 0.12).abs() < 1e-12);
    }

    #[test]
    fn test_time_forward_decays_long_premium() {
        let m = market();
        let strat = long_call(2.5);
        let bs = BlackScholes::new();
        let r = stress_test(
            &strat,
            &m,
            &StressScenario {
                spot_shift_pct: 0.0,
                iv_shift_pts: 0.0,
                days_forward: 7.0,
            },
            &bs,
        )
        .unwrap();
        assert!(r.pnl_change < 0.0, "theta bleed: {}", r.pnl_change);
        assert!(r.time_decay < 0.0, "long option theta is negative");
    }

    #[test]
    fn test_days_forward_beyond_expiry_is_floored() {
        let m = market();
        let strat = long_call(2.5);
        let bs = BlackScholes::new();
        let r = stress_test(
            &strat,
            &m,
            &StressScenario {
                spot_shift_pct: 0.0,
                iv_shift_pts: 0.0,
                days_forward: 365.0,
            },
            &bs,
        );
        assert!(r.is_ok(), "rolling past expiry clamps, not errors");
    }
}
