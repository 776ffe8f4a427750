use crate::engine::pricing::{BlackScholes, BsParams, Greeks};
use crate::engine::{MarketState, OptionKind, Position};
use crate::errors::{EngineError, EngineResult};
use smallvec::SmallVec;

/// Sample count for the margin scan band.
const MARGIN_SCAN_POINTS: usize = 100;

/// One option leg. Owned by exactly one Strategy, never shared.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OptionLeg {
    pub strike: f64,
    pub kind: OptionKind,
    pub position: Position,
    pub quantity: u32,
    /// Entry premium per unit (always positive; the position sign decides
    /// whether it is paid or collected).
    pub premium: f64,
    /// Per-leg implied volatility (annualized, decimal).
    pub sigma: f64,
}

impl OptionLeg {
    /// Intrinsic value of this leg's option at a terminal price, per unit.
    #[inline]
    pub fn intrinsic(&self, terminal: f64) -> f64 {
        match self.kind {
            OptionKind::Call => (terminal - self.strike).max(0.0),
            OptionKind::Put => (self.strike - terminal).max(0.0),
        }
    }

    /// Expiry P&L of this leg at a terminal price, premium included.
    #[inline]
    pub fn pnl_at(&self, terminal: f64) -> f64 {
        self.position.sign() * self.quantity as f64 * (self.intrinsic(terminal) - self.premium)
    }
}

/// Closed set of strategy shapes the optimizer can generate. Tagging the
/// shape keeps candidate generation exhaustive and statically checkable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    LongCall,
    LongPut,
    ShortPut,
    BullCallSpread,
    BearPutSpread,
    BearCallSpread,
    LongStraddle,
    ShortStraddle,
    LongStrangle,
    ShortStrangle,
    IronCondor,
    LongButterfly,
}

/// A multi-leg position. Leg order is display-only, not semantic.
/// Invariant: all legs share one MarketState and expiry.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Strategy {
    pub name: String,
    pub kind: StrategyKind,
    pub legs: SmallVec<[OptionLeg; 4]>,
}

impl Strategy {
    pub fn new(
        name: impl Into<String>,
        kind: StrategyKind,
        legs: SmallVec<[OptionLeg; 4]>,
    ) -> EngineResult<Self> {
        if legs.is_empty() {
            return Err(EngineError::Validation(
                "strategy must have at least one leg".into(),
            ));
        }
        for leg in &legs {
            if !(leg.strike > 0.0) || !leg.strike.is_finite() {
                return Err(EngineError::invalid(
                    "leg.strike",
                    leg.strike,
                    "positive and finite",
                ));
            }
            if leg.quantity == 0 {
                return Err(EngineError::Validation(format!(
                    "leg at strike {} has quantity 0, must be >= 1",
                    leg.strike
                )));
            }
            if !leg.premium.is_finite() || leg.premium < 0.0 {
                return Err(EngineError::invalid(
                    "leg.premium",
                    leg.premium,
                    "non-negative and finite",
                ));
            }
            if !(leg.sigma > 0.0) || !leg.sigma.is_finite() {
                return Err(EngineError::invalid(
                    "leg.sigma",
                    leg.sigma,
                    "positive and finite",
                ));
            }
        }
        Ok(Self {
            name: name.into(),
            kind,
            legs,
        })
    }

    /// Net strategy P&L at one terminal price, per unit, premiums included.
    /// This is the point evaluation Monte Carlo reuses -- no grid involved.
    #[inline]
    pub fn payoff_at(&self, terminal: f64) -> f64 {
        self.legs.iter().map(|leg| leg.pnl_at(terminal)).sum()
    }

    /// Net premium for the whole position: positive = credit collected.
    pub fn net_premium(&self) -> f64 {
        self.legs
            .iter()
            .map(|leg| -leg.position.sign() * leg.premium * leg.quantity as f64)
            .sum()
    }

    /// Signed sum of per-leg Greeks, each leg priced with its own vol.
    pub fn aggregate_greeks(&self, bs: &BlackScholes, market: &MarketState) -> EngineResult<Greeks> {
        let mut total = Greeks::default();
        for leg in &self.legs {
            let params = BsParams::from_market(market, leg.strike, leg.sigma)?;
            let per_unit = bs.greeks(&params, leg.kind);
            total = total.add(&per_unit.scale(leg.position.sign() * leg.quantity as f64));
        }
        Ok(total)
    }

    /// SPAN-style margin approximation: worst loss scanned over a band
    /// around the strikes, split 70% SPAN / 30% exposure. An estimate for
    /// ranking and capital filtering only -- never broker-exact.
    pub fn margin_estimate(&self) -> MarginEstimate {
        let k_min = self
            .legs
            .iter()
            .map(|l| l.strike)
            .fold(f64::INFINITY, f64::min);
        let k_max = self
            .legs
            .iter()
            .map(|l| l.strike)
            .fold(f64::NEG_INFINITY, f64::max);

        let lo = 0.8 * k_min;
        let hi = 1.2 * k_max;
        let step = (hi - lo) / (MARGIN_SCAN_POINTS - 1) as f64;

        let mut worst = f64::INFINITY;
        for i in 0..MARGIN_SCAN_POINTS {
            let pnl = self.payoff_at(lo + step * i as f64);
            if pnl < worst {
                worst = pnl;
            }
        }

        let max_loss = (-worst).max(0.0);
        let span = max_loss * 0.70;
        let exposure = max_loss * 0.30;
        MarginEstimate {
            span,
            exposure,
            total: span + exposure,
        }
    }
}

/// Margin breakdown. The split mirrors exchange SPAN + exposure reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MarginEstimate {
    pub span: f64,
    pub exposure: f64,
    pub total: f64,
}

/// Uniform terminal-price grid. Shared by the payoff curve and the margin
/// and optimizer scans; the EV engine integrates over the same domain.
#[derive(Debug, Clone, Copy)]
pub struct PriceGrid {
    pub lo: f64,
    pub hi: f64,
    pub points: usize,
}

impl PriceGrid {
    pub fn new(lo: f64, hi: f64, points: usize) -> EngineResult<Self> {
        if !(lo > 0.0) || !(hi > lo) {
            return Err(EngineError::Validation(format!(
                "price grid [{lo}, {hi}] must satisfy 0 < lo < hi"
            )));
        }
        if points < 2 {
            return Err(EngineError::Validation(format!(
                "price grid needs at least 2 points, got {points}"
            )));
        }
        Ok(Self { lo, hi, points })
    }

    #[inline]
    pub fn step(&self) -> f64 {
        (self.hi - self.lo) / (self.points - 1) as f64
    }

    #[inline]
    pub fn price_at(&self, i: usize) -> f64 {
        self.lo + self.step() * i as f64
    }
}

/// Expiry P&L sampled across a price grid, with derived breakevens and
/// extrema. Extrema that sit on a still-sloping grid boundary are flagged
/// unbounded instead of being reported as capped numbers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PayoffCurve {
    pub prices: Vec<f64>,
    pub payoffs: Vec<f64>,
    /// Zero crossings, ascending.
    pub breakevens: Vec<f64>,
    pub max_profit: f64,
    pub max_loss: f64,
    pub max_profit_unbounded: bool,
    pub max_loss_unbounded: bool,
}

impl PayoffCurve {
    pub fn compute(strategy: &Strategy, grid: &PriceGrid) -> EngineResult<Self> {
        let n = grid.points;
        let mut prices = Vec::with_capacity(n);
        let mut payoffs = Vec::with_capacity(n);
        for i in 0..n {
            let s = grid.price_at(i);
            let p = strategy.payoff_at(s);
            if !p.is_finite() {
                return Err(EngineError::Numerical(format!(
                    "payoff non-finite at terminal price {s}"
                )));
            }
            prices.push(s);
            payoffs.push(p);
        }

        let breakevens = find_breakevens(&prices, &payoffs);

        let (mut argmax, mut argmin) = (0usize, 0usize);
        for i in 1..n {
            if payoffs[i] > payoffs[argmax] {
                argmax = i;
            }
            if payoffs[i] < payoffs[argmin] {
                argmin = i;
            }
        }
        let max_profit = payoffs[argmax];
        let max_loss = payoffs[argmin];

        // Slope at each boundary; a sloping boundary extremum means the true
        // extremum lies outside the grid.
        let scale = payoffs.iter().fold(1.0_f64, |acc, p| acc.max(p.abs()));
        let eps = 1e-9 * scale;
        let slope_right = payoffs[n - 1] - payoffs[n - 2];
        let slope_left = payoffs[0] - payoffs[1];

        let max_profit_unbounded = (argmax == n - 1 && slope_right > eps)
            || (argmax == 0 && slope_left > eps);
        let max_loss_unbounded =
            (argmin == n - 1 && slope_right < -eps) || (argmin == 0 && slope_left < -eps);

        Ok(Self {
            prices,
            payoffs,
            breakevens,
            max_profit,
            max_loss,
            max_profit_unbounded,
            max_loss_unbounded,
        })
    }
}

/// Scan for sign changes between adjacent samples and linearly interpolate
/// each zero crossing. Ascending by construction since the grid is.
fn find_breakevens(prices: &[f64], payoffs: &[f64]) -> Vec<f64> {
    let mut breakevens = Vec::new();
    for i in 0..payoffs.len() - 1 {
        let (a, b) = (payoffs[i], payoffs[i + 1]);
        if a == 0.0 {
            if breakevens.last().is_none_or(|&be| be < prices[i]) {
                breakevens.push(prices[i]);
            }
        } else if a * b < 0.0 {
            let be = prices[i] + (0.0 - a) * (prices[i + 1] - prices[i]) / (b - a);
            breakevens.push(be);
        }
    }
    if let Some(&last) = payoffs.last() {
        if last == 0.0 {
            breakevens.push(prices[prices.len() - 1]);
        }
    }
    breakevens
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn long_call(strike: f64, premium: f64) -> Strategy {
        Strategy::new(
            "Long Call",
            StrategyKind::LongCall,
            smallvec![OptionLeg {
                strike,
                kind: OptionKind::Call,
                position: Position::Long,
                quantity: 1,
                premium,
                sigma: 0.15,
            }],
        )
        .expect("valid leg")
    }

    fn bull_call_spread(k_long: f64, k_short: f64, p_long: f64, p_short: f64) -> Strategy {
        Strategy::new(
            "Bull Call Spread",
            StrategyKind::BullCallSpread,
            smallvec![
                OptionLeg {
                    strike: k_long,
                    kind: OptionKind::Call,
                    position: Position::Long,
                    quantity: 1,
                    premium: p_long,
                    sigma: 0.15,
                },
                OptionLeg {
                    strike: k_short,
                    kind: OptionKind::Call,
                    position: Position::Short,
                    quantity: 1,
                    premium: p_short,
                    sigma: 0.15,
                },
            ],
        )
        .expect("valid legs")
    }

    #[test]
    fn test_long_call_scenario() {
        // spot 24387, long 24400 call at 120: breakeven 24520, +480 at 25000
        let strat = long_call(24400.0, 120.0);
        assert!((strat.payoff_at(25000.0) - 480.0).abs() < 1e-9);
        assert!((strat.payoff_at(24400.0) + 120.0).abs() < 1e-9);

        let grid = PriceGrid::new(22000.0, 27000.0, 501).unwrap();
        let curve = PayoffCurve::compute(&strat, &grid).unwrap();
        assert_eq!(curve.breakevens.len(), 1);
        assert!(
            (curve.breakevens[0] - 24520.0).abs() < 1.0,
            "breakeven {} should be ~24520",
            curve.breakevens[0]
        );
        assert!(curve.max_profit_unbounded, "long call profit is uncapped");
        assert!(!curve.max_loss_unbounded, "long call loss is the premium");
        assert!((curve.max_loss + 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_spread_has_bounded_extrema() {
        let strat = bull_call_spread(100.0, 105.0, 3.0, 1.2);
        let grid = PriceGrid::new(70.0, 140.0, 701).unwrap();
        let curve = PayoffCurve::compute(&strat, &grid).unwrap();
        assert!(!curve.max_profit_unbounded);
        assert!(!curve.max_loss_unbounded);
        // Debit 1.8; max profit = width - debit
        assert!((curve.max_profit - 3.2).abs() < 1e-9);
        assert!((curve.max_loss + 1.8).abs() < 1e-9);
        assert_eq!(curve.breakevens.len(), 1);
        assert!((curve.breakevens[0] - 101.8).abs() < 0.2);
    }

    #[test]
    fn test_short_straddle_two_breakevens() {
        let strat = Strategy::new(
            "Short Straddle",
            StrategyKind::ShortStraddle,
            smallvec![
                OptionLeg {
                    strike: 100.0,
                    kind: OptionKind::Call,
                    position: Position::Short,
                    quantity: 1,
                    premium: 4.0,
                    sigma: 0.2,
                },
                OptionLeg {
                    strike: 100.0,
                    kind: OptionKind::Put,
                    position: Position::Short,
                    quantity: 1,
                    premium: 3.0,
                    sigma: 0.2,
                },
            ],
        )
        .unwrap();
        let grid = PriceGrid::new(60.0, 140.0, 801).unwrap();
        let curve = PayoffCurve::compute(&strat, &grid).unwrap();
        assert_eq!(curve.breakevens.len(), 2, "straddle has two breakevens");
        assert!((curve.breakevens[0] - 93.0).abs() < 0.2);
        assert!((curve.breakevens[1] - 107.0).abs() < 0.2);
        assert!(curve.breakevens[0] < curve.breakevens[1], "ascending order");
        assert!(curve.max_loss_unbounded, "short straddle risk is open-ended");
        assert!((curve.max_profit - 7.0).abs() < 0.2);
    }

    #[test]
    fn test_net_premium_sign() {
        let debit = long_call(100.0, 2.5);
        assert!((debit.net_premium() + 2.5).abs() < 1e-12);
        let credit = bull_call_spread(100.0, 105.0, 3.0, 1.2);
        assert!((credit.net_premium() + 1.8).abs() < 1e-12);
    }

    #[test]
    fn test_margin_covers_defined_risk() {
        let strat = bull_call_spread(100.0, 105.0, 3.0, 1.2);
        let m = strat.margin_estimate();
        // Max loss of the debit spread is the 1.8 debit
        assert!((m.total - 1.8).abs() < 0.05, "margin {} ~ max loss", m.total);
        assert!((m.span + m.exposure - m.total).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_empty_and_zero_quantity() {
        let empty: SmallVec<[OptionLeg; 4]> = smallvec![];
        assert!(Strategy::new("x", StrategyKind::LongCall, empty).is_err());
        let zero_qty = Strategy::new(
            "x",
            StrategyKind::LongCall,
            smallvec![OptionLeg {
                strike: 100.0,
                kind: OptionKind::Call,
                position: Position::Long,
                quantity: 0,
                premium: 1.0,
                sigma: 0.2,
            }],
        );
        assert!(zero_qty.is_err());
    }
}
