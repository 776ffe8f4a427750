pub mod templates;

use crate::config::EngineConfig;
use crate::data::ChainSnapshot;
use crate::engine::ev::{expected_value, EvReport};
use crate::engine::payoff::{MarginEstimate, PayoffCurve, PriceGrid, Strategy};
use crate::engine::pricing::{BlackScholes, Greeks};
use crate::engine::probability::TerminalDistribution;
use crate::engine::MarketState;
use crate::errors::{EngineError, EngineResult};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketView {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityOutlook {
    Rising,
    Falling,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskAppetite {
    Conservative,
    Moderate,
    Aggressive,
}

impl RiskAppetite {
    /// Largest tolerated loss as a fraction of capital.
    pub fn max_loss_fraction(self) -> f64 {
        match self {
            RiskAppetite::Conservative => 0.05,
            RiskAppetite::Moderate => 0.10,
            RiskAppetite::Aggressive => 0.20,
        }
    }

    /// Characteristic |delta| target for OTM strike selection.
    pub fn wing_delta(self) -> f64 {
        match self {
            RiskAppetite::Conservative => 0.20,
            RiskAppetite::Moderate => 0.30,
            RiskAppetite::Aggressive => 0.40,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeHorizon {
    Weekly,
    Monthly,
}

impl TimeHorizon {
    pub fn days(self) -> f64 {
        match self {
            TimeHorizon::Weekly => 7.0,
            TimeHorizon::Monthly => 30.0,
        }
    }
}

/// The trader's request, validated before any computation.
#[derive(Debug, Clone)]
pub struct RequestProfile {
    pub capital: f64,
    pub market_view: MarketView,
    pub volatility_outlook: VolatilityOutlook,
    pub risk_appetite: RiskAppetite,
    pub time_horizon: TimeHorizon,
    pub top_n: usize,
}

impl RequestProfile {
    pub fn validate(&self) -> EngineResult<()> {
        if !(self.capital > 0.0) || !self.capital.is_finite() {
            return Err(EngineError::invalid(
                "capital",
                self.capital,
                "positive and finite",
            ));
        }
        if self.top_n == 0 {
            return Err(EngineError::invalid("top_n", 0.0, "at least 1"));
        }
        Ok(())
    }
}

/// Why the result set came back empty. A reason code, not an error: the
/// computation succeeded and found nothing tradable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoViableReason {
    /// The chain could not support a single template for this view.
    NoCandidatesGenerated,
    /// Every candidate's margin exceeded available capital.
    CapitalFilterExhausted,
    /// Every remaining candidate breached the appetite's max-loss limit.
    RiskFilterExhausted,
}

/// One fully-scored candidate in rank order.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RankedStrategy {
    pub rank: usize,
    #[serde(flatten)]
    pub strategy: Strategy,
    pub net_premium: f64,
    pub margin: MarginEstimate,
    pub greeks: Greeks,
    pub pop: f64,
    pub ev: f64,
    pub std_dev: f64,
    pub downside_deviation: f64,
    pub max_profit: f64,
    pub max_loss: f64,
    pub ev_per_max_loss: f64,
    pub sharpe: f64,
    /// EV per unit of margin committed.
    pub capital_efficiency: f64,
    pub breakevens: Vec<f64>,
    pub payoff_curve: PayoffCurve,
}

/// Result of one optimizer invocation. Fresh per call, never restartable.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OptimizeReport {
    pub symbol: String,
    pub spot: f64,
    pub implied_vol: f64,
    pub expiry: String,
    pub strategies: Vec<RankedStrategy>,
    pub n_candidates_evaluated: usize,
    pub elapsed_ms: f64,
    pub is_mock_data: bool,
    /// True when the deadline cut evaluation short; the ranking then covers
    /// only the candidates that were scored in time.
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_viable: Option<NoViableReason>,
}

struct Scored {
    strategy: Strategy,
    margin: MarginEstimate,
    greeks: Greeks,
    ev: EvReport,
    pop: f64,
    curve: PayoffCurve,
}

enum Outcome {
    Kept(Box<Scored>),
    MarginFiltered,
    RiskFiltered,
    DeadlineSkipped,
}

/// Generate, score, filter, and rank candidates for one request.
///
/// Idle -> Generating -> Scoring -> Filtering -> Ranking -> Done, all within
/// this call; nothing persists afterwards. Scoring fans out across worker
/// threads, but candidates are collected back in generation order and sorted
/// by an explicit total key, so the ranking is identical for any thread
/// count.
pub fn optimize(
    chain: &ChainSnapshot,
    profile: &RequestProfile,
    config: &EngineConfig,
) -> EngineResult<OptimizeReport> {
    let start = Instant::now();
    profile.validate()?;
    chain.validate()?;

    let market = MarketState::new(
        chain.symbol.clone(),
        chain.spot,
        config.risk_free_rate,
        chain.implied_vol,
        chain.ttl_years,
    )?;
    let dist = TerminalDistribution::from_market(&market)?;
    let bs = BlackScholes::new();

    let candidates = templates::generate_candidates(
        chain,
        &market,
        profile.market_view,
        profile.volatility_outlook,
        profile.risk_appetite,
        &bs,
    );
    tracing::debug!(
        n_candidates = candidates.len(),
        view = ?profile.market_view,
        outlook = ?profile.volatility_outlook,
        "candidate universe generated"
    );

    if candidates.is_empty() {
        return Ok(empty_report(
            chain,
            NoViableReason::NoCandidatesGenerated,
            0,
            start,
        ));
    }

    let deadline = Duration::from_millis(config.optimizer_deadline_ms);
    let deadline_hit = AtomicBool::new(false);
    let n_evaluated = AtomicUsize::new(0);
    let n_margin_filtered = AtomicUsize::new(0);
    let n_risk_filtered = AtomicUsize::new(0);

    let max_loss_allowed = profile.capital * profile.risk_appetite.max_loss_fraction();

    // Embarrassingly parallel: each candidate owns its inputs, and collect()
    // restores generation order regardless of completion order.
    let outcomes: Vec<Outcome> = candidates
        .into_par_iter()
        .map(|strategy| {
            if start.elapsed() > deadline {
                deadline_hit.store(true, Ordering::Relaxed);
                return Outcome::DeadlineSkipped;
            }
            n_evaluated.fetch_add(1, Ordering::Relaxed);
            score_candidate(
                strategy,
                &market,
                &dist,
                &bs,
                profile.capital,
                max_loss_allowed,
                config.payoff_grid_points,
            )
        })
        .collect();

    let mut kept: Vec<Scored> = Vec::new();
    for outcome in outcomes {
        match outcome {
            Outcome::Kept(s) => kept.push(*s),
            Outcome::MarginFiltered => {
                n_margin_filtered.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::RiskFiltered => {
                n_risk_filtered.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::DeadlineSkipped => {}
        }
    }

    // Rank: EV desc, then POP, then Sharpe; stable sort preserves candidate
    // generation order as the final tie-break.
    kept.sort_by(|a, b| {
        b.ev.ev
            .total_cmp(&a.ev.ev)
            .then(b.pop.total_cmp(&a.pop))
            .then(b.ev.sharpe.total_cmp(&a.ev.sharpe))
    });

    let evaluated = n_evaluated.load(Ordering::Relaxed);
    let partial = deadline_hit.load(Ordering::Relaxed);

    if kept.is_empty() {
        let margin_n = n_margin_filtered.load(Ordering::Relaxed);
        let risk_n = n_risk_filtered.load(Ordering::Relaxed);
        // Deadline starvation is reported via `partial`, not a reason code;
        // a reason is only stated when a filter actually rejected candidates.
        let reason = if margin_n == 0 && risk_n == 0 {
            None
        } else if margin_n >= risk_n {
            Some(NoViableReason::CapitalFilterExhausted)
        } else {
            Some(NoViableReason::RiskFilterExhausted)
        };
        tracing::info!(?reason, evaluated, "no viable strategy survived filtering");
        let mut report = empty_report(chain, NoViableReason::CapitalFilterExhausted, evaluated, start);
        report.no_viable = reason;
        report.partial = partial;
        return Ok(report);
    }

    let strategies: Vec<RankedStrategy> = kept
        .into_iter()
        .take(profile.top_n)
        .enumerate()
        .map(|(i, s)| {
            let capital_efficiency = if s.margin.total > 0.0 {
                s.ev.ev / s.margin.total
            } else {
                0.0
            };
            RankedStrategy {
                rank: i + 1,
                net_premium: s.strategy.net_premium(),
                margin: s.margin,
                greeks: s.greeks,
                pop: s.pop,
                ev: s.ev.ev,
                std_dev: s.ev.std_dev,
                downside_deviation: s.ev.downside_deviation,
                max_profit: s.ev.max_profit,
                max_loss: s.ev.max_loss,
                ev_per_max_loss: s.ev.ev_per_max_loss,
                sharpe: s.ev.sharpe,
                capital_efficiency,
                breakevens: s.curve.breakevens.clone(),
                payoff_curve: s.curve,
                strategy: s.strategy,
            }
        })
        .collect();

    tracing::info!(
        evaluated,
        returned = strategies.len(),
        partial,
        elapsed_ms = start.elapsed().as_secs_f64() * 1e3,
        "optimizer run complete"
    );

    Ok(OptimizeReport {
        symbol: chain.symbol.clone(),
        spot: chain.spot,
        implied_vol: chain.implied_vol,
        expiry: chain.expiry.clone(),
        strategies,
        n_candidates_evaluated: evaluated,
        elapsed_ms: start.elapsed().as_secs_f64() * 1e3,
        is_mock_data: chain.is_mock,
        partial,
        no_viable: None,
    })
}

fn score_candidate(
    strategy: Strategy,
    market: &MarketState,
    dist: &TerminalDistribution,
    bs: &BlackScholes,
    capital: f64,
    max_loss_allowed: f64,
    grid_points: usize,
) -> Outcome {
    // Hard capital invariant: a strategy the trader cannot margin is never
    // returned, whatever its EV.
    let margin = strategy.margin_estimate();
    if margin.total > capital {
        return Outcome::MarginFiltered;
    }

    let ev = match expected_value(&strategy, dist) {
        Ok(ev) => ev,
        Err(e) => {
            tracing::warn!(name = %strategy.name, error = %e, "candidate dropped");
            return Outcome::RiskFiltered;
        }
    };

    if ev.max_loss.abs() > max_loss_allowed {
        return Outcome::RiskFiltered;
    }

    let (lo, hi) = dist.domain();
    let grid = match PriceGrid::new(lo, hi, grid_points) {
        Ok(g) => g,
        Err(e) => {
            tracing::warn!(name = %strategy.name, error = %e, "candidate dropped");
            return Outcome::RiskFiltered;
        }
    };
    let curve = match PayoffCurve::compute(&strategy, &grid) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(name = %strategy.name, error = %e, "candidate dropped");
            return Outcome::RiskFiltered;
        }
    };

    let pop = dist.probability_of_profit(&strategy, &curve.breakevens);

    let greeks = match strategy.aggregate_greeks(bs, market) {
        Ok(g) => g,
        Err(e) => {
            tracing::warn!(name = %strategy.name, error = %e, "candidate dropped");
            return Outcome::RiskFiltered;
        }
    };

    Outcome::Kept(Box::new(Scored {
        strategy,
        margin,
        greeks,
        ev,
        pop,
        curve,
    }))
}

fn empty_report(
    chain: &ChainSnapshot,
    reason: NoViableReason,
    evaluated: usize,
    start: Instant,
) -> OptimizeReport {
    OptimizeReport {
        symbol: chain.symbol.clone(),
        spot: chain.spot,
        implied_vol: chain.implied_vol,
        expiry: chain.expiry.clone(),
        strategies: Vec::new(),
        n_candidates_evaluated: evaluated,
        elapsed_ms: start.elapsed().as_secs_f64() * 1e3,
        is_mock_data: chain.is_mock,
        partial: false,
        no_viable: Some(reason),
    }
}
