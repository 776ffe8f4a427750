use crate::data::{mock, ChainSnapshot};
use crate::engine::monte_carlo::{self, MonteCarloResult, SimulationSpec};
use crate::engine::payoff::{OptionLeg, Strategy, StrategyKind};
use crate::engine::pricing::{BlackScholes, BsParams, Greeks};
use crate::engine::stress::{self, StressReport, StressScenario};
use crate::engine::{MarketState, OptionKind, Position};
use crate::errors::{EngineError, EngineResult};
use crate::optimizer::{
    self, MarketView, OptimizeReport, RequestProfile, RiskAppetite, TimeHorizon, VolatilityOutlook,
};
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::response::Json;
use portable_atomic::Ordering::Relaxed;
use smallvec::SmallVec;
use std::sync::Arc;

/// Simulation count bounds accepted on the Monte Carlo endpoint.
const MIN_SIM_PATHS: usize = 1_000;
const MAX_SIM_PATHS: usize = 100_000;
const MAX_TOP_N: usize = 10;

/// One leg as submitted by a caller. `sigma` defaults to the request-level
/// IV when omitted.
#[derive(Debug, serde::Deserialize)]
pub struct LegDto {
    pub strike: f64,
    pub kind: OptionKind,
    pub position: Position,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    pub premium: f64,
    pub sigma: Option<f64>,
}

fn default_quantity() -> u32 {
    1
}

/// Materialize caller legs into an owned Strategy; leg validation happens
/// in the Strategy constructor.
fn build_strategy(legs: &[LegDto], default_sigma: f64) -> EngineResult<Strategy> {
    let legs: SmallVec<[OptionLeg; 4]> = legs
        .iter()
        .map(|dto| OptionLeg {
            strike: dto.strike,
            kind: dto.kind,
            position: dto.position,
            quantity: dto.quantity,
            premium: dto.premium,
            sigma: dto.sigma.unwrap_or(default_sigma),
        })
        .collect();
    // Caller-supplied leg lists have no template tag; LongCall stands in as
    // the neutral default since the kind does not affect any computation.
    Strategy::new("Custom Position", StrategyKind::LongCall, legs)
}

/// IV arrives in percent on the wire (14.5 = 14.5%), decimals internally.
fn iv_from_pct(iv_pct: f64) -> EngineResult<f64> {
    if !(iv_pct > 0.0) || !iv_pct.is_finite() || iv_pct > 500.0 {
        return Err(EngineError::invalid("iv", iv_pct, "in (0, 500] percent"));
    }
    Ok(iv_pct / 100.0)
}

fn ttl_from_days(expiry_days: f64) -> EngineResult<f64> {
    if !(expiry_days > 0.0) || !expiry_days.is_finite() {
        return Err(EngineError::invalid("expiry_days", expiry_days, "positive"));
    }
    Ok(expiry_days / 365.0)
}

/// Resolve the chain snapshot. The engine never fetches data itself: with
/// mock mode off and no ingestion collaborator wired in, the request fails.
fn resolve_chain(state: &AppState, symbol: &str, ttl_years: f64) -> EngineResult<ChainSnapshot> {
    if !state.config.use_mock_data {
        return Err(EngineError::MarketData(format!(
            "no live chain source configured for {symbol}; set USE_MOCK_DATA=true for the synthetic fallback"
        )));
    }
    mock::mock_chain(symbol, state.config.risk_free_rate, ttl_years)
}

// ── POST /api/optimize ──

#[derive(Debug, serde::Deserialize)]
pub struct OptimizeRequest {
    pub symbol: Option<String>,
    pub capital: f64,
    pub market_view: MarketView,
    pub volatility_outlook: VolatilityOutlook,
    pub risk_appetite: RiskAppetite,
    pub time_horizon: TimeHorizon,
    pub top_n: Option<usize>,
}

pub async fn post_optimize(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OptimizeRequest>,
) -> EngineResult<Json<OptimizeReport>> {
    state.counters.optimize_requests.fetch_add(1, Relaxed);

    let top_n = req.top_n.unwrap_or(3);
    if top_n == 0 || top_n > MAX_TOP_N {
        state.counters.request_errors.fetch_add(1, Relaxed);
        return Err(EngineError::invalid(
            "top_n",
            top_n as f64,
            "between 1 and 10",
        ));
    }

    let profile = RequestProfile {
        capital: req.capital,
        market_view: req.market_view,
        volatility_outlook: req.volatility_outlook,
        risk_appetite: req.risk_appetite,
        time_horizon: req.time_horizon,
        top_n,
    };

    let symbol = req
        .symbol
        .unwrap_or_else(|| state.config.default_symbol.clone());
    let ttl_years = profile.time_horizon.days() / 365.0;

    let result = async {
        let chain = resolve_chain(&state, &symbol, ttl_years)?;
        let config = state.config.clone();
        tokio::task::spawn_blocking(move || optimizer::optimize(&chain, &profile, &config))
            .await
            .map_err(|e| EngineError::Numerical(format!("optimizer task aborted: {e}")))?
    }
    .await;

    match result {
        Ok(report) => {
            state
                .counters
                .candidates_evaluated
                .fetch_add(report.n_candidates_evaluated as u64, Relaxed);
            Ok(Json(report))
        }
        Err(e) => {
            state.counters.request_errors.fetch_add(1, Relaxed);
            Err(e)
        }
    }
}

// ── POST /api/greeks ──

#[derive(Debug, serde::Deserialize)]
pub struct GreeksRequest {
    pub spot: f64,
    pub strike: f64,
    pub expiry_days: f64,
    /// IV in percent.
    pub iv: f64,
    pub kind: OptionKind,
    pub risk_free_rate: Option<f64>,
}

#[derive(Debug, serde::Serialize)]
pub struct GreeksResponse {
    pub price: f64,
    #[serde(flatten)]
    pub greeks: Greeks,
}

pub async fn post_greeks(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GreeksRequest>,
) -> EngineResult<Json<GreeksResponse>> {
    state.counters.greeks_requests.fetch_add(1, Relaxed);

    let sigma = iv_from_pct(req.iv)?;
    let ttl = ttl_from_days(req.expiry_days)?;
    let rate = req.risk_free_rate.unwrap_or(state.config.risk_free_rate);

    let bs = BlackScholes::new();
    let params = BsParams::new(req.spot, req.strike, rate, sigma, ttl)?;
    Ok(Json(GreeksResponse {
        price: bs.price(&params, req.kind),
        greeks: bs.greeks(&params, req.kind),
    }))
}

// ── POST /api/montecarlo ──

#[derive(Debug, serde::Deserialize)]
pub struct MonteCarloRequest {
    pub symbol: Option<String>,
    pub legs: Vec<LegDto>,
    pub spot: f64,
    /// IV in percent.
    pub iv: f64,
    pub expiry_days: f64,
    pub n_paths: Option<usize>,
    pub seed: Option<u64>,
}

pub async fn post_montecarlo(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MonteCarloRequest>,
) -> EngineResult<Json<MonteCarloResult>> {
    let sigma = iv_from_pct(req.iv)?;
    let ttl = ttl_from_days(req.expiry_days)?;
    let n_paths = req.n_paths.unwrap_or(state.config.mc_default_paths);
    if !(MIN_SIM_PATHS..=MAX_SIM_PATHS).contains(&n_paths) {
        return Err(EngineError::invalid(
            "n_paths",
            n_paths as f64,
            "between 1000 and 100000",
        ));
    }

    let symbol = req
        .symbol
        .unwrap_or_else(|| state.config.default_symbol.clone());
    let market = MarketState::new(symbol, req.spot, state.config.risk_free_rate, sigma, ttl)?;
    let strategy = build_strategy(&req.legs, sigma)?;
    let spec = SimulationSpec {
        n_paths,
        seed: req.seed.unwrap_or(state.config.mc_default_seed),
        antithetic: true,
    };

    let result =
        tokio::task::spawn_blocking(move || monte_carlo::simulate(&strategy, &market, &spec))
            .await
            .map_err(|e| EngineError::Numerical(format!("simulation task aborted: {e}")))?;

    match result {
        Ok(r) => {
            state
                .counters
                .simulations_run
                .fetch_add(r.n_paths as u64, Relaxed);
            Ok(Json(r))
        }
        Err(e) => {
            state.counters.request_errors.fetch_add(1, Relaxed);
            Err(e)
        }
    }
}

// ── POST /api/stress ──

#[derive(Debug, serde::Deserialize)]
pub struct StressRequest {
    pub legs: Vec<LegDto>,
    pub spot: f64,
    /// IV in percent.
    pub iv: f64,
    pub expiry_days: f64,
    #[serde(default)]
    pub spot_shift_pct: f64,
    #[serde(default)]
    pub iv_shift_pts: f64,
    #[serde(default)]
    pub days_forward: f64,
}

pub async fn post_stress(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StressRequest>,
) -> EngineResult<Json<StressReport>> {
    state.counters.stress_requests.fetch_add(1, Relaxed);

    if !(-20.0..=20.0).contains(&req.spot_shift_pct) {
        return Err(EngineError::invalid(
            "spot_shift_pct",
            req.spot_shift_pct,
            "within [-20, 20]",
        ));
    }
    if !(-50.0..=100.0).contains(&req.iv_shift_pts) {
        return Err(EngineError::invalid(
            "iv_shift_pts",
            req.iv_shift_pts,
            "within [-50, 100]",
        ));
    }
    if !(0.0..=30.0).contains(&req.days_forward) {
        return Err(EngineError::invalid(
            "days_forward",
            req.days_forward,
            "within [0, 30]",
        ));
    }

    let sigma = iv_from_pct(req.iv)?;
    let ttl = ttl_from_days(req.expiry_days)?;
    let market = MarketState::new(
        state.config.default_symbol.clone(),
        req.spot,
        state.config.risk_free_rate,
        sigma,
        ttl,
    )?;
    let strategy = build_strategy(&req.legs, sigma)?;
    let scenario = StressScenario {
        spot_shift_pct: req.spot_shift_pct,
        iv_shift_pts: req.iv_shift_pts,
        days_forward: req.days_forward,
    };

    let bs = BlackScholes::new();
    let report = stress::stress_test(&strategy, &market, &scenario, &bs)?;
    Ok(Json(report))
}

// ── GET /api/chain ──

#[derive(Debug, serde::Deserialize)]
pub struct ChainQuery {
    pub symbol: Option<String>,
    pub time_horizon: Option<TimeHorizon>,
}

pub async fn get_chain(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ChainQuery>,
) -> EngineResult<Json<ChainSnapshot>> {
    let symbol = params
        .symbol
        .unwrap_or_else(|| state.config.default_symbol.clone());
    let ttl_years = params.time_horizon.unwrap_or(TimeHorizon::Weekly).days() / 365.0;
    let chain = resolve_chain(&state, &symbol, ttl_years)?;
    Ok(Json(chain))
}

// ── GET /api/counters ──

pub async fn get_counters(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "optimize_requests": state.counters.optimize_requests.load(Relaxed),
        "candidates_evaluated": state.counters.candidates_evaluated.load(Relaxed),
        "simulations_run": state.counters.simulations_run.load(Relaxed),
        "greeks_requests": state.counters.greeks_requests.load(Relaxed),
        "stress_requests": state.counters.stress_requests.load(Relaxed),
        "request_errors": state.counters.request_errors.load(Relaxed),
    }))
}
