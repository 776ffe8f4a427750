use crate::data::{ChainRow, ChainSnapshot};
use crate::engine::monte_carlo::SplitMix64;
use crate::engine::pricing::{BlackScholes, BsParams};
use crate::engine::OptionKind;
use crate::errors::EngineResult;

/// Synthetic fallback chain. Used when no live ingestion collaborator is
/// configured; every snapshot it produces is tagged is_mock = true.
///
/// Strikes, premiums, and the IV smile are Black-Scholes-consistent so the
/// optimizer sees realistic relative pricing. OI/volume jitter comes from a
/// fixed-seed stream, so the same inputs always produce the same chain.

/// Reference spot and ATM vol for the default underlying.
pub const MOCK_SPOT: f64 = 51_204.0;
pub const MOCK_BASE_IV: f64 = 0.1432;

const STRIKE_STEP: f64 = 100.0;
const STRIKES_EACH_SIDE: i64 = 15;
/// Half bid/ask spread as a fraction of fair value.
const SPREAD_PCT: f64 = 0.005;
/// Seed for the OI/volume noise stream.
const NOISE_SEED: u64 = 0x5EED_CAFE;

pub fn mock_chain(symbol: &str, rate: f64, ttl_years: f64) -> EngineResult<ChainSnapshot> {
    let bs = BlackScholes::new();
    let spot = MOCK_SPOT;
    let atm_strike = (spot / STRIKE_STEP).round() * STRIKE_STEP;

    let mut noise = SplitMix64::new(NOISE_SEED);
    let mut rows = Vec::with_capacity((2 * STRIKES_EACH_SIDE + 1) as usize);

    for i in -STRIKES_EACH_SIDE..=STRIKES_EACH_SIDE {
        let strike = atm_strike + i as f64 * STRIKE_STEP;
        rows.push(chain_row(&bs, spot, strike, rate, ttl_years, &mut noise)?);
    }

    let days = (ttl_years * 365.0).round().max(1.0) as i64;
    let expiry = (chrono::Utc::now() + chrono::Duration::days(days))
        .format("%d-%b-%Y")
        .to_string();

    Ok(ChainSnapshot {
        symbol: symbol.to_string(),
        spot,
        expiry,
        ttl_years,
        implied_vol: MOCK_BASE_IV,
        rows,
        is_mock: true,
    })
}

fn chain_row(
    bs: &BlackScholes,
    spot: f64,
    strike: f64,
    rate: f64,
    ttl_years: f64,
    noise: &mut SplitMix64,
) -> EngineResult<ChainRow> {
    // OTM strikes trade at higher vol; puts carry a steeper skew.
    let moneyness = (strike - spot) / spot;
    let smile = moneyness.abs() * 0.20;
    let call_iv = MOCK_BASE_IV + smile * if moneyness < 0.0 { 0.8 } else { 0.5 };
    let put_iv = MOCK_BASE_IV + smile * if moneyness < 0.0 { 1.2 } else { 0.6 };

    let call_fair = bs.price(
        &BsParams::new(spot, strike, rate, call_iv, ttl_years)?,
        OptionKind::Call,
    );
    let put_fair = bs.price(
        &BsParams::new(spot, strike, rate, put_iv, ttl_years)?,
        OptionKind::Put,
    );

    // Open interest concentrates near the money.
    let oi_shape = (-0.5 * (moneyness / 0.02) * (moneyness / 0.02)).exp();
    let call_oi = ((500_000.0 * oi_shape) as u64).max(1_000) + noise.next_u64() % 10_000;
    let put_oi = ((600_000.0 * oi_shape) as u64).max(1_000) + noise.next_u64() % 10_000;
    let call_volume = 1_000 + noise.next_u64() % 49_000;
    let put_volume = 1_000 + noise.next_u64() % 49_000;

    Ok(ChainRow {
        strike,
        call_bid: call_fair * (1.0 - SPREAD_PCT),
        call_ask: call_fair * (1.0 + SPREAD_PCT),
        call_iv,
        call_oi,
        call_volume,
        put_bid: put_fair * (1.0 - SPREAD_PCT),
        put_ask: put_fair * (1.0 + SPREAD_PCT),
        put_iv,
        put_oi,
        put_volume,
    })
}
