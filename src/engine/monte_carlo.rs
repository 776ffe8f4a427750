use crate::engine::payoff::Strategy;
use crate::engine::MarketState;
use crate::errors::{EngineError, EngineResult};
use rayon::prelude::*;

/// Histogram resolution for the P&L distribution.
const HISTOGRAM_BINS: usize = 50;

/// Normal draws generated per chunk. Each chunk owns an independent RNG
/// stream keyed by (seed, chunk index), so the sample -- and therefore every
/// statistic -- is bit-identical for any thread count or batching.
const CHUNK_NORMALS: usize = 4096;

/// Simulation request. The seed makes the whole run reproducible.
#[derive(Debug, Clone, Copy)]
pub struct SimulationSpec {
    pub n_paths: usize,
    pub seed: u64,
    /// Pair every Z with -Z (variance reduction). On for production use;
    /// plain sampling exists for the variance-comparison property test.
    pub antithetic: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HistogramBin {
    pub bin_low: f64,
    pub bin_high: f64,
    pub count: u64,
    pub frequency: f64,
    /// Sign of the bin midpoint.
    pub is_profit: bool,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct TerminalPercentiles {
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

/// Full simulation summary. Produced atomically at completion; a failed run
/// returns an error, never a partially-filled result.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MonteCarloResult {
    pub n_paths: usize,
    pub ev: f64,
    pub std_dev: f64,
    pub win_rate: f64,
    pub max_profit: f64,
    pub max_loss: f64,
    /// 5th percentile of the P&L sample (a loss threshold).
    pub var_95: f64,
    /// Mean of outcomes at or below VaR95.
    pub cvar_95: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub downside_deviation: f64,
    pub terminal_prices: TerminalPercentiles,
    pub histogram: Vec<HistogramBin>,
}

// ── Deterministic RNG (xoshiro256++ seeded through SplitMix64) ──
// A library normal sampler would tie reproducibility to its implementation;
// these generators are fixed here and never change underneath a stored seed.

pub(crate) struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    #[inline]
    pub(crate) fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    #[inline]
    pub(crate) fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

struct Xoshiro256PlusPlus {
    state: [u64; 4],
}

impl Xoshiro256PlusPlus {
    #[inline]
    fn seed_from_u64(seed: u64) -> Self {
        let mut sm = SplitMix64::new(seed);
        let mut state = [0_u64; 4];
        for item in &mut state {
            *item = sm.next_u64();
        }
        if state.iter().all(|&x| x == 0) {
            state[0] = 1;
        }
        Self { state }
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        let result = (self.state[0].wrapping_add(self.state[3]))
            .rotate_left(23)
            .wrapping_add(self.state[0]);

        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);

        result
    }

    #[inline]
    fn next_f64(&mut self) -> f64 {
        let x = self.next_u64() >> 11;
        x as f64 * (1.0 / ((1_u64 << 53) as f64))
    }
}

/// Stream seed for one chunk: mixes the user seed with the chunk index so
/// chunks are independent but fully determined.
#[inline]
fn chunk_seed(seed: u64, chunk: u64) -> u64 {
    SplitMix64::new(seed ^ chunk.wrapping_mul(0xA076_1D64_78BD_642F)).next_u64()
}

/// Standard normal draws via the Box-Muller transform:
///   Z1 = sqrt(-2 ln U1) cos(2 pi U2), Z2 = sqrt(-2 ln U1) sin(2 pi U2)
/// Exact, and independent of any library sampling internals.
fn box_muller_fill(rng: &mut Xoshiro256PlusPlus, out: &mut Vec<f64>, count: usize) {
    let pairs = count.div_ceil(2);
    for _ in 0..pairs {
        let u1 = rng.next_f64().clamp(f64::EPSILON, 1.0 - f64::EPSILON);
        let u2 = rng.next_f64();
        let mag = (-2.0 * u1.ln()).sqrt();
        let (sin, cos) = (2.0 * std::f64::consts::PI * u2).sin_cos();
        out.push(mag * cos);
        if out.len() < count {
            out.push(mag * sin);
        }
    }
    out.truncate(count);
}

/// Simulate one chunk of terminal prices and payoffs.
/// GBM terminal: S_T = S0 exp((r - sigma^2/2) T + sigma sqrt(T) Z).
fn simulate_chunk(
    strategy: &Strategy,
    drift: f64,
    diffusion: f64,
    spot: f64,
    spec: &SimulationSpec,
    chunk: usize,
    z_count: usize,
) -> Vec<(f64, f64)> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(chunk_seed(spec.seed, chunk as u64));
    let mut normals = Vec::with_capacity(z_count);
    box_muller_fill(&mut rng, &mut normals, z_count);

    let outcomes_per_z = if spec.antithetic { 2 } else { 1 };
    let mut out = Vec::with_capacity(z_count * outcomes_per_z);
    for &z in &normals {
        let st = spot * (drift + diffusion * z).exp();
        out.push((st, strategy.payoff_at(st)));
        if spec.antithetic {
            let st_anti = spot * (drift - diffusion * z).exp();
            out.push((st_anti, strategy.payoff_at(st_anti)));
        }
    }
    out
}

/// Run the full simulation and aggregate summary statistics.
///
/// Chunks run in parallel but are combined in chunk order, so the result is
/// identical regardless of thread count. Any non-finite sample aborts the
/// run with a numerical-divergence error.
pub fn simulate(
    strategy: &Strategy,
    market: &MarketState,
    spec: &SimulationSpec,
) -> EngineResult<MonteCarloResult> {
    if spec.n_paths < 2 {
        return Err(EngineError::invalid(
            "n_paths",
            spec.n_paths as f64,
            "at least 2",
        ));
    }

    // Antithetic pairing needs an even path count; round up rather than
    // silently dropping the last draw.
    let n_paths = if spec.antithetic {
        spec.n_paths + spec.n_paths % 2
    } else {
        spec.n_paths
    };
    let z_count = if spec.antithetic { n_paths / 2 } else { n_paths };

    let drift = (market.rate - 0.5 * market.sigma * market.sigma) * market.ttl_years;
    let diffusion = market.sigma * market.ttl_years.sqrt();
    let n_chunks = z_count.div_ceil(CHUNK_NORMALS);

    let chunks: Vec<Vec<(f64, f64)>> = (0..n_chunks)
        .into_par_iter()
        .map(|chunk| {
            let start = chunk * CHUNK_NORMALS;
            let count = CHUNK_NORMALS.min(z_count - start);
            simulate_chunk(strategy, drift, diffusion, market.spot, spec, chunk, count)
        })
        .collect();

    // Deterministic, order-independent combination: flatten in chunk order.
    let mut terminals = Vec::with_capacity(n_paths);
    let mut payoffs = Vec::with_capacity(n_paths);
    for chunk in chunks {
        for (st, pnl) in chunk {
            if !st.is_finite() || !pnl.is_finite() {
                return Err(EngineError::Numerical(format!(
                    "simulated outcome non-finite (S_T={st}, pnl={pnl})"
                )));
            }
            terminals.push(st);
            payoffs.push(pnl);
        }
    }
    debug_assert_eq!(payoffs.len(), n_paths);

    let nf = n_paths as f64;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut wins = 0_usize;
    for &p in &payoffs {
        sum += p;
        sum_sq += p * p;
        if p > 0.0 {
            wins += 1;
        }
    }
    let ev = sum / nf;
    let variance = (sum_sq / nf - ev * ev).max(0.0);
    let std_dev = variance.sqrt();
    let win_rate = wins as f64 / nf;

    // Downside deviation from below-zero outcomes only.
    let mut neg_sum = 0.0;
    let mut neg_sq = 0.0;
    let mut neg_n = 0_usize;
    for &p in &payoffs {
        if p < 0.0 {
            neg_sum += p;
            neg_sq += p * p;
            neg_n += 1;
        }
    }
    let downside_deviation = if neg_n > 0 {
        let neg_mean = neg_sum / neg_n as f64;
        ((neg_sq / neg_n as f64) - neg_mean * neg_mean).max(0.0).sqrt()
    } else {
        0.0
    };

    let mut sorted_pnl = payoffs.clone();
    sorted_pnl.sort_by(f64::total_cmp);
    let mut sorted_st = terminals;
    sorted_st.sort_by(f64::total_cmp);

    let var_95 = percentile(&sorted_pnl, 5.0);
    let tail: Vec<f64> = sorted_pnl.iter().copied().take_while(|&p| p <= var_95).collect();
    let cvar_95 = if tail.is_empty() {
        var_95
    } else {
        tail.iter().sum::<f64>() / tail.len() as f64
    };

    let sharpe = if std_dev > 0.0 { ev / std_dev } else { 0.0 };
    let sortino = if downside_deviation > 0.0 {
        ev / downside_deviation
    } else {
        0.0
    };

    Ok(MonteCarloResult {
        n_paths,
        ev,
        std_dev,
        win_rate,
        max_profit: sorted_pnl[n_paths - 1],
        max_loss: sorted_pnl[0],
        var_95,
        cvar_95,
        sharpe,
        sortino,
        downside_deviation,
        terminal_prices: TerminalPercentiles {
            p5: percentile(&sorted_st, 5.0),
            p25: percentile(&sorted_st, 25.0),
            p50: percentile(&sorted_st, 50.0),
            p75: percentile(&sorted_st, 75.0),
            p95: percentile(&sorted_st, 95.0),
        },
        histogram: build_histogram(&payoffs),
    })
}

/// Linear-interpolation percentile on a sorted slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = q / 100.0 * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let frac = rank - lo as f64;
    if lo + 1 >= n {
        sorted[n - 1]
    } else {
        sorted[lo] * (1.0 - frac) + sorted[lo + 1] * frac
    }
}

/// Fixed-bin histogram partitioning the sampled P&L range exhaustively:
/// bin counts sum exactly to the sample count.
fn build_histogram(payoffs: &[f64]) -> Vec<HistogramBin> {
    let n = payoffs.len();
    let min = payoffs.iter().copied().fold(f64::INFINITY, f64::min);
    let max = payoffs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;

    let mut counts = [0_u64; HISTOGRAM_BINS];
    for &p in payoffs {
        let idx = if span > 0.0 {
            (((p - min) / span) * HISTOGRAM_BINS as f64) as usize
        } else {
            0
        };
        counts[idx.min(HISTOGRAM_BINS - 1)] += 1;
    }

    let width = span / HISTOGRAM_BINS as f64;
    counts
        .iter()
        .enumerate()
        .map(|(i, &count)| {
            let bin_low = min + width * i as f64;
            let bin_high = if i == HISTOGRAM_BINS - 1 {
                max
            } else {
                min + width * (i + 1) as f64
            };
            HistogramBin {
                bin_low,
                bin_high,
                count,
                frequency: count as f64 / n as f64,
                is_profit: 0.5 * (bin_low + bin_high) >= 0.0,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ev::expected_value;
    use crate::engine::payoff::{OptionLeg, StrategyKind};
    use crate::engine::probability::TerminalDistribution;
    use crate::engine::{OptionKind, Position};
    use smallvec::smallvec;

    fn market() -> MarketState {
        MarketState::new("TEST", 100.0, 0.065, 0.25, 30.0 / 365.0).unwrap()
    }

    fn long_call() -> Strategy {
        Strategy::new(
            "Long Call",
            StrategyKind::LongCall,
            smallvec![OptionLeg {
                strike: 102.0,
                kind: OptionKind::Call,
                position: Position::Long,
                quantity: 1,
                premium: 2.2,
                sigma: 0.25,
            }],
        )
        .unwrap()
    }

    #[test]
    fn test_fixed_seed_is_bit_reproducible() {
        let m = market();
        let strat = long_call();
        let spec = SimulationSpec {
            n_paths: 10_000,
            seed: 1234,
            antithetic: true,
        };
        let a = simulate(&strat, &m, &spec).unwrap();
        let b = simulate(&strat, &m, &spec).unwrap();
        assert_eq!(a.ev.to_bits(), b.ev.to_bits());
        assert_eq!(a.std_dev.to_bits(), b.std_dev.to_bits());
        assert_eq!(a.var_95.to_bits(), b.var_95.to_bits());
        let counts_a: Vec<u64> = a.histogram.iter().map(|h| h.count).collect();
        let counts_b: Vec<u64> = b.histogram.iter().map(|h| h.count).collect();
        assert_eq!(counts_a, counts_b);
    }

    #[test]
    fn test_histogram_is_exhaustive() {
        let m = market();
        let strat = long_call();
        let spec = SimulationSpec {
            n_paths: 5_000,
            seed: 7,
            antithetic: true,
        };
        let result = simulate(&strat, &m, &spec).unwrap();
        let total: u64 = result.histogram.iter().map(|h| h.count).sum();
        assert_eq!(total as usize, result.n_paths);
        for w in result.histogram.windows(2) {
            assert!((w[0].bin_high - w[1].bin_low).abs() < 1e-9, "bins adjoin");
        }
    }

    #[test]
    fn test_mean_converges_to_analytic_ev() {
        let m = market();
        let strat = long_call();
        let dist = TerminalDistribution::from_market(&m).unwrap();
        let analytic = expected_value(&strat, &dist).unwrap().ev;

        let mean_abs_err = |n: usize| -> f64 {
            let mut total = 0.0;
            for seed in 0..10_u64 {
                let spec = SimulationSpec {
                    n_paths: n,
                    seed: 1000 + seed,
                    antithetic: true,
                };
                let r = simulate(&strat, &m, &spec).unwrap();
                total += (r.ev - analytic).abs();
            }
            total / 10.0
        };

        let err_small = mean_abs_err(1_000);
        let err_large = mean_abs_err(10_000);
        assert!(
            err_large < err_small,
            "avg error should shrink with N: {err_large} (10k) vs {err_small} (1k)"
        );
    }

    #[test]
    fn test_antithetic_reduces_estimator_variance() {
        let m = market();
        let strat = long_call();

        let estimator_variance = |antithetic: bool| -> f64 {
            let means: Vec<f64> = (0..16_u64)
                .map(|seed| {
                    let spec = SimulationSpec {
                        n_paths: 2_000,
                        seed: 500 + seed,
                        antithetic,
                    };
                    simulate(&strat, &m, &spec).unwrap().ev
                })
                .collect();
            let mean = means.iter().sum::<f64>() / means.len() as f64;
            means.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / means.len() as f64
        };

        let var_anti = estimator_variance(true);
        let var_plain = estimator_variance(false);
        assert!(
            var_anti < var_plain,
            "antithetic variance {var_anti} should beat plain {var_plain}"
        );
    }

    #[test]
    fn test_var_and_cvar_ordering() {
        let m = market();
        let strat = long_call();
        let spec = SimulationSpec {
            n_paths: 20_000,
            seed: 99,
            antithetic: true,
        };
        let r = simulate(&strat, &m, &spec).unwrap();
        assert!(r.cvar_95 <= r.var_95, "CVaR is at least as severe as VaR");
        assert!(r.max_loss <= r.cvar_95);
        assert!(r.max_loss >= -2.2 - 1e-9, "loss bounded by premium");
        assert!((0.0..=1.0).contains(&r.win_rate));
        assert!(r.terminal_prices.p5 < r.terminal_prices.p50);
        assert!(r.terminal_prices.p50 < r.terminal_prices.p95);
    }

    #[test]
    fn test_rejects_degenerate_path_count() {
        let m = market();
        let strat = long_call();
        let spec = SimulationSpec {
            n_paths: 1,
            seed: 1,
            antithetic: true,
        };
        assert!(simulate(&strat, &m, &spec).is_err());
    }
}
