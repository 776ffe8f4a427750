use crate::engine::payoff::Strategy;
use crate::engine::pricing::MIN_VOL_TIME;
use crate::engine::MarketState;
use crate::errors::{EngineError, EngineResult};
use statrs::distribution::{Continuous, ContinuousCDF, LogNormal, Normal};

/// Width of the truncated domain in log-space standard deviations. Outside
/// +/- 6 sigma the lognormal mass is below 1e-9 and is ignored everywhere
/// (payoff grids, EV integration, probability queries).
pub const DOMAIN_SIGMAS: f64 = 6.0;

/// Risk-neutral lognormal distribution of the terminal price.
///
/// mu_log = ln(S0) + (r - sigma^2/2) T, sigma_log = sigma sqrt(T).
#[derive(Debug, Clone)]
pub struct TerminalDistribution {
    pub mu_log: f64,
    pub sigma_log: f64,
    dist: LogNormal,
}

impl TerminalDistribution {
    pub fn from_market(market: &MarketState) -> EngineResult<Self> {
        let sigma_log = market.sigma * market.ttl_years.sqrt();
        if sigma_log < MIN_VOL_TIME {
            return Err(EngineError::invalid(
                "sigma*sqrt(T)",
                sigma_log,
                "above the 1e-8 floor (distribution domain collapsed)",
            ));
        }
        let mu_log =
            market.spot.ln() + (market.rate - 0.5 * market.sigma * market.sigma) * market.ttl_years;
        let dist = LogNormal::new(mu_log, sigma_log)
            .map_err(|e| EngineError::Validation(format!("lognormal parameters: {e}")))?;
        Ok(Self {
            mu_log,
            sigma_log,
            dist,
        })
    }

    /// Density f(S_T).
    #[inline]
    pub fn density(&self, terminal: f64) -> f64 {
        if terminal <= 0.0 {
            return 0.0;
        }
        self.dist.pdf(terminal)
    }

    /// CDF P(S_T <= x).
    #[inline]
    pub fn cdf(&self, terminal: f64) -> f64 {
        if terminal <= 0.0 {
            return 0.0;
        }
        self.dist.cdf(terminal)
    }

    #[inline]
    pub fn median(&self) -> f64 {
        self.mu_log.exp()
    }

    /// Truncated price domain carrying all but ~1e-9 of the mass.
    pub fn domain(&self) -> (f64, f64) {
        (
            (self.mu_log - DOMAIN_SIGMAS * self.sigma_log).exp(),
            (self.mu_log + DOMAIN_SIGMAS * self.sigma_log).exp(),
        )
    }

    /// Probability of profit: CDF mass summed over every profit interval
    /// delimited by the breakevens. Handles any number of crossings -- a
    /// condor's two-sided profit window, a straddle's two tails, or the
    /// single-interval call/put case.
    pub fn probability_of_profit(&self, strategy: &Strategy, breakevens: &[f64]) -> f64 {
        if breakevens.is_empty() {
            // No crossing anywhere: the position is all-profit or all-loss.
            return if strategy.payoff_at(self.median()) > 0.0 {
                1.0
            } else {
                0.0
            };
        }

        let mut pop = 0.0;
        let k = breakevens.len();
        for i in 0..=k {
            let lo = if i == 0 { 0.0 } else { breakevens[i - 1] };
            let hi = if i == k { f64::INFINITY } else { breakevens[i] };

            // A point strictly inside the interval decides its sign.
            let representative = if i == 0 {
                0.5 * hi
            } else if i == k {
                1.5 * lo
            } else {
                0.5 * (lo + hi)
            };

            if strategy.payoff_at(representative) > 0.0 {
                let mass_hi = if hi.is_infinite() { 1.0 } else { self.cdf(hi) };
                pop += mass_hi - self.cdf(lo);
            }
        }
        pop.clamp(0.0, 1.0)
    }
}

/// Probability that the price touches a barrier at any point before expiry,
/// via the reflection-principle closed form for continuous GBM barriers.
/// Secondary metric; not part of the optimizer's scoring key.
pub fn probability_of_touch(market: &MarketState, barrier: f64) -> EngineResult<f64> {
    if !(barrier > 0.0) || !barrier.is_finite() {
        return Err(EngineError::invalid("barrier", barrier, "positive and finite"));
    }
    let sigma_sqrt_t = market.sigma * market.ttl_years.sqrt();
    if sigma_sqrt_t < MIN_VOL_TIME {
        return Err(EngineError::invalid(
            "sigma*sqrt(T)",
            sigma_sqrt_t,
            "above the 1e-8 floor",
        ));
    }

    let normal = Normal::standard();
    let mu = market.rate - 0.5 * market.sigma * market.sigma;
    let h = (barrier / market.spot).ln();
    let t = market.ttl_years;

    let d_plus = (-h.abs() + mu * t * h.signum()) / sigma_sqrt_t;
    let d_minus = (-h.abs() - mu * t * h.signum()) / sigma_sqrt_t;
    let pot = normal.cdf(d_plus) + (2.0 * mu * h.abs() * h.signum() / (market.sigma * market.sigma)).exp() * normal.cdf(d_minus);

    if !pot.is_finite() {
        return Err(EngineError::Numerical(format!(
            "probability of touch diverged for barrier {barrier}"
        )));
    }
    Ok(pot.clamp(0.0, 1.0))
}
