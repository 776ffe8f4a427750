use crate::engine::{MarketState, OptionKind};
use crate::errors::{EngineError, EngineResult};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

/// Floor for sigma * sqrt(T). Below this the d1/d2 division is meaningless
/// and the inputs are rejected instead of producing NaN.
pub const MIN_VOL_TIME: f64 = 1e-8;

/// Precomputed Black-Scholes terms for one (spot, strike) pair.
/// Stack-allocated, Copy; validated once, then reused by price and Greeks.
#[derive(Debug, Clone, Copy)]
pub struct BsParams {
    pub spot: f64,
    pub strike: f64,
    pub rate: f64,
    pub sigma: f64,
    pub ttl_years: f64,
    pub sqrt_t: f64,
    pub sigma_sqrt_t: f64,
    pub d1: f64,
    pub d2: f64,
    /// e^(-rT)
    pub discount: f64,
}

impl BsParams {
    pub fn new(spot: f64, strike: f64, rate: f64, sigma: f64, ttl_years: f64) -> EngineResult<Self> {
        if !(spot > 0.0) || !spot.is_finite() {
            return Err(EngineError::invalid("spot", spot, "positive and finite"));
        }
        if !(strike > 0.0) || !strike.is_finite() {
            return Err(EngineError::invalid("strike", strike, "positive and finite"));
        }
        if !(sigma > 0.0) || !sigma.is_finite() {
            return Err(EngineError::invalid("sigma", sigma, "positive and finite"));
        }
        if !(ttl_years > 0.0) || !ttl_years.is_finite() {
            return Err(EngineError::invalid("ttl_years", ttl_years, "positive and finite"));
        }
        let sqrt_t = ttl_years.sqrt();
        let sigma_sqrt_t = sigma * sqrt_t;
        if sigma_sqrt_t < MIN_VOL_TIME {
            return Err(EngineError::invalid(
                "sigma*sqrt(T)",
                sigma_sqrt_t,
                "above the 1e-8 floor",
            ));
        }

        // d1 = [ln(S/K) + (r + sigma^2/2) T] / (sigma sqrt(T)), d2 = d1 - sigma sqrt(T)
        let d1 = ((spot / strike).ln() + (rate + 0.5 * sigma * sigma) * ttl_years) / sigma_sqrt_t;
        let d2 = d1 - sigma_sqrt_t;

        Ok(Self {
            spot,
            strike,
            rate,
            sigma,
            ttl_years,
            sqrt_t,
            sigma_sqrt_t,
            d1,
            d2,
            discount: (-rate * ttl_years).exp(),
        })
    }

    /// Parameters for a strike priced off a market snapshot, with a per-leg vol.
    pub fn from_market(market: &MarketState, strike: f64, sigma: f64) -> EngineResult<Self> {
        Self::new(market.spot, strike, market.rate, sigma, market.ttl_years)
    }
}

/// First-order sensitivities of one option or a whole strategy.
/// Aggregate Greeks are always the signed sum across legs.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    /// Per 1% IV move.
    pub vega: f64,
    /// Per calendar day.
    pub theta: f64,
    /// Per 1% rate move.
    pub rho: f64,
}

impl Greeks {
    /// Scale by a signed quantity (positive long, negative short).
    #[inline]
    pub fn scale(&self, quantity: f64) -> Self {
        Self {
            delta: self.delta * quantity,
            gamma: self.gamma * quantity,
            vega: self.vega * quantity,
            theta: self.theta * quantity,
            rho: self.rho * quantity,
        }
    }

    #[inline]
    pub fn add(&self, other: &Self) -> Self {
        Self {
            delta: self.delta + other.delta,
            gamma: self.gamma + other.gamma,
            vega: self.vega + other.vega,
            theta: self.theta + other.theta,
            rho: self.rho + other.rho,
        }
    }
}

/// Closed-form Black-Scholes valuation and Greeks.
///
/// Price = S N(d1) - K e^(-rT) N(d2) for calls, the standard put transform
/// otherwise. Put-call parity C - P = S - K e^(-rT) is a correctness
/// invariant of this module, checked in tests for a grid of inputs.
pub struct BlackScholes {
    /// Standard normal distribution (created once, reused)
    normal: Normal,
}

impl BlackScholes {
    pub fn new() -> Self {
        Self {
            normal: Normal::standard(),
        }
    }

    /// Fair value of one option, per unit of underlying.
    #[inline]
    pub fn price(&self, p: &BsParams, kind: OptionKind) -> f64 {
        match kind {
            OptionKind::Call => {
                p.spot * self.normal.cdf(p.d1) - p.strike * p.discount * self.normal.cdf(p.d2)
            }
            OptionKind::Put => {
                p.strike * p.discount * self.normal.cdf(-p.d2) - p.spot * self.normal.cdf(-p.d1)
            }
        }
    }

    /// All five first-order Greeks from the closed forms.
    pub fn greeks(&self, p: &BsParams, kind: OptionKind) -> Greeks {
        let phi_d1 = self.normal.pdf(p.d1);
        let gamma = phi_d1 / (p.spot * p.sigma_sqrt_t);
        let vega = p.spot * phi_d1 * p.sqrt_t / 100.0;

        let (delta, theta, rho) = match kind {
            OptionKind::Call => {
                let n_d2 = self.normal.cdf(p.d2);
                let delta = self.normal.cdf(p.d1);
                let theta = (-(p.spot * phi_d1 * p.sigma) / (2.0 * p.sqrt_t)
                    - p.rate * p.strike * p.discount * n_d2)
                    / 365.0;
                let rho = p.strike * p.ttl_years * p.discount * n_d2 / 100.0;
                (delta, theta, rho)
            }
            OptionKind::Put => {
                let n_neg_d2 = self.normal.cdf(-p.d2);
                let delta = self.normal.cdf(p.d1) - 1.0;
                let theta = (-(p.spot * phi_d1 * p.sigma) / (2.0 * p.sqrt_t)
                    + p.rate * p.strike * p.discount * n_neg_d2)
                    / 365.0;
                let rho = -p.strike * p.ttl_years * p.discount * n_neg_d2 / 100.0;
                (delta, theta, rho)
            }
        };

        Greeks {
            delta,
            gamma,
            vega,
            theta,
            rho,
        }
    }

    #[inline]
    pub fn delta(&self, p: &BsParams, kind: OptionKind) -> f64 {
        match kind {
            OptionKind::Call => self.normal.cdf(p.d1),
            OptionKind::Put => self.normal.cdf(p.d1) - 1.0,
        }
    }

    /// Implied volatility via Newton-Raphson on vega, seeded with the
    /// Brenner-Subrahmanyam approximation. Converges in a handful of
    /// iterations for liquid strikes.
    pub fn implied_vol(
        &self,
        market_price: f64,
        spot: f64,
        strike: f64,
        rate: f64,
        ttl_years: f64,
        kind: OptionKind,
    ) -> EngineResult<f64> {
        const MAX_ITER: usize = 200;
        const TOL: f64 = 1e-6;

        if !(market_price > 0.0) || !market_price.is_finite() {
            return Err(EngineError::invalid(
                "market_price",
                market_price,
                "positive and finite",
            ));
        }
        if !(ttl_years > 0.0) {
            return Err(EngineError::invalid("ttl_years", ttl_years, "positive"));
        }

        let mut sigma = (2.0 * std::f64::consts::PI / ttl_years).sqrt() * market_price / spot;
        sigma = sigma.clamp(0.001, 5.0);

        for _ in 0..MAX_ITER {
            let p = BsParams::new(spot, strike, rate, sigma, ttl_years)?;
            let price = self.price(&p, kind);
            // Raw vega (per unit vol), not the per-1% reporting convention
            let vega = spot * self.normal.pdf(p.d1) * p.sqrt_t;
            if vega.abs() < 1e-10 {
                break;
            }
            let diff = price - market_price;
            if diff.abs() < TOL {
                return Ok(sigma);
            }
            sigma = (sigma - diff / vega).clamp(0.001, 5.0);
        }

        if sigma.is_finite() && sigma > 0.0 {
            Ok(sigma)
        } else {
            Err(EngineError::Numerical(format!(
                "implied vol did not converge for strike {strike}"
            )))
        }
    }
}

impl Default for BlackScholes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(spot: f64, strike: f64, sigma: f64, t: f64) -> BsParams {
        BsParams::new(spot, strike, 0.065, sigma, t).expect("valid params")
    }

    #[test]
    fn test_put_call_parity() {
        let bs = BlackScholes::new();
        for &strike in &[80.0, 95.0, 100.0, 105.0, 120.0] {
            for &t in &[7.0 / 365.0, 30.0 / 365.0, 1.0] {
                for &sigma in &[0.1, 0.25, 0.6] {
                    let p = params(100.0, strike, sigma, t);
                    let call = bs.price(&p, OptionKind::Call);
                    let put = bs.price(&p, OptionKind::Put);
                    let forward = 100.0 - strike * p.discount;
                    assert!(
                        (call - put - forward).abs() < 1e-9,
                        "parity violated at K={strike} T={t} sigma={sigma}: {}",
                        call - put - forward
                    );
                }
            }
        }
    }

    #[test]
    fn test_delta_matches_finite_difference() {
        let bs = BlackScholes::new();
        let bump = 0.01;
        for &kind in &[OptionKind::Call, OptionKind::Put] {
            for &strike in &[90.0, 100.0, 110.0] {
                let base = params(100.0, strike, 0.2, 30.0 / 365.0);
                let up = params(100.0 + bump, strike, 0.2, 30.0 / 365.0);
                let down = params(100.0 - bump, strike, 0.2, 30.0 / 365.0);
                let fd = (bs.price(&up, kind) - bs.price(&down, kind)) / (2.0 * bump);
                let closed = bs.delta(&base, kind);
                assert!(
                    (fd - closed).abs() < 1e-5,
                    "delta mismatch K={strike}: closed={closed} fd={fd}"
                );
            }
        }
    }

    #[test]
    fn test_rejects_degenerate_inputs() {
        assert!(BsParams::new(100.0, 100.0, 0.065, 0.2, 0.0).is_err());
        assert!(BsParams::new(100.0, 100.0, 0.065, 0.0, 0.5).is_err());
        assert!(BsParams::new(100.0, 100.0, 0.065, -0.2, 0.5).is_err());
        assert!(BsParams::new(-100.0, 100.0, 0.065, 0.2, 0.5).is_err());
        assert!(BsParams::new(100.0, 0.0, 0.065, 0.2, 0.5).is_err());
    }

    #[test]
    fn test_call_delta_range() {
        let bs = BlackScholes::new();
        let deep_itm = params(100.0, 50.0, 0.2, 0.25);
        let deep_otm = params(100.0, 200.0, 0.2, 0.25);
        assert!(bs.delta(&deep_itm, OptionKind::Call) > 0.95);
        assert!(bs.delta(&deep_otm, OptionKind::Call) < 0.05);
        let atm = params(100.0, 100.0, 0.2, 0.25);
        let d = bs.delta(&atm, OptionKind::Call);
        assert!((0.4..0.7).contains(&d), "ATM call delta {d} out of range");
    }

    #[test]
    fn test_gamma_positive_and_symmetric_in_kind() {
        let bs = BlackScholes::new();
        let p = params(100.0, 105.0, 0.3, 0.1);
        let gc = bs.greeks(&p, OptionKind::Call).gamma;
        let gp = bs.greeks(&p, OptionKind::Put).gamma;
        assert!(gc > 0.0);
        assert!((gc - gp).abs() < 1e-12, "gamma is kind-independent");
    }

    #[test]
    fn test_implied_vol_round_trip() {
        let bs = BlackScholes::new();
        let sigma_true = 0.234;
        let p = params(100.0, 104.0, sigma_true, 30.0 / 365.0);
        let price = bs.price(&p, OptionKind::Call);
        let recovered = bs
            .implied_vol(price, 100.0, 104.0, 0.065, 30.0 / 365.0, OptionKind::Call)
            .expect("iv converges");
        assert!(
            (recovered - sigma_true).abs() < 1e-4,
            "recovered {recovered} vs {sigma_true}"
        );
    }
}
