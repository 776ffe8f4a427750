use crate::data::{ChainRow, ChainSnapshot};
use crate::engine::payoff::{OptionLeg, Strategy, StrategyKind};
use crate::engine::pricing::{BlackScholes, BsParams};
use crate::engine::{MarketState, OptionKind, Position};
use crate::optimizer::{MarketView, RiskAppetite, VolatilityOutlook};
use smallvec::smallvec;

/// Directional stance of a template. Must match the trader's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

/// Net vega sign of a template. Must not fight the volatility outlook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VegaBias {
    Long,
    Short,
    Flat,
}

const ALL_KINDS: [StrategyKind; 12] = [
    StrategyKind::LongCall,
    StrategyKind::BullCallSpread,
    StrategyKind::ShortPut,
    StrategyKind::LongPut,
    StrategyKind::BearPutSpread,
    StrategyKind::BearCallSpread,
    StrategyKind::LongStraddle,
    StrategyKind::LongStrangle,
    StrategyKind::ShortStraddle,
    StrategyKind::ShortStrangle,
    StrategyKind::IronCondor,
    StrategyKind::LongButterfly,
];

fn direction(kind: StrategyKind) -> Direction {
    match kind {
        StrategyKind::LongCall | StrategyKind::BullCallSpread | StrategyKind::ShortPut => {
            Direction::Bullish
        }
        StrategyKind::LongPut | StrategyKind::BearPutSpread | StrategyKind::BearCallSpread => {
            Direction::Bearish
        }
        _ => Direction::Neutral,
    }
}

fn vega_bias(kind: StrategyKind) -> VegaBias {
    match kind {
        StrategyKind::LongCall
        | StrategyKind::LongPut
        | StrategyKind::LongStraddle
        | StrategyKind::LongStrangle => VegaBias::Long,
        StrategyKind::BullCallSpread | StrategyKind::BearPutSpread => VegaBias::Flat,
        StrategyKind::ShortPut
        | StrategyKind::BearCallSpread
        | StrategyKind::ShortStraddle
        | StrategyKind::ShortStrangle
        | StrategyKind::IronCondor
        | StrategyKind::LongButterfly => VegaBias::Short,
    }
}

fn view_direction(view: MarketView) -> Direction {
    match view {
        MarketView::Bullish => Direction::Bullish,
        MarketView::Bearish => Direction::Bearish,
        MarketView::Neutral => Direction::Neutral,
    }
}

/// A template survives only when it agrees with both halves of the outlook:
/// rising vol excludes short-vega shapes, falling or range-bound vol
/// excludes long-vega shapes.
fn template_allowed(kind: StrategyKind, view: MarketView, outlook: VolatilityOutlook) -> bool {
    if direction(kind) != view_direction(view) {
        return false;
    }
    match outlook {
        VolatilityOutlook::Rising => vega_bias(kind) != VegaBias::Short,
        VolatilityOutlook::Falling | VolatilityOutlook::Stable => {
            vega_bias(kind) != VegaBias::Long
        }
    }
}

/// Build the finite candidate universe for one request. Generation order is
/// fixed (template table order, then variant order) -- it is the final
/// ranking tie-break, so it must be deterministic.
pub fn generate_candidates(
    chain: &ChainSnapshot,
    market: &MarketState,
    view: MarketView,
    outlook: VolatilityOutlook,
    appetite: RiskAppetite,
    bs: &BlackScholes,
) -> Vec<Strategy> {
    let ctx = Ctx {
        chain,
        market,
        bs,
        atm: chain.atm_index(),
        wing_delta: appetite.wing_delta(),
    };

    let mut out = Vec::new();
    for kind in ALL_KINDS {
        if !template_allowed(kind, view, outlook) {
            continue;
        }
        match kind {
            StrategyKind::LongCall => {
                push(&mut out, ctx.long_single(OptionKind::Call, 0));
                push(&mut out, ctx.long_single(OptionKind::Call, 1));
            }
            StrategyKind::LongPut => {
                push(&mut out, ctx.long_single(OptionKind::Put, 0));
                push(&mut out, ctx.long_single(OptionKind::Put, 1));
            }
            StrategyKind::ShortPut => {
                push(&mut out, ctx.short_put(1.0));
                push(&mut out, ctx.short_put(0.5));
            }
            StrategyKind::BullCallSpread => {
                for width in 1..=3 {
                    push(&mut out, ctx.vertical_call_debit(width));
                }
            }
            StrategyKind::BearPutSpread => {
                for width in 1..=3 {
                    push(&mut out, ctx.vertical_put_debit(width));
                }
            }
            StrategyKind::BearCallSpread => {
                for width in 1..=2 {
                    push(&mut out, ctx.vertical_call_credit(width));
                }
            }
            StrategyKind::LongStraddle => push(&mut out, ctx.straddle(Position::Long)),
            StrategyKind::ShortStraddle => push(&mut out, ctx.straddle(Position::Short)),
            StrategyKind::LongStrangle => push(&mut out, ctx.strangle(Position::Long)),
            StrategyKind::ShortStrangle => push(&mut out, ctx.strangle(Position::Short)),
            StrategyKind::IronCondor => {
                for wing in 2..=3 {
                    push(&mut out, ctx.iron_condor(wing));
                }
            }
            StrategyKind::LongButterfly => {
                for wing in 1..=2 {
                    push(&mut out, ctx.butterfly(wing));
                }
            }
        }
    }
    out
}

#[inline]
fn push(out: &mut Vec<Strategy>, candidate: Option<Strategy>) {
    if let Some(s) = candidate {
        out.push(s);
    }
}

struct Ctx<'a> {
    chain: &'a ChainSnapshot,
    market: &'a MarketState,
    bs: &'a BlackScholes,
    atm: usize,
    wing_delta: f64,
}

impl Ctx<'_> {
    fn rows(&self) -> &[ChainRow] {
        &self.chain.rows
    }

    /// Row whose option delta (with its own chain IV) is nearest the target.
    /// This is how the risk appetite steers strike selection.
    fn idx_near_delta(&self, kind: OptionKind, target: f64) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, row) in self.rows().iter().enumerate() {
            let sigma = match kind {
                OptionKind::Call => row.call_iv,
                OptionKind::Put => row.put_iv,
            };
            let Ok(params) = BsParams::new(
                self.market.spot,
                row.strike,
                self.market.rate,
                sigma,
                self.market.ttl_years,
            ) else {
                continue;
            };
            let dist = (self.bs.delta(&params, kind).abs() - target).abs();
            if best.map(|(_, d)| dist < d).unwrap_or(true) {
                best = Some((i, dist));
            }
        }
        best.map(|(i, _)| i)
    }

    /// Leg priced off the chain: buy at ask, sell at bid, fall back to the
    /// Black-Scholes fair value when the quote is missing.
    fn leg(&self, idx: usize, kind: OptionKind, position: Position, quantity: u32) -> Option<OptionLeg> {
        let row = self.rows().get(idx)?;
        let (bid, ask, sigma) = match kind {
            OptionKind::Call => (row.call_bid, row.call_ask, row.call_iv),
            OptionKind::Put => (row.put_bid, row.put_ask, row.put_iv),
        };
        let quoted = match position {
            Position::Long => ask,
            Position::Short => bid,
        };
        let premium = if quoted > 0.0 {
            quoted
        } else {
            let params = BsParams::new(
                self.market.spot,
                row.strike,
                self.market.rate,
                sigma,
                self.market.ttl_years,
            )
            .ok()?;
            self.bs.price(&params, kind)
        };
        Some(OptionLeg {
            strike: row.strike,
            kind,
            position,
            quantity,
            premium,
            sigma,
        })
    }

    fn strategy(
        &self,
        name: String,
        kind: StrategyKind,
        legs: smallvec::SmallVec<[OptionLeg; 4]>,
    ) -> Option<Strategy> {
        Strategy::new(name, kind, legs).ok()
    }

    /// ATM (variant 0) or delta-targeted OTM (variant 1) single long option.
    fn long_single(&self, kind: OptionKind, variant: usize) -> Option<Strategy> {
        let (idx, label) = if variant == 0 {
            (self.atm, "ATM".to_string())
        } else {
            let idx = self.idx_near_delta(kind, self.wing_delta)?;
            if idx == self.atm {
                return None;
            }
            (idx, "OTM".to_string())
        };
        let leg = self.leg(idx, kind, Position::Long, 1)?;
        let (name, skind) = match kind {
            OptionKind::Call => (format!("Long Call {label}"), StrategyKind::LongCall),
            OptionKind::Put => (format!("Long Put {label}"), StrategyKind::LongPut),
        };
        self.strategy(name, skind, smallvec![leg])
    }

    /// Cash-secured short put at (a fraction of) the wing delta.
    fn short_put(&self, delta_scale: f64) -> Option<Strategy> {
        let idx = self.idx_near_delta(OptionKind::Put, self.wing_delta * delta_scale)?;
        if idx >= self.atm {
            return None;
        }
        let leg = self.leg(idx, OptionKind::Put, Position::Short, 1)?;
        let name = format!("Short Put {}", self.rows()[idx].strike);
        self.strategy(name, StrategyKind::ShortPut, smallvec![leg])
    }

    fn vertical_call_debit(&self, width: usize) -> Option<Strategy> {
        let short_idx = self.atm.checked_add(width)?;
        if short_idx >= self.rows().len() {
            return None;
        }
        let long = self.leg(self.atm, OptionKind::Call, Position::Long, 1)?;
        let short = self.leg(short_idx, OptionKind::Call, Position::Short, 1)?;
        self.strategy(
            format!("Bull Call Spread +{width}"),
            StrategyKind::BullCallSpread,
            smallvec![long, short],
        )
    }

    fn vertical_put_debit(&self, width: usize) -> Option<Strategy> {
        let short_idx = self.atm.checked_sub(width)?;
        let long = self.leg(self.atm, OptionKind::Put, Position::Long, 1)?;
        let short = self.leg(short_idx, OptionKind::Put, Position::Short, 1)?;
        self.strategy(
            format!("Bear Put Spread -{width}"),
            StrategyKind::BearPutSpread,
            smallvec![long, short],
        )
    }

    /// Credit call spread anchored at the wing delta above spot.
    fn vertical_call_credit(&self, width: usize) -> Option<Strategy> {
        let anchor = self
            .idx_near_delta(OptionKind::Call, self.wing_delta)?
            .max(self.atm + 1);
        let long_idx = anchor + width;
        if long_idx >= self.rows().len() {
            return None;
        }
        let short = self.leg(anchor, OptionKind::Call, Position::Short, 1)?;
        let long = self.leg(long_idx, OptionKind::Call, Position::Long, 1)?;
        self.strategy(
            format!("Bear Call Spread +{width}"),
            StrategyKind::BearCallSpread,
            smallvec![short, long],
        )
    }

    fn straddle(&self, position: Position) -> Option<Strategy> {
        let call = self.leg(self.atm, OptionKind::Call, position, 1)?;
        let put = self.leg(self.atm, OptionKind::Put, position, 1)?;
        let (name, kind) = match position {
            Position::Long => ("Long Straddle (ATM)", StrategyKind::LongStraddle),
            Position::Short => ("Short Straddle (ATM)", StrategyKind::ShortStraddle),
        };
        self.strategy(name.to_string(), kind, smallvec![call, put])
    }

    /// Strangle with both wings at the appetite's delta target.
    fn strangle(&self, position: Position) -> Option<Strategy> {
        let call_idx = self.idx_near_delta(OptionKind::Call, self.wing_delta)?;
        let put_idx = self.idx_near_delta(OptionKind::Put, self.wing_delta)?;
        if call_idx <= self.atm || put_idx >= self.atm {
            return None;
        }
        let call = self.leg(call_idx, OptionKind::Call, position, 1)?;
        let put = self.leg(put_idx, OptionKind::Put, position, 1)?;
        let (name, kind) = match position {
            Position::Long => ("Long Strangle", StrategyKind::LongStrangle),
            Position::Short => ("Short Strangle", StrategyKind::ShortStrangle),
        };
        self.strategy(name.to_string(), kind, smallvec![call, put])
    }

    /// Short strangle at the delta targets with protective wings further out.
    fn iron_condor(&self, wing: usize) -> Option<Strategy> {
        let short_call_idx = self.idx_near_delta(OptionKind::Call, self.wing_delta)?;
        let short_put_idx = self.idx_near_delta(OptionKind::Put, self.wing_delta)?;
        if short_call_idx <= self.atm || short_put_idx >= self.atm {
            return None;
        }
        let long_call_idx = short_call_idx + wing;
        let long_put_idx = short_put_idx.checked_sub(wing)?;
        if long_call_idx >= self.rows().len() {
            return None;
        }

        let long_put = self.leg(long_put_idx, OptionKind::Put, Position::Long, 1)?;
        let short_put = self.leg(short_put_idx, OptionKind::Put, Position::Short, 1)?;
        let short_call = self.leg(short_call_idx, OptionKind::Call, Position::Short, 1)?;
        let long_call = self.leg(long_call_idx, OptionKind::Call, Position::Long, 1)?;
        self.strategy(
            format!("Iron Condor (±{wing})"),
            StrategyKind::IronCondor,
            smallvec![long_put, short_put, short_call, long_call],
        )
    }

    /// 1-2-1 call butterfly centered at the money.
    fn butterfly(&self, wing: usize) -> Option<Strategy> {
        let lower = self.atm.checked_sub(wing)?;
        let upper = self.atm + wing;
        if upper >= self.rows().len() {
            return None;
        }
        let lo = self.leg(lower, OptionKind::Call, Position::Long, 1)?;
        let body = self.leg(self.atm, OptionKind::Call, Position::Short, 2)?;
        let hi = self.leg(upper, OptionKind::Call, Position::Long, 1)?;
        self.strategy(
            format!("Long Butterfly (±{wing})"),
            StrategyKind::LongButterfly,
            smallvec![lo, body, hi],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::mock::mock_chain;

    fn setup() -> (ChainSnapshot, MarketState) {
        let chain = mock_chain("BANKNIFTY", 0.065, 7.0 / 365.0).unwrap();
        let market = MarketState::new(
            chain.symbol.clone(),
            chain.spot,
            0.065,
            chain.implied_vol,
            chain.ttl_years,
        )
        .unwrap();
        (chain, market)
    }

    #[test]
    fn test_bullish_universe_is_directional() {
        let (chain, market) = setup();
        let bs = BlackScholes::new();
        let candidates = generate_candidates(
            &chain,
            &market,
            MarketView::Bullish,
            VolatilityOutlook::Stable,
            RiskAppetite::Moderate,
            &bs,
        );
        assert!(!candidates.is_empty());
        for c in &candidates {
            assert!(
                matches!(
                    c.kind,
                    StrategyKind::BullCallSpread | StrategyKind::ShortPut
                ),
                "stable vol bullish universe got {:?}",
                c.kind
            );
        }
    }

    #[test]
    fn test_rising_vol_excludes_short_vega() {
        let (chain, market) = setup();
        let bs = BlackScholes::new();
        let candidates = generate_candidates(
            &chain,
            &market,
            MarketView::Neutral,
            VolatilityOutlook::Rising,
            RiskAppetite::Moderate,
            &bs,
        );
        for c in &candidates {
            assert!(
                matches!(c.kind, StrategyKind::LongStraddle | StrategyKind::LongStrangle),
                "rising vol must keep only long-vega neutral shapes, got {:?}",
                c.kind
            );
        }
        assert!(!candidates.is_empty());
    }

    #[test]
    fn test_falling_vol_neutral_gets_premium_sellers() {
        let (chain, market) = setup();
        let bs = BlackScholes::new();
        let candidates = generate_candidates(
            &chain,
            &market,
            MarketView::Neutral,
            VolatilityOutlook::Falling,
            RiskAppetite::Conservative,
            &bs,
        );
        let kinds: Vec<StrategyKind> = candidates.iter().map(|c| c.kind).collect();
        assert!(kinds.contains(&StrategyKind::IronCondor));
        assert!(kinds.contains(&StrategyKind::ShortStraddle));
        assert!(!kinds.contains(&StrategyKind::LongStraddle));
    }

    #[test]
    fn test_generation_order_is_stable() {
        let (chain, market) = setup();
        let bs = BlackScholes::new();
        let run = || {
            generate_candidates(
                &chain,
                &market,
                MarketView::Bearish,
                VolatilityOutlook::Falling,
                RiskAppetite::Aggressive,
                &bs,
            )
            .iter()
            .map(|c| c.name.clone())
            .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_condor_wings_bracket_shorts() {
        let (chain, market) = setup();
        let bs = BlackScholes::new();
        let candidates = generate_candidates(
            &chain,
            &market,
            MarketView::Neutral,
            VolatilityOutlook::Falling,
            RiskAppetite::Moderate,
            &bs,
        );
        let condor = candidates
            .iter()
            .find(|c| c.kind == StrategyKind::IronCondor)
            .expect("condor generated");
        assert_eq!(condor.legs.len(), 4);
        let strikes: Vec<f64> = condor.legs.iter().map(|l| l.strike).collect();
        // long put < short put < short call < long call
        assert!(strikes[0] < strikes[1]);
        assert!(strikes[1] < strikes[2]);
        assert!(strikes[2] < strikes[3]);
    }

    #[test]
    fn test_conservative_wings_are_further_out() {
        let (chain, market) = setup();
        let bs = BlackScholes::new();
        let find_short_put_strike = |appetite: RiskAppetite| -> f64 {
            let candidates = generate_candidates(
                &chain,
                &market,
                MarketView::Bullish,
                VolatilityOutlook::Falling,
                appetite,
                &bs,
            );
            candidates
                .iter()
                .find(|c| c.kind == StrategyKind::ShortPut)
                .expect("short put generated")
                .legs[0]
                .strike
        };
        let conservative = find_short_put_strike(RiskAppetite::Conservative);
        let aggressive = find_short_put_strike(RiskAppetite::Aggressive);
        assert!(
            conservative <= aggressive,
            "conservative short put {conservative} should sit below aggressive {aggressive}"
        );
    }
}
