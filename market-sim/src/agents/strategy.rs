//! Trading strategies.
//!
//! Each strategy turns a perceived price window (and, for copycats, the decisions
//! of the best-ranked agents) into a raw intent: a side and an unsized bid.
//! Sizing, perception and logging live in `Agent::decide` and are shared by all
//! strategies.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::history::{DecisionLogEntry, MarketSnapshot};
use crate::market::Side;
use crate::types::{AgentId, Price, StrategyKind};

// === CONSTANTS ===

/// Dead band around zero for signal-driven strategies
pub const SIGNAL_EPS: f64 = 0.05;
pub const FALLBACK_BID_MIN: Price = 100.0;
pub const FALLBACK_BID_MAX: Price = 300.0;
/// Per-tick chance that a long-term buyer liquidates
pub const SELL_OUT_PROBABILITY: f64 = 1.0 / 1000.0;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;

// === INPUTS & OUTPUTS ===

/// What the strategy may read besides the market window.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionContext<'a> {
    /// Latest decision of each best-ranked agent (`None` if it never decided)
    pub imitation_pool: &'a [Option<DecisionLogEntry>],
}

impl<'a> DecisionContext<'a> {
    pub fn new(imitation_pool: &'a [Option<DecisionLogEntry>]) -> Self {
        Self { imitation_pool }
    }
}

/// The deciding agent's own balance sheet.
#[derive(Debug, Clone, Copy)]
pub struct Holdings {
    pub agent: AgentId,
    pub cash: f64,
    pub inventory: f64,
}

/// Unsized trading intent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intent {
    pub side: Side,
    pub bid: Price,
}

impl Intent {
    pub fn buy(bid: Price) -> Self {
        Self {
            side: Side::Buy,
            bid,
        }
    }

    pub fn sell(bid: Price) -> Self {
        Self {
            side: Side::Sell,
            bid,
        }
    }

    pub fn skip() -> Self {
        Self {
            side: Side::Skip,
            bid: 0.0,
        }
    }
}

// === STRATEGY ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuyerState {
    Buying,
    SoldOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Coin-flip trader that quotes the last known price
    Fundamentalist,
    /// Trades against the previous tick's order imbalance
    Contrarian,
    /// MACD(12, 26) trend follower
    TechnicalAnalyst,
    /// Random side, bid drawn around the last price
    Random,
    /// Accumulates until a one-shot liquidation, then sits out
    LongTermBuyer(BuyerState),
    /// Mirrors a best-ranked agent's latest decision
    Copycat,
    /// Fixed-distribution calibration trader
    Verification,
}

impl Strategy {
    pub fn for_kind(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Fundamentalist => Strategy::Fundamentalist,
            StrategyKind::Contrarian => Strategy::Contrarian,
            StrategyKind::TechnicalAnalyst => Strategy::TechnicalAnalyst,
            StrategyKind::Random => Strategy::Random,
            StrategyKind::LongTermBuyer => Strategy::LongTermBuyer(BuyerState::Buying),
            StrategyKind::Copycat => Strategy::Copycat,
            StrategyKind::Verification => Strategy::Verification,
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Fundamentalist => StrategyKind::Fundamentalist,
            Strategy::Contrarian => StrategyKind::Contrarian,
            Strategy::TechnicalAnalyst => StrategyKind::TechnicalAnalyst,
            Strategy::Random => StrategyKind::Random,
            Strategy::LongTermBuyer(_) => StrategyKind::LongTermBuyer,
            Strategy::Copycat => StrategyKind::Copycat,
            Strategy::Verification => StrategyKind::Verification,
        }
    }

    pub fn is_copycat(&self) -> bool {
        matches!(self, Strategy::Copycat)
    }

    /// Raw intent for this tick. `window` holds perceived prices, oldest first.
    pub fn intent<R: Rng + ?Sized>(
        &mut self,
        window: &[MarketSnapshot],
        ctx: &DecisionContext<'_>,
        holdings: Holdings,
        rng: &mut R,
    ) -> SimResult<Intent> {
        let last = window.last();
        match self {
            Strategy::Fundamentalist => {
                let indicator = rng.random_range(0.0..3.0);
                let bid = last_price_or_fallback(window, rng);
                Ok(if indicator > 2.0 {
                    Intent::buy(bid)
                } else if indicator > 1.0 {
                    Intent::skip()
                } else {
                    Intent::sell(bid)
                })
            }

            Strategy::Contrarian => {
                let (indicator, bid) = match last {
                    Some(snapshot) => (order_imbalance(snapshot), snapshot.price),
                    None => (
                        rng.random_range(-2.0..2.0),
                        fallback_bid(rng),
                    ),
                };
                Ok(if indicator > SIGNAL_EPS {
                    Intent::sell(bid)
                } else if indicator < -SIGNAL_EPS {
                    Intent::buy(bid)
                } else {
                    Intent::skip()
                })
            }

            Strategy::TechnicalAnalyst => {
                let prices = prices(window);
                let (signal, bid) = match (macd(&prices), last) {
                    (Some(signal), Some(snapshot)) => (signal, snapshot.price),
                    _ => (rng.random_range(-1.0..1.0), fallback_bid(rng)),
                };
                Ok(if signal > SIGNAL_EPS {
                    Intent::buy(bid)
                } else if signal < -SIGNAL_EPS {
                    Intent::sell(bid)
                } else {
                    Intent::skip()
                })
            }

            Strategy::Random => {
                let indicator = rng.random_range(0.0..3.0);
                let bid = if window.is_empty() {
                    fallback_bid(rng)
                } else {
                    bid_around_last(&prices(window), rng)?
                };
                Ok(if indicator > 2.0 {
                    Intent::sell(bid)
                } else if indicator > 1.0 {
                    Intent::buy(bid)
                } else {
                    Intent::skip()
                })
            }

            Strategy::LongTermBuyer(state) => {
                if *state == BuyerState::SoldOut {
                    return Ok(Intent::skip());
                }
                let sell_out = rng.random::<f64>() < SELL_OUT_PROBABILITY;
                let bid = last_price_or_fallback(window, rng);
                if sell_out {
                    *state = BuyerState::SoldOut;

                    #[cfg(feature = "instrument")]
                    {
                        use crate::types::KeyToU64;
                        tracing::info!(
                            target: "transition",
                            agent_id = holdings.agent.to_u64(),
                            from = "buying",
                            to = "sold_out",
                        );
                    }

                    return Ok(Intent::sell(bid));
                }
                Ok(Intent::buy(bid))
            }

            Strategy::Copycat => {
                let pool = ctx.imitation_pool;
                if pool.is_empty() {
                    return Ok(Intent::skip());
                }
                let prophet = rng.random_range(0..pool.len());
                Ok(match pool[prophet] {
                    Some(entry) => Intent {
                        side: entry.side,
                        bid: entry.bid,
                    },
                    None => Intent::skip(),
                })
            }

            Strategy::Verification => {
                // Indicator never drops below 1, so this strategy always trades
                let indicator = rng.random_range(1.0..3.0);
                let bid = if window.is_empty() {
                    holdings_bid(holdings, rng)?
                } else {
                    bid_around_last(&prices(window), rng)?
                };
                Ok(if indicator > 2.0 {
                    Intent::sell(bid)
                } else if indicator > 1.0 {
                    Intent::buy(bid)
                } else {
                    Intent::skip()
                })
            }
        }
    }
}

// === SIGNALS ===

fn prices(window: &[MarketSnapshot]) -> Vec<Price> {
    window.iter().map(|s| s.price).collect()
}

/// (buys - sells) / max(total, 1) for one snapshot
pub fn order_imbalance(snapshot: &MarketSnapshot) -> f64 {
    let buys = snapshot.buy_orders as f64;
    let sells = snapshot.sell_orders as f64;
    (buys - sells) / (buys + sells).max(1.0)
}

/// Exponentially weighted mean at the last point, seeded with the first observation.
pub fn ewma_last(prices: &[f64], alpha: f64) -> Option<f64> {
    let (first, rest) = prices.split_first()?;
    Some(
        rest.iter()
            .fold(*first, |ema, price| alpha * price + (1.0 - alpha) * ema),
    )
}

/// EWMA(12) - EWMA(26) at the most recent price.
pub fn macd(prices: &[f64]) -> Option<f64> {
    let alpha = |period: usize| 2.0 / (period as f64 + 1.0);
    Some(ewma_last(prices, alpha(MACD_FAST))? - ewma_last(prices, alpha(MACD_SLOW))?)
}

// === BIDS ===

fn fallback_bid<R: Rng + ?Sized>(rng: &mut R) -> Price {
    rng.random_range(FALLBACK_BID_MIN..FALLBACK_BID_MAX)
}

fn last_price_or_fallback<R: Rng + ?Sized>(window: &[MarketSnapshot], rng: &mut R) -> Price {
    match window.last() {
        Some(snapshot) => snapshot.price,
        None => fallback_bid(rng),
    }
}

/// Normal draw centred on the last price. The spread is a third of the distance
/// to the nearer window extreme and the draw is clamped into [min, max].
fn bid_around_last<R: Rng + ?Sized>(prices: &[Price], rng: &mut R) -> SimResult<Price> {
    let Some(&last) = prices.last() else {
        return Ok(fallback_bid(rng));
    };
    let min = prices.iter().copied().fold(f64::INFINITY, f64::min);
    let max = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let spread = (last - min).min(max - last) / 3.0;

    let normal = Normal::new(last, spread).map_err(|e| SimError::Distribution(e.to_string()))?;
    Ok(normal.sample(rng).clamp(min, max))
}

/// Cold-start bid in [cash / inventory, 3 * cash / inventory).
fn holdings_bid<R: Rng + ?Sized>(holdings: Holdings, rng: &mut R) -> SimResult<Price> {
    if holdings.inventory == 0.0 {
        return Err(SimError::InvalidAgentState {
            agent: holdings.agent,
            reason: "zero inventory leaves no cash/inventory price range".to_string(),
        });
    }
    let low = holdings.cash / holdings.inventory;
    if !(low.is_finite() && low > 0.0) {
        return Err(SimError::InvalidAgentState {
            agent: holdings.agent,
            reason: format!("cash/inventory ratio {low} is not a positive price"),
        });
    }
    Ok(rng.random_range(low..3.0 * low))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use slotmap::SlotMap;

    fn holdings(cash: f64, inventory: f64) -> Holdings {
        let mut keys: SlotMap<AgentId, ()> = SlotMap::with_key();
        Holdings {
            agent: keys.insert(()),
            cash,
            inventory,
        }
    }

    fn snapshot(price: Price, buy_orders: u32, sell_orders: u32) -> MarketSnapshot {
        MarketSnapshot {
            price,
            sell_orders,
            buy_orders,
            volume: 0,
            friction_profit: 0.0,
        }
    }

    fn window(prices: &[Price]) -> Vec<MarketSnapshot> {
        prices.iter().map(|&p| snapshot(p, 0, 0)).collect()
    }

    #[test]
    fn ewma_matches_recursive_definition() {
        assert_eq!(ewma_last(&[], 0.5), None);
        assert_eq!(ewma_last(&[10.0], 0.5), Some(10.0));
        // 10 -> 0.5*20 + 0.5*10 = 15 -> 0.5*30 + 0.5*15 = 22.5
        assert_eq!(ewma_last(&[10.0, 20.0, 30.0], 0.5), Some(22.5));
    }

    #[test]
    fn macd_follows_trend_direction() {
        let rising: Vec<f64> = (0..10).map(|i| 100.0 + 10.0 * i as f64).collect();
        let falling: Vec<f64> = rising.iter().rev().copied().collect();
        assert!(macd(&rising).unwrap() > SIGNAL_EPS);
        assert!(macd(&falling).unwrap() < -SIGNAL_EPS);
        assert_eq!(macd(&[100.0, 100.0, 100.0]), Some(0.0));
    }

    #[test]
    fn technical_analyst_buys_uptrend_and_sells_downtrend() {
        let mut rng = StdRng::seed_from_u64(7);
        let ctx = DecisionContext::default();
        let rising = window(&[100.0, 110.0, 120.0, 130.0, 140.0]);
        let falling = window(&[140.0, 130.0, 120.0, 110.0, 100.0]);

        let mut strategy = Strategy::TechnicalAnalyst;
        let up = strategy
            .intent(&rising, &ctx, holdings(1000.0, 10.0), &mut rng)
            .unwrap();
        assert_eq!(up, Intent::buy(140.0));

        let down = strategy
            .intent(&falling, &ctx, holdings(1000.0, 10.0), &mut rng)
            .unwrap();
        assert_eq!(down, Intent::sell(100.0));
    }

    #[test]
    fn contrarian_trades_against_imbalance() {
        let mut rng = StdRng::seed_from_u64(1);
        let ctx = DecisionContext::default();
        let mut strategy = Strategy::Contrarian;

        let buy_heavy = vec![snapshot(150.0, 8, 2)];
        let intent = strategy
            .intent(&buy_heavy, &ctx, holdings(0.0, 0.0), &mut rng)
            .unwrap();
        assert_eq!(intent, Intent::sell(150.0));

        let sell_heavy = vec![snapshot(150.0, 2, 8)];
        let intent = strategy
            .intent(&sell_heavy, &ctx, holdings(0.0, 0.0), &mut rng)
            .unwrap();
        assert_eq!(intent, Intent::buy(150.0));

        // Empty last tick: zero denominator is treated as no signal
        let quiet = vec![snapshot(150.0, 0, 0)];
        let intent = strategy
            .intent(&quiet, &ctx, holdings(0.0, 0.0), &mut rng)
            .unwrap();
        assert_eq!(intent, Intent::skip());
    }

    #[test]
    fn random_bid_stays_inside_window_range() {
        let mut rng = StdRng::seed_from_u64(3);
        let ctx = DecisionContext::default();
        let prices = window(&[90.0, 120.0, 100.0, 110.0]);
        let mut strategy = Strategy::Random;

        for _ in 0..500 {
            let intent = strategy
                .intent(&prices, &ctx, holdings(0.0, 0.0), &mut rng)
                .unwrap();
            if intent.side != Side::Skip {
                assert!(
                    (90.0..=120.0).contains(&intent.bid),
                    "bid {} escaped window range",
                    intent.bid
                );
            }
        }
    }

    #[test]
    fn empty_window_falls_back_to_random_bid_range() {
        let mut rng = StdRng::seed_from_u64(11);
        let ctx = DecisionContext::default();
        for mut strategy in [
            Strategy::Fundamentalist,
            Strategy::Contrarian,
            Strategy::TechnicalAnalyst,
            Strategy::Random,
            Strategy::LongTermBuyer(BuyerState::Buying),
        ] {
            for _ in 0..50 {
                let intent = strategy
                    .intent(&[], &ctx, holdings(0.0, 0.0), &mut rng)
                    .unwrap();
                if intent.side != Side::Skip {
                    assert!(
                        (FALLBACK_BID_MIN..FALLBACK_BID_MAX).contains(&intent.bid),
                        "{:?} fallback bid {} out of range",
                        strategy,
                        intent.bid
                    );
                }
            }
        }
    }

    #[test]
    fn long_term_buyer_sells_out_once() {
        let mut rng = StdRng::seed_from_u64(42);
        let ctx = DecisionContext::default();
        let prices = window(&[100.0]);
        let mut strategy = Strategy::LongTermBuyer(BuyerState::Buying);

        let mut sells = 0;
        let mut sold_out_at = None;
        for step in 0..20_000 {
            let intent = strategy
                .intent(&prices, &ctx, holdings(0.0, 0.0), &mut rng)
                .unwrap();
            match intent.side {
                Side::Sell => {
                    sells += 1;
                    sold_out_at = Some(step);
                }
                Side::Buy => assert!(sold_out_at.is_none(), "bought after selling out"),
                Side::Skip => assert!(sold_out_at.is_some(), "skipped while still buying"),
            }
        }
        // P(no sell-out in 20k draws at 1/1000) is ~2e-9
        assert_eq!(sells, 1);
        assert_eq!(strategy, Strategy::LongTermBuyer(BuyerState::SoldOut));
    }

    #[test]
    fn copycat_copies_pool_or_skips() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut strategy = Strategy::Copycat;

        let empty = DecisionContext::default();
        let intent = strategy
            .intent(&[], &empty, holdings(0.0, 0.0), &mut rng)
            .unwrap();
        assert_eq!(intent, Intent::skip());

        let entry = DecisionLogEntry {
            side: Side::Buy,
            bid: 123.0,
        };
        let pool = [Some(entry), Some(entry)];
        let intent = strategy
            .intent(&[], &DecisionContext::new(&pool), holdings(0.0, 0.0), &mut rng)
            .unwrap();
        assert_eq!(intent, Intent::buy(123.0));

        let never_decided = [None];
        let intent = strategy
            .intent(
                &[],
                &DecisionContext::new(&never_decided),
                holdings(0.0, 0.0),
                &mut rng,
            )
            .unwrap();
        assert_eq!(intent, Intent::skip());
    }

    #[test]
    fn verification_cold_start_uses_holdings_ratio() {
        let mut rng = StdRng::seed_from_u64(9);
        let ctx = DecisionContext::default();
        let mut strategy = Strategy::Verification;

        for _ in 0..100 {
            let intent = strategy
                .intent(&[], &ctx, holdings(20_000.0, 1_000.0), &mut rng)
                .unwrap();
            assert_ne!(intent.side, Side::Skip);
            assert!((20.0..60.0).contains(&intent.bid), "bid {}", intent.bid);
        }
    }

    #[test]
    fn verification_with_zero_inventory_is_invalid_state() {
        let mut rng = StdRng::seed_from_u64(9);
        let ctx = DecisionContext::default();
        let result =
            Strategy::Verification.intent(&[], &ctx, holdings(20_000.0, 0.0), &mut rng);
        assert!(matches!(result, Err(SimError::InvalidAgentState { .. })));
    }
}
