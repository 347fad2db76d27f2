use crate::error::{SimError, SimResult};
use crate::history::{CurvePoint, DemandSupply};
use crate::types::{AgentId, PRICE_FLOOR, Price, Quantity};

use super::orders::{Order, Side, TradeResult, TradeSide};
use super::pricing::{EquilibriumSolver, PricingRule};

// === CONSTANTS ===

pub const BISECTION_LOW: Price = 0.01;
pub const BISECTION_HIGH: Price = 1e10;
pub const BISECTION_TOLERANCE: Price = 0.01;

// === ORDER BOOK SIDES ===

/// Split submitted orders into (buys by descending bid, sells by ascending bid).
///
/// Both sorts are stable: equal bids keep submission order, which makes partial
/// fills reproducible for a fixed seed.
pub fn sorted_sides(orders: &[Order]) -> (Vec<&Order>, Vec<&Order>) {
    let mut buys: Vec<_> = orders.iter().filter(|o| o.side == Side::Buy).collect();
    let mut sells: Vec<_> = orders.iter().filter(|o| o.side == Side::Sell).collect();

    buys.sort_by(|a, b| b.bid.total_cmp(&a.bid));
    sells.sort_by(|a, b| a.bid.total_cmp(&b.bid));

    (buys, sells)
}

// === PLAIN EQUILIBRIUM ===

/// Closed-form equilibrium for a frictionless book.
///
/// Buys (descending) and sells (ascending) are merged into one
/// most-aggressive-first sequence, always extending the side with the smaller
/// cumulative quantity (ties extend supply). Whenever `min(qd, qs)` strictly
/// improves while the marginal bid still covers the marginal ask, the order just
/// added sets the candidate price.
pub fn crossing_price(orders: &[Order]) -> Price {
    let (buys, sells) = sorted_sides(orders);

    let mut qd: Quantity = 0;
    let mut qs: Quantity = 0;
    let mut best: Quantity = 0;
    let mut price: Price = 0.0;

    let mut marginal_bid: Option<Price> = None;
    let mut marginal_ask: Option<Price> = None;

    let (mut buy_idx, mut sell_idx) = (0, 0);
    loop {
        let take_sell = match (buys.get(buy_idx), sells.get(sell_idx)) {
            (Some(_), Some(_)) => qs <= qd,
            (None, Some(_)) => true,
            (Some(_), None) => false,
            (None, None) => break,
        };

        let bid = if take_sell {
            let order = sells[sell_idx];
            sell_idx += 1;
            qs += order.quantity;
            marginal_ask = Some(order.bid);
            order.bid
        } else {
            let order = buys[buy_idx];
            buy_idx += 1;
            qd += order.quantity;
            marginal_bid = Some(order.bid);
            order.bid
        };

        let crosses = matches!((marginal_bid, marginal_ask), (Some(b), Some(a)) if b >= a);
        let matched = qd.min(qs);
        if crosses && matched > best {
            best = matched;
            price = bid;
        }
    }

    price.max(PRICE_FLOOR)
}

// === FRICTION EQUILIBRIUM ===

/// Units offered by sellers willing to accept what sellers receive at `price`.
pub fn supply_at(sells: &[&Order], rule: &PricingRule, price: Price) -> Quantity {
    let received = rule.seller_price(price);
    sells
        .iter()
        .filter(|o| o.bid <= received)
        .map(|o| o.quantity)
        .sum()
}

/// Units wanted by buyers willing to pay what buyers pay at `price`.
pub fn demand_at(buys: &[&Order], rule: &PricingRule, price: Price) -> Quantity {
    let paid = rule.buyer_price(price);
    buys.iter()
        .filter(|o| o.bid >= paid)
        .map(|o| o.quantity)
        .sum()
}

/// Upper bound on bisection steps for the fixed bracket and tolerance.
pub fn bisection_iteration_cap() -> u32 {
    ((BISECTION_HIGH - BISECTION_LOW) / BISECTION_TOLERANCE)
        .log2()
        .ceil() as u32
        + 1
}

/// Bisection equilibrium for a book where buyer and seller prices diverge.
///
/// The bracket shrinks from above while supply exceeds demand and from below
/// otherwise, so it closes on the highest price that still keeps the marginal
/// buyer. One-sided books have no crossing and clear at the floor.
pub fn bisection_price(orders: &[Order], rule: &PricingRule) -> SimResult<Price> {
    let (buys, sells) = sorted_sides(orders);
    if buys.is_empty() || sells.is_empty() {
        return Ok(PRICE_FLOOR);
    }

    let cap = bisection_iteration_cap();
    let (mut low, mut high) = (BISECTION_LOW, BISECTION_HIGH);
    let mut iterations = 0u32;

    while high - low > BISECTION_TOLERANCE {
        if iterations >= cap {
            return Err(SimError::FrictionNoConvergence {
                low,
                high,
                iterations,
            });
        }
        let mid = 0.5 * (low + high);
        if supply_at(&sells, rule, mid) > demand_at(&buys, rule, mid) {
            high = mid;
        } else {
            low = mid;
        }
        iterations += 1;
    }

    // Pinned against either end of the bracket: the curves never crossed inside it.
    if low - BISECTION_LOW <= BISECTION_TOLERANCE || BISECTION_HIGH - high <= BISECTION_TOLERANCE
    {
        return Err(SimError::FrictionNoConvergence {
            low,
            high,
            iterations,
        });
    }

    Ok(low.max(PRICE_FLOOR))
}

pub fn equilibrium_price(
    orders: &[Order],
    rule: &PricingRule,
    solver: EquilibriumSolver,
) -> SimResult<Price> {
    match solver {
        EquilibriumSolver::Crossing => Ok(crossing_price(orders)),
        EquilibriumSolver::Bisection => bisection_price(orders, rule),
    }
}

// === MATCHING ===

#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    /// Trades in execution order; applying them in this order is the serialized
    /// critical section of a tick.
    pub trades: Vec<(AgentId, TradeResult)>,
    pub volume: Quantity,
    pub friction_profit: f64,
}

impl MatchOutcome {
    pub fn bought(&self) -> Quantity {
        self.side_total(TradeSide::Buy)
    }

    pub fn sold(&self) -> Quantity {
        self.side_total(TradeSide::Sell)
    }

    fn side_total(&self, side: TradeSide) -> Quantity {
        self.trades
            .iter()
            .filter(|(_, t)| t.side == side)
            .map(|(_, t)| t.quantity)
            .sum()
    }
}

/// Two-pointer allocation at an already-discovered clearing price.
pub fn match_orders(orders: &[Order], price: Price, rule: &PricingRule) -> MatchOutcome {
    let (buys, sells) = sorted_sides(orders);
    let buyer_price = rule.buyer_price(price);
    let seller_price = rule.seller_price(price);

    let mut outcome = MatchOutcome::default();
    let (mut buy_idx, mut sell_idx) = (0, 0);
    let mut buy_left = buys.first().map_or(0, |o| o.quantity);
    let mut sell_left = sells.first().map_or(0, |o| o.quantity);

    while buy_idx < buys.len() && sell_idx < sells.len() {
        let (buy, sell) = (buys[buy_idx], sells[sell_idx]);
        if sell.bid > buyer_price || buy.bid < seller_price {
            break;
        }

        let quantity = buy_left.min(sell_left);
        if quantity > 0 {
            outcome.trades.push((
                buy.agent_id,
                TradeResult {
                    side: TradeSide::Buy,
                    quantity,
                    price: buyer_price,
                },
            ));
            outcome.trades.push((
                sell.agent_id,
                TradeResult {
                    side: TradeSide::Sell,
                    quantity,
                    price: seller_price,
                },
            ));
            outcome.volume += quantity;
            outcome.friction_profit += quantity as f64 * (buyer_price - seller_price).abs();
        }

        buy_left -= quantity;
        sell_left -= quantity;

        // Exhausted sell goes first on a tie
        if sell_left == 0 {
            sell_idx += 1;
            sell_left = sells.get(sell_idx).map_or(0, |o| o.quantity);
        } else {
            buy_idx += 1;
            buy_left = buys.get(buy_idx).map_or(0, |o| o.quantity);
        }
    }

    outcome
}

// === DEMAND / SUPPLY CURVES ===

/// Cumulative demand and supply over the submitted book.
pub fn demand_supply_curves(orders: &[Order]) -> DemandSupply {
    let (buys, sells) = sorted_sides(orders);

    let cumulative = |side: Vec<&Order>| -> Vec<CurvePoint> {
        side.into_iter()
            .scan(0, |total, o| {
                *total += o.quantity;
                Some(CurvePoint {
                    bid: o.bid,
                    cumulative: *total,
                })
            })
            .collect()
    };

    DemandSupply {
        demand: cumulative(buys),
        supply: cumulative(sells),
    }
}
