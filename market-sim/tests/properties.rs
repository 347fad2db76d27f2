use std::collections::HashMap;

use market_sim::market::{equilibrium_price, match_orders};
use market_sim::{AgentId, EquilibriumSolver, Order, PRICE_FLOOR, PricingRule, Side, TradeSide};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use slotmap::SlotMap;

/// Random book with a mix of buys, sells and skips over overlapping bid ranges.
fn random_book(rng: &mut StdRng, n: usize) -> Vec<Order> {
    let mut keys: SlotMap<AgentId, ()> = SlotMap::with_key();
    (0..n)
        .map(|_| {
            let id = keys.insert(());
            let quantity = rng.random_range(1..50);
            let bid = rng.random_range(20.0..200.0);
            match rng.random_range(0..3) {
                0 => Order::buy(id, quantity, bid),
                1 => Order::sell(id, quantity, bid),
                _ => Order::skip(id),
            }
        })
        .collect()
}

fn rules() -> [(PricingRule, EquilibriumSolver); 3] {
    [
        (PricingRule::Frictionless, EquilibriumSolver::Crossing),
        (PricingRule::Friction { rate: 0.1 }, EquilibriumSolver::Bisection),
        (PricingRule::Friction { rate: 0.4 }, EquilibriumSolver::Bisection),
    ]
}

#[test]
fn bought_equals_sold_equals_volume() {
    let mut rng = StdRng::seed_from_u64(1);
    for round in 0..200 {
        let n = rng.random_range(0..40);
        let book = random_book(&mut rng, n);
        for (rule, solver) in rules() {
            let price = equilibrium_price(&book, &rule, solver).unwrap();
            let outcome = match_orders(&book, price, &rule);
            assert_eq!(
                outcome.bought(),
                outcome.sold(),
                "round {round} {rule:?}: bought {} sold {}",
                outcome.bought(),
                outcome.sold()
            );
            assert_eq!(outcome.volume, outcome.bought());
        }
    }
}

#[test]
fn price_respects_floor() {
    let mut rng = StdRng::seed_from_u64(2);
    for _ in 0..200 {
        let n = rng.random_range(0..20);
        let book = random_book(&mut rng, n);
        for (rule, solver) in rules() {
            let price = equilibrium_price(&book, &rule, solver).unwrap();
            assert!(price >= PRICE_FLOOR, "{rule:?} cleared at {price}");
        }
    }
}

#[test]
fn friction_profit_is_volume_times_spread() {
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..200 {
        let book = random_book(&mut rng, 30);
        for (rule, solver) in rules() {
            let price = equilibrium_price(&book, &rule, solver).unwrap();
            let outcome = match_orders(&book, price, &rule);

            let spread = rule.buyer_price(price) - rule.seller_price(price);
            assert!(spread >= 0.0, "seller receives more than buyer pays");
            let expected = outcome.volume as f64 * spread;
            assert!(
                (outcome.friction_profit - expected).abs() <= 1e-6 * expected.max(1.0),
                "{rule:?}: profit {} expected {expected}",
                outcome.friction_profit
            );
        }
    }
}

#[test]
fn trades_respect_limits_and_order_sizes() {
    let mut rng = StdRng::seed_from_u64(4);
    for _ in 0..200 {
        let book = random_book(&mut rng, 30);
        let by_agent: HashMap<AgentId, Order> = book.iter().map(|o| (o.agent_id, *o)).collect();

        for (rule, solver) in rules() {
            let price = equilibrium_price(&book, &rule, solver).unwrap();
            let outcome = match_orders(&book, price, &rule);

            let mut filled: HashMap<AgentId, u64> = HashMap::new();
            for (agent, trade) in &outcome.trades {
                let order = by_agent[agent];
                *filled.entry(*agent).or_default() += trade.quantity;
                match trade.side {
                    TradeSide::Buy => {
                        assert_eq!(order.side, Side::Buy);
                        assert!(order.bid >= rule.seller_price(price), "buyer bid below ask");
                        if rule == PricingRule::Frictionless {
                            assert!(order.bid >= trade.price, "buyer paid above bid");
                        }
                    }
                    TradeSide::Sell => {
                        assert_eq!(order.side, Side::Sell);
                        assert!(order.bid <= rule.buyer_price(price), "seller asked above price");
                    }
                }
            }
            for (agent, quantity) in filled {
                assert!(
                    quantity <= by_agent[&agent].quantity,
                    "agent filled {quantity} of {}",
                    by_agent[&agent].quantity
                );
            }
        }
    }
}

#[test]
fn skips_never_trade() {
    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..100 {
        let book = random_book(&mut rng, 25);
        let price = equilibrium_price(&book, &PricingRule::Frictionless, EquilibriumSolver::Crossing)
            .unwrap();
        let outcome = match_orders(&book, price, &PricingRule::Frictionless);
        for (agent, _) in &outcome.trades {
            let order = book.iter().find(|o| o.agent_id == *agent).unwrap();
            assert!(!order.is_skip());
        }
    }
}

#[test]
fn clearing_is_deterministic() {
    let mut rng = StdRng::seed_from_u64(6);
    let book = random_book(&mut rng, 40);
    for (rule, solver) in rules() {
        let a = equilibrium_price(&book, &rule, solver).unwrap();
        let b = equilibrium_price(&book, &rule, solver).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            match_orders(&book, a, &rule).trades,
            match_orders(&book, b, &rule).trades
        );
    }
}
