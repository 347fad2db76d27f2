use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::history::{DecisionLogEntry, MarketSnapshot};
use crate::market::{Order, Side, TradeResult, TradeSide};
use crate::types::{AgentId, Price, Quantity, Tick};

use super::strategy::{DecisionContext, Holdings, Strategy};

// === CONSTANTS ===

pub const CONFIDENCE_MIN: f64 = 0.1;
pub const CONFIDENCE_MAX: f64 = 0.9;
/// Noisy perception never reports a price below this.
pub const MIN_PERCEIVED_PRICE: Price = 0.01;

/// Deterministic per-agent stream: run seed, agent index and the tick the stream starts at.
pub fn agent_seed(run_seed: u64, index: u32, tick: Tick) -> u64 {
    run_seed
        ^ (u64::from(index) + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ tick.wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
}

fn detached_rng() -> StdRng {
    StdRng::seed_from_u64(0)
}

// === AGENT ===

/// A trader with its own balance sheet, strategy and random stream.
///
/// Only `tick` (accrual) and `apply_trade` (clearing) change cash and inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    id: AgentId,
    /// Creation order; seeds the agent's random stream
    index: u32,
    confidence: f64,
    production: f64,
    inventory: f64,
    income: f64,
    cash: f64,
    active: bool,
    activation_tick: Tick,
    strategy: Strategy,
    log: Vec<DecisionLogEntry>,
    #[serde(skip, default = "detached_rng")]
    rng: StdRng,
}

impl Agent {
    pub fn new(id: AgentId, index: u32, strategy: Strategy, confidence: f64, rng: StdRng) -> Self {
        Self {
            id,
            index,
            confidence: confidence.clamp(CONFIDENCE_MIN, CONFIDENCE_MAX),
            production: 0.0,
            inventory: 0.0,
            income: 0.0,
            cash: 0.0,
            active: false,
            activation_tick: 0,
            strategy,
            log: Vec::new(),
            rng,
        }
    }

    pub fn with_cash(mut self, cash: f64) -> Self {
        self.cash = cash;
        self
    }

    pub fn with_inventory(mut self, inventory: f64) -> Self {
        self.inventory = inventory;
        self
    }

    pub fn with_income(mut self, income: f64) -> Self {
        self.income = income;
        self
    }

    pub fn with_production(mut self, production: f64) -> Self {
        self.production = production;
        self
    }

    pub fn with_activation_tick(mut self, tick: Tick) -> Self {
        self.activation_tick = tick;
        self
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn inventory(&self) -> f64 {
        self.inventory
    }

    /// Cash accrued per active tick
    pub fn income(&self) -> f64 {
        self.income
    }

    /// Inventory accrued per active tick
    pub fn production(&self) -> f64 {
        self.production
    }

    pub fn activation_tick(&self) -> Tick {
        self.activation_tick
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn decisions(&self) -> &[DecisionLogEntry] {
        &self.log
    }

    pub fn last_decision(&self) -> Option<&DecisionLogEntry> {
        self.log.last()
    }

    /// Mark-to-market wealth: cash plus inventory valued at `price`.
    pub fn wealth(&self, price: Price) -> f64 {
        self.cash + price * self.inventory
    }

    /// Restart the random stream, e.g. after loading a persisted run.
    pub fn reseed(&mut self, run_seed: u64, tick: Tick) {
        self.rng = StdRng::seed_from_u64(agent_seed(run_seed, self.index, tick));
    }

    /// Passive accrual. Activation latches once `step` reaches the activation tick.
    pub fn tick(&mut self, step: Tick) {
        if step >= self.activation_tick {
            self.active = true;
        }
        if self.active {
            self.cash += self.income;
            self.inventory += self.production;
        }
    }

    /// Perceive, signal, size, log. Returns the order to submit this tick.
    pub fn decide(
        &mut self,
        window: &[MarketSnapshot],
        ctx: &DecisionContext<'_>,
    ) -> SimResult<Order> {
        let perceived = self.perceive(window)?;

        let holdings = Holdings {
            agent: self.id,
            cash: self.cash,
            inventory: self.inventory,
        };
        let intent = self
            .strategy
            .intent(&perceived, ctx, holdings, &mut self.rng)?;

        if intent.side != Side::Skip && !(intent.bid > 0.0) {
            return Err(SimError::InvalidBid {
                agent: self.id,
                bid: intent.bid,
            });
        }

        let order = match self.size(intent.side, intent.bid) {
            Some(quantity) => Order {
                agent_id: self.id,
                side: intent.side,
                quantity,
                bid: intent.bid,
            },
            None => Order::skip(self.id),
        };

        self.log.push(DecisionLogEntry {
            side: order.side,
            bid: order.bid,
        });

        Ok(order)
    }

    /// Each price is scaled by an independent N(1, (1 - confidence) / 6) draw.
    fn perceive(&mut self, window: &[MarketSnapshot]) -> SimResult<Vec<MarketSnapshot>> {
        let noise = Normal::new(1.0, (1.0 - self.confidence) / 6.0)
            .map_err(|e| SimError::Distribution(e.to_string()))?;

        Ok(window
            .iter()
            .map(|snapshot| MarketSnapshot {
                price: (snapshot.price * noise.sample(&mut self.rng)).max(MIN_PERCEIVED_PRICE),
                friction_profit: 0.0,
                ..*snapshot
            })
            .collect())
    }

    /// Resource-constrained quantity; `None` means the order collapses to Skip.
    fn size(&self, side: Side, bid: Price) -> Option<Quantity> {
        let raw = match side {
            Side::Buy => (self.confidence * self.cash / bid).floor(),
            Side::Sell => (self.confidence * self.inventory).floor(),
            Side::Skip => return None,
        };
        if raw.is_finite() && raw >= 1.0 {
            Some(raw as Quantity)
        } else {
            None
        }
    }

    pub fn apply_trade(&mut self, trade: &TradeResult) {
        let quantity = trade.quantity as f64;
        match trade.side {
            TradeSide::Buy => {
                self.inventory += quantity;
                self.cash -= trade.price * quantity;
            }
            TradeSide::Sell => {
                self.inventory -= quantity;
                self.cash += trade.price * quantity;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::BuyerState;
    use slotmap::SlotMap;

    fn make_agent(strategy: Strategy, confidence: f64) -> Agent {
        let mut keys: SlotMap<AgentId, ()> = SlotMap::with_key();
        let id = keys.insert(());
        Agent::new(id, 0, strategy, confidence, StdRng::seed_from_u64(17))
    }

    fn flat_window(price: Price, len: usize) -> Vec<MarketSnapshot> {
        (0..len)
            .map(|_| MarketSnapshot {
                price,
                sell_orders: 1,
                buy_orders: 1,
                volume: 1,
                friction_profit: 0.0,
            })
            .collect()
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(make_agent(Strategy::Random, 0.0).confidence(), CONFIDENCE_MIN);
        assert_eq!(make_agent(Strategy::Random, 2.0).confidence(), CONFIDENCE_MAX);
        assert_eq!(make_agent(Strategy::Random, 0.4).confidence(), 0.4);
    }

    #[test]
    fn balance_sheet_moves_only_through_accrual_and_trades() {
        let mut agent = make_agent(Strategy::Random, 0.5)
            .with_cash(50.0)
            .with_inventory(4.0)
            .with_income(5.0)
            .with_production(1.0)
            .with_activation_tick(2);
        assert_eq!((agent.cash(), agent.inventory()), (50.0, 4.0));
        assert_eq!((agent.income(), agent.production()), (5.0, 1.0));
        assert_eq!(agent.activation_tick(), 2);

        // Deciding reads the sheet but never writes it
        agent
            .decide(&flat_window(10.0, 5), &DecisionContext::default())
            .unwrap();
        assert_eq!((agent.cash(), agent.inventory()), (50.0, 4.0));

        agent.tick(2);
        agent.apply_trade(&TradeResult {
            side: TradeSide::Sell,
            quantity: 3,
            price: 10.0,
        });
        assert_eq!((agent.cash(), agent.inventory()), (85.0, 2.0));
    }

    #[test]
    fn accrual_waits_for_activation_then_latches() {
        let mut agent = make_agent(Strategy::Fundamentalist, 0.5)
            .with_income(10.0)
            .with_production(2.0)
            .with_activation_tick(3);

        agent.tick(0);
        agent.tick(2);
        assert!(!agent.is_active());
        assert_eq!(agent.cash, 0.0);

        agent.tick(3);
        agent.tick(4);
        assert!(agent.is_active());
        assert_eq!(agent.cash, 20.0);
        assert_eq!(agent.inventory, 4.0);
    }

    #[test]
    fn buy_sizing_floors_committed_cash() {
        // Long-term buyer buys at the (perceived) last price unless it sells out
        let mut agent = make_agent(Strategy::LongTermBuyer(BuyerState::Buying), 0.5)
            .with_cash(1_000.0)
            .with_inventory(0.0);
        let order = agent
            .decide(&flat_window(30.0, 1), &DecisionContext::default())
            .unwrap();

        assert_eq!(order.side, Side::Buy, "seeded buyer sold out on its first tick");
        let expected = (0.5 * 1_000.0 / order.bid).floor() as Quantity;
        assert_eq!(order.quantity, expected);
        assert!(order.quantity >= 1);
    }

    #[test]
    fn unaffordable_order_collapses_to_skip_and_is_logged() {
        let mut agent = make_agent(Strategy::LongTermBuyer(BuyerState::Buying), 0.5)
            .with_cash(1.0)
            .with_inventory(0.0);
        let order = agent
            .decide(&flat_window(500.0, 3), &DecisionContext::default())
            .unwrap();

        assert_eq!(order, Order::skip(agent.id));
        assert_eq!(
            agent.last_decision(),
            Some(&DecisionLogEntry {
                side: Side::Skip,
                bid: 0.0
            })
        );
    }

    #[test]
    fn sizing_invariant_holds_for_every_decision() {
        let mut agent = make_agent(Strategy::Random, 0.3)
            .with_cash(5_000.0)
            .with_inventory(7.0);
        let window = flat_window(100.0, 10);
        for _ in 0..200 {
            let order = agent.decide(&window, &DecisionContext::default()).unwrap();
            if order.quantity == 0 {
                assert_eq!(order.side, Side::Skip);
                assert_eq!(order.bid, 0.0);
            } else {
                assert_ne!(order.side, Side::Skip);
                assert!(order.bid > 0.0);
            }
        }
        assert_eq!(agent.decisions().len(), 200);
    }

    #[test]
    fn trades_move_cash_and_inventory() {
        let mut agent = make_agent(Strategy::Random, 0.5)
            .with_cash(100.0)
            .with_inventory(5.0);

        agent.apply_trade(&TradeResult {
            side: TradeSide::Buy,
            quantity: 2,
            price: 10.0,
        });
        assert_eq!((agent.cash, agent.inventory), (80.0, 7.0));

        agent.apply_trade(&TradeResult {
            side: TradeSide::Sell,
            quantity: 10,
            price: 7.5,
        });
        assert_eq!((agent.cash, agent.inventory), (155.0, -3.0));
        assert_eq!(agent.wealth(10.0), 125.0);
    }

    #[test]
    fn same_seed_same_decisions() {
        let window = flat_window(120.0, 10);
        let run = || {
            let mut agent = make_agent(Strategy::Fundamentalist, 0.6)
                .with_cash(10_000.0)
                .with_inventory(50.0);
            (0..20)
                .map(|_| agent.decide(&window, &DecisionContext::default()).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
