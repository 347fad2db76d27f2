pub mod clearing;
pub mod orders;
pub mod pricing;

pub use clearing::*;
pub use orders::*;
pub use pricing::*;

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::agents::Agent;
use crate::error::{SimError, SimResult};
use crate::history::{DemandSupply, MarketSnapshot};
use crate::types::{AgentId, Tick};
#[cfg(feature = "instrument")]
use crate::types::KeyToU64;

/// Trailing snapshots every agent perceives.
pub const HISTORY_WINDOW: usize = 10;

// ============================================================================
// Market - one commodity, one clearing per tick
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Market {
    pricing: PricingRule,
    solver: EquilibriumSolver,
    pending: Vec<Order>,
    history: Vec<MarketSnapshot>,
}

impl Market {
    pub fn new(pricing: PricingRule, solver: EquilibriumSolver) -> Self {
        Self {
            pricing,
            solver,
            pending: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn frictionless() -> Self {
        Self::new(PricingRule::Frictionless, EquilibriumSolver::Crossing)
    }

    pub fn with_friction(rate: f64) -> Self {
        let pricing = PricingRule::Friction { rate };
        Self::new(pricing, pricing.default_solver())
    }

    pub fn pricing(&self) -> PricingRule {
        self.pricing
    }

    pub fn solver(&self) -> EquilibriumSolver {
        self.solver
    }

    /// Drop last tick's book. History is untouched.
    pub fn reset_tick(&mut self) {
        self.pending.clear();
    }

    /// Queue an order for this tick's clearing.
    pub fn submit(&mut self, order: Order) -> SimResult<()> {
        if !order.is_skip() && !(order.bid > 0.0) {
            return Err(SimError::InvalidBid {
                agent: order.agent_id,
                bid: order.bid,
            });
        }
        self.pending.push(order);
        Ok(())
    }

    pub fn pending(&self) -> &[Order] {
        &self.pending
    }

    /// Up to `n` most recent snapshots, oldest first.
    pub fn recent_history(&self, n: usize) -> &[MarketSnapshot] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    pub fn history(&self) -> &[MarketSnapshot] {
        &self.history
    }

    pub fn last_snapshot(&self) -> Option<&MarketSnapshot> {
        self.history.last()
    }

    /// Discover the equilibrium price, match the book, apply every trade to its
    /// agent and append the tick's snapshot.
    #[allow(unused_variables)]
    pub fn clear(
        &mut self,
        tick: Tick,
        agents: &mut SlotMap<AgentId, Agent>,
    ) -> SimResult<MarketSnapshot> {
        let price = equilibrium_price(&self.pending, &self.pricing, self.solver)?;
        let outcome = match_orders(&self.pending, price, &self.pricing);

        // Resolve every counterparty before touching any of them
        if let Some((missing, _)) = outcome.trades.iter().find(|(id, _)| !agents.contains_key(*id)) {
            return Err(SimError::UnknownAgent(*missing));
        }

        for (agent_id, trade) in &outcome.trades {
            let agent = agents
                .get_mut(*agent_id)
                .ok_or(SimError::UnknownAgent(*agent_id))?;
            agent.apply_trade(trade);

            #[cfg(feature = "instrument")]
            tracing::info!(
                target: "trade",
                tick = tick,
                agent_id = agent_id.to_u64(),
                side = trade.side.as_str(),
                quantity = trade.quantity,
                price = trade.price,
            );
        }

        let (buy_orders, sell_orders) =
            self.pending
                .iter()
                .fold((0u32, 0u32), |(b, s), o| match o.side {
                    Side::Buy => (b + 1, s),
                    Side::Sell => (b, s + 1),
                    Side::Skip => (b, s),
                });

        let snapshot = MarketSnapshot {
            price,
            sell_orders,
            buy_orders,
            volume: outcome.volume,
            friction_profit: outcome.friction_profit,
        };
        self.history.push(snapshot);

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "tick",
            tick = tick,
            price = snapshot.price,
            volume = snapshot.volume,
            buy_orders = snapshot.buy_orders as u64,
            sell_orders = snapshot.sell_orders as u64,
            friction_profit = snapshot.friction_profit,
        );

        Ok(snapshot)
    }

    /// Cumulative curves over the book submitted this tick.
    pub fn demand_supply_curves(&self) -> DemandSupply {
        demand_supply_curves(&self.pending)
    }
}
