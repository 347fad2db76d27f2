use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::types::{AgentId, Price, Quantity};

// === ORDERS & TRADES ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum Side {
    Buy,
    Sell,
    Skip,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
            Side::Skip => "skip",
        }
    }
}

/// Market-facing order for the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub agent_id: AgentId,
    pub side: Side,
    pub quantity: Quantity,
    pub bid: Price,
}

impl Order {
    pub fn buy(agent_id: AgentId, quantity: Quantity, bid: Price) -> Self {
        Self {
            agent_id,
            side: Side::Buy,
            quantity,
            bid,
        }
    }

    pub fn sell(agent_id: AgentId, quantity: Quantity, bid: Price) -> Self {
        Self {
            agent_id,
            side: Side::Sell,
            quantity,
            bid,
        }
    }

    pub fn skip(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            side: Side::Skip,
            quantity: 0,
            bid: 0.0,
        }
    }

    pub fn is_skip(&self) -> bool {
        self.side == Side::Skip
    }
}

/// Side of an executed trade; skipped orders never execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

/// Agent-facing result of a match, consumed once by `Agent::apply_trade`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeResult {
    pub side: TradeSide,
    pub quantity: Quantity,
    pub price: Price,
}
