use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;

use crate::market::Side;
use crate::types::{Price, Quantity, StrategyKind, Tick};

// ============================================================================
// Market history - one entry per cleared tick
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct MarketSnapshot {
    pub price: Price,
    /// Submitted sell orders, matched or not
    pub sell_orders: u32,
    /// Submitted buy orders, matched or not
    pub buy_orders: u32,
    pub volume: Quantity,
    /// Spread captured by the market under friction; zero when frictionless
    pub friction_profit: f64,
}

// ============================================================================
// Agent decision log
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub side: Side,
    pub bid: Price,
}

// ============================================================================
// Run history - what the reporting layer consumes
// ============================================================================

/// A point on a cumulative demand or supply curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Tsify)]
pub struct CurvePoint {
    pub bid: Price,
    pub cumulative: Quantity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Tsify)]
pub struct DemandSupply {
    /// Buy orders by descending bid
    pub demand: Vec<CurvePoint>,
    /// Sell orders by ascending bid
    pub supply: Vec<CurvePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct RunSnapshot {
    pub tick: Tick,
    pub volume: Quantity,
    pub buy_orders: u32,
    pub sell_orders: u32,
    pub price: Price,
    /// Mark-to-market wealth of active agents, per strategy group
    pub wealth: BTreeMap<StrategyKind, f64>,
    pub friction_profit: f64,
    /// Only populated on configured snapshot ticks
    pub curves: Option<DemandSupply>,
}

impl RunSnapshot {
    pub fn total_wealth(&self) -> f64 {
        self.wealth.values().sum()
    }
}

// ============================================================================
// Roster snapshot - agent view for the front end and reports
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct AgentSnapshot {
    pub id: u64,
    pub strategy: StrategyKind,
    pub confidence: f64,
    pub cash: f64,
    pub inventory: f64,
    /// Mark-to-market at the last clearing price
    pub wealth: f64,
    pub active: bool,
    pub activation_tick: Tick,
}
