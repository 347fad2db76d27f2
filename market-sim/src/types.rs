use std::fmt;

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use tsify_next::Tsify;

// ============================================================================
// IDs - Using slotmap for generational indices
// ============================================================================

new_key_type! {
    pub struct AgentId;
}

/// Trait for converting SlotMap keys to u64 for WASM boundary and trace output
pub trait KeyToU64 {
    fn to_u64(self) -> u64;
}

impl KeyToU64 for AgentId {
    fn to_u64(self) -> u64 {
        self.0.as_ffi()
    }
}

// ============================================================================
// Units
// ============================================================================

pub type Price = f64;
/// Whole units of the commodity. Sizing always floors, so orders and trades are integral.
pub type Quantity = u64;
pub type Tick = u64;

/// Clearing prices never drop below this.
pub const PRICE_FLOOR: Price = 1.0;

// ============================================================================
// Strategy groups - wealth is aggregated per group
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Tsify,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum StrategyKind {
    Fundamentalist,
    Contrarian,
    TechnicalAnalyst,
    Random,
    LongTermBuyer,
    Copycat,
    Verification,
}

impl StrategyKind {
    /// All groups, in population-generation order.
    pub const ALL: [StrategyKind; 7] = [
        StrategyKind::Fundamentalist,
        StrategyKind::Contrarian,
        StrategyKind::TechnicalAnalyst,
        StrategyKind::Random,
        StrategyKind::LongTermBuyer,
        StrategyKind::Copycat,
        StrategyKind::Verification,
    ];

    /// Human-readable group label used in reports
    pub fn label(&self) -> &'static str {
        match self {
            StrategyKind::Fundamentalist => "Fundamentalist",
            StrategyKind::Contrarian => "Contrarian",
            StrategyKind::TechnicalAnalyst => "Technical",
            StrategyKind::Random => "Random",
            StrategyKind::LongTermBuyer => "Long Term Buyer",
            StrategyKind::Copycat => "Copycat",
            StrategyKind::Verification => "Verification and Validation",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
