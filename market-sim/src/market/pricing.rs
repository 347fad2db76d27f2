use serde::{Deserialize, Serialize};

use crate::types::Price;

// === PRICE FUNCTIONS ===

/// What each side of a trade actually pays or receives at a clearing price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum PricingRule {
    #[default]
    Frictionless,
    /// Buyers pay the clearing price; sellers receive `price * (1 - rate)`.
    /// The difference accrues to the market as friction profit.
    Friction { rate: f64 },
}

impl PricingRule {
    pub fn buyer_price(&self, price: Price) -> Price {
        price
    }

    pub fn seller_price(&self, price: Price) -> Price {
        match self {
            PricingRule::Frictionless => price,
            PricingRule::Friction { rate } => price * (1.0 - rate),
        }
    }

    /// Solver that matches this rule: the closed-form crossing only holds when
    /// both sides see the same price.
    pub fn default_solver(&self) -> EquilibriumSolver {
        match self {
            PricingRule::Frictionless => EquilibriumSolver::Crossing,
            PricingRule::Friction { .. } => EquilibriumSolver::Bisection,
        }
    }
}

// === EQUILIBRIUM SOLVERS ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EquilibriumSolver {
    /// Walk the merged order sequence; the order that last raised the matched
    /// quantity sets the price.
    #[default]
    Crossing,
    /// Bisection over price until supply and demand meet.
    Bisection,
}
