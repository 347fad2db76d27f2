// Run configuration: population mix, agent economics, market rules

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::market::{EquilibriumSolver, Market, PricingRule};
use crate::types::{StrategyKind, Tick};

/// Size of the imitation pool copycats draw from.
pub const DEFAULT_BEST_AGENTS: usize = 10;

// ============================================================================
// Group shares - fraction of each agent cohort per strategy
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupShares {
    pub fundamentalist: f64,
    pub contrarian: f64,
    pub technical_analyst: f64,
    pub random: f64,
    pub long_term_buyer: f64,
    pub copycat: f64,
    pub verification: f64,
}

impl GroupShares {
    pub fn share(&self, kind: StrategyKind) -> f64 {
        match kind {
            StrategyKind::Fundamentalist => self.fundamentalist,
            StrategyKind::Contrarian => self.contrarian,
            StrategyKind::TechnicalAnalyst => self.technical_analyst,
            StrategyKind::Random => self.random,
            StrategyKind::LongTermBuyer => self.long_term_buyer,
            StrategyKind::Copycat => self.copycat,
            StrategyKind::Verification => self.verification,
        }
    }

    /// Agents of `kind` in a cohort of `cohort` agents; truncates.
    pub fn count(&self, kind: StrategyKind, cohort: u32) -> u32 {
        (f64::from(cohort) * self.share(kind)) as u32
    }
}

// ============================================================================
// Agent economics
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub production_average: f64,
    pub production_std: f64,
    /// Chance (0-100) that an agent produces at all
    pub producers_percentage: f64,
    /// Gamma shape for per-tick income
    pub income_alpha: f64,
    /// Gamma scale for per-tick income
    pub income_beta: f64,
    pub initial_inventory: f64,
    pub initial_cash: f64,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            production_average: 1000.0,
            production_std: 200.0,
            producers_percentage: 20.0,
            income_alpha: 4.0,
            income_beta: 1500.0,
            initial_inventory: 0.0,
            initial_cash: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// `None` runs the frictionless market
    pub friction_rate: Option<f64>,
}

impl MarketConfig {
    pub fn pricing(&self) -> PricingRule {
        match self.friction_rate {
            Some(rate) => PricingRule::Friction { rate },
            None => PricingRule::Frictionless,
        }
    }

    pub fn build(&self) -> Market {
        let pricing = self.pricing();
        let solver: EquilibriumSolver = pricing.default_solver();
        Market::new(pricing, solver)
    }
}

// ============================================================================
// RunConfig
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub seed: u64,
    pub ticks: Tick,
    /// Active from tick 0
    pub initial_agents: u32,
    /// Arrive later, after exponentially distributed waits
    pub new_agents: u32,
    /// Arrival rate of new agents per tick
    pub average_time_to_add_agents: f64,
    pub shares: GroupShares,
    pub agents_config: AgentsConfig,
    pub market: MarketConfig,
    /// Ticks whose demand/supply curves are captured
    pub snapshots_in: Vec<Tick>,
    pub best_agents: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            ticks: 100,
            initial_agents: 0,
            new_agents: 0,
            average_time_to_add_agents: 0.0001,
            shares: GroupShares::default(),
            agents_config: AgentsConfig::default(),
            market: MarketConfig::default(),
            snapshots_in: Vec::new(),
            best_agents: DEFAULT_BEST_AGENTS,
        }
    }
}

impl RunConfig {
    pub fn from_json(json: &str) -> SimResult<Self> {
        let config: RunConfig =
            serde_json::from_str(json).map_err(|e| SimError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> SimResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SimError::Serialization(e.to_string()))
    }

    pub fn validate(&self) -> SimResult<()> {
        let invalid = |msg: String| Err(SimError::InvalidConfig(msg));

        for kind in StrategyKind::ALL {
            let share = self.shares.share(kind);
            if !(share.is_finite() && share >= 0.0) {
                return invalid(format!("share for {kind} must be >= 0, got {share}"));
            }
        }

        if let Some(rate) = self.market.friction_rate {
            if !(0.0..1.0).contains(&rate) {
                return invalid(format!("friction rate must be in [0, 1), got {rate}"));
            }
        }

        if self.new_agents > 0
            && !(self.average_time_to_add_agents.is_finite() && self.average_time_to_add_agents > 0.0)
        {
            return invalid(format!(
                "average_time_to_add_agents must be > 0 when new agents arrive, got {}",
                self.average_time_to_add_agents
            ));
        }

        let agents = &self.agents_config;
        if !(agents.production_std.is_finite() && agents.production_std >= 0.0) {
            return invalid(format!(
                "production std must be >= 0, got {}",
                agents.production_std
            ));
        }
        if !(0.0..=100.0).contains(&agents.producers_percentage) {
            return invalid(format!(
                "producers percentage must be in [0, 100], got {}",
                agents.producers_percentage
            ));
        }
        if agents.income_alpha < 0.0 || agents.income_beta < 0.0 {
            return invalid(format!(
                "income gamma parameters must be >= 0, got alpha {} beta {}",
                agents.income_alpha, agents.income_beta
            ));
        }

        Ok(())
    }

    /// Agent population of a single run, before late arrivals are counted.
    pub fn cohort_size(&self) -> u32 {
        StrategyKind::ALL
            .iter()
            .map(|&kind| {
                self.shares.count(kind, self.initial_agents) + self.shares.count(kind, self.new_agents)
            })
            .sum()
    }

    // === Presets ===

    /// Mixed-strategy population on a friction market, as used by the friction sweep.
    pub fn friction_report(friction_rate: f64) -> Self {
        let ticks: Tick = 400;
        let step = ticks.div_ceil(5);
        let mut snapshots_in: Vec<Tick> = (0..ticks).step_by(step as usize).collect();
        snapshots_in.push(ticks - 1);

        Self {
            ticks,
            initial_agents: 25,
            new_agents: 100,
            average_time_to_add_agents: 0.5,
            shares: GroupShares {
                fundamentalist: 0.1681,
                contrarian: 0.0560,
                technical_analyst: 0.2371,
                random: 0.0388,
                long_term_buyer: 0.3017,
                copycat: 0.1983,
                verification: 0.0,
            },
            agents_config: AgentsConfig {
                production_average: 3000.0,
                production_std: 200.0,
                producers_percentage: 20.0,
                income_alpha: 10.0,
                income_beta: 1500.0,
                initial_inventory: 1000.0,
                initial_cash: 1000.0,
            },
            market: MarketConfig {
                friction_rate: Some(friction_rate),
            },
            snapshots_in,
            ..Self::default()
        }
    }

    /// Calibration population of verification traders with fixed endowments.
    pub fn verification() -> Self {
        let ticks: Tick = 500;
        Self {
            ticks,
            initial_agents: 300,
            shares: GroupShares {
                verification: 1.0,
                ..GroupShares::default()
            },
            agents_config: AgentsConfig {
                producers_percentage: 0.0,
                income_beta: 0.0,
                initial_inventory: 1000.0,
                initial_cash: 20_000.0,
                ..AgentsConfig::default()
            },
            snapshots_in: vec![0, ticks / 2, ticks - 1],
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_ticks(mut self, ticks: Tick) -> Self {
        self.ticks = ticks;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_validate() {
        assert!(RunConfig::default().validate().is_ok());
        assert!(RunConfig::friction_report(0.1).validate().is_ok());
        assert!(RunConfig::verification().validate().is_ok());
    }

    #[test]
    fn friction_report_snapshot_ticks() {
        let config = RunConfig::friction_report(0.0);
        assert_eq!(config.snapshots_in, vec![0, 80, 160, 240, 320, 399]);
        assert_eq!(config.best_agents, DEFAULT_BEST_AGENTS);
    }

    #[test]
    fn group_counts_truncate() {
        let config = RunConfig::friction_report(0.0);
        // 25 * 0.1681 = 4.2, 100 * 0.1681 = 16.81
        assert_eq!(config.shares.count(StrategyKind::Fundamentalist, 25), 4);
        assert_eq!(config.shares.count(StrategyKind::Fundamentalist, 100), 16);
        assert_eq!(config.shares.count(StrategyKind::Verification, 100), 0);
        assert_eq!(RunConfig::verification().cohort_size(), 300);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let bad_friction = RunConfig::friction_report(1.0);
        assert!(matches!(
            bad_friction.validate(),
            Err(SimError::InvalidConfig(_))
        ));

        let mut negative_share = RunConfig::default();
        negative_share.shares.random = -0.1;
        assert!(matches!(
            negative_share.validate(),
            Err(SimError::InvalidConfig(_))
        ));

        let mut no_arrivals = RunConfig::default();
        no_arrivals.new_agents = 5;
        no_arrivals.average_time_to_add_agents = 0.0;
        assert!(matches!(
            no_arrivals.validate(),
            Err(SimError::InvalidConfig(_))
        ));
    }

    #[test]
    fn json_round_trip_and_partial_input() {
        let config = RunConfig::friction_report(0.2).with_seed(9);
        let parsed = RunConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);

        // Missing fields fall back to defaults
        let partial = RunConfig::from_json(r#"{"seed": 3, "shares": {"random": 1.0}}"#).unwrap();
        assert_eq!(partial.seed, 3);
        assert_eq!(partial.shares.random, 1.0);
        assert_eq!(partial.agents_config, AgentsConfig::default());

        assert!(matches!(
            RunConfig::from_json("{not json"),
            Err(SimError::InvalidConfig(_))
        ));
    }
}
