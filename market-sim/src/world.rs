// World state for the market simulation: roster, market, ranking and run history

use std::collections::{BTreeMap, BTreeSet};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::agents::{Agent, AgentSpec, DecisionContext, Strategy, agent_seed, generate_population};
use crate::config::{DEFAULT_BEST_AGENTS, RunConfig};
use crate::error::{SimError, SimResult};
use crate::history::{AgentSnapshot, DecisionLogEntry, RunSnapshot};
use crate::market::{HISTORY_WINDOW, Market};
use crate::types::{AgentId, KeyToU64, Price, PRICE_FLOOR, StrategyKind, Tick};

/// Complete state of one simulation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct World {
    seed: u64,
    /// Ticks completed so far; also the step index of the next tick
    tick: Tick,
    agents: SlotMap<AgentId, Agent>,
    /// Descending wealth, copycats always at the bottom
    ranking: Vec<AgentId>,
    market: Market,
    history: Vec<RunSnapshot>,
    snapshot_ticks: BTreeSet<Tick>,
    best_agents: usize,
    next_index: u32,
}

impl World {
    pub fn new(seed: u64, market: Market) -> Self {
        Self {
            seed,
            tick: 0,
            agents: SlotMap::with_key(),
            ranking: Vec::new(),
            market,
            history: Vec::new(),
            snapshot_ticks: BTreeSet::new(),
            best_agents: DEFAULT_BEST_AGENTS,
            next_index: 0,
        }
    }

    /// Validate the configuration and generate the population from the run seed.
    pub fn from_config(config: &RunConfig) -> SimResult<Self> {
        config.validate()?;

        let mut world = Self::new(config.seed, config.market.build())
            .with_best_agents(config.best_agents)
            .with_snapshot_ticks(config.snapshots_in.iter().copied());

        let mut population_rng = StdRng::seed_from_u64(config.seed);
        for spec in generate_population(config, &mut population_rng)? {
            world.add_agent(spec);
        }

        Ok(world)
    }

    pub fn with_best_agents(mut self, best_agents: usize) -> Self {
        self.best_agents = best_agents;
        self
    }

    pub fn with_snapshot_ticks(mut self, ticks: impl IntoIterator<Item = Tick>) -> Self {
        self.snapshot_ticks = ticks.into_iter().collect();
        self
    }

    // === Agent Management ===

    /// Add an agent; it joins the ranking at the bottom of its tier.
    pub fn add_agent(&mut self, spec: AgentSpec) -> AgentId {
        let index = self.next_index;
        self.next_index += 1;

        let rng = StdRng::seed_from_u64(agent_seed(self.seed, index, 0));
        let id = self.agents.insert_with_key(|id| {
            Agent::new(id, index, Strategy::for_kind(spec.kind), spec.confidence, rng)
                .with_cash(spec.cash)
                .with_inventory(spec.inventory)
                .with_income(spec.income)
                .with_production(spec.production)
                .with_activation_tick(spec.activation_tick)
        });

        if spec.kind == StrategyKind::Copycat {
            self.ranking.push(id);
        } else {
            let first_copycat = self
                .ranking
                .iter()
                .position(|id| self.agents[*id].strategy().is_copycat())
                .unwrap_or(self.ranking.len());
            self.ranking.insert(first_copycat, id);
        }

        id
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn agents(&self) -> &SlotMap<AgentId, Agent> {
        &self.agents
    }

    // === Accessors ===

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    pub fn ranking(&self) -> &[AgentId] {
        &self.ranking
    }

    pub fn history(&self) -> &[RunSnapshot] {
        &self.history
    }

    /// Last clearing price, or the floor before the first clearing.
    pub fn price(&self) -> Price {
        self.market
            .last_snapshot()
            .map_or(PRICE_FLOOR, |snapshot| snapshot.price)
    }

    /// The imitation pool: the top non-copycat agents of the current ranking.
    pub fn best_agents(&self) -> Vec<AgentId> {
        self.ranking
            .iter()
            .copied()
            .filter(|id| !self.agents[*id].strategy().is_copycat())
            .take(self.best_agents)
            .collect()
    }

    pub fn total_friction_profit(&self) -> f64 {
        self.history.iter().map(|s| s.friction_profit).sum()
    }

    /// Roster in ranking order.
    pub fn roster(&self) -> Vec<AgentSnapshot> {
        let price = self.price();
        self.ranking
            .iter()
            .map(|id| {
                let agent = &self.agents[*id];
                AgentSnapshot {
                    id: id.to_u64(),
                    strategy: agent.strategy().kind(),
                    confidence: agent.confidence(),
                    cash: agent.cash(),
                    inventory: agent.inventory(),
                    wealth: agent.wealth(price),
                    active: agent.is_active(),
                    activation_tick: agent.activation_tick(),
                }
            })
            .collect()
    }

    // === Simulation Tick ===

    /// Run one tick.
    ///
    /// Tick phases:
    /// 0. Market reset
    /// 1. Accrual - income and production for active agents
    /// 2. Decisions - active agents in ranking order, copycats last
    /// 3. Clearing - price discovery, matching, trade application
    /// 4. Ranking by mark-to-market wealth
    /// 5. Recording - per-group wealth and optional curves
    pub fn run_tick(&mut self) -> SimResult<&RunSnapshot> {
        let step = self.tick;

        // === 0. RESET ===
        self.market.reset_tick();

        // === 1. ACCRUAL ===
        for agent in self.agents.values_mut() {
            agent.tick(step);
        }

        // === 2. DECISIONS ===
        let window = self.market.recent_history(HISTORY_WINDOW).to_vec();
        let mut pool: Option<Vec<Option<DecisionLogEntry>>> = None;

        for id in self.ranking.clone() {
            let agent = self.agents.get(id).ok_or(SimError::UnknownAgent(id))?;
            if !agent.is_active() {
                continue;
            }

            // Copycats rank last, so every prophet has already decided this tick
            if agent.strategy().is_copycat() && pool.is_none() {
                pool = Some(
                    self.best_agents()
                        .into_iter()
                        .map(|prophet| self.agents[prophet].last_decision().copied())
                        .collect(),
                );
            }
            let ctx = DecisionContext::new(pool.as_deref().unwrap_or_default());

            let agent = self.agents.get_mut(id).ok_or(SimError::UnknownAgent(id))?;
            let order = agent.decide(&window, &ctx)?;

            #[cfg(feature = "instrument")]
            tracing::info!(
                target: "order",
                tick = step,
                agent_id = id.to_u64(),
                strategy = agent.strategy().kind().label(),
                side = order.side.as_str(),
                quantity = order.quantity,
                bid = order.bid,
            );

            self.market.submit(order)?;
        }

        // === 3. CLEARING ===
        let snapshot = self.market.clear(step, &mut self.agents)?;

        // === 4. RANKING ===
        self.rank(snapshot.price);

        // === 5. RECORDING ===
        let curves = self
            .snapshot_ticks
            .contains(&step)
            .then(|| self.market.demand_supply_curves());

        let index = self.history.len();
        self.history.push(RunSnapshot {
            tick: step,
            volume: snapshot.volume,
            buy_orders: snapshot.buy_orders,
            sell_orders: snapshot.sell_orders,
            price: snapshot.price,
            wealth: self.group_wealth(snapshot.price),
            friction_profit: snapshot.friction_profit,
            curves,
        });
        self.tick += 1;

        Ok(&self.history[index])
    }

    /// Run `ticks` ticks, stopping at the first error.
    pub fn run(&mut self, ticks: Tick) -> SimResult<()> {
        for _ in 0..ticks {
            self.run_tick()?;
        }
        Ok(())
    }

    /// Stable sort by descending wealth; copycats are forced below everyone else.
    fn rank(&mut self, price: Price) {
        let agents = &self.agents;
        self.ranking.sort_by(|a, b| {
            let (a, b) = (&agents[*a], &agents[*b]);
            a.strategy()
                .is_copycat()
                .cmp(&b.strategy().is_copycat())
                .then_with(|| b.wealth(price).total_cmp(&a.wealth(price)))
        });
    }

    /// Wealth of active agents per group; every group in the roster gets an entry.
    fn group_wealth(&self, price: Price) -> BTreeMap<StrategyKind, f64> {
        let mut wealth = BTreeMap::new();
        for agent in self.agents.values() {
            let total = wealth.entry(agent.strategy().kind()).or_insert(0.0);
            if agent.is_active() {
                *total += agent.wealth(price);
            }
        }
        wealth
    }

    // === Persistence ===

    pub fn to_json(&self) -> SimResult<String> {
        serde_json::to_string(self).map_err(|e| SimError::Serialization(e.to_string()))
    }

    /// Restore a run. Agent random streams restart from the run seed and the
    /// current tick, so the continuation is deterministic but not bit-identical.
    pub fn from_json(json: &str) -> SimResult<Self> {
        let mut world: World =
            serde_json::from_str(json).map_err(|e| SimError::Serialization(e.to_string()))?;
        let (seed, tick) = (world.seed, world.tick);
        for agent in world.agents.values_mut() {
            agent.reseed(seed, tick);
        }
        Ok(world)
    }
}
