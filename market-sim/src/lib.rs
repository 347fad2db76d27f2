use wasm_bindgen::prelude::*;

pub mod agents;
pub mod analysis;
pub mod config;
pub mod error;
pub mod history;
pub mod market;
pub mod types;
pub mod world;

pub use agents::{Agent, AgentSpec, BuyerState, DecisionContext, Strategy, generate_population};
pub use config::{AgentsConfig, GroupShares, MarketConfig, RunConfig};
pub use error::{SimError, SimResult};
pub use history::*;
pub use market::{
    EquilibriumSolver, Market, MatchOutcome, Order, PricingRule, Side, TradeResult, TradeSide,
};
pub use types::*;
pub use world::World;

#[cfg(feature = "instrument")]
pub use instrument;

// ============================================================================
// WASM API - Simulation
// ============================================================================

#[wasm_bindgen]
pub struct Simulation {
    world: World,
    /// Ticks a full `run_configured` call advances to
    ticks: Tick,
}

#[wasm_bindgen]
impl Simulation {
    /// Build a run from a JSON `RunConfig`
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str) -> Result<Simulation, JsError> {
        // Better panic messages in browser console
        console_error_panic_hook::set_once();

        let config = RunConfig::from_json(config_json)?;
        Ok(Self {
            world: World::from_config(&config)?,
            ticks: config.ticks,
        })
    }

    /// Restore a run exported with `export_state`
    #[wasm_bindgen]
    pub fn import_state(state_json: &str, ticks: u64) -> Result<Simulation, JsError> {
        console_error_panic_hook::set_once();

        Ok(Self {
            world: World::from_json(state_json)?,
            ticks,
        })
    }

    /// Advance the simulation by one tick and return its record
    #[wasm_bindgen]
    pub fn advance_tick(&mut self) -> Result<RunSnapshot, JsError> {
        Ok(self.world.run_tick()?.clone())
    }

    /// Advance `ticks` ticks
    #[wasm_bindgen]
    pub fn run(&mut self, ticks: u64) -> Result<(), JsError> {
        Ok(self.world.run(ticks)?)
    }

    /// Advance to the configured run length
    #[wasm_bindgen]
    pub fn run_configured(&mut self) -> Result<(), JsError> {
        let remaining = self.ticks.saturating_sub(self.world.tick());
        Ok(self.world.run(remaining)?)
    }

    /// Get the current tick
    #[wasm_bindgen]
    pub fn get_tick(&self) -> u64 {
        self.world.tick()
    }

    /// Last clearing price
    #[wasm_bindgen]
    pub fn get_price(&self) -> f64 {
        self.world.price()
    }

    /// Every `RunSnapshot` recorded so far
    #[wasm_bindgen]
    pub fn get_history(&self) -> Result<JsValue, JsError> {
        serde_wasm_bindgen::to_value(self.world.history()).map_err(|e| JsError::new(&e.to_string()))
    }

    /// Roster in ranking order
    #[wasm_bindgen]
    pub fn get_agents(&self) -> Result<JsValue, JsError> {
        serde_wasm_bindgen::to_value(&self.world.roster()).map_err(|e| JsError::new(&e.to_string()))
    }

    /// Total friction profit captured by the market so far
    #[wasm_bindgen]
    pub fn get_friction_profit(&self) -> f64 {
        self.world.total_friction_profit()
    }

    /// Serialize the whole run to JSON
    #[wasm_bindgen]
    pub fn export_state(&self) -> Result<String, JsError> {
        Ok(self.world.to_json()?)
    }
}

impl Simulation {
    pub fn world(&self) -> &World {
        &self.world
    }
}
