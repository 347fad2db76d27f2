pub mod agent;
pub mod population;
pub mod strategy;

pub use agent::*;
pub use population::*;
pub use strategy::*;
