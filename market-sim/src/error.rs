use thiserror::Error;

use crate::types::{AgentId, Price};

/// Fatal conditions that abort a run. A tick either completes or returns one of these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("agent {agent:?} produced a non-skip order with bid {bid}")]
    InvalidBid { agent: AgentId, bid: Price },

    #[error("agent {agent:?} is in an invalid state: {reason}")]
    InvalidAgentState { agent: AgentId, reason: String },

    #[error("unknown agent {0:?}")]
    UnknownAgent(AgentId),

    #[error("friction bisection did not converge after {iterations} iterations (bracket [{low}, {high}])")]
    FrictionNoConvergence {
        low: Price,
        high: Price,
        iterations: u32,
    },

    #[error("invalid distribution parameters: {0}")]
    Distribution(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("state serialization failed: {0}")]
    Serialization(String),
}

pub type SimResult<T> = std::result::Result<T, SimError>;
