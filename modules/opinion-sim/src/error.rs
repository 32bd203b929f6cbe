use ai_client::AiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("No demographic distribution for attribute '{attribute}'")]
    MissingDistribution { attribute: String },

    #[error("Distribution for attribute '{attribute}' has no positive weight")]
    EmptyDistribution { attribute: String },

    #[error("Agent {agent_id}: unusable response after {attempts} attempts: {reason}")]
    GenerationParseFailure {
        agent_id: u32,
        attempts: u32,
        reason: String,
    },

    #[error("Agent {agent_id}: backend call failed after {attempts} attempts: {reason}")]
    GenerationTransportFailure {
        agent_id: u32,
        attempts: u32,
        reason: String,
    },

    #[error("Population query '{what}' failed: {source}")]
    PopulationQuery {
        what: String,
        #[source]
        source: AiError,
    },

    #[error("{what} distribution sums to {sum}, expected 1")]
    InvalidDistribution { what: String, sum: f64 },

    #[error("Metrics input mismatch: {0}")]
    MetricsInputMismatch(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T, E = SimError> = std::result::Result<T, E>;
