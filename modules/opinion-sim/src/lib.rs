//! Simulates how a synthetic population reacts to a policy proposal.
//!
//! Agents are sampled from a demographic profile, each agent's stance is drawn
//! from a text-generation backend, and the outcome is aggregated and scored
//! against ground truth.

pub mod agent;
pub mod aggregate;
pub mod config;
pub mod demographics;
pub mod error;
pub mod generator;
pub mod metrics;
pub mod pipeline;
pub mod population;
pub mod prompt;
pub mod proposal;
pub mod reasons;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use agent::{
    Agent, AgentOpinion, Attribute, Demographics, FailureKind, GenerationFailure, Location,
    Opinion, OpinionResponse,
};
pub use aggregate::{
    aggregate, EvaluationResult, GenerationStats, KeyThemes, OpinionPercentages, OpinionSummary,
};
pub use config::{FailurePolicy, SimConfig, SimulationMode};
pub use demographics::{place_agents, DemographicProfile, Sampler};
pub use error::{Result, SimError};
pub use generator::{parse_opinion_response, GenerationBatch, OpinionGenerator};
pub use metrics::{
    DistanceMetrics, Distribution, GroundTruth, Metrics, MetricsEngine, OpinionScale, ParticipantTruth,
};
pub use pipeline::{ProposalOutcome, Simulation};
pub use population::{PopulationEstimate, PopulationEstimator};
pub use proposal::{GeoBounds, Proposal, ZoningCell};
pub use reasons::{ReasonCatalog, ReasonDictionary};
