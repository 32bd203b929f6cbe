//! One proposal through sampling, generation, aggregation and scoring.

use std::sync::Arc;

use ai_client::TextGenerator;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use crate::agent::{Agent, Attribute};
use crate::aggregate::{aggregate, EvaluationResult};
use crate::config::{SimConfig, SimulationMode};
use crate::demographics::{place_agents, DemographicProfile, Sampler};
use crate::error::Result;
use crate::generator::OpinionGenerator;
use crate::metrics::{GroundTruth, Metrics, MetricsEngine};
use crate::population::{PopulationEstimate, PopulationEstimator};
use crate::proposal::Proposal;
use crate::reasons::{ReasonCatalog, ReasonDictionary};

/// Everything produced for one proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalOutcome {
    pub result: EvaluationResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population_estimate: Option<PopulationEstimate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
    /// Why metrics are missing despite ground truth being supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_error: Option<String>,
}

/// The simulation core. Holds the shared backend and settings; each call to
/// [`Simulation::run`] is independent of every other.
#[derive(Clone, TypedBuilder)]
pub struct Simulation {
    backend: Arc<dyn TextGenerator>,
    #[builder(default)]
    config: SimConfig,
    /// Reason codes offered to individual agents.
    #[builder(default)]
    reasons: ReasonCatalog,
    /// Reason lists for the population-level queries.
    #[builder(default)]
    population_reasons: ReasonDictionary,
    #[builder(default = Attribute::ALL.to_vec())]
    attributes: Vec<Attribute>,
}

impl Simulation {
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Seeded runs draw the same agents for every proposal.
    fn rng(&self) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    pub fn sample_agents(&self, proposal: &Proposal, profile: &DemographicProfile) -> Result<Vec<Agent>> {
        let sampler = Sampler::new(profile, &self.attributes)?;
        let mut rng = self.rng();
        let demographics = sampler.sample(self.config.population as usize, &mut rng);
        Ok(place_agents(demographics, proposal, &mut rng))
    }

    pub async fn run(
        &self,
        proposal: &Proposal,
        profile: &DemographicProfile,
        ground_truth: Option<&GroundTruth>,
    ) -> Result<ProposalOutcome> {
        self.config.validate()?;
        let description = proposal.describe();

        let (result, population_estimate) = match self.config.mode {
            SimulationMode::PerAgent => {
                let agents = self.sample_agents(proposal, profile)?;
                let generator = OpinionGenerator::new(self.backend.clone(), &self.config, self.reasons.clone());
                let batch = generator
                    .generate_batch(&agents, &profile.region, &description)
                    .await?;
                (aggregate(batch.opinions), None)
            }
            SimulationMode::Population => {
                let estimator = PopulationEstimator::new(self.backend.clone(), self.population_reasons.clone());
                let estimate = estimator
                    .estimate(profile, &description, self.config.population as usize)
                    .await?;
                (estimate.clone().into_result(), Some(estimate))
            }
        };

        let result = result.with_metadata(serde_json::json!({
            "region": profile.region,
            "backend": self.backend.name(),
            "mode": self.config.mode,
            "seed": self.config.seed,
        }));
        info!(
            region = %profile.region,
            support = result.summary.support,
            neutral = result.summary.neutral,
            oppose = result.summary.oppose,
            failed = result.stats.failed,
            "Proposal simulated"
        );

        let (metrics, metrics_error) = match ground_truth {
            None => (None, None),
            Some(truth) => match MetricsEngine::new(self.config.opinion_scale).evaluate(&result, truth) {
                Ok(metrics) => (Some(metrics), None),
                Err(e) => {
                    warn!(error = %e, "Metrics unavailable for proposal");
                    (None, Some(e.to_string()))
                }
            },
        };

        Ok(ProposalOutcome {
            result,
            population_estimate,
            metrics,
            metrics_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimError;
    use crate::testing::{one_cell_proposal, test_profile, ScriptedGenerator};

    #[test]
    fn missing_attribute_fails_sampling() {
        let simulation = Simulation::builder()
            .backend(Arc::new(ScriptedGenerator::always("{}")))
            .build();
        let profile = DemographicProfile::new("r").with_distribution(Attribute::Age, [("18-24", 1.0)]);
        let err = simulation
            .sample_agents(&one_cell_proposal(), &profile)
            .unwrap_err();
        assert!(matches!(err, SimError::MissingDistribution { .. }));
    }

    #[test]
    fn attribute_subset_can_be_sampled() {
        let simulation = Simulation::builder()
            .backend(Arc::new(ScriptedGenerator::always("{}")))
            .attributes(vec![Attribute::Age])
            .config(SimConfig {
                population: 4,
                seed: Some(1),
                ..Default::default()
            })
            .build();
        let profile = DemographicProfile::new("r").with_distribution(Attribute::Age, [("18-24", 1.0)]);
        let agents = simulation.sample_agents(&one_cell_proposal(), &profile).unwrap();
        assert_eq!(agents.len(), 4);
        assert!(agents.iter().all(|a| a.demographics[&Attribute::Age] == "18-24"));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_any_call() {
        let backend = Arc::new(ScriptedGenerator::always("{}"));
        let simulation = Simulation::builder()
            .backend(backend.clone())
            .config(SimConfig {
                concurrency: 0,
                ..Default::default()
            })
            .build();
        let err = simulation
            .run(&one_cell_proposal(), &test_profile("r"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SimError::InvalidConfig(_)));
        assert_eq!(backend.calls(), 0);
    }
}
