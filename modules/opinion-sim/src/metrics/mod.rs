//! Scoring simulated results against ground truth.

pub mod distance;
pub mod grouped;
pub mod individual;
pub mod score;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agent::Opinion;
use crate::aggregate::EvaluationResult;
use crate::error::Result;

pub use distance::{distribution_distance, AverageMetrics, DistanceMetrics, Distribution};
pub use grouped::{grouped_metrics, GroupRule, GroupedMetrics};
pub use individual::{individual_metrics, IndividualMetrics, ReasonMatch};
pub use score::{score_metrics, OpinionScale, ScoreMetrics};

/// One participant's reference answers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipantTruth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opinion: Option<Opinion>,
    /// Scenario id → survey rating.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ratings: BTreeMap<String, f64>,
    /// Scenario id → chosen reason codes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reasons: BTreeMap<String, Vec<String>>,
}

/// Reference data for one proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroundTruth {
    Population {
        distribution: Distribution,
    },
    Grouped {
        group_by: String,
        groups: BTreeMap<String, GroupRule>,
        distributions: BTreeMap<String, Distribution>,
    },
    Individual {
        participants: BTreeMap<String, ParticipantTruth>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population: Option<DistanceMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouped: Option<GroupedMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub individual: Option<IndividualMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opinion_score: Option<ScoreMetrics>,
    /// Ground-truth categories that are not opinion labels.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown_categories: Vec<String>,
}

fn unknown_categories<'a>(distributions: impl IntoIterator<Item = &'a Distribution>) -> Vec<String> {
    let mut unknown: Vec<String> = distributions
        .into_iter()
        .flat_map(|d| d.keys())
        .filter(|k| !Opinion::ALL.iter().any(|o| o.as_str() == k.as_str()))
        .cloned()
        .collect();
    unknown.sort();
    unknown.dedup();
    unknown
}

#[derive(Debug, Clone, Default)]
pub struct MetricsEngine {
    scale: Option<OpinionScale>,
}

impl MetricsEngine {
    pub fn new(scale: Option<OpinionScale>) -> Self {
        Self { scale }
    }

    pub fn evaluate(&self, result: &EvaluationResult, truth: &GroundTruth) -> Result<Metrics> {
        let mut metrics = Metrics::default();

        match truth {
            GroundTruth::Population { distribution } => {
                metrics.unknown_categories = unknown_categories([distribution]);
                metrics.population = Some(distribution_distance(&result.summary.distribution(), distribution));
            }
            GroundTruth::Grouped {
                group_by,
                groups,
                distributions,
            } => {
                metrics.unknown_categories = unknown_categories(distributions.values());
                metrics.grouped = Some(grouped_metrics(&result.comments, group_by, groups, distributions)?);
            }
            GroundTruth::Individual { participants } => {
                metrics.individual = Some(individual_metrics(
                    &result.comments,
                    participants,
                    self.scale.as_ref(),
                ));
                metrics.opinion_score = self
                    .scale
                    .as_ref()
                    .and_then(|scale| score_metrics(&result.comments, participants, scale));
            }
        }

        if !metrics.unknown_categories.is_empty() {
            warn!(
                categories = ?metrics.unknown_categories,
                "Ground truth uses categories outside support/neutral/oppose"
            );
        }
        if let Some(population) = &metrics.population {
            info!(
                js = population.js_divergence,
                chi_square = population.chi_square,
                tv = population.total_variation,
                "Population metrics"
            );
        }
        Ok(metrics)
    }
}
