//! Population-level estimation: one probability query per question instead
//! of one generation per agent.

use std::collections::BTreeMap;
use std::sync::Arc;

use ai_client::TextGenerator;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::agent::Opinion;
use crate::aggregate::{EvaluationResult, GenerationStats, KeyThemes, OpinionSummary};
use crate::demographics::DemographicProfile;
use crate::error::{Result, SimError};
use crate::prompt::{self, OPINION_LABELS};
use crate::reasons::{ReasonCatalog, ReasonDictionary};

/// Allowed deviation of a returned distribution's total from 1.
pub const DISTRIBUTION_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationEstimate {
    pub summary: OpinionSummary,
    pub opinion_distribution: BTreeMap<Opinion, f64>,
    /// Reason → probability among supporters.
    pub support_reasons: BTreeMap<String, f64>,
    /// Reason → probability among opponents.
    pub oppose_reasons: BTreeMap<String, f64>,
}

fn ranked_reasons(reasons: &BTreeMap<String, f64>) -> Vec<String> {
    let mut ranked: Vec<(&String, f64)> = reasons
        .iter()
        .filter(|(_, p)| **p > 0.0)
        .map(|(r, p)| (r, *p))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.into_iter().map(|(r, _)| r.clone()).collect()
}

impl PopulationEstimate {
    /// Counts with no comments; key themes are the reasons with non-zero mass.
    pub fn into_result(self) -> EvaluationResult {
        let population = self.summary.total();
        EvaluationResult {
            summary: self.summary,
            comments: Vec::new(),
            key_themes: KeyThemes {
                support: ranked_reasons(&self.support_reasons),
                oppose: ranked_reasons(&self.oppose_reasons),
                neutral: Vec::new(),
            },
            stats: GenerationStats {
                population,
                successful: population,
                ..Default::default()
            },
            metadata: None,
        }
    }
}

/// Reject a distribution whose total is not 1 within tolerance, or that
/// contains a negative or non-finite entry.
pub fn check_distribution<'a>(what: &str, probabilities: impl IntoIterator<Item = &'a f64>) -> Result<()> {
    let mut sum = 0.0;
    for p in probabilities {
        if !p.is_finite() || *p < 0.0 {
            return Err(SimError::InvalidDistribution {
                what: what.to_string(),
                sum: *p,
            });
        }
        sum += p;
    }
    if (sum - 1.0).abs() >= DISTRIBUTION_TOLERANCE {
        return Err(SimError::InvalidDistribution {
            what: what.to_string(),
            sum,
        });
    }
    Ok(())
}

/// `floor(N * p)` for support and oppose, remainder neutral.
pub fn counts_from_probabilities(population: usize, support: f64, oppose: f64) -> OpinionSummary {
    let support = ((population as f64 * support).floor() as usize).min(population);
    let oppose = ((population as f64 * oppose).floor() as usize).min(population - support);
    OpinionSummary {
        support,
        neutral: population - support - oppose,
        oppose,
    }
}

pub struct PopulationEstimator {
    backend: Arc<dyn TextGenerator>,
    reasons: ReasonDictionary,
}

impl PopulationEstimator {
    pub fn new(backend: Arc<dyn TextGenerator>, reasons: ReasonDictionary) -> Self {
        Self { backend, reasons }
    }

    async fn query(&self, what: &str, prompt: &str, labels: &[String]) -> Result<BTreeMap<String, f64>> {
        let probabilities = self
            .backend
            .category_probabilities(prompt, labels)
            .await
            .map_err(|source| SimError::PopulationQuery {
                what: what.to_string(),
                source,
            })?;
        check_distribution(what, probabilities.values())?;
        Ok(probabilities)
    }

    async fn reason_distribution(
        &self,
        region: &str,
        proposal: &str,
        stance: Opinion,
        catalog: &ReasonCatalog,
    ) -> Result<BTreeMap<String, f64>> {
        let what = format!("{stance} reasons");
        let prompt = prompt::reason_distribution_prompt(region, proposal, stance, catalog);
        let by_code = self.query(&what, &prompt, &catalog.codes()).await?;
        Ok(catalog
            .entries()
            .map(|(code, reason)| (reason.to_string(), by_code.get(&code).copied().unwrap_or(0.0)))
            .collect())
    }

    pub async fn estimate(
        &self,
        profile: &DemographicProfile,
        proposal: &str,
        population: usize,
    ) -> Result<PopulationEstimate> {
        let region = profile.region.as_str();
        let labels: Vec<String> = OPINION_LABELS.iter().map(|(l, _)| l.to_string()).collect();
        let prompt = prompt::opinion_distribution_prompt(region, proposal, &profile.summary());
        let by_label = self.query("opinion", &prompt, &labels).await?;

        let opinion_distribution: BTreeMap<Opinion, f64> = OPINION_LABELS
            .iter()
            .map(|(label, opinion)| (*opinion, by_label.get(*label).copied().unwrap_or(0.0)))
            .collect();
        let support_reasons = self
            .reason_distribution(region, proposal, Opinion::Support, &self.reasons.support_reasons)
            .await?;
        let oppose_reasons = self
            .reason_distribution(region, proposal, Opinion::Oppose, &self.reasons.oppose_reasons)
            .await?;

        let summary = counts_from_probabilities(
            population,
            opinion_distribution[&Opinion::Support],
            opinion_distribution[&Opinion::Oppose],
        );
        info!(
            support = summary.support,
            oppose = summary.oppose,
            neutral = summary.neutral,
            backend = self.backend.name(),
            "Population estimate complete"
        );

        Ok(PopulationEstimate {
            summary,
            opinion_distribution,
            support_reasons,
            oppose_reasons,
        })
    }
}
