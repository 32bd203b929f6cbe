//! Demographic profiles and agent sampling.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::agent::{Agent, Attribute, Demographics, Location};
use crate::error::{Result, SimError};
use crate::proposal::Proposal;

/// Per-attribute category weights for a region. Weights need not sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawProfile", into = "RawProfile")]
pub struct DemographicProfile {
    pub region: String,
    pub distributions: BTreeMap<Attribute, BTreeMap<String, f64>>,
}

/// On-disk shape: attribute keys may carry a `_distribution` suffix or use
/// short aliases (`income`, `education`).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawProfile {
    #[serde(default)]
    region: String,
    #[serde(default)]
    distributions: BTreeMap<String, BTreeMap<String, f64>>,
}

impl From<RawProfile> for DemographicProfile {
    fn from(raw: RawProfile) -> Self {
        let mut distributions = BTreeMap::new();
        for (key, weights) in raw.distributions {
            match Attribute::from_key(&key) {
                Some(attribute) => {
                    distributions.insert(attribute, weights);
                }
                None => warn!(key = %key, "Ignoring unknown demographic attribute"),
            }
        }
        Self {
            region: raw.region,
            distributions,
        }
    }
}

impl From<DemographicProfile> for RawProfile {
    fn from(profile: DemographicProfile) -> Self {
        Self {
            region: profile.region,
            distributions: profile
                .distributions
                .into_iter()
                .map(|(attribute, weights)| (attribute.key().to_string(), weights))
                .collect(),
        }
    }
}

impl DemographicProfile {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            distributions: BTreeMap::new(),
        }
    }

    pub fn with_distribution<I, S>(mut self, attribute: Attribute, weights: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        self.distributions.insert(
            attribute,
            weights.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        );
        self
    }

    /// Compact text rendering of the profile for population-level prompts.
    pub fn summary(&self) -> String {
        self.distributions
            .iter()
            .map(|(attribute, weights)| {
                let total: f64 = weights.values().filter(|w| w.is_finite() && **w > 0.0).sum();
                let shares = weights
                    .iter()
                    .filter(|(_, w)| w.is_finite() && **w > 0.0)
                    .map(|(category, w)| format!("{category} {:.0}%", 100.0 * w / total))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("- {}: {shares}", attribute.label())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// =============================================================================
// Sampler
// =============================================================================

/// Cumulative table over the positive-weight categories of one attribute.
#[derive(Debug, Clone)]
struct CategoryTable {
    categories: Vec<String>,
    cumulative: Vec<f64>,
}

impl CategoryTable {
    fn new(attribute: Attribute, weights: &BTreeMap<String, f64>) -> Result<Self> {
        let positive: Vec<(&String, f64)> = weights
            .iter()
            .filter(|(_, w)| w.is_finite() && **w > 0.0)
            .map(|(c, w)| (c, *w))
            .collect();
        let total: f64 = positive.iter().map(|(_, w)| w).sum();
        if positive.is_empty() || total <= 0.0 {
            return Err(SimError::EmptyDistribution {
                attribute: attribute.key().to_string(),
            });
        }

        let mut running = 0.0;
        let mut categories = Vec::with_capacity(positive.len());
        let mut cumulative = Vec::with_capacity(positive.len());
        for (category, weight) in positive {
            running += weight / total;
            categories.push(category.clone());
            cumulative.push(running);
        }
        Ok(Self {
            categories,
            cumulative,
        })
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        let x: f64 = rng.random();
        let index = self
            .cumulative
            .partition_point(|c| *c <= x)
            .min(self.categories.len() - 1);
        &self.categories[index]
    }
}

/// Draws agents whose attributes are independent samples from a profile.
/// Every requested attribute must have a distribution.
#[derive(Debug, Clone)]
pub struct Sampler {
    tables: Vec<(Attribute, CategoryTable)>,
}

impl Sampler {
    pub fn new(profile: &DemographicProfile, attributes: &[Attribute]) -> Result<Self> {
        let tables = attributes
            .iter()
            .map(|attribute| {
                let weights = profile.distributions.get(attribute).ok_or_else(|| {
                    SimError::MissingDistribution {
                        attribute: attribute.key().to_string(),
                    }
                })?;
                Ok((*attribute, CategoryTable::new(*attribute, weights)?))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { tables })
    }

    pub fn sample_one<R: Rng + ?Sized>(&self, rng: &mut R) -> Demographics {
        self.tables
            .iter()
            .map(|(attribute, table)| (*attribute, table.draw(rng).to_string()))
            .collect()
    }

    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<Demographics> {
        (0..n).map(|_| self.sample_one(rng)).collect()
    }
}

/// Turn sampled demographics into agents with ids `1..=n`. When the proposal
/// has located cells, each agent also gets a uniform location within the
/// proposal bounds and the id of the nearest cell. Cells without bounding
/// boxes are assigned uniformly at random instead, with no location.
pub fn place_agents<R: Rng + ?Sized>(
    demographics: Vec<Demographics>,
    proposal: &Proposal,
    rng: &mut R,
) -> Vec<Agent> {
    let spatial = proposal.has_spatial_cells();
    let bounds = proposal.bounds();
    let unlocated: Vec<&str> = if spatial {
        Vec::new()
    } else {
        proposal.cells.keys().map(String::as_str).collect()
    };

    demographics
        .into_iter()
        .enumerate()
        .map(|(i, demographics)| {
            let mut agent = Agent::new(i as u32 + 1, demographics);
            if spatial {
                let location = Location {
                    lat: bounds.south + rng.random::<f64>() * (bounds.north - bounds.south),
                    lng: bounds.west + rng.random::<f64>() * (bounds.east - bounds.west),
                };
                agent.cell_id = proposal.nearest_cell(location).map(str::to_string);
                agent.location = Some(location);
            } else if !unlocated.is_empty() {
                let cell = unlocated[rng.random_range(0..unlocated.len())];
                agent.cell_id = Some(cell.to_string());
            }
            agent
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn profile() -> DemographicProfile {
        DemographicProfile::new("San Francisco")
            .with_distribution(Attribute::Age, [("18-24", 1.0), ("25-34", 3.0), ("65+", 0.0)])
            .with_distribution(Attribute::Gender, [("female", 50.0), ("male", 50.0)])
    }

    #[test]
    fn samples_requested_count() {
        let sampler = Sampler::new(&profile(), &[Attribute::Age, Attribute::Gender]).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let drawn = sampler.sample(25, &mut rng);
        assert_eq!(drawn.len(), 25);
        for d in &drawn {
            assert_eq!(d.len(), 2);
            assert_ne!(d[&Attribute::Age], "65+");
        }
    }

    #[test]
    fn same_seed_same_agents() {
        let sampler = Sampler::new(&profile(), &[Attribute::Age, Attribute::Gender]).unwrap();
        let a = sampler.sample(10, &mut StdRng::seed_from_u64(42));
        let b = sampler.sample(10, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn missing_distribution_is_an_error() {
        let err = Sampler::new(&profile(), &[Attribute::Religion]).unwrap_err();
        assert!(
            matches!(err, SimError::MissingDistribution { ref attribute } if attribute == "religion")
        );
    }

    #[test]
    fn all_zero_weights_is_an_error() {
        let profile =
            DemographicProfile::new("x").with_distribution(Attribute::Race, [("a", 0.0), ("b", 0.0)]);
        let err = Sampler::new(&profile, &[Attribute::Race]).unwrap_err();
        assert!(matches!(err, SimError::EmptyDistribution { .. }));
    }

    #[test]
    fn frequencies_follow_weights() {
        let sampler = Sampler::new(&profile(), &[Attribute::Age]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let drawn = sampler.sample(4000, &mut rng);
        let young = drawn
            .iter()
            .filter(|d| d[&Attribute::Age] == "25-34")
            .count() as f64
            / 4000.0;
        assert!((young - 0.75).abs() < 0.05, "got {young}");
    }

    #[test]
    fn profile_accepts_suffixed_keys() {
        let profile: DemographicProfile = serde_json::from_value(serde_json::json!({
            "region": "Oakland",
            "distributions": {
                "age_distribution": {"18-24": 10, "25-34": 20},
                "income": {"low": 1},
                "pets": {"dog": 1}
            }
        }))
        .unwrap();
        assert_eq!(profile.region, "Oakland");
        assert!(profile.distributions.contains_key(&Attribute::Age));
        assert!(profile.distributions.contains_key(&Attribute::IncomeLevel));
        assert_eq!(profile.distributions.len(), 2);
    }

    #[test]
    fn places_agents_on_nearest_cell() {
        let proposal: Proposal = serde_json::from_value(serde_json::json!({
            "cells": {
                "only": {
                    "heightLimit": 65,
                    "category": "residential",
                    "bbox": {"north": 37.79, "south": 37.78, "east": -122.41, "west": -122.42}
                }
            }
        }))
        .unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let agents = place_agents(vec![Demographics::new(); 3], &proposal, &mut rng);
        assert_eq!(agents.iter().map(|a| a.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        for agent in &agents {
            assert_eq!(agent.cell_id.as_deref(), Some("only"));
            assert!(proposal.bounds().contains(agent.location.unwrap()));
        }
    }

    #[test]
    fn cells_without_bbox_are_assigned_from_the_seed() {
        let proposal: Proposal = serde_json::from_value(serde_json::json!({
            "cells": {
                "10_15": {"heightLimit": 65, "category": "residential"},
                "11_15": {"heightLimit": 85, "category": "mixed_use"}
            }
        }))
        .unwrap();
        let place = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            place_agents(vec![Demographics::new(); 40], &proposal, &mut rng)
        };

        let agents = place(9);
        assert!(agents.iter().all(|a| a.location.is_none()));
        assert!(agents
            .iter()
            .all(|a| matches!(a.cell_id.as_deref(), Some("10_15") | Some("11_15"))));
        assert!(agents.iter().any(|a| a.cell_id.as_deref() == Some("11_15")));
        assert_eq!(agents, place(9));
    }

    #[test]
    fn text_proposals_leave_agents_unplaced() {
        let proposal = Proposal::from_text("t", "d");
        let mut rng = StdRng::seed_from_u64(3);
        let agents = place_agents(vec![Demographics::new()], &proposal, &mut rng);
        assert!(agents[0].location.is_none());
        assert!(agents[0].cell_id.is_none());
    }
}
