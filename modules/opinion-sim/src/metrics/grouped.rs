//! Per-group opinion distributions compared against ground truth.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::distance::{distribution_distance, AverageMetrics, DistanceMetrics, Distribution};
use crate::agent::{AgentOpinion, Attribute, Opinion};
use crate::error::{Result, SimError};

/// Label used for values no group rule covers and for agents lacking the field.
const MISSING_VALUE: &str = "<missing>";
const OVERALL: &str = "overall";

/// How a group claims agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupRule {
    /// Inclusive numeric range; values like `"25-34"` use their lower bound.
    Range { min: f64, max: f64 },
    Equals { equals: String },
}

impl GroupRule {
    fn matches(&self, value: &str) -> bool {
        match self {
            Self::Range { min, max } => {
                numeric_value(value).is_some_and(|v| *min <= v && v <= *max)
            }
            Self::Equals { equals } => value.trim() == equals.trim(),
        }
    }
}

/// Read `"42"`, `"25-34"` (lower bound), `"65+"` or `"85 and over"` as a number.
pub fn numeric_value(value: &str) -> Option<f64> {
    let value = value.trim();
    if let Ok(v) = value.parse::<f64>() {
        return Some(v);
    }
    let leading: String = value
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    leading.parse().ok()
}

/// The agent field agents are grouped by: `agent.<attribute>`, a bare
/// attribute name, or `cell_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupField {
    Attribute(Attribute),
    CellId,
}

impl FromStr for GroupField {
    type Err = SimError;

    fn from_str(path: &str) -> Result<Self> {
        let field = path.trim().strip_prefix("agent.").unwrap_or(path.trim());
        if field == "cell_id" {
            return Ok(Self::CellId);
        }
        Attribute::from_key(field)
            .map(Self::Attribute)
            .ok_or_else(|| SimError::MetricsInputMismatch(format!("unknown group_by field '{path}'")))
    }
}

impl fmt::Display for GroupField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attribute(attribute) => write!(f, "agent.{attribute}"),
            Self::CellId => write!(f, "cell_id"),
        }
    }
}

impl GroupField {
    fn value<'a>(&self, opinion: &'a AgentOpinion) -> Option<&'a str> {
        match self {
            Self::Attribute(attribute) => opinion.agent.get(attribute).map(String::as_str),
            Self::CellId => opinion.cell_id.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedMetrics {
    pub group_by: String,
    /// Opinion shares per group plus `overall`.
    pub predicted_distribution: BTreeMap<String, Distribution>,
    pub group_metrics: BTreeMap<String, DistanceMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_metrics: Option<DistanceMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_metrics: Option<AverageMetrics>,
    /// Agent values no rule covered, with how many agents had each.
    pub unmatched_values: BTreeMap<String, usize>,
    /// Ground-truth groups with no rule or no predicted agents.
    pub missing_groups: Vec<String>,
}

fn shares(counts: &BTreeMap<Opinion, usize>) -> Distribution {
    let total: usize = counts.values().sum();
    Opinion::ALL
        .iter()
        .map(|o| {
            let n = counts.get(o).copied().unwrap_or(0);
            let share = if total > 0 { n as f64 / total as f64 } else { 0.0 };
            (o.as_str().to_string(), share)
        })
        .collect()
}

/// Bucket agents by `group_by` under `groups` and compare each bucket with
/// the ground-truth distribution of the same name. Failed agents are skipped.
pub fn grouped_metrics(
    comments: &[AgentOpinion],
    group_by: &str,
    groups: &BTreeMap<String, GroupRule>,
    truth: &BTreeMap<String, Distribution>,
) -> Result<GroupedMetrics> {
    let field: GroupField = group_by.parse()?;

    let mut counts: BTreeMap<&str, BTreeMap<Opinion, usize>> =
        groups.keys().map(|g| (g.as_str(), BTreeMap::new())).collect();
    let mut overall: BTreeMap<Opinion, usize> = BTreeMap::new();
    let mut unmatched_values: BTreeMap<String, usize> = BTreeMap::new();

    for comment in comments.iter().filter(|c| !c.is_failed()) {
        let value = field.value(comment);
        let group = value.and_then(|v| {
            groups
                .iter()
                .find(|(_, rule)| rule.matches(v))
                .map(|(name, _)| name.as_str())
        });
        match group {
            Some(group) => {
                *counts.entry(group).or_default().entry(comment.opinion).or_default() += 1;
                *overall.entry(comment.opinion).or_default() += 1;
            }
            None => {
                *unmatched_values
                    .entry(value.unwrap_or(MISSING_VALUE).to_string())
                    .or_default() += 1;
            }
        }
    }

    if !unmatched_values.is_empty() {
        warn!(
            field = %field,
            values = ?unmatched_values.keys().collect::<Vec<_>>(),
            "Agent values not covered by any group rule"
        );
    }

    let mut predicted_distribution: BTreeMap<String, Distribution> = counts
        .iter()
        .map(|(group, c)| (group.to_string(), shares(c)))
        .collect();
    predicted_distribution.insert(OVERALL.to_string(), shares(&overall));

    let mut group_metrics = BTreeMap::new();
    let mut missing_groups = Vec::new();
    for (group, expected) in truth.iter().filter(|(g, _)| g.as_str() != OVERALL) {
        let populated = counts
            .get(group.as_str())
            .is_some_and(|c| c.values().sum::<usize>() > 0);
        if !populated {
            missing_groups.push(group.clone());
            continue;
        }
        if let Some(predicted) = predicted_distribution.get(group) {
            group_metrics.insert(group.clone(), distribution_distance(predicted, expected));
        }
    }
    if !missing_groups.is_empty() {
        warn!(groups = ?missing_groups, "Ground-truth groups without predicted agents");
    }

    let overall_metrics = truth.get(OVERALL).and_then(|expected| {
        (!overall.is_empty()).then(|| distribution_distance(&shares(&overall), expected))
    });

    Ok(GroupedMetrics {
        group_by: field.to_string(),
        average_metrics: AverageMetrics::of(group_metrics.values()),
        predicted_distribution,
        group_metrics,
        overall_metrics,
        unmatched_values,
        missing_groups,
    })
}
