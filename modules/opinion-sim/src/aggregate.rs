//! Tallying agent opinions into a per-proposal result.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::agent::{AgentOpinion, FailureKind, Opinion};
use crate::metrics::Distribution;

/// Raw counts per opinion class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpinionSummary {
    pub support: usize,
    pub neutral: usize,
    pub oppose: usize,
}

/// Whole-number percentages that always sum to 100 for a non-empty population.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpinionPercentages {
    pub support: u32,
    pub neutral: u32,
    pub oppose: u32,
}

impl OpinionSummary {
    pub fn total(&self) -> usize {
        self.support + self.neutral + self.oppose
    }

    pub fn get(&self, opinion: Opinion) -> usize {
        match opinion {
            Opinion::Support => self.support,
            Opinion::Neutral => self.neutral,
            Opinion::Oppose => self.oppose,
        }
    }

    pub fn record(&mut self, opinion: Opinion) {
        match opinion {
            Opinion::Support => self.support += 1,
            Opinion::Neutral => self.neutral += 1,
            Opinion::Oppose => self.oppose += 1,
        }
    }

    /// Support and oppose are truncated; neutral takes the remainder.
    pub fn percentages(&self) -> OpinionPercentages {
        let total = self.total();
        if total == 0 {
            return OpinionPercentages::default();
        }
        let support = (self.support * 100 / total) as u32;
        let oppose = (self.oppose * 100 / total) as u32;
        OpinionPercentages {
            support,
            neutral: 100 - support - oppose,
            oppose,
        }
    }

    /// Category distribution keyed by opinion label (not normalized).
    pub fn distribution(&self) -> Distribution {
        Opinion::ALL
            .iter()
            .map(|o| (o.as_str().to_string(), self.get(*o) as f64))
            .collect()
    }
}

/// Recurring phrases per opinion class, most frequent first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyThemes {
    pub support: Vec<String>,
    pub oppose: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub neutral: Vec<String>,
}

impl KeyThemes {
    pub fn get(&self, opinion: Opinion) -> &[String] {
        match opinion {
            Opinion::Support => &self.support,
            Opinion::Neutral => &self.neutral,
            Opinion::Oppose => &self.oppose,
        }
    }

    fn slot(&mut self, opinion: Opinion) -> &mut Vec<String> {
        match opinion {
            Opinion::Support => &mut self.support,
            Opinion::Neutral => &mut self.neutral,
            Opinion::Oppose => &mut self.oppose,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationStats {
    pub population: usize,
    pub successful: usize,
    pub failed: usize,
    pub parse_failures: usize,
    pub transport_failures: usize,
}

/// One proposal's simulated outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub summary: OpinionSummary,
    #[serde(default)]
    pub comments: Vec<AgentOpinion>,
    #[serde(default)]
    pub key_themes: KeyThemes,
    #[serde(default)]
    pub stats: GenerationStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl EvaluationResult {
    pub fn percentages(&self) -> OpinionPercentages {
        self.summary.percentages()
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Build a result from per-agent opinions. Failed placeholders are kept in
/// `comments` but excluded from counts and themes. Input order is irrelevant.
pub fn aggregate(mut opinions: Vec<AgentOpinion>) -> EvaluationResult {
    opinions.sort_by_key(|o| o.id);

    let mut summary = OpinionSummary::default();
    let mut stats = GenerationStats {
        population: opinions.len(),
        ..Default::default()
    };
    let mut theme_counts: BTreeMap<Opinion, HashMap<&str, usize>> = BTreeMap::new();

    for opinion in &opinions {
        match &opinion.failure {
            Some(failure) => {
                stats.failed += 1;
                match failure.kind {
                    FailureKind::Parse => stats.parse_failures += 1,
                    FailureKind::Transport => stats.transport_failures += 1,
                }
            }
            None => {
                stats.successful += 1;
                summary.record(opinion.opinion);
                let counts = theme_counts.entry(opinion.opinion).or_default();
                for theme in &opinion.themes {
                    *counts.entry(theme.as_str()).or_default() += 1;
                }
            }
        }
    }

    let mut key_themes = KeyThemes::default();
    for (class, counts) in theme_counts {
        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        *key_themes.slot(class) = ranked.into_iter().map(|(t, _)| t.to_string()).collect();
    }

    EvaluationResult {
        summary,
        comments: opinions,
        key_themes,
        stats,
        metadata: None,
    }
}
