//! Participant-level matching: opinion accuracy and reason-set overlap.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{OpinionScale, ParticipantTruth};
use crate::agent::{AgentOpinion, Opinion};

const TOP_REASONS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedPair {
    pub id: String,
    pub predicted_opinion: Opinion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub true_opinion: Option<Opinion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonMatch {
    /// Mean Jaccard similarity over every compared (participant, scenario).
    pub jaccard_similarity: f64,
    pub scenario_similarities: BTreeMap<String, f64>,
    pub most_common_correct: BTreeMap<String, Vec<(String, usize)>>,
    pub most_common_incorrect: BTreeMap<String, Vec<(String, usize)>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualMetrics {
    /// Exact-match rate among matched participants with a reference opinion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    pub opinion_matches: usize,
    pub compared: usize,
    pub matched: usize,
    pub unmatched_ground_truth: Vec<String>,
    /// Predicted ids with no reference, plus failed agents.
    pub unmatched_predictions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_match: Option<ReasonMatch>,
    pub matched_pairs: Vec<MatchedPair>,
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

pub fn jaccard(a: &BTreeSet<&str>, b: &BTreeSet<&str>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn top_counts(counts: BTreeMap<String, BTreeMap<String, usize>>) -> BTreeMap<String, Vec<(String, usize)>> {
    counts
        .into_iter()
        .map(|(scenario, reasons)| {
            let mut ranked: Vec<(String, usize)> = reasons.into_iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            ranked.truncate(TOP_REASONS);
            (scenario, ranked)
        })
        .collect()
}

/// Match predictions to participants by id (the agent id as a string).
/// Participants without a stated opinion are classified from their rating
/// for the predicted scenario when `scale` is given.
pub fn individual_metrics(
    comments: &[AgentOpinion],
    participants: &BTreeMap<String, ParticipantTruth>,
    scale: Option<&OpinionScale>,
) -> IndividualMetrics {
    let predictions: BTreeMap<String, &AgentOpinion> = comments
        .iter()
        .filter(|c| !c.is_failed())
        .map(|c| (c.id.to_string(), c))
        .collect();

    let mut unmatched_predictions: Vec<String> = comments
        .iter()
        .filter(|c| c.is_failed() || !participants.contains_key(&c.id.to_string()))
        .map(|c| c.id.to_string())
        .collect();
    unmatched_predictions.sort();
    unmatched_predictions.dedup();

    let mut unmatched_ground_truth = Vec::new();
    let mut matched_pairs = Vec::new();
    let mut opinion_matches = 0;
    let mut compared = 0;

    let mut similarities = Vec::new();
    let mut by_scenario: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut correct: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    let mut incorrect: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();

    for (id, truth) in participants {
        let Some(prediction) = predictions.get(id) else {
            unmatched_ground_truth.push(id.clone());
            continue;
        };

        let scenario = prediction.scenario();
        let true_opinion = truth.opinion.or_else(|| {
            let rating = truth.ratings.get(scenario)?;
            Some(scale?.classify(*rating))
        });
        if let Some(expected) = true_opinion {
            compared += 1;
            if prediction.opinion == expected {
                opinion_matches += 1;
            }
        }
        matched_pairs.push(MatchedPair {
            id: id.clone(),
            predicted_opinion: prediction.opinion,
            true_opinion,
        });

        let Some(expected_reasons) = truth.reasons.get(scenario) else {
            continue;
        };
        let expected: BTreeSet<&str> = expected_reasons.iter().map(String::as_str).collect();
        let predicted: BTreeSet<&str> = prediction.reasons.iter().map(String::as_str).collect();

        let similarity = jaccard(&predicted, &expected);
        similarities.push(similarity);
        by_scenario.entry(scenario.to_string()).or_default().push(similarity);

        for reason in predicted.intersection(&expected) {
            *correct
                .entry(scenario.to_string())
                .or_default()
                .entry(reason.to_string())
                .or_default() += 1;
        }
        for reason in predicted.difference(&expected) {
            *incorrect
                .entry(scenario.to_string())
                .or_default()
                .entry(reason.to_string())
                .or_default() += 1;
        }
    }

    if !unmatched_ground_truth.is_empty() || !unmatched_predictions.is_empty() {
        warn!(
            unmatched_ground_truth = unmatched_ground_truth.len(),
            unmatched_predictions = unmatched_predictions.len(),
            "Participants without a counterpart"
        );
    }

    let reason_match = (!similarities.is_empty()).then(|| ReasonMatch {
        jaccard_similarity: mean(&similarities),
        scenario_similarities: by_scenario
            .iter()
            .map(|(scenario, sims)| (scenario.clone(), mean(sims)))
            .collect(),
        most_common_correct: top_counts(correct),
        most_common_incorrect: top_counts(incorrect),
    });

    IndividualMetrics {
        accuracy: (compared > 0).then(|| opinion_matches as f64 / compared as f64),
        opinion_matches,
        compared,
        matched: matched_pairs.len(),
        unmatched_ground_truth,
        unmatched_predictions,
        reason_match,
        matched_pairs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, Demographics, FailureKind, GenerationFailure, OpinionResponse};

    fn predicted(id: u32, opinion: Opinion, reasons: &[&str]) -> AgentOpinion {
        let mut agent = Agent::new(id, Demographics::new());
        agent.cell_id = Some("10_15".into());
        AgentOpinion::generated(
            &agent,
            OpinionResponse {
                opinion,
                comment: "c".into(),
                themes: Vec::new(),
                reasons: reasons.iter().map(|r| r.to_string()).collect(),
            },
        )
    }

    fn truth(opinion: Opinion, reasons: &[&str]) -> ParticipantTruth {
        ParticipantTruth {
            opinion: Some(opinion),
            ratings: BTreeMap::new(),
            reasons: BTreeMap::from([(
                "10_15".to_string(),
                reasons.iter().map(|r| r.to_string()).collect(),
            )]),
        }
    }

    #[test]
    fn jaccard_edge_cases() {
        let empty = BTreeSet::new();
        assert_eq!(jaccard(&empty, &empty), 1.0);
        let a: BTreeSet<&str> = ["A", "B"].into();
        let b: BTreeSet<&str> = ["B", "C"].into();
        assert!((jaccard(&a, &b) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn accuracy_and_unmatched_counts() {
        let comments = vec![
            predicted(1, Opinion::Support, &["A", "B"]),
            predicted(2, Opinion::Oppose, &["C"]),
            predicted(9, Opinion::Neutral, &[]),
        ];
        let participants = BTreeMap::from([
            ("1".to_string(), truth(Opinion::Support, &["A", "C"])),
            ("2".to_string(), truth(Opinion::Support, &["C"])),
            ("3".to_string(), truth(Opinion::Neutral, &[])),
        ]);
        let metrics = individual_metrics(&comments, &participants, None);
        assert_eq!(metrics.matched, 2);
        assert_eq!(metrics.accuracy, Some(0.5));
        assert_eq!(metrics.unmatched_ground_truth, vec!["3"]);
        assert_eq!(metrics.unmatched_predictions, vec!["9"]);

        let reasons = metrics.reason_match.unwrap();
        // (1/3 + 1) / 2
        assert!((reasons.jaccard_similarity - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(reasons.most_common_correct["10_15"][0], ("A".to_string(), 1));
        assert_eq!(reasons.most_common_incorrect["10_15"], vec![("B".to_string(), 1)]);
    }

    #[test]
    fn ratings_stand_in_for_missing_opinions() {
        let comments = vec![
            predicted(1, Opinion::Support, &[]),
            predicted(2, Opinion::Support, &[]),
            predicted(3, Opinion::Neutral, &[]),
        ];
        let rated = |rating: f64| ParticipantTruth {
            ratings: BTreeMap::from([("10_15".to_string(), rating)]),
            ..Default::default()
        };
        let participants = BTreeMap::from([
            ("1".to_string(), rated(9.0)),
            ("2".to_string(), rated(2.0)),
            ("3".to_string(), truth(Opinion::Neutral, &[])),
        ]);

        let unscaled = individual_metrics(&comments, &participants, None);
        assert_eq!(unscaled.compared, 1);
        assert_eq!(unscaled.matched_pairs[0].true_opinion, None);

        let scale: OpinionScale = "3,5,8".parse().unwrap();
        let metrics = individual_metrics(&comments, &participants, Some(&scale));
        assert_eq!(metrics.compared, 3);
        assert_eq!(metrics.opinion_matches, 2);
        assert_eq!(metrics.matched_pairs[0].true_opinion, Some(Opinion::Support));
        assert_eq!(metrics.matched_pairs[1].true_opinion, Some(Opinion::Oppose));
    }

    #[test]
    fn failed_agents_are_unmatched_predictions() {
        let failed = AgentOpinion::failed(
            &Agent::new(1, Demographics::new()),
            GenerationFailure {
                kind: FailureKind::Parse,
                attempts: 3,
                reason: "x".into(),
            },
        );
        let participants = BTreeMap::from([("1".to_string(), truth(Opinion::Neutral, &[]))]);
        let metrics = individual_metrics(&[failed], &participants, None);
        assert_eq!(metrics.matched, 0);
        assert_eq!(metrics.accuracy, None);
        assert_eq!(metrics.unmatched_predictions, vec!["1"]);
        assert_eq!(metrics.unmatched_ground_truth, vec!["1"]);
    }
}
