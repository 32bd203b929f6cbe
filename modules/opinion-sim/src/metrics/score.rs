//! Numeric comparison of opinions against survey ratings.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ParticipantTruth;
use crate::agent::{AgentOpinion, Opinion};

/// Numeric anchors for the three opinion classes on a survey rating scale,
/// e.g. `3,5,8` on a 1-10 scale. Written as `oppose,neutral,support`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpinionScale {
    pub oppose: f64,
    pub neutral: f64,
    pub support: f64,
}

impl OpinionScale {
    pub fn score(&self, opinion: Opinion) -> f64 {
        match opinion {
            Opinion::Oppose => self.oppose,
            Opinion::Neutral => self.neutral,
            Opinion::Support => self.support,
        }
    }

    /// The opinion whose anchor is closest to `rating`. Ties go to neutral.
    pub fn classify(&self, rating: f64) -> Opinion {
        [Opinion::Neutral, Opinion::Oppose, Opinion::Support]
            .into_iter()
            .fold((Opinion::Neutral, f64::INFINITY), |(best, best_d), o| {
                let d = (self.score(o) - rating).abs();
                if d < best_d {
                    (o, d)
                } else {
                    (best, best_d)
                }
            })
            .0
    }
}

impl FromStr for OpinionScale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid opinion scale '{s}': {e}"))?;
        match values.as_slice() {
            [oppose, neutral, support] if oppose < neutral && neutral < support => Ok(Self {
                oppose: *oppose,
                neutral: *neutral,
                support: *support,
            }),
            [_, _, _] => Err(format!(
                "opinion scale '{s}' must be increasing (oppose < neutral < support)"
            )),
            _ => Err(format!(
                "opinion scale '{s}' must have three values: oppose,neutral,support"
            )),
        }
    }
}

impl fmt::Display for OpinionScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.oppose, self.neutral, self.support)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreMetrics {
    pub mean_absolute_error: f64,
    /// Pearson correlation; absent with fewer than two pairs or zero variance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<f64>,
    pub compared: usize,
    pub scenario_errors: BTreeMap<String, f64>,
}

pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let n = xs.len() as f64;
    let mx = xs.iter().sum::<f64>() / n;
    let my = ys.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }
    if vx == 0.0 || vy == 0.0 {
        return None;
    }
    Some(cov / (vx.sqrt() * vy.sqrt()))
}

/// Compare each successful prediction's scaled opinion with the participant's
/// rating for the same scenario. `None` when nothing could be compared.
pub fn score_metrics(
    comments: &[AgentOpinion],
    participants: &BTreeMap<String, ParticipantTruth>,
    scale: &OpinionScale,
) -> Option<ScoreMetrics> {
    let mut truth_scores = Vec::new();
    let mut predicted_scores = Vec::new();
    let mut scenario_errors: BTreeMap<String, Vec<f64>> = BTreeMap::new();

    for comment in comments.iter().filter(|c| !c.is_failed()) {
        let Some(truth) = participants.get(&comment.id.to_string()) else {
            continue;
        };
        let Some(rating) = truth.ratings.get(comment.scenario()) else {
            continue;
        };
        let predicted = scale.score(comment.opinion);
        truth_scores.push(*rating);
        predicted_scores.push(predicted);
        scenario_errors
            .entry(comment.scenario().to_string())
            .or_default()
            .push((rating - predicted).abs());
    }

    if truth_scores.is_empty() {
        return None;
    }
    let errors: Vec<f64> = scenario_errors.values().flatten().copied().collect();
    Some(ScoreMetrics {
        mean_absolute_error: errors.iter().sum::<f64>() / errors.len() as f64,
        correlation: pearson(&truth_scores, &predicted_scores),
        compared: truth_scores.len(),
        scenario_errors: scenario_errors
            .into_iter()
            .map(|(scenario, errs)| {
                let mean = errs.iter().sum::<f64>() / errs.len() as f64;
                (scenario, mean)
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, Demographics, OpinionResponse};

    fn scale() -> OpinionScale {
        "3,5,8".parse().unwrap()
    }

    fn predicted(id: u32, opinion: Opinion) -> AgentOpinion {
        AgentOpinion::generated(
            &Agent::new(id, Demographics::new()),
            OpinionResponse {
                opinion,
                comment: "c".into(),
                themes: Vec::new(),
                reasons: Vec::new(),
            },
        )
    }

    fn rated(rating: f64) -> ParticipantTruth {
        ParticipantTruth {
            opinion: None,
            ratings: BTreeMap::from([("default".to_string(), rating)]),
            reasons: BTreeMap::new(),
        }
    }

    #[test]
    fn parses_scale() {
        let scale = scale();
        assert_eq!(scale.score(Opinion::Support), 8.0);
        assert_eq!(scale.to_string(), "3,5,8");
        assert!("8,5,3".parse::<OpinionScale>().is_err());
        assert!("1,2".parse::<OpinionScale>().is_err());
        assert!("a,b,c".parse::<OpinionScale>().is_err());
    }

    #[test]
    fn classify_nearest_anchor() {
        let scale = scale();
        assert_eq!(scale.classify(9.0), Opinion::Support);
        assert_eq!(scale.classify(1.0), Opinion::Oppose);
        assert_eq!(scale.classify(4.0), Opinion::Neutral);
    }

    #[test]
    fn error_and_correlation() {
        let comments = vec![
            predicted(1, Opinion::Support),
            predicted(2, Opinion::Oppose),
            predicted(3, Opinion::Neutral),
        ];
        let participants = BTreeMap::from([
            ("1".to_string(), rated(9.0)),
            ("2".to_string(), rated(2.0)),
            ("3".to_string(), rated(5.0)),
        ]);
        let metrics = score_metrics(&comments, &participants, &scale()).unwrap();
        assert_eq!(metrics.compared, 3);
        assert!((metrics.mean_absolute_error - 2.0 / 3.0).abs() < 1e-12);
        assert!(metrics.correlation.unwrap() > 0.9);
        assert!(metrics.scenario_errors.contains_key("default"));
    }

    #[test]
    fn nothing_to_compare() {
        let metrics = score_metrics(&[predicted(1, Opinion::Support)], &BTreeMap::new(), &scale());
        assert!(metrics.is_none());
        assert_eq!(pearson(&[1.0, 1.0], &[2.0, 3.0]), None);
    }
}
