//! Offline re-scoring of a finished experiment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use opinion_sim::metrics::AverageMetrics;
use opinion_sim::{EvaluationResult, Metrics, MetricsEngine};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::store::{load_ground_truth, read_json, ExperimentStore, OUTPUT_SUFFIX};

/// Contents of `evaluation_results.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub experiment_dir: PathBuf,
    pub evaluated_at: DateTime<Utc>,
    pub results: BTreeMap<String, Metrics>,
    /// Proposals whose output or ground truth could not be scored.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_ground_truth: Vec<String>,
    /// Mean population-level distances across scored proposals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_population: Option<AverageMetrics>,
}

/// Score every `{id}_output.json` in the experiment against
/// `{id}_ground_truth.json` from `ground_truth_dir`.
pub fn evaluate_experiment(
    store: &ExperimentStore,
    ground_truth_dir: &Path,
    engine: &MetricsEngine,
) -> Result<EvaluationReport> {
    let mut report = EvaluationReport {
        experiment_dir: store.dir().to_path_buf(),
        evaluated_at: Utc::now(),
        results: BTreeMap::new(),
        errors: BTreeMap::new(),
        missing_ground_truth: Vec::new(),
        average_population: None,
    };

    for id in store.output_ids()? {
        let scored = load_ground_truth(ground_truth_dir, &id).and_then(|truth| {
            let Some(truth) = truth else {
                return Ok(None);
            };
            let result: EvaluationResult = read_json(&store.path(&id, OUTPUT_SUFFIX))?;
            Ok(Some(engine.evaluate(&result, &truth)?))
        });

        match scored {
            Ok(Some(metrics)) => {
                report.results.insert(id, metrics);
            }
            Ok(None) => {
                warn!(proposal_id = %id, "No ground truth for proposal");
                report.missing_ground_truth.push(id);
            }
            Err(e) => {
                warn!(proposal_id = %id, error = %format!("{e:#}"), "Could not evaluate proposal");
                report.errors.insert(id, format!("{e:#}"));
            }
        }
    }

    report.average_population = AverageMetrics::of(report.results.values().filter_map(|m| m.population.as_ref()));
    info!(
        scored = report.results.len(),
        missing = report.missing_ground_truth.len(),
        errors = report.errors.len(),
        "Evaluation complete"
    );
    Ok(report)
}
