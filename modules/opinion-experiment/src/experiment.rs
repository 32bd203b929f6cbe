//! Sequential experiment runs over a directory of proposals.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use opinion_sim::{DemographicProfile, SimConfig, Simulation};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::{
    load_ground_truth, write_json, ExperimentStore, ProposalInput, GROUND_TRUTH_SUFFIX, METADATA_FILE,
    OUTPUT_SUFFIX,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub id: String,
    pub source: PathBuf,
    pub status: ProposalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub successful: usize,
    pub failed: usize,
    pub parse_failures: usize,
    pub transport_failures: usize,
    pub has_metrics: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_error: Option<String>,
}

impl ProposalRecord {
    fn failed(input: &ProposalInput, error: String) -> Self {
        Self {
            id: input.id.clone(),
            source: input.source.clone(),
            status: ProposalStatus::Failed,
            error: Some(error),
            successful: 0,
            failed: 0,
            parse_failures: 0,
            transport_failures: 0,
            has_metrics: false,
            metrics_error: None,
        }
    }
}

/// Contents of `experiment_metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentMetadata {
    pub run_id: Uuid,
    pub name: String,
    pub model: String,
    pub backend: String,
    pub region: String,
    pub parameters: SimConfig,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub proposals: Vec<ProposalRecord>,
}

impl ExperimentMetadata {
    pub fn completed(&self) -> usize {
        self.proposals
            .iter()
            .filter(|p| p.status == ProposalStatus::Completed)
            .count()
    }
}

pub struct Experiment<'a> {
    pub name: &'a str,
    pub model: &'a str,
    pub simulation: &'a Simulation,
    pub profile: &'a DemographicProfile,
    pub ground_truth_dir: Option<&'a Path>,
    pub started_at: DateTime<Utc>,
}

impl Experiment<'_> {
    /// Process every proposal in order. A proposal that fails is recorded and
    /// the run moves on to the next one.
    pub async fn run(&self, store: &ExperimentStore, proposals: &[ProposalInput]) -> Result<ExperimentMetadata> {
        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            name = self.name,
            model = self.model,
            proposals = proposals.len(),
            population = self.simulation.config().population,
            dir = %store.dir().display(),
            "Experiment starting"
        );

        let mut records = Vec::with_capacity(proposals.len());
        for input in proposals {
            let record = match self.process(store, input).await {
                Ok(record) => {
                    info!(
                        proposal_id = %record.id,
                        successful = record.successful,
                        failed = record.failed,
                        "Proposal complete"
                    );
                    record
                }
                Err(e) => {
                    warn!(proposal_id = %input.id, error = %format!("{e:#}"), "Proposal failed");
                    ProposalRecord::failed(input, format!("{e:#}"))
                }
            };
            records.push(record);
        }

        let finished_at = Utc::now();
        let metadata = ExperimentMetadata {
            run_id,
            name: self.name.to_string(),
            model: self.model.to_string(),
            backend: self.simulation.backend_name().to_string(),
            region: self.profile.region.clone(),
            parameters: self.simulation.config().clone(),
            started_at: self.started_at,
            finished_at,
            duration_secs: (finished_at - self.started_at).num_milliseconds() as f64 / 1000.0,
            proposals: records,
        };
        write_json(&store.dir().join(METADATA_FILE), &metadata)?;

        info!(
            %run_id,
            completed = metadata.completed(),
            total = metadata.proposals.len(),
            duration_secs = metadata.duration_secs,
            "Experiment complete"
        );
        Ok(metadata)
    }

    async fn process(&self, store: &ExperimentStore, input: &ProposalInput) -> Result<ProposalRecord> {
        store.write(
            &input.id,
            "_input.json",
            &serde_json::json!({
                "id": input.id,
                "source": input.source,
                "region": self.profile.region,
                "proposal": input.proposal,
            }),
        )?;

        let truth = match self.ground_truth_dir {
            Some(dir) => load_ground_truth(dir, &input.id)?,
            None => None,
        };
        // Kept alongside the outputs so `evaluate` can re-score the run.
        if let Some(truth) = &truth {
            store.write(&input.id, GROUND_TRUTH_SUFFIX, truth)?;
        }

        let outcome = self
            .simulation
            .run(&input.proposal, self.profile, truth.as_ref())
            .await?;

        store.write(&input.id, OUTPUT_SUFFIX, &outcome.result)?;
        if let Some(estimate) = &outcome.population_estimate {
            store.write(&input.id, "_population.json", estimate)?;
        }
        if let Some(metrics) = &outcome.metrics {
            store.write(&input.id, "_metrics.json", metrics)?;
        }

        let stats = outcome.result.stats;
        Ok(ProposalRecord {
            id: input.id.clone(),
            source: input.source.clone(),
            status: ProposalStatus::Completed,
            error: None,
            successful: stats.successful,
            failed: stats.failed,
            parse_failures: stats.parse_failures,
            transport_failures: stats.transport_failures,
            has_metrics: outcome.metrics.is_some(),
            metrics_error: outcome.metrics_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use opinion_sim::testing::{one_cell_proposal, test_profile, FailureMode, ScriptedGenerator};
    use opinion_sim::{EvaluationResult, FailurePolicy, Proposal};

    use super::*;
    use crate::store::read_json;

    fn simulation(backend: ScriptedGenerator, policy: FailurePolicy) -> Simulation {
        Simulation::builder()
            .backend(Arc::new(backend))
            .config(SimConfig {
                population: 6,
                seed: Some(7),
                failure_policy: policy,
                retry_backoff: Duration::ZERO,
                ..Default::default()
            })
            .build()
    }

    fn input(id: &str, proposal: Proposal) -> ProposalInput {
        ProposalInput {
            id: id.to_string(),
            source: PathBuf::from(format!("{id}.json")),
            proposal,
        }
    }

    #[tokio::test]
    async fn writes_outputs_metrics_and_metadata() {
        let root = tempfile::tempdir().unwrap();
        let truth_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            truth_dir.path().join("proposal_000_ground_truth.json"),
            r#"{"kind": "population", "distribution": {"support": 1.0, "neutral": 0.0, "oppose": 0.0}}"#,
        )
        .unwrap();

        let started_at = Utc::now();
        let store = ExperimentStore::create(root.path(), "smoke", "scripted", started_at).unwrap();
        let simulation = simulation(
            ScriptedGenerator::supporting("Good idea.", &["housing supply"]),
            FailurePolicy::Fallback,
        );
        let profile = test_profile("test_region");
        let experiment = Experiment {
            name: "smoke",
            model: "scripted",
            simulation: &simulation,
            profile: &profile,
            ground_truth_dir: Some(truth_dir.path()),
            started_at,
        };

        let proposals = vec![
            input("proposal_000", one_cell_proposal()),
            input("proposal_001", Proposal::from_text("Bike lanes", "Protected lanes")),
        ];
        let metadata = experiment.run(&store, &proposals).await.unwrap();

        assert_eq!(metadata.completed(), 2);
        assert!(metadata.proposals[0].has_metrics);
        assert!(!metadata.proposals[1].has_metrics);
        assert_eq!(metadata.proposals[0].successful, 6);

        let output: EvaluationResult = read_json(&store.path("proposal_000", OUTPUT_SUFFIX)).unwrap();
        assert_eq!(output.summary.support, 6);
        assert!(store.path("proposal_000", "_input.json").exists());
        assert!(store.path("proposal_000", "_metrics.json").exists());
        assert!(store.path("proposal_000", GROUND_TRUTH_SUFFIX).exists());
        assert!(!store.path("proposal_001", "_metrics.json").exists());

        let saved: ExperimentMetadata = read_json(&store.dir().join(METADATA_FILE)).unwrap();
        assert_eq!(saved.run_id, metadata.run_id);
        assert_eq!(saved.region, "test_region");
    }

    #[tokio::test]
    async fn failing_proposal_does_not_stop_the_run() {
        let root = tempfile::tempdir().unwrap();
        let started_at = Utc::now();
        let store = ExperimentStore::create(root.path(), "partial", "scripted", started_at).unwrap();
        let simulation = simulation(
            ScriptedGenerator::supporting("Fine.", &[]).fail_when("Parking minimums", FailureMode::Transport),
            FailurePolicy::FailFast,
        );
        let profile = test_profile("test_region");
        let experiment = Experiment {
            name: "partial",
            model: "scripted",
            simulation: &simulation,
            profile: &profile,
            ground_truth_dir: None,
            started_at,
        };

        let proposals = vec![
            input("proposal_000", Proposal::from_text("Parking minimums", "Remove them")),
            input("proposal_001", one_cell_proposal()),
        ];
        let metadata = experiment.run(&store, &proposals).await.unwrap();

        assert_eq!(metadata.proposals[0].status, ProposalStatus::Failed);
        assert!(metadata.proposals[0].error.is_some());
        assert_eq!(metadata.proposals[1].status, ProposalStatus::Completed);
        assert_eq!(metadata.completed(), 1);
        assert!(!store.path("proposal_000", OUTPUT_SUFFIX).exists());
        assert!(store.path("proposal_001", OUTPUT_SUFFIX).exists());
    }
}
