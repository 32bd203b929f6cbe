//! Experiment directory layout and JSON persistence.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use opinion_sim::{DemographicProfile, GroundTruth, Proposal};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub const METADATA_FILE: &str = "experiment_metadata.json";
pub const EVALUATION_FILE: &str = "evaluation_results.json";
pub const OUTPUT_SUFFIX: &str = "_output.json";
pub const GROUND_TRUTH_SUFFIX: &str = "_ground_truth.json";

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Failed to parse {}", path.display()))
}

/// `*.json` files directly under `dir`, sorted by file name.
fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// A proposal loaded from disk with its run-local id.
#[derive(Debug, Clone)]
pub struct ProposalInput {
    pub id: String,
    pub source: PathBuf,
    pub proposal: Proposal,
}

/// Load every proposal in `dir`; ids are `proposal_000`, `proposal_001`, ...
/// in file-name order.
pub fn load_proposals(dir: &Path) -> Result<Vec<ProposalInput>> {
    json_files(dir)?
        .into_iter()
        .enumerate()
        .map(|(i, source)| {
            let proposal = read_json(&source)?;
            Ok(ProposalInput {
                id: format!("proposal_{i:03}"),
                source,
                proposal,
            })
        })
        .collect()
}

/// Load a demographic profile; `region` overrides the file's region name.
pub fn load_profile(path: &Path, region: Option<&str>) -> Result<DemographicProfile> {
    let mut profile: DemographicProfile = read_json(path)?;
    if let Some(region) = region {
        profile.region = region.to_string();
    }
    anyhow::ensure!(
        !profile.region.is_empty(),
        "{} has no region; pass --region",
        path.display()
    );
    Ok(profile)
}

/// `{dir}/{id}_ground_truth.json` if it exists.
pub fn load_ground_truth(dir: &Path, id: &str) -> Result<Option<GroundTruth>> {
    let path = dir.join(format!("{id}{GROUND_TRUTH_SUFFIX}"));
    if !path.exists() {
        return Ok(None);
    }
    read_json(&path).map(Some)
}

/// One experiment run's directory.
#[derive(Debug, Clone)]
pub struct ExperimentStore {
    dir: PathBuf,
}

impl ExperimentStore {
    /// Create `{root}/{name}_{model}_{YYYYmmdd_HHMMSS}`.
    pub fn create(root: &Path, name: &str, model: &str, started_at: DateTime<Utc>) -> Result<Self> {
        let model = model.replace(['/', ':'], "-");
        let dir = root.join(format!("{name}_{model}_{}", started_at.format("%Y%m%d_%H%M%S")));
        std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn open(dir: &Path) -> Result<Self> {
        anyhow::ensure!(dir.is_dir(), "{} is not an experiment directory", dir.display());
        Ok(Self { dir: dir.to_path_buf() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, id: &str, suffix: &str) -> PathBuf {
        self.dir.join(format!("{id}{suffix}"))
    }

    pub fn write<T: Serialize>(&self, id: &str, suffix: &str, value: &T) -> Result<()> {
        write_json(&self.path(id, suffix), value)
    }

    /// Ids of every stored `{id}_output.json`, sorted.
    pub fn output_ids(&self) -> Result<Vec<String>> {
        Ok(json_files(&self.dir)?
            .iter()
            .filter_map(|p| p.file_name()?.to_str()?.strip_suffix(OUTPUT_SUFFIX).map(String::from))
            .collect())
    }
}
