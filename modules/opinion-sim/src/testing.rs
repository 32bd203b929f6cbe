// Test mocks for the opinion pipeline.
//
// Two mocks for the TextGenerator boundary:
// - ScriptedGenerator: fixed response with per-prompt failure rules and delays,
//   a call counter, and a peak in-flight gauge
// - FixedProbabilities: canned category distributions keyed by prompt substring
//
// Plus fixtures for a demographic profile and a one-cell proposal.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ai_client::{AiError, GenerateOptions, TextGenerator};
use async_trait::async_trait;

use crate::agent::Attribute;
use crate::demographics::DemographicProfile;
use crate::proposal::Proposal;

// ---------------------------------------------------------------------------
// ScriptedGenerator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Return text that cannot be parsed as an opinion.
    Garbage,
    /// Return a retryable backend error.
    Transport,
}

/// Returns the same response to every prompt unless a failure rule matches.
/// Builder pattern: `.fail_when()`, `.fail_first()`, `.with_delay()`,
/// `.with_delay_for()`.
pub struct ScriptedGenerator {
    response: String,
    rules: Vec<(String, FailureMode)>,
    fail_first: usize,
    fail_first_mode: FailureMode,
    delay: Option<Duration>,
    slow: Vec<(String, Duration)>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn always(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            rules: Vec::new(),
            fail_first: 0,
            fail_first_mode: FailureMode::Garbage,
            delay: None,
            slow: Vec::new(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// A support response with the given comment and themes as JSON.
    pub fn supporting(comment: &str, themes: &[&str]) -> Self {
        let response = serde_json::json!({
            "opinion": "support",
            "comment": comment,
            "themes": themes,
        });
        Self::always(response.to_string())
    }

    /// Fail every call whose prompt contains `needle`.
    pub fn fail_when(mut self, needle: impl Into<String>, mode: FailureMode) -> Self {
        self.rules.push((needle.into(), mode));
        self
    }

    /// Fail the first `n` calls regardless of prompt.
    pub fn fail_first(mut self, n: usize, mode: FailureMode) -> Self {
        self.fail_first = n;
        self.fail_first_mode = mode;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Extra delay for calls whose prompt contains `needle`.
    pub fn with_delay_for(mut self, needle: impl Into<String>, delay: Duration) -> Self {
        self.slow.push((needle.into(), delay));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most `generate` calls ever running at once.
    pub fn max_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn fail(mode: FailureMode) -> Result<String, AiError> {
        match mode {
            FailureMode::Garbage => Ok("I'd rather not say.".to_string()),
            FailureMode::Transport => Err(AiError::Network("connection reset".to_string())),
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<String, AiError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        let extra = self
            .slow
            .iter()
            .filter(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, delay)| *delay)
            .sum::<Duration>();
        let delay = self.delay.unwrap_or_default() + extra;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Self::fail(self.fail_first_mode);
        }
        if let Some((_, mode)) = self.rules.iter().find(|(needle, _)| prompt.contains(needle.as_str())) {
            return Self::fail(*mode);
        }
        Ok(self.response.clone())
    }

    async fn category_probabilities(
        &self,
        _prompt: &str,
        categories: &[String],
    ) -> Result<BTreeMap<String, f64>, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        uniform(categories)
    }
}

fn uniform(categories: &[String]) -> Result<BTreeMap<String, f64>, AiError> {
    if categories.is_empty() {
        return Err(AiError::Config("No categories to score".into()));
    }
    let p = 1.0 / categories.len() as f64;
    Ok(categories.iter().map(|c| (c.clone(), p)).collect())
}

// ---------------------------------------------------------------------------
// FixedProbabilities
// ---------------------------------------------------------------------------

/// Answers `category_probabilities` from canned tables. The first rule whose
/// needle appears in the prompt wins; otherwise the distribution is uniform.
/// Labels missing from a table get zero.
#[derive(Default)]
pub struct FixedProbabilities {
    rules: Vec<(String, BTreeMap<String, f64>)>,
}

impl FixedProbabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<I>(mut self, needle: impl Into<String>, table: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, f64)>,
    {
        self.rules.push((
            needle.into(),
            table.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        ));
        self
    }
}

#[async_trait]
impl TextGenerator for FixedProbabilities {
    fn name(&self) -> &str {
        "fixed-probabilities"
    }

    async fn generate(&self, _prompt: &str, _options: &GenerateOptions) -> Result<String, AiError> {
        Err(AiError::Config("FixedProbabilities does not generate text".into()))
    }

    async fn category_probabilities(
        &self,
        prompt: &str,
        categories: &[String],
    ) -> Result<BTreeMap<String, f64>, AiError> {
        match self.rules.iter().find(|(needle, _)| prompt.contains(needle.as_str())) {
            Some((_, table)) => Ok(categories
                .iter()
                .map(|c| (c.clone(), table.get(c).copied().unwrap_or(0.0)))
                .collect()),
            None => uniform(categories),
        }
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A profile covering all seven attributes.
pub fn test_profile(region: &str) -> DemographicProfile {
    DemographicProfile::new(region)
        .with_distribution(Attribute::Age, [("18-24", 0.2), ("25-34", 0.3), ("35-64", 0.35), ("65+", 0.15)])
        .with_distribution(Attribute::IncomeLevel, [("low", 0.3), ("middle", 0.5), ("high", 0.2)])
        .with_distribution(Attribute::EducationLevel, [("high school", 0.4), ("bachelor", 0.4), ("graduate", 0.2)])
        .with_distribution(Attribute::Occupation, [("teacher", 0.3), ("engineer", 0.3), ("retail", 0.4)])
        .with_distribution(Attribute::Gender, [("female", 0.5), ("male", 0.5)])
        .with_distribution(Attribute::Religion, [("none", 0.5), ("christian", 0.3), ("other", 0.2)])
        .with_distribution(Attribute::Race, [("asian", 0.35), ("white", 0.4), ("hispanic", 0.15), ("black", 0.1)])
}

/// One rezoned residential cell at 65 ft, inside the default bounds.
pub fn one_cell_proposal() -> Proposal {
    let mut proposal = Proposal::default();
    proposal.cells.insert(
        "10_15".to_string(),
        crate::proposal::ZoningCell {
            height_limit: Some(65.0),
            category: "residential".to_string(),
            bbox: Some(crate::proposal::GeoBounds {
                north: 37.7760,
                south: 37.7740,
                east: -122.4180,
                west: -122.4200,
            }),
            last_updated: None,
        },
    );
    proposal
}
