//! Per-agent opinion generation with retry, fallback and bounded fan-out.

use std::sync::Arc;
use std::time::Duration;

use ai_client::{strip_code_blocks, truncate_to_char_boundary, GenerateOptions, TextGenerator};
use futures::stream::{self, StreamExt};
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentOpinion, FailureKind, GenerationFailure, Opinion, OpinionResponse};
use crate::config::{FailurePolicy, SimConfig};
use crate::error::{Result, SimError};
use crate::prompt;
use crate::reasons::ReasonCatalog;

/// Upper bound on random jitter added to each retry backoff.
const MAX_JITTER_MS: u64 = 100;

// =============================================================================
// Response parsing
// =============================================================================

/// Loosely-typed JSON shape; validated into [`OpinionResponse`].
#[derive(Debug, Deserialize)]
struct RawResponse {
    opinion: String,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    themes: Vec<String>,
    #[serde(default)]
    reasons: Vec<String>,
}

/// Parse a backend response into an opinion. Accepts a JSON object (optionally
/// fenced) or labeled lines (`Opinion:`, `Comment:`, `Themes:`, `Reasons:`).
/// Reason codes outside `reasons` are dropped.
pub fn parse_opinion_response(
    text: &str,
    reasons: &ReasonCatalog,
) -> std::result::Result<OpinionResponse, String> {
    let body = strip_code_blocks(text);
    let raw = if body.starts_with('{') {
        serde_json::from_str::<RawResponse>(body).map_err(|e| format!("invalid JSON: {e}"))?
    } else {
        parse_labeled_lines(body)?
    };

    let opinion: Opinion = raw.opinion.parse()?;
    let comment = raw.comment.trim().to_string();
    if comment.is_empty() {
        return Err("comment is empty".to_string());
    }

    let mut themes: Vec<String> = Vec::new();
    for theme in raw.themes {
        let theme = theme.trim().to_string();
        if !theme.is_empty() && !themes.contains(&theme) {
            themes.push(theme);
        }
    }

    Ok(OpinionResponse {
        opinion,
        comment,
        themes,
        reasons: reasons.filter_codes(&raw.reasons),
    })
}

fn parse_labeled_lines(body: &str) -> std::result::Result<RawResponse, String> {
    let mut opinion = None;
    let mut comment: Vec<String> = Vec::new();
    let mut themes = Vec::new();
    let mut reasons = Vec::new();
    let mut in_comment = false;

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let labeled = line.split_once(':').and_then(|(label, value)| {
            let label = label.trim().trim_start_matches(['-', '*']).trim().to_lowercase();
            match label.as_str() {
                "opinion" | "stance" | "position" => Some(("opinion", value)),
                "comment" | "rationale" => Some(("comment", value)),
                "themes" | "theme" => Some(("themes", value)),
                "reasons" | "reason codes" => Some(("reasons", value)),
                _ => None,
            }
        });

        match labeled {
            Some(("opinion", value)) => {
                opinion = Some(value.trim().to_string());
                in_comment = false;
            }
            Some(("comment", value)) => {
                comment.push(value.trim().to_string());
                in_comment = true;
            }
            Some(("themes", value)) => {
                themes = split_list(value);
                in_comment = false;
            }
            Some(("reasons", value)) => {
                reasons = split_list(value);
                in_comment = false;
            }
            _ if in_comment => comment.push(line.to_string()),
            _ => {}
        }
    }

    let opinion = opinion.ok_or_else(|| "no Opinion line or JSON object found".to_string())?;
    Ok(RawResponse {
        opinion,
        comment: comment.join(" ").trim().to_string(),
        themes,
        reasons,
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .map(|s| s.trim().trim_matches(['"', '[', ']']).trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// =============================================================================
// Generator
// =============================================================================

/// Opinions for a batch of agents, sorted by agent id.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationBatch {
    pub opinions: Vec<AgentOpinion>,
    pub parse_failures: usize,
    pub transport_failures: usize,
}

impl GenerationBatch {
    pub fn failed(&self) -> usize {
        self.parse_failures + self.transport_failures
    }
}

pub struct OpinionGenerator {
    backend: Arc<dyn TextGenerator>,
    reasons: ReasonCatalog,
    options: GenerateOptions,
    max_attempts: u32,
    concurrency: usize,
    request_timeout: Duration,
    proposal_timeout: Option<Duration>,
    retry_backoff: Duration,
    failure_policy: FailurePolicy,
}

impl OpinionGenerator {
    pub fn new(backend: Arc<dyn TextGenerator>, config: &SimConfig, reasons: ReasonCatalog) -> Self {
        Self {
            backend,
            reasons,
            options: GenerateOptions::default()
                .temperature(config.temperature)
                .max_tokens(config.max_tokens)
                .json(),
            max_attempts: config.max_attempts.max(1),
            concurrency: config.concurrency.max(1),
            request_timeout: config.request_timeout,
            proposal_timeout: config.proposal_timeout,
            retry_backoff: config.retry_backoff,
            failure_policy: config.failure_policy,
        }
    }

    /// Generate one agent's opinion, retrying unusable responses and
    /// transient backend errors up to the attempt budget.
    pub async fn generate(
        &self,
        agent: &Agent,
        region: &str,
        proposal: &str,
    ) -> Result<OpinionResponse> {
        let prompt = prompt::opinion_prompt(region, agent, proposal, &self.reasons);
        let mut last_failure = (FailureKind::Transport, String::from("no attempt made"));
        let mut attempts = 0;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let backoff = self.retry_backoff * 2u32.pow(attempt - 1);
                let jitter = Duration::from_millis(rand::rng().random_range(0..=MAX_JITTER_MS));
                tokio::time::sleep(backoff + jitter).await;
            }
            attempts = attempt + 1;

            let outcome = tokio::time::timeout(
                self.request_timeout,
                self.backend.generate(&prompt, &self.options),
            )
            .await;

            match outcome {
                Ok(Ok(text)) => match parse_opinion_response(&text, &self.reasons) {
                    Ok(response) => {
                        debug!(agent_id = agent.id, opinion = %response.opinion, attempts, "Opinion generated");
                        return Ok(response);
                    }
                    Err(reason) => {
                        warn!(
                            agent_id = agent.id,
                            attempt = attempts,
                            reason = %reason,
                            preview = truncate_to_char_boundary(&text, 200),
                            "Unusable opinion response"
                        );
                        last_failure = (FailureKind::Parse, reason);
                    }
                },
                Ok(Err(e)) => {
                    warn!(agent_id = agent.id, attempt = attempts, error = %e, "Opinion request failed");
                    let retryable = e.is_retryable();
                    last_failure = (FailureKind::Transport, e.to_string());
                    if !retryable {
                        break;
                    }
                }
                Err(_) => {
                    warn!(
                        agent_id = agent.id,
                        attempt = attempts,
                        timeout_secs = self.request_timeout.as_secs(),
                        "Opinion request timed out"
                    );
                    last_failure = (
                        FailureKind::Transport,
                        format!("timed out after {}s", self.request_timeout.as_secs()),
                    );
                }
            }
        }

        let (kind, reason) = last_failure;
        Err(match kind {
            FailureKind::Parse => SimError::GenerationParseFailure {
                agent_id: agent.id,
                attempts,
                reason,
            },
            FailureKind::Transport => SimError::GenerationTransportFailure {
                agent_id: agent.id,
                attempts,
                reason,
            },
        })
    }

    /// Generate opinions for every agent with at most `concurrency` requests
    /// in flight. Under [`FailurePolicy::Fallback`] failed agents get a tagged
    /// placeholder; under [`FailurePolicy::FailFast`] the first failure aborts.
    pub async fn generate_batch(
        &self,
        agents: &[Agent],
        region: &str,
        proposal: &str,
    ) -> Result<GenerationBatch> {
        let deadline = self
            .proposal_timeout
            .map(|budget| tokio::time::Instant::now() + budget);

        let mut results = stream::iter(agents.iter().map(|agent| async move {
            let generation = self.generate(agent, region, proposal);
            let result = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, generation).await {
                    Ok(result) => result,
                    Err(_) => Err(SimError::GenerationTransportFailure {
                        agent_id: agent.id,
                        attempts: 0,
                        reason: "proposal time budget exhausted".to_string(),
                    }),
                },
                None => generation.await,
            };
            (agent, result)
        }))
        .buffer_unordered(self.concurrency);

        let mut batch = GenerationBatch {
            opinions: Vec::with_capacity(agents.len()),
            parse_failures: 0,
            transport_failures: 0,
        };

        while let Some((agent, result)) = results.next().await {
            match result {
                Ok(response) => batch.opinions.push(AgentOpinion::generated(agent, response)),
                Err(e) if self.failure_policy == FailurePolicy::FailFast => return Err(e),
                Err(e) => {
                    let failure = match e {
                        SimError::GenerationParseFailure { attempts, reason, .. } => {
                            batch.parse_failures += 1;
                            GenerationFailure {
                                kind: FailureKind::Parse,
                                attempts,
                                reason,
                            }
                        }
                        SimError::GenerationTransportFailure { attempts, reason, .. } => {
                            batch.transport_failures += 1;
                            GenerationFailure {
                                kind: FailureKind::Transport,
                                attempts,
                                reason,
                            }
                        }
                        other => return Err(other),
                    };
                    batch.opinions.push(AgentOpinion::failed(agent, failure));
                }
            }
        }

        batch.opinions.sort_by_key(|o| o.id);
        info!(
            agents = agents.len(),
            failed = batch.failed(),
            backend = self.backend.name(),
            "Opinion batch complete"
        );
        Ok(batch)
    }
}
