mod client;
pub(crate) mod types;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::AiError;
use crate::traits::{GenerateOptions, TextGenerator};

use client::OpenAiClient;
use types::{uses_max_completion_tokens, ChatRequest, WireMessage};

/// How many alternatives to request for the first token when scoring categories.
const TOP_LOGPROBS: u8 = 20;

// =============================================================================
// OpenAi Backend
// =============================================================================

/// OpenAI-compatible chat-completions backend. Works against any endpoint
/// speaking the same protocol via [`OpenAi::with_base_url`].
#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    model: String,
    base_url: Option<String>,
    http: reqwest::Client,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self, AiError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AiError::Config("OPENAI_API_KEY environment variable not set".into()))?;
        let mut ai = Self::new(api_key, model);
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            ai = ai.with_base_url(url);
        }
        Ok(ai)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Apply a transport-level timeout to every request.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, AiError> {
        self.http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AiError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(self)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> OpenAiClient {
        let client = OpenAiClient::new(&self.api_key, self.http.clone());
        if let Some(ref url) = self.base_url {
            client.with_base_url(url)
        } else {
            client
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAi {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, AiError> {
        let mut request = ChatRequest::new(&self.model)
            .message(WireMessage::user(prompt))
            .token_limit(options.max_tokens);
        if !uses_max_completion_tokens(&self.model) {
            request = request.temperature(options.temperature);
        }
        if options.json_mode {
            request = request.json_object();
        }

        let response = self.client().chat(&request).await?;

        response
            .text()
            .map(|t| t.trim().to_string())
            .ok_or_else(|| AiError::Parse("No content in OpenAI response".into()))
    }

    async fn category_probabilities(
        &self,
        prompt: &str,
        categories: &[String],
    ) -> Result<BTreeMap<String, f64>, AiError> {
        if categories.is_empty() {
            return Err(AiError::Config("No categories to score".into()));
        }

        let system = format!(
            "Answer with exactly one of the following labels and nothing else: {}",
            categories.join(", ")
        );
        let mut request = ChatRequest::new(&self.model)
            .message(WireMessage::system(system))
            .message(WireMessage::user(prompt))
            .token_limit(1)
            .top_logprobs(TOP_LOGPROBS);
        if !uses_max_completion_tokens(&self.model) {
            request = request.temperature(0.0);
        }

        let response = self.client().chat(&request).await?;
        softmax_over_categories(&response.first_token_candidates(), categories)
    }
}

/// Renormalise the log-probabilities of the category labels among the
/// candidate tokens. Labels that never appear get zero mass.
pub(crate) fn softmax_over_categories(
    candidates: &[(String, f64)],
    categories: &[String],
) -> Result<BTreeMap<String, f64>, AiError> {
    let logprobs: Vec<Option<f64>> = categories
        .iter()
        .map(|category| {
            candidates
                .iter()
                .filter(|(token, _)| token.trim().eq_ignore_ascii_case(category))
                .map(|(_, lp)| *lp)
                .fold(None, |best: Option<f64>, lp| {
                    Some(best.map_or(lp, |b| b.max(lp)))
                })
        })
        .collect();

    let max = logprobs
        .iter()
        .flatten()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return Err(AiError::Parse(format!(
            "None of the categories [{}] appeared among the top tokens",
            categories.join(", ")
        )));
    }

    let weights: Vec<f64> = logprobs
        .iter()
        .map(|lp| lp.map_or(0.0, |lp| (lp - max).exp()))
        .collect();
    let total: f64 = weights.iter().sum();

    Ok(categories
        .iter()
        .zip(weights)
        .map(|(c, w)| (c.clone(), w / total))
        .collect())
}
