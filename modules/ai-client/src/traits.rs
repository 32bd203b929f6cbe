use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::AiError;

// =============================================================================
// Generation Options
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the backend to constrain output to a JSON object.
    pub json_mode: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 800,
            json_mode: false,
        }
    }
}

impl GenerateOptions {
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

// =============================================================================
// TextGenerator Trait
// =============================================================================

/// A text-generation capability. Any backend satisfying both calls is
/// substitutable; implementations must be safe to share across tasks.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Short identifier used in experiment records.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, AiError>;

    /// Probability of each category label being the answer to `prompt`.
    /// The returned map has one entry per category and sums to 1.
    async fn category_probabilities(
        &self,
        prompt: &str,
        categories: &[String],
    ) -> Result<BTreeMap<String, f64>, AiError>;
}
