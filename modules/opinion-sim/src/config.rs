use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::metrics::OpinionScale;

/// How opinions are produced for a proposal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationMode {
    /// One generation call per sampled agent.
    #[default]
    PerAgent,
    /// One set of category-probability queries for the whole population.
    Population,
}

impl FromStr for SimulationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "per_agent" | "agent" => Ok(Self::PerAgent),
            "population" => Ok(Self::Population),
            other => Err(format!("unknown simulation mode '{other}'")),
        }
    }
}

impl fmt::Display for SimulationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerAgent => write!(f, "per_agent"),
            Self::Population => write!(f, "population"),
        }
    }
}

/// What happens when an agent exhausts its attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record a neutral placeholder and keep going.
    #[default]
    Fallback,
    /// Abort the proposal on the first exhausted agent.
    FailFast,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "fallback" => Ok(Self::Fallback),
            "fail_fast" | "failfast" => Ok(Self::FailFast),
            other => Err(format!("unknown failure policy '{other}'")),
        }
    }
}

/// Simulation settings, loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    pub population: u32,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub seed: Option<u64>,
    pub failure_policy: FailurePolicy,
    pub mode: SimulationMode,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout: Duration,
    /// Deadline for all agents of one proposal.
    pub proposal_timeout: Option<Duration>,
    pub retry_backoff: Duration,
    /// Numeric anchors for opinion-score metrics. Unset disables them.
    pub opinion_scale: Option<OpinionScale>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            population: 30,
            concurrency: 5,
            max_attempts: 3,
            seed: None,
            failure_policy: FailurePolicy::default(),
            mode: SimulationMode::default(),
            temperature: 0.7,
            max_tokens: 800,
            request_timeout: Duration::from_secs(60),
            proposal_timeout: None,
            retry_backoff: Duration::from_millis(250),
            opinion_scale: None,
        }
    }
}

impl SimConfig {
    /// Load configuration from `SIM_*` environment variables (and `.env`).
    /// Unset variables fall back to defaults; malformed ones are errors.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            population: env_or("SIM_POPULATION", defaults.population)?,
            concurrency: env_or("SIM_CONCURRENCY", defaults.concurrency)?,
            max_attempts: env_or("SIM_MAX_ATTEMPTS", defaults.max_attempts)?,
            seed: env_opt("SIM_SEED")?,
            failure_policy: env_or("SIM_FAILURE_POLICY", defaults.failure_policy)?,
            mode: env_or("SIM_MODE", defaults.mode)?,
            temperature: env_or("SIM_TEMPERATURE", defaults.temperature)?,
            max_tokens: env_or("SIM_MAX_TOKENS", defaults.max_tokens)?,
            request_timeout: env_opt("SIM_REQUEST_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            proposal_timeout: env_opt("SIM_PROPOSAL_TIMEOUT_SECS")?.map(Duration::from_secs),
            retry_backoff: env_opt("SIM_RETRY_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
            opinion_scale: env_opt("SIM_OPINION_SCALE")?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.population == 0 {
            return Err(SimError::InvalidConfig("population must be at least 1".into()));
        }
        if self.concurrency == 0 {
            return Err(SimError::InvalidConfig("concurrency must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(SimError::InvalidConfig("max_attempts must be at least 1".into()));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "temperature must be a non-negative number, got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}

fn env_opt<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        _ => Ok(None),
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    Ok(env_opt(key)?.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SimConfig::default();
        assert_eq!(config.population, 30);
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config = SimConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SimError::InvalidConfig(_))));
    }

    #[test]
    fn zero_population_is_rejected() {
        let config = SimConfig {
            population: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn mode_and_policy_parse() {
        assert_eq!("population".parse::<SimulationMode>(), Ok(SimulationMode::Population));
        assert_eq!("per-agent".parse::<SimulationMode>(), Ok(SimulationMode::PerAgent));
        assert_eq!("fail_fast".parse::<FailurePolicy>(), Ok(FailurePolicy::FailFast));
        assert!("sometimes".parse::<FailurePolicy>().is_err());
    }
}
