//! Agents and the opinions they produce.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// Opinion
// =============================================================================

/// An agent's stance on a proposal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Opinion {
    Support,
    Neutral,
    Oppose,
}

impl Opinion {
    pub const ALL: [Opinion; 3] = [Opinion::Support, Opinion::Neutral, Opinion::Oppose];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Support => "support",
            Self::Neutral => "neutral",
            Self::Oppose => "oppose",
        }
    }
}

impl fmt::Display for Opinion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Opinion {
    type Err = String;

    /// Accepts the three labels plus common synonyms, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c == '*')
            .trim()
            .to_lowercase();
        match normalized.as_str() {
            "support" | "supports" | "supportive" | "for" | "favor" | "in favor" => {
                Ok(Self::Support)
            }
            "oppose" | "opposes" | "opposed" | "against" | "opposition" => Ok(Self::Oppose),
            "neutral" | "undecided" | "mixed" => Ok(Self::Neutral),
            _ => Err(format!("'{}' is not a recognised opinion", s.trim())),
        }
    }
}

// =============================================================================
// Demographic attributes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Age,
    IncomeLevel,
    EducationLevel,
    Occupation,
    Gender,
    Religion,
    Race,
}

impl Attribute {
    pub const ALL: [Attribute; 7] = [
        Attribute::Age,
        Attribute::IncomeLevel,
        Attribute::EducationLevel,
        Attribute::Occupation,
        Attribute::Gender,
        Attribute::Religion,
        Attribute::Race,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::IncomeLevel => "income_level",
            Self::EducationLevel => "education_level",
            Self::Occupation => "occupation",
            Self::Gender => "gender",
            Self::Religion => "religion",
            Self::Race => "race",
        }
    }

    /// Human-readable label used in prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Age => "Age",
            Self::IncomeLevel => "Income level",
            Self::EducationLevel => "Education level",
            Self::Occupation => "Occupation",
            Self::Gender => "Gender",
            Self::Religion => "Religion",
            Self::Race => "Race/ethnicity",
        }
    }

    /// Resolve a profile key such as `income_level`, `income` or
    /// `age_distribution`.
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim().to_lowercase();
        let key = key.strip_suffix("_distribution").unwrap_or(&key);
        match key {
            "age" => Some(Self::Age),
            "income_level" | "income" => Some(Self::IncomeLevel),
            "education_level" | "education" => Some(Self::EducationLevel),
            "occupation" => Some(Self::Occupation),
            "gender" | "sex" => Some(Self::Gender),
            "religion" => Some(Self::Religion),
            "race" | "ethnicity" | "race_ethnicity" => Some(Self::Race),
            _ => None,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Attribute values for one agent, ordered by attribute.
pub type Demographics = BTreeMap<Attribute, String>;

// =============================================================================
// Agent
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

/// A synthetic individual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: u32,
    pub demographics: Demographics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<String>,
}

impl Agent {
    pub fn new(id: u32, demographics: Demographics) -> Self {
        Self {
            id,
            demographics,
            location: None,
            cell_id: None,
        }
    }
}

// =============================================================================
// Generated opinions
// =============================================================================

/// The structured answer the backend is asked to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OpinionResponse {
    /// The resident's stance on the proposal.
    pub opinion: Opinion,
    /// One or two sentences in the resident's own voice.
    pub comment: String,
    /// Short phrases naming what drives the stance.
    #[serde(default)]
    pub themes: Vec<String>,
    /// Letter codes from the reason list that apply.
    #[serde(default)]
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Parse,
    Transport,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse => write!(f, "unparseable response"),
            Self::Transport => write!(f, "backend failure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationFailure {
    pub kind: FailureKind,
    pub attempts: u32,
    pub reason: String,
}

/// One agent's recorded opinion. Failed agents carry a neutral placeholder
/// and a `failure` record; they never count toward summaries or themes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOpinion {
    pub id: u32,
    pub agent: Demographics,
    pub opinion: Opinion,
    pub comment: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub themes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<GenerationFailure>,
}

impl AgentOpinion {
    pub fn generated(agent: &Agent, response: OpinionResponse) -> Self {
        Self {
            id: agent.id,
            agent: agent.demographics.clone(),
            opinion: response.opinion,
            comment: response.comment,
            themes: response.themes,
            reasons: response.reasons,
            cell_id: agent.cell_id.clone(),
            location: agent.location,
            failure: None,
        }
    }

    pub fn failed(agent: &Agent, failure: GenerationFailure) -> Self {
        Self {
            id: agent.id,
            agent: agent.demographics.clone(),
            opinion: Opinion::Neutral,
            comment: format!(
                "[generation failed: {} after {} attempts]",
                failure.kind, failure.attempts
            ),
            themes: Vec::new(),
            reasons: Vec::new(),
            cell_id: agent.cell_id.clone(),
            location: agent.location,
            failure: Some(failure),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Scenario key used by per-participant metrics.
    pub fn scenario(&self) -> &str {
        self.cell_id.as_deref().unwrap_or("default")
    }
}
