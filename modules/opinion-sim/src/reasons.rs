//! Letter-coded reason lists.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

const HOUSING_REASONS: [&str; 12] = [
    "Housing supply and availability",
    "Affordability for low- and middle-income residents",
    "Impact on neighborhood character",
    "Infrastructure and services capacity",
    "Economic development and job creation",
    "Environmental concerns",
    "Transit and transportation access",
    "Displacement of existing residents",
    "Equity and social justice",
    "Public space and amenities",
    "Property values and investment",
    "Historical preservation",
];

/// An ordered list of reasons, coded `A`, `B`, `C`, ... by position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ReasonCatalog {
    reasons: Vec<String>,
}

impl Default for ReasonCatalog {
    fn default() -> Self {
        Self {
            reasons: HOUSING_REASONS.iter().map(|r| r.to_string()).collect(),
        }
    }
}

impl TryFrom<Vec<String>> for ReasonCatalog {
    type Error = SimError;

    fn try_from(reasons: Vec<String>) -> Result<Self> {
        Self::new(reasons)
    }
}

impl From<ReasonCatalog> for Vec<String> {
    fn from(catalog: ReasonCatalog) -> Self {
        catalog.reasons
    }
}

impl ReasonCatalog {
    pub fn new(reasons: Vec<String>) -> Result<Self> {
        if reasons.is_empty() {
            return Err(SimError::InvalidConfig("reason list is empty".into()));
        }
        if reasons.len() > 26 {
            return Err(SimError::InvalidConfig(format!(
                "reason list has {} entries, at most 26 can be letter-coded",
                reasons.len()
            )));
        }
        Ok(Self { reasons })
    }

    pub fn len(&self) -> usize {
        self.reasons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }

    pub fn codes(&self) -> Vec<String> {
        (0..self.reasons.len()).map(code_for).collect()
    }

    pub fn label(&self, code: &str) -> Option<&str> {
        let index = index_of(code)?;
        self.reasons.get(index).map(String::as_str)
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.label(code).is_some()
    }

    /// Pairs of (code, reason) in catalog order.
    pub fn entries(&self) -> impl Iterator<Item = (String, &str)> {
        self.reasons
            .iter()
            .enumerate()
            .map(|(i, r)| (code_for(i), r.as_str()))
    }

    /// `A. first B. second ...` on one line.
    pub fn inline_listing(&self) -> String {
        self.entries()
            .map(|(code, reason)| format!("{code}. {reason}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// One `A: reason` per line.
    pub fn listing(&self) -> String {
        self.entries()
            .map(|(code, reason)| format!("{code}: {reason}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Keep only known codes, uppercased, first occurrence wins.
    pub fn filter_codes<I, S>(&self, codes: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut kept: Vec<String> = Vec::new();
        for code in codes {
            let code = code.as_ref().trim().trim_end_matches('.').to_uppercase();
            if self.contains_code(&code) && !kept.contains(&code) {
                kept.push(code);
            }
        }
        kept
    }
}

fn code_for(index: usize) -> String {
    char::from(b'A' + index as u8).to_string()
}

fn index_of(code: &str) -> Option<usize> {
    let mut chars = code.trim().chars();
    let c = chars.next()?.to_ascii_uppercase();
    if chars.next().is_some() || !c.is_ascii_uppercase() {
        return None;
    }
    Some((c as u8 - b'A') as usize)
}

/// Separate reason lists for supporters and opponents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasonDictionary {
    #[serde(default)]
    pub support_reasons: ReasonCatalog,
    #[serde(default)]
    pub oppose_reasons: ReasonCatalog,
}
