//! Prompt templates for opinion generation and population-level estimates.

use crate::agent::{Agent, Opinion, OpinionResponse};
use crate::reasons::ReasonCatalog;

/// JSON schema of [`OpinionResponse`], embedded in the per-agent prompt.
pub fn response_schema() -> String {
    let schema = schemars::schema_for!(OpinionResponse);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

fn resident_profile(agent: &Agent) -> String {
    if agent.demographics.is_empty() {
        return "- No demographic details provided".to_string();
    }
    agent
        .demographics
        .iter()
        .map(|(attribute, value)| format!("- {}: {value}", attribute.label()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the per-agent prompt: who the resident is, what is proposed, and
/// the exact response shape expected.
pub fn opinion_prompt(
    region: &str,
    agent: &Agent,
    proposal: &str,
    reasons: &ReasonCatalog,
) -> String {
    let location_line = agent
        .cell_id
        .as_ref()
        .map(|cell| format!("\nYou live closest to rezoned area {cell}.\n"))
        .unwrap_or_default();

    format!(
        r#"You are a resident of {region} with the following characteristics:
{profile}
{location_line}
A policy proposal is under public discussion:

{proposal}

Consider how the proposal would affect you and your neighborhood: housing
availability and affordability, neighborhood character, infrastructure and
public services, the local economy, the environment, and who might be displaced.

State whether you support, oppose, or are neutral on the proposal, and write a
short public comment in your own voice.

Reason codes (choose 1-3 that drive your stance):
{reason_list}

Respond with a single JSON object matching this schema:
{schema}

Example: {{"opinion": "support", "comment": "More homes near transit would let my kids stay in the city.", "themes": ["housing supply"], "reasons": ["A", "G"]}}"#,
        region = region,
        profile = resident_profile(agent),
        location_line = location_line,
        proposal = proposal,
        reason_list = reasons.listing(),
        schema = response_schema(),
    )
}

/// Labels used when scoring the support/oppose/neutral split.
pub const OPINION_LABELS: [(&str, Opinion); 3] = [
    ("A", Opinion::Support),
    ("B", Opinion::Oppose),
    ("C", Opinion::Neutral),
];

/// Ask for the population's overall stance as a single-letter answer.
pub fn opinion_distribution_prompt(region: &str, proposal: &str, demographics: &str) -> String {
    format!(
        r#"Consider the residents of {region}, whose demographic makeup is:
{demographics}

The following policy is proposed:
{proposal}

If you picked a random resident of {region}, what would their stance on this policy be?
A. Support
B. Oppose
C. Neutral

Answer with a single letter."#
    )
}

/// Ask which reason most likely drives residents holding `stance`.
pub fn reason_distribution_prompt(
    region: &str,
    proposal: &str,
    stance: Opinion,
    reasons: &ReasonCatalog,
) -> String {
    let group = match stance {
        Opinion::Support => "supports",
        Opinion::Oppose => "opposes",
        Opinion::Neutral => "is neutral on",
    };
    format!(
        r#"The following policy is proposed in {region}:
{proposal}

A resident of {region} {group} this policy. Which of these is their main reason?
{reasons}

Answer with a single letter."#,
        reasons = reasons.inline_listing(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Attribute, Demographics};

    fn agent() -> Agent {
        let mut demographics = Demographics::new();
        demographics.insert(Attribute::Age, "25-34".into());
        demographics.insert(Attribute::Occupation, "Teacher".into());
        Agent::new(1, demographics)
    }

    #[test]
    fn opinion_prompt_fills_every_placeholder() {
        let prompt = opinion_prompt(
            "San Francisco",
            &agent(),
            "Allow six-story buildings near transit.",
            &ReasonCatalog::default(),
        );
        assert!(prompt.contains("resident of San Francisco"));
        assert!(prompt.contains("- Age: 25-34"));
        assert!(prompt.contains("- Occupation: Teacher"));
        assert!(prompt.contains("Allow six-story buildings near transit."));
        assert!(prompt.contains("L: Historical preservation"));
        assert!(prompt.contains("\"opinion\""));
        assert!(!prompt.contains("{region}"));
    }

    #[test]
    fn schema_names_the_opinion_values() {
        let schema = response_schema();
        assert!(schema.contains("support"));
        assert!(schema.contains("oppose"));
        assert!(schema.contains("comment"));
    }

    #[test]
    fn prompts_are_deterministic() {
        let a = opinion_prompt("X", &agent(), "P", &ReasonCatalog::default());
        let b = opinion_prompt("X", &agent(), "P", &ReasonCatalog::default());
        assert_eq!(a, b);
    }

    #[test]
    fn reason_prompt_lists_codes_inline() {
        let prompt = reason_distribution_prompt(
            "Oakland",
            "Upzone",
            Opinion::Oppose,
            &ReasonCatalog::default(),
        );
        assert!(prompt.contains("opposes this policy"));
        assert!(prompt.contains("A. Housing supply and availability B. Affordability"));
    }
}
