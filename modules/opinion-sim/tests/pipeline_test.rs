//! End-to-end runs of the simulation core against mock backends.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use opinion_sim::testing::{one_cell_proposal, test_profile, FailureMode, FixedProbabilities, ScriptedGenerator};
use opinion_sim::{
    aggregate, Agent, Attribute, Demographics, FailurePolicy, GroundTruth, OpinionGenerator, Proposal,
    ReasonCatalog, SimConfig, SimError, Simulation, SimulationMode,
};

fn config(population: u32) -> SimConfig {
    SimConfig {
        population,
        seed: Some(42),
        retry_backoff: Duration::ZERO,
        ..Default::default()
    }
}

fn agent(id: u32, occupation: &str) -> Agent {
    let demographics: Demographics = BTreeMap::from([
        (Attribute::Age, "35-64".to_string()),
        (Attribute::Occupation, occupation.to_string()),
    ]);
    Agent::new(id, demographics)
}

#[tokio::test]
async fn unanimous_support_from_thirty_agents() {
    let backend = Arc::new(ScriptedGenerator::supporting(
        "More homes near transit.",
        &["housing supply"],
    ));
    let simulation = Simulation::builder()
        .backend(backend.clone())
        .config(config(30))
        .build();

    let outcome = simulation
        .run(&one_cell_proposal(), &test_profile("test_region"), None)
        .await
        .unwrap();

    let result = &outcome.result;
    assert_eq!(result.summary.support, 30);
    assert_eq!(result.summary.neutral, 0);
    assert_eq!(result.summary.oppose, 0);
    assert_eq!(result.key_themes.support, vec!["housing supply"]);
    assert!(result.key_themes.oppose.is_empty());
    assert_eq!(result.comments.len(), 30);
    assert!(result.comments.iter().all(|c| c.cell_id.as_deref() == Some("10_15")));
    assert!(result.comments.iter().all(|c| c.location.is_some()));
    assert_eq!(result.percentages().support, 100);
    assert_eq!(backend.calls(), 30);
    assert!(outcome.metrics.is_none());
}

#[tokio::test]
async fn failed_agents_are_kept_as_placeholders() {
    let backend = Arc::new(
        ScriptedGenerator::supporting("Fine by me.", &["jobs"]).fail_when("Occupation: retail", FailureMode::Garbage),
    );
    let generator = OpinionGenerator::new(backend.clone(), &config(10), ReasonCatalog::default());
    let agents: Vec<Agent> = (1..=10)
        .map(|id| agent(id, if id % 3 == 0 { "retail" } else { "teacher" }))
        .collect();

    let batch = generator
        .generate_batch(&agents, "test_region", "Build more housing")
        .await
        .unwrap();
    assert_eq!(batch.failed(), 3);
    assert_eq!(batch.parse_failures, 3);

    let result = aggregate(batch.opinions);
    assert_eq!(result.stats.successful, 7);
    assert_eq!(result.stats.failed, 3);
    assert_eq!(result.summary.total(), 7);
    assert_eq!(result.comments.len(), 10);

    let failed: Vec<u32> = result.comments.iter().filter(|c| c.is_failed()).map(|c| c.id).collect();
    assert_eq!(failed, vec![3, 6, 9]);
    assert!(result.comments[2].comment.contains("generation failed"));
    // 7 successes plus 3 attempts for each of the 3 failures.
    assert_eq!(backend.calls(), 7 + 3 * 3);
}

#[tokio::test]
async fn fail_fast_aborts_the_proposal() {
    let backend = Arc::new(ScriptedGenerator::always("no").fail_when("Occupation", FailureMode::Transport));
    let simulation = Simulation::builder()
        .backend(backend)
        .config(SimConfig {
            failure_policy: FailurePolicy::FailFast,
            ..config(5)
        })
        .build();

    let err = simulation
        .run(&one_cell_proposal(), &test_profile("r"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SimError::GenerationTransportFailure { attempts: 3, .. }));
}

#[tokio::test]
async fn seeded_runs_are_identical() {
    let simulation = Simulation::builder()
        .backend(Arc::new(ScriptedGenerator::supporting("Yes.", &["density"])))
        .config(config(25))
        .build();
    let proposal = one_cell_proposal();
    let profile = test_profile("test_region");

    let first = simulation.run(&proposal, &profile, None).await.unwrap();
    let second = simulation.run(&proposal, &profile, None).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first.result).unwrap(),
        serde_json::to_string(&second.result).unwrap()
    );
}

#[test]
fn sampler_honours_population_size() {
    let simulation = Simulation::builder()
        .backend(Arc::new(ScriptedGenerator::always("{}")))
        .config(config(17))
        .build();
    let agents = simulation
        .sample_agents(&Proposal::from_text("Bike lanes", "Protected lanes on Main St"), &test_profile("r"))
        .unwrap();
    assert_eq!(agents.len(), 17);
    assert!(agents.iter().all(|a| a.demographics.len() == Attribute::ALL.len()));
    assert!(agents.iter().all(|a| a.cell_id.is_none() && a.location.is_none()));
    let ids: Vec<u32> = agents.iter().map(|a| a.id).collect();
    assert_eq!(ids, (1..=17).collect::<Vec<_>>());
}

#[tokio::test]
async fn population_mode_reports_distribution_and_metrics() {
    let backend = Arc::new(
        FixedProbabilities::new()
            .on("random resident", [("A", 0.5), ("B", 0.25), ("C", 0.25)])
            .on("opposes this policy", [("E", 1.0)]),
    );
    let simulation = Simulation::builder()
        .backend(backend)
        .config(SimConfig {
            mode: SimulationMode::Population,
            ..config(40)
        })
        .build();
    let truth = GroundTruth::Population {
        distribution: BTreeMap::from([
            ("support".to_string(), 0.5),
            ("neutral".to_string(), 0.25),
            ("oppose".to_string(), 0.25),
        ]),
    };

    let outcome = simulation
        .run(&one_cell_proposal(), &test_profile("test_region"), Some(&truth))
        .await
        .unwrap();

    assert_eq!(outcome.result.summary.support, 20);
    assert_eq!(outcome.result.summary.oppose, 10);
    assert_eq!(outcome.result.summary.neutral, 10);
    assert!(outcome.result.comments.is_empty());

    let estimate = outcome.population_estimate.unwrap();
    let total: f64 = estimate.opinion_distribution.values().sum();
    assert!((total - 1.0).abs() < 1e-6);
    assert_eq!(outcome.result.key_themes.oppose.len(), 1);

    let population = outcome.metrics.unwrap().population.unwrap();
    assert!(population.js_divergence.abs() < 1e-6);
    assert!(population.total_variation.abs() < 1e-12);
}

#[tokio::test]
async fn metrics_errors_do_not_fail_the_proposal() {
    let simulation = Simulation::builder()
        .backend(Arc::new(ScriptedGenerator::supporting("Sure.", &[])))
        .config(config(4))
        .build();
    let truth = GroundTruth::Grouped {
        group_by: "agent.favourite_colour".to_string(),
        groups: BTreeMap::new(),
        distributions: BTreeMap::new(),
    };

    let outcome = simulation
        .run(&one_cell_proposal(), &test_profile("r"), Some(&truth))
        .await
        .unwrap();
    assert_eq!(outcome.result.summary.support, 4);
    assert!(outcome.metrics.is_none());
    assert!(outcome.metrics_error.is_some());
}
