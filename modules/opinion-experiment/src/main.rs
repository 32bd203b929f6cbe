//! Runs opinion simulations over a directory of proposals and scores the
//! results against ground truth.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use ai_client::OpenAi;
use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use opinion_sim::{MetricsEngine, OpinionScale, SimConfig, Simulation, SimulationMode};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod evaluate;
mod experiment;
mod store;

use experiment::Experiment;
use store::{load_profile, load_proposals, write_json, ExperimentStore, EVALUATION_FILE};

const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Parser)]
#[command(name = "opinion-experiment")]
#[command(about = "Simulate resident opinions on policy proposals")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate every proposal in a directory
    Run {
        /// Experiment name, used in the output directory name
        #[arg(long)]
        name: String,

        /// Directory of proposal JSON files
        #[arg(long)]
        inputs: PathBuf,

        /// Demographic profile JSON file
        #[arg(long)]
        demographics: PathBuf,

        /// Region name (overrides the profile's own)
        #[arg(long)]
        region: Option<String>,

        /// Directory holding `{id}_ground_truth.json` files
        #[arg(long)]
        ground_truth: Option<PathBuf>,

        /// Root directory for experiment output
        #[arg(long, default_value = "experiments")]
        out: PathBuf,

        /// Model name passed to the backend
        #[arg(long, env = "SIM_MODEL", default_value = DEFAULT_MODEL)]
        model: String,

        /// Agents per proposal (overrides SIM_POPULATION)
        #[arg(long)]
        population: Option<u32>,

        /// per_agent or population (overrides SIM_MODE)
        #[arg(long)]
        mode: Option<SimulationMode>,

        /// Random seed (overrides SIM_SEED)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Re-score the outputs of a finished experiment
    Evaluate {
        /// Experiment directory produced by `run`
        #[arg(long)]
        dir: PathBuf,

        /// Ground truth directory (defaults to the experiment directory)
        #[arg(long)]
        ground_truth: Option<PathBuf>,

        /// Where to write the report (defaults to evaluation_results.json in the experiment)
        #[arg(long)]
        save: Option<PathBuf>,

        /// Rating anchors as oppose,neutral,support (overrides SIM_OPINION_SCALE)
        #[arg(long)]
        opinion_scale: Option<OpinionScale>,
    },
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("opinion_sim=info".parse()?)
        .add_directive("opinion_experiment=info".parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.json) {
        eprintln!("Error: {e:#}");
        return ExitCode::from(1);
    }

    if let Err(e) = run(cli.command).await {
        error!(error = %format!("{e:#}"), "opinion-experiment failed");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            name,
            inputs,
            demographics,
            region,
            ground_truth,
            out,
            model,
            population,
            mode,
            seed,
        } => {
            let mut config = SimConfig::from_env()?;
            if let Some(population) = population {
                config.population = population;
            }
            if let Some(mode) = mode {
                config.mode = mode;
            }
            if seed.is_some() {
                config.seed = seed;
            }
            config.validate()?;

            let profile = load_profile(&demographics, region.as_deref())?;
            let proposals = load_proposals(&inputs)?;
            info!(proposals = proposals.len(), region = %profile.region, "Loaded inputs");

            let backend = OpenAi::from_env(&model)?
                .with_timeout(config.request_timeout)
                .context("Failed to configure backend")?;
            let simulation = Simulation::builder()
                .backend(Arc::new(backend))
                .config(config)
                .build();

            let started_at = Utc::now();
            let store = ExperimentStore::create(&out, &name, &model, started_at)?;
            let experiment = Experiment {
                name: &name,
                model: &model,
                simulation: &simulation,
                profile: &profile,
                ground_truth_dir: ground_truth.as_deref(),
                started_at,
            };
            let metadata = experiment.run(&store, &proposals).await?;

            println!("\nExperiment {} complete", metadata.run_id);
            println!(
                "Proposals: {}/{} completed  |  Duration: {:.2}s",
                metadata.completed(),
                metadata.proposals.len(),
                metadata.duration_secs
            );
            println!("Results saved in: {}", store.dir().display());
            Ok(())
        }

        Commands::Evaluate {
            dir,
            ground_truth,
            save,
            opinion_scale,
        } => {
            let scale = match opinion_scale {
                Some(scale) => Some(scale),
                None => SimConfig::from_env()?.opinion_scale,
            };
            let store = ExperimentStore::open(&dir)?;
            let ground_truth = ground_truth.unwrap_or_else(|| dir.clone());
            let report = evaluate::evaluate_experiment(&store, &ground_truth, &MetricsEngine::new(scale))?;

            let path = save.unwrap_or_else(|| dir.join(EVALUATION_FILE));
            write_json(&path, &report)?;
            println!(
                "Scored {} proposals ({} without ground truth, {} errors)",
                report.results.len(),
                report.missing_ground_truth.len(),
                report.errors.len()
            );
            if let Some(average) = report.average_population {
                println!(
                    "Average JS: {:.4}  |  Chi-square: {:.4}  |  TV: {:.4}",
                    average.avg_js_divergence, average.avg_chi_square, average.avg_total_variation
                );
            }
            println!("Report saved to: {}", path.display());
            Ok(())
        }
    }
}
