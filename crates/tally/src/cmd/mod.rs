//! Command implementations for the Tally CLI

pub mod compile;
pub mod run;
pub mod simulate;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use tally_config::Config;
use tally_experiments::{
    ExperimentError, ExperimentQueryRunner, ExperimentRequest, PlanExecutor, PlanStrategy,
};

/// Config file read when `--config` is not given
const DEFAULT_CONFIG_PATH: &str = "tally.toml";

/// Arguments shared by every command that compiles a metric
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Experiment request JSON file ({experiment, actions?, test_account_filters?})
    #[arg(value_name = "REQUEST")]
    pub request: PathBuf,

    /// Index of the metric in `experiment.metrics`
    #[arg(short, long, default_value_t = 0)]
    pub metric: usize,

    /// Plan strategy (auto, join, single_scan). Overrides config file.
    #[arg(short, long)]
    pub strategy: Option<String>,
}

/// Load the config file, falling back to defaults when none exists
///
/// An explicit path must exist; the default path is optional.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config: {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Config::from_file(DEFAULT_CONFIG_PATH)
            .with_context(|| format!("failed to load config: {}", DEFAULT_CONFIG_PATH)),
        None => Ok(Config::default()),
    }
}

/// Read an experiment request file
pub fn load_request(path: &Path) -> Result<ExperimentRequest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read request file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse request file: {}", path.display()))
}

/// Resolve plan strategy: CLI flag > config file
pub fn resolve_strategy(flag: Option<&str>, config: &Config) -> Result<PlanStrategy> {
    let name = flag.unwrap_or(config.experiments.strategy.as_str());
    name.parse::<PlanStrategy>()
        .with_context(|| format!("invalid strategy: {}", name))
}

/// Build a runner with the configured table, control variant and strategy
pub fn build_runner(
    executor: Arc<dyn PlanExecutor>,
    args: &PlanArgs,
    config: &Config,
) -> Result<ExperimentQueryRunner> {
    let strategy = resolve_strategy(args.strategy.as_deref(), config)?;
    Ok(ExperimentQueryRunner::new(executor)
        .with_strategy(strategy)
        .with_events_table(&config.experiments.events_table)
        .with_control_variant(&config.experiments.control_variant))
}

/// Run one metric and print the response as JSON
///
/// A no-data outcome prints its report before failing.
pub async fn execute_and_print(
    runner: &ExperimentQueryRunner,
    request: &ExperimentRequest,
    metric: usize,
) -> Result<()> {
    match runner.run(request, metric, Utc::now()).await {
        Ok(response) => {
            tracing::info!(
                experiment_id = request.experiment.id,
                metric,
                strategy = %response.strategy,
                variants = response.variants.len(),
                "experiment metric computed"
            );
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(ExperimentError::NoData(report)) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            anyhow::bail!("experiment {} has no usable data", request.experiment.id)
        }
        Err(e) => Err(e).with_context(|| {
            format!(
                "failed to run metric {} of experiment {}",
                metric, request.experiment.id
            )
        }),
    }
}
