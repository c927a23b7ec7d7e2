//! Tally - experiment metric query compiler
//!
//! # Usage
//!
//! ```bash
//! # Print the ClickHouse SQL for the first metric
//! tally compile request.json
//!
//! # Run metric 2 against ClickHouse from the [query] config section
//! tally run request.json --metric 2 --config tally.toml
//!
//! # Dry-run against local events
//! tally simulate request.json --events events.jsonl --strategy join
//! ```

mod cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tally_config::{Config, LogFormat};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Tally - experiment metric query compiler
#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (error if specified but not found)
    #[arg(short, long, global = true, env = "TALLY_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the compiled SQL of one metric
    Compile(cmd::compile::CompileArgs),

    /// Execute one metric against ClickHouse
    Run(cmd::run::RunArgs),

    /// Execute one metric against events from a JSON-lines file
    Simulate(cmd::simulate::SimulateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = cmd::load_config(cli.config.as_deref())?;
    let log_level = resolve_log_level(cli.log_level.as_deref(), &config);
    init_logging(&log_level, config.log.format)?;

    match cli.command {
        Command::Compile(args) => cmd::compile::run(args, &config),
        Command::Run(args) => cmd::run::run(args, &config).await,
        Command::Simulate(args) => cmd::simulate::run(args, &config).await,
    }
}

/// Resolve log level: CLI flag > config file > default "info"
fn resolve_log_level(cli_level: Option<&str>, config: &Config) -> String {
    match cli_level {
        Some(level) => level.to_string(),
        None => config.log.level.as_str().to_string(),
    }
}

/// Initialize the tracing subscriber for logging
///
/// Logs go to stderr so stdout carries only SQL or JSON.
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Console => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::str::FromStr;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_log_level_precedence() {
        let config = Config::from_str("[log]\nlevel = \"warn\"").unwrap();
        assert_eq!(resolve_log_level(Some("trace"), &config), "trace");
        assert_eq!(resolve_log_level(None, &config), "warn");
        assert_eq!(resolve_log_level(None, &Config::default()), "info");
    }

    #[test]
    fn test_parse_simulate() {
        let cli = Cli::parse_from([
            "tally",
            "simulate",
            "request.json",
            "--events",
            "events.jsonl",
            "--metric",
            "1",
            "--strategy",
            "join",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::Simulate(args) => {
                assert_eq!(args.events, PathBuf::from("events.jsonl"));
                assert_eq!(args.plan.metric, 1);
                assert_eq!(args.plan.strategy.as_deref(), Some("join"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
