//! Simulate command - execute one experiment metric over local events
//!
//! Events are read from a JSON-lines file, one event per line:
//!
//! ```json
//! {"event": "$feature_flag_called", "timestamp": "2024-01-02T10:00:00Z", "person_id": "p1",
//!  "properties": {"$feature_flag": "new-onboarding", "$feature_flag_response": "test"}}
//! ```
//!
//! # Usage
//!
//! ```bash
//! tally simulate request.json --events events.jsonl --strategy join
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tally_config::Config;
use tally_experiments::MemoryExecutor;

use super::{PlanArgs, build_runner, execute_and_print, load_request};

/// Simulate command arguments
#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub plan: PlanArgs,

    /// JSON-lines file of events
    #[arg(short, long, value_name = "FILE")]
    pub events: PathBuf,
}

/// Run the simulate command
pub async fn run(args: SimulateArgs, config: &Config) -> Result<()> {
    let request = load_request(&args.plan.request)?;

    let executor = MemoryExecutor::from_jsonl(&args.events)
        .with_context(|| format!("failed to load events: {}", args.events.display()))?
        .with_events_table(&config.experiments.events_table);
    tracing::debug!(
        events = executor.store().event_count(),
        table = %config.experiments.events_table,
        "loaded simulation events"
    );

    let runner = build_runner(Arc::new(executor), &args.plan, config)?;
    execute_and_print(&runner, &request, args.plan.metric).await
}
