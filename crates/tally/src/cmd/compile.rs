//! Compile command - print the SQL of one experiment metric
//!
//! # Usage
//!
//! ```bash
//! tally compile request.json
//! tally compile request.json --metric 1 --strategy join
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use tally_config::Config;
use tally_experiments::{MemoryExecutor, MemoryStore};

use super::{PlanArgs, build_runner, load_request};

/// Compile command arguments
#[derive(Args, Debug)]
pub struct CompileArgs {
    #[command(flatten)]
    pub plan: PlanArgs,
}

/// Run the compile command
pub fn run(args: CompileArgs, config: &Config) -> Result<()> {
    let request = load_request(&args.plan.request)?;

    // Compilation never executes; any executor will do
    let executor = Arc::new(MemoryExecutor::new(MemoryStore::new()));
    let runner = build_runner(executor, &args.plan, config)?;

    let plan = runner
        .compile(&request, args.plan.metric, Utc::now())
        .with_context(|| {
            format!(
                "failed to compile metric {} of experiment {}",
                args.plan.metric, request.experiment.id
            )
        })?;

    tracing::debug!(
        experiment_id = request.experiment.id,
        strategy = %plan.strategy,
        kind = %plan.kind,
        "compiled experiment metric"
    );
    println!("{}", plan.sql());

    Ok(())
}
