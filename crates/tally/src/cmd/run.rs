//! Run command - execute one experiment metric against ClickHouse
//!
//! # Usage
//!
//! ```bash
//! tally run request.json --config tally.toml
//! ```
//!
//! # Configuration
//!
//! Connection settings come from the `[query]` section:
//!
//! ```toml
//! [query]
//! url = "http://localhost:8123"
//! database = "posthog"
//! username = "reader"
//! password = "secret"
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tally_config::Config;
use tally_experiments::SqlExecutor;
use tally_query::{QueryConfig, QueryEngine};

use super::{PlanArgs, build_runner, execute_and_print, load_request};

/// Run command arguments
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub plan: PlanArgs,
}

/// Run the run command
pub async fn run(args: RunArgs, config: &Config) -> Result<()> {
    let request = load_request(&args.plan.request)?;

    let engine = connect(config).await?;

    let executor = Arc::new(SqlExecutor::new(Arc::new(engine)));
    let runner = build_runner(executor, &args.plan, config)?;
    execute_and_print(&runner, &request, args.plan.metric).await
}

/// Build the query engine and check that ClickHouse answers
async fn connect(config: &Config) -> Result<QueryEngine> {
    let engine = QueryEngine::from_config(&query_config(config))
        .context("failed to create query engine")?;

    engine
        .health_check()
        .await
        .with_context(|| format!("ClickHouse is not reachable at {}", config.query.url))?;

    tracing::debug!(
        backend = engine.backend_name(),
        url = %config.query.url,
        database = %config.query.database,
        "query engine ready"
    );
    Ok(engine)
}

/// Backend settings from the `[query]` section
fn query_config(config: &Config) -> QueryConfig {
    let section = &config.query;
    let mut query = QueryConfig::clickhouse(&section.url, &section.database);
    if let Some((user, pass)) = section.credentials() {
        query = query.with_credentials(user, pass);
    }
    query.max_execution_time = section.max_execution_time;
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_query_config_from_section() {
        let config = Config::from_str(
            r#"
[query]
url = "http://ch:8123"
database = "posthog"
username = "reader"
password = "secret"
max_execution_time = 30
"#,
        )
        .unwrap();

        let query = query_config(&config);
        assert_eq!(query.url, "http://ch:8123");
        assert_eq!(query.database, "posthog");
        assert_eq!(query.username.as_deref(), Some("reader"));
        assert_eq!(query.password.as_deref(), Some("secret"));
        assert_eq!(query.max_execution_time, 30);
        assert!(query.validate().is_ok());
    }

    #[tokio::test]
    async fn test_connect_fails_when_unreachable() {
        // Port 1 is never a ClickHouse server
        let config = Config::from_str("[query]\nurl = \"http://127.0.0.1:1\"").unwrap();

        let err = connect(&config).await.err().unwrap();
        assert!(err.to_string().contains("not reachable at http://127.0.0.1:1"));
    }

    #[test]
    fn test_default_query_config() {
        let query = query_config(&Config::default());
        assert_eq!(query.url, "http://localhost:8123");
        assert!(query.username.is_none());
        assert_eq!(query.max_execution_time, 60);
    }
}
