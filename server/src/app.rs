//! Core application

use anyhow::{Context, Result};

use crate::core::cli::{self, Commands, OutputFormat};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::data::filters::FilterError;
use crate::data::search::{SearchTarget, build_search};
use crate::data::{DataError, Database};

pub struct CoreApp {
    pub config: AppConfig,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        let app = Self {
            config: AppConfig::load(&cli_config)?,
        };

        match command {
            Commands::Compile {
                filter,
                target,
                format,
            } => app.compile(&filter, target, format),
            Commands::Search {
                filter,
                target,
                limit,
            } => app.search(&filter, target, limit).await,
        }
    }

    fn init_logging() {
        let default_filter = format!("warn,{}_server=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        // stdout carries command output
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    /// Process exit status for a failed run: 2 when the filter was rejected
    pub fn exit_code(err: &anyhow::Error) -> i32 {
        match err.downcast_ref::<DataError>() {
            Some(e) if e.is_client_error() => 2,
            _ => 1,
        }
    }

    fn compile(&self, filter: &str, target: SearchTarget, format: OutputFormat) -> Result<()> {
        match self.render_compile(filter, target, format) {
            Ok(output) => {
                println!("{}", output);
                Ok(())
            }
            Err(err) => {
                if let (DataError::Filter(e), OutputFormat::Json) = (&err, format) {
                    println!("{}", error_json(e));
                }
                Err(err).context("Filter compilation failed")
            }
        }
    }

    /// Rendered SQL and bound values for `filter` against the target's base query
    fn render_compile(
        &self,
        filter: &str,
        target: SearchTarget,
        format: OutputFormat,
    ) -> Result<String, DataError> {
        let parser = self.config.query.parser(target);
        let query = build_search(target, &parser, filter, None)?;
        let dialect = self.config.query.dialect;
        let (sql, params) = query.to_sql(dialect.dialect());

        Ok(match format {
            OutputFormat::Text => {
                let values = params
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}\n-- params: [{}]", sql, values)
            }
            OutputFormat::Json => serde_json::json!({
                "dialect": dialect,
                "target": target,
                "sql": sql,
                "params": params,
            })
            .to_string(),
        })
    }

    async fn search(&self, filter: &str, target: SearchTarget, limit: u64) -> Result<()> {
        let url = self
            .config
            .database
            .url
            .as_deref()
            .context("A database URL is required for search (--database-url)")?;

        let parser = self.config.query.parser(target);
        let query = build_search(target, &parser, filter, Some(limit))?;

        let database = Database::connect(self.config.query.dialect, url).await?;
        let result = database.fetch_run_ids(&query).await;
        database.close().await;
        let ids = result.context("Search query failed")?;

        tracing::info!(search_target = %target, count = ids.len(), "Search completed");
        for id in ids {
            println!("{}", id);
        }
        Ok(())
    }
}

/// Client-facing error body, as the API boundary reports it
fn error_json(err: &FilterError) -> serde_json::Value {
    serde_json::json!({
        "message": err.message(),
        "status": err.status_code(),
        "detail": err.detail(),
    })
}
