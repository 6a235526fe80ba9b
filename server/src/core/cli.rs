use clap::{Parser, Subcommand, ValueEnum};

use std::path::PathBuf;

use super::constants::{
    DEFAULT_SEARCH_LIMIT, ENV_CONFIG, ENV_DATABASE_URL, ENV_DIALECT, ENV_TZ_OFFSET,
};
use crate::data::search::SearchTarget;
use crate::data::sql::Backend;

#[derive(Parser)]
#[command(name = "tracker")]
#[command(version, about = "Experiment tracking filter compiler", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// SQL dialect (sqlite or postgres)
    #[arg(long, short = 'd', global = true, env = ENV_DIALECT, value_parser = parse_dialect)]
    pub dialect: Option<Backend>,

    /// Client timezone offset in minutes (as reported by the browser)
    #[arg(long, global = true, env = ENV_TZ_OFFSET, allow_negative_numbers = true)]
    pub tz_offset: Option<i32>,

    /// Database connection URL (for search)
    #[arg(long, global = true, env = ENV_DATABASE_URL)]
    pub database_url: Option<String>,
}

/// Parse dialect from CLI/env string
fn parse_dialect(s: &str) -> Result<Backend, String> {
    s.parse::<Backend>().map_err(|_| {
        format!(
            "Invalid dialect '{}'. Valid options: sqlite, postgres",
            s
        )
    })
}

/// Parse search target from CLI string
fn parse_target(s: &str) -> Result<SearchTarget, String> {
    s.parse::<SearchTarget>().map_err(|_| {
        format!(
            "Invalid target '{}'. Valid options: runs, metrics, artifacts",
            s
        )
    })
}

/// Output format for `compile`
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Compile a filter expression and print the SQL
    Compile {
        /// Filter expression
        filter: String,

        /// Search endpoint the filter is compiled for
        #[arg(long, short = 't', default_value = "runs", value_parser = parse_target)]
        target: SearchTarget,

        /// Output format
        #[arg(long, short = 'f', value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Run a search against the configured database and print matching run ids
    Search {
        /// Filter expression
        filter: String,

        /// Search endpoint
        #[arg(long, short = 't', default_value = "runs", value_parser = parse_target)]
        target: SearchTarget,

        /// Maximum number of rows
        #[arg(long, short = 'n', default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: u64,
    },
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub config: Option<PathBuf>,
    pub dialect: Option<Backend>,
    pub tz_offset: Option<i32>,
    pub database_url: Option<String>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Commands) {
    let cli = Cli::parse();
    let config = CliConfig {
        config: cli.config,
        dialect: cli.dialect,
        tz_offset: cli.tz_offset,
        database_url: cli.database_url,
    };
    (config, cli.command)
}
