use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use super::cli::CliConfig;
use super::constants::CONFIG_FILE_NAME;
use crate::data::filters::{DefaultExpression, QueryParser, TableMap};
use crate::data::search::SearchTarget;
use crate::data::sql::Backend;

/// Largest accepted timezone offset in minutes
const MAX_TZ_OFFSET_MINUTES: i32 = 24 * 60;

// =============================================================================
// File Config Structs (JSON deserialization)
// =============================================================================

/// Default scope per search endpoint
#[derive(Debug, Default, Deserialize)]
pub struct DefaultsFileConfig {
    pub runs: Option<DefaultExpression>,
    pub metrics: Option<DefaultExpression>,
    pub artifacts: Option<DefaultExpression>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueryFileConfig {
    pub dialect: Option<Backend>,
    pub tz_offset: Option<i32>,
    pub tables: Option<TableMap>,
    pub defaults: Option<DefaultsFileConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DatabaseFileConfig {
    pub url: Option<String>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub query: Option<QueryFileConfig>,
    pub database: Option<DatabaseFileConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::trace!(config = ?config, "Parsed config file");
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }
}

// =============================================================================
// Resolved Config
// =============================================================================

/// Filter compilation settings
#[derive(Debug, Clone, PartialEq)]
pub struct QueryConfig {
    pub dialect: Backend,
    pub tz_offset: i32,
    pub tables: TableMap,
    pub runs_default: DefaultExpression,
    pub metrics_default: DefaultExpression,
    pub artifacts_default: DefaultExpression,
}

impl QueryConfig {
    /// Compiler configured for one search endpoint
    pub fn parser(&self, target: SearchTarget) -> QueryParser {
        let default = match target {
            SearchTarget::Runs => &self.runs_default,
            SearchTarget::Metrics => &self.metrics_default,
            SearchTarget::Artifacts => &self.artifacts_default,
        };
        QueryParser::new(self.dialect)
            .with_default(default.clone())
            .with_tables(self.tables.clone())
            .with_tz_offset(self.tz_offset)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub query: QueryConfig,
    pub database: DatabaseConfig,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Local directory config OR CLI-specified config path
    /// 3. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");
        tracing::trace!(cli = ?cli, "CLI config");

        let path = match cli.config {
            Some(ref path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                Some(path.clone())
            }
            None => {
                let local = PathBuf::from(CONFIG_FILE_NAME);
                if local.exists() { Some(local) } else { None }
            }
        };

        let file_config = match path {
            Some(path) => {
                let file_config = FileConfig::load_from_file(&path)?;
                file_config.warn_unknown_fields();
                file_config
            }
            None => FileConfig::default(),
        };

        let config = Self::from_sources(cli, file_config);
        config.validate()?;
        tracing::debug!(
            dialect = %config.query.dialect,
            tz_offset = config.query.tz_offset,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Layer configs: defaults -> file config -> CLI/env overrides
    fn from_sources(cli: &CliConfig, file_config: FileConfig) -> Self {
        let file_query = file_config.query.unwrap_or_default();
        let file_defaults = file_query.defaults.unwrap_or_default();
        let file_database = file_config.database.unwrap_or_default();

        let query = QueryConfig {
            dialect: cli.dialect.or(file_query.dialect).unwrap_or_default(),
            tz_offset: cli.tz_offset.or(file_query.tz_offset).unwrap_or(0),
            tables: file_query.tables.unwrap_or_default(),
            runs_default: file_defaults.runs.unwrap_or_default(),
            metrics_default: file_defaults.metrics.unwrap_or_default(),
            artifacts_default: file_defaults.artifacts.unwrap_or_default(),
        };

        let database = DatabaseConfig {
            url: cli.database_url.clone().or(file_database.url),
        };

        Self { query, database }
    }

    fn validate(&self) -> Result<()> {
        if self.query.tz_offset.abs() > MAX_TZ_OFFSET_MINUTES {
            anyhow::bail!(
                "Invalid timezone offset {}: must be within +/-{} minutes",
                self.query.tz_offset,
                MAX_TZ_OFFSET_MINUTES
            );
        }
        if self.query.tables.runs.is_none() {
            anyhow::bail!("query.tables.runs must be set");
        }
        Ok(())
    }
}
