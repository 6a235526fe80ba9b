//! Data layer
//!
//! - `filters` - Filter expression compiler
//! - `query` - Base query builder and SQL renderer
//! - `search` - Runs, metrics and artifacts search call sites
//! - `sql` - SQL dialects (SQLite, PostgreSQL)
//! - `error` - Unified error type for the data layer

pub mod error;
pub mod filters;
pub mod query;
pub mod search;
pub mod sql;

pub use error::DataError;

use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{ConnectOptions, PgPool, SqlitePool};
use tracing::log::LevelFilter;

use crate::data::query::SelectQuery;
use crate::data::sql::Backend;

/// Database connection for executing searches
///
/// Wraps the backend-specific pool. The variant always matches the
/// dialect the filters were compiled for.
pub enum Database {
    /// SQLite backend (default, embedded)
    Sqlite(SqlitePool),
    /// PostgreSQL backend
    Postgres(PgPool),
}

impl Database {
    /// Connect to `url` with the pool type for `backend`
    pub async fn connect(backend: Backend, url: &str) -> Result<Self, DataError> {
        match backend {
            Backend::Sqlite => {
                let options = SqliteConnectOptions::from_str(url)
                    .map_err(|e| DataError::Config(format!("Invalid SQLite URL: {}", e)))?
                    .with_regexp()
                    .log_statements(LevelFilter::Trace);
                let pool = SqlitePoolOptions::new()
                    .connect_with(options)
                    .await
                    .map_err(DataError::from_sqlite)?;
                tracing::debug!("SQLite pool connected");
                Ok(Self::Sqlite(pool))
            }
            Backend::Postgres => {
                let options: PgConnectOptions = url
                    .parse()
                    .map_err(|e| DataError::Config(format!("Invalid PostgreSQL URL: {}", e)))?;
                let pool = PgPoolOptions::new()
                    .connect_with(options.log_statements(LevelFilter::Trace))
                    .await
                    .map_err(DataError::from_postgres)?;
                tracing::debug!("PostgreSQL pool connected");
                Ok(Self::Postgres(pool))
            }
        }
    }

    /// Get the backend type
    pub fn backend(&self) -> Backend {
        match self {
            Self::Sqlite(_) => Backend::Sqlite,
            Self::Postgres(_) => Backend::Postgres,
        }
    }

    /// Execute a search query, returning the run id column
    pub async fn fetch_run_ids(&self, query: &SelectQuery) -> Result<Vec<String>, DataError> {
        match self {
            Self::Sqlite(pool) => search::fetch_run_ids_sqlite(pool, query).await,
            Self::Postgres(pool) => search::fetch_run_ids_postgres(pool, query).await,
        }
    }

    /// Close the connection pool gracefully
    pub async fn close(&self) {
        match self {
            Self::Sqlite(pool) => pool.close().await,
            Self::Postgres(pool) => pool.close().await,
        }
        tracing::debug!(backend = %self.backend(), "Database pool closed");
    }
}
