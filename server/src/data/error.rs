//! Unified error type for data layer
//!
//! Wraps execution errors from both SQL backends and compilation errors
//! from the filter compiler.

use thiserror::Error;

use crate::data::filters::FilterError;

/// Unified error type for data layer operations
#[derive(Error, Debug)]
pub enum DataError {
    /// SQLite database error
    #[error("SQLite error: {0}")]
    Sqlite(sqlx::Error),

    /// PostgreSQL database error
    #[error("PostgreSQL error: {0}")]
    Postgres(sqlx::Error),

    /// Filter expression failed to compile
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DataError {
    /// Create a SQLite error with preserved context
    pub fn from_sqlite(e: sqlx::Error) -> Self {
        Self::Sqlite(e)
    }

    /// Create a PostgreSQL error with preserved context
    pub fn from_postgres(e: sqlx::Error) -> Self {
        Self::Postgres(e)
    }

    /// Check if this is a client error (bad filter) rather than a server fault
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Filter(e) => e.status_code() < 500,
            _ => false,
        }
    }
}
