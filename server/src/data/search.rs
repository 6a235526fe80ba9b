//! Search call sites
//!
//! Runs, metrics and artifacts search share one compiled-filter shape and
//! differ only in their base query. Each target builds its base
//! `SelectQuery`, the compiled filter decorates it, and the rendered SQL
//! is executed through `sqlx`.

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, SqlitePool};
use tracing::debug;

use crate::data::error::DataError;
use crate::data::filters::{QueryParser, TableMap};
use crate::data::query::{ColumnRef, SelectQuery, SqlValue};
use crate::data::sql::Backend;

/// Endpoint a filter is compiled for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchTarget {
    #[default]
    Runs,
    Metrics,
    Artifacts,
}

impl SearchTarget {
    pub fn name(&self) -> &'static str {
        match self {
            SearchTarget::Runs => "runs",
            SearchTarget::Metrics => "metrics",
            SearchTarget::Artifacts => "artifacts",
        }
    }

    /// Base query before any filter is applied
    ///
    /// The first selected column is always the run id.
    pub fn base_query(&self, tables: &TableMap) -> Result<SelectQuery, DataError> {
        let runs = tables
            .runs
            .as_deref()
            .ok_or_else(|| DataError::Config("runs table is not configured".to_string()))?;

        let mut query = match self {
            SearchTarget::Runs => SelectQuery::new(runs).select(vec![ColumnRef::new(runs, "run_uuid")]),
            SearchTarget::Artifacts => SelectQuery::new(runs).select(vec![
                ColumnRef::new(runs, "run_uuid"),
                ColumnRef::new(runs, "artifact_uri"),
            ]),
            SearchTarget::Metrics => {
                let metrics = tables.metrics.as_deref().ok_or_else(|| {
                    DataError::Config("metrics table is not configured".to_string())
                })?;
                let mut query = SelectQuery::new(metrics).select(vec![
                    ColumnRef::new(runs, "run_uuid"),
                    ColumnRef::new(metrics, "key"),
                ]);
                query.join(
                    format!("JOIN {runs} ON {runs}.run_uuid = {metrics}.run_uuid"),
                    Vec::new(),
                );
                query
            }
        };

        if let Some(experiments) = tables.experiments.as_deref() {
            query.join(
                format!(
                    "LEFT JOIN {experiments} ON {experiments}.experiment_id = {runs}.experiment_id"
                ),
                Vec::new(),
            );
        }
        query.order_by(ColumnRef::new(runs, "start_time"), true);
        Ok(query)
    }
}

impl std::fmt::Display for SearchTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for SearchTarget {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "runs" => Ok(SearchTarget::Runs),
            "metrics" => Ok(SearchTarget::Metrics),
            "artifacts" => Ok(SearchTarget::Artifacts),
            _ => Err(DataError::Config(format!("unknown search target: {}", s))),
        }
    }
}

/// Compile `filter` and apply it to the target's base query
pub fn build_search(
    target: SearchTarget,
    parser: &QueryParser,
    filter: &str,
    limit: Option<u64>,
) -> Result<SelectQuery, DataError> {
    let parsed = parser.parse(filter)?;
    let mut query = target.base_query(&parser.tables)?;
    parsed.apply(&mut query);
    if let Some(limit) = limit {
        query.limit(limit);
    }
    debug!(
        search_target = %target,
        joins = parsed.joins().len(),
        "Built search query"
    );
    Ok(query)
}

/// Execute a search on SQLite, returning the first selected column
pub async fn fetch_run_ids_sqlite(
    pool: &SqlitePool,
    query: &SelectQuery,
) -> Result<Vec<String>, DataError> {
    let (sql, params) = query.to_sql(Backend::Sqlite.dialect());
    let mut q = sqlx::query_scalar::<_, String>(&sql);
    for value in params {
        q = match value {
            SqlValue::Null => q.bind(None::<String>),
            SqlValue::Bool(b) => q.bind(b),
            SqlValue::Int(i) => q.bind(i),
            SqlValue::Float(f) => q.bind(f),
            SqlValue::Text(s) => q.bind(s),
            SqlValue::TextArray(items) => q.bind(serde_json::Value::from(items).to_string()),
        };
    }
    q.fetch_all(pool).await.map_err(DataError::from_sqlite)
}

/// Execute a search on PostgreSQL, returning the first selected column
pub async fn fetch_run_ids_postgres(
    pool: &PgPool,
    query: &SelectQuery,
) -> Result<Vec<String>, DataError> {
    let (sql, params) = query.to_sql(Backend::Postgres.dialect());
    let mut q = sqlx::query_scalar::<_, String>(&sql);
    for value in params {
        q = match value {
            SqlValue::Null => q.bind(None::<String>),
            SqlValue::Bool(b) => q.bind(b),
            SqlValue::Int(i) => q.bind(i),
            SqlValue::Float(f) => q.bind(f),
            SqlValue::Text(s) => q.bind(s),
            SqlValue::TextArray(items) => q.bind(items),
        };
    }
    q.fetch_all(pool).await.map_err(DataError::from_postgres)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    use super::*;
    use crate::data::filters::{DefaultExpression, FilterError};

    const SCHEMA: &[&str] = &[
        "CREATE TABLE experiments (experiment_id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        "CREATE TABLE runs (run_uuid TEXT PRIMARY KEY, name TEXT, experiment_id INTEGER, \
         status TEXT, lifecycle_stage TEXT, start_time INTEGER, end_time INTEGER, artifact_uri TEXT)",
        "CREATE TABLE contexts (id INTEGER PRIMARY KEY, json TEXT)",
        "CREATE TABLE latest_metrics (run_uuid TEXT, key TEXT, value REAL, last_iter INTEGER, context_id INTEGER)",
        "CREATE TABLE tags (run_uuid TEXT, key TEXT, value TEXT)",
        "CREATE TABLE params (run_uuid TEXT, key TEXT, value TEXT)",
        "INSERT INTO experiments VALUES (1, 'default'), (2, 'other')",
        "INSERT INTO runs VALUES \
         ('r1', 'alpha', 1, 'FINISHED', 'active', 1000, 5000, 's3://a'), \
         ('r2', 'beta', 1, 'RUNNING', 'active', 2000, NULL, 's3://b'), \
         ('r3', 'gamma', 2, 'FINISHED', 'deleted', 3000, 4000, 's3://c')",
        "INSERT INTO contexts VALUES (1, '{\"subset\": \"train\"}'), (2, '{\"subset\": \"val\"}')",
        "INSERT INTO latest_metrics VALUES \
         ('r1', 'loss', 0.2, 10, 1), ('r1', 'loss', 0.9, 10, 2), \
         ('r2', 'loss', 0.8, 5, 1), ('r3', 'loss', 0.1, 3, 1)",
        "INSERT INTO tags VALUES ('r1', 'team', 'a'), ('r2', 'team', 'b')",
        "INSERT INTO params VALUES ('r1', 'lr', '0.1'), ('r2', 'lr', '0.01')",
    ];

    async fn setup() -> SqlitePool {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .with_regexp();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await.unwrap();
        }
        pool
    }

    async fn search(pool: &SqlitePool, target: SearchTarget, filter: &str) -> Vec<String> {
        let parser = QueryParser::new(Backend::Sqlite);
        let query = build_search(target, &parser, filter, None).unwrap();
        fetch_run_ids_sqlite(pool, &query).await.unwrap()
    }

    #[test]
    fn test_runs_base_query() {
        let query = SearchTarget::Runs.base_query(&TableMap::default()).unwrap();
        let (sql, params) = query.to_sql(Backend::Sqlite.dialect());
        assert_eq!(
            sql,
            "SELECT \"runs\".\"run_uuid\" FROM \"runs\" \
             LEFT JOIN experiments ON experiments.experiment_id = runs.experiment_id \
             ORDER BY \"runs\".\"start_time\" DESC"
        );
        assert!(params.is_empty());
    }

    #[test]
    fn test_metrics_requires_table() {
        let tables = TableMap {
            metrics: None,
            ..TableMap::default()
        };
        let err = SearchTarget::Metrics.base_query(&tables).unwrap_err();
        assert!(matches!(err, DataError::Config(_)));
    }

    #[test]
    fn test_postgres_binds_json_path_as_array() {
        let parser = QueryParser::new(Backend::Postgres).with_default(DefaultExpression::none());
        let query = build_search(
            SearchTarget::Runs,
            &parser,
            "run.metrics['m', {'a': 'b'}].last < 1 and run.tags.x == 1",
            None,
        )
        .unwrap();
        let (sql, params) = query.to_sql(Backend::Postgres.dialect());
        assert!(sql.contains("\"contexts_1\".\"json\"#>>$3 = $4"));
        assert_eq!(params[2], SqlValue::TextArray(vec!["a".to_string()]));
        assert_eq!(params.last(), Some(&SqlValue::from("1")));
    }

    #[test]
    fn test_target_from_str() {
        assert_eq!("Metrics".parse::<SearchTarget>().unwrap(), SearchTarget::Metrics);
        assert!("images".parse::<SearchTarget>().is_err());
    }

    #[test]
    fn test_build_search_propagates_filter_errors() {
        let parser = QueryParser::new(Backend::Postgres);
        let err = build_search(SearchTarget::Runs, &parser, "run.name ==", Some(5)).unwrap_err();
        assert!(matches!(err, DataError::Filter(FilterError::Syntax(_))));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_search_runs() {
        let pool = setup().await;
        assert_eq!(search(&pool, SearchTarget::Runs, "").await, vec!["r2", "r1"]);
        assert_eq!(
            search(&pool, SearchTarget::Runs, "run.metrics['loss'].last < 0.5").await,
            vec!["r1"]
        );
        assert_eq!(
            search(&pool, SearchTarget::Runs, "run.metrics['loss', {'subset': 'val'}].last > 0.5").await,
            vec!["r1"]
        );
        assert_eq!(search(&pool, SearchTarget::Runs, "run.tags['team'] == 'b'").await, vec!["r2"]);
        assert_eq!(search(&pool, SearchTarget::Runs, "run.lr == '0.1'").await, vec!["r1"]);
        assert_eq!(search(&pool, SearchTarget::Runs, "run.lr == 0.01").await, vec!["r2"]);
        assert_eq!(search(&pool, SearchTarget::Runs, "run.name.match('al')").await, vec!["r1"]);
        assert_eq!(search(&pool, SearchTarget::Runs, "'et' in run.name").await, vec!["r2"]);
        assert_eq!(search(&pool, SearchTarget::Runs, "run.active").await, vec!["r2"]);
        assert_eq!(
            search(&pool, SearchTarget::Runs, "run.experiment == 'other' and run.archived").await,
            vec!["r3"]
        );
        assert_eq!(
            search(&pool, SearchTarget::Runs, "run.duration == 4 and not run.archived").await,
            vec!["r1"]
        );
    }

    #[tokio::test]
    async fn test_search_metrics_by_context() {
        let pool = setup().await;
        assert_eq!(
            search(
                &pool,
                SearchTarget::Metrics,
                "metric.name == 'loss' and metric.context.subset == 'train'"
            )
            .await,
            vec!["r2", "r1"]
        );
    }

    #[tokio::test]
    async fn test_search_artifacts_with_limit() {
        let pool = setup().await;
        let parser = QueryParser::new(Backend::Sqlite).with_default(DefaultExpression::none());
        let query = build_search(SearchTarget::Artifacts, &parser, "", Some(2)).unwrap();
        let ids = fetch_run_ids_sqlite(&pool, &query).await.unwrap();
        assert_eq!(ids, vec!["r3", "r2"]);
    }
}
