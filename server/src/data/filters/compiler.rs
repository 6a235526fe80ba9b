//! Compiler facade
//!
//! `QueryParser` turns a filter string into a `ParsedQuery`: the joins and
//! conditions that decorate a caller-owned `SelectQuery`. A compilation
//! either succeeds completely or returns a `FilterError` with nothing
//! produced.

use serde::Deserialize;
use tracing::{debug, trace};

use super::condition::{Condition, write_conjunction};
use super::error::{FilterError, SourceMap, SpannedError};
use super::joins::Join;
use super::parser::parse_spanned;
use super::resolver::ResolveContext;
use super::types::Resolved;
use crate::core::constants::{
    DEFAULT_EXPERIMENTS_TABLE, DEFAULT_EXPRESSION, DEFAULT_MARKER, DEFAULT_METRICS_TABLE,
    DEFAULT_RUNS_TABLE,
};
use crate::data::query::{SelectQuery, SqlValue, SqlWriter};
use crate::data::sql::Backend;

/// Opening text placed before the caller's filter when the default scope is injected
const WRAP_PREFIX: &str = "(";

/// Scope injected unless the filter already mentions `marker`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DefaultExpression {
    pub expression: String,
    pub marker: String,
}

impl DefaultExpression {
    pub fn new(expression: impl Into<String>, marker: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            marker: marker.into(),
        }
    }

    /// No default scope
    pub fn none() -> Self {
        Self::new("", "")
    }
}

impl Default for DefaultExpression {
    fn default() -> Self {
        Self::new(DEFAULT_EXPRESSION, DEFAULT_MARKER)
    }
}

/// Base table names the resolver may reference
///
/// A missing entry disables the names that need it (`run` without
/// `runs`, `metric` without `metrics`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TableMap {
    pub runs: Option<String>,
    pub experiments: Option<String>,
    pub metrics: Option<String>,
}

impl Default for TableMap {
    fn default() -> Self {
        Self {
            runs: Some(DEFAULT_RUNS_TABLE.to_string()),
            experiments: Some(DEFAULT_EXPERIMENTS_TABLE.to_string()),
            metrics: Some(DEFAULT_METRICS_TABLE.to_string()),
        }
    }
}

/// Compiles filter strings for one dialect and one table layout
#[derive(Debug, Clone, Default)]
pub struct QueryParser {
    pub default: DefaultExpression,
    pub tables: TableMap,
    /// Client timezone offset in minutes (JavaScript `getTimezoneOffset` sign)
    pub tz_offset: i32,
    pub dialect: Backend,
}

impl QueryParser {
    pub fn new(dialect: Backend) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    pub fn with_default(mut self, default: DefaultExpression) -> Self {
        self.default = default;
        self
    }

    pub fn with_tables(mut self, tables: TableMap) -> Self {
        self.tables = tables;
        self
    }

    pub fn with_tz_offset(mut self, tz_offset: i32) -> Self {
        self.tz_offset = tz_offset;
        self
    }

    pub fn parse(&self, text: &str) -> Result<ParsedQuery, FilterError> {
        let (statement, source) = match self.prepare(text) {
            Some(prepared) => prepared,
            None => {
                trace!("Empty filter without default scope");
                return Ok(ParsedQuery::empty(self.dialect));
            }
        };

        match self.compile_statement(&statement) {
            Ok(parsed) => {
                debug!(
                    dialect = %self.dialect,
                    joins = parsed.joins.len(),
                    conditions = parsed.conditions.len(),
                    "Compiled filter"
                );
                Ok(parsed)
            }
            Err(err) => {
                let err = source.to_filter_error(err);
                debug!(error = %err, "Filter compilation failed");
                Err(err)
            }
        }
    }

    /// The text to parse and the map back onto the caller's text
    fn prepare(&self, text: &str) -> Option<(String, SourceMap)> {
        if text.is_empty() {
            let expression = &self.default.expression;
            if expression.is_empty() {
                return None;
            }
            return Some((expression.clone(), SourceMap::identity(expression)));
        }
        // textual check; a marker inside a string literal also counts
        if self.default.expression.is_empty() || text.contains(&self.default.marker) {
            return Some((text.to_string(), SourceMap::identity(text)));
        }
        let rewritten = format!("{}{}) and ({})", WRAP_PREFIX, text, self.default.expression);
        trace!(rewritten = %rewritten, "Injected default scope");
        Some((rewritten, SourceMap::wrapped(text, WRAP_PREFIX)))
    }

    fn compile_statement(&self, statement: &str) -> Result<ParsedQuery, SpannedError> {
        let expr = parse_spanned(statement)?;
        let mut ctx = ResolveContext::new(self.dialect, &self.tables, self.tz_offset);
        let root = match ctx.resolve(&expr)? {
            Resolved::Predicate(condition) => condition,
            other => {
                return Err(SpannedError::semantic(
                    format!("filter must evaluate to a condition, found {}", other.kind()),
                    expr.span,
                ));
            }
        };
        let (joins, mut conditions) = ctx.into_parts();
        conditions.push(root);
        Ok(ParsedQuery {
            dialect: self.dialect,
            joins: joins.into_joins(),
            conditions,
        })
    }
}

/// Compile `text` with an explicit configuration
///
/// `dialect` is parsed here; an unknown identifier is a `FilterError::Dialect`.
pub fn compile(
    text: &str,
    default_expression: &str,
    default_marker: &str,
    tables: &TableMap,
    dialect: &str,
    tz_offset: i32,
) -> Result<ParsedQuery, FilterError> {
    let dialect: Backend = dialect.parse()?;
    QueryParser::new(dialect)
        .with_default(DefaultExpression::new(default_expression, default_marker))
        .with_tables(tables.clone())
        .with_tz_offset(tz_offset)
        .parse(text)
}

/// A compiled filter
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    dialect: Backend,
    joins: Vec<Join>,
    conditions: Vec<Condition>,
}

impl ParsedQuery {
    fn empty(dialect: Backend) -> Self {
        Self {
            dialect,
            joins: Vec::new(),
            conditions: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Backend {
        self.dialect
    }

    /// Joins in registration order
    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    /// Side-effect conditions first, the filter's own predicate last
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty() && self.conditions.is_empty()
    }

    /// Add the joins, then AND the conditions into the query's WHERE clause
    pub fn apply<'q>(&self, query: &'q mut SelectQuery) -> &'q mut SelectQuery {
        for join in &self.joins {
            query.join(join.template.clone(), join.args.clone());
        }
        for condition in &self.conditions {
            query.filter(condition.clone());
        }
        query
    }

    /// The WHERE predicate alone, rendered for the compiled dialect
    pub fn where_sql(&self) -> (String, Vec<SqlValue>) {
        let mut w = SqlWriter::new(self.dialect.dialect());
        write_conjunction(&self.conditions, &mut w);
        w.finish()
    }
}
