//! Base query builder and SQL renderer
//!
//! `SelectQuery` is the caller-owned query a compiled filter decorates.
//! `SqlWriter` accumulates SQL text and bind values, numbering placeholders
//! through the active dialect.

use serde::Serialize;

use crate::data::filters::{Condition, write_conjunction};
use crate::data::sql::SqlDialect;

/// A value bound to a query placeholder
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// PostgreSQL `text[]`, used for JSON paths
    TextArray(Vec<String>),
}

impl SqlValue {
    /// The value as a text column would hold it
    ///
    /// Integers and booleans become their decimal form, floats keep a
    /// fractional digit (`1.0`).
    pub fn into_text(self) -> SqlValue {
        match self {
            SqlValue::Bool(b) => SqlValue::Text(i64::from(b).to_string()),
            SqlValue::Int(i) => SqlValue::Text(i.to_string()),
            SqlValue::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => {
                SqlValue::Text(format!("{:.1}", f))
            }
            SqlValue::Float(f) => SqlValue::Text(f.to_string()),
            other => other,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Bool(b) => write!(f, "{}", b),
            SqlValue::Int(i) => write!(f, "{}", i),
            SqlValue::Float(v) => write!(f, "{}", v),
            SqlValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            SqlValue::TextArray(items) => {
                write!(f, "ARRAY[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{}'", item.replace('\'', "''"))?;
                }
                write!(f, "]")
            }
        }
    }
}

/// A column reference, either `table.name` or a raw SQL expression
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
    /// Render `name` verbatim (computed expressions)
    pub raw: bool,
    /// Text-valued column; literals compared against it are bound as text
    pub text: bool,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
            raw: false,
            text: false,
        }
    }

    /// A column holding text
    pub fn text(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            text: true,
            ..Self::new(table, name)
        }
    }

    pub fn raw(expr: impl Into<String>) -> Self {
        Self {
            table: None,
            name: expr.into(),
            raw: true,
            text: false,
        }
    }

    pub fn to_sql(&self, dialect: &dyn SqlDialect) -> String {
        if self.raw {
            return self.name.clone();
        }
        match &self.table {
            Some(table) => format!(
                "{}.{}",
                dialect.quote_identifier(table),
                dialect.quote_identifier(&self.name)
            ),
            None => dialect.quote_identifier(&self.name),
        }
    }
}

/// Accumulates SQL text and its bind values
pub struct SqlWriter<'a> {
    dialect: &'a dyn SqlDialect,
    sql: String,
    params: Vec<SqlValue>,
}

impl<'a> SqlWriter<'a> {
    pub fn new(dialect: &'a dyn SqlDialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    pub fn dialect(&self) -> &'a dyn SqlDialect {
        self.dialect
    }

    pub fn push(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    pub fn push_param(&mut self, value: SqlValue) {
        self.params.push(value);
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
    }

    pub fn push_column(&mut self, column: &ColumnRef) {
        let sql = column.to_sql(self.dialect);
        self.sql.push_str(&sql);
    }

    /// Append a template whose `?` markers are replaced by the next argument
    pub fn push_template(&mut self, template: &str, args: &[SqlValue]) {
        let mut args = args.iter().peekable();
        for ch in template.chars() {
            match (ch, args.next_if(|_| ch == '?')) {
                (_, Some(value)) => self.push_param(value.clone()),
                (ch, None) => self.sql.push(ch),
            }
        }
    }

    pub fn finish(self) -> (String, Vec<SqlValue>) {
        (self.sql, self.params)
    }
}

/// A join clause with `?` markers for its bound values
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub template: String,
    pub args: Vec<SqlValue>,
}

/// A SELECT statement over one base table
#[derive(Debug, Clone)]
pub struct SelectQuery {
    table: String,
    columns: Vec<ColumnRef>,
    joins: Vec<JoinClause>,
    conditions: Vec<Condition>,
    order_by: Vec<(ColumnRef, bool)>,
    limit: Option<u64>,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            joins: Vec::new(),
            conditions: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn select(mut self, columns: Vec<ColumnRef>) -> Self {
        self.columns = columns;
        self
    }

    pub fn join(&mut self, template: impl Into<String>, args: Vec<SqlValue>) -> &mut Self {
        self.joins.push(JoinClause {
            template: template.into(),
            args,
        });
        self
    }

    pub fn filter(&mut self, condition: Condition) -> &mut Self {
        self.conditions.push(condition);
        self
    }

    pub fn order_by(&mut self, column: ColumnRef, descending: bool) -> &mut Self {
        self.order_by.push((column, descending));
        self
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn joins(&self) -> &[JoinClause] {
        &self.joins
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Render only the WHERE predicate (without the keyword)
    pub fn where_sql(&self, dialect: &dyn SqlDialect) -> (String, Vec<SqlValue>) {
        let mut w = SqlWriter::new(dialect);
        write_conjunction(&self.conditions, &mut w);
        w.finish()
    }

    pub fn to_sql(&self, dialect: &dyn SqlDialect) -> (String, Vec<SqlValue>) {
        let mut w = SqlWriter::new(dialect);
        w.push("SELECT ");
        if self.columns.is_empty() {
            w.push("*");
        } else {
            for (i, column) in self.columns.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.push_column(column);
            }
        }
        w.push(" FROM ");
        w.push(&dialect.quote_identifier(&self.table));
        for join in &self.joins {
            w.push(" ");
            w.push_template(&join.template, &join.args);
        }
        if !self.conditions.is_empty() {
            w.push(" WHERE ");
            write_conjunction(&self.conditions, &mut w);
        }
        if !self.order_by.is_empty() {
            w.push(" ORDER BY ");
            for (i, (column, descending)) in self.order_by.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.push_column(column);
                w.push(if *descending { " DESC" } else { " ASC" });
            }
        }
        if let Some(limit) = self.limit {
            w.push(&format!(" LIMIT {}", limit));
        }
        w.finish()
    }
}
