//! Resolved value types
//!
//! Every syntax node resolves to exactly one `Resolved` variant. Dispatch
//! sites match exhaustively instead of probing runtime types.

use serde_json::Value;

use super::condition::{Condition, JsonRef};
use crate::data::query::{ColumnRef, SqlValue};

/// Literal value
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
    List(Vec<Literal>),
    Dict(Vec<(String, String)>),
}

impl Literal {
    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::Str(_) => "str",
            Literal::Int(_) => "int",
            Literal::Float(_) => "float",
            Literal::Bool(_) => "bool",
            Literal::None => "None",
            Literal::List(_) => "list",
            Literal::Dict(_) => "dict",
        }
    }

    /// Bind value for a scalar literal
    pub fn to_sql_value(&self) -> Option<SqlValue> {
        match self {
            Literal::Str(s) => Some(SqlValue::Text(s.clone())),
            Literal::Int(i) => Some(SqlValue::Int(*i)),
            Literal::Float(f) => Some(SqlValue::Float(*f)),
            Literal::Bool(b) => Some(SqlValue::Bool(*b)),
            Literal::None => Some(SqlValue::Null),
            Literal::List(_) | Literal::Dict(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Literal::Str(s) => Value::String(s.clone()),
            Literal::Int(i) => Value::from(*i),
            Literal::Float(f) => Value::from(*f),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::None => Value::Null,
            Literal::List(items) => Value::Array(items.iter().map(Literal::to_json).collect()),
            Literal::Dict(pairs) => Value::Object(
                pairs
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        }
    }
}

/// How a LIKE pattern is anchored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeKind {
    StartsWith,
    EndsWith,
    Contains,
}

impl LikeKind {
    pub fn pattern(self, value: &str) -> String {
        match self {
            LikeKind::StartsWith => format!("{}%", value),
            LikeKind::EndsWith => format!("%{}", value),
            LikeKind::Contains => format!("%{}%", value),
        }
    }
}

/// Receiver of a string method
#[derive(Debug, Clone, PartialEq)]
pub enum MethodTarget {
    Column(ColumnRef),
    Json(JsonRef),
}

/// Functions a call expression can invoke
#[derive(Debug, Clone, PartialEq)]
pub enum Callable {
    /// `datetime(y, mo, d, h, mi, s, us)`
    Datetime,
    /// `re.match(p, col)` / `re.search(p, col)`, or `col.match(p)` when bound
    Regex {
        anchored: bool,
        subject: Option<ColumnRef>,
    },
    /// `.startswith(s)`, `.endswith(s)`, `.contains(s)`
    Like { target: MethodTarget, kind: LikeKind },
}

/// Objects exposing named attributes
#[derive(Debug, Clone, PartialEq)]
pub enum Getter {
    /// `run`
    Run,
    /// `metric`
    Metric,
    /// `re`
    Re,
    /// `run.metrics[...]`, joined under `alias`
    MetricSeries { alias: String },
}

/// Objects accepting both `.key` and `[key]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// `run.tags`
    RunTags,
}

/// Objects accepting only `[key]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slicer {
    /// `run.metrics`
    RunMetrics,
}

/// Result of resolving one syntax node
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Column(ColumnRef),
    Predicate(Condition),
    JsonRef(JsonRef),
    Literal(Literal),
    Callable(Callable),
    AttributeGetter(Getter),
    AttributeOrSubscript(Namespace),
    Subscript(Slicer),
}

impl Resolved {
    /// Kind name for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Resolved::Column(_) => "column",
            Resolved::Predicate(_) => "predicate",
            Resolved::JsonRef(_) => "json reference",
            Resolved::Literal(l) => l.type_name(),
            Resolved::Callable(_) => "function",
            Resolved::AttributeGetter(_) => "object",
            Resolved::AttributeOrSubscript(_) => "namespace",
            Resolved::Subscript(_) => "collection",
        }
    }
}
