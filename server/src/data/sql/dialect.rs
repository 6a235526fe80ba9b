//! SQL dialect trait for multi-database support
//!
//! This trait defines the interface for generating database-specific SQL syntax
//! used by the filter compiler.

use serde_json::Value;

use crate::data::query::SqlValue;

/// SQL dialect trait for generating database-specific SQL
///
/// The two supported engines differ in:
/// - Parameter placeholders (? vs $1)
/// - Regular expression operators
/// - JSON path syntax and the text form of JSON documents
/// - How a possibly-absent column must be wrapped before a text comparison
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Generate a parameter placeholder for the given index (1-based)
    ///
    /// - SQLite: Always returns "?"
    /// - PostgreSQL: Returns "$1", "$2", etc.
    fn placeholder(&self, index: usize) -> String;

    /// Quote an identifier (table, alias or column name)
    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Binary regular expression operator, padded with spaces
    ///
    /// - SQLite: ` REGEXP ` / ` NOT REGEXP `
    /// - PostgreSQL: ` ~ ` / ` !~ `
    fn regexp_operator(&self, negated: bool) -> &'static str;

    /// Wrap a column read before it is matched as text
    ///
    /// - SQLite: `IFNULL(col, '')`
    /// - PostgreSQL: `col`
    fn coalesce_text(&self, expr: &str) -> String;

    /// Wrap a JSON column read before a path is extracted from it
    ///
    /// - SQLite: `IFNULL(col, JSON('{}'))`
    /// - PostgreSQL: `col`
    fn coalesce_json(&self, expr: &str) -> String;

    /// Operator extracting the text at a JSON path
    ///
    /// - SQLite: `->>`
    /// - PostgreSQL: `#>>`
    fn json_extract_operator(&self) -> &'static str;

    /// Bind value for a JSON path built from its segments
    ///
    /// - SQLite: text `$.a.b`
    /// - PostgreSQL: `text[]` `{a,b}`, as `#>>` takes no text operand
    fn json_path(&self, segments: &[String]) -> SqlValue;

    /// Render a JSON document the way the engine prints extracted JSON text
    fn json_text(&self, value: &Value) -> String;

    /// Convert a JSON scalar into the value compared against an extracted path
    fn json_scalar(&self, value: &Value) -> SqlValue;
}

/// Convert a JSON scalar to its natural bind value
pub(super) fn scalar_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Int(i),
            None => SqlValue::Float(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_value() {
        assert_eq!(scalar_value(&Value::from(3)), SqlValue::Int(3));
        assert_eq!(scalar_value(&Value::from(1.5)), SqlValue::Float(1.5));
        assert_eq!(scalar_value(&Value::from("a")), SqlValue::Text("a".into()));
        assert_eq!(scalar_value(&Value::Null), SqlValue::Null);
    }
}
