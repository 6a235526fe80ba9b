//! PostgreSQL SQL dialect implementation

use serde_json::Value;

use super::SqlDialect;
use super::dialect::scalar_value;
use crate::data::query::SqlValue;

/// PostgreSQL SQL dialect
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn regexp_operator(&self, negated: bool) -> &'static str {
        if negated { " !~ " } else { " ~ " }
    }

    fn coalesce_text(&self, expr: &str) -> String {
        expr.to_string()
    }

    fn coalesce_json(&self, expr: &str) -> String {
        expr.to_string()
    }

    fn json_extract_operator(&self) -> &'static str {
        "#>>"
    }

    fn json_path(&self, segments: &[String]) -> SqlValue {
        SqlValue::TextArray(segments.to_vec())
    }

    fn json_text(&self, value: &Value) -> String {
        let mut out = String::new();
        write_jsonb_text(&mut out, value);
        out
    }

    fn json_scalar(&self, value: &Value) -> SqlValue {
        // #>> always yields text
        match value {
            Value::Null => SqlValue::Null,
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Bool(_) | Value::Number(_) => SqlValue::Text(value.to_string()),
            other => scalar_value(other),
        }
    }
}

/// Write a document the way jsonb prints it: `", "` and `": "` separators,
/// object keys ordered by length and then bytewise.
fn write_jsonb_text(out: &mut String, value: &Value) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_jsonb_text(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push_str(": ");
                write_jsonb_text(out, item);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
