//! SQLite SQL dialect implementation

use serde_json::Value;

use super::SqlDialect;
use super::dialect::scalar_value;
use crate::data::query::SqlValue;

/// SQLite SQL dialect
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn regexp_operator(&self, negated: bool) -> &'static str {
        // REGEXP is provided by a user function registered on the connection
        if negated { " NOT REGEXP " } else { " REGEXP " }
    }

    fn coalesce_text(&self, expr: &str) -> String {
        format!("IFNULL({}, '')", expr)
    }

    fn coalesce_json(&self, expr: &str) -> String {
        format!("IFNULL({}, JSON('{{}}'))", expr)
    }

    fn json_extract_operator(&self) -> &'static str {
        "->>"
    }

    fn json_path(&self, segments: &[String]) -> SqlValue {
        let mut path = String::from("$");
        for segment in segments {
            path.push('.');
            if segment.chars().all(|c| c.is_alphanumeric() || c == '_') {
                path.push_str(segment);
            } else {
                path.push('"');
                path.push_str(&segment.replace('"', "\\\""));
                path.push('"');
            }
        }
        SqlValue::Text(path)
    }

    fn json_text(&self, value: &Value) -> String {
        // json() minifies, so ->> on a nested document yields compact text
        value.to_string()
    }

    fn json_scalar(&self, value: &Value) -> SqlValue {
        // ->> returns 1/0 for JSON booleans
        match value {
            Value::Bool(b) => SqlValue::Int(i64::from(*b)),
            other => scalar_value(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder() {
        let dialect = SqliteDialect;
        assert_eq!(dialect.placeholder(1), "?");
        assert_eq!(dialect.placeholder(5), "?");
    }

    #[test]
    fn test_regexp_operator() {
        let dialect = SqliteDialect;
        assert_eq!(dialect.regexp_operator(false), " REGEXP ");
        assert_eq!(dialect.regexp_operator(true), " NOT REGEXP ");
    }

    #[test]
    fn test_coalesce() {
        let dialect = SqliteDialect;
        assert_eq!(
            dialect.coalesce_text("\"runs\".\"name\""),
            "IFNULL(\"runs\".\"name\", '')"
        );
        assert_eq!(
            dialect.coalesce_json("\"contexts_1\".\"json\""),
            "IFNULL(\"contexts_1\".\"json\", JSON('{}'))"
        );
    }

    #[test]
    fn test_json_path() {
        let dialect = SqliteDialect;
        assert_eq!(dialect.json_path(&[]), SqlValue::from("$"));
        assert_eq!(dialect.json_path(&["key1".to_string()]), SqlValue::from("$.key1"));
        assert_eq!(
            dialect.json_path(&["a".to_string(), "b c".to_string()]),
            SqlValue::from("$.a.\"b c\"")
        );
    }

    #[test]
    fn test_json_text_is_compact() {
        let dialect = SqliteDialect;
        let value = serde_json::json!({"subset": "train", "ids": [1, 2]});
        assert_eq!(dialect.json_text(&value), r#"{"subset":"train","ids":[1,2]}"#);
    }

    #[test]
    fn test_json_scalar_bool() {
        let dialect = SqliteDialect;
        assert_eq!(dialect.json_scalar(&Value::Bool(true)), SqlValue::Int(1));
        assert_eq!(
            dialect.json_scalar(&Value::from("x")),
            SqlValue::Text("x".into())
        );
    }
}
