//! Composable SQL predicates
//!
//! A `Condition` is the predicate tree the resolver builds. Negation is
//! pushed into leaves so `not` on a comparison renders its negated
//! operator instead of a `NOT (...)` wrapper.

use serde_json::Value;

use crate::data::query::{ColumnRef, SqlValue, SqlWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
}

impl CompareOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => " = ",
            CompareOp::NotEq => " <> ",
            CompareOp::Lt => " < ",
            CompareOp::LtE => " <= ",
            CompareOp::Gt => " > ",
            CompareOp::GtE => " >= ",
        }
    }

    pub fn negate(self) -> CompareOp {
        match self {
            CompareOp::Eq => CompareOp::NotEq,
            CompareOp::NotEq => CompareOp::Eq,
            CompareOp::Lt => CompareOp::GtE,
            CompareOp::GtE => CompareOp::Lt,
            CompareOp::LtE => CompareOp::Gt,
            CompareOp::Gt => CompareOp::LtE,
        }
    }
}

/// Right-hand side of a column comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(SqlValue),
    Column(ColumnRef),
}

/// A JSON column and a path inside it
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRef {
    pub column: ColumnRef,
    pub path: Vec<String>,
}

impl JsonRef {
    pub fn new(column: ColumnRef) -> Self {
        Self {
            column,
            path: Vec::new(),
        }
    }

    /// The same column one level deeper
    pub fn child(&self, key: &str) -> Self {
        let mut path = self.path.clone();
        path.push(key.to_string());
        Self {
            column: self.column.clone(),
            path,
        }
    }

    fn write(&self, w: &mut SqlWriter<'_>) {
        let dialect = w.dialect();
        let column = dialect.coalesce_json(&self.column.to_sql(dialect));
        w.push(&column);
        w.push(dialect.json_extract_operator());
        w.push_param(dialect.json_path(&self.path));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Compare {
        column: ColumnRef,
        op: CompareOp,
        operand: Operand,
    },
    In {
        column: ColumnRef,
        values: Vec<SqlValue>,
        negated: bool,
    },
    Like {
        column: ColumnRef,
        pattern: String,
        negated: bool,
    },
    Regexp {
        column: ColumnRef,
        pattern: String,
        negated: bool,
    },
    JsonEq {
        target: JsonRef,
        value: Value,
        negated: bool,
    },
    JsonLike {
        target: JsonRef,
        pattern: String,
        negated: bool,
    },
}

impl Condition {
    /// Conjunction; a single condition is returned as-is
    pub fn and(mut conditions: Vec<Condition>) -> Condition {
        if conditions.len() == 1 {
            if let Some(only) = conditions.pop() {
                return only;
            }
        }
        Condition::And(conditions)
    }

    /// Disjunction; a single condition is returned as-is
    pub fn or(mut conditions: Vec<Condition>) -> Condition {
        if conditions.len() == 1 {
            if let Some(only) = conditions.pop() {
                return only;
            }
        }
        Condition::Or(conditions)
    }

    pub fn eq(column: ColumnRef, value: impl Into<SqlValue>) -> Condition {
        Condition::Compare {
            column,
            op: CompareOp::Eq,
            operand: Operand::Value(value.into()),
        }
    }

    /// Logical negation, pushed into leaves where they have a negated form
    pub fn negate(self) -> Condition {
        match self {
            Condition::Not(inner) => *inner,
            Condition::And(_) | Condition::Or(_) => Condition::Not(Box::new(self)),
            Condition::Compare {
                column,
                op,
                operand,
            } => Condition::Compare {
                column,
                op: op.negate(),
                operand,
            },
            Condition::In {
                column,
                values,
                negated,
            } => Condition::In {
                column,
                values,
                negated: !negated,
            },
            Condition::Like {
                column,
                pattern,
                negated,
            } => Condition::Like {
                column,
                pattern,
                negated: !negated,
            },
            Condition::Regexp {
                column,
                pattern,
                negated,
            } => Condition::Regexp {
                column,
                pattern,
                negated: !negated,
            },
            Condition::JsonEq {
                target,
                value,
                negated,
            } => Condition::JsonEq {
                target,
                value,
                negated: !negated,
            },
            Condition::JsonLike {
                target,
                pattern,
                negated,
            } => Condition::JsonLike {
                target,
                pattern,
                negated: !negated,
            },
        }
    }

    fn is_compound(&self) -> bool {
        match self {
            Condition::And(items) | Condition::Or(items) => items.len() > 1,
            _ => false,
        }
    }

    fn write_child(&self, w: &mut SqlWriter<'_>) {
        if self.is_compound() {
            w.push("(");
            self.write(w);
            w.push(")");
        } else {
            self.write(w);
        }
    }

    fn write_joined(items: &[Condition], separator: &str, empty: &str, w: &mut SqlWriter<'_>) {
        if items.is_empty() {
            w.push(empty);
            return;
        }
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                w.push(separator);
            }
            item.write_child(w);
        }
    }

    /// Render the predicate, appending bind values to the writer
    pub fn write(&self, w: &mut SqlWriter<'_>) {
        match self {
            Condition::And(items) => Self::write_joined(items, " AND ", "1=1", w),
            Condition::Or(items) => Self::write_joined(items, " OR ", "1=0", w),
            Condition::Not(inner) => {
                w.push("NOT (");
                inner.write(w);
                w.push(")");
            }
            Condition::Compare {
                column,
                op,
                operand,
            } => {
                w.push_column(column);
                match (op, operand) {
                    (CompareOp::Eq, Operand::Value(SqlValue::Null)) => w.push(" IS NULL"),
                    (CompareOp::NotEq, Operand::Value(SqlValue::Null)) => w.push(" IS NOT NULL"),
                    (op, Operand::Value(value)) => {
                        w.push(op.as_sql());
                        w.push_param(value.clone());
                    }
                    (op, Operand::Column(other)) => {
                        w.push(op.as_sql());
                        w.push_column(other);
                    }
                }
            }
            Condition::In {
                column,
                values,
                negated,
            } => {
                w.push_column(column);
                w.push(if *negated { " NOT IN (" } else { " IN (" });
                if values.is_empty() {
                    w.push("NULL");
                }
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        w.push(",");
                    }
                    w.push_param(value.clone());
                }
                w.push(")");
            }
            Condition::Like {
                column,
                pattern,
                negated,
            } => {
                w.push_column(column);
                w.push(if *negated { " NOT LIKE " } else { " LIKE " });
                w.push_param(SqlValue::Text(pattern.clone()));
            }
            Condition::Regexp {
                column,
                pattern,
                negated,
            } => {
                let dialect = w.dialect();
                w.push(&dialect.coalesce_text(&column.to_sql(dialect)));
                w.push(dialect.regexp_operator(*negated));
                w.push_param(SqlValue::Text(pattern.clone()));
            }
            Condition::JsonEq {
                target,
                value,
                negated,
            } => {
                target.write(w);
                let dialect = w.dialect();
                match value {
                    Value::Null => w.push(if *negated { " IS NOT NULL" } else { " IS NULL" }),
                    Value::Array(_) | Value::Object(_) => {
                        w.push(if *negated { " <> " } else { " = " });
                        w.push_param(SqlValue::Text(dialect.json_text(value)));
                    }
                    scalar => {
                        w.push(if *negated { " <> " } else { " = " });
                        w.push_param(dialect.json_scalar(scalar));
                    }
                }
            }
            Condition::JsonLike {
                target,
                pattern,
                negated,
            } => {
                target.write(w);
                w.push(if *negated { " NOT LIKE " } else { " LIKE " });
                w.push_param(SqlValue::Text(pattern.clone()));
            }
        }
    }
}

/// Render conditions that are ANDed together at the top of a WHERE clause
///
/// A lone condition is written bare; with several, compound members are
/// parenthesized.
pub fn write_conjunction(conditions: &[Condition], w: &mut SqlWriter<'_>) {
    match conditions {
        [] => {}
        [only] => only.write(w),
        many => {
            for (i, condition) in many.iter().enumerate() {
                if i > 0 {
                    w.push(" AND ");
                }
                condition.write_child(w);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sql::{PostgresDialect, SqlDialect, SqliteDialect};

    fn render(condition: &Condition, dialect: &dyn SqlDialect) -> (String, Vec<SqlValue>) {
        let mut w = SqlWriter::new(dialect);
        condition.write(&mut w);
        w.finish()
    }

    fn name() -> ColumnRef {
        ColumnRef::new("runs", "name")
    }

    fn context() -> JsonRef {
        JsonRef::new(ColumnRef::new("contexts_1", "json"))
    }

    #[test]
    fn test_compare_and_null() {
        let cond = Condition::eq(name(), "run");
        assert_eq!(
            render(&cond, &PostgresDialect),
            ("\"runs\".\"name\" = $1".to_string(), vec![SqlValue::from("run")])
        );
        let cond = Condition::eq(name(), SqlValue::Null).negate();
        assert_eq!(
            render(&cond, &SqliteDialect),
            ("\"runs\".\"name\" IS NOT NULL".to_string(), vec![])
        );
    }

    #[test]
    fn test_negate_ordering() {
        let cond = Condition::Compare {
            column: name(),
            op: CompareOp::Lt,
            operand: Operand::Value(SqlValue::Int(1)),
        };
        let (sql, _) = render(&cond.negate(), &SqliteDialect);
        assert_eq!(sql, "\"runs\".\"name\" >= ?");
    }

    #[test]
    fn test_double_negation_cancels() {
        let cond = Condition::and(vec![Condition::eq(name(), "a"), Condition::eq(name(), "b")]);
        assert_eq!(cond.clone().negate().negate(), cond);
        let (sql, _) = render(&cond.negate(), &SqliteDialect);
        assert_eq!(sql, "NOT (\"runs\".\"name\" = ? AND \"runs\".\"name\" = ?)");
    }

    #[test]
    fn test_nested_compound_is_parenthesized() {
        let cond = Condition::and(vec![
            Condition::eq(name(), "a"),
            Condition::or(vec![Condition::eq(name(), "b"), Condition::eq(name(), "c")]),
        ]);
        let (sql, params) = render(&cond, &PostgresDialect);
        assert_eq!(
            sql,
            "\"runs\".\"name\" = $1 AND (\"runs\".\"name\" = $2 OR \"runs\".\"name\" = $3)"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_in_list() {
        let cond = Condition::In {
            column: name(),
            values: vec!["a".into(), "b".into()],
            negated: false,
        };
        assert_eq!(render(&cond, &PostgresDialect).0, "\"runs\".\"name\" IN ($1,$2)");
        let empty = Condition::In {
            column: name(),
            values: vec![],
            negated: true,
        };
        assert_eq!(render(&empty, &SqliteDialect).0, "\"runs\".\"name\" NOT IN (NULL)");
    }

    #[test]
    fn test_regexp_per_dialect() {
        let cond = Condition::Regexp {
            column: name(),
            pattern: "^run".into(),
            negated: false,
        };
        assert_eq!(
            render(&cond, &SqliteDialect).0,
            "IFNULL(\"runs\".\"name\", '') REGEXP ?"
        );
        assert_eq!(render(&cond.negate(), &PostgresDialect).0, "\"runs\".\"name\" !~ $1");
    }

    #[test]
    fn test_json_eq_per_dialect() {
        let cond = Condition::JsonEq {
            target: context().child("key1"),
            value: Value::from("value1"),
            negated: false,
        };
        assert_eq!(
            render(&cond, &SqliteDialect),
            (
                "IFNULL(\"contexts_1\".\"json\", JSON('{}'))->>? = ?".to_string(),
                vec![SqlValue::from("$.key1"), SqlValue::from("value1")]
            )
        );
        assert_eq!(
            render(&cond, &PostgresDialect),
            (
                "\"contexts_1\".\"json\"#>>$1 = $2".to_string(),
                vec![
                    SqlValue::TextArray(vec!["key1".to_string()]),
                    SqlValue::from("value1")
                ]
            )
        );
    }

    #[test]
    fn test_json_eq_null_and_document() {
        let cond = Condition::JsonEq {
            target: context().child("subset"),
            value: Value::Null,
            negated: true,
        };
        assert_eq!(
            render(&cond, &PostgresDialect).0,
            "\"contexts_1\".\"json\"#>>$1 IS NOT NULL"
        );

        let cond = Condition::JsonEq {
            target: context(),
            value: serde_json::json!({}),
            negated: false,
        };
        assert_eq!(
            render(&cond, &SqliteDialect).1,
            vec![SqlValue::from("$"), SqlValue::from("{}")]
        );
    }

    #[test]
    fn test_json_like() {
        let cond = Condition::JsonLike {
            target: context().child("subset"),
            pattern: "tr%".into(),
            negated: true,
        };
        assert_eq!(
            render(&cond, &PostgresDialect).0,
            "\"contexts_1\".\"json\"#>>$1 NOT LIKE $2"
        );
    }

    #[test]
    fn test_write_conjunction() {
        let default_scope = Condition::eq(ColumnRef::new("runs", "lifecycle_stage"), "deleted").negate();
        let user = Condition::and(vec![Condition::eq(name(), "run"), default_scope.clone()]);

        let mut w = SqlWriter::new(&PostgresDialect);
        write_conjunction(std::slice::from_ref(&user), &mut w);
        assert_eq!(
            w.finish().0,
            "\"runs\".\"name\" = $1 AND \"runs\".\"lifecycle_stage\" <> $2"
        );

        let side = Condition::eq(name(), "x");
        let mut w = SqlWriter::new(&PostgresDialect);
        write_conjunction(&[side, user], &mut w);
        assert_eq!(
            w.finish().0,
            "\"runs\".\"name\" = $1 AND (\"runs\".\"name\" = $2 AND \"runs\".\"lifecycle_stage\" <> $3)"
        );
    }
}
