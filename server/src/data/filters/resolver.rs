//! Name resolver
//!
//! Walks the syntax tree and maps every node to a `Resolved` value. Joins
//! are registered lazily as names are looked up. Resolving
//! `run.metrics[key, {context}]` also appends the context predicates to
//! the context's condition list; those never appear in the returned value.

use chrono::{FixedOffset, NaiveDate, TimeZone};
use serde_json::Value;
use tracing::trace;

use super::ast::{BoolOp, CmpOp, Expr, ExprKind, Span, UnaryOp};
use super::compiler::TableMap;
use super::condition::{CompareOp, Condition, JsonRef, Operand};
use super::error::SpannedError;
use super::joins::JoinRegistry;
use super::types::{Callable, Getter, LikeKind, Literal, MethodTarget, Namespace, Resolved, Slicer};
use crate::core::constants::{
    CONTEXTS_TABLE, LATEST_METRICS_TABLE, LIFECYCLE_STAGE_DELETED, PARAMS_TABLE, STATUS_RUNNING,
    TAGS_TABLE,
};
use crate::data::query::{ColumnRef, SqlValue};
use crate::data::sql::Backend;

/// Mutable state threaded through one compilation
pub struct ResolveContext<'a> {
    dialect: Backend,
    tables: &'a TableMap,
    tz_offset: i32,
    joins: JoinRegistry,
    conditions: Vec<Condition>,
}

impl<'a> ResolveContext<'a> {
    pub fn new(dialect: Backend, tables: &'a TableMap, tz_offset: i32) -> Self {
        Self {
            dialect,
            tables,
            tz_offset,
            joins: JoinRegistry::new(),
            conditions: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Backend {
        self.dialect
    }

    pub fn joins(&self) -> &JoinRegistry {
        &self.joins
    }

    /// Conditions appended as a side effect of resolution
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn into_parts(self) -> (JoinRegistry, Vec<Condition>) {
        (self.joins, self.conditions)
    }

    pub fn resolve(&mut self, expr: &Expr) -> Result<Resolved, SpannedError> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Name(name) => self.resolve_name(name, span),
            ExprKind::Str(s) => Ok(Resolved::Literal(Literal::Str(s.clone()))),
            ExprKind::Int(i) => Ok(Resolved::Literal(Literal::Int(*i))),
            ExprKind::Float(f) => Ok(Resolved::Literal(Literal::Float(*f))),
            ExprKind::Bool(b) => Ok(Resolved::Literal(Literal::Bool(*b))),
            ExprKind::None => Ok(Resolved::Literal(Literal::None)),
            ExprKind::Dict(pairs) => Ok(Resolved::Literal(Literal::Dict(pairs.clone()))),
            ExprKind::List(items) | ExprKind::Tuple(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match self.resolve(item)? {
                        Resolved::Literal(lit) => values.push(lit),
                        other => {
                            return Err(SpannedError::semantic(
                                format!("sequence elements must be literals, found {}", other.kind()),
                                item.span,
                            ));
                        }
                    }
                }
                Ok(Resolved::Literal(Literal::List(values)))
            }
            ExprKind::Attribute { value, attr } => {
                let receiver = self.resolve(value)?;
                self.resolve_attribute(receiver, attr, span)
            }
            ExprKind::Subscript { value, index } => {
                let receiver = self.resolve(value)?;
                self.resolve_subscript(receiver, index, span)
            }
            ExprKind::Call { func, args } => match self.resolve(func)? {
                Resolved::Callable(callable) => self.call(callable, args, span),
                other => Err(SpannedError::semantic(
                    format!("'{}' is not callable", other.kind()),
                    func.span,
                )),
            },
            ExprKind::UnaryOp { op, operand } => self.resolve_unary(*op, operand, span),
            ExprKind::BoolOp { op, values } => {
                let mut conditions = Vec::with_capacity(values.len());
                for value in values {
                    match self.resolve(value)? {
                        Resolved::Predicate(c) => conditions.push(c),
                        other => {
                            return Err(SpannedError::operator(
                                format!("boolean operand must be a condition, found {}", other.kind()),
                                value.span,
                            ));
                        }
                    }
                }
                Ok(Resolved::Predicate(match op {
                    BoolOp::And => Condition::and(conditions),
                    BoolOp::Or => Condition::or(conditions),
                }))
            }
            ExprKind::Compare { left, comparisons } => self.resolve_compare(left, comparisons),
        }
    }

    fn resolve_name(&mut self, name: &str, span: Span) -> Result<Resolved, SpannedError> {
        match name {
            "run" => {
                self.runs_table(span)?;
                Ok(Resolved::AttributeGetter(Getter::Run))
            }
            "metric" => {
                self.metrics_table(span)?;
                Ok(Resolved::AttributeGetter(Getter::Metric))
            }
            "re" => Ok(Resolved::AttributeGetter(Getter::Re)),
            "datetime" => Ok(Resolved::Callable(Callable::Datetime)),
            other => Err(SpannedError::semantic(
                format!("unsupported name identifier '{}'", other),
                span,
            )),
        }
    }

    fn runs_table(&self, span: Span) -> Result<&'a str, SpannedError> {
        self.tables
            .runs
            .as_deref()
            .ok_or_else(|| SpannedError::semantic("unsupported name identifier 'run'", span))
    }

    fn metrics_table(&self, span: Span) -> Result<&'a str, SpannedError> {
        self.tables
            .metrics
            .as_deref()
            .ok_or_else(|| SpannedError::semantic("unsupported name identifier 'metric'", span))
    }

    fn resolve_attribute(
        &mut self,
        receiver: Resolved,
        attr: &str,
        span: Span,
    ) -> Result<Resolved, SpannedError> {
        let like = match attr {
            "startswith" => Some(LikeKind::StartsWith),
            "endswith" => Some(LikeKind::EndsWith),
            "contains" => Some(LikeKind::Contains),
            _ => None,
        };

        match receiver {
            Resolved::Column(column) => match (attr, like) {
                (_, Some(kind)) => Ok(Resolved::Callable(Callable::Like {
                    target: MethodTarget::Column(column),
                    kind,
                })),
                ("match" | "search", None) => Ok(Resolved::Callable(Callable::Regex {
                    anchored: attr == "match",
                    subject: Some(column),
                })),
                _ => Err(SpannedError::semantic(
                    format!("column has no attribute '{}'", attr),
                    span,
                )),
            },
            Resolved::JsonRef(target) => match like {
                Some(kind) => Ok(Resolved::Callable(Callable::Like {
                    target: MethodTarget::Json(target),
                    kind,
                })),
                None => Ok(Resolved::JsonRef(target.child(attr))),
            },
            // string methods need a column receiver; never a param or tag named after them
            other @ (Resolved::AttributeGetter(_) | Resolved::AttributeOrSubscript(_))
                if matches!(attr, "startswith" | "endswith") =>
            {
                Err(SpannedError::semantic(
                    format!("'{}' is not a string; '{}' needs a column", other.kind(), attr),
                    span,
                ))
            }
            Resolved::AttributeGetter(Getter::Run) => self.run_attribute(attr, span),
            Resolved::AttributeGetter(Getter::Metric) => self.metric_attribute(attr, span),
            Resolved::AttributeGetter(Getter::Re) => match attr {
                "match" | "search" => Ok(Resolved::Callable(Callable::Regex {
                    anchored: attr == "match",
                    subject: None,
                })),
                _ => Err(SpannedError::semantic(
                    format!("unsupported re function '{}'", attr),
                    span,
                )),
            },
            Resolved::AttributeGetter(Getter::MetricSeries { alias }) => {
                metric_series_attribute(&alias, attr, span)
            }
            Resolved::AttributeOrSubscript(Namespace::RunTags) => self.tag_column(attr, span),
            other => Err(SpannedError::semantic(
                format!("'{}' has no attribute '{}'", other.kind(), attr),
                span,
            )),
        }
    }

    fn resolve_subscript(
        &mut self,
        receiver: Resolved,
        index: &Expr,
        span: Span,
    ) -> Result<Resolved, SpannedError> {
        match receiver {
            Resolved::AttributeOrSubscript(Namespace::RunTags) => match self.resolve(index)? {
                Resolved::Literal(Literal::Str(key)) => self.tag_column(&key, span),
                other => Err(SpannedError::semantic(
                    format!("tag key must be a string, found {}", other.kind()),
                    index.span,
                )),
            },
            Resolved::Subscript(Slicer::RunMetrics) => self.metric_series(index, span),
            Resolved::JsonRef(target) => match self.resolve(index)? {
                Resolved::Literal(Literal::Str(key)) => Ok(Resolved::JsonRef(target.child(&key))),
                other => Err(SpannedError::semantic(
                    format!("json key must be a string, found {}", other.kind()),
                    index.span,
                )),
            },
            other => Err(SpannedError::semantic(
                format!("'{}' is not subscriptable", other.kind()),
                span,
            )),
        }
    }

    fn run_attribute(&mut self, attr: &str, span: Span) -> Result<Resolved, SpannedError> {
        let table = self.runs_table(span)?;
        let column = |name: &str| -> Result<Resolved, SpannedError> {
            Ok(Resolved::Column(ColumnRef::new(table, name)))
        };
        match attr {
            "name" => Ok(Resolved::Column(ColumnRef::text(table, "name"))),
            "hash" => Ok(Resolved::Column(ColumnRef::text(table, "run_uuid"))),
            "creation_time" | "created_at" => column("start_time"),
            "end_time" | "finalized_at" => column("end_time"),
            "experiment" => match self.tables.experiments.as_deref() {
                Some(experiments) => Ok(Resolved::Column(ColumnRef::text(experiments, "name"))),
                None => Err(SpannedError::semantic(
                    "unsupported attribute 'experiment'",
                    span,
                )),
            },
            "archived" => Ok(Resolved::Predicate(Condition::eq(
                ColumnRef::new(table, "lifecycle_stage"),
                LIFECYCLE_STAGE_DELETED,
            ))),
            "active" => Ok(Resolved::Predicate(Condition::eq(
                ColumnRef::new(table, "status"),
                STATUS_RUNNING,
            ))),
            "duration" => Ok(Resolved::Column(ColumnRef::raw(format!(
                "({table}.end_time - {table}.start_time) / 1000"
            )))),
            "metrics" => Ok(Resolved::Subscript(Slicer::RunMetrics)),
            "tags" => Ok(Resolved::AttributeOrSubscript(Namespace::RunTags)),
            param => {
                let registered = self.joins.register(
                    &format!("param:{}", param),
                    "params",
                    |alias| keyed_join(PARAMS_TABLE, alias, table),
                    vec![SqlValue::from(param)],
                );
                Ok(Resolved::Column(ColumnRef::text(registered.alias, "value")))
            }
        }
    }

    fn metric_attribute(&mut self, attr: &str, span: Span) -> Result<Resolved, SpannedError> {
        let table = self.metrics_table(span)?;
        match attr {
            "name" => Ok(Resolved::Column(ColumnRef::text(table, "key"))),
            "last" => Ok(Resolved::Column(ColumnRef::new(table, "value"))),
            "last_step" => Ok(Resolved::Column(ColumnRef::new(table, "last_iter"))),
            "first_step" => Ok(Resolved::Literal(Literal::Int(0))),
            "context" => {
                let registered = self.joins.register(
                    "context:metric",
                    "contexts",
                    |alias| context_join(alias, table),
                    Vec::new(),
                );
                Ok(Resolved::JsonRef(JsonRef::new(ColumnRef::new(
                    registered.alias,
                    "json",
                ))))
            }
            _ => Err(SpannedError::semantic(
                format!("unsupported metrics attribute '{}'", attr),
                span,
            )),
        }
    }

    fn tag_column(&mut self, key: &str, span: Span) -> Result<Resolved, SpannedError> {
        let table = self.runs_table(span)?;
        let registered = self.joins.register(
            &format!("tag:{}", key),
            "tags",
            |alias| keyed_join(TAGS_TABLE, alias, table),
            vec![SqlValue::from(key)],
        );
        Ok(Resolved::Column(ColumnRef::text(registered.alias, "value")))
    }

    /// `run.metrics[key]` or `run.metrics[key, {context}]`
    fn metric_series(&mut self, index: &Expr, span: Span) -> Result<Resolved, SpannedError> {
        let table = self.runs_table(span)?;
        match self.resolve(index)? {
            Resolved::Literal(Literal::Str(key)) => {
                let registered = self.joins.register(
                    &format!("metric:{}", key),
                    "metrics",
                    |alias| keyed_join(LATEST_METRICS_TABLE, alias, table),
                    vec![SqlValue::from(key)],
                );
                Ok(Resolved::AttributeGetter(Getter::MetricSeries {
                    alias: registered.alias,
                }))
            }
            Resolved::Literal(Literal::List(items)) => match items.as_slice() {
                [Literal::Str(key), Literal::Dict(pairs)] => {
                    let context = Literal::Dict(pairs.clone()).to_json().to_string();
                    let metric = self.joins.register(
                        &format!("metric:{}:{}", key, context),
                        "metrics",
                        |alias| keyed_join(LATEST_METRICS_TABLE, alias, table),
                        vec![SqlValue::from(key.as_str())],
                    );
                    let contexts = self.joins.register(
                        &format!("context:{}:{}", key, context),
                        "contexts",
                        |alias| context_join(alias, &metric.alias),
                        Vec::new(),
                    );
                    if contexts.is_new {
                        let target = JsonRef::new(ColumnRef::new(contexts.alias.as_str(), "json"));
                        let conditions = dict_conditions(&target, pairs);
                        trace!(
                            alias = %contexts.alias,
                            count = conditions.len(),
                            "Appending metric context conditions"
                        );
                        self.conditions.extend(conditions);
                    }
                    Ok(Resolved::AttributeGetter(Getter::MetricSeries {
                        alias: metric.alias,
                    }))
                }
                _ => Err(SpannedError::semantic(
                    "metrics index must be a key or a (key, context) pair",
                    index.span,
                )),
            },
            other => Err(SpannedError::semantic(
                format!("unsupported metrics index of type {}", other.kind()),
                index.span,
            )),
        }
    }

    fn call(&mut self, callable: Callable, args: &[Expr], span: Span) -> Result<Resolved, SpannedError> {
        match callable {
            Callable::Datetime => self.datetime(args, span),
            Callable::Regex { anchored, subject } => {
                let (pattern, column) = match subject {
                    Some(column) => {
                        expect_arity("match", args, 1, span)?;
                        (self.string_arg(&args[0])?, column)
                    }
                    None => {
                        let name = if anchored { "re.match" } else { "re.search" };
                        expect_arity(name, args, 2, span)?;
                        let pattern = self.string_arg(&args[0])?;
                        let column = match self.resolve(&args[1])? {
                            Resolved::Column(column) => column,
                            other => {
                                return Err(SpannedError::semantic(
                                    format!(
                                        "second argument of {} must be a column, found {}",
                                        name,
                                        other.kind()
                                    ),
                                    args[1].span,
                                ));
                            }
                        };
                        (pattern, column)
                    }
                };
                let pattern = if anchored {
                    format!("^{}", pattern)
                } else {
                    pattern
                };
                Ok(Resolved::Predicate(Condition::Regexp {
                    column,
                    pattern,
                    negated: false,
                }))
            }
            Callable::Like { target, kind } => {
                let name = match kind {
                    LikeKind::StartsWith => "startswith",
                    LikeKind::EndsWith => "endswith",
                    LikeKind::Contains => "contains",
                };
                expect_arity(name, args, 1, span)?;
                let pattern = kind.pattern(&self.string_arg(&args[0])?);
                Ok(Resolved::Predicate(match target {
                    MethodTarget::Column(column) => Condition::Like {
                        column,
                        pattern,
                        negated: false,
                    },
                    MethodTarget::Json(target) => Condition::JsonLike {
                        target,
                        pattern,
                        negated: false,
                    },
                }))
            }
        }
    }

    fn string_arg(&mut self, arg: &Expr) -> Result<String, SpannedError> {
        match self.resolve(arg)? {
            Resolved::Literal(Literal::Str(s)) => Ok(s),
            other => Err(SpannedError::semantic(
                format!("argument must be a string, found {}", other.kind()),
                arg.span,
            )),
        }
    }

    /// `datetime(year, month, day, hour, minute, second, microsecond)` as epoch millis
    fn datetime(&mut self, args: &[Expr], span: Span) -> Result<Resolved, SpannedError> {
        if !(3..=7).contains(&args.len()) {
            return Err(SpannedError::semantic(
                format!("datetime() takes 3 to 7 arguments ({} given)", args.len()),
                span,
            ));
        }
        let mut parts = [0i64; 7];
        for (i, arg) in args.iter().enumerate() {
            parts[i] = match self.resolve(arg)? {
                Resolved::Literal(Literal::Int(n)) => n,
                other => {
                    return Err(SpannedError::semantic(
                        format!("datetime() argument {} must be int, found {}", i + 1, other.kind()),
                        arg.span,
                    ));
                }
            };
        }

        let out_of_range = || SpannedError::semantic("datetime() argument out of range", span);
        let to_u32 = |v: i64| u32::try_from(v).map_err(|_| out_of_range());
        let year = i32::try_from(parts[0]).map_err(|_| out_of_range())?;
        let naive = NaiveDate::from_ymd_opt(year, to_u32(parts[1])?, to_u32(parts[2])?)
            .and_then(|date| {
                date.and_hms_micro_opt(
                    u32::try_from(parts[3]).ok()?,
                    u32::try_from(parts[4]).ok()?,
                    u32::try_from(parts[5]).ok()?,
                    u32::try_from(parts[6]).ok()?,
                )
            })
            .ok_or_else(out_of_range)?;

        // the offset is minutes behind UTC, so the zone is shifted the other way
        let offset = self
            .tz_offset
            .checked_mul(-60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| SpannedError::semantic("timezone offset out of range", span))?;
        let millis = offset
            .from_local_datetime(&naive)
            .single()
            .ok_or_else(out_of_range)?
            .timestamp_millis();
        Ok(Resolved::Literal(Literal::Int(millis)))
    }

    fn resolve_unary(&mut self, op: UnaryOp, operand: &Expr, span: Span) -> Result<Resolved, SpannedError> {
        let value = self.resolve(operand)?;
        match (op, value) {
            (UnaryOp::Neg, Resolved::Literal(Literal::Int(i))) => i
                .checked_neg()
                .map(|n| Resolved::Literal(Literal::Int(n)))
                .ok_or_else(|| SpannedError::semantic("integer literal out of range", span)),
            (UnaryOp::Neg, Resolved::Literal(Literal::Float(f))) => {
                Ok(Resolved::Literal(Literal::Float(-f)))
            }
            (UnaryOp::Not, Resolved::Predicate(c)) => Ok(Resolved::Predicate(c.negate())),
            (UnaryOp::Not, Resolved::Literal(Literal::Bool(b))) => {
                Ok(Resolved::Literal(Literal::Bool(!b)))
            }
            (op, other) => {
                let symbol = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "not",
                };
                Err(SpannedError::operator(
                    format!("bad operand type for unary {}: {}", symbol, other.kind()),
                    span,
                ))
            }
        }
    }

    fn resolve_compare(
        &mut self,
        left: &Expr,
        comparisons: &[(CmpOp, Expr)],
    ) -> Result<Resolved, SpannedError> {
        // each operand is resolved once, so a shared middle operand registers its joins once
        let mut operands = Vec::with_capacity(comparisons.len() + 1);
        operands.push((self.resolve(left)?, left.span));
        for (_, right) in comparisons {
            operands.push((self.resolve(right)?, right.span));
        }

        let mut conditions = Vec::with_capacity(comparisons.len());
        for (i, (op, _)) in comparisons.iter().enumerate() {
            let (left, left_span) = &operands[i];
            let (right, right_span) = &operands[i + 1];
            let span = left_span.to(*right_span);
            conditions.push(compare(*op, left.clone(), right.clone(), span)?);
        }
        Ok(Resolved::Predicate(Condition::and(conditions)))
    }
}

/// `LEFT JOIN <table> <alias> ON <runs>.run_uuid = <alias>.run_uuid AND <alias>.key = ?`
fn keyed_join(table: &str, alias: &str, runs: &str) -> String {
    format!(
        "LEFT JOIN {table} {alias} ON {runs}.run_uuid = {alias}.run_uuid AND {alias}.key = ?"
    )
}

/// `LEFT JOIN contexts <alias> ON <metrics>.context_id = <alias>.id`
fn context_join(alias: &str, metrics: &str) -> String {
    format!("LEFT JOIN {CONTEXTS_TABLE} {alias} ON {metrics}.context_id = {alias}.id")
}

fn metric_series_attribute(alias: &str, attr: &str, span: Span) -> Result<Resolved, SpannedError> {
    match attr {
        "last" => Ok(Resolved::Column(ColumnRef::new(alias, "value"))),
        "last_step" => Ok(Resolved::Column(ColumnRef::new(alias, "last_iter"))),
        "first_step" => Ok(Resolved::Literal(Literal::Int(0))),
        _ => Err(SpannedError::semantic(
            format!("unsupported metrics attribute '{}'", attr),
            span,
        )),
    }
}

fn expect_arity(name: &str, args: &[Expr], expected: usize, span: Span) -> Result<(), SpannedError> {
    if args.len() == expected {
        return Ok(());
    }
    Err(SpannedError::semantic(
        format!(
            "{}() takes exactly {} argument{} ({} given)",
            name,
            expected,
            if expected == 1 { "" } else { "s" },
            args.len()
        ),
        span,
    ))
}

/// Path segments of a context key, without a leading `$.`
fn context_path(key: &str) -> Vec<String> {
    let key = key.strip_prefix("$.").unwrap_or(key);
    key.split('.').map(str::to_string).collect()
}

/// One JSON equality per pair; an empty dict matches the empty document
fn dict_conditions(target: &JsonRef, pairs: &[(String, String)]) -> Vec<Condition> {
    if pairs.is_empty() {
        return vec![Condition::JsonEq {
            target: target.clone(),
            value: Value::Object(Default::default()),
            negated: false,
        }];
    }
    pairs
        .iter()
        .map(|(key, value)| {
            let mut path = target.path.clone();
            path.extend(context_path(key));
            Condition::JsonEq {
                target: JsonRef {
                    column: target.column.clone(),
                    path,
                },
                value: Value::String(value.clone()),
                negated: false,
            }
        })
        .collect()
}

fn operator_error(op: CmpOp, left: &Resolved, right: &Resolved, span: Span) -> SpannedError {
    SpannedError::operator(
        format!(
            "'{}' not supported between {} and {}",
            op.symbol(),
            left.kind(),
            right.kind()
        ),
        span,
    )
}

/// Dispatch one comparison pair on the resolved operand kinds
fn compare(op: CmpOp, left: Resolved, right: Resolved, span: Span) -> Result<Condition, SpannedError> {
    match (left, right) {
        (Resolved::Column(column), Resolved::Literal(lit)) => column_vs_literal(op, column, lit, span),
        (Resolved::Literal(lit), Resolved::Column(column)) => match op {
            CmpOp::In | CmpOp::NotIn => match lit {
                Literal::Str(s) => Ok(Condition::Like {
                    column,
                    pattern: LikeKind::Contains.pattern(&s),
                    negated: op == CmpOp::NotIn,
                }),
                other => Err(SpannedError::operator(
                    format!("left operand of '{}' must be a string, found {}", op.symbol(), other.type_name()),
                    span,
                )),
            },
            op => column_vs_literal(op.reversed(), column, lit, span),
        },
        (Resolved::Column(column), Resolved::Column(other)) => match compare_op(op) {
            Some(cmp) => Ok(Condition::Compare {
                column,
                op: cmp,
                operand: Operand::Column(other),
            }),
            None => Err(operator_error(op, &Resolved::Column(column), &Resolved::Column(other), span)),
        },
        (Resolved::Predicate(p), Resolved::Literal(Literal::Bool(b)))
        | (Resolved::Literal(Literal::Bool(b)), Resolved::Predicate(p)) => bool_compare(op, p, b, span),
        (Resolved::JsonRef(target), Resolved::Literal(lit)) => json_compare(op, target, lit, span),
        (Resolved::Literal(lit), Resolved::JsonRef(target)) => match (op, lit) {
            (CmpOp::In | CmpOp::NotIn, Literal::Str(s)) => Ok(Condition::JsonLike {
                target,
                pattern: LikeKind::Contains.pattern(&s),
                negated: op == CmpOp::NotIn,
            }),
            (op, lit) => json_compare(op.reversed(), target, lit, span),
        },
        (left, right) => Err(operator_error(op, &left, &right, span)),
    }
}

/// Equality and ordering operators; membership has no direct form
fn compare_op(op: CmpOp) -> Option<CompareOp> {
    match op {
        CmpOp::Eq | CmpOp::Is => Some(CompareOp::Eq),
        CmpOp::NotEq | CmpOp::IsNot => Some(CompareOp::NotEq),
        CmpOp::Lt => Some(CompareOp::Lt),
        CmpOp::LtE => Some(CompareOp::LtE),
        CmpOp::Gt => Some(CompareOp::Gt),
        CmpOp::GtE => Some(CompareOp::GtE),
        CmpOp::In | CmpOp::NotIn => None,
    }
}

fn column_vs_literal(op: CmpOp, column: ColumnRef, lit: Literal, span: Span) -> Result<Condition, SpannedError> {
    if let CmpOp::In | CmpOp::NotIn = op {
        let Literal::List(items) = lit else {
            return Err(SpannedError::operator(
                format!("right operand of '{}' must be a list, found {}", op.symbol(), lit.type_name()),
                span,
            ));
        };
        let mut values = Vec::with_capacity(items.len());
        for item in &items {
            match item.to_sql_value() {
                Some(value) if column.text => values.push(value.into_text()),
                Some(value) => values.push(value),
                None => {
                    return Err(SpannedError::operator(
                        format!("'{}' list elements must be scalars, found {}", op.symbol(), item.type_name()),
                        span,
                    ));
                }
            }
        }
        return Ok(Condition::In {
            column,
            values,
            negated: op == CmpOp::NotIn,
        });
    }

    let Some(value) = lit.to_sql_value() else {
        return Err(SpannedError::operator(
            format!("'{}' not supported between column and {}", op.symbol(), lit.type_name()),
            span,
        ));
    };
    let Some(cmp) = compare_op(op) else {
        return Err(SpannedError::operator(
            format!("unsupported comparison operator '{}'", op.symbol()),
            span,
        ));
    };
    if value == SqlValue::Null && !matches!(cmp, CompareOp::Eq | CompareOp::NotEq) {
        return Err(SpannedError::operator(
            format!("'{}' not supported against None", op.symbol()),
            span,
        ));
    }
    // text columns compare as text on both engines
    let value = if column.text { value.into_text() } else { value };
    Ok(Condition::Compare {
        column,
        op: cmp,
        operand: Operand::Value(value),
    })
}

/// `predicate == True` is the predicate, `predicate == False` its negation
fn bool_compare(op: CmpOp, predicate: Condition, value: bool, span: Span) -> Result<Condition, SpannedError> {
    match op {
        CmpOp::Eq | CmpOp::Is => Ok(if value { predicate } else { predicate.negate() }),
        CmpOp::NotEq | CmpOp::IsNot => Ok(if value { predicate.negate() } else { predicate }),
        _ => Err(SpannedError::operator(
            format!("comparison '{}' incompatible with bool", op.symbol()),
            span,
        )),
    }
}

fn json_compare(op: CmpOp, target: JsonRef, lit: Literal, span: Span) -> Result<Condition, SpannedError> {
    match op {
        CmpOp::Eq | CmpOp::Is | CmpOp::NotEq | CmpOp::IsNot => {
            let negated = matches!(op, CmpOp::NotEq | CmpOp::IsNot);
            let condition = match lit {
                Literal::Dict(pairs) if !pairs.is_empty() => {
                    Condition::and(dict_conditions(&target, &pairs))
                }
                lit => Condition::JsonEq {
                    target,
                    value: lit.to_json(),
                    negated: false,
                },
            };
            Ok(if negated { condition.negate() } else { condition })
        }
        CmpOp::In | CmpOp::NotIn => {
            let Literal::List(items) = lit else {
                return Err(SpannedError::operator(
                    format!("right operand of '{}' must be a list, found {}", op.symbol(), lit.type_name()),
                    span,
                ));
            };
            let alternatives = items
                .iter()
                .map(|item| Condition::JsonEq {
                    target: target.clone(),
                    value: item.to_json(),
                    negated: false,
                })
                .collect();
            let condition = Condition::or(alternatives);
            Ok(if op == CmpOp::NotIn { condition.negate() } else { condition })
        }
        _ => Err(SpannedError::operator(
            format!("'{}' not supported for json values", op.symbol()),
            span,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::filters::error::ErrorKind;
    use crate::data::filters::parser::parse;

    fn tables() -> TableMap {
        TableMap {
            runs: Some("runs".into()),
            experiments: Some("experiments".into()),
            metrics: Some("latest_metrics".into()),
        }
    }

    fn resolve_with<'t>(
        text: &str,
        tables: &'t TableMap,
    ) -> Result<(Resolved, ResolveContext<'t>), SpannedError> {
        let expr = parse(text).unwrap();
        let mut ctx = ResolveContext::new(Backend::Sqlite, tables, 0);
        let resolved = ctx.resolve(&expr)?;
        Ok((resolved, ctx))
    }

    fn predicate(text: &str) -> Condition {
        let tables = tables();
        let (resolved, _) = resolve_with(text, &tables).unwrap();
        match resolved {
            Resolved::Predicate(c) => c,
            other => panic!("expected predicate, got {:?}", other),
        }
    }

    fn error_kind(text: &str) -> ErrorKind {
        let tables = tables();
        let err = resolve_with(text, &tables).err().unwrap();
        err.kind
    }

    fn name() -> ColumnRef {
        ColumnRef::text("runs", "name")
    }

    #[test]
    fn test_run_columns() {
        let tables = tables();
        let (resolved, _) = resolve_with("run.created_at", &tables).unwrap();
        assert_eq!(resolved, Resolved::Column(ColumnRef::new("runs", "start_time")));
        let (resolved, _) = resolve_with("run.hash", &tables).unwrap();
        assert_eq!(resolved, Resolved::Column(ColumnRef::text("runs", "run_uuid")));
        let (resolved, _) = resolve_with("run.experiment", &tables).unwrap();
        assert_eq!(resolved, Resolved::Column(ColumnRef::text("experiments", "name")));
        let (resolved, _) = resolve_with("run.duration", &tables).unwrap();
        assert_eq!(
            resolved,
            Resolved::Column(ColumnRef::raw("(runs.end_time - runs.start_time) / 1000"))
        );
    }

    #[test]
    fn test_archived_and_active() {
        assert_eq!(
            predicate("run.archived"),
            Condition::eq(ColumnRef::new("runs", "lifecycle_stage"), "deleted")
        );
        assert_eq!(
            predicate("not run.active"),
            Condition::eq(ColumnRef::new("runs", "status"), "RUNNING").negate()
        );
    }

    #[test]
    fn test_bool_comparison() {
        let archived = Condition::eq(ColumnRef::new("runs", "lifecycle_stage"), "deleted");
        assert_eq!(predicate("run.archived == True"), archived);
        assert_eq!(predicate("run.archived is False"), archived.clone().negate());
        assert_eq!(predicate("run.archived != False"), archived);
        assert_eq!(error_kind("run.archived < True"), ErrorKind::Operator);
    }

    #[test]
    fn test_tag_join_dedup() {
        let tables = tables();
        let (resolved, ctx) =
            resolve_with("run.tags['a'] == '1' and run.tags.a != '2'", &tables).unwrap();
        assert_eq!(ctx.joins().len(), 1);
        let join = ctx.joins().get("tag:a").unwrap();
        assert_eq!(join.alias, "tags_0");
        let column = ColumnRef::text("tags_0", "value");
        assert_eq!(
            resolved,
            Resolved::Predicate(Condition::and(vec![
                Condition::eq(column.clone(), "1"),
                Condition::eq(column, "2").negate(),
            ]))
        );
    }

    #[test]
    fn test_param_lookup() {
        let tables = tables();
        let (resolved, ctx) = resolve_with("run.learning_rate > 0.1", &tables).unwrap();
        let join = ctx.joins().get("param:learning_rate").unwrap();
        assert_eq!(
            join.template,
            "LEFT JOIN params params_0 ON runs.run_uuid = params_0.run_uuid AND params_0.key = ?"
        );
        assert_eq!(join.args, vec![SqlValue::from("learning_rate")]);
        assert!(matches!(resolved, Resolved::Predicate(Condition::Compare { op: CompareOp::Gt, .. })));
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(
            predicate("run.name.startswith('foo')"),
            Condition::Like { column: name(), pattern: "foo%".into(), negated: false }
        );
        assert_eq!(
            predicate("run.name.endswith('foo')"),
            Condition::Like { column: name(), pattern: "%foo".into(), negated: false }
        );
        assert_eq!(
            predicate("run.name.contains('foo')"),
            Condition::Like { column: name(), pattern: "%foo%".into(), negated: false }
        );
        assert_eq!(
            predicate("'foo' not in run.name"),
            Condition::Like { column: name(), pattern: "%foo%".into(), negated: true }
        );
    }

    #[test]
    fn test_string_methods_need_a_column() {
        assert_eq!(error_kind("run.startswith == 'x'"), ErrorKind::Semantic);
        assert_eq!(error_kind("run.endswith('x')"), ErrorKind::Semantic);
        assert_eq!(error_kind("run.tags.startswith == 'x'"), ErrorKind::Semantic);
        assert_eq!(error_kind("run.metrics['loss'].endswith('x')"), ErrorKind::Semantic);

        let tables = tables();
        let err = resolve_with("run.startswith('x')", &tables).err().unwrap();
        assert!(err.message.contains("needs a column"));
    }

    #[test]
    fn test_regex() {
        assert_eq!(
            predicate("re.match('foo', run.name)"),
            Condition::Regexp { column: name(), pattern: "^foo".into(), negated: false }
        );
        assert_eq!(
            predicate("run.name.search('foo')"),
            Condition::Regexp { column: name(), pattern: "foo".into(), negated: false }
        );
        assert_eq!(error_kind("re.match('foo')"), ErrorKind::Semantic);
        assert_eq!(error_kind("re.startswith('foo')"), ErrorKind::Semantic);
        assert_eq!(error_kind("re.fullmatch('foo', run.name)"), ErrorKind::Semantic);
    }

    #[test]
    fn test_reversed_literal_comparison() {
        let metric = ColumnRef::new("metrics_0", "value");
        assert_eq!(
            predicate("0.5 < run.metrics['loss'].last"),
            Condition::Compare {
                column: metric,
                op: CompareOp::Gt,
                operand: Operand::Value(SqlValue::Float(0.5)),
            }
        );
    }

    #[test]
    fn test_chained_comparison() {
        let tables = tables();
        let (resolved, ctx) = resolve_with("1 < run.metrics['loss'].last_step <= 10", &tables).unwrap();
        assert_eq!(ctx.joins().len(), 1);
        let column = ColumnRef::new("metrics_0", "last_iter");
        assert_eq!(
            resolved,
            Resolved::Predicate(Condition::and(vec![
                Condition::Compare {
                    column: column.clone(),
                    op: CompareOp::Gt,
                    operand: Operand::Value(SqlValue::Int(1)),
                },
                Condition::Compare {
                    column,
                    op: CompareOp::LtE,
                    operand: Operand::Value(SqlValue::Int(10)),
                },
            ]))
        );
    }

    #[test]
    fn test_in_list() {
        assert_eq!(
            predicate("run.name in ['a', 'b']"),
            Condition::In { column: name(), values: vec!["a".into(), "b".into()], negated: false }
        );
        assert_eq!(error_kind("run.name in 'abc'"), ErrorKind::Operator);
    }

    #[test]
    fn test_numbers_against_text_columns_bind_as_text() {
        let tag = ColumnRef::text("tags_0", "value");
        assert_eq!(predicate("run.tags.x == 1"), Condition::eq(tag.clone(), "1"));
        assert_eq!(predicate("run.tags.x != 2.0"), Condition::eq(tag.clone(), "2.0").negate());
        assert_eq!(
            predicate("run.tags.x in [1, 0.5, True]"),
            Condition::In { column: tag, values: vec!["1".into(), "0.5".into(), "1".into()], negated: false }
        );
        assert_eq!(
            predicate("run.lr < 1"),
            Condition::Compare {
                column: ColumnRef::text("params_0", "value"),
                op: CompareOp::Lt,
                operand: Operand::Value(SqlValue::from("1")),
            }
        );
        // numeric columns keep numeric binds
        assert_eq!(
            predicate("run.created_at > 5"),
            Condition::Compare {
                column: ColumnRef::new("runs", "start_time"),
                op: CompareOp::Gt,
                operand: Operand::Value(SqlValue::Int(5)),
            }
        );
    }

    #[test]
    fn test_none_comparisons() {
        assert_eq!(predicate("run.tags.x is None"), Condition::eq(ColumnRef::text("tags_0", "value"), SqlValue::Null));
        assert_eq!(error_kind("run.name < None"), ErrorKind::Operator);
    }

    #[test]
    fn test_metric_context_side_effect() {
        let tables = tables();
        let (resolved, ctx) =
            resolve_with("run.metrics['loss', {'$.subset': 'train'}].last < 1", &tables).unwrap();
        let joins = ctx.joins().snapshot();
        assert_eq!(joins.len(), 2);
        assert_eq!(
            joins[0].template,
            "LEFT JOIN latest_metrics metrics_0 ON runs.run_uuid = metrics_0.run_uuid AND metrics_0.key = ?"
        );
        assert_eq!(
            joins[1].template,
            "LEFT JOIN contexts contexts_1 ON metrics_0.context_id = contexts_1.id"
        );
        assert_eq!(
            ctx.conditions(),
            &[Condition::JsonEq {
                target: JsonRef {
                    column: ColumnRef::new("contexts_1", "json"),
                    path: vec!["subset".into()],
                },
                value: Value::from("train"),
                negated: false,
            }]
        );
        assert_eq!(
            resolved,
            Resolved::Predicate(Condition::Compare {
                column: ColumnRef::new("metrics_0", "value"),
                op: CompareOp::Lt,
                operand: Operand::Value(SqlValue::Int(1)),
            })
        );
    }

    #[test]
    fn test_metric_context_conditions_appended_once() {
        let tables = tables();
        let (_, ctx) = resolve_with(
            "run.metrics['loss', {}].last < 1 and run.metrics['loss', {}].last_step > 2",
            &tables,
        )
        .unwrap();
        assert_eq!(ctx.joins().len(), 2);
        assert_eq!(
            ctx.conditions(),
            &[Condition::JsonEq {
                target: JsonRef::new(ColumnRef::new("contexts_1", "json")),
                value: serde_json::json!({}),
                negated: false,
            }]
        );
    }

    #[test]
    fn test_metric_root() {
        let tables = tables();
        let (resolved, _) = resolve_with("metric.name == 'loss'", &tables).unwrap();
        assert_eq!(
            resolved,
            Resolved::Predicate(Condition::eq(ColumnRef::text("latest_metrics", "key"), "loss"))
        );

        let (resolved, ctx) = resolve_with("metric.context.subset == 'val'", &tables).unwrap();
        assert_eq!(
            ctx.joins().get("context:metric").unwrap().template,
            "LEFT JOIN contexts contexts_0 ON latest_metrics.context_id = contexts_0.id"
        );
        assert_eq!(
            resolved,
            Resolved::Predicate(Condition::JsonEq {
                target: JsonRef {
                    column: ColumnRef::new("contexts_0", "json"),
                    path: vec!["subset".into()],
                },
                value: Value::from("val"),
                negated: false,
            })
        );
    }

    #[test]
    fn test_json_dict_comparison() {
        let target = JsonRef::new(ColumnRef::new("contexts_0", "json"));
        assert_eq!(
            predicate("metric.context != {'a': 'x', 'b': 'y'}"),
            Condition::and(vec![
                Condition::JsonEq { target: target.child("a"), value: Value::from("x"), negated: false },
                Condition::JsonEq { target: target.child("b"), value: Value::from("y"), negated: false },
            ])
            .negate()
        );
        assert_eq!(
            predicate("metric.context['subset'].startswith('tr')"),
            Condition::JsonLike { target: target.child("subset"), pattern: "tr%".into(), negated: false }
        );
    }

    #[test]
    fn test_metric_requires_table() {
        let tables = TableMap {
            metrics: None,
            ..tables()
        };
        let err = resolve_with("metric.last > 1", &tables).err().unwrap();
        assert_eq!(err.kind, ErrorKind::Semantic);
        assert_eq!(err.span, Span::new(0, 6));
    }

    #[test]
    fn test_datetime() {
        let tables = tables();
        let (resolved, _) = resolve_with("datetime(2022, 2, 2)", &tables).unwrap();
        assert_eq!(resolved, Resolved::Literal(Literal::Int(1_643_760_000_000)));

        let expr = parse("datetime(2022, 2, 2, 0, 0, 0)").unwrap();
        let mut ctx = ResolveContext::new(Backend::Postgres, &tables, 60);
        assert_eq!(
            ctx.resolve(&expr).unwrap(),
            Resolved::Literal(Literal::Int(1_643_760_000_000 + 3_600_000))
        );
        assert_eq!(ctx.dialect(), Backend::Postgres);

        assert_eq!(error_kind("datetime(2022, 13, 1)"), ErrorKind::Semantic);
        assert_eq!(error_kind("datetime(2022)"), ErrorKind::Semantic);
        assert_eq!(error_kind("datetime('2022', 1, 1)"), ErrorKind::Semantic);
    }

    #[test]
    fn test_unary() {
        let tables = tables();
        let (resolved, _) = resolve_with("-1.5", &tables).unwrap();
        assert_eq!(resolved, Resolved::Literal(Literal::Float(-1.5)));
        assert_eq!(error_kind("-run.name"), ErrorKind::Operator);
        assert_eq!(error_kind("not run.name"), ErrorKind::Operator);
    }

    #[test]
    fn test_unknown_names() {
        assert_eq!(error_kind("foo.bar == 1"), ErrorKind::Semantic);
        assert_eq!(error_kind("run.metrics['loss'].mean > 1"), ErrorKind::Semantic);
        assert_eq!(error_kind("run.metrics[1].last > 1"), ErrorKind::Semantic);
        assert_eq!(error_kind("run.name[0] == 'a'"), ErrorKind::Semantic);
    }

    #[test]
    fn test_bool_op_requires_predicates() {
        assert_eq!(error_kind("run.name and run.archived"), ErrorKind::Operator);
        assert_eq!(error_kind("run.name == run.hash < 1 < 'x'"), ErrorKind::Operator);
    }
}
