//! Recursive descent parser for filter expressions
//!
//! Grammar (lowest precedence first):
//!
//! ```text
//! expr       := and_expr ("or" and_expr)*
//! and_expr   := not_expr ("and" not_expr)*
//! not_expr   := "not" not_expr | comparison
//! comparison := unary (cmp_op unary)*
//! cmp_op     := "==" | "!=" | "<" | "<=" | ">" | ">=" | "in" | "not" "in" | "is" | "is" "not"
//! unary      := "-" unary | postfix
//! postfix    := atom ("." NAME | "[" subscript "]" | "(" args ")")*
//! atom       := NAME | NUMBER | STRING+ | "True" | "False" | "None"
//!             | "(" [expr ("," expr)* [","]] ")" | "[" items "]" | "{" dict "}"
//! ```

use super::ast::{BoolOp, CmpOp, Expr, ExprKind, Span, UnaryOp};
use super::error::{FilterError, SourceMap, SpannedError};
use super::lexer::{Lexer, SpannedToken, Token};

/// Deepest accepted nesting of groups, containers, calls, `not` and `-`
const MAX_NESTING: usize = 100;

/// Parse a filter expression
pub fn parse(text: &str) -> Result<Expr, FilterError> {
    parse_spanned(text).map_err(|e| SourceMap::identity(text).to_filter_error(e))
}

/// Parse a filter expression, reporting errors against `text` positions
pub(crate) fn parse_spanned(text: &str) -> Result<Expr, SpannedError> {
    let tokens = Lexer::new(text).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_expr()?;
    let trailing = parser.current();
    if trailing.token != Token::Eof {
        return Err(SpannedError::syntax(
            format!("invalid syntax: unexpected {}", trailing.token.describe()),
            trailing.span,
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn current(&self) -> &SpannedToken {
        // tokenize always ends with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_token(&self) -> &Token {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].token
    }

    fn check(&self, token: &Token) -> bool {
        &self.current().token == token
    }

    fn advance(&mut self) -> SpannedToken {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> Option<Span> {
        if self.check(token) {
            Some(self.advance().span)
        } else {
            None
        }
    }

    fn expect(&mut self, token: &Token) -> Result<Span, SpannedError> {
        if let Some(span) = self.eat(token) {
            return Ok(span);
        }
        let found = self.current();
        let message = if found.token == Token::Eof {
            format!("invalid syntax: expected {}, found end of input", token.describe())
        } else {
            format!(
                "invalid syntax: expected {}, found {}",
                token.describe(),
                found.token.describe()
            )
        };
        Err(SpannedError::syntax(message, found.span))
    }

    /// Run `f` one nesting level deeper, failing past `MAX_NESTING`
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, SpannedError>,
    ) -> Result<T, SpannedError> {
        if self.depth >= MAX_NESTING {
            return Err(SpannedError::syntax(
                "invalid syntax: expression is nested too deeply",
                self.current().span,
            ));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn parse_expr(&mut self) -> Result<Expr, SpannedError> {
        self.nested(|p| p.parse_bool_op(BoolOp::Or))
    }

    fn parse_bool_op(&mut self, op: BoolOp) -> Result<Expr, SpannedError> {
        let (keyword, next) = match op {
            BoolOp::Or => (Token::Or, BoolOp::And),
            BoolOp::And => (Token::And, BoolOp::And),
        };
        let parse_operand = |p: &mut Self| match op {
            BoolOp::Or => p.parse_bool_op(next),
            BoolOp::And => p.parse_not(),
        };

        let first = parse_operand(self)?;
        if !self.check(&keyword) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat(&keyword).is_some() {
            values.push(parse_operand(self)?);
        }
        let span = values[0].span.to(values[values.len() - 1].span);
        Ok(Expr::new(ExprKind::BoolOp { op, values }, span))
    }

    fn parse_not(&mut self) -> Result<Expr, SpannedError> {
        if let Some(start) = self.eat(&Token::Not) {
            let operand = self.nested(Self::parse_not)?;
            let span = start.to(operand.span);
            return Ok(Expr::new(
                ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        self.parse_comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let op = match self.current().token {
            Token::EqEq => CmpOp::Eq,
            Token::NotEq => CmpOp::NotEq,
            Token::Lt => CmpOp::Lt,
            Token::LtE => CmpOp::LtE,
            Token::Gt => CmpOp::Gt,
            Token::GtE => CmpOp::GtE,
            Token::In => CmpOp::In,
            Token::Not if self.peek_token() == &Token::In => {
                self.advance();
                CmpOp::NotIn
            }
            Token::Is if self.peek_token() == &Token::Not => {
                self.advance();
                CmpOp::IsNot
            }
            Token::Is => CmpOp::Is,
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn parse_comparison(&mut self) -> Result<Expr, SpannedError> {
        let left = self.parse_unary()?;
        let mut comparisons = Vec::new();
        while let Some(op) = self.comparison_op() {
            comparisons.push((op, self.parse_unary()?));
        }
        if comparisons.is_empty() {
            return Ok(left);
        }
        let span = left.span.to(comparisons[comparisons.len() - 1].1.span);
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                comparisons,
            },
            span,
        ))
    }

    fn parse_unary(&mut self) -> Result<Expr, SpannedError> {
        if let Some(start) = self.eat(&Token::Minus) {
            let operand = self.nested(Self::parse_unary)?;
            let span = start.to(operand.span);
            return Ok(Expr::new(
                ExprKind::UnaryOp {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, SpannedError> {
        let mut expr = self.parse_atom()?;
        loop {
            if self.eat(&Token::Dot).is_some() {
                let name = self.advance();
                let attr = match name.token {
                    Token::Name(attr) => attr,
                    other => {
                        return Err(SpannedError::syntax(
                            format!(
                                "invalid syntax: expected attribute name, found {}",
                                other.describe()
                            ),
                            name.span,
                        ));
                    }
                };
                let span = expr.span.to(name.span);
                expr = Expr::new(
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                    },
                    span,
                );
            } else if self.eat(&Token::LBracket).is_some() {
                let index = self.parse_subscript()?;
                let end = self.expect(&Token::RBracket)?;
                let span = expr.span.to(end);
                expr = Expr::new(
                    ExprKind::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
            } else if self.eat(&Token::LParen).is_some() {
                let (args, end) = self.parse_sequence(&Token::RParen)?;
                let span = expr.span.to(end);
                expr = Expr::new(
                    ExprKind::Call {
                        func: Box::new(expr),
                        args,
                    },
                    span,
                );
            } else {
                return Ok(expr);
            }
        }
    }

    /// Subscript index: a single expression or a bare tuple
    fn parse_subscript(&mut self) -> Result<Expr, SpannedError> {
        if self.check(&Token::Colon) {
            return Err(SpannedError::syntax(
                "slices are not supported",
                self.current().span,
            ));
        }
        let first = self.parse_expr()?;
        if self.check(&Token::Colon) {
            return Err(SpannedError::syntax(
                "slices are not supported",
                self.current().span,
            ));
        }
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma).is_some() {
            if self.check(&Token::RBracket) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        let span = items[0].span.to(items[items.len() - 1].span);
        Ok(Expr::new(ExprKind::Tuple(items), span))
    }

    /// Comma separated expressions up to `close`, allowing a trailing comma
    fn parse_sequence(&mut self, close: &Token) -> Result<(Vec<Expr>, Span), SpannedError> {
        let mut items = Vec::new();
        loop {
            if let Some(end) = self.eat(close) {
                return Ok((items, end));
            }
            items.push(self.parse_expr()?);
            if self.eat(&Token::Comma).is_none() {
                let end = self.expect(close)?;
                return Ok((items, end));
            }
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, SpannedError> {
        let token = self.advance();
        let span = token.span;
        let kind = match token.token {
            Token::Name(name) => ExprKind::Name(name),
            Token::Int(i) => ExprKind::Int(i),
            Token::Float(f) => ExprKind::Float(f),
            Token::True => ExprKind::Bool(true),
            Token::False => ExprKind::Bool(false),
            Token::None => ExprKind::None,
            Token::Str(s) => {
                // adjacent literals concatenate
                let mut value = s;
                let mut span = span;
                while let Token::Str(next) = &self.current().token {
                    value.push_str(next);
                    span = span.to(self.current().span);
                    self.advance();
                }
                return Ok(Expr::new(ExprKind::Str(value), span));
            }
            Token::LParen => return self.parse_group(span),
            Token::LBracket => {
                let (items, end) = self.parse_sequence(&Token::RBracket)?;
                return Ok(Expr::new(ExprKind::List(items), span.to(end)));
            }
            Token::LBrace => return self.parse_dict(span),
            other => {
                let message = if other == Token::Eof {
                    "invalid syntax: unexpected end of input".to_string()
                } else {
                    format!("invalid syntax: unexpected {}", other.describe())
                };
                return Err(SpannedError::syntax(message, span));
            }
        };
        Ok(Expr::new(kind, span))
    }

    /// `( expr )` or a tuple `( a, b, ... )`, after the opening parenthesis
    fn parse_group(&mut self, start: Span) -> Result<Expr, SpannedError> {
        if let Some(end) = self.eat(&Token::RParen) {
            return Ok(Expr::new(ExprKind::Tuple(Vec::new()), start.to(end)));
        }
        let first = self.parse_expr()?;
        if let Some(end) = self.eat(&Token::RParen) {
            // keep the inner node, widened to cover the parentheses
            return Ok(Expr::new(first.kind, start.to(end)));
        }
        if self.eat(&Token::Comma).is_none() {
            self.expect(&Token::RParen)?;
        }
        let (mut rest, end) = self.parse_sequence(&Token::RParen)?;
        let mut items = vec![first];
        items.append(&mut rest);
        Ok(Expr::new(ExprKind::Tuple(items), start.to(end)))
    }

    /// `{ "k": "v", ... }` after the opening brace; string keys and values only
    fn parse_dict(&mut self, start: Span) -> Result<Expr, SpannedError> {
        let mut pairs = Vec::new();
        loop {
            if let Some(end) = self.eat(&Token::RBrace) {
                return Ok(Expr::new(ExprKind::Dict(pairs), start.to(end)));
            }
            let key = self.parse_dict_string("key")?;
            self.expect(&Token::Colon)?;
            let value = self.parse_dict_string("value")?;
            pairs.push((key, value));
            if self.eat(&Token::Comma).is_none() {
                let end = self.expect(&Token::RBrace)?;
                return Ok(Expr::new(ExprKind::Dict(pairs), start.to(end)));
            }
        }
    }

    fn parse_dict_string(&mut self, what: &str) -> Result<String, SpannedError> {
        let expr = self.parse_unary()?;
        match expr.kind {
            ExprKind::Str(s) => Ok(s),
            _ => Err(SpannedError::syntax(
                format!("dictionary {} must be a string literal", what),
                expr.span,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(text: &str) -> ExprKind {
        parse(text).unwrap().kind
    }

    fn name(n: &str) -> Box<Expr> {
        Box::new(Expr::new(ExprKind::Name(n.into()), Span::default()))
    }

    /// Strip spans so trees can be compared structurally
    fn strip(expr: Expr) -> Expr {
        let kind = match expr.kind {
            ExprKind::BoolOp { op, values } => ExprKind::BoolOp {
                op,
                values: values.into_iter().map(strip).collect(),
            },
            ExprKind::Compare { left, comparisons } => ExprKind::Compare {
                left: Box::new(strip(*left)),
                comparisons: comparisons.into_iter().map(|(o, e)| (o, strip(e))).collect(),
            },
            ExprKind::Call { func, args } => ExprKind::Call {
                func: Box::new(strip(*func)),
                args: args.into_iter().map(strip).collect(),
            },
            ExprKind::Attribute { value, attr } => ExprKind::Attribute {
                value: Box::new(strip(*value)),
                attr,
            },
            ExprKind::Subscript { value, index } => ExprKind::Subscript {
                value: Box::new(strip(*value)),
                index: Box::new(strip(*index)),
            },
            ExprKind::List(items) => ExprKind::List(items.into_iter().map(strip).collect()),
            ExprKind::Tuple(items) => ExprKind::Tuple(items.into_iter().map(strip).collect()),
            ExprKind::UnaryOp { op, operand } => ExprKind::UnaryOp {
                op,
                operand: Box::new(strip(*operand)),
            },
            other => other,
        };
        Expr::new(kind, Span::default())
    }

    fn tree(text: &str) -> Expr {
        strip(parse(text).unwrap())
    }

    fn lit(kind: ExprKind) -> Expr {
        Expr::new(kind, Span::default())
    }

    fn attr(value: Box<Expr>, a: &str) -> Box<Expr> {
        Box::new(lit(ExprKind::Attribute {
            value,
            attr: a.into(),
        }))
    }

    #[test]
    fn test_attribute_comparison() {
        assert_eq!(
            tree("run.name == 'x'").kind,
            ExprKind::Compare {
                left: attr(name("run"), "name"),
                comparisons: vec![(CmpOp::Eq, lit(ExprKind::Str("x".into())))],
            }
        );
    }

    #[test]
    fn test_chained_comparison() {
        let ExprKind::Compare { comparisons, .. } = kind("1 < run.duration <= 10") else {
            panic!("expected comparison");
        };
        let ops: Vec<CmpOp> = comparisons.iter().map(|(op, _)| *op).collect();
        assert_eq!(ops, vec![CmpOp::Lt, CmpOp::LtE]);
    }

    #[test]
    fn test_not_in_and_is_not() {
        let ExprKind::Compare { comparisons, .. } = kind("'a' not in run.name") else {
            panic!("expected comparison");
        };
        assert_eq!(comparisons[0].0, CmpOp::NotIn);
        let ExprKind::Compare { comparisons, .. } = kind("run.tags.x is not None") else {
            panic!("expected comparison");
        };
        assert_eq!(comparisons[0].0, CmpOp::IsNot);
    }

    #[test]
    fn test_precedence() {
        // `not` binds looser than comparisons and tighter than `and`
        let ExprKind::BoolOp { op, values } = kind("a == 1 or not b and c") else {
            panic!("expected boolean op");
        };
        assert_eq!(op, BoolOp::Or);
        assert_eq!(values.len(), 2);
        assert!(matches!(values[0].kind, ExprKind::Compare { .. }));
        let ExprKind::BoolOp { op, values: inner } = &values[1].kind else {
            panic!("expected and");
        };
        assert_eq!(*op, BoolOp::And);
        assert!(matches!(
            inner[0].kind,
            ExprKind::UnaryOp {
                op: UnaryOp::Not,
                ..
            }
        ));
    }

    #[test]
    fn test_and_flattens() {
        let ExprKind::BoolOp { values, .. } = kind("a and b and c") else {
            panic!("expected boolean op");
        };
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn test_tuple_subscript() {
        let expr = tree("run.metrics['loss', {'subset': 'train'}]");
        let ExprKind::Subscript { index, .. } = expr.kind else {
            panic!("expected subscript");
        };
        assert_eq!(
            index.kind,
            ExprKind::Tuple(vec![
                lit(ExprKind::Str("loss".into())),
                lit(ExprKind::Dict(vec![("subset".into(), "train".into())])),
            ])
        );
    }

    #[test]
    fn test_call_and_literals() {
        let expr = tree("datetime(2022, 2, 2, 0, 0, 0)");
        let ExprKind::Call { func, args } = expr.kind else {
            panic!("expected call");
        };
        assert_eq!(func.kind, ExprKind::Name("datetime".into()));
        assert_eq!(args.len(), 6);

        assert_eq!(
            tree("[1, -2.5, True, None]").kind,
            ExprKind::List(vec![
                lit(ExprKind::Int(1)),
                lit(ExprKind::UnaryOp {
                    op: UnaryOp::Neg,
                    operand: Box::new(lit(ExprKind::Float(2.5))),
                }),
                lit(ExprKind::Bool(true)),
                lit(ExprKind::None),
            ])
        );
    }

    #[test]
    fn test_parenthesized_group_and_tuple() {
        assert_eq!(kind("(1)"), ExprKind::Int(1));
        assert!(matches!(kind("(1, 2)"), ExprKind::Tuple(items) if items.len() == 2));
        assert!(matches!(kind("(1,)"), ExprKind::Tuple(items) if items.len() == 1));
    }

    #[test]
    fn test_group_span_covers_parentheses() {
        let expr = parse("(run.name == 'run')").unwrap();
        assert_eq!(expr.span, Span::new(0, 19));
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(kind("'ab' \"cd\""), ExprKind::Str("abcd".into()));
    }

    #[test]
    fn test_unbalanced_parentheses() {
        let err = parse("(run.name == 'x'").unwrap_err();
        assert!(matches!(err, FilterError::Syntax(_)));
        let detail = err.detail().unwrap();
        assert_eq!(detail.offset, 16);
    }

    #[test]
    fn test_trailing_tokens() {
        let err = parse("run.name == 'x')").unwrap_err();
        assert_eq!(err.detail().unwrap().offset, 15);
    }

    #[test]
    fn test_dict_requires_strings() {
        assert!(matches!(
            parse("run.metrics['a', {'k': 1}]"),
            Err(FilterError::Syntax(_))
        ));
    }

    #[test]
    fn test_slice_rejected() {
        assert!(matches!(parse("run.name[1:2]"), Err(FilterError::Syntax(_))));
    }

    #[test]
    fn test_binary_arithmetic_rejected() {
        assert!(matches!(parse("run.duration - 5 > 1"), Err(FilterError::Syntax(_))));
    }

    #[test]
    fn test_deep_nesting_is_syntax_error() {
        let parens = format!("{}run.name == 'a'{}", "(".repeat(10_000), ")".repeat(10_000));
        let err = parse(&parens).unwrap_err();
        assert!(matches!(err, FilterError::Syntax(_)));
        let detail = err.detail().unwrap();
        assert_eq!(detail.offset, MAX_NESTING);
        assert!(detail.error.contains("nested too deeply"));

        let nots = format!("{}run.archived", "not ".repeat(10_000));
        assert!(matches!(parse(&nots), Err(FilterError::Syntax(_))));

        let negs = format!("run.duration > {}1", "-".repeat(10_000));
        assert!(matches!(parse(&negs), Err(FilterError::Syntax(_))));

        let lists = format!("'a' in {}{}", "[".repeat(10_000), "]".repeat(10_000));
        assert!(matches!(parse(&lists), Err(FilterError::Syntax(_))));
    }

    #[test]
    fn test_moderate_nesting_parses() {
        let text = format!("{}run.name == 'a'{}", "(".repeat(50), ")".repeat(50));
        assert!(matches!(kind(&text), ExprKind::Compare { .. }));
        let text = format!("{}run.archived", "not ".repeat(50));
        assert!(matches!(kind(&text), ExprKind::UnaryOp { op: UnaryOp::Not, .. }));
    }
}
