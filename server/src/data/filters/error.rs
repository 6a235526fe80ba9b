//! Filter compilation errors
//!
//! Parsing and resolution report failures as `SpannedError` (a kind, a
//! message and a span into the text that was parsed). The compiler maps
//! the span back onto the caller's own text through a `SourceMap` and
//! returns a `FilterError` carrying a client-facing `Diagnostic`.

use serde::Serialize;
use thiserror::Error;

use super::ast::Span;

/// Location and message of a failed compilation, as reported to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// The filter text the client submitted
    pub statement: String,
    /// 1-based line number
    pub line: usize,
    /// 0-based character column where the failure starts
    pub offset: usize,
    /// 0-based character column where the failure ends
    pub end_offset: usize,
    /// Underlying parser or resolver message
    pub error: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (line {}, offset {}): {}",
            self.error, self.line, self.offset, self.statement
        )
    }
}

/// Filter compilation error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// Grammar violation
    #[error("SyntaxError: {0}")]
    Syntax(Diagnostic),

    /// Unknown identifier, attribute or subscript, wrong arity or argument type
    #[error("SemanticError: {0}")]
    Semantic(Diagnostic),

    /// Operator applied to an operand kind that does not support it
    #[error("OperatorError: {0}")]
    Operator(Diagnostic),

    /// Unsupported dialect identifier (caller error)
    #[error("unsupported dialect: {0}")]
    Dialect(String),
}

impl FilterError {
    /// Short error class name
    pub fn message(&self) -> &'static str {
        match self {
            Self::Syntax(_) => "SyntaxError",
            Self::Semantic(_) => "SemanticError",
            Self::Operator(_) => "OperatorError",
            Self::Dialect(_) => "DialectError",
        }
    }

    /// HTTP status the API boundary should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Syntax(_) | Self::Semantic(_) | Self::Operator(_) => 400,
            Self::Dialect(_) => 500,
        }
    }

    pub fn detail(&self) -> Option<&Diagnostic> {
        match self {
            Self::Syntax(d) | Self::Semantic(d) | Self::Operator(d) => Some(d),
            Self::Dialect(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Semantic,
    Operator,
}

/// An error located in the text handed to the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpannedError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Span,
}

impl SpannedError {
    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        Self {
            kind: ErrorKind::Syntax,
            message: message.into(),
            span,
        }
    }

    pub fn semantic(message: impl Into<String>, span: Span) -> Self {
        Self {
            kind: ErrorKind::Semantic,
            message: message.into(),
            span,
        }
    }

    pub fn operator(message: impl Into<String>, span: Span) -> Self {
        Self {
            kind: ErrorKind::Operator,
            message: message.into(),
            span,
        }
    }
}

/// Maps positions in the rewritten text back onto the caller's text
///
/// When the default scope is injected the parser sees
/// `(<statement>) and (<default>)`; every position is shifted by the
/// opening parenthesis and clamped to the caller's own text.
#[derive(Debug, Clone)]
pub struct SourceMap {
    statement: String,
    prefix: usize,
}

impl SourceMap {
    /// The statement was parsed as-is
    pub fn identity(statement: &str) -> Self {
        Self {
            statement: statement.to_string(),
            prefix: 0,
        }
    }

    /// The statement was wrapped by `prefix` before parsing
    pub fn wrapped(statement: &str, prefix: &str) -> Self {
        Self {
            statement: statement.to_string(),
            prefix: prefix.chars().count(),
        }
    }

    /// Character offset in the statement for a rewritten offset
    fn map(&self, offset: usize) -> usize {
        let len = self.statement.chars().count();
        offset.saturating_sub(self.prefix).min(len)
    }

    /// Line (1-based) and column (0-based) of a statement offset
    fn line_col(&self, offset: usize) -> (usize, usize) {
        let mut line = 1;
        let mut col = 0;
        for ch in self.statement.chars().take(offset) {
            if ch == '\n' {
                line += 1;
                col = 0;
            } else {
                col += 1;
            }
        }
        (line, col)
    }

    /// Convert a located error into its client-facing form
    pub fn to_filter_error(&self, err: SpannedError) -> FilterError {
        let start = self.map(err.span.start);
        let end = self.map(err.span.end).max(start);
        let (line, offset) = self.line_col(start);
        let (_, end_col) = self.line_col(end);
        let end_offset = if end_col < offset { offset } else { end_col };
        let diagnostic = Diagnostic {
            statement: self.statement.clone(),
            line,
            offset,
            end_offset,
            error: err.message,
        };
        match err.kind {
            ErrorKind::Syntax => FilterError::Syntax(diagnostic),
            ErrorKind::Semantic => FilterError::Semantic(diagnostic),
            ErrorKind::Operator => FilterError::Operator(diagnostic),
        }
    }
}
