//! Filter expression compiler
//!
//! Compiles a client-supplied boolean filter string into SQL joins and
//! conditions that decorate a base `SelectQuery`.
//!
//! ## Usage
//!
//! ```no_run
//! use tracker_server::data::filters::QueryParser;
//! use tracker_server::data::query::SelectQuery;
//! use tracker_server::data::sql::Backend;
//!
//! let parsed = QueryParser::new(Backend::Sqlite)
//!     .parse("run.metrics['loss'].last < 0.5")
//!     .unwrap();
//! let mut query = SelectQuery::new("runs");
//! parsed.apply(&mut query);
//! let (sql, params) = query.to_sql(Backend::Sqlite.dialect());
//! ```

pub mod ast;
pub mod compiler;
pub mod condition;
pub mod error;
pub mod joins;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod types;

pub use compiler::{DefaultExpression, ParsedQuery, QueryParser, TableMap, compile};
pub use condition::{CompareOp, Condition, write_conjunction};
pub use error::{Diagnostic, FilterError};
pub use joins::{Join, JoinRegistry};
pub use parser::parse;
