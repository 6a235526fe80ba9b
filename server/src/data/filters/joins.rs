//! Join registry
//!
//! Joins are deduplicated by a stable key and keep first-use order. The
//! alias is `<kind>_<n>` where `n` is the number of joins registered
//! before it, so equal input always produces equal SQL.

use tracing::trace;

use crate::data::query::SqlValue;

/// A registered join clause
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub key: String,
    pub alias: String,
    /// Join clause with `?` markers for `args`
    pub template: String,
    pub args: Vec<SqlValue>,
}

/// Result of a registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registered {
    pub alias: String,
    /// False when the key was already known
    pub is_new: bool,
}

/// Append-only, insertion-ordered set of joins
#[derive(Debug, Clone, Default)]
pub struct JoinRegistry {
    joins: Vec<Join>,
}

impl JoinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a join under `key`, building its clause from the new alias
    ///
    /// An already registered key returns the existing alias and leaves the
    /// registry untouched.
    pub fn register<F>(&mut self, key: &str, kind: &str, template: F, args: Vec<SqlValue>) -> Registered
    where
        F: FnOnce(&str) -> String,
    {
        if let Some(existing) = self.get(key) {
            return Registered {
                alias: existing.alias.clone(),
                is_new: false,
            };
        }
        let alias = format!("{}_{}", kind, self.joins.len());
        trace!(key, alias = %alias, "Registered join");
        self.joins.push(Join {
            key: key.to_string(),
            alias: alias.clone(),
            template: template(&alias),
            args,
        });
        Registered {
            alias,
            is_new: true,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Join> {
        self.joins.iter().find(|j| j.key == key)
    }

    /// Joins in registration order
    pub fn snapshot(&self) -> &[Join] {
        &self.joins
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn into_joins(self) -> Vec<Join> {
        self.joins
    }
}
