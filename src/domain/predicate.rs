//! Store Predicates
//!
//! A conjunction of equality clauses over instance fields plus heartbeat
//! range clauses. Every store backend evaluates the same predicate type.

use crate::domain::instance::{FieldValue, Instance, InstanceKey};
use chrono::{DateTime, Utc};

// =============================================================================
// Filter Value
// =============================================================================

/// A metadata filter value, coerced from its textual form
///
/// Coercion tries an integer parse first, then the boolean literals
/// `true`/`false`, and otherwise keeps the text. The original text is kept
/// so that string-typed fields can still be compared against inputs such as
/// `"42"` or `"true"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterValue {
    raw: String,
    typed: TypedValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypedValue {
    Integer(i64),
    Boolean(bool),
    Text,
}

impl FilterValue {
    pub fn coerce(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let typed = if let Ok(n) = raw.parse::<i64>() {
            TypedValue::Integer(n)
        } else {
            match raw.as_str() {
                "true" => TypedValue::Boolean(true),
                "false" => TypedValue::Boolean(false),
                _ => TypedValue::Text,
            }
        };
        Self { raw, typed }
    }

    pub fn as_text(&self) -> &str {
        &self.raw
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self.typed {
            TypedValue::Integer(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.typed {
            TypedValue::Boolean(b) => Some(b),
            _ => None,
        }
    }

    /// Compare against a field, directed by the field's type
    pub fn matches(&self, field: FieldValue<'_>) -> bool {
        match field {
            FieldValue::Text(text) => text == self.raw,
            FieldValue::Integer(n) => self.as_integer() == Some(n),
            FieldValue::Boolean(b) => self.as_bool() == Some(b),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(raw: &str) -> Self {
        Self::coerce(raw)
    }
}

// =============================================================================
// Clauses
// =============================================================================

/// A single condition on an instance record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    ServiceName(String),
    Id(String),
    /// Mode compared by its wire name, so unknown names match nothing
    Mode(String),
    Metadata { key: String, value: FilterValue },
    /// `lastHeartbeat >= cutoff`
    HeartbeatAtOrAfter(DateTime<Utc>),
    /// `lastHeartbeat < cutoff`
    HeartbeatBefore(DateTime<Utc>),
}

impl Clause {
    pub fn matches(&self, instance: &Instance) -> bool {
        match self {
            Clause::ServiceName(name) => instance.service_name == *name,
            Clause::Id(id) => instance.id == *id,
            Clause::Mode(mode) => instance.mode.as_str() == mode.as_str(),
            Clause::Metadata { key, value } => instance
                .metadata
                .field(key)
                .map_or(false, |field| value.matches(field)),
            Clause::HeartbeatAtOrAfter(cutoff) => instance.last_heartbeat >= *cutoff,
            Clause::HeartbeatBefore(cutoff) => instance.last_heartbeat < *cutoff,
        }
    }
}

// =============================================================================
// Predicate
// =============================================================================

/// Conjunction of clauses; the empty predicate matches every record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

impl Predicate {
    /// Predicate matching every record
    pub fn all() -> Self {
        Self::default()
    }

    /// Predicate matching exactly one key
    pub fn key(key: &InstanceKey) -> Self {
        Self::all()
            .and(Clause::ServiceName(key.service_name.clone()))
            .and(Clause::Id(key.id.clone()))
    }

    /// Predicate matching records whose heartbeat is older than `cutoff`
    pub fn stale_before(cutoff: DateTime<Utc>) -> Self {
        Self::all().and(Clause::HeartbeatBefore(cutoff))
    }

    pub fn and(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn matches(&self, instance: &Instance) -> bool {
        self.clauses.iter().all(|clause| clause.matches(instance))
    }
}
