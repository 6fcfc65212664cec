//! Query/Filter Engine
//!
//! Turns a loosely-typed lookup filter into a store [`Predicate`].
//! `service` and `mode` are reserved parameters; every other parameter is an
//! equality filter on `metadata.<key>`.

use crate::domain::{Clause, FilterValue, Mode, Predicate};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// Query parameter carrying the service name
pub const SERVICE_PARAM: &str = "service";
/// Query parameter carrying the mode
pub const MODE_PARAM: &str = "mode";

/// A lookup filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupFilter {
    pub service: Option<String>,
    pub mode: Option<String>,
    pub metadata: BTreeMap<String, FilterValue>,
    pub alive_only: bool,
}

impl LookupFilter {
    /// Filter on a service name
    pub fn service(name: impl Into<String>) -> Self {
        Self {
            service: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode.as_str().to_string());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), FilterValue::coerce(value));
        self
    }

    pub fn alive_only(mut self, alive_only: bool) -> Self {
        self.alive_only = alive_only;
        self
    }

    /// Build a filter from raw query parameters
    ///
    /// Empty `service`/`mode` values mean "no filter". When a parameter
    /// repeats, its first occurrence wins. A mode outside dev/staging/prod
    /// is kept as given and simply matches nothing.
    pub fn from_params<I, K, V>(params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut filter = Self::default();
        let mut seen_service = false;
        let mut seen_mode = false;

        for (key, value) in params {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                SERVICE_PARAM => {
                    if !seen_service && !value.is_empty() {
                        filter.service = Some(value.to_string());
                    }
                    seen_service = true;
                }
                MODE_PARAM => {
                    if !seen_mode && !value.is_empty() {
                        filter.mode = Some(value.to_string());
                    }
                    seen_mode = true;
                }
                _ => {
                    filter
                        .metadata
                        .entry(key.to_string())
                        .or_insert_with(|| FilterValue::coerce(value));
                }
            }
        }

        filter
    }

    /// Build the store predicate for this filter as of `now`
    pub fn to_predicate(&self, now: DateTime<Utc>, ttl: Duration) -> Predicate {
        let mut predicate = Predicate::all();

        if let Some(service) = &self.service {
            predicate = predicate.and(Clause::ServiceName(service.clone()));
        }
        if let Some(mode) = &self.mode {
            predicate = predicate.and(Clause::Mode(mode.clone()));
        }
        for (key, value) in &self.metadata {
            predicate = predicate.and(Clause::Metadata {
                key: key.clone(),
                value: value.clone(),
            });
        }
        if self.alive_only {
            predicate = predicate.and(Clause::HeartbeatAtOrAfter(now - ttl));
        }

        predicate
    }
}
