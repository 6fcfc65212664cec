//! Instance Records
//!
//! The unit of registration: a service endpoint keyed by
//! `(serviceName, id)` together with its filterable metadata.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Health status written on every register and heartbeat
pub const HEALTH_UP: &str = "UP";

// =============================================================================
// Mode
// =============================================================================

/// Deployment mode of an instance (also used for `metadata.environment`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Dev,
    Staging,
    Prod,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Dev => "dev",
            Mode::Staging => "staging",
            Mode::Prod => "prod",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dev" => Ok(Mode::Dev),
            "staging" => Ok(Mode::Staging),
            "prod" => Ok(Mode::Prod),
            other => Err(Error::Validation(format!(
                "invalid mode '{}': must be one of dev, staging, prod",
                other
            ))),
        }
    }
}

// =============================================================================
// Instance Key
// =============================================================================

/// Composite identity of an instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    pub service_name: String,
    pub id: String,
}

impl InstanceKey {
    pub fn new(service_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            id: id.into(),
        }
    }

    /// Get the shard index for this key
    #[inline]
    pub fn shard_index(&self, shard_count: usize) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.hash(&mut hasher);
        (hasher.finish() as usize) % shard_count
    }

    /// Reject keys with blank parts
    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(Error::Validation("serviceName is required".into()));
        }
        if self.id.trim().is_empty() {
            return Err(Error::Validation("id is required".into()));
        }
        Ok(())
    }
}

impl std::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.service_name, self.id)
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Descriptive, filterable attributes attached to an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub environment: Mode,
    pub region: String,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub developer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<bool>,
}

/// Typed view of a single metadata field, used by the filter engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Integer(i64),
    Boolean(bool),
}

impl Metadata {
    /// Look up a metadata field by its wire name
    ///
    /// Returns `None` for unknown keys and for optional fields that are unset.
    pub fn field(&self, key: &str) -> Option<FieldValue<'_>> {
        match key {
            "environment" => Some(FieldValue::Text(self.environment.as_str())),
            "region" => Some(FieldValue::Text(&self.region)),
            "version" => Some(FieldValue::Integer(i64::from(self.version))),
            "developer" => self.developer.as_deref().map(FieldValue::Text),
            "experimental" => self.experimental.map(FieldValue::Boolean),
            _ => None,
        }
    }
}

// =============================================================================
// Instance
// =============================================================================

/// A registered service endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub service_name: String,
    pub id: String,
    pub host: String,
    pub port: u16,
    pub mode: Mode,
    pub metadata: Metadata,
    #[serde(default)]
    pub health: String,
    #[serde(default)]
    pub last_heartbeat: DateTime<Utc>,
}

impl Instance {
    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.service_name.clone(), self.id.clone())
    }

    pub fn matches_key(&self, key: &InstanceKey) -> bool {
        self.service_name == key.service_name && self.id == key.id
    }

    /// Mark the instance alive as of `now`
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat = now;
        self.health = HEALTH_UP.to_string();
    }

    /// Check the value-level invariants that the type system does not cover
    pub fn validate(&self) -> Result<()> {
        InstanceKey::new(self.service_name.as_str(), self.id.as_str()).validate()?;
        if self.host.trim().is_empty() {
            return Err(Error::Validation("host is required".into()));
        }
        if self.port == 0 {
            return Err(Error::Validation("port must be between 1 and 65535".into()));
        }
        if self.metadata.region.trim().is_empty() {
            return Err(Error::Validation("metadata.region is required".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Registration Request
// =============================================================================

/// Loosely-typed registration payload as received on the wire
///
/// Every field is optional so that a missing field is reported as a
/// validation error naming the field instead of a generic decode failure.
/// Caller-supplied `health` and `lastHeartbeat` are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub service_name: Option<String>,
    pub id: Option<String>,
    pub host: Option<String>,
    pub port: Option<i64>,
    pub mode: Option<String>,
    pub metadata: Option<MetadataRequest>,
}

/// Loosely-typed metadata payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataRequest {
    pub environment: Option<String>,
    pub region: Option<String>,
    pub version: Option<i64>,
    pub developer: Option<String>,
    pub experimental: Option<bool>,
}

fn required<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| Error::Validation(format!("{} is required", field)))
}

impl MetadataRequest {
    fn into_metadata(self) -> Result<Metadata> {
        let environment: Mode = required(self.environment, "metadata.environment")?
            .parse()
            .map_err(|_| {
                Error::Validation(
                    "metadata.environment must be one of dev, staging, prod".into(),
                )
            })?;
        let version = required(self.version, "metadata.version")?;
        let version = u32::try_from(version).map_err(|_| {
            Error::Validation(format!("metadata.version must be between 0 and {}", u32::MAX))
        })?;

        Ok(Metadata {
            environment,
            region: required(self.region, "metadata.region")?,
            version,
            developer: self.developer,
            experimental: self.experimental,
        })
    }
}

impl RegisterRequest {
    /// Validate the payload and convert it into an instance record
    ///
    /// The returned record carries no health or heartbeat yet; the store
    /// assigns both on upsert.
    pub fn into_instance(self) -> Result<Instance> {
        let port = required(self.port, "port")?;
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| Error::Validation("port must be between 1 and 65535".into()))?;

        let instance = Instance {
            service_name: required(self.service_name, "serviceName")?,
            id: required(self.id, "id")?,
            host: required(self.host, "host")?,
            port,
            mode: required(self.mode, "mode")?.parse()?,
            metadata: required(self.metadata, "metadata")?.into_metadata()?,
            health: String::new(),
            last_heartbeat: DateTime::<Utc>::default(),
        };
        instance.validate()?;
        Ok(instance)
    }
}

impl From<&Instance> for RegisterRequest {
    fn from(instance: &Instance) -> Self {
        Self {
            service_name: Some(instance.service_name.clone()),
            id: Some(instance.id.clone()),
            host: Some(instance.host.clone()),
            port: Some(i64::from(instance.port)),
            mode: Some(instance.mode.to_string()),
            metadata: Some(MetadataRequest {
                environment: Some(instance.metadata.environment.to_string()),
                region: Some(instance.metadata.region.clone()),
                version: Some(i64::from(instance.metadata.version)),
                developer: instance.metadata.developer.clone(),
                experimental: instance.metadata.experimental,
            }),
        }
    }
}
