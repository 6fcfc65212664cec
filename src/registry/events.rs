//! Registry Events
//!
//! Mutation events pushed to live watchers. The wire form is
//! `{"action": "register" | "heartbeat" | "deregister", "service": <Instance>}`.

use crate::domain::Instance;
use serde::{Deserialize, Serialize};

/// Kind of mutation that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    /// An instance was registered or re-registered
    Register,
    /// An instance refreshed its heartbeat
    Heartbeat,
    /// An instance was removed, explicitly or by the liveness sweep
    Deregister,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Register => "register",
            EventAction::Heartbeat => "heartbeat",
            EventAction::Deregister => "deregister",
        }
    }
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event emitted by the registry on every mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEvent {
    pub action: EventAction,
    pub service: Instance,
}

impl RegistryEvent {
    pub fn register(service: Instance) -> Self {
        Self {
            action: EventAction::Register,
            service,
        }
    }

    pub fn heartbeat(service: Instance) -> Self {
        Self {
            action: EventAction::Heartbeat,
            service,
        }
    }

    pub fn deregister(service: Instance) -> Self {
        Self {
            action: EventAction::Deregister,
            service,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Metadata, Mode};
    use chrono::Utc;

    #[test]
    fn test_event_wire_format() {
        let event = RegistryEvent::deregister(Instance {
            service_name: "order-service".into(),
            id: "o1".into(),
            host: "127.0.0.1".into(),
            port: 8080,
            mode: Mode::Dev,
            metadata: Metadata {
                environment: Mode::Dev,
                region: "us-east".into(),
                version: 1,
                developer: None,
                experimental: None,
            },
            health: "UP".into(),
            last_heartbeat: Utc::now(),
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["action"], "deregister");
        assert_eq!(value["service"]["serviceName"], "order-service");
        assert_eq!(value["service"]["port"], 8080);

        let back: RegistryEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back.action, EventAction::Deregister);
    }
}
