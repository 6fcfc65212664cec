//! Registry Client
//!
//! HTTP client for services that register themselves with a registry
//! server, keep their registration alive and look up their peers.

use crate::api::{ApiErrorResponse, InstanceKeyRequest};
use crate::domain::{Instance, Mode, RegisterRequest};
use crate::error::{Error, Result};
use crate::registry::{MODE_PARAM, SERVICE_PARAM};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Registry server URL, e.g. `http://registry:4000`
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Consecutive heartbeat failures before the heartbeat task gives up
    pub max_heartbeat_failures: u32,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(5),
            max_heartbeat_failures: 3,
        }
    }
}

/// Lookup parameters sent to the server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupQuery {
    pub service: Option<String>,
    pub mode: Option<Mode>,
    pub metadata: BTreeMap<String, String>,
}

impl LookupQuery {
    pub fn service(name: impl Into<String>) -> Self {
        Self {
            service: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Add a metadata equality filter; integers and booleans go as text
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }

    fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::with_capacity(self.metadata.len() + 2);
        if let Some(service) = &self.service {
            params.push((SERVICE_PARAM.to_string(), service.clone()));
        }
        if let Some(mode) = self.mode {
            params.push((MODE_PARAM.to_string(), mode.as_str().to_string()));
        }
        params.extend(self.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        params
    }
}

// =============================================================================
// Client
// =============================================================================

/// Registry API client
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
    config: ClientConfig,
}

impl RegistryClient {
    /// Create a new client
    pub fn new(config: ClientConfig) -> Result<Self> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Configuration("base URL is required".into()));
        }

        let http = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            http,
            base_url,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Register an instance; it is validated locally before anything is sent
    pub async fn register(&self, instance: &Instance) -> Result<Instance> {
        instance.validate()?;
        self.post("/register", &RegisterRequest::from(instance)).await
    }

    /// Send one heartbeat
    pub async fn heartbeat(&self, service_name: &str, id: &str) -> Result<()> {
        self.post_key("/heartbeat", service_name, id).await
    }

    /// Remove an instance from the registry
    pub async fn deregister(&self, service_name: &str, id: &str) -> Result<()> {
        self.post_key("/deregister", service_name, id).await
    }

    /// Alive instances matching the query
    pub async fn lookup(&self, query: &LookupQuery) -> Result<Vec<Instance>> {
        let url = format!("{}/lookup", self.base_url);
        let response = self.http.get(&url).query(&query.to_params()).send().await?;
        Self::handle_response(response).await
    }

    /// Send heartbeats every `interval` on a background task
    ///
    /// The task stops on [`HeartbeatHandle::stop`], when the handle is
    /// dropped, or after `max_heartbeat_failures` consecutive failures.
    pub fn start_heartbeat(
        &self,
        service_name: impl Into<String>,
        id: impl Into<String>,
        interval: Duration,
    ) -> HeartbeatHandle {
        let state = Arc::new(HeartbeatState {
            running: AtomicBool::new(true),
            failures: AtomicU32::new(0),
        });
        let cancel = CancellationToken::new();

        tokio::spawn(heartbeat_loop(
            self.clone(),
            service_name.into(),
            id.into(),
            interval,
            state.clone(),
            cancel.clone(),
        ));

        HeartbeatHandle { state, cancel }
    }

    /// Register and start heartbeating
    pub async fn auto_register(&self, instance: &Instance, interval: Duration) -> Result<HeartbeatHandle> {
        let registered = self.register(instance).await?;
        info!(
            service = %registered.service_name,
            id = %registered.id,
            "Registered with service registry"
        );
        Ok(self.start_heartbeat(registered.service_name, registered.id, interval))
    }

    async fn post_key(&self, path: &str, service_name: &str, id: &str) -> Result<()> {
        let body = InstanceKeyRequest {
            service_name: service_name.to_string(),
            id: id.to_string(),
        };
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.post(&url).json(&body).send().await?;

        match Self::check(response).await {
            Ok(_) => Ok(()),
            Err(Error::Client { status: 404, .. }) => Err(Error::not_found(service_name, id)),
            Err(e) => Err(e),
        }
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.post(&url).json(body).send().await?;
        Self::handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// Turn non-2xx responses into `Error::Client`
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiErrorResponse>(&body) {
            Ok(api_error) => api_error.message,
            Err(_) => body.chars().take(200).collect(),
        };
        Err(Error::Client {
            status: status.as_u16(),
            message,
        })
    }
}

// =============================================================================
// Heartbeat Task
// =============================================================================

struct HeartbeatState {
    running: AtomicBool,
    failures: AtomicU32,
}

/// Control handle for a background heartbeat task
pub struct HeartbeatHandle {
    state: Arc<HeartbeatState>,
    cancel: CancellationToken,
}

impl HeartbeatHandle {
    /// Stop sending heartbeats
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Consecutive failures since the last successful heartbeat
    pub fn failure_count(&self) -> u32 {
        self.state.failures.load(Ordering::Acquire)
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn heartbeat_loop(
    client: RegistryClient,
    service_name: String,
    id: String,
    interval: Duration,
    state: Arc<HeartbeatState>,
    cancel: CancellationToken,
) {
    let max_failures = client.config.max_heartbeat_failures.max(1);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match client.heartbeat(&service_name, &id).await {
                    Ok(()) => {
                        state.failures.store(0, Ordering::Release);
                        debug!(service = %service_name, id = %id, "Heartbeat sent");
                    }
                    Err(e) => {
                        let failures = state.failures.fetch_add(1, Ordering::AcqRel) + 1;
                        warn!(
                            service = %service_name,
                            id = %id,
                            failures,
                            max_failures,
                            error = %e,
                            "Heartbeat failed"
                        );
                        if failures >= max_failures {
                            warn!(service = %service_name, id = %id, "Stopping heartbeat after repeated failures");
                            break;
                        }
                    }
                }
            }
        }
    }

    state.running.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RestRouter;
    use crate::domain::{Metadata, SystemClock};
    use crate::registry::{EventHub, HubConfig, MemoryStore, Registry, RegistryConfig, RegistryMetrics};
    use assert_matches::assert_matches;

    async fn serve() -> (String, Arc<Registry>) {
        let registry = Registry::new(
            RegistryConfig::default(),
            Arc::new(MemoryStore::new()),
            EventHub::new(HubConfig::default()),
            Arc::new(SystemClock),
            RegistryMetrics::new().unwrap(),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = RestRouter::new(registry.clone()).build();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{}", addr), registry)
    }

    fn instance(id: &str) -> Instance {
        Instance {
            service_name: "order-service".into(),
            id: id.into(),
            host: "127.0.0.1".into(),
            port: 8080,
            mode: Mode::Dev,
            metadata: Metadata {
                environment: Mode::Dev,
                region: "us-east".into(),
                version: 1,
                developer: Some("alice".into()),
                experimental: None,
            },
            health: String::new(),
            last_heartbeat: Default::default(),
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn test_rejects_empty_base_url() {
        assert_matches!(
            RegistryClient::new(ClientConfig::new("  ")),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_lookup_query_params() {
        let query = LookupQuery::service("order-service")
            .with_mode(Mode::Prod)
            .with_metadata("version", 2)
            .with_metadata("experimental", true);

        assert_eq!(
            query.to_params(),
            vec![
                ("service".to_string(), "order-service".to_string()),
                ("mode".to_string(), "prod".to_string()),
                ("experimental".to_string(), "true".to_string()),
                ("version".to_string(), "2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let (url, registry) = serve().await;
        let client = RegistryClient::new(ClientConfig::new(format!("{}/", url))).unwrap();

        let stored = client.register(&instance("o1")).await.unwrap();
        assert_eq!(stored.health, "UP");

        let found = client
            .lookup(&LookupQuery::service("order-service").with_metadata("developer", "alice"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        client.heartbeat("order-service", "o1").await.unwrap();
        client.deregister("order-service", "o1").await.unwrap();
        assert_eq!(registry.stats().instances, 0);

        let err = client.heartbeat("order-service", "o1").await.unwrap_err();
        assert_matches!(err, Error::InstanceNotFound { .. });
    }

    #[tokio::test]
    async fn test_register_validates_locally() {
        let (url, registry) = serve().await;
        let client = RegistryClient::new(ClientConfig::new(url)).unwrap();

        let mut bad = instance("o1");
        bad.host = " ".into();
        assert_matches!(client.register(&bad).await, Err(Error::Validation(_)));
        assert_eq!(registry.stats().instances, 0);
    }

    #[tokio::test]
    async fn test_auto_register_keeps_heartbeating() {
        let (url, registry) = serve().await;
        let client = RegistryClient::new(ClientConfig::new(url)).unwrap();

        let handle = client
            .auto_register(&instance("o1"), Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_running());
        assert_eq!(handle.failure_count(), 0);
        assert_eq!(registry.stats().instances, 1);

        handle.stop();
        assert!(wait_until(|| !handle.is_running()).await);
    }

    #[tokio::test]
    async fn test_heartbeat_gives_up_after_failures() {
        let (url, _registry) = serve().await;
        let mut config = ClientConfig::new(url);
        config.max_heartbeat_failures = 2;
        let client = RegistryClient::new(config).unwrap();

        // never registered: every heartbeat is a 404
        let handle = client.start_heartbeat("order-service", "ghost", Duration::from_millis(10));
        assert!(wait_until(|| !handle.is_running()).await);
        assert_eq!(handle.failure_count(), 2);
    }
}
