//! API Server
//!
//! Runs the REST/WebSocket listener and the Prometheus metrics listener, and
//! shuts both down together.

use crate::error::{Error, Result};
use crate::registry::{Registry, RegistryMetrics};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

use super::rest::RestRouter;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiServerConfig {
    /// REST and WebSocket bind address
    pub rest_addr: SocketAddr,
    /// Prometheus metrics bind address
    pub metrics_addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from(([0, 0, 0, 0], 4000)),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

/// REST + metrics server for one registry
pub struct ApiServer {
    config: ApiServerConfig,
    registry: Arc<Registry>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: ApiServerConfig, registry: Arc<Registry>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            registry,
            shutdown_tx,
        }
    }

    /// Run until shutdown is triggered or a listener fails
    pub async fn run(&self) -> Result<()> {
        info!("Starting API server");
        info!("  REST API: {}", self.config.rest_addr);
        info!("  Metrics: {}", self.config.metrics_addr);

        let mut rest = self.spawn_rest_server();
        let mut metrics = self.spawn_metrics_server();

        // either listener ending stops the other
        tokio::select! {
            outcome = &mut rest => {
                self.shutdown();
                join_outcome("REST", outcome).and(join_outcome("metrics", metrics.await))
            }
            outcome = &mut metrics => {
                self.shutdown();
                join_outcome("metrics", outcome).and(join_outcome("REST", rest.await))
            }
        }
    }

    fn spawn_rest_server(&self) -> tokio::task::JoinHandle<Result<()>> {
        let addr = self.config.rest_addr;
        let registry = self.registry.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move { run_rest_server(addr, registry, shutdown_rx).await })
    }

    fn spawn_metrics_server(&self) -> tokio::task::JoinHandle<Result<()>> {
        let addr = self.config.metrics_addr;
        let metrics = self.registry.metrics().clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move { run_metrics_server(addr, metrics, shutdown_rx).await })
    }

    /// Trigger graceful shutdown
    ///
    /// Closes the event hub first so open watch connections end and the REST
    /// listener can drain.
    pub fn shutdown(&self) {
        self.registry.shutdown();
        let _ = self.shutdown_tx.send(());
    }
}

fn join_outcome(
    name: &str,
    outcome: std::result::Result<Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("{} server error: {}", name, e);
            Err(e)
        }
        Err(e) => Err(Error::Internal(format!("{} server task failed: {}", name, e))),
    }
}

/// Run the REST API server
async fn run_rest_server(
    addr: SocketAddr,
    registry: Arc<Registry>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let app = RestRouter::new(registry).build();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind REST server: {}", e)))?;
    info!("REST API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("REST server shutting down");
        })
        .await
        .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

fn metrics_response(metrics: &RegistryMetrics, path: &str) -> hyper::Response<hyper::Body> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::{Body, Response, StatusCode};

    let mut response = Response::new(Body::empty());
    match (path, metrics.encode()) {
        ("/metrics", Ok((content_type, buffer))) => {
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                response.headers_mut().insert(CONTENT_TYPE, value);
            }
            *response.body_mut() = Body::from(buffer);
        }
        ("/metrics", Err(e)) => {
            error!(error = %e, "Metrics encoding failed");
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        }
        _ => {
            *response.status_mut() = StatusCode::NOT_FOUND;
            *response.body_mut() = Body::from("not found");
        }
    }
    response
}

async fn run_metrics_server(
    addr: SocketAddr,
    metrics: RegistryMetrics,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server};
    use std::convert::Infallible;

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let response = metrics_response(&metrics, req.uri().path());
                async move { Ok::<_, Infallible>(response) }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?
        .serve(make_svc);
    info!("Metrics server listening on {}", addr);

    server
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
