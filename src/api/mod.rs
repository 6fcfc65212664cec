//! API Module
//!
//! HTTP and WebSocket transport for the registry, plus the metrics listener.

pub mod rest;
pub mod server;
mod ws;

pub use rest::{ApiErrorResponse, InstanceKeyRequest, MessageResponse, RestRouter};
pub use server::{ApiServer, ApiServerConfig};
