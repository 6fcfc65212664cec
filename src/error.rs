//! Error types for the Service Registry
//!
//! Provides structured error types for the registry engine, its storage
//! backends, the HTTP/WebSocket adapters and the client SDK.

use thiserror::Error;

/// Unified error type for the registry
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Instance not found: {service_name}/{id}")]
    InstanceNotFound { service_name: String, id: String },

    // =========================================================================
    // Store Errors
    // =========================================================================
    #[error("Store error: {0}")]
    Store(String),

    // =========================================================================
    // Fan-out Errors
    // =========================================================================
    #[error("Delivery to subscriber {subscriber} failed: {reason}")]
    Delivery { subscriber: u64, reason: String },

    // =========================================================================
    // Client SDK Errors
    // =========================================================================
    #[error("Registry request failed with status {status}: {message}")]
    Client { status: u16, message: String },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a not-found error for an instance key
    pub fn not_found(service_name: impl Into<String>, id: impl Into<String>) -> Self {
        Error::InstanceNotFound {
            service_name: service_name.into(),
            id: id.into(),
        }
    }

    /// HTTP status code this error maps to at the API boundary
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::JsonParse(_) => 400,
            Error::InstanceNotFound { .. } => 404,
            Error::Client { status, .. } => *status,
            _ => 500,
        }
    }

    /// Short machine-readable code used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) | Error::JsonParse(_) => "validation_failed",
            Error::InstanceNotFound { .. } => "not_found",
            Error::Store(_) | Error::Io(_) => "store_failed",
            _ => "internal_error",
        }
    }

    /// Check if retrying the same request could succeed
    ///
    /// Caller errors (validation, unknown instance) are never retryable;
    /// store and transport failures are.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Store(_) | Error::Io(_) | Error::Http(_) => true,
            Error::Client { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias for the registry
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::Validation("port".into()).status_code(), 400);
        assert_eq!(Error::not_found("orders", "o1").status_code(), 404);
        assert_eq!(Error::Store("disk full".into()).status_code(), 500);
        assert_eq!(
            Error::Client {
                status: 503,
                message: "down".into()
            }
            .status_code(),
            503
        );
    }

    #[test]
    fn test_error_retryable() {
        assert!(Error::Store("timeout".into()).is_retryable());
        assert!(!Error::Validation("bad".into()).is_retryable());
        assert!(!Error::not_found("orders", "o1").is_retryable());

        let server_side = Error::Client {
            status: 502,
            message: "bad gateway".into(),
        };
        assert!(server_side.is_retryable());

        let caller_side = Error::Client {
            status: 400,
            message: "bad request".into(),
        };
        assert!(!caller_side.is_retryable());
    }

    #[test]
    fn test_not_found_message() {
        let err = Error::not_found("order-service", "o1");
        assert_eq!(err.to_string(), "Instance not found: order-service/o1");
    }
}
