//! Error types for the gateway core
//!
//! Four core failure classes plus a monitoring class:
//! - Connection: connect/disconnect/reconnect failures, recoverable via auto-reconnect
//! - QueryExecution: driver-level statement failures, recorded and re-raised
//! - SchemaValidation: requested object missing or inaccessible
//! - Configuration: unrecognized backend type or malformed config
//! - Monitoring: alert lifecycle misuse and monitor control errors

use thiserror::Error;

/// Result type for gateway operations
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Gateway error taxonomy
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Connection establishment or teardown failed
    #[error("connection error: {message}")]
    Connection { message: String },

    /// A statement failed at the driver level
    #[error("query execution error: {message}")]
    QueryExecution { message: String },

    /// Requested schema object not found or inaccessible
    #[error("schema validation error: {message}")]
    SchemaValidation { message: String },

    /// Malformed configuration or unrecognized backend type
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Alert lifecycle misuse or monitor control error
    #[error("monitoring error: {message}")]
    Monitoring { message: String },
}

impl GatewayError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a query execution error
    pub fn query(message: impl Into<String>) -> Self {
        Self::QueryExecution {
            message: message.into(),
        }
    }

    /// Create a schema validation error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::SchemaValidation {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a monitoring error
    pub fn monitoring(message: impl Into<String>) -> Self {
        Self::Monitoring {
            message: message.into(),
        }
    }

    /// Error for operations that require an active connection
    pub fn no_active_connection() -> Self {
        Self::connection("no active connection")
    }

    /// Whether the affected connection may recover through auto-reconnect
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::QueryExecution { .. })
    }

    /// Short remediation hint for classes with a known cause
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::Connection { .. } => {
                Some("verify the database host, port and credentials, then retry or auto-reconnect")
            }
            Self::QueryExecution { .. } => {
                Some("check the statement syntax and bound parameters against the target backend")
            }
            Self::SchemaValidation { .. } => {
                Some("confirm the object exists and the connection's user can read its metadata")
            }
            Self::Configuration { .. } => {
                Some("supported backend types are mssql, mysql and postgres")
            }
            Self::Monitoring { .. } => None,
        }
    }

    /// User-facing rendering: what failed, the underlying message, and a
    /// remediation hint where the class has one. Never includes a backtrace.
    pub fn user_message(&self) -> String {
        match self.remediation() {
            Some(hint) => format!("{}. Suggestion: {}", self, hint),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GatewayError::connection("connection refused");
        assert!(err.to_string().contains("connection refused"));
        assert!(err.to_string().starts_with("connection error"));
    }

    #[test]
    fn test_user_message_carries_remediation() {
        let err = GatewayError::config("unknown backend type: oracle");
        let msg = err.user_message();
        assert!(msg.contains("unknown backend type: oracle"));
        assert!(msg.contains("mssql, mysql and postgres"));
    }

    #[test]
    fn test_monitoring_error_has_no_hint() {
        let err = GatewayError::monitoring("alert already resolved");
        assert_eq!(err.user_message(), err.to_string());
    }

    #[test]
    fn test_recoverable_classes() {
        assert!(GatewayError::connection("refused").is_recoverable());
        assert!(GatewayError::query("timeout").is_recoverable());
        assert!(!GatewayError::config("bad type").is_recoverable());
        assert!(!GatewayError::schema("missing table").is_recoverable());
    }
}
