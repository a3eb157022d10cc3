//! Error types for the gateway.
//!
//! Every failure surfaced by the core is a `GatewayError`. Messages are safe to
//! show to callers: they never carry passwords or connection URLs with
//! credentials, only driver messages and configuration key names.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Missing or malformed configuration.
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("No active instance: none of the {candidates} configured instance(s) is marked active")]
    NoActiveInstance { candidates: usize },

    /// Native pool construction or the liveness check failed.
    #[error("Pool initialization failed: {message}")]
    PoolInit { message: String, suggestion: String },

    #[error("Connection pool exhausted: no connection available within {}ms", .waited.as_millis())]
    PoolExhausted { waited: Duration },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    /// The backend rejected or failed the command.
    #[error("Backend execution failed: {message}")]
    BackendExecution {
        message: String,
        /// e.g., "42P01" for undefined table, or the RESP error prefix
        code: Option<String>,
    },

    #[error("Unsupported command '{command}': {reason}")]
    UnsupportedCommand { command: String, reason: String },

    /// Remote proxy call failed or answered with a non-success status.
    #[error("Transport error: {message}")]
    Transport { message: String, status: Option<u16> },

    #[error("Timeout: {operation} exceeded {}ms", .elapsed.as_millis())]
    Timeout {
        operation: String,
        elapsed: Duration,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Invalid release: {message}")]
    InvalidRelease { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn pool_init(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::PoolInit {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn pool_exhausted(waited: Duration) -> Self {
        Self::PoolExhausted { waited }
    }

    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn backend(message: impl Into<String>, code: Option<String>) -> Self {
        Self::BackendExecution {
            message: message.into(),
            code,
        }
    }

    pub fn unsupported(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedCommand {
            command: command.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Transport {
            message: message.into(),
            status,
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn invalid_release(message: impl Into<String>) -> Self {
        Self::InvalidRelease {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Turn a connection failure raised while building a pool into a
    /// `PoolInit` error, keeping its suggestion.
    pub fn into_pool_init(self) -> Self {
        match self {
            Self::Connection {
                message,
                suggestion,
            } => Self::PoolInit {
                message,
                suggestion,
            },
            Self::Timeout { operation, elapsed } => Self::PoolInit {
                message: format!("{} timed out after {}ms", operation, elapsed.as_millis()),
                suggestion: "Check that the server is reachable and responsive".to_string(),
            },
            Self::BackendExecution { message, .. } => Self::PoolInit {
                message,
                suggestion: "Check the credentials and database/index in the configuration"
                    .to_string(),
            },
            other => other,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::PoolInit { suggestion, .. } | Self::Connection { suggestion, .. } => {
                Some(suggestion)
            }
            Self::PoolExhausted { .. } => {
                Some("Retry later or raise the pool's maximum size")
            }
            Self::NoActiveInstance { .. } => {
                Some("Set the active flag on exactly one instance in the configuration file")
            }
            _ => None,
        }
    }

    /// Whether the caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PoolInit { .. }
                | Self::PoolExhausted { .. }
                | Self::Connection { .. }
                | Self::Transport { .. }
                | Self::Timeout { .. }
        )
    }

    /// True for errors caused by configuration rather than the backend.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::NoActiveInstance { .. })
    }
}

/// Convert sqlx errors to GatewayError.
impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => GatewayError::config(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                GatewayError::backend(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => GatewayError::backend("No rows returned", None),
            sqlx::Error::PoolTimedOut => GatewayError::PoolExhausted {
                waited: Duration::ZERO,
            },
            sqlx::Error::PoolClosed => GatewayError::PoolClosed,
            sqlx::Error::Io(io_err) => GatewayError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => GatewayError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => GatewayError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                GatewayError::backend(format!("Column not found: {}", col), None)
            }
            sqlx::Error::ColumnDecode { index, source } => {
                GatewayError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => {
                GatewayError::internal(format!("Decode error: {}", source))
            }
            sqlx::Error::WorkerCrashed => GatewayError::internal("Database worker crashed"),
            _ => GatewayError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

fn suggestion_data(suggestion: Option<&str>) -> Option<serde_json::Value> {
    suggestion.map(|s| serde_json::json!({ "suggestion": s }))
}

/// Convert GatewayError to MCP ErrorData.
/// Includes the suggestion field in the `data` object when available.
impl From<GatewayError> for rmcp::ErrorData {
    fn from(err: GatewayError) -> Self {
        let data = suggestion_data(err.suggestion());
        match &err {
            GatewayError::Config { .. }
            | GatewayError::NoActiveInstance { .. }
            | GatewayError::InvalidInput { .. }
            | GatewayError::UnsupportedCommand { .. } => {
                rmcp::ErrorData::invalid_params(err.to_string(), data)
            }

            // Backend errors carry the server's code (SQLSTATE or RESP prefix) in the message
            GatewayError::BackendExecution { message, code } => {
                let msg = match code {
                    Some(code) => format!("Backend execution failed: {} (code: {})", message, code),
                    None => err.to_string(),
                };
                rmcp::ErrorData::internal_error(msg, data)
            }

            GatewayError::PoolInit { .. }
            | GatewayError::PoolExhausted { .. }
            | GatewayError::PoolClosed
            | GatewayError::Connection { .. }
            | GatewayError::Transport { .. }
            | GatewayError::Timeout { .. }
            | GatewayError::InvalidRelease { .. }
            | GatewayError::Internal { .. } => {
                rmcp::ErrorData::internal_error(err.to_string(), data)
            }
        }
    }
}
