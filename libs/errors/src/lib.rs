//! Unified error handling for the SNMP-Modbus bridge
//!
//! Every crate in the workspace returns [`BridgeResult`]. The variants split into two families
//! that the resolver treats very differently:
//!
//! - configuration errors, which are fatal at startup
//! - communication errors, which are recovered per request and surfaced as a sentinel value

use thiserror::Error;

// ============================================================================
// BridgeError - Main error type
// ============================================================================

/// Main error type for the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    #[error("Duplicate OID in configuration: {0}")]
    DuplicateOid(String),

    #[error("Invalid OID '{oid}': {reason}")]
    InvalidOid { oid: String, reason: String },

    // ======================================
    // Protocol & Communication Errors
    // ======================================
    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Modbus exception: FC{function_code:02X} code {exception_code:02X}")]
    ModbusException {
        function_code: u8,
        exception_code: u8,
    },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Link in retry backoff: next attempt allowed in {remaining_ms}ms")]
    RetryBackoff { remaining_ms: u64 },

    #[error("Not connected")]
    NotConnected,

    // ======================================
    // File & I/O Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using BridgeError
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Error category enum - used for classification and log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Validation,
    Connection,
    Timeout,
    Protocol,
    Network,
    Internal,
}

impl BridgeError {
    /// Shorthand for an invalid field error
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a missing field error
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingConfig(field.into())
    }

    /// Get error code (for logs and CLI output)
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::MissingConfig(_) => "MISSING_CONFIG",
            Self::DuplicateOid(_) => "DUPLICATE_OID",
            Self::InvalidOid { .. } => "INVALID_OID",

            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::ModbusException { .. } => "MODBUS_EXCEPTION",
            Self::Decode(_) => "DECODE_ERROR",
            Self::RetryBackoff { .. } => "RETRY_BACKOFF",
            Self::NotConnected => "NOT_CONNECTED",

            Self::Io(_) => "IO_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::MissingConfig(_) => ErrorCategory::Configuration,

            Self::InvalidConfig { .. } | Self::DuplicateOid(_) | Self::InvalidOid { .. } => {
                ErrorCategory::Validation
            },

            Self::ConnectionFailed { .. } | Self::NotConnected | Self::RetryBackoff { .. } => {
                ErrorCategory::Connection
            },

            Self::Timeout(_) => ErrorCategory::Timeout,

            // A short or garbled payload is indistinguishable from a bad response on the wire
            Self::Protocol(_) | Self::ModbusException { .. } | Self::Decode(_) => {
                ErrorCategory::Protocol
            },

            Self::Io(_) => ErrorCategory::Network,

            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Configuration errors abort startup
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Configuration | ErrorCategory::Validation
        )
    }

    /// Errors the resolver maps to the configured `error_value`
    pub fn is_communication_failure(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Connection
                | ErrorCategory::Timeout
                | ErrorCategory::Protocol
                | ErrorCategory::Network
        )
    }

    /// Level a failed resolution is logged at
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Configuration | ErrorCategory::Validation | ErrorCategory::Internal => {
                Level::ERROR
            },
            ErrorCategory::Connection
            | ErrorCategory::Timeout
            | ErrorCategory::Protocol
            | ErrorCategory::Network => Level::WARN,
        }
    }
}

// Helper macros for creating errors
#[macro_export]
macro_rules! config_error {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::BridgeError::Configuration(format!($fmt $(, $arg)*))
    };
}

#[macro_export]
macro_rules! protocol_error {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::BridgeError::Protocol(format!($fmt $(, $arg)*))
    };
}
