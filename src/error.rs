//! Error types and handling for devgate
//!
//! This module defines the error taxonomy shared by drivers, gateways and the
//! outer surfaces (HTTP, CLI). Every variant belongs to exactly one
//! [`ErrorCategory`], and the retry loop only ever looks at [`ErrorClass`].

use crate::status::BadReason;
use thiserror::Error;

/// Result type alias for devgate operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for devgate
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Request rejected before any device I/O
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Named resource is not declared for the device
    #[error("Unknown resource '{resource}' on device '{device}'")]
    UnknownResource { device: String, resource: String },

    /// No gateway is configured under that name
    #[error("Unknown device '{name}'")]
    UnknownDevice { name: String },

    /// Driver has no live connection
    #[error("Not connected: {message}")]
    NotConnected { message: String },

    /// Transport-level connection failure (refused, reset, broken pipe)
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Device answered "busy" / "temporarily unavailable"
    #[error("Device unavailable: {message}")]
    Unavailable { message: String },

    /// Response could not be decoded into the declared kind
    #[error("Decoding error: {message}")]
    Decoding { message: String },

    /// Response did not match anything the driver expects
    #[error("Unknown response: {message}")]
    UnknownResponse { message: String },

    /// Device reported an explicit fault (Modbus exception, HTTP 4xx)
    #[error("Device fault: {message}")]
    DeviceFault { message: String },

    /// Transient failures persisted past the retry budget
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        last: Box<GatewayError>,
    },

    /// Caller cancelled while waiting for the device
    #[error("Operation cancelled: {message}")]
    Cancelled { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// HTTP/Web server errors
    #[error("Web server error: {message}")]
    Web { message: String },

    /// Unexpected internal fault, including panics caught at the gateway boundary
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Retry classification of a failed device attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retrying may help (timeouts, resets, busy device)
    Transient,
    /// Retrying cannot change the outcome
    Terminal,
}

/// Caller-facing category used by the HTTP and CLI surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Transient,
    Terminal,
    Unhandled,
    Cancelled,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::InvalidRequest => "invalid_request",
            ErrorCategory::Transient => "transient",
            ErrorCategory::Terminal => "terminal",
            ErrorCategory::Unhandled => "unhandled",
            ErrorCategory::Cancelled => "cancelled",
        }
    }
}

impl GatewayError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        GatewayError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        GatewayError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new invalid request error
    pub fn invalid_request<S: Into<String>>(message: S) -> Self {
        GatewayError::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a new not-connected error
    pub fn not_connected<S: Into<String>>(message: S) -> Self {
        GatewayError::NotConnected {
            message: message.into(),
        }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        GatewayError::Connection {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        GatewayError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new unavailable error
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        GatewayError::Unavailable {
            message: message.into(),
        }
    }

    /// Create a new decoding error
    pub fn decoding<S: Into<String>>(message: S) -> Self {
        GatewayError::Decoding {
            message: message.into(),
        }
    }

    /// Create a new unknown response error
    pub fn unknown_response<S: Into<String>>(message: S) -> Self {
        GatewayError::UnknownResponse {
            message: message.into(),
        }
    }

    /// Create a new device fault error
    pub fn device_fault<S: Into<String>>(message: S) -> Self {
        GatewayError::DeviceFault {
            message: message.into(),
        }
    }

    /// Create a new cancellation error
    pub fn cancelled<S: Into<String>>(message: S) -> Self {
        GatewayError::Cancelled {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        GatewayError::Io {
            message: message.into(),
        }
    }

    /// Create a new web error
    pub fn web<S: Into<String>>(message: S) -> Self {
        GatewayError::Web {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        GatewayError::Internal {
            message: message.into(),
        }
    }

    /// Whether a retry could change the outcome of this failure
    pub fn class(&self) -> ErrorClass {
        match self {
            GatewayError::Timeout { .. }
            | GatewayError::NotConnected { .. }
            | GatewayError::Connection { .. }
            | GatewayError::Unavailable { .. } => ErrorClass::Transient,
            _ => ErrorClass::Terminal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Caller-facing category
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::Config { .. }
            | GatewayError::Validation { .. }
            | GatewayError::InvalidRequest { .. }
            | GatewayError::UnknownResource { .. }
            | GatewayError::UnknownDevice { .. } => ErrorCategory::InvalidRequest,
            GatewayError::Cancelled { .. } => ErrorCategory::Cancelled,
            GatewayError::Internal { .. } => ErrorCategory::Unhandled,
            e if e.is_transient() => ErrorCategory::Transient,
            _ => ErrorCategory::Terminal,
        }
    }

    /// Reason recorded in the cached status when this error ends an operation
    pub fn bad_reason(&self) -> BadReason {
        match self {
            GatewayError::Timeout { .. } => BadReason::Timeout,
            GatewayError::NotConnected { .. }
            | GatewayError::Connection { .. }
            | GatewayError::Unavailable { .. } => BadReason::NotConnected,
            GatewayError::Decoding { .. } => BadReason::DecodingError,
            GatewayError::UnknownResponse { .. } | GatewayError::DeviceFault { .. } => {
                BadReason::UnknownResponse
            }
            GatewayError::RetryExhausted { last, .. } => last.bad_reason(),
            _ => BadReason::InternalError,
        }
    }

    /// Short machine-readable variant name
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Config { .. } => "config",
            GatewayError::Validation { .. } => "validation",
            GatewayError::InvalidRequest { .. } => "invalid_request",
            GatewayError::UnknownResource { .. } => "unknown_resource",
            GatewayError::UnknownDevice { .. } => "unknown_device",
            GatewayError::NotConnected { .. } => "not_connected",
            GatewayError::Connection { .. } => "connection",
            GatewayError::Timeout { .. } => "timeout",
            GatewayError::Unavailable { .. } => "unavailable",
            GatewayError::Decoding { .. } => "decoding",
            GatewayError::UnknownResponse { .. } => "unknown_response",
            GatewayError::DeviceFault { .. } => "device_fault",
            GatewayError::RetryExhausted { .. } => "retry_exhausted",
            GatewayError::Cancelled { .. } => "cancelled",
            GatewayError::Serialization { .. } => "serialization",
            GatewayError::Io { .. } => "io",
            GatewayError::Web { .. } => "web",
            GatewayError::Internal { .. } => "internal",
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut => GatewayError::timeout(err.to_string()),
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => GatewayError::connection(err.to_string()),
            ErrorKind::NotConnected => GatewayError::not_connected(err.to_string()),
            _ => GatewayError::io(err.to_string()),
        }
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        GatewayError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::timeout(err.to_string())
        } else if err.is_connect() {
            GatewayError::not_connected(err.to_string())
        } else if err.is_decode() {
            GatewayError::decoding(err.to_string())
        } else if err.is_builder() {
            GatewayError::config(err.to_string())
        } else {
            GatewayError::connection(err.to_string())
        }
    }
}
