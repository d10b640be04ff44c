//! Error types for netconf-device

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Main error type for device session operations
#[derive(Debug, Error)]
pub enum NetconfError {
    /// The session went down while the request was outstanding
    #[error("session closed: {0}")]
    SessionClosed(String),

    /// No transport session is attached
    #[error("device is not connected")]
    NotConnected,

    /// The transport refused or failed to send a message
    #[error("transport error: {0}")]
    Transport(String),

    /// No reply arrived within the request timeout
    #[error("request {message_id} timed out after {after:?}")]
    Timeout {
        /// Identifier of the expired request
        message_id: String,
        /// Configured timeout
        after: Duration,
    },

    /// Reply identifier did not match the request identifier exactly
    #[error("reply message-id {actual:?} does not match request message-id {expected:?}")]
    MessageIdMismatch {
        /// Identifier of the request
        expected: String,
        /// Identifier carried by the reply
        actual: String,
    },

    /// Message does not have the expected envelope shape
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Device answered with one or more rpc-error elements
    #[error("rpc failed: {}", join_errors(.0))]
    Rpc(Vec<RpcError>),

    /// Schema context could not be built
    #[error("schema resolution failed: {0}")]
    SchemaResolution(String),

    /// Operation needs a schema context but the device has none
    #[error("no schema context available for device")]
    SchemaUnavailable,

    /// Notification or data payload did not fit the schema context
    #[error("transform error: {0}")]
    Transform(String),

    /// Path could not be parsed or resolved
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Transaction was already committed or cancelled
    #[error("transaction already finished")]
    TransactionFinished,

    /// Operation is not offered by the device
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// XML encoding/decoding error
    #[error("XML error: {0}")]
    Xml(String),

    /// IO error (schema cache files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

/// Result type alias for device session operations
pub type Result<T> = std::result::Result<T, NetconfError>;

/// Error class of an rpc-error element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Transport,
    Rpc,
    Protocol,
    Application,
}

impl ErrorType {
    /// Parse the `error-type` leaf; unknown values map to application
    pub fn from_xml(value: &str) -> Self {
        match value {
            "transport" => Self::Transport,
            "rpc" => Self::Rpc,
            "protocol" => Self::Protocol,
            _ => Self::Application,
        }
    }
}

/// Severity of an rpc-error element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Error,
    Warning,
}

/// A decoded `rpc-error` element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub error_type: ErrorType,
    /// `error-tag` value, e.g. "missing-attribute"
    pub tag: String,
    pub severity: ErrorSeverity,
    pub message: Option<String>,
    /// Serialized children of `error-info`, e.g. `<bad-element>bar</bad-element>`
    pub info: Option<String>,
}

impl RpcError {
    /// Create an error-severity error with the given type, tag and message
    pub fn new(error_type: ErrorType, tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type,
            tag: tag.into(),
            severity: ErrorSeverity::Error,
            message: Some(message.into()),
            info: None,
        }
    }

    /// Attach error-info text
    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{}", self.error_type, self.tag)?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

fn join_errors(errors: &[RpcError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
