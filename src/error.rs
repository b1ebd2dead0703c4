//! Error types for the podlink library.

use thiserror::Error;

/// The main error type for podlink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame decoding or integrity error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The pod answered `!NACK`.
    #[error("command {command:?} not acknowledged by pod")]
    Rejected { command: String },

    /// The pod did not finish the exchange in time.
    #[error("pod timed out after {timeout_ms}ms, command {command:?} failed")]
    Timeout { command: String, timeout_ms: u64 },

    /// Parameter lookup or value validation failed before anything was sent.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Invalid configuration (scheduler interval, timeouts, ...).
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// Unexpected response content.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Connection is not established.
    #[error("not connected")]
    NotConnected,

    /// No queue exists for the endpoint (not seen by the last discovery).
    #[error("unknown endpoint: {endpoint}")]
    UnknownEndpoint { endpoint: String },

    /// A whole discovery cycle failed.
    #[error("discovery cycle failed: {message}")]
    Cycle { message: String },

    /// Channel receive error.
    #[error("channel closed")]
    ChannelClosed,
}

impl Error {
    /// Returns true for [`Error::Timeout`].
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

/// Frame-specific errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// No `;` separating payload and checksum.
    #[error("frame has no checksum segment: {0:?}")]
    MissingChecksum(String),

    /// Checksum segment does not match the payload.
    #[error("invalid checksum returned from pod: expected {expected}, got {got}")]
    ChecksumMismatch { expected: String, got: String },

    /// Frame is not valid ASCII/UTF-8.
    #[error("frame is not valid text")]
    NotText,

    /// A data field was expected at the given index.
    #[error("frame {payload:?} has no field {index}")]
    MissingField { payload: String, index: usize },

    /// Line exceeds the decoder limit without a terminator.
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },
}

/// Parameter validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The name or index is not in the parameter table.
    #[error("{name} is not a parameter")]
    UnknownParameter { name: String },

    /// The value is outside the range/format accepted for the parameter.
    #[error("{value} is not valid for {name}")]
    InvalidValue { name: String, value: String },
}

/// Result type alias for podlink operations.
pub type Result<T> = std::result::Result<T, Error>;
