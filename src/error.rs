//! Error types and failure classification
//!
//! Every failure that reaches a caller belongs to exactly one [`ErrorKind`].
//! The kind decides whether the Real Transport may retry the *connection*;
//! individual transactions are never retried automatically.
//!
//! | Kind | Retryable | Typical source |
//! |------|-----------|----------------|
//! | `CONNECTION_ERROR` | yes | port missing, access denied, link dropped |
//! | `TIMEOUT_ERROR` | yes | slave did not answer within the response timeout |
//! | `HARDWARE_ERROR` | yes | CRC mismatch, slave device failure/busy |
//! | `PROTOCOL_ERROR` | no | illegal function/address, malformed frame |
//! | `VALIDATION_ERROR` | no | bad quantity, read-only field, bad config |
//! | `UNKNOWN_ERROR` | no | anything else |

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::constants;

/// Result type used throughout the gateway.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failure taxonomy shared by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ConnectionError,
    TimeoutError,
    HardwareError,
    ProtocolError,
    ValidationError,
    UnknownError,
}

impl ErrorKind {
    /// Whether a connection-level retry makes sense for this kind.
    #[inline]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectionError | ErrorKind::TimeoutError | ErrorKind::HardwareError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ConnectionError => "CONNECTION_ERROR",
            ErrorKind::TimeoutError => "TIMEOUT_ERROR",
            ErrorKind::HardwareError => "HARDWARE_ERROR",
            ErrorKind::ProtocolError => "PROTOCOL_ERROR",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gateway error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// Serial port missing, inaccessible or dropped
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// No (complete) response within the configured window
    #[error("Timeout error: {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Line noise or a slave reporting a device-side fault
    #[error("Hardware error: {message}")]
    Hardware { message: String },

    /// Exception response returned by the slave
    #[error("Modbus exception: function 0x{function:02X}, code 0x{code:02X} ({message})")]
    Exception {
        function: u8,
        code: u8,
        message: String,
    },

    /// Frame or PDU that does not follow the protocol
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Request rejected before it touched the bus
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Invalid or unreadable configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Command was removed from the queue before it ran
    #[error("Command {id} discarded before execution")]
    Discarded { id: u64 },

    /// Anything that could not be classified
    #[error("Unknown error: {message}")]
    Unknown { message: String },
}

impl GatewayError {
    pub fn connection<S: Into<String>>(message: S) -> Self {
        GatewayError::Connection {
            message: message.into(),
        }
    }

    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        GatewayError::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn hardware<S: Into<String>>(message: S) -> Self {
        GatewayError::Hardware {
            message: message.into(),
        }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        GatewayError::Protocol {
            message: message.into(),
        }
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        GatewayError::Validation {
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        GatewayError::Configuration {
            message: message.into(),
        }
    }

    pub fn unknown<S: Into<String>>(message: S) -> Self {
        GatewayError::Unknown {
            message: message.into(),
        }
    }

    /// Build an error from a Modbus exception response.
    pub fn exception(function: u8, code: u8) -> Self {
        GatewayError::Exception {
            function,
            code,
            message: constants::exception_description(code).to_string(),
        }
    }

    /// Classify a free-form failure message.
    ///
    /// Best-effort pattern matching over the message text; the first
    /// matching group wins, so timeouts are recognised before generic
    /// connection wording.
    pub fn classify<S: Into<String>>(message: S) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let has = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

        if has(&["timeout", "timed out", "no response"]) {
            GatewayError::Timeout {
                operation: message,
                timeout_ms: 0,
            }
        } else if has(&[
            "permission denied",
            "access denied",
            "no such file",
            "not found",
            "not connected",
            "disconnected",
            "broken pipe",
            "connection",
            "communication",
            "port",
        ]) {
            GatewayError::Connection { message }
        } else if has(&["crc", "hardware", "device failure", "busy", "parity", "noise"]) {
            GatewayError::Hardware { message }
        } else if has(&[
            "exception",
            "illegal",
            "function code",
            "frame",
            "protocol",
            "unexpected",
        ]) {
            GatewayError::Protocol { message }
        } else if has(&["invalid", "out of range", "validation", "read-only", "unsupported"]) {
            GatewayError::Validation { message }
        } else {
            GatewayError::Unknown { message }
        }
    }

    /// Taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Connection { .. } => ErrorKind::ConnectionError,
            GatewayError::Timeout { .. } => ErrorKind::TimeoutError,
            GatewayError::Hardware { .. } => ErrorKind::HardwareError,
            GatewayError::Exception { code, .. } => match *code {
                constants::EXCEPTION_SERVER_DEVICE_FAILURE
                | constants::EXCEPTION_ACKNOWLEDGE
                | constants::EXCEPTION_SERVER_DEVICE_BUSY
                | constants::EXCEPTION_MEMORY_PARITY_ERROR
                | constants::EXCEPTION_GATEWAY_PATH_UNAVAILABLE
                | constants::EXCEPTION_GATEWAY_TARGET_FAILED => ErrorKind::HardwareError,
                _ => ErrorKind::ProtocolError,
            },
            GatewayError::Protocol { .. } => ErrorKind::ProtocolError,
            GatewayError::Validation { .. } | GatewayError::Configuration { .. } => {
                ErrorKind::ValidationError
            }
            GatewayError::Discarded { .. } | GatewayError::Unknown { .. } => {
                ErrorKind::UnknownError
            }
        }
    }

    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        match err.kind() {
            Io::TimedOut | Io::WouldBlock => GatewayError::timeout(err.to_string(), 0),
            Io::PermissionDenied => GatewayError::connection(format!("access denied: {}", err)),
            Io::NotFound
            | Io::BrokenPipe
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::NotConnected
            | Io::UnexpectedEof => GatewayError::connection(err.to_string()),
            Io::InvalidInput | Io::InvalidData => GatewayError::validation(err.to_string()),
            _ => GatewayError::classify(err.to_string()),
        }
    }
}

impl From<tokio_serial::Error> for GatewayError {
    fn from(err: tokio_serial::Error) -> Self {
        match err.kind() {
            tokio_serial::ErrorKind::NoDevice => GatewayError::connection(err.to_string()),
            tokio_serial::ErrorKind::InvalidInput => GatewayError::validation(err.to_string()),
            tokio_serial::ErrorKind::Io(kind) => {
                GatewayError::from(std::io::Error::new(kind, err.to_string()))
            }
            tokio_serial::ErrorKind::Unknown => GatewayError::classify(err.to_string()),
        }
    }
}

impl From<figment::Error> for GatewayError {
    fn from(err: figment::Error) -> Self {
        GatewayError::configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::ConnectionError.is_retryable());
        assert!(ErrorKind::TimeoutError.is_retryable());
        assert!(ErrorKind::HardwareError.is_retryable());
        assert!(!ErrorKind::ProtocolError.is_retryable());
        assert!(!ErrorKind::ValidationError.is_retryable());
        assert!(!ErrorKind::UnknownError.is_retryable());
    }

    #[test]
    fn test_classify_patterns() {
        assert_eq!(
            GatewayError::classify("Read timed out").kind(),
            ErrorKind::TimeoutError
        );
        assert_eq!(
            GatewayError::classify("Permission denied (os error 13)").kind(),
            ErrorKind::ConnectionError
        );
        assert_eq!(
            GatewayError::classify("CRC mismatch: expected 0x1234").kind(),
            ErrorKind::HardwareError
        );
        assert_eq!(
            GatewayError::classify("Illegal data address").kind(),
            ErrorKind::ProtocolError
        );
        assert_eq!(
            GatewayError::classify("invalid quantity").kind(),
            ErrorKind::ValidationError
        );
        assert_eq!(
            GatewayError::classify("something odd happened").kind(),
            ErrorKind::UnknownError
        );
    }

    #[test]
    fn test_exception_kind_depends_on_code() {
        let busy = GatewayError::exception(0x03, constants::EXCEPTION_SERVER_DEVICE_BUSY);
        assert_eq!(busy.kind(), ErrorKind::HardwareError);
        assert!(busy.is_retryable());

        let illegal = GatewayError::exception(0x03, constants::EXCEPTION_ILLEGAL_DATA_ADDRESS);
        assert_eq!(illegal.kind(), ErrorKind::ProtocolError);
        assert!(!illegal.is_retryable());
        assert!(illegal.to_string().contains("Illegal Data Address"));
    }

    #[test]
    fn test_io_error_conversion() {
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(GatewayError::from(denied).kind(), ErrorKind::ConnectionError);

        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(GatewayError::from(timed_out).kind(), ErrorKind::TimeoutError);
    }

    #[test]
    fn test_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorKind::TimeoutError).unwrap();
        assert_eq!(json, "\"TIMEOUT_ERROR\"");
    }
}
