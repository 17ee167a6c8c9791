//! # Voltage Modbus Slave Error Handling
//!
//! This module provides the error types used across the server stack. Errors
//! fall into three layers, each with its own recovery rule:
//!
//! ## Error Categories
//!
//! ### Frame Errors ([`FrameError`])
//! - **Truncated**: fewer bytes than the framing variant's minimum length
//! - **Malformed**: structurally invalid frame (bad start/end characters,
//!   invalid hex, wrong MBAP protocol id or length field)
//! - **ChecksumMismatch**: CRC16 (RTU) or LRC (ASCII) did not match
//!
//! Frame errors are never answered on the wire. The server counts them in the
//! bus communication error counter and waits for the next frame.
//!
//! ### Protocol Exceptions ([`crate::protocol::ModbusException`])
//! Requests that arrived in a valid frame but cannot be fulfilled are answered
//! with an exception PDU. They are not represented here.
//!
//! ### System Errors ([`ModbusError`])
//! - **Transport Errors**: I/O, connection and timeout failures of the serve loops
//! - **Configuration Errors**: invalid unit address or register table bounds,
//!   detected before the server accepts any input
//! - **Internal Errors**: lock poisoning and other conditions that should not
//!   occur in normal operation
//!
//! ## Usage Examples
//!
//! ```rust
//! use voltage_modbus_slave::{ModbusError, ServerConfig};
//!
//! let result = ServerConfig::from_json_str(r#"{"unit_address": 250, "framing": "rtu"}"#);
//! match result {
//!     Err(ModbusError::Configuration { message }) => println!("rejected: {}", message),
//!     Err(other) => println!("other error: {}", other),
//!     Ok(_) => unreachable!(),
//! }
//! ```

use thiserror::Error;

/// Result type alias for Modbus operations
///
/// This is a convenience type alias that uses `ModbusError` as the error type
/// for all fallible operations outside the per-message pipeline.
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Framing failures detected while unwrapping a raw frame
///
/// None of these produce a reply. A frame that fails here is dropped and the
/// bus communication error counter is incremented.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame is shorter than the variant's minimum length
    #[error("Frame truncated: {actual} bytes, minimum {minimum}")]
    Truncated { actual: usize, minimum: usize },

    /// Frame structure is invalid
    ///
    /// # Examples
    /// - ASCII frame without a leading ':'
    /// - Non-hex character inside an ASCII frame
    /// - MBAP protocol id other than zero
    /// - MBAP length field disagreeing with the received byte count
    #[error("Malformed frame: {message}")]
    Malformed { message: String },

    /// CRC16 or LRC validation failure
    ///
    /// Provides both expected and received checksum values for debugging.
    #[error("Checksum mismatch: expected={expected:04X}, actual={actual:04X}")]
    ChecksumMismatch { expected: u16, actual: u16 },
}

impl FrameError {
    /// Create a truncated frame error
    pub fn truncated(actual: usize, minimum: usize) -> Self {
        Self::Truncated { actual, minimum }
    }

    /// Create a malformed frame error
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::Malformed { message: message.into() }
    }

    /// Create a checksum mismatch error
    pub fn checksum_mismatch(expected: u16, actual: u16) -> Self {
        Self::ChecksumMismatch { expected, actual }
    }
}

/// Crate-wide error type for transports, configuration and server lifecycle
///
/// Each variant provides context about the specific failure. Only
/// `Configuration` is fatal to a server; everything else ends at most one
/// connection or one serve loop.
#[derive(Error, Debug, Clone)]
pub enum ModbusError {
    /// I/O related errors (network, serial)
    ///
    /// # Examples
    /// - TCP connection reset by peer
    /// - Serial port access denied
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection errors
    ///
    /// # Examples
    /// - Failed to bind the listening socket
    /// - Peer closed the connection
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Timeout errors
    ///
    /// Occurs when a transport operation exceeds its configured limit.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Frame errors surfaced outside the request pipeline
    ///
    /// # Examples
    /// - Serial frame exceeding the maximum ADU size
    /// - MBAP header announcing an impossible length
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Configuration errors
    ///
    /// # Examples
    /// - Unit address above 247
    /// - Register table larger than the 16-bit address space
    /// - Malformed configuration file
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal errors (should not occur in normal operation)
    ///
    /// # Examples
    /// - Data model lock poisoned by a panicking thread
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ModbusError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new timeout error
    ///
    /// # Arguments
    ///
    /// * `operation` - Description of the operation that timed out
    /// * `timeout_ms` - Timeout duration in milliseconds
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if the error is fatal to the server
    ///
    /// Configuration errors stop the server before it accepts input. Every
    /// other error ends at most the current connection.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use voltage_modbus_slave::ModbusError;
    ///
    /// assert!(ModbusError::configuration("bad bounds").is_fatal());
    /// assert!(!ModbusError::timeout("read frame", 1000).is_fatal());
    /// ```
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Check if the error is a network/transport issue
    ///
    /// # Examples
    ///
    /// ```rust
    /// use voltage_modbus_slave::ModbusError;
    ///
    /// let connection_error = ModbusError::connection("Connection refused");
    /// assert!(connection_error.is_transport_error());
    /// ```
    pub fn is_transport_error(&self) -> bool {
        matches!(self,
            Self::Io { .. } |
            Self::Connection { .. } |
            Self::Timeout { .. }
        )
    }
}

/// Convert from std::io::Error
///
/// Unexpected end of stream is reported as a connection error so serve loops
/// can tell a closed peer from a failing device.
impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::connection("Peer closed the connection"),
            _ => Self::io(err.to_string()),
        }
    }
}

/// Convert from tokio timeout errors
impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("Operation timeout", 0)
    }
}

/// Convert from serde JSON errors
impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("JSON error: {}", err))
    }
}

/// Convert from serde YAML errors
impl From<serde_yaml::Error> for ModbusError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(format!("YAML error: {}", err))
    }
}
