//! Error types for the MC protocol.
//!
//! Every failure the crate can produce is a variant of [`McError`]. The
//! variants fall into five classes, each with a predicate:
//!
//! | Class | Predicate | Raised by | Meaning |
//! |-------|-----------|-----------|---------|
//! | Configuration | [`McError::is_configuration`] | codec, client, monitor | Bad input, detected before any I/O |
//! | Framing | [`McError::is_framing`] | codec | Response cannot be trusted, reconnect |
//! | Protocol | [`McError::is_protocol`] | client | Controller rejected the request (end code) |
//! | Transport | [`McError::is_transport`] | transport | Timeout, peer closed, socket failure |
//! | Lifecycle | - | client, monitor | Client closed, monitor already running |

use std::io;
use thiserror::Error;

use crate::device::DeviceType;

/// Result type alias for MC protocol operations.
pub type Result<T> = std::result::Result<T, McError>;

/// Errors that can occur during MC protocol communication.
#[derive(Debug, Error)]
pub enum McError {
    /// Error returned by the controller as a non-zero end code.
    #[error("PLC error: end code 0x{end_code:04X}")]
    PlcError {
        /// End code from the response, verbatim.
        end_code: u16,
    },

    /// Device mnemonic not present in the device table.
    #[error("Unsupported device type '{name}'")]
    UnsupportedDevice {
        /// The mnemonic that failed to parse.
        name: String,
    },

    /// Device number (or range) outside the 24-bit address field.
    #[error("Address out of range: {device}{number} (+{count} points)")]
    AddressOutOfRange {
        /// Device type being addressed.
        device: DeviceType,
        /// First device number.
        number: u32,
        /// Number of points requested from `number`.
        count: usize,
    },

    /// The device type cannot be used for the requested operation.
    #[error("Invalid device {device}: {reason}")]
    InvalidDevice {
        /// Device type being addressed.
        device: DeviceType,
        /// Description of why the device is not allowed.
        reason: String,
    },

    /// Invalid parameter provided.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// Name of the invalid parameter.
        parameter: String,
        /// Description of why the parameter is invalid.
        reason: String,
    },

    /// Malformed frame (bad subheader, length field or payload size).
    #[error("Invalid frame: {reason}")]
    InvalidFrame {
        /// Description of the framing error.
        reason: String,
    },

    /// 4E serial number echoed by the controller does not match the request.
    #[error("Serial mismatch: expected 0x{expected:04X}, received 0x{received:04X}")]
    SerialMismatch {
        /// Serial sent with the request.
        expected: u16,
        /// Serial found in the response.
        received: u16,
    },

    /// Send or receive did not complete within the configured timeout.
    #[error("Communication timeout")]
    Timeout,

    /// The peer closed the connection before a full response arrived.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The client was closed; no further I/O is attempted.
    #[error("Client is closed")]
    ClientClosed,

    /// `start` was called on a monitor that is already polling.
    #[error("Monitor is already running")]
    MonitorRunning,
}

impl McError {
    /// Creates a new `PlcError` from an end code.
    ///
    /// # Example
    ///
    /// ```
    /// use mc_protocol::McError;
    ///
    /// let err = McError::plc_error(0xC056);
    /// assert_eq!(err.end_code(), Some(0xC056));
    /// ```
    pub fn plc_error(end_code: u16) -> Self {
        Self::PlcError { end_code }
    }

    /// Creates a new `InvalidParameter` error.
    ///
    /// # Example
    ///
    /// ```
    /// use mc_protocol::McError;
    ///
    /// let err = McError::invalid_parameter("count", "must be greater than 0");
    /// assert!(err.is_configuration());
    /// ```
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidDevice` error.
    pub fn invalid_device(device: DeviceType, reason: impl Into<String>) -> Self {
        Self::InvalidDevice {
            device,
            reason: reason.into(),
        }
    }

    /// Creates a new `AddressOutOfRange` error.
    pub fn address_out_of_range(device: DeviceType, number: u32, count: usize) -> Self {
        Self::AddressOutOfRange {
            device,
            number,
            count,
        }
    }

    /// Creates a new `InvalidFrame` error.
    ///
    /// # Example
    ///
    /// ```
    /// use mc_protocol::McError;
    ///
    /// let err = McError::invalid_frame("response too short");
    /// assert!(err.is_framing());
    /// ```
    pub fn invalid_frame(reason: impl Into<String>) -> Self {
        Self::InvalidFrame {
            reason: reason.into(),
        }
    }

    /// Creates a new `SerialMismatch` error.
    pub fn serial_mismatch(expected: u16, received: u16) -> Self {
        Self::SerialMismatch { expected, received }
    }

    /// Returns `true` for errors detected before any I/O was attempted.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedDevice { .. }
                | Self::AddressOutOfRange { .. }
                | Self::InvalidDevice { .. }
                | Self::InvalidParameter { .. }
        )
    }

    /// Returns `true` when the response could not be trusted.
    ///
    /// The connection is suspect after a framing error.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            Self::InvalidFrame { .. } | Self::SerialMismatch { .. }
        )
    }

    /// Returns `true` when the controller rejected the request.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::PlcError { .. })
    }

    /// Returns `true` for timeouts, closed connections and socket failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionClosed | Self::Io(_))
    }

    /// Returns the controller end code, if this is a protocol error.
    pub fn end_code(&self) -> Option<u16> {
        match self {
            Self::PlcError { end_code } => Some(*end_code),
            _ => None,
        }
    }
}

/// Returns a short English description of a well-known end code.
///
/// The table is informative only; [`McError::PlcError`] always carries the
/// raw code and callers should match on that.
///
/// # Example
///
/// ```
/// use mc_protocol::end_code_description;
///
/// assert_eq!(
///     end_code_description(0xC056),
///     Some("device out of range")
/// );
/// assert_eq!(end_code_description(0x1234), None);
/// ```
pub fn end_code_description(end_code: u16) -> Option<&'static str> {
    let description = match end_code {
        0x4000..=0x4002 => "CPU error: request cannot be processed",
        0x4030 => "specified device cannot be accessed",
        0x4031 => "specified device number is out of range",
        0x4080 => "data error in request",
        0xC050 => "unsupported device in read/write request",
        0xC051 => "unsupported number of points in read/write request",
        0xC052 => "bit specification on a word device",
        0xC054 => "invalid device specification",
        0xC056 => "device out of range",
        0xC059 => "invalid command or subcommand",
        0xC05B => "invalid stored data specification",
        0xC05C => "invalid request content",
        0xC061 => "request data length does not match",
        0xC06B => "write disabled while CPU is in RUN",
        _ => return None,
    };
    Some(description)
}
