//! MC protocol response parsing and value conversion.
//!
//! # Response Structure
//!
//! | Component | Size | Description |
//! |-----------|------|-------------|
//! | Header | 9 bytes (3E) / 13 bytes (4E) | Routing header, see [`FrameHeader`](crate::FrameHeader) |
//! | End code | 2 bytes | `0x0000` on success (LE) |
//! | Data | Variable | Read data, present on success only |
//!
//! A response is successful when the end code is zero. Any other value is
//! surfaced verbatim as [`McError::PlcError`].
//!
//! # Example
//!
//! ```
//! use mc_protocol::{DeviceType, Response};
//!
//! let response = Response::new(0, 0x0000, vec![0x0A, 0x00, 0xFF, 0xFF]);
//! assert!(response.is_success());
//! assert_eq!(response.to_values(DeviceType::D, 2).unwrap(), vec![10, -1]);
//! ```

use crate::device::{Access, DeviceType};
use crate::error::{McError, Result};
use crate::utils::{packed_bits_len, unpack_bits};

/// Decoded response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Serial echoed by the controller (always 0 for 3E).
    pub serial: u16,
    /// End code (`0x0000` = success).
    pub end_code: u16,
    /// Response data. Empty when the end code is non-zero.
    pub payload: Vec<u8>,
}

impl Response {
    /// Creates a response.
    pub fn new(serial: u16, end_code: u16, payload: Vec<u8>) -> Self {
        Self {
            serial,
            end_code,
            payload,
        }
    }

    /// Returns `true` if the controller accepted the request.
    pub fn is_success(&self) -> bool {
        self.end_code == 0
    }

    /// Converts a non-zero end code into an error.
    ///
    /// # Errors
    ///
    /// Returns `McError::PlcError` carrying the end code verbatim.
    ///
    /// # Example
    ///
    /// ```
    /// use mc_protocol::Response;
    ///
    /// let response = Response::new(0, 0xC056, vec![]);
    /// let err = response.check_end_code().unwrap_err();
    /// assert_eq!(err.end_code(), Some(0xC056));
    /// ```
    pub fn check_end_code(&self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(McError::plc_error(self.end_code))
        }
    }

    /// Converts the payload of a batch read into point values.
    ///
    /// Word devices yield one value per register (signed or unsigned per
    /// device), bit devices yield 0 or 1 per point.
    ///
    /// # Errors
    ///
    /// Returns `McError::PlcError` for a failed response and
    /// `McError::InvalidFrame` when the payload size does not match
    /// `points`.
    pub fn to_values(&self, device: DeviceType, points: usize) -> Result<Vec<i32>> {
        self.check_end_code()?;
        match device.access() {
            Access::Word => Ok(self
                .to_words(points)?
                .into_iter()
                .map(|raw| device.word_value(raw))
                .collect()),
            Access::Bit => {
                self.expect_len(packed_bits_len(points), points)?;
                Ok(unpack_bits(&self.payload, points))
            }
        }
    }

    /// Returns the payload as raw 16-bit registers.
    ///
    /// # Errors
    ///
    /// Returns `McError::InvalidFrame` when the payload is not exactly
    /// `points` registers long.
    pub fn to_words(&self, points: usize) -> Result<Vec<u16>> {
        self.expect_len(points * 2, points)?;
        Ok(self
            .payload
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }

    fn expect_len(&self, expected: usize, points: usize) -> Result<()> {
        if self.payload.len() != expected {
            return Err(McError::invalid_frame(format!(
                "expected {} data bytes for {} points, got {}",
                expected,
                points,
                self.payload.len()
            )));
        }
        Ok(())
    }
}
