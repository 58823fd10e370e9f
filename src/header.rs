//! Frame header structures and routing configuration.
//!
//! Every MC protocol binary frame starts with a routing header that ends in
//! a 2-byte length field. Everything after the length field (monitoring
//! timer and command body for requests, end code and data for responses)
//! is counted by that field.
//!
//! # 3E Header
//!
//! | Byte | Field | Description |
//! |------|-------|-------------|
//! | 0-1 | Subheader | `50 00` request, `D0 00` response |
//! | 2 | Network No. | Network number |
//! | 3 | PC No. | PC number |
//! | 4-5 | Unit I/O | Request destination module I/O number (LE) |
//! | 6 | Unit Station | Request destination module station number |
//! | 7-8 | Length | Data length (LE) |
//!
//! # 4E Header
//!
//! | Byte | Field | Description |
//! |------|-------|-------------|
//! | 0-1 | Subheader | `54 00` request, `D4 00` response |
//! | 2-3 | Serial | Serial number, echoed by the controller (LE) |
//! | 4-5 | Reserved | Always `00 00` |
//! | 6-12 | Routing | Same as 3E bytes 2-8 |
//!
//! # Example
//!
//! ```
//! use mc_protocol::{FrameDescriptor, FrameHeader, FrameType};
//!
//! let descriptor = FrameDescriptor::new(FrameType::E4);
//! let header = FrameHeader::request(&descriptor, 0x1234, 12);
//! let bytes = header.to_bytes();
//! assert_eq!(bytes.len(), FrameType::E4.header_len());
//! assert_eq!(&bytes[..4], &[0x54, 0x00, 0x34, 0x12]);
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{McError, Result};

/// 3E request subheader.
pub(crate) const SUBHEADER_3E_REQUEST: [u8; 2] = [0x50, 0x00];
/// 3E response subheader.
pub(crate) const SUBHEADER_3E_RESPONSE: [u8; 2] = [0xD0, 0x00];
/// 4E request subheader.
pub(crate) const SUBHEADER_4E_REQUEST: [u8; 2] = [0x54, 0x00];
/// 4E response subheader.
pub(crate) const SUBHEADER_4E_RESPONSE: [u8; 2] = [0xD4, 0x00];

/// Default PC number (own station).
pub const DEFAULT_PC_NO: u8 = 0xFF;
/// Default request destination module I/O number (own CPU).
pub const DEFAULT_UNIT_IO: u16 = 0x03FF;
/// Default monitoring timer in units of 250 ms.
pub const DEFAULT_MONITORING_TIMER: u16 = 0x0010;

/// Wire format variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FrameType {
    /// 3E frame.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "3E"))]
    E3,
    /// 4E frame (3E plus serial number).
    #[cfg_attr(feature = "serde", serde(rename = "4E"))]
    E4,
}

impl FrameType {
    /// Size of the routing header, up to and including the length field.
    pub fn header_len(self) -> usize {
        match self {
            FrameType::E3 => 9,
            FrameType::E4 => 13,
        }
    }

    fn subheader(self, response: bool) -> [u8; 2] {
        match (self, response) {
            (FrameType::E3, false) => SUBHEADER_3E_REQUEST,
            (FrameType::E3, true) => SUBHEADER_3E_RESPONSE,
            (FrameType::E4, false) => SUBHEADER_4E_REQUEST,
            (FrameType::E4, true) => SUBHEADER_4E_RESPONSE,
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameType::E3 => write!(f, "3E"),
            FrameType::E4 => write!(f, "4E"),
        }
    }
}

impl FromStr for FrameType {
    type Err = McError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "3E" => Ok(FrameType::E3),
            "4E" => Ok(FrameType::E4),
            _ => Err(McError::invalid_parameter(
                "frame_type",
                format!("unsupported frame type '{s}', expected 3E or 4E"),
            )),
        }
    }
}

/// Immutable frame configuration selected when a client is built.
///
/// The routing defaults address the CPU of the station the client is
/// connected to, which is what both frame types use when no relay is
/// involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FrameDescriptor {
    /// Frame layout.
    pub frame_type: FrameType,
    /// Network number.
    pub network_no: u8,
    /// PC number.
    pub pc_no: u8,
    /// Request destination module I/O number.
    pub unit_io: u16,
    /// Request destination module station number.
    pub unit_station: u8,
    /// Monitoring timer, passed through to the controller unmodified.
    pub monitoring_timer: u16,
}

impl FrameDescriptor {
    /// Creates a descriptor with default routing for the given frame type.
    pub fn new(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            network_no: 0,
            pc_no: DEFAULT_PC_NO,
            unit_io: DEFAULT_UNIT_IO,
            unit_station: 0,
            monitoring_timer: DEFAULT_MONITORING_TIMER,
        }
    }
}

impl Default for FrameDescriptor {
    fn default() -> Self {
        Self::new(FrameType::E3)
    }
}

/// Decoded routing header of a request or response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame layout.
    pub frame_type: FrameType,
    /// Whether this is a response header.
    pub response: bool,
    /// Serial number (always 0 for 3E).
    pub serial: u16,
    /// Network number.
    pub network_no: u8,
    /// PC number.
    pub pc_no: u8,
    /// Request destination module I/O number.
    pub unit_io: u16,
    /// Request destination module station number.
    pub unit_station: u8,
    /// Number of bytes following the length field.
    pub data_length: u16,
}

impl FrameHeader {
    /// Creates a request header from a descriptor.
    pub fn request(descriptor: &FrameDescriptor, serial: u16, data_length: u16) -> Self {
        Self {
            frame_type: descriptor.frame_type,
            response: false,
            serial: match descriptor.frame_type {
                FrameType::E3 => 0,
                FrameType::E4 => serial,
            },
            network_no: descriptor.network_no,
            pc_no: descriptor.pc_no,
            unit_io: descriptor.unit_io,
            unit_station: descriptor.unit_station,
            data_length,
        }
    }

    /// Creates the response header a controller would send for `request`.
    pub fn response_to(request: &FrameHeader, data_length: u16) -> Self {
        Self {
            response: true,
            data_length,
            ..*request
        }
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.frame_type.header_len());
        bytes.extend_from_slice(&self.frame_type.subheader(self.response));
        if self.frame_type == FrameType::E4 {
            bytes.extend_from_slice(&self.serial.to_le_bytes());
            bytes.extend_from_slice(&[0x00, 0x00]);
        }
        bytes.push(self.network_no);
        bytes.push(self.pc_no);
        bytes.extend_from_slice(&self.unit_io.to_le_bytes());
        bytes.push(self.unit_station);
        bytes.extend_from_slice(&self.data_length.to_le_bytes());
        bytes
    }

    /// Parses a header, checking the subheader matches the expected direction.
    ///
    /// # Errors
    ///
    /// Returns `McError::InvalidFrame` if the slice is shorter than the
    /// header or the subheader is not the expected one.
    ///
    /// # Example
    ///
    /// ```
    /// use mc_protocol::{FrameHeader, FrameType};
    ///
    /// let bytes = [0xD0, 0x00, 0x00, 0xFF, 0xFF, 0x03, 0x00, 0x02, 0x00];
    /// let header = FrameHeader::from_bytes(FrameType::E3, true, &bytes).unwrap();
    /// assert_eq!(header.data_length, 2);
    /// ```
    pub fn from_bytes(frame_type: FrameType, response: bool, data: &[u8]) -> Result<Self> {
        let len = frame_type.header_len();
        if data.len() < len {
            return Err(McError::invalid_frame(format!(
                "header too short: expected {} bytes, got {}",
                len,
                data.len()
            )));
        }

        let expected = frame_type.subheader(response);
        if data[..2] != expected {
            return Err(McError::invalid_frame(format!(
                "unexpected subheader {:02X}{:02X} for {} {}",
                data[0],
                data[1],
                frame_type,
                if response { "response" } else { "request" }
            )));
        }

        let (serial, routing) = match frame_type {
            FrameType::E3 => (0, &data[2..len]),
            FrameType::E4 => (u16::from_le_bytes([data[2], data[3]]), &data[6..len]),
        };

        Ok(Self {
            frame_type,
            response,
            serial,
            network_no: routing[0],
            pc_no: routing[1],
            unit_io: u16::from_le_bytes([routing[2], routing[3]]),
            unit_station: routing[4],
            data_length: u16::from_le_bytes([routing[5], routing[6]]),
        })
    }
}
