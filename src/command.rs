//! MC protocol request bodies.
//!
//! A [`Request`] is everything after the monitoring timer in a request
//! frame: command, subcommand, head device and point count, plus the
//! payload for writes. The routing header is added by the
//! [`codec`](crate::codec) when the request is encoded.
//!
//! # Request Body
//!
//! | Byte | Field | Description |
//! |------|-------|-------------|
//! | 0-1 | Command | `0x0401` batch read, `0x1401` batch write (LE) |
//! | 2-3 | Subcommand | `0x0000` word units, `0x0001` bit units (LE) |
//! | 4-6 | Device number | Head device number (24-bit LE) |
//! | 7 | Device code | See [`DeviceType`] |
//! | 8-9 | Points | Number of points (LE) |
//! | 10.. | Payload | Write data only |
//!
//! # Example
//!
//! ```
//! use mc_protocol::{DeviceType, Request};
//!
//! let request = Request::batch_read(DeviceType::D, 100, 3).unwrap();
//! assert_eq!(
//!     request.to_bytes(),
//!     vec![0x01, 0x04, 0x00, 0x00, 0x64, 0x00, 0x00, 0xA8, 0x03, 0x00]
//! );
//! ```
//!
//! # Constants
//!
//! - [`MAX_WORD_POINTS`] - Most word points per request (960)
//! - [`MAX_BIT_POINTS`] - Most bit points per request (7168)

use crate::device::{check_range, Access, DeviceType};
use crate::error::{McError, Result};
use crate::utils::{pack_bits, packed_bits_len};

/// Batch read command.
pub const CMD_BATCH_READ: u16 = 0x0401;
/// Batch write command.
pub const CMD_BATCH_WRITE: u16 = 0x1401;
/// Subcommand for word-unit access.
pub const SUBCMD_WORD: u16 = 0x0000;
/// Subcommand for bit-unit access.
pub const SUBCMD_BIT: u16 = 0x0001;

/// Maximum number of word points in a single request.
pub const MAX_WORD_POINTS: usize = 960;
/// Maximum number of bit points in a single request.
pub const MAX_BIT_POINTS: usize = 7168;

/// Size of the request body before the payload.
pub(crate) const REQUEST_BODY_SIZE: usize = 10;

/// Returns the per-request point ceiling for a device.
///
/// # Example
///
/// ```
/// use mc_protocol::{max_points, DeviceType};
///
/// assert_eq!(max_points(DeviceType::D), 960);
/// assert_eq!(max_points(DeviceType::M), 7168);
/// ```
pub fn max_points(device: DeviceType) -> usize {
    match device.access() {
        Access::Word => MAX_WORD_POINTS,
        Access::Bit => MAX_BIT_POINTS,
    }
}

/// Checks a write value fits a 16-bit register.
///
/// Accepts the signed and unsigned 16-bit ranges so that both `-1` and
/// `65535` write `0xFFFF`.
fn word_from_value(value: i32) -> Result<u16> {
    if !(i32::from(i16::MIN)..=i32::from(u16::MAX)).contains(&value) {
        return Err(McError::invalid_parameter(
            "value",
            format!("{value} does not fit a 16-bit register"),
        ));
    }
    Ok(value as u16)
}

/// A batch read or batch write request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Command code.
    pub command: u16,
    /// Subcommand (access unit).
    pub subcommand: u16,
    /// Head device type.
    pub device: DeviceType,
    /// Head device number.
    pub start: u32,
    /// Number of points.
    pub points: u16,
    /// Write data, `None` for reads.
    pub payload: Option<Vec<u8>>,
}

impl Request {
    /// Creates a batch read of `points` consecutive devices.
    ///
    /// Bit devices are read in bit units, word devices in word units.
    ///
    /// # Arguments
    ///
    /// * `device` - Device type to read
    /// * `start` - Head device number
    /// * `points` - Number of points (1 to [`max_points`])
    ///
    /// # Errors
    ///
    /// Returns an error if `points` is 0 or above the ceiling, or if the
    /// range runs past the 24-bit address field.
    pub fn batch_read(device: DeviceType, start: u32, points: usize) -> Result<Self> {
        check_points(device, start, points)?;
        Ok(Self {
            command: CMD_BATCH_READ,
            subcommand: default_subcommand(device),
            device,
            start,
            points: points as u16,
            payload: None,
        })
    }

    /// Creates a batch write using the device's natural unit.
    ///
    /// Word values must fit 16 bits (`-32768..=65535`). Bit values are ON
    /// when non-zero.
    ///
    /// # Errors
    ///
    /// Returns an error if `values` is empty or above the ceiling, if the
    /// range runs past the 24-bit address field, or if a word value does
    /// not fit a register.
    ///
    /// # Example
    ///
    /// ```
    /// use mc_protocol::{DeviceType, Request};
    ///
    /// let request = Request::batch_write(DeviceType::M, 0, &[1, 0, 1]).unwrap();
    /// assert_eq!(request.payload, Some(vec![0x01, 0x01]));
    ///
    /// let request = Request::batch_write(DeviceType::D, 0, &[-1]).unwrap();
    /// assert_eq!(request.payload, Some(vec![0xFF, 0xFF]));
    /// ```
    pub fn batch_write(device: DeviceType, start: u32, values: &[i32]) -> Result<Self> {
        Self::batch_write_as(device, start, values, device.access())
    }

    /// Creates a batch write with an explicit access unit.
    ///
    /// Writing a bit device in word units sends one byte per point with
    /// only bit 0 significant. Word devices cannot be written in bit units.
    ///
    /// # Errors
    ///
    /// Same as [`Request::batch_write`], plus `McError::InvalidDevice` for
    /// a word device with [`Access::Bit`].
    pub fn batch_write_as(
        device: DeviceType,
        start: u32,
        values: &[i32],
        unit: Access,
    ) -> Result<Self> {
        check_points(device, start, values.len())?;

        let (subcommand, payload) = match (device.access(), unit) {
            (Access::Word, Access::Word) => {
                let mut payload = Vec::with_capacity(values.len() * 2);
                for value in values {
                    payload.extend_from_slice(&word_from_value(*value)?.to_le_bytes());
                }
                (SUBCMD_WORD, payload)
            }
            (Access::Word, Access::Bit) => {
                return Err(McError::invalid_device(
                    device,
                    "word devices cannot be written in bit units",
                ));
            }
            (Access::Bit, Access::Bit) => (SUBCMD_BIT, pack_bits(values)),
            (Access::Bit, Access::Word) => (
                SUBCMD_WORD,
                values.iter().map(|v| u8::from(*v != 0)).collect(),
            ),
        };

        Ok(Self {
            command: CMD_BATCH_WRITE,
            subcommand,
            device,
            start,
            points: values.len() as u16,
            payload: Some(payload),
        })
    }

    /// Returns `true` for batch reads.
    pub fn is_read(&self) -> bool {
        self.command == CMD_BATCH_READ
    }

    /// Payload size the request must carry (writes) or expects back (reads).
    pub fn data_len(&self) -> usize {
        let points = usize::from(self.points);
        match (self.device.access(), self.subcommand) {
            (Access::Word, _) => points * 2,
            (Access::Bit, SUBCMD_BIT) => packed_bits_len(points),
            // word-unit reads return whole registers
            (Access::Bit, _) if self.is_read() => points * 2,
            (Access::Bit, _) => points,
        }
    }

    /// Payload size of a successful response: the read data, or nothing
    /// for writes.
    pub fn response_len(&self) -> usize {
        if self.is_read() {
            self.data_len()
        } else {
            0
        }
    }

    /// Checks the request is well-formed before it goes on the wire.
    ///
    /// Requests built with the constructors always pass; this guards
    /// hand-assembled ones.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        check_points(self.device, self.start, usize::from(self.points))?;

        match self.subcommand {
            SUBCMD_WORD => {}
            SUBCMD_BIT if self.device.is_bit() => {}
            SUBCMD_BIT => {
                return Err(McError::invalid_device(
                    self.device,
                    "bit units on a word device",
                ));
            }
            other => {
                return Err(McError::invalid_parameter(
                    "subcommand",
                    format!("unsupported subcommand 0x{other:04X}"),
                ));
            }
        }

        match (self.command, &self.payload) {
            (CMD_BATCH_READ, None) => Ok(()),
            (CMD_BATCH_READ, Some(_)) => Err(McError::invalid_parameter(
                "payload",
                "batch read carries no payload",
            )),
            (CMD_BATCH_WRITE, Some(payload)) if payload.len() == self.data_len() => Ok(()),
            (CMD_BATCH_WRITE, Some(payload)) => Err(McError::invalid_parameter(
                "payload",
                format!(
                    "expected {} bytes for {} points, got {}",
                    self.data_len(),
                    self.points,
                    payload.len()
                ),
            )),
            (CMD_BATCH_WRITE, None) => Err(McError::invalid_parameter(
                "payload",
                "batch write requires a payload",
            )),
            (other, _) => Err(McError::invalid_parameter(
                "command",
                format!("unsupported command 0x{other:04X}"),
            )),
        }
    }

    /// Serializes the request body (without header and timer).
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload_len = self.payload.as_ref().map_or(0, Vec::len);
        let mut bytes = Vec::with_capacity(REQUEST_BODY_SIZE + payload_len);
        bytes.extend_from_slice(&self.command.to_le_bytes());
        bytes.extend_from_slice(&self.subcommand.to_le_bytes());
        bytes.extend_from_slice(&self.start.to_le_bytes()[..3]);
        bytes.push(self.device.code());
        bytes.extend_from_slice(&self.points.to_le_bytes());
        if let Some(payload) = &self.payload {
            bytes.extend_from_slice(payload);
        }
        bytes
    }
}

fn default_subcommand(device: DeviceType) -> u16 {
    match device.access() {
        Access::Word => SUBCMD_WORD,
        Access::Bit => SUBCMD_BIT,
    }
}

fn check_points(device: DeviceType, start: u32, points: usize) -> Result<()> {
    check_range(device, start, points)?;
    let max = max_points(device);
    if points > max {
        return Err(McError::invalid_parameter(
            "points",
            format!("{points} exceeds the {max} point limit for {device}"),
        ));
    }
    Ok(())
}
