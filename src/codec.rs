//! Stateless encoding and decoding of 3E and 4E binary frames.
//!
//! The client side uses [`encode_request`], [`response_frame_len`] and
//! [`decode_response`]. The other direction ([`decode_request`] and
//! [`encode_response`]) lets test harnesses and simulators stand in for a
//! controller using the same layout rules.
//!
//! Decoding never guesses: a buffer that does not yet hold the whole frame
//! announced by its length field decodes to `Ok(None)`, and the caller reads
//! more bytes and tries again.
//!
//! # Example
//!
//! ```
//! use mc_protocol::codec::{decode_response, encode_request};
//! use mc_protocol::{DeviceType, FrameDescriptor, Request};
//!
//! let descriptor = FrameDescriptor::default();
//! let request = Request::batch_read(DeviceType::D, 100, 1).unwrap();
//! let frame = encode_request(&descriptor, 0, &request).unwrap();
//! assert_eq!(&frame[..2], &[0x50, 0x00]);
//!
//! let reply = [0xD0, 0x00, 0x00, 0xFF, 0xFF, 0x03, 0x00, 0x04, 0x00, 0x00, 0x00, 0x2A, 0x00];
//! assert!(decode_response(&descriptor, 0, &reply[..5]).unwrap().is_none());
//! let response = decode_response(&descriptor, 0, &reply).unwrap().unwrap();
//! assert_eq!(response.to_values(DeviceType::D, 1).unwrap(), vec![42]);
//! ```

use crate::command::{Request, CMD_BATCH_READ, REQUEST_BODY_SIZE};
use crate::device::{DeviceType, DEVICE_TABLE};
use crate::error::{McError, Result};
use crate::header::{FrameDescriptor, FrameHeader, FrameType};
use crate::response::Response;

/// Size of the monitoring timer that precedes the request body.
const TIMER_SIZE: usize = 2;
/// Size of the end code that opens every response body.
const END_CODE_SIZE: usize = 2;

/// Returns the binary device code for a device type.
pub fn device_code(device: DeviceType) -> u8 {
    device.code()
}

/// Returns whether a device type is bit-oriented.
pub fn is_bit_device(device: DeviceType) -> bool {
    device.is_bit()
}

/// Looks a device type up by its binary code.
///
/// # Example
///
/// ```
/// use mc_protocol::codec::device_from_code;
/// use mc_protocol::DeviceType;
///
/// assert_eq!(device_from_code(0xA8), Some(DeviceType::D));
/// assert_eq!(device_from_code(0x00), None);
/// ```
pub fn device_from_code(code: u8) -> Option<DeviceType> {
    DEVICE_TABLE
        .iter()
        .find(|info| info.code == code)
        .map(|info| info.device)
}

/// Encodes a request into a complete frame.
///
/// `serial` is written for 4E frames and ignored for 3E.
///
/// # Errors
///
/// Returns a configuration error if the request fails
/// [`Request::validate`]. Nothing is encoded in that case.
pub fn encode_request(
    descriptor: &FrameDescriptor,
    serial: u16,
    request: &Request,
) -> Result<Vec<u8>> {
    request.validate()?;

    let body = request.to_bytes();
    let data_length = to_length_field(TIMER_SIZE + body.len())?;
    let header = FrameHeader::request(descriptor, serial, data_length);

    let mut frame = header.to_bytes();
    frame.reserve(TIMER_SIZE + body.len());
    frame.extend_from_slice(&descriptor.monitoring_timer.to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Returns the total size of the response frame at the start of `data`.
///
/// Yields `Ok(None)` until the whole routing header is available.
///
/// # Errors
///
/// Returns `McError::InvalidFrame` for a wrong subheader or a length field
/// too short to hold the end code.
pub fn response_frame_len(frame_type: FrameType, data: &[u8]) -> Result<Option<usize>> {
    frame_len(frame_type, true, END_CODE_SIZE, data)
}

/// Decodes a response frame.
///
/// The payload is discarded when the end code is non-zero; the end code
/// itself is returned for the caller to act on.
///
/// # Errors
///
/// Returns `McError::InvalidFrame` for a malformed header or length, and
/// `McError::SerialMismatch` when a 4E response echoes a serial other than
/// `expected_serial`.
pub fn decode_response(
    descriptor: &FrameDescriptor,
    expected_serial: u16,
    data: &[u8],
) -> Result<Option<Response>> {
    let frame_type = descriptor.frame_type;
    let Some(total) = response_frame_len(frame_type, data)? else {
        return Ok(None);
    };
    if data.len() < total {
        return Ok(None);
    }

    let header = FrameHeader::from_bytes(frame_type, true, data)?;
    if frame_type == FrameType::E4 && header.serial != expected_serial {
        return Err(McError::serial_mismatch(expected_serial, header.serial));
    }

    let body = &data[frame_type.header_len()..total];
    let end_code = u16::from_le_bytes([body[0], body[1]]);
    let payload = if end_code == 0 {
        body[END_CODE_SIZE..].to_vec()
    } else {
        Vec::new()
    };

    Ok(Some(Response::new(header.serial, end_code, payload)))
}

/// A request frame as seen by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRequest {
    /// Routing header, used to address the reply.
    pub header: FrameHeader,
    /// Monitoring timer sent by the client.
    pub monitoring_timer: u16,
    /// Request body.
    pub request: Request,
}

/// Decodes a request frame.
///
/// The request is not validated; a simulator may want to answer a bad
/// request with an end code rather than drop it.
///
/// # Errors
///
/// Returns `McError::InvalidFrame` for a malformed header, a body shorter
/// than the fixed fields, an unknown device code, or payload bytes on a
/// batch read.
pub fn decode_request(frame_type: FrameType, data: &[u8]) -> Result<Option<DecodedRequest>> {
    let Some(total) = frame_len(frame_type, false, TIMER_SIZE + REQUEST_BODY_SIZE, data)? else {
        return Ok(None);
    };
    if data.len() < total {
        return Ok(None);
    }

    let header = FrameHeader::from_bytes(frame_type, false, data)?;
    let body = &data[frame_type.header_len()..total];

    let monitoring_timer = u16::from_le_bytes([body[0], body[1]]);
    let command = u16::from_le_bytes([body[2], body[3]]);
    let subcommand = u16::from_le_bytes([body[4], body[5]]);
    let start = u32::from_le_bytes([body[6], body[7], body[8], 0]);
    let device = device_from_code(body[9]).ok_or_else(|| {
        McError::invalid_frame(format!("unknown device code 0x{:02X}", body[9]))
    })?;
    let points = u16::from_le_bytes([body[10], body[11]]);

    let rest = &body[TIMER_SIZE + REQUEST_BODY_SIZE..];
    let payload = if command == CMD_BATCH_READ {
        if !rest.is_empty() {
            return Err(McError::invalid_frame(format!(
                "batch read carries {} unexpected payload bytes",
                rest.len()
            )));
        }
        None
    } else {
        Some(rest.to_vec())
    };

    Ok(Some(DecodedRequest {
        header,
        monitoring_timer,
        request: Request {
            command,
            subcommand,
            device,
            start,
            points,
            payload,
        },
    }))
}

/// Encodes the response a controller sends for `request`.
///
/// The serial and routing fields are echoed from the request header.
///
/// # Errors
///
/// Returns `McError::InvalidParameter` if the payload does not fit the
/// 16-bit length field.
pub fn encode_response(request: &FrameHeader, end_code: u16, payload: &[u8]) -> Result<Vec<u8>> {
    let data_length = to_length_field(END_CODE_SIZE + payload.len())?;
    let header = FrameHeader::response_to(request, data_length);

    let mut frame = header.to_bytes();
    frame.extend_from_slice(&end_code.to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

fn frame_len(
    frame_type: FrameType,
    response: bool,
    min_data_length: usize,
    data: &[u8],
) -> Result<Option<usize>> {
    let header_len = frame_type.header_len();
    if data.len() < header_len {
        return Ok(None);
    }
    let header = FrameHeader::from_bytes(frame_type, response, data)?;
    let data_length = usize::from(header.data_length);
    if data_length < min_data_length {
        return Err(McError::invalid_frame(format!(
            "length field {data_length} is shorter than the {min_data_length} fixed bytes"
        )));
    }
    Ok(Some(header_len + data_length))
}

fn to_length_field(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| {
        McError::invalid_parameter("payload", format!("{len} bytes exceed the length field"))
    })
}
