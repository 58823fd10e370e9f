//! High-level MC protocol client.
//!
//! This module provides the [`Client`] struct, the primary interface for
//! reading and writing controller devices over one TCP connection.
//!
//! # Overview
//!
//! The client handles:
//! - Request construction through the frame descriptor chosen at build time
//! - Serialization of requests (one in flight per connection)
//! - 4E serial numbering and response correlation
//! - End code checking and value conversion
//! - Splitting of reads and writes larger than one request allows
//!
//! # Example
//!
//! ```no_run
//! use mc_protocol::{Client, ClientConfig, DeviceType};
//!
//! let client = Client::new(ClientConfig::new("192.168.1.10", 5007))?;
//!
//! let values = client.read_devices(DeviceType::D, 100, 10)?;
//! client.write_devices(DeviceType::D, 200, &[1, -2, 3])?;
//! client.write_device(DeviceType::M, 0, 1)?;
//! client.write_string(DeviceType::D, 1000, "LOT-42")?;
//! # Ok::<(), mc_protocol::McError>(())
//! ```
//!
//! # Splitting
//!
//! A read or write of more points than one request can carry
//! ([`MAX_WORD_POINTS`](crate::MAX_WORD_POINTS) or
//! [`MAX_BIT_POINTS`](crate::MAX_BIT_POINTS)) is sent as several sequential
//! requests over contiguous sub-ranges, in address order. The results are
//! concatenated as if one request had been made, but **the operation is not
//! atomic**: if a later sub-request fails, the sub-ranges written before it
//! stay written.
//!
//! # Thread Safety
//!
//! `Client` is `Send + Sync`. Calls from several threads are serialized by
//! an internal lock, so requests never interleave on the connection.

use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::codec;
use crate::command::{max_points, Request};
use crate::device::{check_range, DeviceType};
use crate::error::{McError, Result};
use crate::header::{FrameDescriptor, FrameType};
use crate::response::Response;
use crate::transport::{TcpTransport, DEFAULT_TIMEOUT};
use crate::utils::{string_to_words, words_to_string};

/// Configuration for creating a client.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClientConfig {
    /// Controller host name or IP address.
    pub host: String,
    /// Controller MC protocol port.
    pub port: u16,
    /// Bound for connect, send and receive.
    pub timeout: Duration,
    /// Frame layout and routing.
    pub frame: FrameDescriptor,
    /// Reopen the connection on the next call after a transport or
    /// framing failure.
    pub auto_reconnect: bool,
}

impl ClientConfig {
    /// Creates a configuration with 3E frames and default routing.
    ///
    /// # Example
    ///
    /// ```
    /// use mc_protocol::{ClientConfig, FrameType};
    /// use std::time::Duration;
    ///
    /// let config = ClientConfig::new("192.168.1.10", 5007);
    /// assert_eq!(config.frame.frame_type, FrameType::E3);
    /// assert_eq!(config.timeout, Duration::from_secs(2));
    /// ```
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: DEFAULT_TIMEOUT,
            frame: FrameDescriptor::default(),
            auto_reconnect: true,
        }
    }

    /// Sets a custom timeout (default is 2 seconds).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Selects the frame type (default is 3E).
    ///
    /// # Example
    ///
    /// ```
    /// use mc_protocol::{ClientConfig, FrameType};
    ///
    /// let config = ClientConfig::new("192.168.1.10", 5007)
    ///     .with_frame_type(FrameType::E4)
    ///     .with_network_no(1)
    ///     .with_pc_no(2);
    /// assert_eq!(config.frame.frame_type, FrameType::E4);
    /// assert_eq!(config.frame.network_no, 1);
    /// ```
    pub fn with_frame_type(mut self, frame_type: FrameType) -> Self {
        self.frame.frame_type = frame_type;
        self
    }

    /// Sets the network number (default is 0).
    pub fn with_network_no(mut self, network_no: u8) -> Self {
        self.frame.network_no = network_no;
        self
    }

    /// Sets the PC number (default is 0xFF).
    pub fn with_pc_no(mut self, pc_no: u8) -> Self {
        self.frame.pc_no = pc_no;
        self
    }

    /// Sets the request destination module I/O number (default is 0x03FF).
    pub fn with_unit_io(mut self, unit_io: u16) -> Self {
        self.frame.unit_io = unit_io;
        self
    }

    /// Sets the request destination module station number (default is 0).
    pub fn with_unit_station(mut self, unit_station: u8) -> Self {
        self.frame.unit_station = unit_station;
        self
    }

    /// Sets the monitoring timer in units of 250 ms (default is 0x0010).
    pub fn with_monitoring_timer(mut self, monitoring_timer: u16) -> Self {
        self.frame.monitoring_timer = monitoring_timer;
        self
    }

    /// Enables or disables reconnecting after a failure (default is on).
    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }
}

enum Session {
    Connected(TcpTransport),
    /// Dropped after a failure; reopened lazily when auto-reconnect is on.
    Disconnected,
    Closed,
}

/// MC protocol client.
///
/// Each call builds its requests, sends them one at a time under the
/// client's lock and checks every end code. A non-zero end code fails the
/// call with [`McError::PlcError`] carrying the code verbatim.
///
/// Failed requests are never retried. After a transport or framing error
/// the connection is dropped; with auto-reconnect on, the next call opens a
/// new one first.
pub struct Client {
    config: ClientConfig,
    session: Mutex<Session>,
    serial_counter: AtomicU16,
}

impl Client {
    /// Connects to the controller.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the connection cannot be opened.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mc_protocol::{Client, ClientConfig, FrameType};
    ///
    /// let config = ClientConfig::new("192.168.1.10", 5007).with_frame_type(FrameType::E4);
    /// let client = Client::new(config).unwrap();
    /// ```
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = TcpTransport::connect(&config.host, config.port, config.timeout)?;
        tracing::info!(
            host = %config.host,
            port = config.port,
            frame_type = %config.frame.frame_type,
            "MC client ready"
        );

        Ok(Self {
            config,
            session: Mutex::new(Session::Connected(transport)),
            serial_counter: AtomicU16::new(0),
        })
    }

    /// Returns the configuration the client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the frame descriptor used for every request.
    pub fn descriptor(&self) -> &FrameDescriptor {
        &self.config.frame
    }

    fn next_serial(&self) -> u16 {
        self.serial_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends one request and returns its decoded response.
    fn execute(&self, request: &Request) -> Result<Response> {
        let descriptor = &self.config.frame;
        let serial = self.next_serial();
        let frame = codec::encode_request(descriptor, serial, request)?;

        let mut session = self.session.lock();
        if matches!(*session, Session::Disconnected) {
            if !self.config.auto_reconnect {
                return Err(McError::ConnectionClosed);
            }
            tracing::debug!(host = %self.config.host, port = self.config.port, "Reconnecting");
            let transport =
                TcpTransport::connect(&self.config.host, self.config.port, self.config.timeout)?;
            *session = Session::Connected(transport);
        }
        let Session::Connected(transport) = &mut *session else {
            return Err(McError::ClientClosed);
        };

        let frame_type = descriptor.frame_type;
        let result = transport
            .send_and_receive(&frame, |buf| codec::response_frame_len(frame_type, buf))
            .and_then(|bytes| {
                let response = codec::decode_response(descriptor, serial, &bytes)?
                    .ok_or_else(|| McError::invalid_frame("incomplete response frame"))?;
                let expected = request.response_len();
                if response.is_success() && response.payload.len() != expected {
                    return Err(McError::invalid_frame(format!(
                        "expected {} data bytes, got {}",
                        expected,
                        response.payload.len()
                    )));
                }
                Ok(response)
            });

        if let Err(e) = &result {
            if e.is_transport() || e.is_framing() {
                tracing::debug!(error = %e, "Dropping connection");
                if let Session::Connected(transport) =
                    std::mem::replace(&mut *session, Session::Disconnected)
                {
                    transport.close();
                }
            }
        }
        result
    }

    /// Reads `count` consecutive devices.
    ///
    /// Word devices yield one value per register, signed for D/W/R/ZR/SD
    /// and unsigned for timer and counter current values. Bit devices
    /// yield 0 or 1.
    ///
    /// # Arguments
    ///
    /// * `device` - Device type to read
    /// * `start` - First device number
    /// * `count` - Number of points (at least 1)
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `count` is 0 or the range leaves the address field
    /// - the client is closed
    /// - communication fails
    /// - the controller returns a non-zero end code
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mc_protocol::{Client, ClientConfig, DeviceType};
    ///
    /// let client = Client::new(ClientConfig::new("192.168.1.10", 5007)).unwrap();
    /// let values = client.read_devices(DeviceType::D, 100, 10).unwrap();
    /// let relays = client.read_devices(DeviceType::M, 0, 16).unwrap();
    /// ```
    pub fn read_devices(&self, device: DeviceType, start: u32, count: usize) -> Result<Vec<i32>> {
        let requests = split_range(device, start, count)?
            .into_iter()
            .map(|(start, points)| Request::batch_read(device, start, points))
            .collect::<Result<Vec<_>>>()?;
        if requests.len() > 1 {
            tracing::debug!(
                device = %device,
                start,
                count,
                requests = requests.len(),
                "Splitting read"
            );
        }

        let mut values = Vec::with_capacity(count);
        for request in &requests {
            let response = self.execute(request)?;
            values.extend(response.to_values(device, usize::from(request.points))?);
        }
        Ok(values)
    }

    /// Reads a single device.
    ///
    /// # Errors
    ///
    /// Same as [`Client::read_devices`].
    pub fn read_device(&self, device: DeviceType, number: u32) -> Result<i32> {
        let values = self.read_devices(device, number, 1)?;
        values
            .first()
            .copied()
            .ok_or_else(|| McError::invalid_frame("empty read response"))
    }

    /// Writes a single device.
    ///
    /// # Errors
    ///
    /// Same as [`Client::write_devices`].
    pub fn write_device(&self, device: DeviceType, number: u32, value: i32) -> Result<()> {
        self.write_devices(device, number, &[value])
    }

    /// Writes consecutive devices starting at `start`.
    ///
    /// Word values must fit a 16-bit register (`-32768..=65535`). Bit
    /// values are ON when non-zero. Every value is checked before anything
    /// is sent.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `values` is empty, a value does not fit, or the range leaves the address field
    /// - the client is closed
    /// - communication fails
    /// - the controller returns a non-zero end code
    ///
    /// A failure after the first sub-request of a split write leaves the
    /// earlier sub-ranges written.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mc_protocol::{Client, ClientConfig, DeviceType};
    ///
    /// let client = Client::new(ClientConfig::new("192.168.1.10", 5007)).unwrap();
    /// client.write_devices(DeviceType::D, 200, &[100, 200, 300]).unwrap();
    /// client.write_devices(DeviceType::Y, 0x20, &[1, 0, 1]).unwrap();
    /// ```
    pub fn write_devices(&self, device: DeviceType, start: u32, values: &[i32]) -> Result<()> {
        let mut requests = Vec::new();
        let mut offset = 0;
        for (chunk_start, points) in split_range(device, start, values.len())? {
            requests.push(Request::batch_write(
                device,
                chunk_start,
                &values[offset..offset + points],
            )?);
            offset += points;
        }
        if requests.len() > 1 {
            tracing::debug!(
                device = %device,
                start,
                count = values.len(),
                requests = requests.len(),
                "Splitting write"
            );
        }

        for request in &requests {
            self.execute(request)?.check_end_code()?;
        }
        Ok(())
    }

    /// Writes text into consecutive word registers.
    ///
    /// The UTF-8 bytes are packed two per register, first byte in the low
    /// half; an odd length is padded with one zero byte. No terminator is
    /// added beyond that padding.
    ///
    /// # Errors
    ///
    /// Returns `McError::InvalidDevice` for a bit device and
    /// `McError::InvalidParameter` for an empty string, plus the errors of
    /// [`Client::write_devices`].
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mc_protocol::{Client, ClientConfig, DeviceType};
    ///
    /// let client = Client::new(ClientConfig::new("192.168.1.10", 5007)).unwrap();
    /// // "Hi!" occupies D1000 = 0x6948 and D1001 = 0x0021
    /// client.write_string(DeviceType::D, 1000, "Hi!").unwrap();
    /// ```
    pub fn write_string(&self, device: DeviceType, start: u32, text: &str) -> Result<()> {
        require_word_device(device, "strings need word devices")?;
        if text.is_empty() {
            return Err(McError::invalid_parameter("text", "must not be empty"));
        }
        let values: Vec<i32> = string_to_words(text).into_iter().map(i32::from).collect();
        self.write_devices(device, start, &values)
    }

    /// Reads text from `word_count` consecutive word registers.
    ///
    /// Decoding stops at the first zero byte; invalid UTF-8 is replaced.
    ///
    /// # Errors
    ///
    /// Returns `McError::InvalidDevice` for a bit device, plus the errors
    /// of [`Client::read_devices`].
    pub fn read_string(&self, device: DeviceType, start: u32, word_count: usize) -> Result<String> {
        let words = self.read_words(device, start, word_count)?;
        Ok(words_to_string(&words))
    }

    /// Reads bit devices as booleans.
    ///
    /// # Errors
    ///
    /// Returns `McError::InvalidDevice` for a word device, plus the errors
    /// of [`Client::read_devices`].
    pub fn read_bits(&self, device: DeviceType, start: u32, count: usize) -> Result<Vec<bool>> {
        if !device.is_bit() {
            return Err(McError::invalid_device(device, "not a bit device"));
        }
        let values = self.read_devices(device, start, count)?;
        Ok(values.into_iter().map(|v| v != 0).collect())
    }

    /// Writes bit devices from booleans.
    ///
    /// # Errors
    ///
    /// Returns `McError::InvalidDevice` for a word device, plus the errors
    /// of [`Client::write_devices`].
    pub fn write_bits(&self, device: DeviceType, start: u32, bits: &[bool]) -> Result<()> {
        if !device.is_bit() {
            return Err(McError::invalid_device(device, "not a bit device"));
        }
        let values: Vec<i32> = bits.iter().map(|b| i32::from(*b)).collect();
        self.write_devices(device, start, &values)
    }

    /// Reads word devices as raw 16-bit registers.
    ///
    /// # Errors
    ///
    /// Returns `McError::InvalidDevice` for a bit device, plus the errors
    /// of [`Client::read_devices`].
    pub fn read_words(&self, device: DeviceType, start: u32, count: usize) -> Result<Vec<u16>> {
        require_word_device(device, "not a word device")?;
        let values = self.read_devices(device, start, count)?;
        Ok(values.into_iter().map(|v| v as u16).collect())
    }

    /// Writes word devices from raw 16-bit registers.
    ///
    /// # Errors
    ///
    /// Returns `McError::InvalidDevice` for a bit device, plus the errors
    /// of [`Client::write_devices`].
    pub fn write_words(&self, device: DeviceType, start: u32, words: &[u16]) -> Result<()> {
        require_word_device(device, "not a word device")?;
        let values: Vec<i32> = words.iter().map(|w| i32::from(*w)).collect();
        self.write_devices(device, start, &values)
    }

    /// Closes the connection.
    ///
    /// Every later call fails with [`McError::ClientClosed`] without any
    /// I/O. Closing twice is a no-op.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.session.lock(), Session::Closed);
        match previous {
            Session::Closed => return,
            Session::Connected(transport) => transport.close(),
            Session::Disconnected => {}
        }
        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            "MC client closed"
        );
    }

    /// Returns `true` once [`Client::close`] has been called.
    pub fn is_closed(&self) -> bool {
        matches!(*self.session.lock(), Session::Closed)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.session.lock() {
            Session::Connected(_) => "connected",
            Session::Disconnected => "disconnected",
            Session::Closed => "closed",
        };
        f.debug_struct("Client")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("frame_type", &self.config.frame.frame_type)
            .field("state", &state)
            .finish()
    }
}

fn require_word_device(device: DeviceType, reason: &str) -> Result<()> {
    if device.is_word() {
        Ok(())
    } else {
        Err(McError::invalid_device(device, reason))
    }
}

/// Splits a range into contiguous `(start, points)` chunks that each fit
/// one request.
fn split_range(device: DeviceType, start: u32, count: usize) -> Result<Vec<(u32, usize)>> {
    check_range(device, start, count)?;
    let max = max_points(device);
    let mut chunks = Vec::with_capacity(count.div_ceil(max));
    let mut offset = 0;
    while offset < count {
        let points = max.min(count - offset);
        chunks.push((start + offset as u32, points));
        offset += points;
    }
    Ok(chunks)
}
