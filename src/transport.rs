//! TCP transport layer for MC protocol communication.
//!
//! This module provides [`TcpTransport`], which owns one TCP connection to a
//! controller and exchanges one request/response pair at a time. It knows
//! about sockets and bytes only; where a response ends is decided by a
//! framing callback supplied by the caller (normally
//! [`codec::response_frame_len`](crate::codec::response_frame_len)).
//!
//! # Design
//!
//! - **One request in flight** - `send_and_receive` takes `&mut self`, so
//!   callers sharing a transport must serialize access themselves
//! - **Synchronous** - blocking send/receive, each bounded by the timeout
//! - **Distinct failures** - a timeout is reported as [`McError::Timeout`],
//!   a peer that hangs up as [`McError::ConnectionClosed`]
//!
//! # Example
//!
//! ```no_run
//! use mc_protocol::codec::response_frame_len;
//! use mc_protocol::{FrameType, TcpTransport};
//! use std::time::Duration;
//!
//! let mut transport = TcpTransport::connect("192.168.1.10", 5007, Duration::from_secs(2)).unwrap();
//! let request = vec![0x50, 0x00, /* ... rest of the frame */];
//! let response = transport
//!     .send_and_receive(&request, |buf| response_frame_len(FrameType::E3, buf))
//!     .unwrap();
//! ```

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::error::{McError, Result};
use crate::utils::format_hex;

/// Default timeout for connect, send and receive.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Read buffer size. Responses longer than this arrive over several reads.
const READ_CHUNK_SIZE: usize = 2048;

/// TCP transport for MC protocol communication.
pub struct TcpTransport {
    stream: TcpStream,
    remote_addr: SocketAddr,
    timeout: Duration,
}

impl TcpTransport {
    /// Opens a connection to the controller.
    ///
    /// Every address `host` resolves to is tried in turn until one accepts.
    ///
    /// # Arguments
    ///
    /// * `host` - Host name or IP address of the controller
    /// * `port` - TCP port configured for MC protocol on the controller
    /// * `timeout` - Bound for the connect and for each send and receive
    ///
    /// # Errors
    ///
    /// Returns `McError::InvalidParameter` for a zero timeout,
    /// `McError::Timeout` if no address accepted in time, or the I/O error
    /// of the last attempt.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(McError::invalid_parameter(
                "timeout",
                "must be greater than zero",
            ));
        }

        let mut last_error = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Self::from_stream(stream, timeout),
                Err(e) => {
                    tracing::debug!(addr = %addr, error = %e, "Connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => map_io_error(e),
            None => McError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{host}:{port} did not resolve to any address"),
            )),
        })
    }

    /// Wraps an already connected stream.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the socket options cannot be set.
    pub fn from_stream(stream: TcpStream, timeout: Duration) -> Result<Self> {
        let remote_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        tracing::info!(remote_addr = %remote_addr, "Connected to PLC");

        Ok(Self {
            stream,
            remote_addr,
            timeout,
        })
    }

    /// Sends a frame and reads back one complete response.
    ///
    /// Bytes are accumulated until `frame_len` reports the size of the
    /// response and that many bytes are present. `frame_len` returns
    /// `Ok(None)` while it needs more bytes to decide.
    ///
    /// # Errors
    ///
    /// - `McError::Timeout` if the send or the whole receive exceeds the timeout
    /// - `McError::ConnectionClosed` if the peer closes before the frame is complete
    /// - any error returned by `frame_len`
    /// - other I/O errors
    pub fn send_and_receive<F>(&mut self, data: &[u8], frame_len: F) -> Result<Vec<u8>>
    where
        F: Fn(&[u8]) -> Result<Option<usize>>,
    {
        tracing::trace!(frame = %format_hex(data), "Sending frame");
        self.stream.write_all(data).map_err(map_io_error)?;

        let deadline = Instant::now() + self.timeout;
        let mut buffer = Vec::with_capacity(READ_CHUNK_SIZE);
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            if let Some(total) = frame_len(&buffer)? {
                if buffer.len() >= total {
                    buffer.truncate(total);
                    tracing::trace!(frame = %format_hex(&buffer), "Received frame");
                    return Ok(buffer);
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(McError::Timeout);
            }
            self.stream.set_read_timeout(Some(remaining))?;

            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(McError::ConnectionClosed),
                Ok(n) => buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(map_io_error(e)),
            }
        }
    }

    /// Shuts the connection down.
    pub fn close(self) {
        // the peer may already be gone
        let _ = self.stream.shutdown(Shutdown::Both);
        tracing::debug!(remote_addr = %self.remote_addr, "Connection closed");
    }

    /// Returns the remote controller address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Returns the configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("remote_addr", &self.remote_addr)
            .field("local_addr", &self.stream.local_addr().ok())
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn map_io_error(e: io::Error) -> McError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => McError::Timeout,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => McError::ConnectionClosed,
        _ => McError::Io(e),
    }
}
