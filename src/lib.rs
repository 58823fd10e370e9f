//! # MC Protocol Library
//!
//! A Rust library for reading and writing Mitsubishi-style PLC devices over
//! the MC protocol (binary 3E and 4E frames over TCP), with a change monitor
//! that polls watched devices and reports new values.
//!
//! ## Features
//!
//! - **3E and 4E frames** - 4E serial numbers are checked on every response
//! - **Typed devices** - device types as an enum backed by one static table
//! - **No panics** - all errors returned as `Result<T, McError>`
//! - **Raw end codes** - controller errors surface verbatim as [`McError::PlcError`]
//! - **Change monitor** - batched polling with baseline suppression and ordered callbacks
//! - **Simulator helpers** - the codec also decodes requests and encodes responses
//!
//! ## Quick Start
//!
//! ```no_run
//! use mc_protocol::{Client, ClientConfig, DeviceType};
//!
//! fn main() -> mc_protocol::Result<()> {
//!     let client = Client::new(ClientConfig::new("192.168.1.10", 5007))?;
//!
//!     // Read 10 registers from D100
//!     let values = client.read_devices(DeviceType::D, 100, 10)?;
//!     println!("D100-D109: {:?}", values);
//!
//!     // Write registers and relays
//!     client.write_devices(DeviceType::D, 200, &[1, -2, 3])?;
//!     client.write_device(DeviceType::M, 10, 1)?;
//!
//!     // Strings are packed two bytes per register
//!     client.write_string(DeviceType::D, 1000, "Hi!")?;
//!
//!     client.close();
//!     Ok(())
//! }
//! ```
//!
//! ## 4E Frames
//!
//! ```no_run
//! use mc_protocol::{Client, ClientConfig, FrameType};
//!
//! let config = ClientConfig::new("192.168.1.10", 5007)
//!     .with_frame_type(FrameType::E4)
//!     .with_network_no(0)
//!     .with_pc_no(0xFF)
//!     .with_unit_io(0x03FF)
//!     .with_unit_station(0);
//! let client = Client::new(config)?;
//! # Ok::<(), mc_protocol::McError>(())
//! ```
//!
//! ## Devices
//!
//! | Word devices | Bit devices |
//! |--------------|-------------|
//! | D, W, R, ZR, SD, TN, SN, CN | X, Y, M, B, L, F, V, SM, TS, TC, SS, SC, CS, CC |
//!
//! D, W, R, ZR and SD are read as signed 16-bit values, timer and counter
//! current values (TN, SN, CN) as unsigned. Bit devices read as 0 or 1.
//!
//! ## Monitoring
//!
//! ```no_run
//! use mc_protocol::{Client, ClientConfig, DeviceType, Monitor};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let client = Arc::new(Client::new(ClientConfig::new("192.168.1.10", 5007))?);
//! let monitor = Monitor::new(Arc::clone(&client));
//!
//! monitor.add_device(DeviceType::M, 0, |device, number, old, new| {
//!     println!("{device}{number} changed {old} -> {new}");
//! })?;
//! monitor.on_error(|device, start, err| eprintln!("read of {device}{start} failed: {err}"));
//! monitor.start(Duration::from_millis(200))?;
//!
//! // the client stays usable for direct calls
//! client.write_device(DeviceType::M, 0, 1)?;
//!
//! monitor.stop();
//! # Ok::<(), mc_protocol::McError>(())
//! ```
//!
//! ## Error Handling
//!
//! ```no_run
//! use mc_protocol::{end_code_description, Client, ClientConfig, DeviceType, McError};
//!
//! let client = Client::new(ClientConfig::new("192.168.1.10", 5007))?;
//! match client.read_devices(DeviceType::D, 100, 1) {
//!     Ok(values) => println!("{values:?}"),
//!     Err(McError::PlcError { end_code }) => {
//!         eprintln!("PLC rejected the request: 0x{end_code:04X} {:?}", end_code_description(end_code));
//!     }
//!     Err(e) if e.is_transport() => eprintln!("connection problem: {e}"),
//!     Err(e) => eprintln!("error: {e}"),
//! }
//! # Ok::<(), McError>(())
//! ```
//!
//! ## Logging
//!
//! The crate logs through [`tracing`](https://docs.rs/tracing) and never
//! installs a subscriber. Connections and monitor start/stop are logged at
//! `info`, failed or overrunning poll cycles at `warn`.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod client;
pub mod codec;
mod command;
mod device;
mod error;
mod header;
mod monitor;
mod response;
mod transport;
pub mod utils;

pub use client::{Client, ClientConfig};
pub use command::{
    max_points, Request, CMD_BATCH_READ, CMD_BATCH_WRITE, MAX_BIT_POINTS, MAX_WORD_POINTS,
    SUBCMD_BIT, SUBCMD_WORD,
};
pub use device::{check_range, Access, DeviceAddress, DeviceType, MAX_DEVICE_NUMBER};
pub use error::{end_code_description, McError, Result};
pub use header::{
    FrameDescriptor, FrameHeader, FrameType, DEFAULT_MONITORING_TIMER, DEFAULT_PC_NO,
    DEFAULT_UNIT_IO,
};
pub use monitor::{DeviceReader, Monitor, WatchCallback};
pub use response::Response;
pub use transport::{TcpTransport, DEFAULT_TIMEOUT};
