//! In-process fake controller for integration tests.
//!
//! Answers batch reads and writes from an in-memory device table using the
//! crate's own codec, and can be told to misbehave.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mc_protocol::codec::{decode_request, encode_response};
use mc_protocol::utils::{pack_bits, unpack_bits};
use mc_protocol::{
    ClientConfig, DeviceType, FrameHeader, FrameType, Request, CMD_BATCH_READ, CMD_BATCH_WRITE,
    SUBCMD_BIT,
};
use parking_lot::Mutex;

/// Error information a controller appends to a failed response.
const ERROR_INFO: [u8; 9] = [0x00, 0xFF, 0xFF, 0x03, 0x00, 0x01, 0x04, 0x00, 0x00];

#[derive(Default)]
struct PlcState {
    memory: HashMap<(DeviceType, u32), u16>,
    requests: Vec<(FrameHeader, Request)>,
    connections: usize,
    /// Requests to let through before answering with the end code.
    fail_countdown: Option<(usize, u16)>,
    corrupt_serial: bool,
    drop_next: bool,
    stall_next: bool,
    short_next: bool,
}

/// Fake controller listening on a loopback port.
#[derive(Clone)]
pub struct FakePlc {
    port: u16,
    frame_type: FrameType,
    state: Arc<Mutex<PlcState>>,
}

impl FakePlc {
    /// Starts listening; every accepted connection is served on its own thread.
    pub fn start(frame_type: FrameType) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let plc = Self {
            port,
            frame_type,
            state: Arc::new(Mutex::new(PlcState::default())),
        };

        let server = plc.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { return };
                server.state.lock().connections += 1;
                let connection = server.clone();
                thread::spawn(move || connection.serve(stream));
            }
        });
        plc
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new("127.0.0.1", self.port)
            .with_frame_type(self.frame_type)
            .with_timeout(Duration::from_secs(2))
    }

    pub fn set(&self, device: DeviceType, number: u32, value: u16) {
        self.state.lock().memory.insert((device, number), value);
    }

    pub fn get(&self, device: DeviceType, number: u32) -> Option<u16> {
        self.state.lock().memory.get(&(device, number)).copied()
    }

    pub fn requests(&self) -> Vec<(FrameHeader, Request)> {
        self.state.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    /// Answers the next request with `end_code`.
    pub fn fail_next(&self, end_code: u16) {
        self.fail_after(0, end_code);
    }

    /// Serves `successes` requests normally, then answers one with `end_code`.
    pub fn fail_after(&self, successes: usize, end_code: u16) {
        self.state.lock().fail_countdown = Some((successes, end_code));
    }

    pub fn corrupt_serial(&self, on: bool) {
        self.state.lock().corrupt_serial = on;
    }

    /// Closes the connection instead of answering the next request.
    pub fn drop_next(&self) {
        self.state.lock().drop_next = true;
    }

    /// Answers the next request with one data byte missing.
    pub fn short_next(&self) {
        self.state.lock().short_next = true;
    }

    /// Leaves the next request unanswered.
    pub fn stall_next(&self) {
        self.state.lock().stall_next = true;
    }

    fn serve(&self, mut stream: TcpStream) {
        let header_len = self.frame_type.header_len();
        loop {
            let mut frame = vec![0u8; header_len];
            if stream.read_exact(&mut frame).is_err() {
                return;
            }
            let data_length = u16::from_le_bytes([frame[header_len - 2], frame[header_len - 1]]);
            let mut body = vec![0u8; usize::from(data_length)];
            if stream.read_exact(&mut body).is_err() {
                return;
            }
            frame.extend_from_slice(&body);

            let decoded = decode_request(self.frame_type, &frame).unwrap().unwrap();
            let reply = {
                let mut state = self.state.lock();
                state
                    .requests
                    .push((decoded.header, decoded.request.clone()));

                if std::mem::take(&mut state.drop_next) {
                    return;
                }
                if std::mem::take(&mut state.stall_next) {
                    None
                } else {
                    Some(state.answer(decoded.header, &decoded.request))
                }
            };

            match reply {
                Some(reply) => {
                    if stream.write_all(&reply).is_err() {
                        return;
                    }
                }
                None => thread::sleep(Duration::from_millis(500)),
            }
        }
    }
}

impl PlcState {
    fn answer(&mut self, request_header: FrameHeader, request: &Request) -> Vec<u8> {
        let mut header = request_header;
        if self.corrupt_serial {
            header.serial = header.serial.wrapping_add(1);
        }

        if let Some((remaining, end_code)) = self.fail_countdown {
            if remaining == 0 {
                self.fail_countdown = None;
                return encode_response(&header, end_code, &ERROR_INFO).unwrap();
            }
            self.fail_countdown = Some((remaining - 1, end_code));
        }

        let device = request.device;
        let numbers = request.start..request.start + u32::from(request.points);
        let mut payload = match request.command {
            CMD_BATCH_READ => {
                let raw: Vec<u16> = numbers
                    .map(|n| self.memory.get(&(device, n)).copied().unwrap_or(0))
                    .collect();
                if device.is_bit() && request.subcommand == SUBCMD_BIT {
                    let bits: Vec<i32> = raw.iter().map(|v| i32::from(*v)).collect();
                    pack_bits(&bits)
                } else {
                    raw.iter().flat_map(|v| v.to_le_bytes()).collect()
                }
            }
            CMD_BATCH_WRITE => {
                let data = request.payload.clone().unwrap_or_default();
                let points = usize::from(request.points);
                let values: Vec<u16> = if device.is_word() {
                    data.chunks_exact(2)
                        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                        .collect()
                } else if request.subcommand == SUBCMD_BIT {
                    unpack_bits(&data, points).into_iter().map(|v| v as u16).collect()
                } else {
                    data.iter().map(|b| u16::from(b & 0x01)).collect()
                };
                for (number, value) in numbers.zip(values) {
                    self.memory.insert((device, number), value);
                }
                Vec::new()
            }
            _ => return encode_response(&header, 0xC059, &ERROR_INFO).unwrap(),
        };
        if std::mem::take(&mut self.short_next) {
            payload.pop();
        }
        encode_response(&header, 0, &payload).unwrap()
    }
}
