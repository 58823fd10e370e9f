//! Device type definitions for the MC protocol.
//!
//! A device is an addressable memory location on the controller. Each
//! [`DeviceType`] maps to a binary device code and is either word-oriented
//! (one 16-bit register per point) or bit-oriented (one relay per point).
//! The mapping lives in a single static table indexed by the enum, so the
//! codec never branches on the device type itself.
//!
//! # Device Table
//!
//! | Device | Description | Code | Access |
//! |--------|-------------|:----:|:------:|
//! | D | Data register | 0xA8 | word |
//! | W | Link register | 0xB4 | word |
//! | R | File register | 0xAF | word |
//! | ZR | File register (serial) | 0xB0 | word |
//! | SD | Special register | 0xA9 | word |
//! | TN | Timer current value | 0xC2 | word |
//! | SN | Retentive timer current value | 0xC8 | word |
//! | CN | Counter current value | 0xC5 | word |
//! | X | Input relay | 0x9C | bit |
//! | Y | Output relay | 0x9D | bit |
//! | M | Internal relay | 0x90 | bit |
//! | B | Link relay | 0xA0 | bit |
//! | L | Latch relay | 0x92 | bit |
//! | F | Annunciator | 0x93 | bit |
//! | V | Edge relay | 0x94 | bit |
//! | SM | Special relay | 0x91 | bit |
//! | TS | Timer contact | 0xC1 | bit |
//! | TC | Timer coil | 0xC0 | bit |
//! | SS | Retentive timer contact | 0xC7 | bit |
//! | SC | Retentive timer coil | 0xC6 | bit |
//! | CS | Counter contact | 0xC4 | bit |
//! | CC | Counter coil | 0xC3 | bit |
//!
//! # Example
//!
//! ```
//! use mc_protocol::DeviceType;
//!
//! assert!(DeviceType::M.is_bit());
//! assert!(!DeviceType::D.is_bit());
//! assert_eq!(DeviceType::D.code(), 0xA8);
//!
//! let device: DeviceType = "sm".parse().unwrap();
//! assert_eq!(device, DeviceType::SM);
//! assert_eq!(device.to_string(), "SM");
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{McError, Result};

/// Largest device number representable by the 3-byte address field.
pub const MAX_DEVICE_NUMBER: u32 = 0x00FF_FFFF;

/// How a device is accessed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// One 16-bit register per point.
    Word,
    /// One relay per point.
    Bit,
}

/// Device types available on the controller.
///
/// The declaration order is the index into the device table; keep the two
/// in step when adding a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceType {
    /// Data register.
    D,
    /// Link register.
    W,
    /// File register (block switching).
    R,
    /// File register (serial numbering).
    ZR,
    /// Special register.
    SD,
    /// Timer current value.
    TN,
    /// Retentive timer current value.
    SN,
    /// Counter current value.
    CN,
    /// Input relay.
    X,
    /// Output relay.
    Y,
    /// Internal relay.
    M,
    /// Link relay.
    B,
    /// Latch relay.
    L,
    /// Annunciator.
    F,
    /// Edge relay.
    V,
    /// Special relay.
    SM,
    /// Timer contact.
    TS,
    /// Timer coil.
    TC,
    /// Retentive timer contact.
    SS,
    /// Retentive timer coil.
    SC,
    /// Counter contact.
    CS,
    /// Counter coil.
    CC,
}

/// One row of the device table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DeviceInfo {
    pub(crate) device: DeviceType,
    pub(crate) mnemonic: &'static str,
    pub(crate) code: u8,
    pub(crate) access: Access,
    /// Word values are sign-extended from 16 bits when set.
    pub(crate) signed: bool,
}

const fn row(
    device: DeviceType,
    mnemonic: &'static str,
    code: u8,
    access: Access,
    signed: bool,
) -> DeviceInfo {
    DeviceInfo {
        device,
        mnemonic,
        code,
        access,
        signed,
    }
}

pub(crate) static DEVICE_TABLE: [DeviceInfo; 22] = [
    row(DeviceType::D, "D", 0xA8, Access::Word, true),
    row(DeviceType::W, "W", 0xB4, Access::Word, true),
    row(DeviceType::R, "R", 0xAF, Access::Word, true),
    row(DeviceType::ZR, "ZR", 0xB0, Access::Word, true),
    row(DeviceType::SD, "SD", 0xA9, Access::Word, true),
    row(DeviceType::TN, "TN", 0xC2, Access::Word, false),
    row(DeviceType::SN, "SN", 0xC8, Access::Word, false),
    row(DeviceType::CN, "CN", 0xC5, Access::Word, false),
    row(DeviceType::X, "X", 0x9C, Access::Bit, false),
    row(DeviceType::Y, "Y", 0x9D, Access::Bit, false),
    row(DeviceType::M, "M", 0x90, Access::Bit, false),
    row(DeviceType::B, "B", 0xA0, Access::Bit, false),
    row(DeviceType::L, "L", 0x92, Access::Bit, false),
    row(DeviceType::F, "F", 0x93, Access::Bit, false),
    row(DeviceType::V, "V", 0x94, Access::Bit, false),
    row(DeviceType::SM, "SM", 0x91, Access::Bit, false),
    row(DeviceType::TS, "TS", 0xC1, Access::Bit, false),
    row(DeviceType::TC, "TC", 0xC0, Access::Bit, false),
    row(DeviceType::SS, "SS", 0xC7, Access::Bit, false),
    row(DeviceType::SC, "SC", 0xC6, Access::Bit, false),
    row(DeviceType::CS, "CS", 0xC4, Access::Bit, false),
    row(DeviceType::CC, "CC", 0xC3, Access::Bit, false),
];

impl DeviceType {
    /// Every supported device type, in table order.
    pub fn all() -> impl Iterator<Item = DeviceType> {
        DEVICE_TABLE.iter().map(|info| info.device)
    }

    pub(crate) fn info(self) -> &'static DeviceInfo {
        &DEVICE_TABLE[self as usize]
    }

    /// Returns the binary device code used in request frames.
    pub fn code(self) -> u8 {
        self.info().code
    }

    /// Returns the device mnemonic (`"D"`, `"SM"`, ...).
    pub fn mnemonic(self) -> &'static str {
        self.info().mnemonic
    }

    /// Returns how this device is accessed on the wire.
    pub fn access(self) -> Access {
        self.info().access
    }

    /// Returns whether this is a bit device.
    ///
    /// # Example
    ///
    /// ```
    /// use mc_protocol::DeviceType;
    ///
    /// assert!(DeviceType::X.is_bit());
    /// assert!(!DeviceType::SD.is_bit());
    /// ```
    pub fn is_bit(self) -> bool {
        self.access() == Access::Bit
    }

    /// Returns whether this is a word device.
    pub fn is_word(self) -> bool {
        self.access() == Access::Word
    }

    /// Converts a raw 16-bit register into the value callers see.
    ///
    /// Data, link, file and special registers are read as signed 16-bit;
    /// timer and counter current values are unsigned.
    pub fn word_value(self, raw: u16) -> i32 {
        if self.info().signed {
            i32::from(raw as i16)
        } else {
            i32::from(raw)
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl FromStr for DeviceType {
    type Err = McError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        DEVICE_TABLE
            .iter()
            .find(|info| info.mnemonic.eq_ignore_ascii_case(wanted))
            .map(|info| info.device)
            .ok_or_else(|| McError::UnsupportedDevice {
                name: s.to_string(),
            })
    }
}

/// A typed, numbered device location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress {
    /// Device type.
    pub device: DeviceType,
    /// Device number (0 to [`MAX_DEVICE_NUMBER`]).
    pub number: u32,
}

impl DeviceAddress {
    /// Creates a device address, checking the number fits the address field.
    ///
    /// # Errors
    ///
    /// Returns `McError::AddressOutOfRange` if `number` exceeds
    /// [`MAX_DEVICE_NUMBER`].
    ///
    /// # Example
    ///
    /// ```
    /// use mc_protocol::{DeviceAddress, DeviceType};
    ///
    /// let addr = DeviceAddress::new(DeviceType::D, 100).unwrap();
    /// assert_eq!(addr.to_string(), "D100");
    /// assert!(DeviceAddress::new(DeviceType::D, 0x0100_0000).is_err());
    /// ```
    pub fn new(device: DeviceType, number: u32) -> Result<Self> {
        check_range(device, number, 1)?;
        Ok(Self { device, number })
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.device, self.number)
    }
}

/// Checks that `count` points starting at `start` all fit the address field.
///
/// # Errors
///
/// Returns `McError::InvalidParameter` for a zero count and
/// `McError::AddressOutOfRange` when the last point is past
/// [`MAX_DEVICE_NUMBER`].
pub fn check_range(device: DeviceType, start: u32, count: usize) -> Result<()> {
    if count == 0 {
        return Err(McError::invalid_parameter(
            "count",
            "must be greater than 0",
        ));
    }
    let last = u64::from(start) + count as u64 - 1;
    if last > u64::from(MAX_DEVICE_NUMBER) {
        return Err(McError::address_out_of_range(device, start, count));
    }
    Ok(())
}
