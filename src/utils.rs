//! Utility functions for packing device data.
//!
//! Bit devices travel two points per byte (one point per nibble, first
//! point in the low nibble). Strings travel two bytes per word register,
//! first byte in the low half.
//!
//! # Example
//!
//! ```
//! use mc_protocol::utils::{pack_bits, string_to_words, unpack_bits, words_to_string};
//!
//! let packed = pack_bits(&[1, 0, 1]);
//! assert_eq!(packed, vec![0x01, 0x01]);
//! assert_eq!(unpack_bits(&packed, 3), vec![1, 0, 1]);
//!
//! let words = string_to_words("Hi!");
//! assert_eq!(words, vec![0x6948, 0x0021]);
//! assert_eq!(words_to_string(&words), "Hi!");
//! ```

/// Packs bit values two per byte, first point in the low nibble.
///
/// Any non-zero value is written as ON. An odd count leaves the high
/// nibble of the final byte zero.
///
/// # Example
///
/// ```
/// use mc_protocol::utils::pack_bits;
///
/// assert_eq!(pack_bits(&[1, 1]), vec![0x11]);
/// assert_eq!(pack_bits(&[0, 5]), vec![0x10]);
/// ```
pub fn pack_bits(values: &[i32]) -> Vec<u8> {
    values
        .chunks(2)
        .map(|pair| {
            let low = u8::from(pair[0] != 0);
            let high = pair.get(1).map_or(0, |v| u8::from(*v != 0));
            low | (high << 4)
        })
        .collect()
}

/// Unpacks `points` nibble-packed bit values.
///
/// The caller checks that `data` holds at least `points.div_ceil(2)` bytes.
pub fn unpack_bits(data: &[u8], points: usize) -> Vec<i32> {
    (0..points)
        .map(|i| {
            let byte = data[i / 2];
            let nibble = if i % 2 == 0 { byte & 0x0F } else { byte >> 4 };
            i32::from(nibble & 0x01)
        })
        .collect()
}

/// Number of bytes needed for `points` nibble-packed bits.
#[inline]
pub fn packed_bits_len(points: usize) -> usize {
    points.div_ceil(2)
}

/// Packs a string into word registers, two bytes per register.
///
/// The first byte lands in the low half of each register. An odd byte
/// count is padded with a single zero byte. Returns an empty vector for an
/// empty string.
///
/// # Example
///
/// ```
/// use mc_protocol::utils::string_to_words;
///
/// assert_eq!(string_to_words("Hi"), vec![0x6948]);
/// assert_eq!(string_to_words("ABC"), vec![0x4241, 0x0043]);
/// ```
pub fn string_to_words(text: &str) -> Vec<u16> {
    text.as_bytes()
        .chunks(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
        .collect()
}

/// Unpacks word registers into a string.
///
/// Bytes are taken low half first and decoding stops at the first zero
/// byte. Invalid UTF-8 is replaced rather than rejected.
///
/// # Example
///
/// ```
/// use mc_protocol::utils::words_to_string;
///
/// assert_eq!(words_to_string(&[0x6948, 0x0021, 0x4141]), "Hi!");
/// ```
pub fn words_to_string(words: &[u16]) -> String {
    let bytes: Vec<u8> = words
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .take_while(|byte| *byte != 0)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Formats bytes as space-separated uppercase hex, for frame tracing.
///
/// # Example
///
/// ```
/// use mc_protocol::utils::format_hex;
///
/// assert_eq!(format_hex(&[0x50, 0x00, 0xFF]), "50 00 FF");
/// ```
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
