//! Hex and byte-order helpers shared by the parser and the telemetry decoder.
//!
//! Payload fields travel as lower-case hex strings, two characters per
//! byte, so byte-order conversion works on character pairs.

use crate::error::{Error, Result};

/// Reverse the byte order of a hex string.
///
/// Converts a little-endian hex string to big-endian (and back, since the
/// operation is its own inverse). A trailing odd character is kept as the
/// first chunk of the result.
///
/// # Example
///
/// ```
/// use capsync_ble::to_big_endian;
///
/// assert_eq!(to_big_endian("27011e4282000d12"), "120d0082421e0127");
/// ```
pub fn to_big_endian(hex: &str) -> String {
    let bytes = hex.as_bytes();
    let mut out = String::with_capacity(hex.len());
    for chunk in bytes.chunks(2).rev() {
        // chunks of an ASCII string are valid UTF-8
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
    }
    out
}

/// Parse one hex byte (exactly two hex digits).
pub fn hex_byte(hex: &str) -> Result<u8> {
    // from_str_radix alone lets a leading sign through.
    if hex.len() != 2 || !all_hex_digits(hex) {
        return Err(Error::invalid_data(format!(
            "expected 2 hex digits, got {:?}",
            hex
        )));
    }
    u8::from_str_radix(hex, 16)
        .map_err(|_| Error::invalid_data(format!("not a hex byte: {:?}", hex)))
}

/// Parse a little-endian hex field of up to four bytes as an integer.
///
/// # Example
///
/// ```
/// use capsync_ble::le_hex_to_u32;
///
/// assert_eq!(le_hex_to_u32("102700").unwrap(), 10_000);
/// ```
pub fn le_hex_to_u32(hex: &str) -> Result<u32> {
    if hex.len() > 8 || !is_hex(hex) {
        return Err(Error::invalid_data(format!(
            "little-endian field must be 1-4 hex bytes, got {:?}",
            hex
        )));
    }
    u32::from_str_radix(&to_big_endian(hex), 16)
        .map_err(|_| Error::invalid_data(format!("not a hex field: {:?}", hex)))
}

/// Render a hex byte as dotted decimal, one component per decimal digit.
///
/// Firmware versions are encoded this way: `0x17` (23) reads as `2.3`.
///
/// # Example
///
/// ```
/// use capsync_ble::hex_to_dotted_decimal;
///
/// assert_eq!(hex_to_dotted_decimal("17").unwrap(), "2.3");
/// assert_eq!(hex_to_dotted_decimal("7b").unwrap(), "1.2.3");
/// ```
pub fn hex_to_dotted_decimal(hex: &str) -> Result<String> {
    if hex.is_empty() || !all_hex_digits(hex) {
        return Err(Error::invalid_data(format!("not a hex value: {:?}", hex)));
    }
    let value = u32::from_str_radix(hex, 16)
        .map_err(|_| Error::invalid_data(format!("not a hex value: {:?}", hex)))?;
    let digits: Vec<String> = value.to_string().chars().map(String::from).collect();
    Ok(digits.join("."))
}

/// Check that a string is non-empty, even-length hex.
pub fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.len() % 2 == 0 && all_hex_digits(s)
}

fn all_hex_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_hexdigit())
}
