//! Telemetry decoding.
//!
//! A reassembled message is 22 bytes. Offsets below are in hex characters:
//!
//! | Range | Field |
//! |---|---|
//! | 0..2 | payload version |
//! | 4..6 | reserved, `00` for a cCap device |
//! | 6..8 | firmware version, one decimal digit per component |
//! | 8..24 | device id, little-endian |
//! | 24..30 | time reference, little-endian |
//! | 32..34 | temperature |
//! | 34..38 | event ordinal number, little-endian |
//! | 38..40 | error bitmask |

use crate::error::{Error, Result};
use crate::utils::{hex_byte, hex_to_dotted_decimal, is_hex, le_hex_to_u32, to_big_endian};

/// Device-side failure causes reported in the error bitmask.
///
/// Bits are independent; several can be set at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceErrors(pub u8);

impl DeviceErrors {
    /// Real-time clock failure.
    pub const CLOCK: u8 = 0x01;
    /// Log data could not be written to flash.
    pub const LOG_WRITE: u8 = 0x02;
    /// BLE radio failure.
    pub const RADIO: u8 = 0x04;
    /// HMAC key data integrity failure.
    pub const HMAC_INTEGRITY: u8 = 0x08;
    /// Device identifier integrity failure.
    pub const IDENTIFIER_INTEGRITY: u8 = 0x10;

    const KNOWN: [(u8, &'static str); 5] = [
        (Self::CLOCK, "Real-time clock failure"),
        (Self::LOG_WRITE, "Cannot write log data to flash"),
        (Self::RADIO, "BLE radio failure"),
        (
            Self::HMAC_INTEGRITY,
            "HMAC key data integrity failure. The beacon data is invalid.",
        ),
        (
            Self::IDENTIFIER_INTEGRITY,
            "Device ID data integrity failure. The Device ID is invalid.",
        ),
    ];

    /// Create from the raw bitmask.
    pub fn new(bits: u8) -> Self {
        Self(bits)
    }

    /// Check if any bit is set.
    pub fn is_error(&self) -> bool {
        self.0 != 0
    }

    /// Check if a specific cause is flagged.
    pub fn contains(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    /// Messages for every known bit that is set.
    pub fn messages(&self) -> Vec<&'static str> {
        Self::KNOWN
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, msg)| *msg)
            .collect()
    }

    /// Amount added to the session error tally: 0 without error, else 1.
    pub fn failure_count(&self) -> u32 {
        u32::from(self.is_error())
    }

    /// Human-readable description of the bitmask.
    pub fn describe(&self) -> String {
        if !self.is_error() {
            return "No error".to_string();
        }
        let messages = self.messages();
        if messages.is_empty() {
            "Unknown error".to_string()
        } else {
            messages.join(", ")
        }
    }
}

/// Fields decoded from a verified-or-not reassembled message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DecodedTelemetry {
    /// Payload version byte, as hex.
    pub payload_version: String,
    /// Device type, when the reserved byte identifies one.
    pub device_type: Option<String>,
    /// Firmware version in dotted decimal.
    pub firmware_version: String,
    /// Device identifier, big-endian hex.
    pub device_id: String,
    /// Device time reference.
    pub time_reference: u32,
    /// Temperature reading.
    pub temperature: u8,
    /// Event ordinal number.
    pub event_ordinal: u16,
    /// Error bitmask.
    pub errors: DeviceErrors,
}

impl DecodedTelemetry {
    /// Minimum message length in hex characters.
    pub const MIN_HEX_LEN: usize = 40;

    /// Decode a message given as hex.
    pub fn decode(message_hex: &str) -> Result<Self> {
        if message_hex.len() < Self::MIN_HEX_LEN || !message_hex.is_ascii() {
            return Err(Error::invalid_data(format!(
                "telemetry message too short: {} hex chars (need at least {})",
                message_hex.len(),
                Self::MIN_HEX_LEN
            )));
        }
        let m = message_hex.to_ascii_lowercase();

        hex_byte(&m[0..2])?;
        let device_type = match hex_byte(&m[4..6])? {
            0x00 => Some("cCap".to_string()),
            _ => None,
        };
        let device_id = &m[8..24];
        if !is_hex(device_id) {
            return Err(Error::invalid_data(format!("bad device id {:?}", device_id)));
        }

        Ok(Self {
            payload_version: m[0..2].to_string(),
            device_type,
            firmware_version: hex_to_dotted_decimal(&m[6..8])?,
            device_id: to_big_endian(device_id),
            time_reference: le_hex_to_u32(&m[24..30])?,
            temperature: hex_byte(&m[32..34])?,
            event_ordinal: le_hex_to_u32(&m[34..38])? as u16,
            errors: DeviceErrors::new(hex_byte(&m[38..40])?),
        })
    }
}
