//! Advertising report parsing.
//!
//! Extracts the fields of one LE advertising report from a raw dump frame.
//! Fields are located by fixed token position in the joined frame:
//!
//! | Token | Field |
//! |---|---|
//! | 0-2 | `> 04 3E` marker |
//! | 6 | event type |
//! | 8-13 | advertiser address, least significant byte first |
//! | 15 | length of the first AD structure |
//! | 15.. | AD structure, length byte included |
//! | last | RSSI (signed byte) |

use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::ble::frame_reader::RawFrame;
use crate::error::{Error, Result};
use crate::utils::{hex_byte, to_big_endian};

/// Token index of the event type code.
pub const EVENT_KIND_INDEX: usize = 6;

/// Token range of the advertiser address.
pub const ADDRESS_RANGE: Range<usize> = 8..14;

/// Token index of the AD structure length byte.
pub const DATA_LENGTH_INDEX: usize = 15;

/// Token range of the device identifier embedded in the payload.
pub const IDENTITY_RANGE: Range<usize> = 23..31;

/// Manufacturer-specific AD type followed by company id 0x0C13.
const SHL_MANUFACTURER_PREFIX: &str = "ff130c";

/// Advertising event type from the LE advertising report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum EventKind {
    /// ADV_IND.
    ConnectableUndirected = 0x00,
    /// ADV_DIRECT_IND.
    ConnectableDirected = 0x01,
    /// ADV_SCAN_IND. Carries the first payload fragment.
    ScannableUndirected = 0x02,
    /// ADV_NONCONN_IND.
    NonConnectableUndirected = 0x03,
    /// SCAN_RSP. Carries the second payload fragment.
    ScanResponse = 0x04,
    /// Anything else.
    Unknown = 0xFF,
}

impl EventKind {
    /// Create from raw byte value.
    pub fn from_raw(value: u8) -> Self {
        match value {
            0x00 => Self::ConnectableUndirected,
            0x01 => Self::ConnectableDirected,
            0x02 => Self::ScannableUndirected,
            0x03 => Self::NonConnectableUndirected,
            0x04 => Self::ScanResponse,
            _ => Self::Unknown,
        }
    }

    /// Create from the two-digit hex token of the dump.
    pub fn from_code(code: &str) -> Self {
        hex_byte(code).map(Self::from_raw).unwrap_or(Self::Unknown)
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectableUndirected => "Connectable undirected advertising",
            Self::ConnectableDirected => "Connectable directed advertising",
            Self::ScannableUndirected => "Scannable undirected advertising",
            Self::NonConnectableUndirected => "Non-connectable undirected advertising",
            Self::ScanResponse => "Scan Response",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if packets of this kind carry a payload fragment.
    pub fn carries_fragment(&self) -> bool {
        matches!(self, Self::ScannableUndirected | Self::ScanResponse)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A Bluetooth device address in network (display) byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BdAddr(pub [u8; 6]);

impl BdAddr {
    /// Build from the six dump tokens, which are least significant first.
    pub fn from_le_tokens(tokens: &[&str]) -> Result<Self> {
        if tokens.len() != 6 {
            return Err(Error::frame_parse(format!(
                "address needs 6 tokens, got {}",
                tokens.len()
            )));
        }
        let mut bytes = [0u8; 6];
        for (slot, token) in bytes.iter_mut().zip(tokens.iter().rev()) {
            *slot = hex_byte(token)
                .map_err(|_| Error::frame_parse(format!("bad address byte {:?}", token)))?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for BdAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(Error::InvalidParameter {
                name: "address".to_string(),
                value: s.to_string(),
            });
        }
        let mut bytes = [0u8; 6];
        for (slot, part) in bytes.iter_mut().zip(parts) {
            *slot = hex_byte(part).map_err(|_| Error::InvalidParameter {
                name: "address".to_string(),
                value: s.to_string(),
            })?;
        }
        Ok(Self(bytes))
    }
}

/// One decoded advertising report.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvertisingPacket {
    /// Advertiser address.
    pub source_address: BdAddr,
    /// Signal strength in dBm.
    pub rssi: i8,
    /// Event type.
    pub event_kind: EventKind,
    /// First AD structure as lower-case hex, length byte included.
    pub payload_hex: String,
    /// Monotonic capture time.
    pub captured_at: Instant,
    /// Wall-clock capture time, for display.
    pub received_at: DateTime<Utc>,
    /// The frame text, kept for diagnostics.
    pub raw_frame: String,
}

impl AdvertisingPacket {
    /// Parse a frame, stamping it with the current time.
    pub fn parse(frame: &RawFrame) -> Result<Self> {
        Self::parse_at(frame, Instant::now(), Utc::now())
    }

    /// Parse a frame with explicit capture timestamps.
    pub fn parse_at(
        frame: &RawFrame,
        captured_at: Instant,
        received_at: DateTime<Utc>,
    ) -> Result<Self> {
        let tokens: Vec<&str> = frame.tokens().collect();

        if tokens.len() <= DATA_LENGTH_INDEX + 1 {
            return Err(Error::frame_parse(format!(
                "need at least {} tokens, got {}",
                DATA_LENGTH_INDEX + 2,
                tokens.len()
            )));
        }

        let event_kind = EventKind::from_code(tokens[EVENT_KIND_INDEX]);
        let source_address = BdAddr::from_le_tokens(&tokens[ADDRESS_RANGE])?;

        let length_token = tokens[DATA_LENGTH_INDEX];
        let data_len = hex_byte(length_token)
            .map_err(|_| Error::frame_parse(format!("bad data length {:?}", length_token)))?
            as usize
            + 1;
        let data_end = DATA_LENGTH_INDEX + data_len;
        if data_end > tokens.len() {
            return Err(Error::frame_parse(format!(
                "advertising data truncated: need {} bytes, have {}",
                data_len,
                tokens.len() - DATA_LENGTH_INDEX
            )));
        }

        let mut payload_hex = String::with_capacity(data_len * 2);
        for token in &tokens[DATA_LENGTH_INDEX..data_end] {
            if hex_byte(token).is_err() {
                return Err(Error::frame_parse(format!("bad data byte {:?}", token)));
            }
            payload_hex.push_str(&token.to_ascii_lowercase());
        }

        let rssi_token = tokens[tokens.len() - 1];
        let rssi = hex_byte(rssi_token)
            .map_err(|_| Error::frame_parse(format!("bad RSSI {:?}", rssi_token)))?
            as i8;

        Ok(Self {
            source_address,
            rssi,
            event_kind,
            payload_hex,
            captured_at,
            received_at,
            raw_frame: frame.joined(),
        })
    }

    /// The device identifier embedded in the payload, converted to
    /// big-endian lower-case hex.
    ///
    /// `None` if the frame is too short or the bytes are not hex.
    pub fn embedded_identity(&self) -> Option<String> {
        let tokens: Vec<&str> = self.raw_frame.split_whitespace().collect();
        let raw = tokens.get(IDENTITY_RANGE)?;
        if raw.iter().any(|t| hex_byte(t).is_err()) {
            return None;
        }
        Some(to_big_endian(&raw.concat().to_ascii_lowercase()))
    }

    /// Company name derived from the manufacturer prefix of the payload.
    pub fn company_name(&self) -> &'static str {
        if self.payload_hex.get(2..8) == Some(SHL_MANUFACTURER_PREFIX) {
            "SHL"
        } else {
            "Unknown"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> RawFrame {
        RawFrame::new(text.lines().map(|l| l.trim().to_string()).collect())
    }

    // Scannable undirected from ff:ee:dd:cc:bb:aa, 4-byte AD structure, RSSI 0xC4.
    const SHORT_FRAME: &str = "> 04 3E 13 02 01 02 00 AA BB CC DD EE FF 08 03\n\
                               FF 13 0C C4";

    #[test]
    fn test_event_kind() {
        assert_eq!(EventKind::from_code("00"), EventKind::ConnectableUndirected);
        assert_eq!(EventKind::from_code("01"), EventKind::ConnectableDirected);
        assert_eq!(EventKind::from_code("02"), EventKind::ScannableUndirected);
        assert_eq!(EventKind::from_code("03"), EventKind::NonConnectableUndirected);
        assert_eq!(EventKind::from_code("04"), EventKind::ScanResponse);
        assert_eq!(EventKind::from_code("05"), EventKind::Unknown);
        assert_eq!(EventKind::from_code("zz"), EventKind::Unknown);

        assert!(EventKind::ScanResponse.carries_fragment());
        assert!(!EventKind::ConnectableUndirected.carries_fragment());
        assert_eq!(EventKind::ScanResponse.to_string(), "Scan Response");
    }

    #[test]
    fn test_bd_addr() {
        let addr = BdAddr::from_le_tokens(&["AA", "BB", "CC", "DD", "EE", "FF"]).unwrap();
        assert_eq!(addr.to_string(), "ff:ee:dd:cc:bb:aa");
        assert_eq!("ff:ee:dd:cc:bb:aa".parse::<BdAddr>().unwrap(), addr);
        assert!("ff:ee".parse::<BdAddr>().is_err());
        assert!(BdAddr::from_le_tokens(&["AA", "BB"]).is_err());
    }

    #[test]
    fn test_parse_short_frame() {
        let packet = AdvertisingPacket::parse(&frame(SHORT_FRAME)).unwrap();
        assert_eq!(packet.source_address.to_string(), "ff:ee:dd:cc:bb:aa");
        assert_eq!(packet.event_kind, EventKind::ScannableUndirected);
        assert_eq!(packet.payload_hex, "03ff130c");
        assert_eq!(packet.rssi, -60);
        assert_eq!(packet.company_name(), "SHL");
        assert!(packet.embedded_identity().is_none());
    }

    #[test]
    fn test_rssi_positive() {
        let text = SHORT_FRAME.replace("C4", "05");
        let packet = AdvertisingPacket::parse(&frame(&text)).unwrap();
        assert_eq!(packet.rssi, 5);
    }

    #[test]
    fn test_parse_too_few_tokens() {
        let err = AdvertisingPacket::parse(&frame("> 04 3E 0C 02 01")).unwrap_err();
        assert!(matches!(err, Error::FrameParse { .. }));
    }

    #[test]
    fn test_parse_truncated_data() {
        let text = "> 04 3E 13 02 01 02 00 AA BB CC DD EE FF 08 1E FF 13 C4";
        assert!(AdvertisingPacket::parse(&frame(text)).is_err());
    }

    #[test]
    fn test_parse_non_hex() {
        let text = SHORT_FRAME.replace("0C", "QQ");
        assert!(AdvertisingPacket::parse(&frame(&text)).is_err());

        let text = SHORT_FRAME.replace("DD", "D?");
        assert!(AdvertisingPacket::parse(&frame(&text)).is_err());
    }

    #[test]
    fn test_parse_signed_data_byte() {
        let text = "> 04 3E 13 02 01 02 00 AA BB CC DD EE FF 08 03 +F 13 0C C4";
        let err = AdvertisingPacket::parse(&frame(text)).unwrap_err();
        assert!(matches!(err, Error::FrameParse { .. }));

        let text = SHORT_FRAME.replace("C4", "-4");
        assert!(AdvertisingPacket::parse(&frame(&text)).is_err());
    }

    #[test]
    fn test_raw_frame_keeps_line_text() {
        let raw = frame("> 04 3E 13 02 01 02 00 AA BB  CC DD EE FF 08 03\nFF 13 0C   C4");
        let packet = AdvertisingPacket::parse(&raw).unwrap();
        assert_eq!(packet.raw_frame, raw.joined());
        assert_eq!(
            packet.raw_frame,
            "> 04 3E 13 02 01 02 00 AA BB  CC DD EE FF 08 03 FF 13 0C   C4"
        );
    }

    #[test]
    fn test_embedded_identity() {
        let mut tokens: Vec<String> = "> 04 3E 2B 02 01 02 00 AA BB CC DD EE FF 1F 1E FF 13 0C 02 00 00 17"
            .split(' ')
            .map(String::from)
            .collect();
        // tokens 23..31: device id little-endian
        tokens.extend(
            ["27", "01", "1E", "42", "82", "00", "0D", "12"]
                .iter()
                .map(|s| s.to_string()),
        );
        tokens.extend(std::iter::repeat("00".to_string()).take(15));
        tokens.push("C4".to_string());

        let packet = AdvertisingPacket::parse(&frame(&tokens.join(" "))).unwrap();
        assert_eq!(
            packet.embedded_identity().as_deref(),
            Some("120d0082421e0127")
        );
        assert_eq!(packet.payload_hex.len(), 62);
    }
}
