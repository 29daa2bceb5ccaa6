//! Per-device attribute records.
//!
//! The processing worker publishes everything it learns about the target
//! into a fixed set of attributes, namespaced by device identity. The
//! store is injected into the pipeline; an in-memory implementation is
//! provided.

use std::collections::HashMap;

use chrono::{DateTime, Local, Utc};
use parking_lot::RwLock;

use crate::config::DeviceIdentity;

/// Display format for wall-clock attributes.
pub const TIME_FORMAT: &str = "%Y-%m-%d, %H:%M:%S";

/// Placeholder for attributes that have no value yet.
pub const NOT_AVAILABLE: &str = "N/A";

/// One attribute update.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    /// Packets processed.
    PacketCount(u64),
    /// Manufacturer derived from the payload prefix.
    CompanyName(String),
    /// Device identifier from the telemetry.
    DeviceId(String),
    /// When the trigger fired.
    ButtonReleaseTime(DateTime<Utc>),
    /// When the first packet arrived.
    FirstPacketTime(DateTime<Utc>),
    /// Seconds between trigger and first packet.
    TimeGap(f64),
    /// Mean RSSI in dBm.
    AverageRssi(f64),
    /// Mean packet rate in Hz.
    AverageFrequency(f64),
    /// Telemetry payload version.
    PayloadVersion(String),
    /// Firmware version, dotted decimal.
    FwVersion(String),
    /// Device type.
    DeviceType(String),
    /// Device time reference.
    TimeReference(u32),
    /// Temperature reading.
    Temperature(u8),
    /// Event ordinal number.
    EventOrdinal(u16),
    /// Whether the last HMAC check passed.
    SignatureMatched(bool),
    /// HMAC checks that passed.
    IntegritySuccessCount(u32),
    /// Decoded messages reporting an error.
    ErrorCount(u32),
    /// Description of the last error bitmask.
    ErrorMessage(String),
}

impl Attribute {
    /// The display label of this attribute.
    pub fn label(&self) -> &'static str {
        match self {
            Self::PacketCount(_) => "Packet Count",
            Self::CompanyName(_) => "Company Name",
            Self::DeviceId(_) => "Device ID",
            Self::ButtonReleaseTime(_) => "Button Release Time",
            Self::FirstPacketTime(_) => "First Packet Time",
            Self::TimeGap(_) => "Time Gap",
            Self::AverageRssi(_) => "Average RSSI",
            Self::AverageFrequency(_) => "Average Frequency",
            Self::PayloadVersion(_) => "Payload Version",
            Self::FwVersion(_) => "FW Version",
            Self::DeviceType(_) => "Device Type",
            Self::TimeReference(_) => "Time Reference",
            Self::Temperature(_) => "Temperature",
            Self::EventOrdinal(_) => "Event Ordinal Number",
            Self::SignatureMatched(_) => "Digital Signature Matched",
            Self::IntegritySuccessCount(_) => "Data Integrity Check Success Count",
            Self::ErrorCount(_) => "Error Numbers",
            Self::ErrorMessage(_) => "Error Message",
        }
    }
}

/// Everything known about one device in the current session.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionAttributes {
    /// Packets processed, 0 until the first one.
    pub packet_count: u64,
    /// Manufacturer derived from the payload prefix.
    pub company_name: Option<String>,
    /// Device identifier decoded from the telemetry, big-endian hex.
    pub device_id: Option<String>,
    /// When the trigger fired.
    pub button_release_time: Option<DateTime<Utc>>,
    /// When the first packet of the session arrived.
    pub first_packet_time: Option<DateTime<Utc>>,
    /// Seconds between trigger and first packet.
    pub time_gap: Option<f64>,
    /// Mean RSSI in dBm.
    pub average_rssi: Option<f64>,
    /// Mean packet rate in Hz, set from the second packet on.
    pub average_frequency: Option<f64>,
    /// Telemetry payload version, two hex digits.
    pub payload_version: Option<String>,
    /// Firmware version, dotted decimal.
    pub fw_version: Option<String>,
    /// Device type, `None` for an unrecognized code.
    pub device_type: Option<String>,
    /// Device time reference.
    pub time_reference: Option<u32>,
    /// Temperature reading.
    pub temperature: Option<u8>,
    /// Event ordinal number.
    pub event_ordinal: Option<u16>,
    /// Whether the last HMAC check passed.
    pub signature_matched: Option<bool>,
    /// Messages that passed the HMAC check this session.
    pub integrity_success_count: Option<u32>,
    /// Device failures reported in the telemetry, accumulated.
    pub error_count: Option<u32>,
    /// Description of the last reported error bitmask.
    pub error_message: Option<String>,
}

impl SessionAttributes {
    /// Attribute labels in display order.
    pub const LABELS: [&'static str; 18] = [
        "Packet Count",
        "Company Name",
        "Device ID",
        "Button Release Time",
        "First Packet Time",
        "Time Gap",
        "Average RSSI",
        "Average Frequency",
        "Payload Version",
        "FW Version",
        "Device Type",
        "Time Reference",
        "Temperature",
        "Event Ordinal Number",
        "Digital Signature Matched",
        "Data Integrity Check Success Count",
        "Error Numbers",
        "Error Message",
    ];

    /// Apply one update.
    pub fn apply(&mut self, attribute: Attribute) {
        match attribute {
            Attribute::PacketCount(v) => self.packet_count = v,
            Attribute::CompanyName(v) => self.company_name = Some(v),
            Attribute::DeviceId(v) => self.device_id = Some(v),
            Attribute::ButtonReleaseTime(v) => self.button_release_time = Some(v),
            Attribute::FirstPacketTime(v) => self.first_packet_time = Some(v),
            Attribute::TimeGap(v) => self.time_gap = Some(v),
            Attribute::AverageRssi(v) => self.average_rssi = Some(v),
            Attribute::AverageFrequency(v) => self.average_frequency = Some(v),
            Attribute::PayloadVersion(v) => self.payload_version = Some(v),
            Attribute::FwVersion(v) => self.fw_version = Some(v),
            Attribute::DeviceType(v) => self.device_type = Some(v),
            Attribute::TimeReference(v) => self.time_reference = Some(v),
            Attribute::Temperature(v) => self.temperature = Some(v),
            Attribute::EventOrdinal(v) => self.event_ordinal = Some(v),
            Attribute::SignatureMatched(v) => self.signature_matched = Some(v),
            Attribute::IntegritySuccessCount(v) => self.integrity_success_count = Some(v),
            Attribute::ErrorCount(v) => self.error_count = Some(v),
            Attribute::ErrorMessage(v) => self.error_message = Some(v),
        }
    }

    /// Values rendered for display, in [`LABELS`](Self::LABELS) order.
    pub fn display_values(&self) -> [String; 18] {
        fn opt<T: ToString>(v: &Option<T>) -> String {
            v.as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string())
        }
        fn time(v: &Option<DateTime<Utc>>) -> String {
            v.map(|t| t.with_timezone(&Local).format(TIME_FORMAT).to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string())
        }

        [
            self.packet_count.to_string(),
            opt(&self.company_name),
            opt(&self.device_id),
            time(&self.button_release_time),
            time(&self.first_packet_time),
            opt(&self.time_gap),
            opt(&self.average_rssi),
            opt(&self.average_frequency),
            opt(&self.payload_version),
            opt(&self.fw_version),
            opt(&self.device_type),
            opt(&self.time_reference),
            opt(&self.temperature),
            opt(&self.event_ordinal),
            opt(&self.signature_matched),
            opt(&self.integrity_success_count),
            opt(&self.error_count),
            opt(&self.error_message),
        ]
    }
}

/// Keyed store of per-device attributes.
pub trait AttributeStore: Send + Sync {
    /// Create an empty record for `identity` unless one exists.
    fn register(&self, identity: &DeviceIdentity);

    /// Update one attribute. Ignored (returns `false`) for unregistered
    /// identities.
    fn set_attribute(&self, identity: &DeviceIdentity, attribute: Attribute) -> bool;

    /// Snapshot of all attributes of `identity`.
    fn get_all(&self, identity: &DeviceIdentity) -> Option<SessionAttributes>;

    /// Drop the record of `identity`.
    fn clear(&self, identity: &DeviceIdentity);
}

/// Attribute store backed by a map in memory.
#[derive(Debug, Default)]
pub struct InMemoryAttributeStore {
    records: RwLock<HashMap<DeviceIdentity, SessionAttributes>>,
}

impl InMemoryAttributeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered identities.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check if no identity is registered.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl AttributeStore for InMemoryAttributeStore {
    fn register(&self, identity: &DeviceIdentity) {
        self.records.write().entry(identity.clone()).or_default();
    }

    fn set_attribute(&self, identity: &DeviceIdentity, attribute: Attribute) -> bool {
        match self.records.write().get_mut(identity) {
            Some(record) => {
                record.apply(attribute);
                true
            }
            None => false,
        }
    }

    fn get_all(&self, identity: &DeviceIdentity) -> Option<SessionAttributes> {
        self.records.read().get(identity).cloned()
    }

    fn clear(&self, identity: &DeviceIdentity) {
        self.records.write().remove(identity);
    }
}
