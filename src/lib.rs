//! # capsync-ble
//!
//! Capture-to-verified-telemetry pipeline for BLE beacons that sign their
//! advertising payload with HMAC-SHA256.
//!
//! The beacon splits one telemetry message and its digest across a
//! scannable undirected advertisement and the matching scan response. This
//! library reads the raw HCI dump of a Linux host (`hcidump --raw`), locks
//! onto the device carrying the configured identity, reassembles and
//! verifies the message, decodes the telemetry, and tracks timing and
//! signal statistics for the capture session.
//!
//! ## Features
//!
//! - **Frame parsing**: HCI LE advertising reports from dump text
//! - **Device acquisition**: lock onto one address by embedded identity
//! - **Integrity**: two-fragment reassembly with HMAC-SHA256 verification
//! - **Telemetry**: firmware, time reference, temperature, event ordinal and
//!   device error bitmask
//! - **Statistics**: trigger gap, average packet rate and RSSI
//! - **Lifecycle**: trigger-started sessions bounded by a packet budget
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use capsync_ble::{ImmediateTrigger, Pipeline, PipelineConfig, ProcessCapture, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = PipelineConfig::from_env()?;
//!     let mut capture = ProcessCapture::from_config(&config);
//!     let pipeline = Pipeline::with_in_memory_store(config);
//!
//!     let mut notifications = pipeline.subscribe_notifications();
//!     tokio::spawn(async move {
//!         while let Ok(note) = notifications.recv().await {
//!             println!("{}", note);
//!         }
//!     });
//!
//!     let summary = pipeline.run(&mut ImmediateTrigger, &mut capture).await?;
//!     println!("{} packets, {} verified", summary.packet_count, summary.verified_count);
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! Live capture needs BlueZ's `hcitool` and `hcidump` and, unless disabled,
//! `sudo`. Recorded dumps can be replayed anywhere with [`ReplayCapture`].
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

pub mod ble;
pub mod capture;
pub mod config;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod trigger;
pub mod utils;

pub use capture::{CaptureControl, CaptureStream, ProcessCapture, ReplayCapture};
pub use config::{DeviceIdentity, PipelineConfig, SecretKey};
pub use error::{Error, Result};
pub use pipeline::{
    AttributeSnapshot, Notification, Pipeline, SessionSummary, SignatureRecord, StopReason,
    StopSignal,
};
pub use trigger::{ButtonMonitor, ImmediateTrigger, InputLine, TriggerEvent, TriggerSource};
pub use utils::{hex_to_dotted_decimal, le_hex_to_u32, to_big_endian};

pub use ble::{Acquisition, AdvertisingPacket, BdAddr, DeviceAcquirer, EventKind, FrameReader};
pub use data::{
    Attribute, AttributeStore, CsvExporter, InMemoryAttributeStore, Session, SessionAttributes,
    SessionStats,
};
pub use protocol::{DecodedTelemetry, DeviceErrors, Reassembler, ReassemblyState, Verification};
