//! Protocol module for the signed telemetry beacon.
//!
//! This module contains the implementations for:
//! - Fragment reassembly across advertising and scan response
//! - HMAC-SHA256 integrity verification
//! - Telemetry and error bitmask decoding

pub mod integrity;
pub mod reassembly;
pub mod telemetry;

pub use integrity::{compute_hmac, verify_hmac};
pub use reassembly::{Fragment, FragmentKind, ReassemblyState, Reassembler, Verification};
pub use telemetry::{DecodedTelemetry, DeviceErrors};
