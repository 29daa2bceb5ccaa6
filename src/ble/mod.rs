//! BLE capture module.
//!
//! This module turns raw `hcidump` output into advertising packets and
//! filters them down to the target device.

pub mod acquirer;
pub mod advertising;
pub mod frame_reader;

pub use acquirer::{Acquisition, DeviceAcquirer};
pub use advertising::{AdvertisingPacket, BdAddr, EventKind};
pub use frame_reader::{FrameReader, RawFrame};
