//! Target device acquisition.
//!
//! Until a packet carrying the target identity is seen, every packet is
//! checked for the embedded identifier. The first match locks the session
//! onto that packet's source address; from then on only the address is
//! compared.

use tracing::{debug, info};

use crate::ble::advertising::{AdvertisingPacket, BdAddr};
use crate::config::DeviceIdentity;

/// Outcome of offering a packet to the acquirer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// The packet carried the target identity and locked the address.
    Locked(BdAddr),
    /// The packet came from the locked address.
    Accepted,
    /// The packet belongs to some other device.
    Rejected,
}

impl Acquisition {
    /// Check if the packet should go on to processing.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// Filters packets down to the target device.
#[derive(Debug, Clone)]
pub struct DeviceAcquirer {
    target: DeviceIdentity,
    locked_address: Option<BdAddr>,
}

impl DeviceAcquirer {
    /// Create an acquirer for the given identity.
    pub fn new(target: DeviceIdentity) -> Self {
        Self {
            target,
            locked_address: None,
        }
    }

    /// The identity being searched for.
    pub fn target(&self) -> &DeviceIdentity {
        &self.target
    }

    /// The address the acquirer is locked onto, if any.
    pub fn locked_address(&self) -> Option<BdAddr> {
        self.locked_address
    }

    /// Decide whether a packet belongs to the target device.
    pub fn offer(&mut self, packet: &AdvertisingPacket) -> Acquisition {
        match self.locked_address {
            Some(locked) if packet.source_address == locked => Acquisition::Accepted,
            Some(_) => Acquisition::Rejected,
            None => {
                let identity = packet.embedded_identity();
                if identity.as_deref() == Some(self.target.as_str()) {
                    info!(
                        "Target device {} found at {}",
                        self.target, packet.source_address
                    );
                    self.locked_address = Some(packet.source_address);
                    Acquisition::Locked(packet.source_address)
                } else {
                    debug!(
                        "Ignoring packet from {} (identity {:?})",
                        packet.source_address, identity
                    );
                    Acquisition::Rejected
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::advertising::EventKind;
    use chrono::Utc;
    use std::time::Instant;

    fn packet(addr: [u8; 6], identity_le: [&str; 8]) -> AdvertisingPacket {
        let mut tokens = vec![">", "04", "3E", "2B", "02", "01", "02", "00"];
        tokens.extend(["00"; 6]);
        tokens.extend(["1F", "1E", "FF", "13", "0C", "02", "00", "00", "17"]);
        tokens.extend(identity_le);
        tokens.extend(["00"; 16]);
        AdvertisingPacket {
            source_address: BdAddr(addr),
            rssi: -60,
            event_kind: EventKind::ScannableUndirected,
            payload_hex: String::new(),
            captured_at: Instant::now(),
            received_at: Utc::now(),
            raw_frame: tokens.join(" "),
        }
    }

    const TARGET_LE: [&str; 8] = ["27", "01", "1E", "42", "82", "00", "0D", "12"];
    const OTHER_LE: [&str; 8] = ["00", "00", "00", "00", "00", "00", "00", "01"];

    fn acquirer() -> DeviceAcquirer {
        DeviceAcquirer::new(DeviceIdentity::parse("120D0082421E0127").unwrap())
    }

    #[test]
    fn test_locks_on_first_match() {
        let mut acq = acquirer();
        let a = [1, 2, 3, 4, 5, 6];

        assert_eq!(acq.offer(&packet(a, OTHER_LE)), Acquisition::Rejected);
        assert_eq!(acq.locked_address(), None);

        assert_eq!(acq.offer(&packet(a, TARGET_LE)), Acquisition::Locked(BdAddr(a)));
        assert_eq!(acq.locked_address(), Some(BdAddr(a)));
    }

    #[test]
    fn test_locked_address_never_changes() {
        let mut acq = acquirer();
        let a = [1, 2, 3, 4, 5, 6];
        let b = [9, 9, 9, 9, 9, 9];

        acq.offer(&packet(a, TARGET_LE));

        // Same address with a different embedded id is still accepted.
        assert_eq!(acq.offer(&packet(a, OTHER_LE)), Acquisition::Accepted);
        // Another address carrying the target id is rejected.
        assert_eq!(acq.offer(&packet(b, TARGET_LE)), Acquisition::Rejected);
        assert_eq!(acq.locked_address(), Some(BdAddr(a)));
    }

    #[test]
    fn test_short_frame_rejected() {
        let mut acq = acquirer();
        let mut p = packet([1; 6], TARGET_LE);
        p.raw_frame = "> 04 3E 0C".to_string();
        assert!(!acq.offer(&p).is_accepted());
    }
}
