//! Two-fragment payload reassembly and verification.
//!
//! A telemetry message and its HMAC are split across two advertisement
//! kinds. Offsets are in hex characters of the AD structure:
//!
//! - Scannable undirected (fragment A): data `8..32`, signature `32..62`
//! - Scan response (fragment B): signature `8..42`, data `42..62`
//!
//! The signature halves concatenate (A then B) into the little-endian
//! digest; the data halves concatenate into the message.

use std::ops::Range;

use tracing::{debug, warn};

use crate::ble::advertising::{AdvertisingPacket, EventKind};
use crate::config::SecretKey;
use crate::error::{Error, Result};
use crate::protocol::integrity::verify_hmac;
use crate::utils::to_big_endian;

/// Payload length (hex characters) a fragment-carrying packet must reach.
pub const FRAGMENT_PAYLOAD_HEX_LEN: usize = 62;

/// Which half of the payload a fragment carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    /// Carried by scannable undirected advertising.
    A,
    /// Carried by the scan response.
    B,
}

impl FragmentKind {
    /// The fragment carried by an event kind, if any.
    pub fn for_event(kind: EventKind) -> Option<Self> {
        match kind {
            EventKind::ScannableUndirected => Some(Self::A),
            EventKind::ScanResponse => Some(Self::B),
            _ => None,
        }
    }

    fn data_range(&self) -> Range<usize> {
        match self {
            Self::A => 8..32,
            Self::B => 42..62,
        }
    }

    fn signature_range(&self) -> Range<usize> {
        match self {
            Self::A => 32..62,
            Self::B => 8..42,
        }
    }
}

/// One payload half with its signature half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Which half this is.
    pub kind: FragmentKind,
    /// Message bytes, hex.
    pub data: String,
    /// Digest bytes, hex, little-endian order.
    pub signature: String,
}

impl Fragment {
    /// Extract the fragment a packet carries.
    ///
    /// Returns `Ok(None)` for event kinds that carry no fragment.
    pub fn extract(packet: &AdvertisingPacket) -> Result<Option<Self>> {
        let kind = match FragmentKind::for_event(packet.event_kind) {
            Some(kind) => kind,
            None => return Ok(None),
        };

        let payload = &packet.payload_hex;
        if payload.len() < FRAGMENT_PAYLOAD_HEX_LEN {
            return Err(Error::frame_parse(format!(
                "{} payload too short for a fragment: {} hex chars",
                packet.event_kind,
                payload.len()
            )));
        }

        Ok(Some(Self {
            kind,
            data: payload[kind.data_range()].to_string(),
            signature: payload[kind.signature_range()].to_string(),
        }))
    }
}

/// Storage for the latest fragment of one kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentSlot {
    data: Option<String>,
    signature: Option<String>,
    receipts: u32,
}

impl FragmentSlot {
    /// Store a fragment if its signature differs from the stored one.
    ///
    /// Returns `true` when the slot was updated.
    fn store(&mut self, fragment: Fragment) -> bool {
        if self.signature.as_deref() == Some(fragment.signature.as_str()) {
            return false;
        }
        self.receipts += 1;
        self.data = Some(fragment.data);
        self.signature = Some(fragment.signature);
        true
    }

    /// Number of fresh fragments received.
    pub fn receipts(&self) -> u32 {
        self.receipts
    }

    /// Check if the slot holds a fragment.
    pub fn is_filled(&self) -> bool {
        self.data.is_some() && self.signature.is_some()
    }

    /// Stored data half.
    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    /// Stored signature half.
    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }
}

/// Reassembly progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyState {
    /// No fragment stored.
    Empty,
    /// Exactly one slot filled.
    HaveOneFragment,
    /// Both slots filled. `verified` reflects the last verification; it
    /// is `false` until one has run.
    HaveBothFragments {
        /// Whether the last verification passed.
        verified: bool,
    },
}

/// Result of one verification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    /// Concatenated message, hex.
    pub message_hex: String,
    /// Digest carried by the fragments, big-endian hex.
    pub expected_digest: String,
    /// Digest computed with the local key, hex.
    pub computed_digest: String,
    /// Whether the digests match.
    pub verified: bool,
}

/// Pairs fragments and checks their HMAC.
#[derive(Debug, Clone)]
pub struct Reassembler {
    key: SecretKey,
    slot_a: FragmentSlot,
    slot_b: FragmentSlot,
    last: Option<Verification>,
    success_count: u32,
}

impl Reassembler {
    /// Create an empty reassembler.
    pub fn new(key: SecretKey) -> Self {
        Self {
            key,
            slot_a: FragmentSlot::default(),
            slot_b: FragmentSlot::default(),
            last: None,
            success_count: 0,
        }
    }

    /// Offer a fragment. Returns `true` if it was fresh and got stored.
    pub fn accept(&mut self, fragment: Fragment) -> bool {
        let kind = fragment.kind;
        let fresh = match kind {
            FragmentKind::A => self.slot_a.store(fragment),
            FragmentKind::B => self.slot_b.store(fragment),
        };
        if fresh {
            debug!("Stored fresh fragment {:?}", kind);
        } else {
            debug!("Duplicate fragment {:?} ignored", kind);
        }
        fresh
    }

    /// Verify the stored pair, if both halves are present.
    pub fn verify(&mut self) -> Result<Option<Verification>> {
        let (data_a, sig_a, data_b, sig_b) = match (
            self.slot_a.data(),
            self.slot_a.signature(),
            self.slot_b.data(),
            self.slot_b.signature(),
        ) {
            (Some(da), Some(sa), Some(db), Some(sb)) => (da, sa, db, sb),
            _ => return Ok(None),
        };

        let expected_digest = to_big_endian(&format!("{}{}", sig_a, sig_b));
        let message_hex = format!("{}{}", data_a, data_b);
        let (verified, computed_digest) = verify_hmac(&self.key, &message_hex, &expected_digest)?;

        if verified {
            self.success_count += 1;
        } else {
            warn!(
                "HMAC mismatch: carried {}, computed {}",
                expected_digest, computed_digest
            );
        }

        let verification = Verification {
            message_hex,
            expected_digest,
            computed_digest,
            verified,
        };
        self.last = Some(verification.clone());
        Ok(Some(verification))
    }

    /// Current state.
    pub fn state(&self) -> ReassemblyState {
        match (self.slot_a.is_filled(), self.slot_b.is_filled()) {
            (false, false) => ReassemblyState::Empty,
            (true, true) => ReassemblyState::HaveBothFragments {
                verified: self.integrity_verified(),
            },
            _ => ReassemblyState::HaveOneFragment,
        }
    }

    /// Slot for a fragment kind.
    pub fn slot(&self, kind: FragmentKind) -> &FragmentSlot {
        match kind {
            FragmentKind::A => &self.slot_a,
            FragmentKind::B => &self.slot_b,
        }
    }

    /// Whether the last verification passed.
    pub fn integrity_verified(&self) -> bool {
        self.last.as_ref().is_some_and(|v| v.verified)
    }

    /// The last reassembled message.
    pub fn reassembled_message(&self) -> Option<&str> {
        self.last.as_ref().map(|v| v.message_hex.as_str())
    }

    /// Number of verifications that passed.
    pub fn success_count(&self) -> u32 {
        self.success_count
    }

    /// Drop all fragments and counters.
    pub fn reset(&mut self) {
        self.slot_a = FragmentSlot::default();
        self.slot_b = FragmentSlot::default();
        self.last = None;
        self.success_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::advertising::BdAddr;
    use crate::protocol::integrity::compute_hmac;
    use chrono::Utc;
    use std::time::Instant;

    const MESSAGE: &str = "0200001727011e4282000d1210270000192c010c0000";

    fn key() -> SecretKey {
        SecretKey::new(b"0123456789abcdef".to_vec())
    }

    fn packet(kind: EventKind, payload_hex: String) -> AdvertisingPacket {
        AdvertisingPacket {
            source_address: BdAddr([1, 2, 3, 4, 5, 6]),
            rssi: -60,
            event_kind: kind,
            payload_hex,
            captured_at: Instant::now(),
            received_at: Utc::now(),
            raw_frame: String::new(),
        }
    }

    /// Split `message` and its digest into the two fragment payloads.
    fn payloads(message: &str, key: &SecretKey) -> (String, String) {
        let digest = compute_hmac(key, &hex::decode(message).unwrap()).unwrap();
        let le = to_big_endian(&digest);
        let a = format!("1eff130c{}{}", &message[..24], &le[..30]);
        let b = format!("1eff130c{}{}", &le[30..], &message[24..]);
        (a, b)
    }

    fn fragment(kind: EventKind, payload: String) -> Fragment {
        Fragment::extract(&packet(kind, payload)).unwrap().unwrap()
    }

    #[test]
    fn test_extract_offsets() {
        let (a, b) = payloads(MESSAGE, &key());
        let fa = fragment(EventKind::ScannableUndirected, a);
        let fb = fragment(EventKind::ScanResponse, b);
        assert_eq!(fa.kind, FragmentKind::A);
        assert_eq!(fa.data, &MESSAGE[..24]);
        assert_eq!(fa.signature.len(), 30);
        assert_eq!(fb.kind, FragmentKind::B);
        assert_eq!(fb.data, &MESSAGE[24..]);
        assert_eq!(fb.signature.len(), 34);
    }

    #[test]
    fn test_extract_non_fragment_and_short() {
        let p = packet(EventKind::ConnectableUndirected, "00".repeat(31));
        assert!(Fragment::extract(&p).unwrap().is_none());

        let p = packet(EventKind::ScanResponse, "00".repeat(10));
        assert!(Fragment::extract(&p).is_err());
    }

    #[test]
    fn test_freshness() {
        let (a, _) = payloads(MESSAGE, &key());
        let mut r = Reassembler::new(key());

        assert!(r.accept(fragment(EventKind::ScannableUndirected, a.clone())));
        assert!(!r.accept(fragment(EventKind::ScannableUndirected, a.clone())));
        assert_eq!(r.slot(FragmentKind::A).receipts(), 1);

        let mut changed = a;
        let flipped = if &changed[60..62] == "ff" { "00" } else { "ff" };
        changed.replace_range(60..62, flipped);
        assert!(r.accept(fragment(EventKind::ScannableUndirected, changed)));
        assert_eq!(r.slot(FragmentKind::A).receipts(), 2);
        assert_eq!(r.slot(FragmentKind::B).receipts(), 0);
    }

    #[test]
    fn test_states_and_verification() {
        let (a, b) = payloads(MESSAGE, &key());
        let mut r = Reassembler::new(key());
        assert_eq!(r.state(), ReassemblyState::Empty);
        assert!(r.verify().unwrap().is_none());

        r.accept(fragment(EventKind::ScannableUndirected, a));
        assert_eq!(r.state(), ReassemblyState::HaveOneFragment);
        assert!(r.verify().unwrap().is_none());

        r.accept(fragment(EventKind::ScanResponse, b));
        let v = r.verify().unwrap().unwrap();
        assert!(v.verified);
        assert_eq!(v.message_hex, MESSAGE);
        assert_eq!(v.expected_digest, v.computed_digest);
        assert_eq!(
            r.state(),
            ReassemblyState::HaveBothFragments { verified: true }
        );
        assert_eq!(r.reassembled_message(), Some(MESSAGE));
        assert_eq!(r.success_count(), 1);
    }

    #[test]
    fn test_wrong_key_fails_without_error() {
        let (a, b) = payloads(MESSAGE, &SecretKey::new(b"other".to_vec()));
        let mut r = Reassembler::new(key());
        r.accept(fragment(EventKind::ScannableUndirected, a));
        r.accept(fragment(EventKind::ScanResponse, b));

        let v = r.verify().unwrap().unwrap();
        assert!(!v.verified);
        assert_eq!(
            r.state(),
            ReassemblyState::HaveBothFragments { verified: false }
        );
        assert_eq!(r.success_count(), 0);
        assert!(!r.integrity_verified());

        r.reset();
        assert_eq!(r.state(), ReassemblyState::Empty);
    }
}
