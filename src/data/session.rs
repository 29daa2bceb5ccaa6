//! Capture session state.
//!
//! A session runs from the trigger to the stop condition and is scoped to
//! one target identity. It is owned by the processing worker, which is the
//! only writer.

use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::ble::advertising::BdAddr;
use crate::config::{DeviceIdentity, SecretKey};
use crate::protocol::reassembly::Reassembler;

/// Running packet statistics.
///
/// All values accumulate monotonically; there is no windowing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    packet_count: u64,
    first_packet_time: Option<Instant>,
    last_packet_time: Option<Instant>,
    total_gap: Duration,
    cumulative_rssi: i64,
    trigger_gap: Option<Duration>,
}

impl SessionStats {
    /// Record one accepted packet.
    ///
    /// `trigger_at` is the instant the session was triggered; the gap to
    /// it is taken on the first packet only.
    pub fn record(&mut self, rssi: i8, at: Instant, trigger_at: Instant) {
        self.packet_count += 1;
        self.cumulative_rssi += i64::from(rssi);

        match self.last_packet_time {
            None => {
                self.first_packet_time = Some(at);
                self.trigger_gap = Some(at.saturating_duration_since(trigger_at));
            }
            Some(last) => {
                self.total_gap += at.saturating_duration_since(last);
            }
        }
        self.last_packet_time = Some(at);
    }

    /// Packets recorded so far.
    pub fn packet_count(&self) -> u64 {
        self.packet_count
    }

    /// Check if the last recorded packet was the first.
    pub fn is_first_packet(&self) -> bool {
        self.packet_count == 1
    }

    /// Time of the first packet.
    pub fn first_packet_time(&self) -> Option<Instant> {
        self.first_packet_time
    }

    /// Time of the latest packet.
    pub fn last_packet_time(&self) -> Option<Instant> {
        self.last_packet_time
    }

    /// Delay between the trigger and the first packet, in seconds.
    pub fn trigger_gap_secs(&self) -> Option<f64> {
        self.trigger_gap.map(|d| d.as_secs_f64())
    }

    /// Sum of inter-packet gaps.
    pub fn total_gap(&self) -> Duration {
        self.total_gap
    }

    /// Mean inter-packet gap in seconds. Needs two packets.
    pub fn average_gap_secs(&self) -> Option<f64> {
        if self.packet_count < 2 {
            return None;
        }
        Some(self.total_gap.as_secs_f64() / (self.packet_count - 1) as f64)
    }

    /// Mean packet rate in Hz. Needs a non-zero average gap.
    pub fn average_frequency_hz(&self) -> Option<f64> {
        self.average_gap_secs()
            .filter(|gap| *gap > 0.0)
            .map(|gap| 1.0 / gap)
    }

    /// Mean RSSI in dBm.
    pub fn average_rssi(&self) -> Option<f64> {
        if self.packet_count == 0 {
            return None;
        }
        Some(self.cumulative_rssi as f64 / self.packet_count as f64)
    }
}

/// State for one capture run against one target device.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    target_identity: DeviceIdentity,
    locked_address: Option<BdAddr>,
    /// Packet statistics.
    pub stats: SessionStats,
    /// Fragment and verification state.
    pub reassembler: Reassembler,
    error_tally: u32,
}

impl Session {
    /// Start a session for `target_identity`.
    pub fn new(target_identity: DeviceIdentity, key: SecretKey) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_identity,
            locked_address: None,
            stats: SessionStats::default(),
            reassembler: Reassembler::new(key),
            error_tally: 0,
        }
    }

    /// Unique id of this run.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The identity this session tracks.
    pub fn target_identity(&self) -> &DeviceIdentity {
        &self.target_identity
    }

    /// The address the session is locked onto.
    pub fn locked_address(&self) -> Option<BdAddr> {
        self.locked_address
    }

    /// Lock onto an address. Only the first call has any effect.
    ///
    /// Returns `true` if the address was set by this call.
    pub fn lock_address(&mut self, address: BdAddr) -> bool {
        if self.locked_address.is_some() {
            return false;
        }
        self.locked_address = Some(address);
        true
    }

    /// Add decoded device failures to the tally.
    pub fn add_errors(&mut self, count: u32) -> u32 {
        self.error_tally += count;
        self.error_tally
    }

    /// Number of decoded messages that reported an error.
    pub fn error_tally(&self) -> u32 {
        self.error_tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, secs: f64) -> Instant {
        base + Duration::from_secs_f64(secs)
    }

    #[test]
    fn test_statistics() {
        let base = Instant::now();
        let mut stats = SessionStats::default();

        stats.record(-60, at(base, 0.0), base);
        assert!(stats.is_first_packet());
        assert_eq!(stats.average_gap_secs(), None);
        assert_eq!(stats.trigger_gap_secs(), Some(0.0));

        stats.record(-62, at(base, 0.5), base);
        stats.record(-58, at(base, 1.5), base);

        assert_eq!(stats.packet_count(), 3);
        assert!((stats.average_gap_secs().unwrap() - 0.75).abs() < 1e-9);
        assert!((stats.average_frequency_hz().unwrap() - 1.333_333).abs() < 1e-3);
        assert!((stats.average_rssi().unwrap() - (-60.0)).abs() < 1e-9);
    }

    #[test]
    fn test_trigger_gap_first_packet_only() {
        let trigger = Instant::now();
        let mut stats = SessionStats::default();
        stats.record(-70, at(trigger, 2.0), trigger);
        stats.record(-70, at(trigger, 3.0), trigger);
        assert!((stats.trigger_gap_secs().unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(stats.first_packet_time(), Some(at(trigger, 2.0)));
    }

    #[test]
    fn test_zero_gap_has_no_frequency() {
        let t = Instant::now();
        let mut stats = SessionStats::default();
        stats.record(-50, t, t);
        stats.record(-50, t, t);
        assert_eq!(stats.average_gap_secs(), Some(0.0));
        assert_eq!(stats.average_frequency_hz(), None);
    }

    #[test]
    fn test_locked_address_set_once() {
        let mut session = Session::new(
            DeviceIdentity::parse("120d0082421e0127").unwrap(),
            SecretKey::new(vec![1]),
        );
        assert!(session.lock_address(BdAddr([1; 6])));
        assert!(!session.lock_address(BdAddr([2; 6])));
        assert_eq!(session.locked_address(), Some(BdAddr([1; 6])));
    }

    #[test]
    fn test_error_tally() {
        let mut session = Session::new(
            DeviceIdentity::parse("120d0082421e0127").unwrap(),
            SecretKey::new(vec![1]),
        );
        assert_eq!(session.add_errors(1), 1);
        assert_eq!(session.add_errors(0), 1);
        assert_eq!(session.error_tally(), 1);
    }
}
