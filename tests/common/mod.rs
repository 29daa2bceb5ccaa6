//! Synthetic hcidump captures for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use capsync_ble::protocol::compute_hmac;
use capsync_ble::{to_big_endian, DeviceIdentity, PipelineConfig, SecretKey};

/// Identity of the simulated beacon, big-endian.
pub const IDENTITY: &str = "120d0082421e0127";

/// Telemetry: version 02, cCap, fw 2.3, time 10000, 25 degrees, ordinal
/// 300, radio and HMAC error bits.
pub const MESSAGE: &str = "0200001727011e4282000d1210270000192c010c0000";

/// Address of the simulated beacon as printed, ff:ee:dd:cc:bb:aa.
pub const TARGET_ADDR: [u8; 6] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];

/// Some other advertiser.
pub const OTHER_ADDR: [u8; 6] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];

/// Event type codes.
pub const SCANNABLE_UNDIRECTED: u8 = 0x02;
pub const SCAN_RESPONSE: u8 = 0x04;
pub const CONNECTABLE_UNDIRECTED: u8 = 0x00;

pub const BANNER: &str = "HCI sniffer - Bluetooth packet analyzer ver 5.50\ndevice: hci0 snap_len: 1500 filter: 0xffffffff\n";

pub fn key() -> SecretKey {
    SecretKey::new(b"0123456789abcdef".to_vec())
}

pub fn identity() -> DeviceIdentity {
    DeviceIdentity::parse(IDENTITY).unwrap()
}

pub fn config() -> PipelineConfig {
    PipelineConfig::new(identity(), key()).with_watchdog_interval(Duration::from_millis(1))
}

/// hcidump `--raw` text for one LE advertising report.
///
/// `payload_hex` is the first AD structure, its length byte included. Bytes
/// wrap at 20 per line like hcidump does.
pub fn frame(event_kind: u8, addr: [u8; 6], payload_hex: &str, rssi: i8) -> String {
    let payload: Vec<u8> = hex::decode(payload_hex).unwrap();
    let mut bytes = vec![0x04, 0x3E, 0x00, 0x02, 0x01, event_kind, 0x00];
    bytes.extend_from_slice(&addr);
    bytes.push(payload.len() as u8);
    bytes.extend_from_slice(&payload);
    bytes.push(rssi as u8);
    bytes[2] = (bytes.len() - 3) as u8;

    let mut text = String::from(">");
    for (i, chunk) in bytes.chunks(20).enumerate() {
        if i > 0 {
            text.push_str("\n ");
        }
        for b in chunk {
            text.push_str(&format!(" {:02X}", b));
        }
    }
    text.push('\n');
    text
}

/// The two fragment payloads for `message`, signed with `key`.
pub fn fragment_payloads(message: &str, key: &SecretKey) -> (String, String) {
    let digest = compute_hmac(key, &hex::decode(message).unwrap()).unwrap();
    let le = to_big_endian(&digest);
    let a = format!("1eff130c{}{}", &message[..24], &le[..30]);
    let b = format!("1eff130c{}{}", &le[30..], &message[24..]);
    (a, b)
}

/// Scannable undirected and scan response frames carrying `message`.
pub fn fragment_frames(addr: [u8; 6], message: &str, key: &SecretKey) -> (String, String) {
    let (a, b) = fragment_payloads(message, key);
    (
        frame(SCANNABLE_UNDIRECTED, addr, &a, -60),
        frame(SCAN_RESPONSE, addr, &b, -62),
    )
}

/// A frame unrelated to the target.
pub fn noise_frame(addr: [u8; 6]) -> String {
    frame(CONNECTABLE_UNDIRECTED, addr, "020106", -80)
}
