mod common;

use std::time::{Duration, Instant};

use capsync_ble::protocol::{compute_hmac, verify_hmac};
use capsync_ble::trigger::Debouncer;
use capsync_ble::{to_big_endian, SecretKey};
use proptest::prelude::*;

fn hex_string() -> impl Strategy<Value = String> {
    prop::collection::vec(any::<u8>(), 0..32).prop_map(hex::encode)
}

proptest! {
    #[test]
    fn endian_round_trip(s in hex_string()) {
        prop_assert_eq!(to_big_endian(&to_big_endian(&s)), s);
    }

    #[test]
    fn flipped_digest_never_verifies(
        message in prop::collection::vec(any::<u8>(), 1..64),
        key in prop::collection::vec(any::<u8>(), 1..64),
        position in 0usize..64,
    ) {
        let key = SecretKey::new(key);
        let digest = compute_hmac(&key, &message).unwrap();
        let message_hex = hex::encode(&message);

        let (verified, _) = verify_hmac(&key, &message_hex, &digest).unwrap();
        prop_assert!(verified);

        let mut tampered = digest.into_bytes();
        tampered[position] = if tampered[position] == b'0' { b'1' } else { b'0' };
        let tampered = String::from_utf8(tampered).unwrap();
        let (verified, _) = verify_hmac(&key, &message_hex, &tampered).unwrap();
        prop_assert!(!verified);
    }

    #[test]
    fn accepted_releases_are_spaced(
        samples in prop::collection::vec((any::<bool>(), 0u64..300), 1..200),
    ) {
        let debounce = Duration::from_millis(200);
        let mut debouncer = Debouncer::new(debounce);
        let mut now = Instant::now();
        let mut accepted: Vec<Instant> = Vec::new();

        for (high, step) in samples {
            now += Duration::from_millis(step);
            if debouncer.observe(high, now) {
                prop_assert!(high);
                accepted.push(now);
            }
        }

        for pair in accepted.windows(2) {
            prop_assert!(pair[1] - pair[0] >= debounce);
        }
    }
}

#[test]
fn test_fixture_fragments_verify() {
    let key = common::key();
    let (a, b) = common::fragment_payloads(common::MESSAGE, &key);
    assert_eq!(a.len(), 62);
    assert_eq!(b.len(), 62);

    let signature = format!("{}{}", &a[32..62], &b[8..42]);
    let message = format!("{}{}", &a[8..32], &b[42..62]);
    assert_eq!(message, common::MESSAGE);
    let (verified, _) = verify_hmac(&key, &message, &to_big_endian(&signature)).unwrap();
    assert!(verified);
}
