//! Property-based tests for the codec targets.
//!
//! Arbitrary bytes must never trip a codec target, and well-formed
//! messages built here must survive the same decode / re-encode / dispatch
//! path the targets check.

use lightning_fuzz::{HarnessConfig, Registry, TargetKind};
use lightning::ln::msgs::{Ping, Pong};
use lightning::util::ser::{BigSize, Readable, Writeable};
use proptest::prelude::*;

// ─── Arbitrary input ────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn codec_targets_accept_arbitrary_bytes(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let config = HarnessConfig::default();
        for target in Registry::new().iter().filter(|t| t.kind == TargetKind::Codec) {
            target.run_with(&data, &config);
        }
    }

    #[test]
    fn text_targets_accept_arbitrary_strings(text in "[a-z0-9:\\[\\]\\.]{0,80}") {
        let registry = Registry::new();
        for name in ["bech32_parse", "zbase32", "base32", "fromstr_to_netaddress", "offer_deser", "bolt11_deser"] {
            prop_assert!(registry.run(name, text.as_bytes()));
        }
    }
}

// ─── Well-formed input ──────────────────────────────────────────────────────

/// Strategy that targets BigSize encoding boundaries.
fn bigsize_boundary() -> impl Strategy<Value = u64> {
    prop_oneof![
        Just(0u64),
        Just(0xfc),
        Just(0xfd),
        Just(0xffff),
        Just(0x1_0000),
        Just(0xffff_ffff),
        Just(0x1_0000_0000),
        Just(u64::MAX),
        any::<u64>(),
    ]
}

fn bigsize_len(v: u64) -> usize {
    match v {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

proptest! {
    #[test]
    fn bigsize_encoding_is_minimal(v in bigsize_boundary()) {
        let encoded = BigSize(v).encode();
        prop_assert_eq!(encoded.len(), bigsize_len(v));
        let decoded: Option<BigSize> = Readable::read(&mut &encoded[..]).ok();
        prop_assert_eq!(decoded.map(|b| b.0), Some(v));
    }

    #[test]
    fn ping_padding_is_zeroed(ponglen in any::<u16>(), padding in proptest::collection::vec(any::<u8>(), 0..128)) {
        let mut body = ponglen.to_be_bytes().to_vec();
        body.extend_from_slice(&(padding.len() as u16).to_be_bytes());
        body.extend_from_slice(&padding);

        let ping: Ping = Readable::read(&mut &body[..]).unwrap();
        prop_assert_eq!(ping.ponglen, ponglen);
        prop_assert_eq!(ping.byteslen as usize, padding.len());
        let encoded = ping.encode();
        prop_assert_eq!(encoded.len(), body.len());
        prop_assert!(encoded[4..].iter().all(|b| *b == 0));
        prop_assert!(Registry::new().run("msg_ping", &body));
    }

    #[test]
    fn pong_re_encodes_to_its_length(padding in proptest::collection::vec(Just(0u8), 0..64)) {
        let mut body = (padding.len() as u16).to_be_bytes().to_vec();
        body.extend_from_slice(&padding);
        let pong: Pong = Readable::read(&mut &body[..]).unwrap();
        prop_assert_eq!(pong.byteslen as usize, padding.len());
        prop_assert_eq!(pong.encode(), body.clone());
        prop_assert!(Registry::new().run("msg_pong", &body));
    }
}
