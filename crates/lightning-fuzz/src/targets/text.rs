//! Text encoding targets: bech32, base32 flavours and socket addresses.

use std::str::FromStr;

use bech32::primitives::decode::CheckedHrpstring;
use bech32::{Bech32, Bech32m, ByteIterExt, Checksum, Fe32, Fe32IterExt};
use bitcoin::secp256k1::{PublicKey, Secp256k1};
use lightning::ln::msgs::SocketAddress;
use lightning::offers::offer::Offer;
use lightning::offers::refund::Refund;
use lightning::util::message_signing;
use lightning::util::ser::{Readable, Writeable};

use super::fixed_secret;
use crate::config::HarnessConfig;

/// Message zbase32 signatures in this target sign over.
const SIGNED_MESSAGE: &[u8] = b"lightning-fuzz zbase32";
const SIGNING_SECRET: u8 = 0x5c;

/// A checksummed string re-encodes to one carrying the same HRP and data.
fn checksum_round_trip<Ck: Checksum>(text: &str) {
    let Ok(parsed) = CheckedHrpstring::new::<Ck>(text) else {
        return;
    };
    let hrp = parsed.hrp();
    let bytes: Vec<u8> = parsed.byte_iter().collect();
    // over-long strings decode but exceed the checksum's code length
    let Ok(encoded) = bech32::encode::<Ck>(hrp, &bytes) else {
        return;
    };
    match CheckedHrpstring::new::<Ck>(&encoded) {
        Ok(again) => {
            assert_eq!(again.hrp().to_lowercase(), hrp.to_lowercase(), "hrp changed across re-encoding");
            assert_eq!(again.byte_iter().collect::<Vec<u8>>(), bytes, "payload changed across re-encoding");
        }
        Err(e) => panic!("re-encoded bech32 string failed to parse: {e}\n{encoded}"),
    }
}

/// Offers and refunds use checksum-free bech32 with `+` continuations;
/// both display in canonical form.
pub fn bech32_parse(data: &[u8], _config: &HarnessConfig) {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(offer) = Offer::from_str(text) {
        let shown = offer.to_string();
        match Offer::from_str(&shown) {
            Ok(again) => assert_eq!(again.as_ref(), offer.as_ref(), "offer string round trip changed the bytes"),
            Err(e) => panic!("displayed offer failed to parse: {e:?}\n{shown}"),
        }
    }
    if let Ok(refund) = Refund::from_str(text) {
        let shown = refund.to_string();
        match Refund::from_str(&shown) {
            Ok(again) => assert_eq!(again.as_ref(), refund.as_ref(), "refund string round trip changed the bytes"),
            Err(e) => panic!("displayed refund failed to parse: {e:?}\n{shown}"),
        }
    }

    checksum_round_trip::<Bech32>(text);
    checksum_round_trip::<Bech32m>(text);
}

/// Node message signatures are zbase32. Any input signs and verifies; any
/// text that decodes to a recoverable signature verifies against the key
/// it recovers.
pub fn zbase32(data: &[u8], _config: &HarnessConfig) {
    let secret = fixed_secret(SIGNING_SECRET);
    let node_id = PublicKey::from_secret_key(&Secp256k1::signing_only(), &secret);
    let signature = message_signing::sign(data, &secret);
    assert_eq!(signature.len(), 104, "a 65-byte signature is 104 zbase32 characters");
    assert!(message_signing::verify(data, &signature, &node_id), "fresh signature failed to verify");

    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(recovered) = message_signing::recover_pk(SIGNED_MESSAGE, text) {
            assert!(message_signing::verify(SIGNED_MESSAGE, text, &recovered));
        }
    }
}

fn to_base32(bytes: &[u8]) -> String {
    bytes.iter().copied().bytes_to_fes().map(Fe32::to_char).collect()
}

fn from_base32(text: &str) -> Option<Vec<u8>> {
    let fes = text.chars().map(Fe32::from_char).collect::<Result<Vec<_>, _>>().ok()?;
    Some(fes.into_iter().fes_to_bytes().collect())
}

/// Bech32-alphabet base32, as BOLT 11 tagged fields carry it. Padding
/// bits are dropped on decode, so text is only required to be stable
/// after one decode.
pub fn base32(data: &[u8], _config: &HarnessConfig) {
    let encoded = to_base32(data);
    assert_eq!(encoded.len(), (data.len() * 8).div_ceil(5));
    assert_eq!(from_base32(&encoded).as_deref(), Some(data), "base32 round trip failed");

    if let Ok(text) = std::str::from_utf8(data) {
        if let Some(decoded) = from_base32(text) {
            assert_eq!(from_base32(&to_base32(&decoded)), Some(decoded), "decoded base32 is not stable");
        }
    }
}

pub fn fromstr_to_netaddress(data: &[u8], _config: &HarnessConfig) {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(addr) = SocketAddress::from_str(text) else {
        return;
    };

    let shown = addr.to_string();
    match SocketAddress::from_str(&shown) {
        Ok(again) => assert_eq!(again, addr, "display/parse mismatch for {shown}"),
        Err(e) => panic!("displayed address failed to parse: {e:?}\n{shown}"),
    }

    let wire = addr.encode();
    let mut r = wire.as_slice();
    match SocketAddress::read(&mut r) {
        Ok(decoded) => assert_eq!(decoded, addr),
        Err(e) => panic!("address descriptor failed to decode: {e:?}"),
    }
    assert!(r.is_empty(), "descriptor left trailing bytes");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_good_addresses() {
        let cfg = HarnessConfig::default();
        fromstr_to_netaddress(b"127.0.0.1:9735", &cfg);
        fromstr_to_netaddress(b"[::1]:9735", &cfg);
        fromstr_to_netaddress(b"example.com:1234", &cfg);
        fromstr_to_netaddress(b"pg6mmjiyjmcrsslvykfwnntlaru7p5svn6y2ymmju6nubxndf4pscryd.onion:9735", &cfg);
        assert!(SocketAddress::from_str("example.com").is_err());
    }

    #[test]
    fn base32_uses_the_bech32_alphabet() {
        assert_eq!(to_base32(&[0x00, 0xff]), "qlls");
        assert_eq!(from_base32("qlls"), Some(vec![0x00, 0xff]));
        assert_eq!(from_base32("qlb"), None);
        base32(b"qlls", &HarnessConfig::default());
        base32(&[0xff; 7], &HarnessConfig::default());
    }

    #[test]
    fn zbase32_signatures_verify() {
        zbase32(b"hello", &HarnessConfig::default());
        zbase32(b"ybndrfg8", &HarnessConfig::default());
        let secret = fixed_secret(SIGNING_SECRET);
        let signature = message_signing::sign(SIGNED_MESSAGE, &secret);
        zbase32(signature.as_bytes(), &HarnessConfig::default());
    }

    #[test]
    fn bech32_strings_round_trip() {
        let cfg = HarnessConfig::default();
        // BIP 173 and BIP 350 valid strings
        bech32_parse(b"A12UEL5L", &cfg);
        bech32_parse(b"abcdef1qpzry9x8gf2tvdw0s3jn54khce6mua7lmqqqxw", &cfg);
        bech32_parse(b"a1lqfn3a", &cfg);
        let text = bech32::encode::<Bech32m>(bech32::Hrp::parse("lno").unwrap(), &[1, 2, 3]).unwrap();
        bech32_parse(text.as_bytes(), &cfg);
    }

    #[test]
    fn invalid_utf8_returns() {
        let cfg = HarnessConfig::default();
        bech32_parse(&[0xff, 0xfe], &cfg);
        fromstr_to_netaddress(&[0xc3], &cfg);
    }
}
