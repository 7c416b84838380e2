//! BOLT 12 offer/request/invoice/refund targets and the BOLT 11 invoice
//! target.
//!
//! BOLT 12 objects keep their raw TLV bytes, so re-encoding must give back
//! the input exactly. Requests and refunds are also answered by a fixed
//! responder; an invoice it manages to sign must parse on its own.

use std::fmt::{Debug, Display};
use std::str::FromStr;
use std::time::Duration;

use bech32::{Fe32, Fe32IterExt, Hrp};
use bitcoin::secp256k1::{schnorr, Keypair, Secp256k1};
use lightning::blinded_path::payment::{
    BlindedPaymentPath, Bolt12RefundContext, PaymentConstraints, PaymentContext, UnauthenticatedReceiveTlvs,
};
use lightning::offers::invoice::{Bolt12Invoice, UnsignedBolt12Invoice};
use lightning::offers::invoice_request::InvoiceRequest;
use lightning::offers::nonce::Nonce;
use lightning::offers::offer::Offer;
use lightning::offers::refund::Refund;
use lightning::sign::NodeSigner;
use lightning::types::payment::{PaymentHash, PaymentSecret};
use lightning::util::ser::Writeable;
use lightning_invoice::{Bolt11Bech32, Bolt11Invoice, SignedRawBolt11Invoice};

use super::fixed_secret;
use crate::config::HarnessConfig;
use crate::env::StaticKeySigner;

const RESPONDER_SECRET: u8 = 0x42;
const RESPONSE_CREATED_AT: Duration = Duration::from_secs(1_700_000_000);
const PAYMENT_PATH_CLTV_DELTA: u16 = 144;

/// Parses `data`, re-encodes it and reparses the encoding.
fn bytes_round_trip<T>(data: &[u8]) -> Option<T>
where
    T: TryFrom<Vec<u8>> + Writeable + PartialEq + Debug,
{
    let object = T::try_from(data.to_vec()).ok()?;
    let encoded = object.encode();
    assert_eq!(encoded, data, "object did not keep its raw bytes");
    match T::try_from(encoded) {
        Ok(again) => assert_eq!(again, object),
        Err(_) => panic!("re-encoded object failed to parse: {object:?}"),
    }
    Some(object)
}

fn string_round_trip<T>(object: &T)
where
    T: FromStr + Display + PartialEq + Debug,
    <T as FromStr>::Err: Debug,
{
    let text = object.to_string();
    match T::from_str(&text) {
        Ok(again) => assert_eq!(&again, object, "string round trip changed the object"),
        Err(e) => panic!("displayed object failed to parse: {e:?}\n{text}"),
    }
}

fn responder() -> StaticKeySigner {
    StaticKeySigner::new(fixed_secret(RESPONDER_SECRET))
}

/// One blinded path that ends at the responder.
fn payment_paths(signer: &StaticKeySigner) -> Vec<BlindedPaymentPath> {
    let secp = Secp256k1::new();
    let tlvs = UnauthenticatedReceiveTlvs {
        payment_secret: PaymentSecret([0x77; 32]),
        payment_constraints: PaymentConstraints { max_cltv_expiry: u32::MAX, htlc_minimum_msat: 1 },
        payment_context: PaymentContext::Bolt12Refund(Bolt12RefundContext {}),
    };
    let nonce = Nonce::from_entropy_source(signer);
    let tlvs = tlvs.authenticate(nonce, &signer.get_expanded_key());
    match BlindedPaymentPath::new(&[], signer.node_id(), tlvs, u64::MAX, PAYMENT_PATH_CLTV_DELTA, signer, &secp) {
        Ok(path) => vec![path],
        Err(()) => unreachable!("a direct blinded path always builds"),
    }
}

fn sign_as_responder(unsigned: UnsignedBolt12Invoice) -> Result<Bolt12Invoice, ()> {
    let secp = Secp256k1::new();
    let keys = Keypair::from_secret_key(&secp, &fixed_secret(RESPONDER_SECRET));
    let sign = |message: &UnsignedBolt12Invoice| -> Result<schnorr::Signature, ()> {
        Ok(secp.sign_schnorr_no_aux_rand(message.tagged_hash().as_digest(), &keys))
    };
    unsigned.sign(sign).map_err(|_| ())
}

fn check_response(invoice: &Bolt12Invoice) {
    if bytes_round_trip::<Bolt12Invoice>(&invoice.encode()).is_none() {
        panic!("responder built an invoice that does not parse: {invoice:?}");
    }
}

/// Answers a request with an invoice. Signing only succeeds when the
/// offer names the responder as its issuer.
fn respond_to_request(request: &InvoiceRequest) -> Option<Bolt12Invoice> {
    let signer = responder();
    let hash = PaymentHash([0x55; 32]);
    let builder = request.respond_with_no_std(payment_paths(&signer), hash, RESPONSE_CREATED_AT).ok()?;
    let unsigned = builder.build().ok()?;
    match sign_as_responder(unsigned) {
        Ok(invoice) => {
            check_response(&invoice);
            assert_eq!(invoice.payment_hash(), hash);
            Some(invoice)
        }
        Err(()) => {
            assert_ne!(request.issuer_signing_pubkey(), Some(signer.node_id()), "responder failed to sign its own offer");
            None
        }
    }
}

fn respond_to_refund(refund: &Refund) -> Option<Bolt12Invoice> {
    let signer = responder();
    let hash = PaymentHash([0x66; 32]);
    let builder = refund
        .respond_with_no_std(payment_paths(&signer), hash, signer.node_id(), RESPONSE_CREATED_AT)
        .ok()?;
    let unsigned = builder.build().ok()?;
    match sign_as_responder(unsigned) {
        Ok(invoice) => {
            check_response(&invoice);
            assert_eq!(invoice.amount_msats(), refund.amount_msats());
            Some(invoice)
        }
        Err(()) => panic!("responder failed to sign a refund invoice: {refund:?}"),
    }
}

pub fn offer_deser(data: &[u8], _config: &HarnessConfig) {
    if let Some(offer) = bytes_round_trip::<Offer>(data) {
        string_round_trip(&offer);
    }
}

pub fn invoice_request_deser(data: &[u8], _config: &HarnessConfig) {
    if let Some(request) = bytes_round_trip::<InvoiceRequest>(data) {
        let _ = respond_to_request(&request);
    }
}

pub fn refund_deser(data: &[u8], _config: &HarnessConfig) {
    if let Some(refund) = bytes_round_trip::<Refund>(data) {
        string_round_trip(&refund);
        let _ = respond_to_refund(&refund);
    }
}

pub fn invoice_deser(data: &[u8], _config: &HarnessConfig) {
    let _ = bytes_round_trip::<Bolt12Invoice>(data);
}

/// Checksums `values` under `hrp`, giving the invoice's string form.
fn bolt11_string(hrp: &str, values: &[u8]) -> Option<String> {
    let hrp = Hrp::parse(hrp).ok()?;
    let fes = values.iter().map(|&v| Fe32::try_from(v)).collect::<Result<Vec<_>, _>>().ok()?;
    Some(fes.into_iter().with_checksum::<Bolt11Bech32>(&hrp).chars().collect())
}

/// First byte is the hrp length, then the hrp, then one 5-bit value per
/// byte. The harness adds the checksum.
pub fn bolt11_deser(data: &[u8], _config: &HarnessConfig) {
    let Some((&hrp_len, rest)) = data.split_first() else {
        return;
    };
    let Some((hrp, values)) = rest.split_at_checked(hrp_len as usize) else {
        return;
    };
    let Ok(hrp) = std::str::from_utf8(hrp) else {
        return;
    };
    let Some(text) = bolt11_string(hrp, values) else {
        return;
    };
    let Ok(signed) = SignedRawBolt11Invoice::from_str(&text) else {
        return;
    };
    string_round_trip(&signed);

    if let Ok(invoice) = Bolt11Invoice::from_signed(signed) {
        string_round_trip(&invoice);
        assert!(invoice.check_signature().is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::{sha256, Hash};
    use bitcoin::secp256k1::{PublicKey, SecretKey};
    use lightning::ln::channelmanager::PaymentId;
    use lightning::ln::inbound_payment::ExpandedKey;
    use lightning::offers::offer::OfferBuilder;
    use lightning::offers::refund::RefundBuilder;
    use lightning_invoice::{Currency, InvoiceBuilder};

    fn payer_secret() -> SecretKey {
        fixed_secret(0x21)
    }

    fn request_for(offer: &Offer) -> InvoiceRequest {
        let secp = Secp256k1::new();
        let key = ExpandedKey::new([7; 32]);
        let nonce = Nonce::try_from(&[1u8; 16][..]).unwrap();
        offer.request_invoice(&key, nonce, &secp, PaymentId([1; 32])).unwrap().build_and_sign().unwrap()
    }

    /// Turns an invoice string back into this target's input layout.
    fn bolt11_input(text: &str) -> Vec<u8> {
        let parsed = bech32::primitives::decode::CheckedHrpstring::new::<Bolt11Bech32>(text).unwrap();
        let hrp = parsed.hrp().to_string();
        let mut input = vec![hrp.len() as u8];
        input.extend_from_slice(hrp.as_bytes());
        input.extend(parsed.fe32_iter::<&mut dyn Iterator<Item = u8>>().map(Fe32::to_u8));
        input
    }

    #[test]
    fn empty_and_truncated_inputs_return() {
        let cfg = HarnessConfig::default();
        for data in [&[][..], &[0x00], &[0x04, b'l', b'n'], &[0x02, b'l', b'n', 40]] {
            offer_deser(data, &cfg);
            invoice_request_deser(data, &cfg);
            refund_deser(data, &cfg);
            invoice_deser(data, &cfg);
            bolt11_deser(data, &cfg);
        }
    }

    #[test]
    fn request_for_responder_offer_gets_an_invoice() {
        let offer = OfferBuilder::new(responder().node_id())
            .amount_msats(10_000)
            .description("coffee".to_owned())
            .build()
            .unwrap();
        offer_deser(&offer.encode(), &HarnessConfig::default());

        let request = request_for(&offer);
        invoice_request_deser(&request.encode(), &HarnessConfig::default());
        let invoice = respond_to_request(&request).unwrap();
        assert_eq!(invoice.amount_msats(), 10_000);
        invoice_deser(&invoice.encode(), &HarnessConfig::default());
    }

    #[test]
    fn request_for_foreign_offer_is_not_signed() {
        let issuer = PublicKey::from_secret_key(&Secp256k1::new(), &fixed_secret(0x33));
        let offer = OfferBuilder::new(issuer).build().unwrap();
        let request = request_for(&offer);
        assert!(respond_to_request(&request).is_none());
    }

    #[test]
    fn refund_is_answered_for_its_amount() {
        let payer = PublicKey::from_secret_key(&Secp256k1::new(), &payer_secret());
        let refund = RefundBuilder::new(vec![9; 32], payer, 5_000).unwrap().build().unwrap();
        refund_deser(&refund.encode(), &HarnessConfig::default());
        let invoice = respond_to_refund(&refund).unwrap();
        assert_eq!(invoice.amount_msats(), 5_000);
    }

    #[test]
    fn signed_bolt11_invoice_round_trips() {
        let secp = Secp256k1::new();
        let payee = payer_secret();
        // payment_secret sets var_onion_optin (8) and payment_secret (14); basic_mpp adds 17
        let invoice = InvoiceBuilder::new(Currency::Regtest)
            .description("fuzz".to_owned())
            .payment_hash(sha256::Hash::hash(&[1; 32]))
            .payment_secret(PaymentSecret([2; 32]))
            .basic_mpp()
            .duration_since_epoch(RESPONSE_CREATED_AT)
            .min_final_cltv_expiry_delta(144)
            .amount_milli_satoshis(250_000)
            .build_signed(|hash| secp.sign_ecdsa_recoverable(hash, &payee))
            .unwrap();
        let features = invoice.features().unwrap();
        assert!(features.supports_payment_secret() && features.supports_basic_mpp());
        assert!(!features.requires_unknown_bits());

        let text = invoice.to_string();
        assert!(text.starts_with("lnbcrt2500n1"));
        let input = bolt11_input(&text);
        bolt11_deser(&input, &HarnessConfig::default());
        assert_eq!(bolt11_string("lnbcrt2500n", &input[12..]).as_deref(), Some(text.as_str()));
        assert_eq!(Bolt11Invoice::from_str(&text).unwrap(), invoice);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert_eq!(bolt11_string("lnbc", &[0, 31, 32]), None);
        assert_eq!(bolt11_string("", &[0]), None);
    }
}
