//! Persisted-object targets: monitors, channel details, onion failure
//! packets and hop payloads.

use bitcoin::hashes::sha256::Hash as Sha256;
use bitcoin::hashes::Hash as _;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::BlockHash;
use lightning::chain::channelmonitor::ChannelMonitor;
use lightning::ln::channel_state::ChannelDetails;
use lightning::ln::channelmanager::{PendingHTLCRouting, RecipientOnionFields};
use lightning::ln::msgs::{OnionPacket, UpdateAddHTLC};
use lightning::ln::onion_payment::peel_payment_onion;
use lightning::ln::onion_utils::create_payment_onion;
use lightning::ln::types::ChannelId;
use lightning::routing::router::{Path, RouteHop};
use lightning::sign::{InMemorySigner, KeysManager};
use lightning::types::features::{ChannelFeatures, NodeFeatures};
use lightning::types::payment::{PaymentHash, PaymentPreimage, PaymentSecret};
use lightning::util::ser::{ReadableArgs, Writeable};

use super::{fixed_secret, msg, read_prefix};
use crate::config::HarnessConfig;
use crate::env::{StaticKeySigner, TraceLogger};
use crate::input::FuzzInput;

/// Monitors are read with signer material from this fixed seed.
const MONITOR_KEYS_SEED: [u8; 32] = [0x5a; 32];
/// Height hop payloads are built and peeled at.
const ONION_HEIGHT: u32 = 100;
/// First hop node key; later hops use the following bytes.
const FIRST_HOP_SECRET: u8 = 0x41;
const SESSION_SECRET: u8 = 0x41;
const MAX_ONION_HOPS: usize = 5;
const MAX_CUSTOM_TLVS: usize = 4;
const MIN_HOP_CLTV_DELTA: u32 = 144;

/// A monitor that decodes must write out to bytes that decode to an equal
/// monitor at the same block.
pub fn chanmon_deser(data: &[u8], _config: &HarnessConfig) {
    let keys = KeysManager::new(&MONITOR_KEYS_SEED, 0, 0, true);
    let mut r = data;
    let Ok((block_hash, monitor)) = <(BlockHash, ChannelMonitor<InMemorySigner>)>::read(&mut r, (&keys, &keys)) else {
        return;
    };
    let encoded = monitor.encode();
    let (again_hash, again) =
        match <(BlockHash, ChannelMonitor<InMemorySigner>)>::read(&mut &encoded[..], (&keys, &keys)) {
            Ok(pair) => pair,
            Err(e) => panic!("re-serialized monitor failed to decode: {e:?}"),
        };
    assert_eq!(again_hash, block_hash, "monitor moved to another block");
    assert!(again == monitor, "monitor changed across a write/read cycle");
    assert_eq!(again.get_latest_update_id(), monitor.get_latest_update_id());
}

pub fn msg_channel_details(data: &[u8], _config: &HarnessConfig) {
    msg::simple::<ChannelDetails>(data)
}

/// A decrypted failure packet: HMAC, then failure message and padding,
/// each behind a collection length.
type DecodedOnionErrorPacket = ([u8; 32], Vec<u8>, Vec<u8>);

pub fn msg_decoded_onion_error_packet(data: &[u8], _config: &HarnessConfig) {
    let Some((packet, used)) = read_prefix::<DecodedOnionErrorPacket>(data) else {
        return;
    };
    assert_eq!(packet.encode(), &data[..used], "failure packet re-encoding differs: {packet:?}");
}

/// What a sender asked one onion to carry.
#[derive(Debug, Clone)]
pub(crate) struct OnionPlan {
    pub(crate) hop_secrets: Vec<SecretKey>,
    pub(crate) fees_msat: Vec<u64>,
    pub(crate) cltv_deltas: Vec<u32>,
    pub(crate) keysend: Option<PaymentPreimage>,
    pub(crate) payment_secret: PaymentSecret,
    pub(crate) payment_metadata: Option<Vec<u8>>,
    pub(crate) custom_tlvs: Vec<(u64, Vec<u8>)>,
}

impl OnionPlan {
    fn from_input(input: &mut FuzzInput<'_>) -> Option<OnionPlan> {
        let hops = 1 + input.take_u8() as usize % MAX_ONION_HOPS;
        let mut plan = OnionPlan {
            hop_secrets: (0..hops).map(|i| fixed_secret(FIRST_HOP_SECRET + i as u8)).collect(),
            fees_msat: Vec::with_capacity(hops),
            cltv_deltas: Vec::with_capacity(hops),
            keysend: None,
            payment_secret: PaymentSecret(input.take_array()?),
            payment_metadata: None,
            custom_tlvs: Vec::new(),
        };
        for _ in 0..hops {
            plan.fees_msat.push(u64::from(input.take_u24()).max(1));
            plan.cltv_deltas.push(MIN_HOP_CLTV_DELTA + u32::from(input.take_u8()));
        }
        let flags = input.take_u8();
        if flags & 1 != 0 {
            plan.keysend = Some(PaymentPreimage(input.take_array()?));
        }
        if flags & 2 != 0 {
            plan.payment_metadata = Some(input.take_u16_len_prefixed(256).to_vec());
        }
        for _ in 0..(flags >> 2) as usize % (MAX_CUSTOM_TLVS + 1) {
            let kind = (1u64 << 16) + u64::from(input.take_u16());
            plan.custom_tlvs.push((kind, input.take_len_prefixed(64).to_vec()));
        }
        Some(plan)
    }

    pub(crate) fn payment_hash(&self) -> PaymentHash {
        match self.keysend {
            Some(preimage) => PaymentHash(Sha256::hash(&preimage.0).to_byte_array()),
            None => PaymentHash(Sha256::hash(&self.payment_secret.0).to_byte_array()),
        }
    }

    pub(crate) fn recipient_fields(&self) -> Option<RecipientOnionFields> {
        let mut fields = match self.keysend {
            Some(_) => RecipientOnionFields::spontaneous_empty(),
            None => RecipientOnionFields::secret_only(self.payment_secret),
        };
        fields.payment_metadata = self.payment_metadata.clone();
        fields.with_custom_tlvs(self.custom_tlvs.clone()).ok()
    }

    fn path(&self, secp: &Secp256k1<bitcoin::secp256k1::All>) -> Path {
        let hops = self
            .hop_secrets
            .iter()
            .zip(&self.fees_msat)
            .zip(&self.cltv_deltas)
            .enumerate()
            .map(|(i, ((secret, &fee_msat), &cltv_expiry_delta))| RouteHop {
                pubkey: PublicKey::from_secret_key(secp, secret),
                node_features: NodeFeatures::empty(),
                short_channel_id: 1 + i as u64,
                channel_features: ChannelFeatures::empty(),
                fee_msat,
                cltv_expiry_delta,
                maybe_announced_channel: true,
            })
            .collect();
        Path { hops, blinded_tail: None }
    }

    pub(crate) fn total_msat(&self) -> u64 {
        self.fees_msat.iter().sum()
    }

    /// The first hop's `update_add_htlc`, or `None` when the payload does not
    /// fit the onion.
    pub(crate) fn build(&self) -> Option<UpdateAddHTLC> {
        let secp = Secp256k1::new();
        let fields = self.recipient_fields()?;
        let final_msat = *self.fees_msat.last()?;
        let (onion, amount_msat, cltv_expiry) = create_payment_onion(
            &secp,
            &self.path(&secp),
            &fixed_secret(SESSION_SECRET),
            final_msat,
            &fields,
            ONION_HEIGHT + 1,
            &self.payment_hash(),
            &self.keysend,
            None,
            [0x42; 32],
        )
        .ok()?;
        Some(update_add(onion, amount_msat, cltv_expiry, self.payment_hash()))
    }
}

fn update_add(onion: OnionPacket, amount_msat: u64, cltv_expiry: u32, payment_hash: PaymentHash) -> UpdateAddHTLC {
    UpdateAddHTLC {
        channel_id: ChannelId([0; 32]),
        htlc_id: 0,
        amount_msat,
        payment_hash,
        cltv_expiry,
        skimmed_fee_msat: None,
        onion_routing_packet: onion,
        blinding_point: None,
        hold_htlc: None,
    }
}

/// Peels `add` at every hop of `plan`, checking each forward against the
/// route and the final payload against what was sent. Returns the next-hop
/// ephemeral keys seen along the way.
pub(crate) fn peel_all(plan: &OnionPlan, mut add: UpdateAddHTLC) -> Vec<PublicKey> {
    let secp = Secp256k1::new();
    let logger = TraceLogger { node: 0 };
    let mut ephemeral = Vec::new();
    let last = plan.hop_secrets.len() - 1;
    for (i, secret) in plan.hop_secrets.iter().enumerate() {
        let signer = StaticKeySigner::new(*secret);
        let info = match peel_payment_onion(&add, &signer, &logger, &secp, ONION_HEIGHT, false) {
            Ok(info) => info,
            Err(e) => panic!("hop {i} could not peel an onion built for it: {}", e.msg),
        };
        let expected_msat: u64 = plan.fees_msat[i + 1..].iter().sum::<u64>() + plan.fees_msat[last] * u64::from(i == last);
        assert_eq!(info.outgoing_amt_msat, expected_msat, "hop {i} forwards the wrong amount");
        match info.routing {
            PendingHTLCRouting::Forward { onion_packet, short_channel_id, .. } => {
                assert!(i < last, "final hop was told to forward");
                assert_eq!(short_channel_id, 2 + i as u64, "hop {i} forwards over the wrong channel");
                let Ok(next_key) = onion_packet.public_key else {
                    panic!("hop {i} produced an invalid next ephemeral key");
                };
                ephemeral.push(next_key);
                add = update_add(onion_packet, info.outgoing_amt_msat, info.outgoing_cltv_value, add.payment_hash);
            }
            PendingHTLCRouting::Receive { payment_data, payment_metadata, custom_tlvs, .. } => {
                assert_eq!(i, last, "hop {i} was told to receive");
                assert!(plan.keysend.is_none());
                assert_eq!(payment_data.payment_secret, plan.payment_secret);
                assert_eq!(payment_data.total_msat, plan.fees_msat[last]);
                assert_eq!(payment_metadata, plan.payment_metadata);
                assert_eq!(custom_tlvs, sorted(&plan.custom_tlvs));
            }
            PendingHTLCRouting::ReceiveKeysend { payment_preimage, payment_metadata, custom_tlvs, .. } => {
                assert_eq!(i, last, "hop {i} was told to receive");
                assert_eq!(Some(payment_preimage), plan.keysend);
                assert_eq!(payment_metadata, plan.payment_metadata);
                assert_eq!(custom_tlvs, sorted(&plan.custom_tlvs));
            }
            _ => panic!("hop {i} decoded an unexpected routing"),
        }
    }
    ephemeral
}

fn sorted(tlvs: &[(u64, Vec<u8>)]) -> Vec<(u64, Vec<u8>)> {
    let mut tlvs = tlvs.to_vec();
    tlvs.sort_by_key(|(kind, _)| *kind);
    tlvs
}

/// Hop payloads built from the input are carried through a real onion and
/// peeled hop by hop. A single flipped byte must make the first hop reject
/// the packet.
pub fn onion_hop_data(data: &[u8], _config: &HarnessConfig) {
    let mut input = FuzzInput::new(data);
    let Some(plan) = OnionPlan::from_input(&mut input) else {
        return;
    };
    let Some(add) = plan.build() else {
        return;
    };
    assert_eq!(add.amount_msat, plan.total_msat());

    if !input.is_exhausted() {
        let mut tampered = add.clone();
        let at = input.take_u16() as usize % tampered.onion_routing_packet.hop_data.len();
        tampered.onion_routing_packet.hop_data[at] ^= 1 + input.take_u8() % 0xff;
        let secp = Secp256k1::new();
        let signer = StaticKeySigner::new(plan.hop_secrets[0]);
        let logger = TraceLogger { node: 0 };
        assert!(
            peel_payment_onion(&tampered, &signer, &logger, &secp, ONION_HEIGHT, false).is_err(),
            "tampered onion was accepted"
        );
    }
    peel_all(&plan, add);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(hops: usize) -> OnionPlan {
        OnionPlan {
            hop_secrets: (0..hops).map(|i| fixed_secret(0x41 + i as u8)).collect(),
            fees_msat: vec![1_000; hops],
            cltv_deltas: vec![144; hops],
            keysend: None,
            payment_secret: PaymentSecret([7; 32]),
            payment_metadata: None,
            custom_tlvs: Vec::new(),
        }
    }

    fn key(hex_str: &str) -> PublicKey {
        PublicKey::from_slice(&hex::decode(hex_str).unwrap()).unwrap()
    }

    #[test]
    fn bolt4_ephemeral_key_chain() {
        let plan = plan(5);
        let add = plan.build().unwrap();
        assert_eq!(
            add.onion_routing_packet.public_key.unwrap(),
            key("02eec7245d6b7d2ccb30380bfbe2a3648cd7a942653f5aa340edcea1f283686619")
        );
        let ephemeral = peel_all(&plan, add);
        assert_eq!(
            ephemeral,
            vec![
                key("028f9438bfbf7feac2e108d677e3a82da596be706cc1cf342b75c7b7e22bf4e6e2"),
                key("03bfd8225241ea71cd0843db7709f4c222f62ff2d4516fd38b39914ab6b83e0da0"),
                key("031dde6926381289671300239ea8e57ffaf9bebd05b9a5b95beaf07af05cd43595"),
                key("03a214ebd875aab6ddfd77f22c5e7311d7f77f17a169e599f157bbcdae8bf071f4"),
            ]
        );
    }

    #[test]
    fn bolt4_first_hop_shared_secret() {
        use lightning::sign::{NodeSigner, Recipient};
        let signer = StaticKeySigner::new(fixed_secret(0x41));
        let session = PublicKey::from_secret_key(&Secp256k1::new(), &fixed_secret(0x41));
        let shared = signer.ecdh(Recipient::Node, &session, None).unwrap();
        assert_eq!(
            hex::encode(shared.secret_bytes()),
            "53eb63ea8a3fec3b3cd433b85cd62a4b145e1dda09391b348c4e1cd36a03ea66"
        );
    }

    #[test]
    fn keysend_with_metadata_and_custom_records_reaches_the_payee() {
        let mut plan = plan(3);
        plan.keysend = Some(PaymentPreimage([9; 32]));
        plan.payment_metadata = Some(vec![1, 2, 3]);
        plan.custom_tlvs = vec![(70_000, vec![5; 10]), (65_537, vec![])];
        let add = plan.build().unwrap();
        assert_eq!(add.amount_msat, 3_000);
        assert_eq!(peel_all(&plan, add).len(), 2);
    }

    #[test]
    fn oversized_payload_does_not_build() {
        let mut plan = plan(5);
        plan.custom_tlvs = (0..20).map(|i| (70_000 + i, vec![0xab; 200])).collect();
        assert!(plan.build().is_none());
    }

    #[test]
    fn hop_data_target_accepts_structured_and_short_input() {
        let cfg = HarnessConfig::default();
        onion_hop_data(&[], &cfg);
        onion_hop_data(&[2], &cfg);
        let mut data = vec![2];
        data.extend_from_slice(&[0x33; 32]);
        data.extend_from_slice(&[0, 0x10, 0, 5, 0, 0x20, 0, 6, 0, 0x30, 0, 7]);
        data.push(0b0000_0110);
        data.extend_from_slice(&[0, 2, 0xaa, 0xbb]);
        data.extend_from_slice(&[0, 9, 3, 1, 2, 3]);
        data.extend_from_slice(&[0x01, 0x00, 0x40]);
        onion_hop_data(&data, &cfg);
    }

    #[test]
    fn error_packet_layout_round_trips() {
        let packet: DecodedOnionErrorPacket = ([9; 32], vec![0x40, 0x0f], vec![0; 4]);
        let bytes = packet.encode();
        assert_eq!(bytes.len(), 32 + 2 + 2 + 2 + 4);
        msg_decoded_onion_error_packet(&bytes, &HarnessConfig::default());
        msg_decoded_onion_error_packet(&bytes[..33], &HarnessConfig::default());
    }

    #[test]
    fn garbage_monitor_is_rejected() {
        chanmon_deser(&[0xff; 16], &HarnessConfig::default());
        chanmon_deser(&[], &HarnessConfig::default());
    }
}
