//! Onion message target.
//!
//! Two phases share the input. A `u16`-length-prefixed chunk is parsed as a
//! raw `onion_message` and peeled with a fixed node key. The rest describes
//! an honest message: a 1 to 4 hop route, optionally ending in a blinded
//! path with dummy hops, a custom note, an optional reply path and a set of
//! byte corruptions applied at one hop.

use bitcoin::secp256k1::{All, PublicKey, Secp256k1};
use lightning::blinded_path::message::{BlindedMessagePath, MessageContext, MessageForwardNode, NextMessageHop};
use lightning::blinded_path::EmptyNodeIdLookUp;
use lightning::io;
use lightning::ln::msgs::{DecodeError, OnionMessage};
use lightning::onion_message::messenger::{
    create_onion_message, peel_onion_message, CustomOnionMessageHandler, Destination, MessageSendInstructions,
    OnionMessagePath, PeeledOnion, Responder, ResponseInstruction,
};
use lightning::onion_message::packet::OnionMessageContents;
use lightning::sign::NodeSigner;
use lightning::util::ser::{Writeable, Writer};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, trace};

use super::{fixed_secret, random_secret, read_prefix};
use crate::config::HarnessConfig;
use crate::env::{StaticKeySigner, TraceLogger};
use crate::input::FuzzInput;

const PEELING_NODE_SECRET: u8 = 0x21;
const MAX_HOPS: usize = 4;
const MAX_DUMMY_HOPS: u8 = 3;
const MAX_CONTEXT_LEN: usize = 64;
const MAX_NOTE_LEN: usize = 2048;
const MAX_CORRUPTIONS: u8 = 4;

/// Notes live far above the offers, async payment and DNS resolver types.
const NOTE_TLV_BASE: u64 = 1 << 32;

/// Opaque custom onion message contents.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Note {
    tlv_type: u64,
    payload: Vec<u8>,
}

impl Writeable for Note {
    fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
        w.write_all(&self.payload)
    }
}

impl OnionMessageContents for Note {
    fn tlv_type(&self) -> u64 {
        self.tlv_type
    }

    fn msg_type(&self) -> &'static str {
        "Note"
    }
}

/// Reads notes and never answers them.
struct NoteReader;

impl CustomOnionMessageHandler for NoteReader {
    type CustomMessage = Note;

    fn handle_custom_message(
        &self, _message: Note, _context: Option<Vec<u8>>, _responder: Option<Responder>,
    ) -> Option<(Note, ResponseInstruction)> {
        None
    }

    fn read_custom_message<R: io::Read>(&self, message_type: u64, buffer: &mut R) -> Result<Option<Note>, DecodeError> {
        if message_type < NOTE_TLV_BASE {
            return Ok(None);
        }
        let mut payload = Vec::new();
        buffer.read_to_limit(&mut payload, u64::MAX)?;
        Ok(Some(Note { tlv_type: message_type, payload }))
    }

    fn release_pending_custom_messages(&self) -> Vec<(Note, MessageSendInstructions)> {
        Vec::new()
    }
}

fn peel(
    msg: &OnionMessage, secp: &Secp256k1<All>, signer: &StaticKeySigner, node: usize,
) -> Result<PeeledOnion<Note>, ()> {
    peel_onion_message(msg, secp, signer, &TraceLogger { node }, &NoteReader)
}

/// Phase one: arbitrary bytes against a fixed node.
fn peel_raw(raw: &[u8], secp: &Secp256k1<All>) {
    let Some((msg, used)) = read_prefix::<OnionMessage>(raw) else {
        return;
    };
    assert_eq!(msg.encode(), &raw[..used], "onion message re-encoding differs");

    let signer = StaticKeySigner::new(fixed_secret(PEELING_NODE_SECRET));
    match peel(&msg, secp, &signer, 0) {
        Ok(PeeledOnion::Forward(_, message)) => {
            assert_eq!(
                message.onion_routing_packet.hop_data.len(),
                msg.onion_routing_packet.hop_data.len(),
                "forwarded packet changed size"
            );
            let encoded = message.encode();
            match read_prefix::<OnionMessage>(&encoded) {
                Some((again, used)) => {
                    assert_eq!(used, encoded.len());
                    assert_eq!(again, message);
                }
                None => panic!("forwarded onion message failed to decode"),
            }
        }
        Ok(PeeledOnion::Custom(note, ..)) => assert!(note.tlv_type >= NOTE_TLV_BASE),
        Ok(other) => trace!(?other, "raw onion message received"),
        Err(()) => trace!("raw onion message rejected"),
    }
}

#[derive(Debug, Clone, Copy)]
struct Corruption {
    field: u8,
    index: usize,
    mask: u8,
}

impl Corruption {
    fn take(input: &mut FuzzInput<'_>) -> Corruption {
        Corruption { field: input.take_u8() % 4, index: input.take_u16() as usize, mask: input.take_u8() | 1 }
    }

    fn apply(self, msg: &mut OnionMessage) {
        let Corruption { field, index, mask } = self;
        let packet = &mut msg.onion_routing_packet;
        match field {
            0 => {
                let len = packet.hop_data.len();
                packet.hop_data[index % len] ^= mask;
            }
            1 => packet.hmac[index % 32] ^= mask,
            2 => {
                if let Some(key) = flip_key_byte(&packet.public_key, index, mask) {
                    packet.public_key = key;
                }
            }
            _ => {
                if let Some(key) = flip_key_byte(&msg.blinding_point, index, mask) {
                    msg.blinding_point = key;
                }
            }
        }
    }
}

/// The key with one serialized byte flipped, if that is still a point.
fn flip_key_byte(key: &PublicKey, index: usize, mask: u8) -> Option<PublicKey> {
    let mut raw = key.serialize();
    raw[index % raw.len()] ^= mask;
    PublicKey::from_slice(&raw).ok()
}

/// Phase two: honest construction, optional corruption, hop-by-hop peel.
fn build_and_peel(input: &mut FuzzInput<'_>, secp: &Secp256k1<All>, config: &HarnessConfig) {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let sender = StaticKeySigner::new(random_secret(&mut rng));
    let hops = 1 + input.take_u8() as usize % MAX_HOPS;
    let nodes: Vec<StaticKeySigner> = (0..hops).map(|_| StaticKeySigner::new(random_secret(&mut rng))).collect();
    let ids: Vec<PublicKey> = nodes.iter().map(StaticKeySigner::node_id).collect();
    let recipient = &nodes[hops - 1];

    let blinded_from = match input.take_u8() {
        0 => None,
        b => Some((b as usize - 1) % hops),
    };
    let (intermediate_nodes, destination, context) = match blinded_from {
        None => (ids[..hops - 1].to_vec(), Destination::Node(ids[hops - 1]), None),
        Some(from) => {
            let dummies = (input.take_u8() % (MAX_DUMMY_HOPS + 1)) as usize;
            let context = input.take_len_prefixed(MAX_CONTEXT_LEN).to_vec();
            let forward: Vec<MessageForwardNode> =
                ids[from..hops - 1].iter().map(|&node_id| MessageForwardNode { node_id, short_channel_id: None }).collect();
            let path = BlindedMessagePath::new_with_dummy_hops(
                &forward,
                ids[hops - 1],
                dummies,
                recipient.get_receive_auth_key(),
                MessageContext::Custom(context.clone()),
                recipient,
                secp,
            );
            (ids[..from].to_vec(), Destination::BlindedPath(path), Some(context))
        }
    };

    let note = Note {
        tlv_type: NOTE_TLV_BASE + input.take_u8() as u64,
        payload: input.take_u16_len_prefixed(MAX_NOTE_LEN).to_vec(),
    };
    let reply_path = input.take_bool().then(|| {
        BlindedMessagePath::one_hop(
            sender.node_id(),
            sender.get_receive_auth_key(),
            MessageContext::Custom(Vec::new()),
            &sender,
            secp,
        )
    });
    let corrupt_at = input.take_u8() as usize % hops;
    let corruptions: Vec<Corruption> =
        (0..input.take_u8() % MAX_CORRUPTIONS).map(|_| Corruption::take(input)).collect();

    let path = OnionMessagePath { intermediate_nodes, destination, first_node_addresses: Vec::new() };
    let signer = &sender;
    let (first, mut msg, _) =
        match create_onion_message(&signer, &signer, &EmptyNodeIdLookUp {}, secp, path, note.clone(), reply_path.clone()) {
            Ok(built) => built,
            Err(e) => panic!("building an onion message over {hops} honest hops failed: {e:?}"),
        };
    assert_eq!(first, ids[0]);
    let packet_len = msg.onion_routing_packet.hop_data.len();

    for (i, node) in nodes.iter().enumerate() {
        let mut corrupted = false;
        if i == corrupt_at && !corruptions.is_empty() {
            let original = msg.clone();
            for c in &corruptions {
                c.apply(&mut msg);
            }
            corrupted = msg != original;
        }
        let peeled = peel(&msg, secp, node, i + 1);
        if corrupted {
            assert!(peeled.is_err(), "corrupted message accepted at hop {i}");
            debug!(hop = i, "corrupted message rejected");
            return;
        }
        match peeled {
            Ok(PeeledOnion::Forward(next_hop, message)) => {
                assert!(i + 1 < hops, "final hop asked to forward");
                assert_eq!(next_hop, NextMessageHop::NodeId(ids[i + 1]));
                assert_eq!(message.onion_routing_packet.hop_data.len(), packet_len);
                msg = message;
            }
            Ok(PeeledOnion::Custom(got, got_context, got_reply)) => {
                assert_eq!(i + 1, hops, "intermediate hop received the message");
                assert_eq!(got, note, "recipient saw different contents");
                assert_eq!(got_context, context);
                assert_eq!(got_reply, reply_path);
                return;
            }
            Ok(other) => panic!("honest note peeled as {other:?} at hop {i}"),
            Err(()) => panic!("honest message rejected at hop {i}"),
        }
    }
    unreachable!("peeling ended without a recipient");
}

pub fn run(data: &[u8], config: &HarnessConfig) {
    let secp = Secp256k1::new();
    let mut input = FuzzInput::new(data);
    let raw = input.take_u16_len_prefixed(usize::MAX);
    peel_raw(raw, &secp);
    if !input.is_exhausted() {
        build_and_peel(&mut input, &secp, config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unblinded_three_hops_reach_the_recipient() {
        // no raw part, 3 hops, direct destination, note type +5, payload "abc", no reply, no corruption
        let data = [0, 0, 2, 0, 5, 0, 3, b'a', b'b', b'c', 0, 0, 0];
        run(&data, &HarnessConfig::default());
    }

    #[test]
    fn blinded_path_with_dummies_and_reply() {
        // 4 hops, blinded from hop 1, 2 dummies, context "ctx", empty note, reply path
        let data = [0, 0, 3, 2, 2, 3, b'c', b't', b'x', 9, 0, 0, 1, 0, 0];
        run(&data, &HarnessConfig::default());
    }

    #[test]
    fn large_note_uses_the_big_packet() {
        let mut data = vec![0, 0, 1, 1, 0, 0, 7, 0x04, 0x00];
        data.extend_from_slice(&[0xab; 1024]);
        data.extend_from_slice(&[0, 0, 0]);
        run(&data, &HarnessConfig::default());
    }

    #[test]
    fn corrupted_hmac_is_rejected() {
        // 2 hops, direct, empty note, no reply, corrupt at hop 1 once: hmac byte 0
        let data = [0, 0, 1, 0, 0, 0, 0, 0, 1, 1, 1, 0, 0, 0x80];
        run(&data, &HarnessConfig::default());
    }

    #[test]
    fn corrupted_blinding_point_is_rejected() {
        // 3 hops, blinded from hop 0, corrupt at hop 0: blinding point byte 5
        let data = [0, 0, 2, 1, 0, 0, 0, 0, 0, 0, 0, 1, 3, 0, 5, 0x10];
        run(&data, &HarnessConfig::default());
    }

    #[test]
    fn forwarded_raw_message_round_trips() {
        let secp = Secp256k1::new();
        let sender = StaticKeySigner::new(fixed_secret(0x30));
        let hop = StaticKeySigner::new(fixed_secret(PEELING_NODE_SECRET));
        let path = OnionMessagePath {
            intermediate_nodes: vec![hop.node_id()],
            destination: Destination::Node(StaticKeySigner::new(fixed_secret(0x31)).node_id()),
            first_node_addresses: Vec::new(),
        };
        let note = Note { tlv_type: NOTE_TLV_BASE, payload: b"hi".to_vec() };
        let signer = &sender;
        let (_, msg, _) = create_onion_message(&signer, &signer, &EmptyNodeIdLookUp {}, &secp, path, note, None).unwrap();
        let encoded = msg.encode();
        let mut data = (encoded.len() as u16).to_be_bytes().to_vec();
        data.extend_from_slice(&encoded);
        run(&data, &HarnessConfig::default());
        assert!(matches!(peel(&msg, &secp, &hop, 0), Ok(PeeledOnion::Forward(..))));
    }

    #[test]
    fn short_raw_messages_return() {
        run(&[0, 3, 2, 0, 0], &HarnessConfig::default());
        run(&[], &HarnessConfig::default());
    }
}
