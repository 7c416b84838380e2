//! BOLT 8 transport target, driven through LDK's peer manager.
//!
//! The first byte picks our role (bit 0 set: we connect out) and whether
//! the counterparty is a second honest peer manager or raw bytes from the
//! input (bit 1 set: honest). The next 32 bytes are our node secret and
//! the 32 after that seed our ephemeral keys.
//!
//! ```text
//! [flags] [our secret: 32] [ephemeral seed: 32] [their key: 33, raw outbound only] [actions...]
//! ```
//!
//! Honest peers exchange opaque custom messages after the handshake; the
//! receiver must see exactly what was sent, in order, across key
//! rotations and split reads.

use std::sync::{Arc, Mutex};

use bitcoin::secp256k1::{PublicKey, SecretKey};
use lightning::io;
use lightning::ln::msgs::{DecodeError, Init, LightningError};
use lightning::ln::peer_handler::{
    CustomMessageHandler, ErroringMessageHandler, IgnoringMessageHandler, MessageHandler, PeerManager,
};
use lightning::ln::wire::{CustomMessageReader, Type};
use lightning::types::features::{InitFeatures, NodeFeatures};
use lightning::util::ser::{LengthLimitedRead, LengthReadable, WithoutLength, Writeable, Writer};
use rand::rngs::StdRng;
use rand::{RngExt as _, SeedableRng};
use tracing::{debug, trace};

use super::random_secret;
use crate::config::HarnessConfig;
use crate::env::{lock, Pipe, StaticKeySigner, TraceLogger, BASE_TIME};
use crate::input::FuzzInput;

/// Odd, so a peer that does not know it may ignore it.
const CHATTER_TYPE: u16 = 0x8001;
/// A wire message is at most 65535 bytes including its two-byte type.
const MAX_CHATTER_LEN: usize = 65533;
/// Enough empty messages in one action to cross a key rotation; each
/// message uses two nonces and keys rotate every 1000.
const MAX_BURST: usize = 1007;
const MAX_RAW_CHUNK: usize = 1024;
pub(crate) const ACT_ONE_LEN: usize = 50;

/// An opaque custom message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Chatter(pub(crate) Vec<u8>);

impl Writeable for Chatter {
    fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
        w.write_all(&self.0)
    }
}

impl Type for Chatter {
    fn type_id(&self) -> u16 {
        CHATTER_TYPE
    }
}

/// Custom message handler that sends what it is told to and keeps what it
/// receives.
#[derive(Default)]
pub(crate) struct Mailbox {
    outbox: Mutex<Vec<(PublicKey, Chatter)>>,
    inbox: Mutex<Vec<(PublicKey, Vec<u8>)>>,
}

impl Mailbox {
    pub(crate) fn post(&self, to: PublicKey, payload: Vec<u8>) {
        lock(&self.outbox).push((to, Chatter(payload)));
    }

    pub(crate) fn take_inbox(&self) -> Vec<(PublicKey, Vec<u8>)> {
        std::mem::take(&mut *lock(&self.inbox))
    }
}

impl CustomMessageReader for Mailbox {
    type CustomMessage = Chatter;

    fn read<R: LengthLimitedRead>(&self, message_type: u16, buffer: &mut R) -> Result<Option<Chatter>, DecodeError> {
        if message_type != CHATTER_TYPE {
            return Ok(None);
        }
        let WithoutLength(payload) = WithoutLength::<Vec<u8>>::read_from_fixed_length_buffer(buffer)?;
        Ok(Some(Chatter(payload)))
    }
}

impl CustomMessageHandler for Mailbox {
    fn handle_custom_message(&self, msg: Chatter, sender_node_id: PublicKey) -> Result<(), LightningError> {
        lock(&self.inbox).push((sender_node_id, msg.0));
        Ok(())
    }

    fn get_and_clear_pending_msg(&self) -> Vec<(PublicKey, Chatter)> {
        std::mem::take(&mut *lock(&self.outbox))
    }

    fn peer_disconnected(&self, _their_node_id: PublicKey) {}

    fn peer_connected(&self, _their_node_id: PublicKey, _msg: &Init, _inbound: bool) -> Result<(), ()> {
        Ok(())
    }

    fn provided_node_features(&self) -> NodeFeatures {
        NodeFeatures::empty()
    }

    fn provided_init_features(&self, _their_node_id: PublicKey) -> InitFeatures {
        InitFeatures::empty()
    }
}

pub(crate) type Transport = PeerManager<
    Pipe,
    ErroringMessageHandler,
    IgnoringMessageHandler,
    IgnoringMessageHandler,
    Arc<TraceLogger>,
    Arc<Mailbox>,
    Arc<StaticKeySigner>,
    IgnoringMessageHandler,
>;

/// A peer manager with nothing but a mailbox behind it.
pub(crate) struct Endpoint {
    pub(crate) transport: Transport,
    pub(crate) mailbox: Arc<Mailbox>,
    pub(crate) pipe: Pipe,
    pub(crate) node_id: PublicKey,
}

impl Endpoint {
    pub(crate) fn new(index: usize, secret: SecretKey, ephemeral_seed: &[u8; 32]) -> Self {
        let mailbox = Arc::new(Mailbox::default());
        let signer = Arc::new(StaticKeySigner::new(secret));
        let handler = MessageHandler {
            chan_handler: ErroringMessageHandler::new(),
            route_handler: IgnoringMessageHandler {},
            onion_message_handler: IgnoringMessageHandler {},
            custom_message_handler: Arc::clone(&mailbox),
            send_only_message_handler: IgnoringMessageHandler {},
        };
        let logger = Arc::new(TraceLogger { node: index });
        Endpoint {
            node_id: signer.node_id(),
            transport: PeerManager::new(handler, BASE_TIME, ephemeral_seed, logger, signer),
            mailbox,
            pipe: Pipe::new(index as u64),
        }
    }

    /// Feeds bytes as if they arrived on this endpoint's socket.
    pub(crate) fn receive(&mut self, bytes: &[u8]) -> bool {
        let ok = self.transport.read_event(&mut self.pipe, bytes).is_ok();
        self.transport.process_events();
        ok
    }

    pub(crate) fn is_connected_to(&self, node_id: &PublicKey) -> bool {
        self.transport.peer_by_node_id(node_id).is_some()
    }
}

/// Shuttles bytes between the two endpoints until both go quiet. Returns
/// false if either side dropped the connection.
pub(crate) fn pump(a: &mut Endpoint, b: &mut Endpoint, rounds: usize) -> bool {
    for _ in 0..rounds {
        a.transport.process_events();
        b.transport.process_events();
        let (to_b, to_a) = (a.pipe.take_outbound(), b.pipe.take_outbound());
        if to_a.is_empty() && to_b.is_empty() {
            return true;
        }
        if !to_b.is_empty() && !b.receive(&to_b) {
            return false;
        }
        if !to_a.is_empty() && !a.receive(&to_a) {
            return false;
        }
    }
    !a.pipe.has_outbound() && !b.pipe.has_outbound()
}

/// Runs the handshake and init exchange; `a` dials `b`.
pub(crate) fn connect(a: &mut Endpoint, b: &mut Endpoint, rounds: usize) -> bool {
    let act_one = match a.transport.new_outbound_connection(b.node_id, a.pipe.clone(), None) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    assert_eq!(act_one.len(), ACT_ONE_LEN);
    assert_eq!(act_one[0], 0, "act one carries version zero");
    if b.transport.new_inbound_connection(b.pipe.clone(), None).is_err() {
        return false;
    }
    b.receive(&act_one) && pump(a, b, rounds) && a.is_connected_to(&b.node_id) && b.is_connected_to(&a.node_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Send,
    Receive,
    Burst,
    Ping,
    Garbage,
    Stop,
    Noop,
    /// No input left.
    Exhausted,
}

impl Action {
    fn next(input: &mut FuzzInput<'_>) -> Action {
        if input.is_exhausted() {
            return Action::Exhausted;
        }
        match input.take_u8() {
            0x00 => Action::Send,
            0x01 => Action::Receive,
            0x02 => Action::Burst,
            0x03 => Action::Ping,
            0x04 => Action::Garbage,
            0xff => Action::Stop,
            _ => Action::Noop,
        }
    }
}

/// Delivers everything `from` has queued to `to`, cut in two at `split`.
fn deliver_split(from: &mut Endpoint, to: &mut Endpoint, split: usize) {
    from.transport.process_events();
    let bytes = from.pipe.take_outbound();
    let split = split.min(bytes.len());
    assert!(to.receive(&bytes[..split]), "honest ciphertext rejected");
    assert!(to.receive(&bytes[split..]), "honest ciphertext rejected");
}

fn expect_inbox(to: &Endpoint, from: &PublicKey, want: &[Vec<u8>]) {
    let got = to.mailbox.take_inbox();
    assert_eq!(got.len(), want.len(), "wrong number of messages arrived");
    for ((sender, payload), want) in got.iter().zip(want) {
        assert_eq!(sender, from);
        assert_eq!(payload, want, "decrypt(encrypt(m)) != m");
    }
}

fn run_honest(input: &mut FuzzInput<'_>, us: &mut Endpoint, them: &mut Endpoint, config: &HarnessConfig) {
    for _ in 0..config.max_actions {
        let action = Action::next(input);
        trace!(?action, "peer_crypt step");
        match action {
            Action::Send | Action::Receive => {
                let split = input.take_u16() as usize;
                let payload = input.take_u16_len_prefixed(MAX_CHATTER_LEN).to_vec();
                let (from, to) = if action == Action::Send { (&mut *us, &mut *them) } else { (&mut *them, &mut *us) };
                from.mailbox.post(to.node_id, payload.clone());
                deliver_split(from, to, split);
                expect_inbox(to, &from.node_id, &[payload]);
            }
            Action::Burst => {
                let count = input.take_u16() as usize % MAX_BURST;
                for _ in 0..count {
                    us.mailbox.post(them.node_id, Vec::new());
                }
                deliver_split(us, them, usize::MAX);
                expect_inbox(them, &us.node_id, &vec![Vec::new(); count]);
            }
            Action::Ping => {
                us.transport.timer_tick_occurred();
                them.transport.timer_tick_occurred();
                assert!(pump(us, them, config.max_deliver_rounds), "ping exchange dropped the connection");
                assert!(us.is_connected_to(&them.node_id) && them.is_connected_to(&us.node_id));
            }
            Action::Garbage => {
                // a forged ciphertext with a full length header never authenticates
                let mut garbage = input.take_len_prefixed(64).to_vec();
                garbage.resize(garbage.len().max(18), 0);
                assert!(!them.receive(&garbage), "forged ciphertext was accepted");
                assert!(!them.is_connected_to(&us.node_id));
                return;
            }
            Action::Stop | Action::Exhausted => return,
            Action::Noop => {}
        }
    }
}

/// Feeds raw chunks as the counterparty until one is rejected.
fn run_raw(input: &mut FuzzInput<'_>, us: &mut Endpoint, config: &HarnessConfig) {
    for _ in 0..config.max_actions {
        if input.is_exhausted() {
            return;
        }
        let chunk = input.take_u16_len_prefixed(MAX_RAW_CHUNK);
        if !us.receive(chunk) {
            debug!(consumed = input.consumed(), "raw peer disconnected");
            return;
        }
        us.pipe.take_outbound();
    }
}

pub fn run(data: &[u8], config: &HarnessConfig) {
    let mut input = FuzzInput::new(data);
    let flags = input.take_u8();
    let (outbound, honest) = (flags & 1 == 1, flags & 2 == 2);
    let Some(our_secret) = input.take_array::<32>().and_then(|b| SecretKey::from_slice(&b).ok()) else {
        return;
    };
    let Some(ephemeral_seed) = input.take_array::<32>() else {
        return;
    };
    let mut us = Endpoint::new(0, our_secret, &ephemeral_seed);

    if honest {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let their_seed: [u8; 32] = rng.random();
        let mut them = Endpoint::new(1, random_secret(&mut rng), &their_seed);
        let connected = if outbound {
            connect(&mut us, &mut them, config.max_deliver_rounds)
        } else {
            connect(&mut them, &mut us, config.max_deliver_rounds)
        };
        assert!(connected, "honest handshake failed");
        let details = us.transport.list_peers();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].is_inbound_connection, !outbound);
        run_honest(&mut input, &mut us, &mut them, config);
        return;
    }

    if outbound {
        let Some(their_node_id) = input.take_array::<33>().and_then(|b| PublicKey::from_slice(&b).ok()) else {
            return;
        };
        match us.transport.new_outbound_connection(their_node_id, us.pipe.clone(), None) {
            Ok(act_one) => assert_eq!(act_one.len(), ACT_ONE_LEN),
            Err(_) => return,
        }
    } else if us.transport.new_inbound_connection(us.pipe.clone(), None).is_err() {
        return;
    }
    run_raw(&mut input, &mut us, config);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// BOLT 8 appendix A: act one from an initiator with static key 0x11..
    /// and ephemeral key 0x12.. to a responder with static key 0x21...
    const BOLT8_ACT_ONE: &str =
        "00036360e856310ce5d294e8be33fc807077dc56ac80d95d9cd4ddbd21325eff73f70df6086551151f58b8afe6c195782c6a";

    fn responder() -> Endpoint {
        let mut responder = Endpoint::new(0, SecretKey::from_slice(&[0x21; 32]).unwrap(), &[0x22; 32]);
        responder.transport.new_inbound_connection(responder.pipe.clone(), None).unwrap();
        responder
    }

    fn honest_prefix(outbound: bool) -> Vec<u8> {
        let mut data = vec![if outbound { 0x03 } else { 0x02 }];
        data.extend_from_slice(&[0x11; 32]);
        data.extend_from_slice(&[0x22; 32]);
        data
    }

    #[test]
    fn bolt8_act_one_vector_is_answered() {
        let mut responder = responder();
        let act_one = hex::decode(BOLT8_ACT_ONE).unwrap();
        assert!(responder.receive(&act_one));
        let act_two = responder.pipe.take_outbound();
        assert_eq!(act_two.len(), 50);
        assert_eq!(act_two[0], 0);
    }

    #[test]
    fn bolt8_act_one_tampering_disconnects() {
        let act_one = hex::decode(BOLT8_ACT_ONE).unwrap();
        // bad version, unparseable key, bad tag
        for (index, value) in [(0, 0x01), (1, 0x04), (49, act_one[49] ^ 1)] {
            let mut tampered = act_one.clone();
            tampered[index] = value;
            let mut responder = responder();
            assert!(!responder.receive(&tampered), "byte {index} tamper was accepted");
        }
    }

    #[test]
    fn bolt8_act_one_split_reads_match() {
        let act_one = hex::decode(BOLT8_ACT_ONE).unwrap();
        let mut responder = responder();
        assert!(responder.receive(&act_one[..17]));
        assert!(!responder.pipe.has_outbound());
        assert!(responder.receive(&act_one[17..]));
        assert_eq!(responder.pipe.take_outbound().len(), 50);
    }

    #[test]
    fn honest_round_trips_both_roles() {
        for outbound in [true, false] {
            let mut data = honest_prefix(outbound);
            // send "hi" split after 5 bytes, receive "yo", burst 600, ping
            data.extend_from_slice(&[0x00, 0, 5, 0, 2, b'h', b'i']);
            data.extend_from_slice(&[0x01, 0, 0, 0, 2, b'y', b'o']);
            data.extend_from_slice(&[0x02, 0x02, 0x58]);
            data.push(0x03);
            run(&data, &HarnessConfig::default());
        }
    }

    #[test]
    fn honest_garbage_disconnects() {
        let mut data = honest_prefix(true);
        data.extend_from_slice(&[0x04, 4, 1, 2, 3, 4]);
        run(&data, &HarnessConfig::default());
    }

    #[test]
    fn raw_acts_are_rejected_quietly() {
        let mut data = vec![0x00];
        data.extend_from_slice(&[0x11; 32]);
        data.extend_from_slice(&[0x22; 32]);
        data.extend_from_slice(&[0, 50]);
        data.extend_from_slice(&[0u8; 50]);
        run(&data, &HarnessConfig::default());
        run(&[0x01], &HarnessConfig::default());
    }
}
