//! # Full node interpreter
//!
//! Several [`Node`]s, each behind its own LDK [`PeerManager`], joined by
//! in-memory sockets. Every byte that moves between them goes through
//! BOLT 8 and the peer manager, so an attacker's bytes (`0x02`) hit
//! exactly the code a remote peer would.
//!
//! | Byte | Action |
//! |---|---|
//! | `0x00` | connect two nodes |
//! | `0x01` | drop a connection |
//! | `0x02` | inject up to 255 raw bytes into one end of a connection |
//! | `0x03` | one exchange on one connection |
//! | `0x04` | deliver until quiet |
//! | `0x05` | open a channel (`u24` sat capacity, `u24` msat push, flags: bit 0 announce) |
//! | `0x06` | fund every accepted channel |
//! | `0x07` | mine broadcast transactions plus up to 7 more blocks |
//! | `0x08` | pay between two nodes (`u24` msat) |
//! | `0x09` / `0x0a` | claim / fail everything claimable at a node |
//! | `0x0b` / `0x0c` | cooperative / force close one of a node's channels |
//! | `0x0d` | reorg the tip block out |
//! | `0x0e` | re-announce a node's gossip |
//! | `0xff` | stop |
//!
//! Node and channel indices are single bytes taken modulo the live count.
//! The first byte picks how many nodes take part.

use std::sync::Arc;

use bitcoin::Network;
use lightning::ln::channel_state::ChannelDetails;
use lightning::ln::peer_handler::{IgnoringMessageHandler, MessageHandler, PeerManager};
use lightning::ln::types::ChannelId;
use lightning::sign::KeysManager;
use rand::rngs::StdRng;
use rand::{RngExt as _, SeedableRng};
use tracing::{debug, trace};

use crate::config::HarnessConfig;
use crate::env::{Chain, FeeSource, Pipe, TraceLogger, BASE_TIME};
use crate::input::FuzzInput;
use crate::node::{GossipSync, Manager, Node};

const MAX_EXTRA_BLOCKS: u8 = 7;
/// Closing balances below this may lose their output to dust.
const MIN_CHECKED_BALANCE_MSAT: u64 = 1_000_000;

type Transport = PeerManager<
    Pipe,
    Arc<Manager>,
    Arc<GossipSync>,
    IgnoringMessageHandler,
    Arc<TraceLogger>,
    IgnoringMessageHandler,
    Arc<KeysManager>,
    IgnoringMessageHandler,
>;

/// A connection: `a` dialled `b`. Each end writes into its own pipe.
#[derive(Clone)]
struct Link {
    a: usize,
    a_pipe: Pipe,
    b: usize,
    b_pipe: Pipe,
}

impl Link {
    fn joins(&self, x: usize, y: usize) -> bool {
        (self.a == x && self.b == y) || (self.a == y && self.b == x)
    }
}

/// A channel a node force-closed through the harness while no HTLC was
/// anywhere on it. The non-funder's monitor must claim what the channel
/// says it closed with.
#[derive(Debug, Clone, Copy)]
struct Watch {
    node: usize,
    channel_id: ChannelId,
}

struct Net {
    nodes: Vec<Node>,
    transports: Vec<Transport>,
    links: Vec<Link>,
    chain: Chain,
    next_pipe: u64,
    funding_nonce: u64,
    max_deliver_rounds: usize,
    watches: Vec<Watch>,
}

fn no_htlcs(channel: &ChannelDetails) -> bool {
    channel.pending_inbound_htlcs.is_empty() && channel.pending_outbound_htlcs.is_empty()
}

impl Net {
    fn new(count: usize, config: &HarnessConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let chain = Chain::new(Network::Regtest);
        let user_config = config.channel.user_config();
        let mut nodes = Vec::with_capacity(count);
        let mut transports = Vec::with_capacity(count);
        for i in 0..count {
            let fees = Arc::new(FeeSource::new(config.feerate_per_kw));
            let node = Node::new(i, rng.random(), fees, user_config.clone(), Network::Regtest, chain.tip());
            let handler = MessageHandler {
                chan_handler: Arc::clone(&node.manager),
                route_handler: Arc::clone(&node.gossip),
                onion_message_handler: IgnoringMessageHandler {},
                custom_message_handler: IgnoringMessageHandler {},
                send_only_message_handler: IgnoringMessageHandler {},
            };
            let ephemeral: [u8; 32] = rng.random();
            transports.push(PeerManager::new(
                handler,
                BASE_TIME,
                &ephemeral,
                Arc::clone(&node.logger),
                Arc::clone(&node.keys),
            ));
            nodes.push(node);
        }
        Net {
            nodes,
            transports,
            links: Vec::new(),
            chain,
            next_pipe: 0,
            funding_nonce: config.seed,
            max_deliver_rounds: config.max_deliver_rounds,
            watches: Vec::new(),
        }
    }

    fn connect(&mut self, a: usize, b: usize) {
        if a == b || self.links.iter().any(|l| l.joins(a, b)) {
            return;
        }
        let (a_pipe, b_pipe) = (Pipe::new(self.next_pipe), Pipe::new(self.next_pipe + 1));
        self.next_pipe += 2;
        let b_id = self.nodes[b].node_id();
        let act_one = match self.transports[a].new_outbound_connection(b_id, a_pipe.clone(), None) {
            Ok(bytes) => bytes,
            Err(e) => {
                trace!(a, b, error = ?e, "connect refused");
                return;
            }
        };
        if let Err(e) = self.transports[b].new_inbound_connection(b_pipe.clone(), None) {
            trace!(a, b, error = ?e, "inbound connection refused");
            self.transports[a].socket_disconnected(&a_pipe);
            return;
        }
        self.links.push(Link { a, a_pipe, b, b_pipe });
        self.feed(self.links.len() - 1, true, &act_one);
    }

    fn drop_link(&mut self, index: usize) {
        let link = self.links.remove(index);
        self.transports[link.a].socket_disconnected(&link.a_pipe);
        self.transports[link.b].socket_disconnected(&link.b_pipe);
        debug!(a = link.a, b = link.b, "link dropped");
    }

    /// Feeds `bytes` to one end of `links[index]`. A read error tears the
    /// whole link down. Returns whether the link survived.
    fn feed(&mut self, index: usize, to_b: bool, bytes: &[u8]) -> bool {
        let link = &self.links[index];
        let (node, mut pipe) = if to_b { (link.b, link.b_pipe.clone()) } else { (link.a, link.a_pipe.clone()) };
        match self.transports[node].read_event(&mut pipe, bytes) {
            Ok(_) => {
                self.transports[node].process_events();
                true
            }
            Err(e) => {
                debug!(node, error = ?e, "peer read failed");
                self.drop_link(index);
                false
            }
        }
    }

    /// One exchange in each direction. Returns whether anything moved.
    fn exchange(&mut self, index: usize) -> bool {
        let link = self.links[index].clone();
        self.transports[link.a].process_events();
        self.transports[link.b].process_events();
        if link.a_pipe.is_closed() || link.b_pipe.is_closed() {
            self.drop_link(index);
            return true;
        }
        let to_b = link.a_pipe.take_outbound();
        let to_a = link.b_pipe.take_outbound();
        let moved = !to_b.is_empty() || !to_a.is_empty();
        if !to_b.is_empty() && !self.feed(index, true, &to_b) {
            return true;
        }
        if !to_a.is_empty() {
            self.feed(index, false, &to_a);
        }
        moved
    }

    fn process_node_events(&mut self) {
        for node in &mut self.nodes {
            node.process_events();
        }
    }

    fn deliver_all(&mut self) {
        for _ in 0..self.max_deliver_rounds {
            self.process_node_events();
            let mut moved = false;
            let mut i = 0;
            while i < self.links.len() {
                let before = self.links.len();
                moved |= self.exchange(i);
                if self.links.len() == before {
                    i += 1;
                }
            }
            if !moved {
                return;
            }
        }
        debug!("network still busy after delivery bound");
    }

    fn mine(&mut self, blocks: usize) {
        for _ in 0..blocks {
            for node in &self.nodes {
                self.chain.broadcast(node.take_broadcasts());
            }
            let (block, height) = self.chain.mine();
            for node in &mut self.nodes {
                node.block_connected(&block, height);
                node.process_events();
            }
            trace!(height, txs = block.txdata.len(), "block mined");
        }
    }

    fn reorg_tip(&mut self) {
        if let Some(fork) = self.chain.disconnect_tip() {
            for node in &self.nodes {
                node.blocks_disconnected(fork);
            }
        }
    }

    fn open(&mut self, a: usize, b: usize, capacity_sat: u64, push_msat: u64, announce: bool) {
        if a == b {
            return;
        }
        let b_id = self.nodes[b].node_id();
        let user_channel_id = self.funding_nonce as u128;
        match self.nodes[a].open_channel(b_id, capacity_sat, push_msat, user_channel_id, announce) {
            Ok(temporary_channel_id) => debug!(a, b, %temporary_channel_id, "channel open sent"),
            Err(e) => trace!(a, b, capacity_sat, error = ?e, "open refused"),
        }
    }

    fn pay(&mut self, payer: usize, payee: usize, amount_msat: u64) {
        if payer == payee || amount_msat == 0 {
            return;
        }
        self.watches.retain(|w| w.node != payer);
        let Some((payment_hash, payment_secret)) = self.nodes[payee].invoice(amount_msat) else { return };
        let payee_id = self.nodes[payee].node_id();
        match self.nodes[payer].pay(payee_id, payment_hash, payment_secret, amount_msat) {
            Ok(()) => debug!(payer, payee, amount_msat, ?payment_hash, "payment sent"),
            Err(e) => trace!(payer, payee, amount_msat, error = ?e, "payment not sent"),
        }
    }

    fn nth_channel(&self, node: usize, pick: u8) -> Option<ChannelDetails> {
        let mut channels = self.nodes[node].channels();
        if channels.is_empty() {
            return None;
        }
        let i = pick as usize % channels.len();
        Some(channels.swap_remove(i))
    }

    fn node_index(&self, node_id: &bitcoin::secp256k1::PublicKey) -> Option<usize> {
        self.nodes.iter().position(|n| n.node_id() == *node_id)
    }

    fn close(&mut self, node: usize, pick: u8, force: bool) {
        let Some(channel) = self.nth_channel(node, pick) else { return };
        let peer_id = channel.counterparty.node_id;
        if !force {
            if let Err(e) = self.nodes[node].close(&channel.channel_id, &peer_id) {
                trace!(node, channel_id = %channel.channel_id, error = ?e, "close refused");
            }
            return;
        }
        let non_funder = if channel.is_outbound { self.node_index(&peer_id) } else { Some(node) };
        let peer_view = self
            .node_index(&peer_id)
            .and_then(|p| self.nodes[p].channels().into_iter().find(|c| c.channel_id == channel.channel_id));
        let clean = no_htlcs(&channel) && peer_view.as_ref().is_none_or(no_htlcs);
        match self.nodes[node].force_close(&channel.channel_id, &peer_id) {
            Ok(()) => {
                debug!(node, channel_id = %channel.channel_id, clean, "force-closed");
                if let (true, Some(watched)) = (clean, non_funder) {
                    self.watches.push(Watch { node: watched, channel_id: channel.channel_id });
                }
            }
            Err(e) => trace!(node, channel_id = %channel.channel_id, error = ?e, "force-close refused"),
        }
        self.nodes[node].process_events();
        self.chain.broadcast(self.nodes[node].take_broadcasts());
    }

    fn announce(&mut self, node: usize) {
        let mut alias = [0u8; 32];
        alias[0] = b'n';
        alias[1] = b'0' + (node % 10) as u8;
        self.transports[node].broadcast_node_announcement([node as u8; 3], alias, Vec::new());
        self.nodes[node].manager.timer_tick_occurred();
    }

    /// A watched node's monitor recovers exactly its closing balance. A
    /// watch lapses once the node could have new HTLCs on the channel.
    fn check_watches(&mut self) {
        let nodes = &self.nodes;
        self.watches.retain(|w| {
            let channels = nodes[w.node].channels();
            match channels.iter().find(|c| c.channel_id == w.channel_id) {
                Some(open) => no_htlcs(open) && channels.len() == 1,
                None => channels.is_empty(),
            }
        });
        for watch in &self.watches {
            let node = &self.nodes[watch.node];
            let Some(closed) = node.closed.iter().find(|c| c.channel_id == watch.channel_id) else { continue };
            let Some(balance_msat) = closed.last_local_balance_msat else { continue };
            if balance_msat < MIN_CHECKED_BALANCE_MSAT {
                continue;
            }
            let claimable_sat = node.claimable_balance_sat(watch.channel_id);
            if claimable_sat > 0 {
                assert_eq!(
                    claimable_sat,
                    balance_msat / 1000,
                    "node {} monitor claims {claimable_sat} sat of {} but the channel closed holding {balance_msat} msat",
                    watch.node,
                    watch.channel_id
                );
            }
        }
    }

    fn check_invariants(&mut self) {
        for node in &self.nodes {
            node.check_invariants();
        }
        self.check_watches();
    }

    fn run(&mut self, input: &mut FuzzInput<'_>, max_actions: usize) {
        for _ in 0..max_actions {
            let action = Action::next(input);
            trace!(?action, links = self.links.len(), "full_stack step");
            if matches!(action, Action::Stop | Action::Exhausted) {
                break;
            }
            self.step(action, input);
            self.check_invariants();
        }
    }

    fn step(&mut self, action: Action, input: &mut FuzzInput<'_>) {
        let n = self.nodes.len();
        match action {
            Action::Connect => {
                let (a, b) = (input.take_u8() as usize % n, input.take_u8() as usize % n);
                self.connect(a, b);
            }
            Action::Disconnect => {
                if let Some(i) = input.take_index(self.links.len()) {
                    self.drop_link(i);
                }
            }
            Action::Inject => {
                let target = input.take_index(self.links.len());
                let to_b = input.take_bool();
                let bytes = input.take_len_prefixed(u8::MAX as usize);
                if let Some(i) = target {
                    self.feed(i, to_b, bytes);
                }
            }
            Action::DeliverOne => {
                if let Some(i) = input.take_index(self.links.len()) {
                    self.process_node_events();
                    self.exchange(i);
                }
            }
            Action::DeliverAll => self.deliver_all(),
            Action::Open => {
                let (a, b) = (input.take_u8() as usize % n, input.take_u8() as usize % n);
                let capacity_sat = input.take_u24() as u64;
                let push_msat = input.take_u24() as u64;
                let announce = input.take_bool();
                self.open(a, b, capacity_sat, push_msat, announce);
            }
            Action::Fund => {
                let mut funded = 0;
                for node in &mut self.nodes {
                    node.process_events();
                    funded += node.fund_pending(&mut self.funding_nonce);
                }
                trace!(funded, "funding transactions built");
            }
            Action::Mine => {
                let extra = input.take_u8() % (MAX_EXTRA_BLOCKS + 1);
                self.mine(1 + extra as usize);
            }
            Action::Pay => {
                let (payer, payee) = (input.take_u8() as usize % n, input.take_u8() as usize % n);
                let amount_msat = input.take_u24() as u64;
                self.pay(payer, payee, amount_msat);
            }
            Action::ClaimAll => {
                let node = input.take_u8() as usize % n;
                self.nodes[node].claim_all();
            }
            Action::FailAll => {
                let node = input.take_u8() as usize % n;
                self.nodes[node].fail_all();
            }
            Action::CoopClose | Action::ForceClose => {
                let node = input.take_u8() as usize % n;
                let pick = input.take_u8();
                self.close(node, pick, action == Action::ForceClose);
            }
            Action::ReorgTip => self.reorg_tip(),
            Action::Announce => {
                let node = input.take_u8() as usize % n;
                self.announce(node);
            }
            Action::Stop | Action::Exhausted | Action::Noop => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Connect,
    Disconnect,
    Inject,
    DeliverOne,
    DeliverAll,
    Open,
    Fund,
    Mine,
    Pay,
    ClaimAll,
    FailAll,
    CoopClose,
    ForceClose,
    ReorgTip,
    Announce,
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
            0x00 => Action::Connect,
            0x01 => Action::Disconnect,
            0x02 => Action::Inject,
            0x03 => Action::DeliverOne,
            0x04 => Action::DeliverAll,
            0x05 => Action::Open,
            0x06 => Action::Fund,
            0x07 => Action::Mine,
            0x08 => Action::Pay,
            0x09 => Action::ClaimAll,
            0x0a => Action::FailAll,
            0x0b => Action::CoopClose,
            0x0c => Action::ForceClose,
            0x0d => Action::ReorgTip,
            0x0e => Action::Announce,
            0xff => Action::Stop,
            _ => Action::Noop,
        }
    }
}

pub fn run(data: &[u8], config: &HarnessConfig) {
    let mut input = FuzzInput::new(data);
    let header = input.take_u8();
    let count = 2 + (header & 0x0f) as usize % (config.max_peers - 1);
    let mut net = Net::new(count, config);
    net.run(&mut input, config.max_actions);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Connects 0 and 1, opens 100_000 sat pushing 10_000_000 msat and
    /// confirms the funding.
    fn open_script() -> Vec<u8> {
        let mut s = vec![0x00, 0, 1, 0x04];
        s.extend_from_slice(&[0x05, 0, 1, 0x01, 0x86, 0xa0, 0x98, 0x96, 0x80, 0, 0x04]);
        s.extend_from_slice(&[0x06, 0x04, 0x07, 0, 0x04]);
        s
    }

    fn net_after(script: &[u8]) -> Net {
        let config = HarnessConfig::default();
        let mut net = Net::new(2, &config);
        net.run(&mut FuzzInput::new(script), config.max_actions);
        net
    }

    fn closed_balance(net: &Net, node: usize) -> Option<u64> {
        net.nodes[node].closed.first().and_then(|c| c.last_local_balance_msat)
    }

    #[test]
    fn open_pay_fulfill_and_force_close_settle_on_chain() {
        let mut s = open_script();
        // pay 5_000_000 msat from 0 to 1, 1 claims
        s.extend_from_slice(&[0x08, 0, 1, 0x4c, 0x4b, 0x40, 0x04, 0x09, 1, 0x04]);
        // 0 force-closes its only channel; the commitment confirms
        s.extend_from_slice(&[0x0c, 0, 0, 0x04, 0x07, 0, 0x04]);
        let net = net_after(&s);

        assert_eq!(net.nodes[1].received_msat, 5_000_000);
        assert_eq!(net.nodes[0].sent_msat, 5_000_000);
        assert_eq!(closed_balance(&net, 0), Some(85_000_000));
        assert_eq!(closed_balance(&net, 1), Some(15_000_000));

        let channel_id = match net.nodes[1].closed.first() {
            Some(c) => c.channel_id,
            None => panic!("node 1 never saw the channel close"),
        };
        // push plus the fulfilled payment, all of it recoverable on chain
        assert_eq!(net.nodes[1].claimable_balance_sat(channel_id), 15_000);
        let funder_sat = net.nodes[0].claimable_balance_sat(channel_id);
        assert!(funder_sat < 85_000 && funder_sat > 80_000, "funder claims {funder_sat} sat");
        assert_eq!(net.watches.len(), 1);
    }

    #[test]
    fn cooperative_close_and_reorg() {
        let mut s = open_script();
        s.extend_from_slice(&[0x0e, 0, 0x04, 0x0b, 1, 0, 0x04, 0x07, 0, 0x04, 0x0d, 0x07, 1]);
        let net = net_after(&s);
        assert!(net.nodes.iter().all(|n| n.channels().is_empty()), "channel survived a cooperative close");
    }

    #[test]
    fn injected_garbage_drops_only_that_link() {
        let config = HarnessConfig::default();
        let mut net = Net::new(3, &config);
        net.connect(0, 1);
        net.connect(1, 2);
        net.deliver_all();
        assert_eq!(net.links.len(), 2);
        assert!(!net.feed(0, true, &[0xde, 0xad, 0xbe, 0xef].repeat(20)));
        assert_eq!(net.links.len(), 1);
        assert!(net.links[0].joins(1, 2));
        let one = net.nodes[1].node_id();
        assert!(net.transports[2].peer_by_node_id(&one).is_some());
    }

    #[test]
    fn unassigned_bytes_are_noops() {
        let mut input = FuzzInput::new(&[0x0c, 0x0f, 0xfe, 0xff]);
        assert_eq!(Action::next(&mut input), Action::ForceClose);
        assert_eq!(Action::next(&mut input), Action::Noop);
        assert_eq!(Action::next(&mut input), Action::Noop);
        assert_eq!(Action::next(&mut input), Action::Stop);
        assert_eq!(Action::next(&mut input), Action::Exhausted);
    }

    #[test]
    fn arbitrary_bytes_do_not_panic() {
        run(&[], &HarnessConfig::default());
        run(&[0x03, 0x00, 0, 1, 0x02, 0, 0, 9, 1, 2, 3], &HarnessConfig::default());
        run(&(0..=255u8).collect::<Vec<_>>(), &HarnessConfig::default());
    }
}
