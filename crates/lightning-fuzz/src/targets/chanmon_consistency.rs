//! # Channel/monitor consistency interpreter
//!
//! Two LDK nodes A (funder) and B share one channel. Each persists its
//! monitor through a [`Persister`](crate::env::Persister) whose writes
//! either complete at once or stay in flight until the input completes
//! them. Messages wait in one queue per direction; the input delivers or
//! drops them and interleaves disconnects, reloads, blocks and
//! force-closes.
//!
//! ```text
//!        A.manager ──queue[A]──► B.manager
//!          ▲ │                      │ ▲
//!  updates │ ▼                      ▼ │ completions
//!        A.monitor                B.monitor
//!             └────── Chain ──────┘
//! ```
//!
//! After every step: each channel keeps its HTLCs and spendable balances
//! within its value, monitor update ids never move backwards, and a node
//! never releases `commitment_signed` or `revoke_and_ack` while a monitor
//! write is still in flight. A reloaded node's monitor is at least as new
//! as its last completed write. Once a harness force-close with no HTLCs
//! outstanding reaches B, B's monitor claims exactly B's closing balance.
//! Byte `0xff` settles both sides and checks they mirror each other.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use bitcoin::Network;
use lightning::ln::channel_state::ChannelDetails;
use lightning::ln::msgs::{BaseMessageHandler, ChannelMessageHandler, ErrorAction, MessageSendEvent};
use lightning::ln::types::ChannelId;
use lightning::types::payment::PaymentHash;
use rand::rngs::StdRng;
use rand::{RngExt as _, SeedableRng};
use tracing::{debug, trace};

use crate::config::HarnessConfig;
use crate::env::{Chain, FeeSource};
use crate::input::FuzzInput;
use crate::node::Node;

const CHANNEL_VALUE_SAT: u64 = 1_000_000;
const PUSH_MSAT: u64 = 250_000_000;
/// Feerate moves stay within this multiple of the starting rate.
const MAX_FEE_MULTIPLE: u32 = 8;
/// Outer rounds of completing writes and delivering while settling.
const SETTLE_ROUNDS: usize = 8;
/// Closing balances below this may lose their output to dust.
const MIN_CHECKED_BALANCE_MSAT: u64 = 10_000_000;

/// Payment sizes selected by the low three bits of a send action.
const AMOUNT_CLASSES_MSAT: [u64; 8] = [1, 10, 100, 1_000, 10_000, 100_000, 1_000_000, 10_000_000];

const A: usize = 0;
const B: usize = 1;

/// One interpreter step. A `usize` is the acting side, `A` or `B`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    PersistInProgress(usize),
    PersistCompleted(usize),
    CompleteAll(usize),
    CompleteOldest(usize),
    Disconnect,
    Reconnect,
    DeliverOne(usize),
    DropOne(usize),
    DeliverAll,
    Pay { from: usize, class: u8 },
    Fulfill(usize),
    Fail(usize),
    RaiseFee,
    LowerFee,
    Reload(usize),
    ConnectBlock,
    DisconnectBlock,
    ForceClose(usize),
    Settle,
    Noop,
    /// No input left.
    Exhausted,
}

impl Action {
    fn next(input: &mut FuzzInput<'_>) -> Action {
        if input.is_exhausted() {
            return Action::Exhausted;
        }
        let b = input.take_u8();
        let side = (b & 1) as usize;
        match b {
            0x00 | 0x01 => Action::PersistInProgress(side),
            0x04 | 0x05 => Action::PersistCompleted(side),
            0x08 | 0x09 => Action::CompleteAll(side),
            0x0a | 0x0b => Action::CompleteOldest(side),
            0x0c => Action::Disconnect,
            0x0d => Action::Reconnect,
            0x10 | 0x11 => Action::DeliverOne(side),
            0x12 | 0x13 => Action::DropOne(side),
            0x18 => Action::DeliverAll,
            0x20..=0x27 => Action::Pay { from: A, class: b & 7 },
            0x28..=0x2f => Action::Pay { from: B, class: b & 7 },
            0x30 | 0x31 => Action::Fulfill(side),
            0x32 | 0x33 => Action::Fail(side),
            0x34 => Action::RaiseFee,
            0x35 => Action::LowerFee,
            0x40 | 0x41 => Action::Reload(side),
            0x48 => Action::ConnectBlock,
            0x49 => Action::DisconnectBlock,
            0x50 | 0x51 => Action::ForceClose(side),
            0xff => Action::Settle,
            _ => Action::Noop,
        }
    }
}

fn htlcs_outstanding(channels: &[ChannelDetails]) -> bool {
    channels.iter().any(|c| !c.pending_inbound_htlcs.is_empty() || !c.pending_outbound_htlcs.is_empty())
}

type HtlcKey = (u64, u64, PaymentHash);

/// HTLCs a channel offers to its peer, keyed the way the peer sees them.
fn offered(channel: &ChannelDetails) -> BTreeSet<HtlcKey> {
    channel
        .pending_outbound_htlcs
        .iter()
        .filter_map(|h| h.htlc_id.map(|id| (id, h.amount_msat, h.payment_hash)))
        .collect()
}

fn received(channel: &ChannelDetails) -> BTreeSet<HtlcKey> {
    channel.pending_inbound_htlcs.iter().map(|h| (h.htlc_id, h.amount_msat, h.payment_hash)).collect()
}

struct Harness {
    nodes: [Node; 2],
    chain: Chain,
    /// Messages each side has sent and the other has not yet handled.
    queues: [VecDeque<MessageSendEvent>; 2],
    connected: bool,
    channel_id: ChannelId,
    base_feerate: u32,
    max_rounds: usize,
    funding_nonce: u64,
    /// Highest monitor update id each side has shown so far.
    update_ids: [u64; 2],
    /// A harness force-close went out with no HTLCs anywhere; B's closing
    /// balance must be what its monitor can claim.
    watch_close: bool,
}

impl Harness {
    fn new(config: &HarnessConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let chain = Chain::new(Network::Regtest);
        let user_config = config.channel.user_config();
        let nodes = [A, B].map(|i| {
            let fees = Arc::new(FeeSource::new(config.feerate_per_kw));
            Node::new(i, rng.random(), fees, user_config.clone(), Network::Regtest, chain.tip())
        });
        let mut harness = Harness {
            nodes,
            chain,
            queues: [VecDeque::new(), VecDeque::new()],
            connected: false,
            channel_id: ChannelId::from_bytes([0; 32]),
            base_feerate: config.feerate_per_kw,
            max_rounds: config.max_deliver_rounds,
            funding_nonce: config.seed,
            update_ids: [0; 2],
            watch_close: false,
        };
        harness.open_channel(config.channel.minimum_depth);
        harness
    }

    fn open_channel(&mut self, minimum_depth: u32) {
        self.reconnect();
        let peer = self.nodes[B].node_id();
        if let Err(e) = self.nodes[A].open_channel(peer, CHANNEL_VALUE_SAT, PUSH_MSAT, 0, false) {
            panic!("A could not open the channel: {e:?}");
        }
        self.deliver_until_quiet();
        self.nodes[A].fund_pending(&mut self.funding_nonce);
        self.deliver_until_quiet();
        for _ in 0..minimum_depth {
            self.connect_block();
        }
        self.deliver_until_quiet();
        let channels = self.nodes[A].channels();
        match channels.first() {
            Some(c) if c.is_usable => self.channel_id = c.channel_id,
            other => panic!("channel setup did not finish: {other:?}"),
        }
        for side in [A, B] {
            self.update_ids[side] = self.nodes[side].latest_update_id(self.channel_id).unwrap_or(0);
        }
        debug!(channel_id = %self.channel_id, "channel ready");
    }

    fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        for side in [A, B] {
            let peer = self.nodes[1 - side].node_id();
            self.nodes[side].manager.peer_disconnected(peer);
        }
        self.queues = [VecDeque::new(), VecDeque::new()];
        self.connected = false;
    }

    fn reconnect(&mut self) {
        if self.connected {
            return;
        }
        let (a, b) = (self.nodes[A].node_id(), self.nodes[B].node_id());
        let a_ok = self.nodes[A].manager.peer_connected(b, &self.nodes[B].init_for(&a), false).is_ok();
        let b_ok = self.nodes[B].manager.peer_connected(a, &self.nodes[A].init_for(&b), true).is_ok();
        self.connected = true;
        if !(a_ok && b_ok) {
            debug!(a_ok, b_ok, "peer refused the connection");
            self.disconnect();
        }
    }

    /// A node never lets a new commitment or revocation out while the
    /// monitor write covering it is still in flight.
    fn check_release(&self, side: usize, event: &MessageSendEvent) {
        let kind = match event {
            MessageSendEvent::UpdateHTLCs { updates, .. } if !updates.commitment_signed.is_empty() => "commitment_signed",
            MessageSendEvent::SendRevokeAndACK { .. } => "revoke_and_ack",
            _ => return,
        };
        assert!(
            !self.nodes[side].has_pending_monitor_updates(),
            "node {side} released {kind} before its monitor write completed"
        );
    }

    /// Moves everything `side` wants to say into its queue.
    fn collect(&mut self, side: usize) {
        self.nodes[side].process_events();
        let events = self.nodes[side].manager.get_and_clear_pending_msg_events();
        if !self.connected {
            trace!(side, dropped = events.len(), "messages for a disconnected peer");
            return;
        }
        let mut disconnect = false;
        for event in events {
            self.check_release(side, &event);
            match event {
                MessageSendEvent::HandleError { action: ErrorAction::DisconnectPeer { msg }, .. } => {
                    if let Some(msg) = msg {
                        let sender = self.nodes[side].node_id();
                        self.nodes[1 - side].manager.handle_error(sender, &msg);
                    }
                    disconnect = true;
                }
                MessageSendEvent::HandleError { action: ErrorAction::DisconnectPeerWithWarning { .. }, .. } => {
                    disconnect = true
                }
                event => self.queues[side].push_back(event),
            }
        }
        if disconnect {
            debug!(side, "error closed the connection");
            self.disconnect();
        }
    }

    /// Hands one message from `from` to the other side.
    fn deliver(&mut self, from: usize, event: MessageSendEvent) {
        let sender = self.nodes[from].node_id();
        let dest = &self.nodes[1 - from].manager;
        match event {
            MessageSendEvent::SendOpenChannel { msg, .. } => dest.handle_open_channel(sender, &msg),
            MessageSendEvent::SendAcceptChannel { msg, .. } => dest.handle_accept_channel(sender, &msg),
            MessageSendEvent::SendFundingCreated { msg, .. } => dest.handle_funding_created(sender, &msg),
            MessageSendEvent::SendFundingSigned { msg, .. } => dest.handle_funding_signed(sender, &msg),
            MessageSendEvent::SendChannelReady { msg, .. } => dest.handle_channel_ready(sender, &msg),
            MessageSendEvent::SendChannelReestablish { msg, .. } => dest.handle_channel_reestablish(sender, &msg),
            MessageSendEvent::SendRevokeAndACK { msg, .. } => dest.handle_revoke_and_ack(sender, &msg),
            MessageSendEvent::SendShutdown { msg, .. } => dest.handle_shutdown(sender, &msg),
            MessageSendEvent::SendClosingSigned { msg, .. } => dest.handle_closing_signed(sender, &msg),
            MessageSendEvent::SendChannelUpdate { msg, .. } => dest.handle_channel_update(sender, &msg),
            MessageSendEvent::UpdateHTLCs { channel_id, updates, .. } => {
                for add in &updates.update_add_htlcs {
                    dest.handle_update_add_htlc(sender, add);
                }
                for fulfill in updates.update_fulfill_htlcs {
                    dest.handle_update_fulfill_htlc(sender, fulfill);
                }
                for fail in &updates.update_fail_htlcs {
                    dest.handle_update_fail_htlc(sender, fail);
                }
                for malformed in &updates.update_fail_malformed_htlcs {
                    dest.handle_update_fail_malformed_htlc(sender, malformed);
                }
                if let Some(fee) = &updates.update_fee {
                    dest.handle_update_fee(sender, fee);
                }
                match updates.commitment_signed.len() {
                    0 => {}
                    1 => dest.handle_commitment_signed(sender, &updates.commitment_signed[0]),
                    _ => dest.handle_commitment_signed_batch(sender, channel_id, updates.commitment_signed),
                }
            }
            MessageSendEvent::HandleError { action: ErrorAction::SendErrorMessage { msg }, .. } => {
                dest.handle_error(sender, &msg)
            }
            other => trace!(from, event = ?other, "not delivered"),
        }
    }

    fn deliver_one(&mut self, from: usize) {
        if let Some(event) = self.queues[from].pop_front() {
            self.deliver(from, event);
        }
    }

    /// A message only goes missing with the connection that carried it.
    fn drop_one(&mut self, from: usize) {
        if let Some(event) = self.queues[from].pop_front() {
            trace!(from, event = ?event, "dropping message");
            self.disconnect();
        }
    }

    /// Delivers in rounds until neither side has anything to say. Returns
    /// false if the round bound ran out first.
    fn deliver_until_quiet(&mut self) -> bool {
        for _ in 0..self.max_rounds {
            self.collect(A);
            self.collect(B);
            if self.queues.iter().all(VecDeque::is_empty) {
                return true;
            }
            for from in [A, B] {
                while let Some(event) = self.queues[from].pop_front() {
                    self.deliver(from, event);
                }
            }
        }
        false
    }

    fn connect_block(&mut self) {
        for node in &self.nodes {
            self.chain.broadcast(node.take_broadcasts());
        }
        let (block, height) = self.chain.mine();
        for node in &mut self.nodes {
            node.block_connected(&block, height);
            node.process_events();
        }
        trace!(height, "block connected");
    }

    fn disconnect_block(&mut self) {
        if let Some(fork) = self.chain.disconnect_tip() {
            for node in &self.nodes {
                node.blocks_disconnected(fork);
            }
            trace!(height = fork.height, "tip disconnected");
        }
    }

    fn pay(&mut self, from: usize, class: u8) {
        let amount_msat = AMOUNT_CLASSES_MSAT[class as usize];
        let to = 1 - from;
        if from == B {
            self.watch_close = false;
        }
        let Some((payment_hash, payment_secret)) = self.nodes[to].invoice(amount_msat) else { return };
        let payee = self.nodes[to].node_id();
        match self.nodes[from].pay(payee, payment_hash, payment_secret, amount_msat) {
            Ok(()) => trace!(from, amount_msat, "payment sent"),
            Err(e) => trace!(from, amount_msat, error = ?e, "payment not sent"),
        }
    }

    /// Moves both nodes' view of the feerate and lets A update the channel.
    fn move_feerate(&mut self, raise: bool) {
        let now = self.nodes[A].fees.get();
        let next = if raise { now.saturating_mul(2).min(self.base_feerate * MAX_FEE_MULTIPLE) } else { now / 2 };
        for node in &self.nodes {
            node.fees.set(next);
        }
        self.nodes[A].manager.timer_tick_occurred();
    }

    fn reload(&mut self, side: usize) {
        let completed = self.nodes[side].persister.completed_update_id(&self.channel_id);
        self.disconnect();
        self.nodes[side].reload(&self.chain);
        let restored = self.nodes[side].latest_update_id(self.channel_id);
        if let Some(completed) = completed {
            assert!(
                restored.is_some_and(|id| id >= completed),
                "node {side} reloaded monitor at {restored:?}, behind completed write {completed}"
            );
        }
        self.update_ids[side] = restored.unwrap_or(0);
    }

    fn force_close(&mut self, side: usize) {
        let clean = !htlcs_outstanding(&self.nodes[A].channels()) && !htlcs_outstanding(&self.nodes[B].channels());
        let peer = self.nodes[1 - side].node_id();
        match self.nodes[side].force_close(&self.channel_id, &peer) {
            Ok(()) => {
                debug!(side, clean, "force-closed");
                if clean && self.nodes[B].closed.is_empty() {
                    self.watch_close = true;
                }
            }
            Err(e) => trace!(side, error = ?e, "force-close refused"),
        }
        self.nodes[side].process_events();
        self.chain.broadcast(self.nodes[side].take_broadcasts());
    }

    /// Completes every write, reconnects and delivers until both sides
    /// are quiet, then checks they agree on the channel.
    fn settle(&mut self) {
        for node in &self.nodes {
            node.persister.set_in_progress(false);
        }
        let mut quiet = false;
        for _ in 0..SETTLE_ROUNDS {
            for node in &self.nodes {
                node.complete_monitor_updates(false);
            }
            self.reconnect();
            quiet = self.deliver_until_quiet();
            if quiet && !self.nodes.iter().any(Node::has_pending_monitor_updates) {
                break;
            }
        }
        assert!(quiet, "peers still talking after settling");

        for (side, node) in self.nodes.iter().enumerate() {
            assert!(!node.has_pending_monitor_updates(), "node {side} still has monitor writes in flight");
            if let Some(latest) = node.latest_update_id(self.channel_id) {
                assert_eq!(
                    node.persister.completed_update_id(&self.channel_id),
                    Some(latest),
                    "node {side} monitor is ahead of what it persisted"
                );
            }
        }

        let (a, b) = (self.nodes[A].channels(), self.nodes[B].channels());
        if let (Some(a), Some(b)) = (a.first(), b.first()) {
            assert_eq!(a.channel_id, b.channel_id);
            assert_eq!(a.channel_value_satoshis, b.channel_value_satoshis);
            assert_eq!(a.is_usable, b.is_usable, "one side thinks the channel is usable");
            assert_eq!(offered(a), received(b), "A offers HTLCs B does not have");
            assert_eq!(offered(b), received(a), "B offers HTLCs A does not have");
        }
        debug!(height = self.chain.height(), "settled");
    }

    fn step(&mut self, action: Action) {
        match action {
            Action::PersistInProgress(side) => self.nodes[side].persister.set_in_progress(true),
            Action::PersistCompleted(side) => self.nodes[side].persister.set_in_progress(false),
            Action::CompleteAll(side) => {
                self.nodes[side].complete_monitor_updates(false);
            }
            Action::CompleteOldest(side) => {
                self.nodes[side].complete_monitor_updates(true);
            }
            Action::Disconnect => self.disconnect(),
            Action::Reconnect => self.reconnect(),
            Action::DeliverOne(from) => {
                self.collect(from);
                self.deliver_one(from);
            }
            Action::DropOne(from) => {
                self.collect(from);
                self.drop_one(from);
            }
            Action::DeliverAll => {
                if !self.deliver_until_quiet() {
                    debug!("peers still talking after the delivery bound");
                }
            }
            Action::Pay { from, class } => self.pay(from, class),
            Action::Fulfill(side) => {
                self.nodes[side].claim_all();
            }
            Action::Fail(side) => {
                self.nodes[side].fail_all();
            }
            Action::RaiseFee => self.move_feerate(true),
            Action::LowerFee => self.move_feerate(false),
            Action::Reload(side) => self.reload(side),
            Action::ConnectBlock => self.connect_block(),
            Action::DisconnectBlock => self.disconnect_block(),
            Action::ForceClose(side) => self.force_close(side),
            Action::Settle => self.settle(),
            Action::Noop | Action::Exhausted => {}
        }
    }

    fn check_invariants(&mut self) {
        for side in [A, B] {
            let node = &self.nodes[side];
            node.check_invariants();
            if let Some(id) = node.latest_update_id(self.channel_id) {
                assert!(id >= self.update_ids[side], "node {side} monitor went back from {} to {id}", self.update_ids[side]);
                self.update_ids[side] = id;
            }
        }
        self.check_recoverable();
    }

    /// The monitor alone recovers B's share of a cleanly force-closed
    /// channel, for as long as it still reports anything.
    fn check_recoverable(&self) {
        if !self.watch_close {
            return;
        }
        let node = &self.nodes[B];
        let Some(closed) = node.closed.iter().find(|c| c.channel_id == self.channel_id) else { return };
        let Some(balance_msat) = closed.last_local_balance_msat else { return };
        if balance_msat < MIN_CHECKED_BALANCE_MSAT {
            return;
        }
        let claimable_sat = node.claimable_balance_sat(self.channel_id);
        if claimable_sat > 0 {
            assert_eq!(
                claimable_sat,
                balance_msat / 1000,
                "B's monitor claims {claimable_sat} sat but the channel closed holding {balance_msat} msat"
            );
        }
    }
}

pub fn run(data: &[u8], config: &HarnessConfig) {
    let mut input = FuzzInput::new(data);
    let mut harness = Harness::new(config);

    for _ in 0..config.max_actions {
        let action = Action::next(&mut input);
        trace!(?action, "chanmon step");
        if action == Action::Exhausted {
            break;
        }
        harness.step(action);
        harness.check_invariants();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harness() -> Harness {
        Harness::new(&HarnessConfig::default())
    }

    fn channel(harness: &Harness, side: usize) -> ChannelDetails {
        match harness.nodes[side].channels().into_iter().next() {
            Some(c) => c,
            None => panic!("node {side} has no channel"),
        }
    }

    #[test]
    fn setup_leaves_a_usable_channel() {
        let h = harness();
        let (a, b) = (channel(&h, A), channel(&h, B));
        assert!(a.is_usable && b.is_usable);
        assert_eq!(a.channel_value_satoshis, CHANNEL_VALUE_SAT);
        assert!(a.is_outbound && !b.is_outbound);
    }

    #[test]
    fn payment_round_trip_settles() {
        let mut h = harness();
        // A pays 1_000_000 msat, B claims, everything delivered
        for action in [0x26, 0x18, 0x31, 0x18, 0xff] {
            h.step(Action::next(&mut FuzzInput::new(&[action])));
            h.check_invariants();
        }
        assert_eq!(h.nodes[B].received_msat, 1_000_000);
        assert!(!htlcs_outstanding(&h.nodes[A].channels()));
    }

    #[test]
    fn messages_wait_for_in_flight_writes() {
        let mut h = harness();
        h.step(Action::PersistInProgress(A));
        h.step(Action::Pay { from: A, class: 5 });
        h.collect(A);
        assert!(h.nodes[A].has_pending_monitor_updates());
        let gated = h.queues[A].iter().any(|e| {
            matches!(e, MessageSendEvent::UpdateHTLCs { updates, .. } if !updates.commitment_signed.is_empty())
        });
        assert!(!gated, "commitment went out before the write completed");
        h.step(Action::CompleteAll(A));
        h.step(Action::PersistCompleted(A));
        h.step(Action::Settle);
        h.check_invariants();
    }

    #[test]
    fn reload_with_stale_monitor_catches_up() {
        let mut h = harness();
        let data = [0x01, 0x26, 0x18, 0x41, 0x05, 0xff, 0x30, 0x18, 0xff];
        let mut input = FuzzInput::new(&data);
        loop {
            match Action::next(&mut input) {
                Action::Exhausted => break,
                action => {
                    h.step(action);
                    h.check_invariants();
                }
            }
        }
        assert!(h.nodes[B].latest_update_id(h.channel_id).is_some());
    }

    #[test]
    fn force_close_leaves_b_its_balance() {
        let mut h = harness();
        h.step(Action::ForceClose(A));
        assert!(h.watch_close);
        for action in [Action::DeliverAll, Action::ConnectBlock, Action::DeliverAll, Action::ConnectBlock] {
            h.step(action);
            h.check_invariants();
        }
        let closed = h.nodes[B].closed.iter().find(|c| c.channel_id == h.channel_id).cloned();
        assert_eq!(closed.and_then(|c| c.last_local_balance_msat), Some(PUSH_MSAT));
        assert_eq!(h.nodes[B].claimable_balance_sat(h.channel_id), PUSH_MSAT / 1000);
    }

    #[test]
    fn exhausted_and_unknown_bytes() {
        let mut input = FuzzInput::new(&[0x02, 0x51]);
        assert_eq!(Action::next(&mut input), Action::Noop);
        assert_eq!(Action::next(&mut input), Action::ForceClose(B));
        assert_eq!(Action::next(&mut input), Action::Exhausted);
        run(&[], &HarnessConfig::default());
        run(&[0x0c, 0x10, 0x12, 0x49, 0x49, 0x35, 0x35, 0x34], &HarnessConfig::default());
    }
}
