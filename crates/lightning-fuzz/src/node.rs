//! # Simulated node
//!
//! One LDK node wired to the [`env`](crate::env) stand-ins: channel
//! manager, chain monitor, network graph and router. The interpreters own
//! the chain and the links between nodes; a node only reacts to what they
//! hand it and records what its events tell it.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use bitcoin::secp256k1::PublicKey;
use bitcoin::{Block, BlockHash, Network, ScriptBuf, Transaction};
use lightning::chain::chainmonitor::ChainMonitor;
use lightning::chain::channelmonitor::ChannelMonitor;
use lightning::chain::{BestBlock, ChannelMonitorUpdateStatus, Filter, Listen, Watch};
use lightning::events::{ClosureReason, Event, EventsProvider, ReplayEvent};
use lightning::ln::channel_state::ChannelDetails;
use lightning::ln::channelmanager::{
    ChainParameters, ChannelManager, ChannelManagerReadArgs, PaymentId, RecipientOnionFields, Retry,
    RetryableSendFailure,
};
use lightning::ln::msgs::{BaseMessageHandler, Init};
use lightning::ln::types::ChannelId;
use lightning::onion_message::messenger::DefaultMessageRouter;
use lightning::routing::gossip::{NetworkGraph, P2PGossipSync};
use lightning::routing::router::{DefaultRouter, PaymentParameters, RouteParameters};
use lightning::routing::scoring::FixedPenaltyScorer;
use lightning::routing::utxo::UtxoLookup;
use lightning::sign::{InMemorySigner, KeysManager, NodeSigner};
use lightning::types::payment::{PaymentHash, PaymentPreimage, PaymentSecret};
use lightning::util::config::UserConfig;
use lightning::util::errors::APIError;
use lightning::util::ser::{ReadableArgs, Writeable};
use tracing::{debug, trace};

use crate::env::{funding_transaction, Broadcaster, Chain, FeeSource, Persister, TraceLogger, BASE_TIME};

pub(crate) type Graph = NetworkGraph<Arc<TraceLogger>>;
pub(crate) type Scorer = Mutex<FixedPenaltyScorer>;
pub(crate) type Router = DefaultRouter<Arc<Graph>, Arc<TraceLogger>, Arc<KeysManager>, Arc<Scorer>, (), FixedPenaltyScorer>;
pub(crate) type MsgRouter = DefaultMessageRouter<Arc<Graph>, Arc<TraceLogger>, Arc<KeysManager>>;
pub(crate) type GossipSync = P2PGossipSync<Arc<Graph>, Arc<dyn UtxoLookup + Send + Sync>, Arc<TraceLogger>>;
pub(crate) type Monitor = ChainMonitor<
    InMemorySigner,
    Arc<dyn Filter + Send + Sync>,
    Arc<Broadcaster>,
    Arc<FeeSource>,
    Arc<TraceLogger>,
    Arc<Persister>,
    Arc<KeysManager>,
>;
pub(crate) type Manager = ChannelManager<
    Arc<Monitor>,
    Arc<Broadcaster>,
    Arc<KeysManager>,
    Arc<KeysManager>,
    Arc<KeysManager>,
    Arc<FeeSource>,
    Arc<Router>,
    Arc<MsgRouter>,
    Arc<TraceLogger>,
>;

/// Final CLTV delta payers ask for; comfortably above LDK's receive minimum.
pub(crate) const FINAL_CLTV_EXPIRY_DELTA: u32 = 144;
const INVOICE_EXPIRY_SECS: u32 = 7 * 24 * 3600;
/// Event handling rounds per [`Node::process_events`]; HTLC forwarding
/// can raise new events once.
const MAX_EVENT_ROUNDS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Claimable {
    pub(crate) payment_hash: PaymentHash,
    pub(crate) preimage: Option<PaymentPreimage>,
    pub(crate) amount_msat: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ClosedChannel {
    pub(crate) channel_id: ChannelId,
    pub(crate) reason: ClosureReason,
    pub(crate) capacity_sat: Option<u64>,
    pub(crate) last_local_balance_msat: Option<u64>,
}

#[derive(Debug, Clone)]
struct PendingFunding {
    temporary_channel_id: ChannelId,
    counterparty_node_id: PublicKey,
    value_sat: u64,
    script_pubkey: ScriptBuf,
}

pub(crate) struct Node {
    pub(crate) index: usize,
    config: UserConfig,
    pub(crate) keys: Arc<KeysManager>,
    pub(crate) logger: Arc<TraceLogger>,
    pub(crate) fees: Arc<FeeSource>,
    pub(crate) broadcaster: Arc<Broadcaster>,
    pub(crate) persister: Arc<Persister>,
    pub(crate) graph: Arc<Graph>,
    pub(crate) gossip: Arc<GossipSync>,
    router: Arc<Router>,
    msg_router: Arc<MsgRouter>,
    pub(crate) monitor: Arc<Monitor>,
    pub(crate) manager: Arc<Manager>,
    pub(crate) claimable: Vec<Claimable>,
    pub(crate) closed: Vec<ClosedChannel>,
    pending_funding: Vec<PendingFunding>,
    /// Capacity of every channel this node has seen, open or closed.
    capacities: BTreeMap<ChannelId, u64>,
    pub(crate) received_msat: u64,
    pub(crate) sent_msat: u64,
}

fn new_monitor(
    broadcaster: &Arc<Broadcaster>, logger: &Arc<TraceLogger>, fees: &Arc<FeeSource>, persister: &Arc<Persister>,
    keys: &Arc<KeysManager>,
) -> Arc<Monitor> {
    Arc::new(ChainMonitor::new(
        None,
        Arc::clone(broadcaster),
        Arc::clone(logger),
        Arc::clone(fees),
        Arc::clone(persister),
        Arc::clone(keys),
        keys.get_peer_storage_key(),
    ))
}

impl Node {
    pub(crate) fn new(
        index: usize, seed: [u8; 32], fees: Arc<FeeSource>, config: UserConfig, network: Network, tip: BestBlock,
    ) -> Node {
        let keys = Arc::new(KeysManager::new(&seed, u64::from(BASE_TIME), index as u32, true));
        let logger = Arc::new(TraceLogger { node: index });
        let broadcaster = Arc::new(Broadcaster::default());
        let persister = Arc::new(Persister::new());
        let graph = Arc::new(NetworkGraph::new(network, Arc::clone(&logger)));
        let gossip = Arc::new(P2PGossipSync::new(Arc::clone(&graph), None, Arc::clone(&logger)));
        let scorer = Arc::new(Mutex::new(FixedPenaltyScorer::with_penalty(0)));
        let router = Arc::new(DefaultRouter::new(
            Arc::clone(&graph),
            Arc::clone(&logger),
            Arc::clone(&keys),
            scorer,
            (),
        ));
        let msg_router = Arc::new(DefaultMessageRouter::new(Arc::clone(&graph), Arc::clone(&keys)));
        let monitor = new_monitor(&broadcaster, &logger, &fees, &persister, &keys);
        let manager = Arc::new(ChannelManager::new(
            Arc::clone(&fees),
            Arc::clone(&monitor),
            Arc::clone(&broadcaster),
            Arc::clone(&router),
            Arc::clone(&msg_router),
            Arc::clone(&logger),
            Arc::clone(&keys),
            Arc::clone(&keys),
            Arc::clone(&keys),
            config.clone(),
            ChainParameters { network, best_block: tip },
            BASE_TIME,
        ));
        Node {
            index,
            config,
            keys,
            logger,
            fees,
            broadcaster,
            persister,
            graph,
            gossip,
            router,
            msg_router,
            monitor,
            manager,
            claimable: Vec::new(),
            closed: Vec::new(),
            pending_funding: Vec::new(),
            capacities: BTreeMap::new(),
            received_msat: 0,
            sent_msat: 0,
        }
    }

    pub(crate) fn node_id(&self) -> PublicKey {
        self.manager.get_our_node_id()
    }

    /// Open and pending channels, ordered by id.
    pub(crate) fn channels(&self) -> Vec<ChannelDetails> {
        let mut channels = self.manager.list_channels();
        channels.sort_by_key(|c| c.channel_id.0);
        channels
    }

    /// The `init` this node sends; used when two managers talk directly.
    pub(crate) fn init_for(&self, peer: &PublicKey) -> Init {
        Init { features: self.manager.provided_init_features(*peer), networks: None, remote_network_address: None }
    }

    pub(crate) fn take_broadcasts(&self) -> Vec<Transaction> {
        self.broadcaster.take()
    }

    /// Runs pending HTLC forwards and drains both event queues until
    /// neither produces anything new.
    pub(crate) fn process_events(&mut self) {
        for _ in 0..MAX_EVENT_ROUNDS {
            if self.manager.needs_pending_htlc_processing() {
                self.manager.process_pending_htlc_forwards();
            }
            let collected = RefCell::new(Vec::new());
            let handler = |event: Event| -> Result<(), ReplayEvent> {
                collected.borrow_mut().push(event);
                Ok(())
            };
            self.monitor.process_pending_events(&handler);
            self.manager.process_pending_events(&handler);
            let events = collected.into_inner();
            if events.is_empty() && !self.manager.needs_pending_htlc_processing() {
                break;
            }
            for event in events {
                self.handle_event(event);
            }
        }
        for channel in self.manager.list_channels() {
            self.capacities.insert(channel.channel_id, channel.channel_value_satoshis);
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::FundingGenerationReady {
                temporary_channel_id,
                counterparty_node_id,
                channel_value_satoshis,
                output_script,
                ..
            } => self.pending_funding.push(PendingFunding {
                temporary_channel_id,
                counterparty_node_id,
                value_sat: channel_value_satoshis,
                script_pubkey: output_script,
            }),
            Event::PaymentClaimable { payment_hash, amount_msat, purpose, .. } => {
                trace!(node = self.index, ?payment_hash, amount_msat, "payment claimable");
                if !self.claimable.iter().any(|c| c.payment_hash == payment_hash) {
                    self.claimable.push(Claimable { payment_hash, preimage: purpose.preimage(), amount_msat });
                }
            }
            Event::PaymentClaimed { payment_hash, amount_msat, .. } => {
                debug!(node = self.index, ?payment_hash, amount_msat, "payment claimed");
                self.received_msat += amount_msat;
            }
            Event::PaymentSent { payment_hash, amount_msat, fee_paid_msat, .. } => {
                debug!(node = self.index, ?payment_hash, ?amount_msat, ?fee_paid_msat, "payment sent");
                self.sent_msat += amount_msat.unwrap_or(0);
            }
            Event::PaymentFailed { payment_hash, reason, .. } => {
                debug!(node = self.index, ?payment_hash, ?reason, "payment failed")
            }
            Event::ChannelClosed { channel_id, reason, channel_capacity_sats, last_local_balance_msat, .. } => {
                debug!(node = self.index, %channel_id, %reason, ?last_local_balance_msat, "channel closed");
                if let Some(capacity) = channel_capacity_sats {
                    self.capacities.insert(channel_id, capacity);
                }
                self.closed.push(ClosedChannel {
                    channel_id,
                    reason,
                    capacity_sat: channel_capacity_sats,
                    last_local_balance_msat,
                });
            }
            Event::SpendableOutputs { outputs, channel_id } => {
                debug!(node = self.index, ?channel_id, outputs = outputs.len(), "outputs spendable")
            }
            other => trace!(node = self.index, event = ?other, "event"),
        }
    }

    /// Hands every channel awaiting funding a funding transaction. The
    /// manager broadcasts it once the counterparty signs.
    pub(crate) fn fund_pending(&mut self, nonce: &mut u64) -> usize {
        let mut funded = 0;
        for pending in std::mem::take(&mut self.pending_funding) {
            *nonce += 1;
            let tx = funding_transaction(*nonce, pending.value_sat, pending.script_pubkey);
            match self.manager.funding_transaction_generated(
                pending.temporary_channel_id,
                pending.counterparty_node_id,
                tx,
            ) {
                Ok(()) => funded += 1,
                Err(e) => trace!(node = self.index, error = ?e, "funding refused"),
            }
        }
        funded
    }

    pub(crate) fn open_channel(
        &self, peer: PublicKey, value_sat: u64, push_msat: u64, user_channel_id: u128, announce: bool,
    ) -> Result<ChannelId, APIError> {
        let mut config = self.config.clone();
        config.channel_handshake_config.announce_for_forwarding = announce;
        self.manager.create_channel(peer, value_sat, push_msat, user_channel_id, None, Some(config))
    }

    pub(crate) fn block_connected(&self, block: &Block, height: u32) {
        Listen::block_connected(&*self.monitor, block, height);
        Listen::block_connected(&*self.manager, block, height);
    }

    pub(crate) fn blocks_disconnected(&self, fork_point: BestBlock) {
        Listen::blocks_disconnected(&*self.monitor, fork_point);
        Listen::blocks_disconnected(&*self.manager, fork_point);
    }

    /// A fresh invoice for `amount_msat`, paid to this node.
    pub(crate) fn invoice(&self, amount_msat: u64) -> Option<(PaymentHash, PaymentSecret)> {
        self.manager.create_inbound_payment(Some(amount_msat), INVOICE_EXPIRY_SECS, None).ok()
    }

    pub(crate) fn pay(
        &self, payee: PublicKey, payment_hash: PaymentHash, payment_secret: PaymentSecret, amount_msat: u64,
    ) -> Result<(), RetryableSendFailure> {
        let params = PaymentParameters::from_node_id(payee, FINAL_CLTV_EXPIRY_DELTA);
        let route_params = RouteParameters::from_payment_params_and_value(params, amount_msat);
        self.manager.send_payment(
            payment_hash,
            RecipientOnionFields::secret_only(payment_secret),
            PaymentId(payment_hash.0),
            route_params,
            Retry::Attempts(0),
        )
    }

    /// Claims every claimable payment this node knows the preimage of and
    /// fails the rest. Returns how many were settled.
    pub(crate) fn claim_all(&mut self) -> usize {
        let claimable = std::mem::take(&mut self.claimable);
        for payment in &claimable {
            match payment.preimage {
                Some(preimage) => self.manager.claim_funds(preimage),
                None => self.manager.fail_htlc_backwards(&payment.payment_hash),
            }
        }
        self.process_events();
        claimable.len()
    }

    pub(crate) fn fail_all(&mut self) -> usize {
        let claimable = std::mem::take(&mut self.claimable);
        for payment in &claimable {
            self.manager.fail_htlc_backwards(&payment.payment_hash);
        }
        self.process_events();
        claimable.len()
    }

    /// Completes in-flight monitor writes, oldest first per channel. Returns
    /// how many completed.
    pub(crate) fn complete_monitor_updates(&self, oldest_only: bool) -> usize {
        let mut pending: Vec<(ChannelId, Vec<u64>)> = self.monitor.list_pending_monitor_updates().into_iter().collect();
        pending.sort_by_key(|(id, _)| id.0);
        let mut completed = 0;
        for (channel_id, update_ids) in pending {
            let take = if oldest_only { 1 } else { update_ids.len() };
            for update_id in update_ids.into_iter().take(take) {
                if !self.persister.mark_completed(&channel_id, update_id) {
                    continue;
                }
                if let Err(e) = self.monitor.channel_monitor_updated(channel_id, update_id) {
                    panic!("node {} could not complete monitor update {update_id} for {channel_id}: {e:?}", self.index);
                }
                completed += 1;
            }
        }
        completed
    }

    /// Restarts the node from its serialized manager and the last completed
    /// monitor snapshots, brought up to the chain tip. Writes that never
    /// completed are lost; the manager replays them.
    pub(crate) fn reload(&mut self, chain: &Chain) {
        let manager_bytes = self.manager.encode();
        self.persister.discard_pending();
        let mut monitors = Vec::new();
        for (channel_id, bytes) in self.persister.completed_snapshots() {
            let read = <(BlockHash, ChannelMonitor<InMemorySigner>)>::read(&mut &bytes[..], (&*self.keys, &*self.keys));
            let (_, monitor) = match read {
                Ok(m) => m,
                Err(e) => panic!("node {} persisted monitor for {channel_id} does not decode: {e:?}", self.index),
            };
            self.sync_monitor(&monitor, chain);
            monitors.push(monitor);
        }

        let chain_monitor = new_monitor(&self.broadcaster, &self.logger, &self.fees, &self.persister, &self.keys);
        let args = ChannelManagerReadArgs::new(
            Arc::clone(&self.keys),
            Arc::clone(&self.keys),
            Arc::clone(&self.keys),
            Arc::clone(&self.fees),
            Arc::clone(&chain_monitor),
            Arc::clone(&self.broadcaster),
            Arc::clone(&self.router),
            Arc::clone(&self.msg_router),
            Arc::clone(&self.logger),
            self.config.clone(),
            monitors.iter().collect(),
        );
        let manager = match <(BlockHash, Manager)>::read(&mut &manager_bytes[..], args) {
            Ok((_, manager)) => manager,
            Err(e) => panic!("node {} failed to reload its channel manager: {e:?}", self.index),
        };
        for monitor in monitors {
            let channel_id = monitor.channel_id();
            match chain_monitor.watch_channel(channel_id, monitor) {
                Ok(ChannelMonitorUpdateStatus::Completed) => {}
                other => panic!("node {} could not watch reloaded monitor {channel_id}: {other:?}", self.index),
            }
        }
        debug!(node = self.index, tip = chain.height(), "node reloaded");
        self.monitor = chain_monitor;
        self.manager = Arc::new(manager);
        self.claimable.clear();
        self.pending_funding.clear();
        self.process_events();
    }

    /// Rewinds and replays blocks so a restored monitor sits at the tip.
    fn sync_monitor(&self, monitor: &ChannelMonitor<InMemorySigner>, chain: &Chain) {
        let best = monitor.current_best_block();
        let fork = chain.fork_point(best);
        if fork.height < best.height {
            monitor.blocks_disconnected(fork, &*self.broadcaster, &*self.fees, &self.logger);
        }
        for (block, height) in chain.blocks_above(fork.height) {
            let txdata: Vec<_> = block.txdata.iter().enumerate().collect();
            monitor.block_connected(&block.header, &txdata, height, &*self.broadcaster, &*self.fees, &self.logger);
        }
    }

    /// Per-channel accounting the manager and monitors must always satisfy.
    pub(crate) fn check_invariants(&self) {
        for channel in self.manager.list_channels() {
            let capacity_msat = channel.channel_value_satoshis * 1000;
            let in_flight: u64 = channel.pending_inbound_htlcs.iter().map(|h| h.amount_msat).sum::<u64>()
                + channel.pending_outbound_htlcs.iter().map(|h| h.amount_msat).sum::<u64>();
            assert!(
                in_flight <= capacity_msat,
                "node {} channel {} has {in_flight} msat in flight over {capacity_msat} msat capacity",
                self.index,
                channel.channel_id
            );
            assert!(
                channel.outbound_capacity_msat + channel.inbound_capacity_msat <= capacity_msat,
                "node {} channel {} spendable capacity exceeds the channel",
                self.index,
                channel.channel_id
            );
        }
        for channel_id in self.monitor.list_monitors() {
            let Some(&capacity_sat) = self.capacities.get(&channel_id) else { continue };
            let Ok(monitor) = self.monitor.get_monitor(channel_id) else { continue };
            let claimable_sat: u64 = monitor.get_claimable_balances().iter().map(|b| b.claimable_amount_satoshis()).sum();
            assert!(
                claimable_sat <= capacity_sat,
                "node {} monitor for {channel_id} claims {claimable_sat} sat of a {capacity_sat} sat channel",
                self.index
            );
        }
    }

    /// What the monitor for `channel_id` says this node can claim.
    pub(crate) fn claimable_balance_sat(&self, channel_id: ChannelId) -> u64 {
        match self.monitor.get_monitor(channel_id) {
            Ok(monitor) => monitor.get_claimable_balances().iter().map(|b| b.claimable_amount_satoshis()).sum(),
            Err(()) => 0,
        }
    }

    pub(crate) fn latest_update_id(&self, channel_id: ChannelId) -> Option<u64> {
        self.monitor.get_monitor(channel_id).ok().map(|m| m.get_latest_update_id())
    }

    /// True while any monitor write is still in flight.
    pub(crate) fn has_pending_monitor_updates(&self) -> bool {
        self.monitor.list_pending_monitor_updates().into_iter().any(|(_, ids)| !ids.is_empty())
    }

    pub(crate) fn force_close(&self, channel_id: &ChannelId, counterparty: &PublicKey) -> Result<(), APIError> {
        self.manager.force_close_broadcasting_latest_txn(channel_id, counterparty, "closed by the harness".to_owned())
    }

    pub(crate) fn close(&self, channel_id: &ChannelId, counterparty: &PublicKey) -> Result<(), APIError> {
        self.manager.close_channel(channel_id, counterparty)
    }
}
