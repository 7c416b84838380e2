//! # Router interpreter
//!
//! Builds a small graph from the input and asks LDK for routes through it.
//! Every route that comes back is re-walked hop by hop against the graph,
//! the supplied first hops and the route hints, to confirm the amounts,
//! fees and CLTV deltas are what each channel's policy demands.
//!
//! ```text
//!   node count (2 + u8 % 15), then actions:
//!   0x00 add channel     a b scid:u32 has_cap [cap_sat:u32]
//!   0x01 update policy   chan flags cltv:u16 min:u32 max:u32 base:u16 prop:u16
//!   0x02 remove channel  chan
//!   0x03 remove node     node
//!   0x04 set first hops  n (scid:u32 peer limit:u32 min:u16){n % 4}
//!   0x05 clear first hops
//!   0x06 set hints       n (src scid:u32 base:u16 prop:u16 cltv:u16){n % 3}
//!   0x07 find route      payer payee amt:u32 cltv:u8 max_cltv:u16 len:u8 paths:u8 has_fee [fee:u32]
//!   0x08 reload graph
//!   0xff stop
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use bitcoin::constants::ChainHash;
use bitcoin::secp256k1::{PublicKey, Secp256k1};
use bitcoin::Network;
use lightning::ln::channel_state::{ChannelCounterparty, ChannelDetails};
use lightning::ln::msgs::UnsignedChannelUpdate;
use lightning::ln::types::ChannelId;
use lightning::routing::gossip::{
    ChannelInfo, ChannelUpdateInfo, NetworkGraph, NodeId, ReadOnlyNetworkGraph, RoutingFees,
};
use lightning::routing::router::{
    find_route, Path, Payee, PaymentParameters, Route, RouteHint, RouteHintHop, RouteParameters,
    MAX_PATH_LENGTH_ESTIMATE,
};
use lightning::routing::scoring::FixedPenaltyScorer;
use lightning::types::features::{Bolt11InvoiceFeatures, ChannelFeatures, InitFeatures};
use lightning::util::ser::{ReadableArgs, Writeable};
use tracing::trace;

use super::{assert_graph_consistent, fixed_secret};
use crate::config::HarnessConfig;
use crate::env::{gossip_time, TraceLogger};
use crate::input::FuzzInput;

const MAX_NODES: u8 = 16;
const MAX_FIRST_HOPS: u8 = 4;
const MAX_HINTS: u8 = 3;
const MAX_PATHS: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    AddChannel,
    UpdatePolicy,
    RemoveChannel,
    RemoveNode,
    SetFirstHops,
    ClearFirstHops,
    SetHints,
    FindRoute,
    Reload,
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
            0x00 => Action::AddChannel,
            0x01 => Action::UpdatePolicy,
            0x02 => Action::RemoveChannel,
            0x03 => Action::RemoveNode,
            0x04 => Action::SetFirstHops,
            0x05 => Action::ClearFirstHops,
            0x06 => Action::SetHints,
            0x07 => Action::FindRoute,
            0x08 => Action::Reload,
            0xff => Action::Stop,
            _ => Action::Noop,
        }
    }
}

fn fee_for(fees: RoutingFees, amount_msat: u64) -> u64 {
    (fees.base_msat as u64).saturating_add(amount_msat.saturating_mul(fees.proportional_millionths as u64) / 1_000_000)
}

/// A usable first hop to `counterparty`, as `list_usable_channels` would
/// report it.
fn first_hop(scid: u64, counterparty: PublicKey, limit_msat: u64, minimum_msat: u64) -> ChannelDetails {
    ChannelDetails {
        channel_id: ChannelId::from_bytes([scid as u8; 32]),
        counterparty: ChannelCounterparty {
            node_id: counterparty,
            features: InitFeatures::empty(),
            unspendable_punishment_reserve: 0,
            forwarding_info: None,
            outbound_htlc_minimum_msat: None,
            outbound_htlc_maximum_msat: None,
        },
        funding_txo: None,
        channel_type: None,
        short_channel_id: Some(scid),
        outbound_scid_alias: None,
        inbound_scid_alias: None,
        channel_value_satoshis: limit_msat / 1000 + 1,
        unspendable_punishment_reserve: None,
        user_channel_id: scid as u128,
        feerate_sat_per_1000_weight: None,
        outbound_capacity_msat: limit_msat,
        next_outbound_htlc_limit_msat: limit_msat,
        next_outbound_htlc_minimum_msat: minimum_msat,
        inbound_capacity_msat: 0,
        confirmations_required: None,
        confirmations: None,
        force_close_spend_delay: None,
        is_outbound: true,
        is_channel_ready: true,
        channel_shutdown_state: None,
        is_usable: true,
        is_announced: false,
        inbound_htlc_minimum_msat: None,
        inbound_htlc_maximum_msat: None,
        config: None,
        pending_inbound_htlcs: Vec::new(),
        pending_outbound_htlcs: Vec::new(),
        funding_redeem_script: None,
    }
}

/// The policy for leaving `from` over `chan` and the node it leads to.
/// Channels only route once both directions have a policy.
fn direction_from<'a>(chan: &'a ChannelInfo, from: &NodeId) -> Option<(&'a ChannelUpdateInfo, NodeId)> {
    let (one, two) = (chan.one_to_two.as_ref()?, chan.two_to_one.as_ref()?);
    if chan.node_one == *from {
        Some((one, chan.node_two))
    } else if chan.node_two == *from {
        Some((two, chan.node_one))
    } else {
        None
    }
}

/// What a route hop was checked against.
struct HopPolicy {
    fees: RoutingFees,
    cltv_expiry_delta: u16,
}

struct Request {
    payer: PublicKey,
    payee: PublicKey,
    params: RouteParameters,
    mpp: bool,
}

struct Session {
    logger: Arc<TraceLogger>,
    graph: NetworkGraph<Arc<TraceLogger>>,
    chain_hash: ChainHash,
    nodes: Vec<PublicKey>,
    /// Channels the graph currently holds, in insertion order.
    scids: Vec<u64>,
    first_hops: Option<Vec<ChannelDetails>>,
    hints: Vec<RouteHintHop>,
    timestamp: u32,
}

impl Session {
    fn new(node_count: usize) -> Self {
        let secp = Secp256k1::signing_only();
        let logger = Arc::new(TraceLogger { node: 0 });
        Session {
            graph: NetworkGraph::new(Network::Bitcoin, Arc::clone(&logger)),
            logger,
            chain_hash: ChainHash::using_genesis_block(Network::Bitcoin),
            nodes: (0..node_count).map(|i| PublicKey::from_secret_key(&secp, &fixed_secret(i as u8 + 1))).collect(),
            scids: Vec::new(),
            first_hops: None,
            hints: Vec::new(),
            timestamp: gossip_time().saturating_sub(3600),
        }
    }

    fn node(&self, input: &mut FuzzInput<'_>) -> PublicKey {
        match input.take_index(self.nodes.len()) {
            Some(i) => self.nodes[i],
            None => unreachable!("session always has nodes"),
        }
    }

    fn add_channel(&mut self, input: &mut FuzzInput<'_>) {
        let (one, two) = (self.node(input), self.node(input));
        let scid = input.take_u32() as u64;
        let capacity_sats = input.take_bool().then(|| input.take_u32() as u64);
        let added = self.graph.add_channel_from_partial_announcement(
            scid,
            capacity_sats,
            self.timestamp as u64,
            ChannelFeatures::empty(),
            NodeId::from_pubkey(&one),
            NodeId::from_pubkey(&two),
        );
        match added {
            Ok(()) if !self.scids.contains(&scid) => self.scids.push(scid),
            Ok(()) => {}
            Err(e) => trace!(scid, error = %e.err, "channel rejected"),
        }
    }

    fn update_policy(&mut self, input: &mut FuzzInput<'_>) {
        let Some(i) = input.take_index(self.scids.len()) else { return };
        self.timestamp += 1;
        let update = UnsignedChannelUpdate {
            chain_hash: self.chain_hash,
            short_channel_id: self.scids[i],
            timestamp: self.timestamp,
            message_flags: 1,
            channel_flags: input.take_u8() & 0x03,
            cltv_expiry_delta: input.take_u16(),
            htlc_minimum_msat: input.take_u32() as u64,
            htlc_maximum_msat: input.take_u32() as u64 * 1000,
            fee_base_msat: input.take_u16() as u32,
            fee_proportional_millionths: input.take_u16() as u32,
            excess_data: Vec::new(),
        };
        match self.graph.update_channel_unsigned(&update) {
            Ok(()) => {
                let graph = self.graph.read_only();
                let applied = graph.channel(update.short_channel_id).and_then(|c| c.get_directional_info(update.channel_flags));
                match applied {
                    Some(info) => {
                        assert_eq!(info.last_update, update.timestamp);
                        assert_eq!(info.enabled, update.channel_flags & 0x02 == 0);
                        assert_eq!(info.htlc_maximum_msat, update.htlc_maximum_msat);
                    }
                    None => panic!("accepted update for channel {} left no policy", update.short_channel_id),
                }
            }
            Err(e) => trace!(error = %e.err, "policy rejected"),
        }
    }

    fn forget_removed_channels(&mut self) {
        let graph = self.graph.read_only();
        self.scids.retain(|scid| graph.channel(*scid).is_some());
    }

    fn remove_channel(&mut self, input: &mut FuzzInput<'_>) {
        let Some(i) = input.take_index(self.scids.len()) else { return };
        let scid = self.scids.remove(i);
        self.graph.channel_failed_permanent(scid);
        assert!(self.graph.read_only().channel(scid).is_none(), "channel {scid} survived removal");
    }

    fn remove_node(&mut self, input: &mut FuzzInput<'_>) {
        let node = self.node(input);
        self.graph.node_failed_permanent(&node);
        let id = NodeId::from_pubkey(&node);
        {
            let graph = self.graph.read_only();
            assert!(graph.node(&id).is_none(), "node {id} survived removal");
            for (scid, chan) in graph.channels().unordered_iter() {
                assert!(chan.node_one != id && chan.node_two != id, "channel {scid} still touches {id}");
            }
        }
        self.forget_removed_channels();
    }

    fn set_first_hops(&mut self, input: &mut FuzzInput<'_>) {
        let count = input.take_u8() % MAX_FIRST_HOPS;
        let hops = (0..count)
            .map(|_| {
                let scid = input.take_u32() as u64;
                let peer = self.node(input);
                first_hop(scid, peer, input.take_u32() as u64, input.take_u16() as u64)
            })
            .collect();
        self.first_hops = Some(hops);
    }

    fn set_hints(&mut self, input: &mut FuzzInput<'_>) {
        let count = input.take_u8() % MAX_HINTS;
        self.hints = (0..count)
            .map(|_| RouteHintHop {
                src_node_id: self.node(input),
                short_channel_id: input.take_u32() as u64,
                fees: RoutingFees { base_msat: input.take_u16() as u32, proportional_millionths: input.take_u16() as u32 },
                cltv_expiry_delta: input.take_u16(),
                htlc_minimum_msat: None,
                htlc_maximum_msat: None,
            })
            .collect();
    }

    fn request(&self, input: &mut FuzzInput<'_>) -> Request {
        let payer = self.node(input);
        let payee = self.node(input);
        let final_value_msat = input.take_u32() as u64;
        let mut payment_params = PaymentParameters::from_node_id(payee, input.take_u8() as u32)
            .with_max_total_cltv_expiry_delta(input.take_u16() as u32);
        payment_params.max_path_length = input.take_u8() % (MAX_PATH_LENGTH_ESTIMATE + 1);
        payment_params.max_channel_saturation_power_of_half = 0;
        let paths = input.take_u8();
        let mpp = paths % (MAX_PATHS + 1) > 1;
        payment_params = payment_params.with_max_path_count(paths % (MAX_PATHS + 1));
        if mpp {
            let mut features = Bolt11InvoiceFeatures::empty();
            features.set_basic_mpp_optional();
            payment_params = match payment_params.with_bolt11_features(features) {
                Ok(p) => p,
                Err(()) => unreachable!("clear payee takes bolt11 features"),
            };
        }
        let hints: Vec<RouteHint> = self
            .hints
            .iter()
            .filter(|h| h.src_node_id != payee)
            .map(|h| RouteHint(vec![h.clone()]))
            .collect();
        if !hints.is_empty() {
            payment_params = match payment_params.with_route_hints(hints) {
                Ok(p) => p,
                Err(()) => unreachable!("clear payee takes route hints"),
            };
        }
        let mut params = RouteParameters::from_payment_params_and_value(payment_params, final_value_msat);
        params.max_total_routing_fee_msat = input.take_bool().then(|| input.take_u32() as u64);
        Request { payer, payee, params, mpp }
    }

    fn first_hops_for(&self, payer: &PublicKey) -> Option<Vec<&ChannelDetails>> {
        self.first_hops.as_ref().map(|hops| hops.iter().filter(|h| h.counterparty.node_id != *payer).collect())
    }

    fn route(&self, request: &Request) -> Result<Route, &'static str> {
        let first_hops = self.first_hops_for(&request.payer);
        let scorer = FixedPenaltyScorer::with_penalty(0);
        find_route(
            &request.payer,
            &request.params,
            &self.graph,
            first_hops.as_deref(),
            Arc::clone(&self.logger),
            &scorer,
            &(),
            &[0x5a; 32],
        )
    }

    fn find_route(&self, input: &mut FuzzInput<'_>) {
        let request = self.request(input);
        match self.route(&request) {
            Ok(route) => self.check_route(&request, &route),
            Err(e) => {
                trace!(error = e, "route request rejected");
                let first_hops = self.first_hops_for(&request.payer);
                assert!(
                    request.mpp || !self.direct_channel_usable(&request, first_hops.as_deref()),
                    "usable direct channel from {} to {} but no route: {e}",
                    request.payer,
                    request.payee
                );
            }
        }
    }

    /// A single channel straight to the payee needs no fees, so whenever one
    /// fits the request the router has to find something.
    fn direct_channel_usable(&self, request: &Request, first_hops: Option<&[&ChannelDetails]>) -> bool {
        let params = &request.params.payment_params;
        let value = request.params.final_value_msat;
        let final_cltv = match &params.payee {
            Payee::Clear { final_cltv_expiry_delta, .. } => *final_cltv_expiry_delta,
            Payee::Blinded { .. } => return false,
        };
        if request.payer == request.payee
            || value == 0
            || params.max_path_length == 0
            || params.max_path_count == 0
            || final_cltv > params.max_total_cltv_expiry_delta
        {
            return false;
        }
        match first_hops {
            Some(hops) => hops.iter().any(|h| {
                h.counterparty.node_id == request.payee
                    && h.next_outbound_htlc_limit_msat >= value
                    && h.next_outbound_htlc_minimum_msat <= value
            }),
            None => {
                let graph = self.graph.read_only();
                let (payer, payee) = (NodeId::from_pubkey(&request.payer), NodeId::from_pubkey(&request.payee));
                graph.node(&payer).is_some_and(|info| {
                    info.channels.iter().any(|scid| {
                        graph.channel(*scid).is_some_and(|chan| {
                            direction_from(chan, &payer).is_some_and(|(policy, to)| {
                                to == payee
                                    && policy.enabled
                                    && policy.htlc_minimum_msat <= value
                                    && policy.htlc_maximum_msat >= value
                                    && chan.capacity_sats.is_none_or(|c| c.saturating_mul(1000) >= value)
                                    && final_cltv + policy.cltv_expiry_delta as u32 <= params.max_total_cltv_expiry_delta
                            })
                        })
                    })
                })
            }
        }
    }

    fn check_route(&self, request: &Request, route: &Route) {
        let params = &request.params;
        assert!(!route.paths.is_empty(), "route without paths");
        assert!(route.paths.len() <= params.payment_params.max_path_count as usize, "too many paths");
        assert!(request.mpp || route.paths.len() == 1, "payment split without mpp support");
        assert_eq!(route.get_total_amount(), params.final_value_msat, "route pays the wrong amount");
        if let Some(max_fee) = params.max_total_routing_fee_msat {
            assert!(route.get_total_fees() <= max_fee, "fee budget exceeded");
        }
        let graph = self.graph.read_only();
        for path in &route.paths {
            self.check_path(request, &graph, path);
        }
    }

    fn check_path(&self, request: &Request, graph: &ReadOnlyNetworkGraph<'_>, path: &Path) {
        let params = &request.params.payment_params;
        let hops = &path.hops;
        assert!(!hops.is_empty(), "empty path");
        assert!(path.blinded_tail.is_none(), "clear payee got a blinded tail");
        assert!(hops.len() <= params.max_path_length as usize, "path longer than allowed");
        assert_eq!(hops[hops.len() - 1].pubkey, request.payee);
        let total_cltv: u32 = hops.iter().map(|h| h.cltv_expiry_delta).sum();
        assert!(total_cltv <= params.max_total_cltv_expiry_delta, "cltv budget exceeded");

        let mut seen = HashSet::from([request.payer]);
        for hop in hops {
            assert!(seen.insert(hop.pubkey), "node {} visited twice", hop.pubkey);
        }

        // Amount carried over channel i: what hop i and everything after it keep.
        let amounts: Vec<u64> = (0..hops.len()).map(|i| hops[i..].iter().map(|h| h.fee_msat).sum()).collect();

        let first = &hops[0];
        match &self.first_hops {
            Some(first_hops) => assert!(
                first_hops.iter().any(|h| {
                    h.short_channel_id == Some(first.short_channel_id)
                        && h.counterparty.node_id == first.pubkey
                        && h.next_outbound_htlc_limit_msat >= amounts[0]
                        && h.next_outbound_htlc_minimum_msat <= amounts[0]
                }),
                "first channel is not a usable first hop"
            ),
            None => {
                self.check_channel(graph, &request.payee, &request.payer, first.short_channel_id, &first.pubkey, amounts[0]);
            }
        }

        for i in 1..hops.len() {
            let (prev, hop) = (&hops[i - 1], &hops[i]);
            let policy =
                self.check_channel(graph, &request.payee, &prev.pubkey, hop.short_channel_id, &hop.pubkey, amounts[i]);
            assert!(prev.fee_msat >= fee_for(policy.fees, amounts[i]), "fee too low at hop {i}");
            assert_eq!(prev.cltv_expiry_delta, policy.cltv_expiry_delta as u32, "cltv mismatch at hop {i}");
        }
    }

    /// Finds the graph channel or route hint that carries `amount` from
    /// `from` to `to` over `scid`.
    fn check_channel(
        &self, graph: &ReadOnlyNetworkGraph<'_>, payee: &PublicKey, from: &PublicKey, scid: u64, to: &PublicKey,
        amount: u64,
    ) -> HopPolicy {
        let (from_id, to_id) = (NodeId::from_pubkey(from), NodeId::from_pubkey(to));
        let public = graph.channel(scid).and_then(|chan| {
            let (policy, other) = direction_from(chan, &from_id)?;
            let fits = other == to_id
                && policy.enabled
                && policy.htlc_minimum_msat <= amount
                && amount <= policy.htlc_maximum_msat
                && chan.capacity_sats.is_none_or(|c| amount <= c.saturating_mul(1000));
            fits.then_some(HopPolicy { fees: policy.fees, cltv_expiry_delta: policy.cltv_expiry_delta })
        });
        if let Some(policy) = public {
            return policy;
        }
        let hinted = self.hints.iter().find(|h| h.short_channel_id == scid && h.src_node_id == *from && to == payee);
        match hinted {
            Some(hint) => HopPolicy { fees: hint.fees, cltv_expiry_delta: hint.cltv_expiry_delta },
            None => panic!("no channel or hint carries {amount} msat from {from} to {to} over {scid}"),
        }
    }

    fn step(&mut self, action: Action, input: &mut FuzzInput<'_>) {
        match action {
            Action::AddChannel => self.add_channel(input),
            Action::UpdatePolicy => self.update_policy(input),
            Action::RemoveChannel => self.remove_channel(input),
            Action::RemoveNode => self.remove_node(input),
            Action::SetFirstHops => self.set_first_hops(input),
            Action::ClearFirstHops => self.first_hops = None,
            Action::SetHints => self.set_hints(input),
            Action::FindRoute => self.find_route(input),
            Action::Reload => self.reload(),
            Action::Stop | Action::Exhausted | Action::Noop => {}
        }
    }

    fn reload(&mut self) {
        let bytes = self.graph.encode();
        match NetworkGraph::read(&mut &bytes[..], Arc::clone(&self.logger)) {
            Ok(reloaded) => {
                assert!(reloaded == self.graph, "graph changed across serialization");
                self.graph = reloaded;
            }
            Err(e) => panic!("serialized graph failed to decode: {e:?}"),
        }
    }
}

pub fn run(data: &[u8], config: &HarnessConfig) {
    let mut input = FuzzInput::new(data);
    let node_count = 2 + (input.take_u8() % (MAX_NODES - 1)) as usize;
    let mut session = Session::new(node_count);

    for _ in 0..config.max_actions {
        let action = Action::next(&mut input);
        trace!(?action, channels = session.scids.len(), "router step");
        if matches!(action, Action::Stop | Action::Exhausted) {
            break;
        }
        session.step(action, &mut input);
        assert_graph_consistent(&session.graph.read_only());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_PATH_LEN: u8 = MAX_PATH_LENGTH_ESTIMATE;

    fn session_with(nodes: usize, script: &[u8]) -> Session {
        let mut session = Session::new(nodes);
        let mut input = FuzzInput::new(script);
        loop {
            match Action::next(&mut input) {
                Action::Stop | Action::Exhausted => return session,
                action => session.step(action, &mut input),
            }
        }
    }

    fn add(a: u8, b: u8, scid: u32, capacity_sat: Option<u32>) -> Vec<u8> {
        let mut s = vec![0x00, a, b];
        s.extend_from_slice(&scid.to_be_bytes());
        match capacity_sat {
            Some(c) => {
                s.push(1);
                s.extend_from_slice(&c.to_be_bytes());
            }
            None => s.push(0),
        }
        s
    }

    /// Sets the same policy in both directions of the channel at `index`.
    fn policy_both_ways(index: u8, cltv: u16, max_sat: u32, base: u16, prop: u16) -> Vec<u8> {
        let mut s = Vec::new();
        for flags in [0u8, 1] {
            s.extend_from_slice(&[0x01, index, flags]);
            s.extend_from_slice(&cltv.to_be_bytes());
            s.extend_from_slice(&1u32.to_be_bytes());
            s.extend_from_slice(&max_sat.to_be_bytes());
            s.extend_from_slice(&base.to_be_bytes());
            s.extend_from_slice(&prop.to_be_bytes());
        }
        s
    }

    fn request_bytes(payer: u8, payee: u8, amount_msat: u32, paths: u8) -> Vec<u8> {
        let mut s = vec![payer, payee];
        s.extend_from_slice(&amount_msat.to_be_bytes());
        s.push(18);
        s.extend_from_slice(&1008u16.to_be_bytes());
        s.extend_from_slice(&[MAX_PATH_LEN, paths, 0]);
        s
    }

    fn route_for(session: &Session, payer: u8, payee: u8, amount_msat: u32) -> (Request, Route) {
        let bytes = request_bytes(payer, payee, amount_msat, 1);
        let request = session.request(&mut FuzzInput::new(&bytes));
        match session.route(&request) {
            Ok(route) => (request, route),
            Err(e) => panic!("no route from {payer} to {payee}: {e}"),
        }
    }

    #[test]
    fn line_graph_routes_through_the_middle() {
        let mut script = add(0, 1, 10, Some(10_000));
        script.extend(add(1, 2, 20, None));
        script.extend(policy_both_ways(0, 40, 4_000, 0, 0));
        script.extend(policy_both_ways(1, 144, 4_000, 100, 1000));
        let session = session_with(3, &script);
        assert_eq!(session.scids, vec![10, 20]);

        let (request, route) = route_for(&session, 0, 2, 5_000);
        session.check_route(&request, &route);
        let hops = &route.paths[0].hops;
        assert_eq!(hops.iter().map(|h| h.short_channel_id).collect::<Vec<_>>(), vec![10, 20]);
        assert_eq!(hops[0].fee_msat, 105);
        assert_eq!(hops[0].cltv_expiry_delta, 144);
        assert_eq!(route.get_total_amount(), 5_000);

        let mut data = vec![1];
        data.extend_from_slice(&script);
        data.push(0x07);
        data.extend(request_bytes(0, 2, 5_000, 1));
        data.push(0x08);
        run(&data, &HarnessConfig::default());
    }

    #[test]
    fn direct_channel_is_found() {
        let mut script = add(0, 1, 5, None);
        script.extend(policy_both_ways(0, 6, 1_000, 1, 1));
        let session = session_with(2, &script);
        let bytes = request_bytes(0, 1, 5_000, 1);
        let request = session.request(&mut FuzzInput::new(&bytes));
        assert!(session.direct_channel_usable(&request, None));
        let (request, route) = route_for(&session, 0, 1, 5_000);
        session.check_route(&request, &route);
        assert_eq!(route.paths[0].hops.len(), 1);
        assert_eq!(route.get_total_fees(), 0);
    }

    #[test]
    fn one_sided_channel_does_not_route() {
        let mut script = add(0, 1, 5, None);
        script.extend_from_slice(&[0x01, 0, 0, 0, 6, 0, 0, 0, 1, 0, 0, 0x03, 0xe8, 0, 0, 0, 0]);
        let session = session_with(2, &script);
        let bytes = request_bytes(0, 1, 5_000, 1);
        let request = session.request(&mut FuzzInput::new(&bytes));
        assert!(!session.direct_channel_usable(&request, None));
        assert!(session.route(&request).is_err());
    }

    #[test]
    fn first_hops_replace_public_channels() {
        // public 0-1 exists, but the first hop list only offers scid 77
        let mut script = add(0, 1, 5, None);
        script.extend(policy_both_ways(0, 6, 1_000, 0, 0));
        script.extend_from_slice(&[0x04, 1, 0, 0, 0, 77, 1, 0, 0x0f, 0x42, 0x40, 0, 0]);
        let session = session_with(2, &script);
        let (request, route) = route_for(&session, 0, 1, 5_000);
        session.check_route(&request, &route);
        assert_eq!(route.paths[0].hops[0].short_channel_id, 77);
    }

    #[test]
    fn route_hint_reaches_private_payee() {
        let mut script = add(0, 1, 10, None);
        script.extend(policy_both_ways(0, 40, 4_000, 0, 0));
        // hint: node 1 reaches the payee over scid 99, base fee 10, cltv 20
        script.extend_from_slice(&[0x06, 1, 1, 0, 0, 0, 99, 0, 10, 0, 0, 0, 20]);
        let session = session_with(3, &script);
        let (request, route) = route_for(&session, 0, 2, 2_000);
        session.check_route(&request, &route);
        let hops = &route.paths[0].hops;
        assert_eq!(hops.len(), 2);
        assert_eq!(hops[1].short_channel_id, 99);
        assert_eq!(hops[0].fee_msat, 10);
    }

    #[test]
    fn removing_a_node_drops_its_channels() {
        let mut script = add(0, 1, 10, None);
        script.extend(add(1, 2, 20, None));
        script.extend(add(0, 2, 30, None));
        script.extend_from_slice(&[0x03, 1]);
        let session = session_with(3, &script);
        assert_eq!(session.scids, vec![30]);
        assert_graph_consistent(&session.graph.read_only());
    }

    #[test]
    fn reload_keeps_the_graph() {
        let mut script = add(0, 1, 10, Some(1_000));
        script.extend(policy_both_ways(0, 40, 500, 3, 7));
        script.push(0x08);
        let session = session_with(2, &script);
        let info = session.graph.read_only().channel(10).and_then(|c| c.one_to_two.clone());
        assert_eq!(info.map(|i| i.fees), Some(RoutingFees { base_msat: 3, proportional_millionths: 7 }));
    }

    #[test]
    fn garbage_and_stop_do_not_panic() {
        run(&[], &HarnessConfig::default());
        run(&[0xff; 64], &HarnessConfig::default());
        run(&[3, 0x07, 0, 0, 0, 0, 0, 0], &HarnessConfig::default());
        run(&[1, 0x02, 0x03, 0x05, 0x06, 0x08, 0x0c], &HarnessConfig::default());
    }
}
