//! # Targets
//!
//! Codec targets decode, re-encode and compare. Interpreters read one
//! action byte at a time and check invariants after each step.

pub mod chanmon_consistency;
pub mod full_stack;
pub mod indexedmap;
pub mod msg;
pub mod offers;
pub mod onion_message;
pub mod peer_crypt;
pub mod persisted;
pub mod process_network_graph;
pub mod router;
pub mod text;

use bitcoin::secp256k1::SecretKey;
use lightning::routing::gossip::ReadOnlyNetworkGraph;
use lightning::util::ser::LengthReadable;
use rand::rngs::StdRng;
use rand::RngExt as _;

/// Decodes a `T` from the front of `data`, returning it with the number of
/// bytes it consumed.
pub(crate) fn read_prefix<T: LengthReadable>(data: &[u8]) -> Option<(T, usize)> {
    let mut r = data;
    let value = T::read_from_fixed_length_buffer(&mut r).ok()?;
    Some((value, data.len() - r.len()))
}

/// Uniform secret key from the harness RNG.
pub(crate) fn random_secret(rng: &mut StdRng) -> SecretKey {
    loop {
        let bytes: [u8; 32] = rng.random();
        if let Ok(sk) = SecretKey::from_slice(&bytes) {
            return sk;
        }
    }
}

/// `[b; 32]` as a secret key; every `b` in `1..=0x7f` is in range.
pub(crate) fn fixed_secret(b: u8) -> SecretKey {
    match SecretKey::from_slice(&[b; 32]) {
        Ok(sk) => sk,
        Err(_) => unreachable!("[{b:#04x}; 32] is not a valid scalar"),
    }
}

/// Every channel's endpoints list it, and every channel a node lists
/// exists and touches that node.
pub(crate) fn assert_graph_consistent(graph: &ReadOnlyNetworkGraph<'_>) {
    for (scid, chan) in graph.channels().unordered_iter() {
        assert_ne!(chan.node_one, chan.node_two, "channel {scid} loops");
        for end in [&chan.node_one, &chan.node_two] {
            match graph.node(end) {
                Some(node) => assert!(node.channels.contains(scid), "node {end} does not list channel {scid}"),
                None => panic!("channel {scid} ends at unknown node {end}"),
            }
        }
    }
    for (id, node) in graph.nodes().unordered_iter() {
        for scid in &node.channels {
            match graph.channel(*scid) {
                Some(chan) => assert!(chan.node_one == *id || chan.node_two == *id, "node {id} lists foreign channel {scid}"),
                None => panic!("node {id} lists unknown channel {scid}"),
            }
        }
    }
}
