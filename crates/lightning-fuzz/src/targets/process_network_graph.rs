//! Rapid gossip snapshot target: apply the input to an empty mainnet
//! graph and check the graph it leaves behind.

use bitcoin::Network;
use lightning::routing::gossip::NetworkGraph;
use lightning::util::ser::{ReadableArgs, Writeable};
use lightning_rapid_gossip_sync::RapidGossipSync;
use tracing::trace;

use super::assert_graph_consistent;
use crate::config::HarnessConfig;
use crate::env::TraceLogger;

pub fn run(data: &[u8], _config: &HarnessConfig) {
    let logger = TraceLogger { node: 0 };
    let graph = NetworkGraph::new(Network::Bitcoin, &logger);
    let sync = RapidGossipSync::new(&graph, &logger);

    // No clock: the snapshot's own timestamp is never judged stale.
    let result = sync.update_network_graph_no_std(data, None);
    // Each channel insert is atomic, so even a rejected snapshot leaves a
    // consistent prefix behind.
    assert_graph_consistent(&graph.read_only());

    let latest_seen = match result {
        Ok(ts) => ts,
        Err(e) => {
            trace!(error = ?e, "snapshot rejected");
            return;
        }
    };
    // Snapshots without channel updates return before recording the sync.
    if let Some(ts) = graph.get_last_rapid_gossip_sync_timestamp() {
        assert_eq!(ts, latest_seen);
        assert!(sync.is_initial_sync_complete());
    }

    let bytes = graph.encode();
    match NetworkGraph::read(&mut &bytes[..], &logger) {
        Ok(restored) => {
            assert!(restored == graph, "graph changed across serialization");
            assert_eq!(restored.encode(), bytes);
        }
        Err(e) => panic!("serialized graph failed to decode: {e:?}"),
    }

    // Everything in the snapshot is now a duplicate.
    let channels = graph.read_only().channels().clone();
    if let Err(e) = sync.update_network_graph_no_std(data, None) {
        trace!(error = ?e, "reapplied snapshot rejected");
    }
    assert!(*graph.read_only().channels() == channels, "reapplying a snapshot changed the channels");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::gossip_time;
    use crate::targets::fixed_secret;
    use bitcoin::constants::ChainHash;
    use bitcoin::secp256k1::{PublicKey, Secp256k1};

    fn node_key(b: u8) -> [u8; 33] {
        PublicKey::from_secret_key(&Secp256k1::signing_only(), &fixed_secret(b)).serialize()
    }

    fn header(version: u8, chain: ChainHash, latest_seen: u32) -> Vec<u8> {
        let mut data = b"LDK".to_vec();
        data.push(version);
        data.extend_from_slice(chain.as_bytes());
        data.extend_from_slice(&latest_seen.to_be_bytes());
        if version == 2 {
            // no default node features
            data.push(0);
        }
        data
    }

    /// Two nodes, channel 7 between them, updates for both directions.
    fn snapshot(version: u8, latest_seen: u32) -> Vec<u8> {
        let mut data = header(version, ChainHash::using_genesis_block(Network::Bitcoin), latest_seen);
        data.extend_from_slice(&2u32.to_be_bytes());
        data.extend_from_slice(&node_key(1));
        data.extend_from_slice(&node_key(2));
        data.extend_from_slice(&1u32.to_be_bytes());
        // empty features, scid delta 7, node indices 0 and 1
        data.extend_from_slice(&[0, 0, 7, 0, 1]);
        data.extend_from_slice(&2u32.to_be_bytes());
        // defaults: cltv 40, htlc_min 1, base 1000, prop 100, htlc_max 1M
        data.extend_from_slice(&40u16.to_be_bytes());
        data.extend_from_slice(&1u64.to_be_bytes());
        data.extend_from_slice(&1000u32.to_be_bytes());
        data.extend_from_slice(&100u32.to_be_bytes());
        data.extend_from_slice(&1_000_000u64.to_be_bytes());
        data.extend_from_slice(&[7, 0, 0, 1]);
        data
    }

    fn apply(data: &[u8]) -> Option<(usize, bool)> {
        let logger = TraceLogger { node: 0 };
        let graph = NetworkGraph::new(Network::Bitcoin, &logger);
        let sync = RapidGossipSync::new(&graph, &logger);
        sync.update_network_graph_no_std(data, None).ok()?;
        let read = graph.read_only();
        let routable = read.channel(7).is_some_and(|c| c.one_to_two.is_some() && c.two_to_one.is_some());
        Some((read.channels().len(), routable))
    }

    #[test]
    fn two_node_snapshot_builds_a_routable_channel() {
        let data = snapshot(2, gossip_time());
        assert_eq!(apply(&data), Some((1, true)));
        run(&data, &HarnessConfig::default());
    }

    #[test]
    fn version_one_snapshot_applies() {
        let data = snapshot(1, gossip_time());
        assert_eq!(apply(&data), Some((1, true)));
        run(&data, &HarnessConfig::default());
    }

    #[test]
    fn snapshot_without_updates_leaves_channel_bare() {
        let mut data = header(2, ChainHash::using_genesis_block(Network::Bitcoin), gossip_time());
        data.extend_from_slice(&2u32.to_be_bytes());
        data.extend_from_slice(&node_key(1));
        data.extend_from_slice(&node_key(2));
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&[0, 0, 7, 0, 1]);
        data.extend_from_slice(&0u32.to_be_bytes());
        assert_eq!(apply(&data), Some((1, false)));
        run(&data, &HarnessConfig::default());
    }

    #[test]
    fn foreign_chain_and_bad_prefix_are_rejected() {
        let mut data = header(2, ChainHash::using_genesis_block(Network::Testnet), gossip_time());
        data.extend_from_slice(&[0; 8]);
        assert_eq!(apply(&data), None);
        run(&data, &HarnessConfig::default());
        assert_eq!(apply(b"LDK\x03"), None);
        run(b"LDK\x02", &HarnessConfig::default());
    }

    #[test]
    fn out_of_range_node_index_is_rejected() {
        let mut data = header(2, ChainHash::using_genesis_block(Network::Bitcoin), gossip_time());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&node_key(1));
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&[0, 0, 7, 0, 5]);
        assert_eq!(apply(&data), None);
        run(&data, &HarnessConfig::default());
    }
}
