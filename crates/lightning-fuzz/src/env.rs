//! # Simulated environment
//!
//! Deterministic stand-ins for what a node touches outside itself. Nothing
//! here touches the filesystem or the network; two runs over the same input
//! see the same fees, blocks and socket bytes. The one clock read is
//! [`gossip_time`].

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::block::{Header, Version as BlockVersion};
use bitcoin::hashes::sha256::Hash as Sha256;
use bitcoin::hashes::sha256d::Hash as Sha256dHash;
use bitcoin::hashes::Hash as _;
use bitcoin::secp256k1::ecdh::SharedSecret;
use bitcoin::secp256k1::ecdsa::{RecoverableSignature, Signature};
use bitcoin::secp256k1::{schnorr, All, Message, PublicKey, Scalar, Secp256k1, SecretKey};
use bitcoin::transaction::Version;
use bitcoin::{
    absolute, Amount, Block, BlockHash, CompactTarget, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxMerkleNode,
    TxOut, Txid, Witness,
};
use lightning::chain::chaininterface::{
    BroadcasterInterface, ConfirmationTarget, FeeEstimator, FEERATE_FLOOR_SATS_PER_KW,
};
use lightning::chain::chainmonitor::Persist;
use lightning::chain::channelmonitor::{ChannelMonitor, ChannelMonitorUpdate, ANTI_REORG_DELAY};
use lightning::chain::{BestBlock, ChannelMonitorUpdateStatus};
use lightning::ln::inbound_payment::ExpandedKey;
use lightning::ln::msgs::UnsignedGossipMessage;
use lightning::ln::peer_handler::SocketDescriptor;
use lightning::ln::types::ChannelId;
use lightning::offers::invoice::UnsignedBolt12Invoice;
use lightning::sign::{EntropySource, InMemorySigner, NodeSigner, PeerStorageKey, ReceiveAuthKey, Recipient};
use lightning::util::logger::{Level, Logger, Record};
use lightning::util::message_signing;
use lightning::util::persist::MonitorName;
use lightning::util::ser::Writeable;
use lightning_invoice::RawBolt11Invoice;
use tracing::{debug, error, info, trace, warn};

/// Header time of the first simulated block; every later block adds ten
/// minutes.
pub(crate) const BASE_TIME: u32 = 1_700_000_000;

/// Current unix time for gossip timestamps. The graph drops channel
/// updates more than two weeks from the wall clock.
pub(crate) fn gossip_time() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(BASE_TIME, |d| d.as_secs() as u32)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Forwards LDK log records into `tracing`, tagged with the node index.
pub(crate) struct TraceLogger {
    pub(crate) node: usize,
}

impl Logger for TraceLogger {
    fn log(&self, record: Record) {
        let node = self.node;
        let module = record.module_path;
        match record.level {
            Level::Gossip | Level::Trace => trace!(node, module, "{}", record.args),
            Level::Debug => debug!(node, module, "{}", record.args),
            Level::Info => info!(node, module, "{}", record.args),
            Level::Warn => warn!(node, module, "{}", record.args),
            Level::Error => error!(node, module, "{}", record.args),
        }
    }
}

/// One feerate for every confirmation target, never below the floor.
pub(crate) struct FeeSource {
    sat_per_kw: AtomicU32,
}

impl FeeSource {
    pub(crate) fn new(sat_per_kw: u32) -> Self {
        FeeSource { sat_per_kw: AtomicU32::new(sat_per_kw.max(FEERATE_FLOOR_SATS_PER_KW)) }
    }

    pub(crate) fn get(&self) -> u32 {
        self.sat_per_kw.load(Ordering::Relaxed)
    }

    pub(crate) fn set(&self, sat_per_kw: u32) {
        self.sat_per_kw.store(sat_per_kw.max(FEERATE_FLOOR_SATS_PER_KW), Ordering::Relaxed);
    }
}

impl FeeEstimator for FeeSource {
    fn get_est_sat_per_1000_weight(&self, _target: ConfirmationTarget) -> u32 {
        self.get()
    }
}

/// Collects broadcasts until the interpreter moves them into a [`Chain`].
#[derive(Default)]
pub(crate) struct Broadcaster {
    txs: Mutex<Vec<Transaction>>,
}

impl Broadcaster {
    pub(crate) fn take(&self) -> Vec<Transaction> {
        std::mem::take(&mut *lock(&self.txs))
    }
}

impl BroadcasterInterface for Broadcaster {
    fn broadcast_transactions(&self, txs: &[&Transaction]) {
        lock(&self.txs).extend(txs.iter().map(|tx| (*tx).clone()));
    }
}

#[derive(Default)]
struct StoredMonitor {
    completed_update_id: u64,
    completed: Vec<u8>,
    /// Snapshots written while the persister was in flight, oldest first.
    pending: Vec<(u64, Vec<u8>)>,
}

/// Monitor store whose update writes either complete at once or stay in
/// flight until [`Persister::mark_completed`].
///
/// Only the last completed snapshot survives a reload. Initial writes
/// always complete; chain-sync rewrites never hold a channel back.
pub(crate) struct Persister {
    in_progress: AtomicBool,
    monitors: Mutex<HashMap<ChannelId, StoredMonitor>>,
}

impl Persister {
    pub(crate) fn new() -> Self {
        Persister { in_progress: AtomicBool::new(false), monitors: Mutex::new(HashMap::new()) }
    }

    pub(crate) fn set_in_progress(&self, in_progress: bool) {
        self.in_progress.store(in_progress, Ordering::Relaxed);
    }

    pub(crate) fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Relaxed)
    }

    /// Promotes the in-flight snapshot written for `update_id`. Returns
    /// false when no such write is pending.
    pub(crate) fn mark_completed(&self, channel_id: &ChannelId, update_id: u64) -> bool {
        let mut monitors = lock(&self.monitors);
        let Some(stored) = monitors.get_mut(channel_id) else { return false };
        let Some(pos) = stored.pending.iter().position(|(id, _)| *id == update_id) else { return false };
        let (id, bytes) = stored.pending.remove(pos);
        if id > stored.completed_update_id {
            stored.completed_update_id = id;
            stored.completed = bytes;
        }
        true
    }

    pub(crate) fn completed_update_id(&self, channel_id: &ChannelId) -> Option<u64> {
        lock(&self.monitors).get(channel_id).map(|m| m.completed_update_id)
    }

    /// Every channel's last completed snapshot.
    pub(crate) fn completed_snapshots(&self) -> Vec<(ChannelId, Vec<u8>)> {
        let monitors = lock(&self.monitors);
        let mut snapshots: Vec<_> = monitors.iter().map(|(id, m)| (*id, m.completed.clone())).collect();
        snapshots.sort_by_key(|(id, _)| id.0);
        snapshots
    }

    /// Drops writes that never completed; a reload forgets them.
    pub(crate) fn discard_pending(&self) {
        for stored in lock(&self.monitors).values_mut() {
            stored.pending.clear();
        }
    }

    fn store_completed(&self, monitor: &ChannelMonitor<InMemorySigner>) {
        let mut monitors = lock(&self.monitors);
        let stored = monitors.entry(monitor.channel_id()).or_default();
        stored.completed_update_id = monitor.get_latest_update_id();
        stored.completed = monitor.encode();
    }
}

impl Persist<InMemorySigner> for Persister {
    fn persist_new_channel(
        &self, _monitor_name: MonitorName, monitor: &ChannelMonitor<InMemorySigner>,
    ) -> ChannelMonitorUpdateStatus {
        self.store_completed(monitor);
        ChannelMonitorUpdateStatus::Completed
    }

    fn update_persisted_channel(
        &self, _monitor_name: MonitorName, update: Option<&ChannelMonitorUpdate>,
        monitor: &ChannelMonitor<InMemorySigner>,
    ) -> ChannelMonitorUpdateStatus {
        let mut monitors = lock(&self.monitors);
        let stored = match monitors.entry(monitor.channel_id()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(StoredMonitor::default()),
        };
        match update {
            Some(update) if self.is_in_progress() => {
                stored.pending.push((update.update_id, monitor.encode()));
                ChannelMonitorUpdateStatus::InProgress
            }
            Some(_) if stored.pending.is_empty() => {
                stored.completed_update_id = monitor.get_latest_update_id();
                stored.completed = monitor.encode();
                ChannelMonitorUpdateStatus::Completed
            }
            Some(update) => {
                // Completing out of order would let this snapshot overtake
                // writes the channel is still waiting on.
                stored.pending.push((update.update_id, monitor.encode()));
                ChannelMonitorUpdateStatus::InProgress
            }
            None => {
                match stored.pending.last_mut() {
                    Some((_, bytes)) => *bytes = monitor.encode(),
                    None => {
                        stored.completed_update_id = monitor.get_latest_update_id();
                        stored.completed = monitor.encode();
                    }
                }
                ChannelMonitorUpdateStatus::Completed
            }
        }
    }

    fn archive_persisted_channel(&self, _monitor_name: MonitorName) {}
}

/// Node signer over one fixed secret key. Signs gossip and messages; no
/// invoices. Its entropy is a hash chain off the key.
pub(crate) struct StaticKeySigner {
    secret: SecretKey,
    secp: Secp256k1<All>,
    draws: AtomicU64,
}

impl StaticKeySigner {
    pub(crate) fn new(secret: SecretKey) -> Self {
        StaticKeySigner { secret, secp: Secp256k1::new(), draws: AtomicU64::new(0) }
    }

    pub(crate) fn node_id(&self) -> PublicKey {
        PublicKey::from_secret_key(&self.secp, &self.secret)
    }
}

impl EntropySource for StaticKeySigner {
    fn get_secure_random_bytes(&self) -> [u8; 32] {
        let draw = self.draws.fetch_add(1, Ordering::Relaxed);
        let mut preimage = self.secret.secret_bytes().to_vec();
        preimage.extend_from_slice(&draw.to_be_bytes());
        <Sha256 as bitcoin::hashes::Hash>::hash(&preimage).to_byte_array()
    }
}

impl NodeSigner for StaticKeySigner {
    fn get_expanded_key(&self) -> ExpandedKey {
        ExpandedKey::new(self.secret.secret_bytes())
    }

    fn get_peer_storage_key(&self) -> PeerStorageKey {
        PeerStorageKey { inner: <Sha256dHash as bitcoin::hashes::Hash>::hash(&self.secret.secret_bytes()).to_byte_array() }
    }

    fn get_receive_auth_key(&self) -> ReceiveAuthKey {
        ReceiveAuthKey(<Sha256dHash as bitcoin::hashes::Hash>::hash(&self.node_id().serialize()).to_byte_array())
    }

    fn get_node_id(&self, recipient: Recipient) -> Result<PublicKey, ()> {
        match recipient {
            Recipient::Node => Ok(self.node_id()),
            Recipient::PhantomNode => Err(()),
        }
    }

    fn ecdh(&self, recipient: Recipient, other_key: &PublicKey, tweak: Option<&Scalar>) -> Result<SharedSecret, ()> {
        let mut secret = match recipient {
            Recipient::Node => self.secret,
            Recipient::PhantomNode => return Err(()),
        };
        if let Some(tweak) = tweak {
            secret = secret.mul_tweak(tweak).map_err(|_| ())?;
        }
        Ok(SharedSecret::new(other_key, &secret))
    }

    fn sign_invoice(&self, _invoice: &RawBolt11Invoice, _recipient: Recipient) -> Result<RecoverableSignature, ()> {
        Err(())
    }

    fn sign_bolt12_invoice(&self, _invoice: &UnsignedBolt12Invoice) -> Result<schnorr::Signature, ()> {
        Err(())
    }

    fn sign_gossip_message(&self, msg: UnsignedGossipMessage) -> Result<Signature, ()> {
        let digest = <Sha256dHash as bitcoin::hashes::Hash>::hash(&msg.encode()).to_byte_array();
        Ok(self.secp.sign_ecdsa(&Message::from_digest(digest), &self.secret))
    }

    fn sign_message(&self, msg: &[u8]) -> Result<String, ()> {
        Ok(message_signing::sign(msg, &self.secret))
    }
}

/// In-memory socket. Bytes the peer manager sends queue up until the
/// interpreter hands them to the other end.
#[derive(Clone)]
pub(crate) struct Pipe {
    id: u64,
    outbound: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

impl Pipe {
    pub(crate) fn new(id: u64) -> Self {
        Pipe { id, outbound: Arc::default(), closed: Arc::default() }
    }

    pub(crate) fn take_outbound(&self) -> Vec<u8> {
        std::mem::take(&mut *lock(&self.outbound))
    }

    pub(crate) fn has_outbound(&self) -> bool {
        !lock(&self.outbound).is_empty()
    }

    /// True once the peer manager asked for this socket to close.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

impl PartialEq for Pipe {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Pipe {}

impl Hash for Pipe {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl SocketDescriptor for Pipe {
    fn send_data(&mut self, data: &[u8], _continue_read: bool) -> usize {
        if self.is_closed() {
            return 0;
        }
        lock(&self.outbound).extend_from_slice(data);
        data.len()
    }

    fn disconnect_socket(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

/// A funding-shaped transaction: one made-up input with a witness so the
/// channel manager accepts it as segwit, and the requested output.
pub(crate) fn funding_transaction(nonce: u64, value_sat: u64, script_pubkey: ScriptBuf) -> Transaction {
    let mut prev = [0u8; 32];
    prev[..8].copy_from_slice(&nonce.to_be_bytes());
    Transaction {
        version: Version::TWO,
        lock_time: absolute::LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint { txid: Txid::from_byte_array(prev), vout: 0 },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::from_slice(&[[1u8]]),
        }],
        output: vec![TxOut { value: Amount::from_sat(value_sat), script_pubkey }],
    }
}

/// Consensus finality by absolute lock time only; time locks count as final.
fn is_final(tx: &Transaction, height: u32) -> bool {
    let lock = tx.lock_time.to_consensus_u32();
    lock >= absolute::LOCK_TIME_THRESHOLD || lock < height
}

/// A chain of empty-proof blocks over broadcast transactions. Conflicting
/// spends never confirm together, and reorgs stay within the depth LDK
/// tolerates.
pub(crate) struct Chain {
    genesis: BestBlock,
    blocks: Vec<Block>,
    max_height: u32,
    mined: u32,
    mempool: Vec<Transaction>,
    spent: HashSet<OutPoint>,
    confirmed: HashMap<Txid, u32>,
    /// Disconnected blocks by hash, with their parent and height.
    stale: HashMap<BlockHash, (BlockHash, u32)>,
}

impl Chain {
    pub(crate) fn new(network: Network) -> Self {
        Chain {
            genesis: BestBlock::from_network(network),
            blocks: Vec::new(),
            max_height: 0,
            mined: 0,
            mempool: Vec::new(),
            spent: HashSet::new(),
            confirmed: HashMap::new(),
            stale: HashMap::new(),
        }
    }

    pub(crate) fn height(&self) -> u32 {
        self.blocks.len() as u32
    }

    pub(crate) fn tip(&self) -> BestBlock {
        match self.blocks.last() {
            Some(block) => BestBlock::new(block.block_hash(), self.height()),
            None => self.genesis,
        }
    }

    fn block_hash_at(&self, height: u32) -> Option<BlockHash> {
        match height {
            0 => Some(self.genesis.block_hash),
            h => self.blocks.get(h as usize - 1).map(|b| b.block_hash()),
        }
    }

    /// The last block `best` shares with the current chain. A view that
    /// ended on a disconnected block walks back through its parents.
    pub(crate) fn fork_point(&self, best: BestBlock) -> BestBlock {
        let mut at = best;
        loop {
            if self.block_hash_at(at.height) == Some(at.block_hash) {
                return at;
            }
            match self.stale.get(&at.block_hash) {
                Some(&(prev, height)) if height > 0 => at = BestBlock::new(prev, height - 1),
                _ => return self.genesis,
            }
        }
    }

    /// Blocks of the current chain above `height`, lowest first.
    pub(crate) fn blocks_above(&self, height: u32) -> impl Iterator<Item = (&Block, u32)> + '_ {
        self.blocks.iter().zip(1u32..).skip(height as usize)
    }

    /// Height at which `txid` confirmed, if it is on the best chain.
    #[cfg(test)]
    pub(crate) fn confirmation_height(&self, txid: &Txid) -> Option<u32> {
        self.confirmed.get(txid).copied()
    }

    #[cfg(test)]
    pub(crate) fn mempool_len(&self) -> usize {
        self.mempool.len()
    }

    pub(crate) fn broadcast(&mut self, txs: Vec<Transaction>) {
        for tx in txs {
            let txid = tx.compute_txid();
            if self.confirmed.contains_key(&txid) || self.mempool.iter().any(|t| t.compute_txid() == txid) {
                continue;
            }
            self.mempool.push(tx);
        }
    }

    /// Mines the next block from the mempool and returns it with its height.
    pub(crate) fn mine(&mut self) -> (Block, u32) {
        let height = self.height() + 1;
        let mut txdata = Vec::new();
        let mut waiting = Vec::new();
        for tx in std::mem::take(&mut self.mempool) {
            if !is_final(&tx, height) {
                waiting.push(tx);
                continue;
            }
            if tx.input.iter().any(|i| self.spent.contains(&i.previous_output)) {
                trace!(txid = %tx.compute_txid(), "dropping conflicting transaction");
                continue;
            }
            self.spent.extend(tx.input.iter().map(|i| i.previous_output));
            self.confirmed.insert(tx.compute_txid(), height);
            txdata.push(tx);
        }
        self.mempool = waiting;

        self.mined += 1;
        let header = Header {
            version: BlockVersion::TWO,
            prev_blockhash: self.tip().block_hash,
            merkle_root: TxMerkleNode::all_zeros(),
            time: BASE_TIME + self.mined * 600,
            bits: CompactTarget::from_consensus(0x207f_ffff),
            nonce: 0,
        };
        let block = Block { header, txdata };
        self.blocks.push(block.clone());
        self.max_height = self.max_height.max(height);
        (block, height)
    }

    /// Pops the tip unless that would reorg deeper than LDK supports.
    /// Returns the new tip; its transactions go back to the mempool.
    pub(crate) fn disconnect_tip(&mut self) -> Option<BestBlock> {
        let height = self.height();
        if height == 0 || height + ANTI_REORG_DELAY <= self.max_height {
            return None;
        }
        let block = self.blocks.pop()?;
        self.stale.insert(block.block_hash(), (block.header.prev_blockhash, height));
        for tx in &block.txdata {
            for input in &tx.input {
                self.spent.remove(&input.previous_output);
            }
            self.confirmed.remove(&tx.compute_txid());
        }
        let mut mempool = block.txdata;
        mempool.append(&mut self.mempool);
        self.mempool = mempool;
        Some(self.tip())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p2wsh(byte: u8) -> ScriptBuf {
        let mut script = vec![0x00, 0x20];
        script.extend_from_slice(&[byte; 32]);
        ScriptBuf::from_bytes(script)
    }

    #[test]
    fn signer_entropy_is_a_repeatable_chain() {
        let secret = SecretKey::from_slice(&[9; 32]).unwrap();
        let (a, b) = (StaticKeySigner::new(secret), StaticKeySigner::new(secret));
        let first = a.get_secure_random_bytes();
        assert_ne!(first, a.get_secure_random_bytes());
        assert_eq!(first, b.get_secure_random_bytes());
    }

    #[test]
    fn blocks_chain_and_confirm_broadcasts() {
        let mut chain = Chain::new(Network::Bitcoin);
        let genesis = chain.tip();
        let tx = funding_transaction(1, 100_000, p2wsh(1));
        let txid = tx.compute_txid();
        chain.broadcast(vec![tx.clone(), tx]);
        let (block, height) = chain.mine();
        assert_eq!(height, 1);
        assert_eq!(block.header.prev_blockhash, genesis.block_hash);
        assert_eq!(block.txdata.len(), 1);
        assert_eq!(chain.confirmation_height(&txid), Some(1));
        assert_eq!(chain.mempool_len(), 0);
    }

    #[test]
    fn conflicting_spends_never_confirm_together() {
        let mut chain = Chain::new(Network::Bitcoin);
        let first = funding_transaction(7, 100_000, p2wsh(1));
        let second = funding_transaction(7, 90_000, p2wsh(2));
        chain.broadcast(vec![first.clone(), second.clone()]);
        let (block, _) = chain.mine();
        assert_eq!(block.txdata, vec![first]);
        assert_eq!(chain.confirmation_height(&second.compute_txid()), None);
    }

    #[test]
    fn reorgs_are_depth_limited() {
        let mut chain = Chain::new(Network::Bitcoin);
        let tx = funding_transaction(3, 100_000, p2wsh(3));
        chain.broadcast(vec![tx.clone()]);
        chain.mine();
        let tip = chain.tip();
        assert_eq!(chain.disconnect_tip().map(|b| b.height), Some(0));
        assert_eq!(chain.mempool_len(), 1);
        chain.mine();
        assert_ne!(chain.tip().block_hash, tip.block_hash, "re-mined block reuses the header time");
        for _ in 0..10 {
            chain.mine();
        }
        for _ in 0..ANTI_REORG_DELAY - 1 {
            assert!(chain.disconnect_tip().is_some());
        }
        assert!(chain.disconnect_tip().is_none());
    }

    #[test]
    fn stale_views_fork_back_to_the_main_chain() {
        let mut chain = Chain::new(Network::Bitcoin);
        chain.mine();
        let shared = chain.tip();
        chain.mine();
        chain.mine();
        let stale_tip = chain.tip();
        chain.disconnect_tip();
        chain.disconnect_tip();
        chain.mine();
        chain.mine();
        chain.mine();
        assert_eq!(chain.fork_point(stale_tip), shared);
        assert_eq!(chain.fork_point(chain.tip()), chain.tip());
        let above: Vec<u32> = chain.blocks_above(shared.height).map(|(_, h)| h).collect();
        assert_eq!(above, vec![2, 3, 4]);
    }

    #[test]
    fn in_progress_writes_wait_for_completion() {
        let persister = Persister::new();
        let id = ChannelId([9; 32]);
        assert!(!persister.mark_completed(&id, 1));
        assert_eq!(persister.completed_update_id(&id), None);
        persister.set_in_progress(true);
        assert!(persister.is_in_progress());
        assert!(persister.completed_snapshots().is_empty());
    }

    #[test]
    fn fee_source_respects_floor() {
        let fees = FeeSource::new(10);
        assert_eq!(fees.get(), FEERATE_FLOOR_SATS_PER_KW);
        fees.set(5_000);
        assert_eq!(fees.get_est_sat_per_1000_weight(ConfirmationTarget::NonAnchorChannelFee), 5_000);
    }

    #[test]
    fn pipe_queues_until_closed() {
        let mut pipe = Pipe::new(1);
        assert_eq!(pipe.send_data(b"act", true), 3);
        assert!(pipe.has_outbound());
        assert_eq!(pipe.take_outbound(), b"act".to_vec());
        pipe.disconnect_socket();
        assert!(pipe.is_closed());
        assert_eq!(pipe.send_data(b"late", true), 0);
        assert!(!pipe.has_outbound());
    }

    #[test]
    fn static_signer_signs_verifiable_messages() {
        let secret = match SecretKey::from_slice(&[0x11; 32]) {
            Ok(sk) => sk,
            Err(e) => panic!("{e}"),
        };
        let signer = StaticKeySigner::new(secret);
        let sig = signer.sign_message(b"hello").unwrap();
        assert!(message_signing::verify(b"hello", &sig, &signer.node_id()));
        assert!(signer.get_node_id(Recipient::PhantomNode).is_err());
    }
}
