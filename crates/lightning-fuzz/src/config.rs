//! # Harness configuration
//!
//! Targets always run with [`HarnessConfig::default`]; a crash must
//! reproduce from its input alone. The CLI may load a TOML file to explore
//! with other seeds or bounds:
//!
//! ```toml
//! seed = 7
//! max_actions = 20000
//! max_peers = 4
//!
//! [channel]
//! feerate_per_kw = 1000
//! to_self_delay = 144
//! ```

use serde::Deserialize;

use lightning::chain::chaininterface::FEERATE_FLOOR_SATS_PER_KW;
use lightning::util::config::UserConfig;

pub const DEFAULT_SEED: u64 = 0x5eed_f00d;
pub const DEFAULT_MAX_ACTIONS: usize = 4096;
pub const DEFAULT_MAX_PEERS: usize = 4;
pub const DEFAULT_MAX_DELIVER_ROUNDS: usize = 64;
pub const DEFAULT_FEERATE_PER_KW: u32 = 1000;

/// Hard ceiling on simulated nodes; indices are drawn from single bytes.
const MAX_PEERS_CEILING: usize = 16;

/// LDK refuses to open with a `to_self_delay` under its breakdown timeout
/// and rejects counterparties asking for more than two weeks.
const MIN_TO_SELF_DELAY: u16 = 144;
const MAX_TO_SELF_DELAY: u16 = 2016;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HarnessConfigInput {
    pub seed: Option<u64>,
    pub max_actions: Option<usize>,
    pub max_peers: Option<usize>,
    pub max_deliver_rounds: Option<usize>,
    pub channel: ChannelConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChannelConfigInput {
    pub feerate_per_kw: Option<u32>,
    pub htlc_minimum_msat: Option<u64>,
    pub to_self_delay: Option<u16>,
    pub max_accepted_htlcs: Option<u16>,
    pub minimum_depth: Option<u32>,
}

/// Per-channel knobs forwarded into every node's [`UserConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSettings {
    pub to_self_delay: u16,
    pub minimum_depth: u32,
    pub htlc_minimum_msat: u64,
    pub max_accepted_htlcs: u16,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self { to_self_delay: MIN_TO_SELF_DELAY, minimum_depth: 1, htlc_minimum_msat: 1, max_accepted_htlcs: 50 }
    }
}

impl ChannelSettings {
    /// Builds the node configuration every simulated node starts from.
    ///
    /// Inbound channels are accepted automatically, any share of the
    /// channel may be in flight and anchors stay off so commitment
    /// transactions confirm without fee bumping.
    pub fn user_config(&self) -> UserConfig {
        let mut config = UserConfig::default();
        config.channel_handshake_config.minimum_depth = self.minimum_depth;
        config.channel_handshake_config.our_to_self_delay = self.to_self_delay;
        config.channel_handshake_config.our_htlc_minimum_msat = self.htlc_minimum_msat;
        config.channel_handshake_config.our_max_accepted_htlcs = self.max_accepted_htlcs;
        config.channel_handshake_config.max_inbound_htlc_value_in_flight_percent_of_channel = 100;
        config.channel_handshake_config.negotiate_anchors_zero_fee_htlc_tx = false;
        config.channel_handshake_config.announce_for_forwarding = false;
        config.channel_handshake_limits.max_minimum_depth = self.minimum_depth.max(6);
        config.channel_handshake_limits.force_announced_channel_preference = false;
        config.accept_inbound_channels = true;
        config.manually_accept_inbound_channels = false;
        config
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub seed: u64,
    /// Interpreter steps before a run stops on its own.
    pub max_actions: usize,
    pub max_peers: usize,
    /// Bound on "deliver everything" loops.
    pub max_deliver_rounds: usize,
    pub feerate_per_kw: u32,
    pub channel: ChannelSettings,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            max_actions: DEFAULT_MAX_ACTIONS,
            max_peers: DEFAULT_MAX_PEERS,
            max_deliver_rounds: DEFAULT_MAX_DELIVER_ROUNDS,
            feerate_per_kw: DEFAULT_FEERATE_PER_KW,
            channel: ChannelSettings::default(),
        }
    }
}

impl HarnessConfigInput {
    pub fn resolve(self) -> Result<HarnessConfig, String> {
        let defaults = HarnessConfig::default();
        let max_peers = self.max_peers.unwrap_or(defaults.max_peers);
        if !(2..=MAX_PEERS_CEILING).contains(&max_peers) {
            return Err(format!("max_peers must be within 2..={MAX_PEERS_CEILING}, got {max_peers}"));
        }
        let feerate_per_kw = self.channel.feerate_per_kw.unwrap_or(defaults.feerate_per_kw);
        if feerate_per_kw < FEERATE_FLOOR_SATS_PER_KW {
            return Err(format!("feerate_per_kw below the {FEERATE_FLOOR_SATS_PER_KW} floor"));
        }

        let d = defaults.channel;
        let to_self_delay = self.channel.to_self_delay.unwrap_or(d.to_self_delay);
        if !(MIN_TO_SELF_DELAY..=MAX_TO_SELF_DELAY).contains(&to_self_delay) {
            return Err(format!(
                "to_self_delay must be within {MIN_TO_SELF_DELAY}..={MAX_TO_SELF_DELAY}, got {to_self_delay}"
            ));
        }
        let channel = ChannelSettings {
            to_self_delay,
            minimum_depth: self.channel.minimum_depth.unwrap_or(d.minimum_depth).clamp(1, 144),
            htlc_minimum_msat: self.channel.htlc_minimum_msat.unwrap_or(d.htlc_minimum_msat).max(1),
            max_accepted_htlcs: self.channel.max_accepted_htlcs.unwrap_or(d.max_accepted_htlcs).clamp(1, 483),
        };

        Ok(HarnessConfig {
            seed: self.seed.unwrap_or(defaults.seed),
            max_actions: self.max_actions.unwrap_or(defaults.max_actions).max(1),
            max_peers,
            max_deliver_rounds: self.max_deliver_rounds.unwrap_or(defaults.max_deliver_rounds).max(1),
            feerate_per_kw,
            channel,
        })
    }
}

impl HarnessConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        if input.trim().is_empty() {
            return Ok(HarnessConfig::default());
        }
        let parsed: HarnessConfigInput = toml::from_str(input).map_err(|e| format!("Invalid config TOML: {}", e))?;
        parsed.resolve()
    }
}
