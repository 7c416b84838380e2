//! # Target registry
//!
//! The closed set of fuzz targets. Names are the public contract: they are
//! the cargo-fuzz binary names, the CLI arguments and (with a `_run`
//! suffix) the C ABI symbols.

use std::fmt;

use crate::config::HarnessConfig;
use crate::targets::{
    chanmon_consistency, full_stack, indexedmap, msg, offers, onion_message, peer_crypt, persisted,
    process_network_graph, router, text,
};

pub type Handler = fn(&[u8], &HarnessConfig);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Decode, re-encode, compare.
    Codec,
    /// Byte-driven action sequence against a stateful model.
    Interpreter,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Codec => f.write_str("codec"),
            TargetKind::Interpreter => f.write_str("interpreter"),
        }
    }
}

#[derive(Clone, Copy)]
pub struct TargetDescriptor {
    pub name: &'static str,
    pub kind: TargetKind,
    pub handler: Handler,
}

impl TargetDescriptor {
    /// Run with the fixed default configuration.
    pub fn run(&self, data: &[u8]) {
        (self.handler)(data, &HarnessConfig::default())
    }

    pub fn run_with(&self, data: &[u8], config: &HarnessConfig) {
        (self.handler)(data, config)
    }
}

impl fmt::Debug for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetDescriptor").field("name", &self.name).field("kind", &self.kind).finish()
    }
}

/// # Safety
///
/// `data` must be null or point to `len` readable bytes.
unsafe fn run_raw(handler: Handler, data: *const u8, len: usize) {
    let input: &[u8] = if data.is_null() || len == 0 {
        &[]
    } else {
        // SAFETY: the caller guarantees `data` points to `len` readable bytes.
        unsafe { std::slice::from_raw_parts(data, len) }
    };
    handler(input, &HarnessConfig::default())
}

macro_rules! targets {
    ($( $name:ident => $symbol:ident : $kind:ident = $handler:path; )*) => {
        static TARGETS: &[TargetDescriptor] = &[
            $( TargetDescriptor { name: stringify!($name), kind: TargetKind::$kind, handler: $handler }, )*
        ];

        $(
            /// C entry point for the target of the same name.
            ///
            /// # Safety
            ///
            /// `data` must be null or point to `len` readable bytes.
            #[no_mangle]
            pub unsafe extern "C" fn $symbol(data: *const u8, len: usize) {
                unsafe { run_raw($handler, data, len) }
            }
        )*
    };
}

targets! {
    bech32_parse => bech32_parse_run: Codec = text::bech32_parse;
    chanmon_deser => chanmon_deser_run: Codec = persisted::chanmon_deser;
    chanmon_consistency => chanmon_consistency_run: Interpreter = chanmon_consistency::run;
    full_stack => full_stack_run: Interpreter = full_stack::run;
    invoice_deser => invoice_deser_run: Codec = offers::invoice_deser;
    invoice_request_deser => invoice_request_deser_run: Codec = offers::invoice_request_deser;
    offer_deser => offer_deser_run: Codec = offers::offer_deser;
    bolt11_deser => bolt11_deser_run: Codec = offers::bolt11_deser;
    onion_message => onion_message_run: Interpreter = onion_message::run;
    peer_crypt => peer_crypt_run: Interpreter = peer_crypt::run;
    process_network_graph => process_network_graph_run: Interpreter = process_network_graph::run;
    refund_deser => refund_deser_run: Codec = offers::refund_deser;
    router => router_run: Interpreter = router::run;
    zbase32 => zbase32_run: Codec = text::zbase32;
    indexedmap => indexedmap_run: Interpreter = indexedmap::run;
    onion_hop_data => onion_hop_data_run: Codec = persisted::onion_hop_data;
    base32 => base32_run: Codec = text::base32;
    fromstr_to_netaddress => fromstr_to_netaddress_run: Codec = text::fromstr_to_netaddress;
    msg_accept_channel => msg_accept_channel_run: Codec = msg::msg_accept_channel;
    msg_announcement_signatures => msg_announcement_signatures_run: Codec = msg::msg_announcement_signatures;
    msg_channel_reestablish => msg_channel_reestablish_run: Codec = msg::msg_channel_reestablish;
    msg_closing_signed => msg_closing_signed_run: Codec = msg::msg_closing_signed;
    msg_commitment_signed => msg_commitment_signed_run: Codec = msg::msg_commitment_signed;
    msg_decoded_onion_error_packet => msg_decoded_onion_error_packet_run: Codec = persisted::msg_decoded_onion_error_packet;
    msg_funding_created => msg_funding_created_run: Codec = msg::msg_funding_created;
    msg_channel_ready => msg_channel_ready_run: Codec = msg::msg_channel_ready;
    msg_funding_signed => msg_funding_signed_run: Codec = msg::msg_funding_signed;
    msg_init => msg_init_run: Codec = msg::msg_init;
    msg_open_channel => msg_open_channel_run: Codec = msg::msg_open_channel;
    msg_revoke_and_ack => msg_revoke_and_ack_run: Codec = msg::msg_revoke_and_ack;
    msg_shutdown => msg_shutdown_run: Codec = msg::msg_shutdown;
    msg_update_fail_htlc => msg_update_fail_htlc_run: Codec = msg::msg_update_fail_htlc;
    msg_update_fail_malformed_htlc => msg_update_fail_malformed_htlc_run: Codec = msg::msg_update_fail_malformed_htlc;
    msg_update_fee => msg_update_fee_run: Codec = msg::msg_update_fee;
    msg_update_fulfill_htlc => msg_update_fulfill_htlc_run: Codec = msg::msg_update_fulfill_htlc;
    msg_channel_announcement => msg_channel_announcement_run: Codec = msg::msg_channel_announcement;
    msg_node_announcement => msg_node_announcement_run: Codec = msg::msg_node_announcement;
    msg_query_short_channel_ids => msg_query_short_channel_ids_run: Codec = msg::msg_query_short_channel_ids;
    msg_reply_short_channel_ids_end => msg_reply_short_channel_ids_end_run: Codec = msg::msg_reply_short_channel_ids_end;
    msg_query_channel_range => msg_query_channel_range_run: Codec = msg::msg_query_channel_range;
    msg_reply_channel_range => msg_reply_channel_range_run: Codec = msg::msg_reply_channel_range;
    msg_gossip_timestamp_filter => msg_gossip_timestamp_filter_run: Codec = msg::msg_gossip_timestamp_filter;
    msg_update_add_htlc => msg_update_add_htlc_run: Codec = msg::msg_update_add_htlc;
    msg_error_message => msg_error_message_run: Codec = msg::msg_error_message;
    msg_channel_update => msg_channel_update_run: Codec = msg::msg_channel_update;
    msg_ping => msg_ping_run: Codec = msg::msg_ping;
    msg_pong => msg_pong_run: Codec = msg::msg_pong;
    msg_channel_details => msg_channel_details_run: Codec = persisted::msg_channel_details;
    msg_open_channel_v2 => msg_open_channel_v2_run: Codec = msg::msg_open_channel_v2;
    msg_accept_channel_v2 => msg_accept_channel_v2_run: Codec = msg::msg_accept_channel_v2;
    msg_tx_add_input => msg_tx_add_input_run: Codec = msg::msg_tx_add_input;
    msg_tx_add_output => msg_tx_add_output_run: Codec = msg::msg_tx_add_output;
    msg_tx_remove_input => msg_tx_remove_input_run: Codec = msg::msg_tx_remove_input;
    msg_tx_remove_output => msg_tx_remove_output_run: Codec = msg::msg_tx_remove_output;
    msg_tx_complete => msg_tx_complete_run: Codec = msg::msg_tx_complete;
    msg_tx_signatures => msg_tx_signatures_run: Codec = msg::msg_tx_signatures;
    msg_tx_init_rbf => msg_tx_init_rbf_run: Codec = msg::msg_tx_init_rbf;
    msg_tx_ack_rbf => msg_tx_ack_rbf_run: Codec = msg::msg_tx_ack_rbf;
    msg_tx_abort => msg_tx_abort_run: Codec = msg::msg_tx_abort;
    msg_stfu => msg_stfu_run: Codec = msg::msg_stfu;
    msg_splice => msg_splice_run: Codec = msg::msg_splice;
    msg_splice_ack => msg_splice_ack_run: Codec = msg::msg_splice_ack;
    msg_splice_locked => msg_splice_locked_run: Codec = msg::msg_splice_locked;
}

/// Read-only view over every target.
#[derive(Debug, Clone, Copy)]
pub struct Registry {
    targets: &'static [TargetDescriptor],
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry { targets: TARGETS }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&'static TargetDescriptor> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static TargetDescriptor> {
        self.targets.iter()
    }

    /// Run a target by name; `false` if no such target exists.
    pub fn run(&self, name: &str, data: &[u8]) -> bool {
        match self.get(name) {
            Some(target) => {
                target.run(data);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn sixty_three_unique_targets() {
        let registry = Registry::new();
        assert_eq!(registry.len(), 63);
        let names: HashSet<_> = registry.iter().map(|t| t.name).collect();
        assert_eq!(names.len(), 63);
    }

    #[test]
    fn kinds_partition() {
        let registry = Registry::new();
        let interpreters: Vec<_> =
            registry.iter().filter(|t| t.kind == TargetKind::Interpreter).map(|t| t.name).collect();
        assert_eq!(interpreters.len(), 7);
        assert!(interpreters.contains(&"chanmon_consistency"));
        assert!(registry.get("msg_ping").is_some_and(|t| t.kind == TargetKind::Codec));
    }

    #[test]
    fn unknown_name_is_not_run() {
        assert!(!Registry::new().run("msg_nonexistent", &[]));
        assert!(Registry::new().run("msg_ping", &[]));
    }

    #[test]
    fn c_entry_point_accepts_null() {
        unsafe { msg_init_run(std::ptr::null(), 0) };
        let data = [0u8; 4];
        unsafe { base32_run(data.as_ptr(), data.len()) };
    }
}
