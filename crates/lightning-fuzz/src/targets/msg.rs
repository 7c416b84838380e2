//! Wire message targets: one per LDK message type.
//!
//! Each target decodes the input as the message body and checks one of
//! four re-encoding laws:
//!
//! | law      | holds when                                                        |
//! |----------|-------------------------------------------------------------------|
//! | `simple` | the re-encoding decodes and re-encodes to itself                  |
//! | `exact`  | the re-encoding equals the whole input                            |
//! | `prefix` | the re-encoding equals the bytes the decoder consumed             |
//! | `hole`   | as `prefix`, except for a field the encoder normalizes            |

use std::fmt::Debug;

use lightning::ln::msgs;
use lightning::util::ser::{LengthReadable, Writeable};

use super::read_prefix;
use crate::config::HarnessConfig;

fn encode_checked<T: Writeable + Debug>(msg: &T) -> Vec<u8> {
    let encoded = msg.encode();
    assert_eq!(msg.serialized_length(), encoded.len(), "serialized_length disagrees with write: {msg:?}");
    encoded
}

pub(crate) fn simple<T>(data: &[u8])
where
    T: LengthReadable + Writeable + Debug,
{
    let Some((msg, _)) = read_prefix::<T>(data) else {
        return;
    };
    let encoded = encode_checked(&msg);
    let again = match read_prefix::<T>(&encoded) {
        Some((m, _)) => m,
        None => panic!("re-encoded message failed to decode: {msg:?}"),
    };
    assert_eq!(again.encode(), encoded, "encoding is not stable: {msg:?}");
}

pub(crate) fn exact<T>(data: &[u8])
where
    T: LengthReadable + Writeable + Debug,
{
    let Some((msg, _)) = read_prefix::<T>(data) else {
        return;
    };
    assert_eq!(encode_checked(&msg), data, "re-encoding differs from input: {msg:?}");
}

pub(crate) fn prefix<T>(data: &[u8])
where
    T: LengthReadable + Writeable + Debug,
{
    let Some((msg, used)) = read_prefix::<T>(data) else {
        return;
    };
    assert_eq!(encode_checked(&msg), &data[..used], "re-encoding differs from consumed input: {msg:?}");
}

pub(crate) fn hole<T>(data: &[u8], start: usize, len: usize)
where
    T: LengthReadable + Writeable + Debug,
{
    let Some((msg, used)) = read_prefix::<T>(data) else {
        return;
    };
    let encoded = encode_checked(&msg);
    assert_eq!(encoded.len(), used, "re-encoding changed the length: {msg:?}");
    assert_eq!(&encoded[..start], &data[..start], "bytes before {start} differ: {msg:?}");
    assert_eq!(&encoded[start + len..], &data[start + len..used], "bytes after the hole differ: {msg:?}");
}

macro_rules! msg_targets {
    ($( $target:ident: $ty:ident => $law:ident $(($start:expr, $len:expr))?; )*) => {
        $(
            pub fn $target(data: &[u8], _config: &HarnessConfig) {
                $law::<msgs::$ty>(data $(, $start, $len)?)
            }
        )*
    };
}

msg_targets! {
    msg_init: Init => simple;
    msg_error_message: ErrorMessage => hole(32, 2);
    msg_ping: Ping => simple;
    msg_pong: Pong => simple;
    msg_open_channel: OpenChannel => simple;
    msg_accept_channel: AcceptChannel => simple;
    msg_funding_created: FundingCreated => simple;
    msg_funding_signed: FundingSigned => simple;
    msg_channel_ready: ChannelReady => simple;
    msg_shutdown: Shutdown => simple;
    msg_closing_signed: ClosingSigned => simple;
    msg_open_channel_v2: OpenChannelV2 => simple;
    msg_accept_channel_v2: AcceptChannelV2 => simple;
    msg_tx_add_input: TxAddInput => simple;
    msg_tx_add_output: TxAddOutput => simple;
    msg_tx_remove_input: TxRemoveInput => simple;
    msg_tx_remove_output: TxRemoveOutput => simple;
    msg_tx_complete: TxComplete => simple;
    msg_tx_signatures: TxSignatures => simple;
    msg_tx_init_rbf: TxInitRbf => simple;
    msg_tx_ack_rbf: TxAckRbf => simple;
    msg_tx_abort: TxAbort => simple;
    msg_stfu: Stfu => simple;
    msg_splice: SpliceInit => simple;
    msg_splice_ack: SpliceAck => simple;
    msg_splice_locked: SpliceLocked => simple;
    msg_update_add_htlc: UpdateAddHTLC => simple;
    msg_update_fulfill_htlc: UpdateFulfillHTLC => simple;
    msg_update_fail_htlc: UpdateFailHTLC => simple;
    msg_commitment_signed: CommitmentSigned => simple;
    msg_revoke_and_ack: RevokeAndACK => simple;
    msg_update_fee: UpdateFee => simple;
    msg_update_fail_malformed_htlc: UpdateFailMalformedHTLC => simple;
    msg_channel_reestablish: ChannelReestablish => simple;
    msg_channel_announcement: ChannelAnnouncement => exact;
    msg_node_announcement: NodeAnnouncement => exact;
    msg_channel_update: ChannelUpdate => hole(108, 1);
    msg_announcement_signatures: AnnouncementSignatures => simple;
    msg_query_short_channel_ids: QueryShortChannelIds => prefix;
    msg_reply_short_channel_ids_end: ReplyShortChannelIdsEnd => simple;
    msg_query_channel_range: QueryChannelRange => simple;
    msg_reply_channel_range: ReplyChannelRange => prefix;
    msg_gossip_timestamp_filter: GossipTimestampFilter => simple;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::constants::ChainHash;
    use bitcoin::Network;
    use lightning::ln::types::ChannelId;

    #[test]
    fn ping_padding_is_normalized() {
        msg_ping(&[0x00, 0x04, 0x00, 0x02, 0xaa, 0xbb], &HarnessConfig::default());
        let (ping, used) = read_prefix::<msgs::Ping>(&[0x00, 0x04, 0x00, 0x02, 0xaa, 0xbb]).unwrap();
        assert_eq!(used, 6);
        assert_eq!(ping.encode(), vec![0x00, 0x04, 0x00, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn length_field_past_end_is_rejected() {
        // byteslen says five but only one byte follows
        assert!(read_prefix::<msgs::Ping>(&[0x00, 0x00, 0x00, 0x05, 0x00]).is_none());
        assert!(read_prefix::<msgs::Ping>(&[0x00, 0x00, 0x00, 0x00]).is_some());
    }

    #[test]
    fn minimum_length_boundaries() {
        let complete = msgs::TxComplete { channel_id: ChannelId([3; 32]) }.encode();
        assert_eq!(complete.len(), 32);
        assert!(read_prefix::<msgs::TxComplete>(&complete).is_some());
        assert!(read_prefix::<msgs::TxComplete>(&complete[..31]).is_none());
        msg_tx_complete(&complete, &HarnessConfig::default());
    }

    #[test]
    fn channel_update_round_trips_around_message_flags() {
        let update = msgs::UnsignedChannelUpdate {
            chain_hash: ChainHash::using_genesis_block(Network::Bitcoin),
            short_channel_id: 42,
            timestamp: 7,
            message_flags: 1,
            channel_flags: 0,
            cltv_expiry_delta: 40,
            htlc_minimum_msat: 1,
            htlc_maximum_msat: 1_000_000,
            fee_base_msat: 1,
            fee_proportional_millionths: 10,
            excess_data: Vec::new(),
        };
        let mut data = vec![0x11; 64];
        data.extend_from_slice(&update.encode());
        assert_eq!(data[108], 1);
        assert!(read_prefix::<msgs::ChannelUpdate>(&data).is_some());
        msg_channel_update(&data, &HarnessConfig::default());
        // a clear must-be-one bit is rejected outright
        data[108] = 0;
        assert!(read_prefix::<msgs::ChannelUpdate>(&data).is_none());
    }

    #[test]
    fn query_ids_ignore_trailing_bytes() {
        let query = msgs::QueryShortChannelIds {
            chain_hash: ChainHash::using_genesis_block(Network::Bitcoin),
            short_channel_ids: vec![1, 2, 3],
        };
        let mut data = query.encode();
        data.extend_from_slice(&[0xde, 0xad]);
        msg_query_short_channel_ids(&data, &HarnessConfig::default());
    }

    #[test]
    fn error_message_round_trips() {
        let error = msgs::ErrorMessage { channel_id: ChannelId([1; 32]), data: "funding expired".to_owned() };
        msg_error_message(&error.encode(), &HarnessConfig::default());
        msg_error_message(&[0u8; 33], &HarnessConfig::default());
    }

    #[test]
    fn short_inputs_return() {
        let cfg = HarnessConfig::default();
        for len in 0..40 {
            let data = vec![0u8; len];
            msg_open_channel(&data, &cfg);
            msg_update_add_htlc(&data, &cfg);
            msg_node_announcement(&data, &cfg);
            msg_channel_update(&data, &cfg);
        }
    }
}
