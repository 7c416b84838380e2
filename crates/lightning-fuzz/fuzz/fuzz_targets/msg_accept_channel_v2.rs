#![no_main]

use libfuzzer_sys::fuzz_target;
use lightning_fuzz::targets::msg;
use lightning_fuzz::HarnessConfig;

/// Decode `msg_accept_channel_v2` input, re-encode, and require the round trip to hold.
fuzz_target!(|data: &[u8]| {
    msg::msg_accept_channel_v2(data, &HarnessConfig::default());
});
