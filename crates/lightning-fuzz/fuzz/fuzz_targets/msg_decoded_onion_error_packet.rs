#![no_main]

use libfuzzer_sys::fuzz_target;
use lightning_fuzz::targets::persisted;
use lightning_fuzz::HarnessConfig;

/// Decode `msg_decoded_onion_error_packet` input, re-encode, and require the round trip to hold.
fuzz_target!(|data: &[u8]| {
    persisted::msg_decoded_onion_error_packet(data, &HarnessConfig::default());
});
