#![no_main]

use libfuzzer_sys::fuzz_target;
use lightning_fuzz::targets::msg;
use lightning_fuzz::HarnessConfig;

/// Decode `msg_announcement_signatures` input, re-encode, and require the round trip to hold.
fuzz_target!(|data: &[u8]| {
    msg::msg_announcement_signatures(data, &HarnessConfig::default());
});
