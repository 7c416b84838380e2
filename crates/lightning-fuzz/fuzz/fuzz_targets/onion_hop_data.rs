#![no_main]

use libfuzzer_sys::fuzz_target;
use lightning_fuzz::targets::persisted;
use lightning_fuzz::HarnessConfig;

/// Decode `onion_hop_data` input, re-encode, and require the round trip to hold.
fuzz_target!(|data: &[u8]| {
    persisted::onion_hop_data(data, &HarnessConfig::default());
});
