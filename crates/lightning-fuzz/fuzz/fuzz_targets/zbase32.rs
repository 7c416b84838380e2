#![no_main]

use libfuzzer_sys::fuzz_target;
use lightning_fuzz::targets::text;
use lightning_fuzz::HarnessConfig;

/// Decode `zbase32` input, re-encode, and require the round trip to hold.
fuzz_target!(|data: &[u8]| {
    text::zbase32(data, &HarnessConfig::default());
});
