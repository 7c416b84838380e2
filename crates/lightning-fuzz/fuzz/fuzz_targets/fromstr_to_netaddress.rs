#![no_main]

use libfuzzer_sys::fuzz_target;
use lightning_fuzz::targets::text;
use lightning_fuzz::HarnessConfig;

/// Decode `fromstr_to_netaddress` input, re-encode, and require the round trip to hold.
fuzz_target!(|data: &[u8]| {
    text::fromstr_to_netaddress(data, &HarnessConfig::default());
});
