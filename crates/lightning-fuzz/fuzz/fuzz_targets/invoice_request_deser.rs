#![no_main]

use libfuzzer_sys::fuzz_target;
use lightning_fuzz::targets::offers;
use lightning_fuzz::HarnessConfig;

/// Decode `invoice_request_deser` input, re-encode, and require the round trip to hold.
fuzz_target!(|data: &[u8]| {
    offers::invoice_request_deser(data, &HarnessConfig::default());
});
