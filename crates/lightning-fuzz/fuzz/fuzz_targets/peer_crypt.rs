#![no_main]

use libfuzzer_sys::fuzz_target;
use lightning_fuzz::targets::peer_crypt;
use lightning_fuzz::HarnessConfig;

/// Drive the `peer_crypt` interpreter; any invariant violation panics.
fuzz_target!(|data: &[u8]| {
    peer_crypt::run(data, &HarnessConfig::default());
});
