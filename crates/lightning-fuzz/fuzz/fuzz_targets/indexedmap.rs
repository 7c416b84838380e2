#![no_main]

use libfuzzer_sys::fuzz_target;
use lightning_fuzz::targets::indexedmap;
use lightning_fuzz::HarnessConfig;

/// Drive the `indexedmap` interpreter; any invariant violation panics.
fuzz_target!(|data: &[u8]| {
    indexedmap::run(data, &HarnessConfig::default());
});
