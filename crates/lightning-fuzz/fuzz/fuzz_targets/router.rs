#![no_main]

use libfuzzer_sys::fuzz_target;
use lightning_fuzz::targets::router;
use lightning_fuzz::HarnessConfig;

/// Drive the `router` interpreter; any invariant violation panics.
fuzz_target!(|data: &[u8]| {
    router::run(data, &HarnessConfig::default());
});
