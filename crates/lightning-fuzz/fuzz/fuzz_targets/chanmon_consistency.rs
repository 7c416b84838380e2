#![no_main]

use libfuzzer_sys::fuzz_target;
use lightning_fuzz::targets::chanmon_consistency;
use lightning_fuzz::HarnessConfig;

/// Drive the `chanmon_consistency` interpreter; any invariant violation panics.
fuzz_target!(|data: &[u8]| {
    chanmon_consistency::run(data, &HarnessConfig::default());
});
