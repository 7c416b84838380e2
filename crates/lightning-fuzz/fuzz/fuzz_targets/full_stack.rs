#![no_main]

use libfuzzer_sys::fuzz_target;
use lightning_fuzz::targets::full_stack;
use lightning_fuzz::HarnessConfig;

/// Drive the `full_stack` interpreter; any invariant violation panics.
fuzz_target!(|data: &[u8]| {
    full_stack::run(data, &HarnessConfig::default());
});
