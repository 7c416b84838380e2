#![no_main]

use libfuzzer_sys::fuzz_target;
use lightning_fuzz::targets::onion_message;
use lightning_fuzz::HarnessConfig;

/// Drive the `onion_message` interpreter; any invariant violation panics.
fuzz_target!(|data: &[u8]| {
    onion_message::run(data, &HarnessConfig::default());
});
