#![no_main]

use libfuzzer_sys::fuzz_target;
use lightning_fuzz::targets::process_network_graph;
use lightning_fuzz::HarnessConfig;

/// Drive the `process_network_graph` interpreter; any invariant violation panics.
fuzz_target!(|data: &[u8]| {
    process_network_graph::run(data, &HarnessConfig::default());
});
