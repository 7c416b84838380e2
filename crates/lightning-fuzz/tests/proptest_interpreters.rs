//! Property-based tests for the interpreter targets.
//!
//! Interpreters must hold their invariants for any action sequence, not
//! only the scripted ones in the unit tests. Sequences here are drawn from
//! each target's meaningful action bytes so most steps do real work.

use lightning_fuzz::{HarnessConfig, Registry, TargetKind};
use proptest::prelude::*;

/// Action bytes that do something in `chanmon_consistency`.
const CHANMON_ACTIONS: &[u8] = &[
    0x00, 0x01, 0x04, 0x05, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x10, 0x11, 0x12, 0x13, 0x18, 0x20, 0x23, 0x26,
    0x27, 0x28, 0x2b, 0x2e, 0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x40, 0x41, 0x48, 0x49, 0x50, 0x51,
];

fn chanmon_script() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(proptest::sample::select(CHANMON_ACTIONS), 0..48).prop_map(|mut script| {
        // settle
        script.push(0xff);
        script
    })
}

fn config() -> HarnessConfig {
    HarnessConfig { max_actions: 256, max_deliver_rounds: 16, ..HarnessConfig::default() }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn chanmon_holds_for_any_action_order(script in chanmon_script()) {
        let target = Registry::new().get("chanmon_consistency");
        prop_assert!(target.is_some());
        if let Some(target) = target {
            target.run_with(&script, &config());
        }
    }

    #[test]
    fn interpreters_are_repeatable(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        let config = config();
        for target in Registry::new().iter().filter(|t| t.kind == TargetKind::Interpreter) {
            target.run_with(&data, &config);
            target.run_with(&data, &config);
        }
    }

    #[test]
    fn indexedmap_agrees_with_btreemap(ops in proptest::collection::vec((0u8..0x0c, any::<u8>(), any::<u64>()), 0..128)) {
        let mut script = Vec::new();
        for (op, key, value) in ops {
            script.push(op);
            script.push(key);
            script.extend_from_slice(&value.to_be_bytes());
        }
        prop_assert!(Registry::new().run("indexedmap", &script));
    }
}
