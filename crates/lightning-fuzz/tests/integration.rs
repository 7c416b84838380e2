//! # Integration tests: registry boundary and scripted node networks
//!
//! The registry half checks what the fuzzing engine relies on: a closed,
//! uniquely named table whose targets all return on degenerate inputs.
//! The scripted half feeds the interpreters hand-written action sequences
//! through the same entry points a fuzzer uses.

use std::collections::HashSet;

use lightning_fuzz::{HarnessConfig, Registry, TargetKind};

// ─── Registry ───────────────────────────────────────────────────────────────

#[test]
fn registry_is_closed_and_uniquely_named() {
    let registry = Registry::new();
    assert_eq!(registry.len(), 63);
    let names: HashSet<&str> = registry.iter().map(|t| t.name).collect();
    assert_eq!(names.len(), registry.len());
    for name in &names {
        assert_eq!(registry.get(name).map(|t| t.name), Some(*name));
    }
    assert!(registry.get("msg_nonexistent").is_none());
    assert!(!registry.run("msg_nonexistent", &[1, 2, 3]));
}

#[test]
fn interpreter_set_is_exact() {
    let registry = Registry::new();
    let mut interpreters: Vec<&str> =
        registry.iter().filter(|t| t.kind == TargetKind::Interpreter).map(|t| t.name).collect();
    interpreters.sort_unstable();
    assert_eq!(
        interpreters,
        [
            "chanmon_consistency",
            "full_stack",
            "indexedmap",
            "onion_message",
            "peer_crypt",
            "process_network_graph",
            "router"
        ]
    );
    assert!(registry.iter().filter(|t| t.name.starts_with("msg_")).all(|t| t.kind == TargetKind::Codec));
}

#[test]
fn every_target_returns_on_degenerate_inputs() {
    let registry = Registry::new();
    let inputs: [&[u8]; 5] = [&[], &[0x00], &[0xff], &[0xff; 64], &[0x00; 64]];
    for target in registry.iter() {
        for input in inputs {
            target.run(input);
        }
    }
}

#[test]
fn c_entry_points_accept_null_and_empty() {
    unsafe {
        lightning_fuzz::registry::msg_ping_run(std::ptr::null(), 0);
        lightning_fuzz::registry::full_stack_run(std::ptr::null(), 16);
        let data = [0x00u8, 0x01, 0x00, 0x00];
        lightning_fuzz::registry::msg_ping_run(data.as_ptr(), data.len());
    }
}

#[test]
fn config_from_toml_reaches_interpreters() {
    let config = HarnessConfig::from_toml_str("seed = 99\nmax_actions = 3\nmax_deliver_rounds = 2").unwrap();
    assert_eq!(config.max_actions, 3);
    let registry = Registry::new();
    let target = registry.get("chanmon_consistency").unwrap();
    target.run_with(&[0x20, 0x21, 0x22, 0x23, 0x24], &config);
    let target = registry.get("full_stack").unwrap();
    target.run_with(&[0x01, 0x00, 0, 1, 0x04, 0x04], &config);
}

// ─── Scripted networks ──────────────────────────────────────────────────────

/// Two nodes: connect, open 100_000 sat pushing 3_222_784 msat, fund,
/// confirm.
fn full_stack_open() -> Vec<u8> {
    vec![
        0x00, //
        0x00, 0, 1, 0x04, //
        0x05, 0, 1, 0x01, 0x86, 0xa0, 0x31, 0x2d, 0x00, 0, 0x04, //
        0x06, 0x04, 0x07, 3, 0x04,
    ]
}

#[test]
fn full_stack_script_pays_and_force_closes() {
    let mut script = full_stack_open();
    // pay 1_000_000 msat 0 -> 1, claim at 1, then pay back 500_000 msat
    script.extend_from_slice(&[0x08, 0, 1, 0x0f, 0x42, 0x40, 0x04, 0x09, 1, 0x04]);
    script.extend_from_slice(&[0x08, 1, 0, 0x07, 0xa1, 0x20, 0x04, 0x09, 0, 0x04]);
    // force close from the funder and let the commitment confirm
    script.extend_from_slice(&[0x0c, 0, 0, 0x04, 0x07, 0, 0x04, 0xff]);
    assert!(Registry::new().run("full_stack", &script));
}

#[test]
fn full_stack_script_survives_garbage_mid_channel() {
    let mut script = full_stack_open();
    script.extend_from_slice(&[0x02, 0, 1, 8, 0xde, 0xad, 0xbe, 0xef, 0, 1, 2, 3, 0x04, 0x00, 0, 1, 0x04]);
    script.extend_from_slice(&[0x0a, 1, 0x0d, 0x07, 2, 0x0b, 0, 0, 0x04, 0xff]);
    assert!(Registry::new().run("full_stack", &script));
}

#[test]
fn chanmon_script_pays_both_ways_across_a_reload() {
    // A pays and B claims, B reloads, B pays back and A claims, settle
    let script = [0x26, 0x18, 0x31, 0x18, 0x41, 0x18, 0x2e, 0x18, 0x30, 0x18, 0xff];
    assert!(Registry::new().run("chanmon_consistency", &script));
}
