//! # lightning-fuzz
//!
//! Fuzz targets for the Lightning Dev Kit ([`lightning`]). Each target is a plain
//! `fn(&[u8], &HarnessConfig)` that returns normally for every input unless
//! it finds a bug, in which case it panics.
//!
//! ## Crate structure
//!
//! - [`input`]: the byte cursor every target reads through
//! - [`config`]: seeds and bounds, TOML-loadable for the CLI
//! - [`targets`]: codec round-trip targets and stateful interpreters
//! - `node` / `env`: LDK nodes and the in-memory chain, sockets and
//!   persistence the interpreters drive them with
//! - [`registry`]: the closed name → handler table and its C ABI
//!
//! ```text
//!  engine bytes ──► registry ──► codec target ──► decode / re-encode / compare
//!                           └──► interpreter ──► FuzzInput ──► actions ──► LDK  
//!                                                                 │
//!                                                        invariants after each step
//! ```

pub mod config;
mod env;
pub mod input;
mod node;
pub mod registry;
pub mod targets;

pub use config::HarnessConfig;
pub use input::FuzzInput;
pub use registry::{Registry, TargetDescriptor, TargetKind};
