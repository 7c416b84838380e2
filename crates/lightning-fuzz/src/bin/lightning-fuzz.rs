//! lightning-fuzz
//!
//! Runs fuzz targets outside a fuzzing engine:
//!
//! - `list` prints every target and its kind
//! - `run <target> <files...>` replays corpus or crash files
//! - `selftest` runs every target on a handful of generated inputs

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use lightning_fuzz::{HarnessConfig, Registry, TargetDescriptor};

/// Replay and smoke-test Lightning fuzz targets.
#[derive(Parser, Debug)]
#[command(name = "lightning-fuzz", about = "Fuzz targets for the Lightning Dev Kit")]
struct Cli {
    /// TOML file overriding seeds and bounds.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every target.
    List {
        /// Print JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Replay input files (or every file in a directory) against a target.
    Run {
        target: String,
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Run every target on empty, one-byte and random inputs, twice each.
    Selftest {
        /// Random inputs per target.
        #[arg(long, default_value_t = 16)]
        iterations: usize,
        /// Largest random input in bytes.
        #[arg(long, default_value_t = 4096)]
        max_len: usize,
    },
}

#[derive(Serialize)]
struct TargetListing<'a> {
    name: &'a str,
    kind: String,
    symbol: String,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<HarnessConfig> {
    let Some(path) = path else {
        return Ok(HarnessConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    HarnessConfig::from_toml_str(&text).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))
}

/// Files named on the command line, with directories expanded one level.
fn collect_inputs(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("listing {}", path.display()))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

fn list(registry: &Registry, json: bool) -> anyhow::Result<()> {
    if json {
        let listing: Vec<TargetListing<'_>> = registry
            .iter()
            .map(|t| TargetListing { name: t.name, kind: t.kind.to_string(), symbol: format!("{}_run", t.name) })
            .collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }
    for target in registry.iter() {
        println!("{:<40} {}", target.name, target.kind);
    }
    Ok(())
}

fn replay(target: &TargetDescriptor, inputs: &[PathBuf], config: &HarnessConfig) -> anyhow::Result<()> {
    let files = collect_inputs(inputs)?;
    if files.is_empty() {
        bail!("no input files found");
    }
    for file in &files {
        let data = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
        tracing::info!(target = target.name, file = %file.display(), len = data.len(), "replaying");
        target.run_with(&data, config);
    }
    println!("{}: {} input(s) ok", target.name, files.len());
    Ok(())
}

fn selftest(registry: &Registry, config: &HarnessConfig, iterations: usize, max_len: usize) {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut inputs: Vec<Vec<u8>> = vec![Vec::new(), vec![0x00], vec![0xff]];
    for _ in 0..iterations {
        let len = rng.random_range(0..=max_len);
        inputs.push((0..len).map(|_| rng.random()).collect());
    }
    for target in registry.iter() {
        for input in &inputs {
            // Twice: a target must not carry state between runs.
            target.run_with(input, config);
            target.run_with(input, config);
        }
        tracing::debug!(target = target.name, inputs = inputs.len(), "selftest passed");
    }
    println!("selftest: {} targets x {} inputs ok", registry.len(), inputs.len());
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .compact()
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let registry = Registry::new();

    match cli.command {
        Command::List { json } => list(&registry, json)?,
        Command::Run { target, inputs } => {
            let Some(descriptor) = registry.get(&target) else {
                bail!("unknown target {target:?}; `lightning-fuzz list` shows all {}", registry.len());
            };
            replay(descriptor, &inputs, &config)?;
        }
        Command::Selftest { iterations, max_len } => selftest(&registry, &config, iterations, max_len),
    }
    Ok(())
}
