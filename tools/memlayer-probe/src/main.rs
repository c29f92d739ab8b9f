//! Memory layer probe
//!
//! Brings the shared-heap memory layer up against the mock allocator, runs a
//! multi-threaded allocation workload and checks that every address handed out
//! lies inside the shared heap.
//!
//! Usage:
//!   memlayer-probe [--config probe.toml] [--heap-size 0x4000000] [--threads 8] [--standalone]

mod config;
mod workload;

use anyhow::{Context, Result};
use clap::Parser;
use memlayer::{CommLayer, MemoryLayer, Mode, OwnedRegion, Standalone};
use std::path::PathBuf;

use crate::config::ProbeConfig;

#[derive(Parser, Debug)]
#[command(name = "memlayer-probe")]
#[command(about = "Verify that allocator chunks come from the shared heap")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Shared heap size in bytes (overrides heap.size)
    #[arg(long)]
    heap_size: Option<String>,

    /// Worker threads (overrides workload.threads)
    #[arg(long)]
    threads: Option<usize>,

    /// Run without a shared heap
    #[arg(long)]
    standalone: bool,
}

fn parse_hex_or_dec(s: &str) -> Result<usize> {
    if let Some(hex) = s.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).context("Invalid hex number")
    } else {
        s.parse::<usize>().context("Invalid decimal number")
    }
}

fn load_config(args: &Args) -> Result<ProbeConfig> {
    let mut config = match &args.config {
        Some(path) => ProbeConfig::load(path)?,
        None => ProbeConfig::default(),
    };

    if let Some(size) = &args.heap_size {
        config.heap.size = parse_hex_or_dec(size)?;
    }
    if let Some(threads) = args.threads {
        config.workload.threads = threads;
    }
    if args.standalone {
        config.heap.standalone = true;
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args)?;

    log::info!("Configuration:");
    log::info!(
        "  Heap:     {:#x} bytes (align {:#x}){}",
        config.heap.size,
        config.heap.alignment,
        if config.heap.standalone { ", standalone" } else { "" }
    );
    log::info!("  Arenas:   {}", config.allocator.arenas);
    log::info!("  Chunk:    {:#x}", config.allocator.chunk_size);
    log::info!(
        "  Workload: {} threads x {} allocations (max {} bytes)",
        config.workload.threads,
        config.workload.allocations_per_thread,
        config.workload.max_size
    );

    // Declared before the allocator so it is dropped after it
    let region = if config.heap.standalone {
        None
    } else {
        Some(OwnedRegion::new(config.heap.size, config.heap.alignment)?)
    };
    let allocator = config.allocator.build();

    let comm: &dyn CommLayer = match &region {
        Some(region) => region,
        None => &Standalone,
    };
    let layer = MemoryLayer::init(comm, &allocator).context("Memory layer initialization failed")?;

    if let Mode::SharedHeap { arenas, drain, .. } = layer.mode() {
        log::info!("Shared heap up: {} arenas hooked", arenas);
        log::info!(
            "  Drain: {} classes, {} off-heap blocks ({} bytes) neutralized",
            drain.classes.len(),
            drain.leaked_blocks(),
            drain.leaked_bytes()
        );
    }

    let report = workload::run(
        &allocator,
        layer.heap().map(|heap| &**heap),
        config.allocator.arenas,
        &config.workload,
    )?;

    let mock = allocator.stats();
    log::info!("");
    log::info!("Workload summary:");
    log::info!("  Allocations:   {}", report.allocations);
    log::info!("  Out of memory: {}", report.out_of_memory);
    log::info!("  Escaped heap:  {}", report.escaped);
    log::info!("  Chunks:        {} hooked, {} system", mock.hooked_chunks, mock.system_chunks);

    let released = allocator.trim();
    log::info!("  Trim released: {}", released);

    if let Some(stats) = layer.shutdown() {
        log::info!(
            "  Heap used:     {:#x} of {:#x} ({} chunks, {} refused)",
            stats.used,
            stats.size,
            stats.chunks,
            stats.failures
        );
    }

    if report.escaped > 0 {
        anyhow::bail!("{} allocations escaped the shared heap", report.escaped);
    }
    if released > 0 {
        anyhow::bail!("{} chunks were released back out of the shared heap", released);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_or_dec() {
        assert_eq!(parse_hex_or_dec("0x1000").unwrap(), 4096);
        assert_eq!(parse_hex_or_dec("4096").unwrap(), 4096);
        assert!(parse_hex_or_dec("0xzz").is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from(["memlayer-probe", "--heap-size", "0x100000", "--threads", "2"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.heap.size, 0x100000);
        assert_eq!(config.workload.threads, 2);
        assert!(!config.heap.standalone);
    }
}
