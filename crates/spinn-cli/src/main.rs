//! `spinn`: offline developer tool for the host control layer.
//!
//! ```text
//! USAGE:
//!   spinn mask <n-keys> [--key K] [--prefix P]   Key mask for a channel
//!   spinn spec-dump <file>                        Execute a data spec, print its listing
//!   spinn ticks [--step US] <ms>...               Tick for each timestamp
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spinn_host::{
    compute_mask, DataSpecification, KeyAllocation, KeyPrefix, SimulationContext,
    SpecificationExecutor,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spinn", about = "Host control layer developer tool", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Compute the mask and capacity for a channel of keys.
    Mask {
        /// Number of keys in the channel.
        n_keys: u64,
        /// Fixed base key (hex with 0x, or decimal).
        #[arg(long, value_parser = parse_u32)]
        key: Option<u32>,
        /// 16-bit prefix applied to the upper half word.
        #[arg(long, value_parser = parse_u32)]
        prefix: Option<u32>,
    },
    /// Execute a binary data specification and print its listing.
    SpecDump {
        /// Specification file.
        file: std::path::PathBuf,
    },
    /// Convert timestamps (ms) to machine ticks.
    Ticks {
        /// Machine time step in microseconds.
        #[arg(long, default_value_t = 1000)]
        step: u32,
        /// First tick of the window.
        #[arg(long, default_value_t = 0)]
        first: u32,
        /// End of the window (exclusive).
        #[arg(long)]
        last: Option<u32>,
        /// Timestamps in milliseconds.
        #[arg(required = true, allow_negative_numbers = true)]
        timestamps: Vec<f64>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Mask { n_keys, key, prefix } => cmd_mask(n_keys, key, prefix)?,
        Cmd::SpecDump { file } => cmd_spec_dump(&file)?,
        Cmd::Ticks {
            step,
            first,
            last,
            timestamps,
        } => cmd_ticks(step, first, last, &timestamps),
    }

    Ok(())
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("{s}: {e}"))
}

fn cmd_mask(n_keys: u64, key: Option<u32>, prefix: Option<u32>) -> Result<()> {
    let (mask, capacity) = compute_mask(n_keys)?;
    println!("Keys     : {n_keys}");
    println!("Mask     : 0x{mask:08X}");
    println!("Capacity : {capacity} (0x{capacity:08X})");

    if key.is_some() || prefix.is_some() {
        let prefix = prefix
            .map(|p| u16::try_from(p).context("prefix must fit in 16 bits"))
            .transpose()?
            .map(KeyPrefix::upper);
        let alloc = KeyAllocation::resolve(n_keys, key, prefix)?;
        if let Some(key) = alloc.virtual_key {
            println!("Base key : 0x{key:08X}");
        }
        if let (Some(p), Some(t)) = (alloc.prefix, alloc.prefix_type) {
            println!("Prefix   : 0x{p:08X} ({t:?})");
        }
    }
    Ok(())
}

fn cmd_spec_dump(file: &std::path::Path) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    debug!("{}: {} bytes of specification", file.display(), bytes.len());
    let spec = DataSpecification::from_bytes(bytes);
    let executed = SpecificationExecutor::new()
        .execute(&spec)
        .with_context(|| format!("executing {}", file.display()))?;

    print!("{}", executed.render_text());
    println!();
    for image in executed.images.values() {
        println!(
            "region {:2}: {:8} bytes reserved, {:8} written{}",
            image.region.id,
            image.region.size,
            image.data.len(),
            if image.region.unfilled { " (unfilled)" } else { "" }
        );
    }
    Ok(())
}

fn cmd_ticks(step: u32, first: u32, last: Option<u32>, timestamps: &[f64]) {
    let ctx = SimulationContext::new(step, 1).with_window(first, last);
    for &ts in timestamps {
        match ctx.timestamp_to_tick(ts) {
            Some(tick) if ctx.in_window(tick) => println!("{ts:>12} ms -> tick {tick}"),
            Some(tick) => println!("{ts:>12} ms -> tick {tick} (outside window)"),
            None => println!("{ts:>12} ms -> dropped"),
        }
    }
}
