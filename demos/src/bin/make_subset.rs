//! Dataset subset sampler
//!
//! Copies a seeded random sample of image/mask pairs out of a large
//! COD10K-style dataset so experiments can run on a few hundred images.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin make_subset -- --source datasets/COD10K_full --count 500
//! cargo run --release --bin make_subset -- --config subset.json --seed 7
//! ```

use anyhow::{ensure, Context, Result};
use clap::Parser;
use sinet_burn::make_subset;
use sinet_demos::{init_logging, load_or_default, SubsetConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source dataset root (contains `Images/` and `GT/`)
    #[arg(long)]
    source: Option<PathBuf>,

    /// Destination root
    #[arg(long)]
    dest: Option<PathBuf>,

    /// Number of pairs to sample
    #[arg(short = 'n', long)]
    count: Option<usize>,

    /// Sampling seed
    #[arg(long)]
    seed: Option<u64>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config: SubsetConfig = load_or_default(args.config.as_deref())?;
    if let Some(source) = args.source {
        config.source.root = source.to_string_lossy().into_owned();
    }
    if let Some(dest) = args.dest {
        config.dest = dest;
    }
    if let Some(count) = args.count {
        config.count = count;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    ensure!(config.count > 0, "Sample count must be greater than 0");

    let copied = make_subset(&config.source, &config.dest, config.count, config.seed)
        .with_context(|| format!("Failed to sample from {}", config.source.root))?;
    if copied < config.count {
        tracing::warn!(
            "Only {copied} of {} requested pairs were copied",
            config.count
        );
    }

    Ok(())
}
