//! Weight converter
//!
//! Reads a PyTorch SINet checkpoint, renames its parameters to this crate's
//! module tree, checks every shape and writes a native `.mpk` file.
//!
//! ## Usage
//!
//! ```bash
//! # Convert (writes weights/sinet.mpk)
//! cargo run --features pretrained --bin converter -- SINet_40.pth weights/sinet
//!
//! # Convert a ResNet-34 variant and run a forward pass on the result
//! cargo run --features pretrained --bin converter -- model.pth out --config model.json --validate
//! ```

use anyhow::{bail, Context, Result};
use burn::{config::Config, prelude::*, tensor::Distribution};
use clap::Parser;
use sinet_burn::{
    load_checkpoint, load_pytorch_checkpoint, save_checkpoint, ModelConfig, SINetConfig,
    CHECKPOINT_EXTENSION,
};
use sinet_demos::{
    create_device, get_backend_name, init_logging, SelectedBackend, SelectedDevice,
};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input PyTorch checkpoint (.pth file)
    input: PathBuf,

    /// Output path; the `.mpk` extension is appended
    output: PathBuf,

    /// Model configuration file (JSON `ModelConfig`)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload the converted file and run a forward pass
    #[arg(long)]
    validate: bool,

    /// Overwrite an existing output file
    #[arg(long)]
    force: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let model_config = match &args.config {
        Some(path) => ModelConfig::load(path)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("Failed to read model config: {}", path.display()))?,
        None => ModelConfig::new(),
    };
    let config = SINetConfig::new().with_config(model_config);

    if !args.input.exists() {
        bail!(
            "Input model file does not exist: {}",
            args.input.display()
        );
    }
    let output_file = args.output.with_extension(CHECKPOINT_EXTENSION);
    if output_file.exists() && !args.force {
        bail!(
            "Output file already exists: {}. Use --force to overwrite.",
            output_file.display()
        );
    }

    let device = create_device();
    tracing::info!("Using backend: {}", get_backend_name());

    let model = load_pytorch_checkpoint::<SelectedBackend>(&config, &args.input, &device)
        .with_context(|| format!("Failed to convert {}", args.input.display()))?;
    tracing::info!("Parameters: {}", model.num_params());

    save_checkpoint(&model, &args.output).context("Failed to save converted model")?;

    if args.validate {
        validate_conversion(&config, &output_file, &device)?;
    }

    tracing::info!("Model conversion completed");
    Ok(())
}

/// Reload the written file and check a forward pass produces finite maps.
fn validate_conversion(config: &SINetConfig, path: &Path, device: &SelectedDevice) -> Result<()> {
    let model = load_checkpoint::<SelectedBackend>(config, path, device)
        .context("Failed to reload converted model")?;

    let side = 352;
    let input = Tensor::<SelectedBackend, 4>::random(
        [1, 3, side, side],
        Distribution::Normal(0.0, 1.0),
        device,
    );
    let output = model.forward(input);

    let dims = output.refined.dims();
    if dims != [1, 1, side, side] {
        bail!("Unexpected output shape {dims:?}");
    }

    let min: f32 = output.refined.clone().min().into_scalar().elem();
    let max: f32 = output.refined.max().into_scalar().elem();
    if !min.is_finite() || !max.is_finite() {
        bail!("Model output contains non-finite values");
    }
    if !(0.0..=1.0).contains(&min) || !(0.0..=1.0).contains(&max) {
        bail!("Probabilities outside [0, 1]: min {min}, max {max}");
    }
    if (max - min).abs() < 1e-6 {
        tracing::warn!("Model output is nearly constant, the weights may not have loaded");
    }

    tracing::info!("Validation passed (output range {min:.4}..{max:.4})");
    Ok(())
}
