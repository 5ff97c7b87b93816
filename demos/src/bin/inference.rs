//! SINet Inference
//!
//! Detects camouflaged objects in a single image or in every image of a
//! directory and writes one binary mask per input, optionally together with
//! the auxiliary visualizations.
//!
//! ## Usage
//!
//! ```bash
//! # Single image
//! cargo run --bin inference -- weights/model.mpk photo.jpg
//!
//! # Directory, custom threshold, with visualizations
//! cargo run --bin inference -- weights/model.mpk photos/ -o outputs/ -t 0.4 --visuals
//!
//! # PyTorch checkpoint
//! cargo run --features pretrained --bin inference -- weights/sinet.pth photo.jpg
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use sinet_burn::{DetectionVisuals, Detector, SINetConfig, Threshold};
use sinet_demos::{
    create_device, get_backend_name, init_logging, load_or_default, InferenceRunConfig,
    SelectedBackend,
};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model weights (`.mpk`, or `.pth` with the `pretrained` feature)
    model: PathBuf,

    /// Input image or directory of images
    input: PathBuf,

    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Binarization threshold in [0, 1]
    #[arg(short, long)]
    threshold: Option<f32>,

    /// Square model input side
    #[arg(long)]
    image_size: Option<u32>,

    /// Also save overlay, bounding box, crop, heatmap and composite
    #[arg(long)]
    visuals: bool,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config: InferenceRunConfig = load_or_default(args.config.as_deref())?;
    if let Some(output) = args.output {
        config.output_dir = output;
    }
    if let Some(threshold) = args.threshold {
        config.inference.threshold = threshold;
    }
    if let Some(side) = args.image_size {
        config.inference.preprocess.target_side = side;
    }
    config.save_visuals |= args.visuals;

    // Reject a bad threshold before spending time on the model.
    let threshold = Threshold::new(config.inference.threshold)?;

    if !args.model.exists() {
        bail!("Model file does not exist: {}", args.model.display());
    }
    let inputs = collect_inputs(&args.input)?;
    if inputs.is_empty() {
        bail!("No images found at {}", args.input.display());
    }

    fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            config.output_dir.display()
        )
    })?;

    let device = create_device();
    tracing::info!("Using backend: {}", get_backend_name());

    let detector = Detector::<SelectedBackend>::from_checkpoint(
        &SINetConfig::new().with_config(config.model.clone()),
        &args.model,
        config.inference.clone(),
        device,
    )
    .with_context(|| format!("Failed to load model from {}", args.model.display()))?;

    let mut failures = 0usize;
    for path in &inputs {
        if let Err(e) = process_image(&detector, path, threshold, &config) {
            tracing::error!("{}: {e:#}", path.display());
            failures += 1;
        }
    }

    tracing::info!(
        "Processed {} of {} images into {}",
        inputs.len() - failures,
        inputs.len(),
        config.output_dir.display()
    );
    if failures > 0 {
        bail!("{failures} image(s) failed");
    }
    Ok(())
}

fn collect_inputs(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        bail!("Input path does not exist: {}", input.display());
    }

    let mut files: Vec<PathBuf> = fs::read_dir(input)
        .with_context(|| format!("Failed to read directory: {}", input.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| {
                        IMAGE_EXTENSIONS
                            .iter()
                            .any(|allowed| allowed.eq_ignore_ascii_case(ext))
                    })
        })
        .collect();
    files.sort();
    Ok(files)
}

fn process_image(
    detector: &Detector<SelectedBackend>,
    path: &Path,
    threshold: Threshold,
    config: &InferenceRunConfig,
) -> Result<()> {
    let start = Instant::now();
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let image = sinet_burn::decode_image(&bytes)?;

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .context("Input file name is not valid UTF-8")?;
    let out = |suffix: &str| config.output_dir.join(format!("{stem}_{suffix}.png"));

    if config.save_visuals {
        let DetectionVisuals {
            mask,
            overlay,
            bounding_box,
            crop,
            heatmap,
            combined,
        } = detector.detect_with_visuals(&image, threshold)?;

        mask.save(out("mask"))?;
        overlay.save(out("overlay"))?;
        bounding_box.save(out("bbox"))?;
        heatmap.save(out("heatmap"))?;
        combined.save(out("combined"))?;
        match crop {
            Some(crop) => crop.save(out("crop"))?,
            None => tracing::info!("{}: no camouflaged object found", path.display()),
        }
    } else {
        detector.detect(&image, threshold)?.save(out("mask"))?;
    }

    tracing::info!("{} done in {:.2?}", path.display(), start.elapsed());
    Ok(())
}
