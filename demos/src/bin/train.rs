//! SINet Training
//!
//! Fine-tunes the receptive field blocks and both partial decoders on a
//! COD10K-style dataset while the ResNet backbone stays frozen.
//!
//! ## Features
//!
//! - `ndarray`: CPU backend using ndarray (default)
//! - `wgpu`: GPU backend using WGPU
//! - `cuda`: NVIDIA GPU backend using CUDA
//! - `pretrained`: initialize the backbone from torchvision `.pth` weights
//!
//! ## Usage
//!
//! ```bash
//! # Train with default configuration
//! cargo run --release --bin train
//!
//! # Train with a configuration file and a few overrides
//! cargo run --release --bin train -- --config train.json --num-epochs 20 -v
//!
//! # Start from ImageNet backbone weights
//! cargo run --release --features pretrained --bin train -- --backbone-weights resnet18.pth
//! ```

use anyhow::{bail, ensure, Context, Result};
use burn::{
    backend::Autodiff,
    data::dataloader::{DataLoader, DataLoaderBuilder, Dataset},
    optim::AdamConfig,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    train::{metric::LossMetric, LearnerBuilder},
};
use clap::Parser;
use sinet_burn::{
    save_checkpoint, CamoBatch, CamoBatcher, CamoDataset, Preprocessor, SINet, SINetConfig,
};
use sinet_demos::{
    create_device, get_backend_name, init_logging, load_or_default, SelectedBackend,
    SelectedDevice, TrainingConfig,
};
use std::{path::PathBuf, sync::Arc};

type TrainBackend = Autodiff<SelectedBackend>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override batch size
    #[arg(long)]
    batch_size: Option<usize>,

    /// Override number of epochs
    #[arg(long)]
    num_epochs: Option<usize>,

    /// Override learning rate
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Override dataset root (must contain `Images/` and `GT/`)
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// Override artifact directory
    #[arg(long)]
    artifact_dir: Option<PathBuf>,

    /// Torchvision ResNet weights for the backbone
    #[arg(long)]
    backbone_weights: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config: TrainingConfig = load_or_default(args.config.as_deref())?;

    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(num_epochs) = args.num_epochs {
        config.num_epochs = num_epochs;
    }
    if let Some(learning_rate) = args.learning_rate {
        config.learning_rate = learning_rate;
    }
    if let Some(dataset) = args.dataset {
        config.dataset.root = dataset.to_string_lossy().into_owned();
    }
    if let Some(artifact_dir) = args.artifact_dir {
        config.artifact_dir = artifact_dir;
    }
    if args.backbone_weights.is_some() {
        config.backbone_weights = args.backbone_weights;
    }

    ensure!(config.batch_size > 0, "Batch size must be greater than 0");
    ensure!(
        config.num_epochs > 0,
        "Number of epochs must be greater than 0"
    );
    ensure!(config.learning_rate > 0.0, "Learning rate must be positive");
    ensure!(
        (0.0..1.0).contains(&config.valid_fraction),
        "Validation fraction must be in [0, 1)"
    );

    tracing::info!("Starting SINet training");
    tracing::info!("  Batch size: {}", config.batch_size);
    tracing::info!("  Number of epochs: {}", config.num_epochs);
    tracing::info!("  Learning rate: {}", config.learning_rate);
    tracing::info!(
        "  Loss weights: refined {}, coarse {}",
        config.loss.refined_weight,
        config.loss.coarse_weight
    );
    tracing::info!("  Dataset: {}", config.dataset.root);
    tracing::info!("  Artifact directory: {}", config.artifact_dir.display());

    std::fs::create_dir_all(&config.artifact_dir).with_context(|| {
        format!(
            "Failed to create artifact directory at {}",
            config.artifact_dir.display()
        )
    })?;

    let device = create_device();
    tracing::info!("Using backend: {}", get_backend_name());

    let model = create_model(&config, &device)?;
    let partition = model.parameter_partition();
    tracing::info!(
        "Parameters: {} trainable, {} frozen",
        partition.trainable,
        partition.frozen
    );

    let (train_dataset, valid_dataset) = create_datasets(&config)?;
    let (train_dataloader, valid_dataloader) =
        create_dataloaders(&config, train_dataset, valid_dataset);

    let learner = LearnerBuilder::new(&config.artifact_dir)
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .with_file_checkpointer(NamedMpkFileRecorder::<FullPrecisionSettings>::new())
        .devices(vec![device])
        .num_epochs(config.num_epochs)
        .summary()
        .build(model, AdamConfig::new().init(), config.learning_rate);

    let model_trained = learner.fit(train_dataloader, valid_dataloader);

    let final_path = config.artifact_dir.join("sinet");
    save_checkpoint(&model_trained, &final_path)
        .with_context(|| format!("Failed to save final model to {}", final_path.display()))?;

    tracing::info!("Training completed");
    Ok(())
}

fn create_model(config: &TrainingConfig, device: &SelectedDevice) -> Result<SINet<TrainBackend>> {
    let model = SINetConfig::new()
        .with_config(config.model.clone())
        .with_loss(config.loss.clone())
        .init::<TrainBackend>(device);

    let Some(weights) = &config.backbone_weights else {
        tracing::warn!("No backbone weights given, the backbone keeps its random initialization");
        return Ok(model);
    };

    #[cfg(feature = "pretrained")]
    {
        sinet_burn::load_backbone_weights(model, weights, device)
            .with_context(|| format!("Failed to load backbone weights from {}", weights.display()))
    }
    #[cfg(not(feature = "pretrained"))]
    {
        bail!(
            "Backbone weights {} need the `pretrained` feature",
            weights.display()
        )
    }
}

fn create_datasets(config: &TrainingConfig) -> Result<(CamoDataset, CamoDataset)> {
    let preprocessor = Preprocessor::new(config.preprocess.clone())?;

    let mut train_dataset = CamoDataset::new(&config.dataset, preprocessor)
        .with_context(|| format!("Failed to load dataset from {}", config.dataset.root))?;
    let valid_dataset = train_dataset.split_off(config.valid_fraction);

    if train_dataset.is_empty() {
        bail!("No training samples left after the validation split");
    }
    tracing::info!(
        "Dataset split: {} training, {} validation samples",
        train_dataset.len(),
        valid_dataset.len()
    );

    Ok((train_dataset, valid_dataset))
}

fn create_dataloaders(
    config: &TrainingConfig,
    train_dataset: CamoDataset,
    valid_dataset: CamoDataset,
) -> (
    Arc<dyn DataLoader<TrainBackend, CamoBatch<TrainBackend>>>,
    Arc<dyn DataLoader<SelectedBackend, CamoBatch<SelectedBackend>>>,
) {
    let batcher = CamoBatcher::new(train_dataset.preprocessor().clone());

    let train_dataloader = DataLoaderBuilder::new(batcher.clone())
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(train_dataset);

    let valid_dataloader = DataLoaderBuilder::new(batcher)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(valid_dataset);

    (train_dataloader, valid_dataloader)
}
