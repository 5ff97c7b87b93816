//! JSON run configurations for the demo binaries.
//!
//! Every field has a default, so a config file only needs the keys it wants
//! to change. Command-line flags override the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sinet_burn::{DatasetConfig, InferenceConfig, ModelConfig, PreprocessConfig, SINetLossConfig};

/// Read a JSON config from `path`, or fall back to the defaults.
pub fn load_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Configuration of the `train` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub preprocess: PreprocessConfig,
    pub dataset: DatasetConfig,
    /// Weights of the refined and auxiliary coarse loss terms.
    pub loss: SINetLossConfig,
    pub num_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Share of the pairs held out for validation.
    pub valid_fraction: f64,
    pub num_workers: usize,
    /// Shuffle seed of the training loader.
    pub seed: u64,
    /// Directory receiving per-epoch checkpoints and the final model.
    pub artifact_dir: PathBuf,
    /// Torchvision ResNet weights for the backbone (needs `pretrained`).
    pub backbone_weights: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::new(),
            preprocess: PreprocessConfig::new(),
            dataset: DatasetConfig::new("datasets/COD10K_subset".to_string())
                .with_max_samples(Some(300)),
            loss: SINetLossConfig::new(),
            num_epochs: 10,
            batch_size: 3,
            learning_rate: 1e-4,
            valid_fraction: 0.1,
            num_workers: 1,
            seed: 42,
            artifact_dir: PathBuf::from("weights"),
            backbone_weights: None,
        }
    }
}

/// Configuration of the `inference` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceRunConfig {
    pub model: ModelConfig,
    pub inference: InferenceConfig,
    pub output_dir: PathBuf,
    /// Also write overlay, bounding box, crop, heatmap and composite images.
    pub save_visuals: bool,
}

impl Default for InferenceRunConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::new(),
            inference: InferenceConfig::new(),
            output_dir: PathBuf::from("outputs"),
            save_visuals: false,
        }
    }
}

/// Configuration of the `make_subset` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsetConfig {
    pub source: DatasetConfig,
    pub dest: PathBuf,
    pub count: usize,
    pub seed: u64,
}

impl Default for SubsetConfig {
    fn default() -> Self {
        Self {
            source: DatasetConfig::new("datasets/COD10K_full".to_string()),
            dest: PathBuf::from("datasets/COD10K_subset"),
            count: 500,
            seed: 42,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_training_defaults() {
        let config = TrainingConfig::default();
        assert_eq!(config.num_epochs, 10);
        assert_eq!(config.batch_size, 3);
        assert!((config.learning_rate - 1e-4).abs() < f64::EPSILON);
        assert_eq!(config.dataset.max_samples, Some(300));
        assert_eq!(config.preprocess.target_side, 352);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"num_epochs": 3, "save_visuals": true}}"#).unwrap();

        let training: TrainingConfig = load_or_default(Some(file.path())).unwrap();
        assert_eq!(training.num_epochs, 3);
        assert_eq!(training.batch_size, 3);

        let inference: InferenceRunConfig = load_or_default(Some(file.path())).unwrap();
        assert!(inference.save_visuals);
        assert!((inference.inference.threshold - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_loss_weights_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"loss": {{"refined_weight": 1.0, "coarse_weight": 2.0}}}}"#
        )
        .unwrap();

        let training: TrainingConfig = load_or_default(Some(file.path())).unwrap();
        assert!((training.loss.coarse_weight - 2.0).abs() < f64::EPSILON);

        let defaults = TrainingConfig::default();
        assert!((defaults.loss.coarse_weight - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_file_is_error() {
        let result: Result<SubsetConfig> = load_or_default(Some(Path::new("does/not/exist.json")));
        assert!(result.is_err());

        let defaults: SubsetConfig = load_or_default(None).unwrap();
        assert_eq!(defaults.count, 500);
        assert_eq!(defaults.seed, 42);
    }
}
