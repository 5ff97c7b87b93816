//! Configuration structures for SINet.
//!
//! Architecture constants (stage widths, the 32-channel fusion width) are not
//! configurable; these structs only carry deployment and construction
//! choices. All of them derive `burn::Config`, so they can be saved to and
//! loaded from JSON.

use burn::prelude::*;
pub use resnet::ResNetDepth;

use crate::{
    error::{SINetError, SINetResult},
    geometry::Threshold,
};

/// ImageNet per-channel mean.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet per-channel standard deviation.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Construction options for the SINet model.
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// Backbone depth. Both supported depths yield 64/128/256/512 channels.
    #[config(default = "ResNetDepth::ResNet18")]
    pub backbone: ResNetDepth,
    /// Exclude backbone parameters from gradient computation.
    #[config(default = "true")]
    pub freeze_backbone: bool,
}

/// Letterbox preprocessing settings.
#[derive(Config, Debug)]
pub struct PreprocessConfig {
    /// Side length `S` of the square model input.
    #[config(default = "352")]
    pub target_side: u32,
    /// Per-channel normalization mean (RGB).
    #[config(default = "IMAGENET_MEAN")]
    pub mean: [f32; 3],
    /// Per-channel normalization standard deviation (RGB).
    #[config(default = "IMAGENET_STD")]
    pub std: [f32; 3],
}

impl PreprocessConfig {
    /// Smallest side the model runs at on every backend.
    ///
    /// The stride-32 stage map must be at least as wide as the 3-pixel
    /// padding of the widest dilated receptive field branch, so `S / 32 >= 3`.
    pub const MIN_TARGET_SIDE: u32 = 96;

    /// Check the settings before they are used to build a preprocessor.
    ///
    /// # Errors
    ///
    /// Returns `Err(SINetError::InvalidConfiguration)` when the side is below
    /// [`Self::MIN_TARGET_SIDE`] or a standard deviation is not strictly positive.
    pub fn validate(&self) -> SINetResult<()> {
        if self.target_side < Self::MIN_TARGET_SIDE {
            return Err(SINetError::InvalidConfiguration {
                reason: format!(
                    "target_side must be >= {}, got {}",
                    Self::MIN_TARGET_SIDE,
                    self.target_side
                ),
            });
        }

        if let Some(std) = self.std.iter().find(|s| !(**s > 0.0)) {
            return Err(SINetError::InvalidConfiguration {
                reason: format!("normalization std must be positive, got {std}"),
            });
        }

        Ok(())
    }
}

/// Settings of an inference deployment.
#[derive(Config, Debug)]
pub struct InferenceConfig {
    #[config(default = "PreprocessConfig::new()")]
    pub preprocess: PreprocessConfig,
    /// Binarization threshold used when the caller does not supply one.
    #[config(default = "0.5")]
    pub threshold: f32,
}

impl InferenceConfig {
    /// Validate the preprocessing settings and the default threshold.
    ///
    /// # Errors
    ///
    /// Propagates [`PreprocessConfig::validate`] errors and returns
    /// `Err(SINetError::InvalidThreshold)` for a threshold outside `[0, 1]`.
    pub fn validate(&self) -> SINetResult<()> {
        self.preprocess.validate()?;
        self.default_threshold().map(|_| ())
    }

    /// The configured threshold as a validated [`Threshold`].
    pub fn default_threshold(&self) -> SINetResult<Threshold> {
        Threshold::new(self.threshold)
    }
}
