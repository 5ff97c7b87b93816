//! Inference context.
//!
//! A [`Detector`] is built once, typically at process start, and then
//! shared by reference. It owns the weights and never mutates them, so every
//! call is a pure function of the weights and the input image.

use std::path::Path;

use burn::tensor::backend::Backend;
use image::{DynamicImage, GrayImage, RgbImage};

use crate::{
    checkpoint::load_weights,
    config::InferenceConfig,
    error::{SINetError, SINetResult},
    geometry::{postprocess_tensor, PreprocessMeta, Preprocessor, Threshold},
    models::{SINet, SINetConfig, SINetOutput},
    visualize,
};

/// Auxiliary images produced alongside a mask.
#[derive(Debug, Clone)]
pub struct DetectionVisuals {
    /// Binary mask at the original image size.
    pub mask: GrayImage,
    /// Red-tinted foreground over the original.
    pub overlay: RgbImage,
    /// Original with a green box around the mask extent.
    pub bounding_box: RgbImage,
    /// Crop of the original to the mask extent, `None` when nothing was found.
    pub crop: Option<RgbImage>,
    /// Jet false-color rendering of the mask.
    pub heatmap: RgbImage,
    /// `original | mask | overlay`.
    pub combined: RgbImage,
}

/// A loaded model together with its preprocessing settings.
#[derive(Debug)]
pub struct Detector<B: Backend> {
    model: SINet<B>,
    preprocessor: Preprocessor,
    default_threshold: Threshold,
    device: B::Device,
}

impl<B: Backend> Detector<B> {
    /// Wrap an already constructed model.
    ///
    /// # Errors
    ///
    /// Returns the validation error of an inconsistent `config`.
    pub fn new(model: SINet<B>, config: InferenceConfig, device: B::Device) -> SINetResult<Self> {
        config.validate()?;
        let default_threshold = config.default_threshold()?;

        Ok(Self {
            model,
            preprocessor: Preprocessor::new(config.preprocess)?,
            default_threshold,
            device,
        })
    }

    /// Build the network from `model_config` and load its weights from
    /// `path` (`.mpk`, or `.pth` with the `pretrained` feature).
    ///
    /// # Errors
    ///
    /// Propagates configuration and weight-loading errors.
    pub fn from_checkpoint(
        model_config: &SINetConfig,
        path: &Path,
        config: InferenceConfig,
        device: B::Device,
    ) -> SINetResult<Self> {
        let model = load_weights(model_config, path, &device)?;
        tracing::info!(
            "Detector ready (input side {}, threshold {})",
            config.preprocess.target_side,
            config.threshold
        );
        Self::new(model, config, device)
    }

    pub const fn model(&self) -> &SINet<B> {
        &self.model
    }

    pub const fn device(&self) -> &B::Device {
        &self.device
    }

    pub const fn default_threshold(&self) -> Threshold {
        self.default_threshold
    }

    /// Run the network on `image` and return both raw maps together with
    /// the letterbox record needed to map them back.
    pub fn predict_maps(&self, image: &RgbImage) -> (SINetOutput<B>, PreprocessMeta) {
        let (input, meta) = self.preprocessor.preprocess::<B>(image, &self.device);

        let _span = tracing::debug_span!("forward").entered();
        (self.model.forward(input), meta)
    }

    /// Binary mask (0 or 255) of camouflaged pixels at the size of `image`.
    ///
    /// # Errors
    ///
    /// Returns [`SINetError::TensorOperationFailed`] if the refined map
    /// cannot be read back.
    pub fn detect(&self, image: &DynamicImage, threshold: Threshold) -> SINetResult<GrayImage> {
        self.detect_rgb(&image.to_rgb8(), threshold)
    }

    /// Decode PNG or JPEG bytes and run [`Self::detect`].
    ///
    /// # Errors
    ///
    /// Undecodable bytes yield [`SINetError::InvalidImage`], a client error.
    pub fn detect_bytes(&self, bytes: &[u8], threshold: Threshold) -> SINetResult<GrayImage> {
        self.detect(&decode_image(bytes)?, threshold)
    }

    /// Mask plus every auxiliary visualization derived from it.
    ///
    /// # Errors
    ///
    /// Same as [`Self::detect`].
    pub fn detect_with_visuals(
        &self,
        image: &DynamicImage,
        threshold: Threshold,
    ) -> SINetResult<DetectionVisuals> {
        let original = image.to_rgb8();
        let mask = self.detect_rgb(&original, threshold)?;

        let overlay = visualize::overlay(&original, &mask)?;
        let combined = visualize::side_by_side(&original, &mask, &overlay)?;

        Ok(DetectionVisuals {
            bounding_box: visualize::draw_bounding_box(&original, &mask)?,
            crop: visualize::crop_to_mask(&original, &mask)?,
            heatmap: visualize::heatmap(&mask),
            overlay,
            combined,
            mask,
        })
    }

    fn detect_rgb(&self, image: &RgbImage, threshold: Threshold) -> SINetResult<GrayImage> {
        let (output, meta) = self.predict_maps(image);
        postprocess_tensor(output.refined, &meta, threshold)
    }
}

/// Decode an encoded image, sniffing the format from its content.
///
/// # Errors
///
/// Returns [`SINetError::InvalidImage`] for unknown or corrupt data.
pub fn decode_image(bytes: &[u8]) -> SINetResult<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| SINetError::InvalidImage {
        reason: e.to_string(),
    })
}
