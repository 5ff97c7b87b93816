//! # SINet-Burn
//!
//! Camouflaged object detection with a SINet-style network on the Burn
//! framework. A ResNet backbone feeds four receptive field blocks and two
//! partial decoders, yielding a coarse and a refined probability map; the
//! [`geometry`] module letterboxes arbitrary images into the square model
//! input and maps the refined map back onto the original pixel grid.
//!
//! The [`Detector`] type bundles a loaded model with its preprocessing
//! settings and is the entry point for inference. Training support lives
//! behind the `train` feature, PyTorch weight import behind `pretrained`.

mod checkpoint;
mod config;
mod error;
pub mod geometry;
mod inference;
mod losses;
mod models;
pub mod visualize;

#[cfg(feature = "train")]
mod dataset;
#[cfg(feature = "train")]
mod training;

pub use checkpoint::*;
pub use config::*;
pub use error::{SINetError, SINetResult};
pub use geometry::{PreprocessMeta, Preprocessor, Threshold};
pub use inference::{decode_image, DetectionVisuals, Detector};
pub use losses::{BCELoss, SINetLoss, SINetLossConfig};
pub use models::{
    ParameterPartition, PartialDecoder, PartialDecoderConfig, RFBlock, RFBlockConfig, SINet,
    SINetConfig, SINetOutput, SINetRecord, RFB_CHANNELS,
};

#[cfg(feature = "train")]
pub use dataset::*;
#[cfg(feature = "train")]
pub use training::SINetTrainOutput;
