//! # SINet Model Implementation
//!
//! A ResNet backbone produces four feature stages (strides 4/8/16/32). Each
//! stage is re-encoded by a receptive field block into 32 channels, and two
//! partial decoders fuse them into probability maps at the input resolution:
//!
//! - the coarse map uses all four stages and serves as auxiliary supervision;
//! - the refined map uses the three deepest stages and is the deployed
//!   prediction.

use burn::{module::Ignored, prelude::*};
use resnet::{ResNetBackbone, ResNetConfig};

use super::{PartialDecoder, PartialDecoderConfig, RFBlock, RFBlockConfig, RFB_CHANNELS};
use crate::{
    config::ModelConfig,
    losses::{SINetLoss, SINetLossConfig},
};

/// Configuration for the `SINet` model.
#[derive(Config, Debug)]
pub struct SINetConfig {
    /// The detailed model configuration.
    #[config(default = "ModelConfig::new()")]
    pub config: ModelConfig,
    /// Deep-supervision loss used by the training and validation steps.
    /// Its weights are not stored in checkpoints.
    #[config(default = "SINetLossConfig::new()")]
    pub loss: SINetLossConfig,
}

impl SINetConfig {
    /// Initializes a `SINet` model with randomly initialized weights.
    ///
    /// When `freeze_backbone` is set (the default) the backbone parameters are
    /// excluded from gradient computation for the lifetime of the model.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SINet<B> {
        let backbone = ResNetConfig::new()
            .with_depth(self.config.backbone)
            .init(device);
        let [rf1, rf2, rf3, rf4] = backbone
            .output_channels()
            .map(|channels| RFBlockConfig::new(channels).init(device));

        let model = SINet {
            backbone,
            rf1,
            rf2,
            rf3,
            rf4,
            pdc_coarse: PartialDecoderConfig::new(vec![RFB_CHANNELS; 4]).init(device),
            pdc_refined: PartialDecoderConfig::new(vec![RFB_CHANNELS; 3]).init(device),
            loss: Ignored(self.loss.init()),
        };

        if self.config.freeze_backbone {
            model.freeze_backbone()
        } else {
            model
        }
    }
}

/// Both probability maps of one forward pass, each `[B, 1, H, W]` with the
/// spatial size of the input tensor and values in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct SINetOutput<B: Backend> {
    /// Auxiliary map fused from all four stages.
    pub coarse: Tensor<B, 4>,
    /// Primary map fused from stages 2-4.
    pub refined: Tensor<B, 4>,
}

/// Parameter counts of the two disjoint parameter sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterPartition {
    /// Parameters updated by the optimizer.
    pub trainable: usize,
    /// Parameters excluded from gradient computation.
    pub frozen: usize,
}

/// The SINet camouflaged object segmentation network.
#[derive(Module, Debug)]
pub struct SINet<B: Backend> {
    backbone: ResNetBackbone<B>,
    rf1: RFBlock<B>,
    rf2: RFBlock<B>,
    rf3: RFBlock<B>,
    rf4: RFBlock<B>,
    pdc_coarse: PartialDecoder<B>,
    pdc_refined: PartialDecoder<B>,
    loss: Ignored<SINetLoss>,
}

impl<B: Backend> SINet<B> {
    /// Runs the network on a `[B, 3, H, W]` batch.
    ///
    /// Both maps are resized to `[H, W]` regardless of how the backbone
    /// rounded the deeper stages, so inputs whose sides are not multiples
    /// of 32 are fine.
    pub fn forward(&self, x: Tensor<B, 4>) -> SINetOutput<B> {
        let [_, _, h, w] = x.dims();
        let [x1, x2, x3, x4] = self.backbone.forward(x);

        let f1 = self.rf1.forward(x1);
        let f2 = self.rf2.forward(x2);
        let f3 = self.rf3.forward(x3);
        let f4 = self.rf4.forward(x4);

        let coarse = self
            .pdc_coarse
            .forward(vec![f1, f2.clone(), f3.clone(), f4.clone()], [h, w]);
        let refined = self.pdc_refined.forward(vec![f2, f3, f4], [h, w]);

        SINetOutput { coarse, refined }
    }

    /// Disable gradient tracking for every backbone parameter.
    pub fn freeze_backbone(mut self) -> Self {
        self.backbone = self.backbone.no_grad();
        self
    }

    /// The backbone feature extractor.
    pub const fn backbone(&self) -> &ResNetBackbone<B> {
        &self.backbone
    }

    /// Swap in another backbone; its gradient flags are kept as they are.
    pub fn with_backbone(mut self, backbone: ResNetBackbone<B>) -> Self {
        self.backbone = backbone;
        self
    }

    /// The loss applied by the training and validation steps.
    pub fn loss(&self) -> &SINetLoss {
        &self.loss
    }

    /// Counts of trainable and frozen parameters, assuming the backbone is
    /// the frozen set.
    pub fn parameter_partition(&self) -> ParameterPartition {
        let frozen = self.backbone.num_params();
        ParameterPartition {
            trainable: self.num_params() - frozen,
            frozen,
        }
    }
}
