//! ResNet backbone for SINet.
//!
//! Only the basic-block variants (ResNet-18 and ResNet-34) are provided: both
//! produce the 64/128/256/512-channel pyramid the SINet fusion stages are
//! built around. The layout mirrors torchvision's `ResNet` so that ImageNet
//! weights can be imported parameter-for-parameter.

use burn::nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{MaxPool2d, MaxPool2dConfig},
    BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu,
};
use burn::prelude::*;
use core::f64::consts::SQRT_2;

mod blocks;
pub use blocks::*;

const RESNET18_BLOCKS: [usize; 4] = [2, 2, 2, 2];
const RESNET34_BLOCKS: [usize; 4] = [3, 4, 6, 3];

/// Channel width of each stage output.
pub const STAGE_CHANNELS: [usize; 4] = [64, 128, 256, 512];

/// Spatial stride of each stage output relative to the input.
pub const STAGE_STRIDES: [usize; 4] = [4, 8, 16, 32];

/// Supported network depths.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum ResNetDepth {
    /// ResNet-18, `[2, 2, 2, 2]` basic blocks.
    ResNet18,
    /// ResNet-34, `[3, 4, 6, 3]` basic blocks.
    ResNet34,
}

impl ResNetDepth {
    const fn blocks(self) -> [usize; 4] {
        match self {
            Self::ResNet18 => RESNET18_BLOCKS,
            Self::ResNet34 => RESNET34_BLOCKS,
        }
    }
}

/// Configuration for [`ResNetBackbone`].
#[derive(Config, Debug)]
pub struct ResNetConfig {
    #[config(default = "ResNetDepth::ResNet18")]
    pub depth: ResNetDepth,
}

impl ResNetConfig {
    /// Initialize the backbone with Kaiming-normal convolution weights.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNetBackbone<B> {
        ResNetBackbone::new(self.depth.blocks(), device)
    }
}

/// Four-stage ResNet feature extractor.
///
/// Stage outputs have strides 4, 8, 16 and 32 with 64, 128, 256 and 512
/// channels. Inputs whose side is not a multiple of 32 are accepted; the
/// deeper stages simply round their resolution down.
#[derive(Module, Debug)]
pub struct ResNetBackbone<B: Backend> {
    // conv1 + bn1 + relu + maxpool
    pub conv1_block: Conv1Block<B>,
    pub layer1: LayerBlock<B>,
    pub layer2: LayerBlock<B>,
    pub layer3: LayerBlock<B>,
    pub layer4: LayerBlock<B>,
}

impl<B: Backend> ResNetBackbone<B> {
    /// Returns `[stage1, stage2, stage3, stage4]`.
    pub fn forward(&self, input: Tensor<B, 4>) -> [Tensor<B, 4>; 4] {
        let x = self.conv1_block.forward(input);
        let x1 = self.layer1.forward(x);
        let x2 = self.layer2.forward(x1.clone());
        let x3 = self.layer3.forward(x2.clone());
        let x4 = self.layer4.forward(x3.clone());

        [x1, x2, x3, x4]
    }

    /// Channel width of each stage output.
    pub const fn output_channels(&self) -> [usize; 4] {
        STAGE_CHANNELS
    }

    /// Create a ResNet-18 backbone.
    pub fn resnet18(device: &Device<B>) -> Self {
        Self::new(RESNET18_BLOCKS, device)
    }

    /// Create a ResNet-34 backbone.
    pub fn resnet34(device: &Device<B>) -> Self {
        Self::new(RESNET34_BLOCKS, device)
    }

    fn new(blocks: [usize; 4], device: &Device<B>) -> Self {
        let [c1, c2, c3, c4] = STAGE_CHANNELS;

        Self {
            conv1_block: Conv1Block::new(3, c1, device),
            layer1: LayerBlock::new(blocks[0], c1, c1, 1, device),
            layer2: LayerBlock::new(blocks[1], c1, c2, 2, device),
            layer3: LayerBlock::new(blocks[2], c2, c3, 2, device),
            layer4: LayerBlock::new(blocks[3], c3, c4, 2, device),
        }
    }
}

/// Stem: 7x7/2 conv, batch norm, relu, 3x3/2 max pool.
#[derive(Module, Debug)]
pub struct Conv1Block<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
    maxpool: MaxPool2d,
}

impl<B: Backend> Conv1Block<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv1.forward(input);
        let out = self.bn1.forward(out);
        let out = self.relu.forward(out);
        self.maxpool.forward(out)
    }

    pub fn new(in_channels: usize, out_channels: usize, device: &Device<B>) -> Self {
        let initializer = Initializer::KaimingNormal {
            gain: SQRT_2,
            fan_out_only: true,
        };

        let conv1 = Conv2dConfig::new([in_channels, out_channels], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .with_initializer(initializer)
            .init(device);

        let bn1 = BatchNormConfig::new(out_channels).init(device);

        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        Self {
            conv1,
            bn1,
            relu: Relu::new(),
            maxpool,
        }
    }
}
