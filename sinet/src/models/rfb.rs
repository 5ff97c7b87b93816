use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        PaddingConfig2d, Relu,
    },
    prelude::*,
};

/// Output width of every receptive field block.
pub const RFB_CHANNELS: usize = 32;

/// Configuration for [`RFBlock`].
#[derive(Config, Debug)]
pub struct RFBlockConfig {
    in_channels: usize,
    #[config(default = "RFB_CHANNELS")]
    out_channels: usize,
}

impl RFBlockConfig {
    /// Initializes a `RFBlock` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> RFBlock<B> {
        let branch = |kernel: usize, dilation: usize| {
            Conv2dConfig::new([self.in_channels, self.out_channels], [kernel, kernel])
                .with_dilation([dilation, dilation])
                .with_padding(PaddingConfig2d::Explicit(
                    dilation * (kernel / 2),
                    dilation * (kernel / 2),
                ))
                .init(device)
        };

        RFBlock {
            b1: branch(1, 1),
            b2: branch(3, 1),
            b3: branch(3, 2),
            b4: branch(3, 3),
            fuse: Conv2dConfig::new([self.out_channels * 4, self.out_channels], [1, 1])
                .init(device),
            relu: Relu::new(),
        }
    }
}

/// Receptive field block.
///
/// Four parallel branches look at the same feature map with effective
/// receptive fields of 1, 3, 5 and 7 pixels (a 1x1 conv and 3x3 convs with
/// dilation 1, 2 and 3). Each branch is rectified, the results are
/// concatenated and a 1x1 conv fuses them back to `out_channels`. Spatial
/// resolution is preserved.
#[derive(Module, Debug)]
pub struct RFBlock<B: Backend> {
    b1: Conv2d<B>,
    b2: Conv2d<B>,
    b3: Conv2d<B>,
    b4: Conv2d<B>,
    fuse: Conv2d<B>,
    relu: Relu,
}

impl<B: Backend> RFBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let branches = [&self.b1, &self.b2, &self.b3, &self.b4]
            .into_iter()
            .map(|conv| self.relu.forward(conv.forward(x.clone())))
            .collect();

        self.fuse.forward(Tensor::cat(branches, 1))
    }
}
