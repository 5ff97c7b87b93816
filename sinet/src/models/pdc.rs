use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        PaddingConfig2d,
    },
    prelude::*,
    tensor::{
        activation::sigmoid,
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

use super::rfb::RFB_CHANNELS;

/// Configuration for [`PartialDecoder`].
#[derive(Config, Debug)]
pub struct PartialDecoderConfig {
    /// Channel width of each input feature, in input order.
    in_channels: Vec<usize>,
    #[config(default = "RFB_CHANNELS")]
    inter_channels: usize,
}

impl PartialDecoderConfig {
    /// Initializes a `PartialDecoder` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> PartialDecoder<B> {
        let convs = self
            .in_channels
            .iter()
            .map(|&channels| {
                Conv2dConfig::new([channels, self.inter_channels], [3, 3])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .init(device)
            })
            .collect();

        let project =
            Conv2dConfig::new([self.inter_channels * self.in_channels.len(), 1], [1, 1])
                .init(device);

        PartialDecoder { convs, project }
    }
}

/// Partial decoder fusion.
///
/// Each input feature gets its own 3x3 conv and is bilinearly resized to the
/// requested output size; the stack is projected to one channel by a 1x1
/// conv and squashed with a sigmoid.
#[derive(Module, Debug)]
pub struct PartialDecoder<B: Backend> {
    convs: Vec<Conv2d<B>>,
    project: Conv2d<B>,
}

impl<B: Backend> PartialDecoder<B> {
    /// Fuse `features` into a `[B, 1, H, W]` probability map where
    /// `[H, W] = out_size`.
    ///
    /// # Panics
    ///
    /// Panics if the number of features differs from the number the decoder
    /// was built for.
    pub fn forward(&self, features: Vec<Tensor<B, 4>>, out_size: [usize; 2]) -> Tensor<B, 4> {
        assert_eq!(
            features.len(),
            self.convs.len(),
            "PartialDecoder expects {} features, got {}",
            self.convs.len(),
            features.len()
        );

        let upsampled = features
            .into_iter()
            .zip(&self.convs)
            .map(|(feature, conv)| {
                interpolate(
                    conv.forward(feature),
                    out_size,
                    InterpolateOptions::new(InterpolateMode::Bilinear),
                )
            })
            .collect();

        sigmoid(self.project.forward(Tensor::cat(upsampled, 1)))
    }

    /// Number of input features this decoder fuses.
    pub fn num_inputs(&self) -> usize {
        self.convs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn pyramid(device: &<TestBackend as Backend>::Device, sides: &[usize]) -> Vec<Tensor<TestBackend, 4>> {
        sides
            .iter()
            .map(|&side| {
                Tensor::<TestBackend, 4>::random(
                    [1, RFB_CHANNELS, side, side],
                    burn::tensor::Distribution::Normal(0.0, 1.0),
                    device,
                )
            })
            .collect()
    }

    #[test]
    fn test_pdc_output_shape_and_range() {
        let device = Default::default();
        let pdc = PartialDecoderConfig::new(vec![RFB_CHANNELS; 4]).init::<TestBackend>(&device);
        assert_eq!(pdc.num_inputs(), 4);

        let out = pdc.forward(pyramid(&device, &[16, 8, 4, 2]), [64, 64]);
        assert_eq!(out.dims(), [1, 1, 64, 64]);

        let values = out.into_data();
        assert!(values
            .iter::<f32>()
            .all(|v| v.is_finite() && (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_pdc_non_square_output() {
        let device = Default::default();
        let pdc = PartialDecoderConfig::new(vec![RFB_CHANNELS; 3]).init::<TestBackend>(&device);

        let out = pdc.forward(pyramid(&device, &[13, 7, 4]), [100, 60]);
        assert_eq!(out.dims(), [1, 1, 100, 60]);
    }

    #[test]
    #[should_panic(expected = "PartialDecoder expects 3 features, got 4")]
    fn test_pdc_rejects_wrong_feature_count() {
        let device = Default::default();
        let pdc = PartialDecoderConfig::new(vec![RFB_CHANNELS; 3]).init::<TestBackend>(&device);

        pdc.forward(pyramid(&device, &[16, 8, 4, 2]), [64, 64]);
    }
}
