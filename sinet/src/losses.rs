//! Training losses.
//!
//! The refined map is the primary prediction; the coarse map is supervised
//! with a smaller weight as an auxiliary signal.

use burn::{
    config::Config,
    tensor::{backend::Backend, ElementConversion, Tensor},
};

use crate::models::SINetOutput;

/// Binary cross entropy on probabilities, compatible with PyTorch's
/// `F.binary_cross_entropy` (log terms clamped at -100, mean reduction).
#[derive(Debug, Clone, Copy, Default)]
pub struct BCELoss;

impl BCELoss {
    pub const fn new() -> Self {
        Self
    }

    /// # Panics
    ///
    /// Panics when `input` and `target` shapes differ.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
        target: Tensor<B, D>,
    ) -> Tensor<B, 1> {
        assert_eq!(
            input.shape(),
            target.shape(),
            "Input and target must have the same shape. Got input: {:?}, target: {:?}",
            input.shape(),
            target.shape()
        );

        let log_clamp_min = (-100.0_f32).elem::<B::FloatElem>();

        let log_input = input.clone().log().clamp_min(log_clamp_min);
        let log_one_minus_input = input.neg().add_scalar(1.0).log().clamp_min(log_clamp_min);

        let loss = -(target.clone() * log_input + target.neg().add_scalar(1.0) * log_one_minus_input);
        loss.mean()
    }
}

/// Configuration for [`SINetLoss`].
#[derive(Config, Debug)]
pub struct SINetLossConfig {
    /// Weight of the refined-map term.
    #[config(default = "1.0")]
    pub refined_weight: f64,
    /// Weight of the auxiliary coarse-map term.
    #[config(default = "0.5")]
    pub coarse_weight: f64,
}

impl SINetLossConfig {
    pub const fn init(&self) -> SINetLoss {
        SINetLoss {
            bce: BCELoss::new(),
            refined_weight: self.refined_weight,
            coarse_weight: self.coarse_weight,
        }
    }
}

/// Deep-supervision loss over both output heads:
/// `refined_weight * BCE(refined, gt) + coarse_weight * BCE(coarse, gt)`.
#[derive(Debug, Clone)]
pub struct SINetLoss {
    bce: BCELoss,
    refined_weight: f64,
    coarse_weight: f64,
}

impl SINetLoss {
    /// `target` must be `[B, 1, S, S]`, the spatial size of the model input,
    /// which is also the size of both heads.
    pub fn forward<B: Backend>(&self, output: &SINetOutput<B>, target: Tensor<B, 4>) -> Tensor<B, 1> {
        let refined = self.bce.forward(output.refined.clone(), target.clone());
        let coarse = self.bce.forward(output.coarse.clone(), target);

        refined.mul_scalar(self.refined_weight) + coarse.mul_scalar(self.coarse_weight)
    }
}
