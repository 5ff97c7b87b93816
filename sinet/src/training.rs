//! Training functionality for SINet.
//!
//! Implements Burn's `TrainStep` and `ValidStep` for [`SINet`] so the model
//! can be driven by a `Learner`. Only parameters with gradients enabled are
//! updated, which leaves a frozen backbone untouched.

use burn::{
    prelude::*,
    tensor::{
        backend::{AutodiffBackend, Backend},
        Transaction,
    },
    train::{
        metric::{Adaptor, ItemLazy, LossInput},
        TrainOutput, TrainStep, ValidStep,
    },
};

use crate::{
    dataset::CamoBatch,
    models::{SINet, SINetOutput},
};

/// Output of one training or validation step.
#[derive(Debug, Clone)]
pub struct SINetTrainOutput<B: Backend> {
    /// Deep-supervision loss of the batch.
    pub loss: Tensor<B, 1>,
    /// Refined probability map `[B, 1, S, S]`.
    pub output: Tensor<B, 4>,
    /// Ground-truth mask `[B, 1, S, S]`.
    pub target: Tensor<B, 4>,
}

impl<B: Backend> SINet<B> {
    /// Forward pass followed by the deep-supervision loss configured in
    /// [`SINetConfig::loss`](crate::models::SINetConfig::loss).
    pub fn forward_loss(&self, batch: CamoBatch<B>) -> SINetTrainOutput<B> {
        let output: SINetOutput<B> = self.forward(batch.images);
        let loss = self.loss().forward(&output, batch.masks.clone());

        SINetTrainOutput {
            loss,
            output: output.refined,
            target: batch.masks,
        }
    }
}

impl<B: AutodiffBackend> TrainStep<CamoBatch<B>, SINetTrainOutput<B>> for SINet<B> {
    fn step(&self, batch: CamoBatch<B>) -> TrainOutput<SINetTrainOutput<B>> {
        let item = self.forward_loss(batch);
        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<CamoBatch<B>, SINetTrainOutput<B>> for SINet<B> {
    fn step(&self, batch: CamoBatch<B>) -> SINetTrainOutput<B> {
        self.forward_loss(batch)
    }
}

impl<B: Backend> ItemLazy for SINetTrainOutput<B> {
    type ItemSync = Self;

    fn sync(self) -> Self::ItemSync {
        let [loss, output, target] = Transaction::default()
            .register(self.loss)
            .register(self.output)
            .register(self.target)
            .execute()
            .try_into()
            .unwrap_or_else(|_| panic!("Transaction must yield [loss, output, target]"));

        let device = &Default::default();

        Self {
            loss: Tensor::from_data(loss, device),
            output: Tensor::from_data(output, device),
            target: Tensor::from_data(target, device),
        }
    }
}

impl<B: Backend> Adaptor<LossInput<B>> for SINetTrainOutput<B> {
    fn adapt(&self) -> LossInput<B> {
        LossInput::new(self.loss.clone())
    }
}
