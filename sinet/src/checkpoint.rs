//! Persisting and restoring model weights.
//!
//! Native checkpoints use Burn's named MessagePack format. With the
//! `pretrained` feature, PyTorch `.pth` files are accepted as well, both as
//! `{"state_dict": {...}}` and as a raw parameter map, together with
//! torchvision ResNet weights for the backbone alone.
//!
//! Every load is followed by a comparison of all parameter shapes against
//! the freshly built architecture, so a checkpoint for a different network
//! fails loudly instead of producing garbage.

use std::path::Path;

use burn::{
    module::{Module, ModuleVisitor, ParamId},
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::{backend::Backend, Tensor},
};

use crate::{
    error::{SINetError, SINetResult},
    models::{SINet, SINetConfig, SINetRecord},
};

/// Recorder used for native checkpoints.
pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// File extension appended by [`CheckpointRecorder`].
pub const CHECKPOINT_EXTENSION: &str = "mpk";

#[derive(Default)]
struct ShapeCollector {
    shapes: Vec<Vec<usize>>,
}

impl<B: Backend> ModuleVisitor<B> for ShapeCollector {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        self.shapes.push(tensor.dims().to_vec());
    }
}

/// Shapes of all float parameters of `module`, in traversal order.
pub fn parameter_shapes<B: Backend, M: Module<B>>(module: &M) -> Vec<Vec<usize>> {
    let mut collector = ShapeCollector::default();
    module.visit(&mut collector);
    collector.shapes
}

/// Compare two shape lists element by element.
///
/// # Errors
///
/// Returns [`SINetError::ShapeMismatch`] for the first differing position. A
/// parameter missing on one side is reported with an empty shape.
pub fn ensure_same_shapes(expected: &[Vec<usize>], actual: &[Vec<usize>]) -> SINetResult<()> {
    let count = expected.len().max(actual.len());
    for index in 0..count {
        let want = expected.get(index);
        let got = actual.get(index);
        if want != got {
            return Err(SINetError::ShapeMismatch {
                index,
                expected: want.cloned().unwrap_or_default(),
                actual: got.cloned().unwrap_or_default(),
            });
        }
    }
    Ok(())
}

/// Load `record` into `module` and verify that no parameter changed shape.
///
/// # Errors
///
/// Returns [`SINetError::ShapeMismatch`] when the record does not fit.
pub fn load_checked<B: Backend, M: Module<B>>(module: M, record: M::Record) -> SINetResult<M> {
    let expected = parameter_shapes::<B, M>(&module);
    let loaded = module.load_record(record);
    ensure_same_shapes(&expected, &parameter_shapes::<B, M>(&loaded))?;
    Ok(loaded)
}

/// Save `model` to `path` (the `.mpk` extension is added by the recorder).
///
/// # Errors
///
/// Returns [`SINetError::Io`] when the file cannot be written.
pub fn save_checkpoint<B: Backend>(model: &SINet<B>, path: &Path) -> SINetResult<()> {
    model
        .clone()
        .save_file(path.to_path_buf(), &CheckpointRecorder::new())
        .map_err(|e| {
            SINetError::Io(std::io::Error::other(format!(
                "failed to save checkpoint {}: {e:?}",
                path.display()
            )))
        })?;

    tracing::info!("Saved checkpoint to {}", path.display());
    Ok(())
}

/// Build a model from `config` and fill it with a native checkpoint.
///
/// # Errors
///
/// Returns [`SINetError::WeightLoadingFailed`] when the file cannot be read or
/// decoded, and [`SINetError::ShapeMismatch`] when it belongs to a different
/// architecture.
pub fn load_checkpoint<B: Backend>(
    config: &SINetConfig,
    path: &Path,
    device: &B::Device,
) -> SINetResult<SINet<B>> {
    let record: SINetRecord<B> = CheckpointRecorder::new()
        .load(path.to_path_buf(), device)
        .map_err(|e| SINetError::WeightLoadingFailed {
            reason: format!("{}: {e:?}", path.display()),
        })?;

    let model = finish_load(config, load_checked(config.init(device), record)?);
    tracing::info!("Loaded checkpoint from {}", path.display());
    Ok(model)
}

/// Load weights from `path`, choosing the reader by file extension:
/// `.pth`/`.pt` are PyTorch files, anything else is a native checkpoint.
///
/// # Errors
///
/// See [`load_checkpoint`]. PyTorch files require the `pretrained` feature.
pub fn load_weights<B: Backend>(
    config: &SINetConfig,
    path: &Path,
    device: &B::Device,
) -> SINetResult<SINet<B>> {
    let is_pytorch = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pth") || ext.eq_ignore_ascii_case("pt"));

    if !is_pytorch {
        return load_checkpoint(config, path, device);
    }

    #[cfg(feature = "pretrained")]
    {
        pytorch::load_pytorch_checkpoint(config, path, device)
    }
    #[cfg(not(feature = "pretrained"))]
    {
        Err(SINetError::WeightLoadingFailed {
            reason: format!(
                "{} is a PyTorch file; rebuild with the `pretrained` feature to read it",
                path.display()
            ),
        })
    }
}

fn finish_load<B: Backend>(config: &SINetConfig, model: SINet<B>) -> SINet<B> {
    if config.config.freeze_backbone {
        model.freeze_backbone()
    } else {
        model
    }
}

#[cfg(feature = "pretrained")]
pub use pytorch::{load_backbone_weights, load_pytorch_checkpoint};

#[cfg(feature = "pretrained")]
mod pytorch {
    use std::path::Path;

    use burn::{
        record::{FullPrecisionSettings, Record, Recorder},
        tensor::backend::Backend,
    };
    use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
    use resnet::ResNetBackboneRecord;

    use super::{finish_load, load_checked};
    use crate::{
        error::{SINetError, SINetResult},
        models::{SINet, SINetConfig, SINetRecord},
    };

    /// Parameter renames from the PyTorch module tree to this crate's.
    const SINET_KEY_REMAP: [(&str, &str); 9] = [
        (r"^stem\.0\.(.+)", "backbone.conv1_block.conv1.$1"),
        (r"^stem\.1\.(.+)", "backbone.conv1_block.bn1.$1"),
        (
            r"^layer([1-4])\.([0-9]+)\.downsample\.0\.(.+)",
            "backbone.layer$1.blocks.$2.downsample.conv.$3",
        ),
        (
            r"^layer([1-4])\.([0-9]+)\.downsample\.1\.(.+)",
            "backbone.layer$1.blocks.$2.downsample.bn.$3",
        ),
        (r"^layer([1-4])\.([0-9]+)\.(.+)", "backbone.layer$1.blocks.$2.$3"),
        (r"^rf([1-4])\.(b[1-4])\.0\.(.+)", "rf$1.$2.$3"),
        (r"^pdc_s\.", "pdc_coarse."),
        (r"^pdc_i\.", "pdc_refined."),
        (r"\.final\.", ".project."),
    ];

    /// Torchvision ResNet names; `fc.*` has no counterpart and is ignored.
    const TORCHVISION_KEY_REMAP: [(&str, &str); 5] = [
        (r"^conv1\.(.+)", "conv1_block.conv1.$1"),
        (r"^bn1\.(.+)", "conv1_block.bn1.$1"),
        (
            r"^layer([1-4])\.([0-9]+)\.downsample\.0\.(.+)",
            "layer$1.blocks.$2.downsample.conv.$3",
        ),
        (
            r"^layer([1-4])\.([0-9]+)\.downsample\.1\.(.+)",
            "layer$1.blocks.$2.downsample.bn.$3",
        ),
        (r"^layer([1-4])\.([0-9]+)\.(.+)", "layer$1.blocks.$2.$3"),
    ];

    fn load_args(path: &Path, remap: &[(&str, &str)]) -> LoadArgs {
        remap
            .iter()
            .fold(LoadArgs::new(path.to_path_buf()), |args, (pattern, replacement)| {
                args.with_key_remap(pattern, replacement)
            })
    }

    /// Read a record from `{"state_dict": {...}}`, falling back to a bare
    /// parameter map.
    fn load_state_dict<B: Backend, R: Record<B>>(
        path: &Path,
        remap: &[(&str, &str)],
        device: &B::Device,
    ) -> SINetResult<R> {
        let recorder = PyTorchFileRecorder::<FullPrecisionSettings>::default();

        let wrapped = load_args(path, remap).with_top_level_key("state_dict");
        match recorder.load(wrapped, device) {
            Ok(record) => Ok(record),
            Err(wrapped_err) => {
                tracing::debug!("No usable `state_dict` entry, reading raw parameter map");
                recorder
                    .load(load_args(path, remap), device)
                    .map_err(|raw_err| SINetError::WeightLoadingFailed {
                        reason: format!(
                            "{}: as state_dict: {wrapped_err:?}; as raw map: {raw_err:?}",
                            path.display()
                        ),
                    })
            }
        }
    }

    /// Load a PyTorch SINet checkpoint, with or without a `state_dict`
    /// wrapper.
    ///
    /// # Errors
    ///
    /// Returns [`SINetError::WeightLoadingFailed`] when neither layout can be
    /// decoded and [`SINetError::ShapeMismatch`] when a tensor does not fit.
    pub fn load_pytorch_checkpoint<B: Backend>(
        config: &SINetConfig,
        path: &Path,
        device: &B::Device,
    ) -> SINetResult<SINet<B>> {
        let record = load_state_dict::<B, SINetRecord<B>>(path, &SINET_KEY_REMAP, device)?;

        let model = finish_load(config, load_checked(config.init(device), record)?);
        tracing::info!("Loaded PyTorch checkpoint from {}", path.display());
        Ok(model)
    }

    /// Replace the backbone of `model` with torchvision ImageNet weights.
    ///
    /// # Errors
    ///
    /// Returns [`SINetError::WeightLoadingFailed`] when the file cannot be
    /// decoded and [`SINetError::ShapeMismatch`] when its depth differs.
    pub fn load_backbone_weights<B: Backend>(
        model: SINet<B>,
        path: &Path,
        device: &B::Device,
    ) -> SINetResult<SINet<B>> {
        let record: ResNetBackboneRecord<B> = PyTorchFileRecorder::<FullPrecisionSettings>::default()
            .load(load_args(path, &TORCHVISION_KEY_REMAP), device)
            .map_err(|e| SINetError::WeightLoadingFailed {
                reason: format!("{}: {e:?}", path.display()),
            })?;

        let backbone = load_checked(model.backbone().clone(), record)?;
        tracing::info!("Loaded backbone weights from {}", path.display());

        Ok(model.with_backbone(backbone).freeze_backbone())
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::NdArray,
        nn::conv::Conv2dConfig,
        tensor::{Distribution, ElementConversion},
    };

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_ensure_same_shapes() {
        let a = vec![vec![32, 64, 3, 3], vec![32]];
        assert!(ensure_same_shapes(&a, &a).is_ok());

        let b = vec![vec![32, 64, 3, 3], vec![16]];
        match ensure_same_shapes(&a, &b) {
            Err(SINetError::ShapeMismatch {
                index,
                expected,
                actual,
            }) => {
                assert_eq!(index, 1);
                assert_eq!(expected, vec![32]);
                assert_eq!(actual, vec![16]);
            }
            other => panic!("Expected ShapeMismatch, got {other:?}"),
        }

        let short = vec![vec![32, 64, 3, 3]];
        assert!(matches!(
            ensure_same_shapes(&a, &short),
            Err(SINetError::ShapeMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn test_load_checked_rejects_foreign_record() {
        let device = Default::default();
        let target = Conv2dConfig::new([8, 4], [3, 3]).init::<TestBackend>(&device);
        let foreign = Conv2dConfig::new([16, 4], [3, 3]).init::<TestBackend>(&device);

        match load_checked(target, foreign.into_record()) {
            Err(SINetError::ShapeMismatch {
                index,
                expected,
                actual,
            }) => {
                assert_eq!(index, 0);
                assert_eq!(expected, vec![4, 8, 3, 3]);
                assert_eq!(actual, vec![4, 16, 3, 3]);
            }
            other => panic!("Expected ShapeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let device = Default::default();
        let config = SINetConfig::new();
        let model = config.init::<TestBackend>(&device);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sinet");
        save_checkpoint(&model, &path).unwrap();
        assert!(path.with_extension(CHECKPOINT_EXTENSION).exists());

        let restored = load_checkpoint::<TestBackend>(&config, &path, &device).unwrap();

        let input = Tensor::<TestBackend, 4>::random(
            [1, 3, 96, 96],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let before = model.forward(input.clone()).refined;
        let after = restored.forward(input).refined;
        let diff = (before - after).abs().max().into_scalar().elem::<f32>();
        assert!(diff < 1e-6, "restored model differs by {diff}");
    }

    #[test]
    fn test_missing_checkpoint_is_weight_loading_error() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();

        let err = load_checkpoint::<TestBackend>(&SINetConfig::new(), &dir.path().join("nope"), &device)
            .unwrap_err();
        assert!(matches!(err, SINetError::WeightLoadingFailed { .. }));
        assert!(!err.is_client_error());
    }

    #[cfg(not(feature = "pretrained"))]
    #[test]
    fn test_pytorch_file_requires_feature() {
        let device = Default::default();
        let err = load_weights::<TestBackend>(&SINetConfig::new(), Path::new("weights/sinet.pth"), &device)
            .unwrap_err();
        assert!(matches!(err, SINetError::WeightLoadingFailed { .. }));
    }
}
