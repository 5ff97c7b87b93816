use burn::tensor::{backend::Backend, Tensor};
use image::{
    imageops::{self, FilterType},
    GrayImage, Luma,
};

use super::PreprocessMeta;
use crate::error::{SINetError, SINetResult};

/// Binarization cutoff for probability maps, guaranteed to lie in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Threshold(f32);

impl Threshold {
    /// # Errors
    ///
    /// Returns [`SINetError::InvalidThreshold`] for values outside `[0, 1]`
    /// and for NaN.
    pub fn new(value: f32) -> SINetResult<Self> {
        if (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(SINetError::InvalidThreshold { value })
        }
    }

    pub const fn value(self) -> f32 {
        self.0
    }

    /// Smallest 8-bit intensity counted as foreground: `floor(t * 255)`.
    pub fn cutoff(self) -> u8 {
        (self.0 * 255.0).floor() as u8
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self(0.5)
    }
}

impl TryFrom<f32> for Threshold {
    type Error = SINetError;

    fn try_from(value: f32) -> SINetResult<Self> {
        Self::new(value)
    }
}

/// Turn a square `S x S` row-major probability map back into a binary mask
/// on the original image grid described by `meta`.
///
/// The padding region is cropped away before resizing, so it never
/// contributes to the result. Output pixels are either 0 or 255.
///
/// # Errors
///
/// Returns [`SINetError::TensorOperationFailed`] if `map` does not hold
/// exactly `S * S` values.
pub fn postprocess_map(
    map: &[f32],
    meta: &PreprocessMeta,
    threshold: Threshold,
) -> SINetResult<GrayImage> {
    let _span = tracing::debug_span!("postprocess").entered();

    let side = meta.target_side as usize;
    if map.len() != side * side {
        return Err(SINetError::TensorOperationFailed {
            operation: format!(
                "expected a {side}x{side} probability map, got {} values",
                map.len()
            ),
        });
    }

    let (left, top) = meta.paste_offset;
    let (new_w, new_h) = meta.resized_extent;
    let crop = GrayImage::from_fn(new_w, new_h, |x, y| {
        let index = (top + y) as usize * side + (left + x) as usize;
        Luma([probability_to_u8(map[index])])
    });

    let (width, height) = meta.original_size;
    let mut mask = if crop.dimensions() == (width, height) {
        crop
    } else {
        imageops::resize(&crop, width, height, FilterType::Triangle)
    };

    binarize(&mut mask, threshold);
    Ok(mask)
}

/// Tensor front-end for [`postprocess_map`]; `map` must be `[1, 1, S, S]`.
///
/// # Errors
///
/// Returns [`SINetError::TensorOperationFailed`] for other shapes or when the
/// tensor data cannot be read back as `f32`.
pub fn postprocess_tensor<B: Backend>(
    map: Tensor<B, 4>,
    meta: &PreprocessMeta,
    threshold: Threshold,
) -> SINetResult<GrayImage> {
    let side = meta.target_side as usize;
    let dims = map.dims();
    if dims != [1, 1, side, side] {
        return Err(SINetError::TensorOperationFailed {
            operation: format!("expected map of shape [1, 1, {side}, {side}], got {dims:?}"),
        });
    }

    let values = map
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| SINetError::TensorOperationFailed {
            operation: format!("reading probability map: {e:?}"),
        })?;

    postprocess_map(&values, meta, threshold)
}

/// Scale to 8 bits by truncation.
fn probability_to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0) as u8
}

fn binarize(mask: &mut GrayImage, threshold: Threshold) {
    let cutoff = threshold.cutoff();
    for pixel in mask.pixels_mut() {
        pixel[0] = if pixel[0] >= cutoff { 255 } else { 0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn filled_map(meta: &PreprocessMeta, inside: f32, outside: f32) -> Vec<f32> {
        let side = meta.target_side;
        let (left, top) = meta.paste_offset;
        let (new_w, new_h) = meta.resized_extent;

        (0..side)
            .flat_map(|y| (0..side).map(move |x| (x, y)))
            .map(|(x, y)| {
                if x >= left && x < left + new_w && y >= top && y < top + new_h {
                    inside
                } else {
                    outside
                }
            })
            .collect()
    }

    fn foreground(mask: &GrayImage) -> usize {
        mask.pixels().filter(|p| p[0] == 255).count()
    }

    #[test]
    fn test_threshold_validation() {
        assert!(Threshold::new(0.0).is_ok());
        assert!(Threshold::new(1.0).is_ok());
        assert!(Threshold::new(0.42).is_ok());

        for bad in [-0.01, 1.01, f32::NAN, f32::INFINITY] {
            let err = Threshold::new(bad).unwrap_err();
            assert!(matches!(err, SINetError::InvalidThreshold { .. }));
            assert!(err.is_client_error());
        }
    }

    #[test]
    fn test_threshold_cutoff() {
        assert_eq!(Threshold::default().cutoff(), 127);
        assert_eq!(Threshold::new(0.0).unwrap().cutoff(), 0);
        assert_eq!(Threshold::new(1.0).unwrap().cutoff(), 255);
        assert_eq!(Threshold::try_from(0.8).unwrap().cutoff(), 204);
    }

    #[test]
    fn test_all_ones_inside_is_full_mask() {
        let meta = PreprocessMeta::compute(512, 300, 352);
        let map = filled_map(&meta, 1.0, 0.0);

        let mask = postprocess_map(&map, &meta, Threshold::default()).unwrap();

        assert_eq!(mask.dimensions(), (512, 300));
        assert_eq!(foreground(&mask), 512 * 300);
    }

    #[test]
    fn test_padding_never_leaks_into_mask() {
        let meta = PreprocessMeta::compute(120, 40, 64);
        let map = filled_map(&meta, 0.0, 1.0);

        let mask = postprocess_map(&map, &meta, Threshold::new(0.01).unwrap()).unwrap();

        assert_eq!(mask.dimensions(), (120, 40));
        assert_eq!(foreground(&mask), 0);
    }

    #[test]
    fn test_output_is_binary() {
        let meta = PreprocessMeta::compute(50, 80, 32);
        let side = meta.target_side as usize;
        let map: Vec<f32> = (0..side * side)
            .map(|i| (i % side) as f32 / side as f32)
            .collect();

        let mask = postprocess_map(&map, &meta, Threshold::default()).unwrap();
        assert!(mask.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn test_higher_threshold_is_subset() {
        let meta = PreprocessMeta::compute(90, 60, 48);
        let side = meta.target_side as usize;
        let map: Vec<f32> = (0..side * side)
            .map(|i| ((i * 7919) % 1000) as f32 / 1000.0)
            .collect();

        let levels = [0.0, 0.2, 0.5, 0.8, 1.0];
        let masks: Vec<GrayImage> = levels
            .iter()
            .map(|&t| postprocess_map(&map, &meta, Threshold::new(t).unwrap()).unwrap())
            .collect();

        for pair in masks.windows(2) {
            for (low, high) in pair[0].pixels().zip(pair[1].pixels()) {
                assert!(high[0] <= low[0], "a stricter threshold added foreground");
            }
        }

        assert_eq!(foreground(&masks[0]), 90 * 60);
        assert_eq!(foreground(&masks[4]), 0);
    }

    #[test]
    fn test_rejects_wrong_map_size() {
        let meta = PreprocessMeta::compute(10, 10, 32);
        let err = postprocess_map(&[0.5; 10], &meta, Threshold::default()).unwrap_err();
        assert!(matches!(err, SINetError::TensorOperationFailed { .. }));
    }

    #[test]
    fn test_postprocess_tensor() {
        let device = Default::default();
        let meta = PreprocessMeta::compute(40, 20, 32);

        let map = Tensor::<TestBackend, 4>::full([1, 1, 32, 32], 0.9, &device);
        let mask = postprocess_tensor(map, &meta, Threshold::default()).unwrap();
        assert_eq!(mask.dimensions(), (40, 20));
        assert_eq!(foreground(&mask), 40 * 20);

        let batched = Tensor::<TestBackend, 4>::zeros([2, 1, 32, 32], &device);
        assert!(postprocess_tensor(batched, &meta, Threshold::default()).is_err());
    }
}
