use burn::tensor::{backend::Backend, Tensor, TensorData};
use image::{
    imageops::{self, FilterType},
    GrayImage, RgbImage,
};

use crate::{config::PreprocessConfig, error::SINetResult};

/// Record of the letterbox transform applied to one image.
///
/// Produced by [`Preprocessor::preprocess`] and consumed by the
/// postprocessor to map a model-space map back onto the original pixel grid.
/// `paste_offset + resized_extent` never exceeds `target_side` on either axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessMeta {
    /// `(width, height)` of the source image.
    pub original_size: (u32, u32),
    /// `(left, top)` of the pasted image inside the square canvas.
    pub paste_offset: (u32, u32),
    /// `(width, height)` of the image after aspect-preserving scaling.
    pub resized_extent: (u32, u32),
    /// Side `S` of the square canvas.
    pub target_side: u32,
}

impl PreprocessMeta {
    /// Compute the letterbox geometry for a `width x height` image.
    ///
    /// The longer side is scaled to exactly `target_side`; the shorter side
    /// is scaled by the same factor, rounded, and kept at least one pixel.
    pub fn compute(width: u32, height: u32, target_side: u32) -> Self {
        let scale = f64::from(target_side) / f64::from(width.max(height));
        let scaled = |side: u32| ((f64::from(side) * scale).round() as u32).clamp(1, target_side);

        let new_w = scaled(width);
        let new_h = scaled(height);

        Self {
            original_size: (width, height),
            paste_offset: ((target_side - new_w) / 2, (target_side - new_h) / 2),
            resized_extent: (new_w, new_h),
            target_side,
        }
    }

    /// Factor applied to the original image sides.
    pub fn scale(&self) -> f64 {
        let (width, height) = self.original_size;
        f64::from(self.target_side) / f64::from(width.max(height))
    }

    /// Whether any padding was added around the pasted image.
    pub fn is_letterboxed(&self) -> bool {
        self.resized_extent != (self.target_side, self.target_side)
    }
}

/// Maps arbitrary-size RGB images into the model's square input space.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    /// # Errors
    ///
    /// Returns the validation error of an inconsistent [`PreprocessConfig`].
    pub fn new(config: PreprocessConfig) -> SINetResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub const fn target_side(&self) -> u32 {
        self.config.target_side
    }

    pub const fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Resize `image` with a bilinear filter so that it fits the square
    /// canvas, and paste it centered on a black background.
    pub fn letterbox(&self, image: &RgbImage) -> (RgbImage, PreprocessMeta) {
        let _span = tracing::debug_span!("letterbox").entered();

        let side = self.config.target_side;
        let meta = PreprocessMeta::compute(image.width(), image.height(), side);
        let mut canvas = RgbImage::new(side, side);
        paste_resized(&mut canvas, image, &meta, FilterType::Triangle);

        (canvas, meta)
    }

    /// Apply the geometry of `meta` to a ground-truth mask. Nearest-neighbour
    /// resampling keeps mask values unblended.
    pub fn letterbox_mask(&self, mask: &GrayImage, meta: &PreprocessMeta) -> GrayImage {
        let mut canvas = GrayImage::new(meta.target_side, meta.target_side);
        paste_resized(&mut canvas, mask, meta, FilterType::Nearest);
        canvas
    }

    /// Convert a letterboxed canvas into a normalized `[3, S, S]` tensor.
    pub fn to_tensor<B: Backend>(&self, canvas: &RgbImage, device: &B::Device) -> Tensor<B, 3> {
        let (width, height) = canvas.dimensions();
        let buf: Vec<f32> = canvas
            .as_raw()
            .iter()
            .map(|&value| f32::from(value) / 255.0)
            .collect();

        let data = TensorData::new(buf, [height as usize, width as usize, 3]);
        // HWC to CHW
        let tensor = Tensor::<B, 3>::from_data(data, device).permute([2, 0, 1]);

        let mean = Tensor::<B, 1>::from_floats(self.config.mean, device).reshape([3, 1, 1]);
        let std = Tensor::<B, 1>::from_floats(self.config.std, device).reshape([3, 1, 1]);

        (tensor - mean) / std
    }

    /// Letterbox `image` and return the `[1, 3, S, S]` model input together
    /// with the transform needed to undo it.
    pub fn preprocess<B: Backend>(
        &self,
        image: &RgbImage,
        device: &B::Device,
    ) -> (Tensor<B, 4>, PreprocessMeta) {
        let _span = tracing::debug_span!("preprocess").entered();

        let (canvas, meta) = self.letterbox(image);
        (self.to_tensor(&canvas, device).unsqueeze::<4>(), meta)
    }
}

fn paste_resized<P>(
    canvas: &mut image::ImageBuffer<P, Vec<u8>>,
    source: &image::ImageBuffer<P, Vec<u8>>,
    meta: &PreprocessMeta,
    filter: FilterType,
) where
    P: image::Pixel<Subpixel = u8> + 'static,
{
    let (new_w, new_h) = meta.resized_extent;
    let (left, top) = meta.paste_offset;

    if source.dimensions() == (new_w, new_h) {
        imageops::replace(canvas, source, i64::from(left), i64::from(top));
    } else {
        let resized = imageops::resize(source, new_w, new_h, filter);
        imageops::replace(canvas, &resized, i64::from(left), i64::from(top));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IMAGENET_MEAN, IMAGENET_STD};
    use burn::backend::NdArray;
    use image::{Luma, Rgb};

    type TestBackend = NdArray<f32>;

    fn preprocessor(side: u32) -> Preprocessor {
        Preprocessor::new(PreprocessConfig::new().with_target_side(side)).unwrap()
    }

    #[test]
    fn test_meta_landscape_scenario() {
        let meta = PreprocessMeta::compute(512, 300, 352);

        assert!((meta.scale() - 0.6875).abs() < 1e-12);
        assert_eq!(meta.resized_extent, (352, 206));
        assert_eq!(meta.paste_offset, (0, 73));
        assert_eq!(meta.original_size, (512, 300));
        assert!(meta.is_letterboxed());
    }

    #[test]
    fn test_meta_square_has_no_padding() {
        let meta = PreprocessMeta::compute(352, 352, 352);

        assert_eq!(meta.paste_offset, (0, 0));
        assert_eq!(meta.resized_extent, (352, 352));
        assert!(!meta.is_letterboxed());
    }

    #[test]
    fn test_meta_invariants_hold_for_many_sizes() {
        for &(w, h) in &[(1, 1), (1, 999), (640, 480), (333, 1000), (7, 3), (4000, 3000)] {
            for &side in &[32, 100, 352] {
                let meta = PreprocessMeta::compute(w, h, side);
                let (left, top) = meta.paste_offset;
                let (new_w, new_h) = meta.resized_extent;

                assert!(left + new_w <= side, "{w}x{h} @ {side}");
                assert!(top + new_h <= side, "{w}x{h} @ {side}");
                assert!(new_w >= 1 && new_h >= 1);
                assert_eq!(new_w.max(new_h), side);

                // Aspect ratio preserved up to rounding of the short side.
                let expected_short = f64::from(w.min(h)) * meta.scale();
                let short = f64::from(new_w.min(new_h));
                assert!((short - expected_short).abs() <= 1.0, "{w}x{h} @ {side}");
            }
        }
    }

    #[test]
    fn test_letterbox_background_is_black() {
        let image = RgbImage::from_pixel(200, 100, Rgb([200, 150, 100]));
        let (canvas, meta) = preprocessor(96).letterbox(&image);

        assert_eq!(canvas.dimensions(), (96, 96));
        assert_eq!(meta.resized_extent, (96, 48));
        assert_eq!(meta.paste_offset, (0, 24));

        let (left, top) = meta.paste_offset;
        let (new_w, new_h) = meta.resized_extent;
        for (x, y, pixel) in canvas.enumerate_pixels() {
            let inside = x >= left && x < left + new_w && y >= top && y < top + new_h;
            if inside {
                assert_eq!(*pixel, Rgb([200, 150, 100]));
            } else {
                assert_eq!(*pixel, Rgb([0, 0, 0]));
            }
        }
    }

    #[test]
    fn test_letterbox_mask_uses_same_geometry() {
        let image = RgbImage::new(90, 30);
        let mask = GrayImage::from_pixel(90, 30, Luma([255]));
        let pre = preprocessor(96);

        let (_, meta) = pre.letterbox(&image);
        let boxed = pre.letterbox_mask(&mask, &meta);

        let (_, top) = meta.paste_offset;
        assert_eq!(boxed.get_pixel(30, top - 1)[0], 0);
        assert_eq!(boxed.get_pixel(30, top)[0], 255);
        assert!(boxed.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn test_to_tensor_normalizes_per_channel() {
        let device = Default::default();
        let pre = preprocessor(96);
        let canvas = RgbImage::from_pixel(96, 96, Rgb([255, 0, 0]));

        let tensor = pre.to_tensor::<TestBackend>(&canvas, &device);
        assert_eq!(tensor.dims(), [3, 96, 96]);

        let data = tensor.into_data().to_vec::<f32>().unwrap();
        let plane = 96 * 96;
        let red = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let green = -IMAGENET_MEAN[1] / IMAGENET_STD[1];
        assert!((data[0] - red).abs() < 1e-5);
        assert!((data[plane] - green).abs() < 1e-5);
    }

    #[test]
    fn test_preprocess_output_shape() {
        let device = Default::default();
        let image = RgbImage::new(37, 91);
        let (tensor, meta) = preprocessor(96).preprocess::<TestBackend>(&image, &device);

        assert_eq!(tensor.dims(), [1, 3, 96, 96]);
        assert_eq!(meta.target_side, 96);
        assert_eq!(meta.resized_extent.1, 96);
    }
}
