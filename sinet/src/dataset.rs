//! Camouflaged-object dataset loading.
//!
//! A dataset root holds two flat directories of equally named files, the
//! photographs and their ground-truth masks (COD10K layout: `Images/` and
//! `GT/`). Images go through the same letterbox transform used at inference
//! time; masks follow the same geometry with nearest-neighbour resampling,
//! so the supervision target is always `S x S`.

use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    prelude::*,
    tensor::TensorData,
};
use image::{GrayImage, RgbImage};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use walkdir::WalkDir;

use crate::{
    error::{SINetError, SINetResult},
    geometry::{PreprocessMeta, Preprocessor},
};

/// Mask intensities above this value are foreground.
pub const MASK_FOREGROUND_MIN: u8 = 127;

/// How image files are matched with their masks.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum PairingPolicy {
    /// Sorted image and mask lists must be equally long; they are zipped in
    /// order. A count mismatch is an error.
    Strict,
    /// Each image is paired with the mask of the same file name; images
    /// without one are skipped with a warning.
    SkipMissing,
}

/// Where a dataset lives and how it is read.
#[derive(Config, Debug)]
pub struct DatasetConfig {
    /// Dataset root containing the image and mask directories.
    pub root: String,
    #[config(default = "\"Images\".to_string()")]
    pub images_dir: String,
    #[config(default = "\"GT\".to_string()")]
    pub gt_dir: String,
    /// Accepted file extensions, compared case-insensitively.
    #[config(default = "vec![\"png\".to_string(), \"jpg\".to_string(), \"jpeg\".to_string()]")]
    pub extensions: Vec<String>,
    #[config(default = "PairingPolicy::Strict")]
    pub pairing: PairingPolicy,
    /// Keep only the first `n` pairs after sorting.
    pub max_samples: Option<usize>,
}

impl DatasetConfig {
    pub fn image_root(&self) -> PathBuf {
        Path::new(&self.root).join(&self.images_dir)
    }

    pub fn mask_root(&self) -> PathBuf {
        Path::new(&self.root).join(&self.gt_dir)
    }
}

/// One image file and its ground-truth mask file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePair {
    pub image: PathBuf,
    pub mask: PathBuf,
}

fn has_allowed_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
}

/// Files directly inside `dir` with an allowed extension, sorted by name.
fn list_files(dir: &Path, extensions: &[String]) -> SINetResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(SINetError::DatasetError {
            message: format!("Directory does not exist: {}", dir.display()),
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| SINetError::DatasetError {
            message: format!("Failed to read {}: {e}", dir.display()),
        })?;
        if entry.file_type().is_file() && has_allowed_extension(entry.path(), extensions) {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

/// Decode the header of `path` to make sure the file is a readable image.
fn check_readable(path: &Path) -> SINetResult<()> {
    image::image_dimensions(path)
        .map(|_| ())
        .map_err(|e| SINetError::DatasetError {
            message: format!("Unreadable image {}: {e}", path.display()),
        })
}

/// Discover the image/mask pairs described by `config`.
///
/// Every file's image header is decoded up front, so a pair that made it
/// into the list can be opened later during training.
///
/// # Errors
///
/// Returns [`SINetError::DatasetError`] when a directory is missing, when
/// the strict policy finds unequal counts or an unreadable file, or when no
/// pair is found.
pub fn collect_pairs(config: &DatasetConfig) -> SINetResult<Vec<SamplePair>> {
    let image_root = config.image_root();
    let mask_root = config.mask_root();

    let images = list_files(&image_root, &config.extensions)?;

    let mut pairs: Vec<SamplePair> = match config.pairing {
        PairingPolicy::Strict => {
            let masks = list_files(&mask_root, &config.extensions)?;
            if images.len() != masks.len() {
                return Err(SINetError::DatasetError {
                    message: format!(
                        "Number of images ({}) and masks ({}) do not match",
                        images.len(),
                        masks.len()
                    ),
                });
            }
            images
                .into_iter()
                .zip(masks)
                .map(|(image, mask)| SamplePair { image, mask })
                .collect()
        }
        PairingPolicy::SkipMissing => {
            if !mask_root.is_dir() {
                return Err(SINetError::DatasetError {
                    message: format!("Directory does not exist: {}", mask_root.display()),
                });
            }
            images
                .into_iter()
                .filter_map(|image| {
                    let mask = mask_root.join(image.file_name()?);
                    if mask.is_file() {
                        Some(SamplePair { image, mask })
                    } else {
                        tracing::warn!("No mask found for image: {}", image.display());
                        None
                    }
                })
                .collect()
        }
    };

    match config.pairing {
        PairingPolicy::Strict => {
            for pair in &pairs {
                check_readable(&pair.image)?;
                check_readable(&pair.mask)?;
            }
        }
        PairingPolicy::SkipMissing => pairs.retain(|pair| {
            match check_readable(&pair.image).and_then(|()| check_readable(&pair.mask)) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Skipping pair: {e}");
                    false
                }
            }
        }),
    }

    if let Some(max) = config.max_samples {
        pairs.truncate(max);
    }

    if pairs.is_empty() {
        return Err(SINetError::DatasetError {
            message: format!("No valid image/mask pairs found in {}", image_root.display()),
        });
    }

    tracing::info!("Found {} image/mask pairs in {}", pairs.len(), config.root);
    Ok(pairs)
}

/// Copy a random sample of `count` pairs from `source` into
/// `<dest>/Images` and `<dest>/GT`.
///
/// Images are drawn with a seeded RNG, so the same seed selects the same
/// files. Sampled images without a same-named mask are skipped. Returns the
/// number of pairs copied.
///
/// # Errors
///
/// Returns [`SINetError::DatasetError`] when the source image directory is
/// missing and [`SINetError::Io`] when copying fails.
pub fn make_subset(
    source: &DatasetConfig,
    dest: &Path,
    count: usize,
    seed: u64,
) -> SINetResult<usize> {
    let images = list_files(&source.image_root(), &source.extensions)?;
    if count > images.len() {
        tracing::warn!(
            "Requested {count} samples but only {} images are available",
            images.len()
        );
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let selected: Vec<&PathBuf> = images.choose_multiple(&mut rng, count).collect();

    let dest_images = dest.join(&source.images_dir);
    let dest_masks = dest.join(&source.gt_dir);
    fs::create_dir_all(&dest_images)?;
    fs::create_dir_all(&dest_masks)?;

    let mask_root = source.mask_root();
    let mut copied = 0;
    for image in selected {
        let Some(name) = image.file_name() else {
            continue;
        };
        let mask = mask_root.join(name);
        if !mask.is_file() {
            tracing::debug!("Skipping {}: no mask", image.display());
            continue;
        }

        fs::copy(image, dest_images.join(name))?;
        fs::copy(&mask, dest_masks.join(name))?;
        copied += 1;
    }

    tracing::info!("Subset created: {copied} image/mask pairs in {}", dest.display());
    Ok(copied)
}

/// A letterboxed training sample.
#[derive(Debug, Clone)]
pub struct CamoItem {
    /// `S x S` letterboxed RGB image.
    pub image: RgbImage,
    /// `S x S` letterboxed mask, still 8-bit.
    pub mask: GrayImage,
}

/// A batch of training samples.
#[derive(Debug, Clone)]
pub struct CamoBatch<B: Backend> {
    /// Normalized images `[B, 3, S, S]`.
    pub images: Tensor<B, 4>,
    /// Binary masks `[B, 1, S, S]` with values in `{0, 1}`.
    pub masks: Tensor<B, 4>,
}

/// Turns [`CamoItem`]s into tensors on the target device.
#[derive(Debug, Clone)]
pub struct CamoBatcher {
    preprocessor: Preprocessor,
}

impl CamoBatcher {
    pub const fn new(preprocessor: Preprocessor) -> Self {
        Self { preprocessor }
    }

    fn mask_to_tensor<B: Backend>(mask: &GrayImage, device: &B::Device) -> Tensor<B, 3> {
        let (width, height) = mask.dimensions();
        let values: Vec<f32> = mask
            .as_raw()
            .iter()
            .map(|&v| if v > MASK_FOREGROUND_MIN { 1.0 } else { 0.0 })
            .collect();
        Tensor::from_data(
            TensorData::new(values, [1, height as usize, width as usize]),
            device,
        )
    }
}

impl<B: Backend> Batcher<B, CamoItem, CamoBatch<B>> for CamoBatcher {
    fn batch(&self, items: Vec<CamoItem>, device: &B::Device) -> CamoBatch<B> {
        let mut images = Vec::with_capacity(items.len());
        let mut masks = Vec::with_capacity(items.len());

        for item in &items {
            images.push(self.preprocessor.to_tensor::<B>(&item.image, device));
            masks.push(Self::mask_to_tensor::<B>(&item.mask, device));
        }

        CamoBatch {
            images: Tensor::stack(images, 0),
            masks: Tensor::stack(masks, 0),
        }
    }
}

/// Dataset of letterboxed image/mask pairs.
#[derive(Debug, Clone)]
pub struct CamoDataset {
    pairs: Vec<SamplePair>,
    preprocessor: Preprocessor,
}

impl CamoDataset {
    /// Discover pairs with [`collect_pairs`] and wrap them.
    ///
    /// # Errors
    ///
    /// See [`collect_pairs`].
    pub fn new(config: &DatasetConfig, preprocessor: Preprocessor) -> SINetResult<Self> {
        Ok(Self::from_pairs(collect_pairs(config)?, preprocessor))
    }

    pub const fn from_pairs(pairs: Vec<SamplePair>, preprocessor: Preprocessor) -> Self {
        Self {
            pairs,
            preprocessor,
        }
    }

    pub fn pairs(&self) -> &[SamplePair] {
        &self.pairs
    }

    pub const fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// Move the last `ceil(len * fraction)` pairs into a second dataset.
    pub fn split_off(&mut self, fraction: f64) -> Self {
        let fraction = fraction.clamp(0.0, 1.0);
        let tail = ((self.pairs.len() as f64) * fraction).ceil() as usize;
        let at = self.pairs.len().saturating_sub(tail);

        Self {
            pairs: self.pairs.split_off(at),
            preprocessor: self.preprocessor.clone(),
        }
    }

    fn load(&self, pair: &SamplePair) -> SINetResult<CamoItem> {
        let image = image::open(&pair.image)
            .map_err(|e| SINetError::DatasetError {
                message: format!("Failed to open {}: {e}", pair.image.display()),
            })?
            .to_rgb8();
        let mask = image::open(&pair.mask)
            .map_err(|e| SINetError::DatasetError {
                message: format!("Failed to open {}: {e}", pair.mask.display()),
            })?
            .to_luma8();

        let (image, _) = self.preprocessor.letterbox(&image);
        let mask_meta =
            PreprocessMeta::compute(mask.width(), mask.height(), self.preprocessor.target_side());
        let mask = self.preprocessor.letterbox_mask(&mask, &mask_meta);

        Ok(CamoItem { image, mask })
    }
}

impl Dataset<CamoItem> for CamoDataset {
    fn get(&self, index: usize) -> Option<CamoItem> {
        let pair = self.pairs.get(index)?;
        match self.load(pair) {
            Ok(item) => Some(item),
            Err(e) => {
                // Burn's dataset iterator stops at the first `None`.
                tracing::error!("{e}, the epoch ends early at index {index}");
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.pairs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreprocessConfig;
    use burn::backend::NdArray;
    use image::{ImageFormat, Luma, Rgb};
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn write_pair(root: &Path, name: &str, with_mask: bool) {
        let images = root.join("Images");
        let masks = root.join("GT");
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&masks).unwrap();

        RgbImage::from_pixel(40, 20, Rgb([120, 80, 40]))
            .save(images.join(name))
            .unwrap();
        if with_mask {
            GrayImage::from_fn(40, 20, |x, _| Luma([if x < 20 { 255 } else { 0 }]))
                .save(masks.join(name))
                .unwrap();
        }
    }

    fn config_for(dir: &TempDir) -> DatasetConfig {
        DatasetConfig::new(dir.path().to_string_lossy().into_owned())
    }

    fn preprocessor() -> Preprocessor {
        Preprocessor::new(PreprocessConfig::new().with_target_side(96)).unwrap()
    }

    #[test]
    fn test_strict_pairs_by_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "b.png", true);
        write_pair(dir.path(), "a.png", true);

        let pairs = collect_pairs(&config_for(&dir)).unwrap();
        assert_eq!(pairs.len(), 2);
        assert!(pairs[0].image.ends_with("Images/a.png"));
        assert!(pairs[0].mask.ends_with("GT/a.png"));
        assert!(pairs[1].image.ends_with("Images/b.png"));
    }

    #[test]
    fn test_strict_count_mismatch_is_error() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "a.png", true);
        write_pair(dir.path(), "b.png", false);

        match collect_pairs(&config_for(&dir)) {
            Err(SINetError::DatasetError { message }) => assert!(message.contains("do not match")),
            other => panic!("Expected DatasetError, got {other:?}"),
        }
    }

    #[test]
    fn test_skip_missing_drops_unpaired_images() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "a.png", true);
        write_pair(dir.path(), "b.png", false);
        write_pair(dir.path(), "c.png", true);

        let config = config_for(&dir).with_pairing(PairingPolicy::SkipMissing);
        let pairs = collect_pairs(&config).unwrap();

        let names: Vec<_> = pairs
            .iter()
            .map(|p| p.image.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.png", "c.png"]);
    }

    #[test]
    fn test_extension_allow_list_and_depth() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "a.png", true);

        let images = dir.path().join("Images");
        let masks = dir.path().join("GT");
        RgbImage::new(8, 8)
            .save_with_format(images.join("B.JPG"), ImageFormat::Jpeg)
            .unwrap();
        GrayImage::new(8, 8)
            .save_with_format(masks.join("B.JPG"), ImageFormat::Jpeg)
            .unwrap();
        fs::write(images.join("notes.txt"), b"text").unwrap();
        fs::create_dir_all(images.join("nested")).unwrap();
        fs::write(images.join("nested").join("c.png"), b"png").unwrap();

        let pairs = collect_pairs(&config_for(&dir)).unwrap();
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().any(|p| p.image.ends_with("B.JPG")));
    }

    #[test]
    fn test_strict_rejects_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "a.png", true);
        write_pair(dir.path(), "b.png", true);
        fs::write(dir.path().join("GT").join("b.png"), b"truncated").unwrap();

        match collect_pairs(&config_for(&dir)) {
            Err(SINetError::DatasetError { message }) => {
                assert!(message.contains("Unreadable"));
                assert!(message.contains("b.png"));
            }
            other => panic!("Expected DatasetError, got {other:?}"),
        }
    }

    #[test]
    fn test_skip_missing_drops_unreadable_pairs() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "a.png", true);
        write_pair(dir.path(), "b.png", true);
        write_pair(dir.path(), "c.png", true);
        fs::write(dir.path().join("Images").join("b.png"), b"not an image").unwrap();

        let config = config_for(&dir).with_pairing(PairingPolicy::SkipMissing);
        let dataset = CamoDataset::new(&config, preprocessor()).unwrap();

        assert_eq!(dataset.len(), 2);
        assert!(dataset.pairs().iter().all(|p| !p.image.ends_with("b.png")));
        // Every listed pair loads, so an epoch is never cut short.
        assert!((0..dataset.len()).all(|i| dataset.get(i).is_some()));
    }

    #[test]
    fn test_max_samples_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.png", "b.png", "c.png"] {
            write_pair(dir.path(), name, true);
        }

        let pairs = collect_pairs(&config_for(&dir).with_max_samples(Some(2))).unwrap();
        assert_eq!(pairs.len(), 2);

        let empty = collect_pairs(&config_for(&dir).with_max_samples(Some(0)));
        assert!(matches!(empty, Err(SINetError::DatasetError { .. })));
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = collect_pairs(&config_for(&dir)).unwrap_err();
        assert!(matches!(err, SINetError::DatasetError { .. }));
    }

    #[test]
    fn test_dataset_items_are_letterboxed() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "a.png", true);

        let dataset = CamoDataset::new(&config_for(&dir), preprocessor()).unwrap();
        assert_eq!(dataset.len(), 1);

        let item = dataset.get(0).unwrap();
        assert_eq!(item.image.dimensions(), (96, 96));
        assert_eq!(item.mask.dimensions(), (96, 96));

        // 40x20 becomes 96x48 pasted at top = 24.
        assert_eq!(item.mask.get_pixel(5, 23)[0], 0);
        assert_eq!(item.mask.get_pixel(5, 24)[0], 255);
        assert_eq!(item.mask.get_pixel(60, 24)[0], 0);
        assert!(dataset.get(1).is_none());
    }

    #[test]
    fn test_batcher_shapes_and_binary_masks() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "a.png", true);
        write_pair(dir.path(), "b.png", true);

        let dataset = CamoDataset::new(&config_for(&dir), preprocessor()).unwrap();
        let items = (0..dataset.len()).filter_map(|i| dataset.get(i)).collect();

        let device = Default::default();
        let batch: CamoBatch<TestBackend> = CamoBatcher::new(preprocessor()).batch(items, &device);

        assert_eq!(batch.images.dims(), [2, 3, 96, 96]);
        assert_eq!(batch.masks.dims(), [2, 1, 96, 96]);
        assert!(batch
            .masks
            .into_data()
            .iter::<f32>()
            .all(|v| v == 0.0 || v == 1.0));
    }

    #[test]
    fn test_split_off() {
        let pairs = (0..10)
            .map(|i| SamplePair {
                image: PathBuf::from(format!("{i}.png")),
                mask: PathBuf::from(format!("{i}.png")),
            })
            .collect();
        let mut train = CamoDataset::from_pairs(pairs, preprocessor());
        let valid = train.split_off(0.25);

        assert_eq!(train.len(), 7);
        assert_eq!(valid.len(), 3);
        assert_eq!(valid.pairs()[0].image, PathBuf::from("7.png"));
    }

    #[test]
    fn test_make_subset() {
        let source = tempfile::tempdir().unwrap();
        for name in ["a.png", "b.png", "c.png", "d.png"] {
            write_pair(source.path(), name, true);
        }
        write_pair(source.path(), "e.png", false);

        let dest = tempfile::tempdir().unwrap();
        let copied = make_subset(&config_for(&source), dest.path(), 5, 42).unwrap();
        assert_eq!(copied, 4);
        assert!(dest.path().join("Images").join("a.png").is_file());
        assert!(dest.path().join("GT").join("a.png").is_file());
        assert!(!dest.path().join("Images").join("e.png").exists());

        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        make_subset(&config_for(&source), first.path(), 2, 7).unwrap();
        make_subset(&config_for(&source), second.path(), 2, 7).unwrap();

        let listing = |dir: &Path| {
            let mut names: Vec<_> = fs::read_dir(dir.join("Images"))
                .unwrap()
                .map(|e| e.unwrap().file_name())
                .collect();
            names.sort();
            names
        };
        assert_eq!(listing(first.path()), listing(second.path()));
    }
}
