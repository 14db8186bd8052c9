use candle_core::Device;
use image::{DynamicImage, GenericImageView, Luma};
use rand::RngCore;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::error::{DatasetError, Result};
use super::loader::RiceDataloader;
use super::transforms::{Compose, MaskBuffer, Sample, TensorSample};
use super::{SegArgs, Split, SplitBoundary};

pub const NUM_CLASSES: usize = 4;
/// Size of the published dataset; the default split boundary derives from it.
pub const TOTAL_SAMPLES: usize = 736;

const IMAGE_DIR: &str = "label";
const MASK_DIR: &str = "mask";

/// Paired image/mask files under `<base>/label` and `<base>/mask`, cut into a
/// train or validation split. The file index is fixed at construction.
pub struct RiceSegmentation {
    base_dir: PathBuf,
    image_dir: PathBuf,
    mask_dir: PathBuf,
    split: Split,
    args: SegArgs,
    images: Vec<PathBuf>,
    masks: Vec<PathBuf>,
    transform_tr: Compose,
    transform_val: Compose,
}

impl RiceSegmentation {
    pub fn new(args: SegArgs, base_dir: &Path, split: Split) -> Result<Self> {
        Self::with_boundary(args, base_dir, split, SplitBoundary::default())
    }

    pub fn with_boundary(
        args: SegArgs,
        base_dir: &Path,
        split: Split,
        boundary: SplitBoundary,
    ) -> Result<Self> {
        let image_dir = base_dir.join(IMAGE_DIR);
        let mask_dir = base_dir.join(MASK_DIR);
        for dir in [&image_dir, &mask_dir] {
            if !dir.is_dir() {
                return Err(DatasetError::MissingDir(dir.clone()));
            }
        }

        let pairs = pair_by_stem(list_files(&image_dir)?, list_files(&mask_dir)?, &image_dir, &mask_dir)?;
        let split_index = boundary.index(pairs.len());
        let selected = match split {
            Split::Train => &pairs[split_index..],
            Split::Val => &pairs[..split_index],
        };
        let (images, masks): (Vec<_>, Vec<_>) = selected.iter().cloned().unzip();

        log::info!("Number of images in {}: {}", split, images.len());
        log::debug!(
            "{} pairs listed, split boundary at {} ({:?})",
            pairs.len(),
            split_index,
            boundary
        );

        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            image_dir,
            mask_dir,
            split,
            args,
            images,
            masks,
            transform_tr: Compose::training(args),
            transform_val: Compose::validation(args),
        })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn args(&self) -> SegArgs {
        self.args
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    pub fn mask_dir(&self) -> &Path {
        &self.mask_dir
    }

    /// Image and mask path of the `index`-th sample of this split.
    pub fn paths(&self, index: usize) -> Result<(&Path, &Path)> {
        match (self.images.get(index), self.masks.get(index)) {
            (Some(image), Some(mask)) => Ok((image, mask)),
            _ => Err(DatasetError::IndexOutOfRange {
                index,
                len: self.len(),
            }),
        }
    }

    /// Decodes the raw pair without running any transform.
    pub fn load_sample(&self, index: usize) -> Result<Sample> {
        let (image_path, mask_path) = self.paths(index)?;
        log::debug!("loading {:?} / {:?}", image_path.display(), mask_path.display());
        let image = open(image_path)?.to_rgb8();
        let label = decode_mask(&open(mask_path)?);
        Ok(Sample { image, label })
    }

    pub fn get(&self, index: usize, device: &Device) -> Result<TensorSample> {
        self.get_with_rng(index, &mut rand::thread_rng(), device)
    }

    pub fn get_with_rng(
        &self,
        index: usize,
        rng: &mut dyn RngCore,
        device: &Device,
    ) -> Result<TensorSample> {
        let sample = self.load_sample(index)?;
        let pipeline = match self.split {
            Split::Train => &self.transform_tr,
            Split::Val => &self.transform_val,
        };
        pipeline.apply(sample, rng, device)
    }

    pub fn batcher(&self, batch_size: usize, device: Device) -> RiceDataloader<'_> {
        RiceDataloader::new(self, batch_size, device)
    }
}

impl fmt::Display for RiceSegmentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RICE2(split={})", self.split)
    }
}

fn open(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|source| DatasetError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Collapses a mask to one channel: the per-pixel channel sum over 255.
///
/// Values are not checked, so a mask whose channels disagree yields
/// fractional labels. Alpha counts as a channel at every bit depth; 16-bit
/// and float masks are reduced to 8 bits first.
pub fn decode_mask(mask: &DynamicImage) -> MaskBuffer {
    let (w, h) = mask.dimensions();
    let color = mask.color();
    if color.bytes_per_pixel() == color.channel_count() {
        sum_channels(mask.as_bytes(), color.channel_count() as usize, w, h)
    } else if color.has_alpha() {
        sum_channels(mask.to_rgba8().as_raw(), 4, w, h)
    } else {
        sum_channels(mask.to_rgb8().as_raw(), 3, w, h)
    }
}

fn sum_channels(bytes: &[u8], channels: usize, w: u32, h: u32) -> MaskBuffer {
    MaskBuffer::from_fn(w, h, |x, y| {
        let start = (y as usize * w as usize + x as usize) * channels;
        let total: f32 = bytes[start..start + channels].iter().map(|&v| v as f32).sum();
        Luma([total / 255.0])
    })
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}

/// Indexes `files` by stem, rejecting two files that share one.
fn index_by_stem(files: Vec<PathBuf>, dir: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let mut by_stem = BTreeMap::new();
    for file in files {
        match by_stem.entry(stem(&file)) {
            Entry::Vacant(slot) => {
                slot.insert(file);
            }
            Entry::Occupied(slot) => {
                return Err(DatasetError::DuplicateStem {
                    stem: slot.key().clone(),
                    dir: dir.to_path_buf(),
                })
            }
        }
    }
    Ok(by_stem)
}

/// Matches every image to the mask with the same file stem, ordered by stem.
fn pair_by_stem(
    images: Vec<PathBuf>,
    masks: Vec<PathBuf>,
    image_dir: &Path,
    mask_dir: &Path,
) -> Result<Vec<(PathBuf, PathBuf)>> {
    let images = index_by_stem(images, image_dir)?;
    let mut masks = index_by_stem(masks, mask_dir)?;
    let mut pairs = Vec::with_capacity(images.len());
    for (key, image) in images {
        match masks.remove(&key) {
            Some(mask) => pairs.push((image, mask)),
            None => {
                return Err(DatasetError::Unpaired {
                    stem: key,
                    present: image_dir.to_path_buf(),
                    missing: mask_dir.to_path_buf(),
                })
            }
        }
    }
    if let Some(key) = masks.into_keys().next() {
        return Err(DatasetError::Unpaired {
            stem: key,
            present: mask_dir.to_path_buf(),
            missing: image_dir.to_path_buf(),
        });
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use tempfile::TempDir;

    const ARGS: SegArgs = SegArgs {
        base_size: 64,
        crop_size: 32,
    };

    /// `n` pairs; image `i` is a flat color, mask `i` is white on its left half.
    fn fixture(n: usize, w: u32, h: u32) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("label")).unwrap();
        std::fs::create_dir(dir.path().join("mask")).unwrap();
        for i in 0..n {
            let name = format!("rice_{i:03}.png");
            RgbImage::from_pixel(w, h, Rgb([i as u8, 100, 200]))
                .save(dir.path().join("label").join(&name))
                .unwrap();
            RgbImage::from_fn(w, h, |x, _| if x < w / 2 { Rgb([255; 3]) } else { Rgb([0; 3]) })
                .save(dir.path().join("mask").join(&name))
                .unwrap();
        }
        dir
    }

    fn file_name(p: &Path) -> String {
        p.file_name().unwrap().to_string_lossy().to_string()
    }

    #[test]
    fn live_split_partitions_listing() {
        let dir = fixture(10, 8, 8);
        let train = RiceSegmentation::with_boundary(ARGS, dir.path(), Split::Train, SplitBoundary::Live).unwrap();
        let val = RiceSegmentation::with_boundary(ARGS, dir.path(), Split::Val, SplitBoundary::Live).unwrap();
        assert_eq!(val.len(), 10 / 5);
        assert_eq!(train.len() + val.len(), 10);
    }

    #[test]
    fn fixed_split_uses_dataset_constant() {
        let dir = fixture(10, 8, 8);
        let val = RiceSegmentation::new(ARGS, dir.path(), Split::Val).unwrap();
        let train = RiceSegmentation::new(ARGS, dir.path(), Split::Train).unwrap();
        // 736 / 5 = 147 lies past the listing, so everything is validation
        assert_eq!(val.len(), 10);
        assert!(train.is_empty());
    }

    #[test]
    fn first_index_maps_to_split_start() {
        let dir = fixture(10, 8, 8);
        let train = RiceSegmentation::with_boundary(ARGS, dir.path(), Split::Train, SplitBoundary::Live).unwrap();
        let val = RiceSegmentation::with_boundary(ARGS, dir.path(), Split::Val, SplitBoundary::Live).unwrap();
        let (image, mask) = train.paths(0).unwrap();
        assert_eq!(file_name(image), "rice_002.png");
        assert_eq!(file_name(mask), "rice_002.png");
        assert_eq!(file_name(val.paths(0).unwrap().0), "rice_000.png");
    }

    #[test]
    fn mask_channels_are_summed() {
        let dir = fixture(1, 4, 2);
        let ds = RiceSegmentation::new(ARGS, dir.path(), Split::Val).unwrap();
        let sample = ds.load_sample(0).unwrap();
        assert_eq!(sample.label.get_pixel(0, 0)[0], 3.0);
        assert_eq!(sample.label.get_pixel(3, 1)[0], 0.0);
        assert_eq!(sample.image.get_pixel(0, 0), &Rgb([0, 100, 200]));
    }

    #[test]
    fn mask_alpha_counts_as_a_channel() {
        let rgba = RgbaImage::from_pixel(1, 1, Rgba([255, 0, 0, 255]));
        let mask = decode_mask(&DynamicImage::ImageRgba8(rgba));
        assert_eq!(mask.get_pixel(0, 0)[0], 2.0);
        let gray = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(1, 1, Luma([255])));
        assert_eq!(decode_mask(&gray).get_pixel(0, 0)[0], 1.0);
    }

    #[test]
    fn mask_alpha_counts_at_sixteen_bits() {
        let deep = image::ImageBuffer::<Rgba<u16>, Vec<u16>>::from_pixel(1, 1, Rgba([65535, 0, 0, 65535]));
        let mask = decode_mask(&DynamicImage::ImageRgba16(deep));
        assert_eq!(mask.get_pixel(0, 0)[0], 2.0);
        let deep = image::ImageBuffer::<Rgb<u16>, Vec<u16>>::from_pixel(1, 1, Rgb([65535; 3]));
        assert_eq!(decode_mask(&DynamicImage::ImageRgb16(deep)).get_pixel(0, 0)[0], 3.0);
    }

    #[test]
    fn validation_sample_end_to_end() {
        let dir = fixture(5, 300, 260);
        let args = SegArgs {
            base_size: 512,
            crop_size: 256,
        };
        let ds = RiceSegmentation::new(args, dir.path(), Split::Val).unwrap();
        let out = ds.get(0, &Device::Cpu).unwrap();
        assert_eq!(out.image.dims(), &[3, 256, 256]);
        assert_eq!(out.label.dims(), &[256, 256]);

        let image = out.image.to_vec3::<f32>().unwrap();
        let green = (100.0 / 255.0 - 0.456) / 0.224;
        assert!((image[1][128][128] - green).abs() < 0.02);
        let label = out.label.to_vec2::<f32>().unwrap();
        assert!(label.iter().flatten().all(|&v| v == 0.0 || v == 3.0));
        assert_eq!(label[0][0], 3.0);
        assert_eq!(label[0][255], 0.0);
    }

    #[test]
    fn training_sample_has_crop_shape() {
        let dir = fixture(10, 48, 40);
        let ds = RiceSegmentation::with_boundary(ARGS, dir.path(), Split::Train, SplitBoundary::Live).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for i in 0..ds.len() {
            let out = ds.get_with_rng(i, &mut rng, &Device::Cpu).unwrap();
            assert_eq!(out.image.dims(), &[3, 32, 32]);
            assert_eq!(out.label.dims(), &[32, 32]);
        }
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let dir = fixture(3, 8, 8);
        let ds = RiceSegmentation::new(ARGS, dir.path(), Split::Val).unwrap();
        match ds.get(3, &Device::Cpu) {
            Err(DatasetError::IndexOutOfRange { index: 3, len: 3 }) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_mask_dir_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("label")).unwrap();
        match RiceSegmentation::new(ARGS, dir.path(), Split::Train) {
            Err(DatasetError::MissingDir(p)) => assert!(p.ends_with("mask")),
            Err(e) => panic!("unexpected {e}"),
            Ok(_) => panic!("expected MissingDir"),
        }
    }

    #[test]
    fn unpaired_files_fail_construction() {
        let dir = fixture(3, 8, 8);
        std::fs::rename(
            dir.path().join("mask").join("rice_001.png"),
            dir.path().join("mask").join("other.png"),
        )
        .unwrap();
        match RiceSegmentation::new(ARGS, dir.path(), Split::Val) {
            Err(DatasetError::Unpaired { stem, .. }) => assert_eq!(stem, "rice_001"),
            Err(e) => panic!("unexpected {e}"),
            Ok(_) => panic!("expected Unpaired"),
        }
    }

    #[test]
    fn shared_mask_stem_fails_construction() {
        let dir = fixture(2, 8, 8);
        std::fs::copy(
            dir.path().join("mask").join("rice_000.png"),
            dir.path().join("mask").join("rice_000.tif"),
        )
        .unwrap();
        match RiceSegmentation::with_boundary(ARGS, dir.path(), Split::Train, SplitBoundary::Live) {
            Err(DatasetError::DuplicateStem { stem, dir }) => {
                assert_eq!(stem, "rice_000");
                assert!(dir.ends_with("mask"));
            }
            Err(e) => panic!("unexpected {e}"),
            Ok(_) => panic!("expected DuplicateStem"),
        }
    }

    #[test]
    fn shared_image_stem_fails_construction() {
        let dir = fixture(2, 8, 8);
        std::fs::copy(
            dir.path().join("label").join("rice_001.png"),
            dir.path().join("label").join("rice_001.jpg"),
        )
        .unwrap();
        match RiceSegmentation::new(ARGS, dir.path(), Split::Val) {
            Err(DatasetError::DuplicateStem { stem, dir }) => {
                assert_eq!(stem, "rice_001");
                assert!(dir.ends_with("label"));
            }
            Err(e) => panic!("unexpected {e}"),
            Ok(_) => panic!("expected DuplicateStem"),
        }
    }

    #[test]
    fn pairing_ignores_extension() {
        let dir = fixture(2, 8, 8);
        std::fs::rename(
            dir.path().join("mask").join("rice_000.png"),
            dir.path().join("mask").join("rice_000.tif"),
        )
        .unwrap();
        let ds = RiceSegmentation::new(ARGS, dir.path(), Split::Val).unwrap();
        let (image, mask) = ds.paths(0).unwrap();
        assert_eq!(file_name(image), "rice_000.png");
        assert_eq!(file_name(mask), "rice_000.tif");
    }

    #[test]
    fn display_names_split() {
        let dir = fixture(1, 8, 8);
        let ds = RiceSegmentation::new(ARGS, dir.path(), Split::Val).unwrap();
        assert_eq!(ds.to_string(), "RICE2(split=val)");
        let ds = RiceSegmentation::new(ARGS, dir.path(), Split::Train).unwrap();
        assert_eq!(ds.to_string(), "RICE2(split=train)");
    }
}
