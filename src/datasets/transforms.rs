//! Joint image/mask transforms.
//!
//! Geometric stages move the image and its mask together so that pixels stay
//! aligned; photometric stages touch the image only. Every stage draws its
//! randomness from the rng handed in by the caller, which keeps a whole
//! pipeline reproducible from one seed.

use candle_core::{Device, Tensor};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, Pixel, Rgb, RgbImage};
use rand::{Rng, RngCore};
use std::fmt;

use super::error::Result;
use super::SegArgs;

pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Single-channel float raster holding the derived label values.
pub type MaskBuffer = ImageBuffer<Luma<f32>, Vec<f32>>;

#[derive(Clone, Debug)]
pub struct Sample {
    pub image: RgbImage,
    pub label: MaskBuffer,
}

/// Float arrays in HWC order, after normalization.
#[derive(Clone, Debug)]
pub struct NormalizedSample {
    pub width: u32,
    pub height: u32,
    pub image: Vec<f32>,
    pub label: Vec<f32>,
}

/// Image `(3, H, W)` and label `(H, W)`, both f32.
#[derive(Debug)]
pub struct TensorSample {
    pub image: Tensor,
    pub label: Tensor,
}

pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, sample: Sample, rng: &mut dyn RngCore) -> Sample;
}

pub struct RandomHorizontalFlip {
    pub p: f64,
}

impl Default for RandomHorizontalFlip {
    fn default() -> Self {
        Self { p: 0.5 }
    }
}

impl Transform for RandomHorizontalFlip {
    fn name(&self) -> &'static str {
        "RandomHorizontalFlip"
    }

    fn apply(&self, sample: Sample, rng: &mut dyn RngCore) -> Sample {
        if rng.gen::<f64>() < self.p {
            Sample {
                image: imageops::flip_horizontal(&sample.image),
                label: imageops::flip_horizontal(&sample.label),
            }
        } else {
            sample
        }
    }
}

/// Rescale so the short side lands in `[base/2, 2*base]`, pad up to the crop
/// size when needed, then take a random `crop x crop` window.
pub struct RandomScaleCrop {
    pub base_size: u32,
    pub crop_size: u32,
    pub fill: f32,
}

impl RandomScaleCrop {
    pub fn new(base_size: u32, crop_size: u32) -> Self {
        Self {
            base_size,
            crop_size,
            fill: 0.0,
        }
    }
}

impl Transform for RandomScaleCrop {
    fn name(&self) -> &'static str {
        "RandomScaleCrop"
    }

    fn apply(&self, sample: Sample, rng: &mut dyn RngCore) -> Sample {
        let lo = (self.base_size as f64 * 0.5) as u32;
        let hi = (self.base_size as f64 * 2.0) as u32;
        let short_size = rng.gen_range(lo..=hi).max(1);

        let (w, h) = sample.image.dimensions();
        let (ow, oh) = if h > w {
            (short_size, scale_side(h, short_size, w))
        } else {
            (scale_side(w, short_size, h), short_size)
        };
        let mut image = imageops::resize(&sample.image, ow, oh, FilterType::Triangle);
        let mut label = resize_nearest(&sample.label, ow, oh);

        let crop = self.crop_size;
        if short_size < crop {
            let pw = ow.max(crop);
            let ph = oh.max(crop);
            image = pad_bottom_right(&image, pw, ph, Rgb([0, 0, 0]));
            label = pad_bottom_right(&label, pw, ph, Luma([self.fill]));
        }

        let (w, h) = image.dimensions();
        let x1 = rng.gen_range(0..=w.saturating_sub(crop));
        let y1 = rng.gen_range(0..=h.saturating_sub(crop));
        Sample {
            image: imageops::crop_imm(&image, x1, y1, crop, crop).to_image(),
            label: imageops::crop_imm(&label, x1, y1, crop, crop).to_image(),
        }
    }
}

/// Blurs the image (never the mask) with a random radius in `[0, 1)`.
pub struct RandomGaussianBlur {
    pub p: f64,
}

impl Default for RandomGaussianBlur {
    fn default() -> Self {
        Self { p: 0.5 }
    }
}

impl Transform for RandomGaussianBlur {
    fn name(&self) -> &'static str {
        "RandomGaussianBlur"
    }

    fn apply(&self, sample: Sample, rng: &mut dyn RngCore) -> Sample {
        if rng.gen::<f64>() >= self.p {
            return sample;
        }
        let radius = rng.gen::<f32>();
        // imageops::blur treats a non-positive sigma as 1.0
        if radius <= 0.0 {
            return sample;
        }
        Sample {
            image: imageops::blur(&sample.image, radius),
            label: sample.label,
        }
    }
}

/// Scale the short side to the crop size and cut the centered square.
pub struct FixScaleCrop {
    pub crop_size: u32,
}

impl Transform for FixScaleCrop {
    fn name(&self) -> &'static str {
        "FixScaleCrop"
    }

    fn apply(&self, sample: Sample, _rng: &mut dyn RngCore) -> Sample {
        let crop = self.crop_size;
        let (w, h) = sample.image.dimensions();
        let (ow, oh) = if w > h {
            (scale_side(w, crop, h), crop)
        } else {
            (crop, scale_side(h, crop, w))
        };
        let image = imageops::resize(&sample.image, ow, oh, FilterType::Triangle);
        let label = resize_nearest(&sample.label, ow, oh);

        let x1 = center_offset(ow, crop);
        let y1 = center_offset(oh, crop);
        Sample {
            image: imageops::crop_imm(&image, x1, y1, crop, crop).to_image(),
            label: imageops::crop_imm(&label, x1, y1, crop, crop).to_image(),
        }
    }
}

pub struct Normalize {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for Normalize {
    fn default() -> Self {
        Self {
            mean: MEAN,
            std: STD,
        }
    }
}

impl Normalize {
    /// `(pixel / 255 - mean) / std` per channel; label values pass through.
    pub fn apply(&self, sample: &Sample) -> NormalizedSample {
        let (width, height) = sample.image.dimensions();
        let mut image = Vec::with_capacity(3 * width as usize * height as usize);
        for pixel in sample.image.pixels() {
            for (c, v) in pixel.channels().iter().enumerate() {
                image.push((*v as f32 / 255.0 - self.mean[c]) / self.std[c]);
            }
        }
        NormalizedSample {
            width,
            height,
            image,
            label: sample.label.as_raw().clone(),
        }
    }
}

pub struct ToTensor;

impl ToTensor {
    pub fn apply(&self, sample: NormalizedSample, device: &Device) -> Result<TensorSample> {
        let (h, w) = (sample.height as usize, sample.width as usize);
        let image = Tensor::from_vec(sample.image, (h, w, 3), device)?
            .permute((2, 0, 1))?
            .contiguous()?;
        let label = Tensor::from_vec(sample.label, (h, w), device)?;
        Ok(TensorSample { image, label })
    }
}

/// Raster stages in order, followed by normalization and tensor conversion.
pub struct Compose {
    stages: Vec<Box<dyn Transform>>,
    normalize: Normalize,
    to_tensor: ToTensor,
}

impl Compose {
    pub fn new(stages: Vec<Box<dyn Transform>>) -> Self {
        Self {
            stages,
            normalize: Normalize::default(),
            to_tensor: ToTensor,
        }
    }

    pub fn training(args: SegArgs) -> Self {
        Self::new(vec![
            Box::new(RandomHorizontalFlip::default()),
            Box::new(RandomScaleCrop::new(args.base_size, args.crop_size)),
            Box::new(RandomGaussianBlur::default()),
        ])
    }

    pub fn validation(args: SegArgs) -> Self {
        Self::new(vec![Box::new(FixScaleCrop {
            crop_size: args.crop_size,
        })])
    }

    pub fn apply(
        &self,
        sample: Sample,
        rng: &mut dyn RngCore,
        device: &Device,
    ) -> Result<TensorSample> {
        let sample = self
            .stages
            .iter()
            .fold(sample, |sample, stage| stage.apply(sample, rng));
        let normalized = self.normalize.apply(&sample);
        self.to_tensor.apply(normalized, device)
    }
}

impl fmt::Debug for Compose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        write!(f, "Compose({} -> Normalize -> ToTensor)", names.join(" -> "))
    }
}

/// `long * short_target / short`, truncated, never zero.
fn scale_side(long: u32, short_target: u32, short: u32) -> u32 {
    ((long as f64 * short_target as f64 / short.max(1) as f64) as u32).max(1)
}

fn center_offset(side: u32, crop: u32) -> u32 {
    (side.saturating_sub(crop) as f64 / 2.0).round_ties_even() as u32
}

// imageops::resize clamps float subpixels to [0, 1], which would flatten
// label values, so masks are resampled here.
fn resize_nearest(mask: &MaskBuffer, nwidth: u32, nheight: u32) -> MaskBuffer {
    let (w, h) = mask.dimensions();
    if w == 0 || h == 0 {
        return MaskBuffer::new(nwidth, nheight);
    }
    ImageBuffer::from_fn(nwidth, nheight, |x, y| {
        let sx = ((x as f64 + 0.5) * w as f64 / nwidth as f64) as u32;
        let sy = ((y as f64 + 0.5) * h as f64 / nheight as f64) as u32;
        *mask.get_pixel(sx.min(w - 1), sy.min(h - 1))
    })
}

fn pad_bottom_right<P: Pixel>(
    img: &ImageBuffer<P, Vec<P::Subpixel>>,
    width: u32,
    height: u32,
    fill: P,
) -> ImageBuffer<P, Vec<P::Subpixel>> {
    let mut canvas = ImageBuffer::from_pixel(width, height, fill);
    imageops::replace(&mut canvas, img, 0, 0);
    canvas
}
