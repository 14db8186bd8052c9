//! Turns batched tensors back into pictures for a quick visual check.

use crate::datasets::transforms::{MEAN, STD};
use candle_core::Tensor;
use image::{Rgb, RgbImage};
use std::path::Path;

/// Pascal VOC color map, one entry per class index.
const PASCAL_PALETTE: [[u8; 3]; 21] = [
    [0, 0, 0],
    [128, 0, 0],
    [0, 128, 0],
    [128, 128, 0],
    [0, 0, 128],
    [128, 0, 128],
    [0, 128, 128],
    [128, 128, 128],
    [64, 0, 0],
    [192, 0, 0],
    [64, 128, 0],
    [192, 128, 0],
    [64, 0, 128],
    [192, 0, 128],
    [64, 128, 128],
    [192, 128, 128],
    [0, 64, 0],
    [128, 64, 0],
    [0, 192, 0],
    [128, 192, 0],
    [0, 64, 128],
];

/// Colors an `(H, W)` label map. Labels are truncated to a class index;
/// indices outside the palette stay black.
pub fn decode_segmap(label: &Tensor) -> candle_core::Result<RgbImage> {
    let rows = label.to_vec2::<f32>()?;
    let height = rows.len() as u32;
    let width = rows.first().map_or(0, |r| r.len()) as u32;
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let class = rows[y as usize][x as usize].max(0.0) as usize;
        Rgb(PASCAL_PALETTE.get(class).copied().unwrap_or([0, 0, 0]))
    }))
}

/// Undoes normalization of a `(3, H, W)` image tensor.
pub fn denormalize(image: &Tensor) -> candle_core::Result<RgbImage> {
    let channels = image.to_vec3::<f32>()?;
    let height = channels[0].len() as u32;
    let width = channels[0].first().map_or(0, |r| r.len()) as u32;
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let mut px = [0u8; 3];
        for (c, v) in px.iter_mut().enumerate() {
            let raw = channels[c][y as usize][x as usize];
            *v = ((raw * STD[c] + MEAN[c]) * 255.0).clamp(0.0, 255.0) as u8;
        }
        Rgb(px)
    }))
}

/// Writes `b{batch}_s{sample}_image.png` and `..._label.png` for every
/// sample of a batch.
pub fn save_batch(images: &Tensor, labels: &Tensor, dir: &Path, batch: usize) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    for sample in 0..images.dims()[0] {
        let stem = format!("b{batch}_s{sample}");
        denormalize(&images.get(sample)?)?.save(dir.join(format!("{stem}_image.png")))?;
        decode_segmap(&labels.get(sample)?)?.save(dir.join(format!("{stem}_label.png")))?;
    }
    log::debug!("Saved preview of batch {batch} to {:?}", dir.display());
    Ok(())
}
