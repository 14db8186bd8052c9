use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::error::Result;
use super::RiceSegmentation;

/// Walks a split in batches, stacking images to `(B, 3, H, W)` and labels to
/// `(B, H, W)`. The last batch may be short.
pub struct RiceDataloader<'a> {
    dataset: &'a RiceSegmentation,
    batch_size: usize,
    device: Device,
    order: Vec<usize>,
    cursor: usize,
    rng: ChaCha8Rng,
}

impl<'a> RiceDataloader<'a> {
    pub fn new(dataset: &'a RiceSegmentation, batch_size: usize, device: Device) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            device,
            order: (0..dataset.len()).collect(),
            cursor: 0,
            rng: ChaCha8Rng::seed_from_u64(0),
        }
    }

    /// Visits samples in an order drawn from `seed`; the same rng then
    /// drives the random transforms.
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self.order.shuffle(&mut self.rng);
        self
    }

    pub fn num_batches(&self) -> usize {
        (self.order.len() + self.batch_size - 1) / self.batch_size
    }

    fn load_batch(&mut self, indices: &[usize]) -> Result<(Tensor, Tensor)> {
        let mut images = Vec::with_capacity(indices.len());
        let mut labels = Vec::with_capacity(indices.len());
        for &index in indices {
            let sample = self
                .dataset
                .get_with_rng(index, &mut self.rng, &self.device)?;
            images.push(sample.image);
            labels.push(sample.label);
        }
        Ok((Tensor::stack(&images, 0)?, Tensor::stack(&labels, 0)?))
    }
}

impl Iterator for RiceDataloader<'_> {
    type Item = Result<(Tensor, Tensor)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let indices = self.order[self.cursor..end].to_vec();
        self.cursor = end;
        Some(self.load_batch(&indices))
    }
}
