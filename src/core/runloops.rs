use crate::core::{preview, Learner};
use crate::datasets::{get_dataset, NUM_CLASSES};
use candle_core::Device;
use std::time::Instant;

pub fn run(lnr: &Learner) -> anyhow::Result<()> {
    let device = Device::cuda_if_available(0)?;
    let dataset = get_dataset(lnr.seg_args(), &lnr.data_dir, lnr.split, lnr.boundary())?;
    log::info!(
        "{dataset}: {} samples, {} classes, {:?}",
        dataset.len(),
        NUM_CLASSES,
        dataset.args()
    );
    log::debug!(
        "images from {:?}, masks from {:?}",
        dataset.image_dir().display(),
        dataset.mask_dir().display()
    );
    if dataset.is_empty() {
        anyhow::bail!("{dataset} under {:?} holds no samples", dataset.base_dir().display());
    }

    let first = dataset.get(0, &device)?;
    log::info!(
        "First sample -> image: {:?}, label: {:?}",
        first.image.dims(),
        first.label.dims()
    );

    let mut loader = dataset.batcher(lnr.batch_size as usize, device);
    if !lnr.no_shuffle {
        loader = loader.shuffled(lnr.seed);
    }
    log::info!(
        "Loading {} of {} batches (batch size {})",
        lnr.batches.min(loader.num_batches()),
        loader.num_batches(),
        lnr.batch_size
    );

    let preview_dir = lnr.run_dir().join("preview");
    let mut loop_time = Instant::now();
    for (i, batch) in loader.take(lnr.batches).enumerate() {
        let (images, labels) = batch?;
        log::info!(
            "Batch {i:3} -> images: {:?}, labels: {:?}, load time: {:5.2?}",
            images.dims(),
            labels.dims(),
            loop_time.elapsed()
        );
        if !lnr.no_preview {
            preview::save_batch(&images, &labels, &preview_dir, i)?;
        }
        loop_time = Instant::now();
    }

    if !lnr.no_preview {
        log::info!("Saved previews to {:?}", preview_dir.display());
    }
    Ok(())
}
