use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DatasetError>;

/// Failures surfaced by the dataset, its transforms and the batcher.
///
/// Nothing is recovered locally: every variant propagates to whoever asked
/// for the sample.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("failed to list directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("failed to decode '{path}': {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("unknown split '{0}', expected 'train' or 'val'")]
    UnknownSplit(String),

    #[error("missing directory: {0}")]
    MissingDir(PathBuf),

    /// Image and mask listings disagree on which samples exist.
    #[error("unpaired sample '{stem}': present in {present}, missing from {missing}")]
    Unpaired {
        stem: String,
        present: PathBuf,
        missing: PathBuf,
    },

    /// Two files in one directory claim the same sample.
    #[error("duplicate sample '{stem}' in {dir}")]
    DuplicateStem { stem: String, dir: PathBuf },

    #[error("index {index} out of range for split of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}
