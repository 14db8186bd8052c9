mod error;
mod loader;
mod rice;
pub mod transforms;

use clap::ValueEnum;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub use error::{DatasetError, Result};
pub use rice::{RiceSegmentation, NUM_CLASSES, TOTAL_SAMPLES};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Split {
    Train,
    Val,
}

impl FromStr for Split {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Split::Train),
            "val" => Ok(Split::Val),
            other => Err(DatasetError::UnknownSplit(other.to_string())),
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Train => write!(f, "train"),
            Split::Val => write!(f, "val"),
        }
    }
}

/// Where the train/val cut falls. The validation split is the first fifth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitBoundary {
    /// A fixed collection size, tied to a known version of the dataset.
    Fixed(usize),
    /// Whatever the directory listing actually holds.
    Live,
}

impl Default for SplitBoundary {
    fn default() -> Self {
        SplitBoundary::Fixed(TOTAL_SAMPLES)
    }
}

impl SplitBoundary {
    /// Index of the first training sample, clamped to `listed`.
    pub fn index(&self, listed: usize) -> usize {
        let total = match self {
            SplitBoundary::Fixed(n) => *n,
            SplitBoundary::Live => listed,
        };
        (total / 5).min(listed)
    }
}

/// Sizes the transform pipelines are parameterised by.
#[derive(Clone, Copy, Debug)]
pub struct SegArgs {
    pub base_size: u32,
    pub crop_size: u32,
}

pub fn get_dataset(
    args: SegArgs,
    base_dir: &Path,
    split: Split,
    boundary: SplitBoundary,
) -> Result<RiceSegmentation> {
    log::info!("Load dataset from {:?}", base_dir.display());
    if boundary == SplitBoundary::default() {
        RiceSegmentation::new(args, base_dir, split)
    } else {
        RiceSegmentation::with_boundary(args, base_dir, split, boundary)
    }
}
