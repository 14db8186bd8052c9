use crate::datasets::{SegArgs, Split, SplitBoundary};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "Rice segmentation data loading with candle")]
#[command(author = "Antodyn <antodyn@163.com>")]
#[command(version = "0.1")]
#[command(about = "Load, augment and preview rice segmentation samples", long_about = None)]
pub struct Learner {
    /// Name of this run
    #[arg(short, long)]
    pub name: String,

    /// dataset root holding `label/` and `mask/`
    #[arg(short, long)]
    pub data_dir: PathBuf,

    /// which split to load
    #[arg(long, value_enum, default_value_t = Split::Train)]
    pub split: Split,

    /// base size for random scaling
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..), default_value_t = 512)]
    pub base_size: u32,

    /// crop size
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..), default_value_t = 256)]
    pub crop_size: u32,

    /// batch size
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..), default_value_t = 5)]
    pub batch_size: u32,

    /// number of batches to load
    #[arg(long, default_value_t = 2)]
    pub batches: usize,

    /// seed
    #[arg(short, long, default_value_t = 42)]
    pub seed: u64,

    /// keep listing order instead of shuffling
    #[arg(long, default_value_t = false)]
    pub no_shuffle: bool,

    /// derive the split boundary from the listing instead of the dataset size
    #[arg(long, default_value_t = false)]
    pub live_split: bool,

    /// skip writing preview images
    #[arg(long, default_value_t = false)]
    pub no_preview: bool,

    /// threshold for log lines echoed to stderr
    #[arg(long, default_value_t = log::LevelFilter::Info)]
    pub log_level: log::LevelFilter,

    /// recoder home path
    #[arg(short, long, default_value_t = String::from("tmp"))]
    pub recoder_home: String,
}

impl Learner {
    pub fn seg_args(&self) -> SegArgs {
        SegArgs {
            base_size: self.base_size,
            crop_size: self.crop_size,
        }
    }

    pub fn boundary(&self) -> SplitBoundary {
        if self.live_split {
            SplitBoundary::Live
        } else {
            SplitBoundary::default()
        }
    }

    /// `<recoder_home>/<name>`, where logs and previews land.
    pub fn run_dir(&self) -> PathBuf {
        PathBuf::from(&self.recoder_home).join(&self.name)
    }
}
