mod preprocess;
mod rvm;
pub mod types;

pub use preprocess::Preprocessor;
pub use rvm::RobustVideoMatting;
pub use types::{SegmentationMask, Segmenter};

use anyhow::Result;
use std::path::PathBuf;

/// Model settings for the shipped segmenter.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    pub model_path: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
    pub downsample_ratio: f32,
    /// Alpha at or above this counts as person.
    pub threshold: f32,
    pub intra_threads: usize,
}

impl SegmenterConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            // 512x512 is a good balance of quality and performance
            input_width: 512,
            input_height: 512,
            downsample_ratio: 0.25,
            threshold: 0.5,
            intra_threads: 4,
        }
    }
}

/// Create a default segmentation model (RVM)
pub fn create_default_model(config: &SegmenterConfig) -> Result<Box<dyn Segmenter>> {
    let model = RobustVideoMatting::new(config)?;
    Ok(Box::new(model))
}
