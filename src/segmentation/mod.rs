mod preprocess;
mod rvm;
pub mod types;
mod worker;

pub use preprocess::{matte_preview_into, resample_into, Preprocessor};
pub use rvm::RobustVideoMatting;
pub use types::{blank_mask, Accuracy, AlphaMask, SegmentationModel};
pub use worker::{InlineSegmenter, MaskProvider, ThreadedSegmenter};

use anyhow::Result;

/// Create the default segmentation model (RVM)
pub fn create_default_model(model_path: &str, accuracy: Accuracy) -> Result<RobustVideoMatting> {
    RobustVideoMatting::new(model_path, accuracy)
}
