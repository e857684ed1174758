use anyhow::Result;
use image::{ImageBuffer, Luma, RgbImage};

/// Alpha matte: coverage values where 0.0 = background, 1.0 = person
pub type AlphaMask = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Allocate a blank (fully transparent) mask
pub fn blank_mask(width: u32, height: u32) -> AlphaMask {
    AlphaMask::new(width, height)
}

/// Model accuracy mode, switchable while the stream is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Accuracy {
    /// Coarse mask at low model resolution
    Fast,
    /// Fine mask at full model resolution
    Accurate,
}

impl Accuracy {
    /// Model input resolution used for this mode
    pub fn input_size(self) -> (u32, u32) {
        match self {
            Accuracy::Fast => (256, 256),
            Accuracy::Accurate => (512, 512),
        }
    }
}

/// Trait for segmentation models
/// Allows swapping between different backends (RVM, MODNet, MediaPipe, etc.)
pub trait SegmentationModel {
    /// Process a frame and return an alpha mask
    ///
    /// The mask may come back at the model's own resolution; callers
    /// resample it to whatever surface they draw into.
    fn segment(&mut self, frame: &RgbImage) -> Result<AlphaMask>;

    /// Switch between the coarse and fine model modes
    fn set_accuracy(&mut self, accuracy: Accuracy);

    /// Reset internal state (for models with temporal/recurrent components)
    ///
    /// Call this when:
    /// - Switching cameras
    /// - Changing resolution
    /// - Starting a new video session
    fn reset_state(&mut self) {
        // Default implementation: no-op for stateless models
    }

    /// Get the model's preferred input dimensions
    ///
    /// Returns (width, height)
    fn input_size(&self) -> (u32, u32);
}

impl<M: SegmentationModel + ?Sized> SegmentationModel for Box<M> {
    fn segment(&mut self, frame: &RgbImage) -> Result<AlphaMask> {
        (**self).segment(frame)
    }

    fn set_accuracy(&mut self, accuracy: Accuracy) {
        (**self).set_accuracy(accuracy)
    }

    fn reset_state(&mut self) {
        (**self).reset_state()
    }

    fn input_size(&self) -> (u32, u32) {
        (**self).input_size()
    }
}
