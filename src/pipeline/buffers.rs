use crate::segmentation::{blank_mask, AlphaMask};

/// The three alpha surfaces the pipeline works in, always the same size
pub struct MaskBuffers {
    /// Latest mask from the model, resampled to the surface size
    pub raw: AlphaMask,
    /// Moving average over raw masks, polished in place
    pub smoothed: AlphaMask,
    /// Working surface for blends
    pub scratch: AlphaMask,
}

impl MaskBuffers {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            raw: blank_mask(width, height),
            smoothed: blank_mask(width, height),
            scratch: blank_mask(width, height),
        }
    }

    /// Reallocate all surfaces. Temporal history does not survive a resize.
    pub fn resize(&mut self, width: u32, height: u32) {
        tracing::info!(
            "Resizing mask buffers {}x{} -> {}x{}",
            self.raw.width(),
            self.raw.height(),
            width,
            height
        );
        *self = Self::new(width, height);
    }

    /// True when every surface has the given size
    pub fn matches(&self, width: u32, height: u32) -> bool {
        let size = (width, height);
        self.raw.dimensions() == size
            && self.smoothed.dimensions() == size
            && self.scratch.dimensions() == size
    }
}
