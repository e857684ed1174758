use super::raster::RasterOps;
use crate::segmentation::AlphaMask;

/// Dilate-and-feather approximated by one symmetric blur
///
/// Blurring a silhouette both pushes coverage slightly outward and softens
/// the hard edge, which hides single-pixel crawl along the boundary.
#[derive(Debug, Clone, Copy)]
pub struct EdgePolisher {
    dilate_px: f32,
    feather_px: f32,
}

impl EdgePolisher {
    pub fn new(dilate_px: f32, feather_px: f32) -> Self {
        Self {
            dilate_px,
            feather_px,
        }
    }

    /// `max(0, dilate + feather)`
    pub fn total_blur(&self) -> f32 {
        (self.dilate_px + self.feather_px).max(0.0)
    }

    pub fn polish<R: RasterOps + ?Sized>(&self, ops: &mut R, mask: &mut AlphaMask) {
        let radius = self.total_blur();
        if radius <= 0.0 {
            return;
        }
        let _span = tracing::debug_span!("polish", radius).entered();
        ops.blur(mask, radius);
    }
}
