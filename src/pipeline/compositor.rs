use super::config::{clamp_shrink, FINAL_SOFTEN_RATIO};
use super::raster::RasterOps;
use crate::segmentation::AlphaMask;
use image::{RgbImage, RgbaImage};

/// Cuts the person out of the frame using the polished mask as a matte
///
/// The RGB draw is scaled down slightly and centered, so the soft edge of
/// the matte overhangs the color by a pixel or two and boundary jitter does
/// not show up as a halo.
#[derive(Debug, Clone, Copy)]
pub struct Compositor {
    shrink: f32,
    feather_px: f32,
    final_soften: bool,
}

impl Compositor {
    pub fn new(rgb_shrink_factor: f32, feather_px: f32, final_soften: bool) -> Self {
        Self {
            shrink: clamp_shrink(rgb_shrink_factor),
            feather_px,
            final_soften,
        }
    }

    /// Scale actually applied to the RGB draw
    pub fn shrink(&self) -> f32 {
        self.shrink
    }

    pub fn composite<R: RasterOps + ?Sized>(
        &self,
        ops: &mut R,
        mask: &AlphaMask,
        frame: &RgbImage,
        out: &mut RgbaImage,
    ) {
        let _span = tracing::debug_span!("composite", shrink = self.shrink).entered();

        ops.clear_output(out);
        ops.draw_matte(out, mask);
        if self.final_soften && self.feather_px > 0.0 {
            ops.blur_output_alpha(out, self.feather_px * FINAL_SOFTEN_RATIO);
        }
        ops.clip_to_existing_alpha();
        ops.draw_scaled_centered(out, frame, self.shrink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::raster::SoftwareRaster;
    use image::{Luma, Rgb};

    #[test]
    fn shrink_factor_is_clamped_on_construction() {
        assert_eq!(Compositor::new(0.5, 1.0, true).shrink(), 0.975);
        assert_eq!(Compositor::new(1.5, 1.0, true).shrink(), 1.0);
    }

    #[test]
    fn full_mask_keeps_only_the_inset_margin_uncolored() {
        let mut ops = SoftwareRaster::new();
        let mask = AlphaMask::from_pixel(80, 80, Luma([1.0]));
        let frame = RgbImage::from_pixel(80, 80, Rgb([90, 120, 150]));
        let mut out = RgbaImage::new(80, 80);

        Compositor::new(0.975, 0.0, true).composite(&mut ops, &mask, &frame, &mut out);

        // 80 * 0.0125 = 1px: the outermost ring has matte but no color.
        assert_eq!(out.get_pixel(0, 40).0, [0, 0, 0, 255]);
        assert_eq!(out.get_pixel(79, 40).0, [0, 0, 0, 255]);
        assert_eq!(out.get_pixel(40, 0).0, [0, 0, 0, 255]);
        assert_eq!(out.get_pixel(40, 79).0, [0, 0, 0, 255]);
        assert_eq!(out.get_pixel(1, 40).0, [90, 120, 150, 255]);
        assert_eq!(out.get_pixel(78, 40).0, [90, 120, 150, 255]);
    }

    #[test]
    fn background_stays_transparent() {
        let mut ops = SoftwareRaster::new();
        let mask = AlphaMask::from_fn(20, 20, |x, _| Luma([if x < 10 { 1.0 } else { 0.0 }]));
        let frame = RgbImage::from_pixel(20, 20, Rgb([255, 255, 255]));
        let mut out = RgbaImage::new(20, 20);

        Compositor::new(1.0, 0.0, false).composite(&mut ops, &mask, &frame, &mut out);

        assert_eq!(out.get_pixel(5, 5).0, [255, 255, 255, 255]);
        assert_eq!(out.get_pixel(15, 5).0, [0, 0, 0, 0]);
    }

    #[test]
    fn final_soften_only_touches_alpha_near_the_edge() {
        let mask = AlphaMask::from_fn(20, 20, |x, _| Luma([if x < 10 { 1.0 } else { 0.0 }]));
        let frame = RgbImage::from_pixel(20, 20, Rgb([255, 255, 255]));

        let mut hard = RgbaImage::new(20, 20);
        Compositor::new(1.0, 1.0, false).composite(&mut SoftwareRaster::new(), &mask, &frame, &mut hard);
        let mut soft = RgbaImage::new(20, 20);
        Compositor::new(1.0, 1.0, true).composite(&mut SoftwareRaster::new(), &mask, &frame, &mut soft);

        assert_eq!(hard.get_pixel(10, 5)[3], 0);
        assert!(soft.get_pixel(10, 5)[3] > 0);
        assert!(soft.get_pixel(9, 5)[3] < 255);
        assert_eq!(soft.get_pixel(2, 5).0, hard.get_pixel(2, 5).0);
    }
}
