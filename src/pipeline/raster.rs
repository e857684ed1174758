//! 2D raster operations the pipeline is expressed in.
//!
//! The smoother, polisher and compositor only talk to [`RasterOps`], so the
//! same pipeline can be mapped onto a GPU canvas or shader backend. The
//! [`SoftwareRaster`] backend runs on the CPU and keeps its blur planes
//! between frames; they only grow when the resolution does.

use crate::segmentation::AlphaMask;
use image::imageops::interpolate_bilinear;
use image::{Rgb, RgbImage, RgbaImage};
use libblur::{BlurImage, BlurImageMut, BoxBlurParameters, FastBlurChannels, ThreadingPolicy};

/// How color draws treat the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositeMode {
    /// Replace color and make the destination opaque
    #[default]
    SourceOver,
    /// Keep destination alpha, write color only where alpha is non-zero
    KeepDestinationAlpha,
}

pub trait RasterOps {
    /// Make every pixel of an alpha surface fully transparent
    fn clear(&mut self, surface: &mut AlphaMask);

    /// Accumulate `src * opacity` into `dst`, saturating at 1
    ///
    /// Clearing a surface and drawing two masks with opacities `1 - a` and
    /// `a` leaves their exact weighted average.
    fn draw_with_opacity(&mut self, dst: &mut AlphaMask, src: &AlphaMask, opacity: f32);

    /// Symmetric blur of an alpha surface, in place. Non-positive radii do nothing.
    fn blur(&mut self, surface: &mut AlphaMask, radius: f32);

    /// Make every pixel of the output transparent black and reset the composite mode
    fn clear_output(&mut self, out: &mut RgbaImage);

    /// Draw an alpha mask into the output's alpha channel
    fn draw_matte(&mut self, out: &mut RgbaImage, matte: &AlphaMask);

    /// Symmetric blur of the output's alpha channel, in place
    fn blur_output_alpha(&mut self, out: &mut RgbaImage, radius: f32);

    fn set_composite_mode(&mut self, mode: CompositeMode);

    /// Clip subsequent color draws to pixels that already have coverage
    fn clip_to_existing_alpha(&mut self) {
        self.set_composite_mode(CompositeMode::KeepDestinationAlpha);
    }

    /// Draw `frame` scaled by `scale` and centered in the output bounds
    fn draw_scaled_centered(&mut self, out: &mut RgbaImage, frame: &RgbImage, scale: f32);
}

/// CPU implementation of [`RasterOps`]
#[derive(Debug, Default)]
pub struct SoftwareRaster {
    mode: CompositeMode,
    // Blur destination, copied back into the surface afterwards
    blurred: Vec<f32>,
    // Output alpha lifted to f32 for blurring
    alpha: Vec<f32>,
}

impl SoftwareRaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Box blur `src` into the kept `blurred` plane
    ///
    /// Returns false when nothing was blurred, leaving `blurred` unspecified.
    fn blur_plane(&mut self, src: &[f32], width: u32, height: u32, radius: f32) -> bool {
        let Some(kernel) = box_kernel(radius, width, height) else {
            return false;
        };
        self.blurred.resize(src.len(), 0.0);

        let source = BlurImage::borrow(src, width, height, FastBlurChannels::Plane);
        let mut target = BlurImageMut::borrow(&mut self.blurred, width, height, FastBlurChannels::Plane);
        match libblur::box_blur_f32(
            &source,
            &mut target,
            BoxBlurParameters::new(kernel),
            ThreadingPolicy::Single,
        ) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("Blur of {}x{} plane failed: {}", width, height, err);
                false
            }
        }
    }
}

/// Odd box kernel for `radius`, shrunk to stay smaller than the plane
fn box_kernel(radius: f32, width: u32, height: u32) -> Option<u32> {
    if !(radius > 0.0) {
        return None;
    }
    let wanted = radius.round().max(1.0) as u32;
    let fits = width.min(height).saturating_sub(2) / 2;
    let half = wanted.min(fits);
    (half > 0).then_some(2 * half + 1)
}

impl RasterOps for SoftwareRaster {
    fn clear(&mut self, surface: &mut AlphaMask) {
        surface.iter_mut().for_each(|v| *v = 0.0);
    }

    fn draw_with_opacity(&mut self, dst: &mut AlphaMask, src: &AlphaMask, opacity: f32) {
        debug_assert_eq!(dst.dimensions(), src.dimensions());
        let opacity = opacity.clamp(0.0, 1.0);
        if opacity == 0.0 {
            return;
        }
        for (d, s) in dst.iter_mut().zip(src.iter()) {
            *d = (*d + *s * opacity).min(1.0);
        }
    }

    fn blur(&mut self, surface: &mut AlphaMask, radius: f32) {
        let (width, height) = surface.dimensions();
        if self.blur_plane(surface.as_raw(), width, height, radius) {
            surface.copy_from_slice(&self.blurred);
        }
    }

    fn clear_output(&mut self, out: &mut RgbaImage) {
        out.iter_mut().for_each(|v| *v = 0);
        self.mode = CompositeMode::SourceOver;
    }

    fn draw_matte(&mut self, out: &mut RgbaImage, matte: &AlphaMask) {
        debug_assert_eq!(out.dimensions(), matte.dimensions());
        for (pixel, coverage) in out.pixels_mut().zip(matte.iter()) {
            let src = coverage.clamp(0.0, 1.0);
            let dst = pixel[3] as f32 / 255.0;
            pixel[3] = to_u8((src + dst * (1.0 - src)) * 255.0);
        }
    }

    fn blur_output_alpha(&mut self, out: &mut RgbaImage, radius: f32) {
        let (width, height) = out.dimensions();
        if box_kernel(radius, width, height).is_none() {
            return;
        }

        let mut alpha = std::mem::take(&mut self.alpha);
        alpha.clear();
        alpha.extend(out.pixels().map(|p| p[3] as f32));
        if self.blur_plane(&alpha, width, height, radius) {
            for (pixel, value) in out.pixels_mut().zip(&self.blurred) {
                pixel[3] = to_u8(*value);
            }
        }
        self.alpha = alpha;
    }

    fn set_composite_mode(&mut self, mode: CompositeMode) {
        self.mode = mode;
    }

    fn draw_scaled_centered(&mut self, out: &mut RgbaImage, frame: &RgbImage, scale: f32) {
        let (out_w, out_h) = (out.width() as f32, out.height() as f32);
        if frame.width() == 0 || frame.height() == 0 || !(scale > 0.0) {
            return;
        }

        let draw_w = out_w * scale;
        let draw_h = out_h * scale;
        let left = (out_w - draw_w) / 2.0;
        let top = (out_h - draw_h) / 2.0;
        let step_x = frame.width() as f32 / draw_w;
        let step_y = frame.height() as f32 / draw_h;
        let max_u = (frame.width() - 1) as f32;
        let max_v = (frame.height() - 1) as f32;

        // Measured from the center so the margin is identical on opposite sides.
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            let cx = x as f32 + 0.5;
            let cy = y as f32 + 0.5;
            if (cx - out_w / 2.0).abs() >= draw_w / 2.0 || (cy - out_h / 2.0).abs() >= draw_h / 2.0 {
                continue;
            }
            if self.mode == CompositeMode::KeepDestinationAlpha && pixel[3] == 0 {
                continue;
            }

            let u = ((cx - left) * step_x - 0.5).clamp(0.0, max_u);
            let v = ((cy - top) * step_y - 0.5).clamp(0.0, max_v);
            let Some(Rgb([r, g, b])) = interpolate_bilinear(frame, u, v) else {
                continue;
            };
            pixel[0] = r;
            pixel[1] = g;
            pixel[2] = b;
            if self.mode == CompositeMode::SourceOver {
                pixel[3] = 255;
            }
        }
    }
}

fn to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
