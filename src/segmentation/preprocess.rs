use super::types::AlphaMask;
use anyhow::{ensure, Result};
use image::imageops::{self, interpolate_bilinear};
use image::{RgbImage, Rgba, RgbaImage};
use ndarray::Array4;

/// Preprocessor for converting RGB frames to model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Preprocess an RGB frame into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Convert to float and normalize to [0, 1]
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, frame: &RgbImage) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("preprocess").entered();

        ensure!(
            frame.width() > 0 && frame.height() > 0,
            "cannot preprocess an empty frame"
        );

        let resized;
        let source = if frame.dimensions() != (self.target_width, self.target_height) {
            resized = imageops::resize(
                frame,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            );
            &resized
        } else {
            frame
        };

        let shape = (1, 3, self.target_height as usize, self.target_width as usize);
        let tensor = Array4::from_shape_fn(shape, |(_, c, y, x)| {
            source.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });

        Ok(tensor)
    }
}

/// Write `mask` into `target`, resampling when the sizes disagree
///
/// The target is fully overwritten in place; values are clamped to [0, 1]
/// and non-finite coverage is treated as background.
pub fn resample_into(mask: &AlphaMask, target: &mut AlphaMask) {
    let _span = tracing::debug_span!("resample_mask").entered();

    if mask.dimensions() == target.dimensions() {
        for (dst, src) in target.iter_mut().zip(mask.iter()) {
            *dst = sanitize(*src);
        }
        return;
    }

    if mask.width() == 0 || mask.height() == 0 {
        target.iter_mut().for_each(|v| *v = 0.0);
        return;
    }

    let step_x = mask.width() as f32 / target.width() as f32;
    let step_y = mask.height() as f32 / target.height() as f32;
    let max_u = (mask.width() - 1) as f32;
    let max_v = (mask.height() - 1) as f32;

    for (x, y, pixel) in target.enumerate_pixels_mut() {
        let u = ((x as f32 + 0.5) * step_x - 0.5).clamp(0.0, max_u);
        let v = ((y as f32 + 0.5) * step_y - 0.5).clamp(0.0, max_v);
        pixel[0] = interpolate_bilinear(mask, u, v).map_or(0.0, |p| sanitize(p[0]));
    }
}

fn sanitize(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Render a mask as an opaque grayscale image for visualization
///
/// `out` is reallocated only when its size differs from the mask.
pub fn matte_preview_into(mask: &AlphaMask, out: &mut RgbaImage) {
    if out.dimensions() != mask.dimensions() {
        *out = RgbaImage::new(mask.width(), mask.height());
    }
    for (pixel, coverage) in out.pixels_mut().zip(mask.iter()) {
        let value = (coverage * 255.0).round().clamp(0.0, 255.0) as u8;
        *pixel = Rgba([value, value, value, 255]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn preprocess_produces_normalized_nchw() {
        let frame = RgbImage::from_pixel(4, 2, Rgb([255, 0, 51]));
        let tensor = Preprocessor::new(4, 2).preprocess(&frame).unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 2, 4]);
        assert!((tensor[[0, 0, 1, 3]] - 1.0).abs() < 1e-6);
        assert_eq!(tensor[[0, 1, 0, 0]], 0.0);
        assert!((tensor[[0, 2, 0, 2]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn resample_same_size_copies_and_clamps() {
        let mut mask = AlphaMask::from_pixel(3, 3, Luma([0.5]));
        mask.put_pixel(0, 0, Luma([1.5]));
        mask.put_pixel(1, 0, Luma([f32::NAN]));
        let mut target = AlphaMask::from_pixel(3, 3, Luma([0.9]));

        resample_into(&mask, &mut target);

        assert_eq!(target.get_pixel(0, 0)[0], 1.0);
        assert_eq!(target.get_pixel(1, 0)[0], 0.0);
        assert_eq!(target.get_pixel(2, 2)[0], 0.5);
    }

    #[test]
    fn resample_scales_uniform_mask() {
        let mask = AlphaMask::from_pixel(8, 8, Luma([1.0]));
        let mut target = AlphaMask::new(20, 12);

        resample_into(&mask, &mut target);

        assert!(target.iter().all(|v| (*v - 1.0).abs() < 1e-4));
    }

    #[test]
    fn resample_keeps_silhouette_position() {
        let mask = AlphaMask::from_fn(10, 10, |x, _| Luma([if x < 5 { 1.0 } else { 0.0 }]));
        let mut target = AlphaMask::from_pixel(40, 20, Luma([0.7]));

        resample_into(&mask, &mut target);

        assert!((target.get_pixel(2, 10)[0] - 1.0).abs() < 1e-6);
        assert_eq!(target.get_pixel(37, 10)[0], 0.0);
        let edge = target.get_pixel(20, 10)[0];
        assert!(edge > 0.0 && edge < 1.0, "edge {edge}");
    }

    #[test]
    fn matte_preview_is_grayscale_and_reuses_buffer() {
        let mask = AlphaMask::from_pixel(2, 2, Luma([0.5]));
        let mut rgba = RgbaImage::new(0, 0);

        matte_preview_into(&mask, &mut rgba);
        assert_eq!(rgba.get_pixel(1, 1).0, [128, 128, 128, 255]);

        let before = rgba.as_raw().as_ptr();
        matte_preview_into(&AlphaMask::from_pixel(2, 2, Luma([1.0])), &mut rgba);
        assert_eq!(rgba.as_raw().as_ptr(), before);
        assert_eq!(rgba.get_pixel(0, 0).0, [255, 255, 255, 255]);
    }
}
