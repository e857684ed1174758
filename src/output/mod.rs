mod dump;
mod loopback;

pub use dump::FrameDump;
pub use loopback::V4L2Output;

use anyhow::Result;
use image::{Rgb, RgbImage, RgbaImage};

/// Trait for output destinations
pub trait OutputSink {
    /// Write a composited frame to the output
    fn write_frame(&mut self, frame: &RgbaImage) -> Result<()>;

    /// Get the expected output resolution
    fn resolution(&self) -> (u32, u32);
}

/// Flatten a cut-out over a solid background color into `out`
///
/// `out` is reallocated only when its size differs from `frame`.
pub fn flatten_into(frame: &RgbaImage, background: Rgb<u8>, out: &mut RgbImage) {
    if out.dimensions() != frame.dimensions() {
        *out = RgbImage::new(frame.width(), frame.height());
    }
    for (flat, pixel) in out.pixels_mut().zip(frame.pixels()) {
        let alpha = pixel[3] as u16;
        for c in 0..3 {
            let fg = pixel[c] as u16 * alpha;
            let bg = background[c] as u16 * (255 - alpha);
            flat[c] = ((fg + bg + 127) / 255) as u8;
        }
    }
}
