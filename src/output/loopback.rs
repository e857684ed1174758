use super::{flatten_into, OutputSink};
use anyhow::{Context, Result};
use image::{imageops, Rgb, RgbImage, RgbaImage};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

/// v4l2loopback virtual camera
///
/// Virtual cameras carry no alpha, so the cut-out is flattened over a key
/// color before conversion to YUYV.
pub struct V4L2Output {
    file: File,
    width: u32,
    height: u32,
    background: Rgb<u8>,
    flat: RgbImage,
    yuyv: Vec<u8>,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(
        device_path: P,
        width: u32,
        height: u32,
        background: Rgb<u8>,
    ) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2 device at {}", path.display()))?;
        let requested = Format::new(width, height, FourCC::new(b"YUYV"));
        let actual = Output::set_format(&device, &requested)
            .context("Failed to set YUYV output format")?;
        if (actual.width, actual.height) != (width, height) {
            tracing::warn!(
                "Loopback device accepted {}x{} instead of {}x{}",
                actual.width,
                actual.height,
                width,
                height
            );
        }

        // v4l2loopback accepts raw frame data written to the device file
        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        tracing::info!("v4l2loopback device opened successfully");

        Ok(Self {
            file,
            width,
            height,
            background,
            flat: RgbImage::new(width, height),
            yuyv: Vec::with_capacity((width * height * 2) as usize),
        })
    }
}

/// Pack an RGB frame as YUYV (YUV 4:2:2), reusing `out`
fn rgb_to_yuyv(rgb_image: &RgbImage, out: &mut Vec<u8>) {
    let (width, height) = rgb_image.dimensions();
    out.clear();

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let first = rgb_image.get_pixel(x, y);
            let second = if x + 1 < width {
                rgb_image.get_pixel(x + 1, y)
            } else {
                first
            };

            let (y1, u1, v1) = rgb_to_yuv(first);
            let (y2, u2, v2) = rgb_to_yuv(second);

            // Chroma is shared by the pixel pair
            let u = ((u1 as u16 + u2 as u16) / 2) as u8;
            let v = ((v1 as u16 + v2 as u16) / 2) as u8;

            out.extend_from_slice(&[y1, u, y2, v]);
        }
    }
}

fn rgb_to_yuv(pixel: &Rgb<u8>) -> (u8, u8, u8) {
    let [r, g, b] = pixel.0.map(|c| c as f32);

    let y = (0.299 * r + 0.587 * g + 0.114 * b).clamp(0.0, 255.0) as u8;
    let u = ((-0.147 * r - 0.289 * g + 0.436 * b) + 128.0).clamp(0.0, 255.0) as u8;
    let v = ((0.615 * r - 0.515 * g - 0.100 * b) + 128.0).clamp(0.0, 255.0) as u8;

    (y, u, v)
}

impl OutputSink for V4L2Output {
    fn write_frame(&mut self, frame: &RgbaImage) -> Result<()> {
        flatten_into(frame, self.background, &mut self.flat);
        if self.flat.dimensions() == (self.width, self.height) {
            rgb_to_yuyv(&self.flat, &mut self.yuyv);
        } else {
            let scaled = imageops::resize(
                &self.flat,
                self.width,
                self.height,
                imageops::FilterType::Triangle,
            );
            rgb_to_yuyv(&scaled, &mut self.yuyv);
        }

        self.file
            .write_all(&self.yuyv)
            .context("Failed to write frame to v4l2loopback device")?;

        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_packs_two_pixels_per_macropixel() {
        let frame = RgbImage::from_fn(3, 2, |x, _| {
            if x == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let mut out = Vec::new();

        rgb_to_yuyv(&frame, &mut out);

        // Odd width pads the last pair with the edge pixel.
        assert_eq!(out.len(), 2 * 2 * 4);
        assert!(out[0] >= 254);
        assert_eq!(out[2], 0);
        assert_eq!(out[4], 0);
        assert_eq!(out[6], 0);
    }

    #[test]
    fn gray_has_neutral_chroma() {
        let (y, u, v) = rgb_to_yuv(&Rgb([128, 128, 128]));
        assert!((y as i16 - 128).abs() <= 1);
        assert!((u as i16 - 128).abs() <= 1);
        assert!((v as i16 - 128).abs() <= 1);
    }
}
