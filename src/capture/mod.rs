mod v4l_capture;

pub use v4l_capture::WebcamCapture;

use anyhow::Result;
use image::RgbImage;

/// Camera resolution presets offered to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ResolutionPreset {
    /// 640x360
    Low,
    /// 1280x720
    Standard,
    /// 1920x1080
    High,
}

impl ResolutionPreset {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            ResolutionPreset::Low => (640, 360),
            ResolutionPreset::Standard => (1280, 720),
            ResolutionPreset::High => (1920, 1080),
        }
    }
}

/// Trait for camera capture sources
pub trait CaptureSource {
    /// Capture a single frame
    fn capture_frame(&mut self) -> Result<RgbImage>;

    /// Resolution the source negotiated
    fn resolution(&self) -> (u32, u32);
}
