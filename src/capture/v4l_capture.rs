use super::{CaptureSource, ResolutionPreset};
use anyhow::{anyhow, Context, Result};
use image::{imageops, RgbImage};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;

/// User-facing webcam
pub struct WebcamCapture {
    camera: Camera,
    width: u32,
    height: u32,
    mirror: bool,
}

impl WebcamCapture {
    /// Open the camera at the closest format to the preset
    ///
    /// Failure here is fatal to the session: no device, no permission, or no
    /// format the camera will stream.
    pub fn new(device_index: u32, preset: ResolutionPreset, fps: u32, mirror: bool) -> Result<Self> {
        let (width, height) = preset.dimensions();
        tracing::info!(
            "Initializing webcam {} at {}x{} ({:?})",
            device_index,
            width,
            height,
            preset
        );

        let wanted = CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, fps);
        let attempts = [
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(wanted)),
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        ];

        let mut last_err = None;
        let mut opened = None;
        for requested in attempts {
            match Camera::new(CameraIndex::Index(device_index), requested) {
                Ok(mut camera) => match camera.open_stream() {
                    Ok(()) => {
                        opened = Some(camera);
                        break;
                    }
                    Err(err) => last_err = Some(anyhow!(err)),
                },
                Err(err) => last_err = Some(anyhow!(err)),
            }
        }

        let camera = match opened {
            Some(camera) => camera,
            None => {
                return Err(last_err
                    .unwrap_or_else(|| anyhow!("no camera format accepted"))
                    .context("Failed to open camera stream"))
            }
        };

        let negotiated = camera.resolution();
        tracing::info!(
            "Webcam streaming at {}x{}",
            negotiated.width(),
            negotiated.height()
        );

        Ok(Self {
            camera,
            width: negotiated.width(),
            height: negotiated.height(),
            mirror,
        })
    }
}

impl CaptureSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<RgbImage> {
        let frame = self.camera.frame().context("Failed to capture frame")?;

        let mut decoded = frame
            .decode_image::<RgbFormat>()
            .context("Failed to decode frame")?;

        if self.mirror {
            imageops::flip_horizontal_in_place(&mut decoded);
        }

        Ok(decoded)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
