use super::OutputSink;
use anyhow::{Context, Result};
use image::RgbaImage;
use std::fs;
use std::path::PathBuf;

/// Writes every Nth composited frame as a PNG, alpha included
pub struct FrameDump {
    directory: PathBuf,
    every: u64,
    seen: u64,
    resolution: (u32, u32),
}

impl FrameDump {
    pub fn new(directory: impl Into<PathBuf>, every: u64) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)
            .with_context(|| format!("Failed to create dump directory {}", directory.display()))?;
        tracing::info!("Dumping every {} frame(s) to {}", every.max(1), directory.display());

        Ok(Self {
            directory,
            every: every.max(1),
            seen: 0,
            resolution: (0, 0),
        })
    }

    fn path_for(&self, index: u64) -> PathBuf {
        self.directory.join(format!("frame_{index:06}.png"))
    }
}

impl OutputSink for FrameDump {
    fn write_frame(&mut self, frame: &RgbaImage) -> Result<()> {
        let index = self.seen;
        self.seen += 1;
        self.resolution = frame.dimensions();
        if index % self.every != 0 {
            return Ok(());
        }

        let path = self.path_for(index);
        frame
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }
}
