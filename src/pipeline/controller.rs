use super::buffers::MaskBuffers;
use super::compositor::Compositor;
use super::config::{ConfigError, PipelineConfig};
use super::polish::EdgePolisher;
use super::raster::{RasterOps, SoftwareRaster};
use super::smoother::TemporalSmoother;
use crate::segmentation::{resample_into, Accuracy, AlphaMask, MaskProvider};
use image::{RgbImage, RgbaImage};

/// Why a tick re-used the existing smoothed mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReuseReason {
    /// Not a model tick under the cadence divider
    Cadence,
    /// A model call was issued this tick and has not answered yet
    Pending,
    /// A model call from an earlier tick is still in flight
    ModelBusy,
    /// The model call for this tick failed
    ModelFailed,
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A new mask was smoothed, polished and composited
    Refreshed,
    /// The previous smoothed mask was composited against the new frame
    Reused(ReuseReason),
    /// Nothing was drawn; the output still holds the previous frame
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub ticks: u64,
    pub refreshed: u64,
    pub reused: u64,
    pub model_failures: u64,
    pub skipped: u64,
}

/// Drives one refinement cycle per camera tick
///
/// Owns the configuration, the mask buffers and the output surface. Every
/// tick is isolated: model errors and size mismatches are recorded in the
/// returned [`TickOutcome`] and never stop the stream.
pub struct Controller<P, R = SoftwareRaster> {
    config: PipelineConfig,
    provider: P,
    ops: R,
    buffers: MaskBuffers,
    output: RgbaImage,
    smoother: TemporalSmoother,
    polisher: EdgePolisher,
    compositor: Compositor,
    // Ticks since the last resize; the model runs when this is a multiple of the divider
    cadence_tick: u64,
    stats: ControllerStats,
    stopped: bool,
}

impl<P: MaskProvider> Controller<P, SoftwareRaster> {
    pub fn new(config: PipelineConfig, provider: P) -> Result<Self, ConfigError> {
        Self::with_raster(config, provider, SoftwareRaster::new())
    }
}

impl<P: MaskProvider, R: RasterOps> Controller<P, R> {
    pub fn with_raster(config: PipelineConfig, mut provider: P, ops: R) -> Result<Self, ConfigError> {
        config.validate()?;
        provider.set_accuracy(config.accuracy);

        tracing::info!(
            "Pipeline: ema_alpha={}, dilate={}px, feather={}px, rgb_shrink={}, cadence=1/{}, accuracy={:?}",
            config.ema_alpha,
            config.dilate_radius,
            config.feather_radius,
            config.clamped_shrink(),
            config.model_cadence_divider,
            config.accuracy
        );

        Ok(Self {
            smoother: TemporalSmoother::new(config.ema_alpha),
            polisher: EdgePolisher::new(config.dilate_radius, config.feather_radius),
            compositor: Compositor::new(
                config.rgb_shrink_factor,
                config.feather_radius,
                config.final_soften,
            ),
            config,
            provider,
            ops,
            buffers: MaskBuffers::new(0, 0),
            output: RgbaImage::new(0, 0),
            cadence_tick: 0,
            stats: ControllerStats::default(),
            stopped: false,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Replace the configuration; takes effect on the next tick
    pub fn set_config(&mut self, config: PipelineConfig) -> Result<(), ConfigError> {
        config.validate()?;
        if config.accuracy != self.config.accuracy {
            self.provider.set_accuracy(config.accuracy);
        }
        self.smoother = TemporalSmoother::new(config.ema_alpha);
        self.polisher = EdgePolisher::new(config.dilate_radius, config.feather_radius);
        self.compositor = Compositor::new(
            config.rgb_shrink_factor,
            config.feather_radius,
            config.final_soften,
        );
        self.config = config;
        Ok(())
    }

    /// Switch the model accuracy without restarting the stream
    pub fn set_accuracy(&mut self, accuracy: Accuracy) {
        if accuracy == self.config.accuracy {
            return;
        }
        tracing::info!("Model accuracy -> {:?}", accuracy);
        self.config.accuracy = accuracy;
        self.provider.set_accuracy(accuracy);
    }

    /// Reallocate buffers and output for a new resolution, dropping all history
    pub fn resize(&mut self, width: u32, height: u32) {
        self.buffers.resize(width, height);
        self.output = RgbaImage::new(width, height);
        self.provider.reset();
        self.cadence_tick = 0;
    }

    /// Run one cycle for `frame`
    pub fn tick(&mut self, frame: &RgbImage) -> TickOutcome {
        let outcome = self.run_cycle(frame);

        self.stats.ticks += 1;
        match outcome {
            TickOutcome::Refreshed => self.stats.refreshed += 1,
            TickOutcome::Reused(reason) => {
                self.stats.reused += 1;
                if reason == ReuseReason::ModelFailed {
                    self.stats.model_failures += 1;
                }
            }
            TickOutcome::Skipped => self.stats.skipped += 1,
        }
        outcome
    }

    fn run_cycle(&mut self, frame: &RgbImage) -> TickOutcome {
        if self.stopped {
            return TickOutcome::Skipped;
        }

        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            tracing::warn!("Ignoring empty frame");
            return TickOutcome::Skipped;
        }
        if !self.buffers.matches(width, height) {
            self.resize(width, height);
        }

        let model_tick = self.cadence_tick % u64::from(self.config.model_cadence_divider) == 0;
        self.cadence_tick += 1;

        let (mut requested, mut busy) = (false, false);
        if model_tick {
            if self.provider.in_flight() {
                busy = true;
            } else {
                requested = self.provider.submit(frame);
                busy = !requested;
            }
        }

        let outcome = match self.provider.poll() {
            Some(Ok(mask)) => {
                self.refine(&mask);
                TickOutcome::Refreshed
            }
            Some(Err(err)) => {
                tracing::warn!("Segmentation failed, reusing previous mask: {:#}", err);
                TickOutcome::Reused(ReuseReason::ModelFailed)
            }
            None if busy => TickOutcome::Reused(ReuseReason::ModelBusy),
            None if requested => TickOutcome::Reused(ReuseReason::Pending),
            None => TickOutcome::Reused(ReuseReason::Cadence),
        };

        if self.output.dimensions() != (width, height) || !self.buffers.matches(width, height) {
            tracing::warn!("Surface size mismatch for {}x{} frame, skipping", width, height);
            return TickOutcome::Skipped;
        }

        self.compositor
            .composite(&mut self.ops, &self.buffers.smoothed, frame, &mut self.output);

        outcome
    }

    fn refine(&mut self, mask: &AlphaMask) {
        resample_into(mask, &mut self.buffers.raw);
        self.smoother.blend(&mut self.ops, &mut self.buffers);
        self.polisher.polish(&mut self.ops, &mut self.buffers.smoothed);
    }

    /// The composited frame from the last drawn tick
    pub fn output(&self) -> &RgbaImage {
        &self.output
    }

    /// Smoothed and polished mask
    pub fn smoothed_mask(&self) -> &AlphaMask {
        &self.buffers.smoothed
    }

    pub fn stats(&self) -> ControllerStats {
        self.stats
    }

    /// Stop processing. Results of a call still in flight are discarded.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        tracing::info!("Stopping pipeline after {} ticks", self.stats.ticks);
        self.stopped = true;
        self.provider.reset();
    }
}
