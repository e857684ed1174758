//! Mask refinement and compositing.
//!
//! Per tick: raw mask -> [`TemporalSmoother`] -> [`EdgePolisher`] -> [`Compositor`],
//! driven by the [`Controller`].

mod buffers;
mod compositor;
pub mod config;
mod controller;
mod polish;
pub mod raster;
mod smoother;

pub use buffers::MaskBuffers;
pub use compositor::Compositor;
pub use config::{ConfigError, PipelineConfig};
pub use controller::{Controller, ControllerStats, ReuseReason, TickOutcome};
pub use polish::EdgePolisher;
pub use raster::{CompositeMode, RasterOps, SoftwareRaster};
pub use smoother::TemporalSmoother;
