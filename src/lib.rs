//! Live person cut-out from a webcam stream.
//!
//! A segmentation model produces a raw alpha mask per frame; the
//! [`pipeline`] turns it into a stable matte (moving average, edge polish)
//! and composites the person out of the current frame.

pub mod capture;
pub mod control;
pub mod output;
pub mod pipeline;
pub mod segmentation;
