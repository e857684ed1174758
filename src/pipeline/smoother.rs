use super::buffers::MaskBuffers;
use super::raster::RasterOps;

/// Exponential moving average over raw masks
///
/// `smoothed = (1 - alpha) * smoothed + alpha * raw`, pointwise. The first
/// blend after a reset starts from a blank mask, so coverage ramps up over
/// the first few masks.
#[derive(Debug, Clone, Copy)]
pub struct TemporalSmoother {
    alpha: f32,
}

impl TemporalSmoother {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Blend `buffers.raw` into `buffers.smoothed`, using `scratch` as the target
    pub fn blend<R: RasterOps + ?Sized>(&self, ops: &mut R, buffers: &mut MaskBuffers) {
        let _span = tracing::debug_span!("smooth", alpha = self.alpha).entered();

        ops.clear(&mut buffers.scratch);
        ops.draw_with_opacity(&mut buffers.scratch, &buffers.smoothed, 1.0 - self.alpha);
        ops.draw_with_opacity(&mut buffers.scratch, &buffers.raw, self.alpha);
        std::mem::swap(&mut buffers.smoothed, &mut buffers.scratch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::raster::SoftwareRaster;
    use image::Luma;

    fn held_input(alpha: f32, ticks: usize, value: f32) -> Vec<f32> {
        let mut ops = SoftwareRaster::new();
        let mut buffers = MaskBuffers::new(3, 3);
        let smoother = TemporalSmoother::new(alpha);
        buffers.raw = image::ImageBuffer::from_pixel(3, 3, Luma([value]));

        (0..ticks)
            .map(|_| {
                smoother.blend(&mut ops, &mut buffers);
                buffers.smoothed.get_pixel(1, 1)[0]
            })
            .collect()
    }

    #[test]
    fn first_blend_starts_from_blank() {
        let history = held_input(0.35, 1, 1.0);
        assert!((history[0] - 0.35).abs() < 1e-6);
    }

    #[test]
    fn converges_monotonically_for_any_weight() {
        for alpha in [0.05, 0.35, 0.5, 0.9] {
            let history = held_input(alpha, 200, 0.8);
            for pair in history.windows(2) {
                assert!(pair[1] >= pair[0] - 1e-6, "alpha {alpha} not monotone: {pair:?}");
                assert!(pair[1] <= 0.8 + 1e-6);
            }
            assert!((history[199] - 0.8).abs() < 1e-3, "alpha {alpha} ended at {}", history[199]);
        }
    }

    #[test]
    fn full_weight_passes_raw_through() {
        let history = held_input(1.0, 2, 0.6);
        assert!((history[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn zero_weight_freezes_mask() {
        assert_eq!(TemporalSmoother::new(-0.5).alpha(), 0.0);
        let history = held_input(0.0, 5, 1.0);
        assert!(history.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn decays_toward_new_value() {
        let mut ops = SoftwareRaster::new();
        let mut buffers = MaskBuffers::new(2, 2);
        let smoother = TemporalSmoother::new(0.5);
        buffers.smoothed = image::ImageBuffer::from_pixel(2, 2, Luma([1.0]));

        smoother.blend(&mut ops, &mut buffers);

        assert!((buffers.smoothed.get_pixel(0, 0)[0] - 0.5).abs() < 1e-6);
        assert!(buffers.matches(2, 2));
    }
}
