//! Tunables for the mask refinement pipeline.

use crate::segmentation::Accuracy;
use thiserror::Error;

/// Smallest RGB scale the compositor accepts.
pub const MIN_RGB_SHRINK: f32 = 0.975;
/// Largest RGB scale the compositor accepts (no shrink).
pub const MAX_RGB_SHRINK: f32 = 1.0;

/// Fraction of the feather radius used for the compositor's final softening pass.
pub const FINAL_SOFTEN_RATIO: f32 = 0.6;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("EMA weight must be in (0, 1], got {0}")]
    EmaAlphaOutOfRange(f32),

    #[error("model cadence divider must be at least 1")]
    ZeroCadenceDivider,

    #[error("{name} must be a finite number of pixels, got {value}")]
    NonFiniteRadius { name: &'static str, value: f32 },

    #[error("RGB shrink factor must be finite, got {0}")]
    NonFiniteShrink(f32),
}

/// Pipeline configuration, passed into the controller at construction
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Edge softening radius in pixels
    pub feather_radius: f32,
    /// Edge growth radius in pixels
    pub dilate_radius: f32,
    /// Weight of the newest raw mask in the moving average
    pub ema_alpha: f32,
    /// Uniform RGB scale, clamped into [0.975, 1.0] when used
    pub rgb_shrink_factor: f32,
    /// Run the model on every Nth camera tick
    pub model_cadence_divider: u32,
    /// Model accuracy mode
    pub accuracy: Accuracy,
    /// Extra blur of the output matte at `feather_radius * 0.6`
    pub final_soften: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            feather_radius: 1.0,
            dilate_radius: 0.5,
            ema_alpha: 0.35,
            rgb_shrink_factor: 0.985,
            model_cadence_divider: 1,
            accuracy: Accuracy::Accurate,
            final_soften: true,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return Err(ConfigError::EmaAlphaOutOfRange(self.ema_alpha));
        }
        if self.model_cadence_divider == 0 {
            return Err(ConfigError::ZeroCadenceDivider);
        }
        for (name, value) in [
            ("feather radius", self.feather_radius),
            ("dilate radius", self.dilate_radius),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NonFiniteRadius { name, value });
            }
        }
        if !self.rgb_shrink_factor.is_finite() {
            return Err(ConfigError::NonFiniteShrink(self.rgb_shrink_factor));
        }
        Ok(())
    }

    /// Shrink factor as the compositor applies it
    pub fn clamped_shrink(&self) -> f32 {
        clamp_shrink(self.rgb_shrink_factor)
    }
}

pub fn clamp_shrink(factor: f32) -> f32 {
    if factor.is_nan() {
        return MAX_RGB_SHRINK;
    }
    factor.clamp(MIN_RGB_SHRINK, MAX_RGB_SHRINK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(PipelineConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_bad_values() {
        let config = PipelineConfig {
            ema_alpha: 0.0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmaAlphaOutOfRange(0.0)));

        let config = PipelineConfig {
            model_cadence_divider: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroCadenceDivider));

        let config = PipelineConfig {
            feather_radius: f32::INFINITY,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonFiniteRadius { name: "feather radius", .. })
        ));
    }

    #[test]
    fn full_weight_is_allowed() {
        let config = PipelineConfig {
            ema_alpha: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn shrink_is_clamped() {
        assert_eq!(clamp_shrink(0.5), MIN_RGB_SHRINK);
        assert_eq!(clamp_shrink(1.2), MAX_RGB_SHRINK);
        assert_eq!(clamp_shrink(0.99), 0.99);
        assert_eq!(clamp_shrink(f32::NAN), MAX_RGB_SHRINK);
    }
}
