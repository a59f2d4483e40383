//! Fusion configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What the per-pixel weights reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FusionMode {
    /// Bracketed exposures: contrast, saturation and well-exposedness.
    #[default]
    Exposure,
    /// Focus brackets: locally smoothed contrast only.
    Focus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    pub mode: FusionMode,
    /// Exponent on the contrast measure.
    pub contrast_weight: f32,
    /// Exponent on the saturation measure. Ignored for single-channel stacks.
    pub saturation_weight: f32,
    /// Exponent on the well-exposedness measure.
    pub exposure_weight: f32,
    /// Width of the well-exposedness Gaussian around mid-gray.
    pub exposure_sigma: f32,
    /// Gaussian sigma smoothing the contrast measure in focus mode.
    pub focus_sigma: f32,
    /// Upper bound on pyramid levels.
    pub max_levels: usize,
    /// Frames decoded from files are valid when at least this fraction of
    /// their pixels is covered.
    pub min_overlap: f64,
    /// Worker threads; `None` uses rayon's default.
    pub threads: Option<usize>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self::exposure()
    }
}

impl FusionConfig {
    pub fn exposure() -> Self {
        Self {
            mode: FusionMode::Exposure,
            contrast_weight: 1.0,
            saturation_weight: 1.0,
            exposure_weight: 1.0,
            exposure_sigma: 0.2,
            focus_sigma: 2.0,
            max_levels: 8,
            min_overlap: 0.5,
            threads: None,
        }
    }

    pub fn focus() -> Self {
        Self {
            mode: FusionMode::Focus,
            contrast_weight: 2.0,
            saturation_weight: 0.0,
            exposure_weight: 0.0,
            ..Self::exposure()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |reason: &str| Err(Error::invalid_config("fuser", reason));
        let exponents = [self.contrast_weight, self.saturation_weight, self.exposure_weight];
        if exponents.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return fail("weight exponents must be finite and non-negative");
        }
        if exponents.iter().all(|w| *w == 0.0) {
            return fail("at least one weight exponent must be positive");
        }
        if !(self.exposure_sigma > 0.0) {
            return fail("exposure_sigma must be positive");
        }
        if !(self.focus_sigma >= 0.0) {
            return fail("focus_sigma must be non-negative");
        }
        if self.max_levels == 0 {
            return fail("max_levels must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.min_overlap) {
            return fail("min_overlap must be in [0, 1]");
        }
        if self.threads == Some(0) {
            return fail("threads must be positive when set");
        }
        Ok(())
    }
}
