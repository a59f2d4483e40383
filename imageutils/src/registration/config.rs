//! Configuration for feature extraction, matching, estimation and warping.

use serde::{Deserialize, Serialize};

use super::transform::TransformType;
use crate::error::{Error, Result};

fn ensure(condition: bool, component: &'static str, reason: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::invalid_config(component, reason))
    }
}

// ============================================================================
// Feature extraction
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Upper bound on returned features, strongest first.
    pub max_features: usize,
    /// Responses below this fraction of the strongest response are dropped.
    pub quality_level: f32,
    /// Absolute floor on the corner response (mean structure-tensor eigenvalue
    /// on `[0, 1]` intensities). Flat or noise-only images stay featureless.
    pub min_response: f32,
    /// Minimum distance in pixels between two accepted features.
    pub min_distance: f32,
    /// Gaussian pre-smoothing applied to luminance.
    pub blur_sigma: f32,
    /// Half-size of the structure-tensor window.
    pub window_radius: usize,
    /// Half-size in pixels of the descriptor patch.
    pub patch_radius: usize,
    /// Sampling step inside the descriptor patch.
    pub patch_step: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            max_features: 1000,
            quality_level: 0.01,
            min_response: 1e-4,
            min_distance: 5.0,
            blur_sigma: 1.0,
            window_radius: 2,
            patch_radius: 8,
            patch_step: 2,
        }
    }
}

impl FeatureConfig {
    /// Length of the descriptor vectors produced with this configuration.
    pub fn descriptor_len(&self) -> usize {
        let side = 2 * (self.patch_radius / self.patch_step) + 1;
        side * side
    }

    pub fn validate(&self) -> Result<()> {
        const C: &str = "feature extractor";
        ensure(self.max_features > 0, C, "max_features must be positive")?;
        ensure(
            (0.0..1.0).contains(&self.quality_level),
            C,
            "quality_level must be in [0, 1)",
        )?;
        ensure(self.min_response >= 0.0, C, "min_response must be non-negative")?;
        ensure(self.min_distance >= 1.0, C, "min_distance must be at least 1")?;
        ensure(self.blur_sigma >= 0.0, C, "blur_sigma must be non-negative")?;
        ensure(self.window_radius >= 1, C, "window_radius must be at least 1")?;
        ensure(self.patch_step >= 1, C, "patch_step must be at least 1")?;
        ensure(
            self.patch_radius >= self.patch_step,
            C,
            "patch_radius must be at least patch_step",
        )
    }
}

// ============================================================================
// Matching
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Nearest/second-nearest distance ratio a match must stay below.
    pub ratio: f32,
    /// Absolute distance cap between unit-norm descriptors (range `[0, 2]`).
    pub max_distance: f32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            ratio: 0.75,
            max_distance: 0.9,
        }
    }
}

impl MatchConfig {
    pub fn validate(&self) -> Result<()> {
        const C: &str = "matcher";
        ensure(
            self.ratio > 0.0 && self.ratio <= 1.0,
            C,
            "ratio must be in (0, 1]",
        )?;
        ensure(
            self.max_distance > 0.0 && self.max_distance <= 2.0,
            C,
            "max_distance must be in (0, 2]",
        )
    }
}

// ============================================================================
// Robust estimation
// ============================================================================

/// Bounds a fitted transform must respect to be considered at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlausibilityLimits {
    /// Both singular values of the linear part must lie in
    /// `[1 / max_scale, max_scale]`.
    pub max_scale: f64,
    /// Upper bound on `sigma_max / sigma_min` (shear and anisotropic scale).
    pub max_anisotropy: f64,
    /// Upper bound on rotation in radians.
    pub max_rotation: Option<f64>,
    /// Upper bound on `|h20|` and `|h21|` of a homography.
    pub max_perspective: f64,
}

impl Default for PlausibilityLimits {
    fn default() -> Self {
        Self {
            max_scale: 2.0,
            max_anisotropy: 1.5,
            max_rotation: None,
            max_perspective: 0.002,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RansacConfig {
    pub max_iterations: usize,
    /// Reprojection error in pixels below which a match is an inlier.
    pub inlier_threshold: f64,
    /// Target probability of having drawn one all-inlier sample; drives early exit.
    pub confidence: f64,
    pub min_inlier_ratio: f64,
    pub min_inliers: usize,
    /// Inliers required per degree of freedom of the model, on top of
    /// `min_inliers`.
    pub min_inliers_per_dof: usize,
    /// Smallest share of the candidate image the inliers' bounding box must
    /// cover. Only checked when the candidate size is known.
    pub min_inlier_span: f64,
    /// Fixed seed keeps estimation reproducible. `None` seeds from the OS.
    pub seed: Option<u64>,
    /// Refit on the inliers of every new best model.
    pub local_optimization: bool,
    pub lo_max_iterations: usize,
    pub limits: PlausibilityLimits,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            inlier_threshold: 2.0,
            confidence: 0.999,
            min_inlier_ratio: 0.4,
            min_inliers: 6,
            min_inliers_per_dof: 2,
            min_inlier_span: 0.05,
            seed: Some(0x5EED_1DEA),
            local_optimization: true,
            lo_max_iterations: 10,
            limits: PlausibilityLimits::default(),
        }
    }
}

impl RansacConfig {
    pub fn validate(&self) -> Result<()> {
        const C: &str = "transform estimator";
        ensure(self.max_iterations > 0, C, "max_iterations must be positive")?;
        ensure(
            self.inlier_threshold > 0.0,
            C,
            "inlier_threshold must be positive",
        )?;
        ensure(
            self.confidence > 0.0 && self.confidence < 1.0,
            C,
            "confidence must be in (0, 1)",
        )?;
        ensure(
            (0.0..=1.0).contains(&self.min_inlier_ratio),
            C,
            "min_inlier_ratio must be in [0, 1]",
        )?;
        ensure(
            (0.0..=1.0).contains(&self.min_inlier_span),
            C,
            "min_inlier_span must be in [0, 1]",
        )?;
        ensure(self.limits.max_scale >= 1.0, C, "max_scale must be >= 1")?;
        ensure(
            self.limits.max_anisotropy >= 1.0,
            C,
            "max_anisotropy must be >= 1",
        )?;
        ensure(
            self.limits.max_perspective >= 0.0,
            C,
            "max_perspective must be non-negative",
        )?;
        if let Some(rot) = self.limits.max_rotation {
            ensure(rot > 0.0, C, "max_rotation must be positive")?;
        }
        Ok(())
    }
}

// ============================================================================
// Warping
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InterpolationMethod {
    Nearest,
    #[default]
    Bilinear,
    /// Catmull-Rom cubic.
    Bicubic,
    Lanczos3,
}

impl InterpolationMethod {
    pub fn kernel_radius(&self) -> usize {
        match self {
            Self::Nearest => 0,
            Self::Bilinear => 1,
            Self::Bicubic => 2,
            Self::Lanczos3 => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarpConfig {
    pub method: InterpolationMethod,
    /// Value written to unfilled pixels.
    pub border_value: f32,
    /// Overlap ratio an aligned frame needs to be marked valid.
    pub min_overlap: f64,
}

impl Default for WarpConfig {
    fn default() -> Self {
        Self {
            method: InterpolationMethod::Bilinear,
            border_value: 0.0,
            min_overlap: 0.5,
        }
    }
}

impl WarpConfig {
    pub fn validate(&self) -> Result<()> {
        ensure(
            (0.0..=1.0).contains(&self.min_overlap),
            "warper",
            "min_overlap must be in [0, 1]",
        )
    }
}

// ============================================================================
// Aligner
// ============================================================================

/// Reduced budgets used when alignment runs in preview mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Images are halved until their longest side fits.
    pub max_dimension: usize,
    pub max_features: usize,
    pub max_iterations: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            max_dimension: 1024,
            max_features: 400,
            max_iterations: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignerConfig {
    pub transform_type: TransformType,
    pub features: FeatureConfig,
    pub matching: MatchConfig,
    pub ransac: RansacConfig,
    pub warp: WarpConfig,
    pub preview: PreviewConfig,
    /// Fewer ratio-test survivors than this rejects the pair outright.
    pub min_matches: usize,
    /// Worker threads; `None` uses rayon's default.
    pub threads: Option<usize>,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            transform_type: TransformType::Affine,
            features: FeatureConfig::default(),
            matching: MatchConfig::default(),
            ransac: RansacConfig::default(),
            warp: WarpConfig::default(),
            preview: PreviewConfig::default(),
            min_matches: 6,
            threads: None,
        }
    }
}

impl AlignerConfig {
    /// Tripod-style preset: similarity model with smaller budgets.
    pub fn fast() -> Self {
        Self {
            transform_type: TransformType::Similarity,
            features: FeatureConfig {
                max_features: 500,
                ..FeatureConfig::default()
            },
            ransac: RansacConfig {
                max_iterations: 500,
                ..RansacConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.features.validate()?;
        self.matching.validate()?;
        self.ransac.validate()?;
        self.warp.validate()?;
        ensure(
            self.preview.max_dimension >= 16,
            "aligner",
            "preview.max_dimension must be at least 16",
        )?;
        ensure(
            self.preview.max_features > 0 && self.preview.max_iterations > 0,
            "aligner",
            "preview budgets must be positive",
        )?;
        ensure(
            self.min_matches >= 1,
            "aligner",
            "min_matches must be positive",
        )?;
        ensure(
            self.threads != Some(0),
            "aligner",
            "threads must be positive when set",
        )
    }
}
