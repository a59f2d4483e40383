//! ImageUtils - photo alignment and exposure/focus fusion.
//!
//! This library provides:
//! - Feature-based registration of a candidate photo onto a reference
//! - Robust transform estimation (translation up to full homography)
//! - Resampling with a coverage mask for pixels outside the source
//! - Multi-resolution fusion of bracketed exposures or focus brackets
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use imageutils::{Aligner, AlignerConfig, Fuser, FusionConfig};
//!
//! let mut aligner = Aligner::new(AlignerConfig::default())?;
//! aligner.set_reference_image("ref.png", None, false)?;
//! let report = aligner.align_image("shot_2.png", "shot_2_aligned.png".as_ref(), false)?;
//! println!("{} inliers of {} matches", report.inliers, report.matches);
//!
//! let fuser = Fuser::new(FusionConfig::exposure())?;
//! fuser.fuse_images(&["ref.png", "shot_2_aligned.png"], "fused.tiff".as_ref())?;
//! ```

pub(crate) mod common;
pub mod error;
pub mod fusion;
pub mod image;
pub mod logging;
pub mod registration;

#[cfg(test)]
pub(crate) mod testing;

pub mod prelude;

// ============================================================================
// Errors
// ============================================================================

pub use error::{Error, ErrorKind, RejectionReason, Result};

// ============================================================================
// Images
// ============================================================================

pub use common::Buffer2;
pub use crate::image::{Image, ImageDimensions, PixelPrecision, load_image, save_image};

// ============================================================================
// Registration
// ============================================================================

pub use registration::{
    // Configuration
    AlignerConfig,
    FeatureConfig,
    InterpolationMethod,
    MatchConfig,
    PlausibilityLimits,
    PreviewConfig,
    RansacConfig,
    WarpConfig,
    // Main API
    AlignedImage,
    Aligner,
    AlignmentReport,
    // Pipeline stages
    Correspondence,
    Estimate,
    Feature,
    FeatureExtractor,
    FeatureSet,
    MatchSet,
    Matcher,
    RansacEstimator,
    Transform,
    TransformType,
    estimate_transform,
    warp_image,
};

// ============================================================================
// Fusion
// ============================================================================

pub use fusion::{Composite, Fuser, FusionConfig, FusionMode, FusionStack};

// ============================================================================
// Logging
// ============================================================================

pub use logging::init_logging;
