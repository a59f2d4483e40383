//! Photo registration: bringing a candidate image into a reference frame.
//!
//! # Transformation Models
//!
//! | Type | DOF | Description |
//! |------|-----|-------------|
//! | Translation | 2 | X/Y offset only |
//! | Euclidean | 3 | Translation + rotation |
//! | Similarity | 4 | Translation + rotation + uniform scale |
//! | Affine | 6 | Handles shear and differential scaling |
//! | Homography | 8 | Full perspective transformation |
//!
//! # Pipeline
//!
//! 1. **Features**: minimum-eigenvalue corners with normalized patch descriptors
//! 2. **Matching**: nearest neighbour with the ratio test, one-to-one
//! 3. **Sample consensus**: robust estimation with local optimization
//! 4. **Warping**: inverse mapping with a coverage mask

pub mod aligner;
pub mod config;
pub mod features;
pub mod matching;
pub mod ransac;
pub mod transform;
pub mod warp;

pub use aligner::{Aligner, AlignmentReport};
pub use config::{
    AlignerConfig, FeatureConfig, InterpolationMethod, MatchConfig, PlausibilityLimits,
    PreviewConfig, RansacConfig, WarpConfig,
};
pub use features::{Feature, FeatureExtractor, FeatureSet};
pub use matching::{Correspondence, MatchSet, Matcher};
pub use ransac::{Estimate, RansacEstimator, estimate_transform};
pub use transform::{Transform, TransformType};
pub use warp::{AlignedImage, warp_image};
