//! Error types shared by the alignment and fusion pipelines.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::image::ImageDimensions;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure category used by callers that only need to branch on the
/// kind of failure, not its details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConstructionFailure,
    DecodeFailure,
    InsufficientCorrespondences,
    AlignmentRejected,
    DimensionMismatch,
    IoFailure,
    InvalidState,
}

/// Why a candidate alignment or a fusion stack was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectionReason {
    /// Both images have features but too few of them survived the ratio test.
    TooFewMatches { matches: usize, required: usize },
    /// Best consensus model explains too small a share of the matches.
    LowInlierRatio {
        inliers: usize,
        total: usize,
        required_ratio: f64,
    },
    /// Best consensus model has too few inliers in absolute terms.
    TooFewInliers { inliers: usize, required: usize },
    /// Inliers are bunched in a small part of the frame, so the model is not
    /// constrained across it.
    ClusteredInliers { span: f64, required: f64 },
    /// Every sampled model failed the plausibility check.
    NoPlausibleModel { iterations: usize },
    /// The final transform cannot be inverted.
    SingularTransform,
    /// None of the frames handed to the fuser passed the overlap check.
    NoValidFrames { frames: usize },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooFewMatches { matches, required } => {
                write!(f, "only {matches} feature matches, need {required}")
            }
            Self::LowInlierRatio {
                inliers,
                total,
                required_ratio,
            } => write!(
                f,
                "inlier ratio {:.1}% ({inliers}/{total}) below {:.1}%",
                100.0 * *inliers as f64 / (*total).max(1) as f64,
                100.0 * required_ratio
            ),
            Self::TooFewInliers { inliers, required } => {
                write!(f, "only {inliers} inliers, need {required}")
            }
            Self::ClusteredInliers { span, required } => write!(
                f,
                "inliers cover {:.1}% of the frame, need {:.1}%",
                100.0 * span,
                100.0 * required
            ),
            Self::NoPlausibleModel { iterations } => {
                write!(f, "no plausible transform after {iterations} iterations")
            }
            Self::SingularTransform => write!(f, "transform is singular"),
            Self::NoValidFrames { frames } => {
                write!(f, "none of {frames} frames has sufficient overlap")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to construct {component}: {reason}")]
    Construction {
        component: &'static str,
        reason: String,
    },

    #[error("failed to decode image '{path}'")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("unsupported pixel layout {color} in '{path}'")]
    UnsupportedLayout { path: PathBuf, color: String },

    #[error("malformed image: {reason}")]
    MalformedImage { reason: String },

    #[error("insufficient correspondences: {found} available, {required} required")]
    InsufficientCorrespondences { found: usize, required: usize },

    #[error("alignment rejected: {0}")]
    AlignmentRejected(RejectionReason),

    #[error("dimension mismatch at frame {index}: expected {expected}, got {actual}")]
    DimensionMismatch {
        index: usize,
        expected: ImageDimensions,
        actual: ImageDimensions,
    },

    #[error("fusion stack is empty")]
    EmptyStack,

    #[error("failed to write '{path}'")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode '{path}'")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("no reference image has been set")]
    ReferenceNotSet,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Construction { .. } => ErrorKind::ConstructionFailure,
            Self::Decode { .. } | Self::UnsupportedLayout { .. } | Self::MalformedImage { .. } => {
                ErrorKind::DecodeFailure
            }
            Self::InsufficientCorrespondences { .. } => ErrorKind::InsufficientCorrespondences,
            Self::AlignmentRejected(_) => ErrorKind::AlignmentRejected,
            Self::DimensionMismatch { .. } | Self::EmptyStack => ErrorKind::DimensionMismatch,
            Self::Write { .. } | Self::Encode { .. } => ErrorKind::IoFailure,
            Self::ReferenceNotSet => ErrorKind::InvalidState,
        }
    }

    pub(crate) fn invalid_config(component: &'static str, reason: impl Into<String>) -> Self {
        Self::Construction {
            component,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedImage {
            reason: reason.into(),
        }
    }
}

impl From<RejectionReason> for Error {
    fn from(reason: RejectionReason) -> Self {
        Self::AlignmentRejected(reason)
    }
}
