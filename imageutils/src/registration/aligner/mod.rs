//! Aligning a sequence of images to one reference.
//!
//! # Stages
//!
//! 1. **Feature extraction** on the candidate (reference features are cached)
//! 2. **Matching** with the ratio test
//! 3. **Sample consensus** estimation of the candidate-to-reference transform
//! 4. **Warping** of the candidate into the reference frame
//!
//! Preview mode runs the same stages on copies reduced until their longest
//! side fits `preview.max_dimension`, with smaller budgets, and produces
//! output at that reduced resolution.


use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;

use rayon::ThreadPool;
use serde::{Deserialize, Serialize};

use super::config::{AlignerConfig, FeatureConfig, RansacConfig};
use super::features::{FeatureExtractor, FeatureSet};
use super::matching::Matcher;
use super::ransac::{Estimate, RansacEstimator};
use super::transform::Transform;
use super::warp::{AlignedImage, warp_image};
use crate::error::{Error, RejectionReason, Result};
use crate::image::{Image, ImageDimensions, load_image, save_image};

/// Summary of one file-to-file alignment.
///
/// Carries both paths so metadata can be copied across by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentReport {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Candidate-to-reference transform, in the coordinates of the processed
    /// resolution (reduced in preview mode).
    pub transform: Transform,
    pub dimensions: ImageDimensions,
    pub matches: usize,
    pub inliers: usize,
    pub inlier_ratio: f64,
    /// RMS reprojection error over the inliers, in pixels.
    pub rms_error: f64,
    pub overlap: f64,
    pub valid: bool,
    pub preview: bool,
}

/// Extraction and estimation set up for one resolution mode.
#[derive(Debug)]
struct Stage {
    extractor: FeatureExtractor,
    estimator: RansacEstimator,
}

/// The current reference with lazily filled per-mode feature caches.
#[derive(Debug)]
struct Reference {
    image: Image,
    full: OnceLock<FeatureSet>,
    preview: OnceLock<PreviewReference>,
}

#[derive(Debug)]
struct PreviewReference {
    image: Image,
    features: FeatureSet,
}

/// What a successful in-memory alignment produced besides the image.
#[derive(Debug)]
struct AlignOutcome {
    aligned: AlignedImage,
    estimate: Estimate,
    matches: usize,
}

/// Aligns candidates to a reference image.
///
/// Alignment takes `&self` and may run concurrently; replacing the reference
/// takes `&mut self`.
#[derive(Debug)]
pub struct Aligner {
    config: AlignerConfig,
    full: Stage,
    preview: Stage,
    matcher: Matcher,
    pool: ThreadPool,
    reference: Option<Reference>,
}

impl Aligner {
    pub fn new(config: AlignerConfig) -> Result<Self> {
        config.validate()?;

        let full = Stage {
            extractor: FeatureExtractor::new(config.features.clone())?,
            estimator: RansacEstimator::new(config.ransac.clone()),
        };
        let preview = Stage {
            extractor: FeatureExtractor::new(FeatureConfig {
                max_features: config.preview.max_features,
                ..config.features.clone()
            })?,
            estimator: RansacEstimator::new(RansacConfig {
                max_iterations: config.preview.max_iterations,
                ..config.ransac.clone()
            }),
        };

        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(n) = config.threads {
            builder = builder.num_threads(n);
        }
        let pool = builder
            .thread_name(|i| format!("imageutils-align-{i}"))
            .build()
            .map_err(|e| Error::invalid_config("aligner", e.to_string()))?;

        Ok(Self {
            matcher: Matcher::new(config.matching.clone()),
            config,
            full,
            preview,
            pool,
            reference: None,
        })
    }

    pub fn config(&self) -> &AlignerConfig {
        &self.config
    }

    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    /// Dimensions of the current reference at full resolution.
    pub fn reference_dimensions(&self) -> Option<ImageDimensions> {
        self.reference.as_ref().map(|r| r.image.dimensions())
    }

    /// Loads `path` as the new reference and caches its features for the
    /// requested mode. With `output_path`, a normalized copy (reduced in
    /// preview mode) is written there.
    ///
    /// On failure the previous reference, if any, stays in place.
    pub fn set_reference_image(
        &mut self,
        path: impl AsRef<Path>,
        output_path: Option<&Path>,
        is_preview: bool,
    ) -> Result<()> {
        let path = path.as_ref();
        let image = load_image(path)?;
        let reference = self.prepare_reference(image)?;

        self.pool.install(|| -> Result<()> {
            if is_preview {
                let preview = self.preview_reference(&reference)?;
                if let Some(out) = output_path {
                    save_image(&preview.image, out)?;
                }
            } else {
                self.full_reference(&reference)?;
                if let Some(out) = output_path {
                    save_image(&reference.image, out)?;
                }
            }
            Ok(())
        })?;

        tracing::info!(
            path = %path.display(),
            dimensions = %reference.image.dimensions(),
            preview = is_preview,
            "reference set"
        );
        self.reference = Some(reference);
        Ok(())
    }

    /// In-memory counterpart of [`set_reference_image`](Self::set_reference_image).
    /// Features are extracted on first use.
    pub fn set_reference(&mut self, image: Image) -> Result<()> {
        let reference = self.prepare_reference(image)?;
        tracing::debug!(
            image = %reference.image.label(),
            dimensions = %reference.image.dimensions(),
            "reference set"
        );
        self.reference = Some(reference);
        Ok(())
    }

    fn prepare_reference(&self, image: Image) -> Result<Reference> {
        image.validate()?;
        Ok(Reference {
            image,
            full: OnceLock::new(),
            preview: OnceLock::new(),
        })
    }

    /// Aligns the image at `path` to the reference and writes the result to
    /// `output_path`. Nothing is written when any stage fails.
    pub fn align_image(
        &self,
        path: impl AsRef<Path>,
        output_path: &Path,
        is_preview: bool,
    ) -> Result<AlignmentReport> {
        let path = path.as_ref();
        if self.reference.is_none() {
            return Err(Error::ReferenceNotSet);
        }
        let candidate = load_image(path)?;
        let AlignOutcome {
            aligned,
            estimate,
            matches,
        } = self.pool.install(|| self.align_inner(&candidate, is_preview))?;

        save_image(&aligned.to_output_image()?, output_path)?;

        let report = AlignmentReport {
            input: path.to_path_buf(),
            output: output_path.to_path_buf(),
            transform: estimate.transform,
            dimensions: aligned.dimensions(),
            matches,
            inliers: estimate.inlier_count(),
            inlier_ratio: estimate.inlier_ratio,
            rms_error: estimate.rms_error,
            overlap: aligned.overlap(),
            valid: aligned.is_valid(),
            preview: is_preview,
        };
        tracing::info!(
            input = %report.input.display(),
            output = %report.output.display(),
            transform = %report.transform,
            inliers = report.inliers,
            overlap = report.overlap,
            preview = is_preview,
            "aligned image"
        );
        Ok(report)
    }

    /// In-memory counterpart of [`align_image`](Self::align_image).
    pub fn align(&self, candidate: &Image, is_preview: bool) -> Result<AlignedImage> {
        self.pool
            .install(|| self.align_inner(candidate, is_preview))
            .map(|outcome| outcome.aligned)
    }

    /// Estimates the candidate-to-reference transform without warping.
    pub fn estimate(&self, candidate: &Image, is_preview: bool) -> Result<Estimate> {
        self.pool.install(|| {
            let reference = self.reference.as_ref().ok_or(Error::ReferenceNotSet)?;
            let (_, estimate, _) = self.register(reference, candidate, is_preview)?;
            Ok(estimate)
        })
    }

    fn align_inner(&self, candidate: &Image, is_preview: bool) -> Result<AlignOutcome> {
        let reference = self.reference.as_ref().ok_or(Error::ReferenceNotSet)?;
        let (working, estimate, matches) = self.register(reference, candidate, is_preview)?;

        let start = Instant::now();
        let output_dims = if is_preview {
            self.preview_reference(reference)?.image.dimensions()
        } else {
            reference.image.dimensions()
        };
        let aligned = warp_image(&working, &estimate.transform, output_dims, &self.config.warp)?;
        tracing::debug!(elapsed_ms = start.elapsed().as_secs_f64() * 1e3, "warp stage");

        Ok(AlignOutcome {
            aligned,
            estimate,
            matches,
        })
    }

    /// Runs extraction, matching and estimation. Returns the candidate at the
    /// working resolution along with the estimate and the match count.
    fn register<'a>(
        &self,
        reference: &Reference,
        candidate: &'a Image,
        is_preview: bool,
    ) -> Result<(Cow<'a, Image>, Estimate, usize)> {
        candidate.validate()?;
        let stage = if is_preview { &self.preview } else { &self.full };

        let (reference_features, working) = if is_preview {
            let (reduced, _) = candidate.downsample_to(self.config.preview.max_dimension);
            (&self.preview_reference(reference)?.features, Cow::Owned(reduced))
        } else {
            (self.full_reference(reference)?, Cow::Borrowed(candidate))
        };

        let start = Instant::now();
        let candidate_features = stage.extractor.extract(&working)?;
        tracing::debug!(
            features = candidate_features.len(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1e3,
            "candidate extraction stage"
        );

        let model = self.config.transform_type;
        let required = model.min_points();
        let fewest = reference_features.len().min(candidate_features.len());
        if fewest < required {
            return Err(Error::InsufficientCorrespondences {
                found: fewest,
                required,
            });
        }

        let start = Instant::now();
        let matches = self.matcher.match_features(reference_features, &candidate_features);
        tracing::debug!(
            matches = matches.len(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1e3,
            "matching stage"
        );
        if matches.len() < self.config.min_matches {
            return Err(RejectionReason::TooFewMatches {
                matches: matches.len(),
                required: self.config.min_matches,
            }
            .into());
        }

        let start = Instant::now();
        let estimate = stage
            .estimator
            .estimate(&matches, reference_features, &candidate_features, model)?;
        tracing::debug!(
            inliers = estimate.inlier_count(),
            iterations = estimate.iterations,
            elapsed_ms = start.elapsed().as_secs_f64() * 1e3,
            "estimation stage"
        );

        Ok((working, estimate, matches.len()))
    }

    fn full_reference<'a>(&self, reference: &'a Reference) -> Result<&'a FeatureSet> {
        cached(&reference.full, || self.full.extractor.extract(&reference.image))
    }

    fn preview_reference<'a>(&self, reference: &'a Reference) -> Result<&'a PreviewReference> {
        cached(&reference.preview, || {
            let (image, scale) = reference
                .image
                .downsample_to(self.config.preview.max_dimension);
            let features = self.preview.extractor.extract(&image)?;
            tracing::debug!(
                scale,
                dimensions = %image.dimensions(),
                features = features.len(),
                "preview reference prepared"
            );
            Ok(PreviewReference { image, features })
        })
    }
}

/// Returns the value in `cell`, computing it with `init` if empty. Concurrent
/// callers may both compute; only the first stored value is ever observed.
fn cached<T>(cell: &OnceLock<T>, init: impl FnOnce() -> Result<T>) -> Result<&T> {
    if let Some(value) = cell.get() {
        return Ok(value);
    }
    let value = init()?;
    Ok(cell.get_or_init(|| value))
}
