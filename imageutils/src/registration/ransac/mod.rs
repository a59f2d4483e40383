//! Sample-consensus transform estimation.
//!
//! Repeatedly fits a model to a random minimal subset of correspondences,
//! keeps the model with the most inliers, and refits on all of its inliers.
//! Improvements over textbook RANSAC:
//!
//! - **Plausibility gate**: candidates with mirroring, extreme scale, shear or
//!   perspective are discarded before they can win on raw inlier count.
//! - **Local optimization**: every new best model is refit on its inliers
//!   until the inlier set stops growing.
//! - **Adaptive termination**: the iteration budget shrinks once the
//!   confidence target is reached for the observed inlier ratio.

mod fit;

#[cfg(test)]
mod tests;

use glam::DVec2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub use fit::estimate_transform;

use super::config::RansacConfig;
use super::features::FeatureSet;
use super::matching::MatchSet;
use super::transform::{Transform, TransformType};
use crate::error::{Error, RejectionReason, Result};
use crate::image::ImageDimensions;

/// Outcome of a successful estimation.
#[derive(Debug, Clone)]
pub struct Estimate {
    /// Maps candidate coordinates onto reference coordinates.
    pub transform: Transform,
    /// Indices (into the input correspondences) consistent with `transform`.
    pub inliers: Vec<usize>,
    pub inlier_ratio: f64,
    /// RMS reprojection error over the inliers, in pixels.
    pub rms_error: f64,
    pub iterations: usize,
}

impl Estimate {
    pub fn inlier_count(&self) -> usize {
        self.inliers.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RansacEstimator {
    config: RansacConfig,
}

impl RansacEstimator {
    pub fn new(config: RansacConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RansacConfig {
        &self.config
    }

    /// Estimates the transform taking candidate feature positions onto their
    /// matched reference positions.
    pub fn estimate(
        &self,
        matches: &MatchSet,
        reference: &FeatureSet,
        candidate: &FeatureSet,
        model: TransformType,
    ) -> Result<Estimate> {
        let (src, dst): (Vec<DVec2>, Vec<DVec2>) = matches
            .iter()
            .map(|m| {
                (
                    candidate.features()[m.candidate_index].position,
                    reference.features()[m.reference_index].position,
                )
            })
            .unzip();
        self.estimate_points(&src, &dst, model, Some(candidate.dimensions()))
    }

    /// Point-pair variant of [`estimate`](Self::estimate); `src[i]` maps onto `dst[i]`.
    pub fn estimate_points(
        &self,
        src: &[DVec2],
        dst: &[DVec2],
        model: TransformType,
        source_dims: Option<ImageDimensions>,
    ) -> Result<Estimate> {
        debug_assert_eq!(src.len(), dst.len());
        let n = src.len().min(dst.len());
        let sample_size = model.min_points();
        if n < sample_size {
            return Err(Error::InsufficientCorrespondences {
                found: n,
                required: sample_size,
            });
        }

        let config = &self.config;
        let plausible = |t: &Transform| t.is_plausible(&config.limits, source_dims);
        let threshold_sq = config.inlier_threshold * config.inlier_threshold;

        let mut rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_os_rng(),
        };

        let mut best: Option<(Transform, Vec<usize>)> = None;
        let mut budget = config.max_iterations;
        let mut iterations = 0;
        let mut sample = Vec::with_capacity(sample_size);
        let mut sample_src = Vec::with_capacity(sample_size);
        let mut sample_dst = Vec::with_capacity(sample_size);

        while iterations < budget {
            iterations += 1;

            random_sample_into(&mut rng, n, sample_size, &mut sample);
            sample_src.clear();
            sample_dst.clear();
            sample_src.extend(sample.iter().map(|&i| src[i]));
            sample_dst.extend(sample.iter().map(|&i| dst[i]));
            if sample_size > 1 && fit::is_degenerate_sample(&sample_src, model) {
                continue;
            }

            let Some(candidate) = estimate_transform(&sample_src, &sample_dst, model) else {
                continue;
            };
            if !plausible(&candidate) {
                continue;
            }

            let inliers = collect_inliers(&candidate, src, dst, threshold_sq);
            let best_count = best.as_ref().map_or(0, |(_, inl)| inl.len());
            if inliers.len() <= best_count || inliers.len() < sample_size {
                continue;
            }

            let (transform, inliers) = if config.local_optimization {
                self.local_optimization(candidate, inliers, src, dst, model, &plausible)
            } else {
                (candidate, inliers)
            };

            let ratio = inliers.len() as f64 / n as f64;
            let needed = adaptive_iterations(ratio, sample_size, config.confidence);
            budget = budget.min(needed.max(iterations));
            best = Some((transform, inliers));
        }

        let Some((transform, inliers)) = best else {
            return Err(RejectionReason::NoPlausibleModel { iterations }.into());
        };

        // Final least-squares refit on every inlier.
        let (transform, inliers) = match refit(&inliers, src, dst, model, threshold_sq) {
            Some((refined, refined_inliers))
                if plausible(&refined) && refined_inliers.len() >= inliers.len() =>
            {
                (refined, refined_inliers)
            }
            _ => (transform, inliers),
        };

        if transform.inverse().is_none() {
            return Err(RejectionReason::SingularTransform.into());
        }

        let required = config
            .min_inliers
            .max(sample_size)
            .max(config.min_inliers_per_dof * model.degrees_of_freedom());
        if inliers.len() < required {
            return Err(RejectionReason::TooFewInliers {
                inliers: inliers.len(),
                required,
            }
            .into());
        }
        let inlier_ratio = inliers.len() as f64 / n as f64;
        if inlier_ratio < config.min_inlier_ratio {
            return Err(RejectionReason::LowInlierRatio {
                inliers: inliers.len(),
                total: n,
                required_ratio: config.min_inlier_ratio,
            }
            .into());
        }

        if let Some(dims) = source_dims {
            let span = inlier_span(&inliers, src, dims);
            if span < config.min_inlier_span {
                return Err(RejectionReason::ClusteredInliers {
                    span,
                    required: config.min_inlier_span,
                }
                .into());
            }
        }

        let rms_error = rms_residual(&transform, &inliers, src, dst);
        tracing::debug!(
            %transform,
            inliers = inliers.len(),
            total = n,
            iterations,
            rms_error,
            "ransac converged"
        );

        Ok(Estimate {
            transform,
            inliers,
            inlier_ratio,
            rms_error,
            iterations,
        })
    }

    fn local_optimization(
        &self,
        mut transform: Transform,
        mut inliers: Vec<usize>,
        src: &[DVec2],
        dst: &[DVec2],
        model: TransformType,
        plausible: &impl Fn(&Transform) -> bool,
    ) -> (Transform, Vec<usize>) {
        let threshold_sq = self.config.inlier_threshold * self.config.inlier_threshold;
        for _ in 0..self.config.lo_max_iterations {
            match refit(&inliers, src, dst, model, threshold_sq) {
                Some((refined, refined_inliers))
                    if plausible(&refined) && refined_inliers.len() > inliers.len() =>
                {
                    transform = refined;
                    inliers = refined_inliers;
                }
                _ => break,
            }
        }
        (transform, inliers)
    }
}

/// Refits `model` on the given inliers and recollects inliers under the result.
fn refit(
    inliers: &[usize],
    src: &[DVec2],
    dst: &[DVec2],
    model: TransformType,
    threshold_sq: f64,
) -> Option<(Transform, Vec<usize>)> {
    let in_src: Vec<DVec2> = inliers.iter().map(|&i| src[i]).collect();
    let in_dst: Vec<DVec2> = inliers.iter().map(|&i| dst[i]).collect();
    let refined = estimate_transform(&in_src, &in_dst, model)?;
    let refined_inliers = collect_inliers(&refined, src, dst, threshold_sq);
    Some((refined, refined_inliers))
}

fn collect_inliers(t: &Transform, src: &[DVec2], dst: &[DVec2], threshold_sq: f64) -> Vec<usize> {
    src.iter()
        .zip(dst)
        .enumerate()
        .filter(|(_, (s, d))| (t.apply(**s) - **d).length_squared() < threshold_sq)
        .map(|(i, _)| i)
        .collect()
}

fn rms_residual(t: &Transform, inliers: &[usize], src: &[DVec2], dst: &[DVec2]) -> f64 {
    if inliers.is_empty() {
        return 0.0;
    }
    let sum: f64 = inliers
        .iter()
        .map(|&i| (t.apply(src[i]) - dst[i]).length_squared())
        .sum();
    (sum / inliers.len() as f64).sqrt()
}

/// Area of the inliers' bounding box as a fraction of the image area.
fn inlier_span(inliers: &[usize], src: &[DVec2], dims: ImageDimensions) -> f64 {
    let area = dims.pixel_count() as f64;
    if inliers.is_empty() || area == 0.0 {
        return 0.0;
    }
    let (min, max) = inliers.iter().fold(
        (DVec2::splat(f64::INFINITY), DVec2::splat(f64::NEG_INFINITY)),
        |(lo, hi), &i| (lo.min(src[i]), hi.max(src[i])),
    );
    let extent = max - min;
    (extent.x * extent.y / area).min(1.0)
}

/// Iterations needed to draw one all-inlier sample with probability `confidence`.
pub(crate) fn adaptive_iterations(inlier_ratio: f64, sample_size: usize, confidence: f64) -> usize {
    if inlier_ratio <= 0.0 {
        return usize::MAX;
    }
    let p_good = inlier_ratio.powi(sample_size as i32);
    if p_good >= 1.0 - 1e-12 {
        return 1;
    }
    let n = (1.0 - confidence).ln() / (1.0 - p_good).ln();
    if n.is_finite() {
        n.ceil().max(1.0) as usize
    } else {
        usize::MAX
    }
}

/// Floyd's algorithm: `k` distinct indices from `0..n` without a full shuffle.
fn random_sample_into<R: Rng>(rng: &mut R, n: usize, k: usize, buffer: &mut Vec<usize>) {
    buffer.clear();
    for j in (n - k)..n {
        let t = rng.random_range(0..=j);
        if buffer.contains(&t) {
            buffer.push(j);
        } else {
            buffer.push(t);
        }
    }
}
