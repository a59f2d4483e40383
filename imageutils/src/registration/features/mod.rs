//! Corner features on luminance with exposure-invariant patch descriptors.
//!
//! # Algorithm
//!
//! 1. **Smoothing**: Gaussian blur of the luminance plane.
//! 2. **Response**: Shi-Tomasi minimum eigenvalue of the structure tensor built
//!    from Sobel gradients averaged over a square window.
//! 3. **Selection**: threshold at `max(quality_level * max, min_response)`,
//!    3x3 non-maximum suppression, then greedy minimum-distance suppression
//!    from the strongest response down.
//! 4. **Refinement**: 1D parabola fit of the response along x and y.
//! 5. **Description**: grid-sampled patch around the feature, shifted to zero
//!    mean and scaled to unit norm, which cancels gain and offset differences
//!    between exposures.

#[cfg(test)]
mod tests;

use glam::DVec2;
use rayon::prelude::*;

use super::config::FeatureConfig;
use crate::common::filter::{gaussian_kernel, separable_blur};
use crate::common::{Buffer2, par_buffer};
use crate::error::Result;
use crate::image::{Image, ImageDimensions};

/// A detected corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    /// Sub-pixel position, always inside the source image.
    pub position: DVec2,
    /// Corner response; larger is more distinctive.
    pub strength: f32,
}

/// Features of one image with their descriptors stored contiguously.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    features: Vec<Feature>,
    descriptors: Vec<f32>,
    descriptor_len: usize,
    dimensions: ImageDimensions,
}

impl FeatureSet {
    pub fn empty(dimensions: ImageDimensions, descriptor_len: usize) -> Self {
        Self {
            features: Vec::new(),
            descriptors: Vec::new(),
            descriptor_len,
            dimensions,
        }
    }

    /// Assembles a set from precomputed parts; `descriptors` holds one
    /// `descriptor_len` run per feature.
    #[cfg(test)]
    pub(crate) fn from_parts(
        features: Vec<Feature>,
        descriptors: Vec<f32>,
        descriptor_len: usize,
        dimensions: ImageDimensions,
    ) -> Self {
        assert_eq!(descriptors.len(), features.len() * descriptor_len);
        Self {
            features,
            descriptors,
            descriptor_len,
            dimensions,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    #[inline]
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    #[inline]
    pub fn descriptor(&self, index: usize) -> &[f32] {
        let start = index * self.descriptor_len;
        &self.descriptors[start..start + self.descriptor_len]
    }

    #[inline]
    pub fn descriptor_len(&self) -> usize {
        self.descriptor_len
    }

    /// Dimensions of the image the features were extracted from.
    #[inline]
    pub fn dimensions(&self) -> ImageDimensions {
        self.dimensions
    }

    pub fn positions(&self) -> Vec<DVec2> {
        self.features.iter().map(|f| f.position).collect()
    }
}

/// Euclidean distance between two descriptors.
#[inline]
pub fn descriptor_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    x: usize,
    y: usize,
    response: f32,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Detects and describes features. An image without any corner strong
    /// enough yields an empty set; only a malformed image is an error.
    pub fn extract(&self, image: &Image) -> Result<FeatureSet> {
        image.validate()?;
        let luminance = image.luminance();
        let smoothed = separable_blur(&luminance, &gaussian_kernel(self.config.blur_sigma));
        let dims = ImageDimensions::new(image.width(), image.height(), 1);
        let descriptor_len = self.config.descriptor_len();

        let margin = self.config.patch_radius + 1;
        if image.width() <= 2 * margin || image.height() <= 2 * margin {
            tracing::debug!(
                image = %image.label(),
                "image smaller than descriptor footprint, no features"
            );
            return Ok(FeatureSet::empty(dims, descriptor_len));
        }

        let response = self.corner_response(&smoothed);
        let candidates = self.select(&response, margin);

        let described: Vec<(Feature, Vec<f32>)> = candidates
            .par_iter()
            .filter_map(|c| {
                let position = refine_subpixel(&response, c);
                let descriptor = self.describe(&smoothed, position)?;
                Some((
                    Feature {
                        position,
                        strength: c.response,
                    },
                    descriptor,
                ))
            })
            .collect();

        let mut features = Vec::with_capacity(described.len());
        let mut descriptors = Vec::with_capacity(described.len() * descriptor_len);
        for (feature, descriptor) in described {
            features.push(feature);
            descriptors.extend_from_slice(&descriptor);
        }

        tracing::debug!(
            image = %image.label(),
            candidates = candidates.len(),
            features = features.len(),
            "extracted features"
        );

        Ok(FeatureSet {
            features,
            descriptors,
            descriptor_len,
            dimensions: dims,
        })
    }

    /// Minimum eigenvalue of the window-averaged structure tensor.
    fn corner_response(&self, smoothed: &Buffer2<f32>) -> Buffer2<f32> {
        let (w, h) = (smoothed.width(), smoothed.height());

        let gradients: Buffer2<(f32, f32)> = par_buffer(w, h, |y, row| {
            for (x, out) in row.iter_mut().enumerate() {
                *out = sobel(smoothed, x as isize, y as isize);
            }
        });
        let ixx = gradients.map(|&(gx, _)| gx * gx);
        let iyy = gradients.map(|&(_, gy)| gy * gy);
        let ixy = gradients.map(|&(gx, gy)| gx * gy);

        let side = 2 * self.config.window_radius + 1;
        let box_kernel = vec![1.0 / side as f32; side];
        let sxx = separable_blur(&ixx, &box_kernel);
        let syy = separable_blur(&iyy, &box_kernel);
        let sxy = separable_blur(&ixy, &box_kernel);

        par_buffer(w, h, |y, row| {
            for (x, out) in row.iter_mut().enumerate() {
                let (a, c, b) = (sxx[(x, y)], syy[(x, y)], sxy[(x, y)]);
                let half_trace = 0.5 * (a + c);
                let diff = 0.5 * (a - c);
                *out = (half_trace - (diff * diff + b * b).sqrt()).max(0.0);
            }
        })
    }

    fn select(&self, response: &Buffer2<f32>, margin: usize) -> Vec<Candidate> {
        let (w, h) = (response.width(), response.height());
        let rows = margin..h - margin;

        let max_response = rows
            .clone()
            .into_par_iter()
            .map(|y| {
                response.row(y)[margin..w - margin]
                    .iter()
                    .fold(0.0f32, |m, &v| m.max(v))
            })
            .reduce(|| 0.0, f32::max);
        let threshold = (self.config.quality_level * max_response).max(self.config.min_response);
        if max_response < threshold {
            return Vec::new();
        }

        let mut maxima: Vec<Candidate> = rows
            .into_par_iter()
            .flat_map_iter(|y| {
                (margin..w - margin).filter_map(move |x| {
                    let r = response[(x, y)];
                    (r >= threshold && is_local_max(response, x, y)).then_some(Candidate {
                        x,
                        y,
                        response: r,
                    })
                })
            })
            .collect();

        // Stable: equal responses keep row-major order.
        maxima.sort_by(|a, b| b.response.total_cmp(&a.response));
        suppress_close(maxima, self.config.min_distance, self.config.max_features, w, h)
    }

    fn describe(&self, smoothed: &Buffer2<f32>, center: DVec2) -> Option<Vec<f32>> {
        let k = (self.config.patch_radius / self.config.patch_step) as isize;
        let step = self.config.patch_step as f64;
        let mut samples = Vec::with_capacity(self.config.descriptor_len());
        for j in -k..=k {
            for i in -k..=k {
                let p = center + DVec2::new(i as f64 * step, j as f64 * step);
                samples.push(sample_bilinear(smoothed, p));
            }
        }

        let mean = samples.iter().sum::<f32>() / samples.len() as f32;
        samples.iter_mut().for_each(|v| *v -= mean);
        let norm = samples.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm < 1e-6 {
            return None;
        }
        samples.iter_mut().for_each(|v| *v /= norm);
        Some(samples)
    }
}

/// Sobel gradient normalized to intensity change per pixel.
#[inline]
fn sobel(img: &Buffer2<f32>, x: isize, y: isize) -> (f32, f32) {
    let p = |dx: isize, dy: isize| img.clamped(x + dx, y + dy);
    let gx = (p(1, -1) + 2.0 * p(1, 0) + p(1, 1)) - (p(-1, -1) + 2.0 * p(-1, 0) + p(-1, 1));
    let gy = (p(-1, 1) + 2.0 * p(0, 1) + p(1, 1)) - (p(-1, -1) + 2.0 * p(0, -1) + p(1, -1));
    (gx / 8.0, gy / 8.0)
}

/// Strict maximum over the 8-neighbourhood; on plateaus the first pixel in
/// row-major order wins.
fn is_local_max(response: &Buffer2<f32>, x: usize, y: usize) -> bool {
    let r = response[(x, y)];
    for dy in -1isize..=1 {
        for dx in -1isize..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let n = response[((x as isize + dx) as usize, (y as isize + dy) as usize)];
            let neighbour_first = dy < 0 || (dy == 0 && dx < 0);
            if n > r || (n == r && neighbour_first) {
                return false;
            }
        }
    }
    true
}

/// Greedy minimum-distance suppression over candidates sorted strongest
/// first, bucketed on a grid with cell size `min_distance`.
fn suppress_close(
    sorted: Vec<Candidate>,
    min_distance: f32,
    max_features: usize,
    width: usize,
    height: usize,
) -> Vec<Candidate> {
    let cell = min_distance.max(1.0);
    let grid_w = (width as f32 / cell).ceil() as usize + 1;
    let grid_h = (height as f32 / cell).ceil() as usize + 1;
    let mut grid: Vec<Vec<(usize, usize)>> = vec![Vec::new(); grid_w * grid_h];
    let min_dist_sq = min_distance * min_distance;

    let mut kept = Vec::new();
    for c in sorted {
        if kept.len() >= max_features {
            break;
        }
        let gx = (c.x as f32 / cell) as usize;
        let gy = (c.y as f32 / cell) as usize;
        let mut too_close = false;
        'search: for ny in gy.saturating_sub(1)..=(gy + 1).min(grid_h - 1) {
            for nx in gx.saturating_sub(1)..=(gx + 1).min(grid_w - 1) {
                for &(ox, oy) in &grid[ny * grid_w + nx] {
                    let ddx = ox as f32 - c.x as f32;
                    let ddy = oy as f32 - c.y as f32;
                    if ddx * ddx + ddy * ddy < min_dist_sq {
                        too_close = true;
                        break 'search;
                    }
                }
            }
        }
        if !too_close {
            grid[gy * grid_w + gx].push((c.x, c.y));
            kept.push(c);
        }
    }
    kept
}

/// Vertex offset of a parabola through three samples, clamped to half a pixel.
#[inline]
fn parabola_offset(left: f32, center: f32, right: f32) -> f64 {
    let denom = left - 2.0 * center + right;
    if denom >= 0.0 {
        return 0.0;
    }
    (0.5 * (left - right) / denom).clamp(-0.5, 0.5) as f64
}

fn refine_subpixel(response: &Buffer2<f32>, c: &Candidate) -> DVec2 {
    let r = response[(c.x, c.y)];
    let dx = parabola_offset(response[(c.x - 1, c.y)], r, response[(c.x + 1, c.y)]);
    let dy = parabola_offset(response[(c.x, c.y - 1)], r, response[(c.x, c.y + 1)]);
    DVec2::new(c.x as f64 + dx, c.y as f64 + dy)
}

#[inline]
fn sample_bilinear(img: &Buffer2<f32>, p: DVec2) -> f32 {
    let x0 = p.x.floor();
    let y0 = p.y.floor();
    let fx = (p.x - x0) as f32;
    let fy = (p.y - y0) as f32;
    let (x0, y0) = (x0 as isize, y0 as isize);

    let p00 = img.clamped(x0, y0);
    let p10 = img.clamped(x0 + 1, y0);
    let p01 = img.clamped(x0, y0 + 1);
    let p11 = img.clamped(x0 + 1, y0 + 1);
    let top = p00 + fx * (p10 - p00);
    let bottom = p01 + fx * (p11 - p01);
    top + fy * (bottom - top)
}
