//! Per-pixel quality weights.
//!
//! - **Contrast**: absolute response of a 3x3 Laplacian on luminance.
//! - **Saturation**: standard deviation across the RGB samples.
//! - **Well-exposedness**: product over channels of a Gaussian centred on 0.5.
//!
//! Each measure is lifted by [`MEASURE_FLOOR`] before it is raised to its
//! exponent and multiplied, so a zero in one measure (flat areas, neutral
//! colours) leaves the others to rank the frames. Unfilled pixels always weigh
//! zero.

use super::config::{FusionConfig, FusionMode};
use crate::common::filter::{gaussian_kernel, mirror, separable_blur};
use crate::common::{Buffer2, par_buffer};
use crate::image::Image;

/// Added to every quality measure before exponentiation.
pub(crate) const MEASURE_FLOOR: f32 = 1e-3;

#[inline]
fn lifted(measure: f32, exponent: f32) -> f32 {
    (measure + MEASURE_FLOOR).powf(exponent)
}

/// |Laplacian| with the 4-neighbour kernel and mirrored borders.
pub(crate) fn contrast(luminance: &Buffer2<f32>) -> Buffer2<f32> {
    let (w, h) = (luminance.width(), luminance.height());
    par_buffer(w, h, |y, row| {
        let up = luminance.row(mirror(y as isize - 1, h));
        let mid = luminance.row(y);
        let down = luminance.row(mirror(y as isize + 1, h));
        for (x, out) in row.iter_mut().enumerate() {
            let left = mid[mirror(x as isize - 1, w)];
            let right = mid[mirror(x as isize + 1, w)];
            *out = (up[x] + down[x] + left + right - 4.0 * mid[x]).abs();
        }
    })
}

#[inline]
pub(crate) fn saturation(rgb: [f32; 3]) -> f32 {
    let mean = (rgb[0] + rgb[1] + rgb[2]) / 3.0;
    let var = rgb.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / 3.0;
    var.sqrt()
}

#[inline]
pub(crate) fn well_exposedness(value: f32, sigma: f32) -> f32 {
    let d = value - 0.5;
    (-(d * d) / (2.0 * sigma * sigma)).exp()
}

/// Unnormalized weight map for one frame.
pub(crate) fn quality(
    image: &Image,
    coverage: &Buffer2<bool>,
    config: &FusionConfig,
) -> Buffer2<f32> {
    let luminance = image.luminance();
    let mut contrast_map = contrast(&luminance);
    if config.mode == FusionMode::Focus && config.focus_sigma > 0.0 {
        contrast_map = separable_blur(&contrast_map, &gaussian_kernel(config.focus_sigma));
    }

    let channels = image.channels();
    let use_saturation = channels.len() == 3 && config.saturation_weight > 0.0;
    let use_exposure = config.exposure_weight > 0.0;

    par_buffer(image.width(), image.height(), |y, row| {
        let contrast_row = contrast_map.row(y);
        let coverage_row = coverage.row(y);
        for (x, out) in row.iter_mut().enumerate() {
            if !coverage_row[x] {
                *out = 0.0;
                continue;
            }
            let mut weight = lifted(contrast_row[x], config.contrast_weight);
            if use_saturation {
                let rgb = [channels[0].row(y)[x], channels[1].row(y)[x], channels[2].row(y)[x]];
                weight *= lifted(saturation(rgb), config.saturation_weight);
            }
            if use_exposure {
                let exposed: f32 = channels
                    .iter()
                    .map(|c| well_exposedness(c.row(y)[x], config.exposure_sigma))
                    .product();
                weight *= lifted(exposed, config.exposure_weight);
            }
            *out = weight;
        }
    })
}

/// Normalizes weights to sum to one per pixel across frames. A pixel with zero
/// total weight is shared uniformly by the frames covering it, or by all
/// frames when none does.
pub(crate) fn normalize(weights: &mut [Buffer2<f32>], coverages: &[&Buffer2<bool>]) {
    let Some(first) = weights.first() else {
        return;
    };
    let (w, h) = (first.width(), first.height());
    let n = weights.len();

    // Row-major walk keeps the per-pixel summation order fixed.
    for i in 0..w * h {
        let total: f32 = weights.iter().map(|m| m.pixels()[i]).sum();
        if total > 0.0 && total.is_finite() {
            for m in weights.iter_mut() {
                m.pixels_mut()[i] /= total;
            }
            continue;
        }
        let covering = coverages.iter().filter(|c| c.pixels()[i]).count();
        for (m, c) in weights.iter_mut().zip(coverages) {
            m.pixels_mut()[i] = if covering == 0 {
                1.0 / n as f32
            } else if c.pixels()[i] {
                1.0 / covering as f32
            } else {
                0.0
            };
        }
    }
}

/// Re-normalizes one pyramid level of weights in place, without a coverage
/// fallback: a zero total is shared uniformly.
pub(crate) fn normalize_level(level: &mut [Buffer2<f32>]) {
    let Some(first) = level.first() else {
        return;
    };
    let len = first.len();
    let n = level.len();
    for i in 0..len {
        let total: f32 = level.iter().map(|m| m.pixels()[i]).sum();
        for m in level.iter_mut() {
            let v = &mut m.pixels_mut()[i];
            *v = if total > 0.0 { *v / total } else { 1.0 / n as f32 };
        }
    }
}
