//! Resampling a candidate image into the reference frame.
//!
//! Every output pixel is mapped through the inverse transform into the
//! source. Pixels whose source position falls outside the source image are
//! left unfilled; the coverage mask records which is which.
//!
//! # Interpolation Methods
//!
//! - **Nearest**: no interpolation, rounds to the closest sample.
//! - **Bilinear**: linear in both dimensions. The default.
//! - **Bicubic**: Catmull-Rom cubic, 4x4 taps.
//! - **Lanczos3**: sinc windowed by sinc, 6x6 taps, normalized.
//!
//! Taps that fall outside the source are clamped to the nearest edge sample.


use std::f32::consts::PI;

use glam::DVec2;

use super::config::{InterpolationMethod, WarpConfig};
use super::transform::Transform;
use crate::common::{Buffer2, par_buffer};
use crate::error::{RejectionReason, Result};
use crate::image::{Image, ImageDimensions};

/// Tolerance on the source bounds check, absorbing round-off of `T⁻¹`.
const BOUNDS_EPSILON: f64 = 1e-6;

/// An image resampled into the reference frame.
#[derive(Debug, Clone)]
pub struct AlignedImage {
    image: Image,
    transform: Transform,
    coverage: Buffer2<bool>,
    overlap: f64,
    valid: bool,
}

impl AlignedImage {
    /// Wraps an already aligned image. Pixels with zero alpha are unfilled;
    /// without alpha the whole frame is covered. The alpha plane is consumed
    /// into the coverage mask.
    pub fn from_decoded(image: Image, min_overlap: f64) -> Result<Self> {
        let path = image.path().map(|p| p.to_path_buf());
        let (channels, alpha, precision) = image.into_parts();
        let mut image = Image::from_channels(channels, precision)?;
        if let Some(path) = path {
            image = image.with_path(path);
        }
        let coverage = match alpha {
            Some(alpha) => alpha.map(|&a| a > 0.0),
            None => Buffer2::new_filled(image.width(), image.height(), true),
        };
        Ok(Self::new(image, Transform::identity(), coverage, min_overlap))
    }

    pub(crate) fn new(
        image: Image,
        transform: Transform,
        coverage: Buffer2<bool>,
        min_overlap: f64,
    ) -> Self {
        debug_assert!(coverage.width() == image.width() && coverage.height() == image.height());
        let filled = coverage.count(|&c| c);
        let overlap = if coverage.is_empty() {
            0.0
        } else {
            filled as f64 / coverage.len() as f64
        };
        Self {
            image,
            transform,
            coverage,
            overlap,
            valid: overlap >= min_overlap,
        }
    }

    #[inline]
    pub fn image(&self) -> &Image {
        &self.image
    }

    #[inline]
    pub fn dimensions(&self) -> ImageDimensions {
        self.image.dimensions()
    }

    /// The transform the frame was resampled with (candidate to reference).
    #[inline]
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// `true` where the pixel was interpolated from the source.
    #[inline]
    pub fn coverage(&self) -> &Buffer2<bool> {
        &self.coverage
    }

    /// Fraction of output pixels that are filled.
    #[inline]
    pub fn overlap(&self) -> f64 {
        self.overlap
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The resampled image with the coverage mask attached as alpha when any
    /// pixel is unfilled, ready to be written.
    pub fn to_output_image(&self) -> Result<Image> {
        if self.coverage.pixels().iter().all(|&c| c) {
            return Ok(self.image.clone());
        }
        let alpha = self.coverage.map(|&c| if c { 1.0 } else { 0.0 });
        self.image.clone().with_alpha(alpha)
    }

    pub(crate) fn into_parts(self) -> (Image, Buffer2<bool>) {
        (self.image, self.coverage)
    }
}

/// Resamples `source` into an output of `output_dims.width x output_dims.height`.
///
/// `transform` maps source (candidate) coordinates onto output (reference)
/// coordinates. The channel count follows the source.
pub fn warp_image(
    source: &Image,
    transform: &Transform,
    output_dims: ImageDimensions,
    config: &WarpConfig,
) -> Result<AlignedImage> {
    let inverse = transform
        .inverse()
        .ok_or(RejectionReason::SingularTransform)?;

    let (out_w, out_h) = (output_dims.width, output_dims.height);
    let max_x = source.width() as f64 - 1.0;
    let max_y = source.height() as f64 - 1.0;

    // Source position per output pixel; `None` where the pixel stays unfilled.
    let positions: Buffer2<Option<(f32, f32)>> = par_buffer(out_w, out_h, |y, row| {
        for (x, slot) in row.iter_mut().enumerate() {
            let p = DVec2::new(x as f64, y as f64);
            if inverse.homogeneous_w(p) <= 0.0 {
                continue;
            }
            let s = inverse.apply(p);
            let inside = s.x >= -BOUNDS_EPSILON
                && s.y >= -BOUNDS_EPSILON
                && s.x <= max_x + BOUNDS_EPSILON
                && s.y <= max_y + BOUNDS_EPSILON;
            if inside {
                *slot = Some((
                    s.x.clamp(0.0, max_x) as f32,
                    s.y.clamp(0.0, max_y) as f32,
                ));
            }
        }
    });

    let channels: Vec<Buffer2<f32>> = source
        .channels()
        .iter()
        .map(|plane| {
            par_buffer(out_w, out_h, |y, row| {
                for (x, out) in row.iter_mut().enumerate() {
                    *out = match positions[(x, y)] {
                        Some((sx, sy)) => interpolate(plane, sx, sy, config.method),
                        None => config.border_value,
                    };
                }
            })
        })
        .collect();

    let coverage = positions.map(Option::is_some);
    let mut image = Image::from_channels(channels, source.precision())?;
    if let Some(path) = source.path() {
        image = image.with_path(path);
    }

    let aligned = AlignedImage::new(image, *transform, coverage, config.min_overlap);
    tracing::debug!(
        source = %source.label(),
        method = ?config.method,
        overlap = aligned.overlap(),
        "warped image"
    );
    if !aligned.is_valid() {
        tracing::warn!(
            source = %source.label(),
            overlap = aligned.overlap(),
            min_overlap = config.min_overlap,
            "aligned frame overlaps the reference too little"
        );
    }
    Ok(aligned)
}

/// Interpolates `data` at sub-pixel position `(x, y)`.
pub fn interpolate(data: &Buffer2<f32>, x: f32, y: f32, method: InterpolationMethod) -> f32 {
    match method {
        InterpolationMethod::Nearest => interpolate_nearest(data, x, y),
        InterpolationMethod::Bilinear => interpolate_bilinear(data, x, y),
        InterpolationMethod::Bicubic => interpolate_separable::<4>(data, x, y, bicubic_kernel),
        InterpolationMethod::Lanczos3 => interpolate_separable::<6>(data, x, y, lanczos3_kernel),
    }
}

#[inline]
fn interpolate_nearest(data: &Buffer2<f32>, x: f32, y: f32) -> f32 {
    data.clamped(x.round() as isize, y.round() as isize)
}

#[inline]
fn interpolate_bilinear(data: &Buffer2<f32>, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as isize;
    let y0 = y.floor() as isize;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = data.clamped(x0, y0);
    let p10 = data.clamped(x0 + 1, y0);
    let p01 = data.clamped(x0, y0 + 1);
    let p11 = data.clamped(x0 + 1, y0 + 1);

    let top = p00 + fx * (p10 - p00);
    let bottom = p01 + fx * (p11 - p01);
    top + fy * (bottom - top)
}

/// `TAPS x TAPS` separable kernel centred on `(x, y)`, weights normalized.
fn interpolate_separable<const TAPS: usize>(
    data: &Buffer2<f32>,
    x: f32,
    y: f32,
    kernel: fn(f32) -> f32,
) -> f32 {
    let half = (TAPS / 2) as isize;
    let x0 = x.floor() as isize;
    let y0 = y.floor() as isize;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let mut wx = [0.0f32; TAPS];
    let mut wy = [0.0f32; TAPS];
    for i in 0..TAPS {
        let offset = i as f32 - (half - 1) as f32;
        wx[i] = kernel(fx - offset);
        wy[i] = kernel(fy - offset);
    }
    let wx_sum: f32 = wx.iter().sum();
    let wy_sum: f32 = wy.iter().sum();

    let mut sum = 0.0;
    for (j, &wyj) in wy.iter().enumerate() {
        if wyj == 0.0 {
            continue;
        }
        let py = y0 - (half - 1) + j as isize;
        let mut row = 0.0;
        for (i, &wxi) in wx.iter().enumerate() {
            if wxi == 0.0 {
                continue;
            }
            let px = x0 - (half - 1) + i as isize;
            row += data.clamped(px, py) * wxi;
        }
        sum += row * wyj;
    }
    sum / (wx_sum * wy_sum)
}

/// Catmull-Rom cubic (`a = -0.5`).
#[inline]
pub(crate) fn bicubic_kernel(x: f32) -> f32 {
    const A: f32 = -0.5;
    let abs_x = x.abs();
    if abs_x <= 1.0 {
        ((A + 2.0) * abs_x - (A + 3.0)) * abs_x * abs_x + 1.0
    } else if abs_x < 2.0 {
        ((A * abs_x - 5.0 * A) * abs_x + 8.0 * A) * abs_x - 4.0 * A
    } else {
        0.0
    }
}

/// `sinc(x) * sinc(x / 3)` on `|x| < 3`. Exactly zero at non-zero integers so
/// integer positions reproduce the source sample.
#[inline]
pub(crate) fn lanczos3_kernel(x: f32) -> f32 {
    const A: f32 = 3.0;
    if x == 0.0 {
        return 1.0;
    }
    if x.abs() >= A || x.fract() == 0.0 {
        return 0.0;
    }
    let pi_x = PI * x;
    let pi_x_a = pi_x / A;
    (pi_x.sin() / pi_x) * (pi_x_a.sin() / pi_x_a)
}
