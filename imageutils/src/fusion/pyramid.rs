//! Gaussian and Laplacian pyramids over single planes.
//!
//! Level 0 is full resolution; each further level halves both sides
//! (rounding up). The last Laplacian level holds the coarsest Gaussian level,
//! so collapsing reproduces the input up to rounding.

use crate::common::Buffer2;
use crate::common::filter::{expand, reduce};

/// Short side below which no further level is built.
const MIN_LEVEL_SIDE: usize = 8;

/// Number of levels for a `width x height` plane: halve while the next level's
/// short side stays at least [`MIN_LEVEL_SIDE`], up to `max_levels`.
pub(crate) fn level_count(width: usize, height: usize, max_levels: usize) -> usize {
    let (mut w, mut h) = (width, height);
    let mut levels = 1;
    while levels < max_levels {
        let (nw, nh) = (w.div_ceil(2), h.div_ceil(2));
        if nw.min(nh) < MIN_LEVEL_SIDE {
            break;
        }
        (w, h) = (nw, nh);
        levels += 1;
    }
    levels
}

pub(crate) fn gaussian_pyramid(src: &Buffer2<f32>, levels: usize) -> Vec<Buffer2<f32>> {
    let mut pyramid = Vec::with_capacity(levels);
    pyramid.push(src.clone());
    for _ in 1..levels {
        let next = reduce(pyramid.last().unwrap_or(src));
        pyramid.push(next);
    }
    pyramid
}

pub(crate) fn laplacian_pyramid(src: &Buffer2<f32>, levels: usize) -> Vec<Buffer2<f32>> {
    let gaussian = gaussian_pyramid(src, levels);
    let mut pyramid = Vec::with_capacity(levels);
    for pair in gaussian.windows(2) {
        let (fine, coarse) = (&pair[0], &pair[1]);
        let up = expand(coarse, fine.width(), fine.height());
        let band = fine
            .pixels()
            .iter()
            .zip(up.pixels())
            .map(|(f, u)| f - u)
            .collect();
        pyramid.push(Buffer2::new(fine.width(), fine.height(), band));
    }
    if let Some(coarsest) = gaussian.into_iter().last() {
        pyramid.push(coarsest);
    }
    pyramid
}

/// Rebuilds the full-resolution plane from a Laplacian pyramid.
pub(crate) fn collapse(pyramid: Vec<Buffer2<f32>>) -> Buffer2<f32> {
    let mut levels = pyramid.into_iter().rev();
    let Some(mut current) = levels.next() else {
        return Buffer2::new(0, 0, Vec::new());
    };
    for band in levels {
        let mut up = expand(&current, band.width(), band.height());
        for (u, b) in up.pixels_mut().iter_mut().zip(band.pixels()) {
            *u += b;
        }
        current = up;
    }
    current
}
