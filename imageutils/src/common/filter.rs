//! Separable filters on `Buffer2<f32>` planes.
//!
//! All filters mirror at the border without repeating the edge sample
//! (`-1 -> 1`, `n -> n - 2`), which keeps the parity of indices intact and lets
//! `reduce`/`expand` preserve constants right up to the edge.

use super::{Buffer2, par_buffer};

/// 5-tap binomial kernel used for pyramid construction.
pub(crate) const BINOMIAL5: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

#[inline]
pub(crate) fn mirror(mut i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let last = n as isize - 1;
    loop {
        if i < 0 {
            i = -i;
        } else if i > last {
            i = 2 * last - i;
        } else {
            return i as usize;
        }
    }
}

/// Normalized Gaussian kernel with radius `ceil(3 sigma)`.
pub(crate) fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    if sigma <= 0.0 {
        return vec![1.0];
    }
    let radius = (3.0 * sigma).ceil() as isize;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / denom).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

/// Convolves `src` with `kernel` along both axes.
pub(crate) fn separable_blur(src: &Buffer2<f32>, kernel: &[f32]) -> Buffer2<f32> {
    let (w, h) = (src.width(), src.height());
    let radius = (kernel.len() / 2) as isize;

    let horizontal = par_buffer(w, h, |y, row: &mut [f32]| {
        let src_row = src.row(y);
        for (x, out) in row.iter_mut().enumerate() {
            *out = kernel
                .iter()
                .enumerate()
                .map(|(k, &kv)| kv * src_row[mirror(x as isize + k as isize - radius, w)])
                .sum();
        }
    });

    par_buffer(w, h, |y, row| {
        row.fill(0.0);
        for (k, &kv) in kernel.iter().enumerate() {
            let sy = mirror(y as isize + k as isize - radius, h);
            for (out, &v) in row.iter_mut().zip(horizontal.row(sy)) {
                *out += kv * v;
            }
        }
    })
}

/// Blurs with [`BINOMIAL5`] and keeps every second sample along both axes.
pub(crate) fn reduce(src: &Buffer2<f32>) -> Buffer2<f32> {
    let (w, h) = (src.width(), src.height());
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));

    let horizontal = par_buffer(cw, h, |y, row: &mut [f32]| {
        let src_row = src.row(y);
        for (cx, out) in row.iter_mut().enumerate() {
            let x = 2 * cx as isize;
            *out = BINOMIAL5
                .iter()
                .enumerate()
                .map(|(k, &kv)| kv * src_row[mirror(x + k as isize - 2, w)])
                .sum();
        }
    });

    par_buffer(cw, ch, |cy, row| {
        row.fill(0.0);
        let y = 2 * cy as isize;
        for (k, &kv) in BINOMIAL5.iter().enumerate() {
            let sy = mirror(y + k as isize - 2, h);
            for (out, &v) in row.iter_mut().zip(horizontal.row(sy)) {
                *out += kv * v;
            }
        }
    })
}

/// Inverse of [`reduce`]: upsamples to `width x height` by zero insertion
/// followed by the doubled binomial kernel.
pub(crate) fn expand(src: &Buffer2<f32>, width: usize, height: usize) -> Buffer2<f32> {
    debug_assert_eq!(width.div_ceil(2), src.width());
    debug_assert_eq!(height.div_ceil(2), src.height());

    let horizontal = par_buffer(width, src.height(), |cy, row| {
        let src_row = src.row(cy);
        for (x, out) in row.iter_mut().enumerate() {
            let mut acc = 0.0;
            for (k, &kv) in BINOMIAL5.iter().enumerate() {
                let j = mirror(x as isize + 2 - k as isize, width);
                if j % 2 == 0 {
                    acc += kv * src_row[j / 2];
                }
            }
            *out = 2.0 * acc;
        }
    });

    par_buffer(width, height, |y, row| {
        row.fill(0.0);
        for (k, &kv) in BINOMIAL5.iter().enumerate() {
            let j = mirror(y as isize + 2 - k as isize, height);
            if j % 2 != 0 {
                continue;
            }
            for (out, &v) in row.iter_mut().zip(horizontal.row(j / 2)) {
                *out += 2.0 * kv * v;
            }
        }
    })
}
