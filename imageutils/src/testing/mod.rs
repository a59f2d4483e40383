//! Synthetic scenes and helpers shared by the test suites.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::common::Buffer2;
use crate::image::{Image, PixelPrecision};

/// Installs a test-writer subscriber once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Top-left corners of `count` textured blocks laid out on a regular grid
/// inside `[margin, size - margin)`.
pub fn block_positions(
    width: usize,
    height: usize,
    count: usize,
    block: usize,
    margin: usize,
) -> Vec<(usize, usize)> {
    let cols = (count as f64).sqrt().ceil() as usize;
    let rows = count.div_ceil(cols);
    let span_x = width - 2 * margin - block;
    let span_y = height - 2 * margin - block;
    (0..count)
        .map(|i| {
            let (c, r) = (i % cols, i / cols);
            let x = margin + if cols > 1 { c * span_x / (cols - 1) } else { span_x / 2 };
            let y = margin + if rows > 1 { r * span_y / (rows - 1) } else { span_y / 2 };
            (x, y)
        })
        .collect()
}

/// Uniform `background` with a random-texture `block x block` square at each
/// position. Every block gets its own texture, so features are distinctive.
pub fn textured_scene(
    width: usize,
    height: usize,
    background: f32,
    positions: &[(usize, usize)],
    block: usize,
    seed: u64,
) -> Buffer2<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut out = Buffer2::new_filled(width, height, background);
    for &(bx, by) in positions {
        for y in by..(by + block).min(height) {
            for x in bx..(bx + block).min(width) {
                out[(x, y)] = rng.random_range(0.05..0.95);
            }
        }
    }
    out
}

/// The 100x100 gray reference used by the end-to-end tests.
pub fn reference_scene() -> Buffer2<f32> {
    let positions = block_positions(100, 100, 10, 7, 20);
    textured_scene(100, 100, 0.5, &positions, 7, 42)
}

/// Integer shift: `out(x, y) = src(x - dx, y - dy)`, `fill` where undefined.
pub fn shifted(src: &Buffer2<f32>, dx: isize, dy: isize, fill: f32) -> Buffer2<f32> {
    let (w, h) = (src.width() as isize, src.height() as isize);
    Buffer2::from_fn(src.width(), src.height(), |x, y| {
        let (sx, sy) = (x as isize - dx, y as isize - dy);
        if sx >= 0 && sx < w && sy >= 0 && sy < h {
            src[(sx as usize, sy as usize)]
        } else {
            fill
        }
    })
}

pub fn noise(width: usize, height: usize, seed: u64) -> Buffer2<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Buffer2::from_fn(width, height, |_, _| rng.random_range(0.0..1.0))
}

pub fn gray(plane: Buffer2<f32>) -> Image {
    Image::from_gray(plane, PixelPrecision::U8).unwrap()
}

pub fn rgb(plane: &Buffer2<f32>, tint: [f32; 3]) -> Image {
    let channels = tint.iter().map(|&t| plane.map(|&v| (v * t).clamp(0.0, 1.0))).collect();
    Image::from_channels(channels, PixelPrecision::U8).unwrap()
}

/// Root-mean-square difference over pixels where `mask` is set.
pub fn masked_rms(a: &Buffer2<f32>, b: &Buffer2<f32>, mask: &Buffer2<bool>) -> f64 {
    let (sum, count) = a
        .pixels()
        .iter()
        .zip(b.pixels())
        .zip(mask.pixels())
        .filter(|(_, m)| **m)
        .fold((0.0f64, 0usize), |(s, n), ((x, y), _)| {
            let d = (*x - *y) as f64;
            (s + d * d, n + 1)
        });
    (sum / count.max(1) as f64).sqrt()
}
