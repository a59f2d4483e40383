//! Exposure and focus fusion of aligned frames.
//!
//! Frames are blended per frequency band: every frame gets a per-pixel weight
//! map, the weights are decomposed into a Gaussian pyramid, the frames into
//! Laplacian pyramids, and each band is the weighted sum of the frames' bands.
//! Collapsing the blended pyramid gives the composite without visible seams.

pub mod config;
pub(crate) mod pyramid;
pub(crate) mod weights;


use std::path::Path;
use std::time::Instant;

use rayon::ThreadPool;
use rayon::prelude::*;

use crate::common::{Buffer2, par_buffer};
use crate::error::{Error, RejectionReason, Result};
use crate::image::{Image, ImageDimensions, PixelPrecision, load_image, save_image};
use crate::registration::AlignedImage;

pub use config::{FusionConfig, FusionMode};

/// A non-empty sequence of aligned frames sharing one size and channel count.
#[derive(Debug, Clone)]
pub struct FusionStack {
    frames: Vec<AlignedImage>,
}

impl FusionStack {
    pub fn new(frames: Vec<AlignedImage>) -> Result<Self> {
        let Some(first) = frames.first() else {
            return Err(Error::EmptyStack);
        };
        let expected = first.dimensions();
        for (index, frame) in frames.iter().enumerate().skip(1) {
            let actual = frame.dimensions();
            if actual != expected {
                return Err(Error::DimensionMismatch {
                    index,
                    expected,
                    actual,
                });
            }
        }
        Ok(Self { frames })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn dimensions(&self) -> ImageDimensions {
        self.frames[0].dimensions()
    }

    pub fn frames(&self) -> &[AlignedImage] {
        &self.frames
    }

    pub fn valid_count(&self) -> usize {
        self.frames.iter().filter(|f| f.is_valid()).count()
    }
}

/// The fused image and how many frames contributed to it.
#[derive(Debug, Clone)]
pub struct Composite {
    pub image: Image,
    pub frames_used: usize,
}

/// One frame prepared for blending: channels with unfilled samples replaced,
/// and its normalized weight map.
struct PreparedFrame {
    channels: Vec<Buffer2<f32>>,
    weights: Buffer2<f32>,
}

#[derive(Debug)]
pub struct Fuser {
    config: FusionConfig,
    pool: ThreadPool,
}

impl Fuser {
    pub fn new(config: FusionConfig) -> Result<Self> {
        config.validate()?;
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(n) = config.threads {
            builder = builder.num_threads(n);
        }
        let pool = builder
            .thread_name(|i| format!("imageutils-fuse-{i}"))
            .build()
            .map_err(|e| Error::invalid_config("fuser", e.to_string()))?;
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Normalized weight maps, one per frame in stack order. Frames excluded
    /// for low overlap get an all-zero map.
    pub fn weight_maps(&self, stack: &FusionStack) -> Result<Vec<Buffer2<f32>>> {
        let used = used_indices(stack)?;
        self.pool.install(|| {
            let maps = self.normalized_weights(stack, &used);
            let dims = stack.dimensions();
            let mut out: Vec<Buffer2<f32>> = (0..stack.len())
                .map(|_| Buffer2::new_filled(dims.width, dims.height, 0.0))
                .collect();
            for (&index, map) in used.iter().zip(maps) {
                out[index] = map;
            }
            Ok(out)
        })
    }

    /// Fuses the valid frames of `stack` into one composite.
    pub fn fuse(&self, stack: FusionStack) -> Result<Composite> {
        let used = used_indices(&stack)?;
        let start = Instant::now();
        let composite = self.pool.install(|| self.fuse_inner(&stack, &used))?;
        tracing::info!(
            frames = stack.len(),
            used = composite.frames_used,
            mode = ?self.config.mode,
            dimensions = %composite.image.dimensions(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1e3,
            "fused stack"
        );
        Ok(composite)
    }

    /// Decodes `input_paths`, fuses them and writes the composite to
    /// `output_path`. Returns the number of frames used.
    ///
    /// Coverage comes from each file's alpha channel. The composite is
    /// written at the precision of the first input; nothing is written on
    /// failure.
    pub fn fuse_images<P: AsRef<Path> + Sync>(
        &self,
        input_paths: &[P],
        output_path: &Path,
    ) -> Result<usize> {
        if input_paths.is_empty() {
            return Err(Error::EmptyStack);
        }
        let min_overlap = self.config.min_overlap;
        let decoded: Vec<Result<AlignedImage>> = self.pool.install(|| {
            input_paths
                .par_iter()
                .map(|p| {
                    load_image(p.as_ref())
                        .and_then(|img| AlignedImage::from_decoded(img, min_overlap))
                })
                .collect()
        });
        let frames = decoded.into_iter().collect::<Result<Vec<_>>>()?;

        let stack = FusionStack::new(frames)?;
        let composite = self.fuse(stack)?;
        save_image(&composite.image, output_path)?;
        tracing::info!(
            output = %output_path.display(),
            frames = composite.frames_used,
            "wrote composite"
        );
        Ok(composite.frames_used)
    }

    fn normalized_weights(&self, stack: &FusionStack, used: &[usize]) -> Vec<Buffer2<f32>> {
        let frames = stack.frames();
        let mut maps: Vec<Buffer2<f32>> = used
            .par_iter()
            .map(|&i| weights::quality(frames[i].image(), frames[i].coverage(), &self.config))
            .collect();
        let coverages: Vec<&Buffer2<bool>> = used.iter().map(|&i| frames[i].coverage()).collect();
        weights::normalize(&mut maps, &coverages);
        maps
    }

    fn fuse_inner(&self, stack: &FusionStack, used: &[usize]) -> Result<Composite> {
        let dims = stack.dimensions();
        let frames = stack.frames();
        let weight_maps = self.normalized_weights(stack, used);
        let used_frames: Vec<&AlignedImage> = used.iter().map(|&i| &frames[i]).collect();

        let union = par_buffer(dims.width, dims.height, |y, row: &mut [bool]| {
            for (x, out) in row.iter_mut().enumerate() {
                *out = used_frames.iter().any(|f| f.coverage()[(x, y)]);
            }
        });
        let filled = fill_unfilled(&used_frames, dims);

        let prepared: Vec<PreparedFrame> = filled
            .into_iter()
            .zip(weight_maps)
            .map(|(channels, weights)| PreparedFrame { channels, weights })
            .collect();

        let levels = pyramid::level_count(dims.width, dims.height, self.config.max_levels);
        tracing::debug!(frames = prepared.len(), levels, "building pyramids");

        // Per frame: Gaussian pyramid of weights and Laplacian pyramid per channel.
        let pyramids: Vec<(Vec<Buffer2<f32>>, Vec<Vec<Buffer2<f32>>>)> = prepared
            .par_iter()
            .map(|frame| {
                let weights = pyramid::gaussian_pyramid(&frame.weights, levels);
                let bands = frame
                    .channels
                    .iter()
                    .map(|c| pyramid::laplacian_pyramid(c, levels))
                    .collect();
                (weights, bands)
            })
            .collect();

        let mut channels = Vec::with_capacity(dims.channels);
        for c in 0..dims.channels {
            let mut blended = Vec::with_capacity(levels);
            for level in 0..levels {
                let mut level_weights: Vec<Buffer2<f32>> =
                    pyramids.iter().map(|(w, _)| w[level].clone()).collect();
                weights::normalize_level(&mut level_weights);
                let bands: Vec<&Buffer2<f32>> =
                    pyramids.iter().map(|(_, b)| &b[c][level]).collect();
                blended.push(blend_level(&bands, &level_weights));
            }
            let mut plane = pyramid::collapse(blended);
            plane.pixels_mut().iter_mut().for_each(|v| *v = v.clamp(0.0, 1.0));
            channels.push(plane);
        }

        let precision = used_frames
            .first()
            .map_or(PixelPrecision::default(), |f| f.image().precision());
        let mut image = Image::from_channels(channels, precision)?;
        if union.pixels().iter().any(|c| !c) {
            image = image.with_alpha(union.map(|&c| if c { 1.0 } else { 0.0 }))?;
        }

        Ok(Composite {
            image,
            frames_used: used.len(),
        })
    }
}

/// Indices of the frames that take part in fusion.
fn used_indices(stack: &FusionStack) -> Result<Vec<usize>> {
    let used: Vec<usize> = stack
        .frames()
        .iter()
        .enumerate()
        .filter(|(_, f)| f.is_valid())
        .map(|(i, _)| i)
        .collect();
    for (index, frame) in stack.frames().iter().enumerate() {
        if !frame.is_valid() {
            tracing::warn!(index, overlap = frame.overlap(), "excluding frame from fusion");
        }
    }
    if used.is_empty() {
        return Err(RejectionReason::NoValidFrames { frames: stack.len() }.into());
    }
    Ok(used)
}

/// Copies every frame's channels, replacing unfilled samples with the mean of
/// the frames covering that pixel.
fn fill_unfilled(frames: &[&AlignedImage], dims: ImageDimensions) -> Vec<Vec<Buffer2<f32>>> {
    let means: Vec<Buffer2<f32>> = (0..dims.channels)
        .map(|c| {
            par_buffer(dims.width, dims.height, |y, row| {
                for (x, out) in row.iter_mut().enumerate() {
                    let (sum, count) = frames
                        .iter()
                        .filter(|f| f.coverage()[(x, y)])
                        .fold((0.0f32, 0usize), |(s, n), f| {
                            (s + f.image().channel(c)[(x, y)], n + 1)
                        });
                    *out = if count > 0 { sum / count as f32 } else { 0.0 };
                }
            })
        })
        .collect();

    frames
        .par_iter()
        .map(|frame| {
            (0..dims.channels)
                .map(|c| {
                    let source = frame.image().channel(c);
                    let coverage = frame.coverage();
                    par_buffer(dims.width, dims.height, |y, row| {
                        for (x, out) in row.iter_mut().enumerate() {
                            *out = if coverage[(x, y)] {
                                source[(x, y)]
                            } else {
                                means[c][(x, y)]
                            };
                        }
                    })
                })
                .collect()
        })
        .collect()
}

/// Weighted sum of one band across frames, iterating frames in stack order.
fn blend_level(bands: &[&Buffer2<f32>], weights: &[Buffer2<f32>]) -> Buffer2<f32> {
    let (w, h) = (bands[0].width(), bands[0].height());
    par_buffer(w, h, |y, row| {
        for (x, out) in row.iter_mut().enumerate() {
            *out = bands
                .iter()
                .zip(weights)
                .map(|(b, wt)| b[(x, y)] * wt[(x, y)])
                .sum();
        }
    })
}
