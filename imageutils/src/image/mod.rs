//! Decoded raster images.
//!
//! Samples are stored as planar `f32` channels normalized to `[0, 1]`,
//! independent of the precision the file was stored with. The original
//! precision is kept so outputs can be written back the same way.

pub(crate) mod io;


use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::common::Buffer2;
use crate::common::filter::reduce;
use crate::error::{Error, Result};

pub use io::{load_image, save_image};

/// Rec.709 luma weights.
const LUMA_WEIGHTS: [f32; 3] = [0.2126, 0.7152, 0.0722];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageDimensions {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

impl ImageDimensions {
    pub const fn new(width: usize, height: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn same_size(&self, other: &Self) -> bool {
        self.width == other.width && self.height == other.height
    }
}

impl fmt::Display for ImageDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

/// Per-channel storage precision of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelPrecision {
    #[default]
    U8,
    U16,
    F32,
}

/// An immutable decoded image: one plane (luminance) or three (RGB), plus an
/// optional alpha plane marking which pixels carry data.
#[derive(Debug, Clone)]
pub struct Image {
    dimensions: ImageDimensions,
    channels: Vec<Buffer2<f32>>,
    alpha: Option<Buffer2<f32>>,
    precision: PixelPrecision,
    path: Option<PathBuf>,
}

impl Image {
    /// Builds an image from one (gray) or three (RGB) equally sized planes.
    pub fn from_channels(channels: Vec<Buffer2<f32>>, precision: PixelPrecision) -> Result<Self> {
        let Some(first) = channels.first() else {
            return Err(Error::malformed("image has no channels"));
        };
        if channels.len() != 1 && channels.len() != 3 {
            return Err(Error::malformed(format!(
                "expected 1 or 3 channels, got {}",
                channels.len()
            )));
        }
        if first.is_empty() {
            return Err(Error::malformed(format!(
                "zero-sized image ({}x{})",
                first.width(),
                first.height()
            )));
        }
        if channels.iter().any(|c| !c.same_size(first)) {
            return Err(Error::malformed("channel planes differ in size"));
        }

        Ok(Self {
            dimensions: ImageDimensions::new(first.width(), first.height(), channels.len()),
            channels,
            alpha: None,
            precision,
            path: None,
        })
    }

    pub fn from_gray(plane: Buffer2<f32>, precision: PixelPrecision) -> Result<Self> {
        Self::from_channels(vec![plane], precision)
    }

    /// Attaches an alpha plane; pixels with alpha 0 count as unfilled.
    pub fn with_alpha(mut self, alpha: Buffer2<f32>) -> Result<Self> {
        if alpha.width() != self.width() || alpha.height() != self.height() {
            return Err(Error::malformed("alpha plane differs in size from color planes"));
        }
        self.alpha = Some(alpha);
        Ok(self)
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[inline]
    pub fn dimensions(&self) -> ImageDimensions {
        self.dimensions
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.dimensions.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.dimensions.height
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn channel(&self, index: usize) -> &Buffer2<f32> {
        &self.channels[index]
    }

    #[inline]
    pub fn channels(&self) -> &[Buffer2<f32>] {
        &self.channels
    }

    #[inline]
    pub fn alpha(&self) -> Option<&Buffer2<f32>> {
        self.alpha.as_ref()
    }

    #[inline]
    pub fn precision(&self) -> PixelPrecision {
        self.precision
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Human-readable source for log lines.
    pub(crate) fn label(&self) -> String {
        match &self.path {
            Some(p) => p.display().to_string(),
            None => "<memory>".to_string(),
        }
    }

    pub(crate) fn into_parts(self) -> (Vec<Buffer2<f32>>, Option<Buffer2<f32>>, PixelPrecision) {
        (self.channels, self.alpha, self.precision)
    }

    /// Re-checks the layout invariants. Images built through the constructors
    /// always pass; this guards stages that receive images from elsewhere.
    pub fn validate(&self) -> Result<()> {
        let ImageDimensions {
            width,
            height,
            channels,
        } = self.dimensions;
        if width == 0 || height == 0 {
            return Err(Error::malformed(format!("zero-sized image ({width}x{height})")));
        }
        if channels != self.channels.len() || !(channels == 1 || channels == 3) {
            return Err(Error::malformed(format!(
                "inconsistent channel count {channels} for {} planes",
                self.channels.len()
            )));
        }
        let size_ok = |b: &Buffer2<f32>| b.width() == width && b.height() == height;
        if !self.channels.iter().all(size_ok) || !self.alpha.iter().all(size_ok) {
            return Err(Error::malformed("plane size does not match image dimensions"));
        }
        Ok(())
    }

    /// Luminance plane (Rec.709 weights for RGB, a copy for gray images).
    pub fn luminance(&self) -> Buffer2<f32> {
        if let [r, g, b] = self.channels.as_slice() {
            let pixels = r
                .pixels()
                .iter()
                .zip(g.pixels())
                .zip(b.pixels())
                .map(|((&r, &g), &b)| {
                    LUMA_WEIGHTS[0] * r + LUMA_WEIGHTS[1] * g + LUMA_WEIGHTS[2] * b
                })
                .collect();
            Buffer2::new(self.width(), self.height(), pixels)
        } else {
            self.channels[0].clone()
        }
    }

    /// Halves the resolution with a Gaussian reduction of every plane.
    pub fn downsample_half(&self) -> Image {
        let channels: Vec<_> = self.channels.iter().map(reduce).collect();
        let dimensions = ImageDimensions::new(
            channels[0].width(),
            channels[0].height(),
            self.dimensions.channels,
        );
        Image {
            dimensions,
            channels,
            alpha: self.alpha.as_ref().map(reduce),
            precision: self.precision,
            path: self.path.clone(),
        }
    }

    /// Repeatedly halves until the longest side is at most `max_dimension`.
    /// Returns the reduced image and the factor mapping full-resolution
    /// coordinates onto it.
    pub fn downsample_to(&self, max_dimension: usize) -> (Image, f64) {
        let mut current = self.clone();
        let mut scale = 1.0;
        while current.width().max(current.height()) > max_dimension
            && current.width().min(current.height()) > 1
        {
            current = current.downsample_half();
            scale *= 0.5;
        }
        (current, scale)
    }
}
