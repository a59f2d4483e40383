//! Commonly used types in one import.
//!
//! ```rust,ignore
//! use imageutils::prelude::*;
//! ```

pub use crate::{Error, ErrorKind, Result};

pub use crate::{Image, ImageDimensions, PixelPrecision, load_image, save_image};

pub use crate::{AlignedImage, Aligner, AlignerConfig, AlignmentReport, Transform, TransformType};

pub use crate::{Fuser, FusionConfig, FusionMode, FusionStack};
