use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image as image_lib;
use image_lib::{ColorType, DynamicImage, ImageBuffer, ImageFormat, Pixel};

use super::{Image, PixelPrecision};
use crate::common::Buffer2;
use crate::error::{Error, Result};

/// Decodes `path` into an [`Image`].
///
/// Gray and RGB layouts at 8, 16 and 32-bit float are accepted. An alpha
/// channel becomes the image's coverage plane.
pub fn load_image(path: impl AsRef<Path>) -> Result<Image> {
    let path = path.as_ref();
    let img = image_lib::open(path).map_err(|source| Error::Decode {
        path: path.to_path_buf(),
        source,
    })?;

    let color = img.color();
    let precision = match color {
        ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8 => PixelPrecision::U8,
        ColorType::L16 | ColorType::La16 | ColorType::Rgb16 | ColorType::Rgba16 => {
            PixelPrecision::U16
        }
        ColorType::Rgb32F | ColorType::Rgba32F => PixelPrecision::F32,
        other => {
            return Err(Error::UnsupportedLayout {
                path: path.to_path_buf(),
                color: format!("{other:?}"),
            });
        }
    };
    let gray = matches!(
        color,
        ColorType::L8 | ColorType::La8 | ColorType::L16 | ColorType::La16
    );
    let has_alpha = color.has_alpha();

    let (width, height) = (img.width() as usize, img.height() as usize);
    let rgba = img.into_rgba32f();
    let samples = rgba.as_raw();
    let plane = |c: usize| -> Buffer2<f32> {
        Buffer2::new(width, height, samples.iter().skip(c).step_by(4).copied().collect())
    };

    let channels = if gray {
        vec![plane(0)]
    } else {
        vec![plane(0), plane(1), plane(2)]
    };
    let mut image = Image::from_channels(channels, precision)?.with_path(path);
    if has_alpha {
        image = image.with_alpha(plane(3))?;
    }

    tracing::debug!(
        path = %path.display(),
        width,
        height,
        ?color,
        "decoded image"
    );
    Ok(image)
}

/// Encodes `image` to `path`, choosing the format from the extension.
///
/// The file is written next to its destination under a temporary name and
/// renamed into place, so a failure never leaves a partial file at `path`.
pub fn save_image(image: &Image, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let format = ImageFormat::from_path(path).map_err(|source| Error::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    let encoded = to_dynamic(image, format)?;

    let write_err = |source: std::io::Error| Error::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".imageutils-")
        .tempfile_in(&dir)
        .map_err(write_err)?;

    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        encoded
            .write_to(&mut writer, format)
            .map_err(|source| Error::Encode {
                path: path.to_path_buf(),
                source,
            })?;
        writer.flush().map_err(write_err)?;
    }
    tmp.persist(path).map_err(|e| write_err(e.error))?;

    tracing::debug!(path = %path.display(), ?format, "wrote image");
    Ok(())
}

fn supports_alpha(format: ImageFormat) -> bool {
    matches!(
        format,
        ImageFormat::Png | ImageFormat::Tiff | ImageFormat::OpenExr
    )
}

fn supports_16bit(format: ImageFormat) -> bool {
    matches!(format, ImageFormat::Png | ImageFormat::Tiff)
}

fn supports_float(format: ImageFormat) -> bool {
    matches!(format, ImageFormat::Tiff | ImageFormat::OpenExr)
}

#[derive(Clone, Copy)]
enum Depth {
    Eight,
    Sixteen,
    Float,
}

fn to_dynamic(image: &Image, format: ImageFormat) -> Result<DynamicImage> {
    let depth = match image.precision() {
        PixelPrecision::F32 if supports_float(format) => Depth::Float,
        PixelPrecision::F32 | PixelPrecision::U16 if supports_16bit(format) => Depth::Sixteen,
        _ => Depth::Eight,
    };

    let mut planes: Vec<&Buffer2<f32>> = image.channels().iter().collect();
    let alpha = image.alpha().filter(|_| supports_alpha(format));
    let gray = planes.len() == 1;

    // No float gray layout exists in the encoder; widen to RGB.
    if gray && matches!(depth, Depth::Float) {
        planes = vec![planes[0], planes[0], planes[0]];
    }
    if let Some(a) = alpha {
        planes.push(a);
    }

    let (w, h) = (image.width() as u32, image.height() as u32);
    let has_alpha = alpha.is_some();
    let gray = planes.len() <= 2 && !matches!(depth, Depth::Float);

    let dynamic = match (depth, gray, has_alpha) {
        (Depth::Eight, true, false) => DynamicImage::ImageLuma8(buffer::<image_lib::Luma<u8>>(
            w,
            h,
            interleave(&planes, to_u8),
        )?),
        (Depth::Eight, true, true) => DynamicImage::ImageLumaA8(buffer::<image_lib::LumaA<u8>>(
            w,
            h,
            interleave(&planes, to_u8),
        )?),
        (Depth::Eight, false, false) => {
            DynamicImage::ImageRgb8(buffer::<image_lib::Rgb<u8>>(w, h, interleave(&planes, to_u8))?)
        }
        (Depth::Eight, false, true) => DynamicImage::ImageRgba8(buffer::<image_lib::Rgba<u8>>(
            w,
            h,
            interleave(&planes, to_u8),
        )?),
        (Depth::Sixteen, true, false) => DynamicImage::ImageLuma16(buffer::<image_lib::Luma<u16>>(
            w,
            h,
            interleave(&planes, to_u16),
        )?),
        (Depth::Sixteen, true, true) => DynamicImage::ImageLumaA16(
            buffer::<image_lib::LumaA<u16>>(w, h, interleave(&planes, to_u16))?,
        ),
        (Depth::Sixteen, false, false) => DynamicImage::ImageRgb16(buffer::<image_lib::Rgb<u16>>(
            w,
            h,
            interleave(&planes, to_u16),
        )?),
        (Depth::Sixteen, false, true) => DynamicImage::ImageRgba16(
            buffer::<image_lib::Rgba<u16>>(w, h, interleave(&planes, to_u16))?,
        ),
        (Depth::Float, _, false) => DynamicImage::ImageRgb32F(buffer::<image_lib::Rgb<f32>>(
            w,
            h,
            interleave(&planes, |v| v),
        )?),
        (Depth::Float, _, true) => DynamicImage::ImageRgba32F(buffer::<image_lib::Rgba<f32>>(
            w,
            h,
            interleave(&planes, |v| v),
        )?),
    };
    Ok(dynamic)
}

fn buffer<P: Pixel>(
    w: u32,
    h: u32,
    data: Vec<P::Subpixel>,
) -> Result<ImageBuffer<P, Vec<P::Subpixel>>> {
    ImageBuffer::from_raw(w, h, data)
        .ok_or_else(|| Error::malformed("sample count does not match image dimensions"))
}

fn interleave<T>(planes: &[&Buffer2<f32>], convert: impl Fn(f32) -> T) -> Vec<T> {
    let count = planes.first().map_or(0, |p| p.len());
    let mut out = Vec::with_capacity(count * planes.len());
    for i in 0..count {
        for plane in planes {
            out.push(convert(plane.pixels()[i]));
        }
    }
    out
}

#[inline]
fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[inline]
fn to_u16(v: f32) -> u16 {
    (v.clamp(0.0, 1.0) * 65535.0).round() as u16
}
