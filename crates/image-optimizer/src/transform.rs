//! Decode, resize, and re-encode via the `image` crate

use crate::error::Result;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{self, CompressionType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};
use image_cache::{ImageFormat, RequestDescriptor};

/// Largest width or height the service will produce
pub const MAX_DIMENSION: u32 = 8192;

/// Produce the output bytes for `descriptor` from the source image.
///
/// With one of width/height zero the other is derived from the source aspect
/// ratio; with both set the image is scaled to cover and centre-cropped.
pub fn transform(source: &[u8], descriptor: &RequestDescriptor) -> Result<Vec<u8>> {
    let image = image::load_from_memory(source)?;

    let image = match target_size(
        image.width(),
        image.height(),
        descriptor.width,
        descriptor.height,
    ) {
        Some((width, height)) => image.resize_to_fill(width, height, FilterType::Lanczos3),
        None => image,
    };

    encode(&image, descriptor.format, descriptor.quality)
}

/// Output size for a requested size; `None` keeps the source size
fn target_size(src_width: u32, src_height: u32, width: u32, height: u32) -> Option<(u32, u32)> {
    let ratio = src_width as f64 / src_height as f64;
    let clamp = |v: f64| (v as u32).clamp(1, MAX_DIMENSION);

    match (width, height) {
        (0, 0) => None,
        (w, 0) => Some((w, clamp(w as f64 / ratio))),
        (0, h) => Some((clamp(h as f64 * ratio), h)),
        (w, h) => Some((w, h)),
    }
}

fn encode(image: &DynamicImage, format: ImageFormat, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();

    match format {
        ImageFormat::Jpeg => {
            // JPEG carries no alpha channel
            let rgb = image.to_rgb8();
            JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).write_image(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                ExtendedColorType::Rgb8,
            )?;
        }
        ImageFormat::Png => {
            let rgba = image.to_rgba8();
            PngEncoder::new_with_quality(&mut out, CompressionType::Best, png::FilterType::Adaptive)
                .write_image(
                    rgba.as_raw(),
                    rgba.width(),
                    rgba.height(),
                    ExtendedColorType::Rgba8,
                )?;
        }
        ImageFormat::Webp => {
            // The pure-Rust WebP encoder is lossless only; quality still keys the cache.
            let rgba = image.to_rgba8();
            WebPEncoder::new_lossless(&mut out).write_image(
                rgba.as_raw(),
                rgba.width(),
                rgba.height(),
                ExtendedColorType::Rgba8,
            )?;
        }
    }

    Ok(out)
}
