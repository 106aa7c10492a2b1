//! Frame encoding for transport.
//!
//! Published frames travel as JPEG bytes wrapped in standard base64 so they
//! can sit in text columns and JSON documents unchanged.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, Rgb, RgbImage};

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Placeholder published before the first real frame: 640x320, mid grey.
pub const PLACEHOLDER_WIDTH: u32 = 640;
pub const PLACEHOLDER_HEIGHT: u32 = 320;

pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode_image(frame)
        .context("failed to encode frame as JPEG")?;
    Ok(bytes)
}

/// JPEG-encode a frame and wrap it in base64.
pub fn encode_frame(frame: &RgbImage, quality: u8) -> Result<String> {
    Ok(STANDARD.encode(encode_jpeg(frame, quality)?))
}

/// Inverse of `encode_frame`.
pub fn decode_frame(encoded: &str) -> Result<RgbImage> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .context("frame payload is not valid base64")?;
    let image = image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg)
        .context("frame payload is not a JPEG image")?;
    Ok(image.to_rgb8())
}

pub fn placeholder_frame() -> RgbImage {
    RgbImage::from_pixel(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, Rgb([128, 128, 128]))
}
