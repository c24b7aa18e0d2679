//! [`Codec`] implementation backed by the `image` crate, with lossy WebP
//! output going through libwebp (the `webp` crate); `image` itself only
//! encodes WebP losslessly.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};

use pixmill_core::{Codec, CoreError, EncodedImage, OutputFormat, PixelBuffer};

/// Default export quality when the caller does not specify one.
pub const DEFAULT_QUALITY: u8 = 80;

#[derive(Debug, Default, Clone, Copy)]
pub struct RasterCodec;

impl Codec for RasterCodec {
    fn decode(&self, bytes: &[u8]) -> Result<PixelBuffer, CoreError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|err| CoreError::Decode(err.to_string()))?;
        // Formats without transparency come back fully opaque.
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        PixelBuffer::new(width, height, rgba.into_raw())
    }

    fn encode(
        &self,
        buffer: &PixelBuffer,
        format: OutputFormat,
        quality: Option<u8>,
    ) -> Result<EncodedImage, CoreError> {
        if buffer.width() == 0 || buffer.height() == 0 {
            return Err(CoreError::Encode(
                "cannot encode a zero-dimension buffer".to_string(),
            ));
        }
        match format {
            OutputFormat::Png => {
                let mut out = Vec::new();
                PngEncoder::new(Cursor::new(&mut out))
                    .write_image(
                        buffer.data(),
                        buffer.width(),
                        buffer.height(),
                        ExtendedColorType::Rgba8,
                    )
                    .map_err(|err| CoreError::Encode(err.to_string()))?;
                Ok(EncodedImage {
                    bytes: out,
                    format,
                    quality: None,
                })
            }
            OutputFormat::Jpeg => {
                let quality = clamp_quality(quality);
                // JPEG has no alpha channel.
                let rgb = drop_alpha(buffer);
                let mut out = Vec::new();
                let mut encoder = JpegEncoder::new_with_quality(Cursor::new(&mut out), quality);
                encoder
                    .encode(
                        &rgb,
                        buffer.width(),
                        buffer.height(),
                        ExtendedColorType::Rgb8,
                    )
                    .map_err(|err| CoreError::Encode(err.to_string()))?;
                Ok(EncodedImage {
                    bytes: out,
                    format,
                    quality: Some(quality),
                })
            }
            OutputFormat::Webp => {
                let quality = clamp_quality(quality);
                let encoder =
                    webp::Encoder::from_rgba(buffer.data(), buffer.width(), buffer.height());
                let encoded = encoder.encode(quality as f32);
                Ok(EncodedImage {
                    bytes: encoded.to_vec(),
                    format,
                    quality: Some(quality),
                })
            }
        }
    }

    fn resize(
        &self,
        buffer: &PixelBuffer,
        width: u32,
        height: u32,
    ) -> Result<PixelBuffer, CoreError> {
        if width == 0 || height == 0 {
            return Err(CoreError::InvalidDimension { width, height });
        }
        let source = RgbaImage::from_raw(buffer.width(), buffer.height(), buffer.data().to_vec())
            .ok_or_else(|| {
                CoreError::Encode("pixel buffer does not form a valid image".to_string())
            })?;
        // Bilinear smoothing; aspect ratio is deliberately not preserved.
        let resized = image::imageops::resize(&source, width, height, FilterType::Triangle);
        PixelBuffer::new(width, height, resized.into_raw())
    }
}

/// Caller quality 0 is treated as 1; PNG never reaches this path.
fn clamp_quality(quality: Option<u8>) -> u8 {
    quality.unwrap_or(DEFAULT_QUALITY).clamp(1, 100)
}

fn drop_alpha(buffer: &PixelBuffer) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(buffer.data().len() / 4 * 3);
    for px in buffer.data().chunks_exact(4) {
        rgb.extend_from_slice(&px[..3]);
    }
    rgb
}
