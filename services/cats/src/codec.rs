//! Image codec: decode an uploaded data URI, bound its size, re-encode it.

use base64::{engine::general_purpose::STANDARD, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat};
use thiserror::Error;
use tracing::debug;

use crate::config::ImageConfig;

/// Errors raised while decoding or re-encoding an image payload
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Image payload is empty")]
    Empty,

    #[error("Invalid base64 image payload: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("Unsupported or corrupt image: {0}")]
    Decode(String),

    #[error("Failed to encode resized image: {0}")]
    Encode(String),
}

/// Bounded resize/transcode of uploaded images
#[derive(Debug, Clone)]
pub struct ImageCodec {
    max_dimension: u32,
    jpeg_quality: u8,
}

impl ImageCodec {
    pub fn new(config: &ImageConfig) -> Self {
        Self {
            max_dimension: config.max_dimension,
            jpeg_quality: config.jpeg_quality,
        }
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// Decode, shrink to fit within `max_dimension` (aspect ratio preserved) and re-encode.
    ///
    /// PNG input stays PNG; every other format is re-encoded as JPEG. Images already
    /// within the bound are only transcoded.
    pub fn resize(&self, image: &str) -> Result<String, CodecError> {
        let bytes = decode_payload(image)?;

        let format = image::guess_format(&bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        let decoded = image::load_from_memory_with_format(&bytes, format)
            .map_err(|e| CodecError::Decode(e.to_string()))?;

        let (width, height) = (decoded.width(), decoded.height());
        let resized = if width.max(height) > self.max_dimension {
            decoded.resize(self.max_dimension, self.max_dimension, FilterType::Triangle)
        } else {
            decoded
        };

        debug!(
            source_width = width,
            source_height = height,
            width = resized.width(),
            height = resized.height(),
            format = ?format,
            "Image resized"
        );

        let (mime, encoded) = match format {
            ImageFormat::Png => ("image/png", encode_png(&resized)?),
            _ => ("image/jpeg", encode_jpeg(&resized, self.jpeg_quality)?),
        };

        Ok(to_data_uri(mime, &encoded))
    }
}

/// Build a `data:` URI from raw image bytes
pub fn to_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Strip an optional `data:<mime>;base64,` prefix and decode the rest
fn decode_payload(image: &str) -> Result<Vec<u8>, CodecError> {
    let payload = match image.split_once("base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => image,
    };
    let payload = payload.trim();

    if payload.is_empty() {
        return Err(CodecError::Empty);
    }

    Ok(STANDARD.decode(payload)?)
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, CodecError> {
    let rgba = image.to_rgba8();
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(
            rgba.as_raw(),
            rgba.width(),
            rgba.height(),
            ExtendedColorType::Rgba8,
        )
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(buf)
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, CodecError> {
    // JPEG has no alpha channel
    let rgb = image.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .write_image(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(max_dimension: u32) -> ImageCodec {
        ImageCodec::new(&ImageConfig {
            max_dimension,
            jpeg_quality: 85,
        })
    }

    fn png_data_uri(width: u32, height: u32) -> String {
        let img = image::RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        });
        to_data_uri("image/png", &encode_png(&DynamicImage::ImageRgba8(img)).unwrap())
    }

    fn jpeg_data_uri(width: u32, height: u32) -> String {
        let img = image::RgbImage::from_fn(width, height, |x, _| image::Rgb([(x % 256) as u8, 64, 32]));
        to_data_uri(
            "image/jpeg",
            &encode_jpeg(&DynamicImage::ImageRgb8(img), 90).unwrap(),
        )
    }

    fn dimensions(data_uri: &str) -> (u32, u32) {
        let img = image::load_from_memory(&decode_payload(data_uri).unwrap()).unwrap();
        (img.width(), img.height())
    }

    #[test]
    fn test_large_image_is_bounded_with_aspect_ratio() {
        let out = codec(100).resize(&png_data_uri(400, 200)).unwrap();
        let (w, h) = dimensions(&out);
        assert!(w.max(h) <= 100);
        let ratio = w as f64 / h as f64;
        assert!((ratio - 2.0).abs() < 0.05, "aspect ratio {ratio}");
    }

    #[test]
    fn test_tall_jpeg_is_bounded() {
        let out = codec(64).resize(&jpeg_data_uri(90, 300)).unwrap();
        assert!(out.starts_with("data:image/jpeg;base64,"));
        let (w, h) = dimensions(&out);
        assert_eq!(h, 64);
        let ratio = w as f64 / h as f64;
        assert!((ratio - 0.3).abs() < 0.05, "aspect ratio {ratio}");
    }

    #[test]
    fn test_small_image_keeps_dimensions() {
        let out = codec(640).resize(&png_data_uri(200, 200)).unwrap();
        assert!(out.starts_with("data:image/png;base64,"));
        assert_eq!(dimensions(&out), (200, 200));
    }

    #[test]
    fn test_payload_without_prefix_is_accepted() {
        let uri = png_data_uri(10, 10);
        let (_, raw) = uri.split_once("base64,").unwrap();
        assert!(codec(640).resize(raw).is_ok());
    }

    #[test]
    fn test_invalid_base64_rejected() {
        assert!(matches!(
            codec(640).resize("data:image/png;base64,not base64!!"),
            Err(CodecError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_truncated_image_rejected() {
        let uri = png_data_uri(50, 50);
        let bytes = decode_payload(&uri).unwrap();
        let truncated = to_data_uri("image/png", &bytes[..bytes.len() / 3]);
        assert!(matches!(
            codec(640).resize(&truncated),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert!(matches!(
            codec(640).resize("data:image/png;base64,"),
            Err(CodecError::Empty)
        ));
        assert!(matches!(codec(640).resize(""), Err(CodecError::Empty)));
    }
}
