//! Image Normalizer
//!
//! Turns raw upload bytes, or a base64 string (optionally a data URI), into an
//! RGB pixel grid that every classifier's preprocessing starts from.

use base64::Engine as _;
use image::RgbImage;

use crate::error::{EngineError, Result};

/// A decoded RGB image, independent of the source encoding
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pixels: RgbImage,
}

impl DecodedImage {
    /// Decode raw bytes in any format the `image` crate recognizes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(EngineError::Decode("empty image payload".into()));
        }
        let decoded = image::load_from_memory(bytes)?;
        Ok(Self {
            pixels: decoded.to_rgb8(),
        })
    }

    /// Decode a base64 payload. A `data:image/...;base64,` header is stripped first.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let payload = strip_data_uri(encoded);
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| EngineError::Decode(format!("Base64 decode failed: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_rgb(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }
}

/// Everything after the first comma is the payload, matching how browsers emit data URIs
fn strip_data_uri(encoded: &str) -> &str {
    match encoded.split_once(',') {
        Some((_, payload)) => payload,
        None => encoded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([10, 200, 30]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_decode_raw_bytes() {
        let image = DecodedImage::from_bytes(&png_bytes(8, 4)).unwrap();
        assert_eq!(image.width(), 8);
        assert_eq!(image.height(), 4);
        assert_eq!(image.pixels().get_pixel(0, 0), &Rgb([10, 200, 30]));
    }

    #[test]
    fn test_decode_base64_with_data_uri() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes(3, 3));
        let with_header = format!("data:image/png;base64,{}", encoded);

        let plain = DecodedImage::from_base64(&encoded).unwrap();
        let prefixed = DecodedImage::from_base64(&with_header).unwrap();
        assert_eq!(plain.width(), 3);
        assert_eq!(prefixed.pixels(), plain.pixels());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            DecodedImage::from_bytes(b"definitely not an image"),
            Err(EngineError::Decode(_))
        ));
        assert!(matches!(
            DecodedImage::from_base64("data:image/png;base64,@@@"),
            Err(EngineError::Decode(_))
        ));
        assert!(matches!(
            DecodedImage::from_bytes(&[]),
            Err(EngineError::Decode(_))
        ));
    }
}
