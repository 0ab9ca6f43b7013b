//! Image pre-normalization applied before every embedding extraction.
//!
//! Corrects EXIF orientation, converts to 8-bit RGB, bounds the longest
//! side and re-encodes as PNG. The output depends only on the input bytes
//! and `max_dimension`.

use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageError, ImageFormat, ImageReader};
use std::io::Cursor;
use thiserror::Error;

/// Default bound for the longest side of a normalized image.
pub const DEFAULT_MAX_DIMENSION: u32 = 1600;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("image is empty")]
    Empty,
    #[error("failed to decode image: {0}")]
    Decode(#[source] ImageError),
    #[error("failed to encode normalized image: {0}")]
    Encode(#[source] ImageError),
}

/// A normalized RGB image, PNG-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl NormalizedImage {
    /// File extension for persisting [`png`](Self::png).
    pub const EXTENSION: &'static str = "png";
}

#[derive(Debug, Clone, Copy)]
pub struct ImageNormalizer {
    max_dimension: u32,
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIMENSION)
    }
}

impl ImageNormalizer {
    pub fn new(max_dimension: u32) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
        }
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    pub fn normalize(&self, bytes: &[u8]) -> Result<NormalizedImage, NormalizeError> {
        if bytes.is_empty() {
            return Err(NormalizeError::Empty);
        }

        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| NormalizeError::Decode(ImageError::IoError(e)))?;
        let mut decoder = reader.into_decoder().map_err(NormalizeError::Decode)?;
        let orientation = decoder.orientation().map_err(NormalizeError::Decode)?;
        let mut image = DynamicImage::from_decoder(decoder).map_err(NormalizeError::Decode)?;
        image.apply_orientation(orientation);

        let (src_width, src_height) = (image.width(), image.height());
        let mut rgb = DynamicImage::ImageRgb8(image.to_rgb8());
        if src_width.max(src_height) > self.max_dimension {
            rgb = rgb.resize(self.max_dimension, self.max_dimension, FilterType::Triangle);
        }

        let mut png = Vec::new();
        rgb.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(NormalizeError::Encode)?;

        tracing::debug!(
            src_width,
            src_height,
            width = rgb.width(),
            height = rgb.height(),
            ?orientation,
            "image normalized"
        );

        Ok(NormalizedImage {
            png,
            width: rgb.width(),
            height: rgb.height(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Vec::new();
        image.write_to(&mut Cursor::new(&mut out), format).unwrap();
        out
    }

    #[test]
    fn test_downscales_longest_side() {
        let src = RgbImage::from_pixel(400, 100, Rgb([10, 20, 30]));
        let bytes = encode(DynamicImage::ImageRgb8(src), ImageFormat::Png);

        let out = ImageNormalizer::new(200).normalize(&bytes).unwrap();
        assert_eq!((out.width, out.height), (200, 50));
    }

    #[test]
    fn test_small_images_keep_size() {
        let src = RgbImage::from_pixel(64, 48, Rgb([200, 100, 0]));
        let bytes = encode(DynamicImage::ImageRgb8(src), ImageFormat::Png);

        let out = ImageNormalizer::new(200).normalize(&bytes).unwrap();
        assert_eq!((out.width, out.height), (64, 48));
    }

    #[test]
    fn test_grayscale_converted_to_rgb() {
        let src = GrayImage::from_pixel(16, 16, Luma([128]));
        let bytes = encode(DynamicImage::ImageLuma8(src), ImageFormat::Png);

        let out = ImageNormalizer::default().normalize(&bytes).unwrap();
        let decoded = image::load_from_memory(&out.png).unwrap();
        assert!(matches!(decoded, DynamicImage::ImageRgb8(_)));
        assert_eq!(decoded.to_rgb8().get_pixel(0, 0), &Rgb([128, 128, 128]));
    }

    #[test]
    fn test_output_is_deterministic() {
        let mut src = RgbImage::new(300, 220);
        for (x, y, px) in src.enumerate_pixels_mut() {
            *px = Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]);
        }
        let bytes = encode(DynamicImage::ImageRgb8(src), ImageFormat::Png);

        let normalizer = ImageNormalizer::new(128);
        let a = normalizer.normalize(&bytes).unwrap();
        let b = normalizer.normalize(&bytes).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_garbage_and_empty() {
        let normalizer = ImageNormalizer::default();
        assert!(matches!(normalizer.normalize(&[]), Err(NormalizeError::Empty)));
        assert!(matches!(
            normalizer.normalize(b"definitely not an image"),
            Err(NormalizeError::Decode(_))
        ));
    }
}
