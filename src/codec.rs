//! Encoded bytes ↔ [`ImageBuffer`]

use crate::{
    error::{BgRemovalError, Result},
    types::ImageBuffer,
};
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;

/// Output encodings that keep the alpha channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Tiff,
    /// Headerless interleaved RGBA8 bytes
    Rgba8,
}

impl OutputFormat {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Tiff => "tiff",
            Self::Rgba8 => "raw",
        }
    }

    /// Format matching a file extension (case-insensitive)
    #[must_use]
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "tif" | "tiff" => Some(Self::Tiff),
            "raw" | "rgba" => Some(Self::Rgba8),
            _ => None,
        }
    }
}

/// Decoding and encoding at the pipeline's edges
pub trait ImageCodec: Send + Sync {
    /// Decode any supported container into 8-bit RGBA
    ///
    /// # Errors
    /// - Unrecognized or corrupt data
    fn decode(&self, bytes: &[u8]) -> Result<ImageBuffer>;

    /// Encode an RGBA image
    ///
    /// # Errors
    /// - Encoder failure or inconsistent buffer
    fn encode(&self, image: &ImageBuffer, format: OutputFormat) -> Result<Vec<u8>>;
}

/// [`ImageCodec`] backed by the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateCodec;

impl ImageCodec for ImageCrateCodec {
    fn decode(&self, bytes: &[u8]) -> Result<ImageBuffer> {
        let decoded = image::load_from_memory(bytes)?;
        let buffer = ImageBuffer::from(&decoded);
        buffer.validate()?;
        Ok(buffer)
    }

    fn encode(&self, image: &ImageBuffer, format: OutputFormat) -> Result<Vec<u8>> {
        image.validate()?;
        let image_format = match format {
            OutputFormat::Rgba8 => return Ok(image.pixels().to_vec()),
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Tiff => ImageFormat::Tiff,
        };

        let rgba = image
            .to_rgba_image()
            .ok_or_else(|| BgRemovalError::composite("RGBA buffer does not match its dimensions"))?;
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(rgba).write_to(&mut Cursor::new(&mut bytes), image_format)?;
        Ok(bytes)
    }
}

impl ImageCrateCodec {
    /// Read and decode an image file
    ///
    /// # Errors
    /// - File cannot be read
    /// - Decoding fails
    pub fn read_file<P: AsRef<Path>>(&self, path: P) -> Result<ImageBuffer> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| BgRemovalError::file_io_error("read image", path, &e))?;
        self.decode(&bytes)
    }

    /// Encode and write an image file
    ///
    /// # Errors
    /// - Encoding fails
    /// - File cannot be written
    pub fn write_file<P: AsRef<Path>>(
        &self,
        path: P,
        image: &ImageBuffer,
        format: OutputFormat,
    ) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.encode(image, format)?;
        std::fs::write(path, bytes).map_err(|e| BgRemovalError::file_io_error("write image", path, &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_keeps_alpha() {
        let codec = ImageCrateCodec;
        let mut pixels = ImageBuffer::filled(5, 4, [255, 0, 0, 255]).into_pixels();
        pixels[3] = 0;
        let image = ImageBuffer::new(5, 4, pixels).unwrap();

        let png = codec.encode(&image, OutputFormat::Png).unwrap();
        assert_eq!(&png[1..4], b"PNG");
        let decoded = codec.decode(&png).unwrap();
        assert_eq!(decoded, image);
    }

    #[test]
    fn test_raw_rgba_is_pixel_bytes() {
        let image = ImageBuffer::filled(2, 2, [1, 2, 3, 4]);
        let raw = ImageCrateCodec.encode(&image, OutputFormat::Rgba8).unwrap();
        assert_eq!(raw, image.pixels());
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        assert!(matches!(
            ImageCrateCodec.decode(b"not an image"),
            Err(BgRemovalError::Image(_))
        ));
    }

    #[test]
    fn test_format_extensions() {
        assert_eq!(OutputFormat::from_extension("PNG"), Some(OutputFormat::Png));
        assert_eq!(OutputFormat::from_extension("tif"), Some(OutputFormat::Tiff));
        assert_eq!(OutputFormat::from_extension("jpg"), None);
        assert_eq!(OutputFormat::Rgba8.extension(), "raw");
    }
}
