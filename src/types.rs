//! Core pixel, tensor and mask buffers passed between pipeline stages

use crate::{
    error::{BgRemovalError, Result},
    models::{BackendKind, MaskNormalization},
};
use ndarray::{Array4, ArrayViewD};
use serde::{Deserialize, Serialize};

/// Number of color planes in a [`TensorBuffer`]
pub const TENSOR_CHANNELS: usize = 3;

/// Decoded 8-bit RGBA pixel grid
///
/// The pixel vector always holds exactly `width * height * 4` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl ImageBuffer {
    /// Wrap raw RGBA bytes
    ///
    /// # Errors
    /// - `pixels.len()` differs from `width * height * 4`
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = Self::byte_len(width, height)?;
        if pixels.len() != expected {
            return Err(BgRemovalError::preprocess(format!(
                "RGBA buffer holds {} bytes but {}x{} needs {}",
                pixels.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Image filled with a single RGBA color
    #[must_use]
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * 4);
        for _ in 0..count {
            pixels.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    fn byte_len(width: u32, height: u32) -> Result<usize> {
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| {
                BgRemovalError::preprocess(format!("Image {}x{} is too large", width, height))
            })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    #[must_use]
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Number of pixels (not bytes)
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// RGBA value of the pixel at `(x, y)`
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = (y as usize * self.width as usize + x as usize) * 4;
        let bytes = self.pixels.get(start..start + 4)?;
        Some([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Check the buffer is non-empty and consistent
    ///
    /// # Errors
    /// - Zero width or height
    /// - Byte length does not match the dimensions
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(BgRemovalError::preprocess(format!(
                "Image dimensions must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        let expected = Self::byte_len(self.width, self.height)?;
        if self.pixels.len() != expected {
            return Err(BgRemovalError::preprocess(format!(
                "RGBA buffer holds {} bytes, expected {}",
                self.pixels.len(),
                expected
            )));
        }
        Ok(())
    }

    /// Borrow as an `image` crate buffer
    #[must_use]
    pub fn to_rgba_image(&self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
    }

    #[must_use]
    pub fn into_rgba_image(self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.pixels)
    }
}

impl From<image::RgbaImage> for ImageBuffer {
    fn from(image: image::RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            pixels: image.into_raw(),
        }
    }
}

impl From<&image::DynamicImage> for ImageBuffer {
    fn from(image: &image::DynamicImage) -> Self {
        Self::from(image.to_rgba8())
    }
}

/// Planar RGB float tensor in `[0, 1]`: the R plane, then G, then B
#[derive(Debug, Clone, PartialEq)]
pub struct TensorBuffer {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl TensorBuffer {
    /// # Errors
    /// - `data.len()` differs from `3 * width * height`
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        let expected = width as usize * height as usize * TENSOR_CHANNELS;
        if data.len() != expected {
            return Err(BgRemovalError::preprocess(format!(
                "Tensor holds {} values but {}x{}x{} needs {}",
                data.len(),
                TENSOR_CHANNELS,
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn channels(&self) -> usize {
        TENSOR_CHANNELS
    }

    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// One color plane (0 = R, 1 = G, 2 = B)
    #[must_use]
    pub fn plane(&self, channel: usize) -> Option<&[f32]> {
        let plane_len = self.width as usize * self.height as usize;
        self.data
            .get(channel * plane_len..(channel + 1) * plane_len)
    }

    /// NCHW array of shape `(1, 3, height, width)` for the runtimes
    ///
    /// # Errors
    /// - Internal shape mismatch (never for buffers built through `new`)
    pub fn to_array4(&self) -> Result<Array4<f32>> {
        Array4::from_shape_vec(
            (
                1,
                TENSOR_CHANNELS,
                self.height as usize,
                self.width as usize,
            ),
            self.data.clone(),
        )
        .map_err(|e| BgRemovalError::preprocess(format!("Failed to shape input tensor: {e}")))
    }
}

/// Single-channel alpha matte in `[0, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct MaskBuffer {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl MaskBuffer {
    /// # Errors
    /// - `data.len()` differs from `width * height`
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(BgRemovalError::composite(format!(
                "Mask holds {} values but {}x{} needs {}",
                data.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Mask with every value set to `value`
    #[must_use]
    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; width as usize * height as usize],
        }
    }

    /// Build a mask from a raw runtime output
    ///
    /// Accepts `(1, 1, H, W)`, `(1, H, W)` and `(H, W)` shapes. NaN becomes 0
    /// and values are mapped into `[0, 1]` per `normalization`.
    ///
    /// # Errors
    /// - Any other output shape, or an empty output
    pub fn from_output_tensor(
        output: ArrayViewD<'_, f32>,
        normalization: MaskNormalization,
    ) -> Result<Self> {
        let (height, width) = match output.shape() {
            [1, 1, h, w] | [1, h, w] | [h, w] => (*h, *w),
            other => {
                return Err(BgRemovalError::composite(format!(
                    "Expected a (1, 1, H, W) matte, got {other:?}"
                )))
            },
        };
        if height == 0 || width == 0 {
            return Err(BgRemovalError::composite("Model produced an empty matte"));
        }

        let mut data: Vec<f32> = output.iter().copied().collect();
        crate::inference::normalize_mask(&mut data, normalization);
        Self::new(width as u32, height as u32, data)
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    #[must_use]
    pub fn value(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Fraction of values at or above 0.5
    #[must_use]
    pub fn foreground_ratio(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let foreground = self.data.iter().filter(|&&v| v >= 0.5).count();
        foreground as f32 / self.data.len() as f32
    }
}

/// Image with its alpha channel replaced by the upscaled matte
#[derive(Debug, Clone)]
pub struct ResultImage {
    pub image: ImageBuffer,
    /// Backend that produced the matte
    pub backend_kind: BackendKind,
    /// Descriptor id of the model that produced the matte
    pub model_id: String,
    pub timings: ProcessingTimings,
}

impl ResultImage {
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Raw RGBA bytes of the result
    #[must_use]
    pub fn rgba_bytes(&self) -> &[u8] {
        self.image.pixels()
    }

    #[must_use]
    pub fn into_image(self) -> ImageBuffer {
        self.image
    }
}

/// Per-stage timing breakdown of one `process()` call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Resize, alpha drop and tensor layout
    pub preprocessing_ms: u64,
    /// Model execution
    pub inference_ms: u64,
    /// Mask resampling to the original size
    pub upscale_ms: u64,
    /// Alpha channel write
    pub composite_ms: u64,
    /// Total end-to-end processing time
    pub total_ms: u64,
}

impl ProcessingTimings {
    /// Share of the total spent in the model
    #[must_use]
    pub fn inference_ratio(&self) -> f64 {
        if self.total_ms == 0 {
            0.0
        } else {
            self.inference_ms as f64 / self.total_ms as f64
        }
    }

    /// Time not attributed to any stage
    #[must_use]
    pub fn other_overhead_ms(&self) -> u64 {
        let measured =
            self.preprocessing_ms + self.inference_ms + self.upscale_ms + self.composite_ms;
        self.total_ms.saturating_sub(measured)
    }

    /// One-line summary for logs
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Total: {}ms | Preprocess: {}ms | Inference: {}ms | Upscale: {}ms | Composite: {}ms | Other: {}ms",
            self.total_ms,
            self.preprocessing_ms,
            self.inference_ms,
            self.upscale_ms,
            self.composite_ms,
            self.other_overhead_ms()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_buffer_rejects_inconsistent_length() {
        assert!(ImageBuffer::new(2, 2, vec![0; 16]).is_ok());
        let err = ImageBuffer::new(2, 2, vec![0; 15]).unwrap_err();
        assert!(matches!(err, BgRemovalError::Preprocess(_)));
    }

    #[test]
    fn test_image_buffer_filled_and_pixel_access() {
        let image = ImageBuffer::filled(3, 2, [10, 20, 30, 40]);
        assert_eq!(image.pixels().len(), 3 * 2 * 4);
        assert_eq!(image.pixel(2, 1), Some([10, 20, 30, 40]));
        assert_eq!(image.pixel(3, 0), None);
    }

    #[test]
    fn test_zero_sized_image_fails_validation() {
        let image = ImageBuffer::new(0, 5, Vec::new()).unwrap();
        assert!(image.validate().is_err());
        assert!(ImageBuffer::filled(1, 1, [0; 4]).validate().is_ok());
    }

    #[test]
    fn test_rgba_image_conversion() {
        let rgba = image::RgbaImage::from_pixel(4, 3, image::Rgba([1, 2, 3, 4]));
        let buffer = ImageBuffer::from(rgba);
        assert_eq!(buffer.dimensions(), (4, 3));
        let back = buffer.to_rgba_image().unwrap();
        assert_eq!(back.get_pixel(3, 2).0, [1, 2, 3, 4]);
    }

    #[test]
    fn test_tensor_planes_and_array_shape() {
        let mut data = vec![0.0; 2 * 2 * 3];
        data[4] = 0.5; // first G value
        let tensor = TensorBuffer::new(2, 2, data).unwrap();
        assert_eq!(tensor.plane(1).unwrap()[0], 0.5);
        assert!(tensor.plane(3).is_none());

        let array = tensor.to_array4().unwrap();
        assert_eq!(array.shape(), &[1, 3, 2, 2]);
        assert_eq!(array[[0, 1, 0, 0]], 0.5);
    }

    #[test]
    fn test_tensor_rejects_wrong_length() {
        assert!(TensorBuffer::new(2, 2, vec![0.0; 11]).is_err());
    }

    #[test]
    fn test_mask_buffer() {
        assert!(MaskBuffer::new(2, 2, vec![0.0; 3]).is_err());
        let mask = MaskBuffer::new(2, 2, vec![0.0, 1.0, 0.5, 0.2]).unwrap();
        assert_eq!(mask.value(1, 0), Some(1.0));
        assert_eq!(mask.value(0, 1), Some(0.5));
        assert!((mask.foreground_ratio() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_mask_from_output_shapes() {
        let four = ndarray::Array4::<f32>::from_elem((1, 1, 2, 3), 0.5).into_dyn();
        let mask = MaskBuffer::from_output_tensor(four.view(), MaskNormalization::Clamp).unwrap();
        assert_eq!(mask.dimensions(), (3, 2));

        let three = ndarray::Array3::<f32>::from_elem((1, 4, 2), 2.0).into_dyn();
        let mask = MaskBuffer::from_output_tensor(three.view(), MaskNormalization::Clamp).unwrap();
        assert_eq!(mask.dimensions(), (2, 4));
        assert!(mask.data().iter().all(|&v| v == 1.0));

        let two = ndarray::Array2::<f32>::from_elem((3, 3), f32::NAN).into_dyn();
        let mask = MaskBuffer::from_output_tensor(two.view(), MaskNormalization::MinMax).unwrap();
        assert!(mask.data().iter().all(|&v| v == 0.0));

        let multi = ndarray::Array4::<f32>::zeros((1, 2, 2, 2)).into_dyn();
        assert!(MaskBuffer::from_output_tensor(multi.view(), MaskNormalization::Clamp).is_err());
    }

    #[test]
    fn test_timings_summary() {
        let timings = ProcessingTimings {
            preprocessing_ms: 10,
            inference_ms: 50,
            upscale_ms: 20,
            composite_ms: 5,
            total_ms: 100,
        };
        assert_eq!(timings.other_overhead_ms(), 15);
        assert!((timings.inference_ratio() - 0.5).abs() < f64::EPSILON);
        assert!(timings.summary().contains("Inference: 50ms"));
        assert_eq!(ProcessingTimings::default().inference_ratio(), 0.0);
    }
}
