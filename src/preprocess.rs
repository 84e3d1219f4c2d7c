//! Image → model input tensor
//!
//! Resamples the RGBA input to the descriptor's input size (bilinear), drops
//! alpha, scales channels from `[0, 255]` to `[0, 1]` and lays them out as
//! planar R, G, B.

use crate::{
    error::Result,
    models::ModelDescriptor,
    resample::{ImageOpsResampler, Resampler},
    types::{ImageBuffer, TensorBuffer, TENSOR_CHANNELS},
};
use std::sync::Arc;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Converts decoded images into model input tensors
#[derive(Clone)]
pub struct Preprocessor {
    resampler: Arc<dyn Resampler>,
}

impl std::fmt::Debug for Preprocessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preprocessor").finish_non_exhaustive()
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(Arc::new(ImageOpsResampler::default()))
    }
}

impl Preprocessor {
    #[must_use]
    pub fn new(resampler: Arc<dyn Resampler>) -> Self {
        Self { resampler }
    }

    /// Produce a tensor of exactly `descriptor.expected_input_size`
    ///
    /// # Errors
    /// - Zero width or height
    /// - Pixel buffer length inconsistent with the dimensions
    pub fn run(&self, image: &ImageBuffer, descriptor: &ModelDescriptor) -> Result<TensorBuffer> {
        image.validate()?;
        let (width, height) = descriptor.expected_input_size;

        let resized;
        let source = if image.dimensions() == (width, height) {
            image
        } else {
            resized = self.resampler.resize_rgba(image, width, height)?;
            &resized
        };

        TensorBuffer::new(width, height, planar_rgb(source.pixels(), source.pixel_count()))
    }
}

/// Split interleaved RGBA bytes into three `[0, 1]` planes
fn planar_rgb(pixels: &[u8], pixel_count: usize) -> Vec<f32> {
    let mut data = vec![0.0_f32; pixel_count * TENSOR_CHANNELS];
    let (red, rest) = data.split_at_mut(pixel_count);
    let (green, blue) = rest.split_at_mut(pixel_count);

    #[cfg(feature = "rayon")]
    {
        red.par_iter_mut()
            .zip(green.par_iter_mut())
            .zip(blue.par_iter_mut())
            .zip(pixels.par_chunks_exact(4))
            .for_each(|(((r, g), b), rgba)| {
                *r = f32::from(rgba[0]) / 255.0;
                *g = f32::from(rgba[1]) / 255.0;
                *b = f32::from(rgba[2]) / 255.0;
            });
    }

    #[cfg(not(feature = "rayon"))]
    for (((r, g), b), rgba) in red
        .iter_mut()
        .zip(green.iter_mut())
        .zip(blue.iter_mut())
        .zip(pixels.chunks_exact(4))
    {
        *r = f32::from(rgba[0]) / 255.0;
        *g = f32::from(rgba[1]) / 255.0;
        *b = f32::from(rgba[2]) / 255.0;
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackendKind;

    fn descriptor(size: (u32, u32)) -> ModelDescriptor {
        ModelDescriptor::new("test/model", size, BackendKind::PortableCompute)
    }

    #[test]
    fn test_output_is_always_expected_size() {
        let preprocessor = Preprocessor::default();
        let target = descriptor((32, 24));
        for (w, h) in [(10, 10), (400, 300), (1, 1)] {
            let image = ImageBuffer::filled(w, h, [50, 100, 150, 255]);
            let tensor = preprocessor.run(&image, &target).unwrap();
            assert_eq!(tensor.dimensions(), (32, 24));
            assert_eq!(tensor.data().len(), 32 * 24 * 3);
        }
    }

    #[test]
    fn test_planar_layout_and_scaling() {
        // 2x1 image already at target size: no resample
        let image = ImageBuffer::new(2, 1, vec![255, 0, 51, 7, 0, 255, 102, 200]).unwrap();
        let tensor = Preprocessor::default()
            .run(&image, &descriptor((2, 1)))
            .unwrap();

        assert_eq!(tensor.plane(0).unwrap(), &[1.0, 0.0]);
        assert_eq!(tensor.plane(1).unwrap(), &[0.0, 1.0]);
        assert_eq!(tensor.plane(2).unwrap(), &[0.2, 0.4]);
    }

    #[test]
    fn test_alpha_is_ignored() {
        let opaque = ImageBuffer::filled(4, 4, [10, 20, 30, 255]);
        let clear = ImageBuffer::filled(4, 4, [10, 20, 30, 0]);
        let target = descriptor((4, 4));
        let preprocessor = Preprocessor::default();
        assert_eq!(
            preprocessor.run(&opaque, &target).unwrap(),
            preprocessor.run(&clear, &target).unwrap()
        );
    }

    #[test]
    fn test_zero_sized_input_rejected() {
        let image = ImageBuffer::new(0, 0, Vec::new()).unwrap();
        let result = Preprocessor::default().run(&image, &descriptor((8, 8)));
        assert!(matches!(
            result,
            Err(crate::error::BgRemovalError::Preprocess(_))
        ));
    }
}
