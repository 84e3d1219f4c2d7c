//! Writes an upscaled matte into an image's alpha channel

use crate::{
    config::AlphaPolicy,
    error::{BgRemovalError, Result},
    types::{ImageBuffer, MaskBuffer},
};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Replaces alpha with `policy(mask)`; R, G and B bytes are never touched
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AlphaCompositor {
    policy: AlphaPolicy,
}

impl AlphaCompositor {
    #[must_use]
    pub fn new(policy: AlphaPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> AlphaPolicy {
        self.policy
    }

    /// Copy `image` with its alpha overwritten by `mask`
    ///
    /// # Errors
    /// - Mask and image dimensions differ (`BgRemovalError::Composite`)
    pub fn composite(&self, image: &ImageBuffer, mask: &MaskBuffer) -> Result<ImageBuffer> {
        self.composite_into(image.clone(), mask)
    }

    /// In-place variant of [`composite`](Self::composite) taking ownership of the image
    ///
    /// # Errors
    /// - Mask and image dimensions differ (`BgRemovalError::Composite`)
    pub fn composite_into(&self, image: ImageBuffer, mask: &MaskBuffer) -> Result<ImageBuffer> {
        if image.dimensions() != mask.dimensions() {
            return Err(BgRemovalError::composite(format!(
                "Mask is {}x{} but image is {}x{}",
                mask.width(),
                mask.height(),
                image.width(),
                image.height()
            )));
        }

        let (width, height) = image.dimensions();
        let mut pixels = image.into_pixels();
        let policy = self.policy;

        #[cfg(feature = "rayon")]
        pixels
            .par_chunks_exact_mut(4)
            .zip(mask.data().par_iter())
            .for_each(|(rgba, &m)| rgba[3] = policy.alpha(m));

        #[cfg(not(feature = "rayon"))]
        for (rgba, &m) in pixels.chunks_exact_mut(4).zip(mask.data()) {
            rgba[3] = policy.alpha(m);
        }

        ImageBuffer::new(width, height, pixels)
    }
}
