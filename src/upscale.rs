//! Native-resolution matte → original image size

use crate::{
    error::{BgRemovalError, Result},
    models::ModelDescriptor,
    resample::{ImageOpsResampler, Resampler},
    types::MaskBuffer,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Resizes model mattes back to the source image's dimensions
///
/// When the descriptor declares a `mask_intermediate_size`, the matte passes
/// through that canvas first (native → intermediate → target). A matte that
/// already has the target size skips every pass and comes back bit for bit.
#[derive(Clone)]
pub struct MaskUpscaler {
    resampler: Arc<dyn Resampler>,
}

impl std::fmt::Debug for MaskUpscaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaskUpscaler").finish_non_exhaustive()
    }
}

impl Default for MaskUpscaler {
    fn default() -> Self {
        Self::new(Arc::new(ImageOpsResampler::default()))
    }
}

impl MaskUpscaler {
    #[must_use]
    pub fn new(resampler: Arc<dyn Resampler>) -> Self {
        Self { resampler }
    }

    /// Resize `mask` to `target`
    ///
    /// # Errors
    /// - Zero target size
    pub fn upscale(
        &self,
        mask: MaskBuffer,
        descriptor: &ModelDescriptor,
        target: (u32, u32),
    ) -> Result<MaskBuffer> {
        self.upscale_with_cancellation(mask, descriptor, target, &CancellationToken::new())
    }

    /// [`upscale`](Self::upscale), checking `token` between passes and while
    /// each pass resamples
    ///
    /// # Errors
    /// - Zero target size
    /// - `token` cancelled before the last row is written (`BgRemovalError::Cancelled`)
    pub fn upscale_with_cancellation(
        &self,
        mask: MaskBuffer,
        descriptor: &ModelDescriptor,
        target: (u32, u32),
        token: &CancellationToken,
    ) -> Result<MaskBuffer> {
        let mut current = mask;
        for (width, height) in Self::passes(current.dimensions(), descriptor, target) {
            if token.is_cancelled() {
                return Err(BgRemovalError::Cancelled);
            }
            current = self
                .resampler
                .resize_mask_cancellable(&current, width, height, token)?;
        }
        Ok(current)
    }

    /// Sizes the matte is resampled to, in order
    #[must_use]
    pub fn passes(
        native: (u32, u32),
        descriptor: &ModelDescriptor,
        target: (u32, u32),
    ) -> Vec<(u32, u32)> {
        let mut passes = Vec::with_capacity(2);
        if native == target {
            return passes;
        }
        let mut current = native;
        if let Some(intermediate) = descriptor.mask_intermediate_size {
            if intermediate != current && intermediate != target {
                passes.push(intermediate);
                current = intermediate;
            }
        }
        if current != target {
            passes.push(target);
        }
        passes
    }
}
