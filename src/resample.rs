//! Image and mask resampling
//!
//! Pipeline stages resize through the [`Resampler`] trait so tests can
//! substitute a deterministic implementation.

use crate::{
    error::{BgRemovalError, Result},
    types::{ImageBuffer, MaskBuffer},
};
use image::imageops::{self, FilterType};
use image::{ImageBuffer as PixelGrid, Luma};
use tokio_util::sync::CancellationToken;

/// Rows resampled between cancellation checks
const CANCEL_CHECK_ROWS: usize = 64;

/// Resizes RGBA images and single-channel masks
pub trait Resampler: Send + Sync {
    /// Resize an RGBA image to exactly `width` x `height`
    ///
    /// # Errors
    /// - Inconsistent source buffer or zero target size
    fn resize_rgba(&self, image: &ImageBuffer, width: u32, height: u32) -> Result<ImageBuffer>;

    /// Resize a mask to exactly `width` x `height`, values kept in `[0, 1]`
    ///
    /// # Errors
    /// - Inconsistent source buffer or zero target size
    fn resize_mask(&self, mask: &MaskBuffer, width: u32, height: u32) -> Result<MaskBuffer>;

    /// [`resize_mask`](Self::resize_mask) that gives up once `token` is cancelled
    ///
    /// Implementations that can interrupt a resize part way through should
    /// override this; the default only checks before starting.
    ///
    /// # Errors
    /// - Same as [`resize_mask`](Self::resize_mask)
    /// - `token` cancelled (`BgRemovalError::Cancelled`)
    fn resize_mask_cancellable(
        &self,
        mask: &MaskBuffer,
        width: u32,
        height: u32,
        token: &CancellationToken,
    ) -> Result<MaskBuffer> {
        if token.is_cancelled() {
            return Err(BgRemovalError::Cancelled);
        }
        self.resize_mask(mask, width, height)
    }
}

/// [`Resampler`] backed by `image::imageops::resize`
#[derive(Debug, Clone, Copy)]
pub struct ImageOpsResampler {
    filter: FilterType,
}

impl Default for ImageOpsResampler {
    /// Bilinear (triangle) filtering
    fn default() -> Self {
        Self {
            filter: FilterType::Triangle,
        }
    }
}

impl ImageOpsResampler {
    #[must_use]
    pub fn with_filter(filter: FilterType) -> Self {
        Self { filter }
    }
}

fn check_target(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(BgRemovalError::preprocess(format!(
            "Resize target must be non-zero, got {width}x{height}"
        )));
    }
    Ok(())
}

impl Resampler for ImageOpsResampler {
    fn resize_rgba(&self, image: &ImageBuffer, width: u32, height: u32) -> Result<ImageBuffer> {
        check_target(width, height)?;
        image.validate()?;
        if image.dimensions() == (width, height) {
            return Ok(image.clone());
        }

        let source = image
            .to_rgba_image()
            .ok_or_else(|| BgRemovalError::preprocess("RGBA buffer does not match its dimensions"))?;
        let resized = imageops::resize(&source, width, height, self.filter);
        Ok(ImageBuffer::from(resized))
    }

    fn resize_mask(&self, mask: &MaskBuffer, width: u32, height: u32) -> Result<MaskBuffer> {
        self.resize_mask_cancellable(mask, width, height, &CancellationToken::new())
    }

    /// Triangle masks are resampled row by row so a cancelled token stops
    /// the work within [`CANCEL_CHECK_ROWS`] rows
    fn resize_mask_cancellable(
        &self,
        mask: &MaskBuffer,
        width: u32,
        height: u32,
        token: &CancellationToken,
    ) -> Result<MaskBuffer> {
        check_target(width, height)?;
        if token.is_cancelled() {
            return Err(BgRemovalError::Cancelled);
        }
        if mask.dimensions() == (width, height) {
            return Ok(mask.clone());
        }
        if mask.width() == 0 || mask.height() == 0 {
            return Err(BgRemovalError::composite("Cannot resize an empty mask"));
        }

        let resized = if self.filter == FilterType::Triangle {
            triangle_resize(mask, width, height, token)?
        } else {
            let source: PixelGrid<Luma<f32>, Vec<f32>> =
                PixelGrid::from_raw(mask.width(), mask.height(), mask.data().to_vec()).ok_or_else(
                    || BgRemovalError::composite("Mask buffer does not match its dimensions"),
                )?;
            imageops::resize(&source, width, height, self.filter).into_raw()
        };

        // Filters with negative lobes can overshoot
        let data = resized
            .into_iter()
            .map(|v| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) })
            .collect();
        MaskBuffer::new(width, height, data)
    }
}

/// Normalized triangle-filter taps for each destination index on one axis
///
/// Same sample placement as `imageops::resize`: pixel centres at `i + 0.5`,
/// support widened by the scale factor when shrinking.
fn triangle_taps(src: u32, dst: u32) -> Vec<(usize, Vec<f32>)> {
    let ratio = src as f32 / dst as f32;
    let scale = ratio.max(1.0);
    let src = src as usize;

    (0..dst)
        .map(|out| {
            let center = (out as f32 + 0.5) * ratio;
            let left = ((center - scale).floor().max(0.0) as usize).min(src - 1);
            let right = ((center + scale).ceil().max(0.0) as usize).clamp(left + 1, src);
            let center = center - 0.5;

            let mut weights: Vec<f32> = (left..right)
                .map(|i| (1.0 - ((i as f32 - center) / scale).abs()).max(0.0))
                .collect();
            let sum: f32 = weights.iter().sum();
            if sum > 0.0 {
                weights.iter_mut().for_each(|w| *w /= sum);
            }
            (left, weights)
        })
        .collect()
}

/// Separable triangle resize of a mask, horizontal pass then vertical pass
fn triangle_resize(
    mask: &MaskBuffer,
    width: u32,
    height: u32,
    token: &CancellationToken,
) -> Result<Vec<f32>> {
    let (src_width, src_height) = (mask.width() as usize, mask.height() as usize);
    let dst_width = width as usize;
    let columns = triangle_taps(mask.width(), width);
    let rows = triangle_taps(mask.height(), height);

    let mut horizontal = vec![0.0f32; dst_width * src_height];
    for (y, (src_row, out_row)) in mask
        .data()
        .chunks_exact(src_width)
        .zip(horizontal.chunks_exact_mut(dst_width))
        .enumerate()
    {
        if y % CANCEL_CHECK_ROWS == 0 && token.is_cancelled() {
            return Err(BgRemovalError::Cancelled);
        }
        for (out, (left, weights)) in out_row.iter_mut().zip(&columns) {
            *out = src_row[*left..]
                .iter()
                .zip(weights)
                .map(|(v, w)| v * w)
                .sum();
        }
    }

    let mut resized = vec![0.0f32; dst_width * height as usize];
    for (y, (out_row, (top, weights))) in resized.chunks_exact_mut(dst_width).zip(&rows).enumerate() {
        if y % CANCEL_CHECK_ROWS == 0 && token.is_cancelled() {
            return Err(BgRemovalError::Cancelled);
        }
        for (k, weight) in weights.iter().enumerate() {
            let start = (top + k) * dst_width;
            for (out, v) in out_row.iter_mut().zip(&horizontal[start..start + dst_width]) {
                *out += v * weight;
            }
        }
    }
    Ok(resized)
}
