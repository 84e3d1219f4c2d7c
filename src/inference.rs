//! Inference backend abstraction and the session wrapper around a loaded model

use crate::{
    error::{BgRemovalError, Result},
    models::{BackendKind, MaskNormalization, ModelDescriptor},
    types::{MaskBuffer, TensorBuffer},
};
use async_trait::async_trait;
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Range below which a min-max rescale would amplify noise
const MIN_MAX_EPSILON: f32 = 1e-6;

/// Trait for loaded inference backends
///
/// Implementations must be shareable across concurrent `process()` calls.
/// Runtimes that cannot run concurrently serialize internally.
pub trait InferenceBackend: Send + Sync {
    /// Execution path this backend runs on
    fn kind(&self) -> BackendKind;

    /// Run inference on an NCHW input tensor, returning the raw NCHW output
    ///
    /// # Errors
    /// - Model execution failures (`BgRemovalError::Inference`)
    /// - Output tensor conversion errors
    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>>;
}

/// Runtime switches applied before a load attempt
///
/// These belong to backend selection: the portable path always runs through
/// the compute proxy, the GPU path never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeFlags {
    /// Whether the model store may search the local model directory
    pub allow_local_models: bool,
    /// Run inference on a worker thread instead of the caller's task
    pub proxy_compute: bool,
}

impl RuntimeFlags {
    #[must_use]
    pub fn for_backend(kind: BackendKind, allow_local_models: bool) -> Self {
        Self {
            allow_local_models,
            proxy_compute: matches!(kind, BackendKind::PortableCompute),
        }
    }
}

/// Factory trait for loading inference backends
#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// Load `descriptor` into a ready-to-run backend
    ///
    /// # Errors
    /// - Model retrieval failures (missing file, download error)
    /// - Runtime initialization failures
    /// - Backend kind not compiled into this build
    async fn load(
        &self,
        descriptor: &ModelDescriptor,
        flags: RuntimeFlags,
    ) -> Result<Arc<dyn InferenceBackend>>;
}

/// A loaded model together with the descriptor that configures its pre- and
/// post-processing
#[derive(Clone)]
pub struct InferenceSession {
    descriptor: ModelDescriptor,
    backend: Arc<dyn InferenceBackend>,
}

impl std::fmt::Debug for InferenceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceSession")
            .field("descriptor", &self.descriptor.id)
            .field("backend", &self.backend.kind())
            .finish()
    }
}

impl InferenceSession {
    #[must_use]
    pub fn new(descriptor: ModelDescriptor, backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            descriptor,
            backend,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Feed a tensor to the model and return the matte at native resolution
    ///
    /// # Errors
    /// - Tensor size differs from the descriptor's expected input size
    /// - Backend execution fault (`BgRemovalError::Inference`)
    /// - Output tensor is not a single-channel matte
    pub fn run(&self, tensor: &TensorBuffer) -> Result<MaskBuffer> {
        if tensor.dimensions() != self.descriptor.expected_input_size {
            return Err(BgRemovalError::preprocess(format!(
                "Tensor is {}x{} but model '{}' expects {}x{}",
                tensor.width(),
                tensor.height(),
                self.descriptor.id,
                self.descriptor.expected_input_size.0,
                self.descriptor.expected_input_size.1
            )));
        }

        let input = tensor.to_array4()?;
        let output = self
            .backend
            .infer(&input)
            .map_err(|e| self.as_inference_error(e))?;
        self.mask_from_output(&output)
    }

    fn as_inference_error(&self, error: BgRemovalError) -> BgRemovalError {
        match error {
            inference @ BgRemovalError::Inference { .. } => inference,
            other => BgRemovalError::inference(self.backend_kind(), other.to_string()),
        }
    }

    fn mask_from_output(&self, output: &Array4<f32>) -> Result<MaskBuffer> {
        let mask =
            MaskBuffer::from_output_tensor(output.view().into_dyn(), self.descriptor.mask_normalization)
                .map_err(|e| BgRemovalError::inference(self.backend_kind(), e.to_string()))?;

        if let Some(declared) = self.descriptor.native_output_size {
            if declared != mask.dimensions() {
                return Err(BgRemovalError::inference(
                    self.backend_kind(),
                    format!(
                        "Model '{}' declares a {}x{} matte but produced {}x{}",
                        self.descriptor.id,
                        declared.0,
                        declared.1,
                        mask.width(),
                        mask.height()
                    ),
                ));
            }
        }
        Ok(mask)
    }
}

/// Map raw model output into `[0, 1]`, NaN becomes 0
pub fn normalize_mask(values: &mut [f32], normalization: MaskNormalization) {
    for value in values.iter_mut() {
        if value.is_nan() {
            *value = 0.0;
        }
    }

    if normalization == MaskNormalization::MinMax {
        let (min, max) = values
            .iter()
            .filter(|v| v.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = max - min;
        if range.is_finite() && range > MIN_MAX_EPSILON {
            for value in values.iter_mut() {
                *value = (*value - min) / range;
            }
        }
    }

    for value in values.iter_mut() {
        *value = value.clamp(0.0, 1.0);
    }
}
