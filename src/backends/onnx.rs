//! ONNX Runtime backend for the high-performance GPU path
//!
//! The session is built with hardware execution providers in the order CUDA,
//! then `CoreML`. A session is loaded once per backend selection and shared by
//! every `process()` call; ONNX Runtime needs exclusive access to run, so the
//! session sits behind a mutex.

use crate::error::{BgRemovalError, Result};
use crate::inference::InferenceBackend;
use crate::models::BackendKind;
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::{self, value::Value};
use std::sync::Mutex;
use std::time::Instant;

const KIND: BackendKind = BackendKind::HighPerfGpu;

/// ONNX Runtime session bound to one matting model
#[derive(Debug)]
pub struct OnnxBackend {
    session: Mutex<Session>,
}

impl OnnxBackend {
    /// Whether any hardware execution provider can be registered in this process
    #[must_use]
    pub fn has_accelerator() -> bool {
        let cuda =
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml = OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
            .unwrap_or(false);
        log::debug!("🔍 Execution providers: CUDA={cuda}, CoreML={coreml}");
        cuda || coreml
    }

    /// List hardware execution providers with availability status
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool)> {
        vec![
            (
                "CUDA".to_string(),
                OrtExecutionProvider::is_available(&CUDAExecutionProvider::default())
                    .unwrap_or(false),
            ),
            (
                "CoreML".to_string(),
                OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                    .unwrap_or(false),
            ),
        ]
    }

    /// Build a session from an in-memory ONNX graph
    ///
    /// Thread counts of 0 are derived from the available parallelism.
    ///
    /// # Errors
    /// - No hardware execution provider is available
    /// - Session creation or graph parsing fails
    pub fn from_memory(model_data: &[u8], intra_threads: usize, inter_threads: usize) -> Result<Self> {
        let load_start = Instant::now();

        let mut providers = Vec::new();
        let cuda_provider = CUDAExecutionProvider::default();
        if OrtExecutionProvider::is_available(&cuda_provider).unwrap_or(false) {
            log::info!("🚀 CUDA execution provider is available and will be used");
            providers.push(cuda_provider.build());
        }
        let coreml_provider = CoreMLExecutionProvider::default();
        if OrtExecutionProvider::is_available(&coreml_provider).unwrap_or(false) {
            log::info!("🍎 CoreML execution provider is available and will be used");
            providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
        }

        // A CPU-only session is the portable backend's job
        if providers.is_empty() {
            return Err(BgRemovalError::model(
                "No hardware execution provider available for the GPU backend",
            ));
        }

        let available = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(8);
        let intra_threads = if intra_threads > 0 {
            intra_threads
        } else {
            available
        };
        let inter_threads = if inter_threads > 0 {
            inter_threads
        } else {
            (available / 4).max(1)
        };

        let session = Session::builder()
            .map_err(|e| BgRemovalError::model(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| BgRemovalError::model(format!("Failed to set optimization level: {e}")))?
            .with_execution_providers(providers)
            .map_err(|e| {
                BgRemovalError::model(format!("Failed to set execution providers: {e}"))
            })?
            .with_parallel_execution(true)
            .map_err(|e| {
                BgRemovalError::model(format!("Failed to enable parallel execution: {e}"))
            })?
            .with_intra_threads(intra_threads)
            .map_err(|e| BgRemovalError::model(format!("Failed to set intra threads: {e}")))?
            .with_inter_threads(inter_threads)
            .map_err(|e| BgRemovalError::model(format!("Failed to set inter threads: {e}")))?
            .commit_from_memory(model_data)
            .map_err(|e| {
                BgRemovalError::model(format!("Failed to create session from model data: {e}"))
            })?;

        log::debug!("✅ ONNX Runtime session created successfully");
        log::debug!("  - Intra-op threads: {intra_threads}");
        log::debug!("  - Inter-op threads: {inter_threads}");
        log::info!(
            "Model loaded in {:.2}ms",
            load_start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl InferenceBackend for OnnxBackend {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let inference_start = Instant::now();
        log::debug!("🚀 Starting inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone()).map_err(|e| {
            BgRemovalError::inference(KIND, format!("Failed to convert input tensor: {e}"))
        })?;

        // A poisoned lock means a previous run panicked inside the runtime
        let mut session = self.session.lock().map_err(|_| {
            BgRemovalError::inference_unrecoverable(KIND, "ONNX session lock poisoned")
        })?;

        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| BgRemovalError::inference(KIND, format!("ONNX inference failed: {e}")))?;

        let output_tensor = {
            let keys: Vec<_> = outputs.keys().collect();
            let first_key = keys
                .first()
                .ok_or_else(|| BgRemovalError::inference(KIND, "No output tensors found"))?;
            outputs
                .get(first_key)
                .ok_or_else(|| BgRemovalError::inference(KIND, "First output tensor not found"))?
                .try_extract_array::<f32>()
                .map_err(|e| {
                    BgRemovalError::inference(KIND, format!("Failed to extract output tensor: {e}"))
                })?
        };

        let shape = output_tensor.shape().to_vec();
        let data: Vec<f32> = output_tensor.iter().copied().collect();
        let result = reshape_output(&shape, data)?;

        log::debug!(
            "  ⚡ Core inference: {:.2}ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(result)
    }
}

/// Bring `(1, H, W)` or `(1, 1, H, W)` runtime output into NCHW form
fn reshape_output(shape: &[usize], data: Vec<f32>) -> Result<Array4<f32>> {
    let dims = match shape {
        [n, c, h, w] => (*n, *c, *h, *w),
        [n, h, w] => (*n, 1, *h, *w),
        other => {
            return Err(BgRemovalError::inference(
                KIND,
                format!("Expected 3D or 4D output tensor, got {}D", other.len()),
            ))
        },
    };
    Array4::from_shape_vec(dims, data).map_err(|e| {
        BgRemovalError::inference(KIND, format!("Failed to reshape output tensor: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reshape_accepts_three_and_four_dims() {
        let four = reshape_output(&[1, 1, 2, 3], vec![0.0; 6]).unwrap();
        assert_eq!(four.shape(), &[1, 1, 2, 3]);

        let three = reshape_output(&[1, 2, 3], vec![0.0; 6]).unwrap();
        assert_eq!(three.shape(), &[1, 1, 2, 3]);

        assert!(reshape_output(&[6], vec![0.0; 6]).is_err());
        assert!(reshape_output(&[1, 1, 2, 3], vec![0.0; 5]).is_err());
    }

    #[test]
    fn test_invalid_model_bytes_fail_to_load() {
        // Either no accelerator is present or the graph fails to parse
        assert!(OnnxBackend::from_memory(b"not an onnx graph", 1, 1).is_err());
    }

    #[test]
    fn test_list_providers_reports_both() {
        let providers = OnnxBackend::list_providers();
        let names: Vec<_> = providers.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["CUDA", "CoreML"]);
        assert_eq!(
            OnnxBackend::has_accelerator(),
            providers.iter().any(|(_, available)| *available)
        );
    }
}
