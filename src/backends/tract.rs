//! Tract backend for the portable compute path
//!
//! Pure Rust inference with no native runtime to negotiate, so it loads on
//! every target the crate builds for. A runnable Tract plan is immutable and
//! can be shared between concurrent calls without locking.

use crate::error::{BgRemovalError, Result};
use crate::inference::InferenceBackend;
use crate::models::BackendKind;
use ndarray::Array4;
use tract_onnx::prelude::*;

// Use instant crate for cross-platform time compatibility
use instant::Instant;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

const KIND: BackendKind = BackendKind::PortableCompute;

/// Optimized Tract plan for one matting model
#[derive(Debug)]
pub struct TractBackend {
    model: TractModel,
}

impl TractBackend {
    /// Parse and optimize an in-memory ONNX graph for a fixed NCHW input shape
    ///
    /// # Errors
    /// - Graph parsing, shape inference or optimization fails
    pub fn from_memory(model_data: &[u8], input_shape: (usize, usize, usize, usize)) -> Result<Self> {
        let model_load_start = Instant::now();
        log::info!("📦 Backend: Tract (Pure Rust)");

        #[allow(clippy::cast_precision_loss)] // Precision loss acceptable for logging display
        let size_mb = model_data.len() as f64 / (1024.0 * 1024.0);
        log::info!("📏 Model size: {size_mb:.2} MB");

        let (n, c, h, w) = input_shape;
        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| BgRemovalError::model(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(0, f32::fact([n, c, h, w]).into())
            .map_err(|e| BgRemovalError::model(format!("Failed to pin input shape: {e}")))?
            .into_optimized()
            .map_err(|e| BgRemovalError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| BgRemovalError::model(format!("Failed to create runnable model: {e}")))?;

        log::info!(
            "✅ Tract backend initialized in {:.2}ms",
            model_load_start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(Self { model })
    }
}

impl InferenceBackend for TractBackend {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        log::debug!("🔮 Running Tract inference");
        log::debug!("  - Input tensor: {:?}", input.shape());

        let inference_start = Instant::now();
        let input_tensor = Tensor::from(input.clone());

        let outputs = self
            .model
            .run(tvec![input_tensor.into()])
            .map_err(|e| BgRemovalError::inference(KIND, format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| BgRemovalError::inference(KIND, "No output tensor found"))?
            .into_arc_tensor();

        let output_data = output_tensor.to_array_view::<f32>().map_err(|e| {
            BgRemovalError::inference(KIND, format!("Failed to convert output tensor: {e}"))
        })?;

        let shape = output_data.shape().to_vec();
        let dims = match shape.as_slice() {
            [n, c, h, w] => (*n, *c, *h, *w),
            [n, h, w] => (*n, 1, *h, *w),
            other => {
                return Err(BgRemovalError::inference(
                    KIND,
                    format!("Expected 3D or 4D output tensor, got {}D", other.len()),
                ))
            },
        };
        let output_array =
            Array4::from_shape_vec(dims, output_data.iter().copied().collect()).map_err(|e| {
                BgRemovalError::inference(KIND, format!("Failed to reshape output tensor: {e}"))
            })?;

        log::debug!(
            "✅ Tract inference completed in {:.2}ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );
        log::debug!("  - Output tensor: {:?}", output_array.shape());

        Ok(output_array)
    }
}
