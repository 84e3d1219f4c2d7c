//! Model descriptors for the two inference paths
//!
//! Exactly two descriptors ship with the pipeline: a compact matting model
//! tuned for the high-performance GPU path and a larger, more robust
//! segmentation model for the portable compute path. Both are fixed at build
//! time; tests construct their own descriptors through [`ModelDescriptor::new`].

use serde::{Deserialize, Serialize};

/// Base URL for model repositories
pub const HUGGINGFACE_BASE_URL: &str = "https://huggingface.co";

/// Default location of the ONNX graph inside a model repository
pub const DEFAULT_MODEL_FILE: &str = "onnx/model.onnx";

/// Inference execution path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Hardware-accelerated execution (CUDA / `CoreML` through ONNX Runtime)
    HighPerfGpu,
    /// Portable CPU execution (pure Rust, WASM compatible)
    PortableCompute,
}

impl BackendKind {
    /// The fixed descriptor loaded for this backend
    #[must_use]
    pub fn default_descriptor(self) -> ModelDescriptor {
        match self {
            Self::HighPerfGpu => ModelDescriptor::gpu_compact(),
            Self::PortableCompute => ModelDescriptor::portable(),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HighPerfGpu => write!(f, "high-perf-gpu"),
            Self::PortableCompute => write!(f, "portable-compute"),
        }
    }
}

/// How raw model output is mapped into `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaskNormalization {
    /// Output already is a probability; clamp stray values
    Clamp,
    /// Rescale by the output's min and max (for logit-like outputs)
    MinMax,
}

/// Static description of a loadable matting model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Repository identifier, e.g. `briaai/RMBG-1.4`
    pub id: String,
    /// Input resolution `(width, height)` the model expects
    pub expected_input_size: (u32, u32),
    /// Backend this model is built for
    pub backend_kind: BackendKind,
    /// Path of the ONNX graph inside the repository
    pub model_file: String,
    /// Declared native mask resolution, `None` if taken from the runtime output
    pub native_output_size: Option<(u32, u32)>,
    /// Fixed canvas the mask passes through before the final resize
    pub mask_intermediate_size: Option<(u32, u32)>,
    pub mask_normalization: MaskNormalization,
    /// Expected SHA-256 of the model file (lowercase hex)
    pub sha256: Option<String>,
}

impl ModelDescriptor {
    /// Create a descriptor with default file layout and clamp normalization
    #[must_use]
    pub fn new<S: Into<String>>(
        id: S,
        expected_input_size: (u32, u32),
        backend_kind: BackendKind,
    ) -> Self {
        Self {
            id: id.into(),
            expected_input_size,
            backend_kind,
            model_file: DEFAULT_MODEL_FILE.to_string(),
            native_output_size: None,
            mask_intermediate_size: None,
            mask_normalization: MaskNormalization::Clamp,
            sha256: None,
        }
    }

    /// Compact portrait matting model used on the GPU path
    #[must_use]
    pub fn gpu_compact() -> Self {
        Self::new("Xenova/modnet", (512, 512), BackendKind::HighPerfGpu)
    }

    /// Larger segmentation model used on the portable path
    #[must_use]
    pub fn portable() -> Self {
        Self {
            mask_normalization: MaskNormalization::MinMax,
            ..Self::new("briaai/RMBG-1.4", (1024, 1024), BackendKind::PortableCompute)
        }
    }

    #[must_use]
    pub fn with_native_output_size(mut self, size: (u32, u32)) -> Self {
        self.native_output_size = Some(size);
        self
    }

    #[must_use]
    pub fn with_mask_intermediate_size(mut self, size: (u32, u32)) -> Self {
        self.mask_intermediate_size = Some(size);
        self
    }

    #[must_use]
    pub fn with_mask_normalization(mut self, normalization: MaskNormalization) -> Self {
        self.mask_normalization = normalization;
        self
    }

    #[must_use]
    pub fn with_model_file<S: Into<String>>(mut self, model_file: S) -> Self {
        self.model_file = model_file.into();
        self
    }

    #[must_use]
    pub fn with_sha256<S: Into<String>>(mut self, digest: S) -> Self {
        self.sha256 = Some(digest.into().to_lowercase());
        self
    }

    /// Download URL of the model file
    #[must_use]
    pub fn download_url(&self) -> String {
        format!(
            "{}/{}/resolve/main/{}",
            HUGGINGFACE_BASE_URL, self.id, self.model_file
        )
    }

    /// Filesystem-safe identifier, `briaai/RMBG-1.4` becomes `briaai--RMBG-1.4`
    #[must_use]
    pub fn cache_id(&self) -> String {
        self.id.replace('/', "--")
    }

    /// NCHW input shape for the runtimes
    #[must_use]
    pub fn input_shape(&self) -> (usize, usize, usize, usize) {
        let (width, height) = self.expected_input_size;
        (1, 3, height as usize, width as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_descriptors() {
        let gpu = ModelDescriptor::gpu_compact();
        assert_eq!(gpu.backend_kind, BackendKind::HighPerfGpu);
        assert_eq!(gpu.expected_input_size, (512, 512));
        assert_eq!(gpu.mask_normalization, MaskNormalization::Clamp);

        let portable = ModelDescriptor::portable();
        assert_eq!(portable.backend_kind, BackendKind::PortableCompute);
        assert_eq!(portable.expected_input_size, (1024, 1024));
        assert_eq!(portable.mask_normalization, MaskNormalization::MinMax);
        assert!(portable.mask_intermediate_size.is_none());
    }

    #[test]
    fn test_default_descriptor_matches_backend() {
        for kind in [BackendKind::HighPerfGpu, BackendKind::PortableCompute] {
            assert_eq!(kind.default_descriptor().backend_kind, kind);
        }
    }

    #[test]
    fn test_download_url_and_cache_id() {
        let descriptor = ModelDescriptor::portable();
        assert_eq!(
            descriptor.download_url(),
            "https://huggingface.co/briaai/RMBG-1.4/resolve/main/onnx/model.onnx"
        );
        assert_eq!(descriptor.cache_id(), "briaai--RMBG-1.4");
    }

    #[test]
    fn test_input_shape_is_nchw() {
        let descriptor = ModelDescriptor::new("test/wide", (640, 480), BackendKind::HighPerfGpu);
        assert_eq!(descriptor.input_shape(), (1, 3, 480, 640));
    }

    #[test]
    fn test_backend_kind_serde_names() {
        let json = serde_json::to_string(&BackendKind::PortableCompute).unwrap();
        assert_eq!(json, "\"portable-compute\"");
        let parsed: BackendKind = serde_json::from_str("\"high-perf-gpu\"").unwrap();
        assert_eq!(parsed, BackendKind::HighPerfGpu);
    }

    #[test]
    fn test_sha256_is_lowercased() {
        let descriptor = ModelDescriptor::gpu_compact().with_sha256("ABCDEF");
        assert_eq!(descriptor.sha256.as_deref(), Some("abcdef"));
    }
}
