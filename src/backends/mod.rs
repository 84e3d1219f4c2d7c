//! Backend implementations for different inference engines
//!
//! - ONNX Runtime backend (high-performance GPU path: CUDA, `CoreML`)
//! - Tract backend (portable compute path, pure Rust)
//! - Scripted mock backends for tests and offline runs

pub mod mock;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;

pub use self::mock::{FailingBackend, MockBackendFactory, MockLoad, ScriptedBackend};

use crate::{
    error::{BgRemovalError, Result},
    inference::{BackendFactory, InferenceBackend, RuntimeFlags},
    models::{BackendKind, ModelDescriptor},
    store::ModelStore,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Factory that fetches model bytes from a [`ModelStore`] and builds the
/// runtime matching the descriptor's backend kind
#[derive(Debug, Clone)]
pub struct RuntimeBackendFactory {
    store: ModelStore,
    intra_threads: usize,
    inter_threads: usize,
}

impl RuntimeBackendFactory {
    #[must_use]
    pub fn new(store: ModelStore) -> Self {
        Self {
            store,
            intra_threads: 0,
            inter_threads: 0,
        }
    }

    /// ONNX Runtime thread counts (0 = auto)
    #[must_use]
    pub fn with_threads(mut self, intra_threads: usize, inter_threads: usize) -> Self {
        self.intra_threads = intra_threads;
        self.inter_threads = inter_threads;
        self
    }

    #[must_use]
    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    /// Backend kinds compiled into this build
    #[must_use]
    pub fn available_backends() -> Vec<BackendKind> {
        let mut kinds = Vec::new();
        if cfg!(feature = "onnx") {
            kinds.push(BackendKind::HighPerfGpu);
        }
        if cfg!(feature = "tract") {
            kinds.push(BackendKind::PortableCompute);
        }
        kinds
    }

    #[cfg_attr(
        not(all(feature = "onnx", feature = "tract")),
        allow(unused_variables)
    )]
    fn build(
        kind: BackendKind,
        model_data: &[u8],
        descriptor: &ModelDescriptor,
        intra_threads: usize,
        inter_threads: usize,
    ) -> Result<Arc<dyn InferenceBackend>> {
        match kind {
            #[cfg(feature = "onnx")]
            BackendKind::HighPerfGpu => {
                Ok(Arc::new(OnnxBackend::from_memory(
                    model_data,
                    intra_threads,
                    inter_threads,
                )?))
            },
            #[cfg(feature = "tract")]
            BackendKind::PortableCompute => {
                Ok(Arc::new(TractBackend::from_memory(
                    model_data,
                    descriptor.input_shape(),
                )?))
            },
            #[allow(unreachable_patterns)]
            other => {
                Err(BgRemovalError::model(format!(
                    "The {other} backend is not compiled into this build"
                )))
            },
        }
    }
}

#[async_trait]
impl BackendFactory for RuntimeBackendFactory {
    async fn load(
        &self,
        descriptor: &ModelDescriptor,
        flags: RuntimeFlags,
    ) -> Result<Arc<dyn InferenceBackend>> {
        let kind = descriptor.backend_kind;
        if !Self::available_backends().contains(&kind) {
            return Err(BgRemovalError::model(format!(
                "The {kind} backend is not compiled into this build"
            )));
        }

        let model_data = self.store.fetch(descriptor, flags).await?;

        // Graph parsing and session setup are CPU bound
        let descriptor = descriptor.clone();
        let (intra, inter) = (self.intra_threads, self.inter_threads);
        tokio::task::spawn_blocking(move || {
            Self::build(kind, &model_data, &descriptor, intra, inter)
        })
        .await
        .map_err(|e| BgRemovalError::model(format!("Backend load task failed: {e}")))?
    }
}
