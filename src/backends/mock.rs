//! Scripted backends and factory for tests, benchmarks and offline demos
//!
//! These never touch a model file: masks are produced from a fixed script,
//! and load or inference failures can be injected per backend kind.

use crate::{
    error::{BgRemovalError, Result},
    inference::{BackendFactory, InferenceBackend, RuntimeFlags},
    models::{BackendKind, ModelDescriptor},
};
use async_trait::async_trait;
use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Backend that returns a scripted matte regardless of input
#[derive(Debug)]
pub struct ScriptedBackend {
    kind: BackendKind,
    size: (u32, u32),
    values: Vec<f32>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    /// Every output value equals `value`
    #[must_use]
    pub fn constant(kind: BackendKind, value: f32, size: (u32, u32)) -> Self {
        Self::with_values(kind, size, vec![value; size.0 as usize * size.1 as usize])
    }

    /// Row-major output values of a `size` matte
    #[must_use]
    pub fn with_values(kind: BackendKind, size: (u32, u32), values: Vec<f32>) -> Self {
        Self {
            kind,
            size,
            values,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `infer` calls so far
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl InferenceBackend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if input.dim().1 != 3 {
            return Err(BgRemovalError::inference(
                self.kind,
                format!("Expected 3 input channels, got {}", input.dim().1),
            ));
        }
        let (width, height) = self.size;
        Array4::from_shape_vec((1, 1, height as usize, width as usize), self.values.clone())
            .map_err(|e| BgRemovalError::inference(self.kind, format!("Bad scripted mask: {e}")))
    }
}

/// Backend whose every inference call faults
#[derive(Debug)]
pub struct FailingBackend {
    kind: BackendKind,
    unrecoverable: bool,
}

impl FailingBackend {
    #[must_use]
    pub fn new(kind: BackendKind, unrecoverable: bool) -> Self {
        Self {
            kind,
            unrecoverable,
        }
    }
}

impl InferenceBackend for FailingBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn infer(&self, _input: &Array4<f32>) -> Result<Array4<f32>> {
        if self.unrecoverable {
            Err(BgRemovalError::inference_unrecoverable(
                self.kind,
                "Mock device lost",
            ))
        } else {
            Err(BgRemovalError::inference(self.kind, "Mock execution fault"))
        }
    }
}

/// What a [`MockBackendFactory`] does when asked to load one backend kind
#[derive(Debug, Clone, PartialEq)]
pub enum MockLoad {
    /// Load succeeds; the backend returns a constant matte. `None` size uses
    /// the descriptor's input size.
    Mask { value: f32, size: Option<(u32, u32)> },
    /// Load succeeds; every inference call faults
    FailInference { unrecoverable: bool },
    /// Load fails with this message
    FailLoad(String),
}

impl MockLoad {
    #[must_use]
    pub fn mask(value: f32) -> Self {
        Self::Mask { value, size: None }
    }

    #[must_use]
    pub fn fail<S: Into<String>>(message: S) -> Self {
        Self::FailLoad(message.into())
    }
}

/// Factory with scripted per-backend outcomes and a load journal
#[derive(Debug)]
pub struct MockBackendFactory {
    gpu: MockLoad,
    portable: MockLoad,
    load_delay: Option<Duration>,
    loads: AtomicUsize,
    journal: Mutex<Vec<(BackendKind, RuntimeFlags)>>,
}

impl MockBackendFactory {
    /// Both backends load and return a constant `value` matte
    #[must_use]
    pub fn succeeding(value: f32) -> Self {
        Self {
            gpu: MockLoad::mask(value),
            portable: MockLoad::mask(value),
            load_delay: None,
            loads: AtomicUsize::new(0),
            journal: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_gpu(mut self, outcome: MockLoad) -> Self {
        self.gpu = outcome;
        self
    }

    #[must_use]
    pub fn with_portable(mut self, outcome: MockLoad) -> Self {
        self.portable = outcome;
        self
    }

    /// Sleep this long inside every load attempt
    #[must_use]
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    /// Number of load attempts so far
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Backend kind and flags of every load attempt, in order
    #[must_use]
    pub fn attempts(&self) -> Vec<(BackendKind, RuntimeFlags)> {
        self.journal
            .lock()
            .map(|journal| journal.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BackendFactory for MockBackendFactory {
    async fn load(
        &self,
        descriptor: &ModelDescriptor,
        flags: RuntimeFlags,
    ) -> Result<Arc<dyn InferenceBackend>> {
        let kind = descriptor.backend_kind;
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut journal) = self.journal.lock() {
            journal.push((kind, flags));
        }

        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = match kind {
            BackendKind::HighPerfGpu => &self.gpu,
            BackendKind::PortableCompute => &self.portable,
        };

        match outcome {
            MockLoad::Mask { value, size } => {
                let size = size.unwrap_or(descriptor.expected_input_size);
                Ok(Arc::new(ScriptedBackend::constant(kind, *value, size)))
            },
            MockLoad::FailInference { unrecoverable } => {
                Ok(Arc::new(FailingBackend::new(kind, *unrecoverable)))
            },
            MockLoad::FailLoad(message) => Err(BgRemovalError::model(message.clone())),
        }
    }
}
