//! Backend selection with platform carve-outs and fallback
//!
//! ```text
//! Start ──touch Apple device──────────────▶ PortableComputeLoad
//!   │                                          │ ok      │ err
//!   └──GPU API (or forced GPU)─▶ HighPerfGpuLoad ▼         ▼
//!                                 │ ok   │ err  Ready   Failed(Init)
//!                                 ▼      └──▶ PortableComputeLoad
//!                               Ready
//! ```
//!
//! A GPU load failure is logged and never surfaced unless the portable
//! fallback fails as well. The GPU load is never retried.

use crate::{
    error::{BgRemovalError, Result},
    inference::{BackendFactory, InferenceSession, RuntimeFlags},
    models::{BackendKind, ModelDescriptor},
    platform::PlatformProfile,
};
use instant::Instant;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Outcome of one load attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionAttempt {
    pub backend_kind: BackendKind,
    pub descriptor_id: String,
    pub flags: RuntimeFlags,
    /// `None` when the load succeeded
    pub error: Option<String>,
}

impl SelectionAttempt {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// A loaded model ready to serve `process()` calls
///
/// Never mutated after creation; the pipeline shares it behind an `Arc`.
#[derive(Debug)]
pub struct BackendHandle {
    descriptor: ModelDescriptor,
    session: InferenceSession,
    flags: RuntimeFlags,
    attempts: Vec<SelectionAttempt>,
    load_time: Duration,
}

impl BackendHandle {
    #[must_use]
    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn session(&self) -> &InferenceSession {
        &self.session
    }

    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        self.descriptor.backend_kind
    }

    /// Flags applied when this backend was loaded
    #[must_use]
    pub fn flags(&self) -> RuntimeFlags {
        self.flags
    }

    /// Every attempt of the selection that produced this handle, in order
    #[must_use]
    pub fn attempts(&self) -> &[SelectionAttempt] {
        &self.attempts
    }

    /// Time spent in the successful load
    #[must_use]
    pub fn load_time(&self) -> Duration {
        self.load_time
    }
}

/// Picks and loads one inference backend
#[derive(Clone)]
pub struct BackendSelector {
    profile: PlatformProfile,
    forced: Option<BackendKind>,
    allow_local_models: bool,
    gpu_descriptor: ModelDescriptor,
    portable_descriptor: ModelDescriptor,
    factory: Arc<dyn BackendFactory>,
}

impl std::fmt::Debug for BackendSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSelector")
            .field("profile", &self.profile)
            .field("forced", &self.forced)
            .field("allow_local_models", &self.allow_local_models)
            .field("gpu_descriptor", &self.gpu_descriptor.id)
            .field("portable_descriptor", &self.portable_descriptor.id)
            .finish_non_exhaustive()
    }
}

impl BackendSelector {
    #[must_use]
    pub fn new(profile: PlatformProfile, factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            profile,
            forced: None,
            allow_local_models: false,
            gpu_descriptor: ModelDescriptor::gpu_compact(),
            portable_descriptor: ModelDescriptor::portable(),
            factory,
        }
    }

    #[must_use]
    pub fn with_forced_backend(mut self, forced: Option<BackendKind>) -> Self {
        self.forced = forced;
        self
    }

    #[must_use]
    pub fn with_local_models(mut self, allow_local_models: bool) -> Self {
        self.allow_local_models = allow_local_models;
        self
    }

    /// Replace the descriptor loaded for `descriptor.backend_kind`
    #[must_use]
    pub fn with_descriptor(mut self, descriptor: ModelDescriptor) -> Self {
        match descriptor.backend_kind {
            BackendKind::HighPerfGpu => self.gpu_descriptor = descriptor,
            BackendKind::PortableCompute => self.portable_descriptor = descriptor,
        }
        self
    }

    #[must_use]
    pub fn profile(&self) -> PlatformProfile {
        self.profile
    }

    #[must_use]
    pub fn descriptor_for(&self, kind: BackendKind) -> &ModelDescriptor {
        match kind {
            BackendKind::HighPerfGpu => &self.gpu_descriptor,
            BackendKind::PortableCompute => &self.portable_descriptor,
        }
    }

    /// Backends to try, in order
    #[must_use]
    pub fn plan(&self) -> Vec<BackendKind> {
        if self.profile.is_touch_apple_device {
            return vec![BackendKind::PortableCompute];
        }
        match self.forced {
            Some(BackendKind::PortableCompute) => vec![BackendKind::PortableCompute],
            Some(BackendKind::HighPerfGpu) => {
                vec![BackendKind::HighPerfGpu, BackendKind::PortableCompute]
            },
            None if self.profile.has_high_perf_gpu_api => {
                vec![BackendKind::HighPerfGpu, BackendKind::PortableCompute]
            },
            None => vec![BackendKind::PortableCompute],
        }
    }

    /// Run the plan until one backend loads
    ///
    /// # Errors
    /// - Every planned load failed (`BgRemovalError::Init`, one entry per attempt)
    #[instrument(skip(self), fields(profile = ?self.profile, forced = ?self.forced))]
    pub async fn select(&self) -> Result<BackendHandle> {
        if self.profile.is_touch_apple_device && self.forced == Some(BackendKind::HighPerfGpu) {
            warn!("Forced GPU backend ignored on touch Apple device, using portable compute");
        }

        let mut attempts = Vec::new();
        for kind in self.plan() {
            let descriptor = self.descriptor_for(kind).clone();
            let flags = RuntimeFlags::for_backend(kind, self.allow_local_models);
            let load_start = Instant::now();

            match self.factory.load(&descriptor, flags).await {
                Ok(backend) => {
                    let load_time = load_start.elapsed();
                    info!(
                        backend = %kind,
                        model = %descriptor.id,
                        proxy_compute = flags.proxy_compute,
                        load_ms = load_time.as_millis() as u64,
                        "✅ Backend ready"
                    );
                    attempts.push(SelectionAttempt {
                        backend_kind: kind,
                        descriptor_id: descriptor.id.clone(),
                        flags,
                        error: None,
                    });
                    return Ok(BackendHandle {
                        session: InferenceSession::new(descriptor.clone(), backend),
                        descriptor,
                        flags,
                        attempts,
                        load_time,
                    });
                },
                Err(e) => {
                    warn!(
                        backend = %kind,
                        model = %descriptor.id,
                        error = %e,
                        "Backend failed to load"
                    );
                    attempts.push(SelectionAttempt {
                        backend_kind: kind,
                        descriptor_id: descriptor.id,
                        flags,
                        error: Some(e.to_string()),
                    });
                },
            }
        }

        Err(BgRemovalError::Init {
            attempts: attempts
                .into_iter()
                .map(|a| (a.backend_kind, a.error.unwrap_or_default()))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{MockBackendFactory, MockLoad};

    fn selector(profile: PlatformProfile, factory: MockBackendFactory) -> BackendSelector {
        BackendSelector::new(profile, Arc::new(factory))
    }

    #[test]
    fn test_plan_state_machine() {
        let factory = || MockBackendFactory::succeeding(1.0);
        let gpu = BackendKind::HighPerfGpu;
        let portable = BackendKind::PortableCompute;

        assert_eq!(selector(PlatformProfile::new(true, true), factory()).plan(), vec![portable]);
        assert_eq!(
            selector(PlatformProfile::new(false, true), factory()).plan(),
            vec![gpu, portable]
        );
        assert_eq!(selector(PlatformProfile::new(false, false), factory()).plan(), vec![portable]);
    }

    #[test]
    fn test_forced_backend_plan() {
        let portable_only = selector(PlatformProfile::new(false, true), MockBackendFactory::succeeding(1.0))
            .with_forced_backend(Some(BackendKind::PortableCompute));
        assert_eq!(portable_only.plan(), vec![BackendKind::PortableCompute]);

        let forced_gpu = selector(PlatformProfile::new(false, false), MockBackendFactory::succeeding(1.0))
            .with_forced_backend(Some(BackendKind::HighPerfGpu));
        assert_eq!(
            forced_gpu.plan(),
            vec![BackendKind::HighPerfGpu, BackendKind::PortableCompute]
        );

        let apple = selector(PlatformProfile::new(true, true), MockBackendFactory::succeeding(1.0))
            .with_forced_backend(Some(BackendKind::HighPerfGpu));
        assert_eq!(apple.plan(), vec![BackendKind::PortableCompute]);
    }

    #[tokio::test]
    async fn test_gpu_failure_falls_back_to_portable() {
        let factory = Arc::new(
            MockBackendFactory::succeeding(1.0).with_gpu(MockLoad::fail("adapter request failed")),
        );
        let selector = BackendSelector::new(PlatformProfile::new(false, true), factory.clone());

        let handle = selector.select().await.unwrap();
        assert_eq!(handle.backend_kind(), BackendKind::PortableCompute);
        assert_eq!(handle.descriptor().id, ModelDescriptor::portable().id);
        assert!(handle.flags().proxy_compute);
        assert_eq!(handle.attempts().len(), 2);
        assert!(!handle.attempts()[0].succeeded());
        assert!(handle.attempts()[1].succeeded());
        assert_eq!(factory.load_count(), 2);
    }

    #[tokio::test]
    async fn test_both_failures_report_every_attempt() {
        let factory = MockBackendFactory::succeeding(1.0)
            .with_gpu(MockLoad::fail("gpu broke"))
            .with_portable(MockLoad::fail("portable broke"));
        let result = selector(PlatformProfile::new(false, true), factory).select().await;

        match result {
            Err(BgRemovalError::Init { attempts }) => {
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[0].0, BackendKind::HighPerfGpu);
                assert!(attempts[0].1.contains("gpu broke"));
                assert!(attempts[1].1.contains("portable broke"));
            },
            other => panic!("expected init error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_gpu_success_uses_gpu_descriptor_without_proxy() {
        let selector = selector(PlatformProfile::new(false, true), MockBackendFactory::succeeding(1.0));
        let handle = selector.select().await.unwrap();
        assert_eq!(handle.backend_kind(), BackendKind::HighPerfGpu);
        assert_eq!(handle.descriptor().expected_input_size, (512, 512));
        assert!(!handle.flags().proxy_compute);
        assert_eq!(handle.attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_custom_descriptor_and_local_flag_propagate() {
        let factory = Arc::new(MockBackendFactory::succeeding(0.5));
        let selector = BackendSelector::new(PlatformProfile::default(), factory.clone())
            .with_local_models(true)
            .with_descriptor(ModelDescriptor::new(
                "test/tiny",
                (16, 16),
                BackendKind::PortableCompute,
            ));

        let handle = selector.select().await.unwrap();
        assert_eq!(handle.descriptor().id, "test/tiny");
        assert!(factory.attempts()[0].1.allow_local_models);
    }
}
