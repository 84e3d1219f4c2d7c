//! Backend selection integration tests
//!
//! Drives `BackgroundRemovalPipeline::initialize` through injected platform
//! profiles and scripted backend factories.

use imgly_bgremove_ondevice::{
    BackendKind, BackgroundRemovalPipeline, BgRemovalError, MockBackendFactory, MockLoad,
    ModelDescriptor, PipelineConfig, PlatformProfile,
};
use std::sync::Arc;
use std::time::Duration;

fn pipeline_with(
    config: PipelineConfig,
    profile: PlatformProfile,
    factory: &Arc<MockBackendFactory>,
) -> BackgroundRemovalPipeline {
    BackgroundRemovalPipeline::new(config, profile, factory.clone())
        .expect("valid configuration")
        .with_descriptor(ModelDescriptor::new("test/gpu", (16, 16), BackendKind::HighPerfGpu))
        .with_descriptor(ModelDescriptor::new(
            "test/portable",
            (32, 32),
            BackendKind::PortableCompute,
        ))
}

#[tokio::test]
async fn test_touch_apple_device_always_uses_portable() {
    for forced in [None, Some(BackendKind::HighPerfGpu), Some(BackendKind::PortableCompute)] {
        let factory = Arc::new(MockBackendFactory::succeeding(1.0));
        let config = PipelineConfig {
            forced_backend: forced,
            ..PipelineConfig::default()
        };
        let pipeline = pipeline_with(config, PlatformProfile::new(true, true), &factory);

        let handle = pipeline.initialize().await.unwrap();
        assert_eq!(handle.backend_kind(), BackendKind::PortableCompute);
        assert_eq!(handle.descriptor().id, "test/portable");
        assert_eq!(factory.load_count(), 1, "GPU must never be attempted (forced {forced:?})");
    }
}

#[tokio::test]
async fn test_gpu_api_prefers_gpu_backend() {
    let factory = Arc::new(MockBackendFactory::succeeding(1.0));
    let pipeline = pipeline_with(
        PipelineConfig::default(),
        PlatformProfile::new(false, true),
        &factory,
    );

    let handle = pipeline.initialize().await.unwrap();
    assert_eq!(handle.backend_kind(), BackendKind::HighPerfGpu);
    assert!(!handle.flags().proxy_compute);
    assert_eq!(factory.attempts().len(), 1);
}

#[tokio::test]
async fn test_gpu_failure_falls_back_silently() {
    let factory = Arc::new(
        MockBackendFactory::succeeding(1.0).with_gpu(MockLoad::fail("no compatible adapter")),
    );
    let pipeline = pipeline_with(
        PipelineConfig::default(),
        PlatformProfile::new(false, true),
        &factory,
    );

    let handle = pipeline.initialize().await.unwrap();
    assert_eq!(handle.backend_kind(), BackendKind::PortableCompute);
    assert!(handle.flags().proxy_compute);

    let kinds: Vec<BackendKind> = factory.attempts().into_iter().map(|(kind, _)| kind).collect();
    assert_eq!(kinds, vec![BackendKind::HighPerfGpu, BackendKind::PortableCompute]);
    assert!(handle.attempts()[0]
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("no compatible adapter"));
}

#[tokio::test]
async fn test_no_gpu_api_goes_straight_to_portable() {
    let factory = Arc::new(MockBackendFactory::succeeding(1.0));
    let pipeline = pipeline_with(
        PipelineConfig::default(),
        PlatformProfile::new(false, false),
        &factory,
    );

    let handle = pipeline.initialize().await.unwrap();
    assert_eq!(handle.backend_kind(), BackendKind::PortableCompute);
    assert_eq!(factory.load_count(), 1);
}

#[tokio::test]
async fn test_forced_gpu_without_gpu_api_still_tries_gpu_first() {
    let factory = Arc::new(MockBackendFactory::succeeding(1.0));
    let config = PipelineConfig::builder()
        .forced_backend(BackendKind::HighPerfGpu)
        .build()
        .unwrap();
    let pipeline = pipeline_with(config, PlatformProfile::new(false, false), &factory);

    let handle = pipeline.initialize().await.unwrap();
    assert_eq!(handle.backend_kind(), BackendKind::HighPerfGpu);
}

#[tokio::test]
async fn test_all_backends_failing_reports_init_error() {
    let factory = Arc::new(
        MockBackendFactory::succeeding(1.0)
            .with_gpu(MockLoad::fail("gpu unavailable"))
            .with_portable(MockLoad::fail("model missing")),
    );
    let pipeline = pipeline_with(
        PipelineConfig::default(),
        PlatformProfile::new(false, true),
        &factory,
    );

    let error = pipeline.initialize().await.unwrap_err();
    match &error {
        BgRemovalError::Init { attempts } => {
            assert_eq!(attempts.len(), 2);
            assert_eq!(attempts[1].0, BackendKind::PortableCompute);
        },
        other => panic!("expected Init error, got {other:?}"),
    }
    assert!(!error.is_recoverable());
    assert!(error.to_string().contains("model missing"));
    assert!(!pipeline.is_initialized());
}

#[tokio::test]
async fn test_concurrent_initialize_shares_one_load() {
    let factory = Arc::new(
        MockBackendFactory::succeeding(1.0).with_load_delay(Duration::from_millis(50)),
    );
    let pipeline = Arc::new(pipeline_with(
        PipelineConfig::default(),
        PlatformProfile::new(false, false),
        &factory,
    ));

    let first = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.initialize().await }
    });
    let second = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.initialize().await }
    });

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(factory.load_count(), 1);

    // Ready state short-circuits
    let third = pipeline.initialize().await.unwrap();
    assert!(Arc::ptr_eq(&first, &third));
    assert_eq!(factory.load_count(), 1);
}

#[tokio::test]
async fn test_local_model_flag_reaches_factory() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(MockBackendFactory::succeeding(1.0));
    let config = PipelineConfig::builder()
        .local_model_dir(dir.path())
        .build()
        .unwrap();
    let pipeline = pipeline_with(config, PlatformProfile::new(false, true), &factory);

    pipeline.initialize().await.unwrap();
    let (kind, flags) = factory.attempts()[0];
    assert_eq!(kind, BackendKind::HighPerfGpu);
    assert!(flags.allow_local_models);
    assert!(!flags.proxy_compute);
}

#[tokio::test]
async fn test_reinitialize_replaces_handle() {
    let factory = Arc::new(MockBackendFactory::succeeding(1.0));
    let pipeline = pipeline_with(
        PipelineConfig::default(),
        PlatformProfile::new(false, false),
        &factory,
    );

    let first = pipeline.initialize().await.unwrap();
    let second = pipeline.reinitialize().await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(factory.load_count(), 2);

    pipeline.shutdown();
    assert!(!pipeline.is_initialized());
}
