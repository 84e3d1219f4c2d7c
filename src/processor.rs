//! Background removal pipeline
//!
//! [`BackgroundRemovalPipeline`] owns the selected backend and runs
//! Preprocessor → InferenceSession → MaskUpscaler → AlphaCompositor for each
//! `process()` call. There is no process-wide state: every pipeline instance
//! selects and owns its own backend.

use crate::{
    backends::RuntimeBackendFactory,
    codec::{ImageCodec, ImageCrateCodec, OutputFormat},
    composite::AlphaCompositor,
    config::PipelineConfig,
    error::{BgRemovalError, Result},
    inference::BackendFactory,
    models::ModelDescriptor,
    platform::PlatformProfile,
    preprocess::Preprocessor,
    resample::Resampler,
    selector::{BackendHandle, BackendSelector},
    store::ModelStore,
    types::{ImageBuffer, MaskBuffer, ProcessingTimings, ResultImage},
    upscale::MaskUpscaler,
};
use instant::Instant;
use std::sync::{Arc, RwLock};
use tokio::runtime::RuntimeFlavor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, span, warn, Level};

/// On-device background removal
///
/// `initialize()` must succeed before `process()`. Both take `&self`; share
/// the pipeline behind an `Arc` to process images concurrently.
pub struct BackgroundRemovalPipeline {
    config: PipelineConfig,
    selector: BackendSelector,
    preprocessor: Preprocessor,
    upscaler: MaskUpscaler,
    compositor: AlphaCompositor,
    codec: Arc<dyn ImageCodec>,
    state: RwLock<Option<Arc<BackendHandle>>>,
    init_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for BackgroundRemovalPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemovalPipeline")
            .field("config", &self.config)
            .field("selector", &self.selector)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl BackgroundRemovalPipeline {
    /// Pipeline with an injected platform profile and backend factory
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(
        config: PipelineConfig,
        profile: PlatformProfile,
        factory: Arc<dyn BackendFactory>,
    ) -> Result<Self> {
        config.validate()?;
        let selector = BackendSelector::new(profile, factory)
            .with_forced_backend(config.forced_backend)
            .with_local_models(config.allow_local_models);

        Ok(Self {
            compositor: AlphaCompositor::new(config.alpha_policy),
            config,
            selector,
            preprocessor: Preprocessor::default(),
            upscaler: MaskUpscaler::default(),
            codec: Arc::new(ImageCrateCodec),
            state: RwLock::new(None),
            init_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Pipeline for this process: detected platform, real runtimes, model store
    /// configured from `config`
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Cache directory cannot be determined
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let store = ModelStore::from_config(&config)?;
        Self::from_store(config, store)
    }

    /// Like [`from_config`](Self::from_config) with a caller-built model store
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn from_store(config: PipelineConfig, store: ModelStore) -> Result<Self> {
        let factory = RuntimeBackendFactory::new(store)
            .with_threads(config.intra_threads, config.inter_threads);
        Self::new(config, PlatformProfile::detect(), Arc::new(factory))
    }

    /// Resample with `resampler` in preprocessing and upscaling
    #[must_use]
    pub fn with_resampler(mut self, resampler: Arc<dyn Resampler>) -> Self {
        self.preprocessor = Preprocessor::new(resampler.clone());
        self.upscaler = MaskUpscaler::new(resampler);
        self
    }

    /// Replace the descriptor loaded for `descriptor.backend_kind`
    #[must_use]
    pub fn with_descriptor(mut self, descriptor: ModelDescriptor) -> Self {
        self.selector = self.selector.with_descriptor(descriptor);
        self
    }

    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn selector(&self) -> &BackendSelector {
        &self.selector
    }

    /// Current backend handle, if initialized
    #[must_use]
    pub fn handle(&self) -> Option<Arc<BackendHandle>> {
        match self.state.read() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.handle().is_some()
    }

    fn set_handle(&self, handle: Option<Arc<BackendHandle>>) {
        match self.state.write() {
            Ok(mut state) => *state = handle,
            Err(poisoned) => *poisoned.into_inner() = handle,
        }
    }

    /// Select and load a backend
    ///
    /// Idempotent: once Ready, returns the existing handle. Concurrent callers
    /// share a single load sequence and observe the same handle.
    ///
    /// # Errors
    /// - Every backend failed to load (`BgRemovalError::Init`)
    /// - The configured init timeout elapsed (`BgRemovalError::Timeout`)
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<Arc<BackendHandle>> {
        if let Some(handle) = self.handle() {
            return Ok(handle);
        }

        let _guard = self.init_lock.lock().await;
        if let Some(handle) = self.handle() {
            debug!("Backend loaded by a concurrent initialize() call");
            return Ok(handle);
        }

        let handle = Arc::new(self.select_with_timeout().await?);
        self.set_handle(Some(handle.clone()));
        Ok(handle)
    }

    /// Run backend selection again and swap in the new handle
    ///
    /// In-flight `process()` calls finish on the handle they started with.
    /// On failure the previous handle, if any, stays in place.
    ///
    /// # Errors
    /// - Same as [`initialize`](Self::initialize)
    #[instrument(skip(self))]
    pub async fn reinitialize(&self) -> Result<Arc<BackendHandle>> {
        let _guard = self.init_lock.lock().await;
        let handle = Arc::new(self.select_with_timeout().await?);
        self.set_handle(Some(handle.clone()));
        info!(backend = %handle.backend_kind(), "🔄 Backend re-initialized");
        Ok(handle)
    }

    /// Drop the current handle; the next `process()` fails until re-initialized
    pub fn shutdown(&self) {
        self.set_handle(None);
    }

    async fn select_with_timeout(&self) -> Result<BackendHandle> {
        match self.config.init_timeout {
            Some(limit) => tokio::time::timeout(limit, self.selector.select())
                .await
                .map_err(|_| BgRemovalError::Timeout(limit))?,
            None => self.selector.select().await,
        }
    }

    /// Remove the background of one image
    ///
    /// # Errors
    /// - Not initialized (`BgRemovalError::NotInitialized`)
    /// - Malformed or zero-sized input (`BgRemovalError::Preprocess`)
    /// - Backend fault (`BgRemovalError::Inference`); unrecoverable faults
    ///   also drop the backend handle
    pub async fn process(&self, image: &ImageBuffer) -> Result<ResultImage> {
        self.process_with_cancellation(image, &CancellationToken::new())
            .await
    }

    /// [`process`](Self::process), checking `token` between stages
    ///
    /// # Errors
    /// - Same as [`process`](Self::process)
    /// - `token` cancelled (`BgRemovalError::Cancelled`)
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub async fn process_with_cancellation(
        &self,
        image: &ImageBuffer,
        token: &CancellationToken,
    ) -> Result<ResultImage> {
        let handle = self.handle().ok_or(BgRemovalError::NotInitialized)?;
        let descriptor = handle.descriptor();
        let total_start = Instant::now();
        let mut timings = ProcessingTimings::default();

        info!(
            backend = %handle.backend_kind(),
            model = %descriptor.id,
            "🎯 Starting image processing"
        );

        check_cancelled(token)?;
        let tensor = {
            let _span = span!(
                Level::DEBUG,
                "preprocessing",
                target_width = descriptor.expected_input_size.0,
                target_height = descriptor.expected_input_size.1
            )
            .entered();
            let start = Instant::now();
            let tensor = self.preprocessor.run(image, descriptor)?;
            timings.preprocessing_ms = start.elapsed().as_millis() as u64;
            tensor
        };

        check_cancelled(token)?;
        let start = Instant::now();
        let mask = match self.run_inference(&handle, tensor).await {
            Ok(mask) => mask,
            Err(e) => {
                if e.invalidates_backend() {
                    self.invalidate(&handle);
                }
                return Err(e);
            },
        };
        timings.inference_ms = start.elapsed().as_millis() as u64;

        check_cancelled(token)?;
        let mask = {
            let _span = span!(
                Level::DEBUG,
                "upscale",
                native_width = mask.width(),
                native_height = mask.height()
            )
            .entered();
            let start = Instant::now();
            let mask =
                self.upscaler
                    .upscale_with_cancellation(mask, descriptor, image.dimensions(), token)?;
            timings.upscale_ms = start.elapsed().as_millis() as u64;
            mask
        };

        check_cancelled(token)?;
        let composited = {
            let _span = span!(Level::DEBUG, "composite", policy = %self.compositor.policy())
                .entered();
            let start = Instant::now();
            let composited = self.compositor.composite(image, &mask)?;
            timings.composite_ms = start.elapsed().as_millis() as u64;
            composited
        };

        timings.total_ms = total_start.elapsed().as_millis() as u64;
        debug!(timings = %timings.summary(), "✅ Processing complete");

        Ok(ResultImage {
            image: composited,
            backend_kind: handle.backend_kind(),
            model_id: descriptor.id.clone(),
            timings,
        })
    }

    async fn run_inference(
        &self,
        handle: &Arc<BackendHandle>,
        tensor: crate::types::TensorBuffer,
    ) -> Result<MaskBuffer> {
        let kind = handle.backend_kind();
        let inference_span = span!(
            Level::INFO,
            "inference",
            backend = %kind,
            proxy_compute = handle.flags().proxy_compute
        );

        if !handle.flags().proxy_compute {
            let _entered = inference_span.enter();
            // `block_in_place` panics on a current-thread runtime
            let multi_thread = tokio::runtime::Handle::try_current()
                .is_ok_and(|rt| rt.runtime_flavor() == RuntimeFlavor::MultiThread);
            return if multi_thread {
                tokio::task::block_in_place(|| handle.session().run(&tensor))
            } else {
                handle.session().run(&tensor)
            };
        }

        let session = handle.session().clone();
        tokio::task::spawn_blocking(move || {
            let _entered = inference_span.enter();
            session.run(&tensor)
        })
        .await
        .map_err(|e| {
            if e.is_panic() {
                BgRemovalError::inference_unrecoverable(
                    kind,
                    format!("Inference worker panicked: {e}"),
                )
            } else {
                BgRemovalError::inference(kind, format!("Inference worker cancelled: {e}"))
            }
        })?
    }

    /// Drop `handle` if it is still the current one
    fn invalidate(&self, handle: &Arc<BackendHandle>) {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, handle))
        {
            warn!(
                backend = %handle.backend_kind(),
                "Unrecoverable inference fault, dropping backend handle"
            );
            *state = None;
        }
    }

    /// Decode `bytes`, remove the background and encode the result
    ///
    /// # Errors
    /// - Decoding or encoding failures
    /// - Any [`process`](Self::process) error
    pub async fn process_bytes(&self, bytes: &[u8], format: OutputFormat) -> Result<Vec<u8>> {
        let image = self.codec.decode(bytes)?;
        let result = self.process(&image).await?;
        self.codec.encode(&result.image, format)
    }
}

fn check_cancelled(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Err(BgRemovalError::Cancelled);
    }
    Ok(())
}
