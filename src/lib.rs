#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # IMG.LY On-Device Background Removal
//!
//! Removes the background of a single image with a learned matting model,
//! entirely on the local machine.
//!
//! The pipeline picks one inference backend at initialization time:
//!
//! - **High-performance GPU** (`onnx` feature): ONNX Runtime with CUDA or
//!   `CoreML` execution providers and a compact 512×512 matting model
//! - **Portable compute** (`tract` feature): pure Rust Tract with a larger
//!   1024×1024 segmentation model, always run off the caller's task
//!
//! Touch Apple devices always use the portable path. A GPU load failure falls
//! back to the portable path without surfacing an error.
//!
//! Each `process()` call then runs
//! Preprocessor → InferenceSession → MaskUpscaler → AlphaCompositor and
//! returns the input image with its alpha channel replaced by the matte.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use imgly_bgremove_ondevice::{
//!     BackgroundRemovalPipeline, ImageCodec, ImageCrateCodec, OutputFormat, PipelineConfig,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pipeline = BackgroundRemovalPipeline::from_config(PipelineConfig::default())?;
//! let handle = pipeline.initialize().await?;
//! println!("Using {} ({})", handle.backend_kind(), handle.descriptor().id);
//!
//! let codec = ImageCrateCodec;
//! let image = codec.read_file("portrait.jpg")?;
//! let result = pipeline.process(&image).await?;
//! codec.write_file("portrait.png", &result.image, OutputFormat::Png)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing without models
//!
//! [`MockBackendFactory`] and an injected [`PlatformProfile`] drive the
//! whole pipeline without model files or hardware:
//!
//! ```rust
//! use imgly_bgremove_ondevice::{
//!     BackgroundRemovalPipeline, ImageBuffer, MockBackendFactory, PipelineConfig,
//!     PlatformProfile,
//! };
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> imgly_bgremove_ondevice::Result<()> {
//! let pipeline = BackgroundRemovalPipeline::new(
//!     PipelineConfig::default(),
//!     PlatformProfile::new(false, false),
//!     Arc::new(MockBackendFactory::succeeding(1.0)),
//! )?;
//! pipeline.initialize().await?;
//!
//! let result = pipeline
//!     .process(&ImageBuffer::filled(8, 8, [255, 0, 0, 255]))
//!     .await?;
//! assert_eq!(result.image.pixel(0, 0), Some([255, 0, 0, 255]));
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend for the GPU path
//! - `tract` (default): Pure Rust backend for the portable path
//! - `cli` (default): command-line front end, tracing subscriber, progress bars
//! - `rayon`: parallel tensor layout and compositing
//! - `tracing-json`: JSON log output for the CLI

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod codec;
pub mod composite;
pub mod config;
pub mod error;
pub mod inference;
pub mod models;
pub mod platform;
pub mod preprocess;
pub mod processor;
pub mod resample;
pub mod selector;
pub mod store;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod upscale;

pub use backends::{
    FailingBackend, MockBackendFactory, MockLoad, RuntimeBackendFactory, ScriptedBackend,
};
#[cfg(feature = "onnx")]
pub use backends::OnnxBackend;
#[cfg(feature = "tract")]
pub use backends::TractBackend;
pub use codec::{ImageCodec, ImageCrateCodec, OutputFormat};
pub use composite::AlphaCompositor;
pub use config::{AlphaPolicy, PipelineConfig, PipelineConfigBuilder};
pub use error::{BgRemovalError, Result};
pub use inference::{BackendFactory, InferenceBackend, InferenceSession, RuntimeFlags};
pub use models::{BackendKind, MaskNormalization, ModelDescriptor};
pub use platform::PlatformProfile;
pub use preprocess::Preprocessor;
pub use processor::BackgroundRemovalPipeline;
pub use resample::{ImageOpsResampler, Resampler};
pub use selector::{BackendHandle, BackendSelector, SelectionAttempt};
pub use store::{CacheManifest, ModelStore};
pub use types::{ImageBuffer, MaskBuffer, ProcessingTimings, ResultImage, TensorBuffer};
pub use upscale::MaskUpscaler;

#[cfg(feature = "cli")]
pub use tracing_config::{TracingConfig, TracingFormat, TracingOutput};

/// Remove the background from encoded image bytes in one call
///
/// Builds a pipeline from `config`, initializes it and encodes the result as
/// `format`. For more than one image, keep a [`BackgroundRemovalPipeline`]
/// around instead: initialization loads a model.
///
/// # Errors
/// - Invalid configuration
/// - Backend initialization failures
/// - Decoding, processing or encoding failures
pub async fn remove_background_from_bytes(
    bytes: &[u8],
    config: &PipelineConfig,
    format: OutputFormat,
) -> Result<Vec<u8>> {
    let pipeline = BackgroundRemovalPipeline::from_config(config.clone())?;
    pipeline.initialize().await?;
    pipeline.process_bytes(bytes, format).await
}
