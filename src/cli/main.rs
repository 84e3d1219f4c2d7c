//! Background Removal CLI Tool
//!
//! Decodes one image, runs the on-device pipeline and writes the result with
//! a transparent background.

use super::config::CliConfigBuilder;
use crate::{
    codec::{ImageCodec, ImageCrateCodec},
    inference::RuntimeFlags,
    models::{BackendKind, ModelDescriptor},
    platform::PlatformProfile,
    processor::BackgroundRemovalPipeline,
    store::ModelStore,
    tracing_config::{TracingConfig, TracingFormat},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// On-device background removal
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "imgly-bgremove-ondevice")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image file (use "-" for stdin)
    #[arg(value_name = "INPUT", required_unless_present_any = &["show_providers", "only_download", "show_cache_dir"])]
    pub input: Option<String>,

    /// Output file. Use "-" for stdout [default: <input>_bgremoved.<ext>, stdout for stdin]
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<String>,

    /// Output format [default: from the output extension, else png]
    #[arg(short, long, value_enum)]
    pub format: Option<CliOutputFormat>,

    /// Prefer this backend instead of capability-based selection
    #[arg(short, long, value_enum)]
    pub backend: Option<CliBackend>,

    /// Binary alpha: opaque where the mask is at least THRESHOLD
    #[arg(long, value_name = "THRESHOLD")]
    pub hard: Option<f32>,

    /// Backend initialization timeout in seconds (0 = wait indefinitely)
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,

    /// Number of intra-op inference threads (0 = auto-detect)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Search this directory for models before the cache and the network
    #[arg(long, value_name = "DIR")]
    pub local_models: Option<PathBuf>,

    /// Use custom cache directory
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit JSON log lines (requires the tracing-json feature)
    #[arg(long)]
    pub json: bool,

    /// Show platform and execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,

    /// Download both backend models into the cache and exit
    #[arg(long)]
    pub only_download: bool,

    /// Show current cache directory and exit
    #[arg(long)]
    pub show_cache_dir: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliBackend {
    /// ONNX Runtime with CUDA or CoreML
    Gpu,
    /// Pure Rust Tract
    Portable,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliOutputFormat {
    Png,
    Tiff,
    Rgba8,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli).context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    if cli.show_cache_dir {
        return show_current_cache_dir(&cli);
    }

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;
    let store = ModelStore::from_config(&config)
        .context("Failed to open model cache")?
        .with_progress(true);

    if cli.only_download {
        return download_models_only(&store).await;
    }

    let input = cli
        .input
        .as_deref()
        .context("At least one input is required")?;
    let codec = ImageCrateCodec;
    let format = CliConfigBuilder::output_format(&cli);

    let bytes = if input == "-" {
        read_stdin()?
    } else {
        std::fs::read(input).with_context(|| format!("Failed to read {input}"))?
    };
    let image = codec
        .decode(&bytes)
        .with_context(|| format!("Failed to decode {input}"))?;
    info!(
        width = image.width(),
        height = image.height(),
        "Decoded input image"
    );

    let pipeline = BackgroundRemovalPipeline::from_store(config, store)
        .context("Failed to create background removal pipeline")?;

    let spinner = init_spinner();
    let handle = pipeline.initialize().await;
    spinner.finish_and_clear();
    let handle = handle.context("Failed to initialize an inference backend")?;
    info!(
        backend = %handle.backend_kind(),
        model = %handle.descriptor().id,
        load_ms = handle.load_time().as_millis() as u64,
        "Backend initialized"
    );
    for attempt in handle.attempts().iter().filter(|a| !a.succeeded()) {
        debug!(
            backend = %attempt.backend_kind,
            error = attempt.error.as_deref().unwrap_or_default(),
            "Skipped backend"
        );
    }

    let result = pipeline
        .process(&image)
        .await
        .context("Failed to remove background")?;
    info!("⏱️ {}", result.timings.summary());

    let encoded = codec
        .encode(&result.image, format)
        .context("Failed to encode output image")?;

    match output_target(input, cli.output.as_deref(), format.extension()) {
        None => {
            write_stdout(&encoded)?;
            info!("Image written to stdout");
        },
        Some(path) => {
            std::fs::write(&path, &encoded)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("✅ Saved {}", path.display());
        },
    }

    pipeline.shutdown();
    Ok(())
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let format = if cli.json {
        #[cfg(feature = "tracing-json")]
        {
            TracingFormat::Json
        }
        #[cfg(not(feature = "tracing-json"))]
        {
            anyhow::bail!("--json requires the tracing-json feature");
        }
    } else {
        TracingFormat::Console
    };

    TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(format)
        .with_session_id(uuid::Uuid::new_v4().to_string())
        .init()
}

fn init_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]") {
        spinner.set_style(style);
    }
    spinner.set_message("Loading inference backend");
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Display platform capability and execution provider availability
fn show_provider_diagnostics() {
    println!("🔍 Platform and Backend Diagnostics");

    let profile = PlatformProfile::detect();
    println!("  • Touch Apple device: {}", profile.is_touch_apple_device);
    println!("  • High-performance GPU API: {}", profile.has_high_perf_gpu_api);

    println!("\n🔧 Compiled Backends:");
    for kind in crate::backends::RuntimeBackendFactory::available_backends() {
        let descriptor = kind.default_descriptor();
        let (width, height) = descriptor.expected_input_size;
        println!("  • {kind}: {} ({width}×{height})", descriptor.id);
    }

    #[cfg(feature = "onnx")]
    {
        println!("\n🚀 Execution Providers:");
        for (name, available) in crate::backends::OnnxBackend::list_providers() {
            let status = if available {
                "✅ Available"
            } else {
                "❌ Not Available"
            };
            println!("  • {name}: {status}");
        }
    }
}

fn show_current_cache_dir(cli: &Cli) -> Result<()> {
    let cache_dir = match &cli.cache_dir {
        Some(dir) => dir.clone(),
        None => ModelStore::default_cache_dir()?,
    };
    println!("📁 Model cache directory: {}", cache_dir.display());
    for descriptor in [ModelDescriptor::gpu_compact(), ModelDescriptor::portable()] {
        let store = ModelStore::new(&cache_dir);
        let status = if store.is_cached(&descriptor) {
            "cached"
        } else {
            "not cached"
        };
        println!("  • {}: {status}", descriptor.id);
    }
    Ok(())
}

async fn download_models_only(store: &ModelStore) -> Result<()> {
    for kind in [BackendKind::HighPerfGpu, BackendKind::PortableCompute] {
        let descriptor = kind.default_descriptor();
        let bytes = store
            .fetch(&descriptor, RuntimeFlags::for_backend(kind, false))
            .await
            .with_context(|| format!("Failed to download {}", descriptor.id))?;
        println!(
            "📦 {} ready ({:.1} MB) at {}",
            descriptor.id,
            bytes.len() as f64 / 1_048_576.0,
            store.cached_model_path(&descriptor).display()
        );
    }
    Ok(())
}

/// Output path, or `None` for stdout
fn output_target(input: &str, output: Option<&str>, extension: &str) -> Option<PathBuf> {
    match output {
        Some("-") => None,
        Some(path) => Some(PathBuf::from(path)),
        None if input == "-" => None,
        None => Some(generate_output_path(Path::new(input), extension)),
    }
}

fn generate_output_path(input_path: &Path, extension: &str) -> PathBuf {
    let stem = input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    input_path.with_file_name(format!("{stem}_bgremoved.{extension}"))
}

/// Read image data from stdin
fn read_stdin() -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    io::stdin()
        .read_to_end(&mut buffer)
        .context("Failed to read image data from stdin")?;

    if buffer.is_empty() {
        anyhow::bail!("No data received from stdin");
    }

    Ok(buffer)
}

/// Write image data to stdout
fn write_stdout(data: &[u8]) -> Result<()> {
    io::stdout()
        .write_all(data)
        .context("Failed to write image data to stdout")?;
    io::stdout().flush().context("Failed to flush stdout")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_output_path() {
        assert_eq!(
            generate_output_path(Path::new("/photos/cat.jpg"), "png"),
            PathBuf::from("/photos/cat_bgremoved.png")
        );
        assert_eq!(
            generate_output_path(Path::new("dog"), "tiff"),
            PathBuf::from("dog_bgremoved.tiff")
        );
    }

    #[test]
    fn test_output_target() {
        assert_eq!(output_target("-", None, "png"), None);
        assert_eq!(output_target("a.jpg", Some("-"), "png"), None);
        assert_eq!(
            output_target("-", Some("out.png"), "png"),
            Some(PathBuf::from("out.png"))
        );
        assert_eq!(
            output_target("a.jpg", None, "raw"),
            Some(PathBuf::from("a_bgremoved.raw"))
        );
    }

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from([
            "imgly-bgremove-ondevice",
            "input.jpg",
            "-o",
            "out.png",
            "-b",
            "gpu",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.input.as_deref(), Some("input.jpg"));
        assert_eq!(cli.backend, Some(CliBackend::Gpu));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.timeout, 300);
    }

    #[test]
    fn test_input_required_unless_diagnostics() {
        assert!(Cli::try_parse_from(["imgly-bgremove-ondevice"]).is_err());
        assert!(Cli::try_parse_from(["imgly-bgremove-ondevice", "--show-providers"]).is_ok());
        assert!(Cli::try_parse_from(["imgly-bgremove-ondevice", "--only-download"]).is_ok());
    }
}
