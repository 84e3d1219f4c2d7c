//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::{Cli, CliBackend, CliOutputFormat};
use crate::{
    codec::OutputFormat,
    config::{AlphaPolicy, PipelineConfig},
    models::BackendKind,
};
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

/// Convert CLI arguments to a `PipelineConfig`
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build `PipelineConfig` from CLI arguments
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let mut builder = PipelineConfig::builder()
            .intra_threads(cli.threads)
            .init_timeout(Self::init_timeout(cli.timeout));

        if let Some(threshold) = cli.hard {
            builder = builder.alpha_policy(AlphaPolicy::Hard { threshold });
        }

        if let Some(backend) = cli.backend {
            builder = builder.forced_backend(backend.into());
        }

        if let Some(dir) = &cli.local_models {
            builder = builder.local_model_dir(dir);
        }

        if let Some(dir) = &cli.cache_dir {
            builder = builder.cache_dir(dir);
        }

        builder.build().context("Invalid pipeline configuration")
    }

    /// `0` disables the timeout
    fn init_timeout(seconds: u64) -> Option<Duration> {
        (seconds > 0).then(|| Duration::from_secs(seconds))
    }

    /// Output format from the flag, else from the output file extension
    pub(crate) fn output_format(cli: &Cli) -> OutputFormat {
        if let Some(format) = cli.format {
            return format.into();
        }

        cli.output
            .as_deref()
            .filter(|output| *output != "-")
            .and_then(|output| Path::new(output).extension())
            .and_then(|ext| ext.to_str())
            .and_then(OutputFormat::from_extension)
            .unwrap_or_default()
    }

    /// Validate CLI arguments before any model is touched
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if let Some(threshold) = cli.hard {
            if !(0.0..=1.0).contains(&threshold) {
                anyhow::bail!("--hard threshold must be between 0.0 and 1.0, got {threshold}");
            }
        }

        if let Some(dir) = &cli.local_models {
            if !dir.is_dir() {
                anyhow::bail!("Local model directory does not exist: {}", dir.display());
            }
        }

        if cli.input.as_deref() != Some("-") {
            if let Some(input) = &cli.input {
                if !Path::new(input).is_file() {
                    anyhow::bail!("Input file does not exist: {input}");
                }
            }
        }

        Ok(())
    }
}

impl From<CliBackend> for BackendKind {
    fn from(backend: CliBackend) -> Self {
        match backend {
            CliBackend::Gpu => Self::HighPerfGpu,
            CliBackend::Portable => Self::PortableCompute,
        }
    }
}

impl From<CliOutputFormat> for OutputFormat {
    fn from(format: CliOutputFormat) -> Self {
        match format {
            CliOutputFormat::Png => Self::Png,
            CliOutputFormat::Tiff => Self::Tiff,
            CliOutputFormat::Rgba8 => Self::Rgba8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("imgly-bgremove-ondevice").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = CliConfigBuilder::from_cli(&parse(&["photo.jpg"])).unwrap();
        assert_eq!(config.alpha_policy, AlphaPolicy::Soft);
        assert_eq!(config.forced_backend, None);
        assert_eq!(config.init_timeout, Some(Duration::from_secs(300)));
        assert!(!config.allow_local_models);
    }

    #[test]
    fn test_flags_map_to_config() {
        let cli = parse(&[
            "photo.jpg",
            "--backend",
            "portable",
            "--hard",
            "0.3",
            "--timeout",
            "0",
            "--cache-dir",
            "/tmp/models",
        ]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(config.forced_backend, Some(BackendKind::PortableCompute));
        assert_eq!(config.alpha_policy, AlphaPolicy::Hard { threshold: 0.3 });
        assert_eq!(config.init_timeout, None);
        assert_eq!(config.cache_dir.as_deref(), Some(Path::new("/tmp/models")));
    }

    #[test]
    fn test_output_format_resolution() {
        assert_eq!(
            CliConfigBuilder::output_format(&parse(&["a.jpg", "-o", "out.tiff"])),
            OutputFormat::Tiff
        );
        assert_eq!(
            CliConfigBuilder::output_format(&parse(&["a.jpg", "-o", "out.tiff", "-f", "png"])),
            OutputFormat::Png
        );
        assert_eq!(
            CliConfigBuilder::output_format(&parse(&["a.jpg", "-o", "-"])),
            OutputFormat::Png
        );
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let cli = parse(&["-", "--hard", "1.5"]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_err());
        assert!(CliConfigBuilder::from_cli(&cli).is_err());
    }
}
