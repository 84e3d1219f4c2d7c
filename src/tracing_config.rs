//! Tracing subscriber setup for the command-line front end
//!
//! The library only emits events and spans; applications decide where they
//! go. `log` records from the runtime backends are bridged into the same
//! subscriber.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output with colors and emojis (default for CLI)
    Console,
    /// Compact console output for CI environments
    Compact,
    /// JSON structured logging
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Stream log lines are written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingOutput {
    /// Keeps stdout free for piped image data (default)
    Stderr,
    Stdout,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level (maps to log levels)
    pub verbosity: u8,
    pub format: TracingFormat,
    pub output: TracingOutput,
    /// Environment filter string (overrides verbosity if set)
    pub env_filter: Option<String>,
    /// Session ID for correlation
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            output: TracingOutput::Stderr,
            env_filter: None,
            session_id: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity level (0-3+)
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    /// Set custom environment filter
    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Set session ID for request correlation
    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Convert verbosity level to tracing filter string
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "warn,imgly_bgremove_ondevice=info", // Default: our progress, others' warnings
            1 => "info,imgly_bgremove_ondevice=debug", // -v: backend selection and timings
            _ => "debug,imgly_bgremove_ondevice=trace", // -vv+: everything
        }
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directive
    /// - A global subscriber is already installed
    pub fn init(self) -> anyhow::Result<()> {
        let filter = if let Some(env_filter) = &self.env_filter {
            EnvFilter::try_new(env_filter)?
        } else {
            EnvFilter::try_new(self.verbosity_to_filter())?
        };

        let registry = Registry::default().with(filter);
        let to_stderr = self.output == TracingOutput::Stderr;

        match self.format {
            TracingFormat::Console => {
                let fmt_layer = fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_level(true)
                    .compact();
                if to_stderr {
                    registry.with(fmt_layer.with_writer(std::io::stderr)).try_init()?;
                } else {
                    registry.with(fmt_layer).try_init()?;
                }
            },

            TracingFormat::Compact => {
                let fmt_layer = fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .compact();
                if to_stderr {
                    registry.with(fmt_layer.with_writer(std::io::stderr)).try_init()?;
                } else {
                    registry.with(fmt_layer).try_init()?;
                }
            },

            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => {
                let fmt_layer = fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true);
                if to_stderr {
                    registry.with(fmt_layer.with_writer(std::io::stderr)).try_init()?;
                } else {
                    registry.with(fmt_layer).try_init()?;
                }
            },
        }

        if let Some(session_id) = &self.session_id {
            tracing::info!(session_id = %session_id, "🚀 Background removal session started");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_mapping() {
        let filter = |v| TracingConfig::new().with_verbosity(v).verbosity_to_filter();
        assert!(filter(0).contains("imgly_bgremove_ondevice=info"));
        assert!(filter(1).contains("imgly_bgremove_ondevice=debug"));
        assert_eq!(filter(2), filter(7));
    }

    #[test]
    fn test_config_builder() {
        let config = TracingConfig::new()
            .with_verbosity(2)
            .with_format(TracingFormat::Compact)
            .with_output(TracingOutput::Stdout)
            .with_session_id("test-session");

        assert_eq!(config.verbosity, 2);
        assert_eq!(config.format, TracingFormat::Compact);
        assert_eq!(config.output, TracingOutput::Stdout);
        assert_eq!(config.session_id.as_deref(), Some("test-session"));
    }

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.verbosity, 0);
        assert_eq!(config.format, TracingFormat::Console);
        assert_eq!(config.output, TracingOutput::Stderr);
        assert!(config.env_filter.is_none());
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let result = TracingConfig::new().with_env_filter("imgly_bgremove_ondevice=loudest").init();
        assert!(result.is_err());
    }
}
