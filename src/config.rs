//! Configuration types for the background removal pipeline

use crate::{
    error::{BgRemovalError, Result},
    models::BackendKind,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default deadline for backend selection, including model downloads
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default cutoff for [`AlphaPolicy::Hard`]
pub const DEFAULT_HARD_THRESHOLD: f32 = 0.5;

/// How mask values become alpha bytes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlphaPolicy {
    /// `alpha = round(mask * 255)`, halves round away from zero (0.5 maps to 128)
    Soft,
    /// `alpha = 255` if `mask >= threshold`, else 0
    Hard { threshold: f32 },
}

impl AlphaPolicy {
    /// Binary cutout at the default 0.5 threshold
    #[must_use]
    pub fn hard() -> Self {
        Self::Hard {
            threshold: DEFAULT_HARD_THRESHOLD,
        }
    }

    /// Alpha byte for one mask value
    #[must_use]
    #[inline]
    pub fn alpha(self, mask: f32) -> u8 {
        let mask = if mask.is_nan() { 0.0 } else { mask };
        match self {
            Self::Soft => (mask.clamp(0.0, 1.0) * 255.0).round() as u8,
            Self::Hard { threshold } => {
                if mask >= threshold {
                    255
                } else {
                    0
                }
            },
        }
    }
}

impl Default for AlphaPolicy {
    fn default() -> Self {
        // Soft edges suit matting models best
        Self::Soft
    }
}

impl std::fmt::Display for AlphaPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Soft => write!(f, "soft"),
            Self::Hard { threshold } => write!(f, "hard({threshold})"),
        }
    }
}

/// Configuration fixed when a pipeline is constructed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Compositing policy
    pub alpha_policy: AlphaPolicy,

    /// Skip capability-based selection and prefer this backend
    pub forced_backend: Option<BackendKind>,

    /// Deadline for `initialize()`, `None` waits indefinitely
    pub init_timeout: Option<Duration>,

    /// Search `local_model_dir` before the cache and the network
    pub allow_local_models: bool,

    /// Directory laid out as `<cache id>/<model file>`
    pub local_model_dir: Option<PathBuf>,

    /// Override for the model cache location
    pub cache_dir: Option<PathBuf>,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            alpha_policy: AlphaPolicy::default(),
            forced_backend: None,
            init_timeout: Some(DEFAULT_INIT_TIMEOUT),
            allow_local_models: false,
            local_model_dir: None,
            cache_dir: None,
            intra_threads: 0,
            inter_threads: 0,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    ///
    /// ```rust
    /// use imgly_bgremove_ondevice::{AlphaPolicy, BackendKind, PipelineConfig};
    ///
    /// let config = PipelineConfig::builder()
    ///     .alpha_policy(AlphaPolicy::hard())
    ///     .forced_backend(BackendKind::PortableCompute)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.forced_backend, Some(BackendKind::PortableCompute));
    /// ```
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Hard threshold outside `0.0..=1.0` or not finite
    /// - Zero init timeout
    /// - Local models allowed without a local model directory
    pub fn validate(&self) -> Result<()> {
        if let AlphaPolicy::Hard { threshold } = self.alpha_policy {
            if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
                return Err(BgRemovalError::config_value_error(
                    "hard alpha threshold",
                    threshold,
                    "0.0-1.0",
                ));
            }
        }

        if self.init_timeout == Some(Duration::ZERO) {
            return Err(BgRemovalError::invalid_config(
                "init timeout must be greater than zero (use None to disable)",
            ));
        }

        if self.allow_local_models && self.local_model_dir.is_none() {
            return Err(BgRemovalError::invalid_config(
                "allow_local_models requires local_model_dir",
            ));
        }

        Ok(())
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    #[must_use]
    pub fn alpha_policy(mut self, policy: AlphaPolicy) -> Self {
        self.config.alpha_policy = policy;
        self
    }

    #[must_use]
    pub fn forced_backend(mut self, backend: BackendKind) -> Self {
        self.config.forced_backend = Some(backend);
        self
    }

    #[must_use]
    pub fn init_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.init_timeout = timeout;
        self
    }

    /// Enable the local model search path rooted at `dir`
    #[must_use]
    pub fn local_model_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.local_model_dir = Some(dir.into());
        self.config.allow_local_models = true;
        self
    }

    #[must_use]
    pub fn cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Any rule checked by [`PipelineConfig::validate`]
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_alpha_endpoints_and_midpoint() {
        let policy = AlphaPolicy::Soft;
        assert_eq!(policy.alpha(0.0), 0);
        assert_eq!(policy.alpha(1.0), 255);
        // 127.5 rounds away from zero
        assert_eq!(policy.alpha(0.5), 128);
        assert_eq!(policy.alpha(-0.2), 0);
        assert_eq!(policy.alpha(1.7), 255);
        assert_eq!(policy.alpha(f32::NAN), 0);
    }

    #[test]
    fn test_hard_alpha_threshold() {
        let policy = AlphaPolicy::hard();
        assert_eq!(policy.alpha(0.5), 255);
        assert_eq!(policy.alpha(0.4999), 0);
        assert_eq!(policy.alpha(1.0), 255);
        assert_eq!(policy.alpha(0.0), 0);

        let strict = AlphaPolicy::Hard { threshold: 0.9 };
        assert_eq!(strict.alpha(0.8), 0);
        assert_eq!(strict.alpha(0.95), 255);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.alpha_policy, AlphaPolicy::Soft);
        assert_eq!(config.init_timeout, Some(DEFAULT_INIT_TIMEOUT));
        assert!(!config.allow_local_models);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let result = PipelineConfig::builder()
            .alpha_policy(AlphaPolicy::Hard { threshold: 1.5 })
            .build();
        let message = result.unwrap_err().to_string();
        assert!(message.contains("hard alpha threshold"));
        assert!(message.contains("1.5"));

        let nan = PipelineConfig::builder()
            .alpha_policy(AlphaPolicy::Hard {
                threshold: f32::NAN,
            })
            .build();
        assert!(nan.is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = PipelineConfig::builder()
            .init_timeout(Some(Duration::ZERO))
            .build();
        assert!(result.is_err());

        let no_deadline = PipelineConfig::builder().init_timeout(None).build().unwrap();
        assert!(no_deadline.init_timeout.is_none());
    }

    #[test]
    fn test_local_models_require_directory() {
        let mut config = PipelineConfig::default();
        config.allow_local_models = true;
        assert!(config.validate().is_err());

        let config = PipelineConfig::builder()
            .local_model_dir("/opt/models")
            .build()
            .unwrap();
        assert!(config.allow_local_models);
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = PipelineConfig::builder()
            .alpha_policy(AlphaPolicy::hard())
            .forced_backend(BackendKind::HighPerfGpu)
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
