//! Platform capability probing
//!
//! Backend selection never inspects the environment directly. It receives a
//! [`PlatformProfile`], computed once by [`PlatformProfile::detect`] or built
//! by hand in tests.

use serde::{Deserialize, Serialize};

/// Capabilities that drive backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlatformProfile {
    /// iOS / iPadOS class device. These reliably mis-negotiate the
    /// high-performance GPU path and always use the portable backend.
    pub is_touch_apple_device: bool,
    /// A hardware-accelerated execution provider is usable in this process
    pub has_high_perf_gpu_api: bool,
}

impl PlatformProfile {
    #[must_use]
    pub const fn new(is_touch_apple_device: bool, has_high_perf_gpu_api: bool) -> Self {
        Self {
            is_touch_apple_device,
            has_high_perf_gpu_api,
        }
    }

    /// Probe the running process
    #[must_use]
    pub fn detect() -> Self {
        let profile = Self {
            is_touch_apple_device: is_touch_apple_target(),
            has_high_perf_gpu_api: probe_gpu_api(),
        };
        tracing::debug!(
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH,
            touch_apple = profile.is_touch_apple_device,
            gpu_api = profile.has_high_perf_gpu_api,
            "🔍 Platform profile detected"
        );
        profile
    }
}

fn is_touch_apple_target() -> bool {
    cfg!(any(
        target_os = "ios",
        target_os = "tvos",
        target_os = "watchos",
        target_os = "visionos"
    ))
}

#[cfg(feature = "onnx")]
fn probe_gpu_api() -> bool {
    crate::backends::onnx::OnnxBackend::has_accelerator()
}

#[cfg(not(feature = "onnx"))]
fn probe_gpu_api() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sets_both_flags() {
        let profile = PlatformProfile::new(true, false);
        assert!(profile.is_touch_apple_device);
        assert!(!profile.has_high_perf_gpu_api);
    }

    #[test]
    fn test_detect_matches_target() {
        let profile = PlatformProfile::detect();
        assert_eq!(profile.is_touch_apple_device, is_touch_apple_target());
        #[cfg(not(feature = "onnx"))]
        assert!(!profile.has_high_perf_gpu_api);
    }

    #[test]
    fn test_default_profile_has_no_capabilities() {
        assert_eq!(PlatformProfile::default(), PlatformProfile::new(false, false));
    }
}
