//! Model retrieval: local model directory, on-disk cache, then download
//!
//! Models are cached in an XDG-compliant directory laid out as
//! `<cache dir>/<cache id>/<model file>`, e.g.
//! `~/.cache/imgly-bgremove-ondevice/models/briaai--RMBG-1.4/onnx/model.onnx`.
//! A cache hit never touches the network.

use crate::{
    config::PipelineConfig,
    error::{BgRemovalError, Result},
    inference::RuntimeFlags,
    models::ModelDescriptor,
};
use chrono::{DateTime, Utc};
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "IMGLY_BGREMOVE_CACHE_DIR";

const MANIFEST_FILE: &str = "manifest.json";

/// Sidecar written next to every downloaded model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheManifest {
    pub model_id: String,
    pub url: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub downloaded_at: DateTime<Utc>,
}

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    #[cfg_attr(not(feature = "cli"), allow(unused_variables))]
    fn new(enabled: bool) -> Self {
        #[cfg(feature = "cli")]
        {
            if enabled {
                let pb = ProgressBar::new(0);
                if let Ok(style) = ProgressStyle::default_bar().template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                ) {
                    pb.set_style(style.progress_chars("#>-"));
                }
                return Self::Indicatif(pb);
            }
        }
        Self::NoOp
    }

    fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {},
        }
    }

    #[cfg_attr(not(feature = "cli"), allow(unused_variables))]
    fn update(&self, downloaded: u64, total: Option<u64>) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => {
                if let Some(total) = total {
                    pb.set_length(total);
                }
                pb.set_position(downloaded);
            },
            Self::NoOp => {},
        }
    }

    fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {},
        }
    }
}

/// Resolves model descriptors to ONNX bytes
#[derive(Debug, Clone)]
pub struct ModelStore {
    cache_dir: PathBuf,
    local_dir: Option<PathBuf>,
    client: Client,
    show_progress: bool,
}

impl ModelStore {
    /// Store rooted at `cache_dir` with no local model directory
    #[must_use]
    pub fn new<P: Into<PathBuf>>(cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            local_dir: None,
            client: Client::new(),
            show_progress: false,
        }
    }

    /// Store configured from the pipeline's cache and local model settings
    ///
    /// # Errors
    /// - No cache directory override and no platform cache directory
    /// - HTTP client creation fails
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let cache_dir = match &config.cache_dir {
            Some(dir) => dir.clone(),
            None => Self::default_cache_dir()?,
        };
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| BgRemovalError::network_error("Failed to create HTTP client", e))?;

        Ok(Self {
            cache_dir,
            local_dir: config.local_model_dir.clone(),
            client,
            show_progress: false,
        })
    }

    /// Default cache root
    ///
    /// `$IMGLY_BGREMOVE_CACHE_DIR/models` when set, else the platform cache
    /// directory (`~/.cache` on Linux, `%LOCALAPPDATA%` on Windows).
    ///
    /// # Errors
    /// - The platform has no cache directory and the override is unset
    pub fn default_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                BgRemovalError::invalid_config(format!(
                    "Failed to determine cache directory. Set {CACHE_DIR_ENV} environment variable."
                ))
            })?
            .join("imgly-bgremove-ondevice")
            .join("models"))
    }

    /// Search `dir` before the cache when the runtime flags allow it
    #[must_use]
    pub fn with_local_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.local_dir = Some(dir.into());
        self
    }

    /// Show a download progress bar (CLI builds only)
    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    #[must_use]
    pub fn local_dir(&self) -> Option<&Path> {
        self.local_dir.as_deref()
    }

    /// Cache location of a descriptor's model file (may not exist)
    #[must_use]
    pub fn cached_model_path(&self, descriptor: &ModelDescriptor) -> PathBuf {
        self.cache_dir
            .join(descriptor.cache_id())
            .join(&descriptor.model_file)
    }

    #[must_use]
    pub fn is_cached(&self, descriptor: &ModelDescriptor) -> bool {
        self.cached_model_path(descriptor).is_file()
    }

    /// Download manifest of a cached model, if one was written
    ///
    /// # Errors
    /// - Manifest exists but cannot be read or parsed
    pub fn manifest(&self, descriptor: &ModelDescriptor) -> Result<Option<CacheManifest>> {
        let path = self.manifest_path(descriptor);
        if !path.is_file() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| BgRemovalError::file_io_error("read manifest", &path, &e))?;
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| BgRemovalError::model(format!("Corrupt manifest {}: {e}", path.display())))
    }

    /// Load the model bytes for `descriptor`
    ///
    /// Search order: local model directory (when `flags.allow_local_models`),
    /// then the cache, then a download into the cache.
    ///
    /// # Errors
    /// - Local model file fails its checksum
    /// - Download or checksum failures
    /// - File system errors
    pub async fn fetch(&self, descriptor: &ModelDescriptor, flags: RuntimeFlags) -> Result<Vec<u8>> {
        if flags.allow_local_models {
            if let Some(local_dir) = &self.local_dir {
                let path = local_dir
                    .join(descriptor.cache_id())
                    .join(&descriptor.model_file);
                if path.is_file() {
                    log::info!("📁 Using local model: {}", path.display());
                    let bytes = read_file(&path).await?;
                    if !checksum_matches(&bytes, descriptor.sha256.as_deref()) {
                        return Err(BgRemovalError::model(format!(
                            "Local model {} failed its SHA-256 check",
                            path.display()
                        )));
                    }
                    return Ok(bytes);
                }
                log::debug!("Local model not found at {}", path.display());
            }
        }

        let cached = self.cached_model_path(descriptor);
        if cached.is_file() {
            let bytes = read_file(&cached).await?;
            if checksum_matches(&bytes, descriptor.sha256.as_deref()) {
                log::info!("💾 Using cached model: {}", cached.display());
                return Ok(bytes);
            }
            log::warn!(
                "Cached model {} failed its SHA-256 check, downloading again",
                cached.display()
            );
        }

        let path = self.download(descriptor).await?;
        read_file(&path).await
    }

    fn manifest_path(&self, descriptor: &ModelDescriptor) -> PathBuf {
        self.cache_dir
            .join(descriptor.cache_id())
            .join(MANIFEST_FILE)
    }

    /// Stream the model into a temp file next to its cache slot, verify, then
    /// move it into place
    async fn download(&self, descriptor: &ModelDescriptor) -> Result<PathBuf> {
        let url = descriptor.download_url();
        let final_path = self.cached_model_path(descriptor);
        log::info!("Downloading model from: {url}");

        let parent = final_path.parent().ok_or_else(|| {
            BgRemovalError::model(format!("Invalid cache path {}", final_path.display()))
        })?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| BgRemovalError::file_io_error("create cache directory", parent, &e))?;

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BgRemovalError::network_error(format!("Failed to download {url}"), e))?;
        if !response.status().is_success() {
            return Err(BgRemovalError::network_error(
                format!("HTTP error {} for {url}", response.status()),
                std::io::Error::new(std::io::ErrorKind::Other, "HTTP error"),
            ));
        }
        let total_size = response.content_length();

        let temp = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(parent)
            .map_err(|e| BgRemovalError::file_io_error("create temp file", parent, &e))?;
        let mut file = tokio::fs::File::from_std(
            temp.reopen()
                .map_err(|e| BgRemovalError::file_io_error("open temp file", temp.path(), &e))?,
        );

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let progress = ProgressIndicator::new(self.show_progress);
        progress.set_message(format!("Downloading {}", descriptor.id));

        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;
        let mut buffer = vec![0; 64 * 1024];
        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| BgRemovalError::network_error("Failed to read download stream", e))?;
            if bytes_read == 0 {
                break;
            }
            let chunk = buffer.get(..bytes_read).unwrap_or(&[]);
            hasher.update(chunk);
            file.write_all(chunk)
                .await
                .map_err(|e| BgRemovalError::file_io_error("write to file", temp.path(), &e))?;
            downloaded += bytes_read as u64;
            progress.update(downloaded, total_size);
        }
        file.flush()
            .await
            .map_err(|e| BgRemovalError::file_io_error("flush file", temp.path(), &e))?;
        drop(file);

        let digest = format!("{:x}", hasher.finalize());
        if let Some(expected) = descriptor.sha256.as_deref() {
            if digest != expected {
                progress.finish_with_message("❌ Download failed".to_string());
                return Err(BgRemovalError::network_error(
                    format!("Integrity check failed for {url}"),
                    format!("expected sha256 {expected}, got {digest}"),
                ));
            }
        }

        temp.persist(&final_path).map_err(|e| {
            BgRemovalError::file_io_error("move downloaded model to cache", &final_path, &e.error)
        })?;

        let manifest = CacheManifest {
            model_id: descriptor.id.clone(),
            url,
            sha256: digest,
            size_bytes: downloaded,
            downloaded_at: Utc::now(),
        };
        self.write_manifest(descriptor, &manifest)?;

        progress.finish_with_message(format!("✅ Downloaded {}", descriptor.id));
        log::info!(
            "Successfully downloaded model {} ({} bytes)",
            descriptor.id,
            downloaded
        );
        Ok(final_path)
    }

    fn write_manifest(&self, descriptor: &ModelDescriptor, manifest: &CacheManifest) -> Result<()> {
        let path = self.manifest_path(descriptor);
        let json = serde_json::to_string_pretty(manifest)
            .map_err(|e| BgRemovalError::model(format!("Failed to serialize manifest: {e}")))?;
        std::fs::write(&path, json)
            .map_err(|e| BgRemovalError::file_io_error("write manifest", &path, &e))
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| BgRemovalError::file_io_error("read model", path, &e))
}

fn checksum_matches(bytes: &[u8], expected: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(expected) => format!("{:x}", Sha256::digest(bytes)) == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackendKind;
    use tempfile::TempDir;

    fn descriptor() -> ModelDescriptor {
        ModelDescriptor::new("acme/tiny-matte", (8, 8), BackendKind::PortableCompute)
    }

    fn place(root: &Path, descriptor: &ModelDescriptor, bytes: &[u8]) -> PathBuf {
        let path = root.join(descriptor.cache_id()).join(&descriptor.model_file);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn flags(allow_local_models: bool) -> RuntimeFlags {
        RuntimeFlags::for_backend(BackendKind::PortableCompute, allow_local_models)
    }

    #[test]
    fn test_disabled_progress_is_silent() {
        let progress = ProgressIndicator::new(false);
        assert!(matches!(progress, ProgressIndicator::NoOp));
        progress.update(512, Some(1024));
        progress.update(1024, None);
        progress.finish_with_message("done".to_string());
    }

    #[test]
    fn test_cached_model_path_layout() {
        let store = ModelStore::new("/cache");
        assert_eq!(
            store.cached_model_path(&descriptor()),
            PathBuf::from("/cache/acme--tiny-matte/onnx/model.onnx")
        );
    }

    #[tokio::test]
    async fn test_cache_hit_returns_bytes() {
        let cache = TempDir::new().unwrap();
        place(cache.path(), &descriptor(), b"cached");
        let store = ModelStore::new(cache.path());

        assert!(store.is_cached(&descriptor()));
        let bytes = store.fetch(&descriptor(), flags(false)).await.unwrap();
        assert_eq!(bytes, b"cached");
    }

    #[tokio::test]
    async fn test_local_dir_preferred_when_allowed() {
        let cache = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        place(cache.path(), &descriptor(), b"cached");
        place(local.path(), &descriptor(), b"local");
        let store = ModelStore::new(cache.path()).with_local_dir(local.path());

        assert_eq!(store.fetch(&descriptor(), flags(true)).await.unwrap(), b"local");
        assert_eq!(store.fetch(&descriptor(), flags(false)).await.unwrap(), b"cached");
    }

    #[tokio::test]
    async fn test_local_checksum_mismatch_is_an_error() {
        let cache = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let descriptor = descriptor().with_sha256("00");
        place(local.path(), &descriptor, b"local");
        let store = ModelStore::new(cache.path()).with_local_dir(local.path());

        let result = store.fetch(&descriptor, flags(true)).await;
        assert!(matches!(result, Err(BgRemovalError::Model(_))));
    }

    #[test]
    fn test_checksum_matches() {
        let digest = format!("{:x}", Sha256::digest(b"abc"));
        assert!(checksum_matches(b"abc", Some(&digest)));
        assert!(!checksum_matches(b"abd", Some(&digest)));
        assert!(checksum_matches(b"anything", None));
    }

    #[test]
    fn test_manifest_round_trip() {
        let cache = TempDir::new().unwrap();
        let store = ModelStore::new(cache.path());
        let descriptor = descriptor();
        assert!(store.manifest(&descriptor).unwrap().is_none());

        std::fs::create_dir_all(cache.path().join(descriptor.cache_id())).unwrap();
        let manifest = CacheManifest {
            model_id: descriptor.id.clone(),
            url: descriptor.download_url(),
            sha256: "ab".to_string(),
            size_bytes: 2,
            downloaded_at: Utc::now(),
        };
        store.write_manifest(&descriptor, &manifest).unwrap();
        assert_eq!(store.manifest(&descriptor).unwrap(), Some(manifest));
    }

    #[test]
    fn test_from_config_uses_overrides() {
        let config = PipelineConfig::builder()
            .cache_dir("/tmp/bgremove-cache")
            .local_model_dir("/tmp/bgremove-local")
            .build()
            .unwrap();
        let store = ModelStore::from_config(&config).unwrap();
        assert_eq!(store.cache_dir(), Path::new("/tmp/bgremove-cache"));
        assert_eq!(store.local_dir(), Some(Path::new("/tmp/bgremove-local")));
    }
}
