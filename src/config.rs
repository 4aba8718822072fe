use anyhow::{Context, Result};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Owner used to namespace storage keys and locations.
    #[serde(default = "default_owner_id")]
    pub owner_id: String,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one sub-directory per bucket.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Prefix of generated signed URLs.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    #[serde(default = "default_signing_secret")]
    pub signing_secret: String,

    #[serde(default = "default_signed_url_ttl_secs")]
    pub signed_url_ttl_secs: u64,
}

impl StorageConfig {
    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }
}

fn default_storage_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("gymlens/storage")
}

fn default_bucket() -> String {
    "training-locations".to_string()
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:54321/storage/v1".to_string()
}

fn default_signing_secret() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn default_signed_url_ttl_secs() -> u64 {
    3600
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            bucket: default_bucket(),
            public_base_url: default_public_base_url(),
            signing_secret: default_signing_secret(),
            signed_url_ttl_secs: default_signed_url_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_width")]
    pub max_width: u32,

    /// JPEG quality (1-100).
    #[serde(default = "default_quality")]
    pub quality: u8,

    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    /// Additional attempts after the first failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,

    /// Backoff before retry `n` is `n * retry_base_ms`.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_max_batch")]
    pub max_batch: usize,

    #[serde(default = "default_max_photos_per_location")]
    pub max_photos_per_location: usize,
}

impl UploadConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }
}

fn default_max_width() -> u32 {
    1200
}

fn default_quality() -> u8 {
    85
}

fn default_max_file_size_mb() -> u64 {
    10
}

fn default_max_retries() -> u8 {
    3
}

fn default_retry_base_ms() -> u64 {
    1000
}

fn default_max_batch() -> usize {
    5
}

fn default_max_photos_per_location() -> usize {
    5
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_width: default_max_width(),
            quality: default_quality(),
            max_file_size_mb: default_max_file_size_mb(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            max_batch: default_max_batch(),
            max_photos_per_location: default_max_photos_per_location(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_detector_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_detector_timeout_secs")]
    pub timeout_secs: u64,

    /// Detections below this confidence are discarded.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,

    /// Send the image bytes as a data URL instead of the signed URL.
    /// Needed when the model cannot reach the storage host.
    #[serde(default = "default_inline_images")]
    pub inline_images: bool,
}

fn default_detector_endpoint() -> String {
    "http://127.0.0.1:1234/v1".to_string()
}

fn default_detector_model() -> String {
    "gemma-3-4b".to_string()
}

fn default_detector_timeout_secs() -> u64 {
    120
}

fn default_min_confidence() -> f32 {
    0.3
}

fn default_inline_images() -> bool {
    true
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_detector_endpoint(),
            model: default_detector_model(),
            api_key: None,
            timeout_secs: default_detector_timeout_secs(),
            min_confidence: default_min_confidence(),
            inline_images: default_inline_images(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Duration over which the header bar climbs to its cap.
    #[serde(default = "default_header_budget_secs")]
    pub header_budget_secs: u64,
}

impl AnalysisConfig {
    /// Ticker period; a zero `tick_ms` falls back to the default.
    pub fn tick(&self) -> Duration {
        if self.tick_ms == 0 {
            tracing::warn!(default_ms = default_tick_ms(), "tick_ms must be positive, using default");
            return Duration::from_millis(default_tick_ms());
        }
        Duration::from_millis(self.tick_ms)
    }

    pub fn header_budget(&self) -> Duration {
        Duration::from_secs(self.header_budget_secs)
    }
}

fn default_tick_ms() -> u64 {
    1000
}

fn default_header_budget_secs() -> u64 {
    120
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            header_budget_secs: default_header_budget_secs(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gymlens")
        .join("gymlens.db")
}

fn default_owner_id() -> String {
    std::env::var("USER").unwrap_or_else(|_| "local".to_string())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            owner_id: default_owner_id(),
            storage: StorageConfig::default(),
            upload: UploadConfig::default(),
            detector: DetectorConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl Config {
    /// Load from `GYMLENS_CONFIG` or the default location, writing defaults
    /// on first run.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var_os("GYMLENS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(Self::config_path);
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Invalid config {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gymlens")
    }

    fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}
