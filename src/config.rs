use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use chrono::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Hours an image stays unused before cleanup may delete it.
    #[serde(default = "default_grace_period_hours")]
    pub grace_period_hours: u32,

    #[serde(default = "default_cleanup_batch_size")]
    pub cleanup_batch_size: usize,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Bearer token the external scheduler sends to the cleanup endpoint.
    pub cron_secret: Option<String>,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Extra CDN hosts whose URLs are always tracked as images.
    #[serde(default)]
    pub cdn_hosts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    pub api_key: Option<String>,

    #[serde(default = "default_folder")]
    pub folder: String,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("blog-images");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("blog.db").to_string_lossy().to_string()
}

fn default_grace_period_hours() -> u32 {
    48
}

fn default_cleanup_batch_size() -> usize {
    100
}

fn default_listen_addr() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_storage_endpoint() -> String {
    "http://localhost:54321/storage/v1".to_string()
}

fn default_bucket() -> String {
    "images".to_string()
}

fn default_folder() -> String {
    "articles".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: default_storage_endpoint(),
            bucket: default_bucket(),
            api_key: None,
            folder: default_folder(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            grace_period_hours: default_grace_period_hours(),
            cleanup_batch_size: default_cleanup_batch_size(),
            listen_addr: default_listen_addr(),
            cron_secret: None,
            storage: StorageConfig::default(),
            cdn_hosts: Vec::new(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Reads the config at `path`, writing the defaults there if it does not exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
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
        let content =
            toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("blog-images")
            .join("config.toml")
    }

    pub fn grace_period(&self) -> Duration {
        Duration::hours(i64::from(self.grace_period_hours))
    }

    fn validate(&self) -> Result<()> {
        if self.cleanup_batch_size == 0 {
            return Err(AppError::Config(
                "cleanup_batch_size must be at least 1".to_string(),
            ));
        }
        if url::Url::parse(&self.storage.endpoint).is_err() {
            return Err(AppError::Config(format!(
                "storage.endpoint is not a valid URL: {}",
                self.storage.endpoint
            )));
        }
        Ok(())
    }
}
