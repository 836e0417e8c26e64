use crate::error::{Result, ScraperError};
use crate::normalize::DedupPolicy;
use crate::retry::RetryPolicy;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Process-wide settings read from `scraper.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub paths: PathSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub user_agent: String,
    pub timeout_seconds: u64,
    /// Pause after every page navigation.
    pub delay_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:108.0) Gecko/20100101 Firefox/108.0"
                .to_string(),
            timeout_seconds: 60,
            delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub sources_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            sources_dir: PathBuf::from("sources"),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ScraperError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Falls back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn source_dir(&self, source: &str) -> PathBuf {
        self.paths.sources_dir.join(source)
    }
}

/// Per-source sidecar configuration (`sources/<source>/config.yaml`).
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "TITLE")]
    pub title: String,
    #[serde(rename = "CREATOR")]
    pub creator: String,
    #[serde(rename = "DESCRIPTION")]
    pub description: String,
    #[serde(rename = "URL", default)]
    pub url: String,
    #[serde(rename = "SOURCE", default)]
    pub source: String,
    #[serde(rename = "RAW_FILE_NAME")]
    pub raw_file_name: String,
    #[serde(rename = "TAGPACK_FILE_NAME")]
    pub tagpack_file_name: String,
    #[serde(rename = "LASTMOD", default)]
    pub lastmod: Option<NaiveDate>,
    #[serde(rename = "LABEL", default)]
    pub label: Option<String>,
    #[serde(rename = "CATEGORY", default)]
    pub category: Option<String>,
    #[serde(rename = "ABUSE", default)]
    pub abuse: Option<String>,
    #[serde(rename = "DEDUP", default)]
    pub dedup: Option<DedupPolicy>,
    #[serde(rename = "SELECTORS", default)]
    pub selectors: serde_json::Value,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl SourceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ScraperError::Config(format!("Failed to read source config '{}': {}", path.display(), e))
        })?;
        let mut config = Self::from_yaml(&content)?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: SourceConfig = serde_yaml::from_str(content)?;
        if config.raw_file_name.trim().is_empty() || config.tagpack_file_name.trim().is_empty() {
            return Err(ScraperError::Config(
                "RAW_FILE_NAME and TAGPACK_FILE_NAME must not be empty".into(),
            ));
        }
        Ok(config)
    }

    pub fn raw_path(&self) -> PathBuf {
        self.base_dir.join(&self.raw_file_name)
    }

    pub fn tagpack_path(&self) -> PathBuf {
        self.base_dir.join(&self.tagpack_file_name)
    }

    /// Site-specific scrape settings; absent keys keep the source's defaults.
    pub fn selectors<T: DeserializeOwned + Default>(&self) -> Result<T> {
        if self.selectors.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.selectors.clone())
            .map_err(|e| ScraperError::Config(format!("Invalid SELECTORS section: {e}")))
    }
}
