use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::gateway::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime settings for the scan pipeline.
///
/// Loaded from an optional TOML file; API keys, model names and tile
/// concurrency can then be overridden from the environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub request_timeout_secs: u64,
    pub retry: RetryPolicy,
    /// Tiles scanned at the same time in detailed mode.
    pub tile_concurrency: usize,
    /// Rescan crop padding as a fraction of each image dimension.
    pub rescan_margin: f64,
    /// Where tile images are staged. System temp dir when unset.
    pub temp_dir: Option<PathBuf>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        OcrConfig {
            gemini_api_key: None,
            gemini_model: "gemini-2.0-flash".into(),
            openai_api_key: None,
            openai_model: "gpt-4o".into(),
            request_timeout_secs: 60,
            retry: RetryPolicy::default(),
            tile_concurrency: 3,
            rescan_margin: 0.05,
            temp_dir: None,
        }
    }
}

impl OcrConfig {
    /// Read `path` (or start from defaults), apply environment overrides and
    /// validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|source| ConfigError::Read {
                    path: p.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Overlay values found through `lookup`. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("GEMINI_API_KEY") {
            self.gemini_api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.openai_api_key = Some(v);
        }
        if let Some(v) = get("RYOSHU_GEMINI_MODEL") {
            self.gemini_model = v;
        }
        if let Some(v) = get("RYOSHU_OPENAI_MODEL") {
            self.openai_model = v;
        }
        if let Some(v) = get("RYOSHU_TILE_CONCURRENCY") {
            self.tile_concurrency = v.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "RYOSHU_TILE_CONCURRENCY",
                value: v,
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.tile_concurrency == 0 {
            return Err(ConfigError::Invalid("tile_concurrency must be at least 1".into()));
        }
        if !(0.0..=0.5).contains(&self.rescan_margin) {
            return Err(ConfigError::Invalid(format!(
                "rescan_margin must be within 0.0..=0.5, got {}",
                self.rescan_margin
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
