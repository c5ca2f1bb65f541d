//! Runtime settings and the `lister.toml` config file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lister_model::{PresetSpec, PrunePolicy, SearchMode, SelectionMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default debounce applied to query and filter changes.
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// Default HTTP timeout for transports built from config.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Defaults applied to every session a runtime opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub debounce_ms: u64,
    pub mode: SelectionMode,
    pub search_mode: SearchMode,
    pub prune: PrunePolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            mode: SelectionMode::default(),
            search_mode: SearchMode::default(),
            prune: PrunePolicy::default(),
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Settings for an HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Prefix for relative endpoints.
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub headers: BTreeMap<String, String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            headers: BTreeMap::new(),
        }
    }
}

/// Contents of a lister config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListerConfig {
    pub runtime: RuntimeConfig,
    pub http: HttpConfig,
    pub presets: Vec<PresetSpec>,
}

/// Errors loading a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML config {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to parse JSON config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid preset `{id}`: {message}")]
    InvalidPreset { id: String, message: String },
}

impl ListerConfig {
    /// Parse TOML config text.
    pub fn from_toml_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a `.toml` or `.json` config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if !is_json {
            return Self::from_toml_str(&text, path);
        }
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for preset in &self.presets {
            if preset.id.trim().is_empty() {
                return Err(ConfigError::InvalidPreset {
                    id: preset.id.clone(),
                    message: "id must not be empty".to_string(),
                });
            }
            if preset.endpoint.trim().is_empty() {
                return Err(ConfigError::InvalidPreset {
                    id: preset.id.clone(),
                    message: "endpoint must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}
