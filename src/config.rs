//! Static configuration provided by the host process

use crate::models::RequestIdentity;
use crate::routing::{OriginPattern, PatternError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid url {value:?}: {source}")]
    InvalidUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Directory holding both stores and, in release builds, the logs
    pub storage_path: PathBuf,
    /// Build/version identifier; a new value installs a new generation
    pub version: String,
    pub cache_prefix: String,
    /// Origin that relative manifest and fallback URLs resolve against
    pub app_origin: String,
    /// URLs that must be present in a newly installed generation, in order
    pub manifest: Vec<String>,
    /// Origin pattern of the structured API
    pub api_origin: String,
    pub navigation_fallback: String,
    pub generic_fallback: Option<String>,
    pub fetch_timeout_ms: u64,
    pub bind_address: String,
    pub port: u16,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("./offline_cache_data"),
            version: env!("CARGO_PKG_VERSION").to_string(),
            cache_prefix: "offline-cache".to_string(),
            app_origin: "http://127.0.0.1:8080".to_string(),
            manifest: vec!["/".to_string(), "/offline.html".to_string()],
            api_origin: "http://127.0.0.1:3000".to_string(),
            navigation_fallback: "/offline.html".to_string(),
            generic_fallback: None,
            fetch_timeout_ms: 10_000,
            bind_address: "127.0.0.1".to_string(),
            port: 9191,
        }
    }
}

impl OfflineConfig {
    /// Load and validate a JSON config file. Missing fields take defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version.trim().is_empty() {
            return Err(ConfigError::Invalid("version must not be empty".into()));
        }
        if self.cache_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("cache_prefix must not be empty".into()));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(ConfigError::Invalid("fetch_timeout_ms must be positive".into()));
        }
        self.api_origin_pattern()?;
        self.manifest_urls()?;
        self.navigation_fallback_key()?;
        self.generic_fallback_key()?;
        Ok(())
    }

    /// Generation name derived from the build identifier
    pub fn generation_name(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.version)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn api_origin_pattern(&self) -> Result<OriginPattern, ConfigError> {
        Ok(OriginPattern::parse(&self.api_origin)?)
    }

    /// Resolve an absolute or origin-relative URL
    pub fn resolve_url(&self, value: &str) -> Result<Url, ConfigError> {
        let invalid = |source| ConfigError::InvalidUrl {
            value: value.to_string(),
            source,
        };
        match Url::parse(value) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = Url::parse(&self.app_origin).map_err(|source| {
                    ConfigError::InvalidUrl {
                        value: self.app_origin.clone(),
                        source,
                    }
                })?;
                base.join(value).map_err(invalid)
            }
            Err(source) => Err(invalid(source)),
        }
    }

    pub fn manifest_urls(&self) -> Result<Vec<Url>, ConfigError> {
        self.manifest.iter().map(|u| self.resolve_url(u)).collect()
    }

    pub fn navigation_fallback_key(&self) -> Result<RequestIdentity, ConfigError> {
        Ok(RequestIdentity::get(&self.resolve_url(&self.navigation_fallback)?))
    }

    pub fn generic_fallback_key(&self) -> Result<Option<RequestIdentity>, ConfigError> {
        self.generic_fallback
            .as_deref()
            .map(|u| Ok(RequestIdentity::get(&self.resolve_url(u)?)))
            .transpose()
    }
}
