use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = ".relay/config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub log_level: String,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

/// Bounds for per-channel conversation history and the idle sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Newest turns retained per channel; older turns are evicted FIFO.
    pub max_history: usize,
    /// Conversations idle longer than this are removed by a sweep pass.
    pub max_age_hours: u64,
    /// Suggested cadence for the caller-driven maintenance sweep.
    pub sweep_interval_minutes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_history: 20,
            max_age_hours: 24,
            sweep_interval_minutes: 30,
        }
    }
}

/// Sliding-window admission control per user. Advisory throttling only;
/// state is in-memory and lost on restart, so this is not a security boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Approximate token budget for assembled model context (chars / 4).
    pub context_window: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            context_window: 4096,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            session: SessionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            context: ContextConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write config at {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize default config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("config has invalid value: {0}")]
    ValidationFailed(String),
}

impl RelayConfig {
    pub fn resolve_path() -> PathBuf {
        if let Ok(path) = env::var("RELAY_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_CONFIG_FILE)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::WriteFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, raw).map_err(|source| ConfigError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    pub fn load_or_create() -> Result<(Self, PathBuf, bool), ConfigError> {
        let path = Self::resolve_path();
        if path.exists() {
            let cfg = Self::load(&path)?;
            return Ok((cfg, path, false));
        }

        let cfg = Self::default();
        cfg.save(&path)?;
        Ok((cfg, path, true))
    }

    /// Limits are validated eagerly at startup rather than checked per call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "log_level cannot be empty".to_string(),
            ));
        }
        if self.session.max_history == 0 {
            return Err(ConfigError::ValidationFailed(
                "session.max_history must be at least 1".to_string(),
            ));
        }
        if self.session.max_age_hours == 0 {
            return Err(ConfigError::ValidationFailed(
                "session.max_age_hours must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::ValidationFailed(
                "rate_limit.max_requests must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.window_seconds == 0 {
            return Err(ConfigError::ValidationFailed(
                "rate_limit.window_seconds must be at least 1".to_string(),
            ));
        }
        if self.context.context_window == 0 {
            return Err(ConfigError::ValidationFailed(
                "context.context_window must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_round_trip_through_toml() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("config.toml");
        let cfg = RelayConfig::default();
        cfg.save(&path).expect("save");
        let loaded = RelayConfig::load(&path).expect("load");
        assert_eq!(loaded.session.max_history, 20);
        assert_eq!(loaded.rate_limit.max_requests, 10);
        assert_eq!(loaded.rate_limit.window_seconds, 60);
        assert_eq!(loaded.context.context_window, 4096);
    }

    #[test]
    fn zero_limits_are_rejected_eagerly() {
        let mut cfg = RelayConfig::default();
        cfg.rate_limit.max_requests = 0;
        let err = cfg.validate().expect_err("should reject");
        assert!(err.to_string().contains("max_requests"));
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "log_level = \"debug\"\n").expect("write");
        let cfg = RelayConfig::load(&path).expect("load");
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.session.max_history, 20);
    }
}
