//! Engine configuration.
//!
//! Every knob has a default, so an empty JSON object is a valid config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for one [`crate::PagePipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Escalation is skipped when any baseline strategy yields more than this.
    pub escalation_threshold: usize,
    /// Upper bound on pages visited by the pagination walk.
    pub max_walk_pages: usize,
    /// Pause after each pagination click.
    pub settle_delay_ms: u64,
    /// Minimum natural width for the position-sorted strategy.
    pub min_position_width: f64,
    /// Shorter URLs found in raw HTML are ignored.
    pub min_html_url_len: usize,
    pub max_attempts: u32,
    /// Linear backoff unit: attempt `n` waits `n * retry_base_delay_ms`.
    pub retry_base_delay_ms: u64,
    /// Watchdog deadline for a single attempt.
    pub attempt_timeout_ms: u64,
    /// Per-image GET timeout.
    pub fetch_timeout_ms: u64,
    /// Images at most this wide *and* at most `logo_max_height` tall are skipped.
    pub logo_max_width: u32,
    pub logo_max_height: u32,
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: 13,
            max_walk_pages: 30,
            settle_delay_ms: 800,
            min_position_width: 200.0,
            min_html_url_len: 25,
            max_attempts: 3,
            retry_base_delay_ms: 1_000,
            attempt_timeout_ms: 90_000,
            fetch_timeout_ms: 15_000,
            logo_max_width: 79,
            logo_max_height: 97,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                         AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/131.0.0.0 Safari/537.36"
                .to_string(),
        }
    }
}

/// Errors raised while loading a config file.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl EngineConfig {
    /// Load a JSON config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` if given, otherwise defaults; then apply env overrides.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override operational knobs from `CHAPTERSCOPE_*` variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        override_from(&lookup, "CHAPTERSCOPE_MAX_ATTEMPTS", &mut self.max_attempts);
        override_from(
            &lookup,
            "CHAPTERSCOPE_ATTEMPT_TIMEOUT_MS",
            &mut self.attempt_timeout_ms,
        );
        override_from(
            &lookup,
            "CHAPTERSCOPE_FETCH_TIMEOUT_MS",
            &mut self.fetch_timeout_ms,
        );
        override_from(
            &lookup,
            "CHAPTERSCOPE_SETTLE_DELAY_MS",
            &mut self.settle_delay_ms,
        );
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

fn override_from<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!("Ignoring {}={:?}: not a valid value", key, raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_object_is_default() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.escalation_threshold, 13);
        assert_eq!(config.max_walk_pages, 30);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_attempts": 5, "settle_delay_ms": 10}}"#).unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.settle_delay(), Duration::from_millis(10));
        assert_eq!(config.logo_max_height, 97);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(
            EngineConfig::load(&missing),
            Err(ConfigError::Io { .. })
        ));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(
            EngineConfig::load(&bad),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        config.apply_env_overrides(|key| match key {
            "CHAPTERSCOPE_MAX_ATTEMPTS" => Some("7".to_string()),
            "CHAPTERSCOPE_FETCH_TIMEOUT_MS" => Some("soon".to_string()),
            _ => None,
        });
        assert_eq!(config.max_attempts, 7);
        assert_eq!(config.fetch_timeout_ms, 15_000);
    }
}
