//! Configuration for the presence agent.
//!
//! Values come from `<config_dir>/apc-agent/config.json` when present, then
//! `APC_*` environment variables, then command-line flags.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the control surface binds to
    pub bind: String,

    /// Bearer token required on every route except `/health`
    pub pairing_token: Option<String>,

    /// Origins allowed to call the API; empty echoes the caller's origin
    pub allowed_origins: Vec<String>,

    /// Run without a platform even when one is available
    pub cloud_mode: bool,

    /// Presence engine tuning
    pub engine: EngineConfig,

    /// Interval between live status pushes, at least one second
    #[serde(with = "duration_secs_nonzero", rename = "status_interval_secs")]
    pub status_interval: Duration,

    /// Maximum retained log entries; unset keeps everything
    pub log_capacity: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            pairing_token: None,
            allowed_origins: Vec::new(),
            cloud_mode: false,
            engine: EngineConfig::default(),
            status_interval: Duration::from_secs(2),
            log_capacity: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file()?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load the configuration file alone, falling back to defaults.
    pub fn load_file() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            Self::from_json(&content)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration JSON; missing fields take their defaults.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(config_path)
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("apc-agent")
            .join("config.json")
    }

    /// Apply `APC_*` overrides read through `var`.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = var("APC_BIND").filter(|v| !v.trim().is_empty()) {
            self.bind = bind.trim().to_string();
        }
        if let Some(token) = var("APC_PAIRING_TOKEN") {
            self.pairing_token = Some(token);
        }
        if let Some(cloud) = var("APC_CLOUD_MODE") {
            self.cloud_mode = cloud.trim() == "true";
        }
        if let Some(origins) = var("APC_ALLOWED_ORIGINS") {
            self.allowed_origins = parse_origins(&origins);
        }
    }

    /// Configured token, trimmed; blank tokens mean open access.
    pub fn token(&self) -> Option<String> {
        self.pairing_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

/// Timing and thresholds for the presence loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Loop period
    #[serde(with = "duration_millis", rename = "tick_ms")]
    pub tick: Duration,
    /// Manhattan distance between two reads that counts as user activity
    pub activity_threshold: i32,
    /// How long generation stays suppressed after user activity
    #[serde(with = "duration_secs", rename = "pause_secs")]
    pub pause_window: Duration,
    /// Bound for each displacement component
    pub max_step: i32,
    /// Step used when both sampled components are zero (absolute value, at least one)
    pub fallback_step: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(500),
            activity_threshold: 80,
            pause_window: Duration::from_secs(15),
            max_step: 100,
            fallback_step: 20,
        }
    }
}

/// Split a comma-separated origin list.
pub fn parse_origins(s: &str) -> Vec<String> {
    s.split(',')
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect()
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde support for a non-zero Duration as whole seconds; zero reads as one.
mod duration_secs_nonzero {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub use super::duration_secs::serialize;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs.max(1)))
    }
}

/// Serde support for Duration as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bind, "127.0.0.1:8787");
        assert_eq!(config.engine.tick, Duration::from_millis(500));
        assert_eq!(config.engine.activity_threshold, 80);
        assert_eq!(config.engine.pause_window, Duration::from_secs(15));
        assert_eq!(config.status_interval, Duration::from_secs(2));
        assert!(config.token().is_none());
        assert!(!config.cloud_mode);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = Config::from_json(r#"{"cloud_mode": true, "engine": {"tick_ms": 250}}"#)
            .unwrap();
        assert!(config.cloud_mode);
        assert_eq!(config.engine.tick, Duration::from_millis(250));
        assert_eq!(config.engine.max_step, 100);
        assert_eq!(config.bind, "127.0.0.1:8787");
    }

    #[test]
    fn test_zero_status_interval_is_clamped() {
        let config = Config::from_json(r#"{"status_interval_secs": 0}"#).unwrap();
        assert_eq!(config.status_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            Config::from_json("{not json"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("APC_BIND", "0.0.0.0:9000"),
            ("APC_PAIRING_TOKEN", "  secret "),
            ("APC_CLOUD_MODE", "true"),
            ("APC_ALLOWED_ORIGINS", "https://a.app, https://b.app,,"),
        ]);
        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.token().as_deref(), Some("secret"));
        assert!(config.cloud_mode);
        assert_eq!(config.allowed_origins, ["https://a.app", "https://b.app"]);
    }

    #[test]
    fn test_blank_token_means_open() {
        let config = Config {
            pairing_token: Some("   ".into()),
            ..Config::default()
        };
        assert!(config.token().is_none());
    }

    #[test]
    fn test_round_trip_keeps_engine_units() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["engine"]["tick_ms"], 500);
        assert_eq!(json["engine"]["pause_secs"], 15);
        assert_eq!(json["status_interval_secs"], 2);
    }
}
