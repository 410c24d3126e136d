//! Server configuration.
//!
//! Configuration is built once at startup and handed to the components that
//! need it. Sources, lowest precedence first:
//!
//! 1. Built-in defaults (`Config::default()`)
//! 2. An optional TOML file (`Config::load`). A missing or empty file yields defaults.
//! 3. Environment variables (`Config::apply_env`): `DATABASE_URL`,
//!    `FEED_HTTP_TIMEOUT`, `USER_AGENT`, `ALLOW_ORIGIN`, `BIND_ADDR`,
//!    `EXTRACT_FULL_CONTENT`, `ALLOW_PRIVATE_HOSTS`.
//!
//! `Config::validate` must pass before the configuration is used.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds the size cap.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A value is present but outside its allowed range or format.
    #[error("Invalid configuration value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level server configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite connection string (`sqlite:path?mode=rwc`) or a bare file path.
    pub database_url: String,

    /// Timeout for outbound feed and article requests, in seconds. Must be in [1, 120].
    pub feed_http_timeout: f64,

    /// `User-Agent` sent with every outbound request.
    pub user_agent: String,

    /// Allowed CORS origin. `"*"` allows any origin, `None` disables the CORS layer.
    pub allow_origin: Option<String>,

    /// Address the HTTP server binds to.
    pub bind_addr: String,

    /// Fetch and store full article text for newly seen episodes during refresh.
    pub extract_full_content: bool,

    /// Allow article extraction to reach loopback and private network hosts.
    pub allow_private_hosts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:rss.sqlite3?mode=rwc".to_string(),
            feed_http_timeout: Self::DEFAULT_TIMEOUT_SECS,
            user_agent: "RSSPodcaster/1.0 (+https://example.com; contact=admin@example.com)"
                .to_string(),
            allow_origin: Some("*".to_string()),
            bind_addr: "0.0.0.0:8000".to_string(),
            extract_full_content: false,
            allow_private_hosts: false,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    pub const DEFAULT_TIMEOUT_SECS: f64 = 20.0;
    pub const MIN_TIMEOUT_SECS: f64 = 1.0;
    pub const MAX_TIMEOUT_SECS: f64 = 120.0;

    const KNOWN_KEYS: [&'static str; 7] = [
        "database_url",
        "feed_http_timeout",
        "user_agent",
        "allow_origin",
        "bind_addr",
        "extract_full_content",
        "allow_private_hosts",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    ///
    /// Split out from [`Config::apply_env`] so tests don't have to mutate the
    /// process environment.
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(raw) = lookup("FEED_HTTP_TIMEOUT") {
            self.feed_http_timeout =
                raw.trim()
                    .parse::<f64>()
                    .map_err(|e| ConfigError::Invalid {
                        key: "FEED_HTTP_TIMEOUT",
                        reason: e.to_string(),
                    })?;
        }
        if let Some(agent) = lookup("USER_AGENT") {
            self.user_agent = agent;
        }
        if let Some(origin) = lookup("ALLOW_ORIGIN") {
            let origin = origin.trim();
            self.allow_origin = if origin.is_empty() {
                None
            } else {
                Some(origin.to_string())
            };
        }
        if let Some(addr) = lookup("BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(raw) = lookup("EXTRACT_FULL_CONTENT") {
            self.extract_full_content = parse_bool("EXTRACT_FULL_CONTENT", &raw)?;
        }
        if let Some(raw) = lookup("ALLOW_PRIVATE_HOSTS") {
            self.allow_private_hosts = parse_bool("ALLOW_PRIVATE_HOSTS", &raw)?;
        }
        Ok(())
    }

    /// Check value ranges. Called once after all sources are applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeout = self.feed_http_timeout;
        if !timeout.is_finite()
            || !(Self::MIN_TIMEOUT_SECS..=Self::MAX_TIMEOUT_SECS).contains(&timeout)
        {
            return Err(ConfigError::Invalid {
                key: "feed_http_timeout",
                reason: format!(
                    "{} is outside [{}, {}] seconds",
                    timeout,
                    Self::MIN_TIMEOUT_SECS,
                    Self::MAX_TIMEOUT_SECS
                ),
            });
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "user_agent",
                reason: "must not be empty".to_string(),
            });
        }
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "database_url",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// The outbound request timeout as a [`Duration`].
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.feed_http_timeout)
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::Invalid {
            key,
            reason: format!("expected a boolean, got {:?}", other),
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.feed_http_timeout, 20.0);
        assert_eq!(config.allow_origin.as_deref(), Some("*"));
        assert!(!config.extract_full_content);
        assert!(!config.allow_private_hosts);
        assert!(config.validate().is_ok());
        assert_eq!(config.http_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/rsscast_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8000");
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let dir = std::env::temp_dir().join("rsscast_config_test_partial");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "feed_http_timeout = 45.5\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.feed_http_timeout, 45.5);
        assert_eq!(config.database_url, "sqlite:rss.sqlite3?mode=rwc");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = std::env::temp_dir().join("rsscast_config_test_invalid");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "this is not [valid toml").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("rsscast_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_vars(vars(&[
                ("DATABASE_URL", "sqlite::memory:"),
                ("FEED_HTTP_TIMEOUT", "5"),
                ("USER_AGENT", "TestAgent/2.0"),
                ("ALLOW_ORIGIN", "https://app.example.com"),
                ("EXTRACT_FULL_CONTENT", "true"),
            ]))
            .unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.feed_http_timeout, 5.0);
        assert_eq!(config.user_agent, "TestAgent/2.0");
        assert_eq!(
            config.allow_origin.as_deref(),
            Some("https://app.example.com")
        );
        assert!(config.extract_full_content);
    }

    #[test]
    fn test_empty_origin_disables_cors() {
        let mut config = Config::default();
        config.apply_vars(vars(&[("ALLOW_ORIGIN", "")])).unwrap();
        assert!(config.allow_origin.is_none());
    }

    #[test]
    fn test_non_numeric_timeout_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_vars(vars(&[("FEED_HTTP_TIMEOUT", "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "FEED_HTTP_TIMEOUT",
                ..
            }
        ));
    }

    #[test]
    fn test_timeout_bounds() {
        let mut config = Config::default();

        config.feed_http_timeout = 1.0;
        assert!(config.validate().is_ok());
        config.feed_http_timeout = 120.0;
        assert!(config.validate().is_ok());

        config.feed_http_timeout = 0.5;
        assert!(config.validate().is_err());
        config.feed_http_timeout = 121.0;
        assert!(config.validate().is_err());
        config.feed_http_timeout = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_bool_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_vars(vars(&[("ALLOW_PRIVATE_HOSTS", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("ALLOW_PRIVATE_HOSTS"));
    }
}
