use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub diagnostic: DiagnosticConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollConfig {
    #[serde(default = "default_interval", with = "duration_str")]
    pub interval: Duration,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default)]
    pub start_paused: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_url")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiagnosticConfig {
    #[serde(default = "default_diagnostic_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_diagnostic_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_diagnostic_title")]
    pub title: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_enabled")]
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            poll: PollConfig::default(),
            source: SourceConfig::default(),
            diagnostic: DiagnosticConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            history_capacity: default_history_capacity(),
            start_paused: false,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_source_url(),
        }
    }
}

impl Default for DiagnosticConfig {
    fn default() -> Self {
        Self {
            endpoint: default_diagnostic_endpoint(),
            model: default_diagnostic_model(),
            api_key_env: default_api_key_env(),
            api_key: None,
            title: default_diagnostic_title(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: default_agent_enabled(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }

        validate_poll(&self.poll)?;
        validate_source(&self.source)?;
        validate_diagnostic(&self.diagnostic)?;

        Ok(())
    }

    /// API key for the diagnostic endpoint: the named environment variable
    /// first, then the config value. An empty key is allowed; the call is
    /// still attempted and the service decides.
    pub fn diagnostic_api_key(&self) -> String {
        resolve_from_env(&self.diagnostic.api_key_env)
            .or_else(|| {
                self.diagnostic
                    .api_key
                    .as_ref()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            })
            .unwrap_or_default()
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_poll(cfg: &PollConfig) -> Result<(), ConfigError> {
    if cfg.interval < Duration::from_millis(100) {
        return Err(ConfigError::Validation(
            "poll.interval must be >= 100ms".to_string(),
        ));
    }
    if cfg.history_capacity < 1 {
        return Err(ConfigError::Validation(
            "poll.history_capacity must be >= 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_source(cfg: &SourceConfig) -> Result<(), ConfigError> {
    if !is_http_url(&cfg.url) {
        return Err(ConfigError::Validation(format!(
            "source.url '{}' must be an http(s) URL",
            cfg.url
        )));
    }
    Ok(())
}

fn validate_diagnostic(cfg: &DiagnosticConfig) -> Result<(), ConfigError> {
    if !is_http_url(&cfg.endpoint) {
        return Err(ConfigError::Validation(format!(
            "diagnostic.endpoint '{}' must be an http(s) URL",
            cfg.endpoint
        )));
    }
    if cfg.model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "diagnostic.model must not be empty".to_string(),
        ));
    }
    if cfg.title.trim().is_empty() {
        return Err(ConfigError::Validation(
            "diagnostic.title must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn is_http_url(raw: &str) -> bool {
    reqwest::Url::parse(raw.trim())
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

fn resolve_from_env(env_name: &str) -> Option<String> {
    if let Ok(v) = std::env::var(env_name) {
        if !v.trim().is_empty() {
            return Some(v);
        }
    }
    None
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

fn default_listen() -> String {
    "127.0.0.1:9108".to_string()
}

const fn default_interval() -> Duration {
    Duration::from_millis(1000)
}

const fn default_history_capacity() -> usize {
    crate::history::MAX_HISTORY
}

fn default_source_url() -> String {
    "http://localhost:5000/api/metrics".to_string()
}

fn default_diagnostic_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_diagnostic_model() -> String {
    "gemini-2.5-flash-preview-09-2025".to_string()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_diagnostic_title() -> String {
    "System Diagnostics".to_string()
}

const fn default_agent_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().expect("defaults must validate");
        assert_eq!(cfg.poll.interval, Duration::from_secs(1));
        assert_eq!(cfg.poll.history_capacity, 30);
        assert_eq!(cfg.source.url, "http://localhost:5000/api/metrics");
    }

    #[test]
    fn example_yaml_parses_to_defaults() {
        let cfg: Config = serde_yaml::from_str(Config::example_yaml()).expect("example parses");
        cfg.validate().expect("example validates");
        assert_eq!(cfg.listen, Config::default().listen);
        assert_eq!(cfg.poll.interval, default_interval());
        assert_eq!(cfg.diagnostic.model, default_diagnostic_model());
        assert!(cfg.agent.enabled);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let cfg: Config = serde_yaml::from_str("poll:\n  interval: 250ms\n").unwrap();
        assert_eq!(cfg.poll.interval, Duration::from_millis(250));
        assert_eq!(cfg.poll.history_capacity, 30);
        assert_eq!(cfg.diagnostic.title, "System Diagnostics");
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.poll.interval = Duration::from_millis(10);
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.poll.history_capacity = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.listen = "nowhere".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.source.url = "localhost:5000".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.diagnostic.model = " ".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_interval_string_is_a_parse_error() {
        assert!(serde_yaml::from_str::<Config>("poll:\n  interval: soon\n").is_err());
    }

    #[test]
    fn api_key_may_be_empty() {
        let mut cfg = Config::default();
        cfg.diagnostic.api_key_env = "SYSDASH_MISSING_KEY_ENV_12345".to_string();
        std::env::remove_var("SYSDASH_MISSING_KEY_ENV_12345");
        assert_eq!(cfg.diagnostic_api_key(), "");

        cfg.diagnostic.api_key = Some(" from-config ".to_string());
        assert_eq!(cfg.diagnostic_api_key(), "from-config");
    }
}
