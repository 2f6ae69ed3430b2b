use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::io::ConfigError;
use crate::core::transport::TransportOptions;

pub const DEFAULT_BIND: &str = "127.0.0.1:5268";
pub const DEFAULT_UPSTREAM_URL: &str = "http://localhost:8000";
pub const DEFAULT_RELAY_URL: &str = "http://localhost:5268";
pub const DEFAULT_ANALYSIS_URL: &str = "http://localhost:5000";
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_LOG_LEVEL: &str = "info";

const ENV_BIND: &str = "PATIENT_CHAT_BIND";
const ENV_UPSTREAM_URL: &str = "PATIENT_CHAT_UPSTREAM_URL";
const ENV_RELAY_URL: &str = "PATIENT_CHAT_RELAY_URL";
const ENV_ANALYSIS_URL: &str = "PATIENT_CHAT_ANALYSIS_URL";
const ENV_PATIENT_ID: &str = "PATIENT_CHAT_PATIENT_ID";
const ENV_IDLE_TIMEOUT: &str = "PATIENT_CHAT_IDLE_TIMEOUT_SECS";
const ENV_CONNECT_TIMEOUT: &str = "PATIENT_CHAT_CONNECT_TIMEOUT_SECS";
const ENV_LOG: &str = "PATIENT_CHAT_LOG";
const ENV_LOG_JSON: &str = "PATIENT_CHAT_LOG_JSON";
const ENV_CORS_ORIGINS: &str = "PATIENT_CHAT_CORS_ORIGINS";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Address the relay listens on
    pub bind: String,
    /// Base URL of the answer-generation service the relay forwards to
    pub upstream_url: String,
    /// Base URL of the relay, as seen by chat clients
    pub relay_url: String,
    /// Base URL of the analysis and image services
    pub analysis_url: String,
    /// Patient the chat client talks about; a fresh session id is generated
    /// per run when unset on the command line
    pub patient_id: Option<String>,
    pub idle_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Tracing filter directive; `RUST_LOG` takes precedence
    pub log_level: String,
    pub log_json: bool,
    /// Allowed CORS origins for the relay. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            relay_url: DEFAULT_RELAY_URL.to_string(),
            analysis_url: DEFAULT_ANALYSIS_URL.to_string(),
            patient_id: None,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
            cors_origins: Vec::new(),
        }
    }
}

impl Config {
    /// Load from `path` (or the default location), apply environment
    /// overrides, and validate.
    pub fn resolve(path: Option<&Path>) -> Result<Config, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::get_config_path()?,
        };
        let mut config = Self::load_from_path(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from `lookup`, normally the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get(ENV_BIND) {
            self.bind = value;
        }
        if let Some(value) = get(ENV_UPSTREAM_URL) {
            self.upstream_url = value;
        }
        if let Some(value) = get(ENV_RELAY_URL) {
            self.relay_url = value;
        }
        if let Some(value) = get(ENV_ANALYSIS_URL) {
            self.analysis_url = value;
        }
        if let Some(value) = get(ENV_PATIENT_ID) {
            self.patient_id = Some(value);
        }
        if let Some(value) = get(ENV_IDLE_TIMEOUT) {
            self.idle_timeout_secs = parse_value(ENV_IDLE_TIMEOUT, &value)?;
        }
        if let Some(value) = get(ENV_CONNECT_TIMEOUT) {
            self.connect_timeout_secs = parse_value(ENV_CONNECT_TIMEOUT, &value)?;
        }
        if let Some(value) = get(ENV_LOG) {
            self.log_level = value;
        }
        if let Some(value) = get(ENV_LOG_JSON) {
            self.log_json = parse_flag(ENV_LOG_JSON, &value)?;
        }
        if let Some(value) = get(ENV_CORS_ORIGINS) {
            self.cors_origins = value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::invalid("idle_timeout_secs", "must be greater than zero"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "connect_timeout_secs",
                "must be greater than zero",
            ));
        }
        for (key, url) in [
            ("upstream_url", &self.upstream_url),
            ("relay_url", &self.relay_url),
            ("analysis_url", &self.analysis_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::invalid(
                    key,
                    format!("expected an http:// or https:// URL, got {url:?}"),
                ));
            }
        }
        self.bind_addr()?;
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|err| ConfigError::invalid("bind", format!("{err}")))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            connect_timeout: self.connect_timeout(),
            idle_timeout: self.idle_timeout(),
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err: T::Err| ConfigError::invalid(key, format!("{value:?}: {err}")))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::invalid(key, format!("expected a boolean, got {other:?}"))),
    }
}

/// Display a path with the home directory shortened to `~`.
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
