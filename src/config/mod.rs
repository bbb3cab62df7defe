//! Configuration management

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Tunnel connection settings
    pub tunnel: Option<TunnelConfig>,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Read a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let raw = std::fs::read_to_string(path).map_err(|e| config_error("read", e))?;
        toml::from_str(&raw).map_err(|e| config_error("parse", e))
    }

    /// Render the configuration as pretty-printed TOML and write it out.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), crate::Error> {
        let rendered = toml::to_string_pretty(self).map_err(|e| config_error("render", e))?;
        std::fs::write(path, rendered).map_err(|e| config_error("write", e))
    }
}

fn config_error(action: &str, err: impl fmt::Display) -> crate::Error {
    crate::Error::Config(format!("could not {action} configuration: {err}"))
}

/// Tunnel connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Local proxy listen port (`"1080"`, `":1080"` or a full `host:port`)
    pub local_port: String,
    /// Tunnel server address (`host:port`)
    pub server: String,
    /// Shared password; doubles as the session key material
    pub password: String,
    /// Local proxy flavor
    #[serde(default)]
    pub proxy_type: ProxyType,
}

/// Local proxy flavor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    #[default]
    Socks5,
    Http,
}

impl ProxyType {
    /// Anything that is not `http` runs the SOCKS5 proxy.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("http") {
            ProxyType::Http
        } else {
            ProxyType::Socks5
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyType::Socks5 => write!(f, "socks5"),
            ProxyType::Http => write!(f, "http"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
