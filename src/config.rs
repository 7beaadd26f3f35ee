//! Configuration for the cache server

use crate::protocol::DEFAULT_MAX_MESSAGE_SIZE;
use crate::{RcsError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level preset, overridden by `RUST_LOG`
    pub verbosity: Verbosity,

    /// Number of Tokio worker threads (0 = number of CPUs)
    pub worker_threads: usize,

    pub native: NativeConfig,
    pub http: HttpConfig,
    pub storage: StorageConfig,
}

/// Logging preset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    #[default]
    Prod,
    Dev,
    None,
}

impl Verbosity {
    /// `EnvFilter` directive for this preset
    pub fn filter(self) -> &'static str {
        match self {
            Verbosity::Prod => "info",
            Verbosity::Dev => "debug",
            Verbosity::None => "off",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "prod" => Some(Verbosity::Prod),
            "dev" => Some(Verbosity::Dev),
            "none" => Some(Verbosity::None),
            _ => None,
        }
    }
}

/// Native RCSP interface configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NativeConfig {
    pub activate: bool,
    pub port: u16,

    /// Bind 127.0.0.1 instead of 0.0.0.0
    pub on_localhost: bool,

    pub tls: bool,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,

    /// Largest message accepted in a single read (bytes)
    pub max_message_size: usize,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            activate: true,
            port: 6121,
            on_localhost: true,
            tls: false,
            cert_file: PathBuf::from("cert.pem"),
            key_file: PathBuf::from("key.pem"),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl NativeConfig {
    pub fn listen_addr(&self) -> String {
        listen_addr(self.on_localhost, self.port)
    }
}

/// HTTP/JSON gateway configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub activate: bool,
    pub port: u16,
    pub on_localhost: bool,
    pub tls: bool,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            activate: false,
            port: 6120,
            on_localhost: true,
            tls: false,
            cert_file: PathBuf::from("cert.pem"),
            key_file: PathBuf::from("key.pem"),
        }
    }
}

impl HttpConfig {
    pub fn listen_addr(&self) -> String {
        listen_addr(self.on_localhost, self.port)
    }
}

/// Store configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Active expiry sweep interval in milliseconds (0 = lazy expiry only)
    pub sweep_interval_ms: u64,
}

impl StorageConfig {
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }
}

fn listen_addr(on_localhost: bool, port: u16) -> String {
    let host = if on_localhost { "127.0.0.1" } else { "0.0.0.0" };
    format!("{host}:{port}")
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RcsError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&contents)
            .map_err(|e| RcsError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables or use defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(verbosity) = lookup("RCS_VERBOSITY").and_then(|v| Verbosity::parse(&v)) {
            config.verbosity = verbosity;
        }

        if let Some(port) = lookup("RCS_NATIVE_PORT").and_then(|v| v.parse().ok()) {
            config.native.port = port;
        }

        if let Some(activate) = lookup("RCS_NATIVE_ACTIVATE") {
            config.native.activate = parse_flag(&activate);
        }

        if let Some(port) = lookup("RCS_HTTP_PORT").and_then(|v| v.parse().ok()) {
            config.http.port = port;
        }

        if let Some(activate) = lookup("RCS_HTTP_ACTIVATE") {
            config.http.activate = parse_flag(&activate);
        }

        if let Some(ms) = lookup("RCS_SWEEP_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            config.storage.sweep_interval_ms = ms;
        }

        config
    }

    /// Reject configurations the launcher cannot run
    pub fn validate(&self) -> Result<()> {
        if !self.native.activate && !self.http.activate {
            return Err(RcsError::Config(
                "All interfaces are deactivated".to_string(),
            ));
        }
        if self.native.max_message_size == 0 {
            return Err(RcsError::Config(
                "native.max_message_size must be greater than 0".to_string(),
            ));
        }
        if self.native.activate && self.native.tls {
            check_tls_paths("native", &self.native.cert_file, &self.native.key_file)?;
        }
        if self.http.activate && self.http.tls {
            check_tls_paths("http", &self.http.cert_file, &self.http.key_file)?;
        }
        Ok(())
    }
}

fn check_tls_paths(section: &str, cert_file: &Path, key_file: &Path) -> Result<()> {
    if cert_file.as_os_str().is_empty() || key_file.as_os_str().is_empty() {
        return Err(RcsError::Config(format!(
            "{section}.tls requires both cert_file and key_file"
        )));
    }
    Ok(())
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}
