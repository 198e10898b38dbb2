//! Configuration: typed settings with layered precedence (defaults → file → env → CLI).
//!
//! ```toml
//! [server]
//! port = 8080
//! static_dir = "./static"
//! shutdown_grace_secs = 5
//!
//! [logging]
//! level = "info"
//! format = "compact"
//! ```
//!
//! Environment variables use the `MEMOSERVE` prefix and `__` as the section
//! separator, e.g. `MEMOSERVE__SERVER__PORT=9000`.

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const ENV_PREFIX: &str = "MEMOSERVE";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 5;
const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;
const DEFAULT_MAX_REQUEST_BYTES: usize = 8 * 1024 * 1024;
const DEFAULT_STATIC_DIR: &str = "./static";

/// Command-line arguments for the `memoserve` binary.
#[derive(Debug, Default, Parser)]
#[command(name = "memoserve", version, about = "HTTP server with whole-response caching")]
pub struct CliArgs {
    /// Optional path to a TOML configuration file.
    #[arg(long = "config-file", env = "MEMOSERVE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Override the listening port.
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Listener and request-handling settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
    pub max_request_bytes: usize,
    pub static_dir: PathBuf,
    pub tls_cert_file: Option<PathBuf>,
    pub tls_key_file: Option<PathBuf>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            write_timeout_secs: DEFAULT_WRITE_TIMEOUT_SECS,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
            tls_cert_file: None,
            tls_key_file: None,
        }
    }
}

impl ServerSettings {
    /// `host:port` as passed to the listener.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Certificate and key paths, when TLS is configured.
    pub fn tls_files(&self) -> Option<(&PathBuf, &PathBuf)> {
        self.tls_cert_file.as_ref().zip(self.tls_key_file.as_ref())
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Compact,
        }
    }
}

impl LoggingSettings {
    /// The configured level as a filter directive.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unrecognized level name.
    pub fn level_filter(&self) -> Result<LevelFilter, ConfigError> {
        self.level.parse().map_err(|_| {
            ConfigError::invalid("logging.level", format!("unknown level `{}`", self.level))
        })
    }
}

/// Everything the binary needs to start.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Checks the combinations serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = &self.server;
        if server.read_timeout_secs == 0 {
            return Err(ConfigError::invalid("server.read_timeout_secs", "must be positive"));
        }
        if server.write_timeout_secs == 0 {
            return Err(ConfigError::invalid("server.write_timeout_secs", "must be positive"));
        }
        if server.shutdown_grace_secs == 0 {
            return Err(ConfigError::invalid("server.shutdown_grace_secs", "must be positive"));
        }
        if server.max_request_bytes == 0 {
            return Err(ConfigError::invalid("server.max_request_bytes", "must be positive"));
        }
        if server.tls_cert_file.is_some() != server.tls_key_file.is_some() {
            return Err(ConfigError::invalid(
                "server.tls_cert_file",
                "tls_cert_file and tls_key_file must be set together",
            ));
        }
        self.logging.level_filter()?;
        Ok(())
    }

    fn apply_overrides(&mut self, cli: &CliArgs) {
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(level) = cli.log_level.as_ref() {
            self.logging.level = level.clone();
        }
    }
}

/// Loads settings: defaults, then the `--config-file` TOML (if any), then
/// `MEMOSERVE__*` environment variables, then CLI flags.
///
/// # Errors
///
/// Returns [`ConfigError::Build`] if a source cannot be read or deserialized, and
/// [`ConfigError::Invalid`] if the merged settings fail validation.
pub fn load(cli: &CliArgs) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );

    let mut settings: Settings = builder.build()?.try_deserialize()?;
    settings.apply_overrides(cli);
    settings.validate()?;
    Ok(settings)
}
