//! Server configuration.
//!
//! Layered as flag > env > TOML file (`-c`) > default. An empty
//! `FILE_STORAGE_PATH` or `DATABASE_DSN` disables that backend.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use clap::builder::BoolishValueParser;
use serde::Deserialize;

use tally_core::{LogFormat, duration};

const DEFAULT_ADDRESS: &str = "localhost:8080";
const DEFAULT_FILE_STORAGE_PATH: &str = "/tmp/metrics-db.json";
const DEFAULT_STORE_INTERVAL: Duration = Duration::from_secs(300);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// tallyd: accept metric updates and serve current values.
#[derive(Parser, Debug, Default)]
#[command(name = "tallyd", version, about)]
pub struct Cli {
    /// Listen address (host:port, or :port for all interfaces)
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// Postgres connection string; empty disables the database backend
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,

    /// Snapshot file; empty disables the file backend
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    pub file_storage_path: Option<String>,

    /// Snapshot period (e.g. 300, 30s); 0 snapshots after every update
    #[arg(short = 'i', long, env = "STORE_INTERVAL", value_parser = duration::duration_arg)]
    pub store_interval: Option<Duration>,

    /// Restore persisted state on startup
    #[arg(
        short = 'r',
        long,
        env = "RESTORE",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub restore: Option<bool>,

    /// TOML config file with the same keys
    #[arg(short = 'c', long, env = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Deadline for each request
    #[arg(long, env = "REQUEST_TIMEOUT", value_parser = duration::duration_arg)]
    pub request_timeout: Option<Duration>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,
}

/// The `-c` file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub address: Option<String>,
    pub database_dsn: Option<String>,
    pub file_storage_path: Option<String>,
    #[serde(deserialize_with = "duration::deserialize_opt")]
    pub store_interval: Option<Duration>,
    pub restore: Option<bool>,
    #[serde(deserialize_with = "duration::deserialize_opt")]
    pub request_timeout: Option<Duration>,
    pub log_format: Option<LogFormat>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config file {}", path.display()))
    }
}

/// Fully resolved server settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub address: String,
    pub database_dsn: Option<String>,
    pub file_storage_path: Option<PathBuf>,
    /// Zero means synchronous snapshots.
    pub store_interval: Duration,
    pub restore: bool,
    pub request_timeout: Duration,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            database_dsn: None,
            file_storage_path: Some(PathBuf::from(DEFAULT_FILE_STORAGE_PATH)),
            store_interval: DEFAULT_STORE_INTERVAL,
            restore: true,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            log_format: LogFormat::Text,
        }
    }
}

impl ServerConfig {
    pub fn resolve(cli: Cli) -> anyhow::Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(cli, file)
    }

    fn merge(cli: Cli, file: FileConfig) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let address = cli
            .address
            .or(file.address)
            .unwrap_or(defaults.address);
        let config = Self {
            address: listen_address(&address),
            database_dsn: non_empty(cli.database_dsn.or(file.database_dsn)),
            file_storage_path: match cli.file_storage_path.or(file.file_storage_path) {
                Some(path) => non_empty(Some(path)).map(PathBuf::from),
                None => defaults.file_storage_path,
            },
            store_interval: cli
                .store_interval
                .or(file.store_interval)
                .unwrap_or(defaults.store_interval),
            restore: cli.restore.or(file.restore).unwrap_or(defaults.restore),
            request_timeout: cli
                .request_timeout
                .or(file.request_timeout)
                .unwrap_or(defaults.request_timeout),
            log_format: cli.log_format.or(file.log_format).unwrap_or(defaults.log_format),
        };
        if config.request_timeout.is_zero() {
            bail!("request timeout must be positive");
        }
        Ok(config)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `:8080` binds every interface.
fn listen_address(address: &str) -> String {
    let addr = address.trim();
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}
