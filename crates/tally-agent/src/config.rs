//! Agent configuration.
//!
//! Layered as flag > env > TOML file (`-c`) > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use serde::Deserialize;

use tally_core::{LogFormat, duration};

const DEFAULT_ADDRESS: &str = "localhost:8080";
const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// tally-agent: sample runtime metrics and report them to a tally server.
#[derive(Parser, Debug, Default)]
#[command(name = "tally-agent", version, about)]
pub struct Cli {
    /// Server address, `host:port` or a full URL
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// Interval between reports (e.g. 10, 10s, 500ms)
    #[arg(short = 'r', long, env = "REPORT_INTERVAL", value_parser = duration::duration_arg)]
    pub report_interval: Option<Duration>,

    /// Interval between polls
    #[arg(short = 'p', long, env = "POLL_INTERVAL", value_parser = duration::duration_arg)]
    pub poll_interval: Option<Duration>,

    /// TOML config file with the same keys
    #[arg(short = 'c', long, env = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Deadline for each delivery attempt
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
    #[serde(deserialize_with = "duration::deserialize_opt")]
    pub report_interval: Option<Duration>,
    #[serde(deserialize_with = "duration::deserialize_opt")]
    pub poll_interval: Option<Duration>,
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

/// Fully resolved agent settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// Base URL of the server, always with a scheme.
    pub address: String,
    pub report_interval: Duration,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub log_format: LogFormat,
}

impl AgentConfig {
    pub fn resolve(cli: Cli) -> anyhow::Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(cli, file)
    }

    fn merge(cli: Cli, file: FileConfig) -> anyhow::Result<Self> {
        let address = cli
            .address
            .or(file.address)
            .unwrap_or_else(|| DEFAULT_ADDRESS.to_string());
        let config = Self {
            address: with_scheme(&address),
            report_interval: cli
                .report_interval
                .or(file.report_interval)
                .unwrap_or(DEFAULT_REPORT_INTERVAL),
            poll_interval: cli
                .poll_interval
                .or(file.poll_interval)
                .unwrap_or(DEFAULT_POLL_INTERVAL),
            request_timeout: cli
                .request_timeout
                .or(file.request_timeout)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            log_format: cli.log_format.or(file.log_format).unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval.is_zero() {
            bail!("poll interval must be positive");
        }
        if self.report_interval.is_zero() {
            bail!("report interval must be positive");
        }
        if self.request_timeout.is_zero() {
            bail!("request timeout must be positive");
        }
        Ok(())
    }
}

/// Prefix `http://` unless the address already names a scheme.
pub fn with_scheme(address: &str) -> String {
    let addr = address.trim();
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = AgentConfig::merge(Cli::default(), FileConfig::default()).unwrap();
        assert_eq!(config.address, "http://localhost:8080");
        assert_eq!(config.report_interval, Duration::from_secs(10));
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn scheme_is_injected_only_when_absent() {
        assert_eq!(with_scheme("example.com:9000"), "http://example.com:9000");
        assert_eq!(with_scheme("https://example.com"), "https://example.com");
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::try_parse_from(["tally-agent", "-a", "10.0.0.1:9090", "-r", "3", "-p", "500ms"])
            .unwrap();
        let config = AgentConfig::merge(cli, FileConfig::default()).unwrap();
        assert_eq!(config.address, "http://10.0.0.1:9090");
        assert_eq!(config.report_interval, Duration::from_secs(3));
        assert_eq!(config.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn flag_beats_file_beats_default() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            tmp,
            "address = \"file-host:1\"\nreport_interval = \"20s\"\npoll_interval = 7\nlog_format = \"json\""
        )
        .unwrap();

        let cli = Cli {
            address: Some("flag-host:2".into()),
            config: Some(tmp.path().to_path_buf()),
            ..Cli::default()
        };
        let config = AgentConfig::resolve(cli).unwrap();
        assert_eq!(config.address, "http://flag-host:2");
        assert_eq!(config.report_interval, Duration::from_secs(20));
        assert_eq!(config.poll_interval, Duration::from_secs(7));
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn unknown_file_key_rejected() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "adress = \"typo\"").unwrap();
        let cli = Cli {
            config: Some(tmp.path().to_path_buf()),
            ..Cli::default()
        };
        assert!(AgentConfig::resolve(cli).is_err());
    }

    #[test]
    fn zero_interval_rejected() {
        let cli = Cli {
            poll_interval: Some(Duration::ZERO),
            ..Cli::default()
        };
        assert!(AgentConfig::merge(cli, FileConfig::default()).is_err());
    }
}
