//! Configuration module for the measures repeater.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Command-line arguments for the repeater
#[derive(Parser, Debug)]
#[command(name = "measures-repeater")]
#[command(author = "measures-repeater authors")]
#[command(version = "0.1.0")]
#[command(about = "Replays a measures file to every TCP client", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:17685)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Path of the measures file sent to clients
    #[arg(short = 'f', long)]
    pub measures: Option<PathBuf>,

    /// Pause between two sends, in milliseconds
    #[arg(short = 'i', long)]
    pub interval_ms: Option<u64>,

    /// Maximum number of concurrent client sessions
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub repeater: RepeaterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Maximum number of concurrent sessions
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Payload-related configuration
#[derive(Debug, Deserialize)]
pub struct RepeaterConfig {
    /// Measures file, relative to the working directory unless absolute
    #[serde(default = "default_measures")]
    pub measures: PathBuf,
    /// Pause between two sends, in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for RepeaterConfig {
    fn default() -> Self {
        Self {
            measures: default_measures(),
            interval_ms: default_interval_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:17685".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_measures() -> PathBuf {
    PathBuf::from("measures")
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub measures: PathBuf,
    pub interval: Duration,
    pub max_connections: usize,
    pub workers: Option<usize>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen = listen
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidListen(listen.clone(), e))?;

        let interval_ms = cli.interval_ms.unwrap_or(toml_config.repeater.interval_ms);
        if interval_ms == 0 {
            return Err(ConfigError::Invalid("interval_ms must be greater than 0"));
        }

        let max_connections = cli
            .max_connections
            .unwrap_or(toml_config.server.max_connections);
        if max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be greater than 0"));
        }
        if max_connections > Semaphore::MAX_PERMITS {
            return Err(ConfigError::Invalid("max_connections is too large"));
        }

        let workers = cli.workers.or(toml_config.server.workers);
        if workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be greater than 0"));
        }

        Ok(Config {
            listen,
            measures: cli.measures.unwrap_or(toml_config.repeater.measures),
            interval: Duration::from_millis(interval_ms),
            max_connections,
            workers,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidListen(String, AddrParseError),
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidListen(addr, e) => {
                write!(f, "Invalid listen address '{addr}': {e}")
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        let mut argv = vec!["measures-repeater"];
        argv.extend_from_slice(args);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_default_config() {
        let config = Config::merge(cli(&[]), TomlConfig::default()).unwrap();
        assert_eq!(config.listen, "127.0.0.1:17685".parse().unwrap());
        assert_eq!(config.measures, PathBuf::from("measures"));
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.max_connections, 1024);
        assert_eq!(config.workers, None);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:9000"
            workers = 2
            max_connections = 16

            [repeater]
            measures = "/var/lib/lidar/measures"
            interval_ms = 250

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.server.workers, Some(2));
        assert_eq!(config.server.max_connections, 16);
        assert_eq!(
            config.repeater.measures,
            PathBuf::from("/var/lib/lidar/measures")
        );
        assert_eq!(config.repeater.interval_ms, 250);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: TomlConfig = toml::from_str("[repeater]\ninterval_ms = 10\n").unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:17685");
        assert_eq!(config.repeater.measures, PathBuf::from("measures"));
        assert_eq!(config.repeater.interval_ms, 10);
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0:9000"

            [repeater]
            interval_ms = 250

            [logging]
            level = "warn"
        "#,
        )
        .unwrap();

        let args = cli(&[
            "--listen",
            "127.0.0.1:4000",
            "--interval-ms",
            "50",
            "--measures",
            "scan.txt",
            "--log-level",
            "trace",
        ]);
        let config = Config::merge(args, toml_config).unwrap();
        assert_eq!(config.listen, "127.0.0.1:4000".parse().unwrap());
        assert_eq!(config.interval, Duration::from_millis(50));
        assert_eq!(config.measures, PathBuf::from("scan.txt"));
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_toml_log_level_used_when_cli_default() {
        let toml_config: TomlConfig = toml::from_str("[logging]\nlevel = \"warn\"\n").unwrap();
        let config = Config::merge(cli(&[]), toml_config).unwrap();
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_invalid_listen() {
        let err = Config::merge(cli(&["--listen", "localhost"]), TomlConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidListen(ref addr, _) if addr == "localhost"));
    }

    #[test]
    fn test_zero_values_rejected() {
        for args in [
            &["--interval-ms", "0"][..],
            &["--max-connections", "0"][..],
            &["--workers", "0"][..],
        ] {
            let err = Config::merge(cli(args), TomlConfig::default()).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{args:?}");
        }
    }

    #[test]
    fn test_max_connections_above_semaphore_limit() {
        let too_many = (Semaphore::MAX_PERMITS + 1).to_string();
        let err = Config::merge(cli(&["--max-connections", &too_many]), TomlConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let toml_config: TomlConfig =
            toml::from_str(&format!("[server]\nmax_connections = {}\n", u32::MAX)).unwrap();
        let config = Config::merge(cli(&[]), toml_config).unwrap();
        assert_eq!(config.max_connections, u32::MAX as usize);

        let err = Config::merge(
            cli(&["--max-connections", &usize::MAX.to_string()]),
            TomlConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_missing_config_file() {
        let err = Config::from_cli(cli(&["--config", "/nonexistent/repeater.toml"])).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(..)));
    }
}
