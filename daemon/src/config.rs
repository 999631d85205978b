use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Number of queue items processed concurrently across all hosts.
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    /// Maximum concurrent runs against one hostname.
    #[serde(default = "default_per_domain_concurrency")]
    pub per_domain_concurrency: u32,
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// Base URL of the WebDriver endpoint (chromedriver or a Selenium hub).
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    /// Non-terminal runs older than this are marked failed at startup.
    #[serde(default = "default_stale_run_secs")]
    pub stale_run_after_secs: u64,
}

fn default_worker_concurrency() -> usize { 4 }
fn default_per_domain_concurrency() -> u32 { 2 }
fn default_socket_path() -> PathBuf { PathBuf::from(common::DEFAULT_SOCKET_PATH) }
fn default_db_path() -> PathBuf { PathBuf::from(common::DEFAULT_DB_PATH) }
fn default_results_dir() -> PathBuf { PathBuf::from(common::DEFAULT_RESULTS_DIR) }
fn default_webdriver_url() -> String { "http://localhost:9515".to_string() }
fn default_stale_run_secs() -> u64 { 3600 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: default_worker_concurrency(),
            per_domain_concurrency: default_per_domain_concurrency(),
            socket_path: default_socket_path(),
            db_path: default_db_path(),
            results_dir: default_results_dir(),
            webdriver_url: default_webdriver_url(),
            stale_run_after_secs: default_stale_run_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub output: Option<PathBuf>,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &PathBuf) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &PathBuf) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Detect file type by extension and load
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let ext = path.extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "toml" => Self::from_toml_file(path),
            _ => Err(anyhow::anyhow!("Unsupported config file format. Use .yaml, .yml, or .toml")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.worker_concurrency, 4);
        assert_eq!(config.server.per_domain_concurrency, 2);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "server:\n  worker_concurrency: 8\n  per_domain_concurrency: 1\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.worker_concurrency, 8);
        assert_eq!(config.server.per_domain_concurrency, 1);
        assert_eq!(config.server.webdriver_url, "http://localhost:9515");
        assert_eq!(config.server.stale_run_after_secs, 3600);
    }

    #[test]
    fn toml_config_parses() {
        let toml_src = "[server]\nresults_dir = \"/tmp/results\"\n\n[logging]\nlevel = \"debug\"\n";
        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.server.results_dir, PathBuf::from("/tmp/results"));
        assert_eq!(config.logging.level, "debug");
    }
}
