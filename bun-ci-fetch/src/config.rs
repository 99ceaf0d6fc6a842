use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CiFetchError, Result};
use crate::retry::RetryConfig;

pub const DEFAULT_WINDOWS_KITS_DIR: &str = r"C:\Program Files (x86)\Windows Kits";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub cdn: CdnConfig,

    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub buildkite: BuildkiteConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub process: ProcessConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CdnConfig {
    #[serde(default = "default_cdn_url")]
    pub base_url: String,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            base_url: default_cdn_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubConfig {
    /// Source-control API root; its host receives the bearer token.
    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    /// `owner/repo` whose commit statuses are searched.
    #[serde(default = "default_repository")]
    pub repository: String,

    #[serde(default = "default_token_secrets")]
    pub token_secrets: Vec<String>,

    #[serde(default = "default_token_command")]
    pub token_command: Vec<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            repository: default_repository(),
            token_secrets: default_token_secrets(),
            token_command: default_token_command(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BuildkiteConfig {
    /// Host that commit status `target_url`s must point at.
    #[serde(default = "default_buildkite_host")]
    pub host: String,

    /// Base URL that job `base_path`s are resolved against.
    #[serde(default = "default_buildkite_url")]
    pub url: String,
}

impl Default for BuildkiteConfig {
    fn default() -> Self {
        Self {
            host: default_buildkite_host(),
            url: default_buildkite_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_interval_ms: default_retry_interval_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.retries, Duration::from_millis(self.retry_interval_ms))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessConfig {
    #[serde(default = "default_windows_kits_dir")]
    pub windows_kits_dir: PathBuf,

    /// Explicit `ntstatus.h`, skipping the Windows Kits search.
    #[serde(default)]
    pub ntstatus_header: Option<PathBuf>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            windows_kits_dir: default_windows_kits_dir(),
            ntstatus_header: None,
        }
    }
}

fn default_cdn_url() -> String {
    "https://pub-5e11e972747a44bf9aaf9394f185a982.r2.dev/releases/".to_string()
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_repository() -> String {
    "oven-sh/bun".to_string()
}

fn default_token_secrets() -> Vec<String> {
    vec!["GITHUB_TOKEN".to_string(), "GH_TOKEN".to_string()]
}

fn default_token_command() -> Vec<String> {
    vec!["gh".to_string(), "auth".to_string(), "token".to_string()]
}

fn default_buildkite_host() -> String {
    "buildkite.com".to_string()
}

fn default_buildkite_url() -> String {
    "https://buildkite.com/".to_string()
}

fn default_retries() -> u32 {
    3
}

fn default_retry_interval_ms() -> u64 {
    1000
}

fn default_user_agent() -> String {
    concat!("bun-ci-fetch/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_windows_kits_dir() -> PathBuf {
    PathBuf::from(DEFAULT_WINDOWS_KITS_DIR)
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CiFetchError::Config {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("bun-ci-fetch.toml"))
            .unwrap_or_else(|| PathBuf::from("~/.config/bun-ci-fetch.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("test.toml");

        let config_content = r#"
[cdn]
base_url = "https://cdn.example.com/releases/"

[github]
repository = "example/bun-fork"
token_command = []

[buildkite]
host = "ci.example.com"

[http]
retries = 5
retry_interval_ms = 250
"#;

        fs::write(&config_path, config_content).unwrap();

        let config = Config::load(&config_path).unwrap();

        assert_eq!(config.cdn.base_url, "https://cdn.example.com/releases/");
        assert_eq!(config.github.repository, "example/bun-fork");
        assert!(config.github.token_command.is_empty());
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.buildkite.host, "ci.example.com");
        assert_eq!(config.buildkite.url, "https://buildkite.com/");

        let retry = config.http.retry_config();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.interval, Duration::from_millis(250));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.github.repository, "oven-sh/bun");
        assert_eq!(config.github.token_secrets, vec!["GITHUB_TOKEN", "GH_TOKEN"]);
        assert_eq!(config.github.token_command, vec!["gh", "auth", "token"]);
        assert_eq!(config.http.retries, 3);
        assert_eq!(config.http.retry_interval_ms, 1000);
        assert!(config.process.ntstatus_header.is_none());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load(Path::new("/no/such/bun-ci-fetch.toml")).unwrap();
        assert_eq!(config.buildkite.host, "buildkite.com");
    }

    #[test]
    fn test_invalid_file_is_a_config_error() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("bad.toml");
        fs::write(&config_path, "[http]\nretries = \"many\"\n").unwrap();

        let err = Config::load(&config_path).unwrap_err();
        assert!(matches!(err, CiFetchError::Config { .. }));
    }
}
