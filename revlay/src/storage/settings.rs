//! Deployment configuration

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::RevlayError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Default configuration file name inside a deployment root
pub const CONFIG_FILE_NAME: &str = "revlay.json";

const DEFAULT_HEALTH_RETRIES: u32 = 10;
const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Deployment strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployMode {
    ShortDowntime,
    ZeroDowntime,
}

impl std::fmt::Display for DeployMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeployMode::ShortDowntime => write!(f, "short_downtime"),
            DeployMode::ZeroDowntime => write!(f, "zero_downtime"),
        }
    }
}

/// Top level configuration of one deployment target
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,

    #[serde(default)]
    pub deploy: DeployConfig,

    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub hooks: HooksConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Application identity and retention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name, used for pid and log file names
    #[serde(default)]
    pub name: String,

    /// Number of releases kept by prune, -1 keeps everything
    #[serde(default = "default_keep_releases")]
    pub keep_releases: i32,
}

fn default_keep_releases() -> i32 {
    5
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            keep_releases: default_keep_releases(),
        }
    }
}

/// Deployment behaviour
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Strategy, unset means zero downtime
    #[serde(default)]
    pub mode: Option<DeployMode>,

    /// Paths under `shared/` linked into every release
    #[serde(default)]
    pub shared_paths: Vec<String>,

    /// Extra environment for the service and hooks
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// Managed service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Start command template, `${PORT}` is substituted
    #[serde(default)]
    pub start_command: String,

    /// Optional command run before signalling the service
    #[serde(default)]
    pub stop_command: String,

    /// Primary port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Alternate port for blue-green cutovers
    #[serde(default = "default_alt_port")]
    pub alt_port: u16,

    /// Proxy listen port, 0 disables the proxy
    #[serde(default)]
    pub proxy_port: u16,

    /// Health check path, empty skips probing
    #[serde(default)]
    pub health_check: String,

    #[serde(default)]
    pub health_check_retries: i32,

    #[serde(default, with = "humantime_serde")]
    pub health_check_interval: Duration,

    #[serde(default, with = "humantime_serde")]
    pub health_check_timeout: Duration,

    /// Time the service gets to exit after SIGTERM
    #[serde(default = "default_graceful_timeout", with = "humantime_serde")]
    pub graceful_timeout: Duration,

    /// Delay before the started process is checked once more
    #[serde(default = "default_startup_delay", with = "humantime_serde")]
    pub startup_delay: Duration,

    #[serde(default = "default_pid_file")]
    pub pid_file: String,

    #[serde(default = "default_stdout_log")]
    pub stdout_log: String,

    #[serde(default = "default_stderr_log")]
    pub stderr_log: String,
}

fn default_port() -> u16 {
    8080
}

fn default_alt_port() -> u16 {
    8081
}

fn default_graceful_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_startup_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_pid_file() -> String {
    "pids/{{.AppName}}.pid".to_string()
}

fn default_stdout_log() -> String {
    "logs/{{.AppName}}-out.log".to_string()
}

fn default_stderr_log() -> String {
    "logs/{{.AppName}}-err.log".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            start_command: String::new(),
            stop_command: String::new(),
            port: default_port(),
            alt_port: default_alt_port(),
            proxy_port: 0,
            health_check: String::new(),
            health_check_retries: 0,
            health_check_interval: Duration::ZERO,
            health_check_timeout: Duration::ZERO,
            graceful_timeout: default_graceful_timeout(),
            startup_delay: default_startup_delay(),
            pid_file: default_pid_file(),
            stdout_log: default_stdout_log(),
            stderr_log: default_stderr_log(),
        }
    }
}

impl ServiceConfig {
    /// Probe attempts, falling back to the default when unset
    pub fn effective_retries(&self) -> u32 {
        if self.health_check_retries <= 0 {
            DEFAULT_HEALTH_RETRIES
        } else {
            self.health_check_retries as u32
        }
    }

    pub fn effective_interval(&self) -> Duration {
        if self.health_check_interval.is_zero() {
            DEFAULT_HEALTH_INTERVAL
        } else {
            self.health_check_interval
        }
    }

    pub fn effective_timeout(&self) -> Duration {
        if self.health_check_timeout.is_zero() {
            DEFAULT_HEALTH_TIMEOUT
        } else {
            self.health_check_timeout
        }
    }
}

/// Hook command lists, each run in order inside the release directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HooksConfig {
    #[serde(default)]
    pub pre_deploy: Vec<String>,

    #[serde(default)]
    pub post_deploy: Vec<String>,

    #[serde(default)]
    pub pre_rollback: Vec<String>,

    #[serde(default)]
    pub post_rollback: Vec<String>,
}

impl Config {
    /// Load and validate a configuration file
    pub async fn load(path: &Path) -> Result<Self, RevlayError> {
        let config: Config = File::new(path).read_json().await?;
        config.validate()?;
        Ok(config)
    }

    /// Effective mode, unset means zero downtime
    pub fn mode(&self) -> DeployMode {
        self.deploy.mode.unwrap_or(DeployMode::ZeroDowntime)
    }

    /// Check values that do not depend on a particular release
    pub fn validate(&self) -> Result<(), RevlayError> {
        if self.app.name.trim().is_empty() {
            return Err(RevlayError::ConfigError("app.name must not be empty".into()));
        }
        if self.app.keep_releases < 1 && self.app.keep_releases != -1 {
            return Err(RevlayError::ConfigError(format!(
                "app.keep_releases must be >= 1 or -1, got {}",
                self.app.keep_releases
            )));
        }
        if self.mode() == DeployMode::ZeroDowntime {
            if self.service.port == 0 || self.service.alt_port == 0 {
                return Err(RevlayError::ConfigError(
                    "service.port and service.alt_port are required in zero_downtime mode".into(),
                ));
            }
            if self.service.port == self.service.alt_port {
                return Err(RevlayError::ConfigError(format!(
                    "service.port and service.alt_port must differ (both {})",
                    self.service.port
                )));
            }
        }
        Ok(())
    }
}
