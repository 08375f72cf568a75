//! Layered configuration: defaults, then the TOML file, then `NETBKP_*`
//! environment variables, then command-line flags.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::core::profiles::{ProfileRegistry, VendorProfile};
use crate::core::retention::DEFAULT_MAX_KEEP;
use crate::core::session::SessionTimeouts;
use crate::error::ProfileError;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/netbkp/config.toml";
pub const CONFIG_ENV: &str = "NETBKP_CONFIG";
const ENV_PREFIX: &str = "NETBKP_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {0} does not exist")]
    Missing(PathBuf),

    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Profile(#[from] ProfileError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// CSV device inventory
    pub inventory: PathBuf,
    pub backup_root: PathBuf,
    pub redundancy_root: PathBuf,
    /// Mirror only when the redundancy root is a mount point. When false it
    /// only has to exist.
    pub require_redundancy_mount: bool,
    /// Backups kept per device and location
    pub retention: usize,
    /// Devices processed concurrently; 1 is strictly sequential
    pub max_parallel: usize,
    /// Append every capture to `<backup_root>/<CLIENT>/log/backup_<CLASS>_<vendor>.log`
    pub session_log: bool,
    pub simulation: bool,
    pub verbose: bool,
    pub json_logs: bool,
    pub timeouts: TimeoutConfig,
    pub session: SessionConfig,
    pub notifications: NotificationConfig,
    /// Extra or overriding vendor profiles, keyed by vendor id
    pub profiles: BTreeMap<String, VendorProfile>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            inventory: PathBuf::from("/root/backup/scripts/devices.csv"),
            backup_root: PathBuf::from("/root/backup"),
            redundancy_root: PathBuf::from("/mnt/backup"),
            require_redundancy_mount: true,
            retention: DEFAULT_MAX_KEEP,
            max_parallel: 1,
            session_log: true,
            simulation: false,
            verbose: false,
            json_logs: false,
            timeouts: TimeoutConfig::default(),
            session: SessionConfig::default(),
            notifications: NotificationConfig::default(),
            profiles: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_secs: u64,
    pub command_secs: u64,
    /// Silence that ends a timing-based capture
    pub timing_idle_ms: u64,
    /// Hard limit for one device's whole session
    pub device_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 120,
            command_secs: 120,
            timing_idle_ms: 2000,
            device_secs: 600,
        }
    }
}

impl TimeoutConfig {
    pub fn session_timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            connect: Duration::from_secs(self.connect_secs),
            command: Duration::from_secs(self.command_secs),
            timing_idle: Duration::from_millis(self.timing_idle_ms),
        }
    }

    pub fn device_limit(&self) -> Duration {
        Duration::from_secs(self.device_secs)
    }
}

/// External client program used for real device sessions.
///
/// `{host}`, `{port}`, `{username}` and `{protocol}` in `args` are replaced
/// per device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Environment variable that receives the device password
    pub password_env: Option<String>,
    pub prompt_pattern: String,
    pub pager_pattern: Option<String>,
    pub password_prompt_pattern: String,
    pub enable_command: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            program: "sshpass".to_string(),
            args: [
                "-e",
                "ssh",
                "-tt",
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
                "-p",
                "{port}",
                "{username}@{host}",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            password_env: Some("SSHPASS".to_string()),
            prompt_pattern: r"[>#\]]\s*$".to_string(),
            pager_pattern: Some(r"-+\s*[Mm]ore.*-+\s*$".to_string()),
            password_prompt_pattern: r"(?i)password:\s*$".to_string(),
            enable_command: "enable".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannelType {
    #[default]
    None,
    Slack,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub channel: NotificationChannelType,
    pub slack_webhook: Option<String>,
}

impl AppConfig {
    /// Loads the layered configuration.
    ///
    /// An explicit `config_file` must exist. Without one, `$NETBKP_CONFIG`
    /// or [`DEFAULT_CONFIG_PATH`] is read if present.
    pub fn load<T: Serialize>(
        config_file: Option<&Path>,
        cli_args: Option<&T>,
    ) -> Result<Self, ConfigError> {
        let file = match config_file {
            Some(path) if !path.exists() => return Err(ConfigError::Missing(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => std::env::var_os(CONFIG_ENV)
                .map(PathBuf::from)
                .or_else(|| Some(PathBuf::from(DEFAULT_CONFIG_PATH)))
                .filter(|p| p.exists()),
        };

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(file) = &file {
            figment = figment.merge(Toml::file(file));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]).split("__"));
        if let Some(args) = cli_args {
            figment = figment.merge(Serialized::defaults(args));
        }

        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retention == 0 {
            return Err(ConfigError::Invalid(
                "retention must keep at least one backup".into(),
            ));
        }
        if self.max_parallel == 0 {
            return Err(ConfigError::Invalid("max_parallel must be at least 1".into()));
        }
        if self.timeouts.connect_secs == 0
            || self.timeouts.command_secs == 0
            || self.timeouts.device_secs == 0
        {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        for (vendor, profile) in &self.profiles {
            profile.validate(vendor)?;
        }
        Ok(())
    }

    /// Built-in profiles overlaid with the configured ones.
    pub fn registry(&self) -> Result<ProfileRegistry, ConfigError> {
        Ok(ProfileRegistry::with_overrides(&self.profiles)?)
    }
}
