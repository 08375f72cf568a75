//! Error taxonomy for the backup pipeline.
//!
//! Everything except [`BackupError::InputSourceMissing`] is scoped to a single
//! device and ends up inside that device's outcome in the batch report.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("device inventory {path} could not be read: {source}")]
    InputSourceMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("vendor '{0}' has no profile")]
    UnknownVendor(String),

    #[error("invalid device record: {0}")]
    InvalidDevice(String),

    #[error("connection to {host} timed out after {}s", after.as_secs())]
    ConnectionTimeout { host: String, after: Duration },

    #[error("connection to {host} failed: {cause}")]
    Connection { host: String, cause: String },

    #[error("command '{command}' failed on {host}: {cause}")]
    CommandExecution {
        host: String,
        command: String,
        cause: String,
    },

    #[error("backup of {host} exceeded the {}s device limit", after.as_secs())]
    DeviceTimeout { host: String, after: Duration },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("redundancy store {path} is not available")]
    RedundancyUnavailable { path: PathBuf },

    #[error("failed to prune {path}: {source}")]
    Prune {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backup task for {host} ended abnormally: {cause}")]
    TaskFailed { host: String, cause: String },
}

impl BackupError {
    /// Short machine-friendly name, used in reports and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InputSourceMissing { .. } => "input_source_missing",
            Self::UnknownVendor(_) => "unknown_vendor",
            Self::InvalidDevice(_) => "invalid_device",
            Self::ConnectionTimeout { .. } => "connection_timeout",
            Self::Connection { .. } => "connection_error",
            Self::CommandExecution { .. } => "command_execution_error",
            Self::DeviceTimeout { .. } => "device_timeout",
            Self::Write { .. } => "write_error",
            Self::RedundancyUnavailable { .. } => "redundancy_unavailable",
            Self::Prune { .. } => "prune_error",
            Self::TaskFailed { .. } => "task_failed",
        }
    }
}

/// Failures reported by a remote-session collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("command '{command}' failed: {reason}")]
    Command { command: String, reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("profile '{0}' has no commands")]
    NoCommands(String),

    #[error("profile '{vendor}' uses {strategy} which takes exactly one command, got {count}")]
    TooManyCommands {
        vendor: String,
        strategy: &'static str,
        count: usize,
    },

    #[error("profile '{0}' has an empty command")]
    EmptyCommand(String),
}
