//! Remote command sessions and the executor that drives them.
//!
//! Transport, authentication and prompt handling belong to the
//! [`SessionConnector`] implementation. The executor only decides which
//! commands to send and how their completion is detected.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::core::models::{Credentials, DeviceDescriptor};
use crate::core::profiles::{ExecutionStrategy, VendorProfile};
use crate::error::{BackupError, SessionError};

/// How a command's output is considered complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandMode {
    /// Wait for the device prompt.
    Prompt,
    /// Wait until the device has been silent for `idle`.
    Timing { idle: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    pub connect: Duration,
    pub command: Duration,
    pub timing_idle: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(120),
            command: Duration::from_secs(120),
            timing_idle: Duration::from_secs(2),
        }
    }
}

/// Where and how to open a session.
#[derive(Debug, Clone)]
pub struct ConnectRequest<'a> {
    pub host: &'a str,
    pub port: u16,
    pub credentials: &'a Credentials,
    pub protocol: &'a str,
    pub timeouts: SessionTimeouts,
}

#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(
        &self,
        request: &ConnectRequest<'_>,
    ) -> Result<Box<dyn RemoteSession>, SessionError>;
}

#[async_trait]
pub trait RemoteSession: Send {
    async fn run_command(&mut self, command: &str, mode: CommandMode)
    -> Result<String, SessionError>;

    /// Enter privileged mode.
    async fn elevate(&mut self, secret: &str) -> Result<(), SessionError>;

    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Runs a vendor profile against one device.
#[derive(Clone)]
pub struct SessionExecutor {
    connector: Arc<dyn SessionConnector>,
    timeouts: SessionTimeouts,
}

impl SessionExecutor {
    pub fn new(connector: Arc<dyn SessionConnector>, timeouts: SessionTimeouts) -> Self {
        Self {
            connector,
            timeouts,
        }
    }

    pub fn timeouts(&self) -> SessionTimeouts {
        self.timeouts
    }

    /// Opens a session, runs the profile and always closes the session again.
    /// Returns the retained command output.
    pub async fn execute(
        &self,
        device: &DeviceDescriptor,
        profile: &VendorProfile,
    ) -> Result<String, BackupError> {
        let request = ConnectRequest {
            host: &device.host,
            port: device.port,
            credentials: &device.credentials,
            protocol: &profile.protocol,
            timeouts: self.timeouts,
        };

        debug!(host = %device.host, port = device.port, protocol = %profile.protocol, "Connecting");

        let mut session = match timeout(self.timeouts.connect, self.connector.connect(&request)).await
        {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return Err(map_connect_error(&device.host, e, self.timeouts.connect)),
            Err(_) => {
                return Err(BackupError::ConnectionTimeout {
                    host: device.host.clone(),
                    after: self.timeouts.connect,
                });
            }
        };

        let result = self.run_profile(session.as_mut(), device, profile).await;

        if let Err(e) = session.close().await {
            warn!(host = %device.host, error = %e, "Failed to close session cleanly");
        }

        let output = result?;
        if output.trim().is_empty() {
            return Err(BackupError::CommandExecution {
                host: device.host.clone(),
                command: profile.commands.last().cloned().unwrap_or_default(),
                cause: "command produced no output".into(),
            });
        }

        Ok(output)
    }

    async fn run_profile(
        &self,
        session: &mut dyn RemoteSession,
        device: &DeviceDescriptor,
        profile: &VendorProfile,
    ) -> Result<String, BackupError> {
        let timing = CommandMode::Timing {
            idle: self.timeouts.timing_idle,
        };

        match profile.strategy {
            ExecutionStrategy::Standard => {
                self.run_one(session, device, first_command(profile, device)?, CommandMode::Prompt)
                    .await
            }
            ExecutionStrategy::TimingBased => {
                self.run_one(session, device, first_command(profile, device)?, timing)
                    .await
            }
            ExecutionStrategy::EnableThenTiming => {
                debug!(host = %device.host, "Entering privileged mode");
                match timeout(
                    self.timeouts.command,
                    session.elevate(device.credentials.secret()),
                )
                .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        return Err(map_command_error(&device.host, "enable", e, self.timeouts.command));
                    }
                    Err(_) => {
                        return Err(BackupError::ConnectionTimeout {
                            host: device.host.clone(),
                            after: self.timeouts.command,
                        });
                    }
                }
                self.run_one(session, device, first_command(profile, device)?, timing)
                    .await
            }
            ExecutionStrategy::MultiCommandSequential => {
                let mut output = String::new();
                for command in &profile.commands {
                    output = self
                        .run_one(session, device, command, CommandMode::Prompt)
                        .await?;
                }
                Ok(output)
            }
        }
    }

    async fn run_one(
        &self,
        session: &mut dyn RemoteSession,
        device: &DeviceDescriptor,
        command: &str,
        mode: CommandMode,
    ) -> Result<String, BackupError> {
        info!(host = %device.host, label = %device.label, command = %command, "Executing command");

        match timeout(self.timeouts.command, session.run_command(command, mode)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(map_command_error(&device.host, command, e, self.timeouts.command)),
            Err(_) => Err(BackupError::ConnectionTimeout {
                host: device.host.clone(),
                after: self.timeouts.command,
            }),
        }
    }
}

fn first_command<'p>(
    profile: &'p VendorProfile,
    device: &DeviceDescriptor,
) -> Result<&'p str, BackupError> {
    profile
        .commands
        .first()
        .map(String::as_str)
        .ok_or_else(|| BackupError::CommandExecution {
            host: device.host.clone(),
            command: String::new(),
            cause: "profile has no commands".into(),
        })
}

fn map_connect_error(host: &str, error: SessionError, limit: Duration) -> BackupError {
    match error {
        SessionError::Timeout(_) => BackupError::ConnectionTimeout {
            host: host.to_string(),
            after: limit,
        },
        other => BackupError::Connection {
            host: host.to_string(),
            cause: other.to_string(),
        },
    }
}

fn map_command_error(host: &str, command: &str, error: SessionError, limit: Duration) -> BackupError {
    match error {
        SessionError::Timeout(_) => BackupError::ConnectionTimeout {
            host: host.to_string(),
            after: limit,
        },
        SessionError::Auth(_) | SessionError::Transport(_) => BackupError::Connection {
            host: host.to_string(),
            cause: error.to_string(),
        },
        SessionError::Command { reason, .. } => BackupError::CommandExecution {
            host: host.to_string(),
            command: command.to_string(),
            cause: reason,
        },
    }
}
