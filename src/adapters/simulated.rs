//! Scripted session collaborator for simulation runs and tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::core::session::{CommandMode, ConnectRequest, RemoteSession, SessionConnector};
use crate::error::SessionError;

/// Everything a simulated session was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    Connect { protocol: String },
    Command { command: String, mode: CommandMode },
    Elevate { secret: String },
    Close,
}

#[derive(Debug, Clone)]
enum Response {
    Output(String),
    Fail(String),
    Hang,
}

/// Behaviour of one fake device.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDevice {
    responses: HashMap<String, Response>,
    connect_error: Option<SessionError>,
    connect_hangs: bool,
    requires_enable: bool,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, command: &str, output: &str) -> Self {
        self.responses
            .insert(command.to_string(), Response::Output(output.to_string()));
        self
    }

    pub fn fail_command(mut self, command: &str, reason: &str) -> Self {
        self.responses
            .insert(command.to_string(), Response::Fail(reason.to_string()));
        self
    }

    pub fn hang_on(mut self, command: &str) -> Self {
        self.responses.insert(command.to_string(), Response::Hang);
        self
    }

    pub fn fail_connect(mut self, error: SessionError) -> Self {
        self.connect_error = Some(error);
        self
    }

    pub fn hang_connect(mut self) -> Self {
        self.connect_hangs = true;
        self
    }

    /// Commands are refused until the session has been elevated.
    pub fn requires_enable(mut self) -> Self {
        self.requires_enable = true;
        self
    }
}

type Journal = Arc<Mutex<HashMap<String, Vec<SessionCall>>>>;

#[derive(Clone, Default)]
pub struct SimulatedConnector {
    devices: HashMap<String, SimulatedDevice>,
    journal: Journal,
    permissive: bool,
}

impl SimulatedConnector {
    /// Only hosts registered with [`with_device`](Self::with_device) answer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Any host answers any command with a fabricated configuration.
    pub fn permissive() -> Self {
        Self {
            permissive: true,
            ..Self::default()
        }
    }

    pub fn with_device(mut self, host: &str, device: SimulatedDevice) -> Self {
        self.devices.insert(host.to_string(), device);
        self
    }

    pub fn calls(&self, host: &str) -> Vec<SessionCall> {
        let journal = self.journal.lock().unwrap_or_else(PoisonError::into_inner);
        journal.get(host).cloned().unwrap_or_default()
    }

    /// Hosts that were asked to connect, in no particular order.
    pub fn contacted_hosts(&self) -> Vec<String> {
        let journal = self.journal.lock().unwrap_or_else(PoisonError::into_inner);
        journal.keys().cloned().collect()
    }
}

fn record(journal: &Journal, host: &str, call: SessionCall) {
    let mut journal = journal.lock().unwrap_or_else(PoisonError::into_inner);
    journal.entry(host.to_string()).or_default().push(call);
}

async fn hang() {
    tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
}

#[async_trait]
impl SessionConnector for SimulatedConnector {
    async fn connect(
        &self,
        request: &ConnectRequest<'_>,
    ) -> Result<Box<dyn RemoteSession>, SessionError> {
        record(
            &self.journal,
            request.host,
            SessionCall::Connect {
                protocol: request.protocol.to_string(),
            },
        );

        let device = match self.devices.get(request.host) {
            Some(device) => device.clone(),
            None if self.permissive => SimulatedDevice::new(),
            None => {
                return Err(SessionError::Transport(format!(
                    "no route to host {}",
                    request.host
                )));
            }
        };

        if device.connect_hangs {
            hang().await;
            return Err(SessionError::Timeout(request.timeouts.connect));
        }
        if let Some(e) = &device.connect_error {
            return Err(e.clone());
        }

        debug!(host = %request.host, "(SimulatedConnector) Session opened");

        Ok(Box::new(SimulatedSession {
            host: request.host.to_string(),
            device,
            journal: self.journal.clone(),
            permissive: self.permissive,
            elevated: false,
        }))
    }
}

struct SimulatedSession {
    host: String,
    device: SimulatedDevice,
    journal: Journal,
    permissive: bool,
    elevated: bool,
}

impl SimulatedSession {
    fn fabricate(&self, command: &str) -> String {
        format!(
            "!\n! simulated configuration ({command})\n!\nhostname {}\n!\nend",
            self.host
        )
    }
}

#[async_trait]
impl RemoteSession for SimulatedSession {
    async fn run_command(
        &mut self,
        command: &str,
        mode: CommandMode,
    ) -> Result<String, SessionError> {
        record(
            &self.journal,
            &self.host,
            SessionCall::Command {
                command: command.to_string(),
                mode,
            },
        );

        if self.device.requires_enable && !self.elevated {
            return Err(SessionError::Command {
                command: command.to_string(),
                reason: "% Permission denied, enter privileged mode first".into(),
            });
        }

        match self.device.responses.get(command) {
            Some(Response::Output(out)) => Ok(out.clone()),
            Some(Response::Fail(reason)) => Err(SessionError::Command {
                command: command.to_string(),
                reason: reason.clone(),
            }),
            Some(Response::Hang) => {
                hang().await;
                Err(SessionError::Timeout(Duration::ZERO))
            }
            None if self.permissive => Ok(self.fabricate(command)),
            None => Err(SessionError::Command {
                command: command.to_string(),
                reason: "% Unrecognized command".into(),
            }),
        }
    }

    async fn elevate(&mut self, secret: &str) -> Result<(), SessionError> {
        record(
            &self.journal,
            &self.host,
            SessionCall::Elevate {
                secret: secret.to_string(),
            },
        );
        self.elevated = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        record(&self.journal, &self.host, SessionCall::Close);
        debug!(host = %self.host, "(SimulatedConnector) Session closed");
        Ok(())
    }
}
