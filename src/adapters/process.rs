//! Session collaborator that drives an external client program (by default
//! `sshpass -e ssh -tt ...`) over its stdin/stdout.
//!
//! The device prompt seen right after login is remembered; prompt-based
//! commands complete when that prompt shows up again.

use async_trait::async_trait;
use regex::Regex;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::core::session::{CommandMode, ConnectRequest, RemoteSession, SessionConnector};
use crate::error::SessionError;

const READ_CHUNK: usize = 8 * 1024;

/// Grace period for the client to exit on its own before it is killed
const CLOSE_GRACE: Duration = Duration::from_secs(1);

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("static pattern"));

/// Cursor-left escape or raw backspace, used by devices to redraw the pager line
static CURSOR_BACK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9]*D|\x08").expect("static pattern"));

pub struct ProcessConnector {
    program: String,
    args: Vec<String>,
    password_env: Option<String>,
    prompt: Regex,
    pager: Option<Regex>,
    password_prompt: Regex,
    enable_command: String,
}

impl ProcessConnector {
    pub fn new(config: &SessionConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            program: config.program.clone(),
            args: config.args.clone(),
            password_env: config.password_env.clone().filter(|v| !v.is_empty()),
            prompt: Regex::new(&config.prompt_pattern)?,
            pager: config.pager_pattern.as_deref().map(Regex::new).transpose()?,
            password_prompt: Regex::new(&config.password_prompt_pattern)?,
            enable_command: config.enable_command.clone(),
        })
    }

    fn command(&self, request: &ConnectRequest<'_>) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(self.args.iter().map(|arg| expand(arg, request)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(var) = &self.password_env {
            command.env(var, &request.credentials.password);
        }
        command
    }
}

fn expand(arg: &str, request: &ConnectRequest<'_>) -> String {
    arg.replace("{host}", request.host)
        .replace("{port}", &request.port.to_string())
        .replace("{username}", &request.credentials.username)
        .replace("{protocol}", request.protocol)
}

#[async_trait]
impl SessionConnector for ProcessConnector {
    async fn connect(
        &self,
        request: &ConnectRequest<'_>,
    ) -> Result<Box<dyn RemoteSession>, SessionError> {
        let mut child = self.command(request).spawn().map_err(|e| {
            SessionError::Transport(format!("failed to start '{}': {}", self.program, e))
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(SessionError::Transport("client stdio unavailable".into()));
        };
        let stderr = child.stderr.take();

        let mut session = ProcessSession {
            child,
            stdin,
            stdout,
            stderr,
            prompt: self.prompt.clone(),
            pager: self.pager.clone(),
            password_prompt: self.password_prompt.clone(),
            enable_command: self.enable_command.clone(),
            prompt_stem: None,
            command_timeout: request.timeouts.command,
            buffer: Vec::new(),
        };

        let deadline = Instant::now() + request.timeouts.connect;
        match session.login(request.credentials.password.as_str(), deadline).await {
            Ok(()) => {
                debug!(host = %request.host, prompt = ?session.prompt_stem, "Session established");
                Ok(Box::new(session))
            }
            Err(e) => {
                let e = session.diagnose(e).await;
                session.kill().await;
                Err(e)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Prompt,
    PasswordPrompt,
}

struct ProcessSession {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: Option<ChildStderr>,
    prompt: Regex,
    pager: Option<Regex>,
    password_prompt: Regex,
    enable_command: String,
    /// Host part of the prompt learned at login, e.g. `router` for `router>`
    prompt_stem: Option<String>,
    command_timeout: Duration,
    buffer: Vec<u8>,
}

impl ProcessSession {
    async fn login(&mut self, password: &str, deadline: Instant) -> Result<(), SessionError> {
        let mut password_sent = false;
        loop {
            let (_, stop) = self
                .read_until(&[Stop::Prompt, Stop::PasswordPrompt], deadline)
                .await?;
            match stop {
                Stop::Prompt => break,
                Stop::PasswordPrompt if password_sent => {
                    return Err(SessionError::Auth("password rejected".into()));
                }
                Stop::PasswordPrompt => {
                    self.send_line(password).await?;
                    password_sent = true;
                }
            }
        }
        Ok(())
    }

    fn tail(&self) -> String {
        let start = self
            .buffer
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |i| i + 1);
        let tail = String::from_utf8_lossy(&self.buffer[start..]);
        ANSI_ESCAPE.replace_all(&tail, "").replace('\r', "")
    }

    fn is_prompt(&self, line: &str) -> bool {
        if !self.prompt.is_match(line) {
            return false;
        }
        match &self.prompt_stem {
            Some(stem) => line.contains(stem.as_str()),
            None => true,
        }
    }

    fn matched(&self, stops: &[Stop]) -> Option<Stop> {
        let tail = self.tail();
        stops.iter().copied().find(|stop| match stop {
            Stop::Prompt => self.is_prompt(&tail),
            Stop::PasswordPrompt => self.password_prompt.is_match(&tail),
        })
    }

    fn remember_prompt(&mut self) {
        let tail = self.tail();
        let stem = tail
            .trim()
            .trim_end_matches(['>', '#', ']', '$', ' '])
            .trim_start_matches(['<', '['])
            .to_string();
        if !stem.is_empty() {
            self.prompt_stem = Some(stem);
        }
    }

    fn take_output(&mut self) -> String {
        let raw = std::mem::take(&mut self.buffer);
        String::from_utf8_lossy(&raw).into_owned()
    }

    /// Appends received bytes, answering pager prompts on the way.
    async fn push(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        self.buffer.extend_from_slice(bytes);

        let paged = self
            .pager
            .as_ref()
            .is_some_and(|pager| pager.is_match(&self.tail()));
        if paged {
            let start = self
                .buffer
                .iter()
                .rposition(|b| *b == b'\n')
                .map_or(0, |i| i + 1);
            self.buffer.truncate(start);
            self.send_raw(b" ").await?;
        }
        Ok(())
    }

    async fn read_until(
        &mut self,
        stops: &[Stop],
        deadline: Instant,
    ) -> Result<(String, Stop), SessionError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(stop) = self.matched(stops) {
                if stop == Stop::Prompt && self.prompt_stem.is_none() {
                    self.remember_prompt();
                }
                return Ok((self.take_output(), stop));
            }

            match timeout_at(deadline, self.stdout.read(&mut chunk)).await {
                Err(_) => return Err(SessionError::Timeout(self.command_timeout)),
                Ok(Err(e)) => return Err(SessionError::Transport(e.to_string())),
                Ok(Ok(0)) => {
                    return Err(SessionError::Transport(format!(
                        "session closed by remote end: {}",
                        self.take_output().trim()
                    )));
                }
                Ok(Ok(n)) => self.push(&chunk[..n]).await?,
            }
        }
    }

    /// Collects output until nothing has arrived for `idle`. The idle timer
    /// starts with the first byte.
    async fn read_until_idle(
        &mut self,
        idle: Duration,
        deadline: Instant,
    ) -> Result<String, SessionError> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut received = false;
        loop {
            let wait_until = if received {
                (Instant::now() + idle).min(deadline)
            } else {
                deadline
            };

            match timeout_at(wait_until, self.stdout.read(&mut chunk)).await {
                Err(_) if Instant::now() >= deadline => {
                    return Err(SessionError::Timeout(self.command_timeout));
                }
                Err(_) => return Ok(self.take_output()),
                Ok(Err(e)) => return Err(SessionError::Transport(e.to_string())),
                Ok(Ok(0)) => return Ok(self.take_output()),
                Ok(Ok(n)) => {
                    received = true;
                    self.push(&chunk[..n]).await?;
                }
            }
        }
    }

    async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        self.stdin
            .write_all(bytes)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    async fn send_line(&mut self, line: &str) -> Result<(), SessionError> {
        self.send_raw(format!("{line}\n").as_bytes()).await
    }

    /// Refines a login failure with whatever the client printed on stderr.
    async fn diagnose(&mut self, error: SessionError) -> SessionError {
        let mut message = String::new();
        if let Some(mut stderr) = self.stderr.take() {
            let _ = timeout(CLOSE_GRACE, stderr.read_to_string(&mut message)).await;
        }
        let message = message.trim();

        let lowered = format!("{error} {message}").to_lowercase();
        if lowered.contains("permission denied") || lowered.contains("authentication fail") {
            return SessionError::Auth(if message.is_empty() {
                error.to_string()
            } else {
                message.to_string()
            });
        }

        match error {
            SessionError::Transport(cause) if !message.is_empty() => {
                SessionError::Transport(format!("{cause} ({message})"))
            }
            other => other,
        }
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "Client process already gone");
        }
    }
}

#[async_trait]
impl RemoteSession for ProcessSession {
    async fn run_command(
        &mut self,
        command: &str,
        mode: CommandMode,
    ) -> Result<String, SessionError> {
        self.buffer.clear();
        self.send_line(command).await?;

        let deadline = Instant::now() + self.command_timeout;
        let raw = match mode {
            CommandMode::Prompt => self.read_until(&[Stop::Prompt], deadline).await?.0,
            CommandMode::Timing { idle } => self.read_until_idle(idle, deadline).await?,
        };

        Ok(clean_output(&raw, command, &self.prompt))
    }

    async fn elevate(&mut self, secret: &str) -> Result<(), SessionError> {
        self.buffer.clear();
        let enable = self.enable_command.clone();
        self.send_line(&enable).await?;

        let deadline = Instant::now() + self.command_timeout;
        let stops = [Stop::PasswordPrompt, Stop::Prompt];
        let (_, stop) = self.read_until(&stops, deadline).await?;
        if stop == Stop::Prompt {
            return Ok(());
        }

        self.send_line(secret).await?;
        let (output, stop) = self.read_until(&stops, deadline).await?;
        let lowered = output.to_lowercase();
        if stop == Stop::PasswordPrompt
            || lowered.contains("denied")
            || lowered.contains("incorrect")
            || lowered.contains("failed")
        {
            return Err(SessionError::Auth("enable secret rejected".into()));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if let Err(e) = self.stdin.shutdown().await {
            debug!(error = %e, "Client stdin already closed");
        }

        match timeout(CLOSE_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%status, "Client exited");
                Ok(())
            }
            Ok(Err(e)) => Err(SessionError::Transport(e.to_string())),
            Err(_) => {
                warn!("Client did not exit, killing it");
                self.child
                    .kill()
                    .await
                    .map_err(|e| SessionError::Transport(e.to_string()))
            }
        }
    }
}

/// Normalizes line endings, drops terminal escapes, the command echo and the
/// trailing prompt line.
///
/// Text before the last cursor-left move on a line is what the device blanked
/// out after a pager prompt, so only what follows it is kept.
pub fn clean_output(raw: &str, command: &str, prompt: &Regex) -> String {
    let text = raw.replace('\r', "");
    let visible: Vec<String> = text
        .lines()
        .map(|line| {
            let redrawn = CURSOR_BACK.split(line).last().unwrap_or(line);
            ANSI_ESCAPE.replace_all(redrawn, "").into_owned()
        })
        .collect();
    let mut lines: Vec<&str> = visible.iter().map(String::as_str).collect();

    if lines
        .first()
        .is_some_and(|line| line.trim_end().ends_with(command.trim()))
    {
        lines.remove(0);
    }
    if lines.last().is_some_and(|line| prompt.is_match(line)) {
        lines.pop();
    }

    lines.join("\n")
}
