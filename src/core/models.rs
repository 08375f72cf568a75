use chrono::{DateTime, Local};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;
use uuid::Uuid;

use crate::core::retention::PruneReport;
use crate::core::writer::MirrorOutcome;
use crate::error::BackupError;

/// `strftime` pattern embedded in every backup file name.
pub const TIMESTAMP_FORMAT: &str = "%d_%m_%Y_%H_%M_%S";

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]").expect("static pattern"));

/// Strips everything outside `[A-Za-z0-9_-]`.
pub fn sanitize_component(raw: &str) -> String {
    UNSAFE_CHARS.replace_all(raw, "").into_owned()
}

/// A device identifier that is safe to use as a path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    /// Sanitizes `raw`, returning `None` when nothing usable is left.
    pub fn sanitize(raw: &str) -> Option<Self> {
        let clean = sanitize_component(raw);
        if clean.is_empty() { None } else { Some(Self(clean)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One raw inventory row, exactly as read from the source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub host: String,
    pub username: String,
    pub password: String,
    pub port: String,
    #[serde(alias = "identificacao", alias = "identification")]
    pub label: String,
    #[serde(alias = "tipo", alias = "deviceClass", alias = "class")]
    pub device_class: String,
    pub vendor: String,
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Privilege-escalation secret. Falls back to the password.
    pub secret: Option<String>,
}

impl Credentials {
    pub fn secret(&self) -> &str {
        self.secret.as_deref().unwrap_or(&self.password)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A validated device, ready for a backup attempt.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    pub label: Label,
    pub device_class: String,
    pub vendor: String,
}

impl TryFrom<DeviceRecord> for DeviceDescriptor {
    type Error = BackupError;

    fn try_from(record: DeviceRecord) -> Result<Self, Self::Error> {
        let host = record.host.trim().to_string();
        if host.is_empty() {
            return Err(BackupError::InvalidDevice("empty host".into()));
        }

        let label = Label::sanitize(&record.label).ok_or_else(|| {
            BackupError::InvalidDevice(format!("label '{}' has no usable characters", record.label))
        })?;

        let device_class = sanitize_component(&record.device_class).to_uppercase();
        if device_class.is_empty() {
            return Err(BackupError::InvalidDevice(format!(
                "device class '{}' has no usable characters",
                record.device_class
            )));
        }

        let port = record.port.trim().parse::<u16>().ok().filter(|p| *p != 0).ok_or_else(|| {
            BackupError::InvalidDevice(format!("'{}' is not a valid port", record.port))
        })?;

        Ok(Self {
            host,
            port,
            credentials: Credentials {
                username: record.username,
                password: record.password,
                secret: record.secret.filter(|s| !s.is_empty()),
            },
            label,
            device_class,
            vendor: record.vendor.trim().to_string(),
        })
    }
}

/// Captured configuration of one device, on its way to storage.
#[derive(Debug, Clone)]
pub struct BackupArtifact {
    pub host: String,
    pub vendor: String,
    pub device_class: String,
    pub label: Label,
    pub captured_at: DateTime<Local>,
    pub content: String,
}

impl BackupArtifact {
    pub fn new(device: &DeviceDescriptor, content: String, captured_at: DateTime<Local>) -> Self {
        Self {
            host: device.host.clone(),
            vendor: device.vendor.clone(),
            device_class: device.device_class.clone(),
            label: device.label.clone(),
            captured_at,
            content,
        }
    }

    pub fn timestamp(&self) -> String {
        self.captured_at.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// What a successful device backup left behind.
#[derive(Debug)]
pub struct DeviceBackup {
    pub primary: PathBuf,
    pub mirror: MirrorOutcome,
    pub pruned_primary: PruneReport,
    pub pruned_mirror: Option<PruneReport>,
}

#[derive(Debug)]
pub struct DeviceOutcome {
    /// Position in the input sequence.
    pub index: usize,
    pub host: String,
    pub label: String,
    pub vendor: String,
    pub result: Result<DeviceBackup, BackupError>,
}

impl DeviceOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub client: String,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub outcomes: Vec<DeviceOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            run_id: self.run_id,
            client: self.client.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            total: self.outcomes.len(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            devices: self.outcomes.iter().map(DeviceSummary::from).collect(),
        }
    }
}

/// Serializable view of a [`BatchReport`].
#[derive(Debug, Serialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub client: String,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub devices: Vec<DeviceSummary>,
}

#[derive(Debug, Serialize)]
pub struct DeviceSummary {
    pub host: String,
    pub label: String,
    pub vendor: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror: Option<String>,
    pub pruned: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&DeviceOutcome> for DeviceSummary {
    fn from(outcome: &DeviceOutcome) -> Self {
        let mut summary = Self {
            host: outcome.host.clone(),
            label: outcome.label.clone(),
            vendor: outcome.vendor.clone(),
            status: "ok",
            primary: None,
            mirror: None,
            pruned: 0,
            error_kind: None,
            error: None,
        };

        match &outcome.result {
            Ok(backup) => {
                summary.primary = Some(backup.primary.clone());
                summary.mirror = Some(backup.mirror.describe());
                summary.pruned = backup.pruned_primary.deleted
                    + backup.pruned_mirror.as_ref().map_or(0, |r| r.deleted);
            }
            Err(e) => {
                summary.status = "failed";
                summary.error_kind = Some(e.kind());
                summary.error = Some(e.to_string());
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> DeviceRecord {
        DeviceRecord {
            host: " 10.0.0.1 ".into(),
            username: "admin".into(),
            password: "pw".into(),
            port: "22".into(),
            label: "core rt/01".into(),
            device_class: "rt".into(),
            vendor: " Cisco ".into(),
            secret: None,
        }
    }

    #[test]
    fn sanitize_drops_separators_and_control_chars() {
        assert_eq!(sanitize_component("../etc/pass\nwd"), "etcpasswd");
        assert_eq!(sanitize_component("OLT_01-a"), "OLT_01-a");
    }

    #[test]
    fn label_of_only_unsafe_chars_is_rejected() {
        assert!(Label::sanitize("../..").is_none());
        assert_eq!(Label::sanitize("rt 01").unwrap().as_str(), "rt01");
    }

    #[test]
    fn descriptor_normalizes_record() {
        let device = DeviceDescriptor::try_from(record()).unwrap();
        assert_eq!(device.host, "10.0.0.1");
        assert_eq!(device.port, 22);
        assert_eq!(device.label.as_str(), "corert01");
        assert_eq!(device.device_class, "RT");
        assert_eq!(device.vendor, "Cisco");
        assert_eq!(device.credentials.secret(), "pw");
    }

    #[test]
    fn descriptor_rejects_bad_port() {
        let mut bad = record();
        bad.port = "ssh".into();
        assert!(matches!(
            DeviceDescriptor::try_from(bad),
            Err(BackupError::InvalidDevice(_))
        ));

        let mut zero = record();
        zero.port = "0".into();
        assert!(DeviceDescriptor::try_from(zero).is_err());
    }

    #[test]
    fn explicit_secret_wins_over_password() {
        let mut rec = record();
        rec.secret = Some("enable-pw".into());
        let device = DeviceDescriptor::try_from(rec).unwrap();
        assert_eq!(device.credentials.secret(), "enable-pw");
    }

    #[test]
    fn credentials_debug_hides_password() {
        let device = DeviceDescriptor::try_from(record()).unwrap();
        let printed = format!("{:?}", device.credentials);
        assert!(!printed.contains("pw\""));
        assert!(printed.contains("redacted"));
    }

    #[test]
    fn artifact_timestamp_uses_day_first_format() {
        use chrono::TimeZone;
        let device = DeviceDescriptor::try_from(record()).unwrap();
        let at = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap();
        let artifact = BackupArtifact::new(&device, "cfg".into(), at);
        assert_eq!(artifact.timestamp(), "07_03_2024_09_05_02");
    }
}
