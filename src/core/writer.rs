use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::models::BackupArtifact;
use crate::core::storage::{Storage, StorageLayout, backup_file_name};
use crate::error::BackupError;

/// Closing line of every backup file.
pub const END_OF_SESSION_MARKER: &str = "--- End of session log ---";

/// What happened to the redundancy copy. None of these undo the primary write.
#[derive(Debug)]
pub enum MirrorOutcome {
    Mirrored(PathBuf),
    /// The redundancy store was not mounted; nothing was touched.
    Unavailable(BackupError),
    Failed(BackupError),
}

impl MirrorOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Mirrored(path) => Some(path),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MirrorOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mirrored(path) => write!(f, "mirrored to {}", path.display()),
            Self::Unavailable(e) => write!(f, "skipped: {e}"),
            Self::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

#[derive(Debug)]
pub struct WriteReceipt {
    pub primary: PathBuf,
    pub mirror: MirrorOutcome,
}

/// Persists artifacts under the primary root and mirrors them to the
/// redundancy root when that store is available.
#[derive(Clone)]
pub struct BackupWriter {
    storage: Arc<dyn Storage>,
    layout: StorageLayout,
    require_mount: bool,
    session_log: bool,
}

impl BackupWriter {
    pub fn new(storage: Arc<dyn Storage>, layout: StorageLayout) -> Self {
        Self {
            storage,
            layout,
            require_mount: true,
            session_log: false,
        }
    }

    /// When false, an existing redundancy root counts as available even if it
    /// is not a mount point.
    pub fn require_mount(mut self, require: bool) -> Self {
        self.require_mount = require;
        self
    }

    /// Also append every capture to the per-class, per-vendor session log.
    pub fn session_log(mut self, enabled: bool) -> Self {
        self.session_log = enabled;
        self
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn primary_path(&self, artifact: &BackupArtifact) -> PathBuf {
        self.layout
            .primary_dir(&artifact.device_class, &artifact.label)
            .join(backup_file_name(&artifact.label, &artifact.timestamp()))
    }

    pub fn write(&self, artifact: &BackupArtifact) -> Result<WriteReceipt, BackupError> {
        if self.session_log {
            self.append_session_log(artifact);
        }

        let dir = self.layout.primary_dir(&artifact.device_class, &artifact.label);
        let path = self.primary_path(artifact);

        self.storage
            .make_dirs(&dir)
            .map_err(|source| BackupError::Write {
                path: dir.clone(),
                source,
            })?;

        self.storage
            .write_file(&path, render(&artifact.content).as_bytes())
            .map_err(|source| BackupError::Write {
                path: path.clone(),
                source,
            })?;

        info!(
            label = %artifact.label,
            host = %artifact.host,
            path = %path.display(),
            "Backup written"
        );

        let mirror = self.mirror(artifact, &path);
        Ok(WriteReceipt {
            primary: path,
            mirror,
        })
    }

    /// Checked before every mirror attempt; the store may come and go.
    pub fn redundancy_available(&self) -> bool {
        let root = &self.layout.redundancy_root;
        if self.require_mount {
            self.storage.is_mounted(root)
        } else {
            self.storage.exists(root)
        }
    }

    fn mirror(&self, artifact: &BackupArtifact, primary: &Path) -> MirrorOutcome {
        if !self.redundancy_available() {
            let err = BackupError::RedundancyUnavailable {
                path: self.layout.redundancy_root.clone(),
            };
            warn!(label = %artifact.label, error = %err, "Skipping redundancy copy");
            return MirrorOutcome::Unavailable(err);
        }

        let dir = self.layout.mirror_dir(&artifact.device_class, &artifact.label);
        let target = dir.join(backup_file_name(&artifact.label, &artifact.timestamp()));

        let copied = self
            .storage
            .make_dirs(&dir)
            .and_then(|()| self.storage.copy_file(primary, &target));

        match copied {
            Ok(()) => {
                info!(label = %artifact.label, path = %target.display(), "Backup mirrored");
                MirrorOutcome::Mirrored(target)
            }
            Err(source) => {
                let err = BackupError::Write {
                    path: target,
                    source,
                };
                warn!(label = %artifact.label, error = %err, "Redundancy copy failed");
                MirrorOutcome::Failed(err)
            }
        }
    }

    fn append_session_log(&self, artifact: &BackupArtifact) {
        let path = self
            .layout
            .session_log(&artifact.device_class, &artifact.vendor);
        let entry = format!(
            "{} - Backup started for: {} ({})\n{}",
            artifact.timestamp(),
            artifact.label,
            artifact.host,
            render(&artifact.content)
        );

        let appended = self
            .storage
            .make_dirs(&self.layout.log_dir())
            .and_then(|()| self.storage.append_file(&path, entry.as_bytes()));

        if let Err(e) = appended {
            warn!(path = %path.display(), error = %e, "Failed to append session log");
        }
    }
}

/// Captured output followed by the end-of-session marker line.
pub fn render(content: &str) -> String {
    format!("{content}\n\n{END_OF_SESSION_MARKER}\n")
}
