//! Keep-last-N retention for per-device backup directories.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::core::models::Label;
use crate::core::storage::{Storage, StorageLayout, backup_file_pattern};
use crate::error::BackupError;

/// Backups kept per device and location unless configured otherwise.
pub const DEFAULT_MAX_KEEP: usize = 4;

#[derive(Debug, Default)]
pub struct PruneReport {
    pub directory: PathBuf,
    pub kept: usize,
    pub deleted: usize,
    /// Per-file problems. They never stop the rest of the pass.
    pub failures: Vec<BackupError>,
}

#[derive(Clone)]
pub struct RetentionManager {
    storage: Arc<dyn Storage>,
    max_keep: usize,
}

impl RetentionManager {
    pub fn new(storage: Arc<dyn Storage>, max_keep: usize) -> Self {
        Self { storage, max_keep }
    }

    pub fn max_keep(&self) -> usize {
        self.max_keep
    }

    /// Deletes every backup of `label` in `directory` except the `max_keep`
    /// most recently modified ones. A missing directory is a no-op.
    pub fn prune(&self, directory: &Path, label: &Label) -> Result<PruneReport, BackupError> {
        let mut report = PruneReport {
            directory: directory.to_path_buf(),
            ..PruneReport::default()
        };

        if !self.storage.exists(directory) {
            debug!(dir = %directory.display(), "Nothing to prune");
            return Ok(report);
        }

        let pattern = backup_file_pattern(label);
        let files = self
            .storage
            .list_files(directory, &pattern)
            .map_err(|source| BackupError::Prune {
                path: directory.to_path_buf(),
                source,
            })?;

        let mut dated: Vec<(PathBuf, SystemTime)> = Vec::with_capacity(files.len());
        for path in files {
            match self.storage.modified(&path) {
                Ok(mtime) => dated.push((path, mtime)),
                Err(source) => {
                    warn!(path = %path.display(), error = %source, "Cannot read modification time");
                    report.failures.push(BackupError::Prune { path, source });
                }
            }
        }

        // Newest first; stable, so ties stay in listing order.
        dated.sort_by(|a, b| b.1.cmp(&a.1));

        let excess = dated.len().saturating_sub(self.max_keep);
        report.kept = dated.len() - excess;

        for (path, _) in dated.into_iter().skip(self.max_keep) {
            match self.storage.delete_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "Deleted old backup");
                    report.deleted += 1;
                }
                Err(source) => {
                    warn!(path = %path.display(), error = %source, "Failed to delete old backup");
                    report.failures.push(BackupError::Prune { path, source });
                }
            }
        }

        if report.deleted > 0 {
            info!(
                dir = %directory.display(),
                deleted = report.deleted,
                kept = report.kept,
                "Pruned old backups"
            );
        }

        Ok(report)
    }

    /// Prunes the primary and, if the redundancy store is available and the
    /// directory exists, the mirror directory of one device. Listing failures
    /// are folded into the returned reports.
    pub fn prune_device(
        &self,
        layout: &StorageLayout,
        device_class: &str,
        label: &Label,
        mirror_available: bool,
    ) -> (PruneReport, Option<PruneReport>) {
        let primary = self.prune_or_report(&layout.primary_dir(device_class, label), label);

        let mirror_dir = layout.mirror_dir(device_class, label);
        let mirror = if !mirror_available {
            debug!(dir = %mirror_dir.display(), "Redundancy store unavailable, leaving mirror alone");
            None
        } else if self.storage.exists(&mirror_dir) {
            Some(self.prune_or_report(&mirror_dir, label))
        } else {
            debug!(dir = %mirror_dir.display(), "Mirror directory absent, skipping");
            None
        };

        (primary, mirror)
    }

    fn prune_or_report(&self, directory: &Path, label: &Label) -> PruneReport {
        self.prune(directory, label).unwrap_or_else(|e| {
            warn!(dir = %directory.display(), error = %e, "Retention pass failed");
            PruneReport {
                directory: directory.to_path_buf(),
                failures: vec![e],
                ..PruneReport::default()
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStorage;
    use std::time::Duration;

    fn label() -> Label {
        Label::sanitize("rt1").unwrap()
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000 + secs)
    }

    fn name(day: u32) -> String {
        format!("bkp_rt1_{day:02}_01_2024_00_00_00.txt")
    }

    fn seed(storage: &MemoryStorage, dir: &Path, count: u32) -> Vec<PathBuf> {
        (1..=count)
            .map(|i| {
                let path = dir.join(name(i));
                storage.insert_file(&path, b"cfg", at(u64::from(i)));
                path
            })
            .collect()
    }

    #[test]
    fn keeps_newest_and_deletes_the_rest() {
        let storage = Arc::new(MemoryStorage::new());
        let dir = Path::new("/b/C/RT/rt1");
        let files = seed(&storage, dir, 6);

        let report = RetentionManager::new(storage.clone(), 4).prune(dir, &label()).unwrap();

        assert_eq!(report.deleted, 2);
        assert_eq!(report.kept, 4);
        let remaining = storage.files_in(dir);
        assert_eq!(remaining, files[2..].to_vec());
    }

    #[test]
    fn ordering_is_by_mtime_not_name() {
        let storage = Arc::new(MemoryStorage::new());
        let dir = Path::new("/b/C/RT/rt1");
        // Names sort opposite to modification times.
        for i in 1..=5u32 {
            storage.insert_file(dir.join(name(i)), b"", at(u64::from(10 - i)));
        }

        RetentionManager::new(storage.clone(), 4).prune(dir, &label()).unwrap();

        let remaining = storage.files_in(dir);
        assert_eq!(remaining.len(), 4);
        assert!(!remaining.contains(&dir.join(name(5))));
    }

    #[test]
    fn at_or_below_limit_deletes_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        let dir = Path::new("/b/C/RT/rt1");
        seed(&storage, dir, 4);

        let report = RetentionManager::new(storage.clone(), 4).prune(dir, &label()).unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(storage.files_in(dir).len(), 4);
    }

    #[test]
    fn missing_directory_is_noop() {
        let storage = Arc::new(MemoryStorage::new());
        let report = RetentionManager::new(storage, 4)
            .prune(Path::new("/nope"), &label())
            .unwrap();
        assert_eq!(report.deleted, 0);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn foreign_files_are_ignored() {
        let storage = Arc::new(MemoryStorage::new());
        let dir = Path::new("/b/C/RT/rt1");
        seed(&storage, dir, 5);
        storage.insert_file(dir.join("notes.txt"), b"", at(0));
        storage.insert_file(dir.join("bkp_rt10_01_01_2024_00_00_00.txt"), b"", at(0));

        let report = RetentionManager::new(storage.clone(), 4).prune(dir, &label()).unwrap();

        assert_eq!(report.deleted, 1);
        assert!(storage.read(&dir.join("notes.txt")).is_some());
        assert!(storage.read(&dir.join("bkp_rt10_01_01_2024_00_00_00.txt")).is_some());
    }

    #[test]
    fn delete_failure_does_not_stop_pass() {
        let storage = Arc::new(MemoryStorage::new());
        let dir = Path::new("/b/C/RT/rt1");
        let files = seed(&storage, dir, 6);
        storage.fail_delete(files[0].clone());

        let report = RetentionManager::new(storage.clone(), 4).prune(dir, &label()).unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(storage.read(&files[0]).is_some());
        assert!(storage.read(&files[1]).is_none());
    }

    #[test]
    fn prune_device_covers_both_locations() {
        let storage = Arc::new(MemoryStorage::new());
        let layout = StorageLayout::new("/b", "/m", "c");
        seed(&storage, &layout.primary_dir("RT", &label()), 6);
        seed(&storage, &layout.mirror_dir("RT", &label()), 5);

        let (primary, mirror) =
            RetentionManager::new(storage.clone(), 4).prune_device(&layout, "RT", &label(), true);

        assert_eq!(primary.deleted, 2);
        assert_eq!(mirror.unwrap().deleted, 1);
    }

    #[test]
    fn prune_device_skips_missing_mirror() {
        let storage = Arc::new(MemoryStorage::new());
        let layout = StorageLayout::new("/b", "/m", "c");
        seed(&storage, &layout.primary_dir("RT", &label()), 2);

        let (primary, mirror) =
            RetentionManager::new(storage, 4).prune_device(&layout, "RT", &label(), true);

        assert_eq!(primary.deleted, 0);
        assert!(mirror.is_none());
    }

    #[test]
    fn unavailable_mirror_is_never_pruned() {
        let storage = Arc::new(MemoryStorage::new());
        let layout = StorageLayout::new("/b", "/m", "c");
        seed(&storage, &layout.primary_dir("RT", &label()), 5);
        seed(&storage, &layout.mirror_dir("RT", &label()), 6);

        let (primary, mirror) =
            RetentionManager::new(storage.clone(), 4).prune_device(&layout, "RT", &label(), false);

        assert_eq!(primary.deleted, 1);
        assert!(mirror.is_none());
        assert_eq!(storage.files_in(&layout.mirror_dir("RT", &label())).len(), 6);
    }
}
