//! Filesystem seam and the on-disk layout of backups.
//!
//! Layout: `<root>/<CLIENT>/<DEVICE_CLASS>/<label>/bkp_<label>_<timestamp>.txt`,
//! identical under the primary and the redundancy root.

use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::core::models::{Label, sanitize_component};

/// Filesystem operations the backup pipeline relies on.
///
/// Implementations are blocking; async callers go through `spawn_blocking`.
pub trait Storage: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    /// True when `path` is an available mount point.
    fn is_mounted(&self, path: &Path) -> bool;

    /// Creates `path` and its parents. Succeeds if it already exists.
    fn make_dirs(&self, path: &Path) -> io::Result<()>;

    /// Creates or truncates `path`.
    fn write_file(&self, path: &Path, content: &[u8]) -> io::Result<()>;

    fn append_file(&self, path: &Path, content: &[u8]) -> io::Result<()>;

    /// Byte-for-byte copy, keeping the source's modification time.
    fn copy_file(&self, src: &Path, dst: &Path) -> io::Result<()>;

    /// Regular files directly inside `dir` whose file name matches `pattern`,
    /// in the order the filesystem lists them.
    fn list_files(&self, dir: &Path, pattern: &Regex) -> io::Result<Vec<PathBuf>>;

    fn delete_file(&self, path: &Path) -> io::Result<()>;

    fn modified(&self, path: &Path) -> io::Result<SystemTime>;
}

/// Path scheme for one client's backups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    pub backup_root: PathBuf,
    pub redundancy_root: PathBuf,
    client: String,
}

impl StorageLayout {
    /// The client name is uppercased and sanitized like any other component.
    pub fn new(
        backup_root: impl Into<PathBuf>,
        redundancy_root: impl Into<PathBuf>,
        client: &str,
    ) -> Self {
        Self {
            backup_root: backup_root.into(),
            redundancy_root: redundancy_root.into(),
            client: sanitize_component(client).to_uppercase(),
        }
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn primary_dir(&self, device_class: &str, label: &Label) -> PathBuf {
        device_dir(&self.backup_root, &self.client, device_class, label)
    }

    pub fn mirror_dir(&self, device_class: &str, label: &Label) -> PathBuf {
        device_dir(&self.redundancy_root, &self.client, device_class, label)
    }

    /// `<backupRoot>/<CLIENT>/log`
    pub fn log_dir(&self) -> PathBuf {
        self.backup_root.join(&self.client).join("log")
    }

    pub fn session_log(&self, device_class: &str, vendor: &str) -> PathBuf {
        let vendor = sanitize_component(vendor).to_lowercase();
        self.log_dir()
            .join(format!("backup_{device_class}_{vendor}.log"))
    }
}

fn device_dir(root: &Path, client: &str, device_class: &str, label: &Label) -> PathBuf {
    root.join(client)
        .join(sanitize_component(device_class))
        .join(label.as_str())
}

pub fn backup_file_name(label: &Label, timestamp: &str) -> String {
    format!("bkp_{}_{}.txt", label.as_str(), timestamp)
}

/// Matches the backup files of exactly one label.
pub fn backup_file_pattern(label: &Label) -> Regex {
    let pattern = format!(
        r"^bkp_{}_\d{{2}}_\d{{2}}_\d{{4}}_\d{{2}}_\d{{2}}_\d{{2}}\.txt$",
        regex::escape(label.as_str())
    );
    Regex::new(&pattern).expect("label is sanitized")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(s: &str) -> Label {
        Label::sanitize(s).unwrap()
    }

    #[test]
    fn layout_builds_client_class_label_dirs() {
        let layout = StorageLayout::new("/root/backup", "/mnt/backup", "acme isp");
        assert_eq!(layout.client(), "ACMEISP");
        assert_eq!(
            layout.primary_dir("OLT", &label("olt-01")),
            PathBuf::from("/root/backup/ACMEISP/OLT/olt-01")
        );
        assert_eq!(
            layout.mirror_dir("OLT", &label("olt-01")),
            PathBuf::from("/mnt/backup/ACMEISP/OLT/olt-01")
        );
        assert_eq!(layout.log_dir(), PathBuf::from("/root/backup/ACMEISP/log"));
    }

    #[test]
    fn client_cannot_escape_root() {
        let layout = StorageLayout::new("/root/backup", "/mnt/backup", "../../etc");
        assert_eq!(layout.client(), "ETC");
    }

    #[test]
    fn session_log_name_includes_class_and_vendor() {
        let layout = StorageLayout::new("/b", "/m", "c");
        assert_eq!(
            layout.session_log("RT", "Huawei-RT"),
            PathBuf::from("/b/C/log/backup_RT_huawei-rt.log")
        );
    }

    #[test]
    fn pattern_matches_only_own_label() {
        let pattern = backup_file_pattern(&label("rt1"));
        assert!(pattern.is_match("bkp_rt1_01_02_2024_10_11_12.txt"));
        assert!(!pattern.is_match("bkp_rt10_01_02_2024_10_11_12.txt"));
        assert!(!pattern.is_match("bkp_rt1_01_02_2024_10_11_12.txt.bak"));
        assert!(!pattern.is_match("notes.txt"));
    }

    #[test]
    fn file_name_format() {
        assert_eq!(
            backup_file_name(&label("sw-3"), "31_12_2023_23_59_59"),
            "bkp_sw-3_31_12_2023_23_59_59.txt"
        );
    }
}
