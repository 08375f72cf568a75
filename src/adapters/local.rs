use regex::Regex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

use crate::core::storage::Storage;

/// Buffer size for backup file writes
const BUFFER_SIZE: usize = 128 * 1024;

/// The real filesystem.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    /// Whether to fsync each file after writing
    pub sync_files: bool,
}

impl Default for LocalStorage {
    fn default() -> Self {
        Self { sync_files: true }
    }
}

impl LocalStorage {
    fn finish(&self, writer: BufWriter<File>) -> io::Result<()> {
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        if self.sync_files {
            file.sync_all()?;
        }
        Ok(())
    }
}

impl Storage for LocalStorage {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_mounted(&self, path: &Path) -> bool {
        let Ok(path) = path.canonicalize() else {
            return false;
        };
        let Ok(metadata) = fs::metadata(&path) else {
            return false;
        };
        if !metadata.is_dir() {
            return false;
        }

        let Some(parent) = path.parent() else {
            // Filesystem root
            return true;
        };
        match fs::metadata(parent) {
            Ok(parent_meta) => {
                parent_meta.dev() != metadata.dev() || parent_meta.ino() == metadata.ino()
            }
            Err(e) => {
                debug!(path = %parent.display(), error = %e, "Cannot stat parent of mount candidate");
                false
            }
        }
    }

    fn make_dirs(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn write_file(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::with_capacity(BUFFER_SIZE, file);
        writer.write_all(content)?;
        self.finish(writer)
    }

    fn append_file(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::with_capacity(BUFFER_SIZE, file);
        writer.write_all(content)?;
        self.finish(writer)
    }

    fn copy_file(&self, src: &Path, dst: &Path) -> io::Result<()> {
        fs::copy(src, dst)?;

        if self.sync_files {
            File::open(dst)?.sync_all()?;
        }

        let metadata = fs::metadata(src)?;
        let atime = filetime::FileTime::from_last_access_time(&metadata);
        let mtime = filetime::FileTime::from_last_modification_time(&metadata);
        filetime::set_file_times(dst, atime, mtime)
    }

    fn list_files(&self, dir: &Path, pattern: &Regex) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            // file_type() does not follow symlinks
            if !entry.file_type()?.is_file() {
                continue;
            }
            if entry.file_name().to_str().is_some_and(|name| pattern.is_match(name)) {
                files.push(entry.path());
            }
        }
        Ok(files)
    }

    fn delete_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        fs::metadata(path)?.modified()
    }
}
