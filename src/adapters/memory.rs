//! In-memory [`Storage`] with failure injection.
//!
//! Every write advances a logical clock by one second, so files written later
//! are always strictly newer. Listing order is path order.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use crate::core::storage::Storage;

#[derive(Debug, Clone)]
struct MemFile {
    data: Vec<u8>,
    modified: SystemTime,
}

#[derive(Debug)]
struct State {
    files: BTreeMap<PathBuf, MemFile>,
    dirs: BTreeSet<PathBuf>,
    mounts: BTreeSet<PathBuf>,
    failing_deletes: BTreeSet<PathBuf>,
    /// Writes under any of these prefixes fail.
    failing_writes: BTreeSet<PathBuf>,
    clock: SystemTime,
}

impl State {
    fn tick(&mut self) -> SystemTime {
        self.clock += Duration::from_secs(1);
        self.clock
    }

    fn add_dirs(&mut self, path: &Path) {
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            self.dirs.insert(ancestor.to_path_buf());
        }
    }

    fn check_writable(&self, path: &Path) -> io::Result<()> {
        if self.failing_writes.iter().any(|p| path.starts_with(p)) {
            return Err(io::Error::new(
                ErrorKind::PermissionDenied,
                format!("write to {} refused", path.display()),
            ));
        }
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && !self.dirs.contains(parent) => {
                Err(io::Error::new(
                    ErrorKind::NotFound,
                    format!("{} does not exist", parent.display()),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug)]
pub struct MemoryStorage {
    state: Mutex<State>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                files: BTreeMap::new(),
                dirs: BTreeSet::new(),
                mounts: BTreeSet::new(),
                failing_deletes: BTreeSet::new(),
                failing_writes: BTreeSet::new(),
                clock: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `path` as a mounted, existing directory.
    pub fn mount(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut state = self.state();
        state.add_dirs(&path);
        state.mounts.insert(path);
    }

    /// The directory stays, but is no longer a mount point.
    pub fn unmount(&self, path: &Path) {
        self.state().mounts.remove(path);
    }

    pub fn fail_delete(&self, path: impl Into<PathBuf>) {
        self.state().failing_deletes.insert(path.into());
    }

    pub fn fail_writes_under(&self, prefix: impl Into<PathBuf>) {
        self.state().failing_writes.insert(prefix.into());
    }

    /// Places a file with an explicit modification time, creating parents.
    pub fn insert_file(&self, path: impl Into<PathBuf>, data: &[u8], modified: SystemTime) {
        let path = path.into();
        let mut state = self.state();
        if let Some(parent) = path.parent() {
            state.add_dirs(parent);
        }
        state.files.insert(
            path,
            MemFile {
                data: data.to_vec(),
                modified,
            },
        );
    }

    pub fn read(&self, path: &Path) -> Option<Vec<u8>> {
        self.state().files.get(path).map(|f| f.data.clone())
    }

    pub fn read_string(&self, path: &Path) -> Option<String> {
        self.read(path).map(|d| String::from_utf8_lossy(&d).into_owned())
    }

    /// Files directly inside `dir`.
    pub fn files_in(&self, dir: &Path) -> Vec<PathBuf> {
        self.state()
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .cloned()
            .collect()
    }

    /// Every file under `prefix`, at any depth.
    pub fn files_under(&self, prefix: &Path) -> Vec<PathBuf> {
        self.state()
            .files
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect()
    }
}

impl Storage for MemoryStorage {
    fn exists(&self, path: &Path) -> bool {
        let state = self.state();
        state.dirs.contains(path) || state.files.contains_key(path)
    }

    fn is_mounted(&self, path: &Path) -> bool {
        self.state().mounts.contains(path)
    }

    fn make_dirs(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state();
        if state.files.contains_key(path) {
            return Err(io::Error::new(
                ErrorKind::AlreadyExists,
                format!("{} is a file", path.display()),
            ));
        }
        if state.failing_writes.iter().any(|p| path.starts_with(p)) {
            return Err(io::Error::new(
                ErrorKind::PermissionDenied,
                format!("mkdir {} refused", path.display()),
            ));
        }
        state.add_dirs(path);
        Ok(())
    }

    fn write_file(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        let mut state = self.state();
        state.check_writable(path)?;
        let modified = state.tick();
        state.files.insert(
            path.to_path_buf(),
            MemFile {
                data: content.to_vec(),
                modified,
            },
        );
        Ok(())
    }

    fn append_file(&self, path: &Path, content: &[u8]) -> io::Result<()> {
        let mut state = self.state();
        state.check_writable(path)?;
        let modified = state.tick();
        let file = state
            .files
            .entry(path.to_path_buf())
            .or_insert_with(|| MemFile {
                data: Vec::new(),
                modified,
            });
        file.data.extend_from_slice(content);
        file.modified = modified;
        Ok(())
    }

    fn copy_file(&self, src: &Path, dst: &Path) -> io::Result<()> {
        let mut state = self.state();
        let source = state.files.get(src).cloned().ok_or_else(|| {
            io::Error::new(ErrorKind::NotFound, format!("{} not found", src.display()))
        })?;
        state.check_writable(dst)?;
        state.files.insert(dst.to_path_buf(), source);
        Ok(())
    }

    fn list_files(&self, dir: &Path, pattern: &Regex) -> io::Result<Vec<PathBuf>> {
        let state = self.state();
        if !state.dirs.contains(dir) {
            return Err(io::Error::new(
                ErrorKind::NotFound,
                format!("{} not found", dir.display()),
            ));
        }
        Ok(state
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| pattern.is_match(n))
            })
            .cloned()
            .collect())
    }

    fn delete_file(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state();
        if state.failing_deletes.contains(path) {
            return Err(io::Error::new(
                ErrorKind::PermissionDenied,
                format!("delete {} refused", path.display()),
            ));
        }
        state
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(ErrorKind::NotFound, format!("{} not found", path.display())))
    }

    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        self.state()
            .files
            .get(path)
            .map(|f| f.modified)
            .ok_or_else(|| io::Error::new(ErrorKind::NotFound, format!("{} not found", path.display())))
    }
}
