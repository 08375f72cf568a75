//! Per-directory locks for concurrent batches.
//!
//! Writes and retention passes for one device directory must not overlap,
//! otherwise a prune could list a file another worker is about to replace.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Thread-safe table of one async mutex per directory key.
#[derive(Clone, Default)]
pub struct DirectoryLocks {
    inner: Arc<RwLock<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl DirectoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until `dir` is free and holds it until the guard is dropped.
    pub async fn acquire(&self, dir: &Path) -> OwnedMutexGuard<()> {
        let existing = {
            let map = self.inner.read().await;
            map.get(dir).cloned()
        };

        let lock = match existing {
            Some(lock) => lock,
            None => {
                let mut map = self.inner.write().await;
                map.entry(dir.to_path_buf()).or_default().clone()
            }
        };

        lock.lock_owned().await
    }

    /// Number of directories seen so far.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn same_directory_is_exclusive() {
        let locks = DirectoryLocks::new();
        let dir = Path::new("/b/C/RT/rt1");

        let guard = locks.acquire(dir).await;
        let second = timeout(Duration::from_millis(50), locks.acquire(dir)).await;
        assert!(second.is_err(), "second acquire should block");

        drop(guard);
        let third = timeout(Duration::from_millis(50), locks.acquire(dir)).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn different_directories_do_not_block() {
        let locks = DirectoryLocks::new();
        let _a = locks.acquire(Path::new("/b/C/RT/rt1")).await;
        let b = timeout(Duration::from_millis(50), locks.acquire(Path::new("/b/C/RT/rt2"))).await;
        assert!(b.is_ok());
        assert_eq!(locks.len().await, 2);
    }
}
