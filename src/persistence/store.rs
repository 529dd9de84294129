//! File-backed state store rooted at `<project>/.agentful`

use crate::persistence::{StateStore, StoreError};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::io::AsRawFd;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_POLL: Duration = Duration::from_millis(20);

/// State store keeping one file per key
///
/// Writes go through a temp file and a rename, and every mutation holds an
/// exclusive `flock` on a sibling lock file, so separate processes (CLI and
/// daemon) can share the same directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    /// Create a store rooted at `root` (created lazily on first write)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store for the standard `.agentful` directory of a project
    pub fn for_project(project_root: &Path) -> Self {
        Self::new(project_root.join(".agentful"))
    }

    /// Root directory of this store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of the file backing `key`
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn lock(&self, key: &str) -> Result<LockGuard, StoreError> {
        let path = self.path_for(key)?;
        let lock_path = path.with_file_name(format!(
            ".{}.lock",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        ));
        ensure_parent(key, &lock_path)?;

        // Lock files are left in place: unlinking would let a waiter lock a stale inode.
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| io_error(key, e))?;

        let deadline = Instant::now() + LOCK_TIMEOUT;
        loop {
            let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if ret == 0 {
                return Ok(LockGuard { file });
            }
            if Instant::now() >= deadline {
                return Err(StoreError::LockTimeout(key.to_string()));
            }
            std::thread::sleep(LOCK_POLL);
        }
    }

    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(key, e)),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        ensure_parent(key, &path)?;

        let tmp = temp_path(&path);
        std::fs::write(&tmp, value).map_err(|e| io_error(key, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_error(key, e))?;
        debug!(key = %key, bytes = value.len(), "State written");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(key, e)),
        }
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.read(key)
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock(key)?;
        self.write(key, value)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let _guard = self.lock(key)?;
        self.remove(key)
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool, StoreError> {
        let _guard = self.lock(key)?;
        let current = self.read(key)?;
        if current.as_deref() != expected {
            return Ok(false);
        }
        match new {
            Some(value) => self.write(key, value)?,
            None => {
                self.remove(key)?;
            }
        }
        Ok(true)
    }
}

/// Exclusive `flock` released on drop
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

fn ensure_parent(key: &str, path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error(key, e))?;
    }
    Ok(())
}

fn io_error(key: &str, source: std::io::Error) -> StoreError {
    StoreError::Io {
        key: key.to_string(),
        source,
    }
}

/// Hidden sibling of `path`, unique per write
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}
