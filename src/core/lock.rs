//! Cross-process exclusivity lock backed by a JSON lock file

use crate::error::LockError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Contents of the lock file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockPayload {
    pub pid: i64,
    /// Unix epoch seconds.
    pub started_at: f64,
    pub assets: Vec<String>,
    pub intervals: Vec<String>,
}

impl LockPayload {
    pub fn for_current_process(assets: Vec<String>, intervals: Vec<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            pid: i64::from(std::process::id()),
            started_at: now.timestamp_millis() as f64 / 1000.0,
            assets,
            intervals,
        }
    }
}

/// Whether a process with this pid exists.
///
/// EPERM means the process exists but belongs to someone else.
#[cfg(unix)]
pub fn pid_alive(pid: i64) -> bool {
    if pid <= 0 || pid > i64::from(i32::MAX) {
        return false;
    }
    // SAFETY: signal 0 performs the permission and existence check only.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn pid_alive(pid: i64) -> bool {
    pid > 0
}

/// Owner pid recorded in a lock file, `None` when missing or unreadable.
pub fn read_owner_pid(path: &Path) -> Option<i64> {
    let raw = fs::read_to_string(path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
    value.get("pid")?.as_i64()
}

pub struct ExclusivityLock {
    path: PathBuf,
}

impl ExclusivityLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn owner_pid(&self) -> Option<i64> {
        read_owner_pid(&self.path)
    }

    /// Try to take the lock. `Ok(false)` means a live process already holds it.
    pub fn acquire(&self, payload: &LockPayload) -> Result<bool, LockError> {
        if self.try_create(payload)? {
            info!(path = %self.path.display(), pid = payload.pid, "Acquired lock");
            return Ok(true);
        }

        let owner = self.owner_pid();
        if let Some(pid) = owner.filter(|pid| pid_alive(*pid)) {
            debug!(path = %self.path.display(), owner_pid = pid, "Lock held by live process");
            return Ok(false);
        }

        warn!(path = %self.path.display(), owner_pid = ?owner, "Reclaiming stale lock");
        if !self.reclaim_if_owned_by(owner)? {
            debug!(path = %self.path.display(), "Lock changed hands while reclaiming");
            return Ok(false);
        }

        if self.try_create(payload)? {
            info!(path = %self.path.display(), pid = payload.pid, "Acquired lock after reclaiming");
            return Ok(true);
        }
        Ok(false)
    }

    /// Remove the lock file only if it still names `observed` as its owner.
    ///
    /// The file is renamed aside before its owner is checked, so a lock that
    /// another reclaimer created in the meantime is linked back rather than
    /// deleted. Returns `false` when the lock changed hands.
    pub fn reclaim_if_owned_by(&self, observed: Option<i64>) -> Result<bool, LockError> {
        let aside = self.sibling("stale");
        match fs::rename(&self.path, &aside) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(self.io_error(e)),
        }

        if read_owner_pid(&aside) == observed {
            fs::remove_file(&aside).map_err(|e| self.io_error(e))?;
            return Ok(true);
        }

        let restored = fs::hard_link(&aside, &self.path);
        let _ = fs::remove_file(&aside);
        match restored {
            Ok(()) => Ok(false),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// Remove the lock file. A missing file is not an error.
    pub fn release(&self) -> Result<(), LockError> {
        self.remove_file()?;
        debug!(path = %self.path.display(), "Released lock");
        Ok(())
    }

    fn remove_file(&self) -> Result<(), LockError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LockError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn io_error(&self, source: std::io::Error) -> LockError {
        LockError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// A process-unique hidden path next to the lock file.
    fn sibling(&self, tag: &str) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "lock".to_string());
        self.dir().join(format!(
            ".{}.{}.{}.{}",
            file_name,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed),
            tag
        ))
    }

    /// Write the payload to a private temp file, then hard-link it into place.
    /// The link fails if the lock path exists, so readers never see a partial file.
    fn try_create(&self, payload: &LockPayload) -> Result<bool, LockError> {
        let body = serde_json::to_vec(payload)?;
        fs::create_dir_all(self.dir()).map_err(|e| self.io_error(e))?;
        let temp = self.sibling("tmp");

        fs::write(&temp, &body).map_err(|e| self.io_error(e))?;
        let linked = fs::hard_link(&temp, &self.path);
        let _ = fs::remove_file(&temp);

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(self.io_error(e)),
        }
    }
}
