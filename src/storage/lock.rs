//! Cooperative inter-process file lock.
//!
//! Acquisition is an atomic create-if-not-exists on a sidecar `<target>.lock`
//! path. The sidecar's JSON body records `{pid, timestamp, operation}` so a
//! later acquirer can tell whether the lock is stale: older than 30s, or
//! whose pid is no longer running. `withLock` guarantees release on every
//! exit path, including panics unwound through `Drop`.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CassMemoryError, Result};

const STALE_AFTER: Duration = Duration::from_secs(30);
const RETRY_DELAY: Duration = Duration::from_millis(500);
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Deserialize)]
struct LockContents {
    pid: u32,
    timestamp: DateTime<Utc>,
    operation: String,
}

fn lock_path_for(target: &Path) -> PathBuf {
    let mut os_string = target.as_os_str().to_owned();
    os_string.push(".lock");
    PathBuf::from(os_string)
}

fn pid_is_alive(pid: u32) -> bool {
    let system = sysinfo::System::new_all();
    system.process(sysinfo::Pid::from(pid as usize)).is_some()
}

fn is_stale(contents: &LockContents) -> bool {
    let age = Utc::now().signed_duration_since(contents.timestamp);
    let age = age.to_std().unwrap_or(Duration::ZERO);
    age > STALE_AFTER || !pid_is_alive(contents.pid)
}

/// A held lock; dropping it removes the sidecar file. Crash-safety for the
/// *holder* itself relies on the staleness check above, since a crash skips
/// `Drop`.
pub struct LockGuard {
    lock_path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

fn try_acquire(target: &Path, operation: &str) -> Result<Option<LockGuard>> {
    let lock_path = lock_path_for(target);

    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CassMemoryError::io(parent, e))?;
    }

    let contents = LockContents { pid: std::process::id(), timestamp: Utc::now(), operation: operation.to_string() };
    let serialized = serde_json::to_vec(&contents).map_err(|e| CassMemoryError::parse_json(&lock_path, e))?;

    match std::fs::OpenOptions::new().write(true).create_new(true).open(&lock_path) {
        Ok(mut file) => {
            use std::io::Write;
            file.write_all(&serialized).map_err(|e| CassMemoryError::io(&lock_path, e))?;
            Ok(Some(LockGuard { lock_path }))
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            if break_if_stale(&lock_path)? {
                // Stale lock removed; try once more immediately.
                try_acquire(target, operation)
            } else {
                Ok(None)
            }
        }
        Err(e) => Err(CassMemoryError::io(&lock_path, e)),
    }
}

/// If the existing lock at `lock_path` is stale, remove it and report true.
fn break_if_stale(lock_path: &Path) -> Result<bool> {
    let bytes = match std::fs::read(lock_path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true), // raced with release
        Err(e) => return Err(CassMemoryError::io(lock_path, e)),
    };

    let contents: LockContents = match serde_json::from_slice(&bytes) {
        Ok(c) => c,
        // An unparseable lock file is itself a sign of corruption/staleness.
        Err(_) => {
            let _ = std::fs::remove_file(lock_path);
            return Ok(true);
        }
    };

    if is_stale(&contents) {
        tracing::warn!(pid = contents.pid, operation = %contents.operation, "breaking stale lock");
        let _ = std::fs::remove_file(lock_path);
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Acquire the lock on `target`, retrying on contention (~500ms delay,
/// bounded at ~10s total), run `action`, then release unconditionally.
pub fn with_lock<T>(target: &Path, operation: &str, action: impl FnOnce() -> Result<T>) -> Result<T> {
    let start = Instant::now();
    let guard = loop {
        if let Some(guard) = try_acquire(target, operation)? {
            break guard;
        }
        if start.elapsed() >= ACQUIRE_TIMEOUT {
            return Err(CassMemoryError::Io {
                path: lock_path_for(target),
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out acquiring lock"),
            });
        }
        std::thread::sleep(RETRY_DELAY);
    };

    let result = action();
    drop(guard);
    result
}
