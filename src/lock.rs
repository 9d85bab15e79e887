//! Two-tier bucket locking.
//!
//! Every canonical path maps to at most one [`Lock`] per process. The lock
//! wraps a single OS advisory lock (`flock` through `fs2`) that keeps
//! cooperating processes apart, and a reentrant mutex that keeps threads of
//! this process apart. The OS lock is taken when the reference count leaves
//! zero and dropped when it returns to zero.
//!
//! Advisory locks are per open file description, so opening the same path
//! twice in one process would make the process contend with itself. The
//! per-process table exists to prevent exactly that.
//!
//! Obtaining the OS lock is best effort: after the configured number of
//! attempts the caller proceeds without it and a warning is logged. Failing
//! to open the lock file at all is an error.

use crate::error::{Error, Result};
use fs2::FileExt;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

/// How hard to try for the OS advisory lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of attempts before proceeding without the OS lock.
    pub attempts: usize,
    /// Pause between attempts.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: crate::config::DEFAULT_LOCK_RETRY_ATTEMPTS,
            interval: Duration::from_secs(1),
        }
    }
}

/// A lock over one canonical path.
struct Lock {
    path: PathBuf,
    /// Lock file, opened once per lock lifetime
    file: Mutex<Option<File>>,
    /// Serializes the first opening and retry loop, never held by readers of `locked`
    opening: Mutex<()>,
    locked: AtomicBool,
    exclusive: ReentrantMutex<()>,
}

impl Lock {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: Mutex::new(None),
            opening: Mutex::new(()),
            locked: AtomicBool::new(false),
            exclusive: ReentrantMutex::new(()),
        }
    }

    /// Open the lock file and try for the OS lock, once per lock lifetime.
    fn ensure_os_lock(&self, policy: &RetryPolicy) -> Result<()> {
        let _opening = self.opening.lock();
        if self.file.lock().is_some() {
            return Ok(());
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        let mut locked = false;
        for attempt in 1..=policy.attempts {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    locked = true;
                    break;
                }
                Err(e) => {
                    log::debug!(
                        "Advisory lock attempt {}/{} on {:?} failed: {}",
                        attempt,
                        policy.attempts,
                        self.path,
                        e
                    );
                    if attempt < policy.attempts {
                        thread::sleep(policy.interval);
                    }
                }
            }
        }

        if !locked {
            log::warn!(
                "Could not obtain advisory lock on {:?} after {} attempts, proceeding without it",
                self.path,
                policy.attempts
            );
        }

        self.locked.store(locked, Ordering::Release);
        *self.file.lock() = Some(file);
        Ok(())
    }

    fn release_os_lock(&self) {
        if let Some(file) = self.file.lock().take() {
            if self.locked.swap(false, Ordering::AcqRel) {
                if let Err(e) = file.unlock() {
                    log::warn!("Failed to release advisory lock on {:?}: {}", self.path, e);
                }
            }
        }
    }
}

struct Entry {
    lock: Arc<Lock>,
    refs: usize,
}

/// Per-process table of reference-counted path locks.
pub struct LockManager {
    table: Mutex<HashMap<PathBuf, Entry>>,
    retry: RetryPolicy,
}

impl LockManager {
    /// Creates a lock manager with the default retry policy.
    pub fn new() -> Self {
        Self::with_retry(RetryPolicy::default())
    }

    /// Creates a lock manager with a custom default retry policy.
    pub fn with_retry(retry: RetryPolicy) -> Self {
        Self { table: Mutex::new(HashMap::new()), retry }
    }

    /// The process-wide lock manager shared by every cache.
    pub fn global() -> Arc<LockManager> {
        static GLOBAL: OnceLock<Arc<LockManager>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(LockManager::new())))
    }

    /// Acquire the lock for `path` using the manager's retry policy.
    pub fn acquire(&self, path: &Path) -> Result<LockHandle<'_>> {
        self.acquire_with(path, &self.retry)
    }

    /// Acquire the lock for `path`.
    ///
    /// The returned handle keeps the reference count up and releases it on
    /// drop. It does not by itself exclude other threads; call
    /// [`LockHandle::hold`] for that.
    pub fn acquire_with(&self, path: &Path, policy: &RetryPolicy) -> Result<LockHandle<'_>> {
        let canonical = canonical_path(path)?;

        let lock = {
            let mut table = self.table.lock();
            let entry = table.entry(canonical.clone()).or_insert_with(|| Entry {
                lock: Arc::new(Lock::new(canonical)),
                refs: 0,
            });
            entry.refs += 1;
            Arc::clone(&entry.lock)
        };

        // On error the handle's drop gives the reference back.
        let handle = LockHandle { manager: self, lock };
        handle.lock.ensure_os_lock(policy)?;
        Ok(handle)
    }

    /// Run `f` while holding the lock for `path` exclusively in this process.
    ///
    /// Reentrant: `f` may lock the same path again on the same thread.
    pub fn with_lock<T>(
        &self,
        path: &Path,
        policy: &RetryPolicy,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let handle = self.acquire_with(path, policy)?;
        let _guard = handle.hold();
        f()
    }

    /// Number of paths currently locked by this process.
    pub fn locks_held(&self) -> usize {
        self.table.lock().len()
    }

    /// Current reference count of the lock for `path`, 0 if not held.
    #[cfg(test)]
    pub(crate) fn ref_count(&self, path: &Path) -> usize {
        let Ok(canonical) = canonical_path(path) else {
            return 0;
        };
        self.table.lock().get(&canonical).map(|e| e.refs).unwrap_or(0)
    }

    fn release(&self, lock: &Arc<Lock>) {
        let mut table = self.table.lock();
        let last = match table.get_mut(&lock.path) {
            Some(entry) if Arc::ptr_eq(&entry.lock, lock) => {
                entry.refs -= 1;
                entry.refs == 0
            }
            _ => {
                log::error!("Released lock {:?} that is not in the lock table", lock.path);
                false
            }
        };

        if last {
            table.remove(&lock.path);
            // Still under the table mutex so a fresh acquirer of this path
            // cannot race the unlock.
            lock.release_os_lock();
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

/// A counted reference to a held path lock.
pub struct LockHandle<'a> {
    manager: &'a LockManager,
    lock: Arc<Lock>,
}

impl LockHandle<'_> {
    /// Canonical path this lock covers.
    pub fn path(&self) -> &Path {
        &self.lock.path
    }

    /// Whether the OS advisory lock was actually obtained.
    pub fn is_os_locked(&self) -> bool {
        self.lock.locked.load(Ordering::Acquire)
    }

    /// Exclude other threads of this process until the guard is dropped.
    pub fn hold(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lock.exclusive.lock()
    }
}

impl Drop for LockHandle<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.lock);
    }
}

/// Canonical absolute form of `path`. The file itself need not exist yet.
fn canonical_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::invalid_argument(format!("Not a file path: {:?}", path)))?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    Ok(parent.canonicalize()?.join(name))
}
