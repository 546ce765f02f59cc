//! Cross-process advisory file locking.
//!
//! `kachery-store`'s stat-fingerprint cache guards its `.record.json` and
//! `.hints.json` side files with an advisory lock on a sibling `.lock` file,
//! shared for reads and exclusive for read-modify-write. This crate is the
//! thin wrapper around [`fs2`]'s OS-level advisory locking that gives those
//! callers a scoped guard instead of raw `lock`/`unlock` calls.
//!
//! There is deliberately no timeout: callers are expected to hold the lock
//! only for the duration of a small JSON read or write, and a stuck peer is
//! treated as an operational problem, not something this crate works around.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Whether a lock is held for shared (read) or exclusive (write) access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Multiple holders may hold a shared lock on the same path concurrently.
    Shared,
    /// Only one holder may hold an exclusive lock on a path at a time, and
    /// it excludes all shared holders too.
    Exclusive,
}

/// Acquire a shared (read) lock on `path`, blocking until it is available.
///
/// `path` is the lock file itself (callers pass e.g. `<record>.lock`, not the
/// record file it protects).
pub fn acquire_shared(path: &Path) -> io::Result<LockGuard> {
    acquire(path, Kind::Shared)
}

/// Acquire an exclusive (write) lock on `path`, blocking until it is available.
pub fn acquire_exclusive(path: &Path) -> io::Result<LockGuard> {
    acquire(path, Kind::Exclusive)
}

/// Acquire a lock of the given `kind` on `path`, blocking until it is available.
pub fn acquire(path: &Path, kind: Kind) -> io::Result<LockGuard> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // create_new is atomic: exactly one caller observes `created = true` for
    // a given path, the rest observe the file the first caller made.
    let (file, created) = match OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(f) => (f, true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            (OpenOptions::new().read(true).write(true).open(path)?, false)
        }
        Err(e) => return Err(e),
    };

    log::debug!("kachery-lock: acquiring {kind:?} lock on {}", path.display());
    match kind {
        Kind::Shared => file.lock_shared()?,
        Kind::Exclusive => file.lock_exclusive()?,
    }

    Ok(LockGuard {
        file,
        path: path.to_path_buf(),
        created,
    })
}

/// A held advisory lock, released on drop.
#[must_use = "the lock is released as soon as this guard is dropped"]
pub struct LockGuard {
    file: File,
    path: PathBuf,
    created: bool,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Unlock before unlinking: a peer still blocked in `lock_exclusive`
        // on this same file description must be woken by the OS-level
        // release, not find the path already gone.
        if let Err(e) = FileExt::unlock(&self.file) {
            log::warn!("kachery-lock: failed to unlock {}: {e}", self.path.display());
        }
        // Only the guard that created the lock file removes it, so a peer
        // that merely opened a pre-existing lock file never races to delete
        // one another holder still intends to reuse.
        if self.created {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != ErrorKind::NotFound {
                    log::warn!("kachery-lock: failed to remove {}: {e}", self.path.display());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn shared_locks_do_not_block_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.lock");

        let g1 = acquire_shared(&path).unwrap();
        let g2 = acquire_shared(&path).unwrap();
        drop(g1);
        drop(g2);
    }

    #[test]
    fn exclusive_lock_excludes_other_exclusive_holders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.lock");

        let entered = Arc::new(AtomicBool::new(false));
        let entered2 = Arc::clone(&entered);
        let path2 = path.clone();

        let guard = acquire_exclusive(&path).unwrap();

        let handle = thread::spawn(move || {
            let _g = acquire_exclusive(&path2).unwrap();
            entered2.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!entered.load(Ordering::SeqCst), "second exclusive lock acquired too early");

        drop(guard);
        handle.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
    }

    #[test]
    fn lock_file_is_removed_after_last_creator_drops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.lock");

        let guard = acquire_exclusive(&path).unwrap();
        assert!(path.exists());
        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dir").join("f.lock");
        let _guard = acquire_exclusive(&path).unwrap();
        assert!(path.exists());
    }
}
