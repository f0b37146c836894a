//! Advisory file locking with bounded wait and best-effort fallback.
//!
//! Cross-process writers to the same state file coordinate through a
//! `.lock` sidecar file locked with `fs2`. The lock is advisory: if it
//! cannot be acquired within the bound, callers fall back to a local-only
//! write rather than failing the run (spec §7: "file-lock contention:
//! bounded wait then best-effort fallback to plain write, never crashes
//! the run").

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

/// Default bound on how long to wait for the lock before giving up.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(2);
/// Poll interval while waiting for the lock.
pub const DEFAULT_POLL: Duration = Duration::from_millis(25);
/// A lock file older than this is considered stale and force-broken.
pub const STALE_AFTER: Duration = Duration::from_secs(15);

/// A held advisory lock. Dropping it releases the OS-level flock.
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    fn lock_path_for(target: &Path) -> PathBuf {
        let mut name = target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        target.with_file_name(name)
    }

    /// Try to acquire the lock for `target`, polling up to `wait`.
    ///
    /// Returns `Ok(Some(lock))` on success, `Ok(None)` if the wait bound
    /// elapsed without acquiring it (caller should fall back to a
    /// local-only write), or `Err` only for unexpected I/O failures
    /// (e.g. the lock file's parent directory is unwritable).
    pub fn try_acquire(target: &Path, wait: Duration, poll: Duration) -> std::io::Result<Option<Self>> {
        let lock_path = Self::lock_path_for(target);
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        break_stale_lock(&lock_path);

        let deadline = Instant::now() + wait;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    touch(&lock_path);
                    return Ok(Some(FileLock {
                        _file: file,
                        path: lock_path,
                    }));
                }
                Err(_) if Instant::now() >= deadline => {
                    tracing::warn!(
                        path = %lock_path.display(),
                        "file lock contended past wait bound, falling back to local-only write"
                    );
                    return Ok(None);
                }
                Err(_) => std::thread::sleep(poll),
            }
        }
    }

    /// Acquire with the default bounds (spec: ~2s wait, 25ms poll).
    pub fn try_acquire_default(target: &Path) -> std::io::Result<Option<Self>> {
        Self::try_acquire(target, DEFAULT_WAIT, DEFAULT_POLL)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self._file);
        let _ = &self.path; // kept for diagnostics; lock file itself is left in place
    }
}

/// Refresh the lock file's mtime so staleness tracking reflects the
/// current holder.
fn touch(path: &Path) {
    let _ = filetime_touch(path);
}

#[cfg(unix)]
fn filetime_touch(path: &Path) -> std::io::Result<()> {
    // Re-opening with truncate(false) and a zero-byte write touches mtime
    // without disturbing lock state (the fd doing the locking is separate).
    use std::io::Write;
    let mut f = OpenOptions::new().write(true).open(path)?;
    f.write_all(b"")?;
    Ok(())
}

#[cfg(not(unix))]
fn filetime_touch(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// If the lock file's mtime is older than [`STALE_AFTER`], best-effort
/// remove it so a crashed holder doesn't wedge every future writer.
/// Removing the file while another process holds its fd open is safe on
/// Unix (the inode stays alive for that process); the next `open(create)`
/// simply creates a fresh inode for new lockers.
fn break_stale_lock(path: &Path) {
    if let Ok(meta) = std::fs::metadata(path) {
        if let Ok(modified) = meta.modified() {
            if modified.elapsed().unwrap_or_default() > STALE_AFTER {
                tracing::warn!(path = %path.display(), "breaking stale file lock");
                let _ = std::fs::remove_file(path);
            }
        }
    }
}
