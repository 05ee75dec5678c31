//! UUCP-style device lock files (`LCK..devname`).
//!
//! Grounded on `uucp_mk_lock`/`uucp_rm_lock` (referenced but not defined in
//! `examples/original_source/gensio/sergensio_termios.c` — spec.md §4.2/§6
//! treats the lock-file collaborator as external) and on the HDB UUCP lock
//! format: an 11-byte ASCII file holding the owning PID, right-justified in
//! the first 10 bytes and newline-terminated, at `<spool>/LCK..<basename>`.
//!
//! Because this crate has no external lock-file collaborator to delegate
//! to, the format is implemented directly here. The spool directory is
//! injectable so tests never touch `/var/lock` (spec.md §8).

use crate::error::{Error, Result};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Default UUCP spool directory on Linux distributions that still populate
/// one (most modern distros use `/run/lock` instead; both are common).
pub const DEFAULT_SPOOL_DIR: &str = "/var/lock";

/// A held UUCP lock. Dropping it removes the lock file if it still names
/// this process's PID.
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Path of the lock file on disk, for diagnostics.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if owner_pid(&self.path) == Some(std::process::id()) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Attempt to acquire the lock for `device_path` under `spool_dir`.
///
/// If an existing lock file names a PID that is no longer running, it is
/// treated as stale and removed before retrying once, matching the
/// conventional UUCP "stale lock" recovery behavior. Otherwise, a live lock
/// fails the open with `ErrorKind::Busy` (spec.md §4.2: "Locking" state,
/// "the open call fails immediately" on contention).
pub fn try_acquire(spool_dir: &Path, device_path: &str) -> Result<LockGuard> {
    let lock_path = lock_path_for(spool_dir, device_path);
    match acquire_once(&lock_path) {
        Ok(guard) => Ok(guard),
        Err(e) if e.kind == crate::error::ErrorKind::Busy => {
            if let Some(pid) = owner_pid(&lock_path) {
                if !process_alive(pid) {
                    let _ = std::fs::remove_file(&lock_path);
                    return acquire_once(&lock_path);
                }
            }
            Err(e)
        }
        Err(e) => Err(e),
    }
}

fn acquire_once(lock_path: &Path) -> Result<LockGuard> {
    use std::fs::OpenOptions;
    use std::os::unix::fs::OpenOptionsExt;

    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o644)
        .open(lock_path)
    {
        Ok(mut f) => {
            let pid = std::process::id();
            // HDB format: PID right-justified in 10 bytes, newline-terminated.
            let body = format!("{pid:>10}\n");
            f.write_all(body.as_bytes())?;
            Ok(LockGuard {
                path: lock_path.to_path_buf(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(Error::busy(format!(
            "lock file already exists: {}",
            lock_path.display()
        ))),
        Err(e) => Err(e.into()),
    }
}

fn lock_path_for(spool_dir: &Path, device_path: &str) -> PathBuf {
    let basename = Path::new(device_path)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| device_path.to_string());
    spool_dir.join(format!("LCK..{basename}"))
}

fn owner_pid(lock_path: &Path) -> Option<u32> {
    let mut buf = String::new();
    std::fs::File::open(lock_path).ok()?.read_to_string(&mut buf).ok()?;
    buf.trim().parse().ok()
}

fn process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let guard = try_acquire(dir.path(), "/dev/ttyFAKE0").unwrap();
        let path = guard.path().to_path_buf();
        assert!(path.exists());
        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn contended_lock_fails_busy() {
        let dir = tempfile::tempdir().unwrap();
        let _guard = try_acquire(dir.path(), "/dev/ttyFAKE1").unwrap();
        let err = try_acquire(dir.path(), "/dev/ttyFAKE1").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Busy);
    }

    #[test]
    fn stale_lock_from_dead_pid_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = lock_path_for(dir.path(), "/dev/ttyFAKE2");
        // A PID that is vanishingly unlikely to be alive.
        std::fs::write(&lock_path, "    999999\n").unwrap();
        let guard = try_acquire(dir.path(), "/dev/ttyFAKE2").unwrap();
        assert_eq!(owner_pid(guard.path()), Some(std::process::id()));
    }

    #[test]
    fn lock_path_uses_basename_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path_for(dir.path(), "/dev/ttyUSB3");
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "LCK..ttyUSB3");
    }
}
