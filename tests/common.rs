//! Shared fixtures for the integration suite: a loopback pty pair standing
//! in for spec.md §8's "pseudo-device backed by a loopback pty," opened by
//! path so `SerialEndpoint::open()` can be exercised end-to-end rather than
//! handed a bare fd.

#![allow(dead_code)]

use nix::pty::{grantpt, posix_openpt, unlockpt, PtyMaster};

/// A pty master kept alive for the test's duration, plus the path its slave
/// side can be opened at (what a real device path would be for a tty).
pub struct LoopbackPty {
    pub master: PtyMaster,
    pub slave_path: String,
}

/// Open a fresh pty pair and return the master (to be read/written directly
/// by the test) and the slave's device path (to be handed to
/// `SerialEndpoint::with_spool_dir`).
pub fn open_loopback_pty() -> LoopbackPty {
    let master = posix_openpt(nix::fcntl::OFlag::O_RDWR).expect("posix_openpt");
    grantpt(&master).expect("grantpt");
    unlockpt(&master).expect("unlockpt");
    let slave_path = slave_name(&master);
    LoopbackPty { master, slave_path }
}

#[cfg(not(target_os = "macos"))]
fn slave_name(master: &PtyMaster) -> String {
    nix::pty::ptsname_r(master).expect("ptsname_r")
}

#[cfg(target_os = "macos")]
fn slave_name(master: &PtyMaster) -> String {
    // SAFETY: `master` is a just-opened, unlocked pty master; `ptsname` is
    // not thread-safe but the test suite does not call it concurrently on
    // the same master.
    unsafe { nix::pty::ptsname(master) }.expect("ptsname")
}

/// A fresh temporary directory to use as the UUCP lock spool, so tests never
/// touch the real `/var/lock` (spec.md §8).
pub fn spool_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("tempdir for uucp spool")
}
