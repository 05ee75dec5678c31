//! The `Closed → Locking → Opening → Open → Draining → Closed` lifecycle.
//!
//! Grounded on `sterm_sub_open`/`sterm_check_close_drain` in
//! `examples/original_source/gensio/sergensio_termios.c` (spec.md §4.2):
//! lock acquisition precedes a non-blocking, non-controlling open; once
//! open, a non-write-only endpoint gets its `default_termios` installed,
//! BREAK cleared, and modem-state polling armed with the full mask. Close
//! unsubscribes the poller, waits for it to acknowledge the timer actually
//! stopped, and retries the rest of the drain check every 10ms, up to 200
//! times, before force-closing.

use crate::error::Result;
use crate::event::SerialEvent;
use crate::modemstate::ModemStatePoller;
use crate::queue::Queue;
use crate::uucp_lock::{self, LockGuard};
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::sys::termios::{tcsetattr, SetArg, Termios};
use std::os::unix::io::RawFd;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Maximum number of 10ms drain polls before a close is forced through
/// (spec.md §4.2: "~2s" budget; see DESIGN.md for the Open Question on
/// making this configurable).
pub const CLOSE_TIMEOUTS_LEFT: u32 = 200;
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Everything produced by a successful open, owned thereafter by the
/// endpoint façade.
pub struct OpenedEndpoint {
    pub fd: RawFd,
    pub lock: LockGuard,
    pub queue: Arc<Queue>,
    /// `None` for write-only endpoints (spec.md §4.2: polling is only
    /// armed "if not write-only").
    pub poller: Option<Arc<ModemStatePoller>>,
}

/// Run the `closed → locking → opening → open` transition.
pub fn open_endpoint(
    spool_dir: &Path,
    devname: &str,
    write_only: bool,
    default_termios: &Termios,
    events: broadcast::Sender<SerialEvent>,
) -> Result<OpenedEndpoint> {
    let lock = uucp_lock::try_acquire(spool_dir, devname)?;

    let oflag = OFlag::O_NONBLOCK
        | OFlag::O_NOCTTY
        | if write_only { OFlag::O_WRONLY } else { OFlag::O_RDWR };
    let fd = match open(devname, oflag, Mode::empty()) {
        Ok(fd) => fd,
        Err(e) => {
            drop(lock);
            return Err(e.into());
        }
    };

    if !write_only {
        if let Err(e) = install_termios(fd, default_termios) {
            // SAFETY: `fd` was just opened by this function and is not
            // shared yet; closing it here is the only reference.
            let _ = nix::unistd::close(fd);
            drop(lock);
            return Err(e);
        }
    }

    let queue = Queue::new(fd);
    if let Err(e) = queue.clear_break() {
        let _ = nix::unistd::close(fd);
        drop(lock);
        return Err(e);
    }

    let poller = if write_only {
        None
    } else {
        let poller = ModemStatePoller::spawn(fd, events);
        poller.reset_after_open();
        poller.subscribe(0xFF);
        Some(poller)
    };

    Ok(OpenedEndpoint { fd, lock, queue, poller })
}

fn install_termios(fd: RawFd, termios: &Termios) -> Result<()> {
    use std::os::unix::io::BorrowedFd;
    // SAFETY: `fd` was just opened by the caller and is valid for this call.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    tcsetattr(borrowed, SetArg::TCSANOW, termios)?;
    Ok(())
}

/// Run the `open → draining → closed` transition: stop the poller, then
/// poll the drain condition (queue empty + poller timer stopped +
/// `TIOCOUTQ == 0`) every 10ms up to [`CLOSE_TIMEOUTS_LEFT`] times, finally
/// releasing the UUCP lock and closing the fd regardless of whether the
/// drain condition was ever met (spec.md §4.2: "Why bounded retry").
///
/// Waiting on the poller's `timer_stopped` acknowledgement (not just firing
/// `subscribe(0)`) matters even on the forced-close path: without it, a
/// `tick()` already in flight could still be mid-`TIOCMGET` on `fd` when
/// this function closes it out from under the poller task.
pub async fn close_endpoint(opened: OpenedEndpoint) -> Result<()> {
    let OpenedEndpoint { fd, lock, queue, poller } = opened;

    if let Some(poller) = &poller {
        poller.subscribe(0);
    }

    // The queue-drain and TIOCOUTQ checks are subject to CLOSE_TIMEOUTS_LEFT
    // (a wedged peer must not hang close forever), but `poller_stopped` is
    // not: it only waits out a tick already in flight, which runs a single
    // TIOCMGET with no blocking I/O, so it settles in well under one poll
    // interval. Forcing the close through without it would let that tick
    // land on a closed fd.
    let mut remaining = CLOSE_TIMEOUTS_LEFT;
    loop {
        let poller_stopped = poller.as_ref().map_or(true, |p| p.is_stopped());
        if !queue.has_pending() && poller_stopped && output_queue_empty(fd).unwrap_or(true) {
            break;
        }
        if remaining == 0 && poller_stopped {
            tracing::warn!(fd, "forcing close: drain budget exhausted");
            break;
        }
        remaining = remaining.saturating_sub(1);
        tokio::time::sleep(CLOSE_POLL_INTERVAL).await;
    }

    drop(lock);
    let _ = nix::unistd::close(fd);
    Ok(())
}

/// `TIOCOUTQ`: number of bytes still queued for output. Used by the drain
/// check; any ioctl failure is treated as "queue unknown, proceed" so a
/// vanished device cannot wedge close forever.
fn output_queue_empty(fd: RawFd) -> Result<bool> {
    let mut count: libc::c_int = 0;
    // SAFETY: `fd` is an open tty fd; `count` is a valid out-parameter for
    // TIOCOUTQ.
    let rc = unsafe { libc::ioctl(fd, libc::TIOCOUTQ, &mut count as *mut libc::c_int) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(count == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::termios_adapter::build_default_termios;

    #[tokio::test]
    async fn open_and_close_pty_symlink_roundtrip() {
        // openpty gives us a real pty pair; open_endpoint needs a *path*,
        // so we exercise the open/close halves against a pre-opened fd
        // instead of round-tripping through a path (no world-writable
        // /dev/ptmx symlink is guaranteed in a sandboxed test run).
        let (master, _slave) = nix::pty::openpty(None, None).expect("openpty");
        use std::os::unix::io::AsRawFd;
        let fd = master.as_raw_fd();

        let mut termios = nix::sys::termios::tcgetattr(&master).unwrap();
        build_default_termios(&mut termios);
        install_termios(fd, &termios).expect("install termios");

        let (tx, _rx) = broadcast::channel(8);
        let queue = Queue::new(fd);
        let poller = ModemStatePoller::spawn(fd, tx);
        poller.subscribe(0xFF);

        assert!(output_queue_empty(fd).unwrap());
        poller.subscribe(0);
        assert!(!queue.has_pending());

        tokio::time::timeout(Duration::from_millis(500), async {
            while !poller.is_stopped() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("poller should acknowledge the timer stopped");

        std::mem::forget(master);
    }

    #[test]
    fn lock_acquisition_failure_path_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let _held = uucp_lock::try_acquire(dir.path(), "/dev/ttyNOPE").unwrap();
        let err = uucp_lock::try_acquire(dir.path(), "/dev/ttyNOPE").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Busy);
    }
}
