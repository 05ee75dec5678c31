//! The deferred operation queue.
//!
//! Grounded on `termios_set_get`/`termios_process`/`sterm_deferred_op`/
//! `sterm_start_deferred_op` in
//! `examples/original_source/gensio/sergensio_termios.c`, and on the
//! request/response shape of `gawd-ai-sctl/server/src/modem.rs`'s
//! `modem_thread` (a dedicated task serially draining queued requests and
//! replying through a per-request channel).
//!
//! `submit_termio`/`submit_modem_ctl`/`submit_break` perform the OS write
//! synchronously on the caller's thread for `value != 0` ("set"), then, if a
//! completion was supplied, enqueue an entry and ensure a deferred-runner
//! task is running. The runner drains the queue FIFO, re-reading the
//! current termios/modem-control state for each entry (`value == 0`,
//! "get"), invoking the completion with the endpoint lock released so
//! completions may re-enter the endpoint (spec.md §4.3, §5).

use crate::error::{Error, Result};
use crate::termios_adapter::{LineLevel, ModemCtlAccessor, TermioAccessor};
use nix::sys::termios::{tcgetattr, tcsetattr, SetArg};
use std::collections::VecDeque;
use std::os::unix::io::{BorrowedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Completion callback for a queued operation. Called with the current
/// value (post-apply for a "set", freshly read for a pure "get") or the
/// error encountered while re-reading it.
pub type Completion = Box<dyn FnOnce(Result<i32>) + Send + 'static>;

/// A queued operation kind, tagged rather than erased behind a single
/// function-pointer union (spec.md §9 Design Notes).
enum QueuedOp {
    Termio(TermioAccessor),
    ModemCtl(ModemCtlAccessor),
    Break,
}

struct QueueEntry {
    op: QueuedOp,
    completion: Completion,
}

/// The fd-backed deferred-operation queue for one endpoint.
///
/// Owns no lifecycle state of its own; [`crate::endpoint::SerialEndpoint`]
/// holds this alongside the rest of the endpoint's shared state.
pub struct Queue {
    fd: RawFd,
    entries: Mutex<VecDeque<QueueEntry>>,
    pending: AtomicBool,
    /// Mirrors spec.md §4.3's `break_set`: the get-back for a queued BREAK
    /// entry reports this rather than re-querying the line, since there is
    /// no portable ioctl to read back the latched BREAK state.
    break_set: AtomicBool,
}

impl Queue {
    /// Build a queue bound to `fd`. `fd` must remain valid for the queue's
    /// lifetime; the endpoint owns the open file and outlives the queue.
    pub fn new(fd: RawFd) -> Arc<Self> {
        Arc::new(Queue {
            fd,
            entries: Mutex::new(VecDeque::new()),
            pending: AtomicBool::new(false),
            break_set: AtomicBool::new(false),
        })
    }

    /// Synchronously set (or, with `completion: None` and `value: 0`, read)
    /// a termios-backed parameter, optionally scheduling a get-back.
    pub fn submit_termio(
        self: &Arc<Self>,
        mut accessor: TermioAccessor,
        value: i32,
        completion: Option<Completion>,
    ) -> Result<i32> {
        let immediate = if value != 0 {
            Some(self.apply_termio(&mut accessor, value)?)
        } else {
            None
        };
        if let Some(completion) = completion {
            self.enqueue(QueueEntry {
                op: QueuedOp::Termio(accessor),
                completion,
            });
        }
        Ok(immediate.unwrap_or(0))
    }

    /// Synchronously set (or read) a modem-control-line parameter (DTR/RTS),
    /// optionally scheduling a get-back.
    pub fn submit_modem_ctl(
        self: &Arc<Self>,
        mut accessor: ModemCtlAccessor,
        value: i32,
        completion: Option<Completion>,
    ) -> Result<i32> {
        let immediate = if value != 0 {
            Some(self.apply_modem_ctl(&mut accessor, value)?)
        } else {
            None
        };
        if let Some(completion) = completion {
            self.enqueue(QueueEntry {
                op: QueuedOp::ModemCtl(accessor),
                completion,
            });
        }
        Ok(immediate.unwrap_or(0))
    }

    /// Set (or read) the latched BREAK condition via `TIOCSBRK`/`TIOCCBRK`.
    pub fn submit_break(
        self: &Arc<Self>,
        value: i32,
        completion: Option<Completion>,
    ) -> Result<i32> {
        let immediate = if value != 0 {
            let applied = apply_break(self.fd, value)?;
            self.break_set.store(value == LineLevel::On as i32, Ordering::SeqCst);
            Some(applied)
        } else {
            None
        };
        if let Some(completion) = completion {
            self.enqueue(QueueEntry {
                op: QueuedOp::Break,
                completion,
            });
        }
        Ok(immediate.unwrap_or(0))
    }

    /// Force BREAK off and clear `break_set`, used by the lifecycle
    /// controller on the `opening → open` transition (spec.md §4.2).
    pub fn clear_break(self: &Arc<Self>) -> Result<()> {
        self.submit_break(LineLevel::Off as i32, None).map(|_| ())
    }

    fn apply_termio(&self, accessor: &mut TermioAccessor, value: i32) -> Result<i32> {
        let fd = self.borrow_fd();
        let mut termios = tcgetattr(fd)?;
        let result = accessor(&mut termios, value)?;
        tcsetattr(fd, SetArg::TCSANOW, &termios)?;
        Ok(result)
    }

    fn apply_modem_ctl(&self, accessor: &mut ModemCtlAccessor, value: i32) -> Result<i32> {
        let mut mctl = tiocmget(self.fd)?;
        let result = accessor(&mut mctl, value)?;
        tiocmset(self.fd, mctl)?;
        Ok(result)
    }

    fn borrow_fd(&self) -> BorrowedFd<'_> {
        // SAFETY: `self.fd` is kept open by the endpoint for at least the
        // lifetime of `self` (the queue never outlives the endpoint that
        // constructed it).
        unsafe { BorrowedFd::borrow_raw(self.fd) }
    }

    /// True while there is at least one queued entry awaiting the runner.
    pub fn has_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    fn enqueue(self: &Arc<Self>, entry: QueueEntry) {
        let mut entries = self.entries.lock().expect("queue mutex poisoned");
        entries.push_back(entry);
        if !self.pending.swap(true, Ordering::SeqCst) {
            let queue = Arc::clone(self);
            tokio::spawn(async move { queue.run_deferred().await });
        }
    }

    /// Drain the queue FIFO, re-reading the live value for each entry and
    /// invoking its completion with the lock released. Re-scans for newly
    /// appended entries (pushed from within a completion) before clearing
    /// `pending`, matching `termios_process`'s re-entrancy handling.
    async fn run_deferred(self: Arc<Self>) {
        loop {
            let entry = {
                let mut entries = self.entries.lock().expect("queue mutex poisoned");
                entries.pop_front()
            };
            let Some(entry) = entry else {
                // Nothing left right now; check again before declaring done,
                // since a concurrent submit() may race the empty check.
                let mut entries = self.entries.lock().expect("queue mutex poisoned");
                if entries.is_empty() {
                    self.pending.store(false, Ordering::SeqCst);
                    return;
                }
                let next = entries.pop_front();
                drop(entries);
                match next {
                    Some(e) => e,
                    None => continue,
                }
            };

            let result = self.read_current(entry.op);
            (entry.completion)(result);
            tokio::task::yield_now().await;
        }
    }

    fn read_current(&self, op: QueuedOp) -> Result<i32> {
        match op {
            QueuedOp::Termio(mut accessor) => {
                let fd = self.borrow_fd();
                let mut termios = tcgetattr(fd)?;
                accessor(&mut termios, 0)
            }
            QueuedOp::ModemCtl(mut accessor) => {
                let mut mctl = tiocmget(self.fd)?;
                accessor(&mut mctl, 0)
            }
            QueuedOp::Break => Ok(if self.break_set.load(Ordering::SeqCst) {
                LineLevel::On as i32
            } else {
                LineLevel::Off as i32
            }),
        }
    }
}

pub(crate) fn tiocmget(fd: RawFd) -> Result<i32> {
    let mut mctl: libc::c_int = 0;
    // SAFETY: `fd` is an open tty fd owned by the endpoint; `mctl` is a
    // valid out-parameter for TIOCMGET.
    let rc = unsafe { libc::ioctl(fd, libc::TIOCMGET, &mut mctl as *mut libc::c_int) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(mctl)
}

fn tiocmset(fd: RawFd, mctl: i32) -> Result<()> {
    // SAFETY: `fd` is an open tty fd owned by the endpoint; `mctl` is a
    // valid in-parameter for TIOCMSET.
    let rc = unsafe { libc::ioctl(fd, libc::TIOCMSET, &mctl as *const libc::c_int) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

fn apply_break(fd: RawFd, value: i32) -> Result<i32> {
    let request = match value {
        v if v == LineLevel::On as i32 => libc::TIOCSBRK,
        v if v == LineLevel::Off as i32 => libc::TIOCCBRK,
        other => return Err(Error::invalid_input(format!("invalid break state: {other}"))),
    };
    // SAFETY: `fd` is an open tty fd; TIOCSBRK/TIOCCBRK take no argument.
    let rc = unsafe { libc::ioctl(fd, request) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(value)
}
