//! Non-queued control operations: output holding, buffer flushing, a
//! transient BREAK pulse, and the diagnostic remote-id accessor.
//!
//! Grounded on `sterm_flowcontrol_state`/`sterm_flush`/`sterm_send_break`/
//! `sterm_raddr_to_str`'s fd plumbing in
//! `examples/original_source/gensio/sergensio_termios.c` (spec.md §4.6).
//! Unlike the termios/modem-control parameters in [`crate::termios_adapter`],
//! these act on the fd directly and are never queued: each has at most one
//! synchronous outcome, with no "effective value may differ from requested"
//! nuance that would justify a get-back.

use crate::error::{Error, Result};
use nix::sys::termios::{tcflow, tcsendbreak};
use std::os::unix::io::{BorrowedFd, RawFd};

/// Which queue(s) to discard, matching `tcflush`'s three flush kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushKind {
    /// Discard unread input.
    Input,
    /// Discard unwritten output.
    Output,
    /// Discard both.
    InputOutput,
}

/// Suspend or resume output (spec.md §4.6: `tcflow(fd, hold ? TCOOFF : TCOON)`).
pub fn hold_output(fd: RawFd, hold: bool) -> Result<()> {
    let action = if hold {
        nix::sys::termios::FlowArg::TCOOFF
    } else {
        nix::sys::termios::FlowArg::TCOON
    };
    tcflow(borrow(fd), action)?;
    Ok(())
}

/// Discard queued input and/or output bytes.
pub fn flush(fd: RawFd, kind: FlushKind) -> Result<()> {
    use nix::sys::termios::FlushArg;
    let action = match kind {
        FlushKind::Input => FlushArg::TCIFLUSH,
        FlushKind::Output => FlushArg::TCOFLUSH,
        FlushKind::InputOutput => FlushArg::TCIOFLUSH,
    };
    nix::sys::termios::tcflush(borrow(fd), action)?;
    Ok(())
}

/// Parse a raw flush-kind code from the external API surface (spec.md §8:
/// `flush(99)` must fail *invalid-argument*).
pub fn flush_kind_from_code(code: i32) -> Result<FlushKind> {
    match code {
        0 => Ok(FlushKind::Input),
        1 => Ok(FlushKind::Output),
        2 => Ok(FlushKind::InputOutput),
        other => Err(Error::invalid_input(format!("invalid flush kind: {other}"))),
    }
}

/// Send a transient ~0.25-0.5s BREAK (`tcsendbreak(fd, 0)`). Distinct from
/// the latched `BREAK` queued op in [`crate::queue`].
pub fn send_break(fd: RawFd) -> Result<()> {
    tcsendbreak(borrow(fd), 0)?;
    Ok(())
}

/// The raw fd, for diagnostics only (spec.md §4.6: "used only for
/// diagnostics").
pub fn remote_id(fd: RawFd) -> RawFd {
    fd
}

fn borrow(fd: RawFd) -> BorrowedFd<'static> {
    // SAFETY: `fd` is an open tty fd owned by the endpoint for at least the
    // duration of this call.
    unsafe { BorrowedFd::borrow_raw(fd) }
}
