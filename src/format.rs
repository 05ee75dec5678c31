//! Human-readable address string, the analogue of `sterm_raddr_to_str` in
//! `examples/original_source/gensio/sergensio_termios.c` (spec.md §4.7).
//!
//! Used for diagnostics (logging, `Display` impls) rather than anything
//! parsed back by this crate.

use nix::sys::termios::{ControlFlags, InputFlags, Termios};

/// Render the address string for an endpoint.
///
/// `termios` is the live termios if open, or the `default_termios` snapshot
/// otherwise (spec.md §4.7: "substitute the default_termios snapshot").
/// `modem_ctl` is `Some(status)` (the last `TIOCMGET` bitmask) when the
/// endpoint is open and not write-only; otherwise the signal-state suffix
/// is replaced with `offline`.
pub fn format_address(
    devname: &str,
    write_only: bool,
    termios: &Termios,
    modem_ctl: Option<i32>,
) -> String {
    let mut out = devname.to_string();

    if !write_only {
        let baud = crate::termios_adapter::current_baud(termios)
            .map(|b| b.to_string())
            .unwrap_or_else(|| "?".to_string());

        let parity_enabled = termios.control_flags.contains(ControlFlags::PARENB);
        let parity_odd = termios.control_flags.contains(ControlFlags::PARODD);
        let parity_char = if parity_enabled && parity_odd {
            'O'
        } else if parity_enabled {
            'E'
        } else {
            'N'
        };

        let data_char = match termios.control_flags & ControlFlags::CSIZE {
            f if f == ControlFlags::CS5 => '5',
            f if f == ControlFlags::CS6 => '6',
            f if f == ControlFlags::CS7 => '7',
            f if f == ControlFlags::CS8 => '8',
            _ => '?',
        };

        let stop_char = if termios.control_flags.contains(ControlFlags::CSTOPB) {
            '2'
        } else {
            '1'
        };

        out.push_str(&format!(",{baud}{parity_char}{data_char}{stop_char}"));

        let xon = termios.input_flags.contains(InputFlags::IXON);
        let xoff = termios.input_flags.contains(InputFlags::IXOFF);
        let xany = termios.input_flags.contains(InputFlags::IXANY);
        if xon && xoff && xany {
            out.push_str(",XONXOFF");
        }
        if termios.control_flags.contains(ControlFlags::CRTSCTS) {
            out.push_str(",RTSCTS");
        }
        if termios.control_flags.contains(ControlFlags::CLOCAL) {
            out.push_str(",CLOCAL");
        }
        if termios.control_flags.contains(ControlFlags::HUPCL) {
            out.push_str(",HANGUP_WHEN_DONE");
        }
    }

    match modem_ctl {
        Some(status) if !write_only => {
            out.push_str(if status & libc::TIOCM_RTS != 0 { " RTSHI" } else { " RTSLO" });
            out.push_str(if status & libc::TIOCM_DTR != 0 { " DTRHI" } else { " DTRLO" });
        }
        _ => out.push_str(" offline"),
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::termios_adapter::{baud_accessor, build_default_termios, parity_accessor};

    fn base() -> Termios {
        let (master, _slave) = nix::pty::openpty(None, None).expect("openpty");
        let mut t = nix::sys::termios::tcgetattr(&master).expect("tcgetattr");
        build_default_termios(&mut t);
        t
    }

    #[test]
    fn open_formats_baud_parity_databits_stopbits() {
        let mut t = base();
        baud_accessor()(&mut t, 115200).unwrap();
        parity_accessor()(&mut t, crate::termios_adapter::Parity::Odd as i32).unwrap();
        let addr = format_address("/dev/ttyX", false, &t, Some(libc::TIOCM_RTS | libc::TIOCM_DTR));
        assert!(addr.contains("115200O81"), "got: {addr}");
        assert!(addr.ends_with("RTSHI DTRHI"));
    }

    #[test]
    fn closed_endpoint_reports_offline() {
        let t = base();
        let addr = format_address("/dev/ttyX", false, &t, None);
        assert!(addr.ends_with(" offline"));
    }

    #[test]
    fn write_only_omits_termios_detail() {
        let t = base();
        let addr = format_address("/dev/ttyX", true, &t, Some(0));
        assert_eq!(addr, "/dev/ttyX offline");
    }
}
