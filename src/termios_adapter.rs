//! Bidirectional mapping between the abstract serial parameter enums and
//! termios/ioctl bits.
//!
//! Grounded on `termios_get_set_*`/`sterm_dtr`/`sterm_rts` in
//! `examples/original_source/gensio/sergensio_termios.c`, and on the
//! `SerialPort` trait vocabulary (`baud_rate`, `data_bits`, `parity`,
//! `stop_bits`, `flow_control`, `write_request_to_send`,
//! `write_data_terminal_ready`) from `examples/berkowski-mio-serial/src/unix.rs`.
//!
//! Every accessor here follows the same in/out convention as the original C
//! `getset` callbacks: called with `val == 0` it reads the current setting
//! out of the termios/modem-control word; called with `val != 0` it applies
//! that value (translating it first) and echoes back the value that was
//! actually applied.

use crate::error::{Error, ErrorKind, Result};
use nix::sys::termios::{BaudRate, ControlFlags, InputFlags, SpecialCharacterIndices, Termios};

/// A termios get/set accessor, chosen by the queue entry's `TERMIO` tag.
///
/// Replaces the original `int (*)(struct termios *, int *, int *)` union
/// with a type specific to this op kind, per the Design Notes in spec.md §9.
pub type TermioAccessor = Box<dyn FnMut(&mut Termios, i32) -> Result<i32> + Send>;

/// A modem-control-line get/set accessor, chosen by the queue entry's
/// `MODEM_CTL` tag.
pub type ModemCtlAccessor = Box<dyn FnMut(&mut i32, i32) -> Result<i32> + Send>;

/// Numeric codes for [`Parity`], kept non-zero so `0` unambiguously means
/// "read the current value" at the accessor boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Parity {
    /// No parity bit.
    None = 1,
    /// Odd parity.
    Odd = 2,
    /// Even parity.
    Even = 3,
    /// Mark parity (stick parity bit always 1). Requires platform CMSPAR support.
    Mark = 4,
    /// Space parity (stick parity bit always 0). Requires platform CMSPAR support.
    Space = 5,
}

/// Numeric codes for [`FlowControl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FlowControl {
    /// No flow control.
    None = 1,
    /// Software (XON/XOFF) flow control, both directions.
    XonXoff = 2,
    /// Hardware (RTS/CTS) flow control.
    RtsCts = 3,
}

/// Numeric codes for the independently-settable input flow control
/// (spec.md §4.4: "only IXOFF is independently settable").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum IFlowControl {
    /// No input flow control.
    None = 1,
    /// XON/XOFF input flow control (sets IXOFF only).
    XonXoff = 2,
}

/// Numeric codes for DTR/RTS set operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LineLevel {
    /// Assert the signal.
    On = 1,
    /// Clear the signal.
    Off = 2,
}

/// Whether this platform's termios exposes `CMSPAR` (mark/space parity).
///
/// Linux exposes `CMSPAR`; most BSDs and macOS do not, so `Parity::Mark`/
/// `Parity::Space` sets must be rejected there per spec.md §4.4's
/// capability-query pattern (Design Notes, spec.md §9).
pub const fn cmspar_supported() -> bool {
    cfg!(any(target_os = "linux", target_os = "android"))
}

/// Apply a single termios-parameter token from the device-spec grammar
/// (spec.md §4.1) onto `termios`, delegating to the same accessors used by
/// the queue. Unrecognized tokens fail with `ErrorKind::InvalidInput`.
pub fn apply_termios_token(termios: &mut Termios, token: &str) -> Result<()> {
    match token {
        "CLOCAL" => {
            termios.control_flags.insert(ControlFlags::CLOCAL);
            Ok(())
        }
        "-CLOCAL" => {
            termios.control_flags.remove(ControlFlags::CLOCAL);
            Ok(())
        }
        "HUPCL" => {
            termios.control_flags.insert(ControlFlags::HUPCL);
            Ok(())
        }
        "-HUPCL" => {
            termios.control_flags.remove(ControlFlags::HUPCL);
            Ok(())
        }
        "XONXOFF" => {
            let mut accessor = flowcontrol_accessor();
            accessor(termios, FlowControl::XonXoff as i32).map(|_| ())
        }
        "-XONXOFF" => {
            let mut accessor = flowcontrol_accessor();
            accessor(termios, FlowControl::None as i32).map(|_| ())
        }
        "RTSCTS" => {
            let mut accessor = flowcontrol_accessor();
            accessor(termios, FlowControl::RtsCts as i32).map(|_| ())
        }
        "-RTSCTS" => {
            let mut accessor = flowcontrol_accessor();
            accessor(termios, FlowControl::None as i32).map(|_| ())
        }
        "5" | "6" | "7" | "8" => {
            let mut accessor = datasize_accessor();
            let bits: i32 = token.parse().unwrap();
            accessor(termios, bits).map(|_| ())
        }
        "N" | "E" | "O" | "M" | "S" => {
            let mut accessor = parity_accessor();
            let code = parity_from_char(token.chars().next().unwrap()).unwrap();
            accessor(termios, code as i32).map(|_| ())
        }
        token if token.starts_with(|c: char| c.is_ascii_digit()) => apply_combined_token(termios, token),
        other => Err(Error::invalid_input(format!("unrecognized option: {other}"))),
    }
}

fn parity_from_char(c: char) -> Option<Parity> {
    match c {
        'N' => Some(Parity::None),
        'E' => Some(Parity::Even),
        'O' => Some(Parity::Odd),
        'M' => Some(Parity::Mark),
        'S' => Some(Parity::Space),
        _ => None,
    }
}

/// Apply a token whose grammar bundles several fields behind a leading baud
/// rate — the canonical `NNNN[P][D][S]` form (e.g. `9600N81`,
/// `115200N81`) used throughout spec.md's examples. The leading run of
/// digits is the baud rate; what follows is read positionally as an
/// optional parity letter, then an optional data-bits digit, then an
/// optional stop-bits digit, applying each through the same accessors the
/// bare single-field tokens use. A trailing character that doesn't fit any
/// of those three slots is a parse error.
fn apply_combined_token(termios: &mut Termios, token: &str) -> Result<()> {
    let digits_end = token
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(token.len());
    let (baud_str, mut rest) = token.split_at(digits_end);

    let baud: u32 = baud_str
        .parse()
        .map_err(|_| Error::invalid_input(format!("bad baud rate token: {token}")))?;
    let mut accessor = baud_accessor();
    accessor(termios, baud as i32)?;

    if let Some(c) = rest.chars().next() {
        if let Some(code) = parity_from_char(c) {
            let mut accessor = parity_accessor();
            accessor(termios, code as i32)?;
            rest = &rest[c.len_utf8()..];
        }
    }

    if let Some(c @ '5'..='8') = rest.chars().next() {
        let mut accessor = datasize_accessor();
        accessor(termios, c.to_digit(10).unwrap() as i32)?;
        rest = &rest[c.len_utf8()..];
    }

    if let Some(c @ ('1' | '2')) = rest.chars().next() {
        let mut accessor = stopbits_accessor();
        accessor(termios, c.to_digit(10).unwrap() as i32)?;
        rest = &rest[c.len_utf8()..];
    }

    if !rest.is_empty() {
        return Err(Error::invalid_input(format!("unrecognized option: {token}")));
    }

    Ok(())
}

/// Build the `baud` accessor (spec.md §4.4 row 1).
pub fn baud_accessor() -> TermioAccessor {
    Box::new(move |termios: &mut Termios, val: i32| -> Result<i32> {
        if val != 0 {
            let rate = numeric_to_baud_rate(val as u32)
                .ok_or_else(|| Error::invalid_input(format!("unsupported baud rate: {val}")))?;
            nix::sys::termios::cfsetispeed(termios, rate)?;
            nix::sys::termios::cfsetospeed(termios, rate)?;
            Ok(val)
        } else {
            let rate = nix::sys::termios::cfgetospeed(termios);
            baud_rate_to_numeric(rate)
                .map(|v| v as i32)
                .ok_or_else(|| Error::invalid_input("unrecognized baud rate bitmask"))
        }
    })
}

/// Build the `datasize` accessor (spec.md §4.4 row 2).
pub fn datasize_accessor() -> TermioAccessor {
    Box::new(move |termios: &mut Termios, val: i32| -> Result<i32> {
        if val != 0 {
            let bits = match val {
                5 => ControlFlags::CS5,
                6 => ControlFlags::CS6,
                7 => ControlFlags::CS7,
                8 => ControlFlags::CS8,
                other => return Err(Error::invalid_input(format!("invalid data size: {other}"))),
            };
            termios.control_flags.remove(ControlFlags::CSIZE);
            termios.control_flags.insert(bits);
            Ok(val)
        } else {
            let masked = termios.control_flags & ControlFlags::CSIZE;
            let val = if masked == ControlFlags::CS5 {
                5
            } else if masked == ControlFlags::CS6 {
                6
            } else if masked == ControlFlags::CS7 {
                7
            } else if masked == ControlFlags::CS8 {
                8
            } else {
                return Err(Error::invalid_input("unrecognized data size bitmask"));
            };
            Ok(val)
        }
    })
}

/// Build the `parity` accessor (spec.md §4.4 row 3), gated on CMSPAR support
/// for MARK/SPACE.
pub fn parity_accessor() -> TermioAccessor {
    Box::new(move |termios: &mut Termios, val: i32| -> Result<i32> {
        if val != 0 {
            let code = parity_from_i32(val)?;
            if matches!(code, Parity::Mark | Parity::Space) && !cmspar_supported() {
                return Err(Error::invalid_input(
                    "mark/space parity requires CMSPAR support",
                ));
            }
            termios
                .control_flags
                .remove(ControlFlags::PARENB | ControlFlags::PARODD);
            #[cfg(any(target_os = "linux", target_os = "android"))]
            termios.control_flags.remove(ControlFlags::CMSPAR);

            match code {
                Parity::None => {}
                Parity::Odd => termios.control_flags.insert(ControlFlags::PARENB | ControlFlags::PARODD),
                Parity::Even => termios.control_flags.insert(ControlFlags::PARENB),
                #[cfg(any(target_os = "linux", target_os = "android"))]
                Parity::Mark => termios.control_flags.insert(
                    ControlFlags::PARENB | ControlFlags::PARODD | ControlFlags::CMSPAR,
                ),
                #[cfg(any(target_os = "linux", target_os = "android"))]
                Parity::Space => {
                    termios.control_flags.insert(ControlFlags::PARENB | ControlFlags::CMSPAR)
                }
                #[cfg(not(any(target_os = "linux", target_os = "android")))]
                Parity::Mark | Parity::Space => unreachable!("rejected above"),
            }
            Ok(val)
        } else {
            let cflag = termios.control_flags;
            let code = if !cflag.contains(ControlFlags::PARENB) {
                Parity::None
            } else if cflag.contains(ControlFlags::PARODD) {
                #[cfg(any(target_os = "linux", target_os = "android"))]
                {
                    if cflag.contains(ControlFlags::CMSPAR) {
                        Parity::Mark
                    } else {
                        Parity::Odd
                    }
                }
                #[cfg(not(any(target_os = "linux", target_os = "android")))]
                {
                    Parity::Odd
                }
            } else {
                #[cfg(any(target_os = "linux", target_os = "android"))]
                {
                    if cflag.contains(ControlFlags::CMSPAR) {
                        Parity::Space
                    } else {
                        Parity::Even
                    }
                }
                #[cfg(not(any(target_os = "linux", target_os = "android")))]
                {
                    Parity::Even
                }
            };
            Ok(code as i32)
        }
    })
}

/// Build the `stopbits` accessor (spec.md §4.4 row 4).
pub fn stopbits_accessor() -> TermioAccessor {
    Box::new(move |termios: &mut Termios, val: i32| -> Result<i32> {
        if val != 0 {
            match val {
                1 => termios.control_flags.remove(ControlFlags::CSTOPB),
                2 => termios.control_flags.insert(ControlFlags::CSTOPB),
                other => return Err(Error::invalid_input(format!("invalid stop bits: {other}"))),
            }
            Ok(val)
        } else if termios.control_flags.contains(ControlFlags::CSTOPB) {
            Ok(2)
        } else {
            Ok(1)
        }
    })
}

/// Build the `flowcontrol` accessor (spec.md §4.4 row 5): clears all of
/// IXON/IXOFF/CRTSCTS before setting the requested mode.
pub fn flowcontrol_accessor() -> TermioAccessor {
    Box::new(move |termios: &mut Termios, val: i32| -> Result<i32> {
        if val != 0 {
            let code = flowcontrol_from_i32(val)?;
            termios.input_flags.remove(InputFlags::IXON | InputFlags::IXOFF);
            termios.control_flags.remove(ControlFlags::CRTSCTS);
            match code {
                FlowControl::None => {}
                FlowControl::XonXoff => termios.input_flags.insert(InputFlags::IXON | InputFlags::IXOFF),
                FlowControl::RtsCts => termios.control_flags.insert(ControlFlags::CRTSCTS),
            }
            Ok(val)
        } else if termios.control_flags.contains(ControlFlags::CRTSCTS) {
            Ok(FlowControl::RtsCts as i32)
        } else if termios.input_flags.contains(InputFlags::IXON | InputFlags::IXOFF) {
            Ok(FlowControl::XonXoff as i32)
        } else {
            Ok(FlowControl::None as i32)
        }
    })
}

/// Build the `iflowcontrol` accessor (spec.md §4.4 row 6): only IXOFF is
/// independently settable.
pub fn iflowcontrol_accessor() -> TermioAccessor {
    Box::new(move |termios: &mut Termios, val: i32| -> Result<i32> {
        if val != 0 {
            let code = match val {
                v if v == IFlowControl::None as i32 => IFlowControl::None,
                v if v == IFlowControl::XonXoff as i32 => IFlowControl::XonXoff,
                other => return Err(Error::invalid_input(format!("invalid iflowcontrol: {other}"))),
            };
            termios.input_flags.remove(InputFlags::IXOFF);
            if matches!(code, IFlowControl::XonXoff) {
                termios.input_flags.insert(InputFlags::IXOFF);
            }
            Ok(val)
        } else if termios.input_flags.contains(InputFlags::IXOFF) {
            Ok(IFlowControl::XonXoff as i32)
        } else {
            Ok(IFlowControl::None as i32)
        }
    })
}

/// Build the `dtr` accessor (spec.md §4.4 row 7). Uses the corrected
/// `&= !TIOCM_DTR` clear (see spec.md §4.4 "Note on an observed source bug"
/// and §9 Open Questions) rather than the original's `&= TIOCM_DTR`.
pub fn dtr_accessor() -> ModemCtlAccessor {
    Box::new(move |mctl: &mut i32, val: i32| -> Result<i32> {
        line_level_accessor(mctl, val, libc::TIOCM_DTR)
    })
}

/// Build the `rts` accessor (spec.md §4.4 row 8), corrected identically.
pub fn rts_accessor() -> ModemCtlAccessor {
    Box::new(move |mctl: &mut i32, val: i32| -> Result<i32> {
        line_level_accessor(mctl, val, libc::TIOCM_RTS)
    })
}

fn line_level_accessor(mctl: &mut i32, val: i32, bit: i32) -> Result<i32> {
    if val != 0 {
        match val {
            v if v == LineLevel::On as i32 => *mctl |= bit,
            v if v == LineLevel::Off as i32 => *mctl &= !bit,
            other => return Err(Error::invalid_input(format!("invalid line level: {other}"))),
        }
        Ok(val)
    } else if *mctl & bit != 0 {
        Ok(LineLevel::On as i32)
    } else {
        Ok(LineLevel::Off as i32)
    }
}

fn parity_from_i32(val: i32) -> Result<Parity> {
    match val {
        v if v == Parity::None as i32 => Ok(Parity::None),
        v if v == Parity::Odd as i32 => Ok(Parity::Odd),
        v if v == Parity::Even as i32 => Ok(Parity::Even),
        v if v == Parity::Mark as i32 => Ok(Parity::Mark),
        v if v == Parity::Space as i32 => Ok(Parity::Space),
        other => Err(Error::invalid_input(format!("invalid parity code: {other}"))),
    }
}

fn flowcontrol_from_i32(val: i32) -> Result<FlowControl> {
    match val {
        v if v == FlowControl::None as i32 => Ok(FlowControl::None),
        v if v == FlowControl::XonXoff as i32 => Ok(FlowControl::XonXoff),
        v if v == FlowControl::RtsCts as i32 => Ok(FlowControl::RtsCts),
        other => Err(Error::invalid_input(format!("invalid flow control code: {other}"))),
    }
}

/// The standard POSIX baud-rate table, the analogue of `get_baud_rate`/
/// `get_rate_from_baud_rate` referenced (but not defined) in the original
/// source.
fn numeric_to_baud_rate(baud: u32) -> Option<BaudRate> {
    Some(match baud {
        0 => BaudRate::B0,
        50 => BaudRate::B50,
        75 => BaudRate::B75,
        110 => BaudRate::B110,
        134 => BaudRate::B134,
        150 => BaudRate::B150,
        200 => BaudRate::B200,
        300 => BaudRate::B300,
        600 => BaudRate::B600,
        1200 => BaudRate::B1200,
        1800 => BaudRate::B1800,
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115200 => BaudRate::B115200,
        230400 => BaudRate::B230400,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        460800 => BaudRate::B460800,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        921600 => BaudRate::B921600,
        _ => return None,
    })
}

fn baud_rate_to_numeric(rate: BaudRate) -> Option<u32> {
    Some(match rate {
        BaudRate::B0 => 0,
        BaudRate::B50 => 50,
        BaudRate::B75 => 75,
        BaudRate::B110 => 110,
        BaudRate::B134 => 134,
        BaudRate::B150 => 150,
        BaudRate::B200 => 200,
        BaudRate::B300 => 300,
        BaudRate::B600 => 600,
        BaudRate::B1200 => 1200,
        BaudRate::B1800 => 1800,
        BaudRate::B2400 => 2400,
        BaudRate::B4800 => 4800,
        BaudRate::B9600 => 9600,
        BaudRate::B19200 => 19200,
        BaudRate::B38400 => 38400,
        BaudRate::B57600 => 57600,
        BaudRate::B115200 => 115200,
        BaudRate::B230400 => 230400,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        BaudRate::B460800 => 460800,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        BaudRate::B921600 => 921600,
        _ => return None,
    })
}

/// The current output baud rate as a plain number, for the address
/// formatter (spec.md §4.7). Returns `None` for a bit pattern this table
/// doesn't recognize.
pub fn current_baud(termios: &Termios) -> Option<u32> {
    baud_rate_to_numeric(nix::sys::termios::cfgetospeed(termios))
}

/// Build the crate's default termios: raw mode, 9600 8N1, `CREAD` enabled,
/// `IGNBRK` set, `VSTART`/`VSTOP` pinned to `0x11`/`0x13` — verbatim from
/// `termios_gensio_alloc` in the original source and spec.md §3.
pub fn build_default_termios(base: &mut Termios) {
    nix::sys::termios::cfmakeraw(base);
    let _ = nix::sys::termios::cfsetispeed(base, BaudRate::B9600);
    let _ = nix::sys::termios::cfsetospeed(base, BaudRate::B9600);
    base.control_flags.insert(ControlFlags::CREAD | ControlFlags::CS8);
    base.control_chars[SpecialCharacterIndices::VSTART as usize] = 0x11;
    base.control_chars[SpecialCharacterIndices::VSTOP as usize] = 0x13;
    base.input_flags.insert(InputFlags::IGNBRK);
}
