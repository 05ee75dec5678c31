//! Device-spec grammar: `devpath[,opt,opt,...]` plus `key=value` construction
//! arguments.
//!
//! Grounded on `sergensio_process_parms`/`termios_gensio_alloc` in
//! `examples/original_source/gensio/sergensio_termios.c`: tokens are split on
//! whitespace and commas, `WRONLY` toggles write-only mode, and every other
//! token is delegated to the termios-parameter grammar in
//! [`crate::termios_adapter`]. The first unrecognized token aborts parsing.

use crate::error::{Error, Result};
use crate::termios_adapter;
use nix::sys::termios::Termios;

/// Parsed output of the device-spec grammar.
pub struct ParsedSpec {
    /// Device path, with any `,options` suffix stripped.
    pub device_path: String,
    /// Termios built up from the default and any overriding tokens.
    pub default_termios: Termios,
    /// Whether `WRONLY` was present.
    pub write_only: bool,
}

/// Split `spec` into `devpath` and a comma/whitespace-terminated option list,
/// then fold the options onto `base_termios`.
///
/// `spec` has the grammar `devpath[,option((","|WS)option)*]` per spec.md
/// §4.1/§6. Tokens are case-sensitive; the first unrecognized token fails
/// with `ErrorKind::InvalidInput`.
pub fn parse_device_spec(spec: &str, base_termios: Termios) -> Result<ParsedSpec> {
    let (device_path, rest) = match spec.split_once(',') {
        Some((path, rest)) => (path, Some(rest)),
        None => (spec, None),
    };

    if device_path.is_empty() {
        return Err(Error::invalid_input("empty device path"));
    }

    let mut termios = base_termios;
    let mut write_only = false;

    if let Some(rest) = rest {
        for token in split_argv(rest) {
            if token == "WRONLY" {
                write_only = true;
                continue;
            }
            termios_adapter::apply_termios_token(&mut termios, token)?;
        }
    }

    Ok(ParsedSpec {
        device_path: device_path.to_string(),
        default_termios: termios,
        write_only,
    })
}

/// Split a string on the same delimiter set as the original `str_to_argv`
/// call site (`" \f\t\n\r\v,"`), dropping empty tokens.
fn split_argv(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| c == ' ' || c == '\x0c' || c == '\t' || c == '\n' || c == '\r' || c == '\x0b' || c == ',')
        .filter(|t| !t.is_empty())
}

/// A single `key=value` construction argument, the analogue of
/// `gensio_check_keyuint` in the original source.
#[derive(Debug, Clone, Copy)]
pub enum ConstructionArg {
    /// `readbuf=<uint>`: the byte-stream layer's read buffer size.
    ReadBuf(usize),
}

/// Parse a slice of `key=value` construction arguments. Unknown keys fail
/// with `ErrorKind::InvalidInput`, matching `termios_gensio_alloc`'s
/// first-unrecognized-arg failure.
pub fn parse_construction_args(args: &[&str]) -> Result<Vec<ConstructionArg>> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| Error::invalid_input(format!("malformed argument: {arg}")))?;
        match key {
            "readbuf" => {
                let n: usize = value
                    .parse()
                    .map_err(|_| Error::invalid_input(format!("readbuf: not a positive integer: {value}")))?;
                out.push(ConstructionArg::ReadBuf(n));
            }
            other => return Err(Error::invalid_input(format!("unknown argument: {other}"))),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_base() -> Termios {
        // A termios obtained from a real fd isn't needed for parser tests;
        // `Termios` has no safe `Default`, so build one from a pty pair.
        let (master, _slave) = nix::pty::openpty(None, None).expect("openpty");
        nix::sys::termios::tcgetattr(&master).expect("tcgetattr")
    }

    #[test]
    fn splits_devpath_from_options() {
        let parsed = parse_device_spec("/dev/ttyUSB0,9600", raw_base()).unwrap();
        assert_eq!(parsed.device_path, "/dev/ttyUSB0");
        assert!(!parsed.write_only);
    }

    #[test]
    fn combined_baud_parity_databits_stopbits_token_parses() {
        let parsed = parse_device_spec("/dev/ttyUSB0,115200N81,RTSCTS", raw_base()).unwrap();
        assert_eq!(parsed.device_path, "/dev/ttyUSB0");
        assert_eq!(
            crate::termios_adapter::current_baud(&parsed.default_termios),
            Some(115200)
        );
        use nix::sys::termios::ControlFlags;
        assert!(!parsed.default_termios.control_flags.contains(ControlFlags::PARENB));
        assert_eq!(
            parsed.default_termios.control_flags & ControlFlags::CSIZE,
            ControlFlags::CS8
        );
        assert!(!parsed.default_termios.control_flags.contains(ControlFlags::CSTOPB));
        assert!(parsed.default_termios.control_flags.contains(ControlFlags::CRTSCTS));
    }

    #[test]
    fn recognizes_wronly() {
        let parsed = parse_device_spec("/dev/ttyUSB0,WRONLY", raw_base()).unwrap();
        assert!(parsed.write_only);
    }

    #[test]
    fn unknown_token_fails() {
        let err = parse_device_spec("/dev/ttyUSB0,BOGUS", raw_base()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn readbuf_arg_parses() {
        let args = parse_construction_args(&["readbuf=4096"]).unwrap();
        assert!(matches!(args[0], ConstructionArg::ReadBuf(4096)));
    }

    #[test]
    fn unknown_key_fails() {
        let err = parse_construction_args(&["bogus=1"]).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn empty_devpath_fails() {
        let err = parse_device_spec("", raw_base()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }
}
