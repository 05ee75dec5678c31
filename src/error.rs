//! Error types for the serial control plane.
//!
//! Mirrors the shape used by the `serialport`/`mio-serial` crates: a flat
//! `Error` struct carrying a coarse [`ErrorKind`] plus a human-readable
//! description, rather than a deep `enum` hierarchy per failure site.

use std::fmt;
use std::io;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The device path does not exist, or the underlying device vanished.
    NoDevice,
    /// A parameter, enum value, or device-spec token was not recognized.
    InvalidInput,
    /// The operation is not meaningful for this endpoint (e.g. a write-only
    /// endpoint rejecting a termios/modem-control operation).
    Unsupported,
    /// The endpoint is not open, or the UUCP lock is held by another
    /// process.
    Busy,
    /// Any other I/O failure, tagged with the originating [`io::ErrorKind`].
    Io(io::ErrorKind),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NoDevice => write!(f, "no such device"),
            ErrorKind::InvalidInput => write!(f, "invalid input"),
            ErrorKind::Unsupported => write!(f, "unsupported"),
            ErrorKind::Busy => write!(f, "busy"),
            ErrorKind::Io(kind) => write!(f, "{kind:?}"),
        }
    }
}

/// An error raised anywhere in the control plane.
#[derive(Debug)]
pub struct Error {
    /// The coarse kind of failure.
    pub kind: ErrorKind,
    /// A human-readable description, usually echoing the underlying errno.
    pub description: String,
}

impl Error {
    /// Construct a new error from a kind and a description.
    pub fn new<T: Into<String>>(kind: ErrorKind, description: T) -> Self {
        Error {
            kind,
            description: description.into(),
        }
    }

    pub(crate) fn invalid_input<T: Into<String>>(description: T) -> Self {
        Error::new(ErrorKind::InvalidInput, description)
    }

    pub(crate) fn unsupported<T: Into<String>>(description: T) -> Self {
        Error::new(ErrorKind::Unsupported, description)
    }

    pub(crate) fn busy<T: Into<String>>(description: T) -> Self {
        Error::new(ErrorKind::Busy, description)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.description)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        let kind = match e.kind() {
            io::ErrorKind::NotFound => ErrorKind::NoDevice,
            io::ErrorKind::InvalidInput => ErrorKind::InvalidInput,
            other => ErrorKind::Io(other),
        };
        Error::new(kind, e.to_string())
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        let kind = match e {
            nix::Error::ENOENT | nix::Error::ENXIO => ErrorKind::NoDevice,
            nix::Error::EINVAL => ErrorKind::InvalidInput,
            nix::Error::EBUSY => ErrorKind::Busy,
            other => ErrorKind::Io(io::Error::from(other).kind()),
        };
        Error::new(kind, e.to_string())
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e.kind {
            ErrorKind::Io(kind) => io::Error::new(kind, e.description),
            ErrorKind::NoDevice => io::Error::new(io::ErrorKind::NotFound, e.description),
            ErrorKind::InvalidInput => io::Error::new(io::ErrorKind::InvalidInput, e.description),
            ErrorKind::Unsupported | ErrorKind::Busy => {
                io::Error::new(io::ErrorKind::Other, e.description)
            }
        }
    }
}

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
