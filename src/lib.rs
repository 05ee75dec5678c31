//! # serial-core — the control plane for a serial-port stream-I/O adapter
//!
//! This crate wraps a host tty device and exposes it as an async byte
//! stream ([`SerialStream`]) alongside a [`SerialEndpoint`] façade for
//! everything that isn't plain read/write: termios parameters (baud,
//! framing, flow control), modem-control lines (DTR/RTS), BREAK, buffer
//! flushes, and modem-state change events (CD/RI/DSR/CTS).
//!
//! The hard part — and the reason this crate exists rather than a thin
//! wrapper over [`nix::sys::termios`] — is serializing get/set requests
//! against each other and against an asynchronous modem-state poller
//! without holding a lock across user-visible callbacks. See
//! [`queue`] and [`modemstate`] for that machinery, and `DESIGN.md` in the
//! repository root for how each module is grounded.
//!
//! ```no_run
//! # async fn example() -> serial_core::Result<()> {
//! use serial_core::{SerialEndpoint, LineLevel};
//!
//! let endpoint = SerialEndpoint::new("/dev/ttyUSB0,115200N81,RTSCTS", &[])?;
//! endpoint.open().await?;
//! endpoint.set_dtr(LineLevel::On)?;
//! println!("{}", endpoint.address_str());
//! endpoint.close().await?;
//! # Ok(())
//! # }
//! ```

#![cfg(unix)]
#![warn(missing_docs)]

pub mod control;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod format;
pub mod lifecycle;
pub mod modemstate;
pub mod queue;
pub mod spec_parser;
pub mod stream;
pub mod termios_adapter;
pub mod uucp_lock;

pub use control::FlushKind;
pub use endpoint::SerialEndpoint;
pub use error::{Error, ErrorKind, Result};
pub use event::SerialEvent;
pub use stream::SerialStream;
pub use termios_adapter::{FlowControl, IFlowControl, LineLevel, Parity};
