//! The public serial-endpoint façade: ties together construction parsing,
//! the lifecycle state machine, the deferred operation queue, the
//! modem-state poller, the non-queued control ops, and the address
//! formatter.
//!
//! This module is the crate's closest analogue to `struct sterm_data` in
//! `examples/original_source/gensio/sergensio_termios.c` — the "Serial
//! Endpoint" named in spec.md §3 — realized with a `std::sync::Mutex`
//! guarding a small phase enum rather than the original's single struct
//! with a scattering of state flags.

use crate::control::{self, FlushKind};
use crate::error::{Error, Result};
use crate::event::SerialEvent;
use crate::format;
use crate::lifecycle::{self, OpenedEndpoint};
use crate::queue::Completion;
use crate::spec_parser;
use crate::termios_adapter::{
    self, dtr_accessor, flowcontrol_accessor, iflowcontrol_accessor, parity_accessor,
    rts_accessor, stopbits_accessor, FlowControl, IFlowControl, LineLevel, ModemCtlAccessor,
    Parity, TermioAccessor,
};
use crate::uucp_lock::DEFAULT_SPOOL_DIR;
use nix::sys::termios::Termios;
use std::os::unix::io::{BorrowedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::{broadcast, oneshot};

enum EndpointPhase {
    Closed,
    Open(OpenedEndpoint),
}

/// A serial device endpoint: device path, parsed default termios, and the
/// open/close lifecycle around a single underlying fd.
pub struct SerialEndpoint {
    devname: String,
    write_only: bool,
    default_termios: Mutex<Termios>,
    spool_dir: PathBuf,
    events: broadcast::Sender<SerialEvent>,
    state: Mutex<EndpointPhase>,
}

impl SerialEndpoint {
    /// Parse `spec` (`devpath[,option,...]`) and `construction_args`
    /// (`key=value` strings) and build an endpoint in the `closed` state.
    /// Does not touch the filesystem or device beyond parsing — matches
    /// spec.md §4.1's "parse failures abort endpoint allocation" (nothing
    /// has been allocated yet at that point).
    pub fn new(spec: &str, construction_args: &[&str]) -> Result<Self> {
        Self::with_spool_dir(spec, construction_args, DEFAULT_SPOOL_DIR)
    }

    /// Same as [`Self::new`] but with an injectable UUCP lock spool
    /// directory, so tests never touch `/var/lock` (spec.md §8).
    pub fn with_spool_dir(
        spec: &str,
        construction_args: &[&str],
        spool_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let _ = spec_parser::parse_construction_args(construction_args)?;
        let parsed = spec_parser::parse_device_spec(spec, skeleton_termios())?;
        let (events, _rx) = broadcast::channel(32);
        Ok(SerialEndpoint {
            devname: parsed.device_path,
            write_only: parsed.write_only,
            default_termios: Mutex::new(parsed.default_termios),
            spool_dir: spool_dir.into(),
            events,
            state: Mutex::new(EndpointPhase::Closed),
        })
    }

    /// The device path this endpoint was constructed with.
    pub fn devname(&self) -> &str {
        &self.devname
    }

    /// Subscribe to this endpoint's out-of-band events.
    pub fn events(&self) -> broadcast::Receiver<SerialEvent> {
        self.events.subscribe()
    }

    /// Run `closed → locking → opening → open`.
    pub async fn open(&self) -> Result<()> {
        let default_termios = self.default_termios.lock().expect("mutex poisoned").clone();
        let opened = lifecycle::open_endpoint(
            &self.spool_dir,
            &self.devname,
            self.write_only,
            &default_termios,
            self.events.clone(),
        )?;
        let mut state = self.state.lock().expect("mutex poisoned");
        match &*state {
            EndpointPhase::Open(_) => {
                drop(state);
                // Another opener won the race; drop the lock/fd we just
                // acquired rather than leaking them.
                let _ = lifecycle::close_endpoint(opened).await;
                return Err(Error::busy("endpoint already open"));
            }
            EndpointPhase::Closed => *state = EndpointPhase::Open(opened),
        }
        Ok(())
    }

    /// Run `open → draining → closed`.
    pub async fn close(&self) -> Result<()> {
        let opened = {
            let mut state = self.state.lock().expect("mutex poisoned");
            match std::mem::replace(&mut *state, EndpointPhase::Closed) {
                EndpointPhase::Open(o) => o,
                EndpointPhase::Closed => return Err(Error::busy("endpoint not open")),
            }
        };
        lifecycle::close_endpoint(opened).await
    }

    /// Whether the endpoint is currently open.
    pub fn is_open(&self) -> bool {
        matches!(&*self.state.lock().expect("mutex poisoned"), EndpointPhase::Open(_))
    }

    fn with_open<R>(&self, f: impl FnOnce(&OpenedEndpoint) -> Result<R>) -> Result<R> {
        let state = self.state.lock().expect("mutex poisoned");
        match &*state {
            EndpointPhase::Open(o) => f(o),
            EndpointPhase::Closed => Err(Error::busy("endpoint not open")),
        }
    }

    fn check_not_write_only(&self) -> Result<()> {
        if self.write_only {
            Err(Error::unsupported("operation unsupported on a write-only endpoint"))
        } else {
            Ok(())
        }
    }

    /// Submit a termios-backed parameter get/set (spec.md §4.3).
    pub fn submit_termio(
        &self,
        accessor: TermioAccessor,
        value: i32,
        completion: Option<Completion>,
    ) -> Result<i32> {
        self.check_not_write_only()?;
        self.with_open(|o| o.queue.submit_termio(accessor, value, completion))
    }

    /// Submit a modem-control-line get/set (spec.md §4.3).
    pub fn submit_modem_ctl(
        &self,
        accessor: ModemCtlAccessor,
        value: i32,
        completion: Option<Completion>,
    ) -> Result<i32> {
        self.check_not_write_only()?;
        self.with_open(|o| o.queue.submit_modem_ctl(accessor, value, completion))
    }

    /// Submit a BREAK latch get/set (spec.md §4.3).
    pub fn submit_break(&self, value: i32, completion: Option<Completion>) -> Result<i32> {
        self.check_not_write_only()?;
        self.with_open(|o| o.queue.submit_break(value, completion))
    }

    async fn queued_termio_get(&self, accessor: TermioAccessor) -> Result<i32> {
        let (tx, rx) = oneshot::channel();
        self.submit_termio(
            accessor,
            0,
            Some(Box::new(move |r| {
                let _ = tx.send(r);
            })),
        )?;
        rx.await.map_err(|_| Error::busy("queue runner dropped completion"))?
    }

    async fn queued_modem_ctl_get(&self, accessor: ModemCtlAccessor) -> Result<i32> {
        let (tx, rx) = oneshot::channel();
        self.submit_modem_ctl(
            accessor,
            0,
            Some(Box::new(move |r| {
                let _ = tx.send(r);
            })),
        )?;
        rx.await.map_err(|_| Error::busy("queue runner dropped completion"))?
    }

    async fn queued_break_get(&self) -> Result<i32> {
        let (tx, rx) = oneshot::channel();
        self.submit_break(
            0,
            Some(Box::new(move |r| {
                let _ = tx.send(r);
            })),
        )?;
        rx.await.map_err(|_| Error::busy("queue runner dropped completion"))?
    }

    /// Read the effective baud rate via a queued get-back.
    pub async fn get_baud_rate(&self) -> Result<u32> {
        Ok(self.queued_termio_get(termios_adapter::baud_accessor()).await? as u32)
    }

    /// Set the baud rate; the OS write is synchronous, so the returned
    /// value is already the effective (possibly snapped) rate.
    pub fn set_baud_rate(&self, baud: u32) -> Result<u32> {
        Ok(self.submit_termio(termios_adapter::baud_accessor(), baud as i32, None)? as u32)
    }

    /// Read the effective parity via a queued get-back.
    pub async fn get_parity(&self) -> Result<Parity> {
        parity_from_i32(self.queued_termio_get(parity_accessor()).await?)
    }

    /// Set parity synchronously.
    pub fn set_parity(&self, parity: Parity) -> Result<Parity> {
        parity_from_i32(self.submit_termio(parity_accessor(), parity as i32, None)?)
    }

    /// Read the effective data size (5..8) via a queued get-back.
    pub async fn get_data_bits(&self) -> Result<u32> {
        Ok(self.queued_termio_get(termios_adapter::datasize_accessor()).await? as u32)
    }

    /// Set the data size synchronously.
    pub fn set_data_bits(&self, bits: u32) -> Result<u32> {
        Ok(self.submit_termio(termios_adapter::datasize_accessor(), bits as i32, None)? as u32)
    }

    /// Read the effective stop-bit count (1 or 2) via a queued get-back.
    pub async fn get_stop_bits(&self) -> Result<u32> {
        Ok(self.queued_termio_get(stopbits_accessor()).await? as u32)
    }

    /// Set the stop-bit count synchronously.
    pub fn set_stop_bits(&self, bits: u32) -> Result<u32> {
        Ok(self.submit_termio(stopbits_accessor(), bits as i32, None)? as u32)
    }

    /// Read the effective flow-control mode via a queued get-back.
    pub async fn get_flow_control(&self) -> Result<FlowControl> {
        flowcontrol_from_i32(self.queued_termio_get(flowcontrol_accessor()).await?)
    }

    /// Set flow control synchronously.
    pub fn set_flow_control(&self, mode: FlowControl) -> Result<FlowControl> {
        flowcontrol_from_i32(self.submit_termio(flowcontrol_accessor(), mode as i32, None)?)
    }

    /// Read the effective input-flow-control mode via a queued get-back.
    pub async fn get_input_flow_control(&self) -> Result<IFlowControl> {
        iflowcontrol_from_i32(self.queued_termio_get(iflowcontrol_accessor()).await?)
    }

    /// Set input flow control synchronously.
    pub fn set_input_flow_control(&self, mode: IFlowControl) -> Result<IFlowControl> {
        iflowcontrol_from_i32(self.submit_termio(iflowcontrol_accessor(), mode as i32, None)?)
    }

    /// Read the DTR line state via a queued get-back.
    pub async fn get_dtr(&self) -> Result<LineLevel> {
        line_level_from_i32(self.queued_modem_ctl_get(dtr_accessor()).await?)
    }

    /// Assert or clear DTR synchronously.
    pub fn set_dtr(&self, level: LineLevel) -> Result<LineLevel> {
        line_level_from_i32(self.submit_modem_ctl(dtr_accessor(), level as i32, None)?)
    }

    /// Read the RTS line state via a queued get-back.
    pub async fn get_rts(&self) -> Result<LineLevel> {
        line_level_from_i32(self.queued_modem_ctl_get(rts_accessor()).await?)
    }

    /// Assert or clear RTS synchronously.
    pub fn set_rts(&self, level: LineLevel) -> Result<LineLevel> {
        line_level_from_i32(self.submit_modem_ctl(rts_accessor(), level as i32, None)?)
    }

    /// Read the latched BREAK state via a queued get-back.
    pub async fn get_break(&self) -> Result<LineLevel> {
        line_level_from_i32(self.queued_break_get().await?)
    }

    /// Latch or release BREAK synchronously.
    pub fn set_break(&self, level: LineLevel) -> Result<LineLevel> {
        line_level_from_i32(self.submit_break(level as i32, None)?)
    }

    /// Arm or disarm modem-state polling (spec.md §4.5). Unsupported on a
    /// write-only endpoint, which has no poller.
    pub fn subscribe_modemstate(&self, mask: u8) -> Result<()> {
        self.check_not_write_only()?;
        self.with_open(|o| match &o.poller {
            Some(p) => {
                p.subscribe(mask);
                Ok(())
            }
            None => Err(Error::unsupported("modem-state polling not available")),
        })
    }

    /// Suspend or resume output via `tcflow` (spec.md §4.6).
    pub fn hold_output(&self, hold: bool) -> Result<()> {
        self.with_open(|o| control::hold_output(o.fd, hold))
    }

    /// Discard queued input and/or output bytes (spec.md §4.6).
    pub fn flush(&self, kind: FlushKind) -> Result<()> {
        self.with_open(|o| control::flush(o.fd, kind))
    }

    /// Send a transient BREAK pulse (spec.md §4.6). Unsupported on a
    /// write-only endpoint, matching spec.md §8's boundary test.
    pub fn send_break(&self) -> Result<()> {
        self.check_not_write_only()?;
        self.with_open(|o| control::send_break(o.fd))
    }

    /// The raw fd, for diagnostics (spec.md §4.6).
    pub fn remote_id(&self) -> Result<RawFd> {
        self.with_open(|o| Ok(control::remote_id(o.fd)))
    }

    /// Render the human-readable address string (spec.md §4.7).
    pub fn address_str(&self) -> String {
        let state = self.state.lock().expect("mutex poisoned");
        match &*state {
            EndpointPhase::Open(o) => {
                let termios = if self.write_only {
                    self.default_termios.lock().expect("mutex poisoned").clone()
                } else {
                    tcgetattr_fd(o.fd).unwrap_or_else(|_| {
                        self.default_termios.lock().expect("mutex poisoned").clone()
                    })
                };
                let mctl = if self.write_only {
                    None
                } else {
                    crate::queue::tiocmget(o.fd).ok()
                };
                format::format_address(&self.devname, self.write_only, &termios, mctl)
            }
            EndpointPhase::Closed => {
                let termios = self.default_termios.lock().expect("mutex poisoned").clone();
                format::format_address(&self.devname, self.write_only, &termios, None)
            }
        }
    }
}

fn tcgetattr_fd(fd: RawFd) -> Result<Termios> {
    // SAFETY: `fd` is an open tty fd owned by the endpoint for the
    // duration of this call.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    Ok(nix::sys::termios::tcgetattr(borrowed)?)
}

/// A throwaway termios used only as a well-formed starting point for
/// `default_termios` before any device is opened; `Termios` has no safe
/// `Default` impl, so we borrow one from a scratch pty (spec.md §3).
fn skeleton_termios() -> Termios {
    let (master, _slave) = nix::pty::openpty(None, None).expect("openpty for default termios");
    let mut t = nix::sys::termios::tcgetattr(&master).expect("tcgetattr");
    termios_adapter::build_default_termios(&mut t);
    t
}

fn parity_from_i32(val: i32) -> Result<Parity> {
    match val {
        v if v == Parity::None as i32 => Ok(Parity::None),
        v if v == Parity::Odd as i32 => Ok(Parity::Odd),
        v if v == Parity::Even as i32 => Ok(Parity::Even),
        v if v == Parity::Mark as i32 => Ok(Parity::Mark),
        v if v == Parity::Space as i32 => Ok(Parity::Space),
        other => Err(Error::invalid_input(format!("unrecognized parity code: {other}"))),
    }
}

fn flowcontrol_from_i32(val: i32) -> Result<FlowControl> {
    match val {
        v if v == FlowControl::None as i32 => Ok(FlowControl::None),
        v if v == FlowControl::XonXoff as i32 => Ok(FlowControl::XonXoff),
        v if v == FlowControl::RtsCts as i32 => Ok(FlowControl::RtsCts),
        other => Err(Error::invalid_input(format!("unrecognized flow control code: {other}"))),
    }
}

fn iflowcontrol_from_i32(val: i32) -> Result<IFlowControl> {
    match val {
        v if v == IFlowControl::None as i32 => Ok(IFlowControl::None),
        v if v == IFlowControl::XonXoff as i32 => Ok(IFlowControl::XonXoff),
        other => Err(Error::invalid_input(format!("unrecognized iflowcontrol code: {other}"))),
    }
}

fn line_level_from_i32(val: i32) -> Result<LineLevel> {
    match val {
        v if v == LineLevel::On as i32 => Ok(LineLevel::On),
        v if v == LineLevel::Off as i32 => Ok(LineLevel::Off),
        other => Err(Error::invalid_input(format!("unrecognized line level code: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_parses_spec_and_args() {
        let dir = tempfile::tempdir().unwrap();
        let ep = SerialEndpoint::with_spool_dir("/dev/ttyFAKE,9600N81", &[], dir.path()).unwrap();
        assert_eq!(ep.devname(), "/dev/ttyFAKE");
        assert!(!ep.write_only);
        assert!(!ep.is_open());
    }

    #[test]
    fn readbuf_construction_arg_accepted() {
        let dir = tempfile::tempdir().unwrap();
        SerialEndpoint::with_spool_dir("/dev/ttyFAKE", &["readbuf=4096"], dir.path()).unwrap();
    }

    #[test]
    fn unknown_construction_arg_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err =
            SerialEndpoint::with_spool_dir("/dev/ttyFAKE", &["bogus=1"], dir.path()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn submit_on_closed_endpoint_fails_busy_without_allocating() {
        let dir = tempfile::tempdir().unwrap();
        let ep = SerialEndpoint::with_spool_dir("/dev/ttyFAKE", &[], dir.path()).unwrap();
        let err = ep
            .submit_termio(termios_adapter::baud_accessor(), 9600, None)
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Busy);
    }

    #[tokio::test]
    async fn write_only_rejects_termio_and_break() {
        let dir = tempfile::tempdir().unwrap();
        let ep =
            SerialEndpoint::with_spool_dir("/dev/ttyFAKE,WRONLY", &[], dir.path()).unwrap();
        let err = ep
            .submit_termio(termios_adapter::baud_accessor(), 9600, None)
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Unsupported);
        let err = ep.send_break().unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Unsupported);
    }

    #[test]
    fn closed_endpoint_address_str_reports_offline() {
        let dir = tempfile::tempdir().unwrap();
        let ep = SerialEndpoint::with_spool_dir("/dev/ttyFAKE,9600N81", &[], dir.path()).unwrap();
        assert!(ep.address_str().ends_with(" offline"));
        assert!(ep.address_str().contains("9600N81"));
    }
}
