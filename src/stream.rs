//! The async byte-stream layer.
//!
//! spec.md treats the byte-stream layer as an external collaborator
//! (§1/§4.1's `readbuf=N` construction argument exists only to configure
//! it). Grounded on the `SerialStream`/`AsyncFd` wrapper in
//! `examples/other_examples/99464096_berkowski-tokio-serial__src-lib.rs.rs`
//! (by the same author as the teacher), this crate supplies a minimal,
//! concrete realization: a raw fd wrapped in [`tokio::io::unix::AsyncFd`],
//! implementing [`tokio::io::AsyncRead`]/[`tokio::io::AsyncWrite`] with the
//! same `poll_read_ready`/`try_io` retry loop.

use crate::endpoint::SerialEndpoint;
use crate::error::Result;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

struct RawFdIo(RawFd);

impl AsRawFd for RawFdIo {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Read for RawFdIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        nix::unistd::read(self.0, buf).map_err(io::Error::from)
    }
}

impl Write for RawFdIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: `self.0` is an open, valid fd for the lifetime of this call.
        let borrowed = unsafe { std::os::unix::io::BorrowedFd::borrow_raw(self.0) };
        nix::unistd::write(borrowed, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for RawFdIo {
    fn drop(&mut self) {
        let _ = nix::unistd::close(self.0);
    }
}

/// An async byte-stream handle onto a serial device's fd, independent of
/// the [`SerialEndpoint`] that owns the control-plane state.
pub struct SerialStream {
    inner: AsyncFd<RawFdIo>,
}

impl SerialStream {
    /// Duplicate the fd behind `endpoint` (which must currently be open)
    /// and wrap it in an `AsyncFd`. The duplicate shares the same open
    /// file description, so `O_NONBLOCK` carries over and reads/writes see
    /// the same underlying device, but closing the returned `SerialStream`
    /// does not close the endpoint's own fd.
    pub fn try_clone_from(endpoint: &SerialEndpoint) -> Result<Self> {
        let fd = endpoint.remote_id()?;
        let dup_fd = nix::unistd::dup(fd)?;
        Self::from_owned_fd(dup_fd)
    }

    /// Wrap an already-open, already-nonblocking fd that this `SerialStream`
    /// will own (closing it on drop). Used internally and by tests backed
    /// by a loopback pty (spec.md §8).
    pub(crate) fn from_owned_fd(fd: RawFd) -> Result<Self> {
        Ok(SerialStream {
            inner: AsyncFd::new(RawFdIo(fd))?,
        })
    }

    /// A connected pty pair for tests, standing in for "a pseudo-device
    /// backed by a loopback pty" (spec.md §8).
    #[cfg(test)]
    pub fn pair_for_test() -> Result<(Self, Self)> {
        let (master, slave) = nix::pty::openpty(None, None)?;
        use std::os::unix::io::IntoRawFd;
        let master_fd = master.into_raw_fd();
        let slave_fd = slave.into_raw_fd();
        nix::fcntl::fcntl(
            master_fd,
            nix::fcntl::FcntlArg::F_SETFL(nix::fcntl::OFlag::O_NONBLOCK),
        )?;
        nix::fcntl::fcntl(
            slave_fd,
            nix::fcntl::FcntlArg::F_SETFL(nix::fcntl::OFlag::O_NONBLOCK),
        )?;
        Ok((Self::from_owned_fd(master_fd)?, Self::from_owned_fd(slave_fd)?))
    }
}

impl AsyncRead for SerialStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = match self.inner.poll_read_ready(cx) {
                Poll::Ready(Ok(g)) => g,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            };
            match guard.try_io(|inner| {
                let fd = inner.get_ref().0;
                nix::unistd::read(fd, buf.initialize_unfilled()).map_err(io::Error::from)
            }) {
                Ok(Ok(bytes_read)) => {
                    buf.advance(bytes_read);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(err)) => return Poll::Ready(Err(err)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for SerialStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = match self.inner.poll_write_ready(cx) {
                Poll::Ready(Ok(g)) => g,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            };
            match guard.try_io(|inner| {
                let fd = inner.get_ref().0;
                let borrowed = unsafe { std::os::unix::io::BorrowedFd::borrow_raw(fd) };
                nix::unistd::write(borrowed, buf).map_err(io::Error::from)
            }) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
