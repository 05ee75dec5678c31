//! Exercises `SerialStream` against the fd an open `SerialEndpoint` owns,
//! confirming the byte-stream layer and the control plane can share a
//! device (spec.md §1: "external collaborator... referenced only by the
//! interface it presents").

mod common;

use serial_core::{SerialEndpoint, SerialStream};
use std::os::fd::AsRawFd;
use tokio::io::AsyncReadExt;

#[tokio::test]
async fn stream_cloned_from_endpoint_reads_what_the_pty_master_writes() {
    let pty = common::open_loopback_pty();
    let dir = common::spool_dir();
    let endpoint = SerialEndpoint::with_spool_dir(&pty.slave_path, &[], dir.path()).unwrap();
    endpoint.open().await.unwrap();

    let mut stream = SerialStream::try_clone_from(&endpoint).unwrap();

    let master_fd = unsafe { std::os::fd::BorrowedFd::borrow_raw(pty.master.as_raw_fd()) };
    nix::unistd::write(master_fd, b"ping").expect("write to pty master");

    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    endpoint.close().await.unwrap();
}
