//! Modem-state subscription scenarios (spec.md §8 scenario 4 and the
//! `subscribe(0)` boundary behavior). Toggling CD/RI/DSR/CTS externally
//! (scenario 5) has no loopback-pty equivalent — a pty pair doesn't drive
//! those handshake lines — so that edge-detection math is covered directly
//! in `src/modemstate.rs`'s `compute_modemstate` unit tests against
//! synthetic `TIOCMGET` words instead.

mod common;

use serial_core::{SerialEndpoint, SerialEvent};
use std::time::Duration;

#[tokio::test]
async fn open_forces_an_initial_modemstate_event() {
    let pty = common::open_loopback_pty();
    let dir = common::spool_dir();
    let endpoint = SerialEndpoint::with_spool_dir(&pty.slave_path, &[], dir.path()).unwrap();
    let mut events = endpoint.events();

    endpoint.open().await.unwrap();

    let event = tokio::time::timeout(Duration::from_millis(500), events.recv())
        .await
        .expect("initial modem-state event should arrive shortly after open")
        .unwrap();
    assert!(matches!(event, SerialEvent::ModemState(_)));

    endpoint.close().await.unwrap();
}

#[tokio::test]
async fn subscribe_zero_then_nonzero_yields_exactly_one_forced_event() {
    let pty = common::open_loopback_pty();
    let dir = common::spool_dir();
    let endpoint = SerialEndpoint::with_spool_dir(&pty.slave_path, &[], dir.path()).unwrap();
    let mut events = endpoint.events();
    endpoint.open().await.unwrap();

    // Drain the open-time forced send.
    let _ = tokio::time::timeout(Duration::from_millis(500), events.recv())
        .await
        .unwrap();

    endpoint.subscribe_modemstate(0).unwrap();
    // No event should fire while unsubscribed.
    let silence = tokio::time::timeout(Duration::from_millis(50), events.recv()).await;
    assert!(silence.is_err());

    endpoint.subscribe_modemstate(0xFF).unwrap();
    let event = tokio::time::timeout(Duration::from_millis(500), events.recv())
        .await
        .expect("re-subscribing should force exactly one initial report")
        .unwrap();
    assert!(matches!(event, SerialEvent::ModemState(_)));

    endpoint.close().await.unwrap();
}
