//! Round-trip and boundary scenarios for the deferred operation queue
//! (spec.md §8): set-then-queued-get for baud/parity/flow-control/BREAK, and
//! the documented boundary failures.

mod common;

use serial_core::{FlowControl, LineLevel, Parity, SerialEndpoint};

async fn open_endpoint() -> (SerialEndpoint, common::LoopbackPty, tempfile::TempDir) {
    let pty = common::open_loopback_pty();
    let dir = common::spool_dir();
    let endpoint =
        SerialEndpoint::with_spool_dir(&format!("{},9600N81", pty.slave_path), &[], dir.path())
            .unwrap();
    endpoint.open().await.unwrap();
    (endpoint, pty, dir)
}

#[tokio::test]
async fn set_baud_then_queued_get_reflects_effective_rate() {
    let (endpoint, _pty, _dir) = open_endpoint().await;
    endpoint.set_baud_rate(115200).unwrap();
    assert_eq!(endpoint.get_baud_rate().await.unwrap(), 115200);
    assert!(endpoint.address_str().contains("115200"));
    endpoint.close().await.unwrap();
}

#[tokio::test]
async fn parity_round_trips_through_every_enum_value() {
    let (endpoint, _pty, _dir) = open_endpoint().await;
    for parity in [Parity::None, Parity::Odd, Parity::Even] {
        endpoint.set_parity(parity).unwrap();
        assert_eq!(endpoint.get_parity().await.unwrap(), parity);
    }
    endpoint.close().await.unwrap();
}

#[tokio::test]
async fn flow_control_round_trips() {
    let (endpoint, _pty, _dir) = open_endpoint().await;
    for mode in [FlowControl::None, FlowControl::XonXoff, FlowControl::RtsCts] {
        endpoint.set_flow_control(mode).unwrap();
        assert_eq!(endpoint.get_flow_control().await.unwrap(), mode);
    }
    endpoint.close().await.unwrap();
}

#[tokio::test]
async fn break_latches_on_and_off_and_rejects_bad_value() {
    let (endpoint, _pty, _dir) = open_endpoint().await;

    endpoint.set_break(LineLevel::On).unwrap();
    assert_eq!(endpoint.get_break().await.unwrap(), LineLevel::On);

    endpoint.set_break(LineLevel::Off).unwrap();
    assert_eq!(endpoint.get_break().await.unwrap(), LineLevel::Off);

    let err = endpoint.submit_break(42, None).unwrap_err();
    assert_eq!(err.kind, serial_core::ErrorKind::InvalidInput);

    endpoint.close().await.unwrap();
}

#[tokio::test]
async fn dtr_rts_round_trip_independently() {
    let (endpoint, _pty, _dir) = open_endpoint().await;

    endpoint.set_dtr(LineLevel::On).unwrap();
    endpoint.set_rts(LineLevel::Off).unwrap();
    assert_eq!(endpoint.get_dtr().await.unwrap(), LineLevel::On);
    assert_eq!(endpoint.get_rts().await.unwrap(), LineLevel::Off);

    endpoint.close().await.unwrap();
}

#[tokio::test]
async fn submit_on_closed_endpoint_fails_busy() {
    let dir = common::spool_dir();
    let endpoint = SerialEndpoint::with_spool_dir("/dev/ttyFAKE", &[], dir.path()).unwrap();
    let err = endpoint.set_baud_rate(9600).unwrap_err();
    assert_eq!(err.kind, serial_core::ErrorKind::Busy);
}
