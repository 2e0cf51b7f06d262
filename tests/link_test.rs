//! Link negotiation and end-to-end scenarios over in-memory transports.

mod common;

use bytes::Bytes;
use common::{virtual_uart_pair, wait_until, CaptureUart, GarbageUart, Recorder};
use h5_tokio::common::{is_sync, PacketType};
use h5_tokio::{H5Config, H5Error, H5Transport, LinkState, StatusCode};
use std::time::Duration;
use tokio::time::timeout;

/// Open two transports wired back to back; both must reach ACTIVE.
async fn open_pair() -> (H5Transport, H5Transport, Recorder, Recorder) {
    let (uart_a, uart_b) = virtual_uart_pair();
    let a = H5Transport::new(uart_a, H5Config::new()).unwrap();
    let b = H5Transport::new(uart_b, H5Config::new()).unwrap();

    let rec_a = Recorder::new();
    let rec_b = Recorder::new();

    let (res_a, res_b) = tokio::join!(a.open(rec_a.callbacks()), b.open(rec_b.callbacks()));
    res_a.unwrap();
    res_b.unwrap();

    (a, b, rec_a, rec_b)
}

async fn open_close_roundtrip() {
    let (a, b, rec_a, rec_b) = open_pair().await;

    assert_eq!(a.state(), LinkState::Active);
    assert_eq!(b.state(), LinkState::Active);
    assert!(rec_a.statuses().contains(&StatusCode::ConnectionActive));
    assert!(rec_b.statuses().contains(&StatusCode::ConnectionActive));

    a.close().await.unwrap();
    b.close().await.unwrap();

    assert_eq!(a.state(), LinkState::Closed);
    assert_eq!(b.state(), LinkState::Closed);
}

#[tokio::test(flavor = "multi_thread")]
async fn open_close_loop() {
    common::init_tracing();

    for _ in 0..5 {
        open_close_roundtrip().await;
    }
}

// Soak variant of the open/close loop; slow because every handshake pays
// the 300 ms reset wait. Run with `cargo test -- --ignored`.
#[tokio::test(flavor = "multi_thread")]
#[ignore = "soak test, ~35s of real handshake timers"]
async fn open_close_loop_soak() {
    for _ in 0..100 {
        open_close_roundtrip().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn bidirectional_reliable_send() {
    common::init_tracing();
    let (a, b, rec_a, rec_b) = open_pair().await;

    let payload_a = Bytes::from_static(&[0xAA; 6]);
    let payload_b = Bytes::from_static(&[0xBB; 6]);

    let (sent_a, sent_b) = timeout(
        Duration::from_secs(1),
        async { tokio::join!(a.send(payload_a), b.send(payload_b)) },
    )
    .await
    .expect("sends did not complete within a second");
    sent_a.unwrap();
    sent_b.unwrap();

    wait_until("both payloads delivered", || {
        rec_a.data().len() == 1 && rec_b.data().len() == 1
    })
    .await;

    assert_eq!(rec_a.data(), vec![vec![0xBB; 6]]);
    assert_eq!(rec_b.data(), vec![vec![0xAA; 6]]);
    assert_eq!(a.stats().seq, 1);
    assert_eq!(b.stats().seq, 1);

    a.close().await.unwrap();
    b.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn sequence_numbers_progress_modulo_8() {
    let (a, b, _rec_a, rec_b) = open_pair().await;

    for i in 0..10u8 {
        a.send(Bytes::from(vec![i; 3])).await.unwrap();
    }

    wait_until("all payloads delivered", || rec_b.data().len() == 10).await;

    let delivered: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i; 3]).collect();
    assert_eq!(rec_b.data(), delivered);

    assert_eq!(a.stats().seq, 2); // 10 mod 8
    assert_eq!(b.stats().ack, 2);

    a.close().await.unwrap();
    b.close().await.unwrap();
}

#[tokio::test]
async fn missing_sync_response_fails_link() {
    common::init_tracing();

    // Peer answers nothing at all, so SYNC exhausts its retries
    let uart = CaptureUart::new();
    let h5 = H5Transport::new(uart.clone(), H5Config::new()).unwrap();
    let recorder = Recorder::new();

    let err = h5.open(recorder.callbacks()).await.unwrap_err();
    assert!(matches!(err, H5Error::Timeout { .. }), "{err}");
    assert_eq!(h5.state(), LinkState::Failed);

    let statuses = recorder.statuses();
    assert!(statuses.contains(&StatusCode::ResetPerformed));
    assert!(statuses.contains(&StatusCode::PktSendMaxRetriesReached));

    // One reset frame followed by six SYNC attempts
    let reset = uart.next_sent().await;
    assert_eq!(reset.header.packet_type, PacketType::Reset);
    for _ in 0..6 {
        let sync = uart.next_sent().await;
        assert_eq!(sync.header.packet_type, PacketType::LinkControl);
        assert!(is_sync(&sync.payload));
        assert!(!sync.header.reliable);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn peer_dropping_sync_frames_fails_negotiation() {
    let (uart_a, uart_b) = virtual_uart_pair();

    // The wire eats every SYNC the unit under test emits, so its peer can
    // never answer with a SYNC RESPONSE
    uart_a.set_drop_filter(|packet| {
        packet.header.packet_type == PacketType::LinkControl && is_sync(&packet.payload)
    });

    let a = H5Transport::new(uart_a, H5Config::new()).unwrap();
    let b = H5Transport::new(uart_b, H5Config::new()).unwrap();
    let rec_a = Recorder::new();

    let (res_a, res_b) = tokio::join!(
        a.open(rec_a.callbacks()),
        b.open(h5_tokio::TransportCallbacks::noop())
    );

    assert!(matches!(res_a, Err(H5Error::Timeout { .. })));
    assert!(res_b.is_err());
    assert_eq!(a.state(), LinkState::Failed);
    assert!(rec_a
        .statuses()
        .contains(&StatusCode::PktSendMaxRetriesReached));
}

#[tokio::test]
async fn missing_config_response_fails_link() {
    let uart = CaptureUart::new();
    let h5 = H5Transport::new(uart.clone(), H5Config::new()).unwrap();
    let recorder = Recorder::new();

    // Answer SYNC but swallow CONFIG
    let responder = tokio::spawn({
        let uart = uart.clone();
        async move {
            loop {
                let packet = uart.next_sent().await;
                if packet.header.packet_type == PacketType::LinkControl && is_sync(&packet.payload)
                {
                    uart.inject_control(h5_tokio::common::ControlPacket::SyncResponse);
                }
            }
        }
    });

    let err = h5.open(recorder.callbacks()).await.unwrap_err();
    responder.abort();

    assert!(matches!(err, H5Error::Timeout { .. }), "{err}");
    assert_eq!(h5.state(), LinkState::Failed);
    assert!(recorder
        .statuses()
        .contains(&StatusCode::PktSendMaxRetriesReached));
}

#[tokio::test]
async fn garbage_inbound_stream_fails_link() {
    let uart = GarbageUart::new();
    let h5 = H5Transport::new(uart, H5Config::new()).unwrap();
    let recorder = Recorder::new();

    let err = h5.open(recorder.callbacks()).await.unwrap_err();
    assert!(matches!(err, H5Error::Timeout { .. }), "{err}");
    assert_eq!(h5.state(), LinkState::Failed);

    // The garbage produced decode failures, not silent drops
    assert!(h5.stats().error_packets > 0);
}

#[tokio::test]
async fn send_requires_active_link() {
    let (uart, _) = virtual_uart_pair();
    let h5 = H5Transport::new(uart, H5Config::new()).unwrap();

    let err = h5.send(Bytes::from_static(b"nope")).await.unwrap_err();
    assert!(matches!(err, H5Error::InvalidState { .. }));
}

#[tokio::test]
async fn close_is_accepted_before_open() {
    let (uart, _) = virtual_uart_pair();
    let h5 = H5Transport::new(uart, H5Config::new()).unwrap();

    h5.close().await.unwrap();
    assert_eq!(h5.state(), LinkState::Closed);
}

#[tokio::test]
async fn open_is_rejected_after_close() {
    let (uart, _) = virtual_uart_pair();
    let h5 = H5Transport::new(uart, H5Config::new()).unwrap();

    h5.close().await.unwrap();

    let err = h5
        .open(h5_tokio::TransportCallbacks::noop())
        .await
        .unwrap_err();
    assert!(matches!(err, H5Error::Internal { .. }));
}
