//! Shared test doubles for H5 link tests: an in-memory virtual UART pair,
//! a scripted capture transport, and a garbage-emitting transport.

use bytes::Bytes;
use h5_tokio::common::{ControlPacket, H5Packet, PacketType};
use h5_tokio::{
    slip, StatusCode, Transport, TransportCallbacks, TransportFuture,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

/// Initialize test tracing once; repeated calls are ignored.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll until `predicate` holds; panic with `what` after two seconds.
#[allow(dead_code)]
pub async fn wait_until(what: &str, predicate: impl Fn() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !predicate() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

/// Decode one SLIP-framed wire frame into an H5 packet.
pub fn decode_frame(frame: &[u8]) -> Option<H5Packet> {
    let body = slip::decode(frame).ok()?;
    H5Packet::decode(&body).ok()
}

/// Records upper-stack callbacks for assertions.
#[derive(Clone, Default)]
pub struct Recorder {
    pub statuses: Arc<StdMutex<Vec<StatusCode>>>,
    pub data: Arc<StdMutex<Vec<Vec<u8>>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callbacks(&self) -> TransportCallbacks {
        let statuses = self.statuses.clone();
        let data = self.data.clone();

        TransportCallbacks::new(
            Arc::new(move |code, _| statuses.lock().unwrap().push(code)),
            Arc::new(move |bytes| data.lock().unwrap().push(bytes.to_vec())),
            Arc::new(|_, _| {}),
        )
    }

    pub fn statuses(&self) -> Vec<StatusCode> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn data(&self) -> Vec<Vec<u8>> {
        self.data.lock().unwrap().clone()
    }
}

type DropFilter = Box<dyn Fn(&H5Packet) -> bool + Send + Sync>;

/// In-memory UART wired to a peer port. Sent frames are decoded so tests
/// can selectively suppress packets; reset frames are never forwarded
/// (resetting the peer makes no sense between two host-side instances).
pub struct VirtualUart {
    name: &'static str,
    peer: StdMutex<Weak<VirtualUart>>,
    callbacks: StdMutex<Option<TransportCallbacks>>,
    is_open: AtomicBool,
    drop_filter: StdMutex<Option<DropFilter>>,
}

impl VirtualUart {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            peer: StdMutex::new(Weak::new()),
            callbacks: StdMutex::new(None),
            is_open: AtomicBool::new(false),
            drop_filter: StdMutex::new(None),
        }
    }

    /// Suppress sent frames for which `filter` returns true.
    #[allow(dead_code)]
    pub fn set_drop_filter(&self, filter: impl Fn(&H5Packet) -> bool + Send + Sync + 'static) {
        *self.drop_filter.lock().unwrap() = Some(Box::new(filter));
    }

    fn inject(&self, bytes: &[u8]) {
        if !self.is_open.load(Ordering::SeqCst) {
            return;
        }

        let data = self
            .callbacks
            .lock()
            .unwrap()
            .as_ref()
            .map(|callbacks| callbacks.data.clone());
        if let Some(data) = data {
            data(bytes);
        }
    }
}

impl Transport for VirtualUart {
    fn open(&self, callbacks: TransportCallbacks) -> TransportFuture<'_> {
        Box::pin(async move {
            *self.callbacks.lock().unwrap() = Some(callbacks);
            self.is_open.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn close(&self) -> TransportFuture<'_> {
        Box::pin(async move {
            self.is_open.store(false, Ordering::SeqCst);
            *self.callbacks.lock().unwrap() = None;
            Ok(())
        })
    }

    fn send(&self, data: Bytes) -> TransportFuture<'_> {
        Box::pin(async move {
            if let Some(packet) = decode_frame(&data) {
                if packet.header.packet_type == PacketType::Reset {
                    tracing::trace!(uart = self.name, "suppressing reset frame");
                    return Ok(());
                }

                let dropped = self
                    .drop_filter
                    .lock()
                    .unwrap()
                    .as_ref()
                    .is_some_and(|filter| filter(&packet));
                if dropped {
                    tracing::trace!(uart = self.name, "drop filter suppressed frame");
                    return Ok(());
                }
            }

            if let Some(peer) = self.peer.lock().unwrap().upgrade() {
                peer.inject(&data);
            }

            Ok(())
        })
    }
}

/// Create two virtual UARTs wired back to back.
pub fn virtual_uart_pair() -> (Arc<VirtualUart>, Arc<VirtualUart>) {
    let a = Arc::new(VirtualUart::new("uart-a"));
    let b = Arc::new(VirtualUart::new("uart-b"));
    *a.peer.lock().unwrap() = Arc::downgrade(&b);
    *b.peer.lock().unwrap() = Arc::downgrade(&a);
    (a, b)
}

/// Scripted peer: records every frame the unit under test sends (decoded)
/// and lets the test inject inbound bytes at will.
pub struct CaptureUart {
    callbacks: StdMutex<Option<TransportCallbacks>>,
    sent_tx: mpsc::UnboundedSender<H5Packet>,
    sent_rx: Mutex<mpsc::UnboundedReceiver<H5Packet>>,
}

impl CaptureUart {
    pub fn new() -> Arc<Self> {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            callbacks: StdMutex::new(None),
            sent_tx,
            sent_rx: Mutex::new(sent_rx),
        })
    }

    /// Next packet sent by the unit under test, in order.
    pub async fn next_sent(&self) -> H5Packet {
        timeout(Duration::from_secs(5), async {
            self.sent_rx.lock().await.recv().await
        })
        .await
        .expect("timed out waiting for a sent packet")
        .expect("capture channel closed")
    }

    /// Next sent packet matching `pred`, skipping stragglers such as
    /// retransmitted negotiation frames.
    pub async fn expect_sent(&self, pred: impl Fn(&H5Packet) -> bool) -> H5Packet {
        timeout(Duration::from_secs(5), async {
            loop {
                let packet = self.sent_rx.lock().await.recv().await?;
                if pred(&packet) {
                    return Some(packet);
                }
            }
        })
        .await
        .expect("timed out waiting for an expected packet")
        .expect("capture channel closed")
    }

    /// Inject raw bytes as if received from the wire.
    pub fn inject_raw(&self, bytes: &[u8]) {
        let data = self
            .callbacks
            .lock()
            .unwrap()
            .as_ref()
            .map(|callbacks| callbacks.data.clone())
            .expect("transport not open");
        data(bytes);
    }

    /// Inject a complete H5 packet.
    pub fn inject(&self, packet: &H5Packet) {
        let wire = slip::encode(&packet.encode().expect("encodable packet"));
        self.inject_raw(&wire);
    }

    /// Inject one of the fixed control packets.
    pub fn inject_control(&self, control: ControlPacket) {
        self.inject(&H5Packet::unreliable(
            0,
            control.packet_type(),
            Bytes::from_static(control.payload()),
        ));
    }

    /// Inject an ACK frame carrying `ack`.
    #[allow(dead_code)]
    pub fn inject_ack(&self, ack: u8) {
        self.inject(&H5Packet::unreliable(ack, PacketType::Ack, Bytes::new()));
    }

    /// Report a lower-transport status condition upward.
    #[allow(dead_code)]
    pub fn emit_status(&self, code: StatusCode) {
        let status = self
            .callbacks
            .lock()
            .unwrap()
            .as_ref()
            .map(|callbacks| callbacks.status.clone())
            .expect("transport not open");
        status(code, "injected by test");
    }
}

impl Transport for CaptureUart {
    fn open(&self, callbacks: TransportCallbacks) -> TransportFuture<'_> {
        Box::pin(async move {
            *self.callbacks.lock().unwrap() = Some(callbacks);
            Ok(())
        })
    }

    fn close(&self) -> TransportFuture<'_> {
        Box::pin(async move {
            *self.callbacks.lock().unwrap() = None;
            Ok(())
        })
    }

    fn send(&self, data: Bytes) -> TransportFuture<'_> {
        Box::pin(async move {
            let packet = decode_frame(&data).expect("unit under test sent an invalid frame");
            let _ = self.sent_tx.send(packet);
            Ok(())
        })
    }
}

/// Answer the negotiation handshake: respond to SYNC and CONFIG, swallow
/// everything else. Returns once the CONFIG response has been injected.
pub async fn drive_handshake(uart: Arc<CaptureUart>) {
    loop {
        let packet = uart.next_sent().await;

        if packet.header.packet_type != PacketType::LinkControl {
            continue;
        }

        if h5_tokio::common::is_sync(&packet.payload) {
            uart.inject_control(ControlPacket::SyncResponse);
        } else if h5_tokio::common::is_sync_config(&packet.payload) {
            uart.inject_control(ControlPacket::SyncConfigResponse);
            return;
        }
    }
}

/// Lower transport that answers every send with framing garbage and never
/// produces a valid packet.
pub struct GarbageUart {
    callbacks: StdMutex<Option<TransportCallbacks>>,
}

const GARBAGE: &[u8] = &[
    0xC0, 0xDB, 0x42, 0xC0, 0xFF, 0x13, 0x37, 0x55, 0xC0, 0x99, 0x00,
];

impl GarbageUart {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            callbacks: StdMutex::new(None),
        })
    }

    fn spew(&self) {
        let data = self
            .callbacks
            .lock()
            .unwrap()
            .as_ref()
            .map(|callbacks| callbacks.data.clone());
        if let Some(data) = data {
            data(GARBAGE);
        }
    }
}

impl Transport for GarbageUart {
    fn open(&self, callbacks: TransportCallbacks) -> TransportFuture<'_> {
        Box::pin(async move {
            *self.callbacks.lock().unwrap() = Some(callbacks);
            self.spew();
            Ok(())
        })
    }

    fn close(&self) -> TransportFuture<'_> {
        Box::pin(async move {
            *self.callbacks.lock().unwrap() = None;
            Ok(())
        })
    }

    fn send(&self, _data: Bytes) -> TransportFuture<'_> {
        Box::pin(async move {
            self.spew();
            Ok(())
        })
    }
}
