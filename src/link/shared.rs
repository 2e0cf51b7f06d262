//! State shared between the facade, the link worker, and the inbound task.

use crate::common::{next_seq, ControlPacket, H5Packet, LinkStats, SeqNum};
use crate::config::H5Config;
use crate::link::state::{ExitFlags, LinkState};
use crate::slip;
use crate::transport::{LogSeverity, StatusCode, Transport, TransportCallbacks};

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::{timeout_at, Instant};
use tracing::{trace, warn};

#[derive(Debug, Default)]
struct Counters {
    seq: SeqNum,
    ack: SeqNum,
}

#[derive(Debug, Default)]
struct PacketCounts {
    incoming: AtomicU64,
    outgoing: AtomicU64,
    errors: AtomicU64,
}

/// Shared core of one H5 link.
///
/// Lock order: the flag mutex and the counter mutex are leaf locks; they
/// are never held across an await point or a callback invocation.
pub(crate) struct LinkShared {
    pub config: H5Config,
    pub lower: Arc<dyn Transport>,

    upper: StdMutex<Option<TransportCallbacks>>,

    flags: StdMutex<ExitFlags>,
    flags_changed: Notify,

    counters: StdMutex<Counters>,
    acked: Notify,

    state_tx: watch::Sender<LinkState>,

    /// Serializes user sends: at most one reliable packet in flight
    pub send_gate: Mutex<()>,

    counts: PacketCounts,
}

impl LinkShared {
    pub fn new(lower: Arc<dyn Transport>, config: H5Config) -> Arc<Self> {
        let (state_tx, _) = watch::channel(LinkState::Start);

        Arc::new(Self {
            config,
            lower,
            upper: StdMutex::new(None),
            flags: StdMutex::new(ExitFlags::default()),
            flags_changed: Notify::new(),
            counters: StdMutex::new(Counters::default()),
            acked: Notify::new(),
            state_tx,
            send_gate: Mutex::new(()),
            counts: PacketCounts::default(),
        })
    }

    // --- state publication ---------------------------------------------

    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    pub fn publish_state(&self, state: LinkState) {
        self.state_tx.send_replace(state);
    }

    // --- exit flags -----------------------------------------------------

    /// Mutate the exit flags and wake the link worker
    pub fn update_flags(&self, f: impl FnOnce(&mut ExitFlags)) {
        {
            let mut flags = self.flags.lock().unwrap();
            f(&mut flags);
        }
        self.flags_changed.notify_waiters();
    }

    /// Wake the link worker without changing any flag
    pub fn poke_worker(&self) {
        self.flags_changed.notify_waiters();
    }

    pub fn flags(&self) -> ExitFlags {
        self.flags.lock().unwrap().clone()
    }

    /// Block until `fulfilled` reports true or `limit` elapses.
    ///
    /// Returns the final predicate value. The notified future is created
    /// before each predicate check so a flag raised in between is never
    /// missed.
    pub async fn wait_flags(
        &self,
        limit: Option<Duration>,
        fulfilled: impl Fn(&ExitFlags) -> bool,
    ) -> bool {
        let deadline = limit.map(|limit| Instant::now() + limit);

        loop {
            let notified = self.flags_changed.notified();

            if fulfilled(&self.flags.lock().unwrap()) {
                return true;
            }

            match deadline {
                Some(deadline) => {
                    if timeout_at(deadline, notified).await.is_err() {
                        return fulfilled(&self.flags.lock().unwrap());
                    }
                }
                None => notified.await,
            }
        }
    }

    // --- sequence counters ----------------------------------------------

    pub fn seq(&self) -> SeqNum {
        self.counters.lock().unwrap().seq
    }

    pub fn seq_ack(&self) -> (SeqNum, SeqNum) {
        let counters = self.counters.lock().unwrap();
        (counters.seq, counters.ack)
    }

    /// A valid acknowledgement arrived: advance `seq` and release the
    /// blocked sender.
    pub fn increment_seq(&self) {
        {
            let mut counters = self.counters.lock().unwrap();
            counters.seq = next_seq(counters.seq);
        }
        self.acked.notify_waiters();
    }

    /// An in-order reliable packet arrived: advance `ack`
    pub fn increment_ack(&self) {
        let mut counters = self.counters.lock().unwrap();
        counters.ack = next_seq(counters.ack);
    }

    /// Entering ACTIVE: both counters restart at zero
    pub fn reset_counters(&self) {
        let mut counters = self.counters.lock().unwrap();
        counters.seq = 0;
        counters.ack = 0;
    }

    /// Wait until `seq` moves past `seq_before` or the deadline passes.
    ///
    /// The predicate guards against spurious wakeups: only an actual
    /// sequence-number advance means the packet was acknowledged.
    pub async fn wait_seq_change(&self, seq_before: SeqNum, deadline: Instant) -> bool {
        loop {
            let notified = self.acked.notified();

            if self.seq() != seq_before {
                return true;
            }

            if timeout_at(deadline, notified).await.is_err() {
                return self.seq() != seq_before;
            }
        }
    }

    // --- upper callbacks ------------------------------------------------

    pub fn set_upper(&self, callbacks: TransportCallbacks) {
        *self.upper.lock().unwrap() = Some(callbacks);
    }

    /// Report a status condition to the upper stack
    pub fn status(&self, code: StatusCode, message: &str) {
        trace!(code = %code, detail = message, "status");

        let status = self
            .upper
            .lock()
            .unwrap()
            .as_ref()
            .map(|callbacks| callbacks.status.clone());
        if let Some(status) = status {
            status(code, message);
        }
    }

    /// Hand a delivered reliable payload to the upper stack
    pub fn deliver(&self, payload: &[u8]) {
        let data = self
            .upper
            .lock()
            .unwrap()
            .as_ref()
            .map(|callbacks| callbacks.data.clone());
        if let Some(data) = data {
            data(payload);
        }
    }

    /// Forward a human-readable trace line to the upper stack
    pub fn log(&self, severity: LogSeverity, message: &str) {
        let log = self
            .upper
            .lock()
            .unwrap()
            .as_ref()
            .map(|callbacks| callbacks.log.clone());
        if let Some(log) = log {
            log(severity, message);
        }
    }

    /// Status handler given to the lower transport
    pub fn on_lower_status(&self, code: StatusCode, message: &str) {
        if code == StatusCode::IoResourcesUnavailable {
            self.update_flags(|flags| flags.io_error = true);
        }

        self.status(code, message);
    }

    // --- packet accounting and trace ------------------------------------

    pub fn count_error_packet(&self) {
        self.counts.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a packet and describe it to the log callback
    pub fn log_packet(&self, outgoing: bool, packet: &H5Packet) {
        let (count, arrow) = if outgoing {
            (self.counts.outgoing.fetch_add(1, Ordering::Relaxed) + 1, "->")
        } else {
            (self.counts.incoming.fetch_add(1, Ordering::Relaxed) + 1, "<-")
        };

        let line = format!("{count:>6} {arrow} {}", packet.describe());
        trace!(outgoing, "{}", line);
        self.log(LogSeverity::Debug, &line);
    }

    pub fn log_transition(&self, from: LinkState, to: LinkState) {
        let line = format!("state change: {from} -> {to}");
        trace!("{}", line);
        self.log(LogSeverity::Debug, &line);
    }

    pub fn stats(&self) -> LinkStats {
        let (seq, ack) = self.seq_ack();
        LinkStats {
            incoming_packets: self.counts.incoming.load(Ordering::Relaxed),
            outgoing_packets: self.counts.outgoing.load(Ordering::Relaxed),
            error_packets: self.counts.errors.load(Ordering::Relaxed),
            seq,
            ack,
        }
    }

    // --- outbound control path ------------------------------------------

    /// Build, frame and transmit a control packet.
    ///
    /// Control packets are unreliable; only ACK frames carry the current
    /// acknowledgement number, everything else is sent with seq = ack = 0.
    pub async fn send_control(&self, control: ControlPacket) {
        let ack = match control {
            ControlPacket::Ack => self.seq_ack().1,
            _ => 0,
        };

        let packet = H5Packet::unreliable(
            ack,
            control.packet_type(),
            Bytes::from_static(control.payload()),
        );

        // Infallible: control payloads are at most three bytes
        let Ok(encoded) = packet.encode() else {
            return;
        };

        self.log_packet(true, &packet);

        let wire = slip::encode(&encoded);
        if let Err(error) = self.lower.send(wire).await {
            warn!(%error, control = ?control, "control packet send failed");
        }
    }
}

impl std::fmt::Debug for LinkShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkShared")
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
