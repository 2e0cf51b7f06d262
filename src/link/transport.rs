//! The H5 transport facade.
//!
//! [`H5Transport`] wraps a byte-oriented lower transport and presents the
//! same `open`/`send`/`close` surface upward, adding SLIP framing, the H5
//! header, link negotiation and reliable delivery. It also implements
//! [`Transport`] itself so a host RPC layer can stack on top of it.

use crate::common::constants::{MAX_PAYLOAD_LENGTH, OPEN_WAIT_TIMEOUT, PACKET_RETRANSMISSIONS};
use crate::common::{H5Packet, LinkStats, PacketType};
use crate::config::H5Config;
use crate::error::{CodecError, H5Error, Result};
use crate::link::inbound::run_inbound;
use crate::link::shared::LinkShared;
use crate::link::state::LinkState;
use crate::link::worker::run_link;
use crate::slip;
use crate::transport::{DataFn, LogFn, StatusFn, Transport, TransportCallbacks, TransportFuture};

use bytes::Bytes;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

/// Reliable framed link transport over a serial byte stream (H5,
/// Bluetooth Core v4.2 Vol. 4 Part D §8).
///
/// Created in [`LinkState::Start`], opened once, used for the lifetime of
/// the link, closed once. A failed link is terminal: recovery requires
/// creating a fresh transport.
pub struct H5Transport {
    shared: Arc<LinkShared>,
    worker: StdMutex<Option<JoinHandle<()>>>,
    inbound: StdMutex<Option<JoinHandle<()>>>,
}

impl H5Transport {
    /// Create a transport over `lower`. Nothing is spawned or opened until
    /// [`open`](Self::open) is called.
    pub fn new(lower: Arc<dyn Transport>, config: H5Config) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            shared: LinkShared::new(lower, config),
            worker: StdMutex::new(None),
            inbound: StdMutex::new(None),
        })
    }

    /// Open the lower transport and negotiate the link.
    ///
    /// Starts the link worker, opens the lower transport, and blocks until
    /// the link reaches ACTIVE or 2000 ms elapse. On timeout the state
    /// machine keeps running in whichever state it reached; the caller can
    /// inspect it with [`state`](Self::state).
    pub async fn open(&self, callbacks: TransportCallbacks) -> Result<()> {
        if self.shared.state() != LinkState::Start {
            return Err(H5Error::internal(
                "not able to open, current state is not valid",
            ));
        }

        self.shared.set_upper(callbacks);

        let mut state_rx = self.shared.subscribe();

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        *self.worker.lock().unwrap() = Some(tokio::spawn(run_link(self.shared.clone())));
        *self.inbound.lock().unwrap() =
            Some(tokio::spawn(run_inbound(self.shared.clone(), chunk_rx)));

        let status: StatusFn = {
            let shared = self.shared.clone();
            Arc::new(move |code, message| shared.on_lower_status(code, message))
        };
        let data: DataFn = Arc::new(move |bytes| {
            // The inbound task has the receiving end; a closed channel
            // means the link is shutting down and the bytes are moot.
            let _ = chunk_tx.send(Bytes::copy_from_slice(bytes));
        });
        let log: LogFn = {
            let shared = self.shared.clone();
            Arc::new(move |severity, message| shared.log(severity, message))
        };

        if let Err(error) = self
            .shared
            .lower
            .open(TransportCallbacks::new(status, data, log))
            .await
        {
            self.shared.update_flags(|flags| flags.io_error = true);
            return Err(H5Error::internal(format!(
                "failed to open lower transport: {error}"
            )));
        }

        self.shared.update_flags(|flags| flags.opened = true);

        let result = timeout(
            OPEN_WAIT_TIMEOUT,
            state_rx.wait_for(|state| *state == LinkState::Active),
        )
        .await;
        match result {
            Ok(Ok(_)) => {
                info!("link active");
                Ok(())
            }
            Ok(Err(_)) => Err(H5Error::internal("link worker terminated unexpectedly")),
            Err(_) => Err(H5Error::timeout(OPEN_WAIT_TIMEOUT.as_millis() as u64)),
        }
    }

    /// Send a payload reliably.
    ///
    /// Blocks until the peer acknowledges the packet or the retransmission
    /// budget (6 attempts at the configured interval) is exhausted. At most
    /// one reliable packet is in flight; concurrent callers queue on the
    /// send gate.
    pub async fn send(&self, data: Bytes) -> Result<()> {
        if self.shared.state() != LinkState::Active {
            return Err(H5Error::invalid_state("link is not active"));
        }

        if data.len() > MAX_PAYLOAD_LENGTH {
            return Err(H5Error::Codec(CodecError::PayloadTooLarge {
                len: data.len(),
            }));
        }

        let _gate = self.shared.send_gate.lock().await;

        let (seq, ack) = self.shared.seq_ack();
        let packet = H5Packet::reliable(seq, ack, PacketType::VendorSpecific, data);
        let wire = slip::encode(&packet.encode()?);

        let interval = self.shared.config.retransmission_interval;
        let mut remaining = PACKET_RETRANSMISSIONS;

        while remaining > 0 {
            // Snapshot before transmitting so an acknowledgement racing the
            // wait below is never lost
            let seq_before = self.shared.seq();

            self.shared.log_packet(true, &packet);
            if let Err(error) = self.shared.lower.send(wire.clone()).await {
                // I/O failure surfaces through the lower status callback
                // and fails the link; the retry loop just runs out
                warn!(%error, "reliable packet send failed");
            }

            if self
                .shared
                .wait_seq_change(seq_before, Instant::now() + interval)
                .await
            {
                return Ok(());
            }

            remaining -= 1;
        }

        Err(H5Error::timeout(
            interval.as_millis() as u64 * PACKET_RETRANSMISSIONS as u64,
        ))
    }

    /// Close the link and the lower transport.
    ///
    /// Accepted in any state; the link worker converges to CLOSED and is
    /// joined before the lower transport is closed.
    pub async fn close(&self) -> Result<()> {
        self.shared.update_flags(|flags| flags.close = true);

        let worker = self.worker.lock().unwrap().take();
        match worker {
            Some(handle) => {
                let _ = handle.await;
            }
            // Never opened: there is no worker to converge
            None => self.shared.publish_state(LinkState::Closed),
        }

        if let Some(handle) = self.inbound.lock().unwrap().take() {
            handle.abort();
        }

        self.shared.lower.close().await
    }

    /// Current negotiation state of the link
    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    /// Packet counter snapshot
    pub fn stats(&self) -> LinkStats {
        self.shared.stats()
    }
}

impl Transport for H5Transport {
    fn open(&self, callbacks: TransportCallbacks) -> TransportFuture<'_> {
        Box::pin(H5Transport::open(self, callbacks))
    }

    fn close(&self) -> TransportFuture<'_> {
        Box::pin(H5Transport::close(self))
    }

    fn send(&self, data: Bytes) -> TransportFuture<'_> {
        Box::pin(H5Transport::send(self, data))
    }
}

impl Drop for H5Transport {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.inbound.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for H5Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H5Transport")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
