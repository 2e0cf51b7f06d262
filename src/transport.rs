//! Abstract transport layer.
//!
//! The [`Transport`] trait models a byte-oriented lower transport (UART,
//! USB-CDC, virtual port) underneath the H5 link layer. The trait is
//! object-safe so layers can be stacked as `Arc<dyn Transport>`, and
//! [`H5Transport`](crate::link::H5Transport) implements it too, so a host
//! RPC layer can sit on top of H5 exactly as it would on a bare port.

use crate::error::Result;
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Status conditions reported upward through the transport stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// The lower transport lost its I/O resources (port unplugged, driver
    /// failure); the link converges to FAILED
    IoResourcesUnavailable,
    /// A reset frame was sent to the peer
    ResetPerformed,
    /// Link negotiation completed; the link is ACTIVE
    ConnectionActive,
    /// A packet was retransmitted the maximum number of times without a
    /// response
    PktSendMaxRetriesReached,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::IoResourcesUnavailable => "IO_RESOURCES_UNAVAILABLE",
            StatusCode::ResetPerformed => "RESET_PERFORMED",
            StatusCode::ConnectionActive => "CONNECTION_ACTIVE",
            StatusCode::PktSendMaxRetriesReached => "PKT_SEND_MAX_RETRIES_REACHED",
        };
        f.write_str(name)
    }
}

/// Severity of a log line forwarded to the upper stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogSeverity {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

/// Status callback: `(code, message)`
pub type StatusFn = Arc<dyn Fn(StatusCode, &str) + Send + Sync>;
/// Data callback, invoked with arbitrary-size chunks of received bytes
pub type DataFn = Arc<dyn Fn(&[u8]) + Send + Sync>;
/// Log callback: `(severity, message)`
pub type LogFn = Arc<dyn Fn(LogSeverity, &str) + Send + Sync>;

/// Callback set handed to [`Transport::open`].
#[derive(Clone)]
pub struct TransportCallbacks {
    pub status: StatusFn,
    pub data: DataFn,
    pub log: LogFn,
}

impl TransportCallbacks {
    pub fn new(status: StatusFn, data: DataFn, log: LogFn) -> Self {
        Self { status, data, log }
    }

    /// Callbacks that discard everything; useful for tests and tools that
    /// only drive the transport.
    pub fn noop() -> Self {
        Self {
            status: Arc::new(|_, _| {}),
            data: Arc::new(|_| {}),
            log: Arc::new(|_, _| {}),
        }
    }
}

impl fmt::Debug for TransportCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportCallbacks").finish_non_exhaustive()
    }
}

/// Byte-oriented transport underneath (or including) the H5 link layer.
///
/// `open` hands the transport a callback set; the transport invokes the
/// data callback from its own delivery task with raw received chunks and
/// the status callback for I/O conditions. The trait is object-safe so it
/// can be used as `Arc<dyn Transport>`.
pub trait Transport: Send + Sync + 'static {
    /// Open the transport and begin delivering received bytes.
    fn open(&self, callbacks: TransportCallbacks) -> TransportFuture<'_>;

    /// Close the transport. Further sends fail.
    fn close(&self) -> TransportFuture<'_>;

    /// Send `data` out the transport.
    fn send(&self, data: Bytes) -> TransportFuture<'_>;
}
