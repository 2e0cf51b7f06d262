//! # H5 Tokio: Three-Wire UART transport
//!
//! An async implementation of the H5 reliable link-layer transport
//! (Bluetooth Core v4.2 Vol. 4 Part D §8, "Three-Wire UART") built on
//! Tokio. It turns an unreliable, byte-streaming serial line into a
//! reliable, in-order, frame-oriented channel.
//!
//! ## Features
//!
//! - **SLIP framing**: 0xC0-delimited frames with byte stuffing
//! - **Reliable delivery**: 3-bit seq/ack window of one with
//!   acknowledgement-driven retransmission
//! - **Link negotiation**: RESET → SYNC → CONFIG handshake with automatic
//!   recovery when the peer restarts
//! - **Stackable**: implements the same [`Transport`] trait it consumes,
//!   so it slots between a serial port driver and a host RPC layer
//! - **Observability**: integrated `tracing` plus per-link packet trace
//!   and status callbacks
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use h5_tokio::{H5Config, H5Transport, TransportCallbacks, Transport};
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! # async fn run(uart: Arc<dyn Transport>) -> h5_tokio::Result<()> {
//! let h5 = H5Transport::new(uart, H5Config::new())?;
//!
//! // Blocks until the link is ACTIVE (up to 2 s)
//! h5.open(TransportCallbacks::noop()).await?;
//!
//! // Reliable, in-order, acknowledged
//! h5.send(Bytes::from_static(b"hello")).await?;
//!
//! h5.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │    Host RPC layer   │  (caller)
//! ├─────────────────────┤
//! │     H5Transport     │  facade: open/send/close
//! ├─────────────────────┤
//! │  Link state machine │  RESET → UNINITIALIZED → INITIALIZED → ACTIVE
//! │  Reliable send/ack  │  window = 1, 6 × 250 ms retransmission
//! ├─────────────────────┤
//! │  SLIP + H5 codecs   │  framing, escaping, header checksum
//! ├─────────────────────┤
//! │   Serial transport  │  UART, USB-CDC, virtual port
//! └─────────────────────┘
//! ```

// Link layer (requires the tokio runtime)
#[cfg(feature = "tokio")]
pub mod link;
#[cfg(feature = "tokio")]
pub use link::{H5Transport, LinkState};

// Codec layer and transport contract (always available)
pub mod common;
pub mod config;
pub mod error;
pub mod reassembly;
pub mod slip;
pub mod transport;

// Re-exports
pub use common::{LinkStats, PacketType};
pub use config::H5Config;
pub use error::{CodecError, ErrorCode, H5Error, Result};
pub use transport::{LogSeverity, StatusCode, Transport, TransportCallbacks, TransportFuture};
