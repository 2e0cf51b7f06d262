//! Link states and exit criteria.
//!
//! Each state's exit is decided by a set of flags raised by the inbound
//! classifier, the facade, and the lower transport's status callback. The
//! worker re-evaluates its state-specific predicate whenever the flags
//! change. Exit causes are prioritized: I/O error beats close beats
//! protocol progress, so external failures and shutdowns always preempt
//! retransmission loops.

use std::fmt;

/// Negotiation state of the H5 link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unknown,
    /// Created, waiting for `open`
    Start,
    /// Reset frame sent, waiting for the target to settle
    Reset,
    /// Exchanging SYNC / SYNC RESPONSE
    Uninitialized,
    /// Exchanging CONFIG / CONFIG RESPONSE
    Initialized,
    /// Negotiation complete; reliable traffic flows
    Active,
    /// Terminal: negotiation or I/O failed
    Failed,
    /// Terminal: closed by the user
    Closed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Unknown => "STATE_UNKNOWN",
            LinkState::Start => "STATE_START",
            LinkState::Reset => "STATE_RESET",
            LinkState::Uninitialized => "STATE_UNINITIALIZED",
            LinkState::Initialized => "STATE_INITIALIZED",
            LinkState::Active => "STATE_ACTIVE",
            LinkState::Failed => "STATE_FAILED",
            LinkState::Closed => "STATE_CLOSED",
        };
        f.write_str(name)
    }
}

/// Exit-criteria flags shared between the worker and the inbound classifier.
///
/// `io_error` and `close` are sticky: once raised they survive state
/// transitions, so a close request can never be lost to a concurrent
/// transition. Progress flags are cleared by the worker when it enters the
/// state that consumes them.
#[derive(Debug, Default, Clone)]
pub struct ExitFlags {
    /// Lower transport reported IO_RESOURCES_UNAVAILABLE
    pub io_error: bool,
    /// `close` was called
    pub close: bool,
    /// `open` finished opening the lower transport
    pub opened: bool,
    /// SYNC RESPONSE received (consumed in UNINITIALIZED)
    pub sync_response_received: bool,
    /// CONFIG RESPONSE received (consumed in INITIALIZED)
    pub config_response_received: bool,
    /// Peer sent SYNC while ACTIVE: it restarted and needs renegotiation
    pub peer_sync_received: bool,
    /// Inbound ack number outside the window: irrecoverable desync
    pub sync_error: bool,
}

impl ExitFlags {
    /// External exit causes that preempt protocol progress in every state
    pub fn interrupted(&self) -> bool {
        self.io_error || self.close
    }

    pub fn start_fulfilled(&self) -> bool {
        self.interrupted() || self.opened
    }

    pub fn uninitialized_fulfilled(&self) -> bool {
        self.interrupted() || self.sync_response_received
    }

    pub fn initialized_fulfilled(&self) -> bool {
        self.interrupted() || self.config_response_received
    }

    pub fn active_fulfilled(&self) -> bool {
        self.interrupted() || self.peer_sync_received || self.sync_error
    }
}
