//! Link negotiation worker. Owns state transitions in a dedicated task.
//!
//! The worker runs one routine per state, parking on the exit-flag notifier
//! until that state's exit criteria report fulfilled, then picks the next
//! state by deterministic priority: I/O error, then close, then protocol
//! progress. It exits when a terminal state (FAILED or CLOSED) is reached.

use crate::common::constants::{
    NON_ACTIVE_STATE_TIMEOUT, PACKET_RETRANSMISSIONS, RESET_WAIT_DURATION,
};
use crate::common::ControlPacket;
use crate::link::shared::LinkShared;
use crate::link::state::{ExitFlags, LinkState};
use crate::transport::StatusCode;

use std::sync::Arc;
use tracing::debug;

pub(crate) async fn run_link(shared: Arc<LinkShared>) {
    let mut state = LinkState::Start;

    loop {
        let next = match state {
            LinkState::Start => run_start(&shared).await,
            LinkState::Reset => run_reset(&shared).await,
            LinkState::Uninitialized => run_uninitialized(&shared).await,
            LinkState::Initialized => run_initialized(&shared).await,
            LinkState::Active => run_active(&shared).await,
            // Terminal and never-entered states have no exit
            _ => break,
        };

        shared.log_transition(state, next);
        shared.publish_state(next);

        if matches!(next, LinkState::Failed | LinkState::Closed) {
            break;
        }

        state = next;
    }

    debug!(state = %shared.state(), "link worker finished");
}

/// Resolve the external exit causes common to every state
fn interrupted_exit(flags: &ExitFlags) -> Option<LinkState> {
    if flags.io_error {
        Some(LinkState::Failed)
    } else if flags.close {
        Some(LinkState::Closed)
    } else {
        None
    }
}

async fn run_start(shared: &Arc<LinkShared>) -> LinkState {
    shared.wait_flags(None, ExitFlags::start_fulfilled).await;

    let flags = shared.flags();
    match interrupted_exit(&flags) {
        Some(exit) => exit,
        None if flags.opened => LinkState::Reset,
        None => LinkState::Failed,
    }
}

async fn run_reset(shared: &Arc<LinkShared>) -> LinkState {
    shared.send_control(ControlPacket::Reset).await;
    shared.status(StatusCode::ResetPerformed, "target reset performed");

    // Give the target time to reboot; only external causes cut this short
    shared
        .wait_flags(Some(RESET_WAIT_DURATION), ExitFlags::interrupted)
        .await;

    match interrupted_exit(&shared.flags()) {
        Some(exit) => exit,
        None => LinkState::Uninitialized,
    }
}

async fn run_uninitialized(shared: &Arc<LinkShared>) -> LinkState {
    shared.update_flags(|flags| flags.sync_response_received = false);

    negotiate(shared, ControlPacket::Sync, ExitFlags::uninitialized_fulfilled).await;

    let flags = shared.flags();
    match interrupted_exit(&flags) {
        Some(exit) => exit,
        None if flags.sync_response_received => LinkState::Initialized,
        None => {
            shared.status(StatusCode::PktSendMaxRetriesReached, "max retries reached");
            LinkState::Failed
        }
    }
}

async fn run_initialized(shared: &Arc<LinkShared>) -> LinkState {
    shared.update_flags(|flags| flags.config_response_received = false);

    negotiate(
        shared,
        ControlPacket::SyncConfig,
        ExitFlags::initialized_fulfilled,
    )
    .await;

    let flags = shared.flags();
    match interrupted_exit(&flags) {
        Some(exit) => exit,
        None if flags.config_response_received => LinkState::Active,
        None => {
            shared.status(StatusCode::PktSendMaxRetriesReached, "max retries reached");
            LinkState::Failed
        }
    }
}

/// Transmit `request` up to the retry limit, waiting between attempts for
/// the state's exit criteria to be fulfilled.
async fn negotiate(
    shared: &Arc<LinkShared>,
    request: ControlPacket,
    fulfilled: fn(&ExitFlags) -> bool,
) {
    let mut remaining = PACKET_RETRANSMISSIONS;

    while remaining > 0 {
        shared.send_control(request).await;

        if shared
            .wait_flags(Some(NON_ACTIVE_STATE_TIMEOUT), fulfilled)
            .await
        {
            return;
        }

        remaining -= 1;
    }
}

async fn run_active(shared: &Arc<LinkShared>) -> LinkState {
    shared.update_flags(|flags| {
        flags.peer_sync_received = false;
        flags.sync_error = false;
    });
    shared.reset_counters();

    shared.status(StatusCode::ConnectionActive, "connection active");

    shared.wait_flags(None, ExitFlags::active_fulfilled).await;

    let flags = shared.flags();
    match interrupted_exit(&flags) {
        Some(exit) => exit,
        // Peer restart or irrecoverable desync: renegotiate from RESET
        None if flags.peer_sync_received || flags.sync_error => LinkState::Reset,
        None => LinkState::Failed,
    }
}
