//! Inbound pipeline: reassemble, decode, classify.
//!
//! Runs in its own task fed by the lower transport's data callback. Frames
//! that fail SLIP or H5 decoding are counted and dropped; decoded packets
//! are dispatched to the state machine (LINK_CONTROL), the ack engine
//! (ACK and reliable VENDOR_SPECIFIC while ACTIVE) or discarded.

use crate::common::{
    self, next_seq, ControlPacket, H5Packet, PacketType,
};
use crate::link::shared::LinkShared;
use crate::link::state::LinkState;
use crate::reassembly::FrameReassembler;
use crate::slip;

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

pub(crate) async fn run_inbound(
    shared: Arc<LinkShared>,
    mut chunks: mpsc::UnboundedReceiver<Bytes>,
) {
    let mut reassembler = FrameReassembler::new();

    while let Some(chunk) = chunks.recv().await {
        for frame in reassembler.push(&chunk) {
            process_frame(&shared, &frame).await;
        }
    }

    trace!("inbound chunk channel closed");
}

async fn process_frame(shared: &Arc<LinkShared>, frame: &[u8]) {
    let body = match slip::decode(frame) {
        Ok(body) => body,
        Err(error) => {
            shared.count_error_packet();
            trace!(%error, "dropping frame: SLIP decode failed");
            return;
        }
    };

    let packet = match H5Packet::decode(&body) {
        Ok(packet) => packet,
        Err(error) => {
            shared.count_error_packet();
            trace!(%error, "dropping frame: H5 decode failed");
            return;
        }
    };

    shared.log_packet(false, &packet);
    classify(shared, packet).await;
}

async fn classify(shared: &Arc<LinkShared>, packet: H5Packet) {
    let state = shared.state();

    if state == LinkState::Reset {
        // Everything received while the reset settles is dropped
        shared.poke_worker();
        return;
    }

    match packet.header.packet_type {
        PacketType::LinkControl => link_control(shared, state, &packet.payload).await,
        PacketType::VendorSpecific
            if state == LinkState::Active && packet.header.reliable =>
        {
            reliable_inbound(shared, &packet).await;
        }
        PacketType::Ack if state == LinkState::Active => ack_inbound(shared, packet.header.ack),
        other => {
            trace!(packet_type = %other, state = %state, "dropping packet");
        }
    }
}

async fn link_control(shared: &Arc<LinkShared>, state: LinkState, payload: &[u8]) {
    match state {
        LinkState::Uninitialized => {
            if common::is_sync_response(payload) {
                shared.update_flags(|flags| flags.sync_response_received = true);
            } else if common::is_sync(payload) {
                // Peer is negotiating too
                shared.send_control(ControlPacket::SyncResponse).await;
            }
        }
        LinkState::Initialized => {
            if common::is_sync_config_response(payload) {
                shared.update_flags(|flags| flags.config_response_received = true);
            } else if common::is_sync_config(payload) {
                shared.send_control(ControlPacket::SyncConfigResponse).await;
            } else if common::is_sync(payload) {
                shared.send_control(ControlPacket::SyncResponse).await;
            }
        }
        LinkState::Active => {
            if common::is_sync(payload) {
                // Peer restarted and is negotiating from scratch
                shared.update_flags(|flags| flags.peer_sync_received = true);
            } else if common::is_sync_config(payload) {
                shared.send_control(ControlPacket::SyncConfigResponse).await;
            } else if common::is_wakeup(payload)
                || common::is_woken(payload)
                || common::is_sleep(payload)
            {
                // Power management frames are recognized but not acted on
                trace!(
                    frame = %common::describe_link_control(payload),
                    "ignoring power management frame"
                );
            }
        }
        _ => {}
    }
}

/// Reliable VENDOR_SPECIFIC packet while ACTIVE: deliver in-order payloads
/// and acknowledge cumulatively.
async fn reliable_inbound(shared: &Arc<LinkShared>, packet: &H5Packet) {
    let (_, expected) = shared.seq_ack();

    if packet.header.seq == expected {
        shared.increment_ack();
        shared.send_control(ControlPacket::Ack).await;
        shared.deliver(&packet.payload);
    } else {
        // Out-of-order: drop the payload but re-acknowledge the last
        // in-order packet so the peer can resynchronize
        trace!(
            seq = packet.header.seq,
            expected,
            "out-of-order reliable packet"
        );
        shared.send_control(ControlPacket::Ack).await;
    }
}

/// ACK packet while ACTIVE: advance `seq` on a valid acknowledgement,
/// ignore duplicates, flag anything else as an irrecoverable desync.
fn ack_inbound(shared: &Arc<LinkShared>, ack: u8) {
    let (seq, _) = shared.seq_ack();

    if ack == next_seq(seq) {
        shared.increment_seq();
    } else if ack == seq {
        // Acknowledgement of a previous exchange; discard
        trace!(ack, "duplicate acknowledgement");
    } else {
        trace!(ack, seq, "acknowledgement outside window");
        shared.update_flags(|flags| flags.sync_error = true);
    }
}
