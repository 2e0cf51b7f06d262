//! Common types and wire codec for the H5 (Three-Wire UART) protocol

use crate::error::CodecError;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// H5 protocol constants
pub mod constants {
    use std::time::Duration;

    pub const H5_HEADER_LENGTH: usize = 4; // header bytes per packet
    pub const MAX_PAYLOAD_LENGTH: usize = 4095; // 12-bit payload length field
    pub const SEQ_MASK: u8 = 0x07; // 3-bit sequence counters

    pub const PACKET_RETRANSMISSIONS: u8 = 6; // attempts before giving in
    pub const NON_ACTIVE_STATE_TIMEOUT: Duration = Duration::from_millis(250); // SYNC/CONFIG resend interval
    pub const OPEN_WAIT_TIMEOUT: Duration = Duration::from_millis(2000); // wait for ACTIVE after open
    pub const RESET_WAIT_DURATION: Duration = Duration::from_millis(300); // settle time after reset

    pub const SYNC_CONFIG_FIELD: u8 = 0x11; // configuration octet we transmit

    pub const SYNC_PAYLOAD: [u8; 2] = [0x01, 0x7E];
    pub const SYNC_RESPONSE_PAYLOAD: [u8; 2] = [0x02, 0x7D];
    pub const SYNC_CONFIG_PAYLOAD: [u8; 3] = [0x03, 0xFC, SYNC_CONFIG_FIELD];
    pub const SYNC_CONFIG_RESPONSE_PAYLOAD: [u8; 3] = [0x04, 0x7B, SYNC_CONFIG_FIELD];
    pub const WAKEUP_PAYLOAD: [u8; 2] = [0x05, 0xFA];
    pub const WOKEN_PAYLOAD: [u8; 2] = [0x06, 0xF9];
    pub const SLEEP_PAYLOAD: [u8; 2] = [0x07, 0x78];
}

/// Sequence number type (3-bit, modulo 8)
pub type SeqNum = u8;

/// Advance a 3-bit sequence counter
#[inline]
pub fn next_seq(seq: SeqNum) -> SeqNum {
    seq.wrapping_add(1) & constants::SEQ_MASK
}

/// H5 packet type nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Ack = 0,
    HciCommand = 1,
    AclData = 2,
    SyncData = 3,
    HciEvent = 4,
    /// Local pseudo-type, transmitted without payload during link reset
    Reset = 5,
    VendorSpecific = 14,
    LinkControl = 15,
}

impl PacketType {
    /// Get the packet type name for trace output
    pub fn name(&self) -> &'static str {
        match self {
            PacketType::Ack => "ACK",
            PacketType::HciCommand => "HCI_COMMAND",
            PacketType::AclData => "ACL_DATA",
            PacketType::SyncData => "SYNC_DATA",
            PacketType::HciEvent => "HCI_EVENT",
            PacketType::Reset => "RESET",
            PacketType::VendorSpecific => "VENDOR_SPECIFIC",
            PacketType::LinkControl => "LINK_CONTROL",
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketType::Ack),
            1 => Ok(PacketType::HciCommand),
            2 => Ok(PacketType::AclData),
            3 => Ok(PacketType::SyncData),
            4 => Ok(PacketType::HciEvent),
            5 => Ok(PacketType::Reset),
            14 => Ok(PacketType::VendorSpecific),
            15 => Ok(PacketType::LinkControl),
            _ => Err(CodecError::MalformedHeader {
                reason: "unassigned packet type",
            }),
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// First header byte field placement
const ACK_NUM_MASK: u8 = 0x07;
const DATA_INTEGRITY_BIT: u8 = 0x08;
const RELIABLE_BIT: u8 = 0x10;
const SEQ_NUM_POS: u8 = 5;

const PACKET_TYPE_MASK: u8 = 0x0F;
const PAYLOAD_LEN_POS: u8 = 4;

/// Decoded H5 packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H5Header {
    pub seq: SeqNum,
    pub ack: SeqNum,
    pub data_integrity: bool,
    pub reliable: bool,
    pub packet_type: PacketType,
    pub payload_len: u16,
}

/// H5 packet: four-byte header plus opaque payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H5Packet {
    pub header: H5Header,
    pub payload: Bytes,
}

/// Header checksum: one-byte parity such that the four header bytes sum to
/// 0xFF modulo 256.
fn header_checksum(b0: u8, b1: u8, b2: u8) -> u8 {
    0xFF - (b0.wrapping_add(b1).wrapping_add(b2))
}

impl H5Packet {
    /// Create a reliable packet carrying `payload`
    pub fn reliable(seq: SeqNum, ack: SeqNum, packet_type: PacketType, payload: Bytes) -> Self {
        Self {
            header: H5Header {
                seq: seq & constants::SEQ_MASK,
                ack: ack & constants::SEQ_MASK,
                data_integrity: false,
                reliable: true,
                packet_type,
                payload_len: payload.len() as u16,
            },
            payload,
        }
    }

    /// Create an unreliable packet (seq is always 0)
    pub fn unreliable(ack: SeqNum, packet_type: PacketType, payload: Bytes) -> Self {
        Self {
            header: H5Header {
                seq: 0,
                ack: ack & constants::SEQ_MASK,
                data_integrity: false,
                reliable: false,
                packet_type,
                payload_len: payload.len() as u16,
            },
            payload,
        }
    }

    /// Encode header and payload into wire bytes (before SLIP framing)
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let len = self.payload.len();
        if len > constants::MAX_PAYLOAD_LENGTH {
            return Err(CodecError::PayloadTooLarge { len });
        }

        let len = len as u16;
        let mut buf = BytesMut::with_capacity(constants::H5_HEADER_LENGTH + self.payload.len());

        let mut b0 = (self.header.ack & ACK_NUM_MASK)
            | ((self.header.seq & constants::SEQ_MASK) << SEQ_NUM_POS);
        if self.header.data_integrity {
            b0 |= DATA_INTEGRITY_BIT;
        }
        if self.header.reliable {
            b0 |= RELIABLE_BIT;
        }
        let b1 = (self.header.packet_type as u8 & PACKET_TYPE_MASK)
            | (((len & 0x000F) as u8) << PAYLOAD_LEN_POS);
        let b2 = (len >> PAYLOAD_LEN_POS) as u8;

        buf.put_u8(b0);
        buf.put_u8(b1);
        buf.put_u8(b2);
        buf.put_u8(header_checksum(b0, b1, b2));
        buf.extend_from_slice(&self.payload);

        Ok(buf.freeze())
    }

    /// Decode wire bytes (after SLIP unframing) into header and payload
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < constants::H5_HEADER_LENGTH {
            return Err(CodecError::Truncated);
        }

        let (b0, b1, b2, b3) = (buf[0], buf[1], buf[2], buf[3]);

        let computed = header_checksum(b0, b1, b2);
        if computed != b3 {
            return Err(CodecError::HeaderChecksum {
                computed,
                received: b3,
            });
        }

        if b0 & DATA_INTEGRITY_BIT != 0 {
            return Err(CodecError::UnsupportedOption {
                option: "data integrity check",
            });
        }

        let header = H5Header {
            seq: (b0 >> SEQ_NUM_POS) & constants::SEQ_MASK,
            ack: b0 & ACK_NUM_MASK,
            data_integrity: false,
            reliable: b0 & RELIABLE_BIT != 0,
            packet_type: PacketType::try_from(b1 & PACKET_TYPE_MASK)?,
            payload_len: ((b1 >> PAYLOAD_LEN_POS) as u16) | ((b2 as u16) << PAYLOAD_LEN_POS),
        };

        let available = buf.len() - constants::H5_HEADER_LENGTH;
        let declared = header.payload_len as usize;
        if declared > available {
            return Err(CodecError::Truncated);
        }
        if declared < available {
            return Err(CodecError::MalformedHeader {
                reason: "payload length does not match frame size",
            });
        }

        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(&buf[constants::H5_HEADER_LENGTH..]),
        })
    }

    /// One-line packet description for trace output
    pub fn describe(&self) -> String {
        let mut line = format!(
            "type:{} reliable:{} seq:{} ack:{} len:{} [{}]",
            self.header.packet_type,
            if self.header.reliable { "yes" } else { "no" },
            self.header.seq,
            self.header.ack,
            self.header.payload_len,
            as_hex(&self.payload),
        );

        if self.header.packet_type == PacketType::LinkControl {
            line.push(' ');
            line.push_str(&describe_link_control(&self.payload));
        }

        line
    }
}

/// Control packets the link layer originates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPacket {
    Reset,
    Sync,
    SyncResponse,
    SyncConfig,
    SyncConfigResponse,
    Ack,
}

impl ControlPacket {
    /// Fixed payload bytes for this control packet
    pub fn payload(&self) -> &'static [u8] {
        match self {
            ControlPacket::Reset | ControlPacket::Ack => &[],
            ControlPacket::Sync => &constants::SYNC_PAYLOAD,
            ControlPacket::SyncResponse => &constants::SYNC_RESPONSE_PAYLOAD,
            ControlPacket::SyncConfig => &constants::SYNC_CONFIG_PAYLOAD,
            ControlPacket::SyncConfigResponse => &constants::SYNC_CONFIG_RESPONSE_PAYLOAD,
        }
    }

    /// H5 packet type carrying this control packet
    pub fn packet_type(&self) -> PacketType {
        match self {
            ControlPacket::Reset => PacketType::Reset,
            ControlPacket::Ack => PacketType::Ack,
            _ => PacketType::LinkControl,
        }
    }
}

/// Check whether `pattern` occurs in `packet` starting at `offset`
pub fn check_pattern(packet: &[u8], offset: usize, pattern: &[u8]) -> bool {
    if offset >= packet.len() {
        return false;
    }

    packet[offset..].starts_with(pattern)
}

/// SYNC message (`01 7E`)
pub fn is_sync(payload: &[u8]) -> bool {
    check_pattern(payload, 0, &constants::SYNC_PAYLOAD)
}

/// SYNC RESPONSE message (`02 7D`)
pub fn is_sync_response(payload: &[u8]) -> bool {
    check_pattern(payload, 0, &constants::SYNC_RESPONSE_PAYLOAD)
}

/// CONFIG message (`03 FC <cfg>`); the configuration octet is opaque
pub fn is_sync_config(payload: &[u8]) -> bool {
    check_pattern(payload, 0, &constants::SYNC_CONFIG_PAYLOAD[..2])
}

/// CONFIG RESPONSE message (`04 7B <cfg>`); the configuration octet is opaque
pub fn is_sync_config_response(payload: &[u8]) -> bool {
    check_pattern(payload, 0, &constants::SYNC_CONFIG_RESPONSE_PAYLOAD[..2])
}

/// WAKEUP message (`05 FA`)
pub fn is_wakeup(payload: &[u8]) -> bool {
    check_pattern(payload, 0, &constants::WAKEUP_PAYLOAD)
}

/// WOKEN message (`06 F9`)
pub fn is_woken(payload: &[u8]) -> bool {
    check_pattern(payload, 0, &constants::WOKEN_PAYLOAD)
}

/// SLEEP message (`07 78`)
pub fn is_sleep(payload: &[u8]) -> bool {
    check_pattern(payload, 0, &constants::SLEEP_PAYLOAD)
}

/// Render bytes as space-separated hex
pub fn as_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Symbolic description of a LINK_CONTROL payload
pub fn describe_link_control(payload: &[u8]) -> String {
    if is_sync(payload) {
        "[SYNC]".into()
    } else if is_sync_response(payload) {
        "[SYNC_RESP]".into()
    } else if is_sync_config(payload) {
        match payload.get(2) {
            Some(cfg) => format!("[CONFIG cfg:0x{cfg:02x}]"),
            None => "[CONFIG]".into(),
        }
    } else if is_sync_config_response(payload) {
        match payload.get(2) {
            Some(cfg) => format!("[CONFIG_RESP cfg:0x{cfg:02x}]"),
            None => "[CONFIG_RESP]".into(),
        }
    } else if is_wakeup(payload) {
        "[WAKEUP]".into()
    } else if is_woken(payload) {
        "[WOKEN]".into()
    } else if is_sleep(payload) {
        "[SLEEP]".into()
    } else {
        "[?]".into()
    }
}

/// Packet counter snapshot for a link
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LinkStats {
    /// Packets decoded from the lower transport
    pub incoming_packets: u64,
    /// Packets handed to the lower transport
    pub outgoing_packets: u64,
    /// Inbound frames dropped by the SLIP or H5 decoder
    pub error_packets: u64,
    /// Sequence number of the next reliable outbound packet
    pub seq: SeqNum,
    /// Next expected inbound reliable sequence number
    pub ack: SeqNum,
}
