//! Error types for the H5 transport

use thiserror::Error;

/// Result type for H5 operations
pub type Result<T> = std::result::Result<T, H5Error>;

/// Errors reported by the H5 transport layer
#[derive(Error, Debug)]
pub enum H5Error {
    /// I/O related errors from the lower transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Byte-level decode errors (SLIP or H5 header)
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A bounded wait elapsed without the expected event
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The operation is not permitted in the current link state
    #[error("invalid state: {message}")]
    InvalidState { message: String },

    /// Configuration errors
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Internal errors that shouldn't normally occur
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Decode failures in the SLIP and H5 codecs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A SLIP escape byte was followed by something other than 0xDC/0xDD
    #[error("invalid SLIP escape sequence 0xDB 0x{byte:02X}")]
    InvalidEscape { byte: u8 },

    /// The buffer ended before the frame was complete
    #[error("truncated frame")]
    Truncated,

    /// The four header bytes do not sum to 0xFF
    #[error("header checksum mismatch (computed 0x{computed:02X}, received 0x{received:02X})")]
    HeaderChecksum { computed: u8, received: u8 },

    /// A header field holds a value outside its legal range
    #[error("malformed header: {reason}")]
    MalformedHeader { reason: &'static str },

    /// The header requests a protocol option this profile does not support
    #[error("unsupported option: {option}")]
    UnsupportedOption { option: &'static str },

    /// The payload exceeds the 12-bit length field
    #[error("payload length {len} exceeds 4095")]
    PayloadTooLarge { len: usize },
}

/// Return codes bit-compatible with existing consumers of the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Success = 0,
    Timeout = 1,
    InvalidState = 2,
    Internal = 3,
}

impl H5Error {
    /// Create a timeout error
    pub fn timeout(timeout_ms: u64) -> Self {
        H5Error::Timeout { timeout_ms }
    }

    /// Create an invalid-state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        H5Error::InvalidState {
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        H5Error::Config {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        H5Error::Internal {
            message: message.into(),
        }
    }

    /// Map this error onto the numeric return codes of the C-era API
    pub fn code(&self) -> ErrorCode {
        match self {
            H5Error::Timeout { .. } => ErrorCode::Timeout,
            H5Error::InvalidState { .. } => ErrorCode::InvalidState,
            _ => ErrorCode::Internal,
        }
    }
}
