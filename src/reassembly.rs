//! Stream reassembly: chunked bytes in, delimited frames out.
//!
//! The lower transport delivers raw bytes in chunks of arbitrary size with
//! no respect for frame boundaries. The reassembler scans for SLIP
//! delimiters and emits each complete frame (delimiters included) for
//! decoding, carrying partial frames across calls.

use crate::slip;
use bytes::{BufMut, Bytes, BytesMut};

/// Stateful accumulator extracting 0xC0-delimited frames from a byte stream.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    buf: BytesMut,
    in_frame: bool,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of stream bytes and extract all frames completed by it.
    ///
    /// Bytes received before an opening delimiter are discarded. Two
    /// adjacent delimiters are treated as the start of a new frame, never
    /// as an empty frame: back-to-back senders may emit a leading delimiter
    /// on every frame without suppressing it after a trailing one.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        let mut frames = Vec::new();

        for &byte in chunk {
            if !self.in_frame {
                if byte == slip::END {
                    self.in_frame = true;
                    self.buf.clear();
                    self.buf.put_u8(slip::END);
                }
                continue;
            }

            self.buf.put_u8(byte);

            if byte == slip::END {
                if self.buf.len() == 2 {
                    // Doubled delimiter: reopen rather than emit an empty frame
                    self.buf.clear();
                    self.buf.put_u8(slip::END);
                    continue;
                }

                frames.push(self.buf.split().freeze());
                self.in_frame = false;
            }
        }

        frames
    }
}
