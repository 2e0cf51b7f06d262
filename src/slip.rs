//! SLIP framing codec.
//!
//! Every packet on the wire is delimited by 0xC0 bytes; payload bytes that
//! collide with the delimiter or the escape byte are stuffed as two-byte
//! escape sequences.

use crate::error::CodecError;
use bytes::{BufMut, Bytes, BytesMut};

pub const END: u8 = 0xC0;
pub const ESC: u8 = 0xDB;
pub const ESC_END: u8 = 0xDC;
pub const ESC_ESC: u8 = 0xDD;

/// SLIP-encode a packet: leading delimiter, escaped body, trailing delimiter.
///
/// An END (0xC0) in the body becomes `DB DC`, an ESC (0xDB) becomes `DB DD`.
pub fn encode(data: &[u8]) -> Bytes {
    let mut framed = BytesMut::with_capacity(data.len() + 2);
    framed.put_u8(END);

    for &byte in data {
        match byte {
            END => {
                framed.put_u8(ESC);
                framed.put_u8(ESC_END);
            }
            ESC => {
                framed.put_u8(ESC);
                framed.put_u8(ESC_ESC);
            }
            _ => framed.put_u8(byte),
        }
    }

    framed.put_u8(END);
    framed.freeze()
}

/// Strip the enclosing delimiters and reverse the escape sequences.
///
/// A two-byte frame (just the delimiters) decodes to an empty body.
pub fn decode(framed: &[u8]) -> Result<Bytes, CodecError> {
    if framed.len() < 2 || framed[0] != END || framed[framed.len() - 1] != END {
        return Err(CodecError::Truncated);
    }

    let body = &framed[1..framed.len() - 1];
    let mut decoded = BytesMut::with_capacity(body.len());
    let mut i = 0;

    while i < body.len() {
        match body[i] {
            ESC => {
                let Some(&next) = body.get(i + 1) else {
                    return Err(CodecError::Truncated);
                };
                match next {
                    ESC_END => decoded.put_u8(END),
                    ESC_ESC => decoded.put_u8(ESC),
                    byte => return Err(CodecError::InvalidEscape { byte }),
                }
                i += 2;
            }
            byte => {
                decoded.put_u8(byte);
                i += 1;
            }
        }
    }

    Ok(decoded.freeze())
}
