//! Frame wire codec
//!
//! Datagram layout:
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Byte 0:     Magic (0x4D = 'M')                              │
//! │ Byte 1:     Wire version                                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Payload (MessagePack, named fields)                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Named fields keep the payload readable by non-Rust consumers that share
//! the frame schema.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Frame, Result, MAGIC_BYTE, PROTOCOL_VERSION};

/// Header size in bytes
pub const HEADER_SIZE: usize = 2;

/// Largest datagram we will produce (max UDP payload)
pub const MAX_DATAGRAM_SIZE: usize = 65507;

/// Encode a frame into a datagram payload
pub fn encode(frame: &Frame) -> Result<Bytes> {
    let payload = rmp_serde::to_vec_named(frame)?;
    if payload.len() + HEADER_SIZE > MAX_DATAGRAM_SIZE {
        return Err(Error::EncodeError(format!(
            "frame of {} bytes exceeds datagram limit",
            payload.len()
        )));
    }

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u8(MAGIC_BYTE);
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Decode a datagram payload into a frame
pub fn decode(data: &[u8]) -> Result<Frame> {
    if data.len() < HEADER_SIZE {
        return Err(Error::BufferTooSmall {
            needed: HEADER_SIZE,
            have: data.len(),
        });
    }

    if data[0] != MAGIC_BYTE {
        return Err(Error::InvalidMagic(data[0]));
    }
    if data[1] != PROTOCOL_VERSION {
        return Err(Error::UnsupportedVersion(data[1]));
    }

    Ok(rmp_serde::from_slice(&data[HEADER_SIZE..])?)
}
