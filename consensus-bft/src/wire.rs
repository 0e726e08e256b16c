//! Wire encoding.
//!
//! Every message is bincode with fixed-width little-endian integers and
//! `u64` length prefixes for sequences. Decoding rejects trailing bytes, so
//! a byte string has at most one valid decoding and re-encodes to itself.
//!
//! Frames on a stream transport are `[len: u32-le][payload: len bytes]`.

use {
    crate::error::{ConsensusError, Result},
    bincode::{DefaultOptions, Options},
    serde::{de::DeserializeOwned, Serialize},
};

/// Length of the frame header.
pub const FRAME_HEADER_LEN: usize = 4;

fn options() -> impl Options {
    DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(options().serialize(value)?)
}

/// Decode `bytes`, refusing to allocate more than `max_size` bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8], max_size: usize) -> Result<T> {
    if bytes.len() > max_size {
        return Err(ConsensusError::MessageTooLarge {
            size: bytes.len(),
            max: max_size,
        });
    }
    let limit = u64::try_from(max_size).unwrap_or(u64::MAX);
    Ok(options().with_limit(limit).deserialize(bytes)?)
}

/// Encode with a 4-byte little-endian length prefix.
pub fn encode_framed<T: Serialize>(value: &T, max_size: usize) -> Result<Vec<u8>> {
    let payload = encode(value)?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|_| payload.len() <= max_size)
        .ok_or(ConsensusError::MessageTooLarge {
            size: payload.len(),
            max: max_size,
        })?;
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN.saturating_add(payload.len()));
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode one complete frame: header plus exactly `len` payload bytes.
pub fn decode_framed<T: DeserializeOwned>(frame: &[u8], max_size: usize) -> Result<T> {
    let (header, payload) = frame
        .split_first_chunk::<FRAME_HEADER_LEN>()
        .ok_or(ConsensusError::MalformedFrame {
            expected: FRAME_HEADER_LEN,
            actual: frame.len(),
        })?;
    let len = read_frame_len(header);
    if len > max_size {
        return Err(ConsensusError::MessageTooLarge {
            size: len,
            max: max_size,
        });
    }
    if payload.len() != len {
        return Err(ConsensusError::MalformedFrame {
            expected: len,
            actual: payload.len(),
        });
    }
    decode(payload, max_size)
}

/// Read the payload length from a frame header.
pub fn read_frame_len(header: &[u8; FRAME_HEADER_LEN]) -> usize {
    usize::try_from(u32::from_le_bytes(*header)).unwrap_or(usize::MAX)
}
