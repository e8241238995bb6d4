//! Byte-exact codec for a single LAD record.
//!
//! Layout (big-endian integer fields, no padding, no checksum):
//! - `sync[4]`: opaque sync marker, copied through unvalidated
//! - `length: u16`: byte length of the whole record, sync and length included
//! - `fixed[33]`: opaque timestamp/type fields
//! - `session_id: u32`
//! - `payload[length - 43]`
//!
//! This module only converts between bytes and [`LadRecord`]; reading from
//! files and streams lives in [`crate::stream`].

use glad_error::{GladError, Result};

/// Sync marker width.
pub const SYNC_MARKER_BYTES: usize = 4;
/// Length field width.
pub const LENGTH_FIELD_BYTES: usize = 2;
/// Bytes needed before the declared length is known (sync + length).
pub const RECORD_PREAMBLE_BYTES: usize = SYNC_MARKER_BYTES + LENGTH_FIELD_BYTES;
/// Opaque fixed-field block width.
pub const FIXED_FIELD_BYTES: usize = 33;
/// Session id field width.
pub const SESSION_ID_BYTES: usize = 4;
/// Everything before the payload.
pub const RECORD_HEADER_BYTES: usize = RECORD_PREAMBLE_BYTES + FIXED_FIELD_BYTES + SESSION_ID_BYTES;
/// Smallest legal declared length (empty payload).
pub const MIN_RECORD_LEN: usize = RECORD_HEADER_BYTES;
/// Largest length the 2-byte field can declare.
pub const MAX_RECORD_LEN: usize = u16::MAX as usize;
/// Largest payload a record can carry.
pub const MAX_PAYLOAD_BYTES: usize = MAX_RECORD_LEN - RECORD_HEADER_BYTES;

const FIXED_FIELD_OFFSET: usize = RECORD_PREAMBLE_BYTES;
const SESSION_ID_OFFSET: usize = FIXED_FIELD_OFFSET + FIXED_FIELD_BYTES;

/// One LAD record as stored in a backup log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LadRecord {
    /// Sync marker bytes (opaque).
    pub sync: [u8; SYNC_MARKER_BYTES],
    /// Declared whole-record length.
    pub length: u16,
    /// Format-defined timestamp and type fields (opaque).
    pub fixed: [u8; FIXED_FIELD_BYTES],
    /// Session the record belongs to.
    pub session_id: u32,
    /// Variable-length sample payload.
    pub payload: Vec<u8>,
}

impl LadRecord {
    /// Build a record whose declared length matches `payload`.
    pub fn new(
        sync: [u8; SYNC_MARKER_BYTES],
        fixed: [u8; FIXED_FIELD_BYTES],
        session_id: u32,
        payload: Vec<u8>,
    ) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(GladError::format(format!(
                "payload of {} bytes exceeds maximum {MAX_PAYLOAD_BYTES}",
                payload.len()
            )));
        }
        let length = u16::try_from(RECORD_HEADER_BYTES + payload.len())
            .map_err(|_| GladError::internal("record length overflowed u16 after bound check"))?;
        Ok(Self {
            sync,
            length,
            fixed,
            session_id,
            payload,
        })
    }

    /// Length the header claims, as `usize`.
    #[must_use]
    pub const fn declared_len(&self) -> usize {
        self.length as usize
    }

    /// Encode to the exact on-disk representation.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.declared_len());
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Append the encoded record to `out`.
    ///
    /// Fails without touching `out` when the declared length disagrees with
    /// the payload size.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        let expected = RECORD_HEADER_BYTES + self.payload.len();
        if self.declared_len() != expected {
            return Err(GladError::format(format!(
                "declared length {} does not match header {RECORD_HEADER_BYTES} + payload {} = {expected}",
                self.length,
                self.payload.len()
            )));
        }

        out.reserve(expected);
        out.extend_from_slice(&self.sync);
        out.extend_from_slice(&self.length.to_be_bytes());
        out.extend_from_slice(&self.fixed);
        out.extend_from_slice(&self.session_id.to_be_bytes());
        out.extend_from_slice(&self.payload);
        Ok(())
    }

    /// Decode one record from the front of `bytes`.
    ///
    /// Returns the record and the number of bytes it occupied. Trailing
    /// bytes beyond the record are left for the caller.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < RECORD_PREAMBLE_BYTES {
            return Err(GladError::format(format!(
                "need {RECORD_PREAMBLE_BYTES} bytes for sync and length, got {}",
                bytes.len()
            )));
        }

        let length = read_u16_at(bytes, SYNC_MARKER_BYTES)?;
        let declared = usize::from(length);
        check_declared_len(declared)?;
        if declared > bytes.len() {
            return Err(GladError::format(format!(
                "declared length {declared} exceeds remaining {} bytes",
                bytes.len()
            )));
        }

        let mut sync = [0_u8; SYNC_MARKER_BYTES];
        sync.copy_from_slice(&bytes[..SYNC_MARKER_BYTES]);
        let mut fixed = [0_u8; FIXED_FIELD_BYTES];
        fixed.copy_from_slice(&bytes[FIXED_FIELD_OFFSET..SESSION_ID_OFFSET]);
        let session_id = read_u32_at(bytes, SESSION_ID_OFFSET)?;
        let payload = bytes[RECORD_HEADER_BYTES..declared].to_vec();

        Ok((
            Self {
                sync,
                length,
                fixed,
                session_id,
                payload,
            },
            declared,
        ))
    }
}

/// Read the declared length out of a sync+length preamble.
#[must_use]
pub fn preamble_declared_len(preamble: &[u8; RECORD_PREAMBLE_BYTES]) -> usize {
    usize::from(u16::from_be_bytes([
        preamble[SYNC_MARKER_BYTES],
        preamble[SYNC_MARKER_BYTES + 1],
    ]))
}

/// Reject lengths too small to hold the fixed header.
pub fn check_declared_len(declared: usize) -> Result<()> {
    if declared < MIN_RECORD_LEN {
        return Err(GladError::format(format!(
            "declared length {declared} below minimum {MIN_RECORD_LEN}"
        )));
    }
    Ok(())
}

fn read_u16_at(bytes: &[u8], offset: usize) -> Result<u16> {
    let raw = bytes
        .get(offset..offset + 2)
        .ok_or_else(|| GladError::format(format!("length field out of bounds at {offset}")))?;
    Ok(u16::from_be_bytes([raw[0], raw[1]]))
}

fn read_u32_at(bytes: &[u8], offset: usize) -> Result<u32> {
    let raw = bytes
        .get(offset..offset + SESSION_ID_BYTES)
        .ok_or_else(|| GladError::format(format!("session id out of bounds at {offset}")))?;
    Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
}
