//! DUMP / RESTORE payload codec.
//!
//! A payload is `<type byte><typed value>` followed by a footer: the
//! RDB version as a little-endian u16 and the CRC-64 of everything
//! before it as a little-endian u64. RESTORE refuses payloads whose
//! footer does not verify.

use thiserror::Error;

use hearth_core::types::Value;

use crate::format::{crc64, FormatError, Reader, Writer};
use crate::rdb::{read_value, write_value, RDB_VERSION};

#[derive(Debug, Error)]
pub enum RestoreError {
    /// Footer missing, version/CRC mismatch, or truncated value.
    #[error("DUMP payload version or checksum are wrong")]
    BadPayload,
}

/// Serializes one value into a DUMP payload.
pub fn dump_entry(value: &Value) -> Vec<u8> {
    let mut w = Writer::new();
    write_value(&mut w, value, false);
    let mut payload = w.into_bytes();
    payload.extend_from_slice(&RDB_VERSION.to_le_bytes());
    let checksum = crc64(&payload);
    payload.extend_from_slice(&checksum.to_le_bytes());
    payload
}

/// Verifies the footer and decodes the value.
pub fn restore_entry(payload: &[u8]) -> Result<Value, RestoreError> {
    if payload.len() < 11 {
        return Err(RestoreError::BadPayload);
    }
    let crc_offset = payload.len() - 8;
    let stored = u64::from_le_bytes(payload[crc_offset..].try_into().unwrap());
    if stored != crc64(&payload[..crc_offset]) {
        return Err(RestoreError::BadPayload);
    }
    let version = u16::from_le_bytes(payload[crc_offset - 2..crc_offset].try_into().unwrap());
    if version > RDB_VERSION + 2 {
        return Err(RestoreError::BadPayload);
    }

    let body = &payload[..crc_offset - 2];
    let mut r = Reader::new(body);
    let tag = r.take_u8().map_err(|_: FormatError| RestoreError::BadPayload)?;
    read_value(&mut r, tag).map_err(|_| RestoreError::BadPayload)
}
