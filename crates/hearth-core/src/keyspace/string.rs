//! String operations.

use bytes::{Bytes, BytesMut};

use super::{parse_i64, Db, Entry, GetExAction, SetOptions, SetOutcome, WrongType};
use crate::time::NO_EXPIRY;
use crate::types::Value;

/// Strings cap at 512 MiB like the protocol's bulk limit.
const MAX_STRING_SIZE: usize = 512 * 1024 * 1024;

/// SETBIT offsets address individual bits up to 2^32 - 1.
const MAX_BIT_OFFSET: u64 = (1 << 32) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrError {
    WrongType,
    NotAnInteger,
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrFloatError {
    WrongType,
    NotAFloat,
    NanOrInfinity,
}

pub(crate) fn string_check(v: &Value) -> bool {
    matches!(v, Value::String(_))
}

impl Db {
    /// SET with the full option set. Unlike the typed operations, SET
    /// overwrites keys of any type; the previous string value is
    /// reported for the GET option, which is the only path that errors
    /// on a non-string key.
    pub fn set(
        &mut self,
        key: &[u8],
        value: Bytes,
        opts: SetOptions,
        now_ms: u64,
    ) -> Result<SetOutcome, WrongType> {
        self.expire_if_needed(key, now_ms);

        let existing = self.live_entry(key, now_ms);
        let exists = existing.is_some();
        let old_value = match existing.map(|e| &e.value) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) if opts.get => return Err(WrongType),
            _ => None,
        };
        let old_ttl = self
            .live_entry(key, now_ms)
            .map(|e| e.expire_at_ms)
            .unwrap_or(NO_EXPIRY);

        if (opts.nx && exists) || (opts.xx && !exists) {
            return Ok(SetOutcome {
                applied: false,
                old_value,
            });
        }

        let expire_at_ms = match (opts.expire_at_ms, opts.keep_ttl) {
            (Some(at), _) => at,
            (None, true) => old_ttl,
            (None, false) => NO_EXPIRY,
        };

        let mut entry = Entry::new(Value::String(value));
        entry.expire_at_ms = expire_at_ms;
        self.put_entry(Bytes::copy_from_slice(key), entry);
        Ok(SetOutcome {
            applied: true,
            old_value,
        })
    }

    pub fn get(&mut self, key: &[u8], now_ms: u64) -> Result<Option<Bytes>, WrongType> {
        Ok(self
            .typed_entry(key, now_ms, string_check)?
            .map(|e| match &e.value {
                Value::String(s) => s.clone(),
                _ => unreachable!(),
            }))
    }

    pub fn getdel(&mut self, key: &[u8], now_ms: u64) -> Result<Option<Bytes>, WrongType> {
        let value = self.get(key, now_ms)?;
        if value.is_some() {
            self.del(key, now_ms);
        }
        Ok(value)
    }

    pub fn getex(
        &mut self,
        key: &[u8],
        action: GetExAction,
        now_ms: u64,
    ) -> Result<Option<Bytes>, WrongType> {
        let value = self.get(key, now_ms)?;
        if value.is_some() {
            match action {
                GetExAction::Keep => {}
                GetExAction::Persist => {
                    self.persist(key, now_ms);
                }
                GetExAction::ExpireAt(at) => {
                    self.expire_at(key, at, super::ExpireFlags::default(), now_ms);
                }
            }
        }
        Ok(value)
    }

    /// APPEND: concatenates and forces the raw encoding. Returns the
    /// new length.
    pub fn append(&mut self, key: &[u8], data: Bytes, now_ms: u64) -> Result<usize, WrongType> {
        let added = data.len();
        let entry = self.typed_entry_mut(key, now_ms, string_check, || {
            Value::String(Bytes::new())
        })?;
        let Value::String(current) = &mut entry.value else {
            unreachable!()
        };
        let mut buf = BytesMut::with_capacity(current.len() + data.len());
        buf.extend_from_slice(current);
        buf.extend_from_slice(&data);
        let len = buf.len();
        *current = buf.freeze();
        entry.raw_forced = true;
        self.grow(added);
        Ok(len)
    }

    pub fn strlen(&mut self, key: &[u8], now_ms: u64) -> Result<usize, WrongType> {
        Ok(self.get(key, now_ms)?.map(|s| s.len()).unwrap_or(0))
    }

    /// INCRBY/DECRBY core. The stored value must parse as a signed
    /// 64-bit integer and the addition must not overflow.
    pub fn incr_by(&mut self, key: &[u8], delta: i64, now_ms: u64) -> Result<i64, IncrError> {
        let entry = self
            .typed_entry_mut(key, now_ms, string_check, || {
                Value::String(Bytes::from_static(b"0"))
            })
            .map_err(|_| IncrError::WrongType)?;
        let Value::String(current) = &mut entry.value else {
            unreachable!()
        };
        let n = parse_i64(current).ok_or(IncrError::NotAnInteger)?;
        let next = n.checked_add(delta).ok_or(IncrError::Overflow)?;
        *current = Bytes::from(next.to_string().into_bytes());
        Ok(next)
    }

    /// INCRBYFLOAT: returns the formatted new value (trailing zeros and
    /// a lone trailing dot stripped), which is also what gets stored.
    pub fn incr_by_float(
        &mut self,
        key: &[u8],
        delta: f64,
        now_ms: u64,
    ) -> Result<Bytes, IncrFloatError> {
        let entry = self
            .typed_entry_mut(key, now_ms, string_check, || {
                Value::String(Bytes::from_static(b"0"))
            })
            .map_err(|_| IncrFloatError::WrongType)?;
        let Value::String(current) = &mut entry.value else {
            unreachable!()
        };
        let n = super::parse_f64(current).ok_or(IncrFloatError::NotAFloat)?;
        let next = n + delta;
        if !next.is_finite() {
            return Err(IncrFloatError::NanOrInfinity);
        }
        let formatted = format_float(next);
        *current = Bytes::from(formatted.clone().into_bytes());
        Ok(Bytes::from(formatted.into_bytes()))
    }

    /// SETBIT: grows the string with zero bytes as needed. Returns the
    /// old bit. Errors on offsets past 2^32 - 1 are the caller's to
    /// validate; this asserts the invariant.
    pub fn setbit(
        &mut self,
        key: &[u8],
        offset: u64,
        bit: bool,
        now_ms: u64,
    ) -> Result<bool, WrongType> {
        debug_assert!(offset <= MAX_BIT_OFFSET);
        let byte_idx = (offset / 8) as usize;
        let bit_idx = 7 - (offset % 8) as u32;

        let entry = self.typed_entry_mut(key, now_ms, string_check, || {
            Value::String(Bytes::new())
        })?;
        let Value::String(current) = &mut entry.value else {
            unreachable!()
        };
        let mut buf = current.to_vec();
        let grown = (byte_idx + 1).saturating_sub(buf.len());
        if buf.len() <= byte_idx {
            buf.resize(byte_idx + 1, 0);
        }
        let old = (buf[byte_idx] >> bit_idx) & 1 == 1;
        if bit {
            buf[byte_idx] |= 1 << bit_idx;
        } else {
            buf[byte_idx] &= !(1 << bit_idx);
        }
        *current = Bytes::from(buf);
        entry.raw_forced = true;
        self.grow(grown);
        Ok(old)
    }

    pub fn getbit(&mut self, key: &[u8], offset: u64, now_ms: u64) -> Result<bool, WrongType> {
        let Some(s) = self.get(key, now_ms)? else {
            return Ok(false);
        };
        let byte_idx = (offset / 8) as usize;
        if byte_idx >= s.len() {
            return Ok(false);
        }
        let bit_idx = 7 - (offset % 8) as u32;
        Ok((s[byte_idx] >> bit_idx) & 1 == 1)
    }

    /// SETRANGE: zero-pads up to `offset` then overwrites. Returns the
    /// new length, or `None` when the result would exceed the string
    /// size cap.
    pub fn setrange(
        &mut self,
        key: &[u8],
        offset: usize,
        data: &[u8],
        now_ms: u64,
    ) -> Result<Option<usize>, WrongType> {
        if offset + data.len() > MAX_STRING_SIZE {
            return Ok(None);
        }
        if data.is_empty() {
            return Ok(Some(self.strlen(key, now_ms)?));
        }
        let entry = self.typed_entry_mut(key, now_ms, string_check, || {
            Value::String(Bytes::new())
        })?;
        let Value::String(current) = &mut entry.value else {
            unreachable!()
        };
        let mut buf = current.to_vec();
        let old_len = buf.len();
        if buf.len() < offset + data.len() {
            buf.resize(offset + data.len(), 0);
        }
        buf[offset..offset + data.len()].copy_from_slice(data);
        let len = buf.len();
        *current = Bytes::from(buf);
        entry.raw_forced = true;
        self.grow(len.saturating_sub(old_len));
        Ok(Some(len))
    }

    /// GETRANGE with negative-index clamping.
    pub fn getrange(
        &mut self,
        key: &[u8],
        start: i64,
        stop: i64,
        now_ms: u64,
    ) -> Result<Bytes, WrongType> {
        let Some(s) = self.get(key, now_ms)? else {
            return Ok(Bytes::new());
        };
        let (start, stop) = crate::types::normalize_range(start, stop, s.len() as i64);
        if start > stop {
            return Ok(Bytes::new());
        }
        Ok(s.slice(start as usize..(stop as usize + 1)))
    }
}

/// INCRBYFLOAT output: shortest-roundtrip decimal with trailing zeros
/// and a bare trailing dot stripped.
fn format_float(v: f64) -> String {
    let mut s = format!("{v}");
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}
