//! One database of the keyspace.
//!
//! A `Db` owns a flat `AHashMap<Bytes, Entry>` and implements every
//! typed operation family in a submodule (`string`, `list`, `hash`,
//! `set`, `zset`, `stream`). The contract for each typed operation:
//! wrong-type keys error, reads of absent keys see absence, the first
//! write auto-creates, the last removal of a collection element deletes
//! the key. Expiry is applied lazily on every access, and every lazy
//! removal is recorded so the caller can synthesize replicated DELs.

use std::collections::HashMap;

use ahash::AHashMap;
use bytes::Bytes;

use crate::glob::glob_match;
use crate::time::NO_EXPIRY;
use crate::types::Value;

mod digest;
mod hash;
mod list;
mod set;
mod string;
mod stream;
mod zset;

pub use stream::StreamAddError;
pub use string::{IncrError, IncrFloatError};
pub use zset::ZAddResult;

/// Error returned when a command is used against a key holding the
/// wrong kind of value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrongType;

impl std::fmt::Display for WrongType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "WRONGTYPE Operation against a key holding the wrong kind of value"
        )
    }
}

impl std::error::Error for WrongType {}

/// TTL of a key, as the TTL/PTTL commands report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlState {
    /// Key does not exist (`-2`).
    Missing,
    /// Key exists without an expiry (`-1`).
    NoExpiry,
    /// Absolute expiry timestamp in ms.
    ExpiresAt(u64),
}

/// Condition flags for the EXPIRE family. The flags combine (XX+GT,
/// XX+LT); the command layer rejects the two contradictory pairings
/// (GT+LT, and NX with anything else) before calling in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpireFlags {
    /// Only when the key has no expiry.
    pub nx: bool,
    /// Only when the key has an expiry.
    pub xx: bool,
    /// Only when the new expiry is later than the current one.
    pub gt: bool,
    /// Only when the new expiry is earlier than the current one.
    pub lt: bool,
}

/// Options for the SET command.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    pub nx: bool,
    pub xx: bool,
    pub keep_ttl: bool,
    /// GET option: report the old value, erroring on non-string keys.
    pub get: bool,
    /// Absolute expiry; `None` clears any TTL unless `keep_ttl`.
    pub expire_at_ms: Option<u64>,
}

/// What a SET did, plus the prior string value for the GET option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOutcome {
    pub applied: bool,
    pub old_value: Option<Bytes>,
}

/// TTL action carried by GETEX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetExAction {
    /// Plain GETEX: leave the TTL alone.
    Keep,
    /// Set an absolute expiry.
    ExpireAt(u64),
    /// Drop the expiry.
    Persist,
}

/// A single entry: the value plus its common header (absolute expiry,
/// raw-forced encoding marker).
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    /// Absolute unix-ms expiry; 0 = no expiry.
    pub expire_at_ms: u64,
    /// Set by APPEND/SETBIT/SETRANGE so OBJECT ENCODING reports `raw`.
    pub raw_forced: bool,
}

impl Entry {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            expire_at_ms: NO_EXPIRY,
            raw_forced: false,
        }
    }

    fn is_expired(&self, now_ms: u64) -> bool {
        self.expire_at_ms != NO_EXPIRY && self.expire_at_ms <= now_ms
    }
}

/// Fixed bookkeeping cost charged per entry in the memory estimate.
const ENTRY_OVERHEAD: usize = 64;

/// One of the sixteen databases.
#[derive(Debug, Default)]
pub struct Db {
    entries: AHashMap<Bytes, Entry>,
    /// Keys removed by lazy expiration since the last collection; the
    /// dispatcher turns these into replicated DEL events.
    expired_log: Vec<Bytes>,
    /// Incremental payload-size estimate.
    bytes: usize,
}

impl Db {
    pub fn new() -> Self {
        Self::default()
    }

    // ── entry plumbing ────────────────────────────────────────────────

    /// Removes the key if it is past its expiry, recording the eviction.
    /// Returns true when the key was dropped.
    pub(crate) fn expire_if_needed(&mut self, key: &[u8], now_ms: u64) -> bool {
        let expired = self
            .entries
            .get(key)
            .map(|e| e.is_expired(now_ms))
            .unwrap_or(false);
        if expired {
            if let Some((stored_key, entry)) = self.entries.remove_entry(key) {
                self.bytes = self
                    .bytes
                    .saturating_sub(entry.value.size_bytes() + stored_key.len() + ENTRY_OVERHEAD);
                self.expired_log.push(stored_key);
            }
        }
        expired
    }

    /// Live entry lookup: applies lazy expiry first.
    pub(crate) fn live_entry(&mut self, key: &[u8], now_ms: u64) -> Option<&Entry> {
        self.expire_if_needed(key, now_ms);
        self.entries.get(key)
    }

    pub(crate) fn live_entry_mut(&mut self, key: &[u8], now_ms: u64) -> Option<&mut Entry> {
        self.expire_if_needed(key, now_ms);
        self.entries.get_mut(key)
    }

    /// Typed mutable access: absent keys are created with `make_empty`,
    /// wrong-typed keys error before any mutation.
    pub(crate) fn typed_entry_mut(
        &mut self,
        key: &[u8],
        now_ms: u64,
        type_check: fn(&Value) -> bool,
        make_empty: fn() -> Value,
    ) -> Result<&mut Entry, WrongType> {
        self.expire_if_needed(key, now_ms);
        match self.entries.get(key) {
            Some(e) if !type_check(&e.value) => return Err(WrongType),
            Some(_) => {}
            None => {
                self.bytes += key.len() + ENTRY_OVERHEAD;
                self.entries
                    .insert(Bytes::copy_from_slice(key), Entry::new(make_empty()));
            }
        }
        Ok(self.entries.get_mut(key).expect("entry just ensured"))
    }

    /// Typed read access; absent keys return `Ok(None)`.
    pub(crate) fn typed_entry(
        &mut self,
        key: &[u8],
        now_ms: u64,
        type_check: fn(&Value) -> bool,
    ) -> Result<Option<&Entry>, WrongType> {
        self.expire_if_needed(key, now_ms);
        match self.entries.get(key) {
            None => Ok(None),
            Some(e) if type_check(&e.value) => Ok(Some(e)),
            Some(_) => Err(WrongType),
        }
    }

    /// Drops the key if its collection emptied out; adjusts the size
    /// estimate by `removed_bytes` otherwise.
    pub(crate) fn cleanup_after_remove(&mut self, key: &[u8], removed_bytes: usize) {
        let empty = self
            .entries
            .get(key)
            .map(|e| e.value.is_removable_when_empty())
            .unwrap_or(false);
        if empty {
            self.remove_entry(key);
        } else {
            self.bytes = self.bytes.saturating_sub(removed_bytes);
        }
    }

    pub(crate) fn grow(&mut self, n: usize) {
        self.bytes += n;
    }

    fn remove_entry(&mut self, key: &[u8]) -> Option<Entry> {
        let (stored_key, entry) = self.entries.remove_entry(key)?;
        self.bytes = self
            .bytes
            .saturating_sub(entry.value.size_bytes() + stored_key.len() + ENTRY_OVERHEAD);
        Some(entry)
    }

    /// Replaces (or inserts) a whole entry, keeping the size estimate
    /// straight. Used by persistence loading, RESTORE and COPY.
    pub fn put_entry(&mut self, key: Bytes, entry: Entry) {
        if let Some(old) = self.entries.get(&key) {
            self.bytes = self.bytes.saturating_sub(old.value.size_bytes());
        } else {
            self.bytes += key.len() + ENTRY_OVERHEAD;
        }
        self.bytes += entry.value.size_bytes();
        self.entries.insert(key, entry);
    }

    /// Raw live entry clone, for DUMP / COPY / MOVE.
    pub fn snapshot_entry(&mut self, key: &[u8], now_ms: u64) -> Option<Entry> {
        self.live_entry(key, now_ms).cloned()
    }

    // ── key-level operations ──────────────────────────────────────────

    pub fn del(&mut self, key: &[u8], now_ms: u64) -> bool {
        if self.expire_if_needed(key, now_ms) {
            return false;
        }
        self.remove_entry(key).is_some()
    }

    pub fn exists(&mut self, key: &[u8], now_ms: u64) -> bool {
        self.live_entry(key, now_ms).is_some()
    }

    /// Total type observation: "none" for absent keys.
    pub fn type_name(&mut self, key: &[u8], now_ms: u64) -> &'static str {
        match self.live_entry(key, now_ms) {
            Some(e) => e.value.type_name(),
            None => "none",
        }
    }

    pub fn ttl_state(&mut self, key: &[u8], now_ms: u64) -> TtlState {
        match self.live_entry(key, now_ms) {
            None => TtlState::Missing,
            Some(e) if e.expire_at_ms == NO_EXPIRY => TtlState::NoExpiry,
            Some(e) => TtlState::ExpiresAt(e.expire_at_ms),
        }
    }

    /// EXPIRE family core: sets an absolute expiry under the condition
    /// flags, every set flag restricting independently. Returns whether
    /// the expiry was applied. An expiry in the past deletes the key
    /// immediately (and still counts as applied).
    pub fn expire_at(&mut self, key: &[u8], at_ms: u64, flags: ExpireFlags, now_ms: u64) -> bool {
        let Some(entry) = self.live_entry_mut(key, now_ms) else {
            return false;
        };
        let current = entry.expire_at_ms;
        let has_ttl = current != NO_EXPIRY;
        // a key without a TTL counts as infinite: GT never beats it,
        // LT always does
        if (flags.nx && has_ttl)
            || (flags.xx && !has_ttl)
            || (flags.gt && (!has_ttl || at_ms <= current))
            || (flags.lt && has_ttl && at_ms >= current)
        {
            return false;
        }
        if at_ms <= now_ms {
            self.remove_entry(key);
            return true;
        }
        // the borrow above ended with the early return path; re-fetch
        if let Some(entry) = self.entries.get_mut(key) {
            entry.expire_at_ms = at_ms;
        }
        true
    }

    pub fn persist(&mut self, key: &[u8], now_ms: u64) -> bool {
        match self.live_entry_mut(key, now_ms) {
            Some(e) if e.expire_at_ms != NO_EXPIRY => {
                e.expire_at_ms = NO_EXPIRY;
                true
            }
            _ => false,
        }
    }

    pub fn rename(&mut self, src: &[u8], dst: &[u8], now_ms: u64) -> Result<(), ()> {
        if self.live_entry(src, now_ms).is_none() {
            return Err(());
        }
        let entry = self.remove_entry(src).expect("checked live");
        self.put_entry(Bytes::copy_from_slice(dst), entry);
        Ok(())
    }

    pub fn keys(&mut self, pattern: &[u8], now_ms: u64) -> Vec<Bytes> {
        self.collect_expired_now(now_ms);
        let mut out: Vec<Bytes> = self
            .entries
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        out.sort();
        out
    }

    pub fn random_key(&mut self, now_ms: u64) -> Option<Bytes> {
        self.collect_expired_now(now_ms);
        if self.entries.is_empty() {
            return None;
        }
        let idx = rand::random::<usize>() % self.entries.len();
        self.entries.keys().nth(idx).cloned()
    }

    /// Cursor-based iteration. The cursor is an index into the sorted
    /// key list; 0 restarts, and a returned cursor of 0 means done.
    /// Stable enough for clients that don't mutate mid-scan, which is
    /// all SCAN ever guaranteed.
    pub fn scan(
        &mut self,
        cursor: u64,
        count: usize,
        pattern: Option<&[u8]>,
        type_filter: Option<&str>,
        now_ms: u64,
    ) -> (u64, Vec<Bytes>) {
        self.collect_expired_now(now_ms);
        let mut keys: Vec<&Bytes> = self.entries.keys().collect();
        keys.sort();

        let start = cursor as usize;
        let count = count.max(1);
        let mut out = Vec::new();
        let mut idx = start;
        while idx < keys.len() && idx < start + count {
            let key = keys[idx];
            let matches_pattern = pattern.map(|p| glob_match(p, key)).unwrap_or(true);
            let matches_type = type_filter
                .map(|t| self.entries[key.as_ref() as &[u8]].value.type_name() == t)
                .unwrap_or(true);
            if matches_pattern && matches_type {
                out.push((*key).clone());
            }
            idx += 1;
        }
        let next = if idx >= keys.len() { 0 } else { idx as u64 };
        (next, out)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.bytes = 0;
    }

    pub fn used_bytes(&self) -> usize {
        self.bytes
    }

    pub fn keys_with_expiry(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.expire_at_ms != NO_EXPIRY)
            .count()
    }

    /// Walks up to `budget` entries, removing any that are past expiry.
    /// Returns how many were removed.
    pub fn active_expire(&mut self, budget: usize, now_ms: u64) -> usize {
        let due: Vec<Bytes> = self
            .entries
            .iter()
            .take(budget)
            .filter(|(_, e)| e.is_expired(now_ms))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &due {
            self.expire_if_needed(key, now_ms);
        }
        due.len()
    }

    /// Drains the log of lazily-expired keys.
    pub fn take_expired(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.expired_log)
    }

    /// Sweeps every expired entry right now (used before whole-keyspace
    /// iteration like KEYS/SCAN so dead keys never surface).
    fn collect_expired_now(&mut self, now_ms: u64) {
        let due: Vec<Bytes> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now_ms))
            .map(|(k, _)| k.clone())
            .collect();
        for key in due {
            self.expire_if_needed(&key, now_ms);
        }
    }

    /// Iterates live entries (no expiry filtering: callers that need
    /// exactness sweep first). Used by snapshot encoding and digests.
    pub fn iter_entries(&self) -> impl Iterator<Item = (&Bytes, &Entry)> {
        self.entries.iter()
    }

    /// OBJECT ENCODING for a live key.
    pub fn object_encoding(
        &mut self,
        key: &[u8],
        now_ms: u64,
        zset_listpack_max: i64,
    ) -> Option<&'static str> {
        let entry = self.live_entry(key, now_ms)?;
        Some(encoding_of(entry, zset_listpack_max))
    }
}

/// Reported encoding follows the size-class rules Redis clients expect.
fn encoding_of(entry: &Entry, zset_listpack_max: i64) -> &'static str {
    fn is_int(s: &[u8]) -> bool {
        if s.is_empty() || s.len() > 20 {
            return false;
        }
        let body = if s[0] == b'-' { &s[1..] } else { s };
        !body.is_empty()
            && body.iter().all(|b| b.is_ascii_digit())
            && std::str::from_utf8(s).unwrap().parse::<i64>().is_ok()
    }

    match &entry.value {
        Value::String(s) => {
            if entry.raw_forced {
                "raw"
            } else if is_int(s) {
                "int"
            } else if s.len() <= 44 {
                "embstr"
            } else {
                "raw"
            }
        }
        Value::List(l) => {
            if l.len() <= 128 && l.iter().all(|v| v.len() <= 64) {
                "listpack"
            } else {
                "quicklist"
            }
        }
        Value::Set(s) => {
            if s.iter().all(|m| is_int(m)) && s.len() <= 512 {
                "intset"
            } else if s.len() <= 128 && s.iter().all(|m| m.len() <= 64) {
                "listpack"
            } else {
                "hashtable"
            }
        }
        Value::Hash(h) => {
            if h.len() <= 128 && h.iter().all(|(f, v)| f.len() <= 64 && v.len() <= 64) {
                "listpack"
            } else {
                "hashtable"
            }
        }
        Value::Zset(z) => {
            if zset_listpack_max >= 0
                && z.len() as i64 <= zset_listpack_max
                && z.iter().all(|(m, _)| m.len() <= 64)
            {
                "listpack"
            } else {
                "skiplist"
            }
        }
        Value::Stream(_) => "stream",
    }
}

/// Shared helper: hash scan over field/member collections.
pub(crate) fn collection_scan<'a, I>(
    items: I,
    cursor: u64,
    count: usize,
    pattern: Option<&[u8]>,
) -> (u64, Vec<&'a Bytes>)
where
    I: Iterator<Item = &'a Bytes>,
{
    let mut all: Vec<&Bytes> = items.collect();
    all.sort();
    let start = cursor as usize;
    let count = count.max(1);
    let end = (start + count).min(all.len());
    let out: Vec<&Bytes> = all[start.min(all.len())..end]
        .iter()
        .filter(|m| pattern.map(|p| glob_match(p, m)).unwrap_or(true))
        .copied()
        .collect();
    let next = if end >= all.len() { 0 } else { end as u64 };
    (next, out)
}

/// Parses an i64 out of raw bytes (strict: no sign-only, no blanks).
pub(crate) fn parse_i64(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

/// Parses an f64 out of raw bytes, accepting inf/-inf like Redis.
pub(crate) fn parse_f64(data: &[u8]) -> Option<f64> {
    let s = std::str::from_utf8(data).ok()?.trim();
    match s {
        "inf" | "+inf" | "Inf" | "+Inf" => Some(f64::INFINITY),
        "-inf" | "-Inf" => Some(f64::NEG_INFINITY),
        _ => {
            let v: f64 = s.parse().ok()?;
            if v.is_nan() {
                None
            } else {
                Some(v)
            }
        }
    }
}

/// Type aliases used across the submodules.
pub(crate) type HashValue = HashMap<Bytes, Bytes>;
