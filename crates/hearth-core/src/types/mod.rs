//! Data type representations for stored values.
//!
//! One variant per Redis-compatible type. The wrong-type check at the
//! keyspace layer collapses to a `match` on this enum.

pub mod sorted_set;
pub mod stream;

use std::collections::{HashMap, HashSet, VecDeque};

use bytes::Bytes;

use sorted_set::SortedSet;
use stream::Stream;

/// A stored value in the keyspace.
#[derive(Debug, Clone)]
pub enum Value {
    /// Binary-safe string. `Bytes` keeps clones cheap.
    String(Bytes),
    /// Ordered list with O(1) push/pop at both ends.
    List(VecDeque<Bytes>),
    /// Field → value mapping; insertion order is irrelevant.
    Hash(HashMap<Bytes, Bytes>),
    /// Set of unique members.
    Set(HashSet<Bytes>),
    /// Members ordered by (score, member).
    Zset(SortedSet),
    /// Append-only entry log with consumer groups.
    Stream(Stream),
}

impl Value {
    /// Type tag as reported by the TYPE command.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::Zset(_) => "zset",
            Value::Stream(_) => "stream",
        }
    }

    /// A collection value that has lost its last element must drop its
    /// key; strings and streams persist while empty.
    pub fn is_removable_when_empty(&self) -> bool {
        match self {
            Value::String(_) | Value::Stream(_) => false,
            Value::List(l) => l.is_empty(),
            Value::Hash(h) => h.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::Zset(z) => z.is_empty(),
        }
    }

    /// Rough payload size in bytes, for the used-memory estimate.
    pub fn size_bytes(&self) -> usize {
        match self {
            Value::String(s) => s.len(),
            Value::List(l) => l.iter().map(|e| e.len() + 16).sum(),
            Value::Hash(h) => h.iter().map(|(f, v)| f.len() + v.len() + 32).sum(),
            Value::Set(s) => s.iter().map(|m| m.len() + 16).sum(),
            Value::Zset(z) => z.iter().map(|(m, _)| m.len() + 48).sum(),
            Value::Stream(s) => s.size_bytes(),
        }
    }
}

/// Converts Redis-style indices (negative counts from the tail) to a
/// clamped `(start, stop)` pair. Returns `(0, -1)` for empty
/// collections so callers see an empty range.
pub fn normalize_range(start: i64, stop: i64, len: i64) -> (i64, i64) {
    if len == 0 {
        return (0, -1);
    }
    let s = if start < 0 { (len + start).max(0) } else { start };
    let e = if stop < 0 {
        (len + stop).max(-1)
    } else {
        stop.min(len - 1)
    };
    (s, e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names() {
        assert_eq!(Value::String(Bytes::new()).type_name(), "string");
        assert_eq!(Value::List(VecDeque::new()).type_name(), "list");
        assert_eq!(Value::Hash(HashMap::new()).type_name(), "hash");
        assert_eq!(Value::Set(HashSet::new()).type_name(), "set");
        assert_eq!(Value::Zset(SortedSet::new()).type_name(), "zset");
        assert_eq!(Value::Stream(Stream::new()).type_name(), "stream");
    }

    #[test]
    fn normalize_negative_indices() {
        // len 5: -2..-1 → 3..4
        assert_eq!(normalize_range(-2, -1, 5), (3, 4));
        // start past end yields start > stop
        assert_eq!(normalize_range(9, 10, 5), (9, 4));
        // hugely negative stop clamps to -1 (empty)
        assert_eq!(normalize_range(0, -100, 5), (0, -1));
        assert_eq!(normalize_range(0, -1, 0), (0, -1));
    }
}
