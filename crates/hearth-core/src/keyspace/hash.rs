//! Hash operations.

use std::collections::HashMap;

use bytes::Bytes;

use super::{collection_scan, parse_i64, Db, IncrError, IncrFloatError, WrongType};
use crate::types::Value;

pub(crate) fn hash_check(v: &Value) -> bool {
    matches!(v, Value::Hash(_))
}

impl Db {
    /// HSET: stores field/value pairs, returns how many fields were
    /// newly created (updates don't count).
    pub fn hset(
        &mut self,
        key: &[u8],
        pairs: &[(Bytes, Bytes)],
        now_ms: u64,
    ) -> Result<usize, WrongType> {
        let added_bytes: usize = pairs.iter().map(|(f, v)| f.len() + v.len() + 32).sum();
        let entry = self.typed_entry_mut(key, now_ms, hash_check, || Value::Hash(HashMap::new()))?;
        let Value::Hash(hash) = &mut entry.value else {
            unreachable!()
        };
        let mut created = 0;
        for (field, value) in pairs {
            if hash.insert(field.clone(), value.clone()).is_none() {
                created += 1;
            }
        }
        self.grow(added_bytes);
        Ok(created)
    }

    pub fn hsetnx(
        &mut self,
        key: &[u8],
        field: Bytes,
        value: Bytes,
        now_ms: u64,
    ) -> Result<bool, WrongType> {
        let added = field.len() + value.len() + 32;
        let entry = self.typed_entry_mut(key, now_ms, hash_check, || Value::Hash(HashMap::new()))?;
        let Value::Hash(hash) = &mut entry.value else {
            unreachable!()
        };
        if hash.contains_key(&field) {
            return Ok(false);
        }
        hash.insert(field, value);
        self.grow(added);
        Ok(true)
    }

    pub fn hget(&mut self, key: &[u8], field: &[u8], now_ms: u64) -> Result<Option<Bytes>, WrongType> {
        Ok(self.with_hash(key, now_ms, |h| h.get(field).cloned())?.flatten())
    }

    pub fn hmget(
        &mut self,
        key: &[u8],
        fields: &[Bytes],
        now_ms: u64,
    ) -> Result<Vec<Option<Bytes>>, WrongType> {
        match self.with_hash(key, now_ms, |h| {
            fields.iter().map(|f| h.get(f.as_ref()).cloned()).collect()
        })? {
            Some(values) => Ok(values),
            None => Ok(vec![None; fields.len()]),
        }
    }

    pub fn hdel(&mut self, key: &[u8], fields: &[Bytes], now_ms: u64) -> Result<usize, WrongType> {
        let Some(entry) = self.live_entry_mut(key, now_ms) else {
            return Ok(0);
        };
        let Value::Hash(hash) = &mut entry.value else {
            return Err(WrongType);
        };
        let mut removed = 0;
        let mut removed_bytes = 0;
        for field in fields {
            if let Some(v) = hash.remove(field.as_ref()) {
                removed += 1;
                removed_bytes += field.len() + v.len() + 32;
            }
        }
        if removed > 0 {
            self.cleanup_after_remove(key, removed_bytes);
        }
        Ok(removed)
    }

    pub fn hlen(&mut self, key: &[u8], now_ms: u64) -> Result<usize, WrongType> {
        Ok(self.with_hash(key, now_ms, |h| h.len())?.unwrap_or(0))
    }

    pub fn hexists(&mut self, key: &[u8], field: &[u8], now_ms: u64) -> Result<bool, WrongType> {
        Ok(self
            .with_hash(key, now_ms, |h| h.contains_key(field))?
            .unwrap_or(false))
    }

    pub fn hgetall(&mut self, key: &[u8], now_ms: u64) -> Result<Vec<(Bytes, Bytes)>, WrongType> {
        Ok(self
            .with_hash(key, now_ms, |h| {
                let mut out: Vec<(Bytes, Bytes)> =
                    h.iter().map(|(f, v)| (f.clone(), v.clone())).collect();
                out.sort_by(|a, b| a.0.cmp(&b.0));
                out
            })?
            .unwrap_or_default())
    }

    pub fn hkeys(&mut self, key: &[u8], now_ms: u64) -> Result<Vec<Bytes>, WrongType> {
        Ok(self.hgetall(key, now_ms)?.into_iter().map(|(f, _)| f).collect())
    }

    pub fn hvals(&mut self, key: &[u8], now_ms: u64) -> Result<Vec<Bytes>, WrongType> {
        Ok(self.hgetall(key, now_ms)?.into_iter().map(|(_, v)| v).collect())
    }

    pub fn hincrby(
        &mut self,
        key: &[u8],
        field: Bytes,
        delta: i64,
        now_ms: u64,
    ) -> Result<i64, IncrError> {
        let entry = self
            .typed_entry_mut(key, now_ms, hash_check, || Value::Hash(HashMap::new()))
            .map_err(|_| IncrError::WrongType)?;
        let Value::Hash(hash) = &mut entry.value else {
            unreachable!()
        };
        let current = match hash.get(&field) {
            Some(v) => parse_i64(v).ok_or(IncrError::NotAnInteger)?,
            None => 0,
        };
        let next = current.checked_add(delta).ok_or(IncrError::Overflow)?;
        hash.insert(field, Bytes::from(next.to_string().into_bytes()));
        Ok(next)
    }

    pub fn hincrbyfloat(
        &mut self,
        key: &[u8],
        field: Bytes,
        delta: f64,
        now_ms: u64,
    ) -> Result<Bytes, IncrFloatError> {
        let entry = self
            .typed_entry_mut(key, now_ms, hash_check, || Value::Hash(HashMap::new()))
            .map_err(|_| IncrFloatError::WrongType)?;
        let Value::Hash(hash) = &mut entry.value else {
            unreachable!()
        };
        let current = match hash.get(&field) {
            Some(v) => super::parse_f64(v).ok_or(IncrFloatError::NotAFloat)?,
            None => 0.0,
        };
        let next = current + delta;
        if !next.is_finite() {
            return Err(IncrFloatError::NanOrInfinity);
        }
        let mut formatted = format!("{next}");
        if formatted.contains('.') {
            while formatted.ends_with('0') {
                formatted.pop();
            }
            if formatted.ends_with('.') {
                formatted.pop();
            }
        }
        let stored = Bytes::from(formatted.into_bytes());
        hash.insert(field, stored.clone());
        Ok(stored)
    }

    pub fn hscan(
        &mut self,
        key: &[u8],
        cursor: u64,
        count: usize,
        pattern: Option<&[u8]>,
        now_ms: u64,
    ) -> Result<(u64, Vec<(Bytes, Bytes)>), WrongType> {
        match self.typed_entry(key, now_ms, hash_check)? {
            None => Ok((0, Vec::new())),
            Some(e) => {
                let Value::Hash(hash) = &e.value else {
                    unreachable!()
                };
                let (next, fields) = collection_scan(hash.keys(), cursor, count, pattern);
                let out = fields
                    .into_iter()
                    .map(|f| (f.clone(), hash[f].clone()))
                    .collect();
                Ok((next, out))
            }
        }
    }

    fn with_hash<T>(
        &mut self,
        key: &[u8],
        now_ms: u64,
        f: impl FnOnce(&super::HashValue) -> T,
    ) -> Result<Option<T>, WrongType> {
        match self.typed_entry(key, now_ms, hash_check)? {
            None => Ok(None),
            Some(e) => match &e.value {
                Value::Hash(h) => Ok(Some(f(h))),
                _ => unreachable!(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn hset_counts_new_fields_only() {
        let mut db = Db::new();
        assert_eq!(
            db.hset(b"h", &[(b("f1"), b("v1")), (b("f2"), b("v2"))], 0)
                .unwrap(),
            2
        );
        assert_eq!(
            db.hset(b"h", &[(b("f1"), b("updated")), (b("f3"), b("v3"))], 0)
                .unwrap(),
            1
        );
        assert_eq!(db.hget(b"h", b"f1", 0).unwrap(), Some(b("updated")));
        assert_eq!(db.hlen(b"h", 0).unwrap(), 3);
    }

    #[test]
    fn hsetnx_only_creates() {
        let mut db = Db::new();
        assert!(db.hsetnx(b"h", b("f"), b("v"), 0).unwrap());
        assert!(!db.hsetnx(b"h", b("f"), b("other"), 0).unwrap());
        assert_eq!(db.hget(b"h", b"f", 0).unwrap(), Some(b("v")));
    }

    #[test]
    fn hdel_removes_key_when_empty() {
        let mut db = Db::new();
        db.hset(b"h", &[(b("f"), b("v"))], 0).unwrap();
        assert_eq!(db.hdel(b"h", &[b("f"), b("missing")], 0).unwrap(), 1);
        assert_eq!(db.type_name(b"h", 0), "none");
    }

    #[test]
    fn hmget_preserves_order_and_misses() {
        let mut db = Db::new();
        db.hset(b"h", &[(b("a"), b("1"))], 0).unwrap();
        let out = db.hmget(b"h", &[b("missing"), b("a")], 0).unwrap();
        assert_eq!(out, vec![None, Some(b("1"))]);
        // absent key yields all-None of matching arity
        let out = db.hmget(b"nope", &[b("x"), b("y")], 0).unwrap();
        assert_eq!(out, vec![None, None]);
    }

    #[test]
    fn hincrby_and_float() {
        let mut db = Db::new();
        assert_eq!(db.hincrby(b"h", b("n"), 5, 0).unwrap(), 5);
        assert_eq!(db.hincrby(b"h", b("n"), -2, 0).unwrap(), 3);
        db.hset(b"h", &[(b("s"), b("abc"))], 0).unwrap();
        assert_eq!(db.hincrby(b"h", b("s"), 1, 0), Err(IncrError::NotAnInteger));
        assert_eq!(&db.hincrbyfloat(b"h", b("f"), 1.5, 0).unwrap()[..], b"1.5");
    }

    #[test]
    fn hgetall_sorted() {
        let mut db = Db::new();
        db.hset(b"h", &[(b("b"), b("2")), (b("a"), b("1"))], 0).unwrap();
        let all = db.hgetall(b"h", 0).unwrap();
        assert_eq!(all, vec![(b("a"), b("1")), (b("b"), b("2"))]);
        assert_eq!(db.hkeys(b"h", 0).unwrap(), vec![b("a"), b("b")]);
        assert_eq!(db.hvals(b"h", 0).unwrap(), vec![b("1"), b("2")]);
    }

    #[test]
    fn hscan_pages_through() {
        let mut db = Db::new();
        for i in 0..12 {
            db.hset(b"h", &[(b(&format!("f{i:02}")), b("v"))], 0).unwrap();
        }
        let mut cursor = 0;
        let mut seen = 0;
        loop {
            let (next, batch) = db.hscan(b"h", cursor, 5, None, 0).unwrap();
            seen += batch.len();
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(seen, 12);
    }

    #[test]
    fn wrongtype() {
        let mut db = Db::new();
        db.rpush(b"l", &[b("x")], 0).unwrap();
        assert!(db.hset(b"l", &[(b("f"), b("v"))], 0).is_err());
        assert!(db.hget(b"l", b"f", 0).is_err());
    }
}
