//! Set operations.

use std::collections::HashSet;

use bytes::Bytes;
use rand::seq::IteratorRandom;

use super::{collection_scan, Db, WrongType};
use crate::types::Value;

pub(crate) fn set_check(v: &Value) -> bool {
    matches!(v, Value::Set(_))
}

impl Db {
    pub fn sadd(&mut self, key: &[u8], members: &[Bytes], now_ms: u64) -> Result<usize, WrongType> {
        let added_bytes: usize = members.iter().map(|m| m.len() + 16).sum();
        let entry = self.typed_entry_mut(key, now_ms, set_check, || Value::Set(HashSet::new()))?;
        let Value::Set(set) = &mut entry.value else {
            unreachable!()
        };
        let mut added = 0;
        for m in members {
            if set.insert(m.clone()) {
                added += 1;
            }
        }
        self.grow(added_bytes);
        Ok(added)
    }

    pub fn srem(&mut self, key: &[u8], members: &[Bytes], now_ms: u64) -> Result<usize, WrongType> {
        let Some(entry) = self.live_entry_mut(key, now_ms) else {
            return Ok(0);
        };
        let Value::Set(set) = &mut entry.value else {
            return Err(WrongType);
        };
        let mut removed = 0;
        let mut removed_bytes = 0;
        for m in members {
            if set.remove(m.as_ref() as &[u8]) {
                removed += 1;
                removed_bytes += m.len() + 16;
            }
        }
        if removed > 0 {
            self.cleanup_after_remove(key, removed_bytes);
        }
        Ok(removed)
    }

    pub fn sismember(&mut self, key: &[u8], member: &[u8], now_ms: u64) -> Result<bool, WrongType> {
        Ok(self
            .with_set(key, now_ms, |s| s.contains(member))?
            .unwrap_or(false))
    }

    /// Members in sorted order so replies are deterministic.
    pub fn smembers(&mut self, key: &[u8], now_ms: u64) -> Result<Vec<Bytes>, WrongType> {
        Ok(self
            .with_set(key, now_ms, |s| {
                let mut out: Vec<Bytes> = s.iter().cloned().collect();
                out.sort();
                out
            })?
            .unwrap_or_default())
    }

    pub fn scard(&mut self, key: &[u8], now_ms: u64) -> Result<usize, WrongType> {
        Ok(self.with_set(key, now_ms, |s| s.len())?.unwrap_or(0))
    }

    /// SPOP: removes and returns up to `count` random members.
    pub fn spop(&mut self, key: &[u8], count: usize, now_ms: u64) -> Result<Vec<Bytes>, WrongType> {
        let Some(entry) = self.live_entry_mut(key, now_ms) else {
            return Ok(Vec::new());
        };
        let Value::Set(set) = &mut entry.value else {
            return Err(WrongType);
        };
        let mut rng = rand::thread_rng();
        let victims: Vec<Bytes> = set.iter().cloned().choose_multiple(&mut rng, count);
        let mut removed_bytes = 0;
        for v in &victims {
            set.remove(v.as_ref() as &[u8]);
            removed_bytes += v.len() + 16;
        }
        if !victims.is_empty() {
            self.cleanup_after_remove(key, removed_bytes);
        }
        Ok(victims)
    }

    pub fn sscan(
        &mut self,
        key: &[u8],
        cursor: u64,
        count: usize,
        pattern: Option<&[u8]>,
        now_ms: u64,
    ) -> Result<(u64, Vec<Bytes>), WrongType> {
        match self.typed_entry(key, now_ms, set_check)? {
            None => Ok((0, Vec::new())),
            Some(e) => {
                let Value::Set(set) = &e.value else {
                    unreachable!()
                };
                let (next, members) = collection_scan(set.iter(), cursor, count, pattern);
                Ok((next, members.into_iter().cloned().collect()))
            }
        }
    }

    fn with_set<T>(
        &mut self,
        key: &[u8],
        now_ms: u64,
        f: impl FnOnce(&HashSet<Bytes>) -> T,
    ) -> Result<Option<T>, WrongType> {
        match self.typed_entry(key, now_ms, set_check)? {
            None => Ok(None),
            Some(e) => match &e.value {
                Value::Set(s) => Ok(Some(f(s))),
                _ => unreachable!(),
            },
        }
    }
}
