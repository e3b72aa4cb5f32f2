//! List operations.

use std::collections::VecDeque;

use bytes::Bytes;

use super::{Db, WrongType};
use crate::types::{normalize_range, Value};

pub(crate) fn list_check(v: &Value) -> bool {
    matches!(v, Value::List(_))
}

impl Db {
    pub fn lpush(&mut self, key: &[u8], values: &[Bytes], now_ms: u64) -> Result<usize, WrongType> {
        self.push(key, values, true, now_ms)
    }

    pub fn rpush(&mut self, key: &[u8], values: &[Bytes], now_ms: u64) -> Result<usize, WrongType> {
        self.push(key, values, false, now_ms)
    }

    fn push(
        &mut self,
        key: &[u8],
        values: &[Bytes],
        left: bool,
        now_ms: u64,
    ) -> Result<usize, WrongType> {
        let added: usize = values.iter().map(|v| v.len() + 16).sum();
        let entry =
            self.typed_entry_mut(key, now_ms, list_check, || Value::List(VecDeque::new()))?;
        let Value::List(list) = &mut entry.value else {
            unreachable!()
        };
        for v in values {
            if left {
                list.push_front(v.clone());
            } else {
                list.push_back(v.clone());
            }
        }
        let len = list.len();
        self.grow(added);
        Ok(len)
    }

    pub fn lpop(&mut self, key: &[u8], now_ms: u64) -> Result<Option<Bytes>, WrongType> {
        self.pop(key, true, now_ms)
    }

    pub fn rpop(&mut self, key: &[u8], now_ms: u64) -> Result<Option<Bytes>, WrongType> {
        self.pop(key, false, now_ms)
    }

    fn pop(&mut self, key: &[u8], left: bool, now_ms: u64) -> Result<Option<Bytes>, WrongType> {
        let Some(entry) = self.live_entry_mut(key, now_ms) else {
            return Ok(None);
        };
        let Value::List(list) = &mut entry.value else {
            return Err(WrongType);
        };
        let popped = if left {
            list.pop_front()
        } else {
            list.pop_back()
        };
        if let Some(v) = &popped {
            let removed = v.len() + 16;
            self.cleanup_after_remove(key, removed);
        }
        Ok(popped)
    }

    /// Atomic pop-from-src push-to-dst; the element moves even when
    /// src and dst are the same key.
    pub fn lmove(
        &mut self,
        src: &[u8],
        dst: &[u8],
        from_left: bool,
        to_left: bool,
        now_ms: u64,
    ) -> Result<Option<Bytes>, WrongType> {
        // destination type is validated before popping so a failed
        // push cannot lose the element
        if let Some(entry) = self.live_entry(dst, now_ms) {
            if !list_check(&entry.value) {
                return Err(WrongType);
            }
        }
        let Some(value) = self.pop(src, from_left, now_ms)? else {
            return Ok(None);
        };
        self.push(dst, std::slice::from_ref(&value), to_left, now_ms)?;
        Ok(Some(value))
    }

    pub fn llen(&mut self, key: &[u8], now_ms: u64) -> Result<usize, WrongType> {
        match self.typed_entry(key, now_ms, list_check)? {
            Some(e) => match &e.value {
                Value::List(l) => Ok(l.len()),
                _ => unreachable!(),
            },
            None => Ok(0),
        }
    }

    /// LRANGE with negative tail-relative indices, clipped to bounds.
    pub fn lrange(
        &mut self,
        key: &[u8],
        start: i64,
        stop: i64,
        now_ms: u64,
    ) -> Result<Vec<Bytes>, WrongType> {
        match self.typed_entry(key, now_ms, list_check)? {
            None => Ok(Vec::new()),
            Some(e) => {
                let Value::List(list) = &e.value else {
                    unreachable!()
                };
                let (s, e) = normalize_range(start, stop, list.len() as i64);
                if s > e {
                    return Ok(Vec::new());
                }
                Ok(list
                    .iter()
                    .skip(s as usize)
                    .take((e - s + 1) as usize)
                    .cloned()
                    .collect())
            }
        }
    }
}
