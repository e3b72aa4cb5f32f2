//! Sorted-set operations.

use bytes::Bytes;

use super::{collection_scan, Db, WrongType};
use crate::types::normalize_range;
use crate::types::sorted_set::{SortedSet, ZAddFlags, ZAddOutcome};
use crate::types::Value;

pub(crate) fn zset_check(v: &Value) -> bool {
    matches!(v, Value::Zset(_))
}

/// Result of a ZADD on one member, including the stored score so the
/// INCR variant can report it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZAddResult {
    pub added: bool,
    pub changed: bool,
    pub score: Option<f64>,
}

impl Db {
    /// Adds or updates one member. With `incr`, the score is added to
    /// the current one (ZADD ... INCR semantics); a flag-rejected INCR
    /// reports `score: None`.
    pub fn zadd_one(
        &mut self,
        key: &[u8],
        score: f64,
        member: Bytes,
        flags: ZAddFlags,
        incr: bool,
        now_ms: u64,
    ) -> Result<ZAddResult, WrongType> {
        let added_bytes = member.len() + 48;
        let entry =
            self.typed_entry_mut(key, now_ms, zset_check, || Value::Zset(SortedSet::new()))?;
        let Value::Zset(zset) = &mut entry.value else {
            unreachable!()
        };

        let before = zset.score(&member);
        let effective = if incr {
            before.unwrap_or(0.0) + score
        } else {
            score
        };

        // a flag veto on INCR reports a nil score
        let vetoed = match before {
            Some(old) => {
                flags.nx || (flags.gt && effective <= old) || (flags.lt && effective >= old)
            }
            None => flags.xx,
        };

        let ZAddOutcome { added, updated } = zset.add(member.clone(), effective, flags);
        let score_out = if incr && vetoed {
            None
        } else {
            zset.score(&member)
        };

        if added {
            self.grow(added_bytes);
        } else {
            let empty = {
                let e = self.live_entry(key, now_ms).expect("zset just touched");
                match &e.value {
                    Value::Zset(z) => z.is_empty(),
                    _ => unreachable!(),
                }
            };
            if empty {
                self.cleanup_after_remove(key, 0);
            }
        }
        Ok(ZAddResult {
            added,
            changed: added || updated,
            score: score_out,
        })
    }

    /// ZRANGE by rank, ascending (score, member) order.
    pub fn zrange(
        &mut self,
        key: &[u8],
        start: i64,
        stop: i64,
        now_ms: u64,
    ) -> Result<Vec<(Bytes, f64)>, WrongType> {
        match self.typed_entry(key, now_ms, zset_check)? {
            None => Ok(Vec::new()),
            Some(e) => {
                let Value::Zset(zset) = &e.value else {
                    unreachable!()
                };
                let (s, e) = normalize_range(start, stop, zset.len() as i64);
                if s > e {
                    return Ok(Vec::new());
                }
                Ok(zset
                    .iter()
                    .skip(s as usize)
                    .take((e - s + 1) as usize)
                    .map(|(m, score)| (m.clone(), score))
                    .collect())
            }
        }
    }

    pub fn zscore(&mut self, key: &[u8], member: &[u8], now_ms: u64) -> Result<Option<f64>, WrongType> {
        match self.typed_entry(key, now_ms, zset_check)? {
            None => Ok(None),
            Some(e) => match &e.value {
                Value::Zset(z) => Ok(z.score(member)),
                _ => unreachable!(),
            },
        }
    }

    pub fn zcard(&mut self, key: &[u8], now_ms: u64) -> Result<usize, WrongType> {
        match self.typed_entry(key, now_ms, zset_check)? {
            None => Ok(0),
            Some(e) => match &e.value {
                Value::Zset(z) => Ok(z.len()),
                _ => unreachable!(),
            },
        }
    }

    /// ZPOPMIN/ZPOPMAX: removes up to `count` members from one end.
    pub fn zpop(
        &mut self,
        key: &[u8],
        count: usize,
        max: bool,
        now_ms: u64,
    ) -> Result<Vec<(Bytes, f64)>, WrongType> {
        let Some(entry) = self.live_entry_mut(key, now_ms) else {
            return Ok(Vec::new());
        };
        let Value::Zset(zset) = &mut entry.value else {
            return Err(WrongType);
        };
        let popped = zset.pop(count, max);
        if !popped.is_empty() {
            let removed_bytes = popped.iter().map(|(m, _)| m.len() + 48).sum();
            self.cleanup_after_remove(key, removed_bytes);
        }
        Ok(popped)
    }

    pub fn zscan(
        &mut self,
        key: &[u8],
        cursor: u64,
        count: usize,
        pattern: Option<&[u8]>,
        now_ms: u64,
    ) -> Result<(u64, Vec<(Bytes, f64)>), WrongType> {
        match self.typed_entry(key, now_ms, zset_check)? {
            None => Ok((0, Vec::new())),
            Some(e) => {
                let Value::Zset(zset) = &e.value else {
                    unreachable!()
                };
                let members: Vec<&Bytes> = zset.iter().map(|(m, _)| m).collect();
                let (next, selected) = collection_scan(members.into_iter(), cursor, count, pattern);
                let out = selected
                    .into_iter()
                    .map(|m| (m.clone(), zset.score(m).expect("member just listed")))
                    .collect();
                Ok((next, out))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn plain(db: &mut Db, key: &[u8], score: f64, member: &str) -> ZAddResult {
        db.zadd_one(key, score, b(member), ZAddFlags::default(), false, 0)
            .unwrap()
    }

    #[test]
    fn add_and_range_tie_order() {
        let mut db = Db::new();
        plain(&mut db, b"z", 1.0, "b");
        plain(&mut db, b"z", 1.0, "a");
        plain(&mut db, b"z", 1.0, "c");
        let out = db.zrange(b"z", 0, -1, 0).unwrap();
        let members: Vec<Bytes> = out.iter().map(|(m, _)| m.clone()).collect();
        assert_eq!(members, vec![b("a"), b("b"), b("c")]);
    }

    #[test]
    fn range_by_score_then_member() {
        let mut db = Db::new();
        plain(&mut db, b"z", 2.0, "x");
        plain(&mut db, b"z", 1.0, "y");
        let out = db.zrange(b"z", 0, -1, 0).unwrap();
        assert_eq!(out[0], (b("y"), 1.0));
        assert_eq!(out[1], (b("x"), 2.0));
    }

    #[test]
    fn incr_mode_accumulates() {
        let mut db = Db::new();
        let r = db
            .zadd_one(b"z", 5.0, b("m"), ZAddFlags::default(), true, 0)
            .unwrap();
        assert_eq!(r.score, Some(5.0));
        let r = db
            .zadd_one(b"z", 2.5, b("m"), ZAddFlags::default(), true, 0)
            .unwrap();
        assert_eq!(r.score, Some(7.5));
    }

    #[test]
    fn incr_with_nx_on_existing_returns_none() {
        let mut db = Db::new();
        plain(&mut db, b"z", 1.0, "m");
        let r = db
            .zadd_one(
                b"z",
                2.0,
                b("m"),
                ZAddFlags {
                    nx: true,
                    ..Default::default()
                },
                true,
                0,
            )
            .unwrap();
        assert_eq!(r.score, None);
        assert!(!r.changed);
    }

    #[test]
    fn zpop_ends() {
        let mut db = Db::new();
        plain(&mut db, b"z", 1.0, "a");
        plain(&mut db, b"z", 2.0, "b");
        plain(&mut db, b"z", 3.0, "c");
        assert_eq!(db.zpop(b"z", 1, false, 0).unwrap(), vec![(b("a"), 1.0)]);
        assert_eq!(db.zpop(b"z", 1, true, 0).unwrap(), vec![(b("c"), 3.0)]);
        // draining removes the key
        db.zpop(b"z", 10, false, 0).unwrap();
        assert_eq!(db.type_name(b"z", 0), "none");
    }

    #[test]
    fn empty_range_when_start_past_stop() {
        let mut db = Db::new();
        plain(&mut db, b"z", 1.0, "a");
        assert!(db.zrange(b"z", -1, -2, 0).unwrap().is_empty());
    }

    #[test]
    fn wrongtype() {
        let mut db = Db::new();
        db.set(b"k", b("v"), super::super::SetOptions::default(), 0)
            .unwrap();
        assert!(db.zadd_one(b"k", 1.0, b("m"), ZAddFlags::default(), false, 0).is_err());
        assert!(db.zrange(b"k", 0, -1, 0).is_err());
    }
}
