//! Stream operations: thin typed wrappers over [`crate::types::stream`].

use bytes::Bytes;

use super::{Db, WrongType};
use crate::types::stream::{
    PendingSummary, Stream, StreamId, XAddError, XGroupError, XReadGroupError,
};
use crate::types::Value;

pub(crate) fn stream_check(v: &Value) -> bool {
    matches!(v, Value::Stream(_))
}

/// Errors surfaced by XADD at the keyspace level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAddError {
    WrongType,
    Add(XAddError),
}

impl Db {
    pub fn xadd(
        &mut self,
        key: &[u8],
        id_spec: &[u8],
        fields: Vec<(Bytes, Bytes)>,
        now_ms: u64,
    ) -> Result<StreamId, StreamAddError> {
        let added_bytes: usize = 32 + fields.iter().map(|(f, v)| f.len() + v.len() + 16).sum::<usize>();
        let entry = self
            .typed_entry_mut(key, now_ms, stream_check, || Value::Stream(Stream::new()))
            .map_err(|_| StreamAddError::WrongType)?;
        let Value::Stream(stream) = &mut entry.value else {
            unreachable!()
        };
        let was_empty_key = stream.is_empty() && stream.last_id() == StreamId::MIN;
        match stream.add(id_spec, fields, now_ms) {
            Ok(id) => {
                self.grow(added_bytes);
                Ok(id)
            }
            Err(e) => {
                // roll back an auto-created empty stream on error
                if was_empty_key {
                    self.cleanup_after_remove_stream(key);
                }
                Err(StreamAddError::Add(e))
            }
        }
    }

    /// Streams persist while empty, so the generic empty-collection
    /// cleanup never fires for them; this removes a stream key that
    /// was auto-created by a failed XADD.
    fn cleanup_after_remove_stream(&mut self, key: &[u8]) {
        let remove = match self.live_entry(key, 0) {
            Some(e) => match &e.value {
                Value::Stream(s) => s.is_empty() && s.group_names().next().is_none(),
                _ => false,
            },
            None => false,
        };
        if remove {
            self.del(key, 0);
        }
    }

    pub fn xlen(&mut self, key: &[u8], now_ms: u64) -> Result<usize, WrongType> {
        Ok(self.with_stream(key, now_ms, |s| s.len())?.unwrap_or(0))
    }

    pub fn xrange(
        &mut self,
        key: &[u8],
        start: StreamId,
        stop: StreamId,
        rev: bool,
        count: usize,
        now_ms: u64,
    ) -> Result<Vec<(StreamId, Vec<(Bytes, Bytes)>)>, WrongType> {
        Ok(self
            .with_stream(key, now_ms, |s| s.range(start, stop, rev, count))?
            .unwrap_or_default())
    }

    pub fn xdel(&mut self, key: &[u8], ids: &[StreamId], now_ms: u64) -> Result<u64, WrongType> {
        let Some(entry) = self.live_entry_mut(key, now_ms) else {
            return Ok(0);
        };
        let Value::Stream(stream) = &mut entry.value else {
            return Err(WrongType);
        };
        Ok(stream.delete(ids))
    }

    /// XGROUP CREATE; with `mkstream`, a missing key is created empty.
    /// Without it, a missing key reports `Err(None)` so the command
    /// layer can reply NOGROUP.
    pub fn xgroup_create(
        &mut self,
        key: &[u8],
        group: Bytes,
        start: StreamId,
        mkstream: bool,
        now_ms: u64,
    ) -> Result<Result<(), XGroupError>, WrongType> {
        if !mkstream && self.typed_entry(key, now_ms, stream_check)?.is_none() {
            return Ok(Err(XGroupError::NoGroup));
        }
        let entry =
            self.typed_entry_mut(key, now_ms, stream_check, || Value::Stream(Stream::new()))?;
        let Value::Stream(stream) = &mut entry.value else {
            unreachable!()
        };
        // "$" positions at the current end of stream
        let at = if start == StreamId::MAX {
            stream.last_id()
        } else {
            start
        };
        Ok(stream.group_create(group, at))
    }

    pub fn xgroup_setid(
        &mut self,
        key: &[u8],
        group: &[u8],
        id: StreamId,
        now_ms: u64,
    ) -> Result<Result<(), XGroupError>, WrongType> {
        let Some(entry) = self.live_entry_mut(key, now_ms) else {
            return Ok(Err(XGroupError::NoGroup));
        };
        let Value::Stream(stream) = &mut entry.value else {
            return Err(WrongType);
        };
        Ok(stream.group_set_id(group, id))
    }

    pub fn xreadgroup(
        &mut self,
        key: &[u8],
        group: &[u8],
        consumer: &Bytes,
        after: Option<StreamId>,
        count: usize,
        now_ms: u64,
    ) -> Result<Result<Vec<(StreamId, Vec<(Bytes, Bytes)>)>, XReadGroupError>, WrongType> {
        let Some(entry) = self.live_entry_mut(key, now_ms) else {
            return Ok(Err(XReadGroupError::NoGroup));
        };
        let Value::Stream(stream) = &mut entry.value else {
            return Err(WrongType);
        };
        Ok(stream.read_group(group, consumer, after, count))
    }

    pub fn xack(
        &mut self,
        key: &[u8],
        group: &[u8],
        ids: &[StreamId],
        now_ms: u64,
    ) -> Result<Result<u64, XGroupError>, WrongType> {
        let Some(entry) = self.live_entry_mut(key, now_ms) else {
            return Ok(Ok(0));
        };
        let Value::Stream(stream) = &mut entry.value else {
            return Err(WrongType);
        };
        Ok(stream.ack(group, ids))
    }

    pub fn xpending_summary(
        &mut self,
        key: &[u8],
        group: &[u8],
        now_ms: u64,
    ) -> Result<Result<PendingSummary, XGroupError>, WrongType> {
        match self.typed_entry(key, now_ms, stream_check)? {
            None => Ok(Err(XGroupError::NoGroup)),
            Some(e) => {
                let Value::Stream(stream) = &e.value else {
                    unreachable!()
                };
                Ok(stream.pending_summary(group))
            }
        }
    }

    /// XINFO STREAM material: (length, last id, group count).
    pub fn xinfo(&mut self, key: &[u8], now_ms: u64) -> Result<Option<(usize, StreamId, usize)>, WrongType> {
        self.with_stream(key, now_ms, |s| {
            (s.len(), s.last_id(), s.group_names().count())
        })
    }

    fn with_stream<T>(
        &mut self,
        key: &[u8],
        now_ms: u64,
        f: impl FnOnce(&Stream) -> T,
    ) -> Result<Option<T>, WrongType> {
        match self.typed_entry(key, now_ms, stream_check)? {
            None => Ok(None),
            Some(e) => match &e.value {
                Value::Stream(s) => Ok(Some(f(s))),
                _ => unreachable!(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<(Bytes, Bytes)> {
        vec![(Bytes::from_static(b"f"), Bytes::from_static(b"v"))]
    }

    #[test]
    fn xadd_creates_and_xlen_counts() {
        let mut db = Db::new();
        let id = db.xadd(b"s", b"*", fields(), 42).unwrap();
        assert_eq!(id, StreamId::new(42, 0));
        assert_eq!(db.xlen(b"s", 0).unwrap(), 1);
        assert_eq!(db.type_name(b"s", 0), "stream");
    }

    #[test]
    fn failed_xadd_does_not_leave_empty_key() {
        let mut db = Db::new();
        assert!(db.xadd(b"s", b"0-0", fields(), 0).is_err());
        assert_eq!(db.type_name(b"s", 0), "none");
    }

    #[test]
    fn stream_key_survives_xdel_to_empty() {
        let mut db = Db::new();
        let id = db.xadd(b"s", b"*", fields(), 1).unwrap();
        assert_eq!(db.xdel(b"s", &[id], 0).unwrap(), 1);
        assert_eq!(db.xlen(b"s", 0).unwrap(), 0);
        assert_eq!(db.type_name(b"s", 0), "stream");
    }

    #[test]
    fn group_lifecycle() {
        let mut db = Db::new();
        // no key, no MKSTREAM → NOGROUP-shaped error
        assert_eq!(
            db.xgroup_create(b"s", Bytes::from_static(b"g"), StreamId::MIN, false, 0)
                .unwrap(),
            Err(XGroupError::NoGroup)
        );
        db.xadd(b"s", b"*", fields(), 5).unwrap();
        db.xgroup_create(b"s", Bytes::from_static(b"g"), StreamId::MIN, false, 0)
            .unwrap()
            .unwrap();
        assert_eq!(
            db.xgroup_create(b"s", Bytes::from_static(b"g"), StreamId::MIN, false, 0)
                .unwrap(),
            Err(XGroupError::BusyGroup)
        );
    }

    #[test]
    fn mkstream_creates_empty_stream() {
        let mut db = Db::new();
        db.xgroup_create(b"s", Bytes::from_static(b"g"), StreamId::MIN, true, 0)
            .unwrap()
            .unwrap();
        assert_eq!(db.type_name(b"s", 0), "stream");
        assert_eq!(db.xlen(b"s", 0).unwrap(), 0);
    }

    #[test]
    fn deliver_ack_roundtrip() {
        let mut db = Db::new();
        let id = db.xadd(b"s", b"*", fields(), 9).unwrap();
        db.xgroup_create(b"s", Bytes::from_static(b"g"), StreamId::MIN, false, 0)
            .unwrap()
            .unwrap();
        let consumer = Bytes::from_static(b"c");
        let got = db
            .xreadgroup(b"s", b"g", &consumer, None, 0, 0)
            .unwrap()
            .unwrap();
        assert_eq!(got.len(), 1);

        let sum = db.xpending_summary(b"s", b"g", 0).unwrap().unwrap();
        assert_eq!(sum.count, 1);
        assert_eq!(db.xack(b"s", b"g", &[id], 0).unwrap().unwrap(), 1);
        let sum = db.xpending_summary(b"s", b"g", 0).unwrap().unwrap();
        assert_eq!(sum.count, 0);
    }
}
