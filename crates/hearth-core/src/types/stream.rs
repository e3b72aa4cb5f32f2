//! Stream type: an ordered entry log plus consumer groups.
//!
//! Entries live in a `BTreeMap<StreamId, fields>` so range scans and
//! monotonicity checks fall out of the key order. Each consumer group
//! tracks its delivery cursor and a pending-entries list (PEL) mapping
//! delivered-but-unacknowledged ids to the consumer that received them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use bytes::Bytes;

/// A stream entry id: milliseconds part and sequence part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// The id immediately after this one in stream order.
    pub fn next(self) -> StreamId {
        if self.seq == u64::MAX {
            StreamId::new(self.ms + 1, 0)
        } else {
            StreamId::new(self.ms, self.seq + 1)
        }
    }

    /// Parses `ms`, `ms-seq`, or the open-range markers `-` / `+`.
    /// `default_seq` fills a missing sequence part (`0` for range
    /// starts, `u64::MAX` for range ends).
    pub fn parse(input: &[u8], default_seq: u64) -> Option<StreamId> {
        match input {
            b"-" => return Some(StreamId::MIN),
            b"+" => return Some(StreamId::MAX),
            _ => {}
        }
        let s = std::str::from_utf8(input).ok()?;
        match s.split_once('-') {
            Some((ms, seq)) => Some(StreamId::new(ms.parse().ok()?, seq.parse().ok()?)),
            None => Some(StreamId::new(s.parse().ok()?, default_seq)),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// One PEL entry: which consumer holds the id and how often it was
/// delivered.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub consumer: Bytes,
    pub delivery_count: u64,
}

/// A consumer group: delivery cursor plus pending-entries list.
#[derive(Debug, Clone, Default)]
pub struct ConsumerGroup {
    pub last_delivered: StreamId,
    pub pending: BTreeMap<StreamId, PendingEntry>,
}

/// XPENDING summary row: count, id bounds, distinct consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSummary {
    pub count: u64,
    pub min_id: Option<StreamId>,
    pub max_id: Option<StreamId>,
    pub consumers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XAddError {
    /// Explicit id not greater than the stream's top id.
    IdTooSmall,
    /// `0-0` is never a valid entry id.
    IdZero,
    /// Could not parse the id spec.
    BadId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XGroupError {
    /// XGROUP CREATE on an existing group.
    BusyGroup,
    /// Operation against a missing group.
    NoGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XReadGroupError {
    NoGroup,
    BadId,
}

#[derive(Debug, Clone, Default)]
pub struct Stream {
    entries: BTreeMap<StreamId, Vec<(Bytes, Bytes)>>,
    /// Highest id ever assigned, including deleted entries. New ids must
    /// stay strictly above it.
    last_id: StreamId,
    groups: HashMap<Bytes, ConsumerGroup>,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_id(&self) -> StreamId {
        self.last_id
    }

    /// Appends an entry. `id_spec` is `*` (auto-assign at `now_ms`,
    /// strictly monotonic) or an explicit `ms[-seq]` which must exceed
    /// the current top id.
    pub fn add(
        &mut self,
        id_spec: &[u8],
        fields: Vec<(Bytes, Bytes)>,
        now_ms: u64,
    ) -> Result<StreamId, XAddError> {
        let id = if id_spec == b"*" {
            if now_ms > self.last_id.ms {
                StreamId::new(now_ms, 0)
            } else {
                StreamId::new(self.last_id.ms, self.last_id.seq + 1)
            }
        } else {
            // a bare ms part auto-fills seq: "5" means 5-0, unless the
            // top entry shares the ms, in which case "5-*" semantics
            // would apply; explicit ids here take seq 0 like the wire
            // format documents
            let explicit = match std::str::from_utf8(id_spec)
                .ok()
                .and_then(|s| match s.strip_suffix("-*") {
                    Some(ms) => ms.parse::<u64>().ok().map(|ms| {
                        if ms == self.last_id.ms {
                            StreamId::new(ms, self.last_id.seq + 1)
                        } else {
                            StreamId::new(ms, 0)
                        }
                    }),
                    None => StreamId::parse(s.as_bytes(), 0),
                }) {
                Some(id) => id,
                None => return Err(XAddError::BadId),
            };
            explicit
        };

        if id == StreamId::MIN {
            return Err(XAddError::IdZero);
        }
        // top-id comparison covers deleted entries too: last_id never
        // resets, so ids stay monotonic across XDEL
        if id <= self.last_id && self.last_id != StreamId::MIN {
            return Err(XAddError::IdTooSmall);
        }

        self.entries.insert(id, fields);
        self.last_id = id;
        Ok(id)
    }

    /// Entries in `[start, stop]`, optionally reversed, up to `count`
    /// (0 = unlimited).
    pub fn range(
        &self,
        start: StreamId,
        stop: StreamId,
        rev: bool,
        count: usize,
    ) -> Vec<(StreamId, Vec<(Bytes, Bytes)>)> {
        let iter = self.entries.range(start..=stop);
        let take = if count == 0 { usize::MAX } else { count };
        if rev {
            iter.rev()
                .take(take)
                .map(|(id, f)| (*id, f.clone()))
                .collect()
        } else {
            iter.take(take).map(|(id, f)| (*id, f.clone())).collect()
        }
    }

    /// Deletes entries by id, cleaning them out of every group's PEL.
    /// Returns how many existed.
    pub fn delete(&mut self, ids: &[StreamId]) -> u64 {
        let mut removed = 0;
        for id in ids {
            if self.entries.remove(id).is_some() {
                removed += 1;
            }
            for group in self.groups.values_mut() {
                group.pending.remove(id);
            }
        }
        removed
    }

    pub fn group_create(&mut self, name: Bytes, start: StreamId) -> Result<(), XGroupError> {
        if self.groups.contains_key(&name) {
            return Err(XGroupError::BusyGroup);
        }
        self.groups.insert(
            name,
            ConsumerGroup {
                last_delivered: start,
                pending: BTreeMap::new(),
            },
        );
        Ok(())
    }

    pub fn group_set_id(&mut self, name: &[u8], id: StreamId) -> Result<(), XGroupError> {
        match self.groups.get_mut(name) {
            Some(g) => {
                g.last_delivered = id;
                Ok(())
            }
            None => Err(XGroupError::NoGroup),
        }
    }

    pub fn group_exists(&self, name: &[u8]) -> bool {
        self.groups.contains_key(name)
    }

    pub fn group_names(&self) -> impl Iterator<Item = &Bytes> {
        self.groups.keys()
    }

    /// XREADGROUP with the `>` cursor: delivers entries after the
    /// group's cursor, records them in the PEL under `consumer`, and
    /// advances `last_delivered`. With an explicit id, re-delivers the
    /// consumer's own pending entries after that id without touching
    /// the cursor.
    pub fn read_group(
        &mut self,
        group: &[u8],
        consumer: &Bytes,
        after: Option<StreamId>,
        count: usize,
    ) -> Result<Vec<(StreamId, Vec<(Bytes, Bytes)>)>, XReadGroupError> {
        let g = self
            .groups
            .get_mut(group)
            .ok_or(XReadGroupError::NoGroup)?;
        let take = if count == 0 { usize::MAX } else { count };

        match after {
            None => {
                // ">": new entries past the group cursor
                let start = g.last_delivered.next();
                let out: Vec<_> = self
                    .entries
                    .range(start..)
                    .take(take)
                    .map(|(id, f)| (*id, f.clone()))
                    .collect();
                for (id, _) in &out {
                    g.pending.insert(
                        *id,
                        PendingEntry {
                            consumer: consumer.clone(),
                            delivery_count: 1,
                        },
                    );
                    if *id > g.last_delivered {
                        g.last_delivered = *id;
                    }
                }
                Ok(out)
            }
            Some(from) => {
                let ids: Vec<StreamId> = g
                    .pending
                    .range(from.next()..)
                    .filter(|(_, p)| p.consumer == *consumer)
                    .map(|(id, _)| *id)
                    .take(take)
                    .collect();
                let mut out = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(p) = g.pending.get_mut(&id) {
                        p.delivery_count += 1;
                    }
                    if let Some(fields) = self.entries.get(&id) {
                        out.push((id, fields.clone()));
                    }
                }
                Ok(out)
            }
        }
    }

    /// Removes acknowledged ids from the group's PEL. Returns how many
    /// were actually pending.
    pub fn ack(&mut self, group: &[u8], ids: &[StreamId]) -> Result<u64, XGroupError> {
        let g = self.groups.get_mut(group).ok_or(XGroupError::NoGroup)?;
        let mut acked = 0;
        for id in ids {
            if g.pending.remove(id).is_some() {
                acked += 1;
            }
        }
        Ok(acked)
    }

    pub fn pending_summary(&self, group: &[u8]) -> Result<PendingSummary, XGroupError> {
        let g = self.groups.get(group).ok_or(XGroupError::NoGroup)?;
        let mut consumers: Vec<&Bytes> = g.pending.values().map(|p| &p.consumer).collect();
        consumers.sort();
        consumers.dedup();
        Ok(PendingSummary {
            count: g.pending.len() as u64,
            min_id: g.pending.keys().next().copied(),
            max_id: g.pending.keys().next_back().copied(),
            consumers: consumers.len(),
        })
    }

    /// Group cursor and PEL, for persistence encoding.
    pub fn group_state(
        &self,
        name: &[u8],
    ) -> Option<(StreamId, &BTreeMap<StreamId, PendingEntry>)> {
        self.groups.get(name).map(|g| (g.last_delivered, &g.pending))
    }

    /// Restores the top-id watermark when decoding a snapshot; entries
    /// deleted before the snapshot must keep blocking their ids.
    pub fn force_last_id(&mut self, id: StreamId) {
        if id > self.last_id {
            self.last_id = id;
        }
    }

    /// Re-inserts one PEL row when decoding a snapshot.
    pub fn restore_pending(&mut self, group: &[u8], id: StreamId, entry: PendingEntry) {
        if let Some(g) = self.groups.get_mut(group) {
            g.pending.insert(id, entry);
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.entries
            .values()
            .map(|fields| {
                32 + fields
                    .iter()
                    .map(|(f, v)| f.len() + v.len() + 16)
                    .sum::<usize>()
            })
            .sum()
    }
}
