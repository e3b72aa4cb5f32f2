//! Sorted set: dual-indexed by score and member.
//!
//! A `BTreeMap<(OrderedFloat<f64>, Bytes), ()>` provides ordered
//! iteration with ties broken lexicographically by member, and a
//! `HashMap<Bytes, OrderedFloat<f64>>` provides O(1) member→score
//! lookups. Simpler and more obviously correct than a hand-rolled skip
//! list.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use ordered_float::OrderedFloat;

/// Flags that control ZADD behavior. NX/XX and GT/LT are mutually
/// exclusive pairs; the command layer validates that before calling in.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZAddFlags {
    /// Only add new members.
    pub nx: bool,
    /// Only update existing members.
    pub xx: bool,
    /// Only update when the new score is greater than the current one.
    pub gt: bool,
    /// Only update when the new score is less than the current one.
    pub lt: bool,
}

/// Result of a single ZADD member operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZAddOutcome {
    pub added: bool,
    pub updated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    tree: BTreeMap<(OrderedFloat<f64>, Bytes), ()>,
    scores: HashMap<Bytes, OrderedFloat<f64>>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or updates one member under the given flags. The score
    /// actually stored is returned through `ZAddOutcome` semantics:
    /// unchanged members report neither added nor updated.
    pub fn add(&mut self, member: Bytes, score: f64, flags: ZAddFlags) -> ZAddOutcome {
        let new_score = OrderedFloat(score);
        if let Some(&old_score) = self.scores.get(&member) {
            if flags.nx
                || (flags.gt && new_score <= old_score)
                || (flags.lt && new_score >= old_score)
                || new_score == old_score
            {
                return ZAddOutcome {
                    added: false,
                    updated: false,
                };
            }
            self.tree.remove(&(old_score, member.clone()));
            self.scores.insert(member.clone(), new_score);
            self.tree.insert((new_score, member), ());
            ZAddOutcome {
                added: false,
                updated: true,
            }
        } else {
            if flags.xx {
                return ZAddOutcome {
                    added: false,
                    updated: false,
                };
            }
            self.scores.insert(member.clone(), new_score);
            self.tree.insert((new_score, member), ());
            ZAddOutcome {
                added: true,
                updated: false,
            }
        }
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        if let Some(score) = self.scores.remove(member) {
            self.tree.remove(&(score, Bytes::copy_from_slice(member)));
            true
        } else {
            false
        }
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).map(|s| s.0)
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.scores.contains_key(member)
    }

    /// Members in rank order (score ascending, member lexicographic).
    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, f64)> {
        self.tree.keys().map(|(score, member)| (member, score.0))
    }

    /// Members in reverse rank order.
    pub fn iter_rev(&self) -> impl Iterator<Item = (&Bytes, f64)> {
        self.tree
            .keys()
            .rev()
            .map(|(score, member)| (member, score.0))
    }

    /// Pops up to `count` members from the low end (`max = false`) or
    /// the high end (`max = true`).
    pub fn pop(&mut self, count: usize, max: bool) -> Vec<(Bytes, f64)> {
        let mut out = Vec::with_capacity(count.min(self.len()));
        for _ in 0..count {
            let key = if max {
                self.tree.keys().next_back().cloned()
            } else {
                self.tree.keys().next().cloned()
            };
            let Some(key) = key else { break };
            self.tree.remove(&key);
            self.scores.remove(&key.1);
            out.push((key.1, key.0 .0));
        }
        out
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}
