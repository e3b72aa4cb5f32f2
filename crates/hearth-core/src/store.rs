//! The store: sixteen databases behind one clock.
//!
//! Owns cross-database operations (SWAPDB, MOVE, COPY, FLUSHALL), the
//! active-expire cycle, and the collection point for lazily expired
//! keys that the dispatcher replicates as DELs.

use std::sync::Arc;

use bytes::Bytes;

use crate::keyspace::Db;
use crate::time::Clock;

/// Redis-compatible fixed database count.
pub const DB_COUNT: usize = 16;

#[derive(Debug)]
pub struct Store {
    dbs: Vec<Db>,
    clock: Arc<Clock>,
}

impl Store {
    pub fn new(clock: Arc<Clock>) -> Self {
        Self {
            dbs: (0..DB_COUNT).map(|_| Db::new()).collect(),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn db(&mut self, index: usize) -> &mut Db {
        &mut self.dbs[index]
    }

    pub fn db_count(&self) -> usize {
        self.dbs.len()
    }

    /// SWAPDB: exchanges two databases wholesale.
    pub fn swap_dbs(&mut self, a: usize, b: usize) {
        if a != b {
            self.dbs.swap(a, b);
        }
    }

    /// MOVE: relocates a key to another database. Fails if the key is
    /// missing or already present in the destination.
    pub fn move_key(&mut self, src_db: usize, dst_db: usize, key: &[u8]) -> bool {
        if src_db == dst_db {
            return false;
        }
        let now = self.now_ms();
        if self.dbs[dst_db].exists(key, now) {
            return false;
        }
        let Some(entry) = self.dbs[src_db].snapshot_entry(key, now) else {
            return false;
        };
        self.dbs[src_db].del(key, now);
        self.dbs[dst_db].put_entry(Bytes::copy_from_slice(key), entry);
        true
    }

    /// COPY: duplicates a key, optionally across databases, optionally
    /// replacing the destination.
    pub fn copy_key(
        &mut self,
        src_db: usize,
        dst_db: usize,
        src: &[u8],
        dst: &[u8],
        replace: bool,
    ) -> bool {
        let now = self.now_ms();
        if src_db == dst_db && src == dst {
            return false;
        }
        let Some(entry) = self.dbs[src_db].snapshot_entry(src, now) else {
            return false;
        };
        if self.dbs[dst_db].exists(dst, now) {
            if !replace {
                return false;
            }
            self.dbs[dst_db].del(dst, now);
        }
        self.dbs[dst_db].put_entry(Bytes::copy_from_slice(dst), entry);
        true
    }

    pub fn flush_all(&mut self) {
        for db in &mut self.dbs {
            db.clear();
        }
    }

    /// One active-expire pass: each database gets `budget_per_db`
    /// entries scanned. Returns the total number of keys removed.
    pub fn active_expire_cycle(&mut self, budget_per_db: usize) -> usize {
        let now = self.now_ms();
        self.dbs
            .iter_mut()
            .map(|db| db.active_expire(budget_per_db, now))
            .sum()
    }

    /// Drains every database's lazily-expired-key log, tagged with the
    /// database index, for DEL replication.
    pub fn collect_expired_keys(&mut self) -> Vec<(usize, Bytes)> {
        let mut out = Vec::new();
        for (idx, db) in self.dbs.iter_mut().enumerate() {
            for key in db.take_expired() {
                out.push((idx, key));
            }
        }
        out
    }

    /// Total key count across databases.
    pub fn total_keys(&self) -> usize {
        self.dbs.iter().map(|db| db.len()).sum()
    }

    /// Payload-size estimate across databases, for the OOM gate and
    /// INFO's used_memory.
    pub fn used_memory(&self) -> usize {
        self.dbs.iter().map(|db| db.used_bytes()).sum()
    }

    /// Per-db (index, keys, keys-with-expiry) rows for INFO's keyspace
    /// section; empty databases are skipped.
    pub fn keyspace_stats(&self) -> Vec<(usize, usize, usize)> {
        self.dbs
            .iter()
            .enumerate()
            .filter(|(_, db)| !db.is_empty())
            .map(|(i, db)| (i, db.len(), db.keys_with_expiry()))
            .collect()
    }
}
