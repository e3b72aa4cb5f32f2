//! Value digests.
//!
//! A digest is a short hex string summarizing a key's externally
//! observable state (type, absolute TTL, canonical content). Two values
//! that look the same to clients hash the same, which is what WATCH
//! invalidation and replication conformance checks compare. The
//! canonical form sorts hashes and sets, orders sorted sets by member,
//! and walks lists and streams positionally; SHA-1 keeps the digest
//! stable across processes.

use sha1::{Digest, Sha1};

use super::Db;
use crate::time::NO_EXPIRY;
use crate::types::Value;

impl Db {
    /// Digest of one live key, or `None` if the key is absent.
    pub fn debug_digest_value(&mut self, key: &[u8], now_ms: u64) -> Option<String> {
        let entry = self.live_entry(key, now_ms)?;

        let mut canon: Vec<u8> = Vec::with_capacity(64);
        canon.extend_from_slice(type_tag(&entry.value).as_bytes());
        canon.push(b'|');
        if entry.expire_at_ms == NO_EXPIRY {
            canon.extend_from_slice(b"ttl=-1|");
        } else {
            canon.extend_from_slice(format!("ttl={}|", entry.expire_at_ms).as_bytes());
        }

        match &entry.value {
            Value::String(s) => canon.extend_from_slice(s),
            Value::List(list) => {
                for v in list {
                    canon.extend_from_slice(v);
                    canon.push(b';');
                }
            }
            Value::Hash(hash) => {
                let mut items: Vec<_> = hash.iter().collect();
                items.sort_by(|a, b| a.0.cmp(b.0));
                for (f, v) in items {
                    canon.extend_from_slice(f);
                    canon.push(b'=');
                    canon.extend_from_slice(v);
                    canon.push(b';');
                }
            }
            Value::Set(set) => {
                let mut items: Vec<_> = set.iter().collect();
                items.sort();
                for m in items {
                    canon.extend_from_slice(m);
                    canon.push(b';');
                }
            }
            Value::Zset(zset) => {
                let mut items: Vec<_> = zset.iter().collect();
                items.sort_by(|a, b| a.0.cmp(b.0));
                for (m, score) in items {
                    canon.extend_from_slice(m);
                    canon.push(b'=');
                    canon.extend_from_slice(format!("{score}").as_bytes());
                    canon.push(b';');
                }
            }
            Value::Stream(stream) => {
                for (id, fields) in stream.range(
                    crate::types::stream::StreamId::MIN,
                    crate::types::stream::StreamId::MAX,
                    false,
                    0,
                ) {
                    canon.extend_from_slice(id.to_string().as_bytes());
                    canon.push(b'{');
                    for (f, v) in fields {
                        canon.extend_from_slice(&f);
                        canon.push(b'=');
                        canon.extend_from_slice(&v);
                        canon.push(b';');
                    }
                    canon.push(b'}');
                }
            }
        }

        let mut hasher = Sha1::new();
        hasher.update(&canon);
        let out = hasher.finalize();
        Some(hex(&out))
    }
}

fn type_tag(v: &Value) -> &'static str {
    // numeric tags keep digests short and type-distinct
    match v {
        Value::String(_) => "0",
        Value::List(_) => "1",
        Value::Set(_) => "2",
        Value::Hash(_) => "3",
        Value::Zset(_) => "4",
        Value::Stream(_) => "5",
    }
}

fn hex(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for b in data {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::keyspace::{Db, SetOptions};
    use crate::types::sorted_set::ZAddFlags;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn absent_key_has_no_digest() {
        let mut db = Db::new();
        assert_eq!(db.debug_digest_value(b"nope", 0), None);
    }

    #[test]
    fn equal_state_equal_digest() {
        let mut a = Db::new();
        let mut b_db = Db::new();
        // build the same hash in different insertion orders
        a.hset(b"h", &[(b("x"), b("1")), (b("y"), b("2"))], 0).unwrap();
        b_db.hset(b"h", &[(b("y"), b("2")), (b("x"), b("1"))], 0).unwrap();
        assert_eq!(
            a.debug_digest_value(b"h", 0),
            b_db.debug_digest_value(b"h", 0)
        );
    }

    #[test]
    fn content_change_changes_digest() {
        let mut db = Db::new();
        db.set(b"k", b("v1"), SetOptions::default(), 0).unwrap();
        let before = db.debug_digest_value(b"k", 0).unwrap();
        db.set(b"k", b("v2"), SetOptions::default(), 0).unwrap();
        assert_ne!(before, db.debug_digest_value(b"k", 0).unwrap());
    }

    #[test]
    fn type_change_changes_digest() {
        let mut db = Db::new();
        db.set(b"k", b("x"), SetOptions::default(), 0).unwrap();
        let as_string = db.debug_digest_value(b"k", 0).unwrap();
        db.del(b"k", 0);
        db.sadd(b"k", &[b("x")], 0).unwrap();
        assert_ne!(as_string, db.debug_digest_value(b"k", 0).unwrap());
    }

    #[test]
    fn zset_digest_ignores_insertion_order() {
        let mut a = Db::new();
        let mut c = Db::new();
        for (db, order) in [(&mut a, [1.0, 2.0]), (&mut c, [2.0, 1.0])] {
            for (i, score) in order.iter().enumerate() {
                let member = if *score == 1.0 { "one" } else { "two" };
                db.zadd_one(b"z", *score, b(member), ZAddFlags::default(), false, 0)
                    .unwrap();
                let _ = i;
            }
        }
        assert_eq!(a.debug_digest_value(b"z", 0), c.debug_digest_value(b"z", 0));
    }
}
