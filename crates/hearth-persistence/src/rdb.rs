//! Keyspace snapshot codec (RDB).
//!
//! File layout: `REDIS0010`, AUX fields, then per non-empty database a
//! `SELECTDB` + `RESIZEDB` section followed by `[EXPIRETIME_MS] <type>
//! <key> <value>` records, then `EOF` and a little-endian CRC-64
//! trailer. The value codec is shared with DUMP/RESTORE. The reader
//! additionally accepts the legacy encodings a compatible Redis emits
//! (ziplist/listpack collections, intsets, old ascii doubles).

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use bytes::Bytes;
use tracing::{debug, info};

use hearth_core::types::stream::{PendingEntry, Stream, StreamId};
use hearth_core::types::Value;
use hearth_core::{Entry, SortedSet, Store, ZAddFlags};

use crate::format::{crc64, listpack_decode, listpack_encode, FormatError, Reader, Writer};

pub const RDB_VERSION: u16 = 10;

// opcodes
const OP_AUX: u8 = 250;
const OP_RESIZEDB: u8 = 251;
const OP_EXPIRETIME_MS: u8 = 252;
const OP_EXPIRETIME: u8 = 253;
const OP_SELECTDB: u8 = 254;
const OP_EOF: u8 = 255;

// value type tags
const T_STRING: u8 = 0;
const T_LIST: u8 = 1;
const T_SET: u8 = 2;
const T_ZSET: u8 = 3;
const T_HASH: u8 = 4;
const T_ZSET_2: u8 = 5;
const T_LIST_ZIPLIST: u8 = 10;
const T_SET_INTSET: u8 = 11;
const T_ZSET_ZIPLIST: u8 = 12;
const T_HASH_ZIPLIST: u8 = 13;
const T_LIST_QUICKLIST: u8 = 15;
const T_HASH_LISTPACK: u8 = 16;
const T_ZSET_LISTPACK: u8 = 17;
const T_LIST_QUICKLIST_2: u8 = 18;
const T_SET_LISTPACK: u8 = 20;
/// Stream tag; the payload layout is this codec's own stable form.
const T_STREAM: u8 = 21;

// ---------------------------------------------------------------------------
// value codec
// ---------------------------------------------------------------------------

/// Writes `<type byte><payload>` for one value. Lists go out as a
/// single-node quicklist in snapshots (`compact_lists`) and as a plain
/// element sequence in DUMP payloads, matching what each consumer
/// expects to re-read.
pub(crate) fn write_value(w: &mut Writer, value: &Value, compact_lists: bool) {
    match value {
        Value::String(s) => {
            w.put_u8(T_STRING);
            w.put_string(s);
        }
        Value::List(list) => {
            if compact_lists {
                w.put_u8(T_LIST_QUICKLIST_2);
                w.put_length(1); // node count
                w.put_length(2); // container: PACKED
                let entries: Vec<&[u8]> = list.iter().map(|e| e.as_ref()).collect();
                w.put_string(&listpack_encode(&entries));
            } else {
                w.put_u8(T_LIST);
                w.put_length(list.len() as u64);
                for item in list {
                    w.put_string(item);
                }
            }
        }
        Value::Set(set) => {
            w.put_u8(T_SET);
            let mut members: Vec<&Bytes> = set.iter().collect();
            members.sort();
            w.put_length(members.len() as u64);
            for m in members {
                w.put_string(m);
            }
        }
        Value::Hash(hash) => {
            w.put_u8(T_HASH);
            let mut fields: Vec<(&Bytes, &Bytes)> = hash.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));
            w.put_length(fields.len() as u64);
            for (f, v) in fields {
                w.put_string(f);
                w.put_string(v);
            }
        }
        Value::Zset(zset) => {
            w.put_u8(T_ZSET_2);
            w.put_length(zset.len() as u64);
            for (member, score) in zset.iter() {
                w.put_string(member);
                w.put_double(score);
            }
        }
        Value::Stream(stream) => {
            w.put_u8(T_STREAM);
            write_stream(w, stream);
        }
    }
}

fn write_stream(w: &mut Writer, stream: &Stream) {
    let entries = stream.range(StreamId::MIN, StreamId::MAX, false, 0);
    w.put_length(entries.len() as u64);
    for (id, fields) in &entries {
        w.put_length(id.ms);
        w.put_length(id.seq);
        w.put_length(fields.len() as u64);
        for (f, v) in fields {
            w.put_string(f);
            w.put_string(v);
        }
    }
    let last = stream.last_id();
    w.put_length(last.ms);
    w.put_length(last.seq);

    let groups: Vec<&Bytes> = {
        let mut g: Vec<&Bytes> = stream.group_names().collect();
        g.sort();
        g
    };
    w.put_length(groups.len() as u64);
    for name in groups {
        w.put_string(name);
        let (cursor, pending) = stream.group_state(name).expect("group just listed");
        w.put_length(cursor.ms);
        w.put_length(cursor.seq);
        w.put_length(pending.len() as u64);
        for (id, p) in pending {
            w.put_length(id.ms);
            w.put_length(id.seq);
            w.put_string(&p.consumer);
            w.put_length(p.delivery_count);
        }
    }
}

/// Reads `<payload>` for the given type tag; the tag byte itself has
/// already been consumed.
pub(crate) fn read_value(r: &mut Reader<'_>, tag: u8) -> Result<Value, FormatError> {
    match tag {
        T_STRING => Ok(Value::String(Bytes::from(r.take_string()?))),
        T_LIST => {
            let len = r.take_length()?;
            let mut list = VecDeque::with_capacity(len as usize);
            for _ in 0..len {
                list.push_back(Bytes::from(r.take_string()?));
            }
            Ok(Value::List(list))
        }
        T_LIST_QUICKLIST | T_LIST_QUICKLIST_2 => {
            let nodes = r.take_length()?;
            let mut list = VecDeque::new();
            for _ in 0..nodes {
                if tag == T_LIST_QUICKLIST_2 {
                    let _container = r.take_length()?;
                }
                let blob = r.take_string()?;
                for item in listpack_decode(&blob)? {
                    list.push_back(Bytes::from(item));
                }
            }
            Ok(Value::List(list))
        }
        T_LIST_ZIPLIST => {
            let blob = r.take_string()?;
            let mut list = VecDeque::new();
            for item in listpack_decode(&blob)? {
                list.push_back(Bytes::from(item));
            }
            Ok(Value::List(list))
        }
        T_SET => {
            let len = r.take_length()?;
            let mut set = HashSet::with_capacity(len as usize);
            for _ in 0..len {
                set.insert(Bytes::from(r.take_string()?));
            }
            Ok(Value::Set(set))
        }
        T_SET_INTSET => {
            let blob = r.take_string()?;
            Ok(Value::Set(decode_intset(&blob)?))
        }
        T_SET_LISTPACK => {
            let blob = r.take_string()?;
            let mut set = HashSet::new();
            for item in listpack_decode(&blob)? {
                set.insert(Bytes::from(item));
            }
            Ok(Value::Set(set))
        }
        T_HASH => {
            let len = r.take_length()?;
            let mut hash = HashMap::with_capacity(len as usize);
            for _ in 0..len {
                let f = Bytes::from(r.take_string()?);
                let v = Bytes::from(r.take_string()?);
                hash.insert(f, v);
            }
            Ok(Value::Hash(hash))
        }
        T_HASH_LISTPACK | T_HASH_ZIPLIST => {
            let blob = r.take_string()?;
            let flat = listpack_decode(&blob)?;
            let mut hash = HashMap::with_capacity(flat.len() / 2);
            let mut it = flat.into_iter();
            while let (Some(f), Some(v)) = (it.next(), it.next()) {
                hash.insert(Bytes::from(f), Bytes::from(v));
            }
            Ok(Value::Hash(hash))
        }
        T_ZSET | T_ZSET_2 => {
            let len = r.take_length()?;
            let mut zset = SortedSet::new();
            for _ in 0..len {
                let member = Bytes::from(r.take_string()?);
                let score = if tag == T_ZSET_2 {
                    r.take_double()?
                } else {
                    r.take_double_old()?
                };
                zset.add(member, score, ZAddFlags::default());
            }
            Ok(Value::Zset(zset))
        }
        T_ZSET_LISTPACK | T_ZSET_ZIPLIST => {
            let blob = r.take_string()?;
            let flat = listpack_decode(&blob)?;
            let mut zset = SortedSet::new();
            let mut it = flat.into_iter();
            while let (Some(m), Some(s)) = (it.next(), it.next()) {
                let score = std::str::from_utf8(&s)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(FormatError::InvalidData("bad listpack zset score"))?;
                zset.add(Bytes::from(m), score, ZAddFlags::default());
            }
            Ok(Value::Zset(zset))
        }
        T_STREAM => read_stream(r),
        other => Err(FormatError::UnknownTag(other)),
    }
}

fn read_stream(r: &mut Reader<'_>) -> Result<Value, FormatError> {
    let mut stream = Stream::new();
    let entries = r.take_length()?;
    for _ in 0..entries {
        let ms = r.take_length()?;
        let seq = r.take_length()?;
        let nfields = r.take_length()?;
        let mut fields = Vec::with_capacity(nfields as usize);
        for _ in 0..nfields {
            let f = Bytes::from(r.take_string()?);
            let v = Bytes::from(r.take_string()?);
            fields.push((f, v));
        }
        let spec = format!("{ms}-{seq}");
        stream
            .add(spec.as_bytes(), fields, 0)
            .map_err(|_| FormatError::InvalidData("non-monotonic stream entry"))?;
    }
    let last_ms = r.take_length()?;
    let last_seq = r.take_length()?;
    stream.force_last_id(StreamId::new(last_ms, last_seq));

    let groups = r.take_length()?;
    for _ in 0..groups {
        let name = Bytes::from(r.take_string()?);
        let cursor = StreamId::new(r.take_length()?, r.take_length()?);
        stream
            .group_create(name.clone(), cursor)
            .map_err(|_| FormatError::InvalidData("duplicate stream group"))?;
        let pel = r.take_length()?;
        for _ in 0..pel {
            let id = StreamId::new(r.take_length()?, r.take_length()?);
            let consumer = Bytes::from(r.take_string()?);
            let delivery_count = r.take_length()?;
            stream.restore_pending(
                &name,
                id,
                PendingEntry {
                    consumer,
                    delivery_count,
                },
            );
        }
    }
    Ok(Value::Stream(stream))
}

fn decode_intset(blob: &[u8]) -> Result<HashSet<Bytes>, FormatError> {
    if blob.len() < 8 {
        return Err(FormatError::InvalidData("intset too short"));
    }
    let encoding = u32::from_le_bytes(blob[0..4].try_into().unwrap()) as usize;
    let count = u32::from_le_bytes(blob[4..8].try_into().unwrap()) as usize;
    if !matches!(encoding, 2 | 4 | 8) {
        return Err(FormatError::InvalidData("bad intset encoding"));
    }
    let mut set = HashSet::with_capacity(count);
    for i in 0..count {
        let off = 8 + i * encoding;
        let raw = blob
            .get(off..off + encoding)
            .ok_or(FormatError::InvalidData("intset truncated"))?;
        let v: i64 = match encoding {
            2 => i16::from_le_bytes(raw.try_into().unwrap()) as i64,
            4 => i32::from_le_bytes(raw.try_into().unwrap()) as i64,
            _ => i64::from_le_bytes(raw.try_into().unwrap()),
        };
        set.insert(Bytes::from(v.to_string().into_bytes()));
    }
    Ok(set)
}

// ---------------------------------------------------------------------------
// snapshot
// ---------------------------------------------------------------------------

/// Serializes the whole keyspace.
pub fn encode_snapshot(store: &mut Store) -> Vec<u8> {
    let now = store.now_ms();
    let mut w = Writer::new();
    w.put_raw(format!("REDIS{RDB_VERSION:04}").as_bytes());

    let mut aux = |w: &mut Writer, key: &str, val: &str| {
        w.put_u8(OP_AUX);
        w.put_string(key.as_bytes());
        w.put_string(val.as_bytes());
    };
    aux(&mut w, "redis-ver", "7.2.5");
    aux(&mut w, "redis-bits", "64");

    for dbi in 0..store.db_count() {
        let db = store.db(dbi);
        if db.is_empty() {
            continue;
        }
        w.put_u8(OP_SELECTDB);
        w.put_length(dbi as u64);
        w.put_u8(OP_RESIZEDB);
        w.put_length(db.len() as u64);
        w.put_length(db.keys_with_expiry() as u64);

        // deterministic key order keeps snapshots byte-stable
        let mut keys: Vec<Bytes> = db.iter_entries().map(|(k, _)| k.clone()).collect();
        keys.sort();
        for key in keys {
            let Some(entry) = db.snapshot_entry(&key, now) else {
                continue;
            };
            if entry.expire_at_ms != 0 {
                w.put_u8(OP_EXPIRETIME_MS);
                w.put_u64_le(entry.expire_at_ms);
            }
            // write_value emits the type byte first, but the key comes
            // between tag and payload on disk, so stage the value
            let mut vw = Writer::new();
            write_value(&mut vw, &entry.value, true);
            let value_bytes = vw.into_bytes();
            w.put_u8(value_bytes[0]);
            w.put_string(&key);
            w.put_raw(&value_bytes[1..]);
        }
    }

    w.put_u8(OP_EOF);
    let checksum = crc64(w.as_bytes());
    w.put_u64_le(checksum);
    w.into_bytes()
}

/// Replaces the keyspace with the snapshot's contents.
pub fn decode_snapshot(store: &mut Store, data: &[u8]) -> Result<(), FormatError> {
    if data.len() < 9 || &data[0..5] != b"REDIS" {
        return Err(FormatError::InvalidMagic);
    }
    let version: u32 = std::str::from_utf8(&data[5..9])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(FormatError::InvalidMagic)?;
    if !(1..=12).contains(&version) {
        return Err(FormatError::UnsupportedVersion(version));
    }

    // trailer: EOF opcode + 8-byte CRC of everything before the CRC.
    // an all-zero stored checksum means checksumming was disabled.
    if data.len() >= 17 {
        let stored = u64::from_le_bytes(data[data.len() - 8..].try_into().unwrap());
        if stored != 0 {
            let actual = crc64(&data[..data.len() - 8]);
            if stored != actual {
                return Err(FormatError::ChecksumMismatch {
                    expected: stored,
                    actual,
                });
            }
        }
    }

    store.flush_all();
    let mut r = Reader::new(&data[9..]);
    let mut current_db = 0usize;
    let mut pending_expire: Option<u64> = None;

    while !r.is_eof() {
        let op = r.take_u8()?;
        match op {
            OP_EOF => break,
            OP_AUX => {
                let _k = r.take_string()?;
                let _v = r.take_string()?;
            }
            OP_SELECTDB => {
                current_db = r.take_length()? as usize;
                if current_db >= store.db_count() {
                    return Err(FormatError::InvalidData("db index out of range"));
                }
            }
            OP_RESIZEDB => {
                let _db_size = r.take_length()?;
                let _expire_size = r.take_length()?;
            }
            OP_EXPIRETIME_MS => {
                pending_expire = Some(r.take_u64_le()?);
            }
            OP_EXPIRETIME => {
                pending_expire = Some(r.take_u32_le()? as u64 * 1000);
            }
            tag => {
                let key = Bytes::from(r.take_string()?);
                let value = read_value(&mut r, tag)?;
                let mut entry = Entry::new(value);
                entry.expire_at_ms = pending_expire.take().unwrap_or(0);
                store.db(current_db).put_entry(key, entry);
            }
        }
    }
    debug!(keys = store.total_keys(), "snapshot decoded");
    Ok(())
}

/// Writes a snapshot to `path`, replacing any existing file.
pub fn save_rdb_file(store: &mut Store, path: &Path) -> Result<(), FormatError> {
    let data = encode_snapshot(store);
    std::fs::write(path, &data)?;
    info!(path = %path.display(), bytes = data.len(), "snapshot saved");
    Ok(())
}

/// Loads a snapshot from `path` if it exists; reports whether it did.
pub fn load_rdb_file(store: &mut Store, path: &Path) -> Result<bool, FormatError> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    decode_snapshot(store, &data)?;
    info!(path = %path.display(), keys = store.total_keys(), "snapshot loaded");
    Ok(true)
}
