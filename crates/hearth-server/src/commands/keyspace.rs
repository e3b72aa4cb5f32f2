//! Generic key-level command handlers.

use bytes::Bytes;

use hearth_core::{Entry, ExpireFlags, TtlState};
use hearth_persistence::{dump_entry, restore_entry};
use hearth_protocol::Reply;

use crate::dispatch::{arg, Ctx, Verdict};

use super::{err, reply, wrongtype};

pub fn del(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    let db = ctx.shared.store.db(ctx.session.db);
    let removed = args[1..].iter().filter(|key| db.del(key, now)).count();
    reply(Reply::Integer(removed as i64))
}

pub fn exists(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    let db = ctx.shared.store.db(ctx.session.db);
    let found = args[1..].iter().filter(|key| db.exists(key, now)).count();
    reply(Reply::Integer(found as i64))
}

pub fn type_cmd(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    let name = ctx.shared.store.db(ctx.session.db).type_name(&args[1], now);
    reply(Reply::Simple(name.into()))
}

pub fn ttl(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    ttl_query(ctx, args, |state, now| match state {
        TtlState::Missing => -2,
        TtlState::NoExpiry => -1,
        TtlState::ExpiresAt(at) => (at.saturating_sub(now) as i64 + 999) / 1000,
    })
}

pub fn pttl(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    ttl_query(ctx, args, |state, now| match state {
        TtlState::Missing => -2,
        TtlState::NoExpiry => -1,
        TtlState::ExpiresAt(at) => at.saturating_sub(now) as i64,
    })
}

pub fn expiretime(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    ttl_query(ctx, args, |state, _| match state {
        TtlState::Missing => -2,
        TtlState::NoExpiry => -1,
        TtlState::ExpiresAt(at) => (at / 1000) as i64,
    })
}

pub fn pexpiretime(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    ttl_query(ctx, args, |state, _| match state {
        TtlState::Missing => -2,
        TtlState::NoExpiry => -1,
        TtlState::ExpiresAt(at) => at as i64,
    })
}

fn ttl_query(
    ctx: &mut Ctx<'_>,
    args: &[Bytes],
    project: fn(TtlState, u64) -> i64,
) -> Verdict {
    let now = ctx.now_ms();
    let state = ctx.shared.store.db(ctx.session.db).ttl_state(&args[1], now);
    reply(Reply::Integer(project(state, now)))
}

pub fn expire(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    expire_generic(ctx, args, 1000, true)
}

pub fn pexpire(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    expire_generic(ctx, args, 1, true)
}

pub fn expireat(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    expire_generic(ctx, args, 1000, false)
}

pub fn pexpireat(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    expire_generic(ctx, args, 1, false)
}

fn expire_generic(ctx: &mut Ctx<'_>, args: &[Bytes], unit_ms: i64, relative: bool) -> Verdict {
    let n = match arg::as_i64(&args[2]) {
        Ok(n) => n,
        Err(e) => return err(e),
    };
    let mut flags = ExpireFlags::default();
    for opt in &args[3..] {
        match opt.to_ascii_uppercase().as_slice() {
            b"NX" => flags.nx = true,
            b"XX" => flags.xx = true,
            b"GT" => flags.gt = true,
            b"LT" => flags.lt = true,
            _ => {
                return err(format!(
                    "ERR Unsupported option {}",
                    String::from_utf8_lossy(opt)
                ))
            }
        }
    }
    if flags.gt && flags.lt {
        return err("ERR GT and LT options at the same time are not compatible");
    }
    if flags.nx && (flags.xx || flags.gt || flags.lt) {
        return err("ERR NX and XX, GT or LT options at the same time are not compatible");
    }

    let now = ctx.now_ms();
    let Some(scaled) = n.checked_mul(unit_ms) else {
        return err("ERR invalid expire time in 'expire' command");
    };
    let at_ms = if relative {
        let base = now as i64;
        match base.checked_add(scaled) {
            Some(v) => v,
            None => return err("ERR invalid expire time in 'expire' command"),
        }
    } else {
        scaled
    };
    // a non-positive absolute timestamp deletes immediately; it is
    // clamped rather than rejected, matching EXPIREAT 0 semantics
    let at_ms = at_ms.max(0) as u64;

    let applied = ctx
        .shared
        .store
        .db(ctx.session.db)
        .expire_at(&args[1], at_ms, flags, now);
    if !applied {
        ctx.no_propagate = true;
    }
    reply(Reply::Integer(i64::from(applied)))
}

pub fn persist(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    let applied = ctx.shared.store.db(ctx.session.db).persist(&args[1], now);
    if !applied {
        ctx.no_propagate = true;
    }
    reply(Reply::Integer(i64::from(applied)))
}

pub fn keys(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    let matched = ctx.shared.store.db(ctx.session.db).keys(&args[1], now);
    reply(Reply::Array(matched.into_iter().map(Reply::Bulk).collect()))
}

pub fn randomkey(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let _ = args;
    let now = ctx.now_ms();
    match ctx.shared.store.db(ctx.session.db).random_key(now) {
        Some(key) => reply(Reply::Bulk(key)),
        None => reply(Reply::Null),
    }
}

pub fn scan(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let cursor = match arg::as_u64(&args[1]) {
        Ok(c) => c,
        Err(_) => return err("ERR invalid cursor"),
    };
    let mut count = 10usize;
    let mut pattern: Option<Bytes> = None;
    let mut type_filter: Option<String> = None;
    let mut i = 2;
    while i < args.len() {
        match args[i].to_ascii_uppercase().as_slice() {
            b"COUNT" => {
                i += 1;
                count = match args.get(i).map(arg::as_u64) {
                    Some(Ok(n)) if n > 0 => n as usize,
                    _ => return err("ERR syntax error"),
                };
            }
            b"MATCH" => {
                i += 1;
                let Some(p) = args.get(i) else {
                    return err("ERR syntax error");
                };
                pattern = Some(p.clone());
            }
            b"TYPE" => {
                i += 1;
                let Some(t) = args.get(i) else {
                    return err("ERR syntax error");
                };
                type_filter = Some(String::from_utf8_lossy(t).into_owned());
            }
            _ => return err("ERR syntax error"),
        }
        i += 1;
    }

    let now = ctx.now_ms();
    let (next, keys) = ctx.shared.store.db(ctx.session.db).scan(
        cursor,
        count,
        pattern.as_deref(),
        type_filter.as_deref(),
        now,
    );
    reply(Reply::Array(vec![
        Reply::bulk_string(next.to_string()),
        Reply::Array(keys.into_iter().map(Reply::Bulk).collect()),
    ]))
}

pub fn rename(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .rename(&args[1], &args[2], now)
    {
        Ok(()) => reply(Reply::ok()),
        Err(()) => err("ERR no such key"),
    }
}

pub fn renamenx(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    let db = ctx.shared.store.db(ctx.session.db);
    if !db.exists(&args[1], now) {
        return err("ERR no such key");
    }
    if db.exists(&args[2], now) {
        ctx.no_propagate = true;
        return reply(Reply::Integer(0));
    }
    match db.rename(&args[1], &args[2], now) {
        Ok(()) => reply(Reply::Integer(1)),
        Err(()) => err("ERR no such key"),
    }
}

pub fn copy(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let mut dst_db = ctx.session.db;
    let mut replace = false;
    let mut i = 3;
    while i < args.len() {
        match args[i].to_ascii_uppercase().as_slice() {
            b"REPLACE" => replace = true,
            b"DB" => {
                i += 1;
                dst_db = match args.get(i).map(arg::as_u64) {
                    Some(Ok(n)) if (n as usize) < ctx.shared.store.db_count() => n as usize,
                    _ => return err("ERR DB index is out of range"),
                };
            }
            _ => return err("ERR syntax error"),
        }
        i += 1;
    }
    let copied = ctx
        .shared
        .store
        .copy_key(ctx.session.db, dst_db, &args[1], &args[2], replace);
    if !copied {
        ctx.no_propagate = true;
    }
    reply(Reply::Integer(i64::from(copied)))
}

pub fn move_cmd(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let dst = match arg::as_u64(&args[2]) {
        Ok(n) if (n as usize) < ctx.shared.store.db_count() => n as usize,
        _ => return err("ERR DB index is out of range"),
    };
    let moved = ctx.shared.store.move_key(ctx.session.db, dst, &args[1]);
    if !moved {
        ctx.no_propagate = true;
    }
    reply(Reply::Integer(i64::from(moved)))
}

/// SORT key [BY pattern] [LIMIT offset count] [GET pattern ...]
/// [ASC|DESC] [ALPHA] [STORE destination]. Sorts a list, set or
/// sorted-set's members, optionally keyed through external string
/// lookups, and either replies with the result or RPUSHes it into the
/// destination.
pub fn sort(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let mut store_key: Option<Bytes> = None;
    let mut desc = false;
    let mut alpha = false;
    let mut by_pattern: Option<Bytes> = None;
    let mut get_patterns: Vec<Bytes> = Vec::new();
    let mut limit: Option<(i64, i64)> = None;

    let mut i = 2;
    while i < args.len() {
        match args[i].to_ascii_uppercase().as_slice() {
            b"STORE" if i + 1 < args.len() => {
                i += 1;
                store_key = Some(args[i].clone());
            }
            b"DESC" => desc = true,
            b"ASC" => desc = false,
            b"ALPHA" => alpha = true,
            b"BY" if i + 1 < args.len() => {
                i += 1;
                by_pattern = Some(args[i].clone());
            }
            b"GET" if i + 1 < args.len() => {
                i += 1;
                get_patterns.push(args[i].clone());
            }
            b"LIMIT" if i + 2 < args.len() => {
                let (offset, count) = match (arg::as_i64(&args[i + 1]), arg::as_i64(&args[i + 2]))
                {
                    (Ok(o), Ok(c)) => (o, c),
                    _ => return err("ERR value is not an integer or out of range"),
                };
                limit = Some((offset, count));
                i += 2;
            }
            _ => return err("ERR syntax error"),
        }
        i += 1;
    }

    let now = ctx.now_ms();
    let db = ctx.shared.store.db(ctx.session.db);
    let mut vals: Vec<Bytes> = match db.type_name(&args[1], now) {
        "none" => Vec::new(),
        "list" => match db.lrange(&args[1], 0, -1, now) {
            Ok(items) => items,
            Err(_) => return wrongtype(),
        },
        "set" => match db.smembers(&args[1], now) {
            Ok(members) => members,
            Err(_) => return wrongtype(),
        },
        "zset" => match db.zrange(&args[1], 0, -1, now) {
            Ok(pairs) => pairs.into_iter().map(|(m, _)| m).collect(),
            Err(_) => return wrongtype(),
        },
        _ => return wrongtype(),
    };

    // a BY pattern of "_" means skip the weighted sort and fall back
    // to plain byte order
    let plain_by = matches!(by_pattern.as_deref(), Some(b"_"));
    if plain_by {
        vals.sort();
    } else {
        let mut keyed: Vec<(SortWeight, Bytes)> = vals
            .into_iter()
            .map(|v| {
                let source = match &by_pattern {
                    Some(pat) => pattern_lookup(db, pat, &v, now)
                        .unwrap_or_else(|| Bytes::from_static(b"0")),
                    None => v.clone(),
                };
                let weight = if alpha {
                    SortWeight::Alpha(source)
                } else {
                    SortWeight::Num(sort_num(&source))
                };
                (weight, v)
            })
            .collect();
        keyed.sort_by(|(a, _), (b, _)| {
            let ord = match (a, b) {
                (SortWeight::Num(x), SortWeight::Num(y)) => {
                    x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal)
                }
                (SortWeight::Alpha(x), SortWeight::Alpha(y)) => x.cmp(y),
                _ => std::cmp::Ordering::Equal,
            };
            if desc {
                ord.reverse()
            } else {
                ord
            }
        });
        vals = keyed.into_iter().map(|(_, v)| v).collect();
    }

    if let Some((offset, count)) = limit {
        if count >= 0 {
            let start = offset.max(0) as usize;
            if start >= vals.len() {
                vals.clear();
            } else {
                let end = (start + count as usize).min(vals.len());
                vals = vals[start..end].to_vec();
            }
        }
    }

    if let Some(dst) = store_key {
        let stored = vals.len();
        db.del(&dst, now);
        if !vals.is_empty() {
            let _ = db.rpush(&dst, &vals, now);
        }
        return reply(Reply::Integer(stored as i64));
    }

    // reply only: SORT without STORE leaves the keyspace untouched
    ctx.no_propagate = true;
    if get_patterns.is_empty() {
        return reply(Reply::Array(vals.into_iter().map(Reply::Bulk).collect()));
    }
    let mut out = Vec::with_capacity(vals.len() * get_patterns.len());
    for v in &vals {
        for pat in &get_patterns {
            if pat.as_ref() == b"#" {
                out.push(Reply::Bulk(v.clone()));
            } else {
                match pattern_lookup(db, pat, v, now) {
                    Some(value) => out.push(Reply::Bulk(value)),
                    None => out.push(Reply::Null),
                }
            }
        }
    }
    reply(Reply::Array(out))
}

enum SortWeight {
    Num(f64),
    Alpha(Bytes),
}

fn sort_num(raw: &[u8]) -> f64 {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0.0)
}

/// Substitutes the element for the first `*` in a BY/GET pattern and
/// reads the resulting string key. Missing and wrong-typed keys read
/// as absent.
fn pattern_lookup(
    db: &mut hearth_core::Db,
    pattern: &[u8],
    element: &[u8],
    now: u64,
) -> Option<Bytes> {
    let key: Vec<u8> = match pattern.iter().position(|&b| b == b'*') {
        Some(star) => {
            let mut key = Vec::with_capacity(pattern.len() + element.len());
            key.extend_from_slice(&pattern[..star]);
            key.extend_from_slice(element);
            key.extend_from_slice(&pattern[star + 1..]);
            key
        }
        None => pattern.to_vec(),
    };
    db.get(&key, now).ok().flatten()
}

pub fn dump(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .snapshot_entry(&args[1], now)
    {
        Some(entry) => reply(Reply::bulk(dump_entry(&entry.value))),
        None => reply(Reply::Null),
    }
}

pub fn restore(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let ttl = match arg::as_i64(&args[2]) {
        Ok(n) if n >= 0 => n as u64,
        _ => return err("ERR Invalid TTL value, must be >= 0"),
    };
    let mut replace = false;
    let mut absttl = false;
    for opt in &args[4..] {
        match opt.to_ascii_uppercase().as_slice() {
            b"REPLACE" => replace = true,
            b"ABSTTL" => absttl = true,
            _ => return err("ERR syntax error"),
        }
    }

    let now = ctx.now_ms();
    let db = ctx.shared.store.db(ctx.session.db);
    if !replace && db.exists(&args[1], now) {
        return err("BUSYKEY Target key name already exists.");
    }
    let value = match restore_entry(&args[3]) {
        Ok(value) => value,
        Err(e) => return err(format!("ERR {e}")),
    };
    if replace {
        db.del(&args[1], now);
    }
    let mut entry = Entry::new(value);
    if ttl > 0 {
        entry.expire_at_ms = if absttl { ttl } else { now + ttl };
    }
    db.put_entry(Bytes::copy_from_slice(&args[1]), entry);
    reply(Reply::ok())
}
