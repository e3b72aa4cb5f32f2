//! Stream command handlers.

use bytes::Bytes;

use hearth_core::types::stream::{StreamId, XAddError, XGroupError, XReadGroupError};
use hearth_core::StreamAddError;
use hearth_protocol::Reply;

use crate::dispatch::{arg, Ctx, Verdict};

use super::{err, reply, wrongtype};

const NOGROUP_FMT: &str =
    "NOGROUP No such key or consumer group in XREADGROUP with GROUP option";

pub fn xadd(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    if (args.len() - 3) % 2 != 0 {
        return err("ERR wrong number of arguments for 'xadd' command");
    }
    let fields: Vec<(Bytes, Bytes)> = args[3..]
        .chunks(2)
        .map(|c| (c[0].clone(), c[1].clone()))
        .collect();
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .xadd(&args[1], &args[2], fields, now)
    {
        Ok(id) => reply(Reply::bulk_string(id.to_string())),
        Err(StreamAddError::WrongType) => wrongtype(),
        Err(StreamAddError::Add(XAddError::IdTooSmall)) => err(
            "ERR The ID specified in XADD is equal or smaller than the target stream top item",
        ),
        Err(StreamAddError::Add(XAddError::IdZero)) => {
            err("ERR The ID specified in XADD must be greater than 0-0")
        }
        Err(StreamAddError::Add(XAddError::BadId)) => {
            err("ERR Invalid stream ID specified as stream command argument")
        }
    }
}

pub fn xlen(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx.shared.store.db(ctx.session.db).xlen(&args[1], now) {
        Ok(len) => reply(Reply::Integer(len as i64)),
        Err(_) => wrongtype(),
    }
}

pub fn xrange(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    range(ctx, args, false)
}

pub fn xrevrange(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    range(ctx, args, true)
}

fn range(ctx: &mut Ctx<'_>, args: &[Bytes], rev: bool) -> Verdict {
    // XREVRANGE takes its bounds reversed on the wire
    let (start_raw, stop_raw) = if rev {
        (&args[3], &args[2])
    } else {
        (&args[2], &args[3])
    };
    let Some(start) = StreamId::parse(start_raw, 0) else {
        return err("ERR Invalid stream ID specified as stream command argument");
    };
    let Some(stop) = StreamId::parse(stop_raw, u64::MAX) else {
        return err("ERR Invalid stream ID specified as stream command argument");
    };
    let mut count = 0usize;
    if args.len() > 4 {
        if args.len() != 6 || !args[4].eq_ignore_ascii_case(b"COUNT") {
            return err("ERR syntax error");
        }
        count = match arg::as_u64(&args[5]) {
            Ok(n) => n as usize,
            Err(e) => return err(e),
        };
    }

    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .xrange(&args[1], start, stop, rev, count, now)
    {
        Ok(entries) => reply(entries_reply(entries)),
        Err(_) => wrongtype(),
    }
}

fn entries_reply(entries: Vec<(StreamId, Vec<(Bytes, Bytes)>)>) -> Reply {
    Reply::Array(
        entries
            .into_iter()
            .map(|(id, fields)| {
                let mut flat = Vec::with_capacity(fields.len() * 2);
                for (f, v) in fields {
                    flat.push(Reply::Bulk(f));
                    flat.push(Reply::Bulk(v));
                }
                Reply::Array(vec![
                    Reply::bulk_string(id.to_string()),
                    Reply::Array(flat),
                ])
            })
            .collect(),
    )
}

pub fn xdel(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let mut ids = Vec::with_capacity(args.len() - 2);
    for raw in &args[2..] {
        let Some(id) = StreamId::parse(raw, 0) else {
            return err("ERR Invalid stream ID specified as stream command argument");
        };
        ids.push(id);
    }
    let now = ctx.now_ms();
    match ctx.shared.store.db(ctx.session.db).xdel(&args[1], &ids, now) {
        Ok(removed) => {
            if removed == 0 {
                ctx.no_propagate = true;
            }
            reply(Reply::Integer(removed as i64))
        }
        Err(_) => wrongtype(),
    }
}

pub fn xgroup(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let sub = args[1].to_ascii_uppercase();
    match sub.as_slice() {
        b"CREATE" => {
            if args.len() < 5 {
                return err("ERR wrong number of arguments for 'xgroup' command");
            }
            let mkstream = args
                .get(5)
                .map(|a| a.eq_ignore_ascii_case(b"MKSTREAM"))
                .unwrap_or(false);
            let Some(start) = parse_group_start(&args[4]) else {
                return err("ERR Invalid stream ID specified as stream command argument");
            };
            let now = ctx.now_ms();
            match ctx.shared.store.db(ctx.session.db).xgroup_create(
                &args[2],
                args[3].clone(),
                start,
                mkstream,
                now,
            ) {
                Err(_) => wrongtype(),
                Ok(Err(XGroupError::BusyGroup)) => {
                    err("BUSYGROUP Consumer Group name already exists")
                }
                Ok(Err(XGroupError::NoGroup)) => err(
                    "ERR The XGROUP subcommand requires the key to exist. Note that for CREATE you may want to use the MKSTREAM option to create an empty stream automatically.",
                ),
                Ok(Ok(())) => reply(Reply::ok()),
            }
        }
        b"SETID" => {
            if args.len() < 5 {
                return err("ERR wrong number of arguments for 'xgroup' command");
            }
            let Some(id) = parse_group_start(&args[4]) else {
                return err("ERR Invalid stream ID specified as stream command argument");
            };
            let now = ctx.now_ms();
            match ctx
                .shared
                .store
                .db(ctx.session.db)
                .xgroup_setid(&args[2], &args[3], id, now)
            {
                Err(_) => wrongtype(),
                Ok(Err(_)) => err(NOGROUP_FMT),
                Ok(Ok(())) => reply(Reply::ok()),
            }
        }
        _ => err(format!(
            "ERR Unknown XGROUP subcommand or wrong number of arguments for '{}'",
            String::from_utf8_lossy(&args[1])
        )),
    }
}

/// Group start ids accept `$` for "current end of stream".
fn parse_group_start(raw: &Bytes) -> Option<StreamId> {
    if raw.as_ref() == b"$" {
        return Some(StreamId::MAX);
    }
    StreamId::parse(raw, 0)
}

pub fn xreadgroup(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    if !args[1].eq_ignore_ascii_case(b"GROUP") {
        return err("ERR syntax error");
    }
    let group = args[2].clone();
    let consumer = args[3].clone();

    let mut count = 0usize;
    let mut i = 4;
    while i < args.len() {
        match args[i].to_ascii_uppercase().as_slice() {
            b"COUNT" => {
                i += 1;
                count = match args.get(i).map(arg::as_u64) {
                    Some(Ok(n)) => n as usize,
                    _ => return err("ERR syntax error"),
                };
                i += 1;
            }
            b"NOACK" => i += 1,
            b"STREAMS" => {
                i += 1;
                break;
            }
            _ => return err("ERR syntax error"),
        }
    }
    let rest = &args[i..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return err(
            "ERR Unbalanced XREADGROUP list of streams: for each stream key an ID or '>' must be specified.",
        );
    }
    let (keys, ids) = rest.split_at(rest.len() / 2);

    let now = ctx.now_ms();
    let mut out = Vec::new();
    for (key, id_raw) in keys.iter().zip(ids) {
        let after = if id_raw.as_ref() == b">" {
            None
        } else {
            match StreamId::parse(id_raw, 0) {
                Some(id) => Some(id),
                None => {
                    return err("ERR Invalid stream ID specified as stream command argument")
                }
            }
        };
        match ctx.shared.store.db(ctx.session.db).xreadgroup(
            key,
            &group,
            &consumer,
            after,
            count,
            now,
        ) {
            Err(_) => return wrongtype(),
            Ok(Err(XReadGroupError::NoGroup)) => return err(NOGROUP_FMT),
            Ok(Err(XReadGroupError::BadId)) => {
                return err("ERR Invalid stream ID specified as stream command argument")
            }
            Ok(Ok(entries)) => {
                if !entries.is_empty() {
                    out.push(Reply::Array(vec![
                        Reply::Bulk(key.clone()),
                        entries_reply(entries),
                    ]));
                }
            }
        }
    }
    if out.is_empty() {
        ctx.no_propagate = true;
        return reply(Reply::NullArray);
    }
    reply(Reply::Array(out))
}

/// XREAD without BLOCK serves XRANGE semantics from after the given
/// id; BLOCK is a placeholder that returns an immediate null.
pub fn xread(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let mut count = 0usize;
    let mut i = 1;
    while i < args.len() {
        match args[i].to_ascii_uppercase().as_slice() {
            b"COUNT" => {
                i += 1;
                count = match args.get(i).map(arg::as_u64) {
                    Some(Ok(n)) => n as usize,
                    _ => return err("ERR syntax error"),
                };
                i += 1;
            }
            b"BLOCK" => {
                // bookkeeping-only build: no stream blocking
                if args.get(i + 1).is_none() {
                    return err("ERR syntax error");
                }
                i += 2;
            }
            b"STREAMS" => {
                i += 1;
                break;
            }
            _ => return err("ERR syntax error"),
        }
    }
    let rest = args.get(i..).unwrap_or_default();
    if rest.is_empty() || rest.len() % 2 != 0 {
        return err(
            "ERR Unbalanced XREAD list of streams: for each stream key an ID or '$' must be specified.",
        );
    }
    let (keys, ids) = rest.split_at(rest.len() / 2);

    let now = ctx.now_ms();
    let mut out = Vec::new();
    for (key, id_raw) in keys.iter().zip(ids) {
        let from = if id_raw.as_ref() == b"$" {
            match ctx.shared.store.db(ctx.session.db).xinfo(key, now) {
                Ok(Some((_, last, _))) => last,
                _ => StreamId::MIN,
            }
        } else {
            match StreamId::parse(id_raw, 0) {
                Some(id) => id,
                None => {
                    return err("ERR Invalid stream ID specified as stream command argument")
                }
            }
        };
        match ctx.shared.store.db(ctx.session.db).xrange(
            key,
            from.next(),
            StreamId::MAX,
            false,
            count,
            now,
        ) {
            Err(_) => return wrongtype(),
            Ok(entries) if !entries.is_empty() => {
                out.push(Reply::Array(vec![
                    Reply::Bulk(key.clone()),
                    entries_reply(entries),
                ]));
            }
            Ok(_) => {}
        }
    }
    if out.is_empty() {
        return reply(Reply::NullArray);
    }
    reply(Reply::Array(out))
}

pub fn xack(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let mut ids = Vec::with_capacity(args.len() - 3);
    for raw in &args[3..] {
        let Some(id) = StreamId::parse(raw, 0) else {
            return err("ERR Invalid stream ID specified as stream command argument");
        };
        ids.push(id);
    }
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .xack(&args[1], &args[2], &ids, now)
    {
        Err(_) => wrongtype(),
        Ok(Err(_)) => {
            ctx.no_propagate = true;
            reply(Reply::Integer(0))
        }
        Ok(Ok(acked)) => {
            if acked == 0 {
                ctx.no_propagate = true;
            }
            reply(Reply::Integer(acked as i64))
        }
    }
}

pub fn xpending(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .xpending_summary(&args[1], &args[2], now)
    {
        Err(_) => wrongtype(),
        Ok(Err(_)) => err(format!(
            "NOGROUP No such key '{}' or consumer group '{}'",
            String::from_utf8_lossy(&args[1]),
            String::from_utf8_lossy(&args[2])
        )),
        Ok(Ok(sum)) => {
            let id_or_null = |id: Option<StreamId>| match id {
                Some(id) => Reply::bulk_string(id.to_string()),
                None => Reply::Null,
            };
            reply(Reply::Array(vec![
                Reply::Integer(sum.count as i64),
                id_or_null(sum.min_id),
                id_or_null(sum.max_id),
                if sum.count == 0 {
                    Reply::Null
                } else {
                    Reply::Integer(sum.consumers as i64)
                },
            ]))
        }
    }
}

pub fn xinfo(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    if !args[1].eq_ignore_ascii_case(b"STREAM") {
        return err("ERR syntax error");
    }
    let now = ctx.now_ms();
    match ctx.shared.store.db(ctx.session.db).xinfo(&args[2], now) {
        Err(_) => wrongtype(),
        Ok(None) => err("ERR no such key"),
        Ok(Some((length, last_id, groups))) => reply(Reply::Map(vec![
            (Reply::bulk_string("length"), Reply::Integer(length as i64)),
            (
                Reply::bulk_string("last-generated-id"),
                Reply::bulk_string(last_id.to_string()),
            ),
            (Reply::bulk_string("groups"), Reply::Integer(groups as i64)),
        ])),
    }
}
