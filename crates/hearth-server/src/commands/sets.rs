//! Set command handlers.

use bytes::Bytes;

use hearth_protocol::Reply;

use crate::dispatch::{arg, Ctx, Verdict};

use super::{err, reply, wrongtype};

pub fn sadd(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .sadd(&args[1], &args[2..], now)
    {
        Ok(added) => reply(Reply::Integer(added as i64)),
        Err(_) => wrongtype(),
    }
}

pub fn srem(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .srem(&args[1], &args[2..], now)
    {
        Ok(removed) => {
            if removed == 0 {
                ctx.no_propagate = true;
            }
            reply(Reply::Integer(removed as i64))
        }
        Err(_) => wrongtype(),
    }
}

pub fn sismember(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .sismember(&args[1], &args[2], now)
    {
        Ok(found) => reply(Reply::Integer(i64::from(found))),
        Err(_) => wrongtype(),
    }
}

pub fn smembers(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx.shared.store.db(ctx.session.db).smembers(&args[1], now) {
        Ok(members) => reply(Reply::Array(members.into_iter().map(Reply::Bulk).collect())),
        Err(_) => wrongtype(),
    }
}

pub fn scard(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx.shared.store.db(ctx.session.db).scard(&args[1], now) {
        Ok(len) => reply(Reply::Integer(len as i64)),
        Err(_) => wrongtype(),
    }
}

pub fn spop(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let count = if args.len() > 2 {
        match arg::as_u64(&args[2]) {
            Ok(n) => Some(n as usize),
            Err(_) => return err("ERR value is out of range, must be positive"),
        }
    } else {
        None
    };
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .spop(&args[1], count.unwrap_or(1), now)
    {
        Ok(popped) => {
            if popped.is_empty() {
                ctx.no_propagate = true;
            }
            match count {
                // bare SPOP replies with one member or nil
                None => reply(
                    popped
                        .into_iter()
                        .next()
                        .map(Reply::Bulk)
                        .unwrap_or(Reply::Null),
                ),
                Some(_) => reply(Reply::Array(
                    popped.into_iter().map(Reply::Bulk).collect(),
                )),
            }
        }
        Err(_) => wrongtype(),
    }
}

pub fn sscan(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let (cursor, count, pattern) = match parse_scan_args(args) {
        Ok(v) => v,
        Err(v) => return v,
    };
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .sscan(&args[1], cursor, count, pattern.as_deref(), now)
    {
        Ok((next, members)) => reply(Reply::Array(vec![
            Reply::bulk_string(next.to_string()),
            Reply::Array(members.into_iter().map(Reply::Bulk).collect()),
        ])),
        Err(_) => wrongtype(),
    }
}

/// `<key> <cursor> [MATCH pattern] [COUNT n]`, shared by
/// HSCAN/SSCAN/ZSCAN.
pub(super) fn parse_scan_args(
    args: &[Bytes],
) -> Result<(u64, usize, Option<Bytes>), Verdict> {
    let cursor = arg::as_u64(&args[2]).map_err(|_| err("ERR invalid cursor"))?;
    let mut count = 10usize;
    let mut pattern = None;
    let mut i = 3;
    while i < args.len() {
        match args[i].to_ascii_uppercase().as_slice() {
            b"COUNT" => {
                i += 1;
                count = match args.get(i).map(arg::as_u64) {
                    Some(Ok(n)) if n > 0 => n as usize,
                    _ => return Err(err("ERR syntax error")),
                };
            }
            b"MATCH" => {
                i += 1;
                let Some(p) = args.get(i) else {
                    return Err(err("ERR syntax error"));
                };
                pattern = Some(p.clone());
            }
            _ => return Err(err("ERR syntax error")),
        }
        i += 1;
    }
    Ok((cursor, count, pattern))
}
