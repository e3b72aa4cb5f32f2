//! Sorted-set command handlers.

use bytes::Bytes;

use hearth_core::ZAddFlags;
use hearth_protocol::Reply;

use crate::blocking::{BlockKind, BlockRequest};
use crate::dispatch::{arg, Ctx, Verdict};

use super::lists::{deadline_from, finish_blocking};
use super::{err, reply, wrongtype};

pub fn zadd(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let mut flags = ZAddFlags::default();
    let mut ch = false;
    let mut incr = false;
    let mut i = 2;
    while i < args.len() {
        match args[i].to_ascii_uppercase().as_slice() {
            b"NX" => flags.nx = true,
            b"XX" => flags.xx = true,
            b"GT" => flags.gt = true,
            b"LT" => flags.lt = true,
            b"CH" => ch = true,
            b"INCR" => incr = true,
            _ => break,
        }
        i += 1;
    }
    if flags.nx && flags.xx {
        return err("ERR XX and NX options at the same time are not compatible");
    }
    if (flags.gt && flags.lt) || (flags.nx && (flags.gt || flags.lt)) {
        return err("ERR GT, LT, and/or NX options at the same time are not compatible");
    }

    let rest = &args[i..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return err("ERR syntax error");
    }
    if incr && rest.len() != 2 {
        return err("ERR INCR option supports a single increment-element pair");
    }

    let now = ctx.now_ms();
    let mut added = 0i64;
    let mut changed = 0i64;
    let mut incr_score = None;
    for pair in rest.chunks(2) {
        let score = match arg::as_f64(&pair[0]) {
            Ok(v) => v,
            Err(e) => return err(e),
        };
        match ctx.shared.store.db(ctx.session.db).zadd_one(
            &args[1],
            score,
            pair[1].clone(),
            flags,
            incr,
            now,
        ) {
            Ok(result) => {
                if result.added {
                    added += 1;
                }
                if result.changed {
                    changed += 1;
                }
                incr_score = result.score;
            }
            Err(_) => return wrongtype(),
        }
    }

    if changed == 0 {
        ctx.no_propagate = true;
    }
    if incr {
        return reply(match incr_score {
            Some(score) => Reply::bulk_string(Reply::format_double(score)),
            None => Reply::Null,
        });
    }
    reply(Reply::Integer(if ch { changed } else { added }))
}

pub fn zrange(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let (start, stop) = match (arg::as_i64(&args[2]), arg::as_i64(&args[3])) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return err("ERR value is not an integer or out of range"),
    };
    let mut withscores = false;
    for opt in &args[4..] {
        if opt.eq_ignore_ascii_case(b"WITHSCORES") {
            withscores = true;
        } else {
            return err("ERR syntax error");
        }
    }

    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .zrange(&args[1], start, stop, now)
    {
        Ok(members) => {
            let mut out = Vec::with_capacity(members.len() * if withscores { 2 } else { 1 });
            for (member, score) in members {
                out.push(Reply::Bulk(member));
                if withscores {
                    out.push(Reply::bulk_string(Reply::format_double(score)));
                }
            }
            reply(Reply::Array(out))
        }
        Err(_) => wrongtype(),
    }
}

pub fn zscore(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .zscore(&args[1], &args[2], now)
    {
        Ok(Some(score)) => reply(Reply::bulk_string(Reply::format_double(score))),
        Ok(None) => reply(Reply::Null),
        Err(_) => wrongtype(),
    }
}

pub fn zcard(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx.shared.store.db(ctx.session.db).zcard(&args[1], now) {
        Ok(len) => reply(Reply::Integer(len as i64)),
        Err(_) => wrongtype(),
    }
}

pub fn zscan(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let (cursor, count, pattern) = match super::sets::parse_scan_args(args) {
        Ok(v) => v,
        Err(v) => return v,
    };
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .zscan(&args[1], cursor, count, pattern.as_deref(), now)
    {
        Ok((next, members)) => {
            let mut out = Vec::with_capacity(members.len() * 2);
            for (member, score) in members {
                out.push(Reply::Bulk(member));
                out.push(Reply::bulk_string(Reply::format_double(score)));
            }
            reply(Reply::Array(vec![
                Reply::bulk_string(next.to_string()),
                Reply::Array(out),
            ]))
        }
        Err(_) => wrongtype(),
    }
}

pub fn zpopmin(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    zpop(ctx, args, false)
}

pub fn zpopmax(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    zpop(ctx, args, true)
}

fn zpop(ctx: &mut Ctx<'_>, args: &[Bytes], max: bool) -> Verdict {
    let count = if args.len() > 2 {
        match arg::as_u64(&args[2]) {
            Ok(n) => n as usize,
            Err(_) => return err("ERR value is out of range, must be positive"),
        }
    } else {
        1
    };
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .zpop(&args[1], count, max, now)
    {
        Ok(popped) => {
            if popped.is_empty() {
                ctx.no_propagate = true;
            }
            let mut out = Vec::with_capacity(popped.len() * 2);
            for (member, score) in popped {
                out.push(Reply::Bulk(member));
                out.push(Reply::bulk_string(Reply::format_double(score)));
            }
            reply(Reply::Array(out))
        }
        Err(_) => wrongtype(),
    }
}

/// ZMPOP numkeys key [key ...] MIN|MAX [COUNT n]: pops from the first
/// non-empty sorted set in key order.
pub fn zmpop(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let numkeys = match arg::as_i64(&args[1]) {
        Ok(n) if n > 0 => n as usize,
        _ => return err("ERR numkeys should be greater than 0"),
    };
    if args.len() < 3 + numkeys {
        return err("ERR syntax error");
    }
    let dir_pos = 2 + numkeys;
    let max = match args[dir_pos].to_ascii_uppercase().as_slice() {
        b"MIN" => false,
        b"MAX" => true,
        _ => return err("ERR syntax error"),
    };
    let mut count = 1usize;
    if dir_pos + 1 < args.len() {
        if dir_pos + 3 != args.len() || !args[dir_pos + 1].eq_ignore_ascii_case(b"COUNT") {
            return err("ERR syntax error");
        }
        count = match arg::as_i64(&args[dir_pos + 2]) {
            Ok(c) if c > 0 => c as usize,
            _ => return err("ERR count should be greater than 0"),
        };
    }

    let now = ctx.now_ms();
    for key in &args[2..2 + numkeys] {
        match ctx.shared.store.db(ctx.session.db).zpop(key, count, max, now) {
            Err(_) => return wrongtype(),
            Ok(popped) if popped.is_empty() => {}
            Ok(popped) => {
                let mut flat = Vec::with_capacity(popped.len() * 2);
                for (member, score) in popped {
                    flat.push(Reply::Bulk(member));
                    flat.push(Reply::bulk_string(Reply::format_double(score)));
                }
                return reply(Reply::Array(vec![
                    Reply::Bulk(key.clone()),
                    Reply::Array(flat),
                ]));
            }
        }
    }
    ctx.no_propagate = true;
    reply(Reply::Null)
}

pub fn bzpopmin(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    blocking_zpop(ctx, args, false)
}

pub fn bzpopmax(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    blocking_zpop(ctx, args, true)
}

fn blocking_zpop(ctx: &mut Ctx<'_>, args: &[Bytes], max: bool) -> Verdict {
    let timeout = match arg::as_timeout_secs(&args[args.len() - 1]) {
        Ok(t) => t,
        Err(e) => return err(e),
    };
    let req = BlockRequest {
        kind: BlockKind::ZsetPop { max },
        db: ctx.session.db,
        keys: args[1..args.len() - 1].to_vec(),
        deadline_ms: deadline_from(ctx, timeout),
        destination: None,
        args: args.to_vec(),
    };
    finish_blocking(ctx, req)
}
