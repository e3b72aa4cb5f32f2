//! Hash command handlers.

use bytes::Bytes;

use hearth_core::{IncrError, IncrFloatError};
use hearth_protocol::Reply;

use crate::dispatch::{arg, Ctx, Verdict};

use super::{err, reply, wrongtype};

pub fn hset(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    match hset_pairs(ctx, args) {
        Ok(created) => reply(Reply::Integer(created as i64)),
        Err(v) => v,
    }
}

/// Legacy alias: same write, +OK reply.
pub fn hmset(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    match hset_pairs(ctx, args) {
        Ok(_) => reply(Reply::ok()),
        Err(v) => v,
    }
}

fn hset_pairs(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Result<usize, Verdict> {
    if args.len() % 2 != 0 {
        return Err(err(format!(
            "ERR wrong number of arguments for '{}' command",
            String::from_utf8_lossy(&args[0]).to_lowercase()
        )));
    }
    let pairs: Vec<(Bytes, Bytes)> = args[2..]
        .chunks(2)
        .map(|c| (c[0].clone(), c[1].clone()))
        .collect();
    let now = ctx.now_ms();
    ctx.shared
        .store
        .db(ctx.session.db)
        .hset(&args[1], &pairs, now)
        .map_err(|_| wrongtype())
}

pub fn hget(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .hget(&args[1], &args[2], now)
    {
        Ok(Some(value)) => reply(Reply::Bulk(value)),
        Ok(None) => reply(Reply::Null),
        Err(_) => wrongtype(),
    }
}

pub fn hmget(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .hmget(&args[1], &args[2..], now)
    {
        Ok(values) => reply(Reply::Array(
            values
                .into_iter()
                .map(|v| v.map(Reply::Bulk).unwrap_or(Reply::Null))
                .collect(),
        )),
        Err(_) => wrongtype(),
    }
}

pub fn hsetnx(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx.shared.store.db(ctx.session.db).hsetnx(
        &args[1],
        args[2].clone(),
        args[3].clone(),
        now,
    ) {
        Ok(created) => {
            if !created {
                ctx.no_propagate = true;
            }
            reply(Reply::Integer(i64::from(created)))
        }
        Err(_) => wrongtype(),
    }
}

pub fn hdel(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .hdel(&args[1], &args[2..], now)
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

pub fn hlen(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx.shared.store.db(ctx.session.db).hlen(&args[1], now) {
        Ok(len) => reply(Reply::Integer(len as i64)),
        Err(_) => wrongtype(),
    }
}

pub fn hexists(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .hexists(&args[1], &args[2], now)
    {
        Ok(found) => reply(Reply::Integer(i64::from(found))),
        Err(_) => wrongtype(),
    }
}

pub fn hgetall(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx.shared.store.db(ctx.session.db).hgetall(&args[1], now) {
        Ok(pairs) => {
            let mut out = Vec::with_capacity(pairs.len() * 2);
            for (f, v) in pairs {
                out.push(Reply::Bulk(f));
                out.push(Reply::Bulk(v));
            }
            reply(Reply::Array(out))
        }
        Err(_) => wrongtype(),
    }
}

pub fn hkeys(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx.shared.store.db(ctx.session.db).hkeys(&args[1], now) {
        Ok(fields) => reply(Reply::Array(fields.into_iter().map(Reply::Bulk).collect())),
        Err(_) => wrongtype(),
    }
}

pub fn hvals(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx.shared.store.db(ctx.session.db).hvals(&args[1], now) {
        Ok(values) => reply(Reply::Array(values.into_iter().map(Reply::Bulk).collect())),
        Err(_) => wrongtype(),
    }
}

pub fn hincrby(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let delta = match arg::as_i64(&args[3]) {
        Ok(n) => n,
        Err(e) => return err(e),
    };
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .hincrby(&args[1], args[2].clone(), delta, now)
    {
        Ok(n) => reply(Reply::Integer(n)),
        Err(IncrError::WrongType) => wrongtype(),
        Err(IncrError::NotAnInteger) => err("ERR hash value is not an integer"),
        Err(IncrError::Overflow) => err("ERR increment or decrement would overflow"),
    }
}

pub fn hincrbyfloat(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let delta = match arg::as_f64(&args[3]) {
        Ok(v) => v,
        Err(e) => return err(e),
    };
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .hincrbyfloat(&args[1], args[2].clone(), delta, now)
    {
        Ok(value) => reply(Reply::Bulk(value)),
        Err(IncrFloatError::WrongType) => wrongtype(),
        Err(IncrFloatError::NotAFloat) => err("ERR hash value is not a float"),
        Err(IncrFloatError::NanOrInfinity) => err("ERR increment would produce NaN or Infinity"),
    }
}

pub fn hscan(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let (cursor, count, pattern) = match super::sets::parse_scan_args(args) {
        Ok(v) => v,
        Err(v) => return v,
    };
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .hscan(&args[1], cursor, count, pattern.as_deref(), now)
    {
        Ok((next, pairs)) => {
            let mut out = Vec::with_capacity(pairs.len() * 2);
            for (f, v) in pairs {
                out.push(Reply::Bulk(f));
                out.push(Reply::Bulk(v));
            }
            reply(Reply::Array(vec![
                Reply::bulk_string(next.to_string()),
                Reply::Array(out),
            ]))
        }
        Err(_) => wrongtype(),
    }
}
