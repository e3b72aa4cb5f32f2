//! List command handlers, including the blocking family.

use bytes::Bytes;

use hearth_protocol::Reply;

use crate::blocking::{attempt, BlockKind, BlockRequest};
use crate::dispatch::{arg, Ctx, Verdict};

use super::{err, reply, wrongtype};

pub fn lpush(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    push(ctx, args, true)
}

pub fn rpush(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    push(ctx, args, false)
}

fn push(ctx: &mut Ctx<'_>, args: &[Bytes], left: bool) -> Verdict {
    let now = ctx.now_ms();
    let db = ctx.shared.store.db(ctx.session.db);
    let result = if left {
        db.lpush(&args[1], &args[2..], now)
    } else {
        db.rpush(&args[1], &args[2..], now)
    };
    match result {
        Ok(len) => reply(Reply::Integer(len as i64)),
        Err(_) => wrongtype(),
    }
}

pub fn lpop(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    pop(ctx, args, true)
}

pub fn rpop(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    pop(ctx, args, false)
}

fn pop(ctx: &mut Ctx<'_>, args: &[Bytes], left: bool) -> Verdict {
    let now = ctx.now_ms();
    let db = ctx.shared.store.db(ctx.session.db);
    let result = if left {
        db.lpop(&args[1], now)
    } else {
        db.rpop(&args[1], now)
    };
    match result {
        Ok(Some(value)) => reply(Reply::Bulk(value)),
        Ok(None) => {
            ctx.no_propagate = true;
            reply(Reply::Null)
        }
        Err(_) => wrongtype(),
    }
}

pub fn llen(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx.shared.store.db(ctx.session.db).llen(&args[1], now) {
        Ok(len) => reply(Reply::Integer(len as i64)),
        Err(_) => wrongtype(),
    }
}

pub fn lrange(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let (start, stop) = match (arg::as_i64(&args[2]), arg::as_i64(&args[3])) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return err("ERR value is not an integer or out of range"),
    };
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .lrange(&args[1], start, stop, now)
    {
        Ok(items) => reply(Reply::Array(items.into_iter().map(Reply::Bulk).collect())),
        Err(_) => wrongtype(),
    }
}

fn parse_side(arg: &Bytes) -> Result<bool, Verdict> {
    match arg.to_ascii_uppercase().as_slice() {
        b"LEFT" => Ok(true),
        b"RIGHT" => Ok(false),
        _ => Err(err("ERR syntax error")),
    }
}

pub fn lmove(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let from_left = match parse_side(&args[3]) {
        Ok(v) => v,
        Err(v) => return v,
    };
    let to_left = match parse_side(&args[4]) {
        Ok(v) => v,
        Err(v) => return v,
    };
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .lmove(&args[1], &args[2], from_left, to_left, now)
    {
        Ok(Some(value)) => reply(Reply::Bulk(value)),
        Ok(None) => {
            ctx.no_propagate = true;
            reply(Reply::Null)
        }
        Err(_) => wrongtype(),
    }
}

// ── blocking family ─────────────────────────────────────────────────────

pub fn blpop(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    blocking_pop(ctx, args, true)
}

pub fn brpop(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    blocking_pop(ctx, args, false)
}

fn blocking_pop(ctx: &mut Ctx<'_>, args: &[Bytes], left: bool) -> Verdict {
    let timeout = match arg::as_timeout_secs(&args[args.len() - 1]) {
        Ok(t) => t,
        Err(e) => return err(e),
    };
    let req = BlockRequest {
        kind: BlockKind::ListPop { left },
        db: ctx.session.db,
        keys: args[1..args.len() - 1].to_vec(),
        deadline_ms: deadline_from(ctx, timeout),
        destination: None,
        args: args.to_vec(),
    };
    finish_blocking(ctx, req)
}

pub fn blmove(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let from_left = match parse_side(&args[3]) {
        Ok(v) => v,
        Err(v) => return v,
    };
    let to_left = match parse_side(&args[4]) {
        Ok(v) => v,
        Err(v) => return v,
    };
    let timeout = match arg::as_timeout_secs(&args[5]) {
        Ok(t) => t,
        Err(e) => return err(e),
    };
    let req = BlockRequest {
        kind: BlockKind::ListMove { from_left, to_left },
        db: ctx.session.db,
        keys: vec![args[1].clone()],
        deadline_ms: deadline_from(ctx, timeout),
        destination: Some(args[2].clone()),
        args: args.to_vec(),
    };
    finish_blocking(ctx, req)
}

/// The legacy spelling of `BLMOVE src dst RIGHT LEFT timeout`.
pub fn brpoplpush(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let timeout = match arg::as_timeout_secs(&args[3]) {
        Ok(t) => t,
        Err(e) => return err(e),
    };
    let req = BlockRequest {
        kind: BlockKind::ListMove {
            from_left: false,
            to_left: true,
        },
        db: ctx.session.db,
        keys: vec![args[1].clone()],
        deadline_ms: deadline_from(ctx, timeout),
        destination: Some(args[2].clone()),
        args: args.to_vec(),
    };
    finish_blocking(ctx, req)
}

pub(super) fn deadline_from(ctx: &Ctx<'_>, timeout_secs: f64) -> u64 {
    if timeout_secs == 0.0 {
        0
    } else {
        ctx.shared.store.now_ms() + (timeout_secs * 1000.0) as u64
    }
}

/// Shared tail for every blocking command: fast path first, then park
/// (or reply null where parking is not allowed).
pub(super) fn finish_blocking(ctx: &mut Ctx<'_>, req: BlockRequest) -> Verdict {
    if let Some(result) = attempt(&mut ctx.shared.store, &req) {
        return reply(result);
    }
    if ctx.may_block() {
        Verdict::Block(req)
    } else {
        // inside MULTI/EXEC and scripts these act non-blocking
        ctx.no_propagate = true;
        reply(Reply::NullArray)
    }
}
