//! String command handlers.

use bytes::Bytes;

use hearth_core::{GetExAction, IncrError, IncrFloatError, SetOptions};
use hearth_protocol::Reply;

use crate::dispatch::{arg, Ctx, Verdict};

use super::{err, reply, wrongtype};

pub fn get(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx.shared.store.db(ctx.session.db).get(&args[1], now) {
        Ok(Some(value)) => reply(Reply::Bulk(value)),
        Ok(None) => reply(Reply::Null),
        Err(_) => wrongtype(),
    }
}

pub fn set(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    let mut opts = SetOptions::default();
    let mut i = 3;
    while i < args.len() {
        let opt = args[i].to_ascii_uppercase();
        match opt.as_slice() {
            b"NX" => opts.nx = true,
            b"XX" => opts.xx = true,
            b"KEEPTTL" => opts.keep_ttl = true,
            b"GET" => opts.get = true,
            b"EX" | b"PX" | b"EXAT" | b"PXAT" => {
                i += 1;
                let Some(raw) = args.get(i) else {
                    return err("ERR syntax error");
                };
                let n = match arg::as_i64(raw) {
                    Ok(n) => n,
                    Err(e) => return err(e),
                };
                if n <= 0 && (opt == b"EX" || opt == b"PX") {
                    return err("ERR invalid expire time in 'set' command");
                }
                let at = match opt.as_slice() {
                    b"EX" => now.saturating_add((n as u64).saturating_mul(1000)),
                    b"PX" => now.saturating_add(n as u64),
                    b"EXAT" => (n.max(0) as u64).saturating_mul(1000),
                    _ => n.max(0) as u64,
                };
                opts.expire_at_ms = Some(at);
            }
            _ => return err("ERR syntax error"),
        }
        i += 1;
    }
    if opts.nx && opts.xx {
        return err("ERR syntax error");
    }

    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .set(&args[1], args[2].clone(), opts, now)
    {
        Err(_) => wrongtype(),
        Ok(outcome) => {
            if !outcome.applied {
                ctx.no_propagate = true;
            }
            if opts.get {
                reply(outcome.old_value.map(Reply::Bulk).unwrap_or(Reply::Null))
            } else if outcome.applied {
                reply(Reply::ok())
            } else {
                reply(Reply::Null)
            }
        }
    }
}

pub fn setnx(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    let opts = SetOptions {
        nx: true,
        ..Default::default()
    };
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .set(&args[1], args[2].clone(), opts, now)
    {
        Ok(outcome) => {
            if !outcome.applied {
                ctx.no_propagate = true;
            }
            reply(Reply::Integer(i64::from(outcome.applied)))
        }
        Err(_) => wrongtype(),
    }
}

pub fn setex(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    set_with_ttl(ctx, args, 1000)
}

pub fn psetex(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    set_with_ttl(ctx, args, 1)
}

fn set_with_ttl(ctx: &mut Ctx<'_>, args: &[Bytes], unit_ms: u64) -> Verdict {
    let now = ctx.now_ms();
    let n = match arg::as_i64(&args[2]) {
        Ok(n) => n,
        Err(e) => return err(e),
    };
    if n <= 0 {
        return err("ERR invalid expire time in 'setex' command");
    }
    let opts = SetOptions {
        expire_at_ms: Some(now + (n as u64) * unit_ms),
        ..Default::default()
    };
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .set(&args[1], args[3].clone(), opts, now)
    {
        Ok(_) => reply(Reply::ok()),
        Err(_) => wrongtype(),
    }
}

pub fn getset(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    let opts = SetOptions {
        get: true,
        ..Default::default()
    };
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .set(&args[1], args[2].clone(), opts, now)
    {
        Ok(outcome) => reply(outcome.old_value.map(Reply::Bulk).unwrap_or(Reply::Null)),
        Err(_) => wrongtype(),
    }
}

pub fn getdel(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx.shared.store.db(ctx.session.db).getdel(&args[1], now) {
        Ok(Some(value)) => reply(Reply::Bulk(value)),
        Ok(None) => reply(Reply::Null),
        Err(_) => wrongtype(),
    }
}

pub fn getex(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    let action = if args.len() == 2 {
        GetExAction::Keep
    } else {
        let opt = args[2].to_ascii_uppercase();
        match opt.as_slice() {
            b"PERSIST" if args.len() == 3 => GetExAction::Persist,
            b"EX" | b"PX" | b"EXAT" | b"PXAT" if args.len() == 4 => {
                let n = match arg::as_i64(&args[3]) {
                    Ok(n) => n,
                    Err(e) => return err(e),
                };
                if n <= 0 && (opt == b"EX" || opt == b"PX") {
                    return err("ERR invalid expire time in 'getex' command");
                }
                GetExAction::ExpireAt(match opt.as_slice() {
                    b"EX" => now.saturating_add((n as u64).saturating_mul(1000)),
                    b"PX" => now.saturating_add(n as u64),
                    b"EXAT" => (n.max(0) as u64).saturating_mul(1000),
                    _ => n.max(0) as u64,
                })
            }
            _ => return err("ERR syntax error"),
        }
    };
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .getex(&args[1], action, now)
    {
        Ok(Some(value)) => reply(Reply::Bulk(value)),
        Ok(None) => reply(Reply::Null),
        Err(_) => wrongtype(),
    }
}

pub fn mget(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    let db = ctx.shared.store.db(ctx.session.db);
    let out = args[1..]
        .iter()
        .map(|key| match db.get(key, now) {
            Ok(Some(value)) => Reply::Bulk(value),
            // wrong-typed keys read as nil in MGET
            _ => Reply::Null,
        })
        .collect();
    reply(Reply::Array(out))
}

pub fn mset(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    if args.len() % 2 != 1 {
        return err("ERR wrong number of arguments for 'mset' command");
    }
    let now = ctx.now_ms();
    let db = ctx.shared.store.db(ctx.session.db);
    for pair in args[1..].chunks(2) {
        let _ = db.set(&pair[0], pair[1].clone(), SetOptions::default(), now);
    }
    reply(Reply::ok())
}

pub fn msetnx(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    if args.len() % 2 != 1 {
        return err("ERR wrong number of arguments for 'msetnx' command");
    }
    let now = ctx.now_ms();
    let db = ctx.shared.store.db(ctx.session.db);
    let any_exists = args[1..].chunks(2).any(|pair| db.exists(&pair[0], now));
    if any_exists {
        ctx.no_propagate = true;
        return reply(Reply::Integer(0));
    }
    for pair in args[1..].chunks(2) {
        let _ = db.set(&pair[0], pair[1].clone(), SetOptions::default(), now);
    }
    reply(Reply::Integer(1))
}

pub fn append(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .append(&args[1], args[2].clone(), now)
    {
        Ok(len) => reply(Reply::Integer(len as i64)),
        Err(_) => wrongtype(),
    }
}

pub fn strlen(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let now = ctx.now_ms();
    match ctx.shared.store.db(ctx.session.db).strlen(&args[1], now) {
        Ok(len) => reply(Reply::Integer(len as i64)),
        Err(_) => wrongtype(),
    }
}

pub fn incr(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    incr_by_delta(ctx, &args[1], 1)
}

pub fn decr(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    incr_by_delta(ctx, &args[1], -1)
}

pub fn incrby(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    match arg::as_i64(&args[2]) {
        Ok(n) => incr_by_delta(ctx, &args[1], n),
        Err(e) => err(e),
    }
}

pub fn decrby(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    match arg::as_i64(&args[2]) {
        Ok(n) => match n.checked_neg() {
            Some(neg) => incr_by_delta(ctx, &args[1], neg),
            None => err("ERR decrement would overflow"),
        },
        Err(e) => err(e),
    }
}

fn incr_by_delta(ctx: &mut Ctx<'_>, key: &Bytes, delta: i64) -> Verdict {
    let now = ctx.now_ms();
    match ctx.shared.store.db(ctx.session.db).incr_by(key, delta, now) {
        Ok(n) => reply(Reply::Integer(n)),
        Err(IncrError::WrongType) => wrongtype(),
        Err(IncrError::NotAnInteger) => err("ERR value is not an integer or out of range"),
        Err(IncrError::Overflow) => err("ERR increment or decrement would overflow"),
    }
}

pub fn incrbyfloat(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let delta = match arg::as_f64(&args[2]) {
        Ok(v) => v,
        Err(e) => return err(e),
    };
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .incr_by_float(&args[1], delta, now)
    {
        Ok(value) => reply(Reply::Bulk(value)),
        Err(IncrFloatError::WrongType) => wrongtype(),
        Err(IncrFloatError::NotAFloat) => err("ERR value is not a valid float"),
        Err(IncrFloatError::NanOrInfinity) => {
            err("ERR increment would produce NaN or Infinity")
        }
    }
}

pub fn setbit(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let offset = match arg::as_u64(&args[2]) {
        Ok(n) if n < (1 << 32) => n,
        _ => return err("ERR bit offset is not an integer or out of range"),
    };
    let bit = match args[3].as_ref() {
        b"0" => false,
        b"1" => true,
        _ => return err("ERR bit is not an integer or out of range"),
    };
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .setbit(&args[1], offset, bit, now)
    {
        Ok(old) => reply(Reply::Integer(i64::from(old))),
        Err(_) => wrongtype(),
    }
}

pub fn getbit(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let offset = match arg::as_u64(&args[2]) {
        Ok(n) if n < (1 << 32) => n,
        _ => return err("ERR bit offset is not an integer or out of range"),
    };
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .getbit(&args[1], offset, now)
    {
        Ok(bit) => reply(Reply::Integer(i64::from(bit))),
        Err(_) => wrongtype(),
    }
}

pub fn setrange(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let offset = match arg::as_u64(&args[2]) {
        Ok(n) => n as usize,
        Err(e) => return err(e),
    };
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .setrange(&args[1], offset, &args[3], now)
    {
        Ok(Some(len)) => reply(Reply::Integer(len as i64)),
        Ok(None) => err("ERR string exceeds maximum allowed size (proto-max-bulk-len)"),
        Err(_) => wrongtype(),
    }
}

pub fn getrange(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let (start, stop) = match (arg::as_i64(&args[2]), arg::as_i64(&args[3])) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return err("ERR value is not an integer or out of range"),
    };
    let now = ctx.now_ms();
    match ctx
        .shared
        .store
        .db(ctx.session.db)
        .getrange(&args[1], start, stop, now)
    {
        Ok(slice) => reply(Reply::Bulk(slice)),
        Err(_) => wrongtype(),
    }
}

/// LCS key1 key2 [LEN] [IDX] [MINMATCHLEN n] [WITHMATCHLEN]: longest
/// common subsequence of two string values.
pub fn lcs(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let mut want_len = false;
    let mut want_idx = false;
    let mut with_match_len = false;
    let mut min_match_len = 0i64;
    let mut i = 3;
    while i < args.len() {
        match args[i].to_ascii_uppercase().as_slice() {
            b"LEN" => want_len = true,
            b"IDX" => want_idx = true,
            b"WITHMATCHLEN" => with_match_len = true,
            b"MINMATCHLEN" => {
                i += 1;
                min_match_len = match args.get(i).map(arg::as_i64) {
                    Some(Ok(n)) if n >= 0 => n,
                    Some(Ok(_)) | Some(Err(_)) => {
                        return err("ERR value is not an integer or out of range")
                    }
                    None => return err("ERR syntax error"),
                };
            }
            _ => return err("ERR syntax error"),
        }
        i += 1;
    }
    if want_len && want_idx {
        return err("ERR syntax error");
    }
    if !want_idx && (with_match_len || min_match_len > 0) {
        return err("ERR syntax error");
    }

    let now = ctx.now_ms();
    let db = ctx.shared.store.db(ctx.session.db);
    let a = match db.get(&args[1], now) {
        Ok(v) => v.unwrap_or_default(),
        Err(_) => return wrongtype(),
    };
    let b = match db.get(&args[2], now) {
        Ok(v) => v.unwrap_or_default(),
        Err(_) => return wrongtype(),
    };

    let result = compute_lcs(&a, &b);
    if want_len {
        return reply(Reply::Integer(result.subsequence.len() as i64));
    }
    if !want_idx {
        return reply(Reply::bulk(result.subsequence));
    }

    let mut matches = Vec::new();
    for block in &result.blocks_desc {
        if min_match_len > 0 && block.len < min_match_len {
            continue;
        }
        let mut item = vec![
            Reply::Array(vec![
                Reply::Integer(block.a_start),
                Reply::Integer(block.a_end),
            ]),
            Reply::Array(vec![
                Reply::Integer(block.b_start),
                Reply::Integer(block.b_end),
            ]),
        ];
        if with_match_len {
            item.push(Reply::Integer(block.len));
        }
        matches.push(Reply::Array(item));
    }
    reply(Reply::Array(vec![
        Reply::bulk_string("matches"),
        Reply::Array(matches),
        Reply::bulk_string("len"),
        Reply::Integer(result.subsequence.len() as i64),
    ]))
}

/// One contiguous run of matched positions, with inclusive offsets
/// into both inputs.
struct LcsBlock {
    a_start: i64,
    a_end: i64,
    b_start: i64,
    b_end: i64,
    len: i64,
}

struct LcsOutcome {
    subsequence: Vec<u8>,
    /// Match runs from the end of the strings toward the start, the
    /// order the IDX reply uses.
    blocks_desc: Vec<LcsBlock>,
}

/// Textbook dynamic-programming LCS with a backtrack that records the
/// matched index pairs; adjacent pairs coalesce into blocks.
fn compute_lcs(a: &[u8], b: &[u8]) -> LcsOutcome {
    let n = a.len();
    let m = b.len();
    let mut dp = vec![vec![0u32; m + 1]; n + 1];
    for i in 1..=n {
        for j in 1..=m {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }

    let mut i = n;
    let mut j = m;
    let mut pairs_desc: Vec<(i64, i64)> = Vec::new();
    while i > 0 && j > 0 {
        if a[i - 1] == b[j - 1] && dp[i][j] == dp[i - 1][j - 1] + 1 {
            pairs_desc.push(((i - 1) as i64, (j - 1) as i64));
            i -= 1;
            j -= 1;
        } else if dp[i - 1][j] >= dp[i][j - 1] {
            i -= 1;
        } else {
            j -= 1;
        }
    }

    let subsequence: Vec<u8> = pairs_desc
        .iter()
        .rev()
        .map(|&(ai, _)| a[ai as usize])
        .collect();

    let mut blocks = Vec::new();
    if let Some(&(a0, b0)) = pairs_desc.first() {
        let mut cur = LcsBlock {
            a_start: a0,
            a_end: a0,
            b_start: b0,
            b_end: b0,
            len: 0,
        };
        for &(ai, bi) in &pairs_desc[1..] {
            if ai == cur.a_start - 1 && bi == cur.b_start - 1 {
                cur.a_start = ai;
                cur.b_start = bi;
            } else {
                cur.len = cur.a_end - cur.a_start + 1;
                blocks.push(cur);
                cur = LcsBlock {
                    a_start: ai,
                    a_end: ai,
                    b_start: bi,
                    b_end: bi,
                    len: 0,
                };
            }
        }
        cur.len = cur.a_end - cur.a_start + 1;
        blocks.push(cur);
    }

    LcsOutcome {
        subsequence,
        blocks_desc: blocks,
    }
}
