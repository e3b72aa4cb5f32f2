//! EVAL/EVALSHA/SCRIPT handlers.
//!
//! The engine is taken out of the shared state for the duration of an
//! evaluation so the redis.call closure can re-enter the dispatcher
//! with the same `&mut Shared`. The clock freezes on entry and thaws on
//! exit, the busy/kill atomics bracket the run, and constituent writes
//! replicate themselves through their own commits (EVAL itself never
//! reaches the journal).

use std::sync::atomic::Ordering;

use bytes::Bytes;

use hearth_protocol::Reply;
use hearth_script::{parse_shebang, referenced_commands, Watchdog};

use crate::dispatch::{arg, execute_to_reply, Ctx, Verdict};
use crate::session::Source;

use super::{command_table, err, reply, READONLY, WRITE};

pub fn eval(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    eval_generic(ctx, args, false, false)
}

pub fn evalsha(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    eval_generic(ctx, args, true, false)
}

pub fn eval_ro(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    eval_generic(ctx, args, false, true)
}

pub fn evalsha_ro(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    eval_generic(ctx, args, true, true)
}

fn eval_generic(ctx: &mut Ctx<'_>, args: &[Bytes], by_sha: bool, force_readonly: bool) -> Verdict {
    let numkeys = match arg::as_i64(&args[2]) {
        Ok(n) if n >= 0 => n as usize,
        Ok(_) => return err("ERR Number of keys can't be negative"),
        Err(e) => return err(e),
    };
    if 3 + numkeys > args.len() {
        return err("ERR Number of keys can't be greater than number of args");
    }
    let keys: Vec<Bytes> = args[3..3 + numkeys].to_vec();
    let argv: Vec<Bytes> = args[3 + numkeys..].to_vec();

    // resolve the source: inline body or cache lookup
    let source: Vec<u8> = if by_sha {
        let sha = String::from_utf8_lossy(&args[1]).to_ascii_lowercase();
        let Some(engine) = ctx.shared.engine.as_ref() else {
            return err("ERR scripting engine unavailable");
        };
        match engine.cached(&sha) {
            Some(body) => body,
            None => {
                return err("NOSCRIPT No matching script. Please use EVAL.");
            }
        }
    } else {
        let body = args[1].to_vec();
        if let Some(engine) = ctx.shared.engine.as_mut() {
            engine.cache_script(&body);
        }
        body
    };

    let (flags, body) = match parse_shebang(&source) {
        Ok(v) => v,
        Err(msg) => return err(format!("ERR {msg}")),
    };

    // writer detection: explicit shebang flags govern; otherwise the
    // script counts as a writer unless every referenced command is a
    // read
    let readonly = force_readonly
        || flags.no_writes
        || (!flags.has_shebang && {
            let referenced = referenced_commands(&source);
            !referenced.is_empty()
                && referenced.iter().all(|name| {
                    command_table()
                        .get(name.as_str())
                        .map(|spec| spec.has_flag(READONLY))
                        .unwrap_or(false)
                })
        });
    let bypass_oom = flags.allow_oom || flags.no_writes || readonly;

    if !readonly && !bypass_oom && ctx.shared.oom_active() {
        return err("OOM command not allowed when used memory > 'maxmemory'.");
    }

    let Some(engine) = ctx.shared.engine.take() else {
        return err("ERR scripting engine unavailable");
    };

    let watchdog = Watchdog {
        busy: ctx.rt.script_busy.clone(),
        kill: ctx.rt.script_kill.clone(),
        time_limit_ms: ctx.shared.config.lua_time_limit,
    };
    let client_resp3 = ctx.session.resp == hearth_protocol::RespVersion::Resp3;

    // scripts observe one frozen timestamp for their whole run
    let clock = ctx.rt.clock.clone();
    clock.freeze();
    ctx.rt
        .busy_script_session
        .store(ctx.session.id, Ordering::Relaxed);
    let prev_allow_oom = ctx.shared.script_allow_oom;
    ctx.shared.script_allow_oom = bypass_oom;
    let prev_source = ctx.source;
    ctx.source = Source::Script;

    let body = body.to_vec();
    let result = {
        let ctx_cell = std::cell::RefCell::new(&mut *ctx);
        let mut dispatch = |argv: Vec<Bytes>| -> Reply {
            let mut guard = ctx_cell.borrow_mut();
            if readonly {
                if let Some(first) = argv.first() {
                    let name = String::from_utf8_lossy(first).to_ascii_uppercase();
                    if command_table()
                        .get(name.as_str())
                        .map(|spec| spec.has_flag(WRITE))
                        .unwrap_or(false)
                    {
                        return Reply::error(
                            "ERR Write commands are not allowed from read-only scripts.",
                        );
                    }
                }
            }
            execute_to_reply(&mut **guard, &argv)
        };
        engine.eval(&body, &keys, &argv, client_resp3, &watchdog, &mut dispatch)
    };

    ctx.source = prev_source;
    ctx.shared.script_allow_oom = prev_allow_oom;
    ctx.shared.engine = Some(engine);
    ctx.rt.script_busy.store(false, Ordering::Release);
    ctx.rt.script_kill.store(false, Ordering::Release);
    ctx.rt.busy_script_session.store(0, Ordering::Relaxed);
    clock.unfreeze();

    // EVAL never reaches the journal itself; its writes replicated
    // individually through the re-entrant commits above. Set last so
    // an inner command cannot clear it.
    ctx.no_propagate = true;
    reply(result)
}

pub fn script(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    ctx.no_propagate = true;
    let sub = args[1].to_ascii_uppercase();
    match sub.as_slice() {
        b"LOAD" => {
            if args.len() != 3 {
                return err("ERR wrong number of arguments for 'script|load' command");
            }
            // reject scripts that would not compile later
            if let Err(msg) = parse_shebang(&args[2]) {
                return err(format!("ERR {msg}"));
            }
            let Some(engine) = ctx.shared.engine.as_mut() else {
                return err("ERR scripting engine unavailable");
            };
            let sha = engine.cache_script(&args[2]);
            reply(Reply::bulk_string(sha))
        }
        b"EXISTS" => {
            let Some(engine) = ctx.shared.engine.as_ref() else {
                return err("ERR scripting engine unavailable");
            };
            let out = args[2..]
                .iter()
                .map(|sha| {
                    let sha = String::from_utf8_lossy(sha).to_ascii_lowercase();
                    Reply::Integer(i64::from(engine.cache_contains(&sha)))
                })
                .collect();
            reply(Reply::Array(out))
        }
        b"FLUSH" => {
            if let Some(engine) = ctx.shared.engine.as_mut() {
                engine.flush_cache();
            }
            reply(Reply::ok())
        }
        b"KILL" => {
            if ctx.rt.script_busy.load(Ordering::Acquire) {
                ctx.rt.script_kill.store(true, Ordering::Release);
                reply(Reply::ok())
            } else {
                err("NOTBUSY No scripts in execution right now.")
            }
        }
        _ => err(format!(
            "ERR Unknown SCRIPT subcommand or wrong number of arguments for '{}'",
            String::from_utf8_lossy(&args[1])
        )),
    }
}

/// FUNCTION surface: the library subsystem is not built, but the
/// kill/list verbs reply in standard shapes so tooling doesn't choke.
pub fn function(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    ctx.no_propagate = true;
    let sub = args[1].to_ascii_uppercase();
    match sub.as_slice() {
        b"LIST" => reply(Reply::Array(Vec::new())),
        b"DUMP" => reply(Reply::Null),
        b"STATS" => reply(Reply::Map(vec![
            (Reply::bulk_string("running_script"), Reply::Null),
            (Reply::bulk_string("engines"), Reply::Map(Vec::new())),
        ])),
        b"KILL" => {
            if ctx.rt.script_busy.load(Ordering::Acquire) {
                ctx.rt.script_kill.store(true, Ordering::Release);
                reply(Reply::ok())
            } else {
                err("NOTBUSY No scripts in execution right now.")
            }
        }
        _ => err(format!(
            "ERR Unknown subcommand or wrong number of arguments for '{}'",
            String::from_utf8_lossy(&args[1])
        )),
    }
}
