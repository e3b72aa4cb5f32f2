//! Connection and server administration handlers.

use bytes::Bytes;

use hearth_protocol::{encode_command, Reply, RespVersion};

use crate::dispatch::{arg, Ctx, Verdict};
use crate::info;

use super::{command_table, err, reply};

pub fn ping(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let _ = ctx;
    match args.len() {
        1 => reply(Reply::Simple("PONG".into())),
        2 => reply(Reply::Bulk(args[1].clone())),
        _ => err("ERR wrong number of arguments for 'ping' command"),
    }
}

pub fn echo(_ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    reply(Reply::Bulk(args[1].clone()))
}

pub fn quit(ctx: &mut Ctx<'_>, _args: &[Bytes]) -> Verdict {
    ctx.session.should_close = true;
    reply(Reply::ok())
}

pub fn hello(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let mut i = 1;
    if let Some(ver_raw) = args.get(1) {
        // a bare HELLO keeps the current protocol
        if !ver_raw.is_empty() && ver_raw[0].is_ascii_digit() {
            match arg::as_i64(ver_raw) {
                Ok(2) => ctx.session.resp = RespVersion::Resp2,
                Ok(3) => ctx.session.resp = RespVersion::Resp3,
                _ => {
                    return err(
                        "NOPROTO unsupported protocol version",
                    )
                }
            }
            i = 2;
        }
    }
    while i < args.len() {
        match args[i].to_ascii_uppercase().as_slice() {
            b"AUTH" => i += 3, // no ACL: accept any credentials
            b"SETNAME" => {
                if let Some(name) = args.get(i + 1) {
                    ctx.session.name = Some(String::from_utf8_lossy(name).into_owned());
                }
                i += 2;
            }
            _ => return err("ERR syntax error in HELLO"),
        }
    }

    let role = if ctx.shared.repl.is_replica() {
        "replica"
    } else {
        "master"
    };
    reply(Reply::Map(vec![
        (Reply::bulk_string("server"), Reply::bulk_string("redis")),
        (Reply::bulk_string("version"), Reply::bulk_string("7.2.5")),
        (
            Reply::bulk_string("proto"),
            Reply::Integer(ctx.session.resp.as_number()),
        ),
        (
            Reply::bulk_string("id"),
            Reply::Integer(ctx.session.id as i64),
        ),
        (Reply::bulk_string("mode"), Reply::bulk_string("standalone")),
        (Reply::bulk_string("role"), Reply::bulk_string(role)),
        (Reply::bulk_string("modules"), Reply::Array(Vec::new())),
    ]))
}

pub fn auth(_ctx: &mut Ctx<'_>, _args: &[Bytes]) -> Verdict {
    // no password is configured in this build
    err("ERR Client sent AUTH, but no password is set. Did you mean AUTH <username> <password>?")
}

pub fn client(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    match args[1].to_ascii_uppercase().as_slice() {
        b"SETNAME" => {
            if args.len() != 3 {
                return err("ERR wrong number of arguments for 'client|setname' command");
            }
            ctx.session.name = Some(String::from_utf8_lossy(&args[2]).into_owned());
            reply(Reply::ok())
        }
        b"GETNAME" => reply(
            ctx.session
                .name
                .clone()
                .map(Reply::bulk_string)
                .unwrap_or_else(|| Reply::bulk(&b""[..])),
        ),
        b"ID" => reply(Reply::Integer(ctx.session.id as i64)),
        b"LIST" => {
            let row = format!(
                "id={} name={} db={} resp={}\n",
                ctx.session.id,
                ctx.session.name.as_deref().unwrap_or(""),
                ctx.session.db,
                ctx.session.resp.as_number()
            );
            reply(Reply::bulk_string(row))
        }
        b"NO-EVICT" | b"NO-TOUCH" | b"REPLY" => reply(Reply::ok()),
        _ => err(format!(
            "ERR Unknown subcommand or wrong number of arguments for '{}'",
            String::from_utf8_lossy(&args[1])
        )),
    }
}

pub fn select(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    match arg::as_u64(&args[1]) {
        Ok(n) if (n as usize) < ctx.shared.store.db_count() => {
            ctx.session.db = n as usize;
            reply(Reply::ok())
        }
        _ => err("ERR DB index is out of range"),
    }
}

pub fn swapdb(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let (a, b) = match (arg::as_u64(&args[1]), arg::as_u64(&args[2])) {
        (Ok(a), Ok(b)) => (a as usize, b as usize),
        _ => return err("ERR invalid first DB index"),
    };
    if a >= ctx.shared.store.db_count() || b >= ctx.shared.store.db_count() {
        return err("ERR DB index is out of range");
    }
    ctx.shared.store.swap_dbs(a, b);
    reply(Reply::ok())
}

pub fn dbsize(ctx: &mut Ctx<'_>, _args: &[Bytes]) -> Verdict {
    let len = ctx.shared.store.db(ctx.session.db).len();
    reply(Reply::Integer(len as i64))
}

pub fn flushdb(ctx: &mut Ctx<'_>, _args: &[Bytes]) -> Verdict {
    ctx.shared.store.db(ctx.session.db).clear();
    reply(Reply::ok())
}

pub fn flushall(ctx: &mut Ctx<'_>, _args: &[Bytes]) -> Verdict {
    ctx.shared.store.flush_all();
    reply(Reply::ok())
}

pub fn info(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let section = args.get(1).map(|s| String::from_utf8_lossy(s).into_owned());
    let text = info::render(ctx.rt, ctx.shared, section.as_deref());
    reply(Reply::bulk_string(text))
}

pub fn config(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    match args[1].to_ascii_uppercase().as_slice() {
        b"GET" => {
            if args.len() < 3 {
                return err("ERR wrong number of arguments for 'config|get' command");
            }
            let mut out = Vec::new();
            for (name, value) in ctx.shared.config.entries() {
                let matched = args[2..].iter().any(|pattern| {
                    hearth_core::glob::glob_match(pattern, name.as_bytes())
                });
                if matched {
                    out.push((Reply::bulk_string(name), Reply::bulk_string(value)));
                }
            }
            reply(Reply::Map(out))
        }
        b"SET" => {
            if args.len() < 4 || args.len() % 2 != 0 {
                return err("ERR wrong number of arguments for 'config|set' command");
            }
            for pair in args[2..].chunks(2) {
                let name = String::from_utf8_lossy(&pair[0]);
                let value = String::from_utf8_lossy(&pair[1]);
                if let Err(msg) = ctx.shared.config.set(&name, &value) {
                    return err(msg);
                }
            }
            reply(Reply::ok())
        }
        b"RESETSTAT" => {
            ctx.shared.stats = Default::default();
            reply(Reply::ok())
        }
        b"REWRITE" => err("ERR The server is running without a config file"),
        _ => err(format!(
            "ERR Unknown CONFIG subcommand or wrong number of arguments for '{}'",
            String::from_utf8_lossy(&args[1])
        )),
    }
}

pub fn command(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let _ = ctx;
    let table = command_table();
    if args.len() >= 2 && args[1].eq_ignore_ascii_case(b"COUNT") {
        return reply(Reply::Integer(table.len() as i64));
    }
    if args.len() >= 2 && args[1].eq_ignore_ascii_case(b"DOCS") {
        return reply(Reply::Map(Vec::new()));
    }
    let rows = table
        .values()
        .map(|spec| {
            Reply::Array(vec![
                Reply::bulk_string(spec.name.to_ascii_lowercase()),
                Reply::Integer(spec.arity as i64),
                Reply::Array(
                    spec.flag_names()
                        .into_iter()
                        .map(|f| Reply::Simple(f.into()))
                        .collect(),
                ),
                Reply::Integer(spec.first_key as i64),
                Reply::Integer(spec.last_key as i64),
                Reply::Integer(spec.key_step as i64),
            ])
        })
        .collect();
    reply(Reply::Array(rows))
}

pub fn time(ctx: &mut Ctx<'_>, _args: &[Bytes]) -> Verdict {
    let now_ms = ctx.now_ms();
    reply(Reply::Array(vec![
        Reply::bulk_string((now_ms / 1000).to_string()),
        Reply::bulk_string(((now_ms % 1000) * 1000).to_string()),
    ]))
}

pub fn debug(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    match args[1].to_ascii_uppercase().as_slice() {
        b"JMAP" | b"QUICKLIST-PACKED-THRESHOLD" | b"CHANGE-REPL-ID" => reply(Reply::ok()),
        b"SET-ACTIVE-EXPIRE" => {
            let enabled = args.get(2).map(|v| v.as_ref() != b"0").unwrap_or(true);
            ctx.shared.active_expire_enabled = enabled;
            reply(Reply::ok())
        }
        b"SLEEP" => {
            let secs = args
                .get(2)
                .and_then(|v| std::str::from_utf8(v).ok())
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(0.0);
            // sleeping with the execution lock held is the point: it
            // simulates a stalled command stream
            std::thread::sleep(std::time::Duration::from_secs_f64(secs.clamp(0.0, 60.0)));
            reply(Reply::ok())
        }
        b"STRINGMATCH-LEN" => {
            if args.len() != 4 {
                return err("ERR wrong number of arguments");
            }
            let matched = hearth_core::glob::glob_match(&args[2], &args[3]);
            reply(Reply::Integer(i64::from(matched)))
        }
        b"DIGEST-VALUE" => {
            let now = ctx.now_ms();
            let out = args[2..]
                .iter()
                .map(|key| {
                    match ctx
                        .shared
                        .store
                        .db(ctx.session.db)
                        .debug_digest_value(key, now)
                    {
                        Some(digest) => Reply::bulk_string(digest),
                        None => Reply::Null,
                    }
                })
                .collect();
            reply(Reply::Array(out))
        }
        _ => err(format!(
            "ERR DEBUG subcommand '{}' not supported",
            String::from_utf8_lossy(&args[1])
        )),
    }
}

pub fn object(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    if args.len() < 3 {
        return err("ERR wrong number of arguments for 'object' command");
    }
    let now = ctx.now_ms();
    match args[1].to_ascii_uppercase().as_slice() {
        b"ENCODING" => {
            let max = ctx.shared.config.zset_max_listpack_entries;
            match ctx
                .shared
                .store
                .db(ctx.session.db)
                .object_encoding(&args[2], now, max)
            {
                Some(enc) => reply(Reply::bulk_string(enc)),
                None => err("ERR no such key"),
            }
        }
        b"REFCOUNT" => {
            if ctx.shared.store.db(ctx.session.db).exists(&args[2], now) {
                reply(Reply::Integer(1))
            } else {
                err("ERR no such key")
            }
        }
        b"IDLETIME" | b"FREQ" => {
            if ctx.shared.store.db(ctx.session.db).exists(&args[2], now) {
                reply(Reply::Integer(0))
            } else {
                err("ERR no such key")
            }
        }
        _ => err(format!(
            "ERR Unknown subcommand or wrong number of arguments for '{}'",
            String::from_utf8_lossy(&args[1])
        )),
    }
}

pub fn save(ctx: &mut Ctx<'_>, _args: &[Bytes]) -> Verdict {
    let path = ctx.rt.startup.rdb_path();
    match hearth_persistence::save_rdb_file(&mut ctx.shared.store, &path) {
        Ok(()) => {
            ctx.shared.dirty = 0;
            ctx.shared.lastsave_unix = ctx.now_ms() / 1000;
            reply(Reply::ok())
        }
        Err(e) => err(format!("ERR {e}")),
    }
}

/// BGSAVE: the snapshot bytes are taken under the lock, the file write
/// happens on a background task.
pub fn bgsave(ctx: &mut Ctx<'_>, _args: &[Bytes]) -> Verdict {
    let data = hearth_persistence::encode_snapshot(&mut ctx.shared.store);
    ctx.shared.dirty = 0;
    ctx.shared.lastsave_unix = ctx.now_ms() / 1000;
    let path = ctx.rt.startup.rdb_path();
    tokio::spawn(async move {
        if let Err(e) = tokio::fs::write(&path, data).await {
            tracing::error!(path = %path.display(), error = %e, "background save failed");
        }
    });
    reply(Reply::Simple("Background saving started".into()))
}

pub fn lastsave(ctx: &mut Ctx<'_>, _args: &[Bytes]) -> Verdict {
    reply(Reply::Integer(ctx.shared.lastsave_unix as i64))
}

/// BGREWRITEAOF: the log is rebuilt from the live keyspace as one
/// canonical command per key.
pub fn bgrewriteaof(ctx: &mut Ctx<'_>, _args: &[Bytes]) -> Verdict {
    let commands = rebuild_commands(ctx);
    match ctx.shared.aof.rewrite(&commands) {
        Ok(()) => reply(Reply::Simple("Background append only file rewriting started".into())),
        Err(e) => err(format!("ERR {e}")),
    }
}

fn rebuild_commands(ctx: &mut Ctx<'_>) -> Vec<Bytes> {
    use hearth_core::types::stream::StreamId;
    use hearth_core::types::Value;

    let now = ctx.now_ms();
    let mut out = Vec::new();
    let store = &mut ctx.shared.store;
    for dbi in 0..store.db_count() {
        let db = store.db(dbi);
        if db.is_empty() {
            continue;
        }
        out.push(encode_command(&[
            Bytes::from_static(b"SELECT"),
            Bytes::from(dbi.to_string().into_bytes()),
        ]));
        let mut keys: Vec<Bytes> = db.iter_entries().map(|(k, _)| k.clone()).collect();
        keys.sort();
        for key in keys {
            let Some(entry) = db.snapshot_entry(&key, now) else {
                continue;
            };
            match &entry.value {
                Value::String(s) => {
                    out.push(encode_command(&[
                        Bytes::from_static(b"SET"),
                        key.clone(),
                        s.clone(),
                    ]));
                }
                Value::List(list) => {
                    let mut argv = vec![Bytes::from_static(b"RPUSH"), key.clone()];
                    argv.extend(list.iter().cloned());
                    out.push(encode_command(&argv));
                }
                Value::Set(set) => {
                    let mut argv = vec![Bytes::from_static(b"SADD"), key.clone()];
                    let mut members: Vec<&Bytes> = set.iter().collect();
                    members.sort();
                    argv.extend(members.into_iter().cloned());
                    out.push(encode_command(&argv));
                }
                Value::Hash(hash) => {
                    let mut argv = vec![Bytes::from_static(b"HSET"), key.clone()];
                    let mut fields: Vec<(&Bytes, &Bytes)> = hash.iter().collect();
                    fields.sort_by(|a, b| a.0.cmp(b.0));
                    for (f, v) in fields {
                        argv.push(f.clone());
                        argv.push(v.clone());
                    }
                    out.push(encode_command(&argv));
                }
                Value::Zset(zset) => {
                    let mut argv = vec![Bytes::from_static(b"ZADD"), key.clone()];
                    for (member, score) in zset.iter() {
                        argv.push(Bytes::from(
                            Reply::format_double(score).into_bytes(),
                        ));
                        argv.push(member.clone());
                    }
                    out.push(encode_command(&argv));
                }
                Value::Stream(stream) => {
                    for (id, fields) in stream.range(StreamId::MIN, StreamId::MAX, false, 0) {
                        let mut argv = vec![
                            Bytes::from_static(b"XADD"),
                            key.clone(),
                            Bytes::from(id.to_string().into_bytes()),
                        ];
                        for (f, v) in fields {
                            argv.push(f);
                            argv.push(v);
                        }
                        out.push(encode_command(&argv));
                    }
                }
            }
            if entry.expire_at_ms != 0 {
                out.push(encode_command(&[
                    Bytes::from_static(b"PEXPIREAT"),
                    key.clone(),
                    Bytes::from(entry.expire_at_ms.to_string().into_bytes()),
                ]));
            }
        }
    }
    out
}

pub fn shutdown(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let nosave = args
        .get(1)
        .map(|a| a.eq_ignore_ascii_case(b"NOSAVE"))
        .unwrap_or(false);
    if !nosave {
        let path = ctx.rt.startup.rdb_path();
        if let Err(e) = hearth_persistence::save_rdb_file(&mut ctx.shared.store, &path) {
            tracing::error!(error = %e, "shutdown save failed");
        }
    }
    tracing::info!("shutting down");
    std::process::exit(0);
}

pub fn lolwut(_ctx: &mut Ctx<'_>, _args: &[Bytes]) -> Verdict {
    reply(Reply::bulk_string("Redis ver. 7.2.5\n"))
}

pub fn module(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    match args[1].to_ascii_uppercase().as_slice() {
        b"LIST" => {
            let out = ctx
                .shared
                .module_commands
                .keys()
                .map(|name| Reply::bulk_string(name.clone()))
                .collect();
            reply(Reply::Array(out))
        }
        b"LOAD" => err("ERR Error loading the extension. Please check the server logs."),
        _ => err(format!(
            "ERR Unknown subcommand or wrong number of arguments for '{}'",
            String::from_utf8_lossy(&args[1])
        )),
    }
}
