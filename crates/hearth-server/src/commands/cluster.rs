//! Cluster command handlers: slot queries, SETSLOT state transitions,
//! ASKING, and the synchronous MIGRATE client.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use bytes::Bytes;

use hearth_cluster::{key_slot, SlotRoute, SLOT_COUNT};
use hearth_persistence::dump_entry;
use hearth_protocol::{encode_command, Reply};

use crate::dispatch::{arg, Ctx, Verdict};

use super::{err, reply};

pub fn asking(ctx: &mut Ctx<'_>, _args: &[Bytes]) -> Verdict {
    ctx.session.asking = true;
    reply(Reply::ok())
}

pub fn readonly(_ctx: &mut Ctx<'_>, _args: &[Bytes]) -> Verdict {
    reply(Reply::ok())
}

pub fn readwrite(_ctx: &mut Ctx<'_>, _args: &[Bytes]) -> Verdict {
    reply(Reply::ok())
}

pub fn cluster(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let sub = args[1].to_ascii_uppercase();
    match sub.as_slice() {
        b"KEYSLOT" => {
            if args.len() != 3 {
                return err("ERR wrong number of arguments for 'cluster|keyslot' command");
            }
            reply(Reply::Integer(key_slot(&args[2]) as i64))
        }
        b"INFO" => {
            let owned = ctx.shared.routes.owned_count();
            let state = if owned > 0 { "ok" } else { "fail" };
            let text = format!(
                "cluster_enabled:0\r\ncluster_state:{state}\r\ncluster_slots_assigned:{owned}\r\n\
                 cluster_known_nodes:1\r\ncluster_size:1\r\n"
            );
            reply(Reply::bulk_string(text))
        }
        b"MYID" => reply(Reply::bulk_string(ctx.shared.repl.replication_id.clone())),
        b"SLOTS" => {
            // one contiguous self-owned range per stretch of Owned slots
            let addr = format!("{}:{}", ctx.rt.startup.bind, ctx.rt.startup.port);
            let mut out = Vec::new();
            let mut start: Option<u16> = None;
            for slot in 0..SLOT_COUNT {
                let owned = ctx.shared.routes.route(slot) == SlotRoute::Owned;
                match (owned, start) {
                    (true, None) => start = Some(slot),
                    (false, Some(s)) => {
                        out.push(slot_range_reply(s, slot - 1, &addr));
                        start = None;
                    }
                    _ => {}
                }
            }
            if let Some(s) = start {
                out.push(slot_range_reply(s, SLOT_COUNT - 1, &addr));
            }
            reply(Reply::Array(out))
        }
        b"SHARDS" => reply(Reply::Array(Vec::new())),
        b"COUNTKEYSINSLOT" => {
            if args.len() != 3 {
                return err("ERR wrong number of arguments");
            }
            let Ok(slot) = arg::as_u64(&args[2]) else {
                return err("ERR Invalid slot");
            };
            let now = ctx.now_ms();
            let keys = ctx.shared.store.db(ctx.session.db).keys(b"*", now);
            let count = keys
                .iter()
                .filter(|k| key_slot(k) as u64 == slot)
                .count();
            reply(Reply::Integer(count as i64))
        }
        b"GETKEYSINSLOT" => {
            if args.len() != 4 {
                return err("ERR wrong number of arguments");
            }
            let Ok(slot) = arg::as_u64(&args[2]) else {
                return err("ERR Invalid slot");
            };
            let Ok(limit) = arg::as_u64(&args[3]) else {
                return err("ERR Invalid count");
            };
            let now = ctx.now_ms();
            let keys = ctx.shared.store.db(ctx.session.db).keys(b"*", now);
            let out = keys
                .into_iter()
                .filter(|k| key_slot(k) as u64 == slot)
                .take(limit as usize)
                .map(Reply::Bulk)
                .collect();
            reply(Reply::Array(out))
        }
        b"SETSLOT" => setslot(ctx, args),
        b"ADDSLOTS" | b"DELSLOTS" => {
            let owned = sub.as_slice() == b"ADDSLOTS";
            for raw in &args[2..] {
                let Ok(slot) = arg::as_u64(raw) else {
                    return err("ERR Invalid or out of range slot");
                };
                if slot >= SLOT_COUNT as u64 {
                    return err("ERR Invalid or out of range slot");
                }
                ctx.shared.routes.set_route(
                    slot as u16,
                    if owned { SlotRoute::Owned } else { SlotRoute::Moved },
                );
            }
            reply(Reply::ok())
        }
        _ => err(format!(
            "ERR Unknown CLUSTER subcommand or wrong number of arguments for '{}'",
            String::from_utf8_lossy(&args[1])
        )),
    }
}

fn slot_range_reply(start: u16, end: u16, addr: &str) -> Reply {
    let (host, port) = addr.split_once(':').unwrap_or((addr, "0"));
    Reply::Array(vec![
        Reply::Integer(start as i64),
        Reply::Integer(end as i64),
        Reply::Array(vec![
            Reply::bulk_string(host),
            Reply::Integer(port.parse::<i64>().unwrap_or(0)),
        ]),
    ])
}

/// `CLUSTER SETSLOT <slot> NODE <id> | MIGRATING <id> | IMPORTING <id>
/// | STABLE`. NODE toggles Owned/Moved depending on whether the id is
/// this node; MIGRATING/IMPORTING park the slot in the ask state.
fn setslot(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    if args.len() < 4 {
        return err("ERR wrong number of arguments for 'cluster|setslot' command");
    }
    let Ok(slot) = arg::as_u64(&args[2]) else {
        return err("ERR Invalid or out of range slot");
    };
    if slot >= SLOT_COUNT as u64 {
        return err("ERR Invalid or out of range slot");
    }
    let slot = slot as u16;
    match args[3].to_ascii_uppercase().as_slice() {
        b"NODE" => {
            let id = args.get(4).map(|b| String::from_utf8_lossy(b).to_string());
            let is_self = match &id {
                Some(id) => {
                    id.eq_ignore_ascii_case("self") || *id == ctx.shared.repl.replication_id
                }
                None => return err("ERR wrong number of arguments"),
            };
            ctx.shared.routes.set_route(
                slot,
                if is_self { SlotRoute::Owned } else { SlotRoute::Moved },
            );
            reply(Reply::ok())
        }
        b"MIGRATING" | b"IMPORTING" => {
            ctx.shared.routes.set_route(slot, SlotRoute::Ask);
            reply(Reply::ok())
        }
        b"STABLE" => {
            ctx.shared.routes.set_route(slot, SlotRoute::Owned);
            reply(Reply::ok())
        }
        _ => err("ERR Invalid CLUSTER SETSLOT action"),
    }
}

/// MIGRATE host port key dest-db timeout [COPY] [REPLACE]. Wires a
/// RESTORE to the peer over a short-lived synchronous connection and
/// deletes the local key unless COPY was given.
pub fn migrate(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let host = String::from_utf8_lossy(&args[1]).to_string();
    let Ok(port) = arg::as_u64(&args[2]) else {
        return err("ERR Invalid port");
    };
    let key = args[3].clone();
    let timeout_ms = arg::as_u64(&args[5]).unwrap_or(1000).max(1);
    let mut copy = false;
    let mut replace = false;
    for opt in &args[6..] {
        match opt.to_ascii_uppercase().as_slice() {
            b"COPY" => copy = true,
            b"REPLACE" => replace = true,
            _ => return err("ERR syntax error"),
        }
    }

    let now = ctx.now_ms();
    let Some(entry) = ctx.shared.store.db(ctx.session.db).snapshot_entry(&key, now) else {
        ctx.no_propagate = true;
        return reply(Reply::Simple("NOKEY".into()));
    };
    let ttl = match entry.expire_at_ms {
        0 => 0,
        at => at.saturating_sub(now),
    };
    let payload = dump_entry(&entry.value);

    let mut restore = vec![
        Bytes::from_static(b"RESTORE"),
        key.clone(),
        Bytes::from(ttl.to_string().into_bytes()),
        Bytes::from(payload),
    ];
    if replace {
        restore.push(Bytes::from_static(b"REPLACE"));
    }

    match send_restore(&host, port as u16, timeout_ms, &encode_command(&restore)) {
        Ok(()) => {
            if !copy {
                ctx.shared.store.db(ctx.session.db).del(&key, now);
            } else {
                ctx.no_propagate = true;
            }
            reply(Reply::ok())
        }
        Err(e) => err(format!("IOERR error or timeout during migration: {e}")),
    }
}

fn send_restore(host: &str, port: u16, timeout_ms: u64, payload: &[u8]) -> std::io::Result<()> {
    let timeout = Duration::from_millis(timeout_ms);
    let addr = format!("{host}:{port}");
    let mut stream = TcpStream::connect(&addr)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    stream.write_all(payload)?;

    let mut buf = [0u8; 512];
    let n = stream.read(&mut buf)?;
    if n == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "peer closed during RESTORE",
        ));
    }
    if buf[0] == b'-' {
        let msg = String::from_utf8_lossy(&buf[1..n]).trim_end().to_string();
        return Err(std::io::Error::other(msg));
    }
    Ok(())
}
