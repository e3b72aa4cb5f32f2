//! MULTI/EXEC/WATCH handlers.
//!
//! WATCH takes a per-key digest snapshot; EXEC compares digests, runs
//! the queue without interleaving (the caller holds the execution
//! lock for the whole EXEC), and post-processes the captured journal
//! events: one write goes out bare, several get MULTI/EXEC markers.

use bytes::Bytes;

use hearth_protocol::Reply;

use crate::dispatch::{execute_to_reply, Ctx, Verdict};
use crate::session::WatchedKey;

use super::{err, reply};

pub fn multi(ctx: &mut Ctx<'_>, _args: &[Bytes]) -> Verdict {
    if ctx.session.in_multi {
        return err("ERR MULTI calls can not be nested");
    }
    ctx.session.in_multi = true;
    ctx.session.multi_dirty = false;
    ctx.session.queued.clear();
    reply(Reply::ok())
}

pub fn discard(ctx: &mut Ctx<'_>, _args: &[Bytes]) -> Verdict {
    if !ctx.session.in_multi {
        return err("ERR DISCARD without MULTI");
    }
    ctx.session.reset_transaction();
    reply(Reply::ok())
}

pub fn watch(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    // the in-MULTI rejection happens in the dispatcher
    let now = ctx.now_ms();
    let db_index = ctx.session.db;
    for key in &args[1..] {
        let digest = ctx
            .shared
            .store
            .db(db_index)
            .debug_digest_value(key, now);
        ctx.session.watched.push(WatchedKey {
            db: db_index,
            key: key.clone(),
            digest,
        });
    }
    reply(Reply::ok())
}

pub fn unwatch(ctx: &mut Ctx<'_>, _args: &[Bytes]) -> Verdict {
    ctx.session.watched.clear();
    reply(Reply::ok())
}

pub fn exec(ctx: &mut Ctx<'_>, _args: &[Bytes]) -> Verdict {
    if !ctx.session.in_multi {
        return err("ERR EXEC without MULTI");
    }
    if ctx.session.multi_dirty {
        ctx.session.reset_transaction();
        return err("EXECABORT Transaction discarded because of previous errors.");
    }

    // optimistic check: any watched key whose digest moved aborts
    let now = ctx.now_ms();
    let watched = std::mem::take(&mut ctx.session.watched);
    for w in &watched {
        let current = ctx.shared.store.db(w.db).debug_digest_value(&w.key, now);
        if current != w.digest {
            ctx.session.reset_transaction();
            return reply(Reply::NullArray);
        }
    }

    let queued = std::mem::take(&mut ctx.session.queued);
    ctx.session.in_multi = false;
    ctx.session.multi_dirty = false;

    // pre-screen the queue against the gates that would fire mid-run
    let table = super::command_table();
    let mut has_write = false;
    let mut has_read = false;
    let mut has_replicaof = false;
    for q in &queued {
        let Some(first) = q.first() else { continue };
        let name = String::from_utf8_lossy(first).to_ascii_uppercase();
        if name == "REPLICAOF" || name == "SLAVEOF" {
            has_replicaof = true;
        }
        match table.get(name.as_str()) {
            Some(spec) if spec.has_flag(super::WRITE) => has_write = true,
            Some(_) => has_read = true,
            None => {}
        }
    }
    if has_write && ctx.shared.config.min_replicas_to_write > 0
        && ctx.shared.repl.connected_replicas < ctx.shared.config.min_replicas_to_write
    {
        return err(
            "EXECABORT Transaction discarded because of previous errors: NOREPLICAS Not enough good replicas to write.",
        );
    }
    if has_write && ctx.shared.oom_active() {
        return err(
            "EXECABORT Transaction discarded because of previous errors: OOM command not allowed when used memory > 'maxmemory'.",
        );
    }
    if has_read
        && ctx.shared.repl.is_replica()
        && !ctx.shared.config.replica_serve_stale_data
        && !ctx.shared.repl.link_up
    {
        return err(
            "EXECABORT Transaction discarded because of previous errors: MASTERDOWN Link with MASTER is down and replica-serve-stale-data is set to 'no'.",
        );
    }

    // run the queue atomically; journal events are captured on the
    // side and wrapped afterwards
    ctx.shared.journal.begin_exec_capture();
    let was_in_exec = ctx.in_exec;
    ctx.in_exec = true;
    let mut replies = Vec::with_capacity(queued.len());
    for q in &queued {
        replies.push(execute_to_reply(ctx, q));
    }
    ctx.in_exec = was_in_exec;
    ctx.shared.journal.end_exec_capture(has_replicaof);

    reply(Reply::Array(replies))
}
