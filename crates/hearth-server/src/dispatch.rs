//! Command dispatch.
//!
//! [`execute`] is the single entry point for every command regardless
//! of origin: client sockets, EXEC, script re-entry, AOF replay and
//! the master link all come through here. The gate pipeline runs in a
//! fixed order: busy-script, MULTI queueing, lookup, arity, OOM,
//! min-replicas, stale-replica reads, replica writes, cluster slot
//! routing. After the handler runs, the commit step advances the
//! mutation epoch and feeds the replication journal and AOF.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;

use hearth_cluster::{key_slot, SlotRoute};
use hearth_protocol::{encoded_command_len, Reply};

use crate::commands::{command_table, CommandSpec, WRITE};
use crate::session::{Session, Source};
use crate::state::{Runtime, Shared};

/// What a handler produced. Most commands reply immediately; blocking
/// commands park the session and WAIT polls replica acks; both are
/// finished by the connection driver outside the lock.
#[derive(Debug)]
pub enum Verdict {
    Reply(Reply),
    Block(crate::blocking::BlockRequest),
    Wait { numreplicas: usize, deadline_ms: u64 },
}

impl Verdict {
    pub fn reply(self) -> Reply {
        match self {
            Verdict::Reply(r) => r,
            // inside EXEC/scripts the blocking paths are disabled, so
            // these variants cannot reach a nested caller
            Verdict::Block(_) | Verdict::Wait { .. } => Reply::Null,
        }
    }
}

/// Execution context threaded through every handler.
pub struct Ctx<'a> {
    pub rt: &'a Arc<Runtime>,
    pub shared: &'a mut Shared,
    pub session: &'a mut Session,
    pub source: Source,
    /// True while EXEC drains its queue; disables parking.
    pub in_exec: bool,
    /// Set by a handler whose write had no effect (SET NX miss,
    /// MSETNX 0); skips the commit step so nothing is propagated.
    pub no_propagate: bool,
}

impl Ctx<'_> {
    pub fn now_ms(&self) -> u64 {
        self.shared.store.now_ms()
    }

    /// Blocking commands fall back to their non-blocking shape inside
    /// EXEC, scripts and replay.
    pub fn may_block(&self) -> bool {
        self.source == Source::Client && !self.in_exec
    }
}

const BUSY_MSG: &str =
    "BUSY Redis is busy running a script. You can only call SCRIPT KILL or SHUTDOWN NOSAVE.";
const MASTERDOWN_MSG: &str =
    "MASTERDOWN Link with MASTER is down and replica-serve-stale-data is set to 'no'.";
const OOM_MSG: &str = "OOM command not allowed when used memory > 'maxmemory'.";
const NOREPLICAS_MSG: &str = "NOREPLICAS Not enough good replicas to write.";
const READONLY_MSG: &str = "READONLY You can't write against a read only replica.";

pub fn execute(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    if args.is_empty() {
        return Verdict::Reply(Reply::error("ERR Protocol error"));
    }
    let cmd = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
    let table = command_table();

    // ── busy-script gate ──────────────────────────────────────────────
    let is_script_kill = (cmd == "SCRIPT" || cmd == "FUNCTION")
        && args.len() == 2
        && args[1].eq_ignore_ascii_case(b"KILL");
    let is_shutdown_nosave =
        cmd == "SHUTDOWN" && args.len() == 2 && args[1].eq_ignore_ascii_case(b"NOSAVE");
    if ctx.rt.script_busy.load(Ordering::Acquire) && !is_script_kill && !is_shutdown_nosave {
        let own_script = ctx.rt.busy_script_session.load(Ordering::Relaxed) == ctx.session.id;
        if cmd == "PING" && own_script {
            return Verdict::Reply(if args.len() == 2 {
                Reply::Bulk(args[1].clone())
            } else {
                Reply::Simple("PONG".into())
            });
        }
        if ctx.session.in_multi && cmd == "EXEC" {
            ctx.session.reset_transaction();
            return Verdict::Reply(Reply::error(format!(
                "EXECABORT Transaction discarded because of previous errors: {BUSY_MSG}"
            )));
        }
        if ctx.session.in_multi && cmd != "DISCARD" && cmd != "MULTI" && cmd != "QUIT" {
            ctx.session.multi_dirty = true;
        }
        return Verdict::Reply(Reply::error(BUSY_MSG));
    }

    // ── MULTI queueing ────────────────────────────────────────────────
    if ctx.session.in_multi
        && !matches!(cmd.as_str(), "EXEC" | "DISCARD" | "MULTI" | "QUIT" | "WATCH")
    {
        return Verdict::Reply(queue_command(ctx, &cmd, args, table));
    }
    if ctx.session.in_multi && cmd == "WATCH" {
        return Verdict::Reply(Reply::error("ERR WATCH inside MULTI is not allowed"));
    }

    // ── lookup ────────────────────────────────────────────────────────
    let Some(spec) = table.get(cmd.as_str()) else {
        if let Some(reply) = ctx.shared.module_commands.get(&cmd) {
            return Verdict::Reply(Reply::Simple(reply.clone()));
        }
        return Verdict::Reply(Reply::error(format!(
            "ERR unknown command '{}'",
            String::from_utf8_lossy(&args[0])
        )));
    };

    if !spec.arity_ok(args.len()) {
        return Verdict::Reply(Reply::error(format!(
            "ERR wrong number of arguments for '{}' command",
            cmd.to_ascii_lowercase()
        )));
    }

    ctx.shared.stats.record_call(&cmd);
    let is_write = spec.has_flag(WRITE);

    if ctx.source == Source::Script && spec.has_flag(crate::commands::NOSCRIPT) {
        return Verdict::Reply(Reply::error(
            "ERR This Redis command is not allowed from script",
        ));
    }

    // ── resource gates ────────────────────────────────────────────────
    if is_write
        && ctx.shared.oom_active()
        && !ctx.shared.script_allow_oom
        && !matches!(cmd.as_str(), "CONFIG" | "EVAL" | "EVALSHA" | "FLUSHALL" | "FLUSHDB")
    {
        ctx.shared.stats.record_rejection(&cmd, "OOM");
        return Verdict::Reply(Reply::error(OOM_MSG));
    }
    if is_write
        && ctx.shared.config.min_replicas_to_write > 0
        && ctx.shared.repl.connected_replicas < ctx.shared.config.min_replicas_to_write
        && !matches!(
            cmd.as_str(),
            "EVAL" | "EVALSHA" | "CONFIG" | "REPLICAOF" | "SLAVEOF"
        )
    {
        ctx.shared.stats.record_rejection(&cmd, "NOREPLICAS");
        return Verdict::Reply(Reply::error(NOREPLICAS_MSG));
    }
    if !is_write
        && ctx.shared.repl.is_replica()
        && !ctx.shared.config.replica_serve_stale_data
        && !ctx.shared.repl.link_up
        && !matches!(
            cmd.as_str(),
            "REPLICAOF" | "SLAVEOF" | "INFO" | "MULTI" | "EXEC" | "DISCARD" | "COMMAND" | "CONFIG"
        )
    {
        return Verdict::Reply(Reply::error(MASTERDOWN_MSG));
    }
    if is_write
        && ctx.shared.repl.is_replica()
        && ctx.source == Source::Client
        && !ctx.in_exec
        && !matches!(cmd.as_str(), "REPLICAOF" | "SLAVEOF")
    {
        ctx.shared.stats.record_rejection(&cmd, "READONLY");
        return Verdict::Reply(Reply::error(READONLY_MSG));
    }

    // ── cluster slot routing ──────────────────────────────────────────
    if spec.first_key > 0 && (spec.first_key as usize) < args.len() {
        let slot = key_slot(&args[spec.first_key as usize]);
        match ctx.shared.routes.route(slot) {
            SlotRoute::Owned => {}
            SlotRoute::Moved => {
                return Verdict::Reply(Reply::error(format!(
                    "MOVED {slot} {}",
                    ctx.shared.routes.redirect_addr()
                )));
            }
            SlotRoute::Ask => {
                if ctx.session.asking {
                    ctx.session.asking = false;
                } else {
                    return Verdict::Reply(Reply::error(format!(
                        "ASK {slot} {}",
                        ctx.shared.routes.redirect_addr()
                    )));
                }
            }
        }
    }
    if cmd != "ASKING" {
        ctx.session.asking = false;
    }

    // ── handler + commit ──────────────────────────────────────────────
    ctx.no_propagate = false;
    let verdict = (spec.handler)(ctx, args);
    if let Verdict::Reply(reply) = &verdict {
        if reply.is_error() {
            let code = reply.error_code().unwrap_or("ERR").to_string();
            ctx.shared.stats.record_failure(&cmd, &code);
        } else if is_write && !ctx.no_propagate {
            commit_write(ctx, args, reply);
        }
    }
    verdict
}

/// Queues one command while the session is in MULTI. Validation
/// failures dirty the transaction so EXEC aborts.
fn queue_command(
    ctx: &mut Ctx<'_>,
    cmd: &str,
    args: &[Bytes],
    table: &'static std::collections::HashMap<&'static str, CommandSpec>,
) -> Reply {
    if cmd == "SAVE" || cmd == "SHUTDOWN" {
        ctx.session.multi_dirty = true;
        return Reply::error("ERR Command not allowed inside a transaction");
    }
    let Some(spec) = table.get(cmd) else {
        ctx.session.multi_dirty = true;
        return Reply::error(format!(
            "ERR unknown command '{}'",
            String::from_utf8_lossy(&args[0])
        ));
    };
    if !spec.arity_ok(args.len()) {
        ctx.session.multi_dirty = true;
        return Reply::error(format!(
            "ERR wrong number of arguments for '{}' command",
            cmd.to_ascii_lowercase()
        ));
    }
    if spec.has_flag(WRITE)
        && ctx.shared.oom_active()
        && !matches!(cmd, "EVAL" | "EVALSHA" | "FLUSHALL" | "FLUSHDB")
    {
        ctx.session.multi_dirty = true;
        return Reply::error(OOM_MSG);
    }
    ctx.session.queued.push(args.to_vec());
    Reply::Simple("QUEUED".into())
}

/// Post-handler bookkeeping for a successful write: mutation epoch,
/// replication offset, journal (with rewrites), AOF, lazily-expired
/// DEL synthesis, and wake-ups for blocked sessions and replica
/// streams.
fn commit_write(ctx: &mut Ctx<'_>, args: &[Bytes], reply: &Reply) {
    commit_external(ctx.rt, ctx.shared, ctx.session.db, ctx.source, args, reply);
}

/// The commit step, reachable without a full `Ctx`. The connection
/// driver uses this when a parked blocking command finally succeeds:
/// the wake-up mutated the store outside `execute`, and the effect
/// must reach the journal exactly as an immediate success would have.
pub fn commit_external(
    rt: &Arc<Runtime>,
    shared: &mut Shared,
    db: usize,
    source: Source,
    args: &[Bytes],
    reply: &Reply,
) {
    shared.mutation_epoch += 1;
    shared.dirty += 1;
    shared.master_repl_offset += encoded_command_len(args) as i64;
    shared.journal.append_command(args, db, reply, &mut shared.store);
    if source != Source::AofReplay {
        shared.aof.append(args);
    }

    for (expired_db, key) in shared.store.collect_expired_keys() {
        shared.stats.expired_keys += 1;
        shared
            .journal
            .append_synthetic(&[Bytes::from_static(b"DEL"), key], expired_db);
    }

    rt.keyspace_events.notify_waiters();
    rt.journal_grown.notify_waiters();
}

/// Re-entry helper used by EXEC and the scripting bridge: runs one
/// command and flattens the verdict to a reply.
pub fn execute_to_reply(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Reply {
    execute(ctx, args).reply()
}

/// Helpers shared by handlers for argument parsing.
pub mod arg {
    use bytes::Bytes;

    pub fn as_i64(arg: &Bytes) -> Result<i64, &'static str> {
        std::str::from_utf8(arg)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or("ERR value is not an integer or out of range")
    }

    pub fn as_u64(arg: &Bytes) -> Result<u64, &'static str> {
        std::str::from_utf8(arg)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or("ERR value is not an integer or out of range")
    }

    pub fn as_f64(arg: &Bytes) -> Result<f64, &'static str> {
        let s = std::str::from_utf8(arg).map_err(|_| "ERR value is not a valid float")?;
        match s.trim() {
            "inf" | "+inf" => Ok(f64::INFINITY),
            "-inf" => Ok(f64::NEG_INFINITY),
            other => other
                .parse()
                .ok()
                .filter(|v: &f64| !v.is_nan())
                .ok_or("ERR value is not a valid float"),
        }
    }

    /// Blocking-command timeout: float seconds, 0 = forever.
    pub fn as_timeout_secs(arg: &Bytes) -> Result<f64, &'static str> {
        let v: f64 = std::str::from_utf8(arg)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or("ERR timeout is not a float or out of range")?;
        if v < 0.0 || !v.is_finite() {
            return Err("ERR timeout is negative");
        }
        Ok(v)
    }
}
