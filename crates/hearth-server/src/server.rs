//! TCP server and connection driver.
//!
//! One task per connection reads into a buffer, parses as many
//! complete commands as the buffer holds, executes them under the
//! shared lock, and batches all replies into a single write. Blocking
//! commands and WAIT are finished outside the lock: the session parks
//! on the keyspace/ack notifiers and retries until it has a reply.
//!
//! The busy-script fast path runs *before* the lock: while a long
//! script holds the execution domain, other sessions still get their
//! `-BUSY` replies and SCRIPT KILL still lands, because those paths
//! only touch atomics.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use hearth_protocol::{parse_command, Input, Reply};

use crate::blocking::{self, BlockRequest};
use crate::dispatch::{self, execute, Ctx, Verdict};
use crate::session::{Session, Source};
use crate::state::Runtime;

/// Read chunk sizing; covers most commands without reallocation.
const BUF_CAPACITY: usize = 4096;

/// A connection whose parse buffer exceeds this is misbehaving.
const MAX_BUF_SIZE: usize = 512 * 1024 * 1024 + 1024;

/// Active-expire cadence and per-db budget per tick.
const EXPIRE_INTERVAL: Duration = Duration::from_millis(100);
const EXPIRE_BUDGET_PER_DB: usize = 20;

pub async fn run(rt: Arc<Runtime>) -> std::io::Result<()> {
    raise_fd_limit(&rt);

    let addr = format!("{}:{}", rt.startup.bind, rt.startup.port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        error!(%addr, error = %e, "cannot bind listen socket");
        e
    })?;
    info!(%addr, "listening");

    spawn_cluster_bus(&rt);
    tokio::spawn(active_expire_task(rt.clone()));

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // EMFILE and friends: shed load instead of dying, and
                // give the kernel a beat to release descriptors
                warn!(error = %e, "accept failed; backing off");
                sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        let rt = rt.clone();
        rt.total_connections.fetch_add(1, Ordering::Relaxed);

        let connected = rt.connected_clients.fetch_add(1, Ordering::AcqRel) + 1;
        let maxclients = rt.lock().config.maxclients;
        if connected > maxclients {
            rt.connected_clients.fetch_sub(1, Ordering::AcqRel);
            tokio::spawn(async move {
                let mut stream = stream;
                let _ = stream
                    .write_all(b"-ERR max number of clients reached\r\n")
                    .await;
            });
            continue;
        }

        tokio::spawn(async move {
            if let Err(e) = handle_connection(rt.clone(), stream).await {
                debug!(%peer, error = %e, "connection ended with error");
            }
            rt.connected_clients.fetch_sub(1, Ordering::AcqRel);
        });
    }
}

/// Placeholder cluster-bus listener on port+10000: accepts and parks
/// peers, no gossip.
fn spawn_cluster_bus(rt: &Arc<Runtime>) {
    let Some(bus_port) = rt.startup.port.checked_add(10_000) else {
        return;
    };
    let bind = rt.startup.bind.clone();
    tokio::spawn(async move {
        let Ok(listener) = TcpListener::bind((bind.as_str(), bus_port)).await else {
            return;
        };
        loop {
            match listener.accept().await {
                Ok((stream, _)) => drop(stream),
                Err(_) => return,
            }
        }
    });
}

async fn active_expire_task(rt: Arc<Runtime>) {
    let mut tick = tokio::time::interval(EXPIRE_INTERVAL);
    loop {
        tick.tick().await;
        let mut removed = 0;
        {
            let mut shared = rt.lock();
            if !shared.active_expire_enabled {
                continue;
            }
            removed = shared.store.active_expire_cycle(EXPIRE_BUDGET_PER_DB);
            if removed > 0 {
                shared.stats.expired_keys += removed as u64;
                for (db, key) in shared.store.collect_expired_keys() {
                    shared
                        .journal
                        .append_synthetic(&[Bytes::from_static(b"DEL"), key], db);
                }
            }
        }
        if removed > 0 {
            rt.journal_grown.notify_waiters();
        }
    }
}

async fn handle_connection(rt: Arc<Runtime>, mut stream: TcpStream) -> std::io::Result<()> {
    let id = rt.next_session_id.fetch_add(1, Ordering::Relaxed);
    let mut session = Session::new(id);
    let mut buf = BytesMut::with_capacity(BUF_CAPACITY);
    let mut out = BytesMut::with_capacity(BUF_CAPACITY);

    'conn: loop {
        if buf.len() > MAX_BUF_SIZE {
            let _ = stream
                .write_all(b"-ERR Protocol error: too big inline request\r\n")
                .await;
            break;
        }

        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            break;
        }

        out.clear();
        loop {
            match parse_command(&buf) {
                None => break,
                Some(Input::Empty { consumed }) => {
                    let _ = buf.split_to(consumed);
                }
                Some(Input::Malformed { consumed }) => {
                    let _ = buf.split_to(consumed);
                    Reply::error("ERR Protocol error").serialize(&mut out, session.resp);
                }
                Some(Input::Complete { args, consumed }) => {
                    let _ = buf.split_to(consumed);
                    match run_command(&rt, &mut session, &args) {
                        Verdict::Reply(reply) => {
                            reply.serialize(&mut out, session.resp);
                        }
                        Verdict::Block(req) => {
                            // flush pipelined replies before parking
                            if !out.is_empty() {
                                stream.write_all(&out).await?;
                                out.clear();
                            }
                            let reply = block_until_ready(&rt, &args, req).await;
                            reply.serialize(&mut out, session.resp);
                        }
                        Verdict::Wait {
                            numreplicas,
                            deadline_ms,
                        } => {
                            if !out.is_empty() {
                                stream.write_all(&out).await?;
                                out.clear();
                            }
                            let reply = wait_for_acks(&rt, numreplicas, deadline_ms).await;
                            reply.serialize(&mut out, session.resp);
                        }
                    }
                    if session.replica.active {
                        if !out.is_empty() {
                            stream.write_all(&out).await?;
                            out.clear();
                        }
                        let result = replica_stream_loop(&rt, &mut session, &mut stream, &mut buf).await;
                        release_replica(&rt, &session);
                        return result;
                    }
                    if session.should_close {
                        if !out.is_empty() {
                            stream.write_all(&out).await?;
                        }
                        break 'conn;
                    }
                }
            }
        }

        if !out.is_empty() {
            stream.write_all(&out).await?;
        }
    }
    Ok(())
}

/// Runs one command: the lock-free busy path first, then the
/// dispatcher under the lock.
fn run_command(rt: &Arc<Runtime>, session: &mut Session, args: &[Bytes]) -> Verdict {
    if let Some(verdict) = busy_shortcut(rt, session, args) {
        return verdict;
    }
    let mut shared = rt.lock();
    let mut ctx = Ctx {
        rt,
        shared: &mut shared,
        session,
        source: Source::Client,
        in_exec: false,
        no_propagate: false,
    };
    execute(&mut ctx, args)
}

/// While a script monopolizes the execution domain, commands are
/// answered here without touching the lock. Mirrors the dispatcher's
/// busy gate; stats for these rejections are skipped because the lock
/// is exactly what we cannot take.
fn busy_shortcut(rt: &Arc<Runtime>, session: &mut Session, args: &[Bytes]) -> Option<Verdict> {
    if !rt.script_busy.load(Ordering::Acquire) || args.is_empty() {
        return None;
    }
    let cmd = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();

    let is_script_kill = (cmd == "SCRIPT" || cmd == "FUNCTION")
        && args.len() == 2
        && args[1].eq_ignore_ascii_case(b"KILL");
    if is_script_kill {
        rt.script_kill.store(true, Ordering::Release);
        return Some(Verdict::Reply(Reply::ok()));
    }
    if cmd == "SHUTDOWN" && args.len() == 2 && args[1].eq_ignore_ascii_case(b"NOSAVE") {
        info!("shutting down (NOSAVE, script busy)");
        std::process::exit(0);
    }
    if cmd == "PING" && rt.busy_script_session.load(Ordering::Relaxed) == session.id {
        return Some(Verdict::Reply(if args.len() == 2 {
            Reply::Bulk(args[1].clone())
        } else {
            Reply::Simple("PONG".into())
        }));
    }
    if cmd == "MULTI" && !session.in_multi {
        session.in_multi = true;
        session.multi_dirty = false;
        session.queued.clear();
        return Some(Verdict::Reply(Reply::ok()));
    }
    if session.in_multi {
        match cmd.as_str() {
            "EXEC" => {
                session.reset_transaction();
                return Some(Verdict::Reply(Reply::error(
                    "EXECABORT Transaction discarded because of previous errors: BUSY Redis is busy running a script. You can only call SCRIPT KILL or SHUTDOWN NOSAVE.",
                )));
            }
            "DISCARD" => {
                session.reset_transaction();
                return Some(Verdict::Reply(Reply::ok()));
            }
            "QUIT" => {
                session.should_close = true;
                return Some(Verdict::Reply(Reply::ok()));
            }
            _ => session.multi_dirty = true,
        }
    }
    Some(Verdict::Reply(Reply::error(
        "BUSY Redis is busy running a script. You can only call SCRIPT KILL or SHUTDOWN NOSAVE.",
    )))
}

/// Parks a session on a blocking command. Retries the fast path under
/// the lock on every keyspace write until it yields a value, erroring,
/// or the deadline passes.
async fn block_until_ready(rt: &Arc<Runtime>, args: &[Bytes], req: BlockRequest) -> Reply {
    loop {
        let notified = rt.keyspace_events.notified();
        tokio::pin!(notified);

        {
            let mut shared = rt.lock();
            if let Some(reply) = blocking::attempt(&mut shared.store, &req) {
                if !reply.is_error() {
                    dispatch::commit_external(
                        rt,
                        &mut shared,
                        req.db,
                        Source::Client,
                        args,
                        &reply,
                    );
                }
                return reply;
            }
        }

        if req.deadline_ms > 0 {
            let now = rt.clock.now_ms();
            if now >= req.deadline_ms {
                return blocking::timeout_reply();
            }
            let remaining = Duration::from_millis(req.deadline_ms - now);
            tokio::select! {
                _ = &mut notified => {}
                _ = sleep(remaining) => {}
            }
        } else {
            notified.await;
        }
    }
}

/// WAIT: bounded ack polling with 10 ms sleeps.
async fn wait_for_acks(rt: &Arc<Runtime>, numreplicas: usize, deadline_ms: u64) -> Reply {
    loop {
        let count = {
            let shared = rt.lock();
            shared.repl.acked_count(shared.master_repl_offset)
        };
        if count >= numreplicas {
            return Reply::Integer(count as i64);
        }
        if deadline_ms > 0 && rt.clock.now_ms() >= deadline_ms {
            return Reply::Integer(count as i64);
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Streams journal events to a replica session and consumes its
/// REPLCONF ACKs.
async fn replica_stream_loop(
    rt: &Arc<Runtime>,
    session: &mut Session,
    stream: &mut TcpStream,
    buf: &mut BytesMut,
) -> std::io::Result<()> {
    loop {
        let notified = rt.journal_grown.notified();
        tokio::pin!(notified);

        // drain new journal events
        let events: Vec<Bytes> = {
            let shared = rt.lock();
            let from = session.replica.next_event_index;
            let mut out = Vec::new();
            let mut idx = from;
            while let Some(ev) = shared.journal.event(idx) {
                out.push(ev.clone());
                idx += 1;
            }
            session.replica.next_event_index = idx;
            out
        };
        for ev in &events {
            stream.write_all(ev).await?;
        }

        // consume any ACKs the replica pipelined at us
        loop {
            match parse_command(buf) {
                Some(Input::Complete { args, consumed }) => {
                    let _ = buf.split_to(consumed);
                    let reply = {
                        let mut shared = rt.lock();
                        let mut ctx = Ctx {
                            rt,
                            shared: &mut shared,
                            session,
                            source: Source::Client,
                            in_exec: false,
                            no_propagate: false,
                        };
                        execute(&mut ctx, &args).reply()
                    };
                    let payload = reply.to_bytes(session.resp);
                    if !payload.is_empty() {
                        stream.write_all(&payload).await?;
                    }
                }
                Some(Input::Empty { consumed }) | Some(Input::Malformed { consumed }) => {
                    let _ = buf.split_to(consumed);
                }
                None => break,
            }
        }

        tokio::select! {
            _ = &mut notified => {}
            read = stream.read_buf(buf) => {
                match read {
                    Ok(0) => {
                        warn!(session = session.id, "replica disconnected");
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(e) => return Err(e),
                }
            }
        }
    }
}

fn release_replica(rt: &Arc<Runtime>, session: &Session) {
    let mut shared = rt.lock();
    shared.repl.acks.remove(&session.id);
    shared.repl.connected_replicas = shared.repl.connected_replicas.saturating_sub(1);
}

/// Raises RLIMIT_NOFILE toward maxclients + headroom; if the hard cap
/// is lower, the effective maxclients shrinks to fit.
fn raise_fd_limit(rt: &Arc<Runtime>) {
    const HEADROOM: u64 = 64;
    let wanted = {
        let shared = rt.lock();
        shared.config.maxclients as u64 + HEADROOM
    };

    // SAFETY: plain getrlimit/setrlimit calls on owned structs
    unsafe {
        let mut limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        if libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) != 0 {
            return;
        }
        if (limit.rlim_cur as u64) >= wanted {
            return;
        }
        let target = wanted.min(limit.rlim_max as u64);
        let new_limit = libc::rlimit {
            rlim_cur: target as libc::rlim_t,
            rlim_max: limit.rlim_max,
        };
        if libc::setrlimit(libc::RLIMIT_NOFILE, &new_limit) != 0 {
            warn!("could not raise file descriptor limit");
            return;
        }
        if target < wanted {
            let effective = target.saturating_sub(HEADROOM) as usize;
            let mut shared = rt.lock();
            warn!(
                requested = shared.config.maxclients,
                effective, "kernel fd hard limit below maxclients; reducing"
            );
            shared.config.maxclients = effective.max(1);
        }
    }
}
