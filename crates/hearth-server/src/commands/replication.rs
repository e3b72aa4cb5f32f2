//! Replication handlers: SYNC/PSYNC stream setup, REPLCONF, the
//! native REPLICAOF bootstrap, and WAIT.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};

use hearth_persistence::encode_snapshot;
use hearth_protocol::{encode_command, parse_command, Input, Reply};

use crate::dispatch::{arg, execute_to_reply, Ctx, Verdict};
use crate::session::{Session, Source};
use crate::state::Runtime;

use super::{err, reply};

/// SYNC: full snapshot as one RDB bulk, then the event stream.
pub fn sync(ctx: &mut Ctx<'_>, _args: &[Bytes]) -> Verdict {
    let payload = snapshot_bulk(ctx);
    enter_stream_mode(ctx);
    reply(Reply::Raw(payload))
}

/// PSYNC: always answers FULLRESYNC (no partial-resync backlog).
pub fn psync(ctx: &mut Ctx<'_>, _args: &[Bytes]) -> Verdict {
    let header = format!(
        "+FULLRESYNC {} {}\r\n",
        ctx.shared.repl.replication_id, ctx.shared.master_repl_offset
    );
    let rdb = snapshot_bulk(ctx);
    let mut out = BytesMut::with_capacity(header.len() + rdb.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(&rdb);
    enter_stream_mode(ctx);
    reply(Reply::Raw(out.freeze()))
}

/// `$<len>\r\n<rdb bytes>` with no trailing CRLF, the replication bulk
/// framing.
fn snapshot_bulk(ctx: &mut Ctx<'_>) -> Bytes {
    let rdb = encode_snapshot(&mut ctx.shared.store);
    let mut out = BytesMut::with_capacity(rdb.len() + 16);
    out.extend_from_slice(format!("${}\r\n", rdb.len()).as_bytes());
    out.extend_from_slice(&rdb);
    out.freeze()
}

fn enter_stream_mode(ctx: &mut Ctx<'_>) {
    ctx.session.replica.active = true;
    ctx.session.replica.next_event_index = ctx.shared.journal.len();
    ctx.shared.repl.connected_replicas += 1;
    ctx.shared.repl.acks.insert(ctx.session.id, 0);
    info!(session = ctx.session.id, "replica stream started");
}

pub fn replconf(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    if args.len() >= 3 && args[1].eq_ignore_ascii_case(b"ACK") {
        if let Ok(offset) = arg::as_i64(&args[2]) {
            ctx.shared.repl.acks.insert(ctx.session.id, offset);
        }
        // ACK carries no reply
        return reply(Reply::None);
    }
    if args.len() >= 2 && args[1].eq_ignore_ascii_case(b"GETACK") {
        let offset = ctx.shared.master_repl_offset;
        return reply(Reply::Raw(encode_command(&[
            Bytes::from_static(b"REPLCONF"),
            Bytes::from_static(b"ACK"),
            Bytes::from(offset.to_string().into_bytes()),
        ])));
    }
    // listening-port / capa / ip-address handshakes
    reply(Reply::ok())
}

pub fn replicaof(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let host = String::from_utf8_lossy(&args[1]).to_string();
    let port_raw = String::from_utf8_lossy(&args[2]).to_string();

    if host.eq_ignore_ascii_case("no") && port_raw.eq_ignore_ascii_case("one") {
        if ctx.shared.repl.master_addr.take().is_some() {
            info!("promoted to master (REPLICAOF NO ONE)");
        }
        ctx.shared.repl.link_up = false;
        return reply(Reply::ok());
    }

    let Ok(port) = port_raw.parse::<u16>() else {
        return err("ERR Invalid master port");
    };
    ctx.shared.repl.master_addr = Some((host.clone(), port));
    ctx.shared.repl.link_up = false;

    let rt = ctx.rt.clone();
    tokio::spawn(async move {
        if let Err(e) = replica_bootstrap(rt, host.clone(), port).await {
            warn!(master = %format!("{host}:{port}"), error = %e, "replication link failed");
        }
    });
    reply(Reply::ok())
}

pub fn wait(ctx: &mut Ctx<'_>, args: &[Bytes]) -> Verdict {
    let numreplicas = match arg::as_u64(&args[1]) {
        Ok(n) => n as usize,
        Err(e) => return err(e),
    };
    let timeout_ms = match arg::as_u64(&args[2]) {
        Ok(n) => n,
        Err(e) => return err(e),
    };
    let offset = ctx.shared.master_repl_offset;
    let already = ctx.shared.repl.acked_count(offset);
    if already >= numreplicas || !ctx.may_block() {
        return reply(Reply::Integer(already as i64));
    }
    // nudge the replicas so acks can advance while we poll
    ctx.shared.journal.append_synthetic(
        &[
            Bytes::from_static(b"REPLCONF"),
            Bytes::from_static(b"GETACK"),
            Bytes::from_static(b"*"),
        ],
        ctx.session.db,
    );
    ctx.rt.journal_grown.notify_waiters();

    let deadline_ms = if timeout_ms == 0 {
        0
    } else {
        ctx.now_ms() + timeout_ms
    };
    Verdict::Wait {
        numreplicas,
        deadline_ms,
    }
}

// ── outbound link: this node as a replica ──────────────────────────────

/// Connects to the master, performs the PING/REPLCONF/PSYNC handshake,
/// loads the RDB bulk, then applies the streamed commands through the
/// dispatcher until the link drops.
pub async fn replica_bootstrap(
    rt: Arc<Runtime>,
    host: String,
    port: u16,
) -> std::io::Result<()> {
    let mut stream = TcpStream::connect((host.as_str(), port)).await?;
    let my_port = rt.startup.port;

    send_command(&mut stream, &["PING"]).await?;
    read_line(&mut stream).await?;
    send_command(&mut stream, &["REPLCONF", "listening-port", &my_port.to_string()]).await?;
    read_line(&mut stream).await?;
    send_command(&mut stream, &["REPLCONF", "capa", "eof", "capa", "psync2"]).await?;
    read_line(&mut stream).await?;
    send_command(&mut stream, &["PSYNC", "?", "-1"]).await?;
    let fullresync = read_line(&mut stream).await?;
    if !fullresync.starts_with("+FULLRESYNC") {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unexpected PSYNC reply: {fullresync}"),
        ));
    }

    // `$<len>\r\n` then the raw snapshot, no trailing CRLF
    let bulk_header = read_line(&mut stream).await?;
    let len: usize = bulk_header
        .strip_prefix('$')
        .and_then(|s| s.trim_end().parse().ok())
        .ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "bad RDB bulk header")
        })?;
    let mut rdb = vec![0u8; len];
    stream.read_exact(&mut rdb).await?;

    {
        let mut shared = rt.lock();
        if let Err(e) = hearth_persistence::decode_snapshot(&mut shared.store, &rdb) {
            warn!(error = %e, "master snapshot rejected");
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "bad RDB"));
        }
        shared.repl.link_up = true;
        info!(master = %format!("{host}:{port}"), keys = shared.store.total_keys(), "synced with master");
    }

    // stream apply loop
    let mut session = Session::new(rt.next_session_id.fetch_add(1, Ordering::Relaxed));
    let mut buf = BytesMut::with_capacity(16 * 1024);
    let mut applied_offset: i64 = 0;
    loop {
        // drain complete commands first
        loop {
            let parsed = parse_command(&buf);
            match parsed {
                Some(Input::Complete { args, consumed }) => {
                    let _ = buf.split_to(consumed);
                    applied_offset += consumed as i64;
                    apply_from_master(&rt, &mut session, &args, applied_offset, &mut stream)
                        .await?;
                }
                Some(Input::Empty { consumed }) | Some(Input::Malformed { consumed }) => {
                    let _ = buf.split_to(consumed);
                }
                None => break,
            }
        }
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            let mut shared = rt.lock();
            shared.repl.link_up = false;
            warn!("replication link closed by master");
            return Ok(());
        }
    }
}

async fn apply_from_master(
    rt: &Arc<Runtime>,
    session: &mut Session,
    args: &[Bytes],
    offset: i64,
    stream: &mut TcpStream,
) -> std::io::Result<()> {
    if args.len() >= 2
        && args[0].eq_ignore_ascii_case(b"REPLCONF")
        && args[1].eq_ignore_ascii_case(b"GETACK")
    {
        let payload = encode_command(&[
            Bytes::from_static(b"REPLCONF"),
            Bytes::from_static(b"ACK"),
            Bytes::from(offset.to_string().into_bytes()),
        ]);
        stream.write_all(&payload).await?;
        return Ok(());
    }

    let mut shared = rt.lock();
    let mut ctx = Ctx {
        rt,
        shared: &mut shared,
        session,
        source: Source::MasterLink,
        in_exec: false,
        no_propagate: false,
    };
    let reply = execute_to_reply(&mut ctx, args);
    if reply.is_error() {
        warn!(
            command = %String::from_utf8_lossy(&args[0]),
            "error applying replicated command"
        );
    }
    Ok(())
}

async fn send_command(stream: &mut TcpStream, args: &[&str]) -> std::io::Result<()> {
    let argv: Vec<Bytes> = args
        .iter()
        .map(|a| Bytes::copy_from_slice(a.as_bytes()))
        .collect();
    stream.write_all(&encode_command(&argv)).await
}

/// Reads one `\r\n`-terminated line (handshake replies only).
async fn read_line(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await?;
        if byte[0] == b'\n' {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            break;
        }
        line.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}
