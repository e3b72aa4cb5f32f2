//! Replication journal.
//!
//! An append-only sequence of RESP-encoded write commands in commit
//! order, prefixed with `SELECT <db>` whenever the target database
//! changes. Before appending, commands are rewritten into idempotent
//! forms (relative TTLs become absolute, reads-with-side-effects
//! become their effect, scripts are suppressed in favor of their
//! constituent writes) so a replica replaying the stream converges on
//! the master's state regardless of when it replays.
//!
//! During EXEC the journal captures events on the side and the commit
//! step decides whether to emit them bare (single write) or wrapped in
//! MULTI/EXEC markers.

use bytes::Bytes;

use hearth_core::{Store, TtlState};
use hearth_protocol::{encode_command, Reply};

/// Side capture used while EXEC runs.
#[derive(Debug, Default)]
struct ExecCapture {
    events: Vec<Bytes>,
    last_db: usize,
    write_count: usize,
}

#[derive(Debug)]
pub struct Journal {
    events: Vec<Bytes>,
    last_db: usize,
    capture: Option<ExecCapture>,
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

impl Journal {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            last_db: 0,
            capture: None,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn event(&self, idx: usize) -> Option<&Bytes> {
        self.events.get(idx)
    }

    /// Applies the rewrite rules and appends. `reply` lets the DEL
    /// family suppress no-op deletions.
    pub fn append_command(
        &mut self,
        args: &[Bytes],
        db: usize,
        reply: &Reply,
        store: &mut Store,
    ) {
        let Some(out) = rewrite(args, db, reply, store) else {
            return;
        };
        self.push(encode_command(&out), db);
    }

    /// Appends a synthesized event (expired-key DELs, SELECT-free).
    pub fn append_synthetic(&mut self, args: &[Bytes], db: usize) {
        self.push(encode_command(args), db);
    }

    fn push(&mut self, encoded: Bytes, db: usize) {
        if let Some(capture) = &mut self.capture {
            if capture.last_db != db {
                capture
                    .events
                    .push(encode_command(&select_event(db)));
                capture.last_db = db;
            }
            capture.events.push(encoded);
            capture.write_count += 1;
            return;
        }
        if self.last_db != db {
            self.events.push(encode_command(&select_event(db)));
            self.last_db = db;
        }
        self.events.push(encoded);
    }

    // ── EXEC capture ──────────────────────────────────────────────────

    pub fn begin_exec_capture(&mut self) {
        self.capture = Some(ExecCapture {
            events: Vec::new(),
            last_db: self.last_db,
            write_count: 0,
        });
    }

    /// Ends the capture. A single write is emitted as itself; several
    /// writes are wrapped in MULTI/EXEC markers; `discard` drops them
    /// (REPLICAOF inside the transaction).
    pub fn end_exec_capture(&mut self, discard: bool) {
        let Some(capture) = self.capture.take() else {
            return;
        };
        if discard || capture.write_count == 0 {
            return;
        }
        if capture.write_count == 1 {
            // the capture may carry a SELECT before its single write
            for ev in capture.events {
                self.events.push(ev);
            }
        } else {
            self.events.push(encode_command(&[Bytes::from_static(b"MULTI")]));
            for ev in capture.events {
                self.events.push(ev);
            }
            self.events.push(encode_command(&[Bytes::from_static(b"EXEC")]));
        }
        self.last_db = capture.last_db;
    }

    pub fn capturing(&self) -> bool {
        self.capture.is_some()
    }
}

fn select_event(db: usize) -> Vec<Bytes> {
    vec![
        Bytes::from_static(b"SELECT"),
        Bytes::from(db.to_string().into_bytes()),
    ]
}

/// The idempotent rewrite set. Returns `None` to suppress the event.
fn rewrite(args: &[Bytes], db: usize, reply: &Reply, store: &mut Store) -> Option<Vec<Bytes>> {
    if args.is_empty() {
        return None;
    }
    let cmd = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
    let now = store.now_ms();

    let abs_ttl = |store: &mut Store, key: &[u8]| -> TtlState {
        store.db(db).ttl_state(key, now)
    };

    match cmd.as_str() {
        "GETEX" => {
            if args.len() == 2 {
                return None; // plain GETEX has no effect to replicate
            }
            let opt = String::from_utf8_lossy(&args[2]).to_ascii_uppercase();
            if opt == "PERSIST" {
                if store.db(db).exists(&args[1], now) {
                    return Some(vec![Bytes::from_static(b"PERSIST"), args[1].clone()]);
                }
                return None;
            }
            match abs_ttl(store, &args[1]) {
                TtlState::Missing => Some(vec![Bytes::from_static(b"DEL"), args[1].clone()]),
                TtlState::ExpiresAt(at) => Some(vec![
                    Bytes::from_static(b"PEXPIREAT"),
                    args[1].clone(),
                    num(at),
                ]),
                TtlState::NoExpiry => None,
            }
        }
        "GETDEL" if args.len() == 2 => {
            Some(vec![Bytes::from_static(b"DEL"), args[1].clone()])
        }
        "DEL" | "UNLINK" => match reply {
            Reply::Integer(n) if *n > 0 => Some(args.to_vec()),
            _ => None,
        },
        "SET" if args.len() >= 4 => {
            let has_expire_opt = args[3..].iter().any(|a| {
                matches!(
                    String::from_utf8_lossy(a).to_ascii_uppercase().as_str(),
                    "EX" | "PX" | "EXAT" | "PXAT"
                )
            });
            if !has_expire_opt {
                return Some(args.to_vec());
            }
            match abs_ttl(store, &args[1]) {
                TtlState::ExpiresAt(at) => Some(vec![
                    args[0].clone(),
                    args[1].clone(),
                    args[2].clone(),
                    Bytes::from_static(b"PXAT"),
                    num(at),
                ]),
                _ => Some(args.to_vec()),
            }
        }
        "SETEX" | "PSETEX" if args.len() == 4 => match abs_ttl(store, &args[1]) {
            TtlState::ExpiresAt(at) => Some(vec![
                Bytes::from_static(b"SET"),
                args[1].clone(),
                args[3].clone(),
                Bytes::from_static(b"PXAT"),
                num(at),
            ]),
            _ => None,
        },
        "EXPIRE" | "PEXPIRE" | "EXPIREAT" | "PEXPIREAT" if args.len() >= 3 => {
            match abs_ttl(store, &args[1]) {
                TtlState::Missing => Some(vec![Bytes::from_static(b"DEL"), args[1].clone()]),
                TtlState::ExpiresAt(at) => Some(vec![
                    Bytes::from_static(b"PEXPIREAT"),
                    args[1].clone(),
                    num(at),
                ]),
                TtlState::NoExpiry => None,
            }
        }
        "RESTORE" if args.len() >= 4 => match abs_ttl(store, &args[1]) {
            TtlState::ExpiresAt(at) => Some(vec![
                args[0].clone(),
                args[1].clone(),
                num(at),
                args[3].clone(),
                Bytes::from_static(b"ABSTTL"),
            ]),
            _ => Some(args.to_vec()),
        },
        "INCRBYFLOAT" if args.len() >= 3 => {
            match store.db(db).get(&args[1], now) {
                Ok(Some(value)) => Some(vec![
                    Bytes::from_static(b"SET"),
                    args[1].clone(),
                    value,
                    Bytes::from_static(b"KEEPTTL"),
                ]),
                _ => Some(args.to_vec()),
            }
        }
        // scripts replicate as their constituent writes via re-entry
        "SCRIPT" | "XREADGROUP" | "EVAL" | "EVALSHA" | "EVAL_RO" | "EVALSHA_RO" | "FCALL"
        | "FCALL_RO" => None,
        _ => Some(args.to_vec()),
    }
}

fn num(n: u64) -> Bytes {
    Bytes::from(n.to_string().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use hearth_core::{Clock, SetOptions};
    use hearth_protocol::{parse_command, Input};

    fn store() -> Store {
        Store::new(Arc::new(Clock::new()))
    }

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn decode(event: &Bytes) -> Vec<Bytes> {
        match parse_command(event).unwrap() {
            Input::Complete { args, .. } => args,
            other => panic!("bad journal event: {other:?}"),
        }
    }

    #[test]
    fn select_inserted_on_db_change() {
        let mut j = Journal::new();
        let mut s = store();
        j.append_command(&[b("SET"), b("k"), b("v")], 0, &Reply::ok(), &mut s);
        j.append_command(&[b("SET"), b("k"), b("v")], 2, &Reply::ok(), &mut s);
        assert_eq!(j.len(), 3);
        assert_eq!(decode(j.event(1).unwrap())[0], b("SELECT"));
        assert_eq!(decode(j.event(1).unwrap())[1], b("2"));
    }

    #[test]
    fn set_with_ex_becomes_pxat() {
        let mut j = Journal::new();
        let mut s = store();
        let now = s.now_ms();
        s.db(0)
            .set(
                b"k",
                b("v"),
                SetOptions {
                    expire_at_ms: Some(now + 10_000),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        j.append_command(&[b("SET"), b("k"), b("v"), b("EX"), b("10")], 0, &Reply::ok(), &mut s);
        let out = decode(j.event(0).unwrap());
        assert_eq!(out[3], b("PXAT"));
        assert_eq!(out[4], num(now + 10_000));
    }

    #[test]
    fn expire_on_live_key_becomes_pexpireat() {
        let mut j = Journal::new();
        let mut s = store();
        let now = s.now_ms();
        s.db(0).set(b"k", b("v"), SetOptions::default(), now).unwrap();
        s.db(0)
            .expire_at(b"k", now + 5_000, hearth_core::ExpireFlags::default(), now);
        j.append_command(&[b("EXPIRE"), b("k"), b("5")], 0, &Reply::Integer(1), &mut s);
        let out = decode(j.event(0).unwrap());
        assert_eq!(out[0], b("PEXPIREAT"));
    }

    #[test]
    fn expire_on_gone_key_becomes_del() {
        let mut j = Journal::new();
        let mut s = store();
        j.append_command(&[b("EXPIRE"), b("k"), b("0")], 0, &Reply::Integer(1), &mut s);
        let out = decode(j.event(0).unwrap());
        assert_eq!(out, vec![b("DEL"), b("k")]);
    }

    #[test]
    fn getdel_and_noop_del() {
        let mut j = Journal::new();
        let mut s = store();
        j.append_command(&[b("GETDEL"), b("k")], 0, &Reply::Null, &mut s);
        assert_eq!(decode(j.event(0).unwrap())[0], b("DEL"));
        // DEL that removed nothing is suppressed
        j.append_command(&[b("DEL"), b("x")], 0, &Reply::Integer(0), &mut s);
        assert_eq!(j.len(), 1);
    }

    #[test]
    fn incrbyfloat_becomes_set_keepttl() {
        let mut j = Journal::new();
        let mut s = store();
        let now = s.now_ms();
        s.db(0).set(b"f", b("10.6"), SetOptions::default(), now).unwrap();
        j.append_command(
            &[b("INCRBYFLOAT"), b("f"), b("0.1")],
            0,
            &Reply::bulk(&b"10.6"[..]),
            &mut s,
        );
        let out = decode(j.event(0).unwrap());
        assert_eq!(out[0], b("SET"));
        assert_eq!(out[2], b("10.6"));
        assert_eq!(out[3], b("KEEPTTL"));
    }

    #[test]
    fn scripts_are_suppressed() {
        let mut j = Journal::new();
        let mut s = store();
        j.append_command(&[b("EVAL"), b("return 1"), b("0")], 0, &Reply::Integer(1), &mut s);
        j.append_command(&[b("XREADGROUP"), b("GROUP")], 0, &Reply::Null, &mut s);
        assert!(j.is_empty());
    }

    #[test]
    fn exec_capture_single_write_emits_bare() {
        let mut j = Journal::new();
        let mut s = store();
        j.begin_exec_capture();
        j.append_command(&[b("SET"), b("a"), b("1")], 0, &Reply::ok(), &mut s);
        j.end_exec_capture(false);
        assert_eq!(j.len(), 1);
        assert_eq!(decode(j.event(0).unwrap())[0], b("SET"));
    }

    #[test]
    fn exec_capture_multiple_writes_wraps_in_multi() {
        let mut j = Journal::new();
        let mut s = store();
        j.begin_exec_capture();
        j.append_command(&[b("SET"), b("a"), b("1")], 0, &Reply::ok(), &mut s);
        j.append_command(&[b("SET"), b("b"), b("2")], 0, &Reply::ok(), &mut s);
        j.end_exec_capture(false);
        assert_eq!(j.len(), 4);
        assert_eq!(decode(j.event(0).unwrap())[0], b("MULTI"));
        assert_eq!(decode(j.event(3).unwrap())[0], b("EXEC"));
    }

    #[test]
    fn exec_capture_discard() {
        let mut j = Journal::new();
        let mut s = store();
        j.begin_exec_capture();
        j.append_command(&[b("SET"), b("a"), b("1")], 0, &Reply::ok(), &mut s);
        j.end_exec_capture(true);
        assert!(j.is_empty());
    }
}
