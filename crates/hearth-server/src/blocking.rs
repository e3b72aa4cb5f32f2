//! Blocking-command support.
//!
//! A blocking list/zset pop first tries its non-blocking fast path; if
//! every key is empty the handler returns a [`BlockRequest`] and the
//! connection driver parks the session, retrying the request under the
//! lock whenever a write lands (keyspace notifier) until it produces a
//! value or the deadline passes.

use bytes::Bytes;

use hearth_core::Store;
use hearth_protocol::Reply;

/// What kind of pop the parked session is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// BLPOP/BRPOP: `left` picks the pop side.
    ListPop { left: bool },
    /// BLMOVE/BRPOPLPUSH: pop from source, push into destination.
    ListMove { from_left: bool, to_left: bool },
    /// BZPOPMIN/BZPOPMAX.
    ZsetPop { max: bool },
}

/// A parked session's retry state.
#[derive(Debug, Clone)]
pub struct BlockRequest {
    pub kind: BlockKind,
    pub db: usize,
    pub keys: Vec<Bytes>,
    /// Absolute deadline in unix ms; 0 = wait forever.
    pub deadline_ms: u64,
    /// BLMOVE's destination key.
    pub destination: Option<Bytes>,
    /// The original argument vector; a successful wake-up commits it
    /// to the journal as if the command had succeeded immediately.
    pub args: Vec<Bytes>,
}

/// One retry pass over the request's keys. Returns the wire reply when
/// the command can complete (including a WRONGTYPE error), `None` when
/// the session stays parked.
pub fn attempt(store: &mut Store, req: &BlockRequest) -> Option<Reply> {
    let now = store.now_ms();
    let db = store.db(req.db);
    match req.kind {
        BlockKind::ListPop { left } => {
            for key in &req.keys {
                let popped = if left {
                    db.lpop(key, now)
                } else {
                    db.rpop(key, now)
                };
                match popped {
                    Err(e) => return Some(Reply::error(e.to_string())),
                    Ok(Some(value)) => {
                        return Some(Reply::Array(vec![
                            Reply::Bulk(key.clone()),
                            Reply::Bulk(value),
                        ]))
                    }
                    Ok(None) => {}
                }
            }
            None
        }
        BlockKind::ListMove { from_left, to_left } => {
            let src = &req.keys[0];
            let dst = req.destination.as_ref().expect("list move has destination");
            match db.lmove(src, dst, from_left, to_left, now) {
                Err(e) => Some(Reply::error(e.to_string())),
                Ok(Some(value)) => Some(Reply::Bulk(value)),
                Ok(None) => None,
            }
        }
        BlockKind::ZsetPop { max } => {
            for key in &req.keys {
                match db.zpop(key, 1, max, now) {
                    Err(e) => return Some(Reply::error(e.to_string())),
                    Ok(popped) if !popped.is_empty() => {
                        let (member, score) = popped.into_iter().next().unwrap();
                        return Some(Reply::Array(vec![
                            Reply::Bulk(key.clone()),
                            Reply::Bulk(member),
                            Reply::bulk_string(Reply::format_double(score)),
                        ]));
                    }
                    Ok(_) => {}
                }
            }
            None
        }
    }
}

/// The reply a parked session receives when its deadline passes.
pub fn timeout_reply() -> Reply {
    Reply::NullArray
}
