//! Per-connection session state.

use bytes::Bytes;
use hearth_protocol::RespVersion;

/// Where a command entered the system. Gates differ per source: AOF
/// replay bypasses the replica-write guard, commands streamed from the
/// master bypass it too, script re-entry forbids noscript commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Client,
    Script,
    AofReplay,
    MasterLink,
}

/// One watched key: database, key, and the digest captured at WATCH
/// time (`None` when the key was absent).
#[derive(Debug, Clone)]
pub struct WatchedKey {
    pub db: usize,
    pub key: Bytes,
    pub digest: Option<String>,
}

/// Replica streaming state for a session that issued SYNC/PSYNC.
#[derive(Debug, Clone, Default)]
pub struct ReplicaStream {
    pub active: bool,
    /// Cursor into the replication journal.
    pub next_event_index: usize,
}

#[derive(Debug)]
pub struct Session {
    pub id: u64,
    pub resp: RespVersion,
    pub db: usize,
    pub name: Option<String>,

    // transaction state
    pub in_multi: bool,
    pub multi_dirty: bool,
    pub queued: Vec<Vec<Bytes>>,
    pub watched: Vec<WatchedKey>,

    /// One-shot ASK redirect override, consumed by the next command.
    pub asking: bool,
    /// Set by QUIT/SHUTDOWN-style handlers; the connection driver
    /// closes after flushing the reply.
    pub should_close: bool,

    pub replica: ReplicaStream,
    /// Subscription bookkeeping (no delivery).
    pub subscribed_channels: Vec<Bytes>,
    pub subscribed_patterns: Vec<Bytes>,
}

impl Session {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            resp: RespVersion::Resp2,
            db: 0,
            name: None,
            in_multi: false,
            multi_dirty: false,
            queued: Vec::new(),
            watched: Vec::new(),
            asking: false,
            should_close: false,
            replica: ReplicaStream::default(),
            subscribed_channels: Vec::new(),
            subscribed_patterns: Vec::new(),
        }
    }

    /// Drops all transaction state (EXEC/DISCARD/abort paths).
    pub fn reset_transaction(&mut self) {
        self.in_multi = false;
        self.multi_dirty = false;
        self.queued.clear();
        self.watched.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_everything() {
        let mut s = Session::new(1);
        s.in_multi = true;
        s.multi_dirty = true;
        s.queued.push(vec![Bytes::from_static(b"GET")]);
        s.watched.push(WatchedKey {
            db: 0,
            key: Bytes::from_static(b"k"),
            digest: None,
        });
        s.reset_transaction();
        assert!(!s.in_multi && !s.multi_dirty);
        assert!(s.queued.is_empty() && s.watched.is_empty());
    }
}
