//! Process-wide state.
//!
//! Everything command execution mutates lives in [`Shared`] behind one
//! mutex, which is the single-threaded-executor invariant made
//! explicit: whoever holds the guard is "the" command thread, commands
//! are totally ordered by lock acquisition, and EXEC or a script holds
//! the guard for its whole run. Handlers never await while holding it.
//!
//! [`Runtime`] carries the pieces that must be reachable without the
//! lock: the clock, the script busy/kill flags the dispatcher checks
//! before locking, the wake-up notifiers, and connection counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::Notify;

use hearth_cluster::RouteTable;
use hearth_core::{Clock, Store};
use hearth_persistence::AofLog;
use hearth_script::ScriptEngine;

use crate::config::{RuntimeConfig, ServerConfig};
use crate::journal::Journal;

/// Per-command call statistics.
#[derive(Debug, Clone, Default)]
pub struct CommandStat {
    pub calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
}

/// Counters INFO renders under commandstats / errorstats.
#[derive(Debug, Default)]
pub struct Stats {
    pub per_command: HashMap<String, CommandStat>,
    pub per_error: HashMap<String, u64>,
    pub total_error_replies: u64,
    pub total_commands: u64,
    pub expired_keys: u64,
}

impl Stats {
    pub fn record_call(&mut self, cmd: &str) {
        self.total_commands += 1;
        self.per_command.entry(cmd.to_ascii_lowercase()).or_default().calls += 1;
    }

    pub fn record_failure(&mut self, cmd: &str, error_code: &str) {
        self.per_command
            .entry(cmd.to_ascii_lowercase())
            .or_default()
            .failed_calls += 1;
        *self.per_error.entry(error_code.to_string()).or_default() += 1;
        self.total_error_replies += 1;
    }

    pub fn record_rejection(&mut self, cmd: &str, error_code: &str) {
        let stat = self.per_command.entry(cmd.to_ascii_lowercase()).or_default();
        stat.rejected_calls += 1;
        stat.failed_calls += 1;
        *self.per_error.entry(error_code.to_string()).or_default() += 1;
        self.total_error_replies += 1;
    }
}

/// Replication role and link state.
#[derive(Debug, Clone, Default)]
pub struct ReplState {
    /// Master address when this node is a replica.
    pub master_addr: Option<(String, u16)>,
    /// Replication link considered healthy.
    pub link_up: bool,
    /// Replica ack offsets keyed by session id (REPLCONF ACK).
    pub acks: HashMap<u64, i64>,
    /// Replica-stream session count (INFO connected_slaves).
    pub connected_replicas: usize,
    pub replication_id: String,
}

impl ReplState {
    pub fn is_replica(&self) -> bool {
        self.master_addr.is_some()
    }

    /// Replicas whose acked offset has reached `offset`.
    pub fn acked_count(&self, offset: i64) -> usize {
        self.acks.values().filter(|&&a| a >= offset).count()
    }
}

/// The lock-protected execution domain.
pub struct Shared {
    pub store: Store,
    pub journal: Journal,
    pub config: RuntimeConfig,
    pub routes: RouteTable,
    pub stats: Stats,
    pub repl: ReplState,
    pub aof: AofLog,
    /// Taken out during EVAL so the engine can re-enter the dispatcher
    /// with the Shared borrow; always put back before unlock.
    pub engine: Option<ScriptEngine>,
    /// Monotonic count of committed writes.
    pub mutation_epoch: u64,
    pub master_repl_offset: i64,
    /// Writes since the last snapshot (INFO rdb_changes_since_last_save).
    pub dirty: u64,
    /// Unix seconds of the last completed snapshot.
    pub lastsave_unix: u64,
    pub active_expire_enabled: bool,
    /// EVAL nesting guard plus OOM-bypass flag for allow-oom scripts.
    pub script_allow_oom: bool,
    /// Registered module commands (name → synthetic reply); the module
    /// loader is an external collaborator, this is its registry.
    pub module_commands: HashMap<String, String>,
}

impl Shared {
    /// True when the maxmemory gate should reject plain writes.
    pub fn oom_active(&self) -> bool {
        self.config.maxmemory > 0 && self.store.used_memory() > self.config.maxmemory
    }
}

/// Lock-free runtime context shared with every connection task.
pub struct Runtime {
    pub shared: Mutex<Shared>,
    pub clock: Arc<Clock>,
    pub startup: ServerConfig,

    /// Set by the script watchdog once lua-time-limit is exceeded;
    /// checked by the dispatcher before acquiring the lock.
    pub script_busy: Arc<AtomicBool>,
    /// SCRIPT KILL request observed by the watchdog hook.
    pub script_kill: Arc<AtomicBool>,
    /// Session currently running the busy script (its PING stays ok).
    pub busy_script_session: AtomicU64,

    /// Signalled after every committed write; blocked sessions retry.
    pub keyspace_events: Notify,
    /// Signalled when the replication journal grows.
    pub journal_grown: Notify,

    pub connected_clients: AtomicUsize,
    pub total_connections: AtomicU64,
    pub next_session_id: AtomicU64,
    pub started_at: Instant,
}

impl Runtime {
    pub fn new(startup: ServerConfig, shared: Shared, clock: Arc<Clock>) -> Arc<Self> {
        Arc::new(Self {
            shared: Mutex::new(shared),
            clock,
            startup,
            script_busy: Arc::new(AtomicBool::new(false)),
            script_kill: Arc::new(AtomicBool::new(false)),
            busy_script_session: AtomicU64::new(0),
            keyspace_events: Notify::new(),
            journal_grown: Notify::new(),
            connected_clients: AtomicUsize::new(0),
            total_connections: AtomicU64::new(0),
            next_session_id: AtomicU64::new(1),
            started_at: Instant::now(),
        })
    }

    /// Locks the execution domain. Poisoning is unrecoverable here, so
    /// propagate the panic rather than limping on with torn state.
    pub fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().expect("shared state poisoned")
    }
}

/// Builds the initial shared state for a fresh server.
pub fn build_shared(startup: &ServerConfig, clock: Arc<Clock>) -> Shared {
    let aof = if startup.appendonly {
        AofLog::open(&startup.aof_path()).unwrap_or_else(|e| {
            tracing::error!(error = %e, "cannot open append-only file; appends disabled");
            AofLog::disabled(&startup.aof_path())
        })
    } else {
        AofLog::disabled(&startup.aof_path())
    };

    Shared {
        store: Store::new(clock),
        journal: Journal::new(),
        config: RuntimeConfig::from_startup(startup),
        routes: RouteTable::new(),
        stats: Stats::default(),
        repl: ReplState {
            replication_id: gen_replication_id(),
            ..Default::default()
        },
        aof,
        engine: None,
        mutation_epoch: 0,
        master_repl_offset: 0,
        dirty: 0,
        lastsave_unix: 0,
        active_expire_enabled: true,
        script_allow_oom: false,
        module_commands: HashMap::new(),
    }
}

fn gen_replication_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..40)
        .map(|_| {
            let n: u8 = rng.gen_range(0..16);
            char::from_digit(n as u32, 16).unwrap()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_counters() {
        let mut stats = Stats::default();
        stats.record_call("GET");
        stats.record_call("GET");
        stats.record_failure("GET", "WRONGTYPE");
        assert_eq!(stats.per_command["get"].calls, 2);
        assert_eq!(stats.per_command["get"].failed_calls, 1);
        assert_eq!(stats.per_error["WRONGTYPE"], 1);
        assert_eq!(stats.total_error_replies, 1);
    }

    #[test]
    fn ack_counting() {
        let mut repl = ReplState::default();
        repl.acks.insert(1, 100);
        repl.acks.insert(2, 50);
        assert_eq!(repl.acked_count(60), 1);
        assert_eq!(repl.acked_count(50), 2);
        assert_eq!(repl.acked_count(101), 0);
    }

    #[test]
    fn replication_id_shape() {
        let id = gen_replication_id();
        assert_eq!(id.len(), 40);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
