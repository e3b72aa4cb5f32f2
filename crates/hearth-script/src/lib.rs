//! hearth-script: the Lua scripting bridge.
//!
//! One [`ScriptEngine`] per process wraps a single Lua 5.1 interpreter
//! state: sandboxed globals, the `redis` API table (call/pcall/
//! error_reply/status_reply/sha1hex/log/setresp/acl_check_cmd), the
//! cjson/cmsgpack/bit/struct libraries, the SHA-1 script cache, and an
//! instruction-count watchdog that drives the server's BUSY state and
//! honors SCRIPT KILL.
//!
//! Dispatch back into the command layer goes through a thread-local
//! pointer installed for the duration of one evaluation: the `redis`
//! table and its functions are created once at engine setup, and each
//! `call`/`pcall` reaches the current evaluation's dispatcher through
//! the bridge. Scripts always run on the thread that entered `eval`,
//! which is what makes the thread-local sound.

mod bridge;
mod convert;
mod stdlib;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use mlua::{Lua, MultiValue, Value as LuaValue, VmState};
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::debug;

use hearth_protocol::Reply;

pub use convert::{lua_to_reply, reply_to_lua};

/// How often the instruction hook fires.
const HOOK_INSTRUCTION_INTERVAL: u32 = 100_000;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("lua error: {0}")]
    Lua(#[from] mlua::Error),
}

/// Flags parsed from a `#!lua` shebang line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptFlags {
    pub has_shebang: bool,
    pub no_writes: bool,
    pub allow_oom: bool,
}

/// Splits an optional shebang off a script body and parses its flags.
/// Unknown flags are an error the caller reports to the client.
pub fn parse_shebang(source: &[u8]) -> Result<(ScriptFlags, &[u8]), String> {
    if !source.starts_with(b"#!") {
        return Ok((ScriptFlags::default(), source));
    }
    let line_end = source
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(source.len());
    let line = &source[2..line_end];
    let text = std::str::from_utf8(line).map_err(|_| "invalid shebang".to_string())?;
    let mut parts = text.split_whitespace();
    let interpreter = parts.next().unwrap_or("");
    if interpreter != "lua" {
        return Err(format!("Unexpected shebang interpreter: {interpreter}"));
    }
    let mut flags = ScriptFlags {
        has_shebang: true,
        ..Default::default()
    };
    for part in parts {
        let Some(list) = part.strip_prefix("flags=") else {
            return Err(format!("Unknown shebang option: {part}"));
        };
        for flag in list.split(',') {
            match flag {
                "no-writes" => flags.no_writes = true,
                "allow-oom" => flags.allow_oom = true,
                other => return Err(format!("Unexpected flag in script shebang: {other}")),
            }
        }
    }
    let body = &source[line_end.min(source.len())..];
    Ok((flags, body))
}

/// Command names mentioned in `redis.call('NAME', ...)` /
/// `redis.pcall("NAME", ...)` literals. Used by the dispatcher to
/// decide whether a shebang-less script is read-only.
pub fn referenced_commands(source: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    let mut i = 0;
    while let Some(off) = find(&source[i..], b"call(") {
        let mut pos = i + off + 5;
        while pos < source.len() && source[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos < source.len() && (source[pos] == b'\'' || source[pos] == b'"') {
            let quote = source[pos];
            pos += 1;
            let start = pos;
            while pos < source.len() && source[pos] != quote {
                pos += 1;
            }
            if pos > start {
                if let Ok(name) = std::str::from_utf8(&source[start..pos]) {
                    out.push(name.to_ascii_uppercase());
                }
            }
        }
        i += off + 5;
    }
    out
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut s = String::with_capacity(40);
    for b in out {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Watchdog wiring shared with the dispatcher: the hook raises `busy`
/// past the time limit and aborts when `kill` is set.
#[derive(Debug, Clone)]
pub struct Watchdog {
    pub busy: Arc<AtomicBool>,
    pub kill: Arc<AtomicBool>,
    /// Soft limit in ms; 0 disables the BUSY transition.
    pub time_limit_ms: u64,
}

/// The process-wide scripting engine.
pub struct ScriptEngine {
    lua: Lua,
    cache: HashMap<String, Vec<u8>>,
}

impl ScriptEngine {
    pub fn new() -> Result<Self, ScriptError> {
        let lua = Lua::new();
        stdlib::install(&lua)?;
        bridge::install_redis_table(&lua)?;
        Ok(Self {
            lua,
            cache: HashMap::new(),
        })
    }

    // ── cache ─────────────────────────────────────────────────────────

    /// Caches a script body; returns its SHA-1 hex digest.
    pub fn cache_script(&mut self, source: &[u8]) -> String {
        let sha = sha1_hex(source);
        self.cache.insert(sha.clone(), source.to_vec());
        sha
    }

    pub fn cached(&self, sha: &str) -> Option<Vec<u8>> {
        self.cache.get(&sha.to_ascii_lowercase()).cloned()
    }

    pub fn cache_contains(&self, sha: &str) -> bool {
        self.cache.contains_key(&sha.to_ascii_lowercase())
    }

    pub fn flush_cache(&mut self) {
        self.cache.clear();
    }

    // ── evaluation ────────────────────────────────────────────────────

    /// Runs `body` (shebang already stripped) with KEYS/ARGV bound and
    /// `dispatch` wired up as redis.call / redis.pcall. Returns the
    /// reply to send, already in wire shape.
    ///
    /// The caller freezes the clock and flips the script-busy gates
    /// around this call; the watchdog here only observes them.
    pub fn eval(
        &self,
        body: &[u8],
        keys: &[Bytes],
        argv: &[Bytes],
        client_resp3: bool,
        watchdog: &Watchdog,
        dispatch: &mut dyn FnMut(Vec<Bytes>) -> Reply,
    ) -> Reply {
        let started = Instant::now();
        let busy = watchdog.busy.clone();
        let kill = watchdog.kill.clone();
        let limit_ms = watchdog.time_limit_ms;
        self.lua.set_hook(
            mlua::HookTriggers::new().every_nth_instruction(HOOK_INSTRUCTION_INTERVAL),
            move |_lua, _debug| {
                if kill.swap(false, Ordering::AcqRel) {
                    busy.store(false, Ordering::Release);
                    return Err(mlua::Error::RuntimeError(
                        "Script killed by user with SCRIPT KILL...".into(),
                    ));
                }
                if limit_ms > 0
                    && started.elapsed().as_millis() as u64 >= limit_ms
                    && !busy.load(Ordering::Relaxed)
                {
                    busy.store(true, Ordering::Release);
                }
                Ok(VmState::Continue)
            },
        );

        let guard = bridge::enter(dispatch);
        let result = self.eval_inner(body, keys, argv);
        let script_resp3 = bridge::script_resp3();
        drop(guard);
        self.lua.remove_hook();

        match result {
            Ok(value) => lua_to_reply(&value, script_resp3 && client_resp3),
            Err(mlua::Error::RuntimeError(msg)) if msg.contains("SCRIPT KILL") => {
                Reply::error("ERR Script killed by user with SCRIPT KILL...")
            }
            Err(e) => error_from_lua(e),
        }
    }

    fn eval_inner(
        &self,
        body: &[u8],
        keys: &[Bytes],
        argv: &[Bytes],
    ) -> Result<LuaValue, mlua::Error> {
        let lua = &self.lua;

        // deterministic per-evaluation PRNG
        lua.load("math.randomseed(0)").exec()?;

        let env = lua.create_table()?;
        let meta = lua.create_table()?;
        meta.set("__index", lua.globals())?;
        meta.set(
            "__newindex",
            lua.create_function(|_, (_t, name, _v): (mlua::Table, String, LuaValue)| {
                Err::<(), _>(mlua::Error::RuntimeError(format!(
                    "Script attempted to create global variable '{name}'"
                )))
            })?,
        )?;
        env.set_metatable(Some(meta));

        let keys_table = lua.create_table()?;
        for (i, k) in keys.iter().enumerate() {
            keys_table.set(i + 1, lua.create_string(k)?)?;
        }
        let argv_table = lua.create_table()?;
        for (i, a) in argv.iter().enumerate() {
            argv_table.set(i + 1, lua.create_string(a)?)?;
        }
        env.raw_set("KEYS", keys_table)?;
        env.raw_set("ARGV", argv_table)?;

        let chunk = lua
            .load(body)
            .set_name("@user_script")
            .set_mode(mlua::ChunkMode::Text)
            .set_environment(env);
        let value: MultiValue = chunk.eval()?;
        Ok(value.into_iter().next().unwrap_or(LuaValue::Nil))
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("cached_scripts", &self.cache.len())
            .finish()
    }
}

pub(crate) fn lua_args_to_argv(args: &MultiValue) -> Result<Vec<Bytes>, mlua::Error> {
    if args.is_empty() {
        return Err(mlua::Error::RuntimeError(
            "Please specify at least one argument for this redis lib call".into(),
        ));
    }
    let mut argv = Vec::with_capacity(args.len());
    for v in args.iter() {
        match v {
            LuaValue::String(s) => argv.push(Bytes::copy_from_slice(&s.as_bytes())),
            LuaValue::Integer(n) => argv.push(Bytes::from(n.to_string().into_bytes())),
            LuaValue::Number(n) => {
                let formatted = if *n == n.trunc() && n.is_finite() {
                    format!("{}", *n as i64)
                } else {
                    format!("{n}")
                };
                argv.push(Bytes::from(formatted.into_bytes()));
            }
            _ => {
                return Err(mlua::Error::RuntimeError(
                    "Lua redis lib command arguments must be strings or integers".into(),
                ))
            }
        }
    }
    Ok(argv)
}

pub(crate) fn log_from_script(level: i64, msg: &str) {
    debug!(level, msg, "script log");
}

/// Maps an mlua error to the client-facing reply.
fn error_from_lua(e: mlua::Error) -> Reply {
    match &e {
        mlua::Error::SyntaxError { message, .. } => {
            Reply::error(format!("ERR Error compiling script (new function): {message}"))
        }
        mlua::Error::RuntimeError(msg) => {
            // a raised redis.call error already carries its prefix
            if msg
                .split_whitespace()
                .next()
                .map(|w| w.len() >= 3 && w.chars().all(|c| c.is_ascii_uppercase()))
                .unwrap_or(false)
            {
                Reply::error(msg.clone())
            } else {
                Reply::error(format!("ERR user_script: {msg}"))
            }
        }
        mlua::Error::CallbackError { cause, .. } => error_from_lua((**cause).clone()),
        other => Reply::error(format!("ERR user_script: {other}")),
    }
}
