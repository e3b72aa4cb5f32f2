//! The re-entry bridge between Lua and the dispatcher.
//!
//! The `redis` table and its functions are created once at engine
//! setup, so they cannot capture the per-evaluation dispatcher (whose
//! borrow of the server state only lives for one `eval`). Instead,
//! `enter` parks a pointer to the current dispatcher in a thread
//! local and the callbacks reach it through [`with_dispatch`].
//!
//! Soundness rests on two invariants the engine upholds:
//! - a script runs to completion on the thread that called `eval`, so
//!   the thread local always refers to a live dispatcher while any
//!   callback can run, and
//! - the guard returned by `enter` clears the slot before the borrow
//!   expires, so a stale pointer is never observable.

use std::cell::{Cell, RefCell};

use bytes::Bytes;
use mlua::{Lua, MultiValue, Value as LuaValue};

use hearth_protocol::Reply;

use crate::convert::reply_to_lua;
use crate::{log_from_script, lua_args_to_argv, sha1_hex};

type DynDispatch = dyn FnMut(Vec<Bytes>) -> Reply;

thread_local! {
    static CURRENT: RefCell<Option<*mut DynDispatch>> = const { RefCell::new(None) };
    static SCRIPT_RESP3: Cell<bool> = const { Cell::new(false) };
}

/// Installs the current evaluation's dispatcher. Dropping the guard
/// uninstalls it.
pub(crate) fn enter<'a>(dispatch: &'a mut (dyn FnMut(Vec<Bytes>) -> Reply + 'a)) -> BridgeGuard {
    // erase the borrow lifetime; the guard keeps the raw pointer from
    // outliving it
    let ptr: *mut DynDispatch = unsafe {
        std::mem::transmute::<&mut (dyn FnMut(Vec<Bytes>) -> Reply + 'a), &'static mut DynDispatch>(
            dispatch,
        )
    };
    CURRENT.with(|slot| *slot.borrow_mut() = Some(ptr));
    SCRIPT_RESP3.with(|flag| flag.set(false));
    BridgeGuard
}

pub(crate) struct BridgeGuard;

impl Drop for BridgeGuard {
    fn drop(&mut self) {
        CURRENT.with(|slot| *slot.borrow_mut() = None);
    }
}

/// RESP version the running script selected via `redis.setresp`.
pub(crate) fn script_resp3() -> bool {
    SCRIPT_RESP3.with(|flag| flag.get())
}

fn with_dispatch(argv: Vec<Bytes>) -> Result<Reply, mlua::Error> {
    let ptr = CURRENT.with(|slot| *slot.borrow());
    let Some(ptr) = ptr else {
        return Err(mlua::Error::RuntimeError(
            "redis.call is only available during script evaluation".into(),
        ));
    };
    // SAFETY: the pointer was installed by `enter` on this thread and
    // is cleared before the dispatcher borrow ends; dispatch does not
    // recurse into another script (EVAL carries the noscript flag)
    let dispatch = unsafe { &mut *ptr };
    Ok(dispatch(argv))
}

/// Builds the `redis` global (aliased as `server`) once.
pub(crate) fn install_redis_table(lua: &Lua) -> mlua::Result<()> {
    let redis = lua.create_table()?;

    redis.set(
        "call",
        lua.create_function(|lua, args: MultiValue| {
            let argv = lua_args_to_argv(&args)?;
            let reply = with_dispatch(argv)?;
            if let Reply::Error(msg) = &reply {
                // call() raises; the error reaches the client unless a
                // script-level pcall intervenes
                return Err(mlua::Error::RuntimeError(msg.clone()));
            }
            reply_to_lua(lua, &reply, script_resp3())
        })?,
    )?;

    redis.set(
        "pcall",
        lua.create_function(|lua, args: MultiValue| {
            let argv = lua_args_to_argv(&args)?;
            let reply = with_dispatch(argv)?;
            if let Reply::Error(msg) = &reply {
                let t = lua.create_table()?;
                t.set("err", msg.clone())?;
                return Ok(LuaValue::Table(t));
            }
            reply_to_lua(lua, &reply, script_resp3())
        })?,
    )?;

    redis.set(
        "error_reply",
        lua.create_function(|lua, msg: mlua::String| {
            let text = msg.to_string_lossy().to_string();
            let first = text.split(' ').next().unwrap_or("");
            let full = if first.len() >= 3 && first.chars().all(|c| c.is_ascii_uppercase()) {
                text
            } else {
                format!("ERR {text}")
            };
            let t = lua.create_table()?;
            t.set("err", full)?;
            Ok(t)
        })?,
    )?;
    redis.set(
        "status_reply",
        lua.create_function(|lua, msg: mlua::String| {
            let t = lua.create_table()?;
            t.set("ok", msg.to_string_lossy().to_string())?;
            Ok(t)
        })?,
    )?;
    redis.set(
        "sha1hex",
        lua.create_function(|_, s: mlua::String| Ok(sha1_hex(&s.as_bytes())))?,
    )?;
    redis.set(
        "log",
        lua.create_function(|_, (level, msg): (i64, mlua::String)| {
            log_from_script(level, &msg.to_string_lossy());
            Ok(())
        })?,
    )?;
    redis.set(
        "setresp",
        lua.create_function(|_, ver: i64| match ver {
            2 => {
                SCRIPT_RESP3.with(|flag| flag.set(false));
                Ok(())
            }
            3 => {
                SCRIPT_RESP3.with(|flag| flag.set(true));
                Ok(())
            }
            _ => Err(mlua::Error::RuntimeError(
                "RESP version must be 2 or 3".into(),
            )),
        })?,
    )?;
    redis.set(
        "acl_check_cmd",
        lua.create_function(|_, _args: MultiValue| Ok(true))?,
    )?;
    redis.set(
        "breakpoint",
        lua.create_function(|_, _args: MultiValue| Ok(false))?,
    )?;
    redis.set("LOG_DEBUG", 0)?;
    redis.set("LOG_VERBOSE", 1)?;
    redis.set("LOG_NOTICE", 2)?;
    redis.set("LOG_WARNING", 3)?;
    redis.set("REPL_ALL", 3)?;
    redis.set("REPL_NONE", 0)?;

    lua.globals().set("redis", &redis)?;
    // the modern alias
    lua.globals().set("server", &redis)?;
    Ok(())
}
