//! RESP ⇄ Lua value mapping.
//!
//! Replies flowing into a script become Lua values; the script's
//! return value becomes a reply. The RESP3-only shapes (map, set,
//! double, boolean, big number, verbatim) round-trip through tagged
//! single-entry tables so a script can hand them back unchanged and
//! the client sees the original wire type.

use mlua::{Lua, Table, Value as LuaValue};

use hearth_protocol::Reply;

/// Converts a dispatch reply into the Lua value a script observes.
///
/// Under RESP2 conversion rules a nil reply becomes `false`; under
/// RESP3 (after `redis.setresp(3)`) it stays nil and the typed shapes
/// arrive as tagged tables.
pub fn reply_to_lua(lua: &Lua, reply: &Reply, resp3: bool) -> mlua::Result<LuaValue> {
    Ok(match reply {
        Reply::Simple(s) => {
            let t = lua.create_table()?;
            t.set("ok", s.clone())?;
            LuaValue::Table(t)
        }
        Reply::Error(msg) => {
            let t = lua.create_table()?;
            t.set("err", msg.clone())?;
            LuaValue::Table(t)
        }
        Reply::Integer(n) => LuaValue::Integer(*n),
        Reply::Bulk(data) => LuaValue::String(lua.create_string(data)?),
        Reply::Null | Reply::NullArray | Reply::None => {
            if resp3 {
                LuaValue::Nil
            } else {
                LuaValue::Boolean(false)
            }
        }
        Reply::Array(items) => {
            let t = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                t.set(i + 1, reply_to_lua(lua, item, resp3)?)?;
            }
            LuaValue::Table(t)
        }
        Reply::Map(pairs) => {
            if resp3 {
                let inner = lua.create_table()?;
                for (k, v) in pairs {
                    inner.set(reply_to_lua(lua, k, resp3)?, reply_to_lua(lua, v, resp3)?)?;
                }
                let t = lua.create_table()?;
                t.set("map", inner)?;
                LuaValue::Table(t)
            } else {
                // RESP2 flattens maps to k,v,k,v arrays
                let t = lua.create_table()?;
                let mut idx = 1;
                for (k, v) in pairs {
                    t.set(idx, reply_to_lua(lua, k, resp3)?)?;
                    t.set(idx + 1, reply_to_lua(lua, v, resp3)?)?;
                    idx += 2;
                }
                LuaValue::Table(t)
            }
        }
        Reply::Set(items) => {
            if resp3 {
                let inner = lua.create_table()?;
                for item in items {
                    inner.set(reply_to_lua(lua, item, resp3)?, true)?;
                }
                let t = lua.create_table()?;
                t.set("set", inner)?;
                LuaValue::Table(t)
            } else {
                let t = lua.create_table()?;
                for (i, item) in items.iter().enumerate() {
                    t.set(i + 1, reply_to_lua(lua, item, resp3)?)?;
                }
                LuaValue::Table(t)
            }
        }
        Reply::Double(d) => {
            if resp3 {
                let t = lua.create_table()?;
                t.set("double", *d)?;
                LuaValue::Table(t)
            } else {
                LuaValue::String(lua.create_string(Reply::format_double(*d))?)
            }
        }
        Reply::Boolean(b) => {
            if resp3 {
                LuaValue::Boolean(*b)
            } else {
                LuaValue::Integer(i64::from(*b))
            }
        }
        Reply::BigNumber(n) => {
            if resp3 {
                let t = lua.create_table()?;
                t.set("big_number", n.clone())?;
                LuaValue::Table(t)
            } else {
                LuaValue::String(lua.create_string(n)?)
            }
        }
        Reply::Verbatim { format, text } => {
            if resp3 {
                let inner = lua.create_table()?;
                inner.set("string", lua.create_string(text)?)?;
                inner.set("format", std::str::from_utf8(format).unwrap_or("txt"))?;
                let t = lua.create_table()?;
                t.set("verbatim_string", inner)?;
                LuaValue::Table(t)
            } else {
                LuaValue::String(lua.create_string(text)?)
            }
        }
        Reply::Attribute { value, .. } => reply_to_lua(lua, value, resp3)?,
        Reply::Raw(data) => LuaValue::String(lua.create_string(data)?),
    })
}

/// Converts a script's return value into the reply sent to the client.
///
/// `resp3` is true only when the script asked for RESP3 *and* the
/// client speaks it; that is the only case where the typed wire forms
/// go out.
pub fn lua_to_reply(value: &LuaValue, resp3: bool) -> Reply {
    match value {
        LuaValue::Nil => Reply::Null,
        LuaValue::Boolean(false) => Reply::Null,
        LuaValue::Boolean(true) => {
            if resp3 {
                Reply::Boolean(true)
            } else {
                Reply::Integer(1)
            }
        }
        LuaValue::Integer(n) => Reply::Integer(*n),
        // Lua numbers truncate toward zero on the way out
        LuaValue::Number(n) => Reply::Integer(*n as i64),
        LuaValue::String(s) => Reply::bulk(s.as_bytes().to_vec()),
        LuaValue::Table(t) => table_to_reply(t, resp3),
        _ => Reply::Null,
    }
}

fn table_to_reply(t: &Table, resp3: bool) -> Reply {
    // tagged single-entry tables first
    if let Ok(LuaValue::String(s)) = t.get::<LuaValue>("err") {
        return Reply::Error(s.to_string_lossy().to_string());
    }
    if let Ok(LuaValue::String(s)) = t.get::<LuaValue>("ok") {
        return Reply::Simple(s.to_string_lossy().to_string());
    }
    if let Ok(v) = t.get::<LuaValue>("double") {
        if let Some(d) = as_number(&v) {
            return Reply::Double(d);
        }
    }
    if let Ok(LuaValue::Table(inner)) = t.get::<LuaValue>("map") {
        let mut pairs = Vec::new();
        for item in inner.pairs::<LuaValue, LuaValue>() {
            let Ok((k, v)) = item else { continue };
            pairs.push((lua_to_reply(&k, resp3), lua_to_reply(&v, resp3)));
        }
        return Reply::Map(pairs);
    }
    if let Ok(LuaValue::Table(inner)) = t.get::<LuaValue>("set") {
        let mut items = Vec::new();
        for item in inner.pairs::<LuaValue, LuaValue>() {
            let Ok((k, _)) = item else { continue };
            items.push(lua_to_reply(&k, resp3));
        }
        return Reply::Set(items);
    }
    if let Ok(LuaValue::String(s)) = t.get::<LuaValue>("big_number") {
        return Reply::BigNumber(s.to_string_lossy().to_string());
    }

    // plain table: 1-indexed sequence up to the first nil
    let mut items = Vec::new();
    let mut i = 1;
    loop {
        match t.get::<LuaValue>(i) {
            Ok(LuaValue::Nil) | Err(_) => break,
            Ok(v) => items.push(lua_to_reply(&v, resp3)),
        }
        i += 1;
    }
    Reply::Array(items)
}

fn as_number(v: &LuaValue) -> Option<f64> {
    match v {
        LuaValue::Integer(n) => Some(*n as f64),
        LuaValue::Number(n) => Some(*n),
        _ => None,
    }
}
