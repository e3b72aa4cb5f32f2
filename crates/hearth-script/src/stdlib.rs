//! Script-visible standard library extensions and the sandbox.
//!
//! Installs cjson (with an explicit null sentinel and array-vs-object
//! detection), cmsgpack, 32-bit `bit` operations, binary `struct`
//! pack/unpack, and then locks the environment down: filesystem and
//! process primitives are removed, `setmetatable` refuses to touch the
//! library tables, and `loadstring` rejects precompiled bytecode.

use mlua::{Lua, LuaSerdeExt, MultiValue, Value as LuaValue, Variadic};

/// Installs every extension library and applies the sandbox. Runs once
/// at engine creation.
pub fn install(lua: &Lua) -> mlua::Result<()> {
    install_cjson(lua)?;
    install_cmsgpack(lua)?;
    install_bit(lua)?;
    install_struct(lua)?;
    sandbox(lua)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// cjson
// ---------------------------------------------------------------------------

fn install_cjson(lua: &Lua) -> mlua::Result<()> {
    let cjson = lua.create_table()?;

    // shared null sentinel: json null decodes to this and encodes back
    cjson.set("null", lua.null())?;

    cjson.set(
        "encode",
        lua.create_function(|lua, v: LuaValue| {
            let json = lua_to_json(lua, &v)
                .map_err(|e| mlua::Error::RuntimeError(format!("Cannot serialise: {e}")))?;
            Ok(json.to_string())
        })?,
    )?;
    cjson.set(
        "decode",
        lua.create_function(|lua, text: mlua::String| {
            let parsed: serde_json::Value = serde_json::from_slice(&text.as_bytes())
                .map_err(|e| mlua::Error::RuntimeError(format!("Expected value but found invalid token: {e}")))?;
            json_to_lua(lua, &parsed)
        })?,
    )?;
    lua.globals().set("cjson", cjson)
}

fn lua_to_json(lua: &Lua, v: &LuaValue) -> Result<serde_json::Value, String> {
    Ok(match v {
        LuaValue::Nil => serde_json::Value::Null,
        LuaValue::LightUserData(_) => serde_json::Value::Null, // cjson.null
        LuaValue::Boolean(b) => serde_json::Value::Bool(*b),
        LuaValue::Integer(n) => serde_json::Value::from(*n),
        LuaValue::Number(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .ok_or("invalid number")?,
        LuaValue::String(s) => {
            serde_json::Value::String(s.to_string_lossy().to_string())
        }
        LuaValue::Table(t) => {
            // array when every key is a consecutive positive integer
            let len = t.raw_len();
            let mut is_array = true;
            let mut total = 0usize;
            for pair in t.clone().pairs::<LuaValue, LuaValue>() {
                let (k, _) = pair.map_err(|e| e.to_string())?;
                total += 1;
                match k {
                    LuaValue::Integer(i) if i >= 1 && (i as usize) <= len => {}
                    _ => is_array = false,
                }
            }
            if is_array && total == len {
                let mut out = Vec::with_capacity(len);
                for i in 1..=len {
                    let item: LuaValue = t.get(i).map_err(|e| e.to_string())?;
                    out.push(lua_to_json(lua, &item)?);
                }
                serde_json::Value::Array(out)
            } else {
                let mut out = serde_json::Map::new();
                for pair in t.clone().pairs::<LuaValue, LuaValue>() {
                    let (k, val) = pair.map_err(|e| e.to_string())?;
                    let key = match k {
                        LuaValue::String(s) => s.to_string_lossy().to_string(),
                        LuaValue::Integer(i) => i.to_string(),
                        LuaValue::Number(n) => n.to_string(),
                        _ => return Err("table key must be a number or string".into()),
                    };
                    out.insert(key, lua_to_json(lua, &val)?);
                }
                serde_json::Value::Object(out)
            }
        }
        _ => return Err("unsupported type".into()),
    })
}

fn json_to_lua(lua: &Lua, v: &serde_json::Value) -> mlua::Result<LuaValue> {
    Ok(match v {
        serde_json::Value::Null => lua.null(),
        serde_json::Value::Bool(b) => LuaValue::Boolean(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                LuaValue::Integer(i)
            } else {
                LuaValue::Number(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => LuaValue::String(lua.create_string(s)?),
        serde_json::Value::Array(items) => {
            let t = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                t.set(i + 1, json_to_lua(lua, item)?)?;
            }
            LuaValue::Table(t)
        }
        serde_json::Value::Object(map) => {
            let t = lua.create_table()?;
            for (k, val) in map {
                t.set(k.as_str(), json_to_lua(lua, val)?)?;
            }
            LuaValue::Table(t)
        }
    })
}

// ---------------------------------------------------------------------------
// cmsgpack
// ---------------------------------------------------------------------------

fn install_cmsgpack(lua: &Lua) -> mlua::Result<()> {
    let cmsgpack = lua.create_table()?;
    cmsgpack.set(
        "pack",
        lua.create_function(|lua, args: MultiValue| {
            let mut buf = Vec::new();
            for v in args.iter() {
                msgpack_write(lua, &mut buf, v)
                    .map_err(mlua::Error::RuntimeError)?;
            }
            lua.create_string(&buf)
        })?,
    )?;
    cmsgpack.set(
        "unpack",
        lua.create_function(|lua, data: mlua::String| {
            let bytes = data.as_bytes().to_vec();
            let mut values = Vec::new();
            let mut cursor = &bytes[..];
            while !cursor.is_empty() {
                let v = msgpack_read(lua, &mut cursor)
                    .map_err(mlua::Error::RuntimeError)?;
                values.push(v);
            }
            Ok(Variadic::from_iter(values))
        })?,
    )?;
    lua.globals().set("cmsgpack", cmsgpack)
}

fn msgpack_write(lua: &Lua, buf: &mut Vec<u8>, v: &LuaValue) -> Result<(), String> {
    match v {
        LuaValue::Nil | LuaValue::LightUserData(_) => {
            rmp::encode::write_nil(buf).map_err(|e| e.to_string())
        }
        LuaValue::Boolean(b) => rmp::encode::write_bool(buf, *b).map_err(|e| e.to_string()),
        LuaValue::Integer(n) => rmp::encode::write_sint(buf, *n)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        LuaValue::Number(n) => rmp::encode::write_f64(buf, *n).map_err(|e| e.to_string()),
        LuaValue::String(s) => {
            let bytes = s.as_bytes();
            rmp::encode::write_str_len(buf, bytes.len() as u32).map_err(|e| e.to_string())?;
            buf.extend_from_slice(&bytes);
            Ok(())
        }
        LuaValue::Table(t) => {
            let len = t.raw_len();
            let mut total = 0usize;
            let mut is_array = true;
            for pair in t.clone().pairs::<LuaValue, LuaValue>() {
                let (k, _) = pair.map_err(|e| e.to_string())?;
                total += 1;
                match k {
                    LuaValue::Integer(i) if i >= 1 && (i as usize) <= len => {}
                    _ => is_array = false,
                }
            }
            if is_array && total == len {
                rmp::encode::write_array_len(buf, len as u32).map_err(|e| e.to_string())?;
                for i in 1..=len {
                    let item: LuaValue = t.get(i).map_err(|e| e.to_string())?;
                    msgpack_write(lua, buf, &item)?;
                }
            } else {
                rmp::encode::write_map_len(buf, total as u32).map_err(|e| e.to_string())?;
                for pair in t.clone().pairs::<LuaValue, LuaValue>() {
                    let (k, val) = pair.map_err(|e| e.to_string())?;
                    msgpack_write(lua, buf, &k)?;
                    msgpack_write(lua, buf, &val)?;
                }
            }
            Ok(())
        }
        _ => Err("unsupported type for cmsgpack.pack".into()),
    }
}

fn msgpack_read(lua: &Lua, cursor: &mut &[u8]) -> Result<LuaValue, String> {
    use rmp::decode;
    let marker = rmp::Marker::from_u8(*cursor.first().ok_or("truncated msgpack")?);
    match marker {
        rmp::Marker::Null => {
            *cursor = &cursor[1..];
            Ok(lua.null())
        }
        rmp::Marker::True | rmp::Marker::False => {
            let b = decode::read_bool(cursor).map_err(|e| e.to_string())?;
            Ok(LuaValue::Boolean(b))
        }
        rmp::Marker::F32 => {
            let f = decode::read_f32(cursor).map_err(|e| e.to_string())?;
            Ok(LuaValue::Number(f as f64))
        }
        rmp::Marker::F64 => {
            let f = decode::read_f64(cursor).map_err(|e| e.to_string())?;
            Ok(LuaValue::Number(f))
        }
        rmp::Marker::FixStr(_) | rmp::Marker::Str8 | rmp::Marker::Str16 | rmp::Marker::Str32 => {
            let len = decode::read_str_len(cursor).map_err(|e| e.to_string())? as usize;
            if cursor.len() < len {
                return Err("truncated msgpack string".into());
            }
            let s = lua
                .create_string(&cursor[..len])
                .map_err(|e| e.to_string())?;
            *cursor = &cursor[len..];
            Ok(LuaValue::String(s))
        }
        rmp::Marker::FixArray(_) | rmp::Marker::Array16 | rmp::Marker::Array32 => {
            let len = decode::read_array_len(cursor).map_err(|e| e.to_string())? as usize;
            let t = lua.create_table().map_err(|e| e.to_string())?;
            for i in 0..len {
                let v = msgpack_read(lua, cursor)?;
                t.set(i + 1, v).map_err(|e| e.to_string())?;
            }
            Ok(LuaValue::Table(t))
        }
        rmp::Marker::FixMap(_) | rmp::Marker::Map16 | rmp::Marker::Map32 => {
            let len = decode::read_map_len(cursor).map_err(|e| e.to_string())? as usize;
            let t = lua.create_table().map_err(|e| e.to_string())?;
            for _ in 0..len {
                let k = msgpack_read(lua, cursor)?;
                let v = msgpack_read(lua, cursor)?;
                t.set(k, v).map_err(|e| e.to_string())?;
            }
            Ok(LuaValue::Table(t))
        }
        _ => {
            // everything else is an integer form
            let n: i64 = decode::read_int(cursor).map_err(|e| e.to_string())?;
            Ok(LuaValue::Integer(n))
        }
    }
}

// ---------------------------------------------------------------------------
// bit
// ---------------------------------------------------------------------------

fn install_bit(lua: &Lua) -> mlua::Result<()> {
    let bit = lua.create_table()?;

    // Lua BitOp semantics: normalize through the signed 64-bit range
    fn to_u32(n: f64) -> u32 {
        n as i64 as u32
    }

    bit.set(
        "tobit",
        lua.create_function(|_, n: f64| Ok(to_u32(n) as i32))?,
    )?;
    bit.set(
        "band",
        lua.create_function(|_, args: Variadic<f64>| {
            Ok(args.iter().fold(u32::MAX, |acc, &n| acc & to_u32(n)) as i32)
        })?,
    )?;
    bit.set(
        "bor",
        lua.create_function(|_, args: Variadic<f64>| {
            Ok(args.iter().fold(0u32, |acc, &n| acc | to_u32(n)) as i32)
        })?,
    )?;
    bit.set(
        "bxor",
        lua.create_function(|_, args: Variadic<f64>| {
            Ok(args.iter().fold(0u32, |acc, &n| acc ^ to_u32(n)) as i32)
        })?,
    )?;
    bit.set(
        "bnot",
        lua.create_function(|_, n: f64| Ok(!to_u32(n) as i32))?,
    )?;
    bit.set(
        "lshift",
        lua.create_function(|_, (n, s): (f64, u32)| Ok((to_u32(n) << (s & 31)) as i32))?,
    )?;
    bit.set(
        "rshift",
        lua.create_function(|_, (n, s): (f64, u32)| Ok((to_u32(n) >> (s & 31)) as i32))?,
    )?;
    bit.set(
        "arshift",
        lua.create_function(|_, (n, s): (f64, u32)| Ok((to_u32(n) as i32) >> (s & 31)))?,
    )?;
    bit.set(
        "tohex",
        lua.create_function(|_, n: f64| Ok(format!("{:08x}", to_u32(n))))?,
    )?;
    lua.globals().set("bit", bit)
}

// ---------------------------------------------------------------------------
// struct
// ---------------------------------------------------------------------------

/// `struct.pack(fmt, ...)` / `struct.unpack(fmt, data)` over a fixed
/// format alphabet: `<`/`>` endianness, `b/B h/H i/I l/L` integer
/// widths, `f`/`d` floats, `s` NUL-terminated string.
fn install_struct(lua: &Lua) -> mlua::Result<()> {
    let st = lua.create_table()?;
    st.set(
        "pack",
        lua.create_function(|lua, (fmt, args): (mlua::String, Variadic<LuaValue>)| {
            let out = struct_pack(&fmt.as_bytes(), &args)
                .map_err(mlua::Error::RuntimeError)?;
            lua.create_string(&out)
        })?,
    )?;
    st.set(
        "unpack",
        lua.create_function(|lua, (fmt, data): (mlua::String, mlua::String)| {
            let values = struct_unpack(lua, &fmt.as_bytes(), &data.as_bytes())
                .map_err(mlua::Error::RuntimeError)?;
            Ok(Variadic::from_iter(values))
        })?,
    )?;
    lua.globals().set("struct", st)
}

fn struct_pack(fmt: &[u8], args: &[LuaValue]) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    let mut little = true;
    let mut next = 0usize;

    let take_num = |next: &mut usize| -> Result<f64, String> {
        let v = args.get(*next).ok_or("missing value for format")?;
        *next += 1;
        match v {
            LuaValue::Integer(n) => Ok(*n as f64),
            LuaValue::Number(n) => Ok(*n),
            LuaValue::String(s) => std::str::from_utf8(&s.as_bytes())
                .ok()
                .and_then(|x| x.parse().ok())
                .ok_or_else(|| "bad number".to_string()),
            _ => Err("bad value for numeric format".into()),
        }
    };

    for &c in fmt {
        macro_rules! put_int {
            ($ty:ty) => {{
                let n = take_num(&mut next)? as i64 as $ty;
                if little {
                    out.extend_from_slice(&n.to_le_bytes());
                } else {
                    out.extend_from_slice(&n.to_be_bytes());
                }
            }};
        }
        match c {
            b'<' => little = true,
            b'>' => little = false,
            b'=' => little = true,
            b'b' | b'B' => put_int!(u8),
            b'h' | b'H' => put_int!(u16),
            b'i' | b'I' => put_int!(u32),
            b'l' | b'L' => put_int!(u64),
            b'f' => {
                let n = take_num(&mut next)? as f32;
                let raw = if little {
                    n.to_le_bytes()
                } else {
                    n.to_be_bytes()
                };
                out.extend_from_slice(&raw);
            }
            b'd' => {
                let n = take_num(&mut next)?;
                let raw = if little {
                    n.to_le_bytes()
                } else {
                    n.to_be_bytes()
                };
                out.extend_from_slice(&raw);
            }
            b's' => {
                let v = args.get(next).ok_or("missing string value")?;
                next += 1;
                match v {
                    LuaValue::String(s) => {
                        out.extend_from_slice(&s.as_bytes());
                        out.push(0);
                    }
                    _ => return Err("bad value for 's' format".into()),
                }
            }
            b' ' => {}
            other => return Err(format!("unknown format char '{}'", other as char)),
        }
    }
    Ok(out)
}

fn struct_unpack(lua: &Lua, fmt: &[u8], data: &[u8]) -> Result<Vec<LuaValue>, String> {
    let mut out = Vec::new();
    let mut little = true;
    let mut pos = 0usize;

    macro_rules! get_bytes {
        ($n:expr) => {{
            let end = pos + $n;
            let raw = data.get(pos..end).ok_or("data string too short")?;
            pos = end;
            raw
        }};
    }
    macro_rules! get_int {
        ($ty:ty, $signed:ty) => {{
            let raw: [u8; std::mem::size_of::<$ty>()] =
                get_bytes!(std::mem::size_of::<$ty>()).try_into().unwrap();
            let v = if little {
                <$ty>::from_le_bytes(raw)
            } else {
                <$ty>::from_be_bytes(raw)
            };
            v as $signed as i64
        }};
    }

    for &c in fmt {
        match c {
            b'<' => little = true,
            b'>' => little = false,
            b'=' => little = true,
            b'b' => out.push(LuaValue::Integer(get_int!(u8, i8))),
            b'B' => out.push(LuaValue::Integer(get_int!(u8, u8))),
            b'h' => out.push(LuaValue::Integer(get_int!(u16, i16))),
            b'H' => out.push(LuaValue::Integer(get_int!(u16, u16))),
            b'i' => out.push(LuaValue::Integer(get_int!(u32, i32))),
            b'I' => out.push(LuaValue::Integer(get_int!(u32, u32))),
            b'l' | b'L' => out.push(LuaValue::Integer(get_int!(u64, i64))),
            b'f' => {
                let raw: [u8; 4] = get_bytes!(4).try_into().unwrap();
                let v = if little {
                    f32::from_le_bytes(raw)
                } else {
                    f32::from_be_bytes(raw)
                };
                out.push(LuaValue::Number(v as f64));
            }
            b'd' => {
                let raw: [u8; 8] = get_bytes!(8).try_into().unwrap();
                let v = if little {
                    f64::from_le_bytes(raw)
                } else {
                    f64::from_be_bytes(raw)
                };
                out.push(LuaValue::Number(v));
            }
            b's' => {
                let nul = data[pos..]
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or("unterminated string")?;
                let s = lua
                    .create_string(&data[pos..pos + nul])
                    .map_err(|e| e.to_string())?;
                out.push(LuaValue::String(s));
                pos += nul + 1;
            }
            b' ' => {}
            other => return Err(format!("unknown format char '{}'", other as char)),
        }
    }
    // trailing offset like lua-struct's unpack
    out.push(LuaValue::Integer(pos as i64 + 1));
    Ok(out)
}

// ---------------------------------------------------------------------------
// sandbox
// ---------------------------------------------------------------------------

fn sandbox(lua: &Lua) -> mlua::Result<()> {
    // the protected-library guard and bytecode rejection live in Lua:
    // identity checks against the library tables are simplest there
    lua.load(
        r#"
        io = nil
        dofile = nil
        loadfile = nil
        package = nil
        debug = nil
        os = { time = os.time, clock = os.clock }

        local protected = { [cjson] = true, [cmsgpack] = true,
                            [bit] = true, [struct] = true,
                            [string] = true, [table] = true, [math] = true }
        local rawsetmeta = setmetatable
        setmetatable = function(t, mt)
            if protected[t] then
                error("Attempt to modify a readonly table")
            end
            return rawsetmeta(t, mt)
        end

        local rawload = loadstring
        loadstring = function(chunk, name)
            if type(chunk) == "string" and chunk:byte(1) == 27 then
                error("Lua bytecode is not allowed")
            end
            return rawload(chunk, name)
        end
        load = loadstring
        "#,
    )
    .set_name("@sandbox")
    .exec()
}
