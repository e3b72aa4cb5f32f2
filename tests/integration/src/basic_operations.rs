//! String and generic key operations over the wire.

use std::time::Duration;

use crate::helpers::{TestServer, Value};

#[tokio::test]
async fn ping_and_echo() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.cmd(&["PING"]).await, Value::Simple("PONG".into()));
    assert_eq!(c.get_bulk(&["PING", "hi"]).await, Some("hi".into()));
    assert_eq!(c.get_bulk(&["ECHO", "echoed"]).await, Some("echoed".into()));
}

#[tokio::test]
async fn set_get_del_exists() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "foo", "bar"]).await;
    assert_eq!(c.get_bulk(&["GET", "foo"]).await, Some("bar".into()));
    assert_eq!(c.cmd(&["GET", "missing"]).await, Value::Null);
    assert_eq!(c.get_int(&["EXISTS", "foo", "missing", "foo"]).await, 2);
    assert_eq!(c.get_int(&["DEL", "foo", "missing"]).await, 1);
    assert_eq!(c.cmd(&["GET", "foo"]).await, Value::Null);
}

#[tokio::test]
async fn set_nx_xx() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "k", "first", "NX"]).await;
    assert_eq!(c.cmd(&["SET", "k", "second", "NX"]).await, Value::Null);
    assert_eq!(c.get_bulk(&["GET", "k"]).await, Some("first".into()));

    assert_eq!(c.cmd(&["SET", "other", "v", "XX"]).await, Value::Null);
    c.ok(&["SET", "k", "updated", "XX"]).await;
    assert_eq!(c.get_bulk(&["GET", "k"]).await, Some("updated".into()));
}

#[tokio::test]
async fn set_px_expires_lazily() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "k", "v", "PX", "50"]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(c.cmd(&["GET", "k"]).await, Value::Null);
    assert_eq!(c.cmd(&["TYPE", "k"]).await, Value::Simple("none".into()));
}

#[tokio::test]
async fn ttl_family() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "k", "v"]).await;
    assert_eq!(c.get_int(&["TTL", "k"]).await, -1);
    assert_eq!(c.get_int(&["TTL", "missing"]).await, -2);

    assert_eq!(c.get_int(&["EXPIRE", "k", "100"]).await, 1);
    let ttl = c.get_int(&["TTL", "k"]).await;
    assert!(ttl > 90 && ttl <= 100, "ttl was {ttl}");
    let pttl = c.get_int(&["PTTL", "k"]).await;
    assert!(pttl > 90_000 && pttl <= 100_000);

    assert_eq!(c.get_int(&["PERSIST", "k"]).await, 1);
    assert_eq!(c.get_int(&["TTL", "k"]).await, -1);
}

#[tokio::test]
async fn expire_flags() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "k", "v"]).await;
    assert_eq!(c.get_int(&["EXPIRE", "k", "100", "XX"]).await, 0);
    assert_eq!(c.get_int(&["EXPIRE", "k", "100", "NX"]).await, 1);
    assert_eq!(c.get_int(&["EXPIRE", "k", "50", "GT"]).await, 0);
    assert_eq!(c.get_int(&["EXPIRE", "k", "200", "GT"]).await, 1);
    assert_eq!(c.get_int(&["EXPIRE", "k", "100", "LT"]).await, 1);
}

#[tokio::test]
async fn expire_flags_combine_and_validate() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "k", "v"]).await;
    // XX+GT with no TTL yet: both conditions must hold
    assert_eq!(c.get_int(&["EXPIRE", "k", "100", "XX", "GT"]).await, 0);
    assert_eq!(c.get_int(&["EXPIRE", "k", "100"]).await, 1);
    assert_eq!(c.get_int(&["EXPIRE", "k", "50", "XX", "GT"]).await, 0);
    assert_eq!(c.get_int(&["EXPIRE", "k", "200", "XX", "GT"]).await, 1);
    assert_eq!(c.get_int(&["EXPIRE", "k", "100", "XX", "LT"]).await, 1);

    let msg = c.err(&["EXPIRE", "k", "100", "GT", "LT"]).await;
    assert_eq!(msg, "ERR GT and LT options at the same time are not compatible");
    let msg = c.err(&["EXPIRE", "k", "100", "NX", "XX"]).await;
    assert_eq!(
        msg,
        "ERR NX and XX, GT or LT options at the same time are not compatible"
    );
    let msg = c.err(&["PEXPIRE", "k", "100000", "NX", "GT"]).await;
    assert!(msg.starts_with("ERR NX and XX"));
    let msg = c.err(&["EXPIRE", "k", "100", "BOGUS"]).await;
    assert!(msg.starts_with("ERR Unsupported option"));
}

#[tokio::test]
async fn lcs_len_and_idx() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "key1", "ohmytext"]).await;
    c.ok(&["SET", "key2", "mynewtext"]).await;

    assert_eq!(c.get_bulk(&["LCS", "key1", "key2"]).await, Some("mytext".into()));
    assert_eq!(c.get_int(&["LCS", "key1", "key2", "LEN"]).await, 6);

    let Value::Array(idx) = c.cmd(&["LCS", "key1", "key2", "IDX", "MINMATCHLEN", "4"]).await
    else {
        panic!("expected idx reply");
    };
    assert_eq!(idx[0], Value::Bulk("matches".into()));
    let Value::Array(matches) = &idx[1] else {
        panic!("expected matches array");
    };
    // MINMATCHLEN 4 filters the 2-byte "my" block
    assert_eq!(matches.len(), 1);
    assert_eq!(
        matches[0],
        Value::Array(vec![
            Value::Array(vec![Value::Integer(4), Value::Integer(7)]),
            Value::Array(vec![Value::Integer(5), Value::Integer(8)]),
        ])
    );
    assert_eq!(idx[2], Value::Bulk("len".into()));
    assert_eq!(idx[3], Value::Integer(6));

    // WITHMATCHLEN appends the block length
    let Value::Array(idx) = c
        .cmd(&["LCS", "key1", "key2", "IDX", "WITHMATCHLEN"])
        .await
    else {
        panic!("expected idx reply");
    };
    let Value::Array(matches) = &idx[1] else {
        panic!("expected matches array");
    };
    assert_eq!(matches.len(), 2);
    let Value::Array(first) = &matches[0] else {
        panic!("expected block");
    };
    assert_eq!(first[2], Value::Integer(4));
}

#[tokio::test]
async fn lcs_option_validation() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "a", "x"]).await;
    c.ok(&["SET", "b", "y"]).await;
    // LEN and IDX are mutually exclusive; the IDX refinements need IDX
    assert_eq!(c.err(&["LCS", "a", "b", "LEN", "IDX"]).await, "ERR syntax error");
    assert_eq!(c.err(&["LCS", "a", "b", "WITHMATCHLEN"]).await, "ERR syntax error");
    // missing keys read as empty strings
    assert_eq!(c.get_int(&["LCS", "nope1", "nope2", "LEN"]).await, 0);
    // wrong-typed keys error
    c.cmd(&["RPUSH", "l", "x"]).await;
    let msg = c.err(&["LCS", "l", "a"]).await;
    assert!(msg.starts_with("WRONGTYPE"));
}

#[tokio::test]
async fn expire_bad_value_is_error() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "k", "v"]).await;
    let msg = c.err(&["EXPIRE", "k", "notanumber"]).await;
    assert!(msg.starts_with("ERR"));
    // key untouched
    assert_eq!(c.get_int(&["TTL", "k"]).await, -1);
}

#[tokio::test]
async fn incr_family() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.get_int(&["INCR", "n"]).await, 1);
    assert_eq!(c.get_int(&["INCRBY", "n", "9"]).await, 10);
    assert_eq!(c.get_int(&["DECR", "n"]).await, 9);
    assert_eq!(c.get_int(&["DECRBY", "n", "4"]).await, 5);

    c.ok(&["SET", "s", "notanumber"]).await;
    let msg = c.err(&["INCR", "s"]).await;
    assert!(msg.contains("not an integer"));
}

#[tokio::test]
async fn incr_overflow() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "n", &i64::MAX.to_string()]).await;
    let msg = c.err(&["INCR", "n"]).await;
    assert_eq!(msg, "ERR increment or decrement would overflow");
}

#[tokio::test]
async fn incrbyfloat_strips_zeros() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "f", "10.5"]).await;
    assert_eq!(c.get_bulk(&["INCRBYFLOAT", "f", "0.1"]).await, Some("10.6".into()));
    c.ok(&["SET", "g", "3.0"]).await;
    assert_eq!(c.get_bulk(&["INCRBYFLOAT", "g", "1.0"]).await, Some("4".into()));
}

#[tokio::test]
async fn append_strlen_ranges() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.get_int(&["APPEND", "k", "Hello "]).await, 6);
    assert_eq!(c.get_int(&["APPEND", "k", "World"]).await, 11);
    assert_eq!(c.get_int(&["STRLEN", "k"]).await, 11);
    assert_eq!(c.get_bulk(&["GETRANGE", "k", "0", "4"]).await, Some("Hello".into()));
    assert_eq!(c.get_bulk(&["GETRANGE", "k", "-5", "-1"]).await, Some("World".into()));
    assert_eq!(c.get_int(&["SETRANGE", "k", "6", "Redis"]).await, 11);
    assert_eq!(c.get_bulk(&["GET", "k"]).await, Some("Hello Redis".into()));
}

#[tokio::test]
async fn bit_operations() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.get_int(&["SETBIT", "b", "7", "1"]).await, 0);
    assert_eq!(c.get_int(&["GETBIT", "b", "7"]).await, 1);
    assert_eq!(c.get_int(&["GETBIT", "b", "6"]).await, 0);
    assert_eq!(c.get_int(&["SETBIT", "b", "7", "0"]).await, 1);
}

#[tokio::test]
async fn mset_mget_msetnx() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["MSET", "a", "1", "b", "2"]).await;
    assert_eq!(
        c.cmd(&["MGET", "a", "missing", "b"]).await,
        Value::Array(vec![
            Value::Bulk("1".into()),
            Value::Null,
            Value::Bulk("2".into()),
        ])
    );
    assert_eq!(c.get_int(&["MSETNX", "a", "x", "c", "3"]).await, 0);
    assert_eq!(c.cmd(&["GET", "c"]).await, Value::Null);
    assert_eq!(c.get_int(&["MSETNX", "c", "3", "d", "4"]).await, 1);
}

#[tokio::test]
async fn rename_and_copy() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "src", "v"]).await;
    c.ok(&["RENAME", "src", "dst"]).await;
    assert_eq!(c.cmd(&["GET", "src"]).await, Value::Null);
    assert_eq!(c.get_bulk(&["GET", "dst"]).await, Some("v".into()));

    let msg = c.err(&["RENAME", "nope", "x"]).await;
    assert!(msg.contains("no such key"));

    assert_eq!(c.get_int(&["COPY", "dst", "copy"]).await, 1);
    assert_eq!(c.get_bulk(&["GET", "copy"]).await, Some("v".into()));
    assert_eq!(c.get_int(&["COPY", "dst", "copy"]).await, 0);
    assert_eq!(c.get_int(&["COPY", "dst", "copy", "REPLACE"]).await, 1);
}

#[tokio::test]
async fn keys_glob_and_dbsize() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    for key in ["one", "two", "three"] {
        c.ok(&["SET", key, "v"]).await;
    }
    assert_eq!(c.get_int(&["DBSIZE"]).await, 3);
    let Value::Array(keys) = c.cmd(&["KEYS", "t*"]).await else {
        panic!("expected array");
    };
    assert_eq!(keys.len(), 2);
    c.ok(&["FLUSHDB"]).await;
    assert_eq!(c.get_int(&["DBSIZE"]).await, 0);
}

#[tokio::test]
async fn scan_pages_through_keys() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    for i in 0..30 {
        c.ok(&["SET", &format!("key:{i:02}"), "v"]).await;
    }
    let mut seen = 0;
    let mut cursor = "0".to_string();
    loop {
        let Value::Array(parts) = c.cmd(&["SCAN", &cursor, "COUNT", "7"]).await else {
            panic!("expected array");
        };
        let Value::Bulk(next) = &parts[0] else {
            panic!("expected cursor");
        };
        let Value::Array(batch) = &parts[1] else {
            panic!("expected batch");
        };
        seen += batch.len();
        cursor = String::from_utf8_lossy(next).into_owned();
        if cursor == "0" {
            break;
        }
    }
    assert_eq!(seen, 30);
}

#[tokio::test]
async fn select_isolates_databases() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "k", "zero"]).await;
    c.ok(&["SELECT", "5"]).await;
    assert_eq!(c.cmd(&["GET", "k"]).await, Value::Null);
    c.ok(&["SET", "k", "five"]).await;
    c.ok(&["SELECT", "0"]).await;
    assert_eq!(c.get_bulk(&["GET", "k"]).await, Some("zero".into()));

    c.ok(&["SWAPDB", "0", "5"]).await;
    assert_eq!(c.get_bulk(&["GET", "k"]).await, Some("five".into()));
}

#[tokio::test]
async fn wrongtype_errors() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.cmd(&["RPUSH", "l", "x"]).await;
    let msg = c.err(&["GET", "l"]).await;
    assert!(msg.starts_with("WRONGTYPE"));
    let msg = c.err(&["INCR", "l"]).await;
    assert!(msg.starts_with("WRONGTYPE"));
}

#[tokio::test]
async fn getdel_and_getex() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "k", "v"]).await;
    assert_eq!(c.get_bulk(&["GETDEL", "k"]).await, Some("v".into()));
    assert_eq!(c.cmd(&["GET", "k"]).await, Value::Null);

    c.ok(&["SET", "k2", "v2"]).await;
    assert_eq!(c.get_bulk(&["GETEX", "k2", "EX", "100"]).await, Some("v2".into()));
    assert!(c.get_int(&["TTL", "k2"]).await > 0);
    assert_eq!(c.get_bulk(&["GETEX", "k2", "PERSIST"]).await, Some("v2".into()));
    assert_eq!(c.get_int(&["TTL", "k2"]).await, -1);
}

#[tokio::test]
async fn object_encoding_reports_classes() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "n", "12345"]).await;
    assert_eq!(c.get_bulk(&["OBJECT", "ENCODING", "n"]).await, Some("int".into()));
    c.ok(&["SET", "s", "short"]).await;
    assert_eq!(c.get_bulk(&["OBJECT", "ENCODING", "s"]).await, Some("embstr".into()));
    c.cmd(&["APPEND", "s", "x"]).await;
    assert_eq!(c.get_bulk(&["OBJECT", "ENCODING", "s"]).await, Some("raw".into()));
}
