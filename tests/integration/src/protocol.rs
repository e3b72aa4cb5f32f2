//! Wire-protocol behavior: inline commands, pipelining, malformed
//! frames, HELLO and RESP3 shapes.

use crate::helpers::{TestServer, Value};

#[tokio::test]
async fn inline_commands_work() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.send_raw(b"PING\r\n").await;
    assert_eq!(c.read_value().await, Value::Simple("PONG".into()));

    c.send_raw(b"SET inline-key inline-value\r\n").await;
    assert_eq!(c.read_value().await, Value::Simple("OK".into()));
    assert_eq!(
        c.get_bulk(&["GET", "inline-key"]).await,
        Some("inline-value".into())
    );
}

#[tokio::test]
async fn blank_inline_lines_are_skipped() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.send_raw(b"\r\nPING\r\n").await;
    assert_eq!(c.read_value().await, Value::Simple("PONG".into()));
}

#[tokio::test]
async fn pipelined_commands_reply_in_order() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.send(&["SET", "p", "1"]).await;
    c.send(&["INCR", "p"]).await;
    c.send(&["GET", "p"]).await;
    assert_eq!(c.read_value().await, Value::Simple("OK".into()));
    assert_eq!(c.read_value().await, Value::Integer(2));
    assert_eq!(c.read_value().await, Value::Bulk("2".into()));
}

#[tokio::test]
async fn malformed_frame_gets_protocol_error() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.send_raw(b"*abc\r\n").await;
    let reply = c.read_value().await;
    assert!(matches!(reply, Value::Error(msg) if msg.contains("Protocol error")));
    // the connection stays usable
    assert_eq!(c.cmd(&["PING"]).await, Value::Simple("PONG".into()));
}

#[tokio::test]
async fn empty_multibulk_is_protocol_error() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.send_raw(b"*0\r\n").await;
    let reply = c.read_value().await;
    assert!(matches!(reply, Value::Error(msg) if msg.contains("Protocol error")));
}

#[tokio::test]
async fn unknown_command_error() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let msg = c.err(&["DEFINITELYNOTACOMMAND"]).await;
    assert!(msg.contains("unknown command"));
}

#[tokio::test]
async fn hello_negotiates_resp3() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let Value::Map(fields) = c.cmd(&["HELLO", "3"]).await else {
        panic!("expected RESP3 map from HELLO 3");
    };
    let proto = fields
        .iter()
        .find(|(k, _)| *k == Value::Bulk("proto".into()))
        .map(|(_, v)| v.clone());
    assert_eq!(proto, Some(Value::Integer(3)));

    // RESP3 nulls use the `_` form; the test parser folds both to Null
    assert_eq!(c.cmd(&["GET", "missing"]).await, Value::Null);

    // back to RESP2
    let reply = c.cmd(&["HELLO", "2"]).await;
    assert!(matches!(reply, Value::Array(_)), "RESP2 HELLO flattens the map");
}

#[tokio::test]
async fn hello_bad_version_is_noproto() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let msg = c.err(&["HELLO", "9"]).await;
    assert!(msg.starts_with("NOPROTO"));
}

#[tokio::test]
async fn quit_closes_cleanly() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.cmd(&["QUIT"]).await, Value::Simple("OK".into()));
}

#[tokio::test]
async fn info_exposes_core_fields() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "k", "v"]).await;
    let info = c.get_bulk(&["INFO"]).await.unwrap();
    assert!(info.contains(&format!("tcp_port:{}", server.port)));
    assert!(info.contains("uptime_in_seconds:"));
    assert!(info.contains("connected_clients:"));
    assert!(info.contains("role:master"));
    assert!(info.contains("master_repl_offset:"));
    assert!(info.contains("db0:keys=1"));
    assert!(info.contains("cmdstat_set:calls=1"));
}

#[tokio::test]
async fn config_get_set_roundtrip() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["CONFIG", "SET", "maxmemory", "100mb"]).await;
    let Value::Array(flat) = c.cmd(&["CONFIG", "GET", "maxmemory"]).await else {
        panic!("expected flattened pairs");
    };
    assert_eq!(flat[0], Value::Bulk("maxmemory".into()));
    assert_eq!(flat[1], Value::Bulk((100 * 1024 * 1024).to_string().into()));

    // glob matches several keys
    let Value::Array(flat) = c.cmd(&["CONFIG", "GET", "zset-max-*"]).await else {
        panic!("expected pairs");
    };
    assert!(flat.len() >= 4);
}

#[tokio::test]
async fn command_count_and_docs() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let count = c.get_int(&["COMMAND", "COUNT"]).await;
    assert!(count > 100, "table has {count} commands");
}

#[tokio::test]
async fn dump_restore_roundtrip() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.cmd(&["RPUSH", "src", "a", "b", "c"]).await;
    let Value::Bulk(payload) = c.cmd(&["DUMP", "src"]).await else {
        panic!("expected payload");
    };

    // RESTORE payloads are binary; frame them raw
    let mut frame = Vec::new();
    let args: [&[u8]; 4] = [b"RESTORE", b"dst", b"0", &payload];
    frame.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for a in args {
        frame.extend_from_slice(format!("${}\r\n", a.len()).as_bytes());
        frame.extend_from_slice(a);
        frame.extend_from_slice(b"\r\n");
    }
    c.send_raw(&frame).await;
    assert_eq!(c.read_value().await, Value::Simple("OK".into()));

    assert_eq!(
        c.cmd(&["LRANGE", "dst", "0", "-1"]).await,
        c.cmd(&["LRANGE", "src", "0", "-1"]).await
    );

    // a second RESTORE without REPLACE refuses
    c.send_raw(&frame).await;
    let reply = c.read_value().await;
    assert!(matches!(reply, Value::Error(msg) if msg.starts_with("BUSYKEY")));
}

#[tokio::test]
async fn restore_rejects_corrupt_payload() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let msg = c.err(&["RESTORE", "k", "0", "garbage-payload"]).await;
    assert!(msg.contains("DUMP payload"));
}
