//! Stream commands and consumer-group flow.

use crate::helpers::{TestServer, Value};

fn bulk(s: &str) -> Value {
    Value::Bulk(bytes::Bytes::copy_from_slice(s.as_bytes()))
}

#[tokio::test]
async fn xadd_auto_ids_and_xlen() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let first = c.get_bulk(&["XADD", "s", "*", "f", "1"]).await.unwrap();
    let second = c.get_bulk(&["XADD", "s", "*", "f", "2"]).await.unwrap();
    assert!(second > first, "{second} should sort after {first}");
    assert_eq!(c.get_int(&["XLEN", "s"]).await, 2);
}

#[tokio::test]
async fn explicit_id_must_grow() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.get_bulk(&["XADD", "s", "5-1", "f", "v"]).await;
    let msg = c.err(&["XADD", "s", "5-1", "f", "v"]).await;
    assert_eq!(
        msg,
        "ERR The ID specified in XADD is equal or smaller than the target stream top item"
    );
    let msg = c.err(&["XADD", "s", "4-0", "f", "v"]).await;
    assert!(msg.contains("equal or smaller"));
    assert_eq!(c.get_bulk(&["XADD", "s", "5-2", "f", "v"]).await, Some("5-2".into()));
}

#[tokio::test]
async fn xrange_bounds() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    for i in 1..=5 {
        c.get_bulk(&["XADD", "s", &format!("{i}-0"), "n", &i.to_string()])
            .await;
    }
    let Value::Array(all) = c.cmd(&["XRANGE", "s", "-", "+"]).await else {
        panic!("expected array");
    };
    assert_eq!(all.len(), 5);

    let Value::Array(mid) = c.cmd(&["XRANGE", "s", "2", "4"]).await else {
        panic!("expected array");
    };
    assert_eq!(mid.len(), 3);

    let Value::Array(rev) = c.cmd(&["XREVRANGE", "s", "+", "-"]).await else {
        panic!("expected array");
    };
    let Value::Array(first_entry) = &rev[0] else {
        panic!("expected entry");
    };
    assert_eq!(first_entry[0], bulk("5-0"));

    let Value::Array(limited) = c.cmd(&["XRANGE", "s", "-", "+", "COUNT", "2"]).await else {
        panic!("expected array");
    };
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn group_delivery_pel_and_ack() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    // spec scenario 4
    let id = c.get_bulk(&["XADD", "s", "*", "f", "v"]).await.unwrap();
    c.ok(&["XGROUP", "CREATE", "s", "g", "0"]).await;

    let Value::Array(streams) = c
        .cmd(&["XREADGROUP", "GROUP", "g", "c", "STREAMS", "s", ">"])
        .await
    else {
        panic!("expected array");
    };
    let Value::Array(stream_row) = &streams[0] else {
        panic!("expected stream row");
    };
    assert_eq!(stream_row[0], bulk("s"));
    let Value::Array(entries) = &stream_row[1] else {
        panic!("expected entries");
    };
    let Value::Array(entry) = &entries[0] else {
        panic!("expected entry");
    };
    assert_eq!(entry[0], bulk(&id));
    assert_eq!(entry[1], Value::Array(vec![bulk("f"), bulk("v")]));

    assert_eq!(
        c.cmd(&["XPENDING", "s", "g"]).await,
        Value::Array(vec![
            Value::Integer(1),
            bulk(&id),
            bulk(&id),
            Value::Integer(1),
        ])
    );

    assert_eq!(c.get_int(&["XACK", "s", "g", &id]).await, 1);
    assert_eq!(
        c.cmd(&["XPENDING", "s", "g"]).await,
        Value::Array(vec![
            Value::Integer(0),
            Value::Null,
            Value::Null,
            Value::Null,
        ])
    );
}

#[tokio::test]
async fn duplicate_group_is_busygroup() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.get_bulk(&["XADD", "s", "*", "f", "v"]).await;
    c.ok(&["XGROUP", "CREATE", "s", "g", "0"]).await;
    let msg = c.err(&["XGROUP", "CREATE", "s", "g", "0"]).await;
    assert!(msg.starts_with("BUSYGROUP"));
}

#[tokio::test]
async fn group_on_missing_key_needs_mkstream() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let msg = c.err(&["XGROUP", "CREATE", "nosuch", "g", "0"]).await;
    assert!(msg.contains("MKSTREAM"));
    c.ok(&["XGROUP", "CREATE", "nosuch", "g", "0", "MKSTREAM"]).await;
    assert_eq!(c.cmd(&["TYPE", "nosuch"]).await, Value::Simple("stream".into()));
}

#[tokio::test]
async fn readgroup_without_group_is_nogroup() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.get_bulk(&["XADD", "s", "*", "f", "v"]).await;
    let msg = c
        .err(&["XREADGROUP", "GROUP", "ghost", "c", "STREAMS", "s", ">"])
        .await;
    assert!(msg.starts_with("NOGROUP"));
}

#[tokio::test]
async fn second_read_delivers_nothing_new() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.get_bulk(&["XADD", "s", "*", "f", "v"]).await;
    c.ok(&["XGROUP", "CREATE", "s", "g", "0"]).await;
    c.cmd(&["XREADGROUP", "GROUP", "g", "c", "STREAMS", "s", ">"])
        .await;
    // cursor advanced; nothing undelivered remains
    assert_eq!(
        c.cmd(&["XREADGROUP", "GROUP", "g", "c", "STREAMS", "s", ">"])
            .await,
        Value::Null
    );
}

#[tokio::test]
async fn xdel_cleans_pending_entries() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let id = c.get_bulk(&["XADD", "s", "*", "f", "v"]).await.unwrap();
    c.ok(&["XGROUP", "CREATE", "s", "g", "0"]).await;
    c.cmd(&["XREADGROUP", "GROUP", "g", "c", "STREAMS", "s", ">"])
        .await;
    assert_eq!(c.get_int(&["XDEL", "s", &id]).await, 1);
    assert_eq!(c.get_int(&["XLEN", "s"]).await, 0);
    // stream key survives empty, and the PEL entry is gone
    assert_eq!(c.cmd(&["TYPE", "s"]).await, Value::Simple("stream".into()));
    let Value::Array(pending) = c.cmd(&["XPENDING", "s", "g"]).await else {
        panic!("expected array");
    };
    assert_eq!(pending[0], Value::Integer(0));
}

#[tokio::test]
async fn xinfo_stream_summary() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.get_bulk(&["XADD", "s", "7-0", "f", "v"]).await;
    c.ok(&["XGROUP", "CREATE", "s", "g", "0"]).await;
    let Value::Array(flat) = c.cmd(&["XINFO", "STREAM", "s"]).await else {
        panic!("expected flattened map on RESP2");
    };
    // length / last-generated-id / groups pairs
    assert!(flat.contains(&bulk("length")));
    assert!(flat.contains(&bulk("7-0")));
}
