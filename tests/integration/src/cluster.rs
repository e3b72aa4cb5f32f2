//! Cluster slot queries and redirects.

use crate::helpers::{TestServer, Value};

#[tokio::test]
async fn keyslot_is_stable() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    // reference value from the cluster specification
    assert_eq!(c.get_int(&["CLUSTER", "KEYSLOT", "foo"]).await, 12182);
    // hash tags group keys into one slot
    let a = c.get_int(&["CLUSTER", "KEYSLOT", "user:{42}:a"]).await;
    let b = c.get_int(&["CLUSTER", "KEYSLOT", "user:{42}:b"]).await;
    assert_eq!(a, b);
}

#[tokio::test]
async fn moved_redirect() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    // spec scenario 5: mark foo's slot as moved
    let slot = c.get_int(&["CLUSTER", "KEYSLOT", "foo"]).await;
    // park the redirect target first
    c.ok(&["CLUSTER", "SETSLOT", &slot.to_string(), "NODE", "some-other-node"])
        .await;
    // the default redirect address is empty until MIGRATING sets one;
    // the reply shape still carries slot + addr
    let msg = c.err(&["GET", "foo"]).await;
    assert!(msg.starts_with(&format!("MOVED {slot}")), "got: {msg}");

    // restoring ownership serves the key again
    c.ok(&["CLUSTER", "SETSLOT", &slot.to_string(), "NODE", "self"]).await;
    assert_eq!(c.cmd(&["GET", "foo"]).await, Value::Null);
}

#[tokio::test]
async fn ask_redirect_with_asking() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let slot = c.get_int(&["CLUSTER", "KEYSLOT", "foo"]).await;
    c.ok(&["CLUSTER", "SETSLOT", &slot.to_string(), "MIGRATING", "peer"]).await;

    let msg = c.err(&["GET", "foo"]).await;
    assert!(msg.starts_with(&format!("ASK {slot}")));

    // ASKING lets exactly one command through
    c.ok(&["ASKING"]).await;
    assert_eq!(c.cmd(&["GET", "foo"]).await, Value::Null);
    let msg = c.err(&["GET", "foo"]).await;
    assert!(msg.starts_with("ASK"));

    c.ok(&["CLUSTER", "SETSLOT", &slot.to_string(), "STABLE"]).await;
    assert_eq!(c.cmd(&["GET", "foo"]).await, Value::Null);
}

#[tokio::test]
async fn keys_without_slot_are_unaffected() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let slot = c.get_int(&["CLUSTER", "KEYSLOT", "foo"]).await;
    c.ok(&["CLUSTER", "SETSLOT", &slot.to_string(), "NODE", "other"]).await;
    // keyless commands and other slots still work
    assert_eq!(c.cmd(&["PING"]).await, Value::Simple("PONG".into()));
    c.ok(&["SET", "bar", "v"]).await;
    assert_eq!(c.get_bulk(&["GET", "bar"]).await, Some("v".into()));
}

#[tokio::test]
async fn cluster_info_and_slots() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let info = c.get_bulk(&["CLUSTER", "INFO"]).await.unwrap();
    assert!(info.contains("cluster_state:ok"));

    let Value::Array(slots) = c.cmd(&["CLUSTER", "SLOTS"]).await else {
        panic!("expected array");
    };
    // a fresh node owns everything in one range
    assert_eq!(slots.len(), 1);
    let Value::Array(range) = &slots[0] else {
        panic!("expected range");
    };
    assert_eq!(range[0], Value::Integer(0));
    assert_eq!(range[1], Value::Integer(16383));
}
