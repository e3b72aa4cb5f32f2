//! MULTI/EXEC/WATCH over the wire.

use crate::helpers::{TestServer, Value};

#[tokio::test]
async fn multi_exec_commits_atomically() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["MULTI"]).await;
    assert_eq!(c.cmd(&["SET", "a", "1"]).await, Value::Simple("QUEUED".into()));
    assert_eq!(c.cmd(&["INCR", "a"]).await, Value::Simple("QUEUED".into()));
    assert_eq!(
        c.cmd(&["EXEC"]).await,
        Value::Array(vec![Value::Simple("OK".into()), Value::Integer(2)])
    );
    assert_eq!(c.get_bulk(&["GET", "a"]).await, Some("2".into()));
}

#[tokio::test]
async fn discard_drops_queue() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["MULTI"]).await;
    c.cmd(&["SET", "a", "1"]).await;
    c.ok(&["DISCARD"]).await;
    assert_eq!(c.cmd(&["GET", "a"]).await, Value::Null);
    // queue really is gone
    let msg = c.err(&["EXEC"]).await;
    assert!(msg.contains("EXEC without MULTI"));
}

#[tokio::test]
async fn queued_error_marks_dirty_and_aborts() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["MULTI"]).await;
    let msg = c.err(&["GET"]).await; // arity error during queueing
    assert!(msg.contains("wrong number of arguments"));
    c.cmd(&["SET", "a", "1"]).await;
    let msg = c.err(&["EXEC"]).await;
    assert!(msg.starts_with("EXECABORT"));
    assert_eq!(c.cmd(&["GET", "a"]).await, Value::Null);
}

#[tokio::test]
async fn runtime_error_does_not_abort() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "s", "text"]).await;
    c.ok(&["MULTI"]).await;
    c.cmd(&["INCR", "s"]).await; // will fail at run time
    c.cmd(&["SET", "a", "1"]).await;
    let Value::Array(replies) = c.cmd(&["EXEC"]).await else {
        panic!("expected array");
    };
    assert!(matches!(&replies[0], Value::Error(_)));
    assert_eq!(replies[1], Value::Simple("OK".into()));
    assert_eq!(c.get_bulk(&["GET", "a"]).await, Some("1".into()));
}

#[tokio::test]
async fn watch_aborts_on_concurrent_write() {
    let server = TestServer::start();
    let mut alice = server.connect().await;
    let mut bob = server.connect().await;

    // spec scenario 2
    alice.ok(&["SET", "x", "1"]).await;
    alice.ok(&["WATCH", "x"]).await;
    alice.ok(&["MULTI"]).await;
    alice.cmd(&["INCR", "x"]).await;

    bob.ok(&["SET", "x", "42"]).await;

    assert_eq!(alice.cmd(&["EXEC"]).await, Value::Null);
    assert_eq!(alice.get_bulk(&["GET", "x"]).await, Some("42".into()));
}

#[tokio::test]
async fn watch_with_unchanged_digest_commits() {
    let server = TestServer::start();
    let mut alice = server.connect().await;
    let mut bob = server.connect().await;

    alice.ok(&["SET", "x", "5"]).await;
    alice.ok(&["WATCH", "x"]).await;
    // a write that leaves the same observable value does not abort
    bob.ok(&["SET", "x", "5"]).await;
    alice.ok(&["MULTI"]).await;
    alice.cmd(&["INCR", "x"]).await;
    assert_eq!(
        alice.cmd(&["EXEC"]).await,
        Value::Array(vec![Value::Integer(6)])
    );
}

#[tokio::test]
async fn unwatch_clears_watches() {
    let server = TestServer::start();
    let mut alice = server.connect().await;
    let mut bob = server.connect().await;

    alice.ok(&["SET", "x", "1"]).await;
    alice.ok(&["WATCH", "x"]).await;
    bob.ok(&["SET", "x", "99"]).await;
    alice.ok(&["UNWATCH"]).await;
    alice.ok(&["MULTI"]).await;
    alice.cmd(&["INCR", "x"]).await;
    assert_eq!(
        alice.cmd(&["EXEC"]).await,
        Value::Array(vec![Value::Integer(100)])
    );
}

#[tokio::test]
async fn nested_multi_and_watch_inside_multi() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["MULTI"]).await;
    let msg = c.err(&["MULTI"]).await;
    assert!(msg.contains("nested"));
    let msg = c.err(&["WATCH", "x"]).await;
    assert!(msg.contains("WATCH inside MULTI"));
    c.ok(&["DISCARD"]).await;
}

#[tokio::test]
async fn blocking_command_in_exec_acts_nonblocking() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["MULTI"]).await;
    c.cmd(&["BLPOP", "emptylist", "0"]).await;
    assert_eq!(c.cmd(&["EXEC"]).await, Value::Array(vec![Value::Null]));
}
