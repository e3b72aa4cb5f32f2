//! Blocking list/zset commands.

use std::time::{Duration, Instant};

use crate::helpers::{TestServer, Value};

fn bulk(s: &str) -> Value {
    Value::Bulk(bytes::Bytes::copy_from_slice(s.as_bytes()))
}

#[tokio::test]
async fn blpop_immediate_when_data_present() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.cmd(&["RPUSH", "q", "job"]).await;
    assert_eq!(
        c.cmd(&["BLPOP", "q", "0"]).await,
        Value::Array(vec![bulk("q"), bulk("job")])
    );
}

#[tokio::test]
async fn blpop_wakes_on_push_from_other_connection() {
    let server = TestServer::start();
    let mut waiter = server.connect().await;
    let mut pusher = server.connect().await;

    waiter.send(&["BLPOP", "q", "5"]).await;
    // give the waiter time to park
    tokio::time::sleep(Duration::from_millis(100)).await;
    pusher.cmd(&["RPUSH", "q", "wakeup"]).await;

    let reply = tokio::time::timeout(Duration::from_secs(3), waiter.read_value())
        .await
        .expect("BLPOP should wake");
    assert_eq!(reply, Value::Array(vec![bulk("q"), bulk("wakeup")]));
}

#[tokio::test]
async fn blpop_times_out_with_null() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let started = Instant::now();
    let reply = c.cmd(&["BLPOP", "empty", "0.2"]).await;
    assert_eq!(reply, Value::Null);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(150), "woke too early: {elapsed:?}");
}

#[tokio::test]
async fn blpop_scans_keys_in_order() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.cmd(&["RPUSH", "second", "s"]).await;
    c.cmd(&["RPUSH", "first", "f"]).await;
    assert_eq!(
        c.cmd(&["BLPOP", "first", "second", "0"]).await,
        Value::Array(vec![bulk("first"), bulk("f")])
    );
}

#[tokio::test]
async fn brpoplpush_moves_into_destination() {
    let server = TestServer::start();
    let mut waiter = server.connect().await;
    let mut pusher = server.connect().await;

    waiter.send(&["BRPOPLPUSH", "src", "dst", "5"]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    pusher.cmd(&["RPUSH", "src", "item"]).await;

    let reply = tokio::time::timeout(Duration::from_secs(3), waiter.read_value())
        .await
        .expect("BRPOPLPUSH should wake");
    assert_eq!(reply, bulk("item"));
    assert_eq!(
        pusher.cmd(&["LRANGE", "dst", "0", "-1"]).await,
        Value::Array(vec![bulk("item")])
    );
}

#[tokio::test]
async fn bzpopmin_reports_key_member_score() {
    let server = TestServer::start();
    let mut waiter = server.connect().await;
    let mut pusher = server.connect().await;

    waiter.send(&["BZPOPMIN", "z", "5"]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    pusher.cmd(&["ZADD", "z", "2.5", "member"]).await;

    let reply = tokio::time::timeout(Duration::from_secs(3), waiter.read_value())
        .await
        .expect("BZPOPMIN should wake");
    assert_eq!(
        reply,
        Value::Array(vec![bulk("z"), bulk("member"), bulk("2.5")])
    );
}

#[tokio::test]
async fn woken_pop_is_replicated_like_a_write() {
    let server = TestServer::start();
    let mut waiter = server.connect().await;
    let mut pusher = server.connect().await;

    waiter.send(&["BLPOP", "q", "5"]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    pusher.cmd(&["RPUSH", "q", "one"]).await;
    tokio::time::timeout(Duration::from_secs(3), waiter.read_value())
        .await
        .expect("BLPOP should wake");

    // the queue key emptied out on the master
    assert_eq!(pusher.cmd(&["TYPE", "q"]).await, Value::Simple("none".into()));
}
