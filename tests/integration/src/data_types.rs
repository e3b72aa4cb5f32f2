//! List, hash, set and sorted-set behavior over the wire.

use crate::helpers::{TestServer, Value};

fn bulk(s: &str) -> Value {
    Value::Bulk(bytes::Bytes::copy_from_slice(s.as_bytes()))
}

#[tokio::test]
async fn list_push_pop_range() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.get_int(&["RPUSH", "l", "a", "b", "c"]).await, 3);
    assert_eq!(c.get_int(&["LPUSH", "l", "z"]).await, 4);
    assert_eq!(c.get_int(&["LLEN", "l"]).await, 4);
    assert_eq!(
        c.cmd(&["LRANGE", "l", "0", "-1"]).await,
        Value::Array(vec![bulk("z"), bulk("a"), bulk("b"), bulk("c")])
    );
    assert_eq!(c.get_bulk(&["LPOP", "l"]).await, Some("z".into()));
    assert_eq!(c.get_bulk(&["RPOP", "l"]).await, Some("c".into()));
}

#[tokio::test]
async fn lrange_negative_window() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.cmd(&["RPUSH", "l", "a", "b", "c", "d"]).await;
    assert_eq!(
        c.cmd(&["LRANGE", "l", "-2", "-1"]).await,
        Value::Array(vec![bulk("c"), bulk("d")])
    );
    // stop before start is empty
    assert_eq!(
        c.cmd(&["LRANGE", "l", "-1", "-2"]).await,
        Value::Array(vec![])
    );
}

#[tokio::test]
async fn popping_last_element_removes_key() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.cmd(&["RPUSH", "l", "only"]).await;
    assert_eq!(c.get_bulk(&["LPOP", "l"]).await, Some("only".into()));
    assert_eq!(c.cmd(&["TYPE", "l"]).await, Value::Simple("none".into()));
}

#[tokio::test]
async fn lmove_rotation() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.cmd(&["RPUSH", "src", "a", "b"]).await;
    assert_eq!(
        c.get_bulk(&["LMOVE", "src", "dst", "LEFT", "RIGHT"]).await,
        Some("a".into())
    );
    assert_eq!(
        c.cmd(&["LRANGE", "dst", "0", "-1"]).await,
        Value::Array(vec![bulk("a")])
    );
}

#[tokio::test]
async fn hash_operations() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.get_int(&["HSET", "h", "f1", "v1", "f2", "v2"]).await, 2);
    assert_eq!(c.get_int(&["HSET", "h", "f1", "updated"]).await, 0);
    assert_eq!(c.get_bulk(&["HGET", "h", "f1"]).await, Some("updated".into()));
    assert_eq!(c.cmd(&["HGET", "h", "missing"]).await, Value::Null);
    assert_eq!(c.get_int(&["HLEN", "h"]).await, 2);
    assert_eq!(c.get_int(&["HEXISTS", "h", "f2"]).await, 1);

    // HGETALL interleaves field,value
    let Value::Array(flat) = c.cmd(&["HGETALL", "h"]).await else {
        panic!("expected array");
    };
    assert_eq!(flat.len(), 4);

    assert_eq!(
        c.cmd(&["HMGET", "h", "f2", "nope"]).await,
        Value::Array(vec![bulk("v2"), Value::Null])
    );

    assert_eq!(c.get_int(&["HDEL", "h", "f1", "f2"]).await, 2);
    assert_eq!(c.cmd(&["TYPE", "h"]).await, Value::Simple("none".into()));
}

#[tokio::test]
async fn hash_counters() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.get_int(&["HINCRBY", "h", "n", "5"]).await, 5);
    assert_eq!(c.get_int(&["HINCRBY", "h", "n", "-2"]).await, 3);
    assert_eq!(
        c.get_bulk(&["HINCRBYFLOAT", "h", "f", "1.5"]).await,
        Some("1.5".into())
    );
    assert_eq!(c.get_int(&["HSETNX", "h", "n", "99"]).await, 0);
    assert_eq!(c.get_int(&["HSETNX", "h", "new", "1"]).await, 1);
}

#[tokio::test]
async fn set_operations() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.get_int(&["SADD", "s", "a", "b", "a"]).await, 2);
    assert_eq!(c.get_int(&["SCARD", "s"]).await, 2);
    assert_eq!(c.get_int(&["SISMEMBER", "s", "a"]).await, 1);
    assert_eq!(c.get_int(&["SISMEMBER", "s", "x"]).await, 0);
    assert_eq!(
        c.cmd(&["SMEMBERS", "s"]).await,
        Value::Array(vec![bulk("a"), bulk("b")])
    );
    assert_eq!(c.get_int(&["SREM", "s", "a", "ghost"]).await, 1);

    // draining via SPOP removes the key
    let popped = c.cmd(&["SPOP", "s"]).await;
    assert_eq!(popped, bulk("b"));
    assert_eq!(c.cmd(&["TYPE", "s"]).await, Value::Simple("none".into()));
}

#[tokio::test]
async fn zadd_and_tie_ordering() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    // spec scenario: equal scores order lexicographically
    assert_eq!(c.get_int(&["ZADD", "z", "1", "b", "1", "a", "1", "c"]).await, 3);
    assert_eq!(
        c.cmd(&["ZRANGE", "z", "0", "-1"]).await,
        Value::Array(vec![bulk("a"), bulk("b"), bulk("c")])
    );
}

#[tokio::test]
async fn zrange_withscores_interleaves() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.cmd(&["ZADD", "z", "1.5", "m", "2", "n"]).await;
    assert_eq!(
        c.cmd(&["ZRANGE", "z", "0", "-1", "WITHSCORES"]).await,
        Value::Array(vec![bulk("m"), bulk("1.5"), bulk("n"), bulk("2")])
    );
}

#[tokio::test]
async fn zadd_flag_validation() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let msg = c.err(&["ZADD", "z", "NX", "XX", "1", "m"]).await;
    assert!(msg.contains("not compatible"));
    let msg = c.err(&["ZADD", "z", "GT", "LT", "1", "m"]).await;
    assert!(msg.contains("not compatible"));
    let msg = c.err(&["ZADD", "z", "INCR", "1", "a", "2", "b"]).await;
    assert!(msg.contains("single increment-element pair"));
}

#[tokio::test]
async fn zadd_incr_and_gt() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.get_bulk(&["ZADD", "z", "INCR", "5", "m"]).await, Some("5".into()));
    assert_eq!(c.get_bulk(&["ZADD", "z", "INCR", "2.5", "m"]).await, Some("7.5".into()));
    // NX veto on INCR reports nil
    assert_eq!(c.cmd(&["ZADD", "z", "NX", "INCR", "1", "m"]).await, Value::Null);

    c.cmd(&["ZADD", "z", "GT", "3", "m"]).await;
    assert_eq!(c.get_bulk(&["ZSCORE", "z", "m"]).await, Some("7.5".into()));
    c.cmd(&["ZADD", "z", "GT", "9", "m"]).await;
    assert_eq!(c.get_bulk(&["ZSCORE", "z", "m"]).await, Some("9".into()));
}

#[tokio::test]
async fn zpop_both_ends() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.cmd(&["ZADD", "z", "1", "low", "5", "mid", "9", "high"]).await;
    assert_eq!(
        c.cmd(&["ZPOPMIN", "z"]).await,
        Value::Array(vec![bulk("low"), bulk("1")])
    );
    assert_eq!(
        c.cmd(&["ZPOPMAX", "z"]).await,
        Value::Array(vec![bulk("high"), bulk("9")])
    );
    assert_eq!(c.get_int(&["ZCARD", "z"]).await, 1);
}

#[tokio::test]
async fn zmpop_first_nonempty_key() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.cmd(&["ZADD", "z2", "1", "a", "2", "b", "3", "c"]).await;
    // the empty first key is skipped
    assert_eq!(
        c.cmd(&["ZMPOP", "2", "z1", "z2", "MIN"]).await,
        Value::Array(vec![
            bulk("z2"),
            Value::Array(vec![bulk("a"), bulk("1")]),
        ])
    );
    // COUNT pops several from the high end
    assert_eq!(
        c.cmd(&["ZMPOP", "2", "z1", "z2", "MAX", "COUNT", "2"]).await,
        Value::Array(vec![
            bulk("z2"),
            Value::Array(vec![bulk("c"), bulk("3"), bulk("b"), bulk("2")]),
        ])
    );
    // everything drained: nil
    assert_eq!(c.cmd(&["ZMPOP", "2", "z1", "z2", "MIN"]).await, Value::Null);
}

#[tokio::test]
async fn zmpop_argument_validation() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(
        c.err(&["ZMPOP", "0", "z", "MIN"]).await,
        "ERR numkeys should be greater than 0"
    );
    assert_eq!(c.err(&["ZMPOP", "2", "z", "MIN"]).await, "ERR syntax error");
    assert_eq!(
        c.err(&["ZMPOP", "1", "z", "SIDEWAYS"]).await,
        "ERR syntax error"
    );
    assert_eq!(
        c.err(&["ZMPOP", "1", "z", "MIN", "COUNT", "0"]).await,
        "ERR count should be greater than 0"
    );
}

#[tokio::test]
async fn sort_numeric_alpha_and_limit() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.cmd(&["RPUSH", "nums", "3", "1", "2", "10"]).await;
    assert_eq!(
        c.cmd(&["SORT", "nums"]).await,
        Value::Array(vec![bulk("1"), bulk("2"), bulk("3"), bulk("10")])
    );
    assert_eq!(
        c.cmd(&["SORT", "nums", "DESC"]).await,
        Value::Array(vec![bulk("10"), bulk("3"), bulk("2"), bulk("1")])
    );
    assert_eq!(
        c.cmd(&["SORT", "nums", "LIMIT", "1", "2"]).await,
        Value::Array(vec![bulk("2"), bulk("3")])
    );

    // ALPHA compares bytes, so "10" sorts before "2"
    c.cmd(&["RPUSH", "words", "pear", "apple", "10", "2"]).await;
    assert_eq!(
        c.cmd(&["SORT", "words", "ALPHA"]).await,
        Value::Array(vec![bulk("10"), bulk("2"), bulk("apple"), bulk("pear")])
    );
}

#[tokio::test]
async fn sort_by_and_get_patterns() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.cmd(&["RPUSH", "ids", "1", "2", "3"]).await;
    c.ok(&["SET", "weight_1", "30"]).await;
    c.ok(&["SET", "weight_2", "10"]).await;
    c.ok(&["SET", "weight_3", "20"]).await;
    c.ok(&["SET", "name_1", "one"]).await;
    c.ok(&["SET", "name_2", "two"]).await;
    c.ok(&["SET", "name_3", "three"]).await;

    assert_eq!(
        c.cmd(&["SORT", "ids", "BY", "weight_*"]).await,
        Value::Array(vec![bulk("2"), bulk("3"), bulk("1")])
    );
    // GET substitutes each element; '#' is the element itself, a
    // missing lookup reads as nil
    assert_eq!(
        c.cmd(&["SORT", "ids", "BY", "weight_*", "GET", "name_*", "GET", "#"]).await,
        Value::Array(vec![
            bulk("two"),
            bulk("2"),
            bulk("three"),
            bulk("3"),
            bulk("one"),
            bulk("1"),
        ])
    );
    c.cmd(&["DEL", "name_3"]).await;
    assert_eq!(
        c.cmd(&["SORT", "ids", "BY", "weight_*", "GET", "name_*"]).await,
        Value::Array(vec![bulk("two"), Value::Null, bulk("one")])
    );
}

#[tokio::test]
async fn sort_store_writes_a_list() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.cmd(&["SADD", "s", "3", "1", "2"]).await;
    assert_eq!(c.get_int(&["SORT", "s", "STORE", "sorted"]).await, 3);
    assert_eq!(c.cmd(&["TYPE", "sorted"]).await, Value::Simple("list".into()));
    assert_eq!(
        c.cmd(&["LRANGE", "sorted", "0", "-1"]).await,
        Value::Array(vec![bulk("1"), bulk("2"), bulk("3")])
    );
    // STORE replaces the destination outright
    c.cmd(&["DEL", "s"]).await;
    c.cmd(&["SADD", "s", "9"]).await;
    assert_eq!(c.get_int(&["SORT", "s", "STORE", "sorted"]).await, 1);
    assert_eq!(c.get_int(&["LLEN", "sorted"]).await, 1);
}

#[tokio::test]
async fn sort_wrongtype_and_missing() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.cmd(&["SORT", "missing"]).await, Value::Array(vec![]));
    c.ok(&["SET", "str", "v"]).await;
    let msg = c.err(&["SORT", "str"]).await;
    assert!(msg.starts_with("WRONGTYPE"));
}

#[tokio::test]
async fn scores_serialize_without_trailing_zeros() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.cmd(&["ZADD", "z", "3.0", "m"]).await;
    assert_eq!(c.get_bulk(&["ZSCORE", "z", "m"]).await, Some("3".into()));
    c.cmd(&["ZADD", "z", "2.50", "n"]).await;
    assert_eq!(c.get_bulk(&["ZSCORE", "z", "n"]).await, Some("2.5".into()));
}
