//! EVAL/EVALSHA/SCRIPT behavior over the wire.

use crate::helpers::{TestServer, Value};

#[tokio::test]
async fn eval_returns_basic_shapes() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.cmd(&["EVAL", "return 1", "0"]).await, Value::Integer(1));
    assert_eq!(
        c.cmd(&["EVAL", "return 'str'", "0"]).await,
        Value::Bulk("str".into())
    );
    assert_eq!(c.cmd(&["EVAL", "return nil", "0"]).await, Value::Null);
    assert_eq!(
        c.cmd(&["EVAL", "return {1, 2, 'three'}", "0"]).await,
        Value::Array(vec![
            Value::Integer(1),
            Value::Integer(2),
            Value::Bulk("three".into()),
        ])
    );
    assert_eq!(
        c.cmd(&["EVAL", "return redis.status_reply('FINE')", "0"]).await,
        Value::Simple("FINE".into())
    );
}

#[tokio::test]
async fn keys_and_argv() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(
        c.cmd(&["EVAL", "return {KEYS[1], KEYS[2], ARGV[1]}", "2", "k1", "k2", "a1"])
            .await,
        Value::Array(vec![
            Value::Bulk("k1".into()),
            Value::Bulk("k2".into()),
            Value::Bulk("a1".into()),
        ])
    );
}

#[tokio::test]
async fn script_atomic_read_modify_write() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    // spec scenario 6
    c.ok(&["SET", "ctr", "0"]).await;
    for i in 1..=100 {
        let reply = c
            .cmd(&["EVAL", "local v=redis.call('INCR', KEYS[1]); return v", "1", "ctr"])
            .await;
        assert_eq!(reply, Value::Integer(i));
    }
    assert_eq!(c.get_bulk(&["GET", "ctr"]).await, Some("100".into()));
}

#[tokio::test]
async fn call_propagates_errors_pcall_catches() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.cmd(&["RPUSH", "l", "x"]).await;
    let msg = c.err(&["EVAL", "return redis.call('GET', KEYS[1])", "1", "l"]).await;
    assert!(msg.starts_with("WRONGTYPE"));

    let reply = c
        .cmd(&[
            "EVAL",
            "local e = redis.pcall('GET', KEYS[1]); if e.err then return 'caught' end",
            "1",
            "l",
        ])
        .await;
    assert_eq!(reply, Value::Bulk("caught".into()));
}

#[tokio::test]
async fn evalsha_cache_flow() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let sha = c.get_bulk(&["SCRIPT", "LOAD", "return 42"]).await.unwrap();
    assert_eq!(sha.len(), 40);
    assert_eq!(
        c.cmd(&["SCRIPT", "EXISTS", &sha, &"0".repeat(40)]).await,
        Value::Array(vec![Value::Integer(1), Value::Integer(0)])
    );
    assert_eq!(c.cmd(&["EVALSHA", &sha, "0"]).await, Value::Integer(42));

    // EVAL populates the cache too
    c.cmd(&["EVAL", "return 7", "0"]).await;

    c.ok(&["SCRIPT", "FLUSH"]).await;
    let msg = c.err(&["EVALSHA", &sha, "0"]).await;
    assert!(msg.starts_with("NOSCRIPT"));
}

#[tokio::test]
async fn compile_error_reported() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let msg = c.err(&["EVAL", "this is not lua", "0"]).await;
    assert!(msg.contains("Error compiling script"));
}

#[tokio::test]
async fn global_writes_rejected() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let msg = c.err(&["EVAL", "leaked = 1; return 0", "0"]).await;
    assert!(msg.contains("global"));
}

#[tokio::test]
async fn no_writes_shebang_blocks_writes() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let msg = c
        .err(&[
            "EVAL",
            "#!lua flags=no-writes\nreturn redis.call('SET', KEYS[1], 'v')",
            "1",
            "k",
        ])
        .await;
    assert!(msg.contains("not allowed from read-only scripts"));
    // eval_ro enforces the same without a shebang
    let msg = c
        .err(&["EVAL_RO", "return redis.call('SET', KEYS[1], 'v')", "1", "k"])
        .await;
    assert!(msg.contains("not allowed from read-only scripts"));
}

#[tokio::test]
async fn bad_shebang_flag_is_error() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let msg = c.err(&["EVAL", "#!lua flags=warp-speed\nreturn 1", "0"]).await;
    assert!(msg.contains("shebang"));
}

#[tokio::test]
async fn script_time_is_frozen() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    // two TIME calls inside one script observe the same millisecond
    let reply = c
        .cmd(&[
            "EVAL",
            "local a = redis.call('TIME'); local b = redis.call('TIME'); \
             if a[1] == b[1] and a[2] == b[2] then return 1 else return 0 end",
            "0",
        ])
        .await;
    assert_eq!(reply, Value::Integer(1));
}

#[tokio::test]
async fn cjson_and_sha1hex_available() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(
        c.cmd(&["EVAL", "return cjson.encode({1, 2})", "0"]).await,
        Value::Bulk("[1,2]".into())
    );
    assert_eq!(
        c.cmd(&["EVAL", "return cjson.decode('[4,5]')[2]", "0"]).await,
        Value::Integer(5)
    );
    assert_eq!(
        c.cmd(&["EVAL", "return redis.sha1hex('')", "0"]).await,
        Value::Bulk("da39a3ee5e6b4b0d3255bfef95601890afd80709".into())
    );
    assert_eq!(
        c.cmd(&["EVAL", "return bit.band(12, 10)", "0"]).await,
        Value::Integer(8)
    );
}

#[tokio::test]
async fn script_kill_without_running_script() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let msg = c.err(&["SCRIPT", "KILL"]).await;
    assert!(msg.starts_with("NOTBUSY"));
}

#[tokio::test]
async fn script_writes_reach_other_clients() {
    let server = TestServer::start();
    let mut a = server.connect().await;
    let mut b = server.connect().await;

    a.cmd(&["EVAL", "redis.call('SET', KEYS[1], ARGV[1])", "1", "shared", "fromscript"])
        .await;
    assert_eq!(b.get_bulk(&["GET", "shared"]).await, Some("fromscript".into()));
}
