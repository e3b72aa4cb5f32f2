//! Snapshot and append-only-file recovery across restarts.

use crate::helpers::{ServerOptions, TestServer, Value};

#[tokio::test]
async fn save_and_reload_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let digests;
    {
        let server = TestServer::start_with(ServerOptions {
            data_dir_path: Some(dir.path().to_path_buf()),
            ..Default::default()
        });
        let mut c = server.connect().await;
        c.ok(&["SET", "plain", "value"]).await;
        c.cmd(&["RPUSH", "list", "a", "b"]).await;
        c.cmd(&["HSET", "hash", "f", "v"]).await;
        c.cmd(&["ZADD", "zset", "1.5", "m"]).await;
        c.cmd(&["SADD", "set", "x", "y"]).await;
        c.ok(&["SET", "with-ttl", "v", "EX", "10000"]).await;

        digests = digest_values(&mut c).await;
        c.ok(&["SAVE"]).await;
        // server dropped here: process killed
    }

    let server = TestServer::start_with(ServerOptions {
        data_dir_path: Some(dir.path().to_path_buf()),
        ..Default::default()
    });
    let mut c = server.connect().await;
    assert_eq!(digest_values(&mut c).await, digests);
    let ttl = c.get_int(&["TTL", "with-ttl"]).await;
    assert!(ttl > 0, "ttl survived the reload");
}

#[tokio::test]
async fn aof_replay_rebuilds_state() {
    let dir = tempfile::tempdir().unwrap();
    let digests;
    {
        let server = TestServer::start_with(ServerOptions {
            appendonly: true,
            data_dir_path: Some(dir.path().to_path_buf()),
        });
        let mut c = server.connect().await;
        c.ok(&["SET", "counter", "0"]).await;
        for _ in 0..10 {
            c.cmd(&["INCR", "counter"]).await;
        }
        c.cmd(&["RPUSH", "log", "one", "two"]).await;
        c.cmd(&["LPOP", "log"]).await;
        digests = digest_values(&mut c).await;
    }

    let server = TestServer::start_with(ServerOptions {
        appendonly: true,
        data_dir_path: Some(dir.path().to_path_buf()),
    });
    let mut c = server.connect().await;
    assert_eq!(c.get_bulk(&["GET", "counter"]).await, Some("10".into()));
    assert_eq!(
        c.cmd(&["LRANGE", "log", "0", "-1"]).await,
        Value::Array(vec![Value::Bulk("two".into())])
    );
    assert_eq!(digest_values(&mut c).await, digests);
}

#[tokio::test]
async fn bgrewriteaof_compacts_log() {
    let dir = tempfile::tempdir().unwrap();
    {
        let server = TestServer::start_with(ServerOptions {
            appendonly: true,
            data_dir_path: Some(dir.path().to_path_buf()),
        });
        let mut c = server.connect().await;
        // churn that the rewrite should collapse
        for i in 0..50 {
            c.ok(&["SET", "churn", &i.to_string()]).await;
        }
        let before = std::fs::metadata(dir.path().join("appendonly.aof"))
            .unwrap()
            .len();
        let reply = c.cmd(&["BGREWRITEAOF"]).await;
        assert!(matches!(reply, Value::Simple(_)));
        let after = std::fs::metadata(dir.path().join("appendonly.aof"))
            .unwrap()
            .len();
        assert!(after < before, "rewrite shrank {before} -> {after}");
    }

    let server = TestServer::start_with(ServerOptions {
        appendonly: true,
        data_dir_path: Some(dir.path().to_path_buf()),
    });
    let mut c = server.connect().await;
    assert_eq!(c.get_bulk(&["GET", "churn"]).await, Some("49".into()));
}

#[tokio::test]
async fn bgsave_writes_snapshot_file() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start_with(ServerOptions {
        data_dir_path: Some(dir.path().to_path_buf()),
        ..Default::default()
    });
    let mut c = server.connect().await;
    c.ok(&["SET", "k", "v"]).await;
    let reply = c.cmd(&["BGSAVE"]).await;
    assert!(matches!(reply, Value::Simple(_)));
    // the write happens on a background task
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert!(dir.path().join("dump.rdb").exists());
}

/// DEBUG DIGEST-VALUE over a fixed key list; order-stable for
/// comparisons across restarts.
async fn digest_values(c: &mut crate::helpers::TestClient) -> Vec<Value> {
    let Value::Array(digests) = c
        .cmd(&[
            "DEBUG",
            "DIGEST-VALUE",
            "plain",
            "list",
            "hash",
            "zset",
            "set",
            "counter",
            "log",
        ])
        .await
    else {
        panic!("expected digest array");
    };
    digests
}
