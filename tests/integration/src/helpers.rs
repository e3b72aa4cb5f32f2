//! Test helpers: spawn a hearth-server binary and speak RESP to it.

#![allow(dead_code)]

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// A parsed RESP reply (both protocol versions).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Double(f64),
    Boolean(bool),
    BigNumber(String),
    Verbatim(String),
}

/// A hearth-server subprocess owned by the test.
pub struct TestServer {
    child: Child,
    pub port: u16,
    _data_dir: Option<tempfile::TempDir>,
}

#[derive(Default)]
pub struct ServerOptions {
    pub appendonly: bool,
    /// Reuse an existing data dir across restarts.
    pub data_dir_path: Option<PathBuf>,
}

impl TestServer {
    pub fn start() -> Self {
        Self::start_with(ServerOptions::default())
    }

    pub fn start_with(opts: ServerOptions) -> Self {
        let binary = server_binary();
        let port = find_free_port();

        let mut cmd = Command::new(&binary);
        cmd.arg("--port").arg(port.to_string());
        cmd.arg("--bind").arg("127.0.0.1");
        cmd.env("RUST_LOG", "error");

        let data_dir = if opts.appendonly || opts.data_dir_path.is_some() {
            let (path, owned) = match opts.data_dir_path {
                Some(path) => (path, None),
                None => {
                    let dir = tempfile::tempdir().unwrap();
                    (dir.path().to_path_buf(), Some(dir))
                }
            };
            cmd.arg("--dir").arg(&path);
            if opts.appendonly {
                let conf = path.join("hearth.conf");
                std::fs::write(&conf, format!("appendonly yes\ndir {}\n", path.display()))
                    .unwrap();
                cmd.arg("--config").arg(&conf);
            }
            owned
        } else {
            let dir = tempfile::tempdir().unwrap();
            cmd.arg("--dir").arg(dir.path());
            Some(dir)
        };

        let child = cmd
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap_or_else(|e| panic!("failed to spawn {}: {e}", binary.display()));

        // wait for the listener
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            if std::time::Instant::now() > deadline {
                panic!("hearth-server did not start on port {port}");
            }
            if std::net::TcpStream::connect(("127.0.0.1", port)).is_ok() {
                break;
            }
            std::thread::sleep(Duration::from_millis(25));
        }

        Self {
            child,
            port,
            _data_dir: data_dir,
        }
    }

    pub async fn connect(&self) -> TestClient {
        TestClient::connect(self.port).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A minimal RESP client.
pub struct TestClient {
    stream: TcpStream,
    buf: BytesMut,
}

impl TestClient {
    pub async fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap_or_else(|e| panic!("connect to 127.0.0.1:{port}: {e}"));
        Self {
            stream,
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Sends a command and returns the parsed reply.
    pub async fn cmd(&mut self, args: &[&str]) -> Value {
        self.send(args).await;
        self.read_value().await
    }

    /// Sends without waiting (pipelining).
    pub async fn send(&mut self, args: &[&str]) {
        let mut out = Vec::new();
        out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
        for a in args {
            out.extend_from_slice(format!("${}\r\n", a.len()).as_bytes());
            out.extend_from_slice(a.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        self.stream.write_all(&out).await.unwrap();
    }

    /// Sends raw bytes (inline commands, malformed frames).
    pub async fn send_raw(&mut self, payload: &[u8]) {
        self.stream.write_all(payload).await.unwrap();
    }

    /// Reads the next reply.
    pub async fn read_value(&mut self) -> Value {
        loop {
            if let Some((value, consumed)) = parse_value(&self.buf) {
                let _ = self.buf.split_to(consumed);
                return value;
            }
            let n = self.stream.read_buf(&mut self.buf).await.unwrap();
            if n == 0 {
                panic!("server closed connection mid-reply");
            }
        }
    }

    pub async fn get_bulk(&mut self, args: &[&str]) -> Option<String> {
        match self.cmd(args).await {
            Value::Bulk(data) => Some(String::from_utf8_lossy(&data).into_owned()),
            Value::Null => None,
            other => panic!("expected bulk or null, got {other:?}"),
        }
    }

    pub async fn get_int(&mut self, args: &[&str]) -> i64 {
        match self.cmd(args).await {
            Value::Integer(n) => n,
            other => panic!("expected integer, got {other:?}"),
        }
    }

    pub async fn ok(&mut self, args: &[&str]) {
        match self.cmd(args).await {
            Value::Simple(s) if s == "OK" => {}
            other => panic!("expected +OK, got {other:?}"),
        }
    }

    pub async fn err(&mut self, args: &[&str]) -> String {
        match self.cmd(args).await {
            Value::Error(msg) => msg,
            other => panic!("expected error, got {other:?}"),
        }
    }
}

// ── RESP reply parser ───────────────────────────────────────────────────

fn parse_value(buf: &[u8]) -> Option<(Value, usize)> {
    if buf.is_empty() {
        return None;
    }
    let line_end = find_crlf(buf)?;
    let line = std::str::from_utf8(&buf[1..line_end]).ok()?;
    let after = line_end + 2;

    match buf[0] {
        b'+' => Some((Value::Simple(line.into()), after)),
        b'-' => Some((Value::Error(line.into()), after)),
        b':' => Some((Value::Integer(line.parse().ok()?), after)),
        b'_' => Some((Value::Null, after)),
        b'#' => Some((Value::Boolean(line == "t"), after)),
        b',' => Some((Value::Double(line.parse().ok()?), after)),
        b'(' => Some((Value::BigNumber(line.into()), after)),
        b'$' | b'=' => {
            let len: i64 = line.parse().ok()?;
            if len < 0 {
                return Some((Value::Null, after));
            }
            let end = after + len as usize + 2;
            if buf.len() < end {
                return None;
            }
            let data = &buf[after..after + len as usize];
            if buf[0] == b'=' {
                Some((
                    Value::Verbatim(String::from_utf8_lossy(data).into_owned()),
                    end,
                ))
            } else {
                Some((Value::Bulk(Bytes::copy_from_slice(data)), end))
            }
        }
        b'*' | b'~' => {
            let count: i64 = line.parse().ok()?;
            if count < 0 {
                return Some((Value::Null, after));
            }
            let mut items = Vec::with_capacity(count as usize);
            let mut pos = after;
            for _ in 0..count {
                let (item, used) = parse_value(&buf[pos..])?;
                items.push(item);
                pos += used;
            }
            Some((Value::Array(items), pos))
        }
        b'%' => {
            let count: i64 = line.parse().ok()?;
            let mut pairs = Vec::with_capacity(count.max(0) as usize);
            let mut pos = after;
            for _ in 0..count {
                let (k, used) = parse_value(&buf[pos..])?;
                pos += used;
                let (v, used) = parse_value(&buf[pos..])?;
                pos += used;
                pairs.push((k, v));
            }
            Some((Value::Map(pairs), pos))
        }
        _ => panic!("unexpected reply prefix {:?}", buf[0] as char),
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn find_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Locates the hearth-server binary next to the test executable.
fn server_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // test binary name
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("hearth-server");
    if !path.exists() {
        panic!(
            "hearth-server binary not found at {}; build the workspace first",
            path.display()
        );
    }
    path
}
