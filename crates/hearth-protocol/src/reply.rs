//! Reply value model.
//!
//! A [`Reply`] is the in-memory form of one server reply. Handlers build
//! replies out of these variants and the serializer picks the wire form
//! from the session's protocol version: RESP2 sessions get the legacy
//! null/aggregate encodings, RESP3 sessions get the typed ones.

use bytes::Bytes;

/// Protocol version negotiated per session (HELLO upgrades 2 → 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespVersion {
    Resp2,
    Resp3,
}

impl RespVersion {
    pub fn as_number(self) -> i64 {
        match self {
            RespVersion::Resp2 => 2,
            RespVersion::Resp3 => 3,
        }
    }
}

/// One server reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `+S\r\n`
    Simple(String),
    /// `-E\r\n`; the string carries its prefix code (`ERR ...`).
    Error(String),
    /// `:N\r\n`
    Integer(i64),
    /// `$L\r\n...\r\n`
    Bulk(Bytes),
    /// Null bulk: `$-1\r\n` on RESP2, `_\r\n` on RESP3.
    Null,
    /// Null array: `*-1\r\n` on RESP2, `_\r\n` on RESP3.
    NullArray,
    /// `*N\r\n...`
    Array(Vec<Reply>),
    /// RESP3 `%N`; flattened to an array on RESP2.
    Map(Vec<(Reply, Reply)>),
    /// RESP3 `~N`; downgraded to an array on RESP2.
    Set(Vec<Reply>),
    /// RESP3 `,`; downgraded to a bulk string on RESP2.
    Double(f64),
    /// RESP3 `#t`/`#f`; downgraded to `:1`/`:0` on RESP2.
    Boolean(bool),
    /// RESP3 `(`; downgraded to a bulk string on RESP2.
    BigNumber(String),
    /// RESP3 `=`; downgraded to a bulk string on RESP2. The format tag
    /// is three bytes (`txt`, `mkd`).
    Verbatim { format: [u8; 3], text: Bytes },
    /// RESP3 `|N` attribute map prefixed to a reply; the attributes are
    /// dropped on RESP2.
    Attribute {
        attrs: Vec<(Reply, Reply)>,
        value: Box<Reply>,
    },
    /// Pre-encoded wire bytes, written verbatim on either protocol.
    /// Used for replication payloads (FULLRESYNC + RDB bulk) where the
    /// byte layout is not a regular reply.
    Raw(Bytes),
    /// No bytes at all. Blocking commands return this when they park
    /// the session; the reply comes later from the wake-up path.
    None,
}

impl Reply {
    pub fn ok() -> Reply {
        Reply::Simple("OK".into())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Reply {
        Reply::Bulk(data.into())
    }

    /// Bulk string from a UTF-8 value.
    pub fn bulk_string(s: impl Into<String>) -> Reply {
        Reply::Bulk(Bytes::from(s.into().into_bytes()))
    }

    pub fn error(msg: impl Into<String>) -> Reply {
        Reply::Error(msg.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// The error prefix code (`ERR`, `WRONGTYPE`, ...) of an error
    /// reply, for per-error-code stats.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Reply::Error(msg) => Some(msg.split_whitespace().next().unwrap_or("ERR")),
            _ => None,
        }
    }

    /// Formats a score/float the way Redis prints doubles in bulk
    /// replies: integral values drop the decimal part, others use the
    /// shortest roundtrip form.
    pub fn format_double(value: f64) -> String {
        if value == f64::INFINITY {
            "inf".into()
        } else if value == f64::NEG_INFINITY {
            "-inf".into()
        } else if value == value.trunc() && value.abs() < 1e17 {
            format!("{}", value as i64)
        } else {
            let mut s = format!("{value}");
            if s.contains('.') {
                while s.ends_with('0') {
                    s.pop();
                }
                if s.ends_with('.') {
                    s.pop();
                }
            }
            s
        }
    }
}
