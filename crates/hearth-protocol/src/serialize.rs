//! Direct-to-buffer reply serialization.
//!
//! Writes replies into a `BytesMut` with no intermediate allocations;
//! integer-to-string conversion goes through `itoa`. The protocol
//! version decides the wire form of nulls and of the RESP3-only types.

use bytes::{BufMut, Bytes, BytesMut};

use crate::reply::{Reply, RespVersion};

impl Reply {
    /// Serializes this reply into `dst` using the wire forms of `ver`.
    pub fn serialize(&self, dst: &mut BytesMut, ver: RespVersion) {
        match self {
            Reply::Simple(s) => {
                dst.put_u8(b'+');
                dst.put_slice(s.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Reply::Error(msg) => {
                dst.put_u8(b'-');
                dst.put_slice(msg.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Reply::Integer(n) => {
                dst.put_u8(b':');
                put_i64(dst, *n);
                dst.put_slice(b"\r\n");
            }
            Reply::Bulk(data) => put_bulk(dst, data),
            Reply::Null => match ver {
                RespVersion::Resp2 => dst.put_slice(b"$-1\r\n"),
                RespVersion::Resp3 => dst.put_slice(b"_\r\n"),
            },
            Reply::NullArray => match ver {
                RespVersion::Resp2 => dst.put_slice(b"*-1\r\n"),
                RespVersion::Resp3 => dst.put_slice(b"_\r\n"),
            },
            Reply::Array(items) => {
                dst.put_u8(b'*');
                put_i64(dst, items.len() as i64);
                dst.put_slice(b"\r\n");
                for item in items {
                    item.serialize(dst, ver);
                }
            }
            Reply::Map(pairs) => {
                match ver {
                    RespVersion::Resp3 => {
                        dst.put_u8(b'%');
                        put_i64(dst, pairs.len() as i64);
                    }
                    RespVersion::Resp2 => {
                        // RESP2 has no map type: flatten to k,v,k,v
                        dst.put_u8(b'*');
                        put_i64(dst, (pairs.len() * 2) as i64);
                    }
                }
                dst.put_slice(b"\r\n");
                for (k, v) in pairs {
                    k.serialize(dst, ver);
                    v.serialize(dst, ver);
                }
            }
            Reply::Set(items) => {
                dst.put_u8(match ver {
                    RespVersion::Resp3 => b'~',
                    RespVersion::Resp2 => b'*',
                });
                put_i64(dst, items.len() as i64);
                dst.put_slice(b"\r\n");
                for item in items {
                    item.serialize(dst, ver);
                }
            }
            Reply::Double(d) => match ver {
                RespVersion::Resp3 => {
                    dst.put_u8(b',');
                    dst.put_slice(Reply::format_double(*d).as_bytes());
                    dst.put_slice(b"\r\n");
                }
                RespVersion::Resp2 => {
                    put_bulk(dst, Reply::format_double(*d).as_bytes());
                }
            },
            Reply::Boolean(b) => match ver {
                RespVersion::Resp3 => {
                    dst.put_slice(if *b { b"#t\r\n" } else { b"#f\r\n" });
                }
                RespVersion::Resp2 => {
                    dst.put_slice(if *b { b":1\r\n" } else { b":0\r\n" });
                }
            },
            Reply::BigNumber(n) => match ver {
                RespVersion::Resp3 => {
                    dst.put_u8(b'(');
                    dst.put_slice(n.as_bytes());
                    dst.put_slice(b"\r\n");
                }
                RespVersion::Resp2 => put_bulk(dst, n.as_bytes()),
            },
            Reply::Verbatim { format, text } => match ver {
                RespVersion::Resp3 => {
                    dst.put_u8(b'=');
                    put_i64(dst, (text.len() + 4) as i64);
                    dst.put_slice(b"\r\n");
                    dst.put_slice(format);
                    dst.put_u8(b':');
                    dst.put_slice(text);
                    dst.put_slice(b"\r\n");
                }
                RespVersion::Resp2 => put_bulk(dst, text),
            },
            Reply::Attribute { attrs, value } => {
                if ver == RespVersion::Resp3 {
                    dst.put_u8(b'|');
                    put_i64(dst, attrs.len() as i64);
                    dst.put_slice(b"\r\n");
                    for (k, v) in attrs {
                        k.serialize(dst, ver);
                        v.serialize(dst, ver);
                    }
                }
                value.serialize(dst, ver);
            }
            Reply::Raw(bytes) => dst.put_slice(bytes),
            Reply::None => {}
        }
    }

    /// Convenience: serialize into a fresh `Bytes`.
    pub fn to_bytes(&self, ver: RespVersion) -> Bytes {
        let mut buf = BytesMut::new();
        self.serialize(&mut buf, ver);
        buf.freeze()
    }
}

fn put_bulk(dst: &mut BytesMut, data: &[u8]) {
    dst.put_u8(b'$');
    put_i64(dst, data.len() as i64);
    dst.put_slice(b"\r\n");
    dst.put_slice(data);
    dst.put_slice(b"\r\n");
}

fn put_i64(dst: &mut BytesMut, val: i64) {
    let mut buf = itoa::Buffer::new();
    dst.put_slice(buf.format(val).as_bytes());
}

/// Encodes an argument vector as a RESP array of bulk strings. This is
/// the canonical request form used by the replication journal and AOF.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A]) -> Bytes {
    let mut dst = BytesMut::with_capacity(16 + args.iter().map(|a| a.as_ref().len() + 16).sum::<usize>());
    dst.put_u8(b'*');
    put_i64(&mut dst, args.len() as i64);
    dst.put_slice(b"\r\n");
    for a in args {
        put_bulk(&mut dst, a.as_ref());
    }
    dst.freeze()
}

/// Length of [`encode_command`]'s output without building it; feeds the
/// replication offset accounting.
pub fn encoded_command_len<A: AsRef<[u8]>>(args: &[A]) -> usize {
    fn digits(mut n: usize) -> usize {
        if n == 0 {
            return 1;
        }
        let mut d = 0;
        while n > 0 {
            d += 1;
            n /= 10;
        }
        d
    }
    let mut total = 1 + digits(args.len()) + 2;
    for a in args {
        let len = a.as_ref().len();
        total += 1 + digits(len) + 2 + len + 2;
    }
    total
}
