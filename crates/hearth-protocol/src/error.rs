//! Protocol error types for RESP parsing.

use thiserror::Error;

/// Errors that can occur when parsing the RESP wire format.
///
/// `Incomplete` is not a failure: it tells the caller to read more bytes
/// and retry. Everything else means the client sent a malformed frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The input buffer doesn't contain a complete frame yet.
    #[error("incomplete frame: need more data")]
    Incomplete,

    /// A bulk string or array declared an invalid length.
    #[error("invalid frame length: {0}")]
    InvalidFrameLength(i64),

    /// Failed to parse an integer from a length line.
    #[error("invalid integer encoding")]
    InvalidInteger,

    /// A bulk string was not terminated by `\r\n`.
    #[error("invalid bulk string terminator")]
    InvalidTerminator,

    /// A multibulk element did not start with `$`.
    #[error("expected '$', got {0:#04x}")]
    ExpectedBulk(u8),
}
