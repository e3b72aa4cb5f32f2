//! hearth-protocol: the RESP wire codec.
//!
//! Request side: [`parse_command`] extracts at most one complete command
//! (array or inline form) from the head of a byte buffer. Reply side:
//! [`Reply`] models every RESP2/RESP3 reply shape and serializes itself
//! into a `BytesMut` according to the session's protocol version.

pub mod error;
pub mod parse;
pub mod reply;
pub mod serialize;

pub use error::ProtocolError;
pub use parse::{parse_command, Input};
pub use reply::{Reply, RespVersion};
pub use serialize::{encode_command, encoded_command_len};
