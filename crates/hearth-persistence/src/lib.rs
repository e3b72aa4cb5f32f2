//! hearth-persistence: the on-disk and on-wire byte formats.
//!
//! Three codecs share the value encoding in [`rdb`]:
//!
//! - full-keyspace snapshots (`REDIS0010` files with AUX/SELECTDB/
//!   RESIZEDB sections and a CRC-64 trailer),
//! - per-key DUMP payloads (`<value><version:u16><crc64:u64>`), and
//! - the append-only file, a plain concatenation of RESP-encoded write
//!   commands replayed through the dispatcher at startup.

pub mod aof;
pub mod dump;
pub mod format;
pub mod rdb;

pub use aof::AofLog;
pub use dump::{dump_entry, restore_entry, RestoreError};
pub use format::FormatError;
pub use rdb::{decode_snapshot, encode_snapshot, load_rdb_file, save_rdb_file};
