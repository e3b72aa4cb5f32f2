//! hearth-core: the storage engine.
//!
//! Owns the 16-database keyspace, the typed value representations,
//! expiration (lazy and active), content digests, and the frozen-clock
//! time source scripts rely on.

pub mod glob;
pub mod keyspace;
pub mod store;
pub mod time;
pub mod types;

pub use keyspace::{
    Db, Entry, ExpireFlags, GetExAction, IncrError, IncrFloatError, SetOptions, SetOutcome,
    StreamAddError, TtlState, WrongType, ZAddResult,
};
pub use store::{Store, DB_COUNT};
pub use time::Clock;
pub use types::stream::{PendingSummary, Stream, StreamId, XAddError, XGroupError, XReadGroupError};
pub use types::{sorted_set::SortedSet, sorted_set::ZAddFlags, Value};
