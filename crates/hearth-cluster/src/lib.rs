//! hearth-cluster: slot computation and static routing.
//!
//! Implements the 16384-slot key partitioning (CRC16/XMODEM over the
//! hash tag) and a per-slot route table with the three states the
//! dispatcher needs: serve locally, redirect MOVED, redirect ASK.
//! There is no gossip or data migration here; routes change only
//! through CLUSTER SETSLOT.

pub mod routing;
pub mod slots;

pub use routing::{RouteTable, SlotRoute};
pub use slots::{key_slot, SLOT_COUNT};
