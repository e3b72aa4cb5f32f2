//! End-to-end tests: each module spawns a real hearth-server process
//! and talks RESP to it over TCP.

mod helpers;

mod basic_operations;
mod blocking;
mod cluster;
mod data_types;
mod persistence;
mod protocol;
mod scripting;
mod streams;
mod transactions;

fn main() {
    // the test harness is the entry point; nothing runs here
}
