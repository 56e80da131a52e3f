#[macro_use]
extern crate tracing;

pub mod heartbeat;
pub mod manager;
pub mod protocol;
pub mod replication;
pub mod server;

pub use manager::BlockManager;
