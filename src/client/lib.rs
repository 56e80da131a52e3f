#[macro_use]
extern crate tracing;

pub mod block_client;
pub mod coordinator_client;
pub mod transfer;

pub use transfer::{download_file, upload_file};
