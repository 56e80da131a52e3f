#[macro_use]
extern crate tracing;

pub mod cache;
pub mod delete;
pub mod membership;
pub mod namespace;
pub mod placement;
pub mod protocol;
pub mod server;

pub use membership::Membership;
pub use namespace::Namespace;
pub use server::Coordinator;
