//! Entry point for the `integration` test binary (see `[[test]]` in
//! Cargo.toml), mirroring the teacher's `tests/lib.rs` +
//! `tests/<area>/*.rs` layout.
mod common;
mod end_to_end;
