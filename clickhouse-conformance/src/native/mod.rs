//! Reference client speaking the ClickHouse native TCP protocol (revision 54429).
//!
//! Covers what the conformance scenarios need: handshake, ping, queries with settings and
//! external tables, streamed result blocks, progress, exceptions, cancellation and LZ4/ZSTD
//! compression, over a `bb8` pool that fails over across the configured addresses.
mod block;
mod client;
mod compression;
mod connection;
mod io;
mod pool;
mod protocol;
mod rows;

pub use client::NativeClient;
pub use protocol::ServerError;
pub use rows::NativeRows;
