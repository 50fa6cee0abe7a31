#![deny(missing_docs)]
//! A Bitcask-style persistent key-value store: an append-only log file, an
//! in-memory hash index from key to file offset, and a line-oriented TCP
//! protocol for clients. See the module docs of [`engine`] for the core
//! storage algorithm and [`protocol`] for the wire format.

mod client;
mod compaction;
pub mod config;
mod engine;
mod error;
mod index;
mod protocol;
mod record;
mod server;
pub mod thread_pool;

pub use client::KvsClient;
pub use config::Config;
pub use engine::Engine;
pub use error::{KvsError, Result};
pub use server::Server;
