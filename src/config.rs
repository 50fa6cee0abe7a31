//! Server-side configuration: listen address, data file path, and the
//! compaction threshold. No environment-variable contract is mandated;
//! these are plumbed in from CLI flags (see `bitkv-server`).

use std::net::SocketAddr;
use std::path::PathBuf;

/// Default listen address if `--addr` is not given.
pub const DEFAULT_ADDR: &str = "127.0.0.1:9999";
/// Default data file path if `--data` is not given.
pub const DEFAULT_DATA_PATH: &str = "store.dat";
/// Default compaction threshold if `--threshold` is not given.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the server listens on.
    pub addr: SocketAddr,
    /// Path of the engine's data file.
    pub data_path: PathBuf,
    /// `deleted_size / data_size` fraction above which compaction runs.
    pub threshold: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            addr: DEFAULT_ADDR.parse().unwrap(),
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            threshold: DEFAULT_THRESHOLD,
        }
    }
}
