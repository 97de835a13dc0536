// Server configuration, built from the command line or directly by tests
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use ringlog_buffer::{Backing, FileBacking, MemoryBacking};
use ringlog_core::Error;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:9000";
pub const DEFAULT_BACKLOG: i32 = 5;
pub const DEFAULT_CAPACITY: usize = 10;
pub const DEFAULT_DATA_FILE: &str = "/var/tmp/aesdsocketdata";
pub const DEFAULT_TIMESTAMP_SECS: u64 = 10;
pub const DEFAULT_MAX_COMMAND_BYTES: usize = 1024 * 1024;

/// Where appended entries live besides the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageMode {
    /// In-process ring only; control-capable, no timestamp entries.
    Memory,
    /// Ring mirrored into a flat file; timestamp entries enabled.
    File,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub backlog: i32,
    pub capacity: NonZeroUsize,
    pub storage: StorageMode,
    pub data_file: PathBuf,
    pub timestamp_interval: Duration,
    pub max_command_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: SocketAddr::from(([0, 0, 0, 0], 9000)),
            backlog: DEFAULT_BACKLOG,
            capacity: NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            storage: StorageMode::Memory,
            data_file: PathBuf::from(DEFAULT_DATA_FILE),
            timestamp_interval: Duration::from_secs(DEFAULT_TIMESTAMP_SECS),
            max_command_bytes: DEFAULT_MAX_COMMAND_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn open_backing(&self) -> Result<Box<dyn Backing>, Error> {
        Ok(match self.storage {
            StorageMode::Memory => Box::new(MemoryBacking),
            StorageMode::File => Box::new(FileBacking::open(&self.data_file)?),
        })
    }
}
