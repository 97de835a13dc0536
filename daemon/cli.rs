// Command line for ringlogd
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use ringlog_core::{Error, ErrorKind};

use crate::config::{
    ServerConfig, StorageMode, DEFAULT_BACKLOG, DEFAULT_CAPACITY, DEFAULT_DATA_FILE,
    DEFAULT_LISTEN, DEFAULT_MAX_COMMAND_BYTES, DEFAULT_TIMESTAMP_SECS,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Line-oriented TCP command log server", long_about = None)]
pub struct Cli {
    /// Detach into the background once the port is bound.
    #[arg(short = 'd', long)]
    pub daemon: bool,

    /// Socket address to listen on. Use port 0 for an ephemeral port.
    #[arg(long, default_value = DEFAULT_LISTEN)]
    pub listen: SocketAddr,

    /// Pending-connection queue length passed to listen(2).
    #[arg(long, default_value_t = DEFAULT_BACKLOG)]
    pub backlog: i32,

    /// Number of commands kept before the oldest is evicted.
    #[arg(long, default_value_t = NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN))]
    pub capacity: NonZeroUsize,

    #[arg(long, value_enum, default_value_t = StorageMode::Memory)]
    pub storage: StorageMode,

    /// Mirror file used by `--storage file`; removed on shutdown.
    #[arg(long, default_value = DEFAULT_DATA_FILE)]
    pub data_file: PathBuf,

    /// Seconds between timestamp entries in file mode.
    #[arg(long, default_value_t = DEFAULT_TIMESTAMP_SECS)]
    pub timestamp_interval: u64,

    /// Longest command accepted without a newline.
    #[arg(long, default_value_t = DEFAULT_MAX_COMMAND_BYTES)]
    pub max_command_bytes: usize,

    /// Write logs here instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn server_config(&self) -> Result<ServerConfig, Error> {
        if self.backlog <= 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("--backlog must be positive"));
        }
        if self.timestamp_interval == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("--timestamp-interval must be at least one second"));
        }
        if self.max_command_bytes == 0 {
            return Err(
                Error::new(ErrorKind::Usage).with_message("--max-command-bytes must be positive")
            );
        }
        Ok(ServerConfig {
            listen: self.listen,
            backlog: self.backlog,
            capacity: self.capacity,
            storage: self.storage,
            data_file: self.data_file.clone(),
            timestamp_interval: Duration::from_secs(self.timestamp_interval),
            max_command_bytes: self.max_command_bytes,
        })
    }
}
