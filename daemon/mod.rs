// Daemon library: server loop, connection workers and timestamp task
pub mod cli;
pub mod config;
pub mod registry;
pub mod server;
pub mod ticker;
pub mod worker;

pub use config::{ServerConfig, StorageMode};
pub use server::{Server, ShutdownSummary};
