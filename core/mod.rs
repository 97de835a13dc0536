// Core module: log engine, wire parsing and error model (NO I/O dependencies)
pub mod error;
pub mod log;
pub mod protocol;
pub mod types;

pub use error::*;
pub use log::*;
pub use protocol::*;
pub use types::*;
