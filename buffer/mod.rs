// Buffer module: the guarded command log shared by every connection worker
pub mod backing;
pub mod shared;

pub use backing::*;
pub use shared::*;
