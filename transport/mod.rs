// Transport module: Abstract communication mechanisms
pub mod traits;
pub mod tcp;

pub use traits::*;
pub use tcp::*;
