pub mod association;
pub mod content;

pub use association::*;
pub use content::*;
