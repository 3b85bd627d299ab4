pub mod content;
pub mod content_type;
pub mod error;

pub use content::{ContentService, ServiceOptions};
pub use content_type::ContentTypePolicy;
pub use error::{ContentError, ContentResult, ErrorKind};
