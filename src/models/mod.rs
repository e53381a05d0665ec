pub mod enums;
mod document;

pub use document::*;
pub use enums::MessageRole;
