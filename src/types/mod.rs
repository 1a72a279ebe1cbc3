mod api;

pub use api::{ApiMessage, Content, ContentBlock, Role, TokenUsage};
