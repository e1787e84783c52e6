//! Shared types for csvq: session identifiers, conversation/tool types,
//! and the error taxonomy used across the workspace.

pub mod errors;
pub mod id;
pub mod types;

pub use errors::{CsvqError, OrchestrationError, ParseError, SessionError, ToolError};
pub use id::{new_id, SessionId};
pub use types::{Message, Role, TokenUsage, ToolCall, ToolDefinition};

pub type Result<T> = std::result::Result<T, CsvqError>;
