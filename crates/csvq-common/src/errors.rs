#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("payload of {size} bytes exceeds the {limit} byte upload limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("encoding error: {0}")]
    EncodingError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found or expired")]
    NotFound,
}

/// Errors produced by tool execution. These are recovered locally: the
/// orchestration loop feeds them back to the planner as tool results
/// instead of aborting the run.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("column '{name}' not found; available columns: {}", .available.join(", "))]
    ColumnNotFound { name: String, available: Vec<String> },

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    #[error("invalid tool arguments: {0}")]
    InvalidToolArguments(String),
}

impl ToolError {
    pub fn column_not_found(name: impl Into<String>, available: Vec<String>) -> Self {
        Self::ColumnNotFound {
            name: name.into(),
            available,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("tool-call round limit exceeded")]
    TurnLimitExceeded,

    #[error("reasoning service unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("query timed out")]
    Timeout,
}

#[derive(Debug, thiserror::Error)]
pub enum CsvqError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
