//! Reasoning engine for csvq.
//!
//! Provides the planner abstraction the orchestration loop drives, an
//! OpenAI-compatible chat-completions client implementing it, the
//! plan/act loop itself, and the response assembler that turns a loop
//! outcome into the wire result.

pub mod openai;
pub mod orchestrator;
pub mod response;

use async_trait::async_trait;

use csvq_common::types::{Message, TokenUsage, ToolCall, ToolDefinition};

pub use openai::{OpenAiClient, OpenAiConfig};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use response::{assemble, QueryResult};

/// The external reasoning service, as seen by the orchestration loop: given
/// the conversation so far and the declared tool schemas, it returns either
/// tool calls to execute or a final answer (or both).
///
/// The loop never depends on a concrete provider, so tests substitute a
/// deterministic scripted planner behind this trait.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<PlannerResponse, PlannerError>;
}

/// One planning step's output.
#[derive(Debug, Clone)]
pub struct PlannerResponse {
    /// Assistant text; the final answer when `tool_calls` is empty.
    pub content: String,
    /// Tool invocations requested for this turn, in order.
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

impl PlannerResponse {
    /// A plain final answer with no tool calls.
    pub fn answer(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            usage: TokenUsage::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("api error: {0}")]
    Api(String),

    #[error("rate limited")]
    RateLimited,

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("request timed out")]
    Timeout,
}
