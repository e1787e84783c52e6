//! Response assembly: one run's outcome normalized into the wire shape.

use serde::Serialize;

use csvq_common::errors::OrchestrationError;

use crate::orchestrator::RunOutcome;

/// The wire result of one query. Immutable once constructed.
///
/// `visualization`, when present, is a JSON-encoded chart description; an
/// embedded image would instead carry a `data:image/` prefix, which is how
/// the client tells the two apart.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub query: String,
}

/// Normalize a loop outcome. Orchestration failures become `success=false`
/// with a short user-safe message; internal detail stays in the logs.
pub fn assemble(outcome: Result<RunOutcome, OrchestrationError>, query: &str) -> QueryResult {
    match outcome {
        Ok(run) => {
            let answer = if run.answer.trim().is_empty() && run.chart.is_some() {
                "Created a visualization.".to_string()
            } else {
                run.answer
            };
            QueryResult {
                success: true,
                result: Some(answer),
                visualization: run
                    .chart
                    .map(|c| serde_json::to_string(&c).unwrap_or_default()),
                data: run.table,
                error: None,
                query: query.to_string(),
            }
        }
        Err(err) => QueryResult {
            success: false,
            result: None,
            visualization: None,
            data: None,
            error: Some(user_message(&err).to_string()),
            query: query.to_string(),
        },
    }
}

fn user_message(err: &OrchestrationError) -> &'static str {
    match err {
        OrchestrationError::TurnLimitExceeded => {
            "The query needed too many analysis steps. Try a simpler question."
        }
        OrchestrationError::UpstreamUnavailable(_) => {
            "The reasoning service is currently unavailable. Please try again."
        }
        OrchestrationError::Timeout => "The query timed out. Please try again.",
    }
}
