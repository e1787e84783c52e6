//! The plan/act orchestration loop.
//!
//! One query's run: seed a fresh conversation with the system prompt and the
//! user's question, ask the planner what to do, execute any requested tool
//! calls, feed results (or tool errors) back, and repeat until the planner
//! answers without tool calls or a limit is hit. Tool errors never abort the
//! run; planner transport errors and the wall-clock timeout do.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use csvq_common::errors::OrchestrationError;
use csvq_common::types::{Message, Role};
use csvq_data::tools::{catalog, execute_tool, ChartSpec, ToolContext};
use csvq_data::Dataset;

use crate::Planner;

pub struct Orchestrator {
    planner: Arc<dyn Planner>,
    turn_limit: u32,
    run_timeout: Duration,
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The planner's final answer, verbatim.
    pub answer: String,
    /// The last successful visualization of the run, if any.
    pub chart: Option<ChartSpec>,
    /// The last tabular tool result of the run, if any.
    pub table: Option<Vec<serde_json::Value>>,
}

impl Orchestrator {
    pub fn new(planner: Arc<dyn Planner>, turn_limit: u32, run_timeout: Duration) -> Self {
        Self {
            planner,
            turn_limit,
            run_timeout,
        }
    }

    /// Run one query against a dataset, bounded by the wall-clock timeout.
    pub async fn run(
        &self,
        dataset: &Dataset,
        filename: &str,
        query: &str,
    ) -> Result<RunOutcome, OrchestrationError> {
        match tokio::time::timeout(self.run_timeout, self.drive(dataset, filename, query)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_secs = self.run_timeout.as_secs(), "query run timed out");
                Err(OrchestrationError::Timeout)
            }
        }
    }

    async fn drive(
        &self,
        dataset: &Dataset,
        filename: &str,
        query: &str,
    ) -> Result<RunOutcome, OrchestrationError> {
        let tools = catalog();
        let ctx = ToolContext { dataset, filename };

        let mut messages = vec![
            Message::new(Role::System, system_prompt(filename, dataset)),
            Message::new(Role::User, query),
        ];
        let mut chart: Option<ChartSpec> = None;
        let mut table: Option<Vec<serde_json::Value>> = None;
        let mut rounds = 0u32;

        loop {
            let response = self.planner.plan(&messages, &tools).await.map_err(|e| {
                warn!(error = %e, "planner call failed");
                OrchestrationError::UpstreamUnavailable(e.to_string())
            })?;
            debug!(
                tool_calls = response.tool_calls.len(),
                tokens = response.usage.total_tokens(),
                "planning step"
            );

            if response.tool_calls.is_empty() {
                // No tool calls — this is the final answer.
                return Ok(RunOutcome {
                    answer: response.content,
                    chart,
                    table,
                });
            }

            rounds += 1;
            if rounds > self.turn_limit {
                warn!(rounds, "tool-call round limit exceeded");
                return Err(OrchestrationError::TurnLimitExceeded);
            }

            messages.push(Message::new(Role::Assistant, response.content.clone()));

            for call in &response.tool_calls {
                let content = match execute_tool(&ctx, &call.name, &call.arguments) {
                    Ok(outcome) => {
                        // Multiple successes in one run: last wins.
                        if outcome.chart.is_some() {
                            chart = outcome.chart;
                        }
                        if outcome.table.is_some() {
                            table = outcome.table;
                        }
                        outcome.content
                    }
                    Err(err) => {
                        // Surfaced to the planner so it can correct itself.
                        warn!(tool = %call.name, error = %err, "tool execution failed");
                        format!("Error: {err}")
                    }
                };
                messages.push(Message::new(
                    Role::Tool,
                    format!("[Tool Result: {}]\n{}", call.name, content),
                ));
            }
        }
    }
}

fn system_prompt(filename: &str, dataset: &Dataset) -> String {
    format!(
        "You are a helpful data analyst working with an uploaded CSV file.\n\
         The file '{}' has {} rows with the following columns: {}.\n\n\
         When answering questions:\n\
         1. Always use the provided tools to analyze the data; never guess values.\n\
         2. Column names are case-sensitive; use them exactly as listed.\n\
         3. For complex conditions, use execute_query.\n\
         4. Use create_visualization when the user asks for a chart.\n\
         5. Respond in the same language as the user's question.",
        filename,
        dataset.row_count(),
        dataset.column_names().join(", "),
    )
}
