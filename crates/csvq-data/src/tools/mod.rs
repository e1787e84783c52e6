//! The tool catalog: named, schema-validated data operations the reasoning
//! loop may invoke against a dataset.
//!
//! Dispatch is a single match on the tool name; argument shape is checked
//! against the declared schema before any dataset access, so unknown tools
//! and malformed arguments fail one centralized validation step.

mod analyze;
mod info;
mod ops;
mod query;
mod schemas;
mod visualize;

use tracing::debug;

use csvq_common::errors::ToolError;

use crate::dataset::Dataset;

pub use schemas::catalog;
pub use visualize::{ChartSpec, ChartType};

/// Rows included in tabular tool results fed back to the planner or the
/// caller.
pub(crate) const MAX_RESULT_ROWS: usize = 50;

/// Everything a tool may see: the session's dataset and its original
/// filename. Tools never mutate the dataset.
pub struct ToolContext<'a> {
    pub dataset: &'a Dataset,
    pub filename: &'a str,
}

/// Result of one successful tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// Human-readable result text appended to the conversation.
    pub content: String,
    /// Structured chart description, for `create_visualization`.
    pub chart: Option<ChartSpec>,
    /// Raw tabular result rows, when the operation produced a table.
    pub table: Option<Vec<serde_json::Value>>,
}

impl ToolOutcome {
    pub(crate) fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            chart: None,
            table: None,
        }
    }

    pub(crate) fn with_table(content: impl Into<String>, table: Vec<serde_json::Value>) -> Self {
        Self {
            content: content.into(),
            chart: None,
            table: Some(table),
        }
    }
}

/// Validate and execute one tool call. Validation precedes all dataset
/// access; errors are returned to the orchestration loop, which feeds them
/// back to the planner as the tool's result.
pub fn execute_tool(
    ctx: &ToolContext<'_>,
    name: &str,
    arguments: &serde_json::Value,
) -> Result<ToolOutcome, ToolError> {
    let definition = schemas::find(name)
        .ok_or_else(|| ToolError::InvalidToolArguments(format!("unknown tool '{name}'")))?;
    schemas::validate_arguments(&definition, arguments)?;

    debug!(tool = %name, "executing tool");
    match name {
        schemas::DATA_INFO => info::data_info(ctx),
        schemas::ANALYZE => analyze::analyze(ctx.dataset, arguments),
        schemas::VISUALIZE => visualize::create(ctx.dataset, arguments),
        schemas::QUERY => query::execute(ctx.dataset, arguments),
        _ => Err(ToolError::InvalidToolArguments(format!(
            "unknown tool '{name}'"
        ))),
    }
}

/// Required string argument; validation guarantees presence for schema-required
/// fields, but tools read through this so a missing field is still a tool
/// error rather than a panic.
pub(crate) fn str_arg<'a>(args: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidToolArguments(format!("missing field '{key}'")))
}

pub(crate) fn opt_str_arg<'a>(args: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

/// Render a number the way a person would write it: integers without a
/// decimal point, everything else with two decimals.
pub(crate) fn fmt_number(v: f64) -> String {
    if v.is_finite() && (v - v.round()).abs() < 1e-9 && v.abs() < 1e15 {
        format!("{}", v.round() as i64)
    } else {
        format!("{v:.2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;

    pub(crate) fn sales_dataset() -> Dataset {
        Dataset::parse(
            b"month,sales\nJan,100\nFeb,300\nMar,200\n",
            None,
            usize::MAX,
        )
        .unwrap()
    }

    #[test]
    fn unknown_tool_fails_validation() {
        let ds = sales_dataset();
        let ctx = ToolContext {
            dataset: &ds,
            filename: "sales.csv",
        };
        let err = execute_tool(&ctx, "drop_table", &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidToolArguments(_)));
        assert!(err.to_string().contains("drop_table"));
    }

    #[test]
    fn fmt_number_output() {
        assert_eq!(fmt_number(300.0), "300");
        assert_eq!(fmt_number(0.5), "0.50");
        assert_eq!(fmt_number(-2.0), "-2");
        assert_eq!(fmt_number(1234.567), "1234.57");
    }
}
