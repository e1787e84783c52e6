//! Declared tool schemas and argument validation.
//!
//! The same JSON schemas are sent to the planner and used to validate the
//! arguments it sends back, so the declaration and the check cannot drift.

use serde_json::{json, Value};

use csvq_common::errors::ToolError;
use csvq_common::types::ToolDefinition;

pub(crate) const DATA_INFO: &str = "get_data_info";
pub(crate) const ANALYZE: &str = "analyze_data";
pub(crate) const VISUALIZE: &str = "create_visualization";
pub(crate) const QUERY: &str = "execute_query";

/// The fixed set of tools the planner may invoke.
pub fn catalog() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: DATA_INFO.into(),
            description: "Get basic information about the dataset: filename, shape, \
                          column names and types, and sample rows."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {}
            }),
        },
        ToolDefinition {
            name: ANALYZE.into(),
            description: "Run a data operation against the dataset. Operations: summary \
                          (per-column overview), groupby (aggregate a value column per \
                          group), filter (rows matching a comparison), sort (order rows \
                          by a column), aggregate (a single statistic of one column)."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "operation": {
                        "type": "string",
                        "enum": ["summary", "groupby", "filter", "sort", "aggregate"],
                        "description": "The operation to perform"
                    },
                    "column": {
                        "type": "string",
                        "description": "Target column (group key for groupby; required for \
                                        filter, sort and aggregate). Case-sensitive."
                    },
                    "value_column": {
                        "type": "string",
                        "description": "Column aggregated within each group (groupby only)"
                    },
                    "agg": {
                        "type": "string",
                        "enum": ["sum", "mean", "median", "std", "count", "min", "max"],
                        "description": "Aggregation function (groupby and aggregate)"
                    },
                    "operator": {
                        "type": "string",
                        "enum": ["eq", "ne", "gt", "lt", "ge", "le", "contains"],
                        "description": "Comparison operator (filter only, default eq)"
                    },
                    "value": {
                        "description": "Comparison value (filter only)"
                    },
                    "descending": {
                        "type": "boolean",
                        "description": "Sort in descending order (sort only)"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum rows to return (sort only)"
                    }
                },
                "required": ["operation"]
            }),
        },
        ToolDefinition {
            name: VISUALIZE.into(),
            description: "Create a chart from the dataset. Returns a structured chart \
                          description rendered by the client. The y-axis must resolve to \
                          numeric values; without y_column, bar and pie charts plot \
                          per-category counts."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "chart_type": {
                        "type": "string",
                        "enum": ["bar", "line", "scatter", "pie"],
                        "description": "Type of chart"
                    },
                    "x_column": {
                        "type": "string",
                        "description": "Column for the x-axis (categories for bar/pie)"
                    },
                    "y_column": {
                        "type": "string",
                        "description": "Numeric column for the y-axis"
                    },
                    "title": {
                        "type": "string",
                        "description": "Chart title"
                    }
                },
                "required": ["chart_type", "x_column"]
            }),
        },
        ToolDefinition {
            name: QUERY.into(),
            description: "Execute a restricted query expression against the dataset. \
                          Either an aggregate like sum(sales) or count(), optionally \
                          followed by 'where <predicate>', or a bare predicate returning \
                          matching rows. Predicates combine comparisons \
                          (column == value, sales > 100, name contains \"foo\") with \
                          'and'/'or'. No other syntax is allowed."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "expression": {
                        "type": "string",
                        "description": "The query expression"
                    }
                },
                "required": ["expression"]
            }),
        },
    ]
}

pub(crate) fn find(name: &str) -> Option<ToolDefinition> {
    catalog().into_iter().find(|def| def.name == name)
}

/// Check the argument object against the tool's declared schema: required
/// keys present, declared scalar types respected, enum membership honored.
/// Unknown keys are tolerated.
pub(crate) fn validate_arguments(def: &ToolDefinition, args: &Value) -> Result<(), ToolError> {
    let empty = serde_json::Map::new();
    let obj = match args {
        Value::Null => &empty,
        Value::Object(map) => map,
        _ => {
            return Err(ToolError::InvalidToolArguments(
                "arguments must be a JSON object".into(),
            ))
        }
    };

    if let Some(required) = def.parameters["required"].as_array() {
        for key in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(key) {
                return Err(ToolError::InvalidToolArguments(format!(
                    "missing field '{key}'"
                )));
            }
        }
    }

    let Some(properties) = def.parameters["properties"].as_object() else {
        return Ok(());
    };
    for (key, value) in obj {
        let Some(prop) = properties.get(key) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let type_ok = match prop["type"].as_str() {
            Some("string") => value.is_string(),
            Some("number") => value.is_number(),
            Some("integer") => value.is_i64() || value.is_u64(),
            Some("boolean") => value.is_boolean(),
            _ => true,
        };
        if !type_ok {
            return Err(ToolError::InvalidToolArguments(format!(
                "field '{key}' has the wrong type"
            )));
        }
        if let Some(allowed) = prop["enum"].as_array() {
            if !allowed.contains(value) {
                let options: Vec<&str> = allowed.iter().filter_map(Value::as_str).collect();
                return Err(ToolError::InvalidToolArguments(format!(
                    "field '{key}' must be one of: {}",
                    options.join(", ")
                )));
            }
        }
    }

    Ok(())
}
