//! `create_visualization`: structured chart descriptions for client-side
//! rendering.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use csvq_common::errors::ToolError;

use crate::dataset::{ColumnType, Dataset};

use super::{opt_str_arg, str_arg, ToolOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Scatter,
    Pie,
}

impl ChartType {
    fn parse(s: &str) -> Result<Self, ToolError> {
        match s {
            "bar" => Ok(ChartType::Bar),
            "line" => Ok(ChartType::Line),
            "scatter" => Ok(ChartType::Scatter),
            "pie" => Ok(ChartType::Pie),
            other => Err(ToolError::InvalidToolArguments(format!(
                "unknown chart type '{other}'"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Scatter => "scatter",
            ChartType::Pie => "pie",
        }
    }

    /// Bar and pie charts aggregate repeated x keys; line and scatter keep
    /// the points in row order.
    fn is_categorical(self) -> bool {
        matches!(self, ChartType::Bar | ChartType::Pie)
    }
}

/// Chart description sent to the client: x-values as strings, y-values as
/// numbers, ready to plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub chart_type: ChartType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub x_label: String,
    pub y_label: String,
    pub x: Vec<String>,
    pub y: Vec<f64>,
}

pub(crate) fn create(dataset: &Dataset, args: &Value) -> Result<ToolOutcome, ToolError> {
    let chart_type = ChartType::parse(str_arg(args, "chart_type")?)?;
    let x_column = str_arg(args, "x_column")?;
    let x_idx = dataset.column_index(x_column)?;
    let y_column = opt_str_arg(args, "y_column");
    let title = opt_str_arg(args, "title").map(str::to_string);

    let (points, y_label) = match y_column {
        Some(y_column) => {
            let y_idx = dataset.column_index(y_column)?;
            if dataset.column_type(y_idx) != ColumnType::Numeric {
                return Err(ToolError::TypeMismatch(format!(
                    "a {} chart requires a numeric y-axis, but column '{}' is {}",
                    chart_type.as_str(),
                    y_column,
                    dataset.column_type(y_idx).as_str()
                )));
            }
            let mut points = Vec::new();
            for row in 0..dataset.row_count() {
                let y_cell = dataset.cell(row, y_idx).trim();
                let Ok(y) = y_cell.parse::<f64>() else {
                    continue; // empty cell
                };
                points.push((dataset.cell(row, x_idx).trim().to_string(), y));
            }
            (points, y_column.to_string())
        }
        None => {
            if !chart_type.is_categorical() {
                return Err(ToolError::InvalidToolArguments(format!(
                    "y_column is required for {} charts",
                    chart_type.as_str()
                )));
            }
            // Frequency of each x value.
            let points = (0..dataset.row_count())
                .map(|row| (dataset.cell(row, x_idx).trim().to_string(), 1.0))
                .collect();
            (points, "count".to_string())
        }
    };

    let (x, y) = if chart_type.is_categorical() {
        merge_by_key(points)
    } else {
        points.into_iter().unzip()
    };

    let spec = ChartSpec {
        chart_type,
        title,
        x_label: x_column.to_string(),
        y_label: y_label.clone(),
        x,
        y,
    };

    let content = format!(
        "created a {} chart of {} by {} with {} points",
        chart_type.as_str(),
        y_label,
        x_column,
        spec.x.len()
    );
    Ok(ToolOutcome {
        content,
        chart: Some(spec),
        table: None,
    })
}

/// Sum y-values per x key, preserving first-seen key order.
fn merge_by_key(points: Vec<(String, f64)>) -> (Vec<String>, Vec<f64>) {
    let mut keys: Vec<String> = Vec::new();
    let mut sums: Vec<f64> = Vec::new();
    for (key, value) in points {
        match keys.iter().position(|k| *k == key) {
            Some(idx) => sums[idx] += value,
            None => {
                keys.push(key);
                sums.push(value);
            }
        }
    }
    (keys, sums)
}
