//! `analyze_data`: summary, groupby, filter, sort and aggregate operations.

use std::collections::HashMap;

use serde_json::{json, Value};

use csvq_common::errors::ToolError;

use crate::dataset::{ColumnType, Dataset};

use super::ops::{cell_matches, CmpOp};
use super::{fmt_number, opt_str_arg, str_arg, ToolOutcome, MAX_RESULT_ROWS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Agg {
    Sum,
    Mean,
    Median,
    Std,
    Count,
    Min,
    Max,
}

impl Agg {
    pub(crate) fn parse(s: &str) -> Result<Self, ToolError> {
        match s {
            "sum" => Ok(Agg::Sum),
            "mean" => Ok(Agg::Mean),
            "median" => Ok(Agg::Median),
            "std" => Ok(Agg::Std),
            "count" => Ok(Agg::Count),
            "min" => Ok(Agg::Min),
            "max" => Ok(Agg::Max),
            other => Err(ToolError::InvalidToolArguments(format!(
                "unknown aggregation '{other}'"
            ))),
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Agg::Sum => "sum",
            Agg::Mean => "mean",
            Agg::Median => "median",
            Agg::Std => "std",
            Agg::Count => "count",
            Agg::Min => "min",
            Agg::Max => "max",
        }
    }

    /// Apply to a non-empty slice of values. `Std` needs at least two values;
    /// callers enforce both preconditions.
    pub(crate) fn apply(self, values: &[f64]) -> f64 {
        match self {
            Agg::Sum => values.iter().sum(),
            Agg::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Agg::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
            Agg::Std => {
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                    / (values.len() - 1) as f64;
                var.sqrt()
            }
            Agg::Count => values.len() as f64,
            Agg::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Agg::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Aggregate one column to a scalar. `count` works on any column type and
/// counts non-empty cells; everything else requires a numeric column.
pub(crate) fn aggregate_column(
    dataset: &Dataset,
    column: &str,
    agg: Agg,
) -> Result<f64, ToolError> {
    let idx = dataset.column_index(column)?;

    if agg == Agg::Count {
        let count = dataset
            .rows()
            .iter()
            .filter(|r| !r[idx].trim().is_empty())
            .count();
        return Ok(count as f64);
    }

    if dataset.column_type(idx) != ColumnType::Numeric {
        return Err(ToolError::TypeMismatch(format!(
            "aggregation '{}' requires a numeric column, but '{}' is {}",
            agg.name(),
            column,
            dataset.column_type(idx).as_str()
        )));
    }

    let values = dataset.numeric_values(idx)?;
    if values.is_empty() {
        return Err(ToolError::TypeMismatch(format!(
            "column '{column}' has no values to aggregate"
        )));
    }
    if agg == Agg::Std && values.len() < 2 {
        return Err(ToolError::TypeMismatch(
            "standard deviation requires at least two values".into(),
        ));
    }

    Ok(agg.apply(&values))
}

pub(crate) fn analyze(dataset: &Dataset, args: &Value) -> Result<ToolOutcome, ToolError> {
    match str_arg(args, "operation")? {
        "summary" => summary(dataset),
        "groupby" => groupby(dataset, args),
        "filter" => filter(dataset, args),
        "sort" => sort(dataset, args),
        "aggregate" => aggregate(dataset, args),
        other => Err(ToolError::InvalidToolArguments(format!(
            "unknown operation '{other}'"
        ))),
    }
}

fn summary(dataset: &Dataset) -> Result<ToolOutcome, ToolError> {
    let mut lines = vec![format!(
        "{} rows × {} columns",
        dataset.row_count(),
        dataset.column_count()
    )];

    for (idx, col) in dataset.columns().iter().enumerate() {
        let detail = if col.ty == ColumnType::Numeric && dataset.row_count() > 0 {
            let values = dataset.numeric_values(idx)?;
            if values.is_empty() {
                "all empty".to_string()
            } else {
                format!(
                    "min {}, mean {}, max {}",
                    fmt_number(Agg::Min.apply(&values)),
                    fmt_number(Agg::Mean.apply(&values)),
                    fmt_number(Agg::Max.apply(&values)),
                )
            }
        } else {
            format!("{} distinct values", dataset.distinct_count(idx))
        };
        lines.push(format!("- {} ({}): {}", col.name, col.ty.as_str(), detail));
    }

    Ok(ToolOutcome::text(lines.join("\n")))
}

fn groupby(dataset: &Dataset, args: &Value) -> Result<ToolOutcome, ToolError> {
    let key_column = str_arg(args, "column")
        .map_err(|_| ToolError::InvalidToolArguments("groupby requires 'column'".into()))?;
    let key_idx = dataset.column_index(key_column)?;
    let value_column = opt_str_arg(args, "value_column");

    // Group rows by key, preserving first-seen order.
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for row in 0..dataset.row_count() {
        let key = dataset.cell(row, key_idx).trim().to_string();
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(row);
    }

    let (value_label, results): (String, Vec<(String, f64)>) = match value_column {
        Some(value_column) => {
            let agg = Agg::parse(opt_str_arg(args, "agg").unwrap_or("sum"))?;
            let value_idx = dataset.column_index(value_column)?;
            if agg != Agg::Count && dataset.column_type(value_idx) != ColumnType::Numeric {
                return Err(ToolError::TypeMismatch(format!(
                    "aggregation '{}' requires a numeric column, but '{}' is {}",
                    agg.name(),
                    value_column,
                    dataset.column_type(value_idx).as_str()
                )));
            }

            let mut results = Vec::new();
            for key in &order {
                let rows = &groups[key];
                let mut values = Vec::new();
                for &row in rows {
                    let cell = dataset.cell(row, value_idx).trim();
                    if cell.is_empty() {
                        continue;
                    }
                    if agg == Agg::Count {
                        values.push(0.0);
                        continue;
                    }
                    let v: f64 = cell.parse().map_err(|_| {
                        ToolError::TypeMismatch(format!(
                            "column '{value_column}' contains non-numeric value '{cell}'"
                        ))
                    })?;
                    values.push(v);
                }
                let result = if agg == Agg::Count {
                    values.len() as f64
                } else if values.is_empty() {
                    0.0
                } else if agg == Agg::Std && values.len() < 2 {
                    return Err(ToolError::TypeMismatch(
                        "standard deviation requires at least two values per group".into(),
                    ));
                } else {
                    agg.apply(&values)
                };
                results.push((key.clone(), result));
            }
            (format!("{}_{}", agg.name(), value_column), results)
        }
        None => {
            // No value column: row count per group.
            let results = order
                .iter()
                .map(|key| (key.clone(), groups[key].len() as f64))
                .collect();
            ("count".to_string(), results)
        }
    };

    let mut lines: Vec<String> = results
        .iter()
        .take(MAX_RESULT_ROWS)
        .map(|(key, v)| format!("{key}: {}", fmt_number(*v)))
        .collect();
    if results.len() > MAX_RESULT_ROWS {
        lines.push(format!("… ({} groups total)", results.len()));
    }

    let table = results
        .iter()
        .take(MAX_RESULT_ROWS)
        .map(|(key, v)| {
            let mut obj = serde_json::Map::new();
            obj.insert(key_column.to_string(), json!(key));
            obj.insert(value_label.clone(), json!(v));
            Value::Object(obj)
        })
        .collect();

    Ok(ToolOutcome::with_table(lines.join("\n"), table))
}

fn filter(dataset: &Dataset, args: &Value) -> Result<ToolOutcome, ToolError> {
    let column = str_arg(args, "column")
        .map_err(|_| ToolError::InvalidToolArguments("filter requires 'column'".into()))?;
    let idx = dataset.column_index(column)?;
    let op = CmpOp::parse_word(opt_str_arg(args, "operator").unwrap_or("eq"))?;
    let literal = literal_arg(args, "value")?;

    let mut matches = Vec::new();
    for row in 0..dataset.row_count() {
        if cell_matches(dataset, row, idx, op, &literal)? {
            matches.push(row);
        }
    }

    let mut lines = vec![format!(
        "{} of {} rows match {} {} {}",
        matches.len(),
        dataset.row_count(),
        column,
        op.symbol(),
        literal
    )];
    for &row in matches.iter().take(10) {
        lines.push(render_row(dataset, row));
    }
    if matches.len() > 10 {
        lines.push("…".into());
    }

    let table = matches
        .iter()
        .take(MAX_RESULT_ROWS)
        .map(|&row| dataset.row_object(row))
        .collect();

    Ok(ToolOutcome::with_table(lines.join("\n"), table))
}

fn sort(dataset: &Dataset, args: &Value) -> Result<ToolOutcome, ToolError> {
    let column = str_arg(args, "column")
        .map_err(|_| ToolError::InvalidToolArguments("sort requires 'column'".into()))?;
    let idx = dataset.column_index(column)?;
    let descending = args
        .get("descending")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let limit = args
        .get("limit")
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(MAX_RESULT_ROWS)
        .min(MAX_RESULT_ROWS);

    let mut rows: Vec<usize> = (0..dataset.row_count()).collect();
    if dataset.column_type(idx) == ColumnType::Numeric {
        // Empty or unparsable cells sort last regardless of direction.
        let key = |row: usize| dataset.cell(row, idx).trim().parse::<f64>().ok();
        rows.sort_by(|&a, &b| match (key(a), key(b)) {
            (Some(x), Some(y)) => {
                let ord = x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal);
                if descending {
                    ord.reverse()
                } else {
                    ord
                }
            }
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
    } else {
        rows.sort_by(|&a, &b| {
            let ord = dataset.cell(a, idx).cmp(dataset.cell(b, idx));
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
    }
    rows.truncate(limit);

    let mut lines = vec![format!(
        "first {} rows sorted by {} ({})",
        rows.len(),
        column,
        if descending { "descending" } else { "ascending" }
    )];
    for &row in rows.iter().take(10) {
        lines.push(render_row(dataset, row));
    }
    if rows.len() > 10 {
        lines.push("…".into());
    }

    let table = rows.iter().map(|&row| dataset.row_object(row)).collect();
    Ok(ToolOutcome::with_table(lines.join("\n"), table))
}

fn aggregate(dataset: &Dataset, args: &Value) -> Result<ToolOutcome, ToolError> {
    let column = str_arg(args, "column")
        .map_err(|_| ToolError::InvalidToolArguments("aggregate requires 'column'".into()))?;
    let agg = Agg::parse(opt_str_arg(args, "agg").unwrap_or("sum"))?;
    let result = aggregate_column(dataset, column, agg)?;
    Ok(ToolOutcome::text(format!(
        "{} of {}: {}",
        agg.name(),
        column,
        fmt_number(result)
    )))
}

fn literal_arg(args: &Value, key: &str) -> Result<String, ToolError> {
    match args.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        _ => Err(ToolError::InvalidToolArguments(format!(
            "missing field '{key}'"
        ))),
    }
}

fn render_row(dataset: &Dataset, row: usize) -> String {
    dataset
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| format!("{}={}", col.name, dataset.cell(row, idx)))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dataset() -> Dataset {
        Dataset::parse(
            b"month,region,sales\nJan,north,100\nFeb,south,300\nMar,north,200\nApr,south,50\n",
            None,
            usize::MAX,
        )
        .unwrap()
    }

    #[test]
    fn aggregate_max() {
        let out = analyze(&dataset(), &json!({"operation": "aggregate", "column": "sales", "agg": "max"}))
            .unwrap();
        assert_eq!(out.content, "max of sales: 300");
    }

    #[test]
    fn aggregate_defaults_to_sum() {
        let out =
            analyze(&dataset(), &json!({"operation": "aggregate", "column": "sales"})).unwrap();
        assert_eq!(out.content, "sum of sales: 650");
    }

    #[test]
    fn aggregate_mean_and_median() {
        let ds = dataset();
        assert_eq!(aggregate_column(&ds, "sales", Agg::Mean).unwrap(), 162.5);
        assert_eq!(aggregate_column(&ds, "sales", Agg::Median).unwrap(), 150.0);
    }

    #[test]
    fn count_works_on_text_columns() {
        let out = analyze(
            &dataset(),
            &json!({"operation": "aggregate", "column": "month", "agg": "count"}),
        )
        .unwrap();
        assert_eq!(out.content, "count of month: 4");
    }

    #[test]
    fn aggregate_on_text_column_is_type_mismatch() {
        let err = analyze(
            &dataset(),
            &json!({"operation": "aggregate", "column": "month", "agg": "sum"}),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::TypeMismatch(_)));
    }

    #[test]
    fn aggregate_unknown_column() {
        let err = analyze(
            &dataset(),
            &json!({"operation": "aggregate", "column": "revenue"}),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::ColumnNotFound { .. }));
    }

    #[test]
    fn groupby_sums_value_column() {
        let out = analyze(
            &dataset(),
            &json!({"operation": "groupby", "column": "region", "value_column": "sales"}),
        )
        .unwrap();
        assert_eq!(out.content, "north: 300\nsouth: 350");
        let table = out.table.unwrap();
        assert_eq!(table[0]["region"], "north");
        assert_eq!(table[0]["sum_sales"], 300.0);
    }

    #[test]
    fn groupby_without_value_column_counts_rows() {
        let out = analyze(&dataset(), &json!({"operation": "groupby", "column": "region"}))
            .unwrap();
        assert_eq!(out.content, "north: 2\nsouth: 2");
    }

    #[test]
    fn groupby_unknown_column_returns_no_partial_data() {
        let err = analyze(
            &dataset(),
            &json!({"operation": "groupby", "column": "territory", "value_column": "sales"}),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::ColumnNotFound { .. }));
    }

    #[test]
    fn filter_numeric_greater_than() {
        let out = analyze(
            &dataset(),
            &json!({"operation": "filter", "column": "sales", "operator": "gt", "value": 150}),
        )
        .unwrap();
        assert!(out.content.starts_with("2 of 4 rows match sales > 150"));
        let table = out.table.unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0]["month"], "Feb");
    }

    #[test]
    fn filter_requires_value() {
        let err = analyze(
            &dataset(),
            &json!({"operation": "filter", "column": "sales"}),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::InvalidToolArguments(_)));
    }

    #[test]
    fn sort_descending_with_limit() {
        let out = analyze(
            &dataset(),
            &json!({"operation": "sort", "column": "sales", "descending": true, "limit": 2}),
        )
        .unwrap();
        let table = out.table.unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0]["month"], "Feb");
        assert_eq!(table[1]["month"], "Mar");
    }

    #[test]
    fn summary_reports_numeric_stats() {
        let out = analyze(&dataset(), &json!({"operation": "summary"})).unwrap();
        assert!(out.content.contains("4 rows × 3 columns"));
        assert!(out.content.contains("sales (numeric): min 50, mean 162.50, max 300"));
        assert!(out.content.contains("region (text): 2 distinct values"));
    }
}
