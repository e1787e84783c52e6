//! `get_data_info`: dataset metadata and sample rows as JSON.

use serde_json::json;

use csvq_common::errors::ToolError;

use super::{ToolContext, ToolOutcome};

const SAMPLE_ROWS: usize = 3;

pub(crate) fn data_info(ctx: &ToolContext<'_>) -> Result<ToolOutcome, ToolError> {
    let ds = ctx.dataset;

    let dtypes: serde_json::Map<String, serde_json::Value> = ds
        .columns()
        .iter()
        .map(|c| (c.name.clone(), json!(c.ty.as_str())))
        .collect();
    let sample: Vec<serde_json::Value> = (0..ds.row_count().min(SAMPLE_ROWS))
        .map(|row| ds.row_object(row))
        .collect();

    let info = json!({
        "filename": ctx.filename,
        "shape": format!("{} rows × {} columns", ds.row_count(), ds.column_count()),
        "columns": ds.column_names(),
        "dtypes": dtypes,
        "sample_data": sample,
    });

    Ok(ToolOutcome::text(info.to_string()))
}
