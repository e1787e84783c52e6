//! Dataset store and tool catalog for csvq.
//!
//! Parses uploaded delimited-text payloads into in-memory [`Dataset`]s and
//! provides the fixed set of data operations the reasoning loop may invoke:
//! - `get_data_info` — dataset metadata and sample rows
//! - `analyze_data` — summary, groupby, filter, sort, aggregate
//! - `create_visualization` — structured chart descriptions
//! - `execute_query` — a restricted, injection-safe query expression
//!
//! Everything here is pure and synchronous: tools read the dataset, never
//! mutate it, and never perform I/O.

pub mod dataset;
pub mod tools;

pub use dataset::{Column, ColumnType, Dataset};
pub use tools::{catalog, execute_tool, ChartSpec, ChartType, ToolContext, ToolOutcome};
