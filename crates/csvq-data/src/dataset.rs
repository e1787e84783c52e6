//! In-memory tabular dataset parsed from an uploaded delimited-text payload.

use std::borrow::Cow;
use std::collections::HashSet;

use csvq_common::errors::{ParseError, ToolError};

/// Rows sampled per column when inferring types.
const TYPE_SAMPLE_ROWS: usize = 100;

/// Scalar type inferred for a column by sampling its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    Temporal,
    Boolean,
    Text,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Numeric => "numeric",
            ColumnType::Temporal => "temporal",
            ColumnType::Boolean => "boolean",
            ColumnType::Text => "text",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

/// An immutable table: ordered named columns plus rows of raw string cells.
/// Every row holds exactly one cell per declared column; the column set and
/// row count are fixed at parse time.
#[derive(Debug, Clone)]
pub struct Dataset {
    columns: Vec<Column>,
    rows: Vec<Vec<String>>,
}

impl Dataset {
    /// Parse a delimited-text payload into a dataset.
    ///
    /// The size check runs before any decoding. Encoding is strict UTF-8
    /// first, then the declared encoding label (or Windows-1252 when none is
    /// declared). A payload without a header row is malformed; a header with
    /// zero data rows is a valid empty dataset.
    pub fn parse(
        bytes: &[u8],
        declared_encoding: Option<&str>,
        max_bytes: usize,
    ) -> Result<Self, ParseError> {
        if bytes.len() > max_bytes {
            return Err(ParseError::PayloadTooLarge {
                size: bytes.len(),
                limit: max_bytes,
            });
        }

        let text = decode(bytes, declared_encoding)?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| ParseError::MalformedInput(e.to_string()))?
            .clone();
        if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
            return Err(ParseError::MalformedInput("missing header row".into()));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            // Non-flexible reader: a row whose field count differs from the
            // header fails here.
            let record = record.map_err(|e| ParseError::MalformedInput(e.to_string()))?;
            rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
        }

        let columns = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| Column {
                name: name.trim().to_string(),
                ty: infer_type(rows.iter().take(TYPE_SAMPLE_ROWS).map(|r| r[idx].as_str())),
            })
            .collect();

        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn cell(&self, row: usize, col: usize) -> &str {
        &self.rows[row][col]
    }

    pub fn column_type(&self, idx: usize) -> ColumnType {
        self.columns[idx].ty
    }

    /// Resolve a column name (case-sensitive) to its index.
    pub fn column_index(&self, name: &str) -> Result<usize, ToolError> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| ToolError::column_not_found(name, self.column_names()))
    }

    /// All numeric values of a column, skipping empty cells. Fails with
    /// `TypeMismatch` if a non-empty cell does not parse as a number.
    pub fn numeric_values(&self, idx: usize) -> Result<Vec<f64>, ToolError> {
        let mut values = Vec::new();
        for row in &self.rows {
            let cell = row[idx].trim();
            if cell.is_empty() {
                continue;
            }
            let v: f64 = cell.parse().map_err(|_| {
                ToolError::TypeMismatch(format!(
                    "column '{}' contains non-numeric value '{}'",
                    self.columns[idx].name, cell
                ))
            })?;
            values.push(v);
        }
        Ok(values)
    }

    /// Count of distinct non-empty values in a column.
    pub fn distinct_count(&self, idx: usize) -> usize {
        self.rows
            .iter()
            .map(|r| r[idx].trim())
            .filter(|c| !c.is_empty())
            .collect::<HashSet<_>>()
            .len()
    }

    /// One row as a JSON object, with numeric-column cells emitted as
    /// numbers and empty cells as null.
    pub fn row_object(&self, row: usize) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        for (idx, col) in self.columns.iter().enumerate() {
            let cell = self.rows[row][idx].trim();
            let value = if cell.is_empty() {
                serde_json::Value::Null
            } else if col.ty == ColumnType::Numeric {
                cell.parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(serde_json::Value::Number)
                    .unwrap_or_else(|| serde_json::Value::String(cell.to_string()))
            } else {
                serde_json::Value::String(cell.to_string())
            };
            obj.insert(col.name.clone(), value);
        }
        serde_json::Value::Object(obj)
    }
}

fn decode<'a>(bytes: &'a [u8], declared: Option<&str>) -> Result<Cow<'a, str>, ParseError> {
    if let Ok(s) = std::str::from_utf8(bytes) {
        return Ok(Cow::Borrowed(s));
    }

    let encoding = match declared {
        Some(label) => encoding_rs::Encoding::for_label(label.as_bytes()).ok_or_else(|| {
            ParseError::EncodingError(format!("unknown encoding label '{label}'"))
        })?,
        // Excel-exported CSVs are the common non-UTF-8 case.
        None => encoding_rs::WINDOWS_1252,
    };

    let (decoded, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err(ParseError::EncodingError(format!(
            "payload is not valid {}",
            encoding.name()
        )));
    }
    Ok(Cow::Owned(decoded.into_owned()))
}

fn infer_type<'a>(samples: impl Iterator<Item = &'a str>) -> ColumnType {
    let mut saw_value = false;
    let mut numeric = true;
    let mut boolean = true;
    let mut temporal = true;

    for sample in samples {
        let sample = sample.trim();
        if sample.is_empty() {
            continue;
        }
        saw_value = true;

        if numeric {
            numeric = sample
                .parse::<f64>()
                .map(|v| v.is_finite())
                .unwrap_or(false);
        }
        if boolean {
            boolean = sample.eq_ignore_ascii_case("true") || sample.eq_ignore_ascii_case("false");
        }
        if temporal {
            temporal = is_temporal(sample);
        }
        if !numeric && !boolean && !temporal {
            return ColumnType::Text;
        }
    }

    if !saw_value {
        return ColumnType::Text;
    }
    if numeric {
        ColumnType::Numeric
    } else if boolean {
        ColumnType::Boolean
    } else if temporal {
        ColumnType::Temporal
    } else {
        ColumnType::Text
    }
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

fn is_temporal(s: &str) -> bool {
    DATE_FORMATS
        .iter()
        .any(|fmt| chrono::NaiveDate::parse_from_str(s, fmt).is_ok())
        || DATETIME_FORMATS
            .iter()
            .any(|fmt| chrono::NaiveDateTime::parse_from_str(s, fmt).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_LIMIT: usize = usize::MAX;

    fn parse(text: &str) -> Dataset {
        Dataset::parse(text.as_bytes(), None, NO_LIMIT).unwrap()
    }

    #[test]
    fn parses_header_and_rows() {
        let ds = parse("month,sales\nJan,100\nFeb,300\nMar,200\n");
        assert_eq!(ds.column_names(), vec!["month", "sales"]);
        assert_eq!(ds.row_count(), 3);
        assert_eq!(ds.column_count(), 2);
        assert_eq!(ds.cell(1, 0), "Feb");
        assert_eq!(ds.cell(1, 1), "300");
    }

    #[test]
    fn header_only_is_valid_empty_dataset() {
        let ds = parse("a,b,c\n");
        assert_eq!(ds.row_count(), 0);
        assert_eq!(ds.column_count(), 3);
    }

    #[test]
    fn empty_payload_is_malformed() {
        let err = Dataset::parse(b"", None, NO_LIMIT).unwrap_err();
        assert!(matches!(err, ParseError::MalformedInput(_)));
    }

    #[test]
    fn ragged_row_is_malformed() {
        let err = Dataset::parse(b"a,b\n1,2\n3\n", None, NO_LIMIT).unwrap_err();
        assert!(matches!(err, ParseError::MalformedInput(_)));
    }

    #[test]
    fn oversized_payload_rejected_before_decoding() {
        let err = Dataset::parse(b"a,b\n1,2\n", None, 4).unwrap_err();
        assert!(matches!(
            err,
            ParseError::PayloadTooLarge { size: 8, limit: 4 }
        ));
    }

    #[test]
    fn windows_1252_fallback() {
        // "café,1" with 0xE9 for é — invalid UTF-8, valid Windows-1252.
        let bytes = b"name,n\ncaf\xe9,1\n";
        let ds = Dataset::parse(bytes, None, NO_LIMIT).unwrap();
        assert_eq!(ds.cell(0, 0), "café");
    }

    #[test]
    fn declared_encoding_is_honored() {
        let bytes = b"name,n\ncaf\xe9,1\n";
        let ds = Dataset::parse(bytes, Some("latin1"), NO_LIMIT).unwrap();
        assert_eq!(ds.cell(0, 0), "café");
    }

    #[test]
    fn unknown_encoding_label_fails() {
        let err = Dataset::parse(b"a\n\xff\n", Some("not-a-charset"), NO_LIMIT).unwrap_err();
        assert!(matches!(err, ParseError::EncodingError(_)));
    }

    #[test]
    fn infers_column_types() {
        let ds = parse(
            "n,date,flag,label\n\
             1,2024-01-01,true,abc\n\
             2.5,2024-02-01,FALSE,def\n\
             -3,2024-03-15,true,1x\n",
        );
        assert_eq!(ds.column_type(0), ColumnType::Numeric);
        assert_eq!(ds.column_type(1), ColumnType::Temporal);
        assert_eq!(ds.column_type(2), ColumnType::Boolean);
        assert_eq!(ds.column_type(3), ColumnType::Text);
    }

    #[test]
    fn mixed_column_is_text() {
        let ds = parse("v\n1\ntwo\n");
        assert_eq!(ds.column_type(0), ColumnType::Text);
    }

    #[test]
    fn empty_cells_do_not_break_numeric_inference() {
        let ds = parse("v\n1\n\n3\n");
        assert_eq!(ds.column_type(0), ColumnType::Numeric);
        assert_eq!(ds.numeric_values(0).unwrap(), vec![1.0, 3.0]);
    }

    #[test]
    fn column_index_error_lists_available() {
        let ds = parse("month,sales\nJan,1\n");
        let err = ds.column_index("Sales").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'Sales'"));
        assert!(msg.contains("month, sales"));
    }

    #[test]
    fn row_object_types_cells() {
        let ds = parse("month,sales\nJan,100\nFeb,\n");
        let obj = ds.row_object(0);
        assert_eq!(obj["month"], "Jan");
        assert_eq!(obj["sales"], 100.0);
        assert!(ds.row_object(1)["sales"].is_null());
    }
}
