//! Comparison primitives shared by `analyze_data` filtering and the query
//! expression language.

use csvq_common::errors::ToolError;

use crate::dataset::{ColumnType, Dataset};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
}

impl CmpOp {
    /// Parse the word form used by `analyze_data` arguments.
    pub(crate) fn parse_word(s: &str) -> Result<Self, ToolError> {
        match s {
            "eq" => Ok(CmpOp::Eq),
            "ne" => Ok(CmpOp::Ne),
            "gt" => Ok(CmpOp::Gt),
            "lt" => Ok(CmpOp::Lt),
            "ge" => Ok(CmpOp::Ge),
            "le" => Ok(CmpOp::Le),
            "contains" => Ok(CmpOp::Contains),
            other => Err(ToolError::InvalidToolArguments(format!(
                "unknown operator '{other}'"
            ))),
        }
    }

    pub(crate) fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Gt => ">",
            CmpOp::Lt => "<",
            CmpOp::Ge => ">=",
            CmpOp::Le => "<=",
            CmpOp::Contains => "contains",
        }
    }
}

/// Evaluate `cell <op> literal` for one row. Numeric columns compare
/// numerically (a non-numeric literal is a `TypeMismatch`); all other column
/// types compare lexicographically, which orders ISO dates correctly.
/// Empty cells never match.
pub(crate) fn cell_matches(
    dataset: &Dataset,
    row: usize,
    col: usize,
    op: CmpOp,
    literal: &str,
) -> Result<bool, ToolError> {
    let cell = dataset.cell(row, col).trim();
    if cell.is_empty() {
        return Ok(false);
    }

    if op == CmpOp::Contains {
        return Ok(cell.contains(literal));
    }

    if dataset.column_type(col) == ColumnType::Numeric {
        let rhs: f64 = literal.trim().parse().map_err(|_| {
            ToolError::TypeMismatch(format!(
                "cannot compare numeric column with non-numeric value '{literal}'"
            ))
        })?;
        let lhs: f64 = match cell.parse() {
            Ok(v) => v,
            Err(_) => return Ok(false),
        };
        return Ok(match op {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Ge => lhs >= rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Contains => unreachable!("handled above"),
        });
    }

    Ok(match op {
        CmpOp::Eq => cell == literal,
        CmpOp::Ne => cell != literal,
        CmpOp::Gt => cell > literal,
        CmpOp::Lt => cell < literal,
        CmpOp::Ge => cell >= literal,
        CmpOp::Le => cell <= literal,
        CmpOp::Contains => unreachable!("handled above"),
    })
}
