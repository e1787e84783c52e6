//! `execute_query`: a restricted, injection-safe query expression.
//!
//! Grammar:
//!
//! ```text
//! query     := aggregate | predicate
//! aggregate := FUNC '(' [IDENT] ')' [ 'where' predicate ]
//! predicate := conjunct ( 'or' conjunct )*
//! conjunct  := atom ( 'and' atom )*
//! atom      := '(' predicate ')' | IDENT op literal
//! op        := == != > >= < <= contains
//! literal   := NUMBER | STRING | bare word
//! ```
//!
//! The expression is tokenized, parsed and resolved against the dataset's
//! columns before any row is evaluated, so a malformed or invalid expression
//! never partially executes.

use serde_json::Value;

use csvq_common::errors::ToolError;

use crate::dataset::{ColumnType, Dataset};

use super::analyze::{aggregate_column, Agg};
use super::ops::{cell_matches, CmpOp};
use super::{fmt_number, str_arg, ToolOutcome, MAX_RESULT_ROWS};

pub(crate) fn execute(dataset: &Dataset, args: &Value) -> Result<ToolOutcome, ToolError> {
    let expression = str_arg(args, "expression")?;
    let tokens = tokenize(expression)?;
    let query = Parser::new(tokens).parse()?;
    let resolved = resolve(dataset, query)?;
    evaluate(dataset, expression, resolved)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Op(CmpOp),
    And,
    Or,
    Where,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ToolError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some(c) if c == quote => break,
                        Some(c) => s.push(c),
                        None => {
                            return Err(ToolError::InvalidExpression(
                                "unterminated string literal".into(),
                            ))
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '=' => {
                chars.next();
                // Accept both `==` and a bare `=`.
                if chars.peek() == Some(&'=') {
                    chars.next();
                }
                tokens.push(Token::Op(CmpOp::Eq));
            }
            '!' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(ToolError::InvalidExpression("expected '!='".into()));
                }
                tokens.push(Token::Op(CmpOp::Ne));
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Op(CmpOp::Ge));
                } else {
                    tokens.push(Token::Op(CmpOp::Gt));
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Op(CmpOp::Le));
                } else {
                    tokens.push(Token::Op(CmpOp::Lt));
                }
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let mut s = String::new();
                s.push(c);
                chars.next();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || c == '-' {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n: f64 = s
                    .parse()
                    .map_err(|_| ToolError::InvalidExpression(format!("bad number '{s}'")))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match s.to_ascii_lowercase().as_str() {
                    "and" => tokens.push(Token::And),
                    "or" => tokens.push(Token::Or),
                    "where" => tokens.push(Token::Where),
                    "contains" => tokens.push(Token::Op(CmpOp::Contains)),
                    _ => tokens.push(Token::Ident(s)),
                }
            }
            other => {
                return Err(ToolError::InvalidExpression(format!(
                    "unexpected character '{other}'"
                )))
            }
        }
    }

    if tokens.is_empty() {
        return Err(ToolError::InvalidExpression("empty expression".into()));
    }
    Ok(tokens)
}

#[derive(Debug)]
enum Query {
    Aggregate {
        agg: Agg,
        column: Option<String>,
        filter: Option<Pred>,
    },
    Select(Pred),
}

#[derive(Debug)]
enum Pred {
    Cmp {
        column: String,
        op: CmpOp,
        literal: String,
    },
    And(Box<Pred>, Box<Pred>),
    Or(Box<Pred>, Box<Pred>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek2(&self) -> Option<&Token> {
        self.tokens.get(self.pos + 1)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, token: Token) -> Result<(), ToolError> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(ToolError::InvalidExpression(format!(
                "expected {token:?}, found {other:?}"
            ))),
        }
    }

    fn parse(mut self) -> Result<Query, ToolError> {
        let query = if matches!(
            (self.peek(), self.peek2()),
            (Some(Token::Ident(_)), Some(Token::LParen))
        ) {
            self.parse_aggregate()?
        } else {
            Query::Select(self.parse_predicate()?)
        };

        if let Some(token) = self.peek() {
            return Err(ToolError::InvalidExpression(format!(
                "unexpected trailing input at {token:?}"
            )));
        }
        Ok(query)
    }

    fn parse_aggregate(&mut self) -> Result<Query, ToolError> {
        let Some(Token::Ident(name)) = self.next() else {
            return Err(ToolError::InvalidExpression("expected function name".into()));
        };
        let agg = Agg::parse(&name.to_ascii_lowercase())
            .map_err(|_| ToolError::InvalidExpression(format!("unknown function '{name}'")))?;
        self.expect(Token::LParen)?;
        let column = match self.peek() {
            Some(Token::Ident(_)) => {
                let Some(Token::Ident(column)) = self.next() else {
                    unreachable!("peeked an identifier");
                };
                Some(column)
            }
            _ => None,
        };
        self.expect(Token::RParen)?;

        if column.is_none() && agg != Agg::Count {
            return Err(ToolError::InvalidExpression(format!(
                "{}() requires a column argument",
                agg.name()
            )));
        }

        let filter = if matches!(self.peek(), Some(Token::Where)) {
            self.next();
            Some(self.parse_predicate()?)
        } else {
            None
        };

        Ok(Query::Aggregate {
            agg,
            column,
            filter,
        })
    }

    fn parse_predicate(&mut self) -> Result<Pred, ToolError> {
        let mut left = self.parse_conjunct()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.next();
            let right = self.parse_conjunct()?;
            left = Pred::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_conjunct(&mut self) -> Result<Pred, ToolError> {
        let mut left = self.parse_atom()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.next();
            let right = self.parse_atom()?;
            left = Pred::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_atom(&mut self) -> Result<Pred, ToolError> {
        if matches!(self.peek(), Some(Token::LParen)) {
            self.next();
            let inner = self.parse_predicate()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }

        let Some(Token::Ident(column)) = self.next() else {
            return Err(ToolError::InvalidExpression(
                "expected a column reference".into(),
            ));
        };
        let op = match self.next() {
            Some(Token::Op(op)) => op,
            other => {
                return Err(ToolError::InvalidExpression(format!(
                    "expected a comparison operator, found {other:?}"
                )))
            }
        };
        let literal = match self.next() {
            Some(Token::Number(n)) => fmt_number(n),
            Some(Token::Str(s)) => s,
            Some(Token::Ident(s)) => s,
            other => {
                return Err(ToolError::InvalidExpression(format!(
                    "expected a literal, found {other:?}"
                )))
            }
        };
        Ok(Pred::Cmp {
            column,
            op,
            literal,
        })
    }
}

/// A predicate with column names resolved to indices and numeric literals
/// checked, so evaluation cannot fail halfway through.
enum ResolvedPred {
    Cmp {
        col: usize,
        op: CmpOp,
        literal: String,
    },
    And(Box<ResolvedPred>, Box<ResolvedPred>),
    Or(Box<ResolvedPred>, Box<ResolvedPred>),
}

enum ResolvedQuery {
    Aggregate {
        agg: Agg,
        column: Option<String>,
        filter: Option<ResolvedPred>,
    },
    Select(ResolvedPred),
}

fn resolve(dataset: &Dataset, query: Query) -> Result<ResolvedQuery, ToolError> {
    Ok(match query {
        Query::Aggregate {
            agg,
            column,
            filter,
        } => {
            if let Some(ref column) = column {
                dataset.column_index(column)?;
            }
            ResolvedQuery::Aggregate {
                agg,
                column,
                filter: filter.map(|p| resolve_pred(dataset, p)).transpose()?,
            }
        }
        Query::Select(pred) => ResolvedQuery::Select(resolve_pred(dataset, pred)?),
    })
}

fn resolve_pred(dataset: &Dataset, pred: Pred) -> Result<ResolvedPred, ToolError> {
    Ok(match pred {
        Pred::Cmp {
            column,
            op,
            literal,
        } => {
            let col = dataset.column_index(&column)?;
            if dataset.column_type(col) == ColumnType::Numeric
                && op != CmpOp::Contains
                && literal.trim().parse::<f64>().is_err()
            {
                return Err(ToolError::TypeMismatch(format!(
                    "cannot compare numeric column '{column}' with non-numeric value '{literal}'"
                )));
            }
            ResolvedPred::Cmp { col, op, literal }
        }
        Pred::And(a, b) => ResolvedPred::And(
            Box::new(resolve_pred(dataset, *a)?),
            Box::new(resolve_pred(dataset, *b)?),
        ),
        Pred::Or(a, b) => ResolvedPred::Or(
            Box::new(resolve_pred(dataset, *a)?),
            Box::new(resolve_pred(dataset, *b)?),
        ),
    })
}

fn eval_pred(dataset: &Dataset, row: usize, pred: &ResolvedPred) -> Result<bool, ToolError> {
    match pred {
        ResolvedPred::Cmp { col, op, literal } => cell_matches(dataset, row, *col, *op, literal),
        ResolvedPred::And(a, b) => {
            Ok(eval_pred(dataset, row, a)? && eval_pred(dataset, row, b)?)
        }
        ResolvedPred::Or(a, b) => Ok(eval_pred(dataset, row, a)? || eval_pred(dataset, row, b)?),
    }
}

fn evaluate(
    dataset: &Dataset,
    expression: &str,
    query: ResolvedQuery,
) -> Result<ToolOutcome, ToolError> {
    match query {
        ResolvedQuery::Select(pred) => {
            let mut matches = Vec::new();
            for row in 0..dataset.row_count() {
                if eval_pred(dataset, row, &pred)? {
                    matches.push(row);
                }
            }
            let content = format!(
                "{} of {} rows match: {}",
                matches.len(),
                dataset.row_count(),
                expression.trim()
            );
            let table = matches
                .iter()
                .take(MAX_RESULT_ROWS)
                .map(|&row| dataset.row_object(row))
                .collect();
            Ok(ToolOutcome::with_table(content, table))
        }
        ResolvedQuery::Aggregate {
            agg,
            column,
            filter,
        } => {
            let value = match filter {
                None => match &column {
                    Some(column) => aggregate_column(dataset, column, agg)?,
                    None => dataset.row_count() as f64,
                },
                Some(pred) => {
                    let mut rows = Vec::new();
                    for row in 0..dataset.row_count() {
                        if eval_pred(dataset, row, &pred)? {
                            rows.push(row);
                        }
                    }
                    aggregate_rows(dataset, agg, column.as_deref(), &rows)?
                }
            };
            Ok(ToolOutcome::text(format!(
                "{} = {}",
                expression.trim(),
                fmt_number(value)
            )))
        }
    }
}

fn aggregate_rows(
    dataset: &Dataset,
    agg: Agg,
    column: Option<&str>,
    rows: &[usize],
) -> Result<f64, ToolError> {
    let Some(column) = column else {
        return Ok(rows.len() as f64);
    };
    let idx = dataset.column_index(column)?;

    if agg == Agg::Count {
        let count = rows
            .iter()
            .filter(|&&row| !dataset.cell(row, idx).trim().is_empty())
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

    let mut values = Vec::new();
    for &row in rows {
        let cell = dataset.cell(row, idx).trim();
        if cell.is_empty() {
            continue;
        }
        let v: f64 = cell.parse().map_err(|_| {
            ToolError::TypeMismatch(format!(
                "column '{column}' contains non-numeric value '{cell}'"
            ))
        })?;
        values.push(v);
    }
    if values.is_empty() {
        return Err(ToolError::TypeMismatch(format!(
            "no values of '{column}' match the filter"
        )));
    }
    if agg == Agg::Std && values.len() < 2 {
        return Err(ToolError::TypeMismatch(
            "standard deviation requires at least two values".into(),
        ));
    }
    Ok(agg.apply(&values))
}
