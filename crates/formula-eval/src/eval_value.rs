//! The evaluator's runtime value type.
//!
//! `CellValue` (in `formula-common`) is what a *cell* can store; `EvalValue`
//! is what an *expression* can evaluate to, which additionally includes
//! bare integers, dates, and 2-D arrays that never get stored directly in a
//! cell (e.g. `ROW()`, `DATE(...)`, a `RangeRef` materialized for
//! `SUMPRODUCT`).

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

use formula_common::value::{CellValue, ErrorKind};

#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Number(Decimal),
    Int(i64),
    Text(String),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Array(Vec<Vec<EvalValue>>),
    Empty,
    Error(ErrorKind),
}

impl EvalValue {
    pub fn from_cell_value(v: &CellValue) -> EvalValue {
        match v {
            CellValue::Empty => EvalValue::Empty,
            CellValue::Number(n) => EvalValue::Number(*n),
            CellValue::Text(s) => EvalValue::Text(s.clone()),
            CellValue::Bool(b) => EvalValue::Bool(*b),
            CellValue::DateTime(dt) => EvalValue::DateTime(*dt),
            CellValue::RichText(segs) => {
                EvalValue::Text(segs.iter().map(|s| s.text.as_str()).collect())
            }
            CellValue::Formula(_, Some(cached)) => EvalValue::from_cell_value(cached),
            CellValue::Formula(text, None) => EvalValue::Text(text.clone()),
            CellValue::Error(k) => EvalValue::Error(*k),
        }
    }

    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            EvalValue::Number(n) => Some(*n),
            EvalValue::Int(i) => Some(Decimal::from(*i)),
            EvalValue::Bool(b) => Some(if *b { Decimal::ONE } else { Decimal::ZERO }),
            _ => None,
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            EvalValue::Number(n) => n.normalize().to_string(),
            EvalValue::Int(i) => i.to_string(),
            EvalValue::Text(s) => s.clone(),
            EvalValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            EvalValue::Date(d) => d.to_string(),
            EvalValue::DateTime(dt) => dt.to_string(),
            EvalValue::Array(_) => String::new(),
            EvalValue::Empty => String::new(),
            EvalValue::Error(k) => k.to_string(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            EvalValue::Bool(b) => *b,
            EvalValue::Number(n) => !n.is_zero(),
            EvalValue::Int(i) => *i != 0,
            EvalValue::Text(s) => !s.is_empty(),
            EvalValue::Empty => false,
            EvalValue::Error(_) => false,
            _ => true,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, EvalValue::Error(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            EvalValue::Number(_) => "number",
            EvalValue::Int(_) => "integer",
            EvalValue::Text(_) => "text",
            EvalValue::Bool(_) => "boolean",
            EvalValue::Date(_) => "date",
            EvalValue::DateTime(_) => "datetime",
            EvalValue::Array(_) => "array",
            EvalValue::Empty => "empty",
            EvalValue::Error(_) => "error",
        }
    }
}

impl From<Decimal> for EvalValue {
    fn from(d: Decimal) -> Self {
        EvalValue::Number(d)
    }
}

impl From<bool> for EvalValue {
    fn from(b: bool) -> Self {
        EvalValue::Bool(b)
    }
}

impl From<String> for EvalValue {
    fn from(s: String) -> Self {
        EvalValue::Text(s)
    }
}
