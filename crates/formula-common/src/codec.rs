//! Decoders from [`Cell`]/[`CellValue`] to typed values (§4.2).
//!
//! Two families: *strict* decoders succeed only for the exact matching
//! variant, and are what a `Ref`'s attached decoder normally is. *Coercing*
//! decoders implement Excel's argument-coercion rules and are used when a
//! function argument accepts any cell value.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::{CellKind, CodecError};
use crate::value::{Cell, CellValue};

/// Follows a `Formula` cell to its cached value (or itself, if not a
/// formula / not yet cached).
fn resolve_cache(value: &CellValue) -> &CellValue {
    match value {
        CellValue::Formula(_, Some(cached)) => resolve_cache(cached),
        other => other,
    }
}

/// Strict: succeeds only for `Number` (consulting the formula cache).
pub fn decode_number_strict(cell: &Cell) -> Result<Decimal, CodecError> {
    match resolve_cache(&cell.value) {
        CellValue::Number(n) => Ok(*n),
        other => Err(CodecError::TypeMismatch {
            expected: CellKind::Number,
            actual: other.kind(),
        }),
    }
}

/// Strict: succeeds only for `Text`.
pub fn decode_text_strict(cell: &Cell) -> Result<String, CodecError> {
    match resolve_cache(&cell.value) {
        CellValue::Text(s) => Ok(s.clone()),
        other => Err(CodecError::TypeMismatch {
            expected: CellKind::Text,
            actual: other.kind(),
        }),
    }
}

/// Strict: succeeds only for `Bool`.
pub fn decode_bool_strict(cell: &Cell) -> Result<bool, CodecError> {
    match resolve_cache(&cell.value) {
        CellValue::Bool(b) => Ok(*b),
        other => Err(CodecError::TypeMismatch {
            expected: CellKind::Bool,
            actual: other.kind(),
        }),
    }
}

/// Strict: succeeds only for `DateTime`.
pub fn decode_datetime_strict(cell: &Cell) -> Result<chrono::NaiveDateTime, CodecError> {
    match resolve_cache(&cell.value) {
        CellValue::DateTime(dt) => Ok(*dt),
        other => Err(CodecError::TypeMismatch {
            expected: CellKind::DateTime,
            actual: other.kind(),
        }),
    }
}

/// Coercing: every variant renders to a string.
/// `Empty -> ""`; `Number` -> canonical decimal text; `Bool -> TRUE/FALSE`;
/// `DateTime -> ISO 8601`; `Text` as-is; `RichText` flattens.
pub fn decode_as_string(cell: &Cell) -> String {
    match resolve_cache(&cell.value) {
        CellValue::Empty => String::new(),
        CellValue::Number(n) => n.normalize().to_string(),
        CellValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        CellValue::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        CellValue::Text(s) => s.clone(),
        CellValue::RichText(segs) => segs.iter().map(|s| s.text.as_str()).collect(),
        CellValue::Error(k) => k.to_string(),
        CellValue::Formula(text, None) => text.clone(),
        CellValue::Formula(_, Some(_)) => unreachable!("resolve_cache already unwrapped"),
    }
}

/// Coercing: `Number` if `is_valid_int`; `Bool -> 1/0`; else `TypeMismatch`.
pub fn decode_as_int(cell: &Cell) -> Result<i64, CodecError> {
    match resolve_cache(&cell.value) {
        CellValue::Number(n) => {
            if n.fract().is_zero() {
                n.to_string().parse().map_err(|_| CodecError::NotAnInteger)
            } else {
                Err(CodecError::NotAnInteger)
            }
        }
        CellValue::Bool(b) => Ok(if *b { 1 } else { 0 }),
        other => Err(CodecError::TypeMismatch {
            expected: CellKind::Number,
            actual: other.kind(),
        }),
    }
}

/// Coercing: `Bool` passthrough; `Number != 0`; text `"TRUE"`/`"FALSE"`
/// (case-insensitive); else `TypeMismatch`.
pub fn decode_as_bool(cell: &Cell) -> Result<bool, CodecError> {
    match resolve_cache(&cell.value) {
        CellValue::Bool(b) => Ok(*b),
        CellValue::Number(n) => Ok(!n.is_zero()),
        CellValue::Text(s) => match s.to_ascii_uppercase().as_str() {
            "TRUE" => Ok(true),
            "FALSE" => Ok(false),
            _ => Err(CodecError::TypeMismatch {
                expected: CellKind::Bool,
                actual: CellKind::Text,
            }),
        },
        other => Err(CodecError::TypeMismatch {
            expected: CellKind::Bool,
            actual: other.kind(),
        }),
    }
}

/// Coercing: extracts the date component from a `DateTime`.
pub fn decode_as_date(cell: &Cell) -> Result<NaiveDate, CodecError> {
    match resolve_cache(&cell.value) {
        CellValue::DateTime(dt) => Ok(dt.date()),
        other => Err(CodecError::TypeMismatch {
            expected: CellKind::DateTime,
            actual: other.kind(),
        }),
    }
}

/// The resolved-value decoder: `Empty -> Number(0)`, formula cache unwrapped,
/// everything else passed through unchanged. Used for bare cell references
/// in numeric contexts.
pub fn decode_resolved_value(cell: &Cell) -> CellValue {
    match resolve_cache(&cell.value) {
        CellValue::Empty => CellValue::Number(Decimal::ZERO),
        other => other.clone(),
    }
}

/// Lenient numeric decode used by aggregates: `Number` decodes directly;
/// everything else (including `Empty`, `Text`, `Bool`, `Error`) is skipped
/// by returning `None` rather than erroring (Excel's skip-non-numeric rule,
/// §4.4).
pub fn decode_numeric_lenient(cell: &Cell) -> Option<Decimal> {
    match resolve_cache(&cell.value) {
        CellValue::Number(n) => Some(*n),
        _ => None,
    }
}

/// Coercing numeric decode used by `SUMPRODUCT` and similar: `Bool -> 0/1`,
/// `Text`/`Empty` -> `0`, `Number` passed through.
pub fn coerce_to_numeric(cell: &Cell) -> Decimal {
    match resolve_cache(&cell.value) {
        CellValue::Number(n) => *n,
        CellValue::Bool(b) => {
            if *b {
                Decimal::ONE
            } else {
                Decimal::ZERO
            }
        }
        _ => Decimal::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::dec;

    #[test]
    fn strict_number_decode_rejects_text() {
        let cell = Cell::new(CellValue::Text("x".into()));
        assert!(decode_number_strict(&cell).is_err());
        let cell = Cell::new(CellValue::Number(dec!(3.5)));
        assert_eq!(decode_number_strict(&cell).unwrap(), dec!(3.5));
    }

    #[test]
    fn resolved_value_defaults_empty_to_zero() {
        let cell = Cell::empty();
        assert_eq!(decode_resolved_value(&cell), CellValue::Number(Decimal::ZERO));
    }

    #[test]
    fn as_string_flattens_rich_text() {
        let cell = Cell::new(CellValue::RichText(vec![
            crate::value::TextSegment {
                text: "ab".into(),
                bold: true,
                italic: false,
            },
            crate::value::TextSegment {
                text: "cd".into(),
                bold: false,
                italic: false,
            },
        ]));
        assert_eq!(decode_as_string(&cell), "abcd");
    }

    #[test]
    fn numeric_lenient_skips_non_numeric() {
        assert_eq!(decode_numeric_lenient(&Cell::new(CellValue::Text("x".into()))), None);
        assert_eq!(decode_numeric_lenient(&Cell::empty()), None);
        assert_eq!(
            decode_numeric_lenient(&Cell::new(CellValue::Number(dec!(4)))),
            Some(dec!(4))
        );
    }
}
