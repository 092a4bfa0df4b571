//! Lookup and positional-access functions (§4.4): `VLOOKUP`, `XLOOKUP`,
//! `INDEX`, `MATCH`. All operate over a materialized grid rather than a
//! live range, since they need random positional access.

use formula_common::value::CellValue;

use crate::ast::{ResultType, TExpr};
use crate::error::EvalError;
use crate::eval_value::EvalValue;
use crate::function::{ArgKind, ArgSpec, Arity, FunctionFlags, FunctionRegistry, FunctionSpec};
use crate::interpreter::EvalCtx;

pub fn register(reg: &mut FunctionRegistry) {
    reg.register(FunctionSpec {
        name: "VLOOKUP",
        arity: Arity::Range(3, 4),
        arg_spec: ArgSpec::new(vec![ArgKind::Any, ArgKind::Range, ArgKind::Int, ArgKind::Bool]),
        return_type: ResultType::Any,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: vlookup,
    });
    reg.register(FunctionSpec {
        name: "XLOOKUP",
        arity: Arity::Range(3, 6),
        arg_spec: ArgSpec::new(vec![
            ArgKind::Any,
            ArgKind::Range,
            ArgKind::Range,
            ArgKind::Any,
            ArgKind::Int,
            ArgKind::Int,
        ]),
        return_type: ResultType::Any,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: xlookup,
    });
    reg.register(FunctionSpec {
        name: "INDEX",
        arity: Arity::Range(2, 3),
        arg_spec: ArgSpec::new(vec![ArgKind::Range, ArgKind::Int, ArgKind::Int]),
        return_type: ResultType::Any,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: index,
    });
    reg.register(FunctionSpec {
        name: "MATCH",
        arity: Arity::Range(2, 3),
        arg_spec: ArgSpec::new(vec![ArgKind::Any, ArgKind::Range, ArgKind::Int]),
        return_type: ResultType::Int,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: match_fn,
    });
}

/// Case-insensitive text, numeric-tower equality otherwise; mirrors
/// `interpreter::structural_eq` without requiring an `EvalValue` on both
/// sides (the lookup key is already an `EvalValue`, the haystack is a raw
/// `CellValue`).
fn cell_eq(key: &EvalValue, cell: &CellValue) -> bool {
    crate::interpreter::structural_eq(key, &EvalValue::from_cell_value(cell))
}

fn numeric_key(v: &CellValue) -> Option<rust_decimal::Decimal> {
    match v {
        CellValue::Number(n) => Some(*n),
        CellValue::Bool(b) => Some(if *b { rust_decimal::Decimal::ONE } else { rust_decimal::Decimal::ZERO }),
        _ => None,
    }
}

fn text_key(v: &CellValue) -> Option<String> {
    match v {
        CellValue::Text(s) => Some(s.to_ascii_lowercase()),
        CellValue::RichText(segs) => Some(segs.iter().map(|s| s.text.as_str()).collect::<String>().to_ascii_lowercase()),
        _ => None,
    }
}

/// Largest entry `<= key` (mode `1`/approximate match) or smallest `>= key`
/// (mode `-1`), by whichever of numeric/text ordering applies to `key`.
///
/// Assumes the haystack is sorted consistent with `want_le` (§4.4 requires
/// the lookup column be sorted for approximate match), so the closest
/// acceptable entry is simply the last one encountered in a single pass.
fn nearest_match(key: &EvalValue, haystack: &[CellValue], want_le: bool) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, cell) in haystack.iter().enumerate() {
        let ord = match (key.as_number(), numeric_key(cell)) {
            (Some(k), Some(v)) => v.partial_cmp(&k),
            _ => match key {
                EvalValue::Text(k) => text_key(cell).map(|v| v.cmp(&k.to_ascii_lowercase())),
                _ => None,
            },
        };
        let Some(ord) = ord else { continue };
        let acceptable = if want_le { ord != std::cmp::Ordering::Greater } else { ord != std::cmp::Ordering::Less };
        if acceptable {
            best = Some(i);
        } else if best.is_some() {
            break;
        }
    }
    best
}

fn vlookup(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let key = ctx.eval(&args[0])?;
    let grid = ctx.materialize(&args[1])?;
    let col_index = ctx.int(&args[2], "VLOOKUP")?;
    let exact = if args.len() > 3 { !ctx.boolean(&args[3])? } else { false };

    let width = grid.first().map(|r| r.len()).unwrap_or(0) as i64;
    if col_index < 1 || col_index > width {
        return Err(EvalError::failed_with_context(
            "VLOOKUP: col_index out of range",
            format!("col_index={col_index}, width={width}"),
        ));
    }

    let first_col: Vec<CellValue> = grid.iter().map(|row| row[0].clone()).collect();
    let row_idx = if exact {
        first_col.iter().position(|c| cell_eq(&key, c))
    } else {
        nearest_match(&key, &first_col, true)
    };

    match row_idx {
        Some(i) => Ok(EvalValue::from_cell_value(&grid[i][(col_index - 1) as usize])),
        None => Err(EvalError::failed("VLOOKUP: no matching row found")),
    }
}

fn xlookup(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let key = ctx.eval(&args[0])?;
    let lookup_grid = ctx.materialize(&args[1])?;
    let return_grid = ctx.materialize(&args[2])?;

    let lookup: Vec<CellValue> = lookup_grid.into_iter().flatten().collect();
    let returns: Vec<CellValue> = return_grid.into_iter().flatten().collect();
    if lookup.len() != returns.len() {
        return Err(EvalError::failed_with_context(
            "XLOOKUP: lookup_array and return_array must be the same size",
            format!("{} vs {}", lookup.len(), returns.len()),
        ));
    }

    let match_mode = if args.len() > 4 { ctx.int(&args[4], "XLOOKUP")? } else { 0 };
    let search_mode = if args.len() > 5 { ctx.int(&args[5], "XLOOKUP")? } else { 1 };

    let found = match match_mode {
        0 => {
            if search_mode < 0 {
                lookup.iter().rposition(|c| cell_eq(&key, c))
            } else {
                lookup.iter().position(|c| cell_eq(&key, c))
            }
        }
        -1 => nearest_match(&key, &lookup, true),
        1 => nearest_match(&key, &lookup, false),
        2 => {
            let pattern = key.as_text();
            lookup.iter().position(|c| wildcard_match(&pattern, &text_key(c).unwrap_or_default()))
        }
        other => return Err(EvalError::failed(format!("XLOOKUP: unsupported match_mode {other}"))),
    };

    match found {
        Some(i) => Ok(EvalValue::from_cell_value(&returns[i])),
        None if args.len() > 3 => ctx.eval(&args[3]),
        None => Ok(EvalValue::Error(formula_common::value::ErrorKind::Na)),
    }
}

fn wildcard_match(pattern: &str, candidate: &str) -> bool {
    super::stats::glob_match(&pattern.to_ascii_lowercase(), &candidate.to_ascii_lowercase())
}

fn index(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let grid = ctx.materialize(&args[0])?;
    let height = grid.len() as i64;
    let width = grid.first().map(|r| r.len()).unwrap_or(0) as i64;

    let row = if args.len() > 1 { ctx.int(&args[1], "INDEX")? } else { 0 };
    let col = if args.len() > 2 { ctx.int(&args[2], "INDEX")? } else { 0 };

    if row < 0 || row > height || col < 0 || col > width {
        return Err(EvalError::out_of_bounds(
            "INDEX: subscript out of range",
            format!("row={row}, col={col}, bounds={height}x{width}"),
        ));
    }

    if row == 0 && col == 0 {
        return Err(EvalError::failed("INDEX: at least one of row/col must be nonzero for a multi-cell range"));
    }
    if row == 0 {
        // Whole column selection collapses to a single cell only when the
        // range is one row tall; otherwise §4.4 doesn't define a scalar
        // result, so the first row is returned as the common case.
        return Ok(EvalValue::from_cell_value(&grid[0][(col - 1) as usize]));
    }
    if col == 0 {
        return Ok(EvalValue::from_cell_value(&grid[(row - 1) as usize][0]));
    }
    Ok(EvalValue::from_cell_value(&grid[(row - 1) as usize][(col - 1) as usize]))
}

fn match_fn(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let key = ctx.eval(&args[0])?;
    let grid = ctx.materialize(&args[1])?;
    let haystack: Vec<CellValue> = grid.into_iter().flatten().collect();
    let match_type = if args.len() > 2 { ctx.int(&args[2], "MATCH")? } else { 1 };

    let found = match match_type {
        0 => haystack.iter().position(|c| cell_eq(&key, c)),
        1 => nearest_match(&key, &haystack, true),
        -1 => nearest_match(&key, &haystack, false),
        other => return Err(EvalError::failed(format!("MATCH: unsupported match_type {other}"))),
    };

    found
        .map(|i| EvalValue::Int(i as i64 + 1))
        .ok_or_else(|| EvalError::failed("MATCH: #N/A no matching value"))
}
