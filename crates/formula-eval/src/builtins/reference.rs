//! Reference-introspection functions (§4.4): `ROW`, `COLUMN`, `ROWS`,
//! `COLUMNS`, `ADDRESS`. These inspect the *shape* of a reference argument
//! rather than its decoded value, so they pattern-match the raw `TExpr`
//! instead of going through `ctx.eval`.

use formula_common::address::{ARef, Column};

use crate::ast::{ResultType, TExpr};
use crate::error::EvalError;
use crate::eval_value::EvalValue;
use crate::function::{ArgKind, ArgSpec, Arity, FunctionFlags, FunctionRegistry, FunctionSpec};
use crate::interpreter::EvalCtx;

pub fn register(reg: &mut FunctionRegistry) {
    reg.register(FunctionSpec {
        name: "ROW",
        arity: Arity::Exact(1),
        arg_spec: ArgSpec::new(vec![ArgKind::Range]),
        return_type: ResultType::Int,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: row,
    });
    reg.register(FunctionSpec {
        name: "COLUMN",
        arity: Arity::Exact(1),
        arg_spec: ArgSpec::new(vec![ArgKind::Range]),
        return_type: ResultType::Int,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: column,
    });
    reg.register(FunctionSpec {
        name: "ROWS",
        arity: Arity::Exact(1),
        arg_spec: ArgSpec::new(vec![ArgKind::Range]),
        return_type: ResultType::Int,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: rows,
    });
    reg.register(FunctionSpec {
        name: "COLUMNS",
        arity: Arity::Exact(1),
        arg_spec: ArgSpec::new(vec![ArgKind::Range]),
        return_type: ResultType::Int,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: columns,
    });
    reg.register(FunctionSpec {
        name: "ADDRESS",
        arity: Arity::Range(2, 5),
        arg_spec: ArgSpec::new(vec![
            ArgKind::Int,
            ArgKind::Int,
            ArgKind::Int,
            ArgKind::Bool,
            ArgKind::Text,
        ]),
        return_type: ResultType::Text,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: address,
    });
}

/// The top-left corner of whatever reference shape `expr` names.
fn anchor_of(expr: &TExpr, fn_name: &str) -> Result<ARef, EvalError> {
    match expr {
        TExpr::Ref { addr, .. } | TExpr::PolyRef { addr, .. } => Ok(*addr),
        TExpr::SheetRef { addr, .. } | TExpr::SheetPolyRef { addr, .. } => Ok(*addr),
        TExpr::RangeRef { range } | TExpr::SheetRange { range, .. } => Ok(range.start),
        _ => Err(EvalError::failed(format!("{fn_name}: argument must be a reference"))),
    }
}

fn row(args: &[TExpr], _ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let addr = anchor_of(&args[0], "ROW")?;
    Ok(EvalValue::Int(addr.row.0 as i64 + 1))
}

fn column(args: &[TExpr], _ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let addr = anchor_of(&args[0], "COLUMN")?;
    Ok(EvalValue::Int(addr.col.0 as i64 + 1))
}

fn rows(args: &[TExpr], _ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    match &args[0] {
        TExpr::RangeRef { range } | TExpr::SheetRange { range, .. } => Ok(EvalValue::Int(range.height() as i64)),
        TExpr::Ref { .. } | TExpr::PolyRef { .. } | TExpr::SheetRef { .. } | TExpr::SheetPolyRef { .. } => {
            Ok(EvalValue::Int(1))
        }
        _ => Err(EvalError::failed("ROWS: argument must be a reference")),
    }
}

fn columns(args: &[TExpr], _ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    match &args[0] {
        TExpr::RangeRef { range } | TExpr::SheetRange { range, .. } => Ok(EvalValue::Int(range.width() as i64)),
        TExpr::Ref { .. } | TExpr::PolyRef { .. } | TExpr::SheetRef { .. } | TExpr::SheetPolyRef { .. } => {
            Ok(EvalValue::Int(1))
        }
        _ => Err(EvalError::failed("COLUMNS: argument must be a reference")),
    }
}

/// `ADDRESS(row, col, [abs_num=1], [a1=TRUE], [sheet_text])` (§4.4):
/// `abs_num` 1=absolute, 2=row-relative/col-absolute, 3=col-relative/
/// row-absolute, 4=relative. Only A1-style output is supported; `a1=FALSE`
/// (R1C1) is out of scope.
fn address(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let row_num = ctx.int(&args[0], "ADDRESS")?;
    let col_num = ctx.int(&args[1], "ADDRESS")?;
    if row_num < 1 || col_num < 1 {
        return Err(EvalError::failed("ADDRESS: row and column must be positive"));
    }
    let abs_num = if args.len() > 2 { ctx.int(&args[2], "ADDRESS")? } else { 1 };
    let a1_style = if args.len() > 3 { ctx.boolean(&args[3])? } else { true };
    if !a1_style {
        return Err(EvalError::failed("ADDRESS: R1C1 notation is not supported"));
    }

    let (col_abs, row_abs) = match abs_num {
        1 => (true, true),
        2 => (false, true),
        3 => (true, false),
        4 => (false, false),
        other => return Err(EvalError::failed(format!("ADDRESS: unsupported abs_num {other}"))),
    };

    let mut out = String::new();
    if col_abs {
        out.push('$');
    }
    out.push_str(&Column((col_num - 1) as u32).to_letters());
    if row_abs {
        out.push('$');
    }
    out.push_str(&row_num.to_string());

    if args.len() > 4 {
        let sheet = ctx.text(&args[4])?;
        Ok(EvalValue::Text(format!("{sheet}!{out}")))
    } else {
        Ok(EvalValue::Text(out))
    }
}
