//! Rounding, logarithms, and `SUMPRODUCT` (§4.4).

use rust_decimal::prelude::*;
use rust_decimal::{Decimal, RoundingStrategy};

use formula_common::codec::coerce_to_numeric;
use formula_common::value::Cell;

use crate::ast::{ResultType, TExpr};
use crate::error::EvalError;
use crate::eval_value::EvalValue;
use crate::function::{ArgKind, ArgSpec, Arity, FunctionFlags, FunctionRegistry, FunctionSpec};
use crate::interpreter::EvalCtx;

pub fn register(reg: &mut FunctionRegistry) {
    let num2 = |name, eval_fn| FunctionSpec {
        name,
        arity: Arity::Exact(2),
        arg_spec: ArgSpec::new(vec![ArgKind::Number, ArgKind::Int]),
        return_type: ResultType::Number,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn,
    };
    reg.register(num2("ROUND", round));
    reg.register(num2("ROUNDUP", roundup));
    reg.register(num2("ROUNDDOWN", rounddown));

    reg.register(FunctionSpec {
        name: "FLOOR",
        arity: Arity::Exact(2),
        arg_spec: ArgSpec::new(vec![ArgKind::Number, ArgKind::Number]),
        return_type: ResultType::Number,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: floor,
    });
    reg.register(FunctionSpec {
        name: "CEILING",
        arity: Arity::Exact(2),
        arg_spec: ArgSpec::new(vec![ArgKind::Number, ArgKind::Number]),
        return_type: ResultType::Number,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: ceiling,
    });

    reg.register(FunctionSpec {
        name: "LOG",
        arity: Arity::Exact(2),
        arg_spec: ArgSpec::new(vec![ArgKind::Number, ArgKind::Number]),
        return_type: ResultType::Number,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: log,
    });
    reg.register(FunctionSpec {
        name: "LN",
        arity: Arity::Exact(1),
        arg_spec: ArgSpec::new(vec![ArgKind::Number]),
        return_type: ResultType::Number,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: ln,
    });
    reg.register(FunctionSpec {
        name: "SQRT",
        arity: Arity::Exact(1),
        arg_spec: ArgSpec::new(vec![ArgKind::Number]),
        return_type: ResultType::Number,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: sqrt,
    });
    reg.register(FunctionSpec {
        name: "POWER",
        arity: Arity::Exact(2),
        arg_spec: ArgSpec::new(vec![ArgKind::Number, ArgKind::Number]),
        return_type: ResultType::Number,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: power,
    });

    reg.register(FunctionSpec {
        name: "SUMPRODUCT",
        arity: Arity::AtLeast(1),
        arg_spec: ArgSpec::with_variadic(vec![], ArgKind::Range),
        return_type: ResultType::Number,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: sumproduct,
    });
}

/// `value * 10^digits`, looped rather than `powi` so arbitrarily negative
/// `digits` never risks an `i64` overflow in the exponent table.
fn pow10(digits: i32) -> Decimal {
    let mut result = Decimal::ONE;
    if digits >= 0 {
        for _ in 0..digits {
            result *= Decimal::TEN;
        }
    } else {
        for _ in 0..(-digits) {
            result /= Decimal::TEN;
        }
    }
    result
}

fn round(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let value = ctx.number(&args[0], "ROUND")?;
    let digits = ctx.int(&args[1], "ROUND")? as i32;
    let factor = pow10(digits);
    let scaled = (value * factor).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    Ok(EvalValue::Number(scaled / factor))
}

/// Away from zero: positive scaled values ceil, negative ones floor.
fn roundup(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let value = ctx.number(&args[0], "ROUNDUP")?;
    let digits = ctx.int(&args[1], "ROUNDUP")? as i32;
    let factor = pow10(digits);
    let scaled = value * factor;
    let rounded = if scaled.is_sign_negative() { scaled.floor() } else { scaled.ceil() };
    Ok(EvalValue::Number(rounded / factor))
}

fn rounddown(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let value = ctx.number(&args[0], "ROUNDDOWN")?;
    let digits = ctx.int(&args[1], "ROUNDDOWN")? as i32;
    let factor = pow10(digits);
    Ok(EvalValue::Number((value * factor).trunc() / factor))
}

fn check_significance(function: &str, number: Decimal, significance: Decimal) -> Result<(), EvalError> {
    if significance.is_zero() {
        return if number.is_zero() {
            Ok(())
        } else {
            Err(EvalError::failed(format!("{function}: significance of 0 with a nonzero number")))
        };
    }
    if number.is_sign_positive() != significance.is_sign_positive() {
        return Err(EvalError::failed(format!(
            "{function}: number and significance must share a sign"
        )));
    }
    Ok(())
}

fn floor(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let number = ctx.number(&args[0], "FLOOR")?;
    let significance = ctx.number(&args[1], "FLOOR")?;
    check_significance("FLOOR", number, significance)?;
    if significance.is_zero() {
        return Ok(EvalValue::Number(Decimal::ZERO));
    }
    Ok(EvalValue::Number((number / significance).floor() * significance))
}

fn ceiling(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let number = ctx.number(&args[0], "CEILING")?;
    let significance = ctx.number(&args[1], "CEILING")?;
    check_significance("CEILING", number, significance)?;
    if significance.is_zero() {
        return Ok(EvalValue::Number(Decimal::ZERO));
    }
    Ok(EvalValue::Number((number / significance).ceil() * significance))
}

fn log(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let x = ctx.number(&args[0], "LOG")?;
    let base = ctx.number(&args[1], "LOG")?;
    if x <= Decimal::ZERO {
        return Err(EvalError::failed("LOG: x must be positive"));
    }
    if base <= Decimal::ZERO || base == Decimal::ONE {
        return Err(EvalError::failed("LOG: base must be positive and not equal to 1"));
    }
    Ok(EvalValue::Number(x.ln() / base.ln()))
}

fn ln(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let x = ctx.number(&args[0], "LN")?;
    if x <= Decimal::ZERO {
        return Err(EvalError::failed("LN: x must be positive"));
    }
    Ok(EvalValue::Number(x.ln()))
}

fn sqrt(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let x = ctx.number(&args[0], "SQRT")?;
    if x.is_sign_negative() {
        return Err(EvalError::failed("SQRT: x must be non-negative"));
    }
    x.sqrt()
        .map(EvalValue::Number)
        .ok_or_else(|| EvalError::failed("SQRT: failed to converge"))
}

/// Also the evaluator's binding for the `^` operator (§4.4): the parser has
/// no dedicated power node, so the resolver rewrites `^` into a call to this
/// function.
fn power(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let base = ctx.number(&args[0], "POWER")?;
    let exponent = ctx.number(&args[1], "POWER")?;
    if base.is_zero() && exponent.is_sign_negative() {
        return Err(EvalError::failed("POWER: zero raised to a negative power"));
    }
    base.checked_powd(exponent)
        .map(EvalValue::Number)
        .ok_or_else(|| EvalError::failed("POWER: result is out of range"))
}

fn sumproduct(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let grids: Vec<Vec<Vec<Cell>>> = args
        .iter()
        .map(|a| {
            let (sheet, range) = ctx.range_bounds(a)?;
            let mut rows = Vec::with_capacity(range.height() as usize);
            for row in range.start.row.0..=range.end.row.0 {
                let mut cols = Vec::with_capacity(range.width() as usize);
                for col in range.start.col.0..=range.end.col.0 {
                    cols.push(sheet.get(formula_common::address::ARef::new(col, row)));
                }
                rows.push(cols);
            }
            Ok(rows)
        })
        .collect::<Result<_, EvalError>>()?;

    let (height, width) = match grids.first() {
        Some(g) => (g.len(), g.first().map(|r| r.len()).unwrap_or(0)),
        None => return Err(EvalError::failed("SUMPRODUCT: at least one array is required")),
    };
    for g in &grids {
        if g.len() != height || g.iter().any(|r| r.len() != width) {
            return Err(EvalError::failed_with_context(
                "SUMPRODUCT: array dimensions must match",
                format!("expected {height}x{width}"),
            ));
        }
    }

    let mut total = Decimal::ZERO;
    for row in 0..height {
        for col in 0..width {
            let mut product = Decimal::ONE;
            for g in &grids {
                product *= coerce_to_numeric(&g[row][col]);
            }
            total += product;
        }
    }
    Ok(EvalValue::Number(total))
}
