//! Time-value-of-money and cash-flow functions (§4.4). `XNPV`/`XIRR`'s
//! fractional day-count exponent is deliberately `f64`, converted at the
//! call boundary, per the Decimal arithmetic design note (spec.md §9).

use chrono::NaiveDate;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use formula_common::value::CellValue;

use crate::ast::{ResultType, TExpr};
use crate::error::EvalError;
use crate::eval_value::EvalValue;
use crate::function::{ArgKind, ArgSpec, Arity, FunctionFlags, FunctionRegistry, FunctionSpec};
use crate::interpreter::EvalCtx;

use super::numeric_cells;

pub fn register(reg: &mut FunctionRegistry) {
    reg.register(FunctionSpec {
        name: "NPV",
        arity: Arity::Exact(2),
        arg_spec: ArgSpec::new(vec![ArgKind::Number, ArgKind::Range]),
        return_type: ResultType::Number,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: npv,
    });
    reg.register(FunctionSpec {
        name: "IRR",
        arity: Arity::Range(1, 2),
        arg_spec: ArgSpec::new(vec![ArgKind::Range, ArgKind::Number]),
        return_type: ResultType::Number,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: irr,
    });
    reg.register(FunctionSpec {
        name: "XNPV",
        arity: Arity::Exact(3),
        arg_spec: ArgSpec::new(vec![ArgKind::Number, ArgKind::Range, ArgKind::Range]),
        return_type: ResultType::Number,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: xnpv,
    });
    reg.register(FunctionSpec {
        name: "XIRR",
        arity: Arity::Range(2, 3),
        arg_spec: ArgSpec::new(vec![ArgKind::Range, ArgKind::Range, ArgKind::Number]),
        return_type: ResultType::Number,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: xirr,
    });

    let tvm = |name, eval_fn| FunctionSpec {
        name,
        arity: Arity::Range(3, 6),
        arg_spec: ArgSpec::new(vec![
            ArgKind::Number,
            ArgKind::Number,
            ArgKind::Number,
            ArgKind::Number,
            ArgKind::Number,
            ArgKind::Int,
        ]),
        return_type: ResultType::Number,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn,
    };
    reg.register(tvm("PMT", pmt));
    reg.register(tvm("FV", fv));
    reg.register(tvm("PV", pv));
    reg.register(FunctionSpec {
        name: "NPER",
        arity: Arity::Range(3, 5),
        arg_spec: ArgSpec::new(vec![ArgKind::Number, ArgKind::Number, ArgKind::Number, ArgKind::Number, ArgKind::Int]),
        return_type: ResultType::Number,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: nper,
    });
    reg.register(FunctionSpec {
        name: "RATE",
        arity: Arity::Range(3, 6),
        arg_spec: ArgSpec::new(vec![
            ArgKind::Number,
            ArgKind::Number,
            ArgKind::Number,
            ArgKind::Number,
            ArgKind::Int,
            ArgKind::Number,
        ]),
        return_type: ResultType::Number,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: rate,
    });
}

/// `rate = -1` is a pole of the discount factor, not merely numerically
/// unstable, so it is rejected outright.
fn npv(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let rate = ctx.number(&args[0], "NPV")?;
    if rate == Decimal::NEGATIVE_ONE {
        return Err(EvalError::failed("NPV: rate of -1 is undefined"));
    }
    let flows = numeric_cells(ctx, &args[1])?;
    let mut total = Decimal::ZERO;
    let mut discount = Decimal::ONE + rate;
    for cf in flows {
        total += cf / discount;
        discount *= Decimal::ONE + rate;
    }
    Ok(EvalValue::Number(total))
}

fn npv_at(rate: f64, flows: &[f64]) -> f64 {
    flows.iter().enumerate().map(|(i, cf)| cf / (1.0 + rate).powi(i as i32 + 1)).sum()
}

fn npv_derivative(rate: f64, flows: &[f64]) -> f64 {
    flows
        .iter()
        .enumerate()
        .map(|(i, cf)| -((i + 1) as f64) * cf / (1.0 + rate).powi(i as i32 + 2))
        .sum()
}

fn require_sign_change(flows: &[f64], fn_name: &str) -> Result<(), EvalError> {
    let has_positive = flows.iter().any(|v| *v > 0.0);
    let has_negative = flows.iter().any(|v| *v < 0.0);
    if !has_positive || !has_negative {
        return Err(EvalError::failed(format!(
            "{fn_name}: requires at least one positive and one negative cash flow"
        )));
    }
    Ok(())
}

fn irr(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let flows: Vec<f64> = numeric_cells(ctx, &args[0])?
        .into_iter()
        .map(|d| d.to_f64().unwrap_or(0.0))
        .collect();
    require_sign_change(&flows, "IRR")?;
    let mut guess = if args.len() > 1 { ctx.number(&args[1], "IRR")?.to_f64().unwrap_or(0.10) } else { 0.10 };

    for _ in 0..50 {
        let value = npv_at(guess, &flows);
        let deriv = npv_derivative(guess, &flows);
        if deriv.abs() < 1e-12 {
            return Err(EvalError::failed("IRR: derivative vanished during Newton-Raphson"));
        }
        let next = guess - value / deriv;
        if (next - guess).abs() < 1e-7 {
            return Ok(EvalValue::Number(Decimal::from_f64_retain(next).unwrap_or(Decimal::ZERO)));
        }
        guess = next;
    }
    Err(EvalError::failed("IRR: did not converge after 50 iterations"))
}

fn dates_from(ctx: &EvalCtx<'_>, expr: &TExpr) -> Result<Vec<NaiveDate>, EvalError> {
    let cells = ctx.materialize(expr)?;
    Ok(cells
        .into_iter()
        .flatten()
        .map(|v| match v {
            CellValue::DateTime(dt) => Ok(dt.date()),
            other => Err(EvalError::failed(format!("expected a date, got {}", other.kind()))),
        })
        .collect::<Result<Vec<_>, _>>()?)
}

fn xnpv_at(rate: f64, flows: &[f64], dates: &[NaiveDate]) -> f64 {
    let d0 = dates[0];
    flows
        .iter()
        .zip(dates.iter())
        .map(|(cf, d)| {
            let days = (*d - d0).num_days() as f64;
            cf / (1.0 + rate).powf(days / 365.0)
        })
        .sum()
}

fn xnpv(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let rate = ctx.number(&args[0], "XNPV")?.to_f64().unwrap_or(0.0);
    let flows: Vec<f64> = numeric_cells(ctx, &args[1])?.into_iter().map(|d| d.to_f64().unwrap_or(0.0)).collect();
    let dates = dates_from(ctx, &args[2])?;
    if flows.is_empty() || flows.len() != dates.len() {
        return Err(EvalError::failed_with_context(
            "XNPV: values and dates must be the same non-empty length",
            format!("{} values, {} dates", flows.len(), dates.len()),
        ));
    }
    Ok(EvalValue::Number(
        Decimal::from_f64_retain(xnpv_at(rate, &flows, &dates)).unwrap_or(Decimal::ZERO),
    ))
}

fn xirr(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let flows: Vec<f64> = numeric_cells(ctx, &args[0])?.into_iter().map(|d| d.to_f64().unwrap_or(0.0)).collect();
    let dates = dates_from(ctx, &args[1])?;
    if flows.is_empty() || flows.len() != dates.len() {
        return Err(EvalError::failed("XIRR: values and dates must be the same non-empty length"));
    }
    require_sign_change(&flows, "XIRR")?;
    let mut guess = if args.len() > 2 { ctx.number(&args[2], "XIRR")?.to_f64().unwrap_or(0.10) } else { 0.10 };

    let eps = 1e-6;
    for _ in 0..100 {
        let value = xnpv_at(guess, &flows, &dates);
        let bumped = xnpv_at(guess + eps, &flows, &dates);
        let deriv = (bumped - value) / eps;
        if deriv.abs() < 1e-12 {
            return Err(EvalError::failed("XIRR: derivative vanished during Newton-Raphson"));
        }
        let next = guess - value / deriv;
        if (next - guess).abs() < 1e-7 {
            return Ok(EvalValue::Number(Decimal::from_f64_retain(next).unwrap_or(Decimal::ZERO)));
        }
        guess = next;
    }
    Err(EvalError::failed("XIRR: did not converge after 100 iterations"))
}

/// `1` when the optional `type` argument at `idx` is present and nonzero
/// (annuity-due), `0` (ordinary annuity) otherwise.
fn due_flag(args: &[TExpr], ctx: &EvalCtx<'_>, idx: usize, fn_name: &str) -> Result<bool, EvalError> {
    Ok(args.len() > idx && ctx.int(&args[idx], fn_name)? != 0)
}

/// `PMT(rate, nper, pv, [fv], [type])`: closed-form annuity payment; the
/// rate-zero branch is the limit of the general formula as `rate -> 0`.
fn pmt(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let rate = ctx.number(&args[0], "PMT")?;
    let nper = ctx.number(&args[1], "PMT")?;
    let pv = ctx.number(&args[2], "PMT")?;
    let fv_v = if args.len() > 3 { ctx.number(&args[3], "PMT")? } else { Decimal::ZERO };
    let due = due_flag(args, ctx, 4, "PMT")?;

    let result = if rate.is_zero() {
        -(pv + fv_v) / nper
    } else {
        let factor = (Decimal::ONE + rate).powi(nper.to_i64().unwrap_or(0));
        let due_adj = if due { Decimal::ONE + rate } else { Decimal::ONE };
        -(pv * factor + fv_v) * rate / ((factor - Decimal::ONE) * due_adj)
    };
    Ok(EvalValue::Number(result))
}

/// `FV(rate, nper, pmt, [pv], [type])`.
fn fv(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let rate = ctx.number(&args[0], "FV")?;
    let nper = ctx.number(&args[1], "FV")?;
    let pmt_v = ctx.number(&args[2], "FV")?;
    let pv_v = if args.len() > 3 { ctx.number(&args[3], "FV")? } else { Decimal::ZERO };
    let due = due_flag(args, ctx, 4, "FV")?;

    let result = if rate.is_zero() {
        -(pv_v + pmt_v * nper)
    } else {
        let factor = (Decimal::ONE + rate).powi(nper.to_i64().unwrap_or(0));
        let due_adj = if due { Decimal::ONE + rate } else { Decimal::ONE };
        -(pv_v * factor) - pmt_v * due_adj * (factor - Decimal::ONE) / rate
    };
    Ok(EvalValue::Number(result))
}

/// `PV(rate, nper, pmt, [fv], [type])`.
fn pv(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let rate = ctx.number(&args[0], "PV")?;
    let nper = ctx.number(&args[1], "PV")?;
    let pmt_v = ctx.number(&args[2], "PV")?;
    let fv_v = if args.len() > 3 { ctx.number(&args[3], "PV")? } else { Decimal::ZERO };
    let due = due_flag(args, ctx, 4, "PV")?;

    let result = if rate.is_zero() {
        -(fv_v + pmt_v * nper)
    } else {
        let factor = (Decimal::ONE + rate).powi(nper.to_i64().unwrap_or(0));
        let due_adj = if due { Decimal::ONE + rate } else { Decimal::ONE };
        -(fv_v + pmt_v * due_adj * (factor - Decimal::ONE) / rate) / factor
    };
    Ok(EvalValue::Number(result))
}

fn nper(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let rate = ctx.number(&args[0], "NPER")?.to_f64().unwrap_or(0.0);
    let pmt_v = ctx.number(&args[1], "NPER")?.to_f64().unwrap_or(0.0);
    let pv_v = ctx.number(&args[2], "NPER")?.to_f64().unwrap_or(0.0);
    let fv_v = if args.len() > 3 { ctx.number(&args[3], "NPER")?.to_f64().unwrap_or(0.0) } else { 0.0 };
    let due = args.len() > 4 && ctx.int(&args[4], "NPER")? != 0;

    let result = if rate == 0.0 {
        -(pv_v + fv_v) / pmt_v
    } else {
        let due_adj = if due { 1.0 + rate } else { 1.0 };
        let numerator = pmt_v * due_adj - fv_v * rate;
        let denominator = pv_v * rate + pmt_v * due_adj;
        (numerator / denominator).ln() / (1.0 + rate).ln()
    };
    if !result.is_finite() {
        return Err(EvalError::failed("NPER: result is not a finite number of periods"));
    }
    Ok(EvalValue::Number(Decimal::from_f64_retain(result).unwrap_or(Decimal::ZERO)))
}

/// Iterative: Newton-Raphson on the `PV` residual, 100 iterations, `1e-7`
/// tolerance (mirrors `IRR`'s solver shape).
fn rate(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let nper = ctx.number(&args[0], "RATE")?.to_f64().unwrap_or(0.0);
    let pmt_v = ctx.number(&args[1], "RATE")?.to_f64().unwrap_or(0.0);
    let pv_v = ctx.number(&args[2], "RATE")?.to_f64().unwrap_or(0.0);
    let fv_v = if args.len() > 3 { ctx.number(&args[3], "RATE")?.to_f64().unwrap_or(0.0) } else { 0.0 };
    let due = args.len() > 4 && ctx.int(&args[4], "RATE")? != 0;
    let mut guess = if args.len() > 5 { ctx.number(&args[5], "RATE")?.to_f64().unwrap_or(0.10) } else { 0.10 };

    let residual = |r: f64| -> f64 {
        if r == 0.0 {
            pv_v + pmt_v * nper + fv_v
        } else {
            let due_adj = if due { 1.0 + r } else { 1.0 };
            let factor = (1.0 + r).powf(nper);
            pv_v * factor + pmt_v * due_adj * (factor - 1.0) / r + fv_v
        }
    };

    let eps = 1e-6;
    for _ in 0..100 {
        let value = residual(guess);
        let deriv = (residual(guess + eps) - value) / eps;
        if deriv.abs() < 1e-12 {
            return Err(EvalError::failed("RATE: derivative vanished during Newton-Raphson"));
        }
        let next = guess - value / deriv;
        if (next - guess).abs() < 1e-7 {
            return Ok(EvalValue::Number(Decimal::from_f64_retain(next).unwrap_or(Decimal::ZERO)));
        }
        guess = next;
    }
    Err(EvalError::failed("RATE: did not converge after 100 iterations"))
}
