//! Date/time functions (§4.4): construction, month arithmetic, business-day
//! counting, and year-fraction conventions.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::ast::{ResultType, TExpr};
use crate::error::EvalError;
use crate::eval_value::EvalValue;
use crate::function::{ArgKind, ArgSpec, Arity, FunctionFlags, FunctionRegistry, FunctionSpec};
use crate::interpreter::EvalCtx;

pub fn register(reg: &mut FunctionRegistry) {
    reg.register(FunctionSpec {
        name: "DATE",
        arity: Arity::Exact(3),
        arg_spec: ArgSpec::new(vec![ArgKind::Int, ArgKind::Int, ArgKind::Int]),
        return_type: ResultType::Date,
        flags: FunctionFlags { returns_date: true, returns_time: false },
        custom_print: None,
        eval_fn: date,
    });
    reg.register(FunctionSpec {
        name: "EOMONTH",
        arity: Arity::Exact(2),
        arg_spec: ArgSpec::new(vec![ArgKind::Date, ArgKind::Int]),
        return_type: ResultType::Date,
        flags: FunctionFlags { returns_date: true, returns_time: false },
        custom_print: None,
        eval_fn: eomonth,
    });
    reg.register(FunctionSpec {
        name: "EDATE",
        arity: Arity::Exact(2),
        arg_spec: ArgSpec::new(vec![ArgKind::Date, ArgKind::Int]),
        return_type: ResultType::Date,
        flags: FunctionFlags { returns_date: true, returns_time: false },
        custom_print: None,
        eval_fn: edate,
    });
    reg.register(FunctionSpec {
        name: "DATEDIF",
        arity: Arity::Exact(3),
        arg_spec: ArgSpec::new(vec![ArgKind::Date, ArgKind::Date, ArgKind::Text]),
        return_type: ResultType::Int,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: datedif,
    });
    reg.register(FunctionSpec {
        name: "NETWORKDAYS",
        arity: Arity::Range(2, 3),
        arg_spec: ArgSpec::new(vec![ArgKind::Date, ArgKind::Date, ArgKind::Range]),
        return_type: ResultType::Int,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: networkdays,
    });
    reg.register(FunctionSpec {
        name: "WORKDAY",
        arity: Arity::Range(2, 3),
        arg_spec: ArgSpec::new(vec![ArgKind::Date, ArgKind::Int, ArgKind::Range]),
        return_type: ResultType::Date,
        flags: FunctionFlags { returns_date: true, returns_time: false },
        custom_print: None,
        eval_fn: workday,
    });
    reg.register(FunctionSpec {
        name: "YEARFRAC",
        arity: Arity::Range(2, 3),
        arg_spec: ArgSpec::new(vec![ArgKind::Date, ArgKind::Date, ArgKind::Int]),
        return_type: ResultType::Number,
        flags: FunctionFlags::default(),
        custom_print: Some(yearfrac_print),
        eval_fn: yearfrac,
    });
}

/// Elides the trailing `basis` argument when it is the literal `0` (§4.6
/// default elision).
fn yearfrac_print(rendered: &[String]) -> Vec<String> {
    if rendered.len() == 3 && rendered[2] == "0" {
        rendered[..2].to_vec()
    } else {
        rendered.to_vec()
    }
}

fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .expect("valid month boundary")
        .pred_opt()
        .expect("month has at least one day")
}

/// Adds `months` to `date`, clamping the day-of-month to the target
/// month's length (so `EDATE(Jan 31, 1) = Feb 28/29`).
fn add_months(date: NaiveDate, months: i64) -> NaiveDate {
    let total = date.year() as i64 * 12 + (date.month() as i64 - 1) + months;
    let year = total.div_euclid(12) as i32;
    let month = (total.rem_euclid(12) + 1) as u32;
    let last_day = last_day_of_month(year, month).day();
    NaiveDate::from_ymd_opt(year, month, date.day().min(last_day)).expect("clamped day is valid")
}

/// Three-integer construction with Excel's month/day roll-over: excess
/// months carry into the year, excess days carry into later months.
fn date(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let y = ctx.int(&args[0], "DATE")?;
    let m = ctx.int(&args[1], "DATE")?;
    let d = ctx.int(&args[2], "DATE")?;

    let total_months = y * 12 + (m - 1);
    let year = total_months.div_euclid(12) as i32;
    let month = (total_months.rem_euclid(12) + 1) as u32;
    let first_of_month = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| EvalError::failed("DATE: invalid date components after normalization"))?;
    let result = first_of_month + Duration::days(d - 1);
    Ok(EvalValue::Date(result))
}

fn eomonth(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let d = ctx.date(&args[0], "EOMONTH")?;
    let months = ctx.int(&args[1], "EOMONTH")?;
    let shifted = add_months(d, months);
    Ok(EvalValue::Date(last_day_of_month(shifted.year(), shifted.month())))
}

fn edate(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let d = ctx.date(&args[0], "EDATE")?;
    let months = ctx.int(&args[1], "EDATE")?;
    Ok(EvalValue::Date(add_months(d, months)))
}

fn datedif(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let a = ctx.date(&args[0], "DATEDIF")?;
    let b = ctx.date(&args[1], "DATEDIF")?;
    let unit = ctx.text(&args[2])?.to_ascii_uppercase();

    let result = match unit.as_str() {
        "Y" => months_between(a, b) / 12,
        "M" => months_between(a, b),
        "D" => (b - a).num_days(),
        "MD" => {
            // Whole months ignored; day difference within the current month,
            // borrowing the previous month's length when `b`'s day precedes `a`'s.
            if b.day() >= a.day() {
                (b.day() - a.day()) as i64
            } else {
                let prev = add_months(b, -1);
                let prev_month_len = last_day_of_month(prev.year(), prev.month()).day();
                (prev_month_len + b.day() - a.day()) as i64
            }
        }
        "YM" => months_between(a, b) % 12,
        "YD" => {
            let same_year_anchor = NaiveDate::from_ymd_opt(b.year(), a.month(), a.day())
                .unwrap_or_else(|| NaiveDate::from_ymd_opt(b.year(), a.month() + 1, 1).expect("valid fallback"));
            if same_year_anchor <= b {
                (b - same_year_anchor).num_days()
            } else {
                let anchor = NaiveDate::from_ymd_opt(b.year() - 1, a.month(), a.day())
                    .unwrap_or(same_year_anchor);
                (b - anchor).num_days()
            }
        }
        other => return Err(EvalError::failed(format!("DATEDIF: unknown unit '{other}'"))),
    };
    Ok(EvalValue::Int(result))
}

fn months_between(a: NaiveDate, b: NaiveDate) -> i64 {
    let whole = (b.year() as i64 * 12 + b.month() as i64 - 1) - (a.year() as i64 * 12 + a.month() as i64 - 1);
    if b.day() < a.day() { whole - 1 } else { whole }
}

fn is_weekend(d: NaiveDate) -> bool {
    matches!(d.weekday(), Weekday::Sat | Weekday::Sun)
}

fn holiday_set(args: &[TExpr], ctx: &EvalCtx<'_>, idx: usize) -> Result<Vec<NaiveDate>, EvalError> {
    if args.len() <= idx {
        return Ok(Vec::new());
    }
    let cells = ctx.materialize(&args[idx])?;
    Ok(cells
        .into_iter()
        .flatten()
        .filter_map(|v| match v {
            formula_common::value::CellValue::DateTime(dt) => Some(dt.date()),
            _ => None,
        })
        .collect())
}

fn networkdays(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let s = ctx.date(&args[0], "NETWORKDAYS")?;
    let e = ctx.date(&args[1], "NETWORKDAYS")?;
    let holidays = holiday_set(args, ctx, 2)?;
    let (lo, hi, sign) = if s <= e { (s, e, 1) } else { (e, s, -1) };

    let mut count: i64 = 0;
    let mut cur = lo;
    while cur <= hi {
        if !is_weekend(cur) && !holidays.contains(&cur) {
            count += 1;
        }
        cur += Duration::days(1);
    }
    Ok(EvalValue::Int(count * sign))
}

fn workday(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let start = ctx.date(&args[0], "WORKDAY")?;
    let n = ctx.int(&args[1], "WORKDAY")?;
    let holidays = holiday_set(args, ctx, 2)?;

    let step = if n >= 0 { 1 } else { -1 };
    let mut remaining = n.abs();
    let mut cur = start;
    while remaining > 0 {
        cur += Duration::days(step);
        if !is_weekend(cur) && !holidays.contains(&cur) {
            remaining -= 1;
        }
    }
    Ok(EvalValue::Date(cur))
}

fn days_in_year(year: i32) -> i64 {
    if NaiveDate::from_ymd_opt(year, 2, 29).is_some() { 366 } else { 365 }
}

/// `basis`: 0 US 30/360 (NASD, day-31 adjusted), 1 Actual/Actual, 2
/// Actual/360, 3 Actual/365, 4 European 30/360.
fn yearfrac(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let s = ctx.date(&args[0], "YEARFRAC")?;
    let e = ctx.date(&args[1], "YEARFRAC")?;
    let basis = if args.len() > 2 { ctx.int(&args[2], "YEARFRAC")? } else { 0 };
    let (lo, hi) = if s <= e { (s, e) } else { (e, s) };

    let frac = match basis {
        0 => {
            let mut d1 = lo.day() as i64;
            let mut d2 = hi.day() as i64;
            if d1 == 31 {
                d1 = 30;
            }
            if d2 == 31 && d1 == 30 {
                d2 = 30;
            }
            let months = (hi.year() - lo.year()) as i64 * 12 + (hi.month() as i64 - lo.month() as i64);
            (months as f64 * 30.0 + (d2 - d1) as f64) / 360.0
        }
        1 => {
            let days = (hi - lo).num_days() as f64;
            let avg_year = (days_in_year(lo.year()) + days_in_year(hi.year())) as f64 / 2.0;
            days / avg_year
        }
        2 => (hi - lo).num_days() as f64 / 360.0,
        3 => (hi - lo).num_days() as f64 / 365.0,
        4 => {
            let d1 = if lo.day() == 31 { 30 } else { lo.day() as i64 };
            let d2 = if hi.day() == 31 { 30 } else { hi.day() as i64 };
            ((hi.year() - lo.year()) as f64 * 360.0 + (hi.month() as i64 - lo.month() as i64) as f64 * 30.0 + (d2 - d1) as f64) / 360.0
        }
        other => return Err(EvalError::failed(format!("YEARFRAC: unsupported basis {other}"))),
    };
    Ok(EvalValue::Number(
        rust_decimal::Decimal::from_f64_retain(frac).unwrap_or(rust_decimal::Decimal::ZERO),
    ))
}
