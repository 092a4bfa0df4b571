//! Descriptive statistics and criterion-driven conditional aggregates
//! (§4.4, §6): `MEDIAN`, `STDEV`/`STDEVP`, `VAR`/`VARP`, `COUNTA`,
//! `COUNTBLANK`, and the `SUMIF`/`COUNTIF`/`AVERAGEIF` family (including
//! their plural `*IFS` forms), which share a small criterion grammar.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use formula_common::value::CellValue;

use crate::ast::{ResultType, TExpr};
use crate::error::EvalError;
use crate::eval_value::EvalValue;
use crate::function::{ArgKind, ArgSpec, Arity, FunctionFlags, FunctionRegistry, FunctionSpec};
use crate::interpreter::EvalCtx;

pub fn register(reg: &mut FunctionRegistry) {
    let stat = |name, min_n, eval_fn| FunctionSpec {
        name,
        arity: Arity::AtLeast(min_n),
        arg_spec: ArgSpec::with_variadic(vec![], ArgKind::Range),
        return_type: ResultType::Number,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn,
    };
    reg.register(stat("MEDIAN", 1, median));
    reg.register(stat("STDEV", 1, stdev));
    reg.register(stat("STDEVP", 1, stdevp));
    reg.register(stat("VAR", 1, var));
    reg.register(stat("VARP", 1, varp));

    reg.register(FunctionSpec {
        name: "COUNTA",
        arity: Arity::AtLeast(1),
        arg_spec: ArgSpec::with_variadic(vec![], ArgKind::Range),
        return_type: ResultType::Int,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: counta,
    });
    reg.register(FunctionSpec {
        name: "COUNTBLANK",
        arity: Arity::Exact(1),
        arg_spec: ArgSpec::new(vec![ArgKind::Range]),
        return_type: ResultType::Int,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: countblank,
    });

    reg.register(FunctionSpec {
        name: "SUMIF",
        arity: Arity::Range(2, 3),
        arg_spec: ArgSpec::new(vec![ArgKind::Range, ArgKind::Any, ArgKind::Range]),
        return_type: ResultType::Number,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: sumif,
    });
    reg.register(FunctionSpec {
        name: "COUNTIF",
        arity: Arity::Exact(2),
        arg_spec: ArgSpec::new(vec![ArgKind::Range, ArgKind::Any]),
        return_type: ResultType::Int,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: countif,
    });
    reg.register(FunctionSpec {
        name: "AVERAGEIF",
        arity: Arity::Range(2, 3),
        arg_spec: ArgSpec::new(vec![ArgKind::Range, ArgKind::Any, ArgKind::Range]),
        return_type: ResultType::Number,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: averageif,
    });
    reg.register(FunctionSpec {
        name: "SUMIFS",
        arity: Arity::AtLeast(3),
        arg_spec: ArgSpec::with_variadic(vec![ArgKind::Range], ArgKind::Any),
        return_type: ResultType::Number,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: sumifs,
    });
    reg.register(FunctionSpec {
        name: "COUNTIFS",
        arity: Arity::AtLeast(2),
        arg_spec: ArgSpec::with_variadic(vec![], ArgKind::Any),
        return_type: ResultType::Int,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: countifs,
    });
    reg.register(FunctionSpec {
        name: "AVERAGEIFS",
        arity: Arity::AtLeast(3),
        arg_spec: ArgSpec::with_variadic(vec![ArgKind::Range], ArgKind::Any),
        return_type: ResultType::Number,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: averageifs,
    });
}

fn numeric_samples(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<Vec<Decimal>, EvalError> {
    let mut samples = Vec::new();
    for a in args {
        samples.extend(super::numeric_cells(ctx, a)?);
    }
    Ok(samples)
}

fn require_min(samples: &[Decimal], n: usize, fn_name: &str) -> Result<(), EvalError> {
    if samples.len() < n {
        Err(EvalError::failed_with_context(
            format!("{fn_name}: not enough numeric samples"),
            format!("need at least {n}, found {}", samples.len()),
        ))
    } else {
        Ok(())
    }
}

fn mean(samples: &[Decimal]) -> Decimal {
    samples.iter().sum::<Decimal>() / Decimal::from(samples.len())
}

fn sum_sq_dev(samples: &[Decimal]) -> Decimal {
    let m = mean(samples);
    samples.iter().map(|x| (*x - m) * (*x - m)).sum()
}

fn median(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let mut samples = numeric_samples(args, ctx)?;
    require_min(&samples, 1, "MEDIAN")?;
    samples.sort();
    let mid = samples.len() / 2;
    let value = if samples.len() % 2 == 0 {
        (samples[mid - 1] + samples[mid]) / Decimal::TWO
    } else {
        samples[mid]
    };
    Ok(EvalValue::Number(value))
}

fn var(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let samples = numeric_samples(args, ctx)?;
    require_min(&samples, 2, "VAR")?;
    Ok(EvalValue::Number(sum_sq_dev(&samples) / Decimal::from(samples.len() - 1)))
}

fn varp(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let samples = numeric_samples(args, ctx)?;
    require_min(&samples, 1, "VARP")?;
    Ok(EvalValue::Number(sum_sq_dev(&samples) / Decimal::from(samples.len())))
}

fn stdev(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let samples = numeric_samples(args, ctx)?;
    require_min(&samples, 2, "STDEV")?;
    let variance = sum_sq_dev(&samples) / Decimal::from(samples.len() - 1);
    variance
        .sqrt()
        .map(EvalValue::Number)
        .ok_or_else(|| EvalError::failed("STDEV: failed to converge"))
}

fn stdevp(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let samples = numeric_samples(args, ctx)?;
    require_min(&samples, 1, "STDEVP")?;
    let variance = sum_sq_dev(&samples) / Decimal::from(samples.len());
    variance
        .sqrt()
        .map(EvalValue::Number)
        .ok_or_else(|| EvalError::failed("STDEVP: failed to converge"))
}

fn counta(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let mut count = 0i64;
    for a in args {
        let (sheet, range) = ctx.range_bounds(a)?;
        for addr in range.cells() {
            if !is_blank(&sheet.get(addr).value) {
                count += 1;
            }
        }
    }
    Ok(EvalValue::Int(count))
}

fn countblank(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let (sheet, range) = ctx.range_bounds(&args[0])?;
    let count = range.cells().filter(|addr| is_blank(&sheet.get(*addr).value)).count();
    Ok(EvalValue::Int(count as i64))
}

fn is_blank(v: &CellValue) -> bool {
    matches!(v, CellValue::Empty) || matches!(v, CellValue::Text(s) if s.is_empty())
}

/// The criterion grammar (§6): an exact match, a comparison operator applied
/// to a numeric right-hand side, or a `*`/`?` wildcard glob with `~` escaping.
/// Examples: `5`, `">=10"`, `"<>"`, `"a*"`, `"~*literal"`.
enum Criterion {
    Exact(EvalValue),
    Comparison(CmpOp, Decimal),
    NotBlank,
    Wildcard(String),
}

#[derive(Clone, Copy)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

fn parse_criterion(raw: &EvalValue) -> Criterion {
    let text = match raw {
        EvalValue::Text(s) => s.clone(),
        other => return Criterion::Exact(other.clone()),
    };
    if text == "<>" {
        return Criterion::NotBlank;
    }
    for (prefix, op) in [
        (">=", CmpOp::Gte),
        ("<=", CmpOp::Lte),
        ("<>", CmpOp::Ne),
        (">", CmpOp::Gt),
        ("<", CmpOp::Lt),
        ("=", CmpOp::Eq),
    ] {
        if let Some(rest) = text.strip_prefix(prefix) {
            if let Ok(n) = Decimal::from_str(rest.trim()) {
                return Criterion::Comparison(op, n);
            }
        }
    }
    if text.contains('*') || text.contains('?') || text.contains('~') {
        Criterion::Wildcard(text)
    } else if let Ok(n) = Decimal::from_str(&text) {
        Criterion::Comparison(CmpOp::Eq, n)
    } else {
        Criterion::Exact(EvalValue::Text(text))
    }
}

fn criterion_matches(criterion: &Criterion, cell: &CellValue) -> bool {
    match criterion {
        Criterion::NotBlank => !is_blank(cell),
        Criterion::Exact(v) => crate::interpreter::structural_eq(v, &EvalValue::from_cell_value(cell)),
        Criterion::Comparison(op, rhs) => {
            let lhs = match cell {
                CellValue::Number(n) => *n,
                CellValue::Bool(b) => if *b { Decimal::ONE } else { Decimal::ZERO },
                _ => return false,
            };
            match op {
                CmpOp::Eq => lhs == *rhs,
                CmpOp::Ne => lhs != *rhs,
                CmpOp::Lt => lhs < *rhs,
                CmpOp::Lte => lhs <= *rhs,
                CmpOp::Gt => lhs > *rhs,
                CmpOp::Gte => lhs >= *rhs,
            }
        }
        Criterion::Wildcard(pattern) => {
            let candidate = cell_text(cell);
            glob_match(&pattern.to_ascii_lowercase(), &candidate.to_ascii_lowercase())
        }
    }
}

fn cell_text(v: &CellValue) -> String {
    match v {
        CellValue::Text(s) => s.clone(),
        CellValue::RichText(segs) => segs.iter().map(|s| s.text.as_str()).collect(),
        CellValue::Number(n) => n.normalize().to_string(),
        CellValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        _ => String::new(),
    }
}

/// `*` matches any run of characters, `?` matches exactly one, `~` escapes
/// the following wildcard character as a literal.
pub(crate) fn glob_match(pattern: &str, candidate: &str) -> bool {
    let tokens = tokenize_glob(pattern);
    let candidate: Vec<char> = candidate.chars().collect();
    glob_match_tokens(&tokens, &candidate)
}

enum GlobTok {
    Literal(char),
    AnyOne,
    AnyRun,
}

fn tokenize_glob(pattern: &str) -> Vec<GlobTok> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '~' => {
                if let Some(escaped) = chars.next() {
                    tokens.push(GlobTok::Literal(escaped));
                }
            }
            '*' => tokens.push(GlobTok::AnyRun),
            '?' => tokens.push(GlobTok::AnyOne),
            other => tokens.push(GlobTok::Literal(other)),
        }
    }
    tokens
}

fn glob_match_tokens(tokens: &[GlobTok], candidate: &[char]) -> bool {
    match tokens.first() {
        None => candidate.is_empty(),
        Some(GlobTok::Literal(lit)) => {
            matches!(candidate.first(), Some(c) if c == lit) && glob_match_tokens(&tokens[1..], &candidate[1..])
        }
        Some(GlobTok::AnyOne) => !candidate.is_empty() && glob_match_tokens(&tokens[1..], &candidate[1..]),
        Some(GlobTok::AnyRun) => {
            (0..=candidate.len()).any(|split| glob_match_tokens(&tokens[1..], &candidate[split..]))
        }
    }
}

/// Reads `(range, criterion_expr)` pairs starting at `start`, returning the
/// set of matching row/col offsets within `shape` (all criterion ranges
/// must share its dimensions, per §6).
fn matching_offsets(
    args: &[TExpr],
    ctx: &EvalCtx<'_>,
    start: usize,
    shape: (usize, usize),
    fn_name: &str,
) -> Result<Vec<(usize, usize)>, EvalError> {
    let mut offsets: Option<Vec<(usize, usize)>> = None;
    let mut i = start;
    while i + 1 < args.len() {
        let grid = ctx.materialize(&args[i])?;
        if (grid.len(), grid.first().map(|r| r.len()).unwrap_or(0)) != shape {
            return Err(EvalError::failed_with_context(
                format!("{fn_name}: criterion range dimensions must match"),
                format!("expected {}x{}", shape.0, shape.1),
            ));
        }
        let criterion_value = ctx.eval(&args[i + 1])?;
        let criterion = parse_criterion(&criterion_value);
        let hits: Vec<(usize, usize)> = (0..shape.0)
            .flat_map(|r| (0..shape.1).map(move |c| (r, c)))
            .filter(|(r, c)| criterion_matches(&criterion, &grid[*r][*c]))
            .collect();
        offsets = Some(match offsets {
            None => hits,
            Some(prev) => prev.into_iter().filter(|o| hits.contains(o)).collect(),
        });
        i += 2;
    }
    Ok(offsets.unwrap_or_default())
}

fn cell_at(grid: &[Vec<CellValue>], pos: (usize, usize)) -> &CellValue {
    &grid[pos.0][pos.1]
}

/// `Bool -> 0/1`, `Text`/`Empty` -> `0`, `Number` passed through; the
/// `CellValue`-side counterpart of `codec::coerce_to_numeric` since
/// `ctx.materialize` has already resolved cells down to bare values.
fn coerce_numeric(v: &CellValue) -> Decimal {
    match v {
        CellValue::Number(n) => *n,
        CellValue::Bool(b) => if *b { Decimal::ONE } else { Decimal::ZERO },
        _ => Decimal::ZERO,
    }
}

fn sumif(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let range_grid = ctx.materialize(&args[0])?;
    let shape = (range_grid.len(), range_grid.first().map(|r| r.len()).unwrap_or(0));
    let sum_grid = if args.len() > 2 { ctx.materialize(&args[2])? } else { range_grid.clone() };
    let offsets = matching_offsets(&args[..2], ctx, 0, shape, "SUMIF")?;
    let total: Decimal = offsets.iter().map(|pos| coerce_numeric(cell_at(&sum_grid, *pos))).sum();
    Ok(EvalValue::Number(total))
}

fn countif(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let grid = ctx.materialize(&args[0])?;
    let shape = (grid.len(), grid.first().map(|r| r.len()).unwrap_or(0));
    let offsets = matching_offsets(args, ctx, 0, shape, "COUNTIF")?;
    Ok(EvalValue::Int(offsets.len() as i64))
}

fn averageif(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let range_grid = ctx.materialize(&args[0])?;
    let shape = (range_grid.len(), range_grid.first().map(|r| r.len()).unwrap_or(0));
    let avg_grid = if args.len() > 2 { ctx.materialize(&args[2])? } else { range_grid.clone() };
    let offsets = matching_offsets(&args[..2], ctx, 0, shape, "AVERAGEIF")?;
    if offsets.is_empty() {
        return Err(EvalError::DivByZero { numerator: "0".to_string(), denominator: "0".to_string() });
    }
    let total: Decimal = offsets
        .iter()
        .map(|pos| coerce_numeric(cell_at(&avg_grid, *pos)))
        .sum();
    Ok(EvalValue::Number(total / Decimal::from(offsets.len())))
}

fn sumifs(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let sum_grid = ctx.materialize(&args[0])?;
    let shape = (sum_grid.len(), sum_grid.first().map(|r| r.len()).unwrap_or(0));
    let offsets = matching_offsets(args, ctx, 1, shape, "SUMIFS")?;
    let total: Decimal = offsets
        .iter()
        .map(|pos| coerce_numeric(cell_at(&sum_grid, *pos)))
        .sum();
    Ok(EvalValue::Number(total))
}

fn countifs(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let first_grid = ctx.materialize(&args[0])?;
    let shape = (first_grid.len(), first_grid.first().map(|r| r.len()).unwrap_or(0));
    let offsets = matching_offsets(args, ctx, 0, shape, "COUNTIFS")?;
    Ok(EvalValue::Int(offsets.len() as i64))
}

fn averageifs(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let avg_grid = ctx.materialize(&args[0])?;
    let shape = (avg_grid.len(), avg_grid.first().map(|r| r.len()).unwrap_or(0));
    let offsets = matching_offsets(args, ctx, 1, shape, "AVERAGEIFS")?;
    if offsets.is_empty() {
        return Err(EvalError::DivByZero { numerator: "0".to_string(), denominator: "0".to_string() });
    }
    let total: Decimal = offsets
        .iter()
        .map(|pos| coerce_numeric(cell_at(&avg_grid, *pos)))
        .sum();
    Ok(EvalValue::Number(total / Decimal::from(offsets.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_star_matches_any_run() {
        assert!(glob_match("a*z", "aqqqz"));
        assert!(glob_match("a*z", "az"));
        assert!(!glob_match("a*z", "ay"));
    }

    #[test]
    fn glob_question_matches_single_char() {
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
    }

    #[test]
    fn glob_tilde_escapes_wildcard() {
        assert!(glob_match("100~%", "100%"));
        assert!(!glob_match("100~%", "100x"));
    }

    #[test]
    fn criterion_comparison_parses_operator_prefix() {
        match parse_criterion(&EvalValue::Text(">=10".to_string())) {
            Criterion::Comparison(CmpOp::Gte, n) => assert_eq!(n, Decimal::from(10)),
            _ => panic!("expected a Comparison criterion"),
        }
    }
}
