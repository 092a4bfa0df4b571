//! Error-handling predicates (§4.4): `IFERROR`, `ISERROR`, `ISERR`. These
//! are the only builtins whose whole purpose is to observe a child
//! expression's error *without* propagating it, so each reaches for
//! `ctx.eval` directly rather than the decoder helpers the other families use.

use crate::ast::{ResultType, TExpr};
use crate::error::EvalError;
use crate::eval_value::EvalValue;
use crate::function::{ArgKind, ArgSpec, Arity, FunctionFlags, FunctionRegistry, FunctionSpec};
use crate::interpreter::EvalCtx;

pub fn register(reg: &mut FunctionRegistry) {
    reg.register(FunctionSpec {
        name: "IFERROR",
        arity: Arity::Exact(2),
        arg_spec: ArgSpec::new(vec![ArgKind::Any, ArgKind::Any]),
        return_type: ResultType::Any,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: iferror,
    });
    reg.register(FunctionSpec {
        name: "ISERROR",
        arity: Arity::Exact(1),
        arg_spec: ArgSpec::new(vec![ArgKind::Any]),
        return_type: ResultType::Bool,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: iserror,
    });
    reg.register(FunctionSpec {
        name: "ISERR",
        arity: Arity::Exact(1),
        arg_spec: ArgSpec::new(vec![ArgKind::Any]),
        return_type: ResultType::Bool,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: iserr,
    });
}

/// Evaluates `args[1]` only when `args[0]` fails (§4.4): short-circuits the
/// fallback on success, matching `And`/`Or`'s short-circuit evaluation.
fn iferror(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    match ctx.eval(&args[0]) {
        Ok(v) if !v.is_error() => Ok(v),
        _ => ctx.eval(&args[1]),
    }
}

/// True for any error, including `#N/A` (§4.4).
fn iserror(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let errored = match ctx.eval(&args[0]) {
        Ok(v) => v.is_error(),
        Err(_) => true,
    };
    Ok(EvalValue::Bool(errored))
}

/// Like `ISERROR` but `#N/A` is not considered an error (§4.4).
fn iserr(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let is_na = |v: &EvalValue| matches!(v, EvalValue::Error(formula_common::value::ErrorKind::Na));
    let errored = match ctx.eval(&args[0]) {
        Ok(v) => v.is_error() && !is_na(&v),
        Err(e) => e.as_cell_error() != formula_common::value::ErrorKind::Na,
    };
    Ok(EvalValue::Bool(errored))
}
