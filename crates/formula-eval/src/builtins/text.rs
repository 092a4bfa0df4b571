//! Text functions (§4.4): `LEFT`/`RIGHT` substring extraction. Other
//! string manipulation is covered by the dedicated `TExpr::Concat` node,
//! not a generic `Call`.

use crate::ast::ResultType;
use crate::error::EvalError;
use crate::eval_value::EvalValue;
use crate::function::{ArgKind, ArgSpec, Arity, FunctionFlags, FunctionRegistry, FunctionSpec};
use crate::interpreter::EvalCtx;
use crate::ast::TExpr;

pub fn register(reg: &mut FunctionRegistry) {
    reg.register(FunctionSpec {
        name: "LEFT",
        arity: Arity::Exact(2),
        arg_spec: ArgSpec::new(vec![ArgKind::Text, ArgKind::Int]),
        return_type: ResultType::Text,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: left,
    });
    reg.register(FunctionSpec {
        name: "RIGHT",
        arity: Arity::Exact(2),
        arg_spec: ArgSpec::new(vec![ArgKind::Text, ArgKind::Int]),
        return_type: ResultType::Text,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn: right,
    });
}

fn substring_n(args: &[TExpr], ctx: &EvalCtx<'_>, fn_name: &str) -> Result<(String, usize), EvalError> {
    let text = ctx.text(&args[0])?;
    let n = ctx.int(&args[1], fn_name)?;
    if n < 0 {
        return Err(EvalError::failed(format!("{fn_name}: count must be non-negative")));
    }
    Ok((text, n as usize))
}

/// `n<0` -> error; `n>=len` -> the whole text; else the first `n` chars.
fn left(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let (text, n) = substring_n(args, ctx, "LEFT")?;
    let taken: String = text.chars().take(n).collect();
    Ok(EvalValue::Text(taken))
}

fn right(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let (text, n) = substring_n(args, ctx, "RIGHT")?;
    let chars: Vec<char> = text.chars().collect();
    let start = chars.len().saturating_sub(n);
    Ok(EvalValue::Text(chars[start..].iter().collect()))
}
