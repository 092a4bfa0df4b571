//! Type-check predicates (§4.4): `ISNUMBER`, `ISTEXT`, `ISBLANK`. None of
//! these propagate an evaluation failure as a failure — a failing child
//! expression simply isn't a number/text/blank, same rule `ISERROR`/`ISERR`
//! apply to errors specifically.

use crate::ast::{ResultType, TExpr};
use crate::error::EvalError;
use crate::eval_value::EvalValue;
use crate::function::{ArgKind, ArgSpec, Arity, FunctionFlags, FunctionRegistry, FunctionSpec};
use crate::interpreter::EvalCtx;

pub fn register(reg: &mut FunctionRegistry) {
    let predicate = |name, eval_fn| FunctionSpec {
        name,
        arity: Arity::Exact(1),
        arg_spec: ArgSpec::new(vec![ArgKind::Any]),
        return_type: ResultType::Bool,
        flags: FunctionFlags::default(),
        custom_print: None,
        eval_fn,
    };
    reg.register(predicate("ISNUMBER", isnumber));
    reg.register(predicate("ISTEXT", istext));
    reg.register(predicate("ISBLANK", isblank));
}

fn isnumber(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let is_number = matches!(ctx.eval(&args[0]), Ok(EvalValue::Number(_)) | Ok(EvalValue::Int(_)));
    Ok(EvalValue::Bool(is_number))
}

fn istext(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let is_text = matches!(ctx.eval(&args[0]), Ok(EvalValue::Text(_)));
    Ok(EvalValue::Bool(is_text))
}

fn isblank(args: &[TExpr], ctx: &EvalCtx<'_>) -> Result<EvalValue, EvalError> {
    let is_blank = matches!(ctx.eval(&args[0]), Ok(EvalValue::Empty));
    Ok(EvalValue::Bool(is_blank))
}
