//! The builtin function table (§4.4): one module per family.
//! Each submodule's `register` populates the shared [`FunctionRegistry`];
//! `register_all` is the single entry point `function::DEFAULT_REGISTRY`
//! calls at first use.

mod datetime;
mod financial;
mod info;
mod logical;
mod lookup;
mod math;
mod reference;
mod stats;
mod text;

use rust_decimal::Decimal;

use formula_common::codec::decode_numeric_lenient;

use crate::ast::TExpr;
use crate::error::EvalError;
use crate::function::FunctionRegistry;
use crate::interpreter::EvalCtx;

pub fn register_all(reg: &mut FunctionRegistry) {
    text::register(reg);
    math::register(reg);
    datetime::register(reg);
    financial::register(reg);
    lookup::register(reg);
    logical::register(reg);
    stats::register(reg);
    info::register(reg);
    reference::register(reg);
}

/// Collects the numeric cells of a range argument in row-major order,
/// silently skipping anything that doesn't decode numerically (§4.4's
/// skip-non-numeric rule). Shared by the statistical and financial
/// functions that fold over a single range (`MEDIAN`, `NPV`, `IRR`, ...).
pub(crate) fn numeric_cells(ctx: &EvalCtx<'_>, expr: &TExpr) -> Result<Vec<Decimal>, EvalError> {
    let (sheet, range) = ctx.range_bounds(expr)?;
    Ok(range
        .cells()
        .filter_map(|addr| decode_numeric_lenient(&sheet.get(addr)))
        .collect())
}
