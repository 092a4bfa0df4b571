//! The function registry (§4.3): every non-primitive spreadsheet function
//! is described once, as data, and dispatched through the generic
//! `TExpr::Call { spec, args }` node.
//!
//! The registry is a single-threaded `FxHashMap` behind `once_cell::sync::Lazy`
//! since this core never mutates it after startup (§9 "Function registry as data").

use std::sync::Arc;

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

use crate::ast::{ResultType, TExpr};
use crate::error::EvalError;
use crate::interpreter::EvalCtx;
use crate::eval_value::EvalValue;

/// How many arguments a function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Range(usize, usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => n == k,
            Arity::Range(lo, hi) => n >= lo && n <= hi,
            Arity::AtLeast(k) => n >= k,
        }
    }
}

/// The coercion contract an argument position expects, used by the resolver
/// to pick the `DecoderKind` of any bare reference landing in that slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Number,
    Int,
    Text,
    Bool,
    Date,
    DateTime,
    /// A range argument (`SUMIF`'s criteria range, `VLOOKUP`'s table, ...).
    /// Single-cell references widen to a 1x1 range.
    Range,
    /// No particular coercion; resolved with the resolved-value decoder.
    Any,
}

/// Per-position argument description for a `FunctionSpec`. `fixed` gives the
/// kind of each positional argument; `variadic`, if present, is the kind
/// every argument past `fixed.len()` is resolved as (e.g. `SUMIFS`'
/// repeating `(range, criterion)` pairs, modeled as one shared kind).
#[derive(Debug, Clone)]
pub struct ArgSpec {
    pub fixed: Vec<ArgKind>,
    pub variadic: Option<ArgKind>,
}

impl ArgSpec {
    pub fn new(fixed: Vec<ArgKind>) -> Self {
        ArgSpec { fixed, variadic: None }
    }

    pub fn with_variadic(fixed: Vec<ArgKind>, variadic: ArgKind) -> Self {
        ArgSpec { fixed, variadic: Some(variadic) }
    }

    /// The coercion kind for argument position `i` (0-based).
    pub fn kind_at(&self, i: usize) -> ArgKind {
        self.fixed
            .get(i)
            .copied()
            .or(self.variadic)
            .unwrap_or(ArgKind::Any)
    }
}

/// Flags describing presentation hints for a function's result (§4.3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctionFlags {
    pub returns_date: bool,
    pub returns_time: bool,
}

/// A function's printer renders `args` (already printed) into the
/// `NAME(...)` argument list; the default renderer joins with `, `, but
/// functions like `YEARFRAC` need conditional elision of default-valued
/// trailing arguments (§4.6).
pub type CustomPrinter = fn(rendered_args: &[String]) -> Vec<String>;

pub type EvalFn = fn(args: &[TExpr], ctx: &EvalCtx) -> Result<EvalValue, EvalError>;

/// The data describing one spreadsheet function (§4.3).
pub struct FunctionSpec {
    pub name: &'static str,
    pub arity: Arity,
    pub arg_spec: ArgSpec,
    pub return_type: ResultType,
    pub flags: FunctionFlags,
    pub custom_print: Option<CustomPrinter>,
    pub eval_fn: EvalFn,
}

impl std::fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionSpec").field("name", &self.name).finish()
    }
}

impl PartialEq for FunctionSpec {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// A process-wide, read-only table of function specs, keyed by canonical
/// uppercase name (§9 "Function registry as data").
#[derive(Default)]
pub struct FunctionRegistry {
    entries: FxHashMap<&'static str, Arc<FunctionSpec>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        FunctionRegistry { entries: FxHashMap::default() }
    }

    pub fn register(&mut self, spec: FunctionSpec) {
        self.entries.insert(spec.name, Arc::new(spec));
    }

    pub fn get(&self, name: &str) -> Option<Arc<FunctionSpec>> {
        self.entries.get(name.to_ascii_uppercase().as_str()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name.to_ascii_uppercase().as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }
}

/// The default registry, populated once with every builtin in
/// `crate::builtins` (§9: "global, read-only, initialized before first
/// use").
pub static DEFAULT_REGISTRY: Lazy<FunctionRegistry> = Lazy::new(|| {
    let mut reg = FunctionRegistry::new();
    crate::builtins::register_all(&mut reg);
    reg
});
