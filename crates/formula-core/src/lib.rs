//! Convenience facade over the addressing, evaluation, and parsing crates.
//!
//! Mirrors the split of `formula-common` / `formula-eval` / `formula-parse`
//! into one re-exported surface so a host only needs a single dependency.

pub use formula_common::{address, codec, value};
pub use formula_eval::{aggregate, ast, dependency, function, print, shift};
pub use formula_parse::{resolve, tokenizer, ParsingError, ResolveError};

use formula_eval::ast::TExpr;
use formula_eval::function::FunctionRegistry;

/// Parses and resolves a formula body (without the leading `=`) against
/// `registry`, producing a fully typed expression tree.
///
/// Composes [`formula_parse::parse`] and [`formula_parse::resolve`], the two
/// halves of the external parsing contract.
pub fn parse_formula(
    text: &str,
    registry: &FunctionRegistry,
) -> Result<TExpr, ParseFormulaError> {
    let ast = formula_parse::parse(text).map_err(ParseFormulaError::Syntax)?;
    formula_parse::resolve(&ast, registry).map_err(ParseFormulaError::Resolve)
}

#[derive(Debug)]
pub enum ParseFormulaError {
    Syntax(ParsingError),
    Resolve(ResolveError),
}

impl std::fmt::Display for ParseFormulaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseFormulaError::Syntax(e) => write!(f, "{e}"),
            ParseFormulaError::Resolve(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ParseFormulaError {}
