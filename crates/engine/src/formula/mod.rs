//! Restricted expression language used by template formulas.
//!
//! The grammar is a side-effect free subset of JavaScript expressions:
//! arithmetic, comparisons, logical operators, conditionals, member access,
//! array and object literals and calls to an allow-list of builtins. There is
//! no assignment, no statement, no loop and no access to anything outside the
//! evaluation scope.
use std::collections::BTreeSet;

use crate::error::FormulaError;
use crate::value::{Value, Values};

pub mod ast;
mod eval;
mod functions;
mod parser;
mod token;

pub use functions::BUILTINS;

/// Bounds applied before a formula is evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormulaLimits {
    /// Longest accepted source, in bytes.
    pub max_length: usize,
    /// Deepest accepted expression tree. Operator chains such as `a + b + c`
    /// count one level per operator.
    pub max_depth: usize,
}

impl Default for FormulaLimits {
    fn default() -> Self {
        Self {
            max_length: 4096,
            max_depth: 64,
        }
    }
}

/// A parsed formula, ready to be evaluated any number of times.
///
/// ```rust
/// use engine::{Formula, FormulaLimits, Value, Values};
///
/// let formula = Formula::parse("Math.ceil(area / 2.5)", &FormulaLimits::default()).unwrap();
/// let scope = Values::from([("area".to_string(), Value::Number(6.0))]);
/// assert_eq!(formula.evaluate(&scope), Ok(Value::Number(3.0)));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Formula {
    source: String,
    expr: ast::Expr,
}

impl Formula {
    pub fn parse(source: &str, limits: &FormulaLimits) -> Result<Self, FormulaError> {
        let expr = parser::parse(source, limits)?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &ast::Expr {
        &self.expr
    }

    pub fn evaluate(&self, scope: &Values) -> Result<Value, FormulaError> {
        self.evaluate_in(&[scope])
    }

    /// Evaluates against a layered scope. A name resolves in the first layer
    /// that defines it.
    pub fn evaluate_in(&self, layers: &[&Values]) -> Result<Value, FormulaError> {
        eval::Evaluator::new(layers).eval(&self.expr)
    }

    /// Context variables the formula reads.
    pub fn references(&self) -> BTreeSet<String> {
        self.expr.references()
    }
}
