//! The module contains the errors the engine can return.
//!
//! Only structural problems cross the engine boundary as [`EngineError`]:
//!
//! - [`TemplateNotFound`] returned when a template lookup yields nothing.
//! - [`TemplateInactive`] returned when the template exists but is disabled.
//!
//! Formula problems are [`FormulaError`]s, wrapped with their owner in an
//! [`EvaluationError`]. The orchestrator folds them into the returned
//! [`CalculationResult`] instead of propagating them.
//!
//!  [`TemplateNotFound`]: EngineError::TemplateNotFound
//!  [`TemplateInactive`]: EngineError::TemplateInactive
//!  [`CalculationResult`]: crate::CalculationResult
use thiserror::Error;
use uuid::Uuid;

/// Engine boundary errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("template \"{0}\" not found!")]
    TemplateNotFound(Uuid),
    #[error("template \"{0}\" is not active")]
    TemplateInactive(Uuid),
    #[error("repository error: {0}")]
    Repository(String),
    #[error("calculation task failed: {0}")]
    Task(String),
}

/// Failure raised while parsing or evaluating a single formula.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("formula is longer than {max} bytes")]
    TooLong { max: usize },
    #[error("expression is nested deeper than {max} levels")]
    TooDeep { max: usize },
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("function '{name}' expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: &'static str,
        got: usize,
    },
    #[error("type error: {0}")]
    Type(String),
    #[error("non-finite numeric result in {0}")]
    NonFinite(String),
}

impl FormulaError {
    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }
}

/// A [`FormulaError`] tagged with the formula it came from: the template's
/// primary formula or the name of the derived parameter.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("formula '{owner}': {cause}")]
pub struct EvaluationError {
    pub owner: String,
    #[source]
    pub cause: FormulaError,
}

impl EvaluationError {
    pub fn new(owner: impl Into<String>, cause: FormulaError) -> Self {
        Self {
            owner: owner.into(),
            cause,
        }
    }
}
