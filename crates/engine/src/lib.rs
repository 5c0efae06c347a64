//! Calculation template engine.
//!
//! A [`TemplateDefinition`] declares typed INPUT, INTERNAL and OUTPUT
//! parameters and a primary formula. [`Engine::execute_calculation`] validates
//! the inputs, derives the internals, evaluates the primary formula and the
//! outputs, and always answers with a [`CalculationResult`].
//!
//! ```rust
//! use engine::{DataType, Engine, ParameterDefinition, TemplateDefinition, Value, Values};
//!
//! let template = TemplateDefinition::new("Double", "x * 2")
//!     .parameter(ParameterDefinition::input("x", DataType::Number).required().range(0.0, 10.0));
//! let inputs = Values::from([("x".to_string(), Value::from(5))]);
//!
//! let result = Engine::builder().build().execute_calculation(&template, &inputs);
//! assert!(result.was_successful);
//! assert_eq!(result.results["resultado"], Value::from(10));
//! ```

pub use calculation::{CalculationResult, Failure, Stage, StageKind, StageProbe};
pub use context::EvaluationContext;
pub use error::{EngineError, EvaluationError, FormulaError};
pub use formula::{BUILTINS, Formula, FormulaLimits};
pub use ordering::{DependencyCycle, EvaluationOrder};
pub use parameters::{DataType, ParameterDefinition, ParameterScope};
pub use preview::{Preview, synthesize_inputs};
pub use repository::{
    MemoryResults, MemoryTemplates, PersistedResult, ResultRecord, ResultRepository,
    TemplateRepository,
};
pub use service::CalculationService;
pub use templates::{PRIMARY_RESULT_KEY, TemplateDefinition, TemplateIssue};
pub use validation::{ValidationReport, validate_input_parameters};
pub use value::{Value, Values, parse_date};

mod calculation;
mod context;
mod error;
pub mod formula;
mod ordering;
mod parameters;
mod preview;
mod repository;
mod service;
mod templates;
mod validation;
mod value;

type ResultEngine<T> = Result<T, EngineError>;

/// Stateless entry point holding only configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Engine {
    limits: FormulaLimits,
    order: EvaluationOrder,
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn limits(&self) -> FormulaLimits {
        self.limits
    }

    pub fn evaluation_order(&self) -> EvaluationOrder {
        self.order
    }

    /// Checks raw inputs against the INPUT parameters in `params`.
    pub fn validate_input_parameters(
        &self,
        params: &[ParameterDefinition],
        values: &Values,
    ) -> ValidationReport {
        validation::validate_input_parameters(params, values)
    }

    /// Runs `template` against `inputs`. Failures are reported inside the
    /// returned result, never as an error.
    pub fn execute_calculation(
        &self,
        template: &TemplateDefinition,
        inputs: &Values,
    ) -> CalculationResult {
        calculation::run(template, inputs, &self.limits, self.order, None)
    }

    /// Same as [`execute_calculation`], recording every stage transition in
    /// `probe`.
    ///
    /// [`execute_calculation`]: Engine::execute_calculation
    pub fn execute_calculation_probed(
        &self,
        template: &TemplateDefinition,
        inputs: &Values,
        probe: &StageProbe,
    ) -> CalculationResult {
        calculation::run(template, inputs, &self.limits, self.order, Some(probe))
    }

    /// Dry run with synthesized sample inputs. Never fails.
    pub fn generate_preview(&self, template: &TemplateDefinition) -> Preview {
        self.generate_preview_with(template, &Values::new())
    }

    /// Dry run where `supplied` values take precedence over synthesized ones.
    pub fn generate_preview_with(
        &self,
        template: &TemplateDefinition,
        supplied: &Values,
    ) -> Preview {
        preview::preview(template, supplied, &self.limits, self.order)
    }

    /// Authoring check of `template` under this engine's limits and order.
    pub fn check_template(&self, template: &TemplateDefinition) -> Vec<TemplateIssue> {
        template.check(&self.limits, self.order)
    }

    /// Parses and evaluates a single formula against `scope`.
    pub fn evaluate_formula(&self, source: &str, scope: &Values) -> Result<Value, FormulaError> {
        Formula::parse(source, &self.limits)?.evaluate(scope)
    }
}

#[derive(Debug, Default)]
pub struct EngineBuilder {
    limits: FormulaLimits,
    order: EvaluationOrder,
}

impl EngineBuilder {
    /// Longest accepted formula, in bytes.
    #[must_use]
    pub fn max_formula_length(mut self, max: usize) -> EngineBuilder {
        self.limits.max_length = max;
        self
    }

    /// Deepest accepted expression nesting.
    #[must_use]
    pub fn max_depth(mut self, max: usize) -> EngineBuilder {
        self.limits.max_depth = max;
        self
    }

    #[must_use]
    pub fn evaluation_order(mut self, order: EvaluationOrder) -> EngineBuilder {
        self.order = order;
        self
    }

    /// Construct `Engine`
    pub fn build(self) -> Engine {
        Engine {
            limits: self.limits,
            order: self.order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_options() {
        let engine = Engine::builder()
            .max_formula_length(128)
            .max_depth(8)
            .evaluation_order(EvaluationOrder::Dependency)
            .build();
        assert_eq!(
            engine.limits(),
            FormulaLimits {
                max_length: 128,
                max_depth: 8
            }
        );
        assert_eq!(engine.evaluation_order(), EvaluationOrder::Dependency);
        assert_eq!(Engine::builder().build(), Engine::default());
    }

    #[test]
    fn evaluate_formula_uses_engine_limits() {
        let engine = Engine::builder().max_formula_length(5).build();
        assert_eq!(
            engine.evaluate_formula("1 + 2 + 3", &Values::new()),
            Err(FormulaError::TooLong { max: 5 })
        );
        assert_eq!(
            engine.evaluate_formula("1+2", &Values::new()),
            Ok(Value::from(3))
        );
    }
}
