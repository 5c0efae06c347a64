//! The calculation orchestrator.
//!
//! A run walks a fixed state machine:
//!
//! ```text
//! Validating -> DerivingInternal -> ExecutingMain -> DerivingOutput -> Succeeded
//!      \               \                  \                 \
//!       +---------------+------------------+-----------------+--> Failed(stage, message)
//! ```
//!
//! Formula and validation problems never escape as errors: they end the run in
//! `Failed` and are folded into the returned [`CalculationResult`], together
//! with whatever was produced before the failure.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::context::EvaluationContext;
use crate::error::EvaluationError;
use crate::formula::{Formula, FormulaLimits};
use crate::ordering::{EvaluationOrder, order_parameters};
use crate::parameters::{ParameterDefinition, ParameterScope};
use crate::templates::{PRIMARY_RESULT_KEY, TemplateDefinition};
use crate::validation::validate_input_parameters;
use crate::value::{Value, Values};

/// Owner name used for the primary formula in evaluation errors.
const PRIMARY_OWNER: &str = "main";

/// The step of a run a failure is attributed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    Validation,
    Internal(String),
    Main,
    Output(String),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Validation => f.write_str("validation"),
            Stage::Internal(name) => write!(f, "internal:{name}"),
            Stage::Main => f.write_str("main"),
            Stage::Output(name) => write!(f, "output:{name}"),
        }
    }
}

impl Serialize for Stage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub stage: Stage,
    pub message: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.message)
    }
}

/// Outcome of one run. Always produced for a structurally valid template.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationResult {
    pub results: Values,
    pub execution_time_ms: u64,
    pub was_successful: bool,
    /// `"<stage>: <message>"` when the run failed.
    pub error_message: Option<String>,
    pub failure: Option<Failure>,
    /// Itemized input errors; empty unless validation failed.
    pub validation_errors: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl CalculationResult {
    /// The result of a run abandoned after `budget` while in `stage`.
    pub fn timed_out(stage: Stage, budget: Duration) -> Self {
        let failure = Failure {
            stage,
            message: "timeout".to_string(),
        };
        Self {
            results: Values::new(),
            execution_time_ms: millis(budget),
            was_successful: false,
            error_message: Some(failure.to_string()),
            failure: Some(failure),
            validation_errors: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Which step of the state machine a run is in, as recorded by a
/// [`StageProbe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum StageKind {
    Validation = 0,
    Internal = 1,
    Main = 2,
    Output = 3,
    Done = 4,
}

impl StageKind {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Validation,
            1 => Self::Internal,
            2 => Self::Main,
            3 => Self::Output,
            _ => Self::Done,
        }
    }
}

/// Lock-free record of the active stage, written by the run at every
/// transition and read by whoever enforces the time budget.
#[derive(Debug, Default)]
pub struct StageProbe {
    kind: AtomicU8,
    /// Index into the template's parameters for derived stages.
    parameter: AtomicUsize,
}

impl StageProbe {
    pub fn record(&self, kind: StageKind, parameter: usize) {
        self.parameter.store(parameter, Ordering::Relaxed);
        self.kind.store(kind as u8, Ordering::Release);
    }

    pub fn kind(&self) -> StageKind {
        StageKind::from_u8(self.kind.load(Ordering::Acquire))
    }

    /// The stage last recorded, resolved against `template`. A finished run
    /// reports `main`.
    pub fn stage(&self, template: &TemplateDefinition) -> Stage {
        let kind = self.kind();
        let name = || {
            template
                .parameters
                .get(self.parameter.load(Ordering::Relaxed))
                .map(|p| p.name.clone())
                .unwrap_or_default()
        };
        match kind {
            StageKind::Validation => Stage::Validation,
            StageKind::Internal => Stage::Internal(name()),
            StageKind::Output => Stage::Output(name()),
            StageKind::Main | StageKind::Done => Stage::Main,
        }
    }
}

#[derive(Debug)]
enum CalculationState {
    Validating,
    DerivingInternal,
    ExecutingMain,
    DerivingOutput,
    Succeeded,
    Failed(Failure),
}

impl CalculationState {
    fn name(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::DerivingInternal => "deriving_internal",
            Self::ExecutingMain => "executing_main",
            Self::DerivingOutput => "deriving_output",
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
        }
    }
}

/// Per-run state. Owned by exactly one invocation.
struct Calculation<'a> {
    template: &'a TemplateDefinition,
    limits: &'a FormulaLimits,
    order: EvaluationOrder,
    probe: Option<&'a StageProbe>,
    context: EvaluationContext,
    results: Values,
    validation_errors: Vec<String>,
}

/// Runs `template` against `inputs`. Never fails: every problem ends up in
/// the returned result.
pub(crate) fn run(
    template: &TemplateDefinition,
    inputs: &Values,
    limits: &FormulaLimits,
    order: EvaluationOrder,
    probe: Option<&StageProbe>,
) -> CalculationResult {
    let started = Instant::now();
    let mut calculation = Calculation {
        template,
        limits,
        order,
        probe,
        context: EvaluationContext::default(),
        results: Values::new(),
        validation_errors: Vec::new(),
    };
    let mut state = CalculationState::Validating;
    let terminal = loop {
        debug!(template = %template.id, state = state.name(), "calculation state");
        state = match state {
            CalculationState::Validating => calculation.validate(inputs),
            CalculationState::DerivingInternal => calculation.derive(ParameterScope::Internal),
            CalculationState::ExecutingMain => calculation.execute_main(),
            CalculationState::DerivingOutput => calculation.derive(ParameterScope::Output),
            terminal @ (CalculationState::Succeeded | CalculationState::Failed(_)) => {
                break terminal;
            }
        };
    };
    calculation.record(StageKind::Done, 0);
    calculation.finish(terminal, started.elapsed())
}

impl Calculation<'_> {
    fn record(&self, kind: StageKind, parameter: usize) {
        if let Some(probe) = self.probe {
            probe.record(kind, parameter);
        }
    }

    fn validate(&mut self, inputs: &Values) -> CalculationState {
        self.record(StageKind::Validation, 0);
        let report = validate_input_parameters(&self.template.parameters, inputs);
        if !report.is_valid {
            let message = report.message();
            self.validation_errors = report.errors;
            return CalculationState::Failed(Failure {
                stage: Stage::Validation,
                message,
            });
        }
        self.context = EvaluationContext::from_inputs(&self.template.parameters, inputs);
        CalculationState::DerivingInternal
    }

    /// Evaluates every derived parameter of `scope` that has a formula.
    /// Internals see the context, outputs see the results so far layered over
    /// the context. A derived parameter without a formula is left to
    /// [`TemplateDefinition::check`].
    fn derive(&mut self, scope: ParameterScope) -> CalculationState {
        let (kind, next) = match scope {
            ParameterScope::Output => (StageKind::Output, CalculationState::Succeeded),
            _ => (StageKind::Internal, CalculationState::ExecutingMain),
        };
        let stage = |name: &str| match kind {
            StageKind::Output => Stage::Output(name.to_string()),
            _ => Stage::Internal(name.to_string()),
        };
        let template = self.template;
        let group = template
            .parameters
            .iter()
            .filter(|p| p.scope == scope && p.formula_source().is_some())
            .collect();
        let ordered = match order_parameters(group, self.order, self.limits) {
            Ok(ordered) => ordered,
            Err(cycle) => {
                return CalculationState::Failed(Failure {
                    stage: stage(cycle.head()),
                    message: cycle.to_string(),
                });
            }
        };
        for param in ordered {
            self.record(kind, self.position(param));
            let value = match kind {
                StageKind::Output => self.evaluate(
                    &param.name,
                    param.formula_source(),
                    &[&self.results, self.context.values()],
                ),
                _ => self.evaluate(
                    &param.name,
                    param.formula_source(),
                    &[self.context.values()],
                ),
            };
            match value {
                Ok(value) if kind == StageKind::Output => {
                    self.results.insert(param.name.clone(), value);
                }
                Ok(value) => self.context.insert(param.name.clone(), value),
                Err(err) => {
                    return CalculationState::Failed(Failure {
                        stage: stage(&param.name),
                        message: err.cause.to_string(),
                    });
                }
            }
        }
        next
    }

    fn execute_main(&mut self) -> CalculationState {
        self.record(StageKind::Main, 0);
        let formula = Some(self.template.formula.as_str());
        match self.evaluate(PRIMARY_OWNER, formula, &[self.context.values()]) {
            Ok(Value::Object(entries)) => self.results.extend(entries),
            Ok(value) => {
                self.results.insert(PRIMARY_RESULT_KEY.to_string(), value);
            }
            Err(err) => {
                return CalculationState::Failed(Failure {
                    stage: Stage::Main,
                    message: err.cause.to_string(),
                });
            }
        }
        CalculationState::DerivingOutput
    }

    fn evaluate(
        &self,
        owner: &str,
        source: Option<&str>,
        layers: &[&Values],
    ) -> Result<Value, EvaluationError> {
        let value = Formula::parse(source.unwrap_or_default(), self.limits)
            .and_then(|formula| formula.evaluate_in(layers))
            .map_err(|cause| EvaluationError::new(owner, cause))?;
        debug!(owner, %value, "formula evaluated");
        Ok(value)
    }

    fn position(&self, param: &ParameterDefinition) -> usize {
        self.template
            .parameters
            .iter()
            .position(|p| std::ptr::eq(p, param))
            .unwrap_or_default()
    }

    fn finish(self, terminal: CalculationState, elapsed: Duration) -> CalculationResult {
        let failure = match terminal {
            CalculationState::Failed(failure) => {
                warn!(
                    template = %self.template.id,
                    stage = %failure.stage,
                    message = %failure.message,
                    "calculation failed"
                );
                Some(failure)
            }
            _ => None,
        };
        CalculationResult {
            results: self.results,
            execution_time_ms: millis(elapsed),
            was_successful: failure.is_none(),
            error_message: failure.as_ref().map(ToString::to_string),
            failure,
            validation_errors: self.validation_errors,
            timestamp: Utc::now(),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::DataType;

    fn run_default(template: &TemplateDefinition, inputs: &[(&str, Value)]) -> CalculationResult {
        let inputs: Values = inputs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        run(
            template,
            &inputs,
            &FormulaLimits::default(),
            EvaluationOrder::Declared,
            None,
        )
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::Internal("area".into()).to_string(), "internal:area");
        assert_eq!(Stage::Output("cost".into()).to_string(), "output:cost");
        assert_eq!(Stage::Validation.to_string(), "validation");
    }

    #[test]
    fn scalar_result_is_stored_under_primary_key() {
        let template = TemplateDefinition::new("Double", "x * 2")
            .parameter(ParameterDefinition::input("x", DataType::Number).required());
        let result = run_default(&template, &[("x", Value::from(5))]);
        assert!(result.was_successful);
        assert_eq!(result.results["resultado"], Value::from(10));
        assert_eq!(result.error_message, None);
    }

    #[test]
    fn validation_failure_stops_before_any_formula() {
        let template = TemplateDefinition::new("Broken", "missing * 2")
            .parameter(ParameterDefinition::input("x", DataType::Number).required());
        let result = run_default(&template, &[]);
        assert!(!result.was_successful);
        assert_eq!(result.error_message.as_deref(), Some("validation: 'x' is required"));
        assert_eq!(result.validation_errors, vec!["'x' is required"]);
        assert!(result.results.is_empty());
    }

    #[test]
    fn failing_output_keeps_earlier_results() {
        let template = TemplateDefinition::new("Partial", "{ base: x }").parameters([
            ParameterDefinition::input("x", DataType::Number),
            ParameterDefinition::output("ok", DataType::Number, "base + 1"),
            ParameterDefinition::output("bad", DataType::Number, "base / 0"),
            ParameterDefinition::output("never", DataType::Number, "1"),
        ]);
        let result = run_default(&template, &[("x", Value::from(1))]);
        assert!(!result.was_successful);
        assert_eq!(
            result.failure,
            Some(Failure {
                stage: Stage::Output("bad".into()),
                message: "non-finite numeric result in '/'".into(),
            })
        );
        assert_eq!(result.results.get("ok"), Some(&Value::from(2)));
        assert_eq!(result.results.get("never"), None);
    }

    #[test]
    fn probe_names_the_active_parameter() {
        let template = TemplateDefinition::new("Probe", "1").parameters([
            ParameterDefinition::input("x", DataType::Number),
            ParameterDefinition::internal("area", DataType::Number, "x"),
            ParameterDefinition::output("cost", DataType::Number, "x"),
        ]);
        let probe = StageProbe::default();
        assert_eq!(probe.stage(&template), Stage::Validation);
        probe.record(StageKind::Internal, 1);
        assert_eq!(probe.stage(&template), Stage::Internal("area".into()));
        probe.record(StageKind::Output, 2);
        let stage = probe.stage(&template);
        assert_eq!(stage, Stage::Output("cost".into()));

        let result = CalculationResult::timed_out(stage, Duration::from_millis(250));
        assert_eq!(result.error_message.as_deref(), Some("output:cost: timeout"));
        assert_eq!(result.execution_time_ms, 250);
        assert!(!result.was_successful);

        run(
            &template,
            &Values::from([("x".to_string(), Value::from(1))]),
            &FormulaLimits::default(),
            EvaluationOrder::Declared,
            Some(&probe),
        );
        assert_eq!(probe.kind(), StageKind::Done);
    }

    #[test]
    fn derived_parameters_without_formula_are_skipped() {
        let mut note = ParameterDefinition::output("note", DataType::String, "'x'");
        note.formula = None;
        let mut blank = ParameterDefinition::internal("blank", DataType::Number, "1");
        blank.formula = Some("  ".to_string());
        let template = TemplateDefinition::new("Sparse", "x * 2").parameters([
            ParameterDefinition::input("x", DataType::Number),
            blank,
            note,
            ParameterDefinition::output("half", DataType::Number, "resultado / 4"),
        ]);
        for order in [EvaluationOrder::Declared, EvaluationOrder::Dependency] {
            let result = run(
                &template,
                &Values::from([("x".to_string(), Value::from(2))]),
                &FormulaLimits::default(),
                order,
                None,
            );
            assert!(result.was_successful, "{:?}", result.error_message);
            assert_eq!(result.results.get("note"), None);
            assert_eq!(result.results["half"], Value::from(1));
        }
        assert!(
            template
                .check(&FormulaLimits::default(), EvaluationOrder::Declared)
                .iter()
                .any(|issue| issue.to_string() == "note: output parameters need a formula")
        );
    }

    #[test]
    fn outputs_prefer_results_over_context() {
        let template = TemplateDefinition::new("Shadow", "{ x: 100 }").parameters([
            ParameterDefinition::input("x", DataType::Number),
            ParameterDefinition::output("y", DataType::Number, "x + 1"),
        ]);
        let result = run_default(&template, &[("x", Value::from(1))]);
        assert_eq!(result.results["y"], Value::from(101));
    }

    #[test]
    fn dependency_cycle_fails_internal_stage() {
        let template = TemplateDefinition::new("Loop", "a").parameters([
            ParameterDefinition::internal("a", DataType::Number, "b + 1"),
            ParameterDefinition::internal("b", DataType::Number, "a + 1"),
        ]);
        let result = run(
            &template,
            &Values::new(),
            &FormulaLimits::default(),
            EvaluationOrder::Dependency,
            None,
        );
        assert_eq!(
            result.error_message.as_deref(),
            Some("internal:a: dependency cycle: a -> b -> a")
        );
    }

    #[test]
    fn probe_tracks_the_last_stage() {
        let template = TemplateDefinition::new("Probe", "a").parameters([
            ParameterDefinition::input("x", DataType::Number),
            ParameterDefinition::internal("a", DataType::Number, "x ?? 1"),
            ParameterDefinition::output("z", DataType::Number, "nope"),
        ]);
        let probe = StageProbe::default();
        let result = run(
            &template,
            &Values::new(),
            &FormulaLimits::default(),
            EvaluationOrder::Declared,
            Some(&probe),
        );
        assert_eq!(result.error_message.as_deref(), Some("output:z: undefined variable 'nope'"));
        assert_eq!(probe.kind(), StageKind::Done);

        probe.record(StageKind::Internal, 1);
        assert_eq!(probe.stage(&template), Stage::Internal("a".into()));
    }

    #[test]
    fn timeout_result_names_the_stage() {
        let result = CalculationResult::timed_out(Stage::Main, Duration::from_millis(250));
        assert_eq!(result.error_message.as_deref(), Some("main: timeout"));
        assert_eq!(result.execution_time_ms, 250);
        assert!(result.results.is_empty());
    }
}
