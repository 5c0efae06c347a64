//! Dry runs of a template with synthesized inputs.
use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use crate::calculation::run;
use crate::formula::FormulaLimits;
use crate::ordering::EvaluationOrder;
use crate::parameters::{DataType, ParameterDefinition};
use crate::templates::TemplateDefinition;
use crate::value::{Value, Values};

/// Outcome of a preview run.
///
/// `error` is set only when sample inputs could not be synthesized; the
/// template is not run in that case. Otherwise `was_successful` and
/// `error_message` mirror the inner calculation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub sample_inputs: Values,
    pub results: Values,
    pub was_successful: bool,
    pub error_message: Option<String>,
    pub error: Option<String>,
}

pub(crate) fn preview(
    template: &TemplateDefinition,
    supplied: &Values,
    limits: &FormulaLimits,
    order: EvaluationOrder,
) -> Preview {
    let sample_inputs = match synthesize_inputs(template, supplied) {
        Ok(inputs) => inputs,
        Err(error) => {
            debug!(template = %template.id, %error, "preview synthesis failed");
            return Preview {
                sample_inputs: supplied.clone(),
                results: Values::new(),
                was_successful: false,
                error_message: None,
                error: Some(error),
            };
        }
    };
    let result = run(template, &sample_inputs, limits, order, None);
    Preview {
        sample_inputs,
        results: result.results,
        was_successful: result.was_successful,
        error_message: result.error_message,
        error: None,
    }
}

/// Fills every INPUT parameter `supplied` leaves empty with its default or a
/// plausible sample. Supplied values are kept as given.
pub fn synthesize_inputs(
    template: &TemplateDefinition,
    supplied: &Values,
) -> Result<Values, String> {
    let mut inputs = supplied.clone();
    for param in template.inputs() {
        if inputs.get(&param.name).is_some_and(|v| !v.is_null()) {
            continue;
        }
        let value = match param.decoded_default() {
            Some(value) => value,
            None => sample(param)?,
        };
        inputs.insert(param.name.clone(), value);
    }
    Ok(inputs)
}

fn sample(param: &ParameterDefinition) -> Result<Value, String> {
    let value = match param.data_type {
        DataType::Number => Value::Number(match (param.min_value, param.max_value) {
            (Some(min), Some(max)) => (min + max) / 2.0,
            (Some(min), None) => min + 1.0,
            (None, Some(max)) => max - 1.0,
            (None, None) => 10.0,
        }),
        DataType::String => Value::String(format!("sample {}", param.name)),
        DataType::Boolean => Value::Bool(true),
        DataType::Date => Value::Date(Utc::now()),
        DataType::Enum => param.allowed_values.first().cloned().ok_or_else(|| {
            format!(
                "cannot synthesize a value for '{}': enum without allowed values",
                param.name
            )
        })?,
        DataType::Array => Value::Array(Vec::new()),
        DataType::Object => Value::Object(Values::new()),
    };
    Ok(value)
}
