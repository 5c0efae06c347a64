//! Conversions between the JSON wire types and the engine model.
use api_types::{
    JsonMap,
    calculation::{CalculationResponse, FailureBody},
    check::{CheckResponse, IssueBody},
    preview::PreviewResponse,
    template::{self, ParameterNew, TemplateNew},
};
use engine::{
    CalculationResult, DataType, ParameterDefinition, ParameterScope, Preview, TemplateDefinition,
    TemplateIssue, Value, Values,
};
use uuid::Uuid;

fn scope(scope: template::ParameterScope) -> ParameterScope {
    match scope {
        template::ParameterScope::Input => ParameterScope::Input,
        template::ParameterScope::Internal => ParameterScope::Internal,
        template::ParameterScope::Output => ParameterScope::Output,
    }
}

fn data_type(data_type: template::DataType) -> DataType {
    match data_type {
        template::DataType::Number => DataType::Number,
        template::DataType::String => DataType::String,
        template::DataType::Boolean => DataType::Boolean,
        template::DataType::Date => DataType::Date,
        template::DataType::Enum => DataType::Enum,
        template::DataType::Array => DataType::Array,
        template::DataType::Object => DataType::Object,
    }
}

fn parameter(param: ParameterNew) -> ParameterDefinition {
    ParameterDefinition {
        name: param.name,
        scope: scope(param.scope),
        data_type: data_type(param.data_type),
        is_required: param.is_required,
        min_value: param.min_value,
        max_value: param.max_value,
        regex_pattern: param.regex_pattern,
        allowed_values: param.allowed_values.into_iter().map(Value::from_json).collect(),
        default_value: param.default_value,
        formula: param.formula,
        description: param.description,
        unit: param.unit,
    }
}

pub fn template(doc: TemplateNew) -> TemplateDefinition {
    let mut template = TemplateDefinition::new(doc.name, doc.formula)
        .id(doc.id.unwrap_or_else(Uuid::new_v4))
        .version(doc.version.unwrap_or(1))
        .active(doc.is_active.unwrap_or(true))
        .verified(doc.is_verified)
        .parameters(doc.parameters.into_iter().map(parameter));
    template.description = doc.description;
    template.category = doc.category;
    template
}

pub fn values(map: JsonMap) -> Values {
    map.into_iter()
        .map(|(k, v)| (k, Value::from_json(v)))
        .collect()
}

fn json_map(values: &Values) -> JsonMap {
    values.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()
}

pub fn calculation_response(
    id: Option<Uuid>,
    template_id: Uuid,
    result: &CalculationResult,
) -> CalculationResponse {
    CalculationResponse {
        id,
        template_id,
        results: json_map(&result.results),
        execution_time_ms: result.execution_time_ms,
        was_successful: result.was_successful,
        error_message: result.error_message.clone(),
        failure: result.failure.as_ref().map(|failure| FailureBody {
            stage: failure.stage.to_string(),
            message: failure.message.clone(),
        }),
        validation_errors: result.validation_errors.clone(),
        timestamp: result.timestamp,
    }
}

pub fn preview_response(template_id: Uuid, preview: &Preview) -> PreviewResponse {
    PreviewResponse {
        template_id,
        sample_inputs: json_map(&preview.sample_inputs),
        results: json_map(&preview.results),
        was_successful: preview.was_successful,
        error_message: preview.error_message.clone(),
        error: preview.error.clone(),
    }
}

pub fn check_response(template_id: Uuid, issues: Vec<TemplateIssue>) -> CheckResponse {
    CheckResponse {
        template_id,
        is_valid: issues.is_empty(),
        issues: issues
            .into_iter()
            .map(|issue| IssueBody {
                parameter: issue.parameter,
                message: issue.message,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doubler() -> TemplateNew {
        serde_json::from_value(json!({
            "name": "Doubler",
            "category": "demo",
            "formula": "x * 2",
            "parameters": [
                {"name": "x", "scope": "INPUT", "data_type": "NUMBER",
                 "is_required": true, "min_value": 0, "max_value": 10}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn template_document_becomes_a_definition() {
        let template = template(doubler());
        assert_eq!(template.version, 1);
        assert!(template.is_active);
        assert_eq!(template.category.as_deref(), Some("demo"));
        let x = template.parameter_named("x").unwrap();
        assert_eq!(x.scope, ParameterScope::Input);
        assert_eq!((x.min_value, x.max_value), (Some(0.0), Some(10.0)));
    }

    #[test]
    fn failed_run_maps_stage_and_results() {
        let template = template(doubler());
        let inputs = values(serde_json::from_value(json!({"x": 11})).unwrap());
        let result = engine::Engine::builder()
            .build()
            .execute_calculation(&template, &inputs);

        let response = calculation_response(None, template.id, &result);
        assert!(!response.was_successful);
        assert_eq!(
            response.failure,
            Some(FailureBody {
                stage: "validation".to_string(),
                message: "'x' must be between 0 and 10, got 11".to_string(),
            })
        );
        assert_eq!(response.validation_errors.len(), 1);
    }

    #[test]
    fn successful_run_serializes_integral_numbers() {
        let template = template(doubler());
        let inputs = values(serde_json::from_value(json!({"x": 2.5})).unwrap());
        let result = engine::Engine::builder()
            .build()
            .execute_calculation(&template, &inputs);

        let response = calculation_response(None, template.id, &result);
        assert_eq!(response.results.get("resultado"), Some(&json!(5)));
    }
}
