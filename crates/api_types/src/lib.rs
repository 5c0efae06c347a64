use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use uuid::Uuid;

/// A name→value JSON object, as used for inputs and results.
pub type JsonMap = Map<String, Json>;

pub mod template {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum ParameterScope {
        #[serde(alias = "INPUT")]
        Input,
        #[serde(alias = "INTERNAL")]
        Internal,
        #[serde(alias = "OUTPUT")]
        Output,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum DataType {
        #[serde(alias = "NUMBER")]
        Number,
        #[serde(alias = "STRING")]
        String,
        #[serde(alias = "BOOLEAN")]
        Boolean,
        #[serde(alias = "DATE")]
        Date,
        #[serde(alias = "ENUM")]
        Enum,
        #[serde(alias = "ARRAY")]
        Array,
        #[serde(alias = "OBJECT")]
        Object,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct ParameterNew {
        pub name: String,
        pub scope: ParameterScope,
        pub data_type: DataType,
        #[serde(default)]
        pub is_required: bool,
        pub min_value: Option<f64>,
        pub max_value: Option<f64>,
        pub regex_pattern: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub allowed_values: Vec<Json>,
        /// Textual literal; decoded per data type by the engine.
        pub default_value: Option<String>,
        pub formula: Option<String>,
        pub description: Option<String>,
        pub unit: Option<String>,
    }

    /// A template document, as authored in JSON.
    ///
    /// A missing `id` gets a fresh one; `version` defaults to 1 and
    /// `is_active` to `true`.
    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct TemplateNew {
        pub id: Option<Uuid>,
        pub name: String,
        pub description: Option<String>,
        pub category: Option<String>,
        pub version: Option<u32>,
        pub is_active: Option<bool>,
        #[serde(default)]
        pub is_verified: bool,
        pub formula: String,
        #[serde(default)]
        pub parameters: Vec<ParameterNew>,
    }
}

pub mod calculation {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct CalculationRequest {
        pub template_id: Uuid,
        #[serde(default)]
        pub values: JsonMap,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct FailureBody {
        /// `validation`, `internal:<name>`, `main` or `output:<name>`.
        pub stage: String,
        pub message: String,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct CalculationResponse {
        /// Set once the result has been persisted.
        pub id: Option<Uuid>,
        pub template_id: Uuid,
        pub results: JsonMap,
        pub execution_time_ms: u64,
        pub was_successful: bool,
        pub error_message: Option<String>,
        pub failure: Option<FailureBody>,
        #[serde(default)]
        pub validation_errors: Vec<String>,
        pub timestamp: DateTime<Utc>,
    }
}

pub mod preview {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    pub struct PreviewResponse {
        pub template_id: Uuid,
        pub sample_inputs: JsonMap,
        pub results: JsonMap,
        pub was_successful: bool,
        pub error_message: Option<String>,
        pub error: Option<String>,
    }
}

pub mod check {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct IssueBody {
        /// `None` for template-level issues.
        pub parameter: Option<String>,
        pub message: String,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CheckResponse {
        pub template_id: Uuid,
        pub is_valid: bool,
        pub issues: Vec<IssueBody>,
    }
}

#[cfg(test)]
mod tests {
    use super::template::*;
    use serde_json::json;

    #[test]
    fn template_accepts_uppercase_enums_and_defaults() {
        let template: TemplateNew = serde_json::from_value(json!({
            "name": "Doubler",
            "formula": "x * 2",
            "parameters": [
                {"name": "x", "scope": "INPUT", "data_type": "number", "min_value": 0, "max_value": 10},
                {"name": "kind", "scope": "input", "data_type": "ENUM", "allowed_values": ["a", 1]}
            ]
        }))
        .unwrap();

        assert_eq!(template.version, None);
        assert!(!template.is_verified);
        assert_eq!(template.parameters[0].scope, ParameterScope::Input);
        assert_eq!(template.parameters[0].max_value, Some(10.0));
        assert!(!template.parameters[0].is_required);
        assert_eq!(template.parameters[1].data_type, DataType::Enum);
        assert_eq!(template.parameters[1].allowed_values, vec![json!("a"), json!(1)]);
    }

    #[test]
    fn enums_serialize_as_snake_case() {
        assert_eq!(
            serde_json::to_value(ParameterScope::Internal).unwrap(),
            json!("internal")
        );
    }
}
