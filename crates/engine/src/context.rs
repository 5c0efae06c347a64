use crate::parameters::{DataType, ParameterDefinition};
use crate::value::{Value, Values, parse_date};

/// Per-run name→value scope.
///
/// Built from validated inputs, then extended with each derived value as the
/// run progresses. A context belongs to exactly one run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EvaluationContext {
    values: Values,
}

impl EvaluationContext {
    /// Binds every INPUT parameter: the supplied value (date strings become
    /// dates), else the decoded default, else `null`.
    pub fn from_inputs(params: &[ParameterDefinition], raw: &Values) -> Self {
        let values = params
            .iter()
            .filter(|p| p.is_input())
            .map(|param| {
                let value = match raw.get(&param.name) {
                    Some(value) if !value.is_null() => coerce(param.data_type, value.clone()),
                    _ => param.decoded_default().unwrap_or_default(),
                };
                (param.name.clone(), value)
            })
            .collect();
        Self { values }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn values(&self) -> &Values {
        &self.values
    }
}

fn coerce(data_type: DataType, value: Value) -> Value {
    match (data_type, value) {
        (DataType::Date, Value::String(s)) => match parse_date(&s) {
            Some(date) => Value::Date(date),
            None => Value::String(s),
        },
        (_, value) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inputs_are_bound_with_defaults_and_nulls() {
        let params = [
            ParameterDefinition::input("start", DataType::Date),
            ParameterDefinition::input("waste", DataType::Number).default_value("0.05"),
            ParameterDefinition::input("note", DataType::String),
            ParameterDefinition::internal("a", DataType::Number, "1"),
        ];
        let raw = Values::from([
            ("start".to_string(), Value::from("2025-03-01")),
            ("extra".to_string(), Value::from(1)),
        ]);
        let ctx = EvaluationContext::from_inputs(&params, &raw);

        assert!(matches!(ctx.get("start"), Some(Value::Date(_))));
        assert_eq!(ctx.get("waste"), Some(&Value::Number(0.05)));
        assert_eq!(ctx.get("note"), Some(&Value::Null));
        assert_eq!(ctx.get("a"), None);
        assert_eq!(ctx.get("extra"), None);
    }
}
