//! Validation of raw inputs against INPUT parameter definitions.
use std::cell::RefCell;
use std::collections::HashMap;

use regex::Regex;
use serde::Serialize;

use crate::parameters::{DataType, ParameterDefinition};
use crate::value::{Value, Values, format_number, parse_date};

/// Outcome of [`validate_input_parameters`]. `errors` lists every violation
/// found, in parameter order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    /// Errors joined into a single line.
    pub fn message(&self) -> String {
        self.errors.join("; ")
    }
}

/// Checks `values` against every INPUT definition in `params`.
///
/// Non-input definitions and keys that name no parameter are ignored. Absent
/// optional values are skipped without injecting defaults.
pub fn validate_input_parameters(
    params: &[ParameterDefinition],
    values: &Values,
) -> ValidationReport {
    let errors = params
        .iter()
        .filter(|p| p.is_input())
        .filter_map(|param| match values.get(&param.name) {
            None | Some(Value::Null) if param.is_required => {
                Some(format!("'{}' is required", param.name))
            }
            None | Some(Value::Null) => None,
            Some(value) => check_value(param, value),
        })
        .collect();
    ValidationReport::from_errors(errors)
}

/// The single error for `value`, if any. A type mismatch short-circuits the
/// constraint checks.
fn check_value(param: &ParameterDefinition, value: &Value) -> Option<String> {
    let name = &param.name;
    match param.data_type {
        DataType::Number => {
            let Some(n) = value.as_f64().filter(|n| n.is_finite()) else {
                return Some(format!("'{name}' must be a number"));
            };
            check_range(param, n)
        }
        DataType::String => {
            let Some(s) = value.as_str() else {
                return Some(format!("'{name}' must be a string"));
            };
            check_pattern(param, s)
        }
        DataType::Boolean => (!matches!(value, Value::Bool(_)))
            .then(|| format!("'{name}' must be a boolean")),
        DataType::Date => {
            let valid = match value {
                Value::Date(_) => true,
                Value::String(s) => parse_date(s).is_some(),
                _ => false,
            };
            (!valid).then(|| format!("'{name}' must be a valid date"))
        }
        DataType::Enum => (!param.allowed_values.contains(value)).then(|| {
            let allowed = param
                .allowed_values
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            format!("'{name}' must be one of [{allowed}], got '{value}'")
        }),
        DataType::Array => (!matches!(value, Value::Array(_)))
            .then(|| format!("'{name}' must be an array")),
        DataType::Object => (!matches!(value, Value::Object(_)))
            .then(|| format!("'{name}' must be an object")),
    }
}

fn check_range(param: &ParameterDefinition, n: f64) -> Option<String> {
    let name = &param.name;
    let below = param.min_value.is_some_and(|min| n < min);
    let above = param.max_value.is_some_and(|max| n > max);
    if !below && !above {
        return None;
    }
    let bounds = match (param.min_value, param.max_value) {
        (Some(min), Some(max)) => {
            format!("between {} and {}", format_number(min), format_number(max))
        }
        (Some(min), None) => format!("at least {}", format_number(min)),
        (None, Some(max)) => format!("at most {}", format_number(max)),
        (None, None) => return None,
    };
    Some(format!(
        "'{name}' must be {bounds}, got {}",
        format_number(n)
    ))
}

fn check_pattern(param: &ParameterDefinition, s: &str) -> Option<String> {
    let pattern = param.regex_pattern.as_deref()?;
    match anchored(pattern) {
        Ok(re) if re.is_match(s) => None,
        Ok(_) => Some(format!(
            "'{}' does not match pattern '{pattern}'",
            param.name
        )),
        Err(err) => Some(format!(
            "'{}' has an invalid pattern '{pattern}': {err}",
            param.name
        )),
    }
}

/// Compiled patterns kept per thread; the map is emptied once it reaches this
/// size.
const PATTERN_CACHE_LIMIT: usize = 256;

thread_local! {
    static PATTERNS: RefCell<HashMap<String, Regex>> = RefCell::new(HashMap::new());
}

/// Compiles `pattern` so that it must match the whole value. Successful
/// compilations are cached.
pub(crate) fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    PATTERNS.with_borrow_mut(|cache| {
        if let Some(re) = cache.get(pattern) {
            return Ok(re.clone());
        }
        let re = Regex::new(&format!("^(?:{pattern})$"))?;
        if cache.len() >= PATTERN_CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(pattern.to_string(), re.clone());
        Ok(re)
    })
}

#[cfg(test)]
fn cached_patterns() -> usize {
    PATTERNS.with_borrow(HashMap::len)
}
