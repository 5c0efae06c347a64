//! Parameter definitions: one named, typed, scoped value of a template.
use std::{fmt, str::FromStr};

use crate::value::{Value, parse_date};

/// Where a parameter's value comes from.
///
/// - `Input`: supplied by the caller and validated.
/// - `Internal`: derived by a formula, visible to later formulas only.
/// - `Output`: derived by a formula and exposed in the result set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParameterScope {
    Input,
    Internal,
    Output,
}

impl ParameterScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Internal => "internal",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for ParameterScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParameterScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "input" => Ok(Self::Input),
            "internal" => Ok(Self::Internal),
            "output" => Ok(Self::Output),
            other => Err(format!("unknown parameter scope: {other}")),
        }
    }
}

/// Declared data type of a parameter. Drives validation and coercion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Number,
    String,
    Boolean,
    Date,
    Enum,
    Array,
    Object,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Enum => "enum",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "number" => Ok(Self::Number),
            "string" => Ok(Self::String),
            "boolean" => Ok(Self::Boolean),
            "date" => Ok(Self::Date),
            "enum" => Ok(Self::Enum),
            "array" => Ok(Self::Array),
            "object" => Ok(Self::Object),
            other => Err(format!("unknown data type: {other}")),
        }
    }
}

/// Static description of one named value in a template.
///
/// Exactly one of these holds: the parameter is `Input` and has no formula,
/// or it is `Internal`/`Output` and has one. Use [`input`], [`internal`] and
/// [`output`] to build definitions that respect it.
///
/// ```rust
/// use engine::{DataType, ParameterDefinition};
///
/// let x = ParameterDefinition::input("x", DataType::Number)
///     .required()
///     .range(0.0, 10.0);
/// assert!(x.respects_formula_invariant());
/// ```
///
/// [`input`]: ParameterDefinition::input
/// [`internal`]: ParameterDefinition::internal
/// [`output`]: ParameterDefinition::output
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterDefinition {
    pub name: String,
    pub scope: ParameterScope,
    pub data_type: DataType,
    pub is_required: bool,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub regex_pattern: Option<String>,
    pub allowed_values: Vec<Value>,
    /// Textual literal, decoded per data type by [`decoded_default`].
    ///
    /// [`decoded_default`]: ParameterDefinition::decoded_default
    pub default_value: Option<String>,
    pub formula: Option<String>,
    pub description: Option<String>,
    pub unit: Option<String>,
}

impl ParameterDefinition {
    fn with_scope(name: impl Into<String>, scope: ParameterScope, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            scope,
            data_type,
            is_required: false,
            min_value: None,
            max_value: None,
            regex_pattern: None,
            allowed_values: Vec::new(),
            default_value: None,
            formula: None,
            description: None,
            unit: None,
        }
    }

    /// A caller-supplied parameter.
    #[must_use]
    pub fn input(name: impl Into<String>, data_type: DataType) -> Self {
        Self::with_scope(name, ParameterScope::Input, data_type)
    }

    /// An intermediate value derived by `formula`.
    #[must_use]
    pub fn internal(
        name: impl Into<String>,
        data_type: DataType,
        formula: impl Into<String>,
    ) -> Self {
        Self::with_scope(name, ParameterScope::Internal, data_type).formula(formula)
    }

    /// A derived value exposed in the result set.
    #[must_use]
    pub fn output(
        name: impl Into<String>,
        data_type: DataType,
        formula: impl Into<String>,
    ) -> Self {
        Self::with_scope(name, ParameterScope::Output, data_type).formula(formula)
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    #[must_use]
    pub fn min(mut self, min: f64) -> Self {
        self.min_value = Some(min);
        self
    }

    #[must_use]
    pub fn max(mut self, max: f64) -> Self {
        self.max_value = Some(max);
        self
    }

    #[must_use]
    pub fn range(self, min: f64, max: f64) -> Self {
        self.min(min).max(max)
    }

    #[must_use]
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.regex_pattern = Some(pattern.into());
        self
    }

    #[must_use]
    pub fn allowed<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default_value = Some(default.into());
        self
    }

    #[must_use]
    pub fn formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn is_input(&self) -> bool {
        self.scope == ParameterScope::Input
    }

    /// The formula, unless it is missing or blank.
    pub fn formula_source(&self) -> Option<&str> {
        self.formula.as_deref().filter(|f| !f.trim().is_empty())
    }

    /// `true` when the parameter is an input without a formula, or a derived
    /// parameter with a non-blank one.
    pub fn respects_formula_invariant(&self) -> bool {
        self.is_input() != self.formula_source().is_some()
    }

    /// The default value decoded for this parameter's data type, if any.
    pub fn decoded_default(&self) -> Option<Value> {
        self.default_value
            .as_deref()
            .map(|raw| decode_literal(self.data_type, raw))
    }
}

/// Decodes a textual literal: type-specific parsing first, then embedded JSON,
/// then the raw string.
pub(crate) fn decode_literal(data_type: DataType, raw: &str) -> Value {
    let trimmed = raw.trim();
    let typed = match data_type {
        DataType::Number => trimmed
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Value::Number),
        DataType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        DataType::Date => parse_date(trimmed).map(Value::Date),
        DataType::String => return Value::String(raw.to_string()),
        DataType::Enum | DataType::Array | DataType::Object => None,
    };
    typed
        .or_else(|| serde_json::from_str(trimmed).ok().map(Value::from_json))
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formula_invariant() {
        assert!(ParameterDefinition::input("x", DataType::Number).respects_formula_invariant());
        assert!(
            !ParameterDefinition::input("x", DataType::Number)
                .formula("1")
                .respects_formula_invariant()
        );
        assert!(
            ParameterDefinition::internal("a", DataType::Number, "x * 2")
                .respects_formula_invariant()
        );
        assert!(
            !ParameterDefinition::output("a", DataType::Number, "  ")
                .respects_formula_invariant()
        );
    }

    #[test]
    fn defaults_are_decoded_per_type() {
        let number = ParameterDefinition::input("n", DataType::Number).default_value("2.5");
        assert_eq!(number.decoded_default(), Some(Value::Number(2.5)));

        let flag = ParameterDefinition::input("b", DataType::Boolean).default_value("TRUE");
        assert_eq!(flag.decoded_default(), Some(Value::Bool(true)));

        let list = ParameterDefinition::input("l", DataType::Array).default_value("[1, 2]");
        assert_eq!(
            list.decoded_default(),
            Some(Value::Array(vec![Value::from(1), Value::from(2)]))
        );

        let broken = ParameterDefinition::input("o", DataType::Object).default_value("{oops");
        assert_eq!(broken.decoded_default(), Some(Value::from("{oops")));

        let text = ParameterDefinition::input("s", DataType::String).default_value("42");
        assert_eq!(text.decoded_default(), Some(Value::from("42")));
    }

    #[test]
    fn scope_and_type_parse_case_insensitively() {
        assert_eq!("INPUT".parse::<ParameterScope>(), Ok(ParameterScope::Input));
        assert_eq!("Enum".parse::<DataType>(), Ok(DataType::Enum));
        assert!("matrix".parse::<DataType>().is_err());
    }
}
