//! The `TemplateDefinition` is a reusable calculation: typed parameters plus a
//! primary formula. Templates are read-only to the engine and shared as `Arc`
//! snapshots.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use uuid::Uuid;

use crate::formula::{Formula, FormulaLimits, ast::Expr};
use crate::ordering::{EvaluationOrder, order_parameters};
use crate::parameters::{DataType, ParameterDefinition, ParameterScope};
use crate::validation::anchored;

/// Key under which a non-object primary result is stored.
pub const PRIMARY_RESULT_KEY: &str = "resultado";

/// Holds the parameters and the primary formula of a calculation.
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateDefinition {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub version: u32,
    pub is_active: bool,
    pub is_verified: bool,
    pub usage_count: u64,
    pub formula: String,
    /// Declaration order is significant.
    pub parameters: Vec<ParameterDefinition>,
}

impl TemplateDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, formula: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            category: None,
            version: 1,
            is_active: true,
            is_verified: false,
            usage_count: 0,
            formula: formula.into(),
            parameters: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    #[must_use]
    pub fn verified(mut self, is_verified: bool) -> Self {
        self.is_verified = is_verified;
        self
    }

    #[must_use]
    pub fn parameter(mut self, parameter: ParameterDefinition) -> Self {
        self.parameters.push(parameter);
        self
    }

    #[must_use]
    pub fn parameters(mut self, parameters: impl IntoIterator<Item = ParameterDefinition>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn parameter_named(&self, name: &str) -> Option<&ParameterDefinition> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn inputs(&self) -> impl Iterator<Item = &ParameterDefinition> {
        self.in_scope(ParameterScope::Input)
    }

    pub fn internals(&self) -> impl Iterator<Item = &ParameterDefinition> {
        self.in_scope(ParameterScope::Internal)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &ParameterDefinition> {
        self.in_scope(ParameterScope::Output)
    }

    fn in_scope(&self, scope: ParameterScope) -> impl Iterator<Item = &ParameterDefinition> {
        self.parameters.iter().filter(move |p| p.scope == scope)
    }

    /// Reports every structural problem an author can fix. An empty list means
    /// the template is well formed; running it never requires this check.
    pub fn check(&self, limits: &FormulaLimits, order: EvaluationOrder) -> Vec<TemplateIssue> {
        let mut issues = Vec::new();
        if self.name.trim().is_empty() {
            issues.push(TemplateIssue::template("template name is empty"));
        }
        let mut seen = BTreeSet::new();
        for param in &self.parameters {
            if param.name.trim().is_empty() {
                issues.push(TemplateIssue::template("a parameter has an empty name"));
            } else if !seen.insert(param.name.as_str()) {
                issues.push(TemplateIssue::parameter(&param.name, "duplicate parameter name"));
            }
            check_constraints(param, &mut issues);
        }
        References::new(self, limits, order).check(&mut issues);
        issues
    }
}

/// One problem found by [`TemplateDefinition::check`]. `parameter` is `None`
/// when the problem concerns the template itself or its primary formula.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateIssue {
    pub parameter: Option<String>,
    pub message: String,
}

impl TemplateIssue {
    fn template(message: impl Into<String>) -> Self {
        Self {
            parameter: None,
            message: message.into(),
        }
    }

    fn parameter(name: &str, message: impl Into<String>) -> Self {
        Self {
            parameter: Some(name.to_string()),
            message: message.into(),
        }
    }
}

impl fmt::Display for TemplateIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parameter {
            Some(name) => write!(f, "{name}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

fn check_constraints(param: &ParameterDefinition, issues: &mut Vec<TemplateIssue>) {
    let mut report = |message: String| issues.push(TemplateIssue::parameter(&param.name, message));

    if !param.respects_formula_invariant() {
        report(if param.is_input() {
            "input parameters cannot have a formula".to_string()
        } else {
            format!("{} parameters need a formula", param.scope)
        });
    }
    if param.is_required && !param.is_input() {
        report("only input parameters can be required".to_string());
    }
    if (param.min_value.is_some() || param.max_value.is_some())
        && param.data_type != DataType::Number
    {
        report(format!("min/max bounds on a {} parameter", param.data_type));
    }
    if let (Some(min), Some(max)) = (param.min_value, param.max_value)
        && min > max
    {
        report(format!("min value {min} is greater than max value {max}"));
    }
    if let Some(pattern) = &param.regex_pattern {
        if param.data_type != DataType::String {
            report(format!("regex pattern on a {} parameter", param.data_type));
        }
        if let Err(err) = anchored(pattern) {
            report(format!("invalid regex pattern: {err}"));
        }
    }
    if param.data_type == DataType::Enum {
        if param.allowed_values.is_empty() {
            report("enum parameter without allowed values".to_string());
        }
    } else if !param.allowed_values.is_empty() {
        report(format!("allowed values on a {} parameter", param.data_type));
    }
}

/// Name visibility rules for formula references.
struct References<'a> {
    template: &'a TemplateDefinition,
    limits: &'a FormulaLimits,
    order: EvaluationOrder,
    /// Declaration index of every named parameter.
    declared: HashMap<&'a str, (ParameterScope, usize)>,
}

impl<'a> References<'a> {
    fn new(
        template: &'a TemplateDefinition,
        limits: &'a FormulaLimits,
        order: EvaluationOrder,
    ) -> Self {
        let mut declared = HashMap::new();
        for (i, param) in template.parameters.iter().enumerate() {
            declared.entry(param.name.as_str()).or_insert((param.scope, i));
        }
        Self {
            template,
            limits,
            order,
            declared,
        }
    }

    fn check(&self, issues: &mut Vec<TemplateIssue>) {
        let main = match Formula::parse(&self.template.formula, self.limits) {
            Ok(formula) => {
                for name in formula.references() {
                    if !self.visible_to_main(&name) {
                        issues.push(TemplateIssue::template(format!(
                            "primary formula {}",
                            self.describe_unbound(&name)
                        )));
                    }
                }
                Some(formula)
            }
            Err(err) => {
                issues.push(TemplateIssue::template(format!("primary formula: {err}")));
                None
            }
        };
        let main_keys = main.as_ref().map(|f| primary_keys(f.expr()));

        for (index, param) in self.template.parameters.iter().enumerate() {
            if param.is_input() {
                continue;
            }
            let Some(source) = param.formula_source() else {
                continue;
            };
            let formula = match Formula::parse(source, self.limits) {
                Ok(formula) => formula,
                Err(err) => {
                    issues.push(TemplateIssue::parameter(&param.name, err.to_string()));
                    continue;
                }
            };
            for name in formula.references() {
                let visible = match param.scope {
                    ParameterScope::Internal => self.visible_before(&name, index, false),
                    _ => {
                        self.visible_before(&name, index, true)
                            || main_keys.as_ref().is_none_or(|keys| keys.admits(&name))
                    }
                };
                if !visible {
                    issues.push(TemplateIssue::parameter(
                        &param.name,
                        self.describe_unbound(&name),
                    ));
                }
            }
        }

        if self.order == EvaluationOrder::Dependency {
            for scope in [ParameterScope::Internal, ParameterScope::Output] {
                let group = self.template.in_scope(scope).collect();
                if let Err(cycle) = order_parameters(group, self.order, self.limits) {
                    issues.push(TemplateIssue::parameter(cycle.head(), cycle.to_string()));
                }
            }
        }
    }

    fn visible_to_main(&self, name: &str) -> bool {
        matches!(
            self.declared.get(name),
            Some((ParameterScope::Input | ParameterScope::Internal, _))
        )
    }

    /// Whether a derived parameter at `index` can read `name`. Internals see
    /// inputs and internals, outputs also see outputs. Under declared order
    /// derived names must come first.
    fn visible_before(&self, name: &str, index: usize, from_output: bool) -> bool {
        let Some(&(scope, at)) = self.declared.get(name) else {
            return false;
        };
        let sequenced = self.order == EvaluationOrder::Dependency || at < index;
        match scope {
            ParameterScope::Input => true,
            ParameterScope::Internal => from_output || sequenced,
            ParameterScope::Output => from_output && sequenced,
        }
    }

    fn describe_unbound(&self, name: &str) -> String {
        match self.declared.get(name) {
            None => format!("references unknown name '{name}'"),
            Some((ParameterScope::Output, _)) => {
                format!("references output '{name}', which is not available yet")
            }
            Some(_) => format!("references '{name}' before it is declared"),
        }
    }
}

/// Names the primary formula adds to the result set.
enum PrimaryKeys {
    Known(BTreeSet<String>),
    /// The primary result is computed; its shape is only known at run time.
    Open,
}

impl PrimaryKeys {
    fn admits(&self, name: &str) -> bool {
        match self {
            PrimaryKeys::Known(keys) => keys.contains(name),
            PrimaryKeys::Open => true,
        }
    }
}

fn primary_keys(expr: &Expr) -> PrimaryKeys {
    match expr {
        Expr::Object(entries) => {
            PrimaryKeys::Known(entries.iter().map(|(key, _)| key.clone()).collect())
        }
        Expr::Const(_) | Expr::Array(_) | Expr::Op1(..) | Expr::Op2(..) | Expr::App(..) => {
            PrimaryKeys::Known(BTreeSet::from([PRIMARY_RESULT_KEY.to_string()]))
        }
        _ => PrimaryKeys::Open,
    }
}
