//! Evaluation order of derived parameters.
use std::collections::BTreeSet;
use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::formula::{Formula, FormulaLimits};
use crate::parameters::ParameterDefinition;

/// How the derived parameters of one scope are sequenced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EvaluationOrder {
    /// Template declaration order. A formula sees only parameters declared
    /// before it.
    #[default]
    Declared,
    /// Topological order of formula references; ties keep declaration order.
    Dependency,
}

impl EvaluationOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Declared => "declared",
            Self::Dependency => "dependency",
        }
    }
}

impl fmt::Display for EvaluationOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluationOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "declared" => Ok(Self::Declared),
            "dependency" => Ok(Self::Dependency),
            other => Err(format!("unknown evaluation order: {other}")),
        }
    }
}

/// Derived parameters that reference each other in a loop. `path` starts and
/// ends with the same name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("dependency cycle: {}", .path.join(" -> "))]
pub struct DependencyCycle {
    pub path: Vec<String>,
}

impl DependencyCycle {
    /// The parameter the cycle is reported against.
    pub fn head(&self) -> &str {
        self.path.first().map_or("", String::as_str)
    }
}

/// Sequences `group` according to `order`.
///
/// Only references between members of `group` create edges; a formula that
/// does not parse has no edges and fails later, when it is evaluated.
pub fn order_parameters<'a>(
    group: Vec<&'a ParameterDefinition>,
    order: EvaluationOrder,
    limits: &FormulaLimits,
) -> Result<Vec<&'a ParameterDefinition>, DependencyCycle> {
    if order == EvaluationOrder::Declared {
        return Ok(group);
    }
    let names: BTreeSet<&str> = group.iter().map(|p| p.name.as_str()).collect();
    let deps: Vec<BTreeSet<String>> = group
        .iter()
        .map(|param| {
            param
                .formula_source()
                .and_then(|source| Formula::parse(source, limits).ok())
                .map(|formula| {
                    formula
                        .references()
                        .into_iter()
                        .filter(|name| names.contains(name.as_str()))
                        .collect()
                })
                .unwrap_or_default()
        })
        .collect();

    let mut emitted: BTreeSet<&str> = BTreeSet::new();
    let mut pending: Vec<usize> = (0..group.len()).collect();
    let mut ordered = Vec::with_capacity(group.len());
    while !pending.is_empty() {
        let ready = pending
            .iter()
            .position(|&i| deps[i].iter().all(|d| emitted.contains(d.as_str())));
        let Some(at) = ready else {
            return Err(find_cycle(&group, &deps, &pending));
        };
        let i = pending.remove(at);
        emitted.insert(group[i].name.as_str());
        ordered.push(group[i]);
    }
    Ok(ordered)
}

/// Walks unresolved dependencies from the first pending parameter until a
/// name repeats. Every pending parameter has at least one pending dependency,
/// so the walk always closes a loop.
fn find_cycle(
    group: &[&ParameterDefinition],
    deps: &[BTreeSet<String>],
    pending: &[usize],
) -> DependencyCycle {
    let index_of = |name: &str| {
        pending
            .iter()
            .copied()
            .find(|&i| group[i].name == name)
    };
    let mut path: Vec<usize> = Vec::new();
    let mut current = pending.first().copied();
    while let Some(i) = current {
        if let Some(start) = path.iter().position(|&seen| seen == i) {
            let mut names: Vec<String> = path[start..]
                .iter()
                .map(|&j| group[j].name.clone())
                .collect();
            names.push(group[i].name.clone());
            return DependencyCycle { path: names };
        }
        path.push(i);
        current = deps[i].iter().find_map(|d| index_of(d));
    }
    DependencyCycle {
        path: path.iter().map(|&j| group[j].name.clone()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::DataType;

    fn names(ordered: &[&ParameterDefinition]) -> Vec<String> {
        ordered.iter().map(|p| p.name.clone()).collect()
    }

    #[test]
    fn declared_order_is_kept_as_is() {
        let params = [
            ParameterDefinition::internal("b", DataType::Number, "a + 1"),
            ParameterDefinition::internal("a", DataType::Number, "1"),
        ];
        let ordered = order_parameters(
            params.iter().collect(),
            EvaluationOrder::Declared,
            &FormulaLimits::default(),
        )
        .unwrap();
        assert_eq!(names(&ordered), vec!["b", "a"]);
    }

    #[test]
    fn dependency_order_is_stable() {
        let params = [
            ParameterDefinition::internal("total", DataType::Number, "area * price"),
            ParameterDefinition::internal("price", DataType::Number, "10"),
            ParameterDefinition::internal("area", DataType::Number, "w * h"),
            ParameterDefinition::internal("label", DataType::String, "'x'"),
        ];
        let ordered = order_parameters(
            params.iter().collect(),
            EvaluationOrder::Dependency,
            &FormulaLimits::default(),
        )
        .unwrap();
        assert_eq!(names(&ordered), vec!["price", "area", "total", "label"]);
    }

    #[test]
    fn cycles_are_reported_with_their_path() {
        let params = [
            ParameterDefinition::internal("c", DataType::Number, "1"),
            ParameterDefinition::internal("a", DataType::Number, "b + c"),
            ParameterDefinition::internal("b", DataType::Number, "a * 2"),
        ];
        let cycle = order_parameters(
            params.iter().collect(),
            EvaluationOrder::Dependency,
            &FormulaLimits::default(),
        )
        .unwrap_err();
        assert_eq!(cycle.head(), "a");
        assert_eq!(cycle.to_string(), "dependency cycle: a -> b -> a");
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let params = [ParameterDefinition::internal("n", DataType::Number, "n + 1")];
        let cycle = order_parameters(
            params.iter().collect(),
            EvaluationOrder::Dependency,
            &FormulaLimits::default(),
        )
        .unwrap_err();
        assert_eq!(cycle.path, vec!["n", "n"]);
    }

    #[test]
    fn order_parses_from_settings_text() {
        assert_eq!(
            "Dependency".parse::<EvaluationOrder>(),
            Ok(EvaluationOrder::Dependency)
        );
        assert!("random".parse::<EvaluationOrder>().is_err());
    }
}
