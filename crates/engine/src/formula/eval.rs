//! Tree-walking evaluator.
use std::cmp::Ordering;
use std::f64::consts;

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::functions;
use crate::error::FormulaError;
use crate::value::{Value, Values};

pub(crate) struct Evaluator<'a> {
    layers: &'a [&'a Values],
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(layers: &'a [&'a Values]) -> Self {
        Self { layers }
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.layers.iter().find_map(|layer| layer.get(name))
    }

    pub(crate) fn eval(&self, expr: &Expr) -> Result<Value, FormulaError> {
        match expr {
            Expr::Const(value) => Ok(value.clone()),
            Expr::Var(name) => self
                .lookup(name)
                .cloned()
                .ok_or_else(|| FormulaError::UndefinedVariable(name.clone())),
            Expr::Member(base, name) => {
                if let Expr::Var(ns) = base.as_ref()
                    && ns == "Math"
                    && self.lookup(ns).is_none()
                {
                    return math_constant(name);
                }
                member(&self.eval(base)?, name)
            }
            Expr::Index(base, index) => index_into(&self.eval(base)?, &self.eval(index)?),
            Expr::Op1(op, operand) => unary(*op, self.eval(operand)?),
            Expr::Op2(BinaryOp::And, l, r) => {
                let left = self.eval(l)?;
                if left.is_truthy() { self.eval(r) } else { Ok(left) }
            }
            Expr::Op2(BinaryOp::Or, l, r) => {
                let left = self.eval(l)?;
                if left.is_truthy() { Ok(left) } else { self.eval(r) }
            }
            Expr::Op2(BinaryOp::Nullish, l, r) => {
                let left = self.eval(l)?;
                if left.is_null() { self.eval(r) } else { Ok(left) }
            }
            Expr::Op2(op, l, r) => binary(*op, self.eval(l)?, self.eval(r)?),
            Expr::If(cond, then_expr, else_expr) => {
                if self.eval(cond)?.is_truthy() {
                    self.eval(then_expr)
                } else {
                    self.eval(else_expr)
                }
            }
            Expr::Array(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expr::Object(entries) => entries
                .iter()
                .map(|(key, item)| Ok((key.clone(), self.eval(item)?)))
                .collect::<Result<Values, FormulaError>>()
                .map(Value::Object),
            Expr::App(name, args) => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                functions::call(name, args)
            }
        }
    }
}

fn math_constant(name: &str) -> Result<Value, FormulaError> {
    match name {
        "PI" => Ok(Value::Number(consts::PI)),
        "E" => Ok(Value::Number(consts::E)),
        other => Err(FormulaError::type_error(format!(
            "Math.{other} is not a constant"
        ))),
    }
}

fn member(base: &Value, name: &str) -> Result<Value, FormulaError> {
    match (base, name) {
        (Value::Object(map), _) => Ok(map.get(name).cloned().unwrap_or_default()),
        (Value::Array(items), "length") => Ok(Value::Number(items.len() as f64)),
        (Value::String(s), "length") => Ok(Value::Number(s.chars().count() as f64)),
        (other, _) => Err(FormulaError::type_error(format!(
            "cannot read property '{name}' of {}",
            other.type_name()
        ))),
    }
}

fn index_into(base: &Value, index: &Value) -> Result<Value, FormulaError> {
    match (base, index) {
        (Value::Array(items), Value::Number(i)) => Ok(position(*i)
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or_default()),
        (Value::String(s), Value::Number(i)) => Ok(position(*i)
            .and_then(|i| s.chars().nth(i))
            .map_or(Value::Null, |c| Value::String(c.to_string()))),
        (Value::Object(map), Value::String(key)) => {
            Ok(map.get(key).cloned().unwrap_or_default())
        }
        (base, index) => Err(FormulaError::type_error(format!(
            "cannot index {} with {}",
            base.type_name(),
            index.type_name()
        ))),
    }
}

/// A non-negative integral index, or `None`.
fn position(i: f64) -> Option<usize> {
    (i >= 0.0 && i.fract() == 0.0).then_some(i as usize)
}

fn unary(op: UnaryOp, operand: Value) -> Result<Value, FormulaError> {
    match (op, operand) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
        (UnaryOp::Negative, Value::Number(n)) => finite("-", -n),
        (UnaryOp::Positive, Value::Number(n)) => finite("+", n),
        (op, other) => Err(FormulaError::type_error(format!(
            "unary '{}' expects a number, got {}",
            if op == UnaryOp::Negative { "-" } else { "+" },
            other.type_name()
        ))),
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, FormulaError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::Neq => Ok(Value::Bool(left != right)),
        BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
            let ordering = compare(op, &left, &right)?;
            let holds = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Lte => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Value::Bool(holds))
        }
        BinaryOp::Add => match (&left, &right) {
            (Value::Number(a), Value::Number(b)) => finite(op.symbol(), a + b),
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::String(format!("{left}{right}")))
            }
            _ => Err(operand_mismatch(op, &left, &right)),
        },
        _ => {
            let (Value::Number(a), Value::Number(b)) = (&left, &right) else {
                return Err(operand_mismatch(op, &left, &right));
            };
            let n = match op {
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Mod => a % b,
                _ => a.powf(*b),
            };
            finite(op.symbol(), n)
        }
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<Ordering, FormulaError> {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
        _ => None,
    };
    ordering.ok_or_else(|| operand_mismatch(op, left, right))
}

fn finite(symbol: &str, n: f64) -> Result<Value, FormulaError> {
    if n.is_finite() {
        Ok(Value::Number(n))
    } else {
        Err(FormulaError::NonFinite(format!("'{symbol}'")))
    }
}

fn operand_mismatch(op: BinaryOp, left: &Value, right: &Value) -> FormulaError {
    FormulaError::type_error(format!(
        "cannot apply '{}' to {} and {}",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use crate::error::FormulaError;
    use crate::formula::{Formula, FormulaLimits};
    use crate::value::{Value, Values};

    fn eval(source: &str, scope: &[(&str, Value)]) -> Result<Value, FormulaError> {
        let scope: Values = scope
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Formula::parse(source, &FormulaLimits::default())
            .unwrap()
            .evaluate(&scope)
    }

    #[test]
    fn arithmetic_follows_precedence() {
        assert_eq!(eval("2 + 3 * 4 - 10 / 5", &[]), Ok(Value::from(12)));
        assert_eq!(eval("2 ** 3 ** 2", &[]), Ok(Value::from(512)));
        assert_eq!(eval("7 % 3", &[]), Ok(Value::from(1)));
        assert_eq!(eval("0.1 + 0.2", &[]), Ok(Value::Number(0.1 + 0.2)));
    }

    #[test]
    fn division_by_zero_is_not_finite() {
        assert_eq!(
            eval("x / 0", &[("x", Value::from(1))]),
            Err(FormulaError::NonFinite("'/'".to_string()))
        );
        assert!(eval("0 / 0", &[]).is_err());
    }

    #[test]
    fn negating_an_infinite_value_is_not_finite() {
        let inf = Value::Number(f64::INFINITY);
        assert_eq!(
            eval("-x", &[("x", inf.clone())]),
            Err(FormulaError::NonFinite("'-'".to_string()))
        );
        assert_eq!(
            eval("+x", &[("x", inf)]),
            Err(FormulaError::NonFinite("'+'".to_string()))
        );
    }

    #[test]
    fn undefined_variables_are_reported() {
        assert_eq!(
            eval("width * 2", &[]),
            Err(FormulaError::UndefinedVariable("width".to_string()))
        );
    }

    #[test]
    fn logical_operators_short_circuit() {
        // the right-hand side would fail if evaluated
        assert_eq!(eval("false && missing", &[]), Ok(Value::Bool(false)));
        assert_eq!(eval("'a' || missing", &[]), Ok(Value::from("a")));
        assert_eq!(eval("null ?? 5", &[]), Ok(Value::from(5)));
        assert_eq!(eval("0 ?? 5", &[]), Ok(Value::from(0)));
        assert_eq!(
            eval("x > 1 ? 'big' : missing", &[("x", Value::from(2))]),
            Ok(Value::from("big"))
        );
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(
            eval("'total: ' + n + ' m'", &[("n", Value::Number(2.5))]),
            Ok(Value::from("total: 2.5 m"))
        );
        assert!(eval("true + 1", &[]).is_err());
    }

    #[test]
    fn comparisons_and_equality() {
        assert_eq!(eval("'abc' < 'abd'", &[]), Ok(Value::Bool(true)));
        assert_eq!(eval("1 === 1 && 1 !== 2", &[]), Ok(Value::Bool(true)));
        assert_eq!(eval("'1' == 1", &[]), Ok(Value::Bool(false)));
        assert!(matches!(eval("'1' < 2", &[]), Err(FormulaError::Type(_))));
    }

    #[test]
    fn members_and_indexes() {
        let obj = Value::from_json(serde_json::json!({
            "dims": {"w": 2, "h": 3},
            "tags": ["a", "b"]
        }));
        let scope = [("o", obj)];
        assert_eq!(eval("o.dims.w * o.dims.h", &scope), Ok(Value::from(6)));
        assert_eq!(eval("o.tags[1]", &scope), Ok(Value::from("b")));
        assert_eq!(eval("o.tags.length", &scope), Ok(Value::from(2)));
        assert_eq!(eval("o['missing']", &scope), Ok(Value::Null));
        assert_eq!(eval("o.tags[9]", &scope), Ok(Value::Null));
        assert!(eval("o.dims.w.x", &scope).is_err());
    }

    #[test]
    fn math_constants_and_builtins() {
        assert_eq!(
            eval("Math.PI", &[]),
            Ok(Value::Number(std::f64::consts::PI))
        );
        assert_eq!(eval("Math.max(1, 4, 2) + min(3, 2)", &[]), Ok(Value::from(6)));
        assert!(eval("Math.random", &[]).is_err());
    }

    #[test]
    fn literals_build_values() {
        let value = eval(
            "{ area: w * h, sides: [w, h] }",
            &[("w", Value::from(2)), ("h", Value::from(5))],
        )
        .unwrap();
        assert_eq!(
            value.to_json(),
            serde_json::json!({"area": 10, "sides": [2, 5]})
        );
    }
}
