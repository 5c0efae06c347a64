//! The builtin allow-list. A formula can call these and nothing else; every
//! function is pure and reads only its arguments.

use chrono::{Datelike, Duration, NaiveDate};

use crate::error::FormulaError;
use crate::value::{Value, format_number, parse_date};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Names a formula may call, sorted.
pub const BUILTINS: &[&str] = &[
    "abs",
    "add_days",
    "avg",
    "ceil",
    "clamp",
    "coalesce",
    "concat",
    "date",
    "day",
    "days_between",
    "floor",
    "len",
    "lower",
    "max",
    "min",
    "month",
    "num",
    "pow",
    "round",
    "sign",
    "sqrt",
    "str",
    "sum",
    "trim",
    "trunc",
    "upper",
    "year",
];

pub(crate) fn is_builtin(name: &str) -> bool {
    BUILTINS.binary_search(&name).is_ok()
}

pub(crate) fn call(name: &str, args: Vec<Value>) -> Result<Value, FormulaError> {
    match name {
        "abs" => unary_number(name, &args, f64::abs),
        "ceil" => unary_number(name, &args, f64::ceil),
        "floor" => unary_number(name, &args, f64::floor),
        "trunc" => unary_number(name, &args, f64::trunc),
        "sqrt" => unary_number(name, &args, f64::sqrt),
        "sign" => unary_number(name, &args, |x| if x == 0.0 { 0.0 } else { x.signum() }),
        "pow" => {
            arity(name, &args, 2, 2, "2")?;
            let base = number_arg(name, &args[0])?;
            let exp = number_arg(name, &args[1])?;
            finite(name, base.powf(exp))
        }
        "round" => {
            arity(name, &args, 1, 2, "1 or 2")?;
            let x = number_arg(name, &args[0])?;
            let digits = match args.get(1) {
                Some(d) => number_arg(name, d)?,
                None => 0.0,
            };
            let factor = 10f64.powi(digits.trunc() as i32);
            finite(name, (x * factor).round() / factor)
        }
        "clamp" => {
            arity(name, &args, 3, 3, "3")?;
            let x = number_arg(name, &args[0])?;
            let lo = number_arg(name, &args[1])?;
            let hi = number_arg(name, &args[2])?;
            if lo > hi {
                return Err(FormulaError::type_error(format!(
                    "clamp bounds are inverted ({} > {})",
                    format_number(lo),
                    format_number(hi)
                )));
            }
            finite(name, x.clamp(lo, hi))
        }
        "min" => fold_numbers(name, &args, f64::min),
        "max" => fold_numbers(name, &args, f64::max),
        "sum" => {
            let numbers = numbers(name, &args)?;
            finite(name, numbers.iter().sum())
        }
        "avg" => {
            let numbers = numbers(name, &args)?;
            if numbers.is_empty() {
                return Err(FormulaError::type_error("avg of an empty list"));
            }
            finite(name, numbers.iter().sum::<f64>() / numbers.len() as f64)
        }
        "concat" => Ok(Value::String(
            args.iter().map(ToString::to_string).collect::<String>(),
        )),
        "upper" => unary_string(name, &args, |s| s.to_uppercase()),
        "lower" => unary_string(name, &args, |s| s.to_lowercase()),
        "trim" => unary_string(name, &args, |s| s.trim().to_string()),
        "len" => {
            arity(name, &args, 1, 1, "1")?;
            let len = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => return Err(type_mismatch(name, "a string, array or object", other)),
            };
            Ok(Value::Number(len as f64))
        }
        "str" => {
            arity(name, &args, 1, 1, "1")?;
            Ok(Value::String(args[0].to_string()))
        }
        "num" => {
            arity(name, &args, 1, 1, "1")?;
            match &args[0] {
                Value::Number(n) => Ok(Value::Number(*n)),
                Value::Bool(b) => Ok(Value::Number(if *b { 1.0 } else { 0.0 })),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .map(Value::Number)
                    .ok_or_else(|| {
                        FormulaError::type_error(format!("num: '{s}' is not a number"))
                    }),
                other => Err(type_mismatch(name, "a number, boolean or string", other)),
            }
        }
        "coalesce" => Ok(args.into_iter().find(|v| !v.is_null()).unwrap_or_default()),
        "date" => date(name, &args),
        "year" => date_part(name, &args, |d| f64::from(d.year())),
        "month" => date_part(name, &args, |d| f64::from(d.month())),
        "day" => date_part(name, &args, |d| f64::from(d.day())),
        "add_days" => {
            arity(name, &args, 2, 2, "2")?;
            let start = date_arg(name, &args[0])?;
            let days = number_arg(name, &args[1])?;
            let millis = (days * MILLIS_PER_DAY).round();
            Duration::try_milliseconds(millis as i64)
                .and_then(|delta| start.checked_add_signed(delta))
                .map(Value::Date)
                .ok_or_else(|| FormulaError::NonFinite(name.to_string()))
        }
        "days_between" => {
            arity(name, &args, 2, 2, "2")?;
            let from = date_arg(name, &args[0])?;
            let to = date_arg(name, &args[1])?;
            let millis = (to - from).num_milliseconds() as f64;
            Ok(Value::Number(millis / MILLIS_PER_DAY))
        }
        other => Err(FormulaError::UnknownFunction(other.to_string())),
    }
}

fn arity(
    name: &str,
    args: &[Value],
    min: usize,
    max: usize,
    expected: &'static str,
) -> Result<(), FormulaError> {
    if args.len() < min || args.len() > max {
        return Err(FormulaError::Arity {
            name: name.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn type_mismatch(name: &str, expected: &str, got: &Value) -> FormulaError {
    FormulaError::type_error(format!(
        "{name} expects {expected}, got {}",
        got.type_name()
    ))
}

fn finite(name: &str, n: f64) -> Result<Value, FormulaError> {
    if n.is_finite() {
        Ok(Value::Number(n))
    } else {
        Err(FormulaError::NonFinite(format!("{name}()")))
    }
}

fn number_arg(name: &str, value: &Value) -> Result<f64, FormulaError> {
    value
        .as_f64()
        .ok_or_else(|| type_mismatch(name, "a number", value))
}

fn date_arg(name: &str, value: &Value) -> Result<chrono::DateTime<chrono::Utc>, FormulaError> {
    match value {
        Value::Date(d) => Ok(*d),
        Value::String(s) => parse_date(s).ok_or_else(|| {
            FormulaError::type_error(format!("{name}: '{s}' is not a valid date"))
        }),
        other => Err(type_mismatch(name, "a date", other)),
    }
}

fn unary_number(name: &str, args: &[Value], f: fn(f64) -> f64) -> Result<Value, FormulaError> {
    arity(name, args, 1, 1, "1")?;
    finite(name, f(number_arg(name, &args[0])?))
}

fn unary_string(
    name: &str,
    args: &[Value],
    f: fn(&str) -> String,
) -> Result<Value, FormulaError> {
    arity(name, args, 1, 1, "1")?;
    match &args[0] {
        Value::String(s) => Ok(Value::String(f(s))),
        other => Err(type_mismatch(name, "a string", other)),
    }
}

/// Numbers from either a single array argument or the argument list itself.
fn numbers(name: &str, args: &[Value]) -> Result<Vec<f64>, FormulaError> {
    let items = match args {
        [Value::Array(items)] => items.as_slice(),
        _ => args,
    };
    items.iter().map(|v| number_arg(name, v)).collect()
}

fn fold_numbers(
    name: &str,
    args: &[Value],
    f: fn(f64, f64) -> f64,
) -> Result<Value, FormulaError> {
    let numbers = numbers(name, args)?;
    let folded = numbers
        .into_iter()
        .reduce(f)
        .ok_or_else(|| FormulaError::Arity {
            name: name.to_string(),
            expected: "at least 1",
            got: 0,
        })?;
    finite(name, folded)
}

fn date(name: &str, args: &[Value]) -> Result<Value, FormulaError> {
    match args {
        [single] => date_arg(name, single).map(Value::Date),
        [y, m, d] => {
            let (y, m, d) = (number_arg(name, y)?, number_arg(name, m)?, number_arg(name, d)?);
            NaiveDate::from_ymd_opt(y as i32, m as u32, d as u32)
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| Value::Date(naive.and_utc()))
                .ok_or_else(|| {
                    FormulaError::type_error(format!(
                        "date: {}-{}-{} is not a calendar date",
                        format_number(y),
                        format_number(m),
                        format_number(d)
                    ))
                })
        }
        _ => Err(FormulaError::Arity {
            name: name.to_string(),
            expected: "1 or 3",
            got: args.len(),
        }),
    }
}

fn date_part(
    name: &str,
    args: &[Value],
    f: fn(&chrono::DateTime<chrono::Utc>) -> f64,
) -> Result<Value, FormulaError> {
    arity(name, args, 1, 1, "1")?;
    Ok(Value::Number(f(&date_arg(name, &args[0])?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(x: f64) -> Value {
        Value::Number(x)
    }

    #[test]
    fn builtins_are_sorted_for_lookup() {
        let mut sorted = BUILTINS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, BUILTINS);
        assert!(is_builtin("days_between"));
        assert!(!is_builtin("eval"));
    }

    #[test]
    fn min_max_accept_lists_and_arrays() {
        assert_eq!(call("min", vec![n(3.0), n(1.0), n(2.0)]), Ok(n(1.0)));
        assert_eq!(
            call("max", vec![Value::Array(vec![n(3.0), n(7.0)])]),
            Ok(n(7.0))
        );
        assert!(matches!(
            call("max", vec![]),
            Err(FormulaError::Arity { got: 0, .. })
        ));
    }

    #[test]
    fn infinite_arguments_do_not_pass_through() {
        let inf = n(f64::INFINITY);
        assert_eq!(
            call("max", vec![inf.clone(), n(1.0)]),
            Err(FormulaError::NonFinite("max()".to_string()))
        );
        assert_eq!(
            call("min", vec![n(f64::NEG_INFINITY), n(1.0)]),
            Err(FormulaError::NonFinite("min()".to_string()))
        );
        assert_eq!(
            call("clamp", vec![inf, n(0.0), n(f64::INFINITY)]),
            Err(FormulaError::NonFinite("clamp()".to_string()))
        );
    }

    #[test]
    fn rounding_with_digits() {
        assert_eq!(call("round", vec![n(2.346), n(2.0)]), Ok(n(2.35)));
        assert_eq!(call("round", vec![n(2.5)]), Ok(n(3.0)));
        assert_eq!(call("ceil", vec![n(4.01)]), Ok(n(5.0)));
    }

    #[test]
    fn non_finite_results_are_errors() {
        assert_eq!(
            call("sqrt", vec![n(-1.0)]),
            Err(FormulaError::NonFinite("sqrt()".to_string()))
        );
        assert!(call("pow", vec![n(10.0), n(400.0)]).is_err());
    }

    #[test]
    fn type_errors_name_the_function() {
        assert_eq!(
            call("abs", vec![Value::from("x")]),
            Err(FormulaError::Type("abs expects a number, got string".to_string()))
        );
    }

    #[test]
    fn dates() {
        let start = call("date", vec![Value::from("2025-01-30")]).unwrap();
        let later = call("add_days", vec![start.clone(), n(3.0)]).unwrap();
        assert_eq!(call("month", vec![later.clone()]), Ok(n(2.0)));
        assert_eq!(call("day", vec![later.clone()]), Ok(n(2.0)));
        assert_eq!(call("days_between", vec![start, later]), Ok(n(3.0)));
        assert!(call("date", vec![n(2025.0), n(2.0), n(30.0)]).is_err());
    }

    #[test]
    fn strings() {
        assert_eq!(
            call("concat", vec![Value::from("L="), n(2.5), Value::from("m")]),
            Ok(Value::from("L=2.5m"))
        );
        assert_eq!(call("len", vec![Value::from("año")]), Ok(n(3.0)));
        assert_eq!(call("num", vec![Value::from(" 4.5 ")]), Ok(n(4.5)));
        assert_eq!(
            call("coalesce", vec![Value::Null, n(0.0)]),
            Ok(n(0.0))
        );
    }
}
