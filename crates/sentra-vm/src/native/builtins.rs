//! Builtin native library
//!
//! Installed as globals when a VM is created. Bound methods on arrays,
//! strings and maps resolve to these same functions (see
//! [`crate::method_dispatch`]).

use super::{json, native, Output};
use crate::error::RuntimeError;
use crate::value::{Arity, ArrayRef, MapRef, NativeFunction, Value};
use rand::RngExt;
use std::rc::Rc;

/// Every builtin, bound to `output` for the ones that print
pub fn builtins(output: &Output) -> Vec<Rc<NativeFunction>> {
    let log_output = output.clone();
    vec![
        native("log", Arity::Variadic, move |args| {
            let line = args
                .iter()
                .map(Value::to_display_string)
                .collect::<Vec<_>>()
                .join(" ");
            log_output.write_line(&line);
            Ok(Value::Nil)
        }),
        native("len", Arity::Fixed(1), |args| len(&args[0])),
        native("push", Arity::Fixed(2), |args| {
            array_arg("push", &args[0])?
                .borrow_mut()
                .push(args[1].clone());
            Ok(args[0].clone())
        }),
        native("pop", Arity::Fixed(1), |args| {
            Ok(array_arg("pop", &args[0])?
                .borrow_mut()
                .pop()
                .unwrap_or(Value::Nil))
        }),
        native("shift", Arity::Fixed(1), |args| {
            let items = array_arg("shift", &args[0])?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Ok(Value::Nil);
            }
            Ok(items.remove(0))
        }),
        native("unshift", Arity::Fixed(2), |args| {
            array_arg("unshift", &args[0])?
                .borrow_mut()
                .insert(0, args[1].clone());
            Ok(args[0].clone())
        }),
        native("time", Arity::Fixed(0), |_| {
            Ok(Value::Number(chrono::Utc::now().timestamp() as f64))
        }),
        native("str", Arity::Fixed(1), |args| {
            Ok(Value::string(args[0].to_display_string()))
        }),
        native("join", Arity::Fixed(2), |args| {
            let items = array_arg("join", &args[0])?;
            let sep = string_arg("join", &args[1])?;
            let joined = items
                .borrow()
                .iter()
                .map(Value::to_display_string)
                .collect::<Vec<_>>()
                .join(sep);
            Ok(Value::string(joined))
        }),
        native("contains", Arity::Fixed(2), |args| match &args[0] {
            Value::Array(items) => Ok(Value::Bool(items.borrow().contains(&args[1]))),
            Value::String(s) => Ok(Value::Bool(s.contains(string_arg("contains", &args[1])?))),
            other => Err(expected("contains", "an array or string", other)),
        }),
        native("keys", Arity::Fixed(1), |args| {
            let map = map_arg("keys", &args[0])?;
            let keys = map.borrow().keys().map(|k| Value::String(k.clone())).collect();
            Ok(Value::array(keys))
        }),
        native("values", Arity::Fixed(1), |args| {
            let map = map_arg("values", &args[0])?;
            let values = map.borrow().values().cloned().collect();
            Ok(Value::array(values))
        }),
        native("has", Arity::Fixed(2), |args| {
            let map = map_arg("has", &args[0])?;
            let key = args[1].to_map_key();
            let found = map.borrow().contains_key(&key);
            Ok(Value::Bool(found))
        }),
        native("remove", Arity::Fixed(2), |args| match &args[0] {
            Value::Map(map) => {
                let key = args[1].to_map_key();
                Ok(map.borrow_mut().remove(&key).unwrap_or(Value::Nil))
            }
            Value::Array(items) => {
                let mut items = items.borrow_mut();
                let index = index_arg(&args[1], items.len())?;
                Ok(items.remove(index))
            }
            other => Err(expected("remove", "a map or array", other)),
        }),
        native("upper", Arity::Fixed(1), |args| {
            Ok(Value::string(string_arg("upper", &args[0])?.to_uppercase()))
        }),
        native("lower", Arity::Fixed(1), |args| {
            Ok(Value::string(string_arg("lower", &args[0])?.to_lowercase()))
        }),
        native("trim", Arity::Fixed(1), |args| {
            Ok(Value::string(string_arg("trim", &args[0])?.trim()))
        }),
        native("split", Arity::Fixed(2), |args| {
            let s = string_arg("split", &args[0])?;
            let sep = string_arg("split", &args[1])?;
            let parts: Vec<Value> = if sep.is_empty() {
                s.chars().map(|c| Value::string(c.to_string())).collect()
            } else {
                s.split(sep).map(Value::string).collect()
            };
            Ok(Value::array(parts))
        }),
        native("replace", Arity::Fixed(3), |args| {
            let s = args[0].to_display_string();
            let from = args[1].to_display_string();
            let to = args[2].to_display_string();
            Ok(Value::string(s.replace(&from, &to)))
        }),
        native("starts_with", Arity::Fixed(2), |args| {
            let s = args[0].to_display_string();
            Ok(Value::Bool(s.starts_with(&args[1].to_display_string())))
        }),
        native("ends_with", Arity::Fixed(2), |args| {
            let s = args[0].to_display_string();
            Ok(Value::Bool(s.ends_with(&args[1].to_display_string())))
        }),
        // Arrays
        native("sort", Arity::Fixed(1), |args| {
            sort(array_arg("sort", &args[0])?)?;
            Ok(args[0].clone())
        }),
        native("reverse", Arity::Fixed(1), |args| {
            array_arg("reverse", &args[0])?.borrow_mut().reverse();
            Ok(args[0].clone())
        }),
        native("slice", Arity::Variadic, slice),
        native("insert", Arity::Fixed(3), |args| {
            let items = array_arg("insert", &args[0])?;
            let index = number_arg("insert", &args[1])?;
            let mut items = items.borrow_mut();
            let at = clamp_index(index, items.len());
            items.insert(at, args[2].clone());
            Ok(args[0].clone())
        }),
        native("index_of", Arity::Fixed(2), |args| {
            let items = array_arg("index_of", &args[0])?.borrow();
            let found = items.iter().position(|item| *item == args[1]);
            Ok(Value::Number(found.map_or(-1.0, |i| i as f64)))
        }),
        native("clear", Arity::Fixed(1), |args| {
            array_arg("clear", &args[0])?.borrow_mut().clear();
            Ok(args[0].clone())
        }),
        // Math
        math("abs", f64::abs),
        math("sqrt", f64::sqrt),
        math("round", f64::round),
        math("floor", f64::floor),
        math("ceil", f64::ceil),
        math("sin", f64::sin),
        math("cos", f64::cos),
        math("tan", f64::tan),
        native("pow", Arity::Fixed(2), |args| {
            let base = number_arg("pow", &args[0])?;
            let exp = number_arg("pow", &args[1])?;
            Ok(Value::Number(base.powf(exp)))
        }),
        native("random", Arity::Fixed(0), |_| {
            Ok(Value::Number(rand::rng().random::<f64>()))
        }),
        native("randint", Arity::Fixed(2), |args| {
            let min = number_arg("randint", &args[0])?.ceil();
            let max = number_arg("randint", &args[1])?.floor();
            if !(min.is_finite() && max.is_finite()) || min > max {
                return Err(RuntimeError::type_error(format!(
                    "randint expects min <= max, got {} and {}",
                    args[0], args[1]
                )));
            }
            let n = rand::rng().random_range(min as i64..=max as i64);
            Ok(Value::Number(n as f64))
        }),
        // Values
        native("type", Arity::Fixed(1), |args| {
            Ok(Value::string(args[0].type_name()))
        }),
        native("parse", Arity::Fixed(1), |args| {
            json::parse(string_arg("parse", &args[0])?)
        }),
        native("stringify", Arity::Fixed(1), |args| {
            json::stringify(&args[0]).map(Value::string)
        }),
    ]
}

fn math(name: &'static str, op: fn(f64) -> f64) -> Rc<NativeFunction> {
    native(name, Arity::Fixed(1), move |args| {
        Ok(Value::Number(op(number_arg(name, &args[0])?)))
    })
}

/// Sort numbers or strings in place; mixed arrays are rejected
fn sort(items: &ArrayRef) -> Result<(), RuntimeError> {
    let mut items = items.borrow_mut();
    if items.iter().all(|v| matches!(v, Value::Number(_))) {
        items.sort_by(|a, b| match (a, b) {
            (Value::Number(x), Value::Number(y)) => x.total_cmp(y),
            _ => std::cmp::Ordering::Equal,
        });
    } else if items.iter().all(|v| matches!(v, Value::String(_))) {
        items.sort_by(|a, b| match (a, b) {
            (Value::String(x), Value::String(y)) => x.cmp(y),
            _ => std::cmp::Ordering::Equal,
        });
    } else {
        return Err(RuntimeError::type_error(
            "sort expects an array of only numbers or only strings",
        ));
    }
    Ok(())
}

/// `slice(arr, start?, end?)`: a new array; negative bounds count from
/// the end and out-of-range bounds are clamped
fn slice(args: &[Value]) -> Result<Value, RuntimeError> {
    let Some((arr, bounds)) = args.split_first() else {
        return Err(slice_arity(0));
    };
    if bounds.len() > 2 {
        return Err(slice_arity(args.len()));
    }
    let items = array_arg("slice", arr)?.borrow();
    let len = items.len();
    let bound = |i: usize, default: usize| -> Result<usize, RuntimeError> {
        match bounds.get(i) {
            None | Some(Value::Nil) => Ok(default),
            Some(v) => {
                let n = number_arg("slice", v)?.trunc();
                let n = if n < 0.0 { n + len as f64 } else { n };
                Ok(n.clamp(0.0, len as f64) as usize)
            }
        }
    };
    let end = bound(1, len)?;
    let start = bound(0, 0)?.min(end);
    Ok(Value::array(items[start..end].to_vec()))
}

fn slice_arity(got: usize) -> RuntimeError {
    RuntimeError::ArityError {
        name: "slice".to_string(),
        expected: "1 to 3".to_string(),
        got,
    }
}

/// Insertion point clamped to `0..=len`
fn clamp_index(index: f64, len: usize) -> usize {
    if index.is_nan() || index <= 0.0 {
        0
    } else {
        (index as usize).min(len)
    }
}

fn len(value: &Value) -> Result<Value, RuntimeError> {
    let n = match value {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.borrow().len(),
        Value::Map(map) => map.borrow().len(),
        other => return Err(expected("len", "a string, array or map", other)),
    };
    Ok(Value::Number(n as f64))
}

fn expected(func: &str, what: &str, got: &Value) -> RuntimeError {
    RuntimeError::type_error(format!(
        "{} expects {}, got {}",
        func,
        what,
        got.type_name()
    ))
}

fn array_arg<'a>(func: &str, value: &'a Value) -> Result<&'a ArrayRef, RuntimeError> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(expected(func, "an array", other)),
    }
}

fn map_arg<'a>(func: &str, value: &'a Value) -> Result<&'a MapRef, RuntimeError> {
    match value {
        Value::Map(map) => Ok(map),
        other => Err(expected(func, "a map", other)),
    }
}

fn number_arg(func: &str, value: &Value) -> Result<f64, RuntimeError> {
    match value {
        Value::Number(n) => Ok(*n),
        other => Err(expected(func, "a number", other)),
    }
}

fn string_arg<'a>(func: &str, value: &'a Value) -> Result<&'a str, RuntimeError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(expected(func, "a string", other)),
    }
}

/// Integral, in-range array index
pub(crate) fn index_arg(value: &Value, len: usize) -> Result<usize, RuntimeError> {
    let Value::Number(n) = value else {
        return Err(RuntimeError::type_error(format!(
            "array index must be a number, got {}",
            value.type_name()
        )));
    };
    if n.fract() != 0.0 {
        return Err(RuntimeError::type_error(format!(
            "array index must be an integer, got {}",
            n
        )));
    }
    if *n < 0.0 || *n >= len as f64 {
        return Err(RuntimeError::IndexOutOfBounds { index: *n, len });
    }
    Ok(*n as usize)
}
