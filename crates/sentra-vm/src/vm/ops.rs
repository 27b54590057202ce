//! Value operations used by the dispatch loop
//!
//! Pure functions over [`Value`]s: arithmetic, ordering, indexing and
//! iteration snapshots. None of them touch VM state.

use crate::error::RuntimeError;
use crate::method_dispatch::{resolve_method, TypeTag};
use crate::native::builtins::index_arg;
use crate::value::{BoundMethod, Value};
use std::cmp::Ordering;
use std::rc::Rc;

/// Number addition, or string concatenation when either side is a string
pub fn add(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(Value::Number(x + y)),
        (Value::String(_), _) | (_, Value::String(_)) => Ok(concat(a, b)),
        _ => Err(operand_error("add", a, b)),
    }
}

pub fn concat(a: &Value, b: &Value) -> Value {
    let mut s = a.to_display_string();
    s.push_str(&b.to_display_string());
    Value::string(s)
}

pub fn sub(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    numbers("subtract", a, b).map(|(x, y)| Value::Number(x - y))
}

pub fn mul(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    numbers("multiply", a, b).map(|(x, y)| Value::Number(x * y))
}

pub fn div(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    let (x, y) = numbers("divide", a, b)?;
    if y == 0.0 {
        return Err(RuntimeError::DivisionByZero);
    }
    Ok(Value::Number(x / y))
}

/// Truncated remainder: the result takes the sign of the dividend
pub fn modulo(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    let (x, y) = numbers("take the remainder of", a, b)?;
    if y == 0.0 {
        return Err(RuntimeError::DivisionByZero);
    }
    Ok(Value::Number(x % y))
}

pub fn negate(a: &Value) -> Result<Value, RuntimeError> {
    match a {
        Value::Number(n) => Ok(Value::Number(-n)),
        other => Err(RuntimeError::type_error(format!(
            "cannot negate {}",
            other.type_name()
        ))),
    }
}

/// Ordering between two numbers or two strings
///
/// `None` means the operands are unordered (a NaN is involved).
pub fn compare(a: &Value, b: &Value) -> Result<Option<Ordering>, RuntimeError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(x.partial_cmp(y)),
        (Value::String(x), Value::String(y)) => Ok(Some(x.cmp(y))),
        _ => Err(operand_error("compare", a, b)),
    }
}

fn numbers(verb: &str, a: &Value, b: &Value) -> Result<(f64, f64), RuntimeError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok((*x, *y)),
        _ => Err(operand_error(verb, a, b)),
    }
}

fn operand_error(verb: &str, a: &Value, b: &Value) -> RuntimeError {
    RuntimeError::type_error(format!(
        "cannot {} {} and {}",
        verb,
        a.type_name(),
        b.type_name()
    ))
}

/// Length of a string (in characters), array or map
pub fn length(value: &Value) -> Result<usize, RuntimeError> {
    match value {
        Value::String(s) => Ok(s.chars().count()),
        Value::Array(items) => Ok(items.borrow().len()),
        Value::Map(map) => Ok(map.borrow().len()),
        other => Err(RuntimeError::type_error(format!(
            "{} has no length",
            other.type_name()
        ))),
    }
}

fn bound(receiver: &Value, method: &Rc<str>) -> Value {
    Value::BoundMethod(Rc::new(BoundMethod {
        receiver: receiver.clone(),
        method: method.clone(),
    }))
}

/// `collection[key]`
pub fn index(collection: &Value, key: &Value) -> Result<Value, RuntimeError> {
    match (collection, key) {
        (Value::Array(items), Value::Number(_)) => {
            let items = items.borrow();
            let i = index_arg(key, items.len())?;
            Ok(items[i].clone())
        }
        (Value::String(s), Value::Number(_)) => {
            let len = s.chars().count();
            let i = index_arg(key, len)?;
            Ok(s.chars()
                .nth(i)
                .map(|c| Value::string(c.to_string()))
                .unwrap_or(Value::Nil))
        }
        (Value::Array(_) | Value::String(_), Value::String(name)) => {
            if name.as_ref() == "length" {
                Ok(Value::Number(length(collection)? as f64))
            } else {
                Ok(bound(collection, name))
            }
        }
        (Value::Map(map), _) => {
            let key = key.to_map_key();
            if let Some(value) = map.borrow().get(&key) {
                return Ok(value.clone());
            }
            if resolve_method(TypeTag::Map, &key).is_some() {
                return Ok(bound(collection, &key));
            }
            Err(RuntimeError::KeyNotFound {
                key: key.to_string(),
            })
        }
        (Value::Array(_), other) => Err(RuntimeError::type_error(format!(
            "array index must be a number, got {}",
            other.type_name()
        ))),
        (other, _) => Err(RuntimeError::type_error(format!(
            "cannot index {}",
            other.type_name()
        ))),
    }
}

/// `collection[key] = value`
pub fn set_index(collection: &Value, key: &Value, value: Value) -> Result<(), RuntimeError> {
    match collection {
        Value::Array(items) => {
            let mut items = items.borrow_mut();
            let i = index_arg(key, items.len())?;
            items[i] = value;
            Ok(())
        }
        Value::Map(map) => {
            // The key may be the map itself; stringify before borrowing.
            let key = key.to_map_key();
            map.borrow_mut().insert(key, value);
            Ok(())
        }
        other => Err(RuntimeError::type_error(format!(
            "cannot assign into {}",
            other.type_name()
        ))),
    }
}

/// Characters `start..end` of a string
pub fn substring(s: &Value, start: &Value, end: &Value) -> Result<Value, RuntimeError> {
    let Value::String(s) = s else {
        return Err(RuntimeError::type_error(format!(
            "substring expects a string, got {}",
            s.type_name()
        )));
    };
    let len = s.chars().count();
    // Both bounds may equal len.
    let start = index_arg(start, len + 1)?;
    let end = index_arg(end, len + 1)?;
    if end < start {
        return Err(RuntimeError::IndexOutOfBounds {
            index: end as f64,
            len,
        });
    }
    Ok(Value::string(
        s.chars().skip(start).take(end - start).collect::<String>(),
    ))
}

/// Elements visited by a for-in loop, captured when the loop starts
pub fn iter_snapshot(value: &Value) -> Result<Vec<Value>, RuntimeError> {
    match value {
        Value::Array(items) => Ok(items.borrow().clone()),
        Value::Map(map) => Ok(map
            .borrow()
            .keys()
            .map(|k| Value::String(k.clone()))
            .collect()),
        Value::String(s) => Ok(s.chars().map(|c| Value::string(c.to_string())).collect()),
        other => Err(RuntimeError::type_error(format!(
            "cannot iterate over {}",
            other.type_name()
        ))),
    }
}
