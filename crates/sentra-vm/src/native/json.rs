//! JSON conversion for the `parse` and `stringify` builtins

use crate::error::RuntimeError;
use crate::value::{Value, ValueMap};
use std::rc::Rc;

/// Parse JSON text into script values. Objects become maps.
pub fn parse(text: &str) -> Result<Value, RuntimeError> {
    let json: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| RuntimeError::type_error(format!("invalid JSON: {}", e)))?;
    Ok(from_json(json))
}

/// Compact JSON text for a value
pub fn stringify(value: &Value) -> Result<String, RuntimeError> {
    let json = to_json(value, &mut Vec::new())?;
    serde_json::to_string(&json)
        .map_err(|e| RuntimeError::type_error(format!("cannot stringify: {}", e)))
}

fn from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::string(s),
        serde_json::Value::Array(items) => {
            Value::array(items.into_iter().map(from_json).collect())
        }
        serde_json::Value::Object(fields) => {
            let mut map = ValueMap::with_capacity(fields.len());
            for (key, value) in fields {
                map.insert(Rc::from(key), from_json(value));
            }
            Value::map(map)
        }
    }
}

/// `path` holds the collections currently being converted
fn to_json(value: &Value, path: &mut Vec<*const ()>) -> Result<serde_json::Value, RuntimeError> {
    match value {
        Value::Nil => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Number(n) => Ok(number(*n)),
        Value::String(s) => Ok(serde_json::Value::String(s.to_string())),
        Value::Array(items) => {
            let ptr = Rc::as_ptr(items).cast::<()>();
            enter(path, ptr)?;
            let converted = items
                .borrow()
                .iter()
                .map(|item| to_json(item, path))
                .collect::<Result<Vec<_>, _>>();
            path.pop();
            Ok(serde_json::Value::Array(converted?))
        }
        Value::Map(map) => {
            let ptr = Rc::as_ptr(map).cast::<()>();
            enter(path, ptr)?;
            let mut fields = serde_json::Map::new();
            let mut result = Ok(());
            for (key, item) in map.borrow().iter() {
                match to_json(item, path) {
                    Ok(json) => {
                        fields.insert(key.to_string(), json);
                    }
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
            path.pop();
            result.map(|()| serde_json::Value::Object(fields))
        }
        other => Err(RuntimeError::type_error(format!(
            "cannot stringify {}",
            other.type_name()
        ))),
    }
}

fn enter(path: &mut Vec<*const ()>, ptr: *const ()) -> Result<(), RuntimeError> {
    if path.contains(&ptr) {
        return Err(RuntimeError::type_error("cannot stringify a cyclic value"));
    }
    path.push(ptr);
    Ok(())
}

/// Integral numbers are written without a fraction; NaN and infinities
/// become null
fn number(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return serde_json::Value::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_nested_document() {
        let value = parse(r#"{"name": "sentra", "tags": [1, 2.5, true, null]}"#).unwrap();
        let Value::Map(map) = &value else {
            panic!("expected a map, got {:?}", value);
        };
        let map = map.borrow();
        assert_eq!(map.get("name"), Some(&Value::string("sentra")));
        assert_eq!(
            map.get("tags"),
            Some(&Value::array(vec![
                Value::Number(1.0),
                Value::Number(2.5),
                Value::Bool(true),
                Value::Nil,
            ]))
        );
    }

    #[test]
    fn test_parse_error_is_type_error() {
        assert!(matches!(parse("{oops"), Err(RuntimeError::TypeError { .. })));
    }

    #[test]
    fn test_stringify_preserves_map_order() {
        let mut map = ValueMap::new();
        map.insert(Rc::from("z"), Value::Number(1.0));
        map.insert(Rc::from("a"), Value::array(vec![Value::Number(0.5), Value::Nil]));
        assert_eq!(
            stringify(&Value::map(map)).unwrap(),
            r#"{"z":1,"a":[0.5,null]}"#
        );
    }

    #[test]
    fn test_stringify_nan_as_null() {
        assert_eq!(stringify(&Value::Number(f64::NAN)).unwrap(), "null");
    }

    #[test]
    fn test_stringify_rejects_cycles() {
        let arr = Value::array(Vec::new());
        if let Value::Array(items) = &arr {
            items.borrow_mut().push(arr.clone());
        }
        assert!(matches!(stringify(&arr), Err(RuntimeError::TypeError { .. })));
    }

    #[test]
    fn test_shared_value_is_not_a_cycle() {
        let shared = Value::array(vec![Value::Number(1.0)]);
        let outer = Value::array(vec![shared.clone(), shared]);
        assert_eq!(stringify(&outer).unwrap(), "[[1],[1]]");
    }
}
