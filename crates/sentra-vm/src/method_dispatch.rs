//! Method dispatch table
//!
//! Maps `(TypeTag, method_name)` to the builtin that implements it. The
//! receiver is passed as the builtin's first argument.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Receiver types that support method call syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    Array,
    String,
    Map,
}

impl TypeTag {
    pub fn of(value: &Value) -> Option<TypeTag> {
        match value {
            Value::Array(_) => Some(TypeTag::Array),
            Value::String(_) => Some(TypeTag::String),
            Value::Map(_) => Some(TypeTag::Map),
            _ => None,
        }
    }
}

const ARRAY_METHODS: &[&str] = &[
    "push", "pop", "shift", "unshift", "len", "join", "contains", "sort", "reverse", "slice",
    "insert", "index_of", "clear",
];
const STRING_METHODS: &[&str] = &[
    "len", "upper", "lower", "split", "trim", "contains", "replace", "starts_with", "ends_with",
];
const MAP_METHODS: &[&str] = &["keys", "values", "len", "has", "remove"];

/// Resolve a method call to its builtin function name.
/// Returns None if the type/method combination is not registered.
pub fn resolve_method(type_tag: TypeTag, method_name: &str) -> Option<&'static str> {
    let table = match type_tag {
        TypeTag::Array => ARRAY_METHODS,
        TypeTag::String => STRING_METHODS,
        TypeTag::Map => MAP_METHODS,
    };
    table.iter().copied().find(|m| *m == method_name)
}
