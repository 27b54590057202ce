//! Runtime value representation
//!
//! - Nil, Bool, Number: immediate values
//! - String: immutable, reference-counted (`Rc<str>`)
//! - Array, Map: shared, mutable in place (`Rc<RefCell<..>>`); every alias
//!   observes every mutation
//! - Function: compiled template (constant pool only)
//! - Closure, NativeFunction, BoundMethod: callables
//! - Channel, Task: concurrency handles
//! - Error: a caught runtime error
//!
//! Heap values use `Rc` because exactly one task runs at a time.

use crate::bytecode::Chunk;
use crate::concurrency::{ChannelRef, TaskHandle};
use crate::error::RuntimeError;
use crate::vm::UpvalueRef;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Shared mutable array
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

/// Shared mutable map
pub type MapRef = Rc<RefCell<ValueMap>>;

/// Host implementation of a native function
pub type NativeFn = Rc<dyn Fn(&[Value]) -> Result<Value, RuntimeError>>;

/// String-keyed map that iterates in insertion order
#[derive(Clone, Debug, Default)]
pub struct ValueMap {
    entries: Vec<(Rc<str>, Value)>,
    index: HashMap<Rc<str>, usize>,
}

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or overwrite. Overwriting keeps the key's original position.
    pub fn insert(&mut self, key: Rc<str>, value: Value) {
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    /// Remove a key, shifting later entries down to keep insertion order.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let position = self.index.remove(key)?;
        let (_, value) = self.entries.remove(position);
        for (k, _) in &self.entries[position..] {
            if let Some(slot) = self.index.get_mut(k) {
                *slot -= 1;
            }
        }
        Some(value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Rc<str>> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Rc<str>, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

impl PartialEq for ValueMap {
    /// Same key set with equal values; order is ignored.
    fn eq(&self, other: &Self) -> bool {
        maps_equal(self, other, &mut Vec::new())
    }
}

/// Compiled function template
///
/// Lives in a constant pool; OpClosure turns it into a callable [`Closure`].
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionProto {
    pub name: Rc<str>,
    /// Declared parameter count (fixed parameters only for variadic functions)
    pub arity: u8,
    /// Extra arguments are collected into a trailing array local
    pub variadic: bool,
    /// Total local slots, parameters included
    pub local_count: u16,
    /// Number of upvalue descriptors OpClosure reads
    pub upvalue_count: u8,
    pub chunk: Rc<Chunk>,
}

impl FunctionProto {
    /// Slots reserved at frame entry
    pub fn frame_slots(&self) -> usize {
        let params = self.arity as usize + usize::from(self.variadic);
        params.max(self.local_count as usize)
    }
}

/// Function template plus captured upvalues
pub struct Closure {
    pub proto: Rc<FunctionProto>,
    pub upvalues: Vec<UpvalueRef>,
}

/// Native function arity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    Variadic,
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Fixed(n) => write!(f, "{}", n),
            Arity::Variadic => write!(f, "any number of"),
        }
    }
}

/// Host-implemented builtin
pub struct NativeFunction {
    pub name: Rc<str>,
    pub arity: Arity,
    pub func: NativeFn,
}

/// Receiver plus a method name resolved at call time
#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub method: Rc<str>,
}

/// Runtime value
#[derive(Clone)]
pub enum Value {
    /// Absence of a value; falsy
    Nil,
    /// Boolean; `false` is the only falsy non-nil value
    Bool(bool),
    /// IEEE-754 double
    Number(f64),
    /// Immutable string
    String(Rc<str>),
    /// Shared mutable array
    Array(ArrayRef),
    /// Shared mutable map
    Map(MapRef),
    /// Function template (constant pool only)
    Function(Rc<FunctionProto>),
    Closure(Rc<Closure>),
    NativeFunction(Rc<NativeFunction>),
    BoundMethod(Rc<BoundMethod>),
    Channel(ChannelRef),
    Task(Rc<TaskHandle>),
    /// Runtime error delivered to a catch handler
    Error(Rc<RuntimeError>),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Rc::from(s.as_ref()))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn map(map: ValueMap) -> Self {
        Value::Map(Rc::new(RefCell::new(map)))
    }

    pub fn error(error: RuntimeError) -> Self {
        Value::Error(Rc::new(error))
    }

    /// Type name reported by TypeOf
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Function(_)
            | Value::Closure(_)
            | Value::NativeFunction(_)
            | Value::BoundMethod(_) => "function",
            Value::Channel(_) => "channel",
            Value::Task(_) => "task",
            Value::Error(_) => "error",
        }
    }

    /// Only nil and false are falsy
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Canonical string form (what Print, ToString and string Add use)
    pub fn to_display_string(&self) -> String {
        self.to_string()
    }

    /// Key used when this value indexes a map
    pub fn to_map_key(&self) -> Rc<str> {
        match self {
            Value::String(s) => s.clone(),
            other => Rc::from(other.to_string()),
        }
    }
}

/// Integral values print without a fraction
pub(crate) fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Structural equality
///
/// Arrays and maps compare by contents; closures, natives, channels and
/// tasks compare by identity; NaN is unequal to itself. Self-referencing
/// collections compare equal when their shapes match.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        values_equal(self, other, &mut Vec::new())
    }
}

/// Pairs of collections already under comparison
type SeenPairs = Vec<(*const (), *const ())>;

fn values_equal(a: &Value, b: &Value, seen: &mut SeenPairs) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => {
            if Rc::ptr_eq(a, b) || !first_visit(seen, Rc::as_ptr(a).cast(), Rc::as_ptr(b).cast()) {
                return true;
            }
            let (a, b) = (a.borrow(), b.borrow());
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y, seen))
        }
        (Value::Map(a), Value::Map(b)) => {
            if Rc::ptr_eq(a, b) || !first_visit(seen, Rc::as_ptr(a).cast(), Rc::as_ptr(b).cast()) {
                return true;
            }
            maps_equal(&a.borrow(), &b.borrow(), seen)
        }
        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b) || a == b,
        (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
        (Value::NativeFunction(a), Value::NativeFunction(b)) => Rc::ptr_eq(a, b),
        (Value::BoundMethod(a), Value::BoundMethod(b)) => {
            a.method == b.method && values_equal(&a.receiver, &b.receiver, seen)
        }
        (Value::Channel(a), Value::Channel(b)) => Rc::ptr_eq(a, b),
        (Value::Task(a), Value::Task(b)) => a.id() == b.id(),
        (Value::Error(a), Value::Error(b)) => a == b,
        _ => false,
    }
}

fn maps_equal(a: &ValueMap, b: &ValueMap, seen: &mut SeenPairs) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(k, v)| b.get(k).is_some_and(|other| values_equal(v, other, seen)))
}

/// Record the pair; false if it was already being compared
fn first_visit(seen: &mut SeenPairs, a: *const (), b: *const ()) -> bool {
    if seen.contains(&(a, b)) {
        return false;
    }
    seen.push((a, b));
    true
}

#[derive(Clone, Copy, PartialEq)]
enum Style {
    /// Canonical form of a top-level value
    Display,
    /// Inside a collection: strings are quoted
    Nested,
    Debug,
}

/// Write `value`, printing `[...]` or `{...}` for a collection that
/// contains itself
fn write_value(
    value: &Value,
    f: &mut fmt::Formatter<'_>,
    style: Style,
    open: &mut Vec<*const ()>,
) -> fmt::Result {
    let inner = if style == Style::Debug { Style::Debug } else { Style::Nested };
    match value {
        Value::Array(items) => {
            let ptr = Rc::as_ptr(items).cast::<()>();
            if open.contains(&ptr) {
                return f.write_str("[...]");
            }
            open.push(ptr);
            f.write_str("[")?;
            for (i, item) in items.borrow().iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_value(item, f, inner, open)?;
            }
            open.pop();
            f.write_str("]")
        }
        Value::Map(map) => {
            let ptr = Rc::as_ptr(map).cast::<()>();
            if open.contains(&ptr) {
                return f.write_str("{...}");
            }
            open.push(ptr);
            f.write_str("{")?;
            for (i, (key, item)) in map.borrow().iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                if style == Style::Debug {
                    write!(f, "{:?}: ", key.as_ref())?;
                } else {
                    write!(f, "{}: ", key)?;
                }
                write_value(item, f, inner, open)?;
            }
            open.pop();
            f.write_str("}")
        }
        Value::BoundMethod(bound) if style == Style::Debug => {
            f.write_str("BoundMethod(")?;
            write_value(&bound.receiver, f, Style::Debug, open)?;
            write!(f, ".{})", bound.method)
        }
        other if style == Style::Debug => write_debug_leaf(other, f),
        Value::String(s) if style == Style::Nested => write!(f, "{:?}", s.as_ref()),
        other => write_display_leaf(other, f),
    }
}

fn write_display_leaf(value: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Value::Nil => write!(f, "nil"),
        Value::Bool(b) => write!(f, "{}", b),
        Value::Number(n) => write!(f, "{}", format_number(*n)),
        Value::String(s) => write!(f, "{}", s),
        Value::Function(proto) => write!(f, "<fn {}>", proto.name),
        Value::Closure(closure) => write!(f, "<fn {}>", closure.proto.name),
        Value::NativeFunction(native) => write!(f, "<native fn {}>", native.name),
        Value::BoundMethod(bound) => write!(f, "<method {}>", bound.method),
        Value::Channel(_) => write!(f, "<channel>"),
        Value::Task(task) => write!(f, "<task {}>", task.id()),
        Value::Error(err) => write!(f, "{}", err),
        Value::Array(_) | Value::Map(_) => Ok(()),
    }
}

fn write_debug_leaf(value: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Value::Nil => write!(f, "Nil"),
        Value::Bool(b) => write!(f, "Bool({})", b),
        Value::Number(n) => write!(f, "Number({})", n),
        Value::String(s) => write!(f, "String({:?})", s.as_ref()),
        Value::Function(proto) => write!(f, "Function({})", proto.name),
        Value::Closure(closure) => write!(f, "Closure({})", closure.proto.name),
        Value::NativeFunction(native) => write!(f, "NativeFunction({})", native.name),
        Value::BoundMethod(bound) => write!(f, "BoundMethod({})", bound.method),
        Value::Channel(_) => write!(f, "Channel"),
        Value::Task(task) => write!(f, "Task({})", task.id()),
        Value::Error(err) => write!(f, "Error({:?})", err),
        Value::Array(_) | Value::Map(_) => Ok(()),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(self, f, Style::Display, &mut Vec::new())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(self, f, Style::Debug, &mut Vec::new())
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Closure({}, {} upvalues)", self.proto.name, self.upvalues.len())
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({}, {:?})", self.name, self.arity)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(ns: &[f64]) -> Value {
        Value::array(ns.iter().map(|n| Value::Number(*n)).collect())
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Number(0.0).is_truthy());
        assert!(Value::string("").is_truthy());
        assert!(Value::array(vec![]).is_truthy());
    }

    #[test]
    fn test_array_equality_is_structural() {
        assert_eq!(numbers(&[1.0, 2.0]), numbers(&[1.0, 2.0]));
        assert_ne!(numbers(&[1.0, 2.0]), numbers(&[1.0, 3.0]));
        assert_ne!(numbers(&[1.0]), numbers(&[1.0, 1.0]));
    }

    #[test]
    fn test_map_equality_ignores_order() {
        let mut a = ValueMap::new();
        a.insert(Rc::from("x"), Value::Number(1.0));
        a.insert(Rc::from("y"), Value::Number(2.0));
        let mut b = ValueMap::new();
        b.insert(Rc::from("y"), Value::Number(2.0));
        b.insert(Rc::from("x"), Value::Number(1.0));
        assert_eq!(Value::map(a), Value::map(b));
    }

    #[test]
    fn test_nan_is_not_equal_to_itself() {
        assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));
    }

    #[test]
    fn test_mixed_types_unequal() {
        assert_ne!(Value::Number(0.0), Value::Bool(false));
        assert_ne!(Value::Nil, Value::Bool(false));
        assert_ne!(Value::string("1"), Value::Number(1.0));
    }

    #[test]
    fn test_map_preserves_insertion_order() {
        let mut map = ValueMap::new();
        for key in ["b", "a", "c"] {
            map.insert(Rc::from(key), Value::Nil);
        }
        map.insert(Rc::from("a"), Value::Bool(true));
        let keys: Vec<&str> = map.keys().map(|k| k.as_ref()).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_map_remove_then_reinsert_moves_to_end() {
        let mut map = ValueMap::new();
        for key in ["a", "b", "c"] {
            map.insert(Rc::from(key), Value::Nil);
        }
        assert_eq!(map.remove("a"), Some(Value::Nil));
        assert_eq!(map.get("c"), Some(&Value::Nil));
        map.insert(Rc::from("a"), Value::Number(1.0));
        let keys: Vec<&str> = map.keys().map(|k| k.as_ref()).collect();
        assert_eq!(keys, vec!["b", "c", "a"]);
        assert_eq!(map.get("a"), Some(&Value::Number(1.0)));
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(Value::Number(7.0).to_string(), "7");
        assert_eq!(Value::Number(-0.5).to_string(), "-0.5");
        assert_eq!(Value::Nil.to_string(), "nil");

        let mut map = ValueMap::new();
        map.insert(Rc::from("name"), Value::string("ada"));
        map.insert(Rc::from("tags"), numbers(&[1.0, 2.5]));
        assert_eq!(Value::map(map).to_string(), r#"{name: "ada", tags: [1, 2.5]}"#);
    }

    #[test]
    fn test_map_key_of_number() {
        assert_eq!(Value::Number(3.0).to_map_key().as_ref(), "3");
        assert_eq!(Value::string("k").to_map_key().as_ref(), "k");
    }

    #[test]
    fn test_shared_array_mutation_visible_through_alias() {
        let a = Value::array(vec![]);
        let alias = a.clone();
        if let Value::Array(items) = &a {
            items.borrow_mut().push(Value::Number(1.0));
        }
        assert_eq!(alias, numbers(&[1.0]));
    }

    fn self_containing_array() -> Value {
        let a = Value::array(vec![Value::Number(1.0)]);
        if let Value::Array(items) = &a {
            items.borrow_mut().push(a.clone());
        }
        a
    }

    #[test]
    fn test_display_of_cyclic_collections() {
        let a = self_containing_array();
        assert_eq!(a.to_string(), "[1, [...]]");
        assert_eq!(a.to_map_key().as_ref(), "[1, [...]]");

        let map = Value::map(ValueMap::new());
        if let Value::Map(inner) = &map {
            inner.borrow_mut().insert(Rc::from("me"), map.clone());
        }
        assert_eq!(map.to_string(), "{me: {...}}");
        assert_eq!(format!("{:?}", map), r#"{"me": {...}}"#);
    }

    #[test]
    fn test_distinct_cycles_compare_structurally() {
        let a = self_containing_array();
        let b = self_containing_array();
        assert_eq!(a, b);

        let c = Value::array(vec![Value::Number(2.0)]);
        if let Value::Array(items) = &c {
            items.borrow_mut().push(c.clone());
        }
        assert_ne!(a, c);
    }
}
