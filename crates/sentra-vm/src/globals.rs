//! Global variable table
//!
//! Append-only: a name keeps the index it was first given, so indices
//! can be cached by anything that resolved them once.

use crate::value::Value;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Default)]
pub struct Globals {
    index: HashMap<Rc<str>, usize>,
    names: Vec<Rc<str>>,
    values: Vec<Value>,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`, returning the value it replaced (if it was defined)
    pub fn set(&mut self, name: &Rc<str>, value: Value) -> Option<Value> {
        match self.index.get(name) {
            Some(&i) => Some(std::mem::replace(&mut self.values[i], value)),
            None => {
                self.index.insert(name.clone(), self.values.len());
                self.names.push(name.clone());
                self.values.push(value);
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.index.get(name).map(|&i| &self.values[i])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Value bound at a slot returned by [`Globals::index_of`]
    pub fn value_at(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Bindings in definition order
    pub fn iter(&self) -> impl Iterator<Item = (&Rc<str>, &Value)> {
        self.names.iter().zip(self.values.iter())
    }
}
