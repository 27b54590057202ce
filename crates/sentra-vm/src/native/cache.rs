//! Native function cache
//!
//! Built once after the host has registered its globals, the cache maps
//! builtin names straight to their functions. The hottest builtins get
//! their own fields so the common method calls skip the hash lookup.
//!
//! Rebinding a global that holds (or receives) a native after warm-up
//! invalidates the cache; the next lookup rebuilds it from the globals.
//! Lookups only shorten resolution: arity and type checks happen in
//! [`super::call_native`] for cached and uncached calls alike.

use crate::globals::Globals;
use crate::value::{NativeFunction, Value};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

#[derive(Default)]
pub struct NativeCache {
    by_name: HashMap<Rc<str>, Rc<NativeFunction>>,
    log: Option<Rc<NativeFunction>>,
    push: Option<Rc<NativeFunction>>,
    len: Option<Rc<NativeFunction>>,
    time: Option<Rc<NativeFunction>>,
    valid: bool,
    rebuilds: u64,
}

impl NativeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate from every global currently bound to a native function
    pub fn build(&mut self, globals: &Globals) {
        self.by_name.clear();
        for (name, value) in globals.iter() {
            if let Value::NativeFunction(native) = value {
                self.by_name.insert(name.clone(), native.clone());
            }
        }
        self.log = self.by_name.get("log").cloned();
        self.push = self.by_name.get("push").cloned();
        self.len = self.by_name.get("len").cloned();
        self.time = self.by_name.get("time").cloned();
        self.valid = true;
        self.rebuilds += 1;
        debug!(natives = self.by_name.len(), "native cache built");
    }

    pub fn invalidate(&mut self) {
        if self.valid {
            debug!("native cache invalidated by global rebinding");
        }
        self.valid = false;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Number of times the cache has been (re)built
    pub fn builds(&self) -> u64 {
        self.rebuilds
    }

    /// Resolve a builtin by name, rebuilding first if invalidated
    pub fn lookup(&mut self, name: &str, globals: &Globals) -> Option<Rc<NativeFunction>> {
        if !self.valid {
            self.build(globals);
        }
        let hot = match name {
            "push" => &self.push,
            "len" => &self.len,
            "log" => &self.log,
            "time" => &self.time,
            _ => return self.by_name.get(name).cloned(),
        };
        hot.clone()
    }
}
