//! Native function registration
//!
//! Rust closures become callable script functions through
//! [`NativeFunctionBuilder`]. Native functions have either a fixed arity,
//! checked before the implementation runs, or are variadic and validate
//! their own arguments.
//!
//! # Examples
//!
//! ```rust
//! use sentra_vm::native::NativeFunctionBuilder;
//! use sentra_vm::{RuntimeError, Value};
//!
//! let add = NativeFunctionBuilder::new("add")
//!     .with_arity(2)
//!     .with_implementation(|args| match (&args[0], &args[1]) {
//!         (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
//!         _ => Err(RuntimeError::TypeError {
//!             msg: "add expects numbers".to_string(),
//!         }),
//!     })
//!     .build()
//!     .unwrap();
//! assert_eq!(add.type_name(), "function");
//! ```

pub mod builtins;
pub mod cache;
pub mod json;
pub mod output;

pub use cache::NativeCache;
pub use output::Output;

use crate::error::RuntimeError;
use crate::value::{Arity, NativeFunction, Value};
use std::rc::Rc;
use thiserror::Error;

/// Error building a native function
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("native function '{0}' has no implementation")]
    MissingImplementation(String),
    #[error("native function '{0}' needs an arity or variadic()")]
    MissingArity(String),
}

type NativeFnImpl = Rc<dyn Fn(&[Value]) -> Result<Value, RuntimeError>>;

/// Builder for native functions
pub struct NativeFunctionBuilder {
    name: String,
    arity: Option<Arity>,
    implementation: Option<NativeFnImpl>,
}

impl NativeFunctionBuilder {
    /// Start a builder for a function named `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arity: None,
            implementation: None,
        }
    }

    /// Require exactly `arity` arguments
    ///
    /// Calls with any other count raise `ArityError` before the
    /// implementation runs. Replaces an earlier `variadic()`.
    pub fn with_arity(mut self, arity: usize) -> Self {
        self.arity = Some(Arity::Fixed(arity));
        self
    }

    /// Accept any number of arguments
    pub fn variadic(mut self) -> Self {
        self.arity = Some(Arity::Variadic);
        self
    }

    /// Set the function body
    pub fn with_implementation<F>(mut self, implementation: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, RuntimeError> + 'static,
    {
        self.implementation = Some(Rc::new(implementation));
        self
    }

    /// Build the function, ready to bind to a global
    pub fn build(self) -> Result<Value, BuildError> {
        self.build_native().map(Value::NativeFunction)
    }

    pub(crate) fn build_native(self) -> Result<Rc<NativeFunction>, BuildError> {
        let arity = self
            .arity
            .ok_or_else(|| BuildError::MissingArity(self.name.clone()))?;
        let func = self
            .implementation
            .ok_or_else(|| BuildError::MissingImplementation(self.name.clone()))?;
        Ok(Rc::new(NativeFunction {
            name: Rc::from(self.name),
            arity,
            func,
        }))
    }
}

/// Invoke a native function after checking its arity
///
/// Every native call goes through here, whether the function was found
/// through the cache or read from the stack.
pub fn call_native(native: &NativeFunction, args: &[Value]) -> Result<Value, RuntimeError> {
    if let Arity::Fixed(expected) = native.arity {
        if args.len() != expected {
            return Err(RuntimeError::ArityError {
                name: native.name.to_string(),
                expected: expected.to_string(),
                got: args.len(),
            });
        }
    }
    (native.func)(args)
}

/// Convenience constructor for the builtin library
pub(crate) fn native(
    name: &str,
    arity: Arity,
    func: impl Fn(&[Value]) -> Result<Value, RuntimeError> + 'static,
) -> Rc<NativeFunction> {
    Rc::new(NativeFunction {
        name: Rc::from(name),
        arity,
        func: Rc::new(func),
    })
}
