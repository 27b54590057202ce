//! Calls, closure creation and task spawning

use super::frame::CallFrame;
use super::VM;
use crate::concurrency::Task;
use crate::error::RuntimeError;
use crate::method_dispatch::{resolve_method, TypeTag};
use crate::native::call_native;
use crate::value::{BoundMethod, Closure, FunctionProto, NativeFunction, Value};
use std::rc::Rc;
use tracing::debug;

impl VM {
    /// Call `callee` with the top `argc` stack values as arguments
    pub(super) fn call_value(
        &mut self,
        task: &mut Task,
        callee: Value,
        argc: usize,
    ) -> Result<(), RuntimeError> {
        match callee {
            Value::Closure(closure) => self.call_closure(task, closure, argc),
            Value::NativeFunction(native) => {
                let args = task.pop_n(argc)?;
                let result = self.invoke_native(&native, &args)?;
                task.push(result);
                Ok(())
            }
            Value::BoundMethod(bound) => {
                let native = self.resolve_bound(&bound)?;
                let args = task.pop_n(argc)?;
                let mut full = Vec::with_capacity(argc + 1);
                full.push(bound.receiver.clone());
                full.extend(args);
                let result = self.invoke_native(&native, &full)?;
                task.push(result);
                Ok(())
            }
            other => Err(RuntimeError::type_error(format!(
                "cannot call a value of type {}",
                other.type_name()
            ))),
        }
    }

    /// Push a frame for `closure`. The arguments are already on the stack.
    pub(super) fn call_closure(
        &mut self,
        task: &mut Task,
        closure: Rc<Closure>,
        argc: usize,
    ) -> Result<(), RuntimeError> {
        let proto = closure.proto.clone();
        let arity = proto.arity as usize;
        let params = if proto.variadic {
            if argc < arity {
                return Err(arity_error(&proto, argc));
            }
            let extras = task.pop_n(argc - arity)?;
            task.push(Value::array(extras));
            arity + 1
        } else {
            if argc != arity {
                return Err(arity_error(&proto, argc));
            }
            arity
        };

        if task.frames.len() >= self.config.max_frames {
            return Err(RuntimeError::StackOverflow {
                depth: self.config.max_frames,
            });
        }

        let stack_base = task.stack.len().checked_sub(params).ok_or(RuntimeError::InvalidBytecode {
            ip: task.frames.last().map_or(0, |f| f.ip),
            reason: "operand stack underflow",
        })?;
        let frame = CallFrame::new(closure, stack_base, task.iterators.len());
        if stack_base + frame.local_count > self.config.stack_capacity {
            return Err(RuntimeError::StackOverflow {
                depth: task.frames.len(),
            });
        }
        task.stack.resize(stack_base + frame.local_count, Value::Nil);

        if let Some(hook) = self.hook.as_mut() {
            hook.on_call(task.id, &proto.name, task.frames.len() + 1);
        }
        task.frames.push(frame);
        Ok(())
    }

    /// OpClosure: build a closure from a function constant and its captures
    pub(super) fn make_closure(&mut self, task: &mut Task) -> Result<(), RuntimeError> {
        let frame = task.frame_mut()?;
        let index = frame.read_u16()?;
        let proto = match frame.constant(index)? {
            Value::Function(proto) => proto.clone(),
            other => {
                return Err(RuntimeError::type_error(format!(
                    "cannot make a closure from {}",
                    other.type_name()
                )))
            }
        };
        let count = frame.read_u8()? as usize;
        let mut captures = Vec::with_capacity(count);
        for _ in 0..count {
            let is_local = frame.read_u8()? != 0;
            let slot = frame.read_u8()? as usize;
            captures.push((is_local, slot));
        }
        let stack_base = frame.stack_base;
        let enclosing = frame.closure.clone();
        let ip = frame.ip;

        let mut upvalues = Vec::with_capacity(count);
        for (is_local, slot) in captures {
            let cell = if is_local {
                task.open_upvalues.capture(task.id, stack_base + slot)
            } else {
                enclosing
                    .upvalues
                    .get(slot)
                    .cloned()
                    .ok_or(RuntimeError::InvalidBytecode {
                        ip,
                        reason: "captured upvalue index out of range",
                    })?
            };
            upvalues.push(cell);
        }

        task.push(Value::Closure(Rc::new(Closure { proto, upvalues })));
        Ok(())
    }

    /// Start `callee` as a new task and return its handle
    pub(super) fn spawn(&mut self, callee: Value, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let Value::Closure(closure) = callee else {
            return Err(RuntimeError::type_error(format!(
                "cannot spawn a value of type {}",
                callee.type_name()
            )));
        };
        let id = self.scheduler.next_id();
        let name = closure.proto.name.to_string();
        let mut child = Task::new(id, name.as_str());
        let argc = args.len();
        child.stack = args;
        self.call_closure(&mut child, closure, argc)?;

        let handle = child.handle.clone();
        self.task_handles.insert(id, handle.clone());
        debug!(task = id, function = %name, "task spawned");
        self.scheduler.spawn(child);
        Ok(Value::Task(handle))
    }

    fn invoke_native(&mut self, native: &NativeFunction, args: &[Value]) -> Result<Value, RuntimeError> {
        self.profiler.record_native_call();
        call_native(native, args)
    }

    fn resolve_bound(&mut self, bound: &BoundMethod) -> Result<Rc<NativeFunction>, RuntimeError> {
        let unknown = || RuntimeError::UnknownMethod {
            type_name: bound.receiver.type_name().to_string(),
            method: bound.method.to_string(),
        };
        let tag = TypeTag::of(&bound.receiver).ok_or_else(unknown)?;
        let name = resolve_method(tag, &bound.method).ok_or_else(unknown)?;
        self.natives.lookup(name, &self.globals).ok_or_else(unknown)
    }
}

fn arity_error(proto: &FunctionProto, got: usize) -> RuntimeError {
    let expected = if proto.variadic {
        format!("at least {}", proto.arity)
    } else {
        proto.arity.to_string()
    };
    RuntimeError::ArityError {
        name: proto.name.to_string(),
        expected,
        got,
    }
}
