//! Instruction dispatch

use super::dispatch::decode_opcode;
use super::frame::{Handler, IterState};
use super::{ops, Flow, VM};
use crate::bytecode::{Chunk, Opcode};
use crate::concurrency::{Channel, SelectCase, Task};
use crate::error::RuntimeError;
use crate::value::{Value, ValueMap};
use std::cmp::Ordering;
use std::rc::Rc;
use tracing::trace;

/// Instructions between progress traces
const TRACE_INTERVAL: u64 = 1 << 20;

impl VM {
    /// Fetch, decode and execute the instruction at the current ip
    pub(super) fn step(&mut self, task: &mut Task) -> Result<Flow, RuntimeError> {
        let frame = task.frame_mut()?;
        let ip = frame.ip;
        let byte = frame.chunk.code.get(ip).copied().ok_or(RuntimeError::InvalidBytecode {
            ip,
            reason: "instruction pointer past end of code",
        })?;
        let op = decode_opcode(byte).ok_or(RuntimeError::InvalidBytecode {
            ip,
            reason: "unknown opcode",
        })?;
        frame.ip += 1;

        if self.profiler.is_enabled() {
            self.profiler.record_instruction(op);
        }
        self.instructions += 1;
        if let Some(limit) = self.config.instruction_limit {
            if self.instructions > limit {
                return Err(RuntimeError::ExecutionLimit { limit });
            }
        }
        if self.instructions % TRACE_INTERVAL == 0 {
            trace!(task = task.id, executed = self.instructions, "dispatch progress");
        }

        let flow = self.execute(task, op)?;
        if task.stack.len() > self.config.stack_capacity {
            return Err(RuntimeError::StackOverflow {
                depth: task.frames.len(),
            });
        }
        Ok(flow)
    }

    fn execute(&mut self, task: &mut Task, op: Opcode) -> Result<Flow, RuntimeError> {
        match op {
            // ===== Constants =====
            Opcode::Constant => {
                let frame = task.frame_mut()?;
                let index = frame.read_u16()?;
                let value = frame.constant(index)?.clone();
                task.push(value);
            }
            Opcode::Nil => task.push(Value::Nil),
            Opcode::True => task.push(Value::Bool(true)),
            Opcode::False => task.push(Value::Bool(false)),

            // ===== Stack =====
            Opcode::Pop => {
                task.pop()?;
            }
            Opcode::Dup => {
                let top = task.peek()?.clone();
                task.push(top);
            }
            Opcode::Print => {
                let value = task.pop()?;
                self.output.write_line(&value.to_display_string());
            }

            // ===== Variables =====
            Opcode::GetLocal => {
                let slot = task.frame_mut()?.read_u16()? as usize;
                let index = local_index(task, slot)?;
                task.push(task.stack[index].clone());
            }
            Opcode::LoadFast => {
                let slot = task.frame_mut()?.read_u8()? as usize;
                let index = local_index(task, slot)?;
                task.push(task.stack[index].clone());
            }
            Opcode::SetLocal => {
                let slot = task.frame_mut()?.read_u16()? as usize;
                let index = local_index(task, slot)?;
                task.stack[index] = task.peek()?.clone();
            }
            Opcode::StoreFast => {
                let slot = task.frame_mut()?.read_u8()? as usize;
                let value = task.pop()?;
                let index = local_index(task, slot)?;
                task.stack[index] = value;
            }
            Opcode::DefineGlobal => {
                let name = constant_name(task)?;
                let value = task.pop()?;
                self.set_global(name, value);
            }
            Opcode::GetGlobal => {
                let frame = task.frame_mut()?;
                let index = frame.read_u16()?;
                let slot = self.global_slot(&frame.chunk, index, frame.ip)?;
                let value = self.globals.value_at(slot).cloned().unwrap_or(Value::Nil);
                task.push(value);
            }
            Opcode::SetGlobal => {
                let name = constant_name(task)?;
                let value = task.peek()?.clone();
                self.set_global(name, value);
            }
            Opcode::GetUpvalue => {
                let cell = upvalue_cell(task)?;
                let value = self.read_upvalue(task, &cell);
                task.push(value);
            }
            Opcode::SetUpvalue => {
                let cell = upvalue_cell(task)?;
                let value = task.peek()?.clone();
                self.write_upvalue(task, &cell, value);
            }

            // ===== Arithmetic =====
            Opcode::Add => binary(task, ops::add)?,
            Opcode::Sub => binary(task, ops::sub)?,
            Opcode::Mul => binary(task, ops::mul)?,
            Opcode::Div => binary(task, ops::div)?,
            Opcode::Mod => binary(task, ops::modulo)?,
            Opcode::Negate => {
                let value = task.pop()?;
                task.push(ops::negate(&value)?);
            }

            // ===== Comparison =====
            Opcode::Equal => binary(task, |a, b| Ok(Value::Bool(a == b)))?,
            Opcode::NotEqual => binary(task, |a, b| Ok(Value::Bool(a != b)))?,
            Opcode::Greater => ordering(task, |o| o == Ordering::Greater)?,
            Opcode::Less => ordering(task, |o| o == Ordering::Less)?,
            Opcode::GreaterEqual => ordering(task, |o| o != Ordering::Less)?,
            Opcode::LessEqual => ordering(task, |o| o != Ordering::Greater)?,

            // ===== Logical =====
            Opcode::Not => {
                let value = task.pop()?;
                task.push(Value::Bool(!value.is_truthy()));
            }
            Opcode::And => {
                let b = task.pop()?;
                let a = task.pop()?;
                task.push(if a.is_truthy() { b } else { a });
            }
            Opcode::Or => {
                let b = task.pop()?;
                let a = task.pop()?;
                task.push(if a.is_truthy() { a } else { b });
            }

            // ===== Control flow =====
            Opcode::Jump | Opcode::Loop => {
                let frame = task.frame_mut()?;
                let offset = frame.read_i16()?;
                frame.jump(offset)?;
            }
            Opcode::JumpIfFalse => {
                let offset = task.frame_mut()?.read_i16()?;
                let condition = task.pop()?;
                if !condition.is_truthy() {
                    task.frame_mut()?.jump(offset)?;
                }
            }

            // ===== Functions =====
            Opcode::Call => {
                let argc = task.frame_mut()?.read_u8()? as usize;
                let callee = task.pop()?;
                self.call_value(task, callee, argc)?;
            }
            Opcode::Closure => self.make_closure(task)?,
            Opcode::Return => {
                let result = task.pop()?;
                if let Some(value) = self.return_from_frame(task, result) {
                    return Ok(Flow::Done(value));
                }
            }

            // ===== Arrays =====
            Opcode::Array => {
                let count = task.frame_mut()?.read_u16()? as usize;
                let items = task.pop_n(count)?;
                task.push(Value::array(items));
            }
            Opcode::BuildList => {
                let count = task.frame_mut()?.read_u16()? as usize;
                let start = task.stack.len().checked_sub(count).ok_or_else(|| {
                    RuntimeError::InvalidBytecode {
                        ip: task.frames.last().map_or(0, |f| f.ip),
                        reason: "operand stack underflow",
                    }
                })?;
                let mut items = Vec::with_capacity(count);
                items.extend(task.stack.drain(start..));
                task.push(Value::array(items));
            }
            Opcode::Index => {
                let key = task.pop()?;
                let collection = task.pop()?;
                task.push(ops::index(&collection, &key)?);
            }
            Opcode::SetIndex => {
                let value = task.pop()?;
                let key = task.pop()?;
                let collection = task.pop()?;
                ops::set_index(&collection, &key, value.clone())?;
                task.push(value);
            }
            Opcode::ArrayLen => {
                let collection = task.pop()?;
                task.push(Value::Number(ops::length(&collection)? as f64));
            }
            Opcode::Unpack => {
                let count = task.frame_mut()?.read_u8()? as usize;
                let value = task.pop()?;
                let Value::Array(items) = &value else {
                    return Err(RuntimeError::type_error(format!(
                        "cannot unpack {}",
                        value.type_name()
                    )));
                };
                let items = items.borrow();
                for i in 0..count {
                    task.push(items.get(i).cloned().unwrap_or(Value::Nil));
                }
            }

            // ===== Maps =====
            Opcode::Map | Opcode::BuildMap => {
                let pairs = task.frame_mut()?.read_u16()? as usize;
                let flat = task.pop_n(pairs * 2)?;
                let mut map = if op == Opcode::BuildMap {
                    ValueMap::with_capacity(pairs)
                } else {
                    ValueMap::new()
                };
                let mut flat = flat.into_iter();
                while let (Some(key), Some(value)) = (flat.next(), flat.next()) {
                    map.insert(key.to_map_key(), value);
                }
                task.push(Value::map(map));
            }
            Opcode::MapGet => {
                let key = task.pop()?.to_map_key();
                let map = task.pop()?;
                let value = map_ref(&map)?.borrow().get(&key).cloned();
                let value = value.ok_or_else(|| RuntimeError::KeyNotFound {
                    key: key.to_string(),
                })?;
                task.push(value);
            }
            Opcode::MapSet => {
                let value = task.pop()?;
                let key = task.pop()?.to_map_key();
                let map = task.pop()?;
                map_ref(&map)?.borrow_mut().insert(key, value.clone());
                task.push(value);
            }
            Opcode::MapDelete => {
                let key = task.pop()?.to_map_key();
                let map = task.pop()?;
                let removed = map_ref(&map)?.borrow_mut().remove(&key);
                let removed = removed.ok_or_else(|| RuntimeError::KeyNotFound {
                    key: key.to_string(),
                })?;
                task.push(removed);
            }
            Opcode::MapKeys => {
                let map = task.pop()?;
                let keys = map_ref(&map)?
                    .borrow()
                    .keys()
                    .map(|k| Value::String(k.clone()))
                    .collect();
                task.push(Value::array(keys));
            }
            Opcode::MapValues => {
                let map = task.pop()?;
                let values = map_ref(&map)?.borrow().values().cloned().collect();
                task.push(Value::array(values));
            }

            // ===== Strings =====
            Opcode::Concat => binary(task, |a, b| Ok(ops::concat(a, b)))?,
            Opcode::StringLen => {
                let value = task.pop()?;
                let Value::String(s) = &value else {
                    return Err(RuntimeError::type_error(format!(
                        "string length of {}",
                        value.type_name()
                    )));
                };
                task.push(Value::Number(s.chars().count() as f64));
            }
            Opcode::Substring => {
                let end = task.pop()?;
                let start = task.pop()?;
                let s = task.pop()?;
                task.push(ops::substring(&s, &start, &end)?);
            }
            Opcode::ToString => {
                let value = task.pop()?;
                task.push(Value::string(value.to_display_string()));
            }

            // ===== Iteration =====
            Opcode::IterStart => {
                let collection = task.pop()?;
                let items = ops::iter_snapshot(&collection)?;
                task.iterators.push(IterState { items, cursor: 0 });
            }
            Opcode::IterNext => {
                let next = match task.iterators.last_mut() {
                    Some(iter) => iter.next_item(),
                    None => return Err(no_iterator(task)),
                };
                match next {
                    Some(item) => {
                        task.push(item);
                        task.push(Value::Bool(true));
                    }
                    None => {
                        task.push(Value::Nil);
                        task.push(Value::Bool(false));
                    }
                }
            }
            Opcode::IterEnd => {
                if task.iterators.pop().is_none() {
                    return Err(no_iterator(task));
                }
            }

            // ===== Exceptions =====
            Opcode::Try => {
                let frame = task.frame_mut()?;
                let offset = frame.read_i16()?;
                let target = frame.ip as isize + offset as isize;
                if target < 0 || target as usize > frame.chunk.code.len() {
                    return Err(RuntimeError::InvalidBytecode {
                        ip: frame.ip,
                        reason: "handler target outside chunk",
                    });
                }
                let handler = Handler {
                    target: target as usize,
                    stack_depth: task.stack.len(),
                    frame_depth: task.frames.len(),
                    iter_depth: task.iterators.len(),
                };
                task.handlers.push(handler);
            }
            Opcode::Catch => {
                let slot = task.frame_mut()?.read_u16()? as usize;
                task.handlers.pop();
                let thrown = task.pop()?;
                let index = local_index(task, slot)?;
                task.stack[index] = thrown;
            }
            Opcode::Throw => {
                let value = task.pop()?;
                return Ok(Flow::Throw(value));
            }
            Opcode::EndTry => {
                let depth = task.frames.len();
                if task.handlers.last().is_some_and(|h| h.frame_depth == depth) {
                    task.handlers.pop();
                }
            }

            // ===== Types =====
            Opcode::TypeOf => {
                let value = task.pop()?;
                task.push(Value::string(value.type_name()));
            }
            Opcode::IsType => {
                let name = constant_name(task)?;
                let value = task.pop()?;
                task.push(Value::Bool(value.type_name() == name.as_ref()));
            }

            // ===== Concurrency =====
            Opcode::Spawn => {
                let argc = task.frame_mut()?.read_u8()? as usize;
                let callee = task.pop()?;
                let args = task.pop_n(argc)?;
                let handle = self.spawn(callee, args)?;
                task.push(handle);
            }
            Opcode::ChannelNew => {
                let capacity = task.pop()?;
                let capacity = match capacity {
                    Value::Number(n) if n >= 0.0 && n.fract() == 0.0 => n as usize,
                    other => {
                        return Err(RuntimeError::type_error(format!(
                            "channel capacity must be a non-negative integer, got {}",
                            other
                        )))
                    }
                };
                task.push(Value::Channel(Channel::new_ref(capacity)));
            }
            Opcode::ChannelSend => {
                let value = task.pop()?;
                let channel = channel_ref(task.pop()?)?;
                return self.channel_send(task, channel, value);
            }
            Opcode::ChannelRecv => {
                let channel = channel_ref(task.pop()?)?;
                return self.channel_recv(task, channel);
            }
            Opcode::ChannelClose => {
                let channel = channel_ref(task.pop()?)?;
                self.channel_close(&channel)?;
                task.push(Value::Nil);
            }
            Opcode::Select => {
                let frame = task.frame_mut()?;
                let count = frame.read_u8()? as usize;
                let flags = frame.read_u8()?;
                let mut kinds = Vec::with_capacity(count);
                for _ in 0..count {
                    kinds.push(frame.read_u8()?);
                }
                let mut cases = Vec::with_capacity(count);
                for kind in kinds.iter().rev() {
                    let case = if *kind == 1 {
                        let value = task.pop()?;
                        SelectCase::Send(channel_ref(task.pop()?)?, value)
                    } else {
                        SelectCase::Recv(channel_ref(task.pop()?)?)
                    };
                    cases.push(case);
                }
                cases.reverse();
                return self.select(task, cases, flags & 1 != 0);
            }
            Opcode::Yield => return Ok(Flow::Yield),

            Opcode::Halt => {
                let value = task.stack.last().cloned().unwrap_or(Value::Nil);
                return Ok(Flow::Done(value));
            }
        }
        Ok(Flow::Continue)
    }

    /// Global index of the name constant `index`, cached in the chunk
    fn global_slot(&self, chunk: &Chunk, index: u16, ip: usize) -> Result<usize, RuntimeError> {
        if let Some(slot) = chunk.global_slots.get(index, self.id) {
            return Ok(slot);
        }
        let Some(Value::String(name)) = chunk.constants.get(index as usize) else {
            return Err(RuntimeError::InvalidBytecode {
                ip,
                reason: "name operand is not a string constant",
            });
        };
        let slot = self
            .globals
            .index_of(name)
            .ok_or_else(|| RuntimeError::UndefinedVariable {
                name: name.to_string(),
            })?;
        chunk.global_slots.set(index, self.id, slot);
        Ok(slot)
    }
}

fn binary(
    task: &mut Task,
    op: impl FnOnce(&Value, &Value) -> Result<Value, RuntimeError>,
) -> Result<(), RuntimeError> {
    let b = task.pop()?;
    let a = task.pop()?;
    task.push(op(&a, &b)?);
    Ok(())
}

fn ordering(task: &mut Task, test: impl FnOnce(Ordering) -> bool) -> Result<(), RuntimeError> {
    let b = task.pop()?;
    let a = task.pop()?;
    let result = ops::compare(&a, &b)?.is_some_and(test);
    task.push(Value::Bool(result));
    Ok(())
}

/// Absolute stack index of local `slot` in the current frame
fn local_index(task: &mut Task, slot: usize) -> Result<usize, RuntimeError> {
    let frame = task.frame_mut()?;
    let index = frame.stack_base + slot;
    if index >= task.stack.len() {
        return Err(RuntimeError::InvalidBytecode {
            ip: task.frames.last().map_or(0, |f| f.ip),
            reason: "local slot out of range",
        });
    }
    Ok(index)
}

fn constant_name(task: &mut Task) -> Result<Rc<str>, RuntimeError> {
    let frame = task.frame_mut()?;
    let index = frame.read_u16()?;
    match frame.constant(index)? {
        Value::String(name) => Ok(name.clone()),
        _ => Err(RuntimeError::InvalidBytecode {
            ip: frame.ip,
            reason: "name operand is not a string constant",
        }),
    }
}

fn upvalue_cell(task: &mut Task) -> Result<super::UpvalueRef, RuntimeError> {
    let frame = task.frame_mut()?;
    let index = frame.read_u8()? as usize;
    frame
        .closure
        .upvalues
        .get(index)
        .cloned()
        .ok_or(RuntimeError::InvalidBytecode {
            ip: frame.ip,
            reason: "upvalue index out of range",
        })
}

fn map_ref(value: &Value) -> Result<&crate::value::MapRef, RuntimeError> {
    match value {
        Value::Map(map) => Ok(map),
        other => Err(RuntimeError::type_error(format!(
            "expected a map, got {}",
            other.type_name()
        ))),
    }
}

fn channel_ref(value: Value) -> Result<crate::concurrency::ChannelRef, RuntimeError> {
    match value {
        Value::Channel(channel) => Ok(channel),
        other => Err(RuntimeError::type_error(format!(
            "expected a channel, got {}",
            other.type_name()
        ))),
    }
}

fn no_iterator(task: &Task) -> RuntimeError {
    RuntimeError::InvalidBytecode {
        ip: task.frames.last().map_or(0, |f| f.ip),
        reason: "no active iterator",
    }
}
