//! Stack-based virtual machine
//!
//! Executes bytecode chunks as cooperative tasks.
//! - Each task has its own operand stack and call frames
//! - Globals and heap values are shared by every task
//! - Errors are thrown as values and caught by OpTry handlers
//! - Channel operations and select may block the running task

mod call;
pub mod debug;
pub mod dispatch;
mod exec;
pub mod frame;
pub mod ops;
pub mod profiler;
mod sync;
pub mod upvalue;

pub use debug::{DebugHook, DebugInfo};
pub use frame::CallFrame;
pub use profiler::{ProfileSummary, Profiler};
pub use upvalue::{Upvalue, UpvalueRef};

use crate::bytecode::Chunk;
use crate::concurrency::{Resume, Scheduler, SelectRng, Task, TaskHandle, TaskId, TaskStatus};
use crate::config::VmConfig;
use crate::error::{RuntimeError, TraceFrame, VmError};
use crate::globals::Globals;
use crate::native::builtins::builtins;
use crate::native::{BuildError, NativeCache, NativeFunctionBuilder, Output};
use crate::value::{Closure, FunctionProto, Value};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

/// Result returned by [`VM::run`]
#[derive(Debug, Clone, PartialEq)]
pub enum VmRunResult {
    /// The main task finished with this value
    Complete(Value),
    /// The debug hook paused execution before the instruction at `ip` of
    /// `task`. Call `run` again to continue.
    Paused { task: TaskId, ip: usize },
}

impl VmRunResult {
    /// Final value, if the run completed
    pub fn value(self) -> Option<Value> {
        match self {
            VmRunResult::Complete(value) => Some(value),
            VmRunResult::Paused { .. } => None,
        }
    }
}

/// Why a task stopped running
enum Exit {
    Completed(Value),
    Failed(VmError),
    Blocked,
    Yielded,
    Paused,
}

/// What the dispatch loop does after an instruction
enum Flow {
    Continue,
    Block,
    Yield,
    /// The task's root frame finished
    Done(Value),
    /// A script-level throw of this value
    Throw(Value),
}

/// Source of [`VM`] ids, which tag the global slots cached in chunks
static NEXT_VM_ID: AtomicU64 = AtomicU64::new(1);

/// Virtual machine state
pub struct VM {
    id: u64,
    config: VmConfig,
    globals: Globals,
    natives: NativeCache,
    /// Set once the host is done registering globals
    warmed_up: bool,
    scheduler: Scheduler,
    main_task: Option<TaskId>,
    task_handles: HashMap<TaskId, Rc<TaskHandle>>,
    output: Output,
    hook: Option<Box<dyn DebugHook>>,
    profiler: Profiler,
    rng: SelectRng,
    /// Instructions executed since the program was loaded
    instructions: u64,
    source_name: String,
}

impl VM {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let output = Output::stdout();
        let mut globals = Globals::new();
        for native in builtins(&output) {
            let name = native.name.clone();
            globals.set(&name, Value::NativeFunction(native));
        }
        Self {
            id: NEXT_VM_ID.fetch_add(1, Ordering::Relaxed),
            config,
            globals,
            natives: NativeCache::new(),
            warmed_up: false,
            scheduler: Scheduler::new(),
            main_task: None,
            task_handles: HashMap::new(),
            output,
            hook: None,
            profiler: Profiler::new(),
            rng: SelectRng::new(config.select_seed),
            instructions: 0,
            source_name: "<script>".to_string(),
        }
    }

    /// Build a VM from loaded project configuration: runtime limits plus
    /// the `[debug]` profile and source name settings
    pub fn from_project(config: &sentra_config::Config) -> Self {
        let mut vm = Self::with_config(VmConfig::from(&config.runtime()));
        if config.project.profile_enabled() {
            vm.enable_profiling();
        }
        if let Some(name) = config
            .project
            .debug
            .as_ref()
            .and_then(|debug| debug.source_name.as_deref())
        {
            vm.set_source_name(name);
        }
        vm
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Send program output to an in-memory buffer and return a handle to it
    pub fn capture_output(&mut self) -> Output {
        self.output.start_capture();
        self.output.clone()
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    /// Source file name reported to the debug hook
    pub fn set_source_name(&mut self, name: impl Into<String>) {
        self.source_name = name.into();
    }

    pub fn set_debug_hook(&mut self, hook: Box<dyn DebugHook>) {
        self.hook = Some(hook);
    }

    pub fn clear_debug_hook(&mut self) -> Option<Box<dyn DebugHook>> {
        self.hook.take()
    }

    pub fn enable_profiling(&mut self) {
        self.profiler.enable();
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn native_cache(&self) -> &NativeCache {
        &self.natives
    }

    /// Bind a global, defining it if needed
    pub fn define_global(&mut self, name: &str, value: Value) {
        self.set_global(Rc::from(name), value);
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    /// Build a native function and bind it under its name
    pub fn register_native(&mut self, builder: NativeFunctionBuilder) -> Result<(), BuildError> {
        let native = builder.build_native()?;
        let name = native.name.clone();
        self.set_global(name, Value::NativeFunction(native));
        Ok(())
    }

    /// Status of a task spawned during the current program
    pub fn task_status(&self, id: TaskId) -> Option<TaskStatus> {
        self.task_handles.get(&id).map(|handle| handle.status())
    }

    /// Make `chunk` the main task, replacing any previous program
    pub fn load(&mut self, chunk: Rc<Chunk>) -> TaskId {
        self.shutdown();
        self.task_handles.clear();
        self.instructions = 0;

        let local_count = chunk.local_slots().min(u16::MAX as usize) as u16;
        let proto = FunctionProto {
            name: Rc::from("<main>"),
            arity: 0,
            variadic: false,
            local_count,
            upvalue_count: 0,
            chunk,
        };
        let closure = Rc::new(Closure {
            proto: Rc::new(proto),
            upvalues: Vec::new(),
        });

        let id = self.scheduler.next_id();
        let mut task = Task::new(id, "main");
        let frame = CallFrame::new(closure, 0, 0);
        task.stack.resize(frame.local_count, Value::Nil);
        task.frames.push(frame);
        self.task_handles.insert(id, task.handle.clone());
        self.main_task = Some(id);
        self.scheduler.spawn(task);
        debug!(task = id, "main task loaded");
        id
    }

    /// Load `chunk` and run it
    pub fn run_chunk(&mut self, chunk: Rc<Chunk>) -> Result<VmRunResult, VmError> {
        self.load(chunk);
        self.run()
    }

    /// Run tasks until the main task finishes, fails or the hook pauses
    pub fn run(&mut self) -> Result<VmRunResult, VmError> {
        let Some(main) = self.main_task else {
            return Ok(VmRunResult::Complete(Value::Nil));
        };
        self.warm_up();

        loop {
            let Some(mut task) = self.scheduler.take_next() else {
                warn!(main, "deadlock: main task blocked with no runnable tasks");
                let trace = self
                    .scheduler
                    .get(main)
                    .map(Self::trace_of)
                    .unwrap_or_default();
                self.shutdown();
                return Err(VmError::with_trace(RuntimeError::Deadlock, trace));
            };
            self.profiler.record_task_switch();
            let id = task.id;

            match self.run_task(&mut task) {
                Exit::Yielded => self.scheduler.requeue(task),
                Exit::Blocked => self.scheduler.block(task),
                Exit::Paused => {
                    let ip = task.frames.last().map_or(0, |f| f.ip);
                    self.scheduler.requeue_front(task);
                    return Ok(VmRunResult::Paused { task: id, ip });
                }
                Exit::Completed(value) => {
                    task.terminate(TaskStatus::Completed);
                    debug!(task = id, "task completed");
                    if id == main {
                        self.shutdown();
                        return Ok(VmRunResult::Complete(value));
                    }
                }
                Exit::Failed(error) => {
                    task.terminate(TaskStatus::Failed);
                    if id == main || error.error.is_fatal() {
                        self.shutdown();
                        return Err(error);
                    }
                    warn!(task = id, error = %error.error, "task failed");
                }
            }
        }
    }

    fn warm_up(&mut self) {
        if !self.warmed_up {
            self.natives.build(&self.globals);
            self.warmed_up = true;
        }
    }

    /// Drop every remaining task after closing its upvalues
    fn shutdown(&mut self) {
        for mut task in self.scheduler.drain() {
            task.open_upvalues.close_all(&task.stack);
            trace!(task = task.id, status = ?task.status(), "task dropped at shutdown");
        }
        self.main_task = None;
    }

    /// Rebind a global, invalidating the native cache when a native is
    /// replaced or introduced after warm-up
    fn set_global(&mut self, name: Rc<str>, value: Value) {
        let is_native = matches!(value, Value::NativeFunction(_));
        let old = self.globals.set(&name, value);
        if self.warmed_up && (is_native || matches!(old, Some(Value::NativeFunction(_)))) {
            self.natives.invalidate();
        }
    }

    /// Execute `task` until it stops
    fn run_task(&mut self, task: &mut Task) -> Exit {
        loop {
            if let Some(resume) = task.resume.take() {
                let flow = match resume {
                    Resume::Value(value) => {
                        task.push(value);
                        Flow::Continue
                    }
                    Resume::Selected { index, value } => {
                        task.push(value);
                        task.push(Value::Number(index as f64));
                        Flow::Continue
                    }
                    Resume::Error(error) => Flow::Throw(Value::error(error)),
                };
                if let Some(exit) = self.after_instruction(task, Ok(flow)) {
                    return exit;
                }
            }

            let Some(frame) = task.frames.last() else {
                return Exit::Completed(Value::Nil);
            };
            let ip = frame.ip;

            // Running off the end of a chunk is an implicit `return nil`.
            if ip >= frame.chunk.code.len() {
                if let Some(value) = self.return_from_frame(task, Value::Nil) {
                    return Exit::Completed(value);
                }
                continue;
            }

            if let Some(hook) = self.hook.as_mut() {
                let info = DebugInfo {
                    file: self.source_name.clone(),
                    line: frame.line(ip),
                    function: frame.function_name().to_string(),
                };
                if !hook.on_instruction(task.id, ip, &info) {
                    return Exit::Paused;
                }
            }

            let result = self.step(task);
            if let Some(exit) = self.after_instruction(task, result) {
                return exit;
            }
        }
    }

    /// Apply the outcome of one instruction; `Some` ends the task's turn
    fn after_instruction(&mut self, task: &mut Task, result: Result<Flow, RuntimeError>) -> Option<Exit> {
        match result {
            Ok(Flow::Continue) => None,
            Ok(Flow::Block) => Some(Exit::Blocked),
            Ok(Flow::Yield) => Some(Exit::Yielded),
            Ok(Flow::Done(value)) => Some(Exit::Completed(value)),
            Ok(Flow::Throw(value)) => self.throw(task, value),
            Err(error) if error.is_fatal() => {
                if let Some(hook) = self.hook.as_mut() {
                    hook.on_error(task.id, &error);
                }
                Some(Exit::Failed(VmError::with_trace(error, Self::trace_of(task))))
            }
            Err(error) => {
                if let Some(hook) = self.hook.as_mut() {
                    hook.on_error(task.id, &error);
                }
                self.throw(task, Value::error(error))
            }
        }
    }

    /// Unwind to the innermost handler, or fail the task if there is none
    fn throw(&mut self, task: &mut Task, value: Value) -> Option<Exit> {
        let Some(handler) = task.handlers.last().copied() else {
            let error = match &value {
                Value::Error(error) => error.as_ref().clone(),
                other => RuntimeError::UnhandledException {
                    value: other.to_display_string(),
                },
            };
            return Some(Exit::Failed(VmError::with_trace(error, Self::trace_of(task))));
        };

        while task.frames.len() > handler.frame_depth {
            if let Some(frame) = task.frames.pop() {
                if let Some(hook) = self.hook.as_mut() {
                    hook.on_return(task.id, frame.function_name(), &value);
                }
            }
        }
        task.open_upvalues.close_from(handler.stack_depth, &task.stack);
        task.stack.truncate(handler.stack_depth);
        task.iterators.truncate(handler.iter_depth);
        task.push(value);
        match task.frames.last_mut() {
            Some(frame) => {
                frame.ip = handler.target;
                None
            }
            None => Some(Exit::Failed(VmError::new(RuntimeError::InvalidBytecode {
                ip: handler.target,
                reason: "handler frame missing",
            }))),
        }
    }

    /// Pop the innermost frame. Returns the result when it was the root frame.
    fn return_from_frame(&mut self, task: &mut Task, result: Value) -> Option<Value> {
        let frame = task.frames.pop()?;
        if let Some(hook) = self.hook.as_mut() {
            hook.on_return(task.id, frame.function_name(), &result);
        }
        let depth = task.frames.len() + 1;
        while task.handlers.last().is_some_and(|h| h.frame_depth >= depth) {
            task.handlers.pop();
        }
        task.iterators.truncate(frame.iter_base);
        task.open_upvalues.close_from(frame.stack_base, &task.stack);
        task.stack.truncate(frame.stack_base);
        if task.frames.is_empty() {
            return Some(result);
        }
        task.push(result);
        None
    }

    /// Active frames, innermost first
    fn trace_of(task: &Task) -> Vec<TraceFrame> {
        task.frames
            .iter()
            .rev()
            .map(|frame| TraceFrame {
                function: frame.function_name().to_string(),
                line: frame.line(frame.ip.saturating_sub(1)),
            })
            .collect()
    }

    fn read_upvalue(&self, task: &Task, cell: &UpvalueRef) -> Value {
        match &*cell.borrow() {
            Upvalue::Closed(value) => value.clone(),
            Upvalue::Open(slot) => {
                let stack = if slot.task == task.id {
                    Some(&task.stack)
                } else {
                    self.scheduler.get(slot.task).map(|t| &t.stack)
                };
                stack
                    .and_then(|s| s.get(slot.index))
                    .cloned()
                    .unwrap_or(Value::Nil)
            }
        }
    }

    fn write_upvalue(&mut self, task: &mut Task, cell: &UpvalueRef, value: Value) {
        let mut cell = cell.borrow_mut();
        match &mut *cell {
            Upvalue::Closed(stored) => *stored = value,
            Upvalue::Open(slot) => {
                let stack = if slot.task == task.id {
                    Some(&mut task.stack)
                } else {
                    self.scheduler.get_mut(slot.task).map(|t| &mut t.stack)
                };
                if let Some(target) = stack.and_then(|s| s.get_mut(slot.index)) {
                    *target = value;
                }
            }
        }
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}
