//! Debug hook integration

mod common;

use common::*;
#[allow(unused_imports)]
use common::{assert_eq, assert_ne};
use sentra_vm::{DebugHook, DebugInfo, Opcode, RuntimeError, TaskId, Value, VmRunResult, VM};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Default)]
struct Events {
    lines: Vec<i32>,
    calls: Vec<(String, usize)>,
    returns: Vec<(String, Value)>,
    errors: Vec<String>,
}

/// Records everything and pauses once before `pause_at`
struct Recorder {
    events: Rc<RefCell<Events>>,
    pause_at: Option<usize>,
}

impl DebugHook for Recorder {
    fn on_instruction(&mut self, _task: TaskId, ip: usize, info: &DebugInfo) -> bool {
        if self.pause_at == Some(ip) {
            self.pause_at = None;
            return false;
        }
        self.events.borrow_mut().lines.push(info.line);
        true
    }

    fn on_call(&mut self, _task: TaskId, function: &str, depth: usize) {
        self.events.borrow_mut().calls.push((function.to_string(), depth));
    }

    fn on_return(&mut self, _task: TaskId, function: &str, value: &Value) {
        self.events
            .borrow_mut()
            .returns
            .push((function.to_string(), value.clone()));
    }

    fn on_error(&mut self, _task: TaskId, error: &RuntimeError) {
        self.events.borrow_mut().errors.push(error.kind().to_string());
    }
}

fn recorder(vm: &mut VM, pause_at: Option<usize>) -> Rc<RefCell<Events>> {
    let events = Rc::new(RefCell::new(Events::default()));
    vm.set_debug_hook(Box::new(Recorder {
        events: events.clone(),
        pause_at,
    }));
    events
}

fn two_line_program() -> Asm {
    let mut a = Asm::new();
    a.line(1).num(1.0).num(2.0);
    a.line(2).op(Opcode::Add).op(Opcode::Return);
    a
}

#[test]
fn test_hook_sees_every_instruction_line() {
    let mut vm = VM::new();
    let events = recorder(&mut vm, None);
    run_with(&mut vm, &two_line_program()).unwrap();
    assert_eq!(events.borrow().lines, vec![1, 1, 2, 2]);
}

#[test]
fn test_pause_and_resume() {
    let mut vm = VM::new();
    let events = recorder(&mut vm, Some(6));
    let main = vm.load(two_line_program().finish());

    let paused = vm.run().unwrap();
    assert_eq!(paused, VmRunResult::Paused { task: main, ip: 6 });
    // The instruction at the pause point has not run yet.
    assert_eq!(events.borrow().lines, vec![1, 1]);

    let done = vm.run().unwrap();
    assert_eq!(done, VmRunResult::Complete(Value::Number(3.0)));
    assert_eq!(events.borrow().lines, vec![1, 1, 2, 2]);
}

#[test]
fn test_call_and_return_events() {
    let mut body = Asm::new();
    body.load(0).op(Opcode::Negate).op(Opcode::Return);
    let mut a = Asm::new();
    a.num(4.0).closure(function("neg", 1, 1, 0, &body), &[]).call(1).op(Opcode::Return);

    let mut vm = VM::new();
    let events = recorder(&mut vm, None);
    run_with(&mut vm, &a).unwrap();

    let events = events.borrow();
    assert_eq!(events.calls, vec![("neg".to_string(), 2)]);
    assert_eq!(
        events.returns,
        vec![
            ("neg".to_string(), Value::Number(-4.0)),
            ("<main>".to_string(), Value::Number(-4.0)),
        ]
    );
}

#[test]
fn test_error_event_precedes_handling() {
    let mut a = Asm::new();
    let handler = a.jump(Opcode::Try);
    a.num(1.0).num(0.0).op(Opcode::Mod).op(Opcode::Pop);
    a.op(Opcode::EndTry);
    a.patch(handler);
    a.op(Opcode::Catch).u16(0).op(Opcode::Nil).op(Opcode::Return);

    let mut vm = VM::new();
    let events = recorder(&mut vm, None);
    run_with(&mut vm, &a).unwrap();
    assert_eq!(events.borrow().errors, vec!["DivisionByZero".to_string()]);
}

#[test]
fn test_frames_unwound_by_throw_report_return() {
    let mut inner = Asm::new();
    inner.str("boom").op(Opcode::Throw);
    let mut outer = Asm::new();
    outer
        .closure(function("inner", 0, 0, 0, &inner), &[])
        .call(0)
        .op(Opcode::Return);

    let mut a = Asm::new();
    let handler = a.jump(Opcode::Try);
    a.closure(function("outer", 0, 0, 0, &outer), &[]).call(0).op(Opcode::Pop);
    a.op(Opcode::EndTry);
    let done = a.jump(Opcode::Jump);
    a.patch(handler);
    a.op(Opcode::Catch).u16(0);
    a.patch(done);
    a.load(0).op(Opcode::Return);

    let mut vm = VM::new();
    let events = recorder(&mut vm, None);
    assert_eq!(run_with(&mut vm, &a).unwrap(), Value::string("boom"));

    let events = events.borrow();
    assert_eq!(
        events.calls,
        vec![("outer".to_string(), 2), ("inner".to_string(), 3)]
    );
    assert_eq!(
        events.returns,
        vec![
            ("inner".to_string(), Value::string("boom")),
            ("outer".to_string(), Value::string("boom")),
            ("<main>".to_string(), Value::string("boom")),
        ]
    );
}

#[test]
fn test_cleared_hook_stops_receiving_events() {
    let mut vm = VM::new();
    let events = recorder(&mut vm, None);
    assert!(vm.clear_debug_hook().is_some());
    run_with(&mut vm, &two_line_program()).unwrap();
    assert!(events.borrow().lines.is_empty());
}

#[test]
fn test_source_name_reaches_hook() {
    struct FileCheck(Rc<RefCell<Vec<String>>>);
    impl DebugHook for FileCheck {
        fn on_instruction(&mut self, _task: TaskId, _ip: usize, info: &DebugInfo) -> bool {
            self.0.borrow_mut().push(format!("{}:{}", info.file, info.function));
            true
        }
    }

    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut vm = VM::new();
    vm.set_source_name("main.sn");
    vm.set_debug_hook(Box::new(FileCheck(seen.clone())));
    let mut a = Asm::new();
    a.op(Opcode::Nil).op(Opcode::Return);
    run_with(&mut vm, &a).unwrap();
    assert_eq!(seen.borrow()[0], "main.sn:<main>");
}
