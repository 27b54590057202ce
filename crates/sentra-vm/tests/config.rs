//! Project configuration flowing into VM limits

mod common;

use common::*;
#[allow(unused_imports)]
use common::{assert_eq, assert_ne};
use sentra_config::ConfigLoader;
use sentra_vm::{DebugHook, DebugInfo, Opcode, RuntimeError, TaskId, Value, VmConfig, VM};
use std::cell::RefCell;
use std::fs;
use std::rc::Rc;

#[test]
fn test_limits_from_project_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("sentra.toml"),
        r#"
[package]
name = "limits"
version = "0.1.0"

[runtime]
max_frames = 8
instruction_limit = 50
"#,
    )
    .unwrap();

    let mut loader = ConfigLoader::with_global_path(dir.path().join("no-global.toml"));
    let loaded = loader.load_from_directory(dir.path()).unwrap();
    let config = VmConfig::from(&loaded.runtime());
    assert_eq!(config.max_frames, 8);
    assert_eq!(config.instruction_limit, Some(50));
    assert_eq!(config.stack_capacity, VmConfig::default().stack_capacity);

    let mut spin = Asm::new();
    let start = spin.offset();
    spin.loop_to(start);
    let err = run_with_config(config, &spin).unwrap_err();
    assert_eq!(err.error, RuntimeError::ExecutionLimit { limit: 50 });
}

#[test]
fn test_vm_config_from_json() {
    let config: VmConfig = serde_json::from_str(r#"{"max_frames": 16}"#).unwrap();
    assert_eq!(config.max_frames, 16);
    assert_eq!(config.instruction_limit, VmConfig::default().instruction_limit);

    let mut a = Asm::new();
    a.op(Opcode::Nil).op(Opcode::Return);
    assert!(run_with_config(config, &a).is_ok());
}

struct FileNames(Rc<RefCell<Vec<String>>>);

impl DebugHook for FileNames {
    fn on_instruction(&mut self, _task: TaskId, _ip: usize, info: &DebugInfo) -> bool {
        self.0.borrow_mut().push(info.file.clone());
        true
    }
}

#[test]
fn test_vm_from_project_applies_debug_table() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("sentra.toml"),
        r#"
[package]
name = "traced"
version = "1.2.0"

[runtime]
max_frames = 32

[debug]
source_name = "main.sn"
profile = true
"#,
    )
    .unwrap();

    let mut loader = ConfigLoader::with_global_path(dir.path().join("no-global.toml"));
    let loaded = loader.load_from_directory(dir.path()).unwrap();
    let mut vm = VM::from_project(&loaded);
    assert_eq!(vm.config().max_frames, 32);
    assert!(vm.profiler().is_enabled());

    let files = Rc::new(RefCell::new(Vec::new()));
    vm.set_debug_hook(Box::new(FileNames(files.clone())));

    let mut a = Asm::new();
    a.num(1.0).num(2.0).op(Opcode::Add).op(Opcode::Return);
    assert_eq!(run_with(&mut vm, &a).unwrap(), Value::Number(3.0));
    assert_eq!(vm.profiler().summary().total_instructions, 4);
    assert!(files.borrow().iter().all(|f| f == "main.sn"));
    assert_eq!(files.borrow().len(), 4);
}
