//! Core execution tests: arithmetic, variables, control flow,
//! collections, strings and iteration

mod common;

use common::*;
#[allow(unused_imports)]
use common::{assert_eq, assert_ne};
use rstest::rstest;
use sentra_vm::{Opcode, RuntimeError, Value, VmConfig, VM};

// ============================================================================
// Arithmetic and comparison
// ============================================================================

#[test]
fn test_precedence_expression() {
    // 1 + 2 * 3
    let mut a = Asm::new();
    a.num(1.0).num(2.0).num(3.0).op(Opcode::Mul).op(Opcode::Add).op(Opcode::Return);
    assert_eq!(run(&a).unwrap(), Value::Number(7.0));
}

#[rstest]
#[case(Opcode::Sub, 7.0, 2.0, 5.0)]
#[case(Opcode::Div, 7.0, 2.0, 3.5)]
#[case(Opcode::Mod, 7.0, 3.0, 1.0)]
#[case(Opcode::Mod, -7.0, 3.0, -1.0)]
fn test_binary_arithmetic(#[case] op: Opcode, #[case] a: f64, #[case] b: f64, #[case] expected: f64) {
    let mut asm = Asm::new();
    asm.num(a).num(b).op(op).op(Opcode::Return);
    assert_eq!(run(&asm).unwrap(), Value::Number(expected));
}

#[rstest]
#[case(Opcode::Less, 1.0, 2.0, true)]
#[case(Opcode::Greater, 1.0, 2.0, false)]
#[case(Opcode::LessEqual, 2.0, 2.0, true)]
#[case(Opcode::GreaterEqual, 1.0, 2.0, false)]
#[case(Opcode::Equal, 2.0, 2.0, true)]
#[case(Opcode::NotEqual, 2.0, 2.0, false)]
fn test_comparisons(#[case] op: Opcode, #[case] a: f64, #[case] b: f64, #[case] expected: bool) {
    let mut asm = Asm::new();
    asm.num(a).num(b).op(op).op(Opcode::Return);
    assert_eq!(run(&asm).unwrap(), Value::Bool(expected));
}

#[test]
fn test_nan_comparisons_are_false() {
    let mut a = Asm::new();
    a.num(f64::NAN).num(1.0).op(Opcode::Less);
    a.num(f64::NAN).num(1.0).op(Opcode::GreaterEqual);
    a.num(f64::NAN).num(f64::NAN).op(Opcode::Equal);
    a.op(Opcode::Array).u16(3).op(Opcode::Return);
    assert_eq!(
        run(&a).unwrap(),
        Value::array(vec![Value::Bool(false), Value::Bool(false), Value::Bool(false)])
    );
}

#[test]
fn test_division_by_zero_is_an_error() {
    let mut a = Asm::new();
    a.num(1.0).num(0.0).op(Opcode::Div).op(Opcode::Return);
    let err = assert_error_kind(&a, "DivisionByZero");
    assert_eq!(err.error, RuntimeError::DivisionByZero);
}

#[test]
fn test_add_number_to_bool_is_type_error() {
    let mut a = Asm::new();
    a.num(1.0).op(Opcode::True).op(Opcode::Add).op(Opcode::Return);
    assert_error_kind(&a, "TypeError");
}

#[test]
fn test_string_plus_number_concatenates() {
    let mut a = Asm::new();
    a.str("n=").num(4.0).op(Opcode::Add).op(Opcode::Return);
    assert_eq!(run(&a).unwrap(), Value::string("n=4"));
}

#[test]
fn test_logical_operators_return_operands() {
    let mut a = Asm::new();
    a.op(Opcode::Nil).num(1.0).op(Opcode::And);
    a.op(Opcode::Nil).num(1.0).op(Opcode::Or);
    a.num(0.0).op(Opcode::Not);
    a.op(Opcode::Array).u16(3).op(Opcode::Return);
    // Zero is truthy: only nil and false are falsy.
    assert_eq!(
        run(&a).unwrap(),
        Value::array(vec![Value::Nil, Value::Number(1.0), Value::Bool(false)])
    );
}

// ============================================================================
// Variables
// ============================================================================

#[test]
fn test_globals_define_get_set() {
    let mut a = Asm::new();
    a.num(10.0).named(Opcode::DefineGlobal, "x");
    a.named(Opcode::GetGlobal, "x").num(5.0).op(Opcode::Add);
    a.named(Opcode::SetGlobal, "x").op(Opcode::Pop);
    a.named(Opcode::GetGlobal, "x").op(Opcode::Return);
    let mut vm = VM::new();
    assert_eq!(run_with(&mut vm, &a).unwrap(), Value::Number(15.0));
    assert_eq!(vm.global("x"), Some(Value::Number(15.0)));
}

#[test]
fn test_undefined_global() {
    let mut a = Asm::new();
    a.named(Opcode::GetGlobal, "missing").op(Opcode::Return);
    let err = assert_error_kind(&a, "UndefinedVariable");
    assert_eq!(
        err.error,
        RuntimeError::UndefinedVariable {
            name: "missing".to_string()
        }
    );
}

#[test]
fn test_host_defined_global_is_visible() {
    let mut vm = VM::new();
    vm.define_global("answer", Value::Number(42.0));
    let mut a = Asm::new();
    a.named(Opcode::GetGlobal, "answer").op(Opcode::Return);
    assert_eq!(run_with(&mut vm, &a).unwrap(), Value::Number(42.0));
}

#[test]
fn test_locals_wide_and_fast_forms_share_slots() {
    let mut a = Asm::new();
    a.num(3.0).store(0);
    a.op(Opcode::GetLocal).u16(0).num(1.0).op(Opcode::Add);
    a.op(Opcode::SetLocal).u16(1).op(Opcode::Pop);
    a.load(0).load(1).op(Opcode::Array).u16(2).op(Opcode::Return);
    assert_eq!(run(&a).unwrap(), numbers(&[3.0, 4.0]));
}

// ============================================================================
// Control flow
// ============================================================================

#[test]
fn test_if_else() {
    // if (1 > 2) "yes" else "no"
    let mut a = Asm::new();
    a.num(1.0).num(2.0).op(Opcode::Greater);
    let else_jump = a.jump(Opcode::JumpIfFalse);
    a.str("yes");
    let end_jump = a.jump(Opcode::Jump);
    a.patch(else_jump);
    a.str("no");
    a.patch(end_jump);
    a.op(Opcode::Return);
    assert_eq!(run(&a).unwrap(), Value::string("no"));
}

#[test]
fn test_while_loop_sum() {
    // sum = 0; i = 0; while (i < 100) { sum = sum + i; i = i + 1 }
    let mut a = Asm::new();
    a.num(0.0).store(0).num(0.0).store(1);
    let start = a.offset();
    a.load(1).num(100.0).op(Opcode::Less);
    let exit = a.jump(Opcode::JumpIfFalse);
    a.load(0).load(1).op(Opcode::Add).store(0);
    a.load(1).num(1.0).op(Opcode::Add).store(1);
    a.loop_to(start);
    a.patch(exit);
    a.load(0).op(Opcode::Return);
    assert_eq!(run(&a).unwrap(), Value::Number(4950.0));
}

#[test]
fn test_running_off_the_end_returns_nil() {
    let mut a = Asm::new();
    a.num(1.0).op(Opcode::Pop);
    assert_eq!(run(&a).unwrap(), Value::Nil);
}

#[test]
fn test_halt_returns_top_of_stack() {
    let mut a = Asm::new();
    a.num(9.0).op(Opcode::Halt).num(10.0).op(Opcode::Return);
    assert_eq!(run(&a).unwrap(), Value::Number(9.0));
}

#[test]
fn test_instruction_limit_stops_infinite_loop() {
    let mut a = Asm::new();
    let start = a.offset();
    a.op(Opcode::Nil).op(Opcode::Pop);
    a.loop_to(start);
    let config = VmConfig {
        instruction_limit: Some(100),
        ..VmConfig::default()
    };
    let err = run_with_config(config, &a).unwrap_err();
    assert_eq!(err.error, RuntimeError::ExecutionLimit { limit: 100 });
}

#[test]
fn test_unknown_opcode_is_fatal() {
    let mut a = Asm::new();
    a.num(1.0).u8(0xEE);
    let err = assert_error_kind(&a, "InvalidBytecode");
    assert!(err.error.is_fatal());
}

#[test]
fn test_stack_underflow_is_invalid_bytecode() {
    let mut a = Asm::new();
    a.op(Opcode::Add);
    assert_error_kind(&a, "InvalidBytecode");
}

// ============================================================================
// Stack balance
// ============================================================================

#[test]
fn test_statements_leave_stack_balanced() {
    // Each statement leaves nothing behind, so the array collects exactly
    // the three marker values.
    let mut a = Asm::new();
    a.num(1.0);
    a.num(5.0).store(0);
    a.num(2.0).named(Opcode::DefineGlobal, "g");
    a.num(7.0).op(Opcode::Dup).op(Opcode::Pop).op(Opcode::Pop);
    a.num(2.0);
    a.op(Opcode::True);
    let skip = a.jump(Opcode::JumpIfFalse);
    a.patch(skip);
    a.num(3.0);
    a.op(Opcode::Array).u16(3).op(Opcode::Return);
    assert_eq!(run(&a).unwrap(), numbers(&[1.0, 2.0, 3.0]));
}

// ============================================================================
// Arrays
// ============================================================================

#[test]
fn test_array_index_and_set_index() {
    let mut a = Asm::new();
    a.num(1.0).num(2.0).num(3.0).op(Opcode::BuildList).u16(3).store(0);
    a.load(0).num(1.0).num(20.0).op(Opcode::SetIndex).op(Opcode::Pop);
    a.load(0).num(1.0).op(Opcode::Index);
    a.load(0).op(Opcode::ArrayLen);
    a.load(0);
    a.op(Opcode::Array).u16(3).op(Opcode::Return);
    assert_eq!(
        run(&a).unwrap(),
        Value::array(vec![
            Value::Number(20.0),
            Value::Number(3.0),
            numbers(&[1.0, 20.0, 3.0]),
        ])
    );
}

#[rstest]
#[case(3.0)]
#[case(-1.0)]
fn test_array_index_out_of_bounds(#[case] index: f64) {
    let mut a = Asm::new();
    a.num(1.0).num(2.0).op(Opcode::Array).u16(2).num(index).op(Opcode::Index).op(Opcode::Return);
    let err = assert_error_kind(&a, "IndexOutOfBounds");
    assert_eq!(err.error, RuntimeError::IndexOutOfBounds { index, len: 2 });
}

#[test]
fn test_fractional_index_is_type_error() {
    let mut a = Asm::new();
    a.num(1.0).op(Opcode::Array).u16(1).num(0.5).op(Opcode::Index).op(Opcode::Return);
    assert_error_kind(&a, "TypeError");
}

#[test]
fn test_arrays_are_shared_by_reference() {
    let mut a = Asm::new();
    a.num(0.0).op(Opcode::Array).u16(1).store(0);
    a.load(0).store(1);
    a.load(1).num(0.0).num(5.0).op(Opcode::SetIndex).op(Opcode::Pop);
    a.load(0).op(Opcode::Return);
    assert_eq!(run(&a).unwrap(), numbers(&[5.0]));
}

#[test]
fn test_set_index_past_end_is_out_of_bounds() {
    let mut a = Asm::new();
    a.op(Opcode::Array).u16(0).num(0.0).num(5.0).op(Opcode::SetIndex).op(Opcode::Return);
    assert_error_kind(&a, "IndexOutOfBounds");
}

#[test]
fn test_unpack_pads_with_nil() {
    let mut a = Asm::new();
    a.num(1.0).op(Opcode::Array).u16(1);
    a.op(Opcode::Unpack).u8(3);
    a.op(Opcode::Array).u16(3).op(Opcode::Return);
    assert_eq!(
        run(&a).unwrap(),
        Value::array(vec![Value::Number(1.0), Value::Nil, Value::Nil])
    );
}

// ============================================================================
// Maps
// ============================================================================

#[test]
fn test_map_build_get_set_delete() {
    let mut a = Asm::new();
    a.str("a").num(1.0).str("b").num(2.0).op(Opcode::BuildMap).u16(2).store(0);
    a.load(0).str("c").num(3.0).op(Opcode::MapSet).op(Opcode::Pop);
    a.load(0).str("a").op(Opcode::MapDelete);
    a.load(0).str("b").op(Opcode::MapGet);
    a.load(0).op(Opcode::MapKeys);
    a.load(0).op(Opcode::MapValues);
    a.op(Opcode::Array).u16(4).op(Opcode::Return);
    assert_eq!(
        run(&a).unwrap(),
        Value::array(vec![
            Value::Number(1.0),
            Value::Number(2.0),
            Value::array(vec![Value::string("b"), Value::string("c")]),
            numbers(&[2.0, 3.0]),
        ])
    );
}

#[test]
fn test_map_numeric_keys_use_display_form() {
    let mut a = Asm::new();
    a.num(1.0).str("one").op(Opcode::Map).u16(1);
    a.str("1").op(Opcode::MapGet).op(Opcode::Return);
    assert_eq!(run(&a).unwrap(), Value::string("one"));
}

#[test]
fn test_map_get_missing_key() {
    let mut a = Asm::new();
    a.op(Opcode::Map).u16(0).str("nope").op(Opcode::MapGet).op(Opcode::Return);
    let err = assert_error_kind(&a, "KeyNotFound");
    assert_eq!(
        err.error,
        RuntimeError::KeyNotFound {
            key: "nope".to_string()
        }
    );
}

#[test]
fn test_map_index_reads_keys() {
    let mut a = Asm::new();
    a.str("x").num(9.0).op(Opcode::Map).u16(1).str("x").op(Opcode::Index).op(Opcode::Return);
    assert_eq!(run(&a).unwrap(), Value::Number(9.0));
}

#[test]
fn test_map_used_as_its_own_key() {
    let mut a = Asm::new();
    a.op(Opcode::Map).u16(0).store(0);
    a.load(0).load(0).num(1.0).op(Opcode::SetIndex).op(Opcode::Pop);
    a.load(0).op(Opcode::ToString).op(Opcode::Return);
    assert_eq!(run(&a).unwrap(), Value::string("{{}: 1}"));
}

#[test]
fn test_remove_map_from_itself() {
    let mut a = Asm::new();
    a.op(Opcode::Map).u16(0).store(0);
    a.load(0).load(0).named(Opcode::GetGlobal, "remove").call(2);
    a.op(Opcode::Return);
    assert_eq!(run(&a).unwrap(), Value::Nil);
}

#[test]
fn test_self_containing_array_prints_placeholder() {
    let mut a = Asm::new();
    a.op(Opcode::Array).u16(0).store(0);
    a.load(0).load(0).named(Opcode::GetGlobal, "push").call(2).op(Opcode::Pop);
    a.load(0).op(Opcode::ToString);
    a.load(0).load(0).op(Opcode::Equal);
    a.op(Opcode::Array).u16(2).op(Opcode::Return);
    assert_eq!(
        run(&a).unwrap(),
        Value::array(vec![Value::string("[[...]]"), Value::Bool(true)])
    );
}

// ============================================================================
// Strings and types
// ============================================================================

#[test]
fn test_string_operations() {
    let mut a = Asm::new();
    a.str("héllo").op(Opcode::StringLen);
    a.str("héllo").num(1.0).num(3.0).op(Opcode::Substring);
    a.str("x").num(2.0).op(Opcode::Concat);
    a.op(Opcode::True).op(Opcode::ToString);
    a.op(Opcode::Array).u16(4).op(Opcode::Return);
    assert_eq!(
        run(&a).unwrap(),
        Value::array(vec![
            Value::Number(5.0),
            Value::string("él"),
            Value::string("x2"),
            Value::string("true"),
        ])
    );
}

#[rstest]
#[case(Value::Nil, "nil")]
#[case(Value::Number(1.0), "number")]
#[case(Value::string("s"), "string")]
#[case(Value::Bool(true), "bool")]
fn test_type_of(#[case] value: Value, #[case] expected: &str) {
    let mut a = Asm::new();
    a.constant(value).op(Opcode::TypeOf).op(Opcode::Return);
    assert_eq!(run(&a).unwrap(), Value::string(expected));
}

#[test]
fn test_is_type() {
    let mut a = Asm::new();
    a.num(1.0).named(Opcode::IsType, "number");
    a.num(1.0).named(Opcode::IsType, "string");
    a.op(Opcode::Array).u16(2).op(Opcode::Return);
    assert_eq!(
        run(&a).unwrap(),
        Value::array(vec![Value::Bool(true), Value::Bool(false)])
    );
}

// ============================================================================
// Iteration
// ============================================================================

#[test]
fn test_for_in_over_array_snapshot() {
    // total = 0; for x in xs { push(xs, 0); total = total + x }
    // Mutating the array during the loop does not extend the iteration.
    let mut a = Asm::new();
    a.num(1.0).num(2.0).num(3.0).op(Opcode::Array).u16(3).store(0);
    a.num(0.0).store(1);
    a.load(0).op(Opcode::IterStart);
    let start = a.offset();
    a.op(Opcode::IterNext);
    let exit = a.jump(Opcode::JumpIfFalse);
    a.store(2);
    a.load(0).num(0.0).named(Opcode::GetGlobal, "push").call(2).op(Opcode::Pop);
    a.load(1).load(2).op(Opcode::Add).store(1);
    a.loop_to(start);
    a.patch(exit);
    a.op(Opcode::Pop).op(Opcode::IterEnd);
    a.load(1).load(0).op(Opcode::ArrayLen).op(Opcode::Array).u16(2).op(Opcode::Return);
    assert_eq!(run(&a).unwrap(), numbers(&[6.0, 6.0]));
}

#[test]
fn test_iterate_map_keys_in_insertion_order() {
    let mut a = Asm::new();
    a.str("z").num(1.0).str("a").num(2.0).op(Opcode::Map).u16(2).op(Opcode::IterStart);
    a.op(Opcode::IterNext).op(Opcode::Pop);
    a.op(Opcode::IterNext).op(Opcode::Pop);
    a.op(Opcode::IterNext).op(Opcode::Pop);
    a.op(Opcode::IterEnd);
    a.op(Opcode::Array).u16(3).op(Opcode::Return);
    assert_eq!(
        run(&a).unwrap(),
        Value::array(vec![Value::string("z"), Value::string("a"), Value::Nil])
    );
}

#[test]
fn test_iterating_a_number_is_type_error() {
    let mut a = Asm::new();
    a.num(3.0).op(Opcode::IterStart).op(Opcode::Return);
    assert_error_kind(&a, "TypeError");
}

// ============================================================================
// Output and profiling
// ============================================================================

#[test]
fn test_print_and_log_go_to_output() {
    let mut vm = VM::new();
    let output = vm.capture_output();
    let mut a = Asm::new();
    a.str("hello").op(Opcode::Print);
    a.num(1.0).str("two").named(Opcode::GetGlobal, "log").call(2).op(Opcode::Pop);
    a.op(Opcode::Nil).op(Opcode::Return);
    run_with(&mut vm, &a).unwrap();
    assert_eq!(output.lines(), vec!["hello".to_string(), "1 two".to_string()]);
}

#[test]
fn test_profiler_counts_instructions() {
    let mut vm = VM::new();
    vm.enable_profiling();
    let mut a = Asm::new();
    a.num(1.0).num(2.0).op(Opcode::Add).op(Opcode::Return);
    run_with(&mut vm, &a).unwrap();
    let profiler = vm.profiler();
    assert_eq!(profiler.total_instructions(), 4);
    assert_eq!(profiler.instruction_count(Opcode::Constant), 2);
    assert_eq!(profiler.instruction_count(Opcode::Add), 1);
}

#[test]
fn test_vm_is_reusable_across_programs() {
    let mut vm = VM::new();
    let mut a = Asm::new();
    a.num(1.0).named(Opcode::DefineGlobal, "count");
    a.named(Opcode::GetGlobal, "count").op(Opcode::Return);
    assert_eq!(run_with(&mut vm, &a).unwrap(), Value::Number(1.0));

    let mut b = Asm::new();
    b.named(Opcode::GetGlobal, "count").num(1.0).op(Opcode::Add).op(Opcode::Return);
    assert_eq!(run_with(&mut vm, &b).unwrap(), Value::Number(2.0));
}
