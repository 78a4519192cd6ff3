//! Disassembler coverage: instruction encoding via plain assertions (exact
//! offsets shift too easily for a byte-for-byte snapshot to be worth the
//! churn), plus inline snapshots of the one piece of disassembly output
//! that is simple enough to pin exactly: number formatting.

use vela_runtime::compiler::Compiler;
use vela_runtime::disasm::{disassemble_chunk, format_number};
use vela_runtime::heap::{Heap, Obj};
use vela_runtime::table::InternTable;
use vela_runtime::value::Value;

fn disassemble(source: &str) -> String {
    let mut heap = Heap::new();
    let mut interns = InternTable::new();
    let function_id = Compiler::compile(source, &mut heap, &mut interns).expect("compiles");
    let Obj::Function(function) = heap.get(function_id) else {
        panic!("top-level compile result is not a function");
    };
    disassemble_chunk(&function.chunk, &heap, "script")
}

#[test]
fn integral_and_fractional_numbers_format_as_expected() {
    insta::assert_snapshot!(format_number(7.0), @"7");
    insta::assert_snapshot!(format_number(3.5), @"3.5");
    insta::assert_snapshot!(format_number(0.0), @"0");
    insta::assert_snapshot!(format_number(-12.0), @"-12");
}

#[test]
fn disassembles_arithmetic_and_a_global() {
    let text = disassemble("var a = 1 + 2 * 3; print a;");
    assert!(text.contains("Constant"));
    assert!(text.contains("Multiply"));
    assert!(text.contains("Add"));
    assert!(text.contains("DefineGlobal"));
    assert!(text.contains("GetGlobal"));
    assert!(text.contains("Print"));
}

#[test]
fn disassembles_an_if_else_with_jumps() {
    let text = disassemble("if (true) { print 1; } else { print 2; }");
    assert!(text.contains("JumpIfFalse"));
    assert!(text.contains("Jump ->"));
}

#[test]
fn disassembles_a_while_loop() {
    let text = disassemble("var i = 0; while (i < 3) { i = i + 1; }");
    assert!(text.contains("Loop ->"));
    assert!(text.contains("Less"));
}

#[test]
fn comparison_sugar_lowers_to_two_instructions() {
    let text = disassemble("print 1 >= 2;");
    assert!(text.contains("Less"));
    assert!(text.contains("Not"));
    assert!(!text.contains("GreaterEqual"));
}

#[test]
fn the_answer_constant_round_trips_through_the_pool() {
    let mut heap = Heap::new();
    let mut interns = InternTable::new();
    let function_id = Compiler::compile("print 42;", &mut heap, &mut interns).expect("compiles");
    let Obj::Function(function) = heap.get(function_id) else {
        panic!("expected a function");
    };
    assert!(function.chunk.constants.contains(&Value::Number(42.0)));
}
