//! End-to-end language behavior, run through the public `Vm` API only.

use pretty_assertions::assert_eq;
use rstest::rstest;
use vela_runtime::vm::{RunError, Vm};

fn run(source: &str) -> Result<(), RunError> {
    let mut vm = Vm::new();
    vm.interpret(source)
}

#[rstest]
#[case("var a = 1 + 2 * 3; print a;")]
#[case("var a = (1 + 2) * 3; print a;")]
#[case("print 10 / 2 - 1;")]
#[case(r#"print "foo" + "bar";"#)]
#[case("print true and false;")]
#[case("print true or false;")]
#[case("print !false;")]
#[case("print -5 + 5;")]
fn well_formed_expressions_run_without_error(#[case] source: &str) {
    assert!(run(source).is_ok(), "expected {source:?} to run cleanly");
}

#[rstest]
#[case("print 1 >= 2;")]
#[case("print 1 <= 2;")]
#[case("print 1 != 2;")]
fn comparison_sugar_lowers_to_supported_opcodes(#[case] source: &str) {
    assert!(run(source).is_ok(), "expected {source:?} to run cleanly");
}

#[rstest]
#[case("print nope;", "Undefined variable")]
#[case("var x = 1; x();", "Can only call")]
#[case(r#"print 1 + "a";"#, "Operands must be")]
fn runtime_errors_report_the_expected_message(#[case] source: &str, #[case] expected_substring: &str) {
    let err = run(source).unwrap_err();
    match err {
        RunError::Runtime(diag) => assert!(
            diag.message.contains(expected_substring),
            "expected {:?} to contain {:?}",
            diag.message,
            expected_substring
        ),
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[rstest]
#[case("var;")]
#[case("fun () {}")]
#[case("class A(A) {}")]
#[case("break;")]
fn malformed_programs_are_compile_errors(#[case] source: &str) {
    let err = run(source).unwrap_err();
    assert!(matches!(err, RunError::Compile(_)), "expected a compile error for {source:?}");
}

#[test]
fn closures_keep_their_captured_state_independent_per_instance() {
    let mut vm = Vm::new();
    assert!(vm
        .interpret(
            r#"
            fun makeCounter() {
                var i = 0;
                fun count() { i = i + 1; return i; }
                return count;
            }
            var a = makeCounter();
            var b = makeCounter();
            a();
            a();
            b();
            if (a() != 3) { nope; }
            if (b() != 2) { nope; }
            "#
        )
        .is_ok());
}

#[test]
fn classes_inherit_fields_and_methods_through_super() {
    let mut vm = Vm::new();
    let result = vm.interpret(
        r#"
        class Shape {
            area() { return 0; }
            describe() { return "a shape with area " + "?"; }
        }
        class Square(Shape) {
            init(side) { this.side = side; }
            area() { return this.side * this.side; }
        }
        var s = Square(4);
        if (s.area() != 16) { nope; }
        "#,
    );
    assert_eq!(format!("{:?}", result.is_ok()), "true");
}
