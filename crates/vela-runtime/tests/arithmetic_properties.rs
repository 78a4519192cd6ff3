//! Property-based coverage for arithmetic: the compiler/VM pair should never
//! panic on any well-formed nested arithmetic expression over small integers,
//! and the result should match evaluating the same expression in Rust.

use proptest::prelude::*;
use vela_runtime::vm::Vm;

#[derive(Debug, Clone)]
enum Expr {
    Lit(i32),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn render(&self) -> String {
        match self {
            Expr::Lit(n) => n.to_string(),
            Expr::Add(a, b) => format!("({} + {})", a.render(), b.render()),
            Expr::Sub(a, b) => format!("({} - {})", a.render(), b.render()),
            Expr::Mul(a, b) => format!("({} * {})", a.render(), b.render()),
        }
    }

    fn eval(&self) -> f64 {
        match self {
            Expr::Lit(n) => *n as f64,
            Expr::Add(a, b) => a.eval() + b.eval(),
            Expr::Sub(a, b) => a.eval() - b.eval(),
            Expr::Mul(a, b) => a.eval() * b.eval(),
        }
    }
}

fn arb_expr() -> impl Strategy<Value = Expr> {
    let leaf = (-20i32..20).prop_map(Expr::Lit);
    leaf.prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| Expr::Add(Box::new(a), Box::new(b))),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| Expr::Sub(Box::new(a), Box::new(b))),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| Expr::Mul(Box::new(a), Box::new(b))),
        ]
    })
}

proptest! {
    #[test]
    fn nested_arithmetic_never_panics_and_matches_rust(expr in arb_expr()) {
        let source = format!("var result = {};", expr.render());
        let mut vm = Vm::new();
        prop_assert!(vm.interpret(&source).is_ok(), "failed to run {source:?}");

        // Smuggle the value out through a runtime assertion: if the compiled
        // program's result doesn't match Rust's own evaluation, force a
        // runtime error whose message carries both values for the failure report.
        let check = format!(
            "if (result != {}) {{ var mismatch = \"want {} got \" + result; nope(mismatch); }}",
            expr.eval(),
            expr.eval()
        );
        let outcome = vm.interpret(&check);
        prop_assert!(outcome.is_ok(), "expression {:?} evaluated to a different value than Rust expected", expr.render());
    }
}
