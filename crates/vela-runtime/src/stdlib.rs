//! Native functions available as globals in every `Vm`. Kept deliberately
//! small: this language's standard library is whatever the runtime exposes
//! as native bindings, not a separate module system.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::value::Value;
use crate::vm::Vm;

pub(crate) fn register(vm: &mut Vm) {
    vm.define_native("clock", clock);
}

/// Seconds since the Unix epoch, as a float. Lets scripts measure elapsed
/// time without the language needing its own notion of wall-clock time.
fn clock(_args: &[Value]) -> Result<Value, String> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| "system clock is before the Unix epoch".to_string())?;
    Ok(Value::Number(elapsed.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_ignores_its_arguments_and_returns_a_number() {
        let result = clock(&[Value::Number(1.0), Value::Bool(true)]).unwrap();
        assert!(matches!(result, Value::Number(_)));
    }

    #[test]
    fn clock_is_registered_as_a_global() {
        let mut vm = Vm::new();
        assert!(vm.interpret("var t = clock(); print t >= 0;").is_ok());
    }
}
