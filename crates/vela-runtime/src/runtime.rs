//! The embedder-facing facade: read a file or a string, compile it, run it.
//! This is the thin layer a CLI or host application sits on top of; it owns
//! no policy beyond "turn a `RunError` into the right process exit code."

use std::fs;
use std::path::Path;

use crate::diagnostic::Diagnostic;
use crate::vm::{RunError, Vm};

pub const EXIT_OK: i32 = 0;
pub const EXIT_COMPILE_ERROR: i32 = 65;
pub const EXIT_RUNTIME_ERROR: i32 = 70;
pub const EXIT_IO_ERROR: i32 = 74;

/// Everything that can go wrong running a program from a file: the read
/// itself, or anything `Vm::interpret` reports.
#[derive(Debug)]
pub enum ProgramError {
    Io(String),
    Compile(Vec<Diagnostic>),
    Runtime(Diagnostic),
}

impl From<RunError> for ProgramError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Compile(diags) => ProgramError::Compile(diags),
            RunError::Runtime(diag) => ProgramError::Runtime(diag),
        }
    }
}

impl ProgramError {
    /// Every diagnostic this error carries, for a caller that wants to print
    /// each one (panic-mode recovery can produce more than one compile error).
    pub fn diagnostics(&self) -> Vec<&Diagnostic> {
        match self {
            ProgramError::Io(_) => Vec::new(),
            ProgramError::Compile(diags) => diags.iter().collect(),
            ProgramError::Runtime(diag) => vec![diag],
        }
    }
}

/// Compiles and runs `source` against an existing VM, preserving whatever
/// globals/heap state that VM already had (the shape a REPL needs).
pub fn run_source(vm: &mut Vm, source: &str) -> Result<(), ProgramError> {
    vm.interpret(source).map_err(ProgramError::from)
}

/// Reads `path` and runs it as a fresh top-level program.
pub fn run_file(vm: &mut Vm, path: &Path) -> Result<(), ProgramError> {
    let source = fs::read_to_string(path).map_err(|e| ProgramError::Io(e.to_string()))?;
    run_source(vm, &source)
}

/// The process exit code a CLI should use for a given outcome, matching the
/// conventional split: 0 success, 65 compile (`EX_DATAERR`), 70 runtime
/// (`EX_SOFTWARE`), 74 I/O (`EX_IOERR`).
pub fn exit_code(result: &Result<(), ProgramError>) -> i32 {
    match result {
        Ok(()) => EXIT_OK,
        Err(ProgramError::Io(_)) => EXIT_IO_ERROR,
        Err(ProgramError::Compile(_)) => EXIT_COMPILE_ERROR,
        Err(ProgramError::Runtime(_)) => EXIT_RUNTIME_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_an_io_error_with_exit_74() {
        let mut vm = Vm::new();
        let result = run_file(&mut vm, Path::new("/no/such/file.vela"));
        assert!(matches!(result, Err(ProgramError::Io(_))));
        assert_eq!(exit_code(&result), EXIT_IO_ERROR);
    }

    #[test]
    fn compile_error_maps_to_exit_65() {
        let mut vm = Vm::new();
        let result = run_source(&mut vm, "var;");
        assert_eq!(exit_code(&result), EXIT_COMPILE_ERROR);
    }

    #[test]
    fn runtime_error_maps_to_exit_70() {
        let mut vm = Vm::new();
        let result = run_source(&mut vm, "print nope;");
        assert_eq!(exit_code(&result), EXIT_RUNTIME_ERROR);
    }

    #[test]
    fn success_maps_to_exit_0() {
        let mut vm = Vm::new();
        let result = run_source(&mut vm, "print 1;");
        assert_eq!(exit_code(&result), EXIT_OK);
    }
}
