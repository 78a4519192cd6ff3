//! Run command - execute a source file

use std::path::Path;

use anyhow::Result;
use vela_runtime::runtime::{self, ProgramError};
use vela_runtime::Vm;

/// Compile and run `file_path`, printing diagnostics to stderr (or stdout as
/// JSON, one object per line, if `json_output` is set). Returns the process
/// exit code the caller should use.
pub fn run(file_path: &str, json_output: bool) -> Result<i32> {
    let mut vm = Vm::new();
    let result = runtime::run_file(&mut vm, Path::new(file_path));

    if let Err(err) = &result {
        report(file_path, err, json_output);
    }

    Ok(runtime::exit_code(&result))
}

fn report(file_path: &str, err: &ProgramError, json_output: bool) {
    if let ProgramError::Io(message) = err {
        eprintln!("Failed to read source file {}: {}", file_path, message);
        return;
    }

    if json_output {
        for diag in err.diagnostics() {
            println!("{}", diag.to_json_string());
        }
    } else {
        for diag in err.diagnostics() {
            eprintln!("{}", diag.to_human_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn running_a_valid_script_exits_zero() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "print 1 + 2;").unwrap();

        let exit_code = run(temp_file.path().to_str().unwrap(), false).unwrap();
        assert_eq!(exit_code, 0);
    }

    #[test]
    fn a_missing_file_exits_74() {
        let exit_code = run("no/such/file.vela", false).unwrap();
        assert_eq!(exit_code, 74);
    }

    #[test]
    fn a_compile_error_exits_65() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "var;").unwrap();

        let exit_code = run(temp_file.path().to_str().unwrap(), false).unwrap();
        assert_eq!(exit_code, 65);
    }

    #[test]
    fn a_runtime_error_exits_70() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "print undefinedThing;").unwrap();

        let exit_code = run(temp_file.path().to_str().unwrap(), false).unwrap();
        assert_eq!(exit_code, 70);
    }

    #[test]
    fn json_output_prints_one_diagnostic_per_line() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "var;").unwrap();

        let exit_code = run(temp_file.path().to_str().unwrap(), true).unwrap();
        assert_eq!(exit_code, 65);
    }
}
