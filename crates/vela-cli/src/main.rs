//! Command-line entry point: run a script file, or drop into a REPL when
//! no file is given.

mod commands;

use std::process::ExitCode;

use clap::Parser;

/// A tree-walking-free bytecode interpreter.
#[derive(Parser)]
#[command(name = "vela", version, about)]
struct Cli {
    /// Script to run. Omit to start an interactive REPL.
    file: Option<String>,

    /// Print diagnostics as JSON instead of human-readable text.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.file {
        Some(file) => match commands::run::run(&file, cli.json) {
            Ok(code) => ExitCode::from(code as u8),
            Err(err) => {
                eprintln!("{err:#}");
                ExitCode::from(74)
            }
        },
        None => match commands::repl::run() {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{err:#}");
                ExitCode::FAILURE
            }
        },
    }
}
