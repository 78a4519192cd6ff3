//! Interactive REPL - reads a line at a time, accumulating until the input
//! is balanced, then runs it against a persistent runtime.

use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use vela_runtime::repl::{InputCompleteness, MultilineInput, ReplCore};

pub fn run() -> Result<()> {
    println!("vela {} -- Ctrl-D to exit", env!("CARGO_PKG_VERSION"));

    let mut editor = DefaultEditor::new()?;
    let history_path = history_path();
    if let Some(path) = &history_path {
        let _ = editor.load_history(path);
    }

    let mut repl = ReplCore::new();
    let mut pending = MultilineInput::new();

    loop {
        let prompt = if pending.is_empty() { "> " } else { "... " };
        match editor.readline(prompt) {
            Ok(line) => {
                pending.add_line(&line);
                let _ = editor.add_history_entry(&line);

                if let InputCompleteness::Incomplete { .. } = pending.check_completeness() {
                    continue;
                }

                let source = pending.combined();
                pending.clear();
                if source.trim().is_empty() {
                    continue;
                }

                let result = repl.eval_line(&source);
                for diag in &result.diagnostics {
                    eprintln!("{}", diag.to_human_string());
                }
            }
            Err(ReadlineError::Interrupted) => {
                pending.clear();
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }

    if let Some(path) = &history_path {
        let _ = editor.save_history(path);
    }
    Ok(())
}

fn history_path() -> Option<std::path::PathBuf> {
    let mut dir = dirs::data_dir()?;
    dir.push("vela");
    std::fs::create_dir_all(&dir).ok()?;
    dir.push("history.txt");
    Some(dir)
}
