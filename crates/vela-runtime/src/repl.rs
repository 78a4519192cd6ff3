//! REPL core logic (UI-agnostic). A thin persistent wrapper around [`Vm`]:
//! each line runs against the same VM, so globals and functions defined on
//! one line are visible to the next.

use std::path::Path;

use crate::diagnostic::Diagnostic;
use crate::runtime::ProgramError;
use crate::vm::Vm;

/// Result of evaluating one line (or file) of input.
pub struct ReplResult {
    /// Diagnostics produced by compiling or running the input. Empty on success.
    pub diagnostics: Vec<Diagnostic>,
}

impl ReplResult {
    fn ok() -> Self {
        Self { diagnostics: Vec::new() }
    }

    fn from_error(err: ProgramError) -> Self {
        Self {
            diagnostics: err.diagnostics().into_iter().cloned().collect(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Persistent REPL state: one `Vm` that every `eval_line` call runs against.
pub struct ReplCore {
    vm: Vm,
}

impl ReplCore {
    pub fn new() -> Self {
        Self { vm: Vm::new() }
    }

    /// Compile and run one line (or accumulated multi-line chunk) of source.
    /// State persists across calls regardless of whether this call errors,
    /// matching a REPL's usual contract: a typo on one line doesn't erase
    /// variables defined on earlier lines.
    pub fn eval_line(&mut self, input: &str) -> ReplResult {
        match crate::runtime::run_source(&mut self.vm, input) {
            Ok(()) => ReplResult::ok(),
            Err(err) => ReplResult::from_error(err),
        }
    }

    /// Load and run a file in this REPL's persistent context.
    pub fn load_file(&mut self, path: &Path) -> ReplResult {
        match crate::runtime::run_file(&mut self.vm, path) {
            Ok(()) => ReplResult::ok(),
            Err(err) => ReplResult::from_error(err),
        }
    }
}

impl Default for ReplCore {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether accumulated input has balanced delimiters and can be sent to
/// [`ReplCore::eval_line`], or needs another line first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCompleteness {
    Complete,
    Incomplete { reason: IncompleteReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncompleteReason {
    UnclosedBrace,
    UnclosedParen,
    UnclosedString,
}

impl IncompleteReason {
    pub fn description(&self) -> &'static str {
        match self {
            IncompleteReason::UnclosedBrace => "unclosed brace '{'",
            IncompleteReason::UnclosedParen => "unclosed parenthesis '('",
            IncompleteReason::UnclosedString => "unclosed string literal",
        }
    }
}

/// Accumulates lines typed at a REPL prompt until they form a complete,
/// balanced chunk worth compiling.
#[derive(Default)]
pub struct MultilineInput {
    lines: Vec<String>,
}

impl MultilineInput {
    pub fn new() -> Self {
        Self { lines: Vec::new() }
    }

    pub fn add_line(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }

    pub fn check_completeness(&self) -> InputCompleteness {
        is_input_complete(&self.lines.join("\n"))
    }

    pub fn combined(&self) -> String {
        self.lines.join("\n")
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Balance braces, parens and strings across line comments (`//`). This
/// language has no block comments, so unlike a richer REPL there is no
/// unclosed-comment case to detect.
pub fn is_input_complete(input: &str) -> InputCompleteness {
    let mut brace_depth = 0i32;
    let mut paren_depth = 0i32;
    let mut in_string = false;
    let mut in_line_comment = false;
    let mut escape_next = false;

    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();

        if escape_next {
            escape_next = false;
            i += 1;
            continue;
        }

        if in_line_comment {
            if ch == '\n' {
                in_line_comment = false;
            }
            i += 1;
            continue;
        }

        if in_string {
            if ch == '\\' {
                escape_next = true;
            } else if ch == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match ch {
            '/' if next == Some('/') => {
                in_line_comment = true;
                i += 2;
                continue;
            }
            '"' => in_string = true,
            '{' => brace_depth += 1,
            '}' => brace_depth -= 1,
            '(' => paren_depth += 1,
            ')' => paren_depth -= 1,
            _ => {}
        }
        i += 1;
    }

    if in_string {
        InputCompleteness::Incomplete { reason: IncompleteReason::UnclosedString }
    } else if brace_depth > 0 {
        InputCompleteness::Incomplete { reason: IncompleteReason::UnclosedBrace }
    } else if paren_depth > 0 {
        InputCompleteness::Incomplete { reason: IncompleteReason::UnclosedParen }
    } else {
        InputCompleteness::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_persists_across_lines() {
        let mut repl = ReplCore::new();
        assert!(repl.eval_line("var x = 1;").is_ok());
        assert!(repl.eval_line("print x + 1;").is_ok());
    }

    #[test]
    fn an_error_does_not_reset_earlier_state() {
        let mut repl = ReplCore::new();
        assert!(repl.eval_line("var x = 1;").is_ok());
        assert!(!repl.eval_line("print y;").is_ok());
        assert!(repl.eval_line("print x;").is_ok());
    }

    #[test]
    fn unclosed_brace_is_incomplete() {
        let mut input = MultilineInput::new();
        input.add_line("fun f() {");
        assert_eq!(
            input.check_completeness(),
            InputCompleteness::Incomplete { reason: IncompleteReason::UnclosedBrace }
        );
        input.add_line("}");
        assert_eq!(input.check_completeness(), InputCompleteness::Complete);
    }

    #[test]
    fn unclosed_string_is_incomplete() {
        let mut input = MultilineInput::new();
        input.add_line(r#"print "hello;"#);
        assert_eq!(
            input.check_completeness(),
            InputCompleteness::Incomplete { reason: IncompleteReason::UnclosedString }
        );
    }

    #[test]
    fn a_comment_does_not_count_its_braces() {
        let mut input = MultilineInput::new();
        input.add_line("// unbalanced { on purpose");
        assert_eq!(input.check_completeness(), InputCompleteness::Complete);
    }
}
