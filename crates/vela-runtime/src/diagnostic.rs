//! Structured compile/runtime diagnostics, renderable as plain text or JSON.

use serde::{Deserialize, Serialize};

/// Severity of a diagnostic. This language only ever reports errors, but the level
/// is kept (rather than collapsed away) so the human/JSON renderers have a uniform shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
}

/// One frame of a runtime stack trace, innermost first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceFrame {
    pub function: String,
    pub line: u32,
}

/// A single compile-time or runtime diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    pub line: u32,
    /// Set for compile errors: the lexeme or context the error occurred at, if any
    /// ("at end", "at '<lexeme>'", or omitted for scanner-originated errors).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Set for runtime errors: the unwound call stack, innermost first.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub trace: Vec<TraceFrame>,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_human_string())
    }
}

impl Diagnostic {
    pub fn compile_error(line: u32, location: Option<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            message: message.into(),
            line,
            location,
            trace: Vec::new(),
        }
    }

    pub fn runtime_error(line: u32, message: impl Into<String>, trace: Vec<TraceFrame>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            message: message.into(),
            line,
            location: None,
            trace,
        }
    }

    /// Render in the exact `[line N] Error <where>: <msg>` wire format for compile errors,
    /// or `<msg>\n[line N] in <fn>` stack-trace format for runtime errors.
    pub fn to_human_string(&self) -> String {
        if self.trace.is_empty() && self.location.is_some() {
            let where_ = self.location.as_deref().unwrap_or("");
            format!("[line {}] Error{}: {}", self.line, where_, self.message)
        } else if !self.trace.is_empty() {
            let mut out = format!("{}\n", self.message);
            for frame in &self.trace {
                let name = if frame.function.is_empty() {
                    "script"
                } else {
                    frame.function.as_str()
                };
                out.push_str(&format!("[line {}] in {}\n", frame.line, name));
            }
            out.pop();
            out
        } else {
            format!("[line {}] Error: {}", self.line, self.message)
        }
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_compile_error_wire_format() {
        let diag = Diagnostic::compile_error(3, Some(" at end".to_string()), "Expect expression.");
        assert_eq!(diag.to_human_string(), "[line 3] Error at end: Expect expression.");
    }

    #[test]
    fn renders_runtime_stack_trace() {
        let diag = Diagnostic::runtime_error(
            5,
            "Undefined variable 'x'.",
            vec![
                TraceFrame { function: "f".to_string(), line: 5 },
                TraceFrame { function: String::new(), line: 9 },
            ],
        );
        let rendered = diag.to_human_string();
        assert!(rendered.starts_with("Undefined variable 'x'.\n"));
        assert!(rendered.contains("[line 5] in f"));
        assert!(rendered.contains("[line 9] in script"));
    }

    #[test]
    fn json_round_trips_basic_fields() {
        let diag = Diagnostic::compile_error(1, None, "oops");
        let json = diag.to_json_string();
        assert!(json.contains("\"line\":1"));
    }
}
