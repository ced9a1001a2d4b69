// Taffy Error Handling
// Host-level errors (syntax, import, configuration, I/O) with spans and
// source excerpts. Language-level exceptions live in the evaluator's
// exception slot instead; see `evaluator::Unwind`.

use colored::*;
use std::fmt;

/// A location in a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    /// Index into the runtime's file table
    pub file_id: u32,
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(file_id: u32, line: u32, column: u32) -> Self {
        Self {
            file_id,
            line,
            column,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self {
            file_id: 0,
            line: 1,
            column: 1,
        }
    }
}

/// Start and end of a token or construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn single(position: Position) -> Self {
        Self {
            start: position,
            end: position,
        }
    }

    pub fn to(self, other: Span) -> Self {
        Self {
            start: self.start,
            end: other.end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SyntaxError,
    ImportError,
    IoError,
    ConfigError,
    MarshallError,
    RuntimeError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::ImportError => "ImportError",
            ErrorKind::IoError => "IoError",
            ErrorKind::ConfigError => "ConfigError",
            ErrorKind::MarshallError => "MarshallError",
            ErrorKind::RuntimeError => "RuntimeError",
        };
        f.write_str(name)
    }
}

/// One line of a rendered call stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub method_name: String,
    pub file: String,
    pub line: u32,
}

impl StackFrame {
    pub fn new(method_name: impl Into<String>, file: impl Into<String>, line: u32) -> Self {
        Self {
            method_name: method_name.into(),
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  at {} ({}:{})", self.method_name, self.file, self.line)
    }
}

/// Host error for Taffy
#[derive(Debug, Clone)]
pub struct TaffyError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Span,
    pub file: String,
    pub help: Option<String>,
    pub stack_trace: Vec<StackFrame>,
    source_lines: Vec<String>,
}

impl TaffyError {
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        span: Span,
        file: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
            file: file.into(),
            help: None,
            stack_trace: Vec::new(),
            source_lines: Vec::new(),
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source_lines = source.lines().map(String::from).collect();
        self
    }

    pub fn with_stack_trace(mut self, trace: Vec<StackFrame>) -> Self {
        self.stack_trace = trace;
        self
    }

    pub fn syntax_error(message: impl Into<String>, span: Span, file: impl Into<String>) -> Self {
        Self::new(ErrorKind::SyntaxError, message, span, file)
    }

    pub fn import_error(message: impl Into<String>, file: impl Into<String>) -> Self {
        Self::new(ErrorKind::ImportError, message, Span::default(), file)
    }

    pub fn io_error(error: &std::io::Error, file: impl Into<String>) -> Self {
        let file = file.into();
        Self::new(
            ErrorKind::IoError,
            format!("cannot read '{}': {}", file, error),
            Span::default(),
            file,
        )
    }

    pub fn config_error(message: impl Into<String>, file: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigError, message, Span::default(), file)
    }

    pub fn runtime_error(message: impl Into<String>, file: impl Into<String>) -> Self {
        Self::new(ErrorKind::RuntimeError, message, Span::default(), file)
    }

    /// Render with colors: header, up to three lines of context, help, trace
    pub fn format(&self) -> String {
        let mut output = format!(
            "{}: {} at {}:{}:{}\n",
            self.kind.to_string().red().bold(),
            self.message.white().bold(),
            self.file,
            self.span.start.line,
            self.span.start.column
        );

        let error_line = self.span.start.line as usize;
        if !self.source_lines.is_empty() && error_line > 0 {
            output.push('\n');
            let first = error_line.saturating_sub(1).max(1);
            let last = (error_line + 1).min(self.source_lines.len());
            for line_num in first..=last {
                let Some(content) = self.source_lines.get(line_num - 1) else {
                    continue;
                };
                let gutter = format!("{:>4} |", line_num);
                if line_num == error_line {
                    output.push_str(&format!("{} {}\n", gutter.red(), content));
                    let start = self.span.start.column as usize;
                    let width = (self.span.end.column as usize)
                        .saturating_sub(start)
                        .max(1);
                    output.push_str(&format!(
                        "{}{}\n",
                        " ".repeat(6 + start),
                        "^".repeat(width).red().bold()
                    ));
                } else {
                    output.push_str(&format!("{} {}\n", gutter.dimmed(), content));
                }
            }
        }

        if let Some(help) = &self.help {
            output.push_str(&format!("\n      {}: {}\n", "Help".cyan().bold(), help));
        }

        if !self.stack_trace.is_empty() {
            output.push_str(&format!("\n{}:\n", "Stack trace".yellow().bold()));
            for frame in &self.stack_trace {
                output.push_str(&format!("{}\n", frame));
            }
        }

        output
    }
}

impl fmt::Display for TaffyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

impl std::error::Error for TaffyError {}

/// Result type for host-level Taffy operations
pub type TaffyResult<T> = Result<T, TaffyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_header_names_kind_and_location() {
        colored::control::set_override(false);
        let span = Span::single(Position::new(0, 3, 5));
        let error = TaffyError::syntax_error("unexpected ']'", span, "main.ty");
        let text = error.format();
        assert!(text.starts_with("SyntaxError: unexpected ']' at main.ty:3:5"));
    }

    #[test]
    fn test_error_excerpt_and_help() {
        colored::control::set_override(false);
        let span = Span::new(Position::new(0, 2, 1), Position::new(0, 2, 4));
        let error = TaffyError::syntax_error("bad", span, "f.ty")
            .with_source("a = 1\nb = ]\nc = 2")
            .with_help("remove the bracket");
        let text = error.format();
        assert!(text.contains("   2 | b = ]"));
        assert!(text.contains("Help: remove the bracket"));
    }

    #[test]
    fn test_stack_frame_display() {
        let frame = StackFrame::new("loop", "c.ty", 7);
        assert_eq!(frame.to_string(), "  at loop (c.ty:7)");
    }
}
