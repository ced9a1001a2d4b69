// Taffy Call Stack
// One entry per method activation, kept for exception traces

use std::fmt;
use std::sync::Arc;

use crate::error::StackFrame;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStackData {
    pub method_name: Arc<str>,
    pub file: Arc<str>,
    pub line: u32,
}

impl CallStackData {
    pub fn new(method_name: impl Into<Arc<str>>, file: impl Into<Arc<str>>, line: u32) -> Self {
        Self {
            method_name: method_name.into(),
            file: file.into(),
            line,
        }
    }

    pub fn to_frame(&self) -> StackFrame {
        StackFrame::new(self.method_name.as_ref(), self.file.as_ref(), self.line)
    }
}

impl fmt::Display for CallStackData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.method_name, self.file, self.line)
    }
}

/// Innermost call first, one `at` line each
pub fn format_call_stack(stack: &[Arc<CallStackData>]) -> String {
    stack
        .iter()
        .rev()
        .map(|data| format!("    at {}", data))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_call_stack_innermost_first() {
        let stack = vec![
            Arc::new(CallStackData::new("main", "a.ty", 1)),
            Arc::new(CallStackData::new("A#run", "a.ty", 7)),
        ];
        assert_eq!(
            format_call_stack(&stack),
            "    at A#run (a.ty:7)\n    at main (a.ty:1)"
        );
    }
}
